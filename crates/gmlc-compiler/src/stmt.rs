//! Émission des instructions : affectations, contrôle de flux, `try`,
//! déclarations. Une instruction laisse la pile de types inchangée.

use gmlc_ast::{AssignOp, BinaryOp, Block, Declarator, Expr, Stmt, SwitchArm, Variable};
use gmlc_builtins::internal;
use gmlc_core::{BreakType, ComparisonType, DataType, InstanceType, Instruction, Opcode, VariableType};

use crate::context::{CodeContext, LoopContext, LoopKind, VarRef};
use crate::expr::Operand;
use crate::patch::{AddressPatch, ForwardPatch};
use crate::{CResult, CompileErrorKind, RETURN_TEMP};

impl CodeContext<'_> {
    pub(crate) fn stmt(&mut self, s: &Stmt) -> CResult<()> {
        self.pos = s.pos();
        match s {
            Stmt::Expr { expr, .. } => {
                self.expr(expr)?;
                self.discard()
            }
            Stmt::Assign { target, op, value, .. } => self.assign(target, *op, value),
            Stmt::IncDec { target, increment, .. } => {
                let op = if *increment { BinaryOp::Add } else { BinaryOp::Sub };
                match target {
                    Expr::Variable(v) if v.indices.is_empty() => self.step_simple(v, op),
                    _ => self.read_modify_write(target, op, Operand::One),
                }
            }
            Stmt::Var { decls, .. } => self.local_declarations(decls),
            Stmt::GlobalVar { names, .. } => {
                self.globals.extend(names.iter().cloned());
                Ok(())
            }
            Stmt::Static { decls, .. } => self.static_declarations(decls),
            Stmt::Block(b) => self.block(b),
            Stmt::If { cond, then, otherwise, .. } => self.if_stmt(cond, then, otherwise.as_deref()),
            Stmt::While { cond, body, .. } => self.while_stmt(cond, body),
            Stmt::For { init, cond, step, body, .. } => {
                self.for_stmt(init.as_deref(), cond.as_ref(), step.as_deref(), body)
            }
            Stmt::DoUntil { body, cond, .. } => self.do_until(body, cond),
            Stmt::Repeat { count, body, .. } => self.repeat(count, body),
            Stmt::With { target, body, .. } => self.with(target, body),
            Stmt::Switch { value, arms, .. } => self.switch(value, arms),
            Stmt::Break(_) => self.break_stmt(),
            Stmt::Continue(_) => self.continue_stmt(),
            Stmt::Exit(_) | Stmt::Return { value: None, .. } => {
                self.unwind_loops();
                self.emit_single(Opcode::Exit, DataType::Int32);
                Ok(())
            }
            Stmt::Return { value: Some(v), .. } => self.return_value(v),
            Stmt::Throw { value, .. } => {
                self.expr(value)?;
                self.convert_to(DataType::Variable)?;
                self.emit_call_discard(internal::THROW, 1)
            }
            Stmt::Try { body, catch, finally, .. } => self.try_stmt(body, catch.as_ref(), finally.as_ref()),
            Stmt::Function(f) => {
                let name = self.function_body(f)?;
                self.bind_method(&name, InstanceType::SELF)?;
                self.emit_pop_variable(
                    DataType::Variable,
                    DataType::Variable,
                    &VarRef::normal(name, InstanceType::SELF),
                );
                Ok(())
            }
            Stmt::Delete { .. } => Err(self.error(CompileErrorKind::Unsupported("delete"))),
            Stmt::Enum { .. } | Stmt::Empty(_) => Ok(()),
        }
    }

    fn block(&mut self, b: &Block) -> CResult<()> {
        b.stmts.iter().try_for_each(|s| self.stmt(s))
    }

    /* ─────────── Affectations ─────────── */

    fn assign(&mut self, target: &Expr, op: AssignOp, value: &Expr) -> CResult<()> {
        if op == AssignOp::NullCoalesce {
            return Err(self.error(CompileErrorKind::Unsupported("null coalescing assignment")));
        }
        match (target, op.binary()) {
            (Expr::Variable(v), None) if v.indices.is_empty() => {
                self.expr(value)?;
                self.store_simple(v)
            }
            (Expr::Variable(v), Some(bin)) if v.indices.is_empty() => {
                self.expr(target)?;
                self.convert_for_binary(bin)?;
                self.expr(value)?;
                self.convert_for_binary(bin)?;
                self.apply_binary(bin)?;
                self.store_simple(v)
            }
            (_, None) => self.indexed_store(target, value),
            (_, Some(bin)) => self.read_modify_write(target, bin, Operand::Expr(value)),
        }
    }

    /// `pop.v.T` vers une variable simple ; dépile le type de la valeur.
    fn store_simple(&mut self, v: &Variable) -> CResult<()> {
        let t = self.pop_type()?;
        let (name, instance) = self.resolve_variable(v);
        self.emit_pop_variable(DataType::Variable, t, &VarRef::normal(name, instance));
        Ok(())
    }

    /// `x++` / `x--` en instruction : `push x; push.e 1; add.i.v; pop.v.v x`.
    fn step_simple(&mut self, v: &Variable, op: BinaryOp) -> CResult<()> {
        let (name, instance) = self.resolve_variable(v);
        self.emit_push_variable(Self::push_opcode(v, instance), &VarRef::normal(name, instance));
        self.push_type(DataType::Variable);
        self.emit_push_e(1);
        self.push_type(DataType::Int32);
        self.apply_binary(op)?;
        self.store_simple(v)
    }

    fn indexed_store(&mut self, target: &Expr, value: &Expr) -> CResult<()> {
        self.expr(value)?;
        self.convert_to(DataType::Variable)?;
        match target {
            Expr::Variable(v) => {
                let (name, instance) = self.resolve_variable(v);
                self.emit_pushi(instance.0);
                self.push_type(DataType::Int32);
                self.convert_to_instance()?;
                self.indexed_pop(&name, instance, &v.indices)
            }
            Expr::Chain { left, right, .. } => {
                let Expr::Variable(v) = right.as_ref() else {
                    return Err(self.error(CompileErrorKind::InvalidOperand("cannot assign to a call".into())));
                };
                self.expr(left)?;
                self.convert_to_instance()?;
                if v.indices.is_empty() {
                    let var = VarRef::on_stack(&v.name, InstanceType::SELF, VariableType::StackTop);
                    self.emit_pop_variable(DataType::Variable, DataType::Variable, &var);
                    Ok(())
                } else {
                    self.indexed_pop(&v.name, InstanceType::SELF, &v.indices)
                }
            }
            other => Err(self.error(CompileErrorKind::InvalidOperand(format!("cannot assign to {other:?}")))),
        }
    }

    /// Indices puis `pop.v.v [array]`, ou `[multipushpop]` … `popaf` en 2.3.
    fn indexed_pop(&mut self, name: &str, scope: InstanceType, indices: &[Expr]) -> CResult<()> {
        let (first, rest) = self.array_head(indices)?;
        self.first_index(first)?;
        let Some((last, middle)) = rest.split_last() else {
            let var = VarRef::on_stack(name, scope, VariableType::Array);
            self.emit_pop_variable(DataType::Variable, DataType::Variable, &var);
            return Ok(());
        };
        let var = VarRef::on_stack(name, scope, VariableType::MultiPushPop);
        self.emit_push_variable(Opcode::Push, &var);
        for idx in middle {
            self.index(idx)?;
            self.emit_break(BreakType::PushAc);
        }
        self.index(last)?;
        self.emit_break(BreakType::PopAf);
        Ok(())
    }

    /// Affectation composée ou `++`/`--` sur un élément ou un membre :
    /// instance et indice dupliqués, lecture, opération, `pop.i.T`.
    fn read_modify_write(&mut self, target: &Expr, op: BinaryOp, operand: Operand<'_>) -> CResult<()> {
        let (var, depth) = match target {
            Expr::Variable(v) => {
                let (name, instance) = self.resolve_variable(v);
                let (first, rest) = self.array_head(&v.indices)?;
                if !rest.is_empty() {
                    return Err(self.error(CompileErrorKind::Unsupported(
                        "compound assignment on multi-dimensional arrays",
                    )));
                }
                self.emit_pushi(instance.0);
                self.push_type(DataType::Int32);
                self.convert_to(DataType::Int32)?;
                self.first_index(first)?;
                (VarRef::on_stack(name, instance, VariableType::Array), 1)
            }
            Expr::Chain { left, right, .. } => {
                let Expr::Variable(v) = right.as_ref() else {
                    return Err(self.error(CompileErrorKind::InvalidOperand("cannot assign to a call".into())));
                };
                self.expr(left)?;
                self.convert_to(DataType::Int32)?;
                if v.indices.is_empty() {
                    (VarRef::on_stack(&v.name, InstanceType::SELF, VariableType::StackTop), 0)
                } else {
                    let (first, rest) = self.array_head(&v.indices)?;
                    if !rest.is_empty() {
                        return Err(self.error(CompileErrorKind::Unsupported(
                            "compound assignment on multi-dimensional arrays",
                        )));
                    }
                    self.first_index(first)?;
                    (VarRef::on_stack(&v.name, InstanceType::SELF, VariableType::Array), 1)
                }
            }
            other => {
                return Err(self.error(CompileErrorKind::InvalidOperand(format!("cannot assign to {other:?}"))));
            }
        };

        self.emit_dup(DataType::Int32, depth);
        self.emit_push_variable(Opcode::Push, &var);
        self.push_type(DataType::Variable);
        self.convert_for_binary(op)?;
        match operand {
            Operand::Expr(e) => {
                self.expr(e)?;
                self.convert_for_binary(op)?;
            }
            Operand::One => {
                self.emit_push_e(1);
                self.push_type(DataType::Int32);
            }
        }
        self.apply_binary(op)?;
        let result = self.pop_type()?;
        self.emit_pop_variable(DataType::Int32, result, &var);
        Ok(())
    }

    /* ─────────── Déclarations ─────────── */

    fn local_declarations(&mut self, decls: &[Declarator]) -> CResult<()> {
        for d in decls {
            self.scope_mut().locals.insert(d.name.clone());
            if let Some(value) = &d.value {
                self.pos = d.pos;
                self.expr(value)?;
                let t = self.pop_type()?;
                self.emit_pop_variable(DataType::Variable, t, &VarRef::normal(&d.name, InstanceType::LOCAL));
            }
        }
        Ok(())
    }

    /// `isstaticok` / `bt` / initialisations / `setstatic`.
    fn static_declarations(&mut self, decls: &[Declarator]) -> CResult<()> {
        if !self.env.target.is_gms2_3() || !self.scope().in_function {
            return Err(self.error(CompileErrorKind::Unsupported("static outside of a function")));
        }
        self.emit_break(BreakType::IsStaticOk);
        let mut skip = ForwardPatch::from_site(self.emit_branch(Opcode::Bt));
        for d in decls {
            self.scope_mut().statics.insert(d.name.clone());
            if let Some(value) = &d.value {
                self.pos = d.pos;
                self.expr(value)?;
                let t = self.pop_type()?;
                self.emit_pop_variable(DataType::Variable, t, &VarRef::normal(&d.name, InstanceType::STATIC));
            }
        }
        self.emit_break(BreakType::SetStatic);
        self.land(&mut skip);
        Ok(())
    }

    /* ─────────── Contrôle de flux ─────────── */

    fn condition(&mut self, cond: &Expr) -> CResult<()> {
        self.expr(cond)?;
        self.convert_to(DataType::Boolean)?;
        Ok(())
    }

    fn pop_loop(&mut self) -> CResult<LoopContext> {
        self.loops.pop().ok_or_else(|| self.error(CompileErrorKind::BreakOutsideLoop))
    }

    fn if_stmt(&mut self, cond: &Expr, then: &Stmt, otherwise: Option<&Stmt>) -> CResult<()> {
        self.condition(cond)?;
        let mut to_else = ForwardPatch::from_site(self.emit_branch(Opcode::Bf));
        self.stmt(then)?;
        match otherwise {
            Some(o) => {
                let mut end = ForwardPatch::from_site(self.emit_branch(Opcode::B));
                self.land(&mut to_else);
                self.stmt(o)?;
                self.land(&mut end);
            }
            None => self.land(&mut to_else),
        }
        Ok(())
    }

    fn while_stmt(&mut self, cond: &Expr, body: &Stmt) -> CResult<()> {
        let head = self.length;
        self.condition(cond)?;
        let mut end = ForwardPatch::from_site(self.emit_branch(Opcode::Bf));
        self.loops.push(LoopContext::looping_back_to(LoopKind::Basic, head));
        self.stmt(body)?;
        let mut l = self.pop_loop()?;
        self.emit_branch_to(Opcode::B, head);
        self.land(&mut end);
        self.land(&mut l.breaks);
        Ok(())
    }

    fn for_stmt(&mut self, init: Option<&Stmt>, cond: Option<&Expr>, step: Option<&Stmt>, body: &Stmt) -> CResult<()> {
        if let Some(init) = init {
            self.stmt(init)?;
        }
        let head = self.length;
        match cond {
            Some(c) => self.condition(c)?,
            None => {
                self.emit_pushi(1);
            }
        }
        let mut end = ForwardPatch::from_site(self.emit_branch(Opcode::Bf));
        self.loops.push(LoopContext::new(LoopKind::Basic));
        self.stmt(body)?;
        let mut l = self.pop_loop()?;
        self.land(&mut l.continues);
        if let Some(step) = step {
            self.stmt(step)?;
        }
        self.emit_branch_to(Opcode::B, head);
        self.land(&mut end);
        self.land(&mut l.breaks);
        Ok(())
    }

    fn do_until(&mut self, body: &Stmt, cond: &Expr) -> CResult<()> {
        let head = self.length;
        self.loops.push(LoopContext::new(LoopKind::Basic));
        self.stmt(body)?;
        let mut l = self.pop_loop()?;
        self.land(&mut l.continues);
        self.condition(cond)?;
        self.emit_branch_to(Opcode::Bf, head);
        self.land(&mut l.breaks);
        Ok(())
    }

    /// Compteur gardé sur la pile pendant toute la boucle, retiré par `popz.i`.
    fn repeat(&mut self, count: &Expr, body: &Stmt) -> CResult<()> {
        self.expr(count)?;
        self.convert_to(DataType::Int32)?;
        self.emit_dup(DataType::Int32, 0);
        self.emit_pushi(0);
        self.emit_cmp(ComparisonType::Lte, DataType::Int32, DataType::Int32);
        let mut end = ForwardPatch::from_site(self.emit_branch(Opcode::Bt));

        let head = self.length;
        self.loops.push(LoopContext::new(LoopKind::Repeat));
        self.stmt(body)?;
        let mut l = self.pop_loop()?;
        self.land(&mut l.continues);
        self.emit_push_i32(1);
        self.emit_op(Opcode::Sub, DataType::Int32, DataType::Int32);
        self.emit_dup(DataType::Int32, 0);
        self.emit_op(Opcode::Conv, DataType::Int32, DataType::Boolean);
        self.emit_branch_to(Opcode::Bt, head);

        self.land(&mut end);
        self.land(&mut l.breaks);
        self.emit_single(Opcode::Popz, DataType::Int32);
        Ok(())
    }

    /// `pushenv` saute au `popenv` ; un `break` sort par un `popenv` magique.
    fn with(&mut self, target: &Expr, body: &Stmt) -> CResult<()> {
        self.expr(target)?;
        self.convert_to_instance()?;
        let mut to_popenv = ForwardPatch::from_site(self.emit_branch(Opcode::PushEnv));

        let head = self.length;
        self.loops.push(LoopContext::new(LoopKind::With));
        self.stmt(body)?;
        let mut l = self.pop_loop()?;
        self.land(&mut to_popenv);
        self.land(&mut l.continues);
        self.emit_branch_to(Opcode::PopEnv, head);

        if l.break_used {
            let mut end = ForwardPatch::from_site(self.emit_branch(Opcode::B));
            self.land(&mut l.breaks);
            self.emit_popenv_exit();
            self.land(&mut end);
        }
        Ok(())
    }

    fn emit_popenv_exit(&mut self) {
        let mut ins = Instruction::new(Opcode::PopEnv);
        ins.exit_magic = true;
        self.emit(ins);
    }

    /// Tests `dup`/`cmp EQ`/`bt` en tête, puis les bras dans l'ordre source.
    fn switch(&mut self, value: &Expr, arms: &[SwitchArm]) -> CResult<()> {
        self.expr(value)?;
        let t = self.pop_type()?;

        let mut arm_jumps = Vec::with_capacity(arms.len());
        for arm in arms {
            match &arm.label {
                Some(label) => {
                    self.emit_dup(t, 0);
                    self.expr(label)?;
                    let lt = self.pop_type()?;
                    self.emit_cmp(ComparisonType::Eq, lt, t);
                    arm_jumps.push(ForwardPatch::from_site(self.emit_branch(Opcode::Bt)));
                }
                None => arm_jumps.push(ForwardPatch::new()),
            }
        }
        let mut fallback = ForwardPatch::from_site(self.emit_branch(Opcode::B));
        let default = arms.iter().position(|a| a.label.is_none());

        self.loops.push(LoopContext::new(LoopKind::Switch(t)));
        for (i, (arm, jump)) in arms.iter().zip(arm_jumps.iter_mut()).enumerate() {
            self.land(jump);
            if default == Some(i) {
                self.land(&mut fallback);
            }
            arm.body.iter().try_for_each(|s| self.stmt(s))?;
        }
        let mut l = self.pop_loop()?;
        self.land(&mut fallback);
        self.land(&mut l.breaks);
        self.emit_single(Opcode::Popz, t);
        Ok(())
    }

    fn break_stmt(&mut self) -> CResult<()> {
        if self.loops.is_empty() {
            return Err(self.error(CompileErrorKind::BreakOutsideLoop));
        }
        let site = self.emit_branch(Opcode::B);
        if let Some(l) = self.loops.last_mut() {
            l.breaks.add(site);
            l.break_used = true;
        }
        Ok(())
    }

    /// Les `switch` traversés retirent leur valeur avant le saut.
    fn continue_stmt(&mut self) -> CResult<()> {
        let Some(at) = self.loops.iter().rposition(|l| !matches!(l.kind, LoopKind::Switch(_))) else {
            return Err(self.error(CompileErrorKind::ContinueOutsideLoop));
        };
        let switches: Vec<DataType> = self.loops[at + 1..]
            .iter()
            .rev()
            .filter_map(|l| match l.kind {
                LoopKind::Switch(t) => Some(t),
                _ => None,
            })
            .collect();
        for t in switches {
            self.emit_single(Opcode::Popz, t);
        }
        match self.loops[at].continue_target {
            Some(target) => {
                self.emit_branch_to(Opcode::B, target);
            }
            None => {
                let site = self.emit_branch(Opcode::B);
                self.loops[at].continues.add(site);
            }
        }
        Ok(())
    }

    /// Nettoyage des boucles ouvertes, de la plus interne à la plus externe.
    fn unwind_loops(&mut self) {
        let kinds: Vec<LoopKind> = self.loops.iter().rev().map(|l| l.kind).collect();
        for kind in kinds {
            match kind {
                LoopKind::With => self.emit_popenv_exit(),
                LoopKind::Switch(t) => {
                    self.emit_single(Opcode::Popz, t);
                }
                LoopKind::Repeat => {
                    self.emit_single(Opcode::Popz, DataType::Int32);
                }
                LoopKind::Basic => {}
            }
        }
    }

    fn return_value(&mut self, value: &Expr) -> CResult<()> {
        self.expr(value)?;
        self.convert_to(DataType::Variable)?;
        if self.loops.iter().any(|l| l.kind != LoopKind::Basic) {
            let temp = VarRef::normal(RETURN_TEMP, InstanceType::LOCAL);
            self.emit_pop_variable(DataType::Variable, DataType::Variable, &temp);
            self.unwind_loops();
            self.emit_push_variable(Opcode::PushLoc, &temp);
        }
        self.emit_single(Opcode::Ret, DataType::Variable);
        Ok(())
    }

    /* ─────────── try / catch / finally ─────────── */

    fn try_stmt(&mut self, body: &Block, catch: Option<&(String, Block)>, finally: Option<&Block>) -> CResult<()> {
        if !self.env.target.is_gms2_3() {
            return Err(self.error(CompileErrorKind::Unsupported("try before GMS2.3")));
        }
        let mut finally_addr = AddressPatch::new();
        let mut catch_addr = AddressPatch::new();
        finally_addr.add(self.emit_push_i32(0));
        self.emit_op(Opcode::Conv, DataType::Int32, DataType::Variable);
        if catch.is_some() {
            catch_addr.add(self.emit_push_i32(0));
        } else {
            self.emit_push_i32(-1);
        }
        self.emit_op(Opcode::Conv, DataType::Int32, DataType::Variable);
        self.emit_call_discard(internal::TRY_HOOK, 2)?;

        self.block(body)?;
        self.emit_call_discard(internal::TRY_UNHOOK, 0)?;

        let mut to_finally = ForwardPatch::new();
        if let Some((name, handler)) = catch {
            to_finally.add(self.emit_branch(Opcode::B));
            catch_addr.finish(&mut self.instructions, self.length);
            self.scope_mut().locals.insert(name.clone());
            self.emit_pop_variable(
                DataType::Variable,
                DataType::Variable,
                &VarRef::normal(name, InstanceType::LOCAL),
            );
            self.block(handler)?;
            self.emit_call_discard(internal::FINISH_CATCH, 0)?;
        }

        finally_addr.finish(&mut self.instructions, self.length);
        self.land(&mut to_finally);
        if let Some(f) = finally {
            self.block(f)?;
        }
        self.emit_call_discard(internal::FINISH_FINALLY, 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{compile, compile_gms2, shape};
    use crate::{CompileErrorKind, Symbol, RETURN_TEMP};
    use gmlc_core::{InstanceType, Value, VariableType};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn shape_src(src: &str) -> Vec<String> {
        shape(&compile(src).unwrap())
    }

    fn kind_of(src: &str) -> CompileErrorKind {
        compile(src).unwrap_err().kind
    }

    fn has_run(shape: &[String], run: &[&str]) -> bool {
        shape.windows(run.len()).any(|w| w.iter().zip(run).all(|(a, b)| a == b))
    }

    #[test]
    fn literal_widths() {
        assert_eq!(
            shape_src("foo = 32767; foo = 32768; foo = 2147483648; foo = 1.5;"),
            vec!["pushi.e 32767", "pop.v.i", "push.i", "pop.v.i", "push.l", "pop.v.l", "push.d", "pop.v.d"]
        );
    }

    #[test]
    fn compound_and_increment_on_simple_variables() {
        assert_eq!(shape_src("foo += 2;"), vec!["push.v", "pushi.e 2", "add.i.v", "pop.v.v"]);
        assert_eq!(shape_src("foo++;"), vec!["push.v", "push.e 1", "add.i.v", "pop.v.v"]);
        assert_eq!(shape_src("--foo;"), vec!["push.v", "push.e 1", "sub.i.v", "pop.v.v"]);
    }

    #[test]
    fn compound_on_array_element_duplicates_instance_and_index() {
        assert_eq!(
            shape_src("foo[0] += 1;"),
            vec!["pushi.e -1", "pushi.e 0", "dup.i 1", "push.v", "pushi.e 1", "add.i.v", "pop.i.v"]
        );
    }

    #[test]
    fn compound_on_nested_array_is_unsupported() {
        let nested = CompileErrorKind::Unsupported("compound assignment on multi-dimensional arrays");
        assert_eq!(kind_of("a[1][2] += 2;"), nested);
        assert_eq!(kind_of("a[1][2]++;"), nested);
        assert_eq!(kind_of("o.a[1][2] -= 1;"), nested);
        assert!(compile("a[1] += 1; a[1][2] = 3;").is_ok());
    }

    #[test]
    fn two_dimensional_store_before_2_3_folds_indices() {
        let p = compile_gms2("foo[1, 2] = 3;").unwrap();
        assert_eq!(
            shape(&p),
            vec!["pushi.e 3", "conv.i.v", "pushi.e -1", "pushi.e 1", "push.i", "mul.i.i", "pushi.e 2", "add.i.i", "pop.v.v"]
        );
        assert_eq!(p.instructions[4].value, Value::Int32(32000));
    }

    #[test]
    fn short_circuit_and() {
        assert_eq!(
            shape_src("foo = bar && baz;"),
            vec!["push.v", "conv.v.b", "bf +5", "push.v", "conv.v.b", "b +2", "push.e 0", "pop.v.b"]
        );
    }

    #[test]
    fn logical_xor_is_emitted_as_or() {
        let s = shape_src("foo = bar ^^ baz;");
        assert!(s.contains(&"or.b.b".to_owned()), "{s:?}");
    }

    #[test]
    fn builtin_arity_is_checked() {
        assert_eq!(
            kind_of("abs(1, 2);"),
            CompileErrorKind::ArityMismatch { name: "abs".into(), expected: 1, supplied: 2 }
        );
    }

    #[test]
    fn unknown_function_is_unresolved_before_2_3() {
        assert_eq!(compile_gms2("nope(1);").unwrap_err().kind, CompileErrorKind::UnresolvedName("nope".into()));
    }

    #[test]
    fn unknown_callee_is_read_as_a_variable_in_2_3() {
        assert!(compile("cb = function() { return 1; }; cb();").is_ok());
        let s = shape_src("cb(2);");
        assert_eq!(s, vec!["pushi.e 2", "conv.i.v", "call.i 0", "push.v", "callv.v 1", "popz.v"]);
    }

    #[test]
    fn call_statement_discards_result() {
        assert_eq!(shape_src("scr_helper(1);"), vec!["pushi.e 1", "conv.i.v", "call.i 1", "popz.v"]);
    }

    #[test]
    fn while_loop_jumps() {
        assert_eq!(
            shape_src("while (foo) { foo = 0; }"),
            vec!["push.v", "conv.v.b", "bf +5", "pushi.e 0", "pop.v.i", "b -7"]
        );
    }

    #[test]
    fn repeat_keeps_counter_on_stack() {
        assert_eq!(
            shape_src("repeat (3) { foo = 1; }"),
            vec![
                "pushi.e 3",
                "dup.i 0",
                "pushi.e 0",
                "cmp.i.i LTE",
                "bt +10",
                "pushi.e 1",
                "pop.v.i",
                "push.i",
                "sub.i.i",
                "dup.i 0",
                "conv.i.b",
                "bt -8",
                "popz.i",
            ]
        );
    }

    #[test]
    fn switch_tests_then_arms() {
        assert_eq!(
            shape_src("switch (foo) { case 1: bar = 1; break; default: bar = 2; }"),
            vec![
                "push.v",
                "dup.v 0",
                "pushi.e 1",
                "cmp.i.v EQ",
                "bt +2",
                "b +5",
                "pushi.e 1",
                "pop.v.i",
                "b +4",
                "pushi.e 2",
                "pop.v.i",
                "popz.v",
            ]
        );
    }

    #[test]
    fn with_pairs_pushenv_and_popenv() {
        assert_eq!(
            shape_src("with (foo) bar = 1;"),
            vec!["push.v", "pushi.e -9", "pushenv +4", "pushi.e 1", "pop.v.i", "popenv -3"]
        );
    }

    #[test]
    fn break_in_with_exits_through_magic_popenv() {
        let p = compile("with (foo) { break; }").unwrap();
        let last = p.instructions.last().unwrap();
        assert!(last.exit_magic);
        assert_eq!(p.instructions.iter().filter(|i| i.exit_magic).count(), 1);
    }

    #[test]
    fn break_and_continue_outside_loops() {
        assert_eq!(kind_of("break;"), CompileErrorKind::BreakOutsideLoop);
        assert_eq!(kind_of("continue;"), CompileErrorKind::ContinueOutsideLoop);
        assert_eq!(kind_of("switch (foo) { case 1: continue; }"), CompileErrorKind::ContinueOutsideLoop);
    }

    #[test]
    fn continue_through_switch_pops_its_value() {
        let s = shape_src("while (foo) { switch (bar) { case 1: continue; } }");
        assert!(s.windows(2).any(|w| w[0] == "popz.v" && w[1].starts_with("b -")), "{s:?}");
    }

    #[test]
    fn return_inside_repeat_goes_through_temp() {
        let p = compile("repeat (2) { return 5; }").unwrap();
        assert!(has_run(&shape(&p), &["pushi.e 5", "conv.i.v", "pop.v.v", "popz.i", "pushloc.v", "ret.v"]));
        assert!(p.refs.iter().any(|(_, s)| matches!(
            s,
            Symbol::Variable { name, scope: InstanceType::LOCAL, kind: VariableType::Normal } if name == RETURN_TEMP
        )));
        assert!(!p.locals.iter().any(|l| l == RETURN_TEMP));
    }

    #[test]
    fn plain_return_and_exit() {
        assert_eq!(shape_src("return 1;"), vec!["pushi.e 1", "conv.i.v", "ret.v"]);
        assert_eq!(shape_src("exit;"), vec!["exit.i"]);
    }

    #[test]
    fn var_declares_locals() {
        let p = compile("var a = 1, b; b = a;").unwrap();
        assert_eq!(p.locals, vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(shape(&p), vec!["pushi.e 1", "pop.v.i", "pushloc.v", "pop.v.v"]);
    }

    #[test]
    fn try_catch_addresses() {
        let p = compile("try { foo = 1; } catch (e) { bar = e; }").unwrap();
        assert_eq!(
            shape(&p),
            vec![
                "push.i",
                "conv.i.v",
                "push.i",
                "conv.i.v",
                "call.i 2",
                "popz.v",
                "pushi.e 1",
                "pop.v.i",
                "call.i 0",
                "popz.v",
                "b +10",
                "pop.v.v",
                "pushloc.v",
                "pop.v.v",
                "call.i 0",
                "popz.v",
                "call.i 0",
                "popz.v",
            ]
        );
        assert_eq!(p.instructions[0].value, Value::Int32(100));
        assert_eq!(p.instructions[2].value, Value::Int32(64));
        assert!(p.locals.contains(&"e".to_owned()));
    }

    #[test]
    fn try_without_catch_passes_minus_one() {
        let p = compile("try { foo = 1; } finally { bar = 2; }").unwrap();
        assert_eq!(p.instructions[2].value, Value::Int32(-1));
    }

    #[test]
    fn static_requires_a_function() {
        assert_eq!(kind_of("static a = 1;"), CompileErrorKind::Unsupported("static outside of a function"));
        let p = compile("function f() { static n = 0; n += 1; return n; }").unwrap();
        let s = shape(&p);
        assert!(has_run(&s, &["break.e -6", "bt +5", "pushi.e 0", "pop.v.i", "break.e -7"]), "{s:?}");
    }

    #[test]
    fn function_declaration_binds_a_method() {
        let p = compile("function f() { return 1; }").unwrap();
        assert_eq!(
            shape(&p),
            vec![
                "b +5",
                "pushi.e 1",
                "conv.i.v",
                "ret.v",
                "exit.i",
                "push.i",
                "conv.i.v",
                "pushi.e -1",
                "conv.i.v",
                "call.i 2",
                "pop.v.v",
            ]
        );
        assert_eq!(p.children.len(), 1);
        assert_eq!(p.children[0].name, "f");
        assert_eq!(p.children[0].offset, 4);
    }

    #[test]
    fn functions_need_2_3() {
        assert_eq!(
            compile_gms2("function f() {}").unwrap_err().kind,
            CompileErrorKind::Unsupported("functions before GMS2.3")
        );
    }

    #[test]
    fn struct_literal_makes_a_constructor() {
        let p = compile("foo = { a: 1 };").unwrap();
        assert_eq!(p.children.len(), 1);
        assert!(p.children[0].name.starts_with("___struct___0_"));
        assert!(p.children[0].constructor);
    }

    #[test]
    fn delete_is_unsupported() {
        assert_eq!(kind_of("delete foo;"), CompileErrorKind::Unsupported("delete"));
    }

    fn expression() -> impl Strategy<Value = String> {
        let leaf = prop_oneof![
            (0_u32..70_000).prop_map(|n| n.to_string()),
            Just("foo".to_owned()),
            Just("bar".to_owned()),
            Just("2.5".to_owned()),
        ];
        leaf.prop_recursive(4, 32, 3, |inner| {
            prop_oneof![
                (
                    inner.clone(),
                    prop::sample::select(vec!["+", "-", "*", "/", "&&", "||", "==", "<", "&", "|", "mod"]),
                    inner.clone()
                )
                    .prop_map(|(a, op, b)| format!("({a} {op} {b})")),
                inner.clone().prop_map(|a| format!("!({a})")),
                (inner.clone(), inner.clone(), inner).prop_map(|(c, a, b)| format!("({c} ? {a} : {b})")),
            ]
        })
    }

    proptest! {
        #[test]
        fn statements_leave_the_type_stack_balanced(e in expression()) {
            let src = format!("result = {e}; if ({e}) {{ scr_helper({e}); }}");
            prop_assert!(compile(&src).is_ok(), "{src}");
        }
    }
}
