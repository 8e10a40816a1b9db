//! Émission des expressions. Chaque expression laisse exactement un type de
//! plus sur la pile de types.

use gmlc_ast::{BinaryOp, Call, Expr, FunctionDecl, Literal, UnaryOp, Variable};
use gmlc_builtins::internal;
use gmlc_core::{BreakType, ComparisonType, DataType, InstanceType, Opcode, VariableType};

use crate::context::{CodeContext, FunctionScope, VarRef};
use crate::patch::ForwardPatch;
use crate::{CResult, CompileErrorKind};

const fn comparison(op: BinaryOp) -> Option<ComparisonType> {
    Some(match op {
        BinaryOp::Eq => ComparisonType::Eq,
        BinaryOp::Neq => ComparisonType::Neq,
        BinaryOp::Lt => ComparisonType::Lt,
        BinaryOp::Lte => ComparisonType::Lte,
        BinaryOp::Gt => ComparisonType::Gt,
        BinaryOp::Gte => ComparisonType::Gte,
        _ => return None,
    })
}

/// Opcode d'un opérateur non comparatif. `^^` et `^` émettent `or`, comme
/// le compilateur d'origine du format.
const fn arithmetic(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::IntDiv => Opcode::Rem,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::Shl => Opcode::Shl,
        BinaryOp::Shr => Opcode::Shr,
        BinaryOp::And | BinaryOp::BitAnd => Opcode::And,
        BinaryOp::Or | BinaryOp::BitOr | BinaryOp::Xor | BinaryOp::BitXor => Opcode::Or,
        BinaryOp::Eq | BinaryOp::Neq | BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => Opcode::Cmp,
    }
}

/// Type résultat d'un opérateur binaire non comparatif.
pub(crate) fn result_type(top: DataType, second: DataType) -> DataType {
    let (b1, b2) = (top.bias(), second.bias());
    if b1 == b2 {
        if (top as u8) <= (second as u8) {
            top
        } else {
            second
        }
    } else if b1 > b2 {
        top
    } else {
        second
    }
}

/// Second opérande d'une opération de lecture-modification-écriture.
#[derive(Clone, Copy)]
pub(crate) enum Operand<'e> {
    Expr(&'e Expr),
    /// `push.e 1` des `++`/`--`.
    One,
}

impl CodeContext<'_> {
    /// Compile `e` ; la pile de types gagne une entrée.
    pub(crate) fn expr(&mut self, e: &Expr) -> CResult<()> {
        self.pos = e.pos();
        match e {
            Expr::Literal { value, .. } => {
                self.literal(value);
                Ok(())
            }
            Expr::Variable(v) => self.read_variable(v),
            Expr::Chain { left, right, .. } => self.read_chain(left, right),
            Expr::Call(c) => self.call(c),
            Expr::Binary { op, operands, .. } => self.binary(*op, operands),
            Expr::Unary { op, operand, .. } => self.unary(*op, operand),
            Expr::Prefix { target, increment, .. } => self.step_expression(target, *increment, true),
            Expr::Postfix { target, increment, .. } => self.step_expression(target, *increment, false),
            Expr::Conditional { cond, then, otherwise, .. } => self.conditional(cond, then, otherwise),
            Expr::NullCoalesce { .. } => Err(self.error(CompileErrorKind::Unsupported("null coalescing"))),
            Expr::Array { elements, .. } => {
                self.arguments(elements)?;
                self.emit_call(internal::NEW_ARRAY, elements.len())?;
                self.push_type(DataType::Variable);
                Ok(())
            }
            Expr::Struct { fields, .. } => self.struct_literal(fields),
            Expr::Function(f) => self.function_value(f),
            Expr::New(c) => self.new_object(c),
        }
    }

    /* ─────────── Littéraux ─────────── */

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub(crate) fn literal(&mut self, value: &Literal) {
        match value {
            Literal::Bool(b) => {
                self.emit_pushi(i16::from(*b));
                self.push_type(DataType::Boolean);
            }
            Literal::Number(n) => {
                let integral = n.is_finite() && n.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(n);
                if !integral {
                    self.emit_push_f64(*n);
                    self.push_type(DataType::Double);
                    return;
                }
                let i = *n as i64;
                if let Ok(v) = i16::try_from(i) {
                    self.emit_pushi(v);
                    self.push_type(DataType::Int32);
                } else if let Ok(v) = i32::try_from(i) {
                    self.emit_push_i32(v);
                    self.push_type(DataType::Int32);
                } else {
                    self.emit_push_i64(i);
                    self.push_type(DataType::Int64);
                }
            }
            Literal::Int64(v) => {
                self.emit_push_i64(*v);
                self.push_type(DataType::Int64);
            }
            Literal::String(s) => {
                self.emit_push_string(s);
                self.push_type(DataType::String);
            }
        }
    }

    /* ─────────── Variables ─────────── */

    fn read_variable(&mut self, v: &Variable) -> CResult<()> {
        if v.indices.is_empty()
            && v.instance.is_none()
            && v.builtin.is_none()
            && !self.is_function_local(&v.name)
            && self.is_known_function(&v.name)
        {
            self.emit_push_function(&v.name);
            self.push_type(DataType::Int32);
            return Ok(());
        }

        let (name, instance) = self.resolve_variable(v);
        if v.indices.is_empty() {
            let op = Self::push_opcode(v, instance);
            self.emit_push_variable(op, &VarRef::normal(name, instance));
            self.push_type(DataType::Variable);
            return Ok(());
        }

        self.emit_pushi(instance.0);
        self.push_type(DataType::Int32);
        self.convert_to_instance()?;
        self.indexed_read(&name, instance, &v.indices)
    }

    /// Lecture `[array]` une fois l'instance posée : indices puis `push.v`.
    fn indexed_read(&mut self, name: &str, scope: InstanceType, indices: &[Expr]) -> CResult<()> {
        let (first, rest) = self.array_head(indices)?;
        self.first_index(first)?;
        if rest.is_empty() {
            self.emit_push_variable(Opcode::Push, &VarRef::on_stack(name, scope, VariableType::Array));
            self.push_type(DataType::Variable);
            return Ok(());
        }
        self.emit_push_variable(Opcode::Push, &VarRef::on_stack(name, scope, VariableType::MultiPush));
        let (last, middle) = rest.split_last().ok_or_else(|| self.error(CompileErrorKind::InvalidOperand("empty index list".into())))?;
        for idx in middle {
            self.index(idx)?;
            self.emit_break(BreakType::PushAc);
        }
        self.index(last)?;
        self.emit_break(BreakType::PushAf);
        self.push_type(DataType::Variable);
        Ok(())
    }

    /// Découpe les indices selon la version : deux indices avant 2.3 sont
    /// fusionnés (`i * 32000 + j`), plus sont refusés.
    pub(crate) fn array_head<'e>(&self, indices: &'e [Expr]) -> CResult<(ArrayIndex<'e>, &'e [Expr])> {
        match indices {
            [] => Err(self.error(CompileErrorKind::InvalidOperand("empty index list".into()))),
            [only] => Ok((ArrayIndex::One(only), &[])),
            [i, j] if !self.env.target.is_gms2_3() => Ok((ArrayIndex::Pair(i, j), &[])),
            [first, rest @ ..] if self.env.target.is_gms2_3() => Ok((ArrayIndex::One(first), rest)),
            _ => Err(self.error(CompileErrorKind::Unsupported("arrays with more than two dimensions"))),
        }
    }

    /// Empile un indice converti en `Int32` (type dépilé).
    pub(crate) fn index(&mut self, e: &Expr) -> CResult<()> {
        self.expr(e)?;
        self.convert_to(DataType::Int32)?;
        Ok(())
    }

    /// Premier indice d'un accès ; `a[i, j]` avant 2.3 devient `i * 32000 + j`.
    pub(crate) fn first_index(&mut self, idx: ArrayIndex<'_>) -> CResult<()> {
        match idx {
            ArrayIndex::One(e) => self.index(e),
            ArrayIndex::Pair(i, j) => {
                self.index(i)?;
                self.emit_push_i32(32000);
                self.emit_op(Opcode::Mul, DataType::Int32, DataType::Int32);
                self.index(j)?;
                self.emit_op(Opcode::Add, DataType::Int32, DataType::Int32);
                Ok(())
            }
        }
    }

    fn read_chain(&mut self, left: &Expr, right: &Expr) -> CResult<()> {
        match right {
            Expr::Variable(v) => {
                self.expr(left)?;
                self.convert_to_instance()?;
                self.pos = v.pos;
                if v.indices.is_empty() {
                    let var = VarRef::on_stack(&v.name, InstanceType::SELF, VariableType::StackTop);
                    self.emit_push_variable(Opcode::Push, &var);
                    self.push_type(DataType::Variable);
                    Ok(())
                } else {
                    self.indexed_read(&v.name, InstanceType::SELF, &v.indices)
                }
            }
            Expr::Call(c) => self.method_call(left, c),
            other => Err(self.error(CompileErrorKind::InvalidOperand(format!(
                "cannot access a member through {other:?}"
            )))),
        }
    }

    /* ─────────── Appels ─────────── */

    /// Arguments de droite à gauche, chacun converti en `Variable`.
    pub(crate) fn arguments(&mut self, args: &[Expr]) -> CResult<()> {
        for a in args.iter().rev() {
            self.expr(a)?;
            self.convert_to(DataType::Variable)?;
        }
        Ok(())
    }

    pub(crate) fn call(&mut self, c: &Call) -> CResult<()> {
        self.pos = c.pos;
        if let Some(b) = &c.builtin {
            if b.has_fixed_arity() && usize::try_from(b.argument_count).ok() != Some(c.args.len()) {
                return Err(self.error(CompileErrorKind::ArityMismatch {
                    name: b.name.clone(),
                    expected: usize::try_from(b.argument_count).unwrap_or(0),
                    supplied: c.args.len(),
                }));
            }
        }
        self.arguments(&c.args)?;
        self.pos = c.pos;

        // 2.3 : un nom qui n'est pas une fonction connue est une variable appelable
        let through_variable = c.builtin.is_none()
            && self.env.target.is_gms2_3()
            && (self.is_function_local(&c.name) || !self.is_known_function(&c.name));
        if through_variable {
            let callee = Variable::named(c.name.clone(), c.pos);
            let (name, instance) = self.resolve_variable(&callee);
            self.emit_call(internal::THIS, 0)?;
            self.emit_push_variable(Self::push_opcode(&callee, instance), &VarRef::normal(name, instance));
            self.emit_callv(c.args.len())?;
        } else {
            if c.builtin.is_none() && !self.is_known_function(&c.name) {
                return Err(self.error(CompileErrorKind::UnresolvedName(c.name.clone())));
            }
            self.emit_call(&c.name, c.args.len())?;
        }
        self.push_type(DataType::Variable);
        Ok(())
    }

    fn method_call(&mut self, left: &Expr, c: &Call) -> CResult<()> {
        if !self.env.target.is_gms2_3() {
            return Err(self.error(CompileErrorKind::Unsupported("method calls before GMS2.3")));
        }
        self.arguments(&c.args)?;
        self.expr(left)?;
        if self.convert_to(DataType::Variable)? {
            self.emit_call(internal::GET_INSTANCE, 1)?;
        }
        self.pos = c.pos;
        self.emit_dup(DataType::Variable, 0);
        self.emit_pushi(InstanceType::STACK_TOP.0);
        let var = VarRef::on_stack(&c.name, InstanceType::SELF, VariableType::StackTop);
        self.emit_push_variable(Opcode::Push, &var);
        self.emit_callv(c.args.len())?;
        self.push_type(DataType::Variable);
        Ok(())
    }

    fn new_object(&mut self, c: &Call) -> CResult<()> {
        self.pos = c.pos;
        if !self.env.target.is_gms2_3() {
            return Err(self.error(CompileErrorKind::Unsupported("new before GMS2.3")));
        }
        if !self.is_known_function(&c.name) {
            return Err(self.error(CompileErrorKind::UnresolvedName(c.name.clone())));
        }
        self.arguments(&c.args)?;
        self.emit_push_function(&c.name);
        self.emit_op(Opcode::Conv, DataType::Int32, DataType::Variable);
        self.emit_call(internal::NEW_OBJECT, c.args.len() + 1)?;
        self.push_type(DataType::Variable);
        Ok(())
    }

    /* ─────────── Opérateurs ─────────── */

    fn binary(&mut self, op: BinaryOp, operands: &[Expr]) -> CResult<()> {
        let Some((first, rest)) = operands.split_first() else {
            return Err(self.error(CompileErrorKind::InvalidOperand("empty operator chain".into())));
        };
        self.expr(first)?;

        if matches!(op, BinaryOp::And | BinaryOp::Or) && self.env.target.short_circuit {
            let mut skip = ForwardPatch::new();
            let branch = if op == BinaryOp::And { Opcode::Bf } else { Opcode::Bt };
            for next in rest {
                self.convert_to(DataType::Boolean)?;
                let site = self.emit_branch(branch);
                skip.add(site);
                self.expr(next)?;
            }
            self.convert_to(DataType::Boolean)?;
            let mut end = ForwardPatch::from_site(self.emit_branch(Opcode::B));
            self.land(&mut skip);
            self.emit_push_e(i16::from(op == BinaryOp::Or));
            self.push_type(DataType::Boolean);
            self.land(&mut end);
            return Ok(());
        }

        self.convert_for_binary(op)?;
        for next in rest {
            self.expr(next)?;
            self.convert_for_binary(op)?;
            self.apply_binary(op)?;
        }
        Ok(())
    }

    /// Dépile deux types, émet l'opérateur et empile le type résultat.
    pub(crate) fn apply_binary(&mut self, op: BinaryOp) -> CResult<()> {
        let top = self.pop_type()?;
        let second = self.pop_type()?;
        if let Some(kind) = comparison(op) {
            self.emit_cmp(kind, top, second);
            self.push_type(DataType::Boolean);
        } else {
            self.emit_op(arithmetic(op), top, second);
            self.push_type(result_type(top, second));
        }
        Ok(())
    }

    /// Conversion du sommet attendue par `op`.
    pub(crate) fn convert_for_binary(&mut self, op: BinaryOp) -> CResult<()> {
        let t = self.peek_type()?;
        let to = match op {
            BinaryOp::Div if t != DataType::Double && t != DataType::Variable => DataType::Double,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::IntDiv | BinaryOp::Mod
                if t == DataType::Boolean =>
            {
                DataType::Int32
            }
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor if t != DataType::Int32 => {
                if matches!(t, DataType::Variable | DataType::Double | DataType::Int64) {
                    DataType::Int64
                } else {
                    DataType::Int32
                }
            }
            BinaryOp::Shl | BinaryOp::Shr => DataType::Int64,
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => DataType::Boolean,
            _ => return Ok(()),
        };
        if t != to {
            self.convert_to(to)?;
            self.push_type(to);
        }
        Ok(())
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr) -> CResult<()> {
        self.expr(operand)?;
        let t = self.peek_type()?;
        if t == DataType::String {
            return Err(self.error(CompileErrorKind::InvalidOperand(format!("string operand for unary {op:?}"))));
        }
        let to = match op {
            UnaryOp::Not if t != DataType::Boolean => Some(DataType::Boolean),
            UnaryOp::Neg if t == DataType::Boolean => Some(DataType::Int32),
            UnaryOp::BitNot if matches!(t, DataType::Double | DataType::Float | DataType::Variable) => {
                Some(DataType::Int32)
            }
            _ => None,
        };
        if let Some(to) = to {
            self.convert_to(to)?;
            self.push_type(to);
        }
        let t = self.peek_type()?;
        let opcode = if op == UnaryOp::Neg { Opcode::Neg } else { Opcode::Not };
        self.emit_single(opcode, t);
        Ok(())
    }

    fn conditional(&mut self, cond: &Expr, then: &Expr, otherwise: &Expr) -> CResult<()> {
        self.expr(cond)?;
        self.convert_to(DataType::Boolean)?;
        let mut to_else = ForwardPatch::from_site(self.emit_branch(Opcode::Bf));
        self.expr(then)?;
        self.convert_to(DataType::Variable)?;
        let mut end = ForwardPatch::from_site(self.emit_branch(Opcode::B));
        self.land(&mut to_else);
        self.expr(otherwise)?;
        self.convert_to(DataType::Variable)?;
        self.push_type(DataType::Variable);
        self.land(&mut end);
        Ok(())
    }

    /// `++x` / `x++` en position d'expression (variables simples).
    fn step_expression(&mut self, target: &Expr, increment: bool, prefix: bool) -> CResult<()> {
        let Expr::Variable(v) = target else {
            return Err(self.error(CompileErrorKind::Unsupported("increment of a member in an expression")));
        };
        if !v.indices.is_empty() {
            return Err(self.error(CompileErrorKind::Unsupported("increment of an array element in an expression")));
        }
        let (name, instance) = self.resolve_variable(v);
        let var = VarRef::normal(name, instance);
        let op = if increment { Opcode::Add } else { Opcode::Sub };
        self.emit_push_variable(Self::push_opcode(v, instance), &var);
        if prefix {
            self.emit_push_e(1);
            self.emit_op(op, DataType::Int32, DataType::Variable);
            self.emit_dup(DataType::Variable, 0);
        } else {
            self.emit_dup(DataType::Variable, 0);
            self.emit_push_e(1);
            self.emit_op(op, DataType::Int32, DataType::Variable);
        }
        self.emit_pop_variable(DataType::Variable, DataType::Variable, &var);
        self.push_type(DataType::Variable);
        Ok(())
    }

    /* ─────────── Fonctions et structs ─────────── */

    /// Corps d'une fonction interne, sauté par un `b` ; rend son nom.
    pub(crate) fn function_body(&mut self, f: &FunctionDecl) -> CResult<String> {
        self.pos = f.pos;
        if !self.env.target.is_gms2_3() {
            return Err(self.error(CompileErrorKind::Unsupported("functions before GMS2.3")));
        }
        if f.inherits.is_some() {
            return Err(self.error(CompileErrorKind::Unsupported("constructor inheritance")));
        }
        if f.params.iter().any(|p| p.default.is_some()) {
            return Err(self.error(CompileErrorKind::Unsupported("default parameter values")));
        }
        let name = match &f.name {
            Some(n) => n.clone(),
            None => self.next_anonymous_name(),
        };

        let mut skip = ForwardPatch::from_site(self.emit_branch(Opcode::B));
        let offset = self.length;
        self.scopes.push(FunctionScope {
            params: f.params.iter().map(|p| p.name.clone()).collect(),
            in_function: true,
            ..FunctionScope::default()
        });
        let outer_loops = std::mem::take(&mut self.loops);
        self.predeclare(&f.body.stmts);
        let body = f.body.stmts.iter().try_for_each(|s| self.stmt(s));
        self.loops = outer_loops;
        let scope = self.scopes.pop().unwrap_or_default();
        body?;
        self.emit_single(Opcode::Exit, DataType::Int32);

        self.children.push(gmlc_core::ChildFunction {
            name: name.clone(),
            offset,
            argument_count: u16::try_from(f.params.len()).unwrap_or(u16::MAX),
            locals: u16::try_from(scope.locals.len()).unwrap_or(u16::MAX),
            constructor: f.constructor,
        });
        self.land(&mut skip);
        Ok(name)
    }

    /// `push.i f; conv.i.v; pushi.e inst; conv.i.v; call.i method 2`
    pub(crate) fn bind_method(&mut self, function: &str, instance: InstanceType) -> CResult<()> {
        self.emit_push_function(function);
        self.emit_op(Opcode::Conv, DataType::Int32, DataType::Variable);
        self.emit_pushi(instance.0);
        self.emit_op(Opcode::Conv, DataType::Int32, DataType::Variable);
        self.emit_call(internal::METHOD, 2)?;
        Ok(())
    }

    pub(crate) fn function_value(&mut self, f: &FunctionDecl) -> CResult<()> {
        let name = self.function_body(f)?;
        self.bind_method(&name, InstanceType::SELF)?;
        self.push_type(DataType::Variable);
        Ok(())
    }

    fn struct_literal(&mut self, fields: &[(String, Expr)]) -> CResult<()> {
        if !self.env.target.is_gms2_3() {
            return Err(self.error(CompileErrorKind::Unsupported("struct literals before GMS2.3")));
        }
        let ctor = self.next_struct_name();
        let mut skip = ForwardPatch::from_site(self.emit_branch(Opcode::B));
        let offset = self.length;
        for (k, (field, _)) in fields.iter().enumerate() {
            let arg = VarRef::normal(format!("argument{k}"), InstanceType::ARGUMENT);
            self.emit_push_variable(Opcode::Push, &arg);
            self.emit_pop_variable(DataType::Variable, DataType::Variable, &VarRef::normal(field, InstanceType::SELF));
        }
        self.emit_single(Opcode::Exit, DataType::Int32);
        self.children.push(gmlc_core::ChildFunction {
            name: ctor.clone(),
            offset,
            argument_count: u16::try_from(fields.len()).unwrap_or(u16::MAX),
            locals: 0,
            constructor: true,
        });
        self.land(&mut skip);

        for (_, value) in fields.iter().rev() {
            self.expr(value)?;
            self.convert_to(DataType::Variable)?;
        }
        self.bind_method(&ctor, InstanceType::STATIC)?;
        self.emit_call(internal::NEW_OBJECT, fields.len() + 1)?;
        self.push_type(DataType::Variable);
        Ok(())
    }
}

/// Premier niveau d'indexation d'un accès tableau.
#[derive(Clone, Copy)]
pub(crate) enum ArrayIndex<'e> {
    One(&'e Expr),
    /// `a[i, j]` avant 2.3.
    Pair(&'e Expr, &'e Expr),
}
