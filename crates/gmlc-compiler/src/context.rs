//! Contexte de compilation d'une entrée : instructions, pile de types,
//! références symboliques, portées et boucles ouvertes.

use gmlc_ast::{Stmt, Variable};
use gmlc_builtins::{internal, Builtins};
use gmlc_core::{
    BreakType, ChildFunction, ComparisonType, DataType, InstanceType, Instruction, Opcode, Pos, Target, Value,
    VariableType,
};
use indexmap::IndexSet;
use log::debug;

use crate::patch::ForwardPatch;
use crate::{CResult, CompileError, CompileErrorKind};

/* ─────────────────────────── Environnement ─────────────────────────── */

/// Données figées partagées par toutes les entrées d'une session.
#[derive(Debug, Clone, Copy)]
pub struct CompileEnv<'a> {
    /// Cible.
    pub target: &'a Target,
    /// Noms intégrés.
    pub builtins: &'a Builtins,
    /// Fonctions utilisateur connues (scripts, déclarations des autres entrées).
    pub functions: &'a IndexSet<String>,
}

/// Référence encore symbolique, résolue en phase 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Symbol {
    /// Chaîne littérale.
    String(String),
    /// Variable `(nom, portée)` et genre d'accès.
    Variable {
        /// Nom.
        name: String,
        /// Portée de rangement.
        scope: InstanceType,
        /// Genre d'accès.
        kind: VariableType,
    },
    /// Fonction.
    Function(String),
}

/// Entrée compilée dont les références ne sont pas encore résolues.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    /// Nom de l'entrée.
    pub name: String,
    /// Instructions (adresses définitives, ids manquants).
    pub instructions: Vec<Instruction>,
    /// Longueur en octets.
    pub length: u32,
    /// Références à résoudre : index d'instruction → symbole.
    pub refs: Vec<(usize, Symbol)>,
    /// Locales de premier niveau.
    pub locals: Vec<String>,
    /// Nombre d'arguments.
    pub argument_count: u16,
    /// Fonctions internes.
    pub children: Vec<ChildFunction>,
}

/* ─────────────────────────── Portées et boucles ─────────────────────────── */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopKind {
    Basic,
    With,
    Switch(DataType),
    Repeat,
}

#[derive(Debug)]
pub(crate) struct LoopContext {
    pub kind: LoopKind,
    pub breaks: ForwardPatch,
    pub continues: ForwardPatch,
    /// Cible déjà connue des `continue` (tête de `while`).
    pub continue_target: Option<u32>,
    pub break_used: bool,
}

impl LoopContext {
    pub fn new(kind: LoopKind) -> Self {
        Self { kind, breaks: ForwardPatch::new(), continues: ForwardPatch::new(), continue_target: None, break_used: false }
    }

    pub fn looping_back_to(kind: LoopKind, target: u32) -> Self {
        Self { continue_target: Some(target), ..Self::new(kind) }
    }
}

#[derive(Debug, Default)]
pub(crate) struct FunctionScope {
    pub locals: IndexSet<String>,
    pub statics: IndexSet<String>,
    pub params: Vec<String>,
    pub in_function: bool,
}

/// Variable résolue : nom final, instance d'instruction, portée de table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VarRef {
    pub name: String,
    pub instance: InstanceType,
    pub scope: InstanceType,
    pub kind: VariableType,
}

impl VarRef {
    pub fn normal(name: impl Into<String>, instance: InstanceType) -> Self {
        Self { name: name.into(), instance, scope: instance, kind: VariableType::Normal }
    }

    /// Accès `[array]` ou `[stacktop]` : l'instance réelle est sur la pile.
    pub fn on_stack(name: impl Into<String>, scope: InstanceType, kind: VariableType) -> Self {
        Self { name: name.into(), instance: InstanceType::SELF, scope, kind }
    }
}

/* ─────────────────────────── Contexte ─────────────────────────── */

/// État de compilation d'une entrée de code.
pub struct CodeContext<'a> {
    pub(crate) env: CompileEnv<'a>,
    pub(crate) name: String,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) length: u32,
    pub(crate) types: Vec<DataType>,
    pub(crate) refs: Vec<(usize, Symbol)>,
    pub(crate) scopes: Vec<FunctionScope>,
    pub(crate) globals: IndexSet<String>,
    pub(crate) loops: Vec<LoopContext>,
    pub(crate) children: Vec<ChildFunction>,
    pub(crate) declared: IndexSet<String>,
    pub(crate) struct_counter: usize,
    pub(crate) anon_counter: usize,
    pub(crate) pos: Pos,
}

impl<'a> CodeContext<'a> {
    /// Contexte vide pour l'entrée `name`.
    #[must_use]
    pub fn new(env: CompileEnv<'a>, name: &str) -> Self {
        Self {
            env,
            name: name.to_owned(),
            instructions: Vec::new(),
            length: 0,
            types: Vec::new(),
            refs: Vec::new(),
            scopes: vec![FunctionScope::default()],
            globals: IndexSet::new(),
            loops: Vec::new(),
            children: Vec::new(),
            declared: IndexSet::new(),
            struct_counter: 0,
            anon_counter: 0,
            pos: Pos::ZERO,
        }
    }

    /// Longueur courante du code en octets.
    #[must_use]
    pub const fn length(&self) -> u32 {
        self.length
    }

    /// Instructions émises.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Pile de types courante (sommet en dernier).
    #[must_use]
    pub fn type_stack(&self) -> &[DataType] {
        &self.types
    }

    /// Relève les fonctions nommées déclarées dans `body`, pour que les
    /// appels précédant la déclaration soient résolus.
    pub fn predeclare(&mut self, body: &[Stmt]) {
        for stmt in body {
            match stmt {
                Stmt::Function(f) => {
                    if let Some(n) = &f.name {
                        self.declared.insert(n.clone());
                    }
                }
                Stmt::Block(b) => self.predeclare(&b.stmts),
                _ => {}
            }
        }
    }

    /// Clôt l'entrée ; la pile de types doit être vide.
    pub fn finish(self) -> CResult<PendingEntry> {
        if !self.types.is_empty() {
            return Err(CompileError::new(self.pos, CompileErrorKind::TypeStackImbalance(self.types.len())));
        }
        let Self { name, instructions, length, refs, mut scopes, children, .. } = self;
        let locals = scopes.pop().map(|s| s.locals.into_iter().collect()).unwrap_or_default();
        debug!("compiled {name}: {} instructions, {length} bytes, {} children", instructions.len(), children.len());
        Ok(PendingEntry { name, instructions, length, refs, locals, argument_count: 0, children })
    }

    /* ─────────── Erreurs et pile de types ─────────── */

    pub(crate) const fn error(&self, kind: CompileErrorKind) -> CompileError {
        CompileError::new(self.pos, kind)
    }

    pub(crate) fn push_type(&mut self, t: DataType) {
        self.types.push(t);
    }

    pub(crate) fn pop_type(&mut self) -> CResult<DataType> {
        self.types.pop().ok_or_else(|| self.error(CompileErrorKind::TypeStackUnderflow))
    }

    pub(crate) fn peek_type(&self) -> CResult<DataType> {
        self.types.last().copied().ok_or_else(|| self.error(CompileErrorKind::TypeStackUnderflow))
    }

    /// Dépile le type du sommet et émet `conv` s'il diffère de `to`.
    /// Rend `true` si une conversion a été émise.
    pub(crate) fn convert_to(&mut self, to: DataType) -> CResult<bool> {
        let from = self.pop_type()?;
        if from == to {
            return Ok(false);
        }
        self.emit_op(Opcode::Conv, from, to);
        Ok(true)
    }

    /// Prépare le sommet comme instance : marqueur `-9` pour une valeur
    /// dynamique en 2.3, conversion en `Int32` sinon. Dépile un type.
    pub(crate) fn convert_to_instance(&mut self) -> CResult<()> {
        if self.env.target.is_gms2_3() && self.peek_type()? == DataType::Variable {
            self.pop_type()?;
            self.emit_pushi(InstanceType::STACK_TOP.0);
            return Ok(());
        }
        self.convert_to(DataType::Int32)?;
        Ok(())
    }

    /// Dépile le sommet et émet `popz`.
    pub(crate) fn discard(&mut self) -> CResult<()> {
        let t = self.pop_type()?;
        self.emit_single(Opcode::Popz, t);
        Ok(())
    }

    /* ─────────── Émission ─────────── */

    pub(crate) fn emit(&mut self, mut ins: Instruction) -> usize {
        ins.address = self.length;
        self.length += ins.length();
        self.instructions.push(ins);
        self.instructions.len() - 1
    }

    fn emit_symbol(&mut self, ins: Instruction, symbol: Symbol) -> usize {
        let idx = self.emit(ins);
        self.refs.push((idx, symbol));
        idx
    }

    pub(crate) fn emit_op(&mut self, op: Opcode, t1: DataType, t2: DataType) -> usize {
        let mut ins = Instruction::new(op);
        ins.type1 = t1;
        ins.type2 = t2;
        self.emit(ins)
    }

    pub(crate) fn emit_single(&mut self, op: Opcode, t: DataType) -> usize {
        let mut ins = Instruction::new(op);
        ins.type1 = t;
        self.emit(ins)
    }

    pub(crate) fn emit_cmp(&mut self, kind: ComparisonType, t1: DataType, t2: DataType) -> usize {
        let mut ins = Instruction::new(Opcode::Cmp);
        ins.type1 = t1;
        ins.type2 = t2;
        ins.comparison = Some(kind);
        self.emit(ins)
    }

    pub(crate) fn emit_dup(&mut self, t: DataType, extra: u8) -> usize {
        let mut ins = Instruction::new(Opcode::Dup);
        ins.type1 = t;
        ins.extra = extra;
        self.emit(ins)
    }

    pub(crate) fn emit_branch(&mut self, op: Opcode) -> usize {
        self.emit(Instruction::new(op))
    }

    /// Saut vers une adresse déjà émise.
    pub(crate) fn emit_branch_to(&mut self, op: Opcode, target: u32) -> usize {
        let idx = self.emit_branch(op);
        let mut back = crate::patch::BackwardPatch::new(target);
        back.add(idx);
        back.finish(&mut self.instructions);
        idx
    }

    /// `pushi.e v`
    pub(crate) fn emit_pushi(&mut self, v: i16) -> usize {
        let mut ins = Instruction::new(Opcode::PushI);
        ins.type1 = DataType::Int16;
        ins.value = Value::Int16(v);
        self.emit(ins)
    }

    /// `push.e v` (marqueur des `++`/`--` et des résultats de court-circuit)
    pub(crate) fn emit_push_e(&mut self, v: i16) -> usize {
        let mut ins = Instruction::new(Opcode::Push);
        ins.type1 = DataType::Int16;
        ins.value = Value::Int16(v);
        self.emit(ins)
    }

    pub(crate) fn emit_push_i32(&mut self, v: i32) -> usize {
        let mut ins = Instruction::new(Opcode::Push);
        ins.type1 = DataType::Int32;
        ins.value = Value::Int32(v);
        self.emit(ins)
    }

    pub(crate) fn emit_push_i64(&mut self, v: i64) -> usize {
        let mut ins = Instruction::new(Opcode::Push);
        ins.type1 = DataType::Int64;
        ins.value = Value::Int64(v);
        self.emit(ins)
    }

    pub(crate) fn emit_push_f64(&mut self, v: f64) -> usize {
        let mut ins = Instruction::new(Opcode::Push);
        ins.type1 = DataType::Double;
        ins.value = Value::Double(v);
        self.emit(ins)
    }

    pub(crate) fn emit_push_string(&mut self, s: &str) -> usize {
        let mut ins = Instruction::new(Opcode::Push);
        ins.type1 = DataType::String;
        self.emit_symbol(ins, Symbol::String(s.to_owned()))
    }

    /// `push.i <fonction>`
    pub(crate) fn emit_push_function(&mut self, name: &str) -> usize {
        let mut ins = Instruction::new(Opcode::Push);
        ins.type1 = DataType::Int32;
        ins.value = Value::Int32(0);
        self.emit_symbol(ins, Symbol::Function(name.to_owned()))
    }

    /// `call.i name argc` (sans effet sur la pile de types)
    pub(crate) fn emit_call(&mut self, name: &str, argc: usize) -> CResult<usize> {
        let argc = i16::try_from(argc)
            .map_err(|_| self.error(CompileErrorKind::InvalidOperand(format!("{argc} arguments passed to {name}"))))?;
        let mut ins = Instruction::new(Opcode::Call);
        ins.type1 = DataType::Int32;
        ins.value = Value::Int16(argc);
        Ok(self.emit_symbol(ins, Symbol::Function(name.to_owned())))
    }

    /// `call.i name argc; popz.v`
    pub(crate) fn emit_call_discard(&mut self, name: &str, argc: usize) -> CResult<()> {
        self.emit_call(name, argc)?;
        self.emit_single(Opcode::Popz, DataType::Variable);
        Ok(())
    }

    /// `callv.v argc`
    pub(crate) fn emit_callv(&mut self, argc: usize) -> CResult<usize> {
        let argc = u8::try_from(argc)
            .map_err(|_| self.error(CompileErrorKind::InvalidOperand(format!("{argc} arguments passed to a method"))))?;
        let mut ins = Instruction::new(Opcode::CallV);
        ins.type1 = DataType::Variable;
        ins.extra = argc;
        Ok(self.emit(ins))
    }

    pub(crate) fn emit_break(&mut self, kind: BreakType) -> usize {
        let mut ins = Instruction::new(Opcode::Break);
        ins.type1 = DataType::Int16;
        ins.value = Value::Int16(kind as i16);
        self.emit(ins)
    }

    /// `push*.v` d'une variable.
    pub(crate) fn emit_push_variable(&mut self, op: Opcode, var: &VarRef) -> usize {
        let mut ins = Instruction::new(op);
        ins.type1 = DataType::Variable;
        ins.instance = var.instance;
        let symbol = Symbol::Variable { name: var.name.clone(), scope: var.scope, kind: var.kind };
        self.emit_symbol(ins, symbol)
    }

    /// `pop.t1.t2` vers une variable.
    pub(crate) fn emit_pop_variable(&mut self, t1: DataType, t2: DataType, var: &VarRef) -> usize {
        let mut ins = Instruction::new(Opcode::Pop);
        ins.type1 = t1;
        ins.type2 = t2;
        ins.instance = var.instance;
        let symbol = Symbol::Variable { name: var.name.clone(), scope: var.scope, kind: var.kind };
        self.emit_symbol(ins, symbol)
    }

    /// Termine les sauts de `patch` à l'adresse courante.
    pub(crate) fn land(&mut self, patch: &mut ForwardPatch) {
        patch.finish(&mut self.instructions, self.length);
    }

    /* ─────────── Noms ─────────── */

    pub(crate) fn scope(&self) -> &FunctionScope {
        // la portée racine n'est jamais retirée
        &self.scopes[self.scopes.len() - 1]
    }

    pub(crate) fn scope_mut(&mut self) -> &mut FunctionScope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    pub(crate) fn is_local(&self, name: &str) -> bool {
        self.scope().locals.contains(name)
    }

    /// Local, paramètre ou static de la fonction courante.
    pub(crate) fn is_function_local(&self, name: &str) -> bool {
        let s = self.scope();
        s.locals.contains(name) || s.statics.contains(name) || s.params.iter().any(|p| p == name)
    }

    /// Nom utilisable comme fonction (intégrée, de session ou déclarée ici).
    pub(crate) fn is_known_function(&self, name: &str) -> bool {
        self.env.builtins.function(name).is_some()
            || self.env.functions.contains(name)
            || self.declared.contains(name)
            || self.children.iter().any(|c| c.name == name)
            || name == internal::METHOD
    }

    /// Instance effective d'une variable et nom final (paramètres renommés
    /// en `argumentN` en 2.3).
    pub(crate) fn resolve_variable(&self, var: &Variable) -> (String, InstanceType) {
        if let Some(inst) = var.instance {
            return (var.name.clone(), inst);
        }
        if self.is_local(&var.name) {
            return (var.name.clone(), InstanceType::LOCAL);
        }
        if self.globals.contains(&var.name) {
            return (var.name.clone(), InstanceType::GLOBAL);
        }
        if self.env.target.is_gms2_3() {
            let scope = self.scope();
            if scope.statics.contains(&var.name) {
                return (var.name.clone(), InstanceType::STATIC);
            }
            if self.env.builtins.is_argument(&var.name) {
                return (var.name.clone(), InstanceType::ARGUMENT);
            }
            if let Some(i) = scope.params.iter().position(|p| *p == var.name) {
                return (format!("argument{i}"), InstanceType::ARGUMENT);
            }
            if let Some(b) = &var.builtin {
                return (var.name.clone(), if b.is_global { InstanceType::BUILTIN } else { InstanceType::SELF });
            }
        }
        (var.name.clone(), InstanceType::SELF)
    }

    /// Opcode de lecture d'une variable simple.
    pub(crate) fn push_opcode(var: &Variable, instance: InstanceType) -> Opcode {
        match instance {
            InstanceType::GLOBAL => Opcode::PushGlb,
            InstanceType::BUILTIN => Opcode::PushBltn,
            InstanceType::LOCAL => Opcode::PushLoc,
            _ if var.builtin.as_ref().is_some_and(|b| b.is_global) => Opcode::PushBltn,
            _ => Opcode::Push,
        }
    }

    pub(crate) fn next_anonymous_name(&mut self) -> String {
        let n = self.anon_counter;
        self.anon_counter += 1;
        format!("anon_{n}_{}", self.name)
    }

    pub(crate) fn next_struct_name(&mut self) -> String {
        let n = self.struct_counter;
        self.struct_counter += 1;
        format!("___struct___{n}_{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gmlc_core::GameVersion;
    use pretty_assertions::assert_eq;

    struct Env {
        target: Target,
        builtins: Builtins,
        functions: IndexSet<String>,
    }

    impl Env {
        fn new(target: Target) -> Self {
            Self { builtins: Builtins::new(&target), target, functions: IndexSet::new() }
        }

        fn ctx(&self) -> CodeContext<'_> {
            let env = CompileEnv { target: &self.target, builtins: &self.builtins, functions: &self.functions };
            CodeContext::new(env, "e")
        }
    }

    #[test]
    fn emit_assigns_contiguous_addresses() {
        let env = Env::new(Target::default());
        let mut ctx = env.ctx();
        ctx.emit_pushi(1);
        ctx.emit_push_f64(2.5);
        ctx.emit_call("abs", 1).unwrap();
        let addrs: Vec<u32> = ctx.instructions().iter().map(|i| i.address).collect();
        assert_eq!(addrs, vec![0, 4, 16]);
        assert_eq!(ctx.length(), 24);
        assert_eq!(ctx.refs.len(), 1);
    }

    #[test]
    fn conversion_only_when_types_differ() {
        let env = Env::new(Target::default());
        let mut ctx = env.ctx();
        ctx.push_type(DataType::Int32);
        assert_eq!(ctx.convert_to(DataType::Int32), Ok(false));
        ctx.push_type(DataType::Boolean);
        assert_eq!(ctx.convert_to(DataType::Variable), Ok(true));
        assert_eq!(ctx.instructions()[0].opcode, Opcode::Conv);
        assert!(ctx.type_stack().is_empty());
    }

    #[test]
    fn underflow_is_an_error() {
        let env = Env::new(Target::default());
        let mut ctx = env.ctx();
        assert_eq!(ctx.pop_type().map_err(|e| e.kind), Err(CompileErrorKind::TypeStackUnderflow));
    }

    #[test]
    fn instance_conversion_depends_on_version() {
        let env = Env::new(Target::default());
        let mut ctx = env.ctx();
        ctx.push_type(DataType::Variable);
        ctx.convert_to_instance().unwrap();
        assert_eq!(ctx.instructions()[0].value, Value::Int16(-9));

        let env = Env::new(Target::for_version(GameVersion::Gms2));
        let mut ctx = env.ctx();
        ctx.push_type(DataType::Variable);
        ctx.convert_to_instance().unwrap();
        assert_eq!(ctx.instructions()[0].opcode, Opcode::Conv);
        assert_eq!(ctx.instructions()[0].type2, DataType::Int32);
    }

    #[test]
    fn variable_resolution_order() {
        let env = Env::new(Target::default());
        let mut ctx = env.ctx();
        ctx.scope_mut().locals.insert("a".into());
        ctx.scope_mut().params.push("p".into());
        ctx.globals.insert("g".into());

        let v = |n: &str| Variable::named(n, Pos::ZERO);
        assert_eq!(ctx.resolve_variable(&v("a")), ("a".into(), InstanceType::LOCAL));
        assert_eq!(ctx.resolve_variable(&v("g")), ("g".into(), InstanceType::GLOBAL));
        assert_eq!(ctx.resolve_variable(&v("p")), ("argument0".into(), InstanceType::ARGUMENT));
        assert_eq!(ctx.resolve_variable(&v("argument3")), ("argument3".into(), InstanceType::ARGUMENT));
        assert_eq!(ctx.resolve_variable(&v("z")), ("z".into(), InstanceType::SELF));

        let mut explicit = v("a");
        explicit.instance = Some(InstanceType::OTHER);
        assert_eq!(ctx.resolve_variable(&explicit), ("a".into(), InstanceType::OTHER));
    }

    #[test]
    fn finish_rejects_leftover_types() {
        let env = Env::new(Target::default());
        let mut ctx = env.ctx();
        ctx.push_type(DataType::Int32);
        assert_eq!(ctx.finish().map_err(|e| e.kind), Err(CompileErrorKind::TypeStackImbalance(1)));
    }
}
