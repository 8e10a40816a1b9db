//! Reconstruction structurée d'une entrée.
//!
//! Le décodeur simule la pile de valeurs sur une plage d'instructions et
//! reconnaît, à chaque saut, les formes émises par le compilateur : boucles,
//! `switch`, `with`, `try`, `static`, court-circuits et ternaires. Chaque
//! sous-plage repart d'une pile vide ; les profondeurs globales
//! ([`StackDepths`]) délimitent les tests et la fin d'un `switch`.
//!
//! Un `b` en avant dans une boucle dont la cible de `continue` est encore
//! inconnue lève [`Fault::Continue`] ; la boucle est alors redécodée avec
//! cette cible (`for` à pas, `do … until`).

use gmlc_builtins::internal;
use gmlc_core::{
    BreakType, ChildFunction, CodeEntry, ComparisonType, DataType, InstanceType, Instruction, NameTables, Opcode,
    Reference, TableError, Value, VariableType,
};
use indexmap::IndexMap;
use log::{debug, trace};
use smallvec::{smallvec, SmallVec};

use crate::ast::{AssignKind, Ast, Instance, Node, NodeId, Program, StepMark, VariableNode};
use crate::stack::{is_call_to, is_stacktop_marker, is_terminator, StackDepths};
use crate::DecompileError;

/* ─────────────────────────── Pile et fautes ─────────────────────────── */

/// Case de la pile de valeurs.
#[derive(Debug, Clone, Copy)]
struct Slot {
    id: NodeId,
    /// Marqueur d'instance `pushi.e -9`.
    marker: bool,
    /// Passée par un `conv`.
    converted: bool,
}

impl Slot {
    const fn new(id: NodeId) -> Self {
        Self { id, marker: false, converted: false }
    }
}

/// Résultat d'une plage : instructions et valeurs restées sur la pile.
#[derive(Debug, Default)]
struct Seq {
    stmts: Vec<NodeId>,
    stack: Vec<Slot>,
}

#[derive(Debug)]
enum Fault {
    Error(DecompileError),
    /// `continue` vers `target` pour la boucle `frame`, encore au premier essai.
    Continue { frame: usize, target: u32 },
}

impl From<DecompileError> for Fault {
    fn from(e: DecompileError) -> Self {
        Self::Error(e)
    }
}

impl From<TableError> for Fault {
    fn from(e: TableError) -> Self {
        Self::Error(e.into())
    }
}

type DResult<T> = Result<T, Fault>;

fn settle(fault: Fault) -> DecompileError {
    match fault {
        Fault::Error(e) => e,
        Fault::Continue { target, .. } => {
            DecompileError::Structure { address: target, message: "continue outside of a loop".into() }
        }
    }
}

/* ─────────────────────────── Cadres de boucle ─────────────────────────── */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    While,
    For,
    DoUntil,
    Repeat,
    With,
    Switch,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    kind: FrameKind,
    break_to: Option<u32>,
    continue_to: Option<u32>,
    /// Adresse de fin du corps.
    body_end: u32,
    /// Cible de `continue` encore à découvrir.
    first_attempt: bool,
    continue_used: bool,
}

impl Frame {
    const fn new(kind: FrameKind, break_to: Option<u32>, continue_to: Option<u32>, body_end: u32) -> Self {
        Self { kind, break_to, continue_to, body_end, first_attempt: false, continue_used: false }
    }

    const fn probing(self) -> Self {
        Self { first_attempt: true, ..self }
    }
}

/* ─────────────────────────── Décodeur ─────────────────────────── */

struct Decoder<'a> {
    entry: &'a CodeEntry,
    tables: &'a NameTables,
    depths: StackDepths,
    ast: Ast,
    frames: Vec<Frame>,
    functions: IndexMap<String, NodeId>,
}

/// Décode `entry` en arbre brut, avant nettoyage.
pub fn decode_entry(entry: &CodeEntry, tables: &NameTables) -> Result<Program, DecompileError> {
    let mut decoder = Decoder {
        entry,
        tables,
        depths: StackDepths::analyze(entry, tables),
        ast: Ast::new(),
        frames: Vec::new(),
        functions: IndexMap::new(),
    };
    let body = decoder.statements(0, entry.instructions.len()).map_err(settle)?;
    let root = decoder.ast.add(Node::Block(body));
    debug!("{}: decoded into {} nodes, {} child function(s)", entry.name, decoder.ast.len(), decoder.functions.len());
    Ok(Program { ast: decoder.ast, root, preamble: Vec::new(), functions: decoder.functions })
}

impl Decoder<'_> {
    /* ─────────── Adresses ─────────── */

    fn addr(&self, idx: usize) -> u32 {
        self.entry.instructions.get(idx).map_or(self.entry.length, |i| i.address)
    }

    fn structure(&self, at: usize, message: impl Into<String>) -> Fault {
        Fault::Error(DecompileError::Structure { address: self.addr(at), message: message.into() })
    }

    fn index(&self, at: usize, address: u32) -> DResult<usize> {
        if address == self.entry.length {
            return Ok(self.entry.instructions.len());
        }
        self.entry
            .index_of(address)
            .ok_or_else(|| self.structure(at, format!("jump to {address} lands inside an instruction")))
    }

    fn jump_target(&self, at: usize) -> DResult<u32> {
        let target = self.entry.instructions[at].target();
        u32::try_from(target).map_err(|_| self.structure(at, format!("jump to {target} leaves the entry")))
    }

    /* ─────────── Pile ─────────── */

    fn take(&self, at: usize, seq: &mut Seq) -> DResult<Slot> {
        seq.stack.pop().ok_or(Fault::Error(DecompileError::StackUnderflow { address: self.addr(at) }))
    }

    /// Instance sous un éventuel marqueur `-9`.
    fn take_instance(&self, at: usize, seq: &mut Seq) -> DResult<Slot> {
        let slot = self.take(at, seq)?;
        if slot.marker {
            self.take(at, seq)
        } else {
            Ok(slot)
        }
    }

    fn push_node(&mut self, seq: &mut Seq, node: Node) {
        let id = self.ast.add(node);
        seq.stack.push(Slot::new(id));
    }

    fn statement(&mut self, seq: &mut Seq, node: Node) {
        let id = self.ast.add(node);
        seq.stmts.push(id);
    }

    /// Un `pushi.e 0|1` consommé tel quel comme booléen devient `false`/`true`.
    fn boolify(&mut self, slot: Slot, ty: DataType) {
        if ty != DataType::Boolean || slot.converted {
            return;
        }
        if let Node::Int16 { value: v @ (0 | 1), step: StepMark::None } = *self.ast.get(slot.id) {
            self.ast.replace(slot.id, Node::Boolean(v == 1));
        }
    }

    /* ─────────── Plages ─────────── */

    fn statements(&mut self, start: usize, end: usize) -> DResult<Vec<NodeId>> {
        let seq = self.decode(start, end, Vec::new())?;
        if !seq.stack.is_empty() {
            return Err(self.structure(start, format!("{} value(s) left on the stack", seq.stack.len())));
        }
        Ok(seq.stmts)
    }

    fn expression(&mut self, start: usize, end: usize) -> DResult<Slot> {
        let mut seq = self.decode(start, end, Vec::new())?;
        match (seq.stmts.is_empty(), seq.stack.pop()) {
            (true, Some(slot)) if seq.stack.is_empty() => Ok(slot),
            _ => Err(self.structure(start, "expected a single value")),
        }
    }

    fn decode(&mut self, start: usize, end: usize, stack: Vec<Slot>) -> DResult<Seq> {
        let entry = self.entry;
        let mut seq = Seq { stmts: Vec::new(), stack };
        let mut stmt_start = start;
        let mut i = start;
        while i < end {
            if seq.stack.is_empty() {
                stmt_start = i;
                if let Some(next) = self.do_until(i, end, &mut seq)? {
                    i = next;
                    continue;
                }
            }
            let ins = &entry.instructions[i];
            i = match ins.opcode {
                Opcode::Conv => {
                    self.conv(ins, i, &mut seq)?;
                    i + 1
                }
                Opcode::Neg | Opcode::Not => {
                    let operand = self.take(i, &mut seq)?;
                    self.boolify(operand, ins.type1);
                    self.push_node(&mut seq, Node::Unary { opcode: ins.opcode, operand: operand.id, ty: ins.type1 });
                    i + 1
                }
                Opcode::Mul
                | Opcode::Div
                | Opcode::Rem
                | Opcode::Mod
                | Opcode::Add
                | Opcode::Sub
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Shl
                | Opcode::Shr
                | Opcode::Cmp => {
                    self.binary(ins, i, &mut seq)?;
                    i + 1
                }
                Opcode::Dup => self.dup(i, &mut seq)?,
                Opcode::Push | Opcode::PushLoc | Opcode::PushGlb | Opcode::PushBltn | Opcode::PushI => {
                    self.push(ins, i, &mut seq)?;
                    i + 1
                }
                Opcode::Pop => {
                    self.pop(ins, i, &mut seq)?;
                    i + 1
                }
                Opcode::Popz => {
                    self.popz(i, &mut seq);
                    i + 1
                }
                Opcode::Call => self.call(i, &mut seq)?,
                Opcode::CallV => {
                    let function = self.take(i, &mut seq)?;
                    let instance = self.take(i, &mut seq)?;
                    let args = self.arguments(i, ins.argc(), &mut seq)?;
                    self.push_node(&mut seq, Node::CallVar { function: function.id, instance: instance.id, args });
                    i + 1
                }
                Opcode::Ret => {
                    let value = self.take(i, &mut seq)?;
                    self.statement(&mut seq, Node::Return(value.id));
                    i + 1
                }
                Opcode::Exit => {
                    self.statement(&mut seq, Node::Exit);
                    i + 1
                }
                Opcode::B => self.jump(i, &mut seq)?,
                Opcode::Bf => self.branch_false(i, end, stmt_start, &mut seq)?,
                Opcode::Bt => self.branch_true(i, &mut seq)?,
                Opcode::PushEnv => self.with(i, &mut seq)?,
                Opcode::PopEnv if ins.exit_magic => i + 1,
                Opcode::PopEnv => return Err(self.structure(i, "popenv outside of its with")),
                Opcode::Break => self.extended(i, &mut seq)?,
            };
        }
        Ok(seq)
    }

    /* ─────────── Expressions ─────────── */

    fn conv(&mut self, ins: &Instruction, at: usize, seq: &mut Seq) -> DResult<()> {
        let top = seq.stack.last().copied().ok_or(Fault::Error(DecompileError::StackUnderflow { address: self.addr(at) }))?;
        self.boolify(top, ins.type1);
        if let Some(last) = seq.stack.last_mut() {
            last.converted = true;
        }
        Ok(())
    }

    fn binary(&mut self, ins: &Instruction, at: usize, seq: &mut Seq) -> DResult<()> {
        let right = self.take(at, seq)?;
        let left = self.take(at, seq)?;
        self.boolify(right, ins.type1);
        self.boolify(left, ins.type2);
        self.push_node(
            seq,
            Node::Binary {
                opcode: ins.opcode,
                comparison: ins.comparison,
                left: left.id,
                right: right.id,
                left_type: ins.type2,
                right_type: ins.type1,
            },
        );
        Ok(())
    }

    fn push(&mut self, ins: &Instruction, at: usize, seq: &mut Seq) -> DResult<()> {
        if ins.type1 == DataType::Variable {
            let id = self.read_variable(ins, at, seq)?;
            seq.stack.push(Slot::new(id));
            return Ok(());
        }
        let node = match (ins.value, ins.reference) {
            (_, Reference::Function(f)) => Node::FunctionRef(self.tables.function(f)?.to_owned()),
            (Value::Int16(value), _) => {
                let step = if ins.opcode == Opcode::Push { StepMark::Postfix } else { StepMark::None };
                Node::Int16 { value, step }
            }
            (Value::Int32(v), _) => Node::Int32(v),
            (Value::Int64(v), _) => Node::Int64(v),
            (Value::Float(v), _) => Node::Float(v),
            (Value::Double(v), _) => Node::Double(v),
            (Value::Boolean(v), _) => Node::Boolean(v),
            (Value::String(s), _) => Node::String(self.tables.string(s)?.to_owned()),
            (Value::None, _) => return Err(self.structure(at, "push without an operand")),
        };
        let id = self.ast.add(node);
        seq.stack.push(Slot { id, marker: is_stacktop_marker(ins), converted: false });
        Ok(())
    }

    /// Instance et indices d'un accès, dépilés selon son genre.
    fn access(
        &self,
        ins: &Instruction,
        kind: VariableType,
        at: usize,
        seq: &mut Seq,
    ) -> DResult<(Instance, SmallVec<[NodeId; 2]>)> {
        match kind {
            VariableType::Normal | VariableType::Instance => Ok((Instance::Fixed(ins.instance), SmallVec::new())),
            VariableType::StackTop => {
                let inst = self.take_instance(at, seq)?;
                Ok((Instance::Expr(inst.id), SmallVec::new()))
            }
            VariableType::Array | VariableType::MultiPush | VariableType::MultiPushPop => {
                let index = self.take(at, seq)?;
                let inst = self.take_instance(at, seq)?;
                let instance = match self.ast.get(inst.id) {
                    Node::Int16 { value, step: StepMark::None } if !inst.converted => Instance::Fixed(InstanceType(*value)),
                    _ => Instance::Expr(inst.id),
                };
                Ok((instance, smallvec![index.id]))
            }
        }
    }

    fn read_variable(&mut self, ins: &Instruction, at: usize, seq: &mut Seq) -> DResult<NodeId> {
        let Reference::Variable { id, kind } = ins.reference else {
            return Err(self.structure(at, "variable push without a reference"));
        };
        let name = self.tables.variable(id)?.name.clone();
        let (instance, indices) = self.access(ins, kind, at, seq)?;
        Ok(self.ast.add(Node::Variable(VariableNode { name, instance, kind, indices, opcode: ins.opcode })))
    }

    fn pop(&mut self, ins: &Instruction, at: usize, seq: &mut Seq) -> DResult<()> {
        if ins.is_swap_pop() {
            return Err(self.structure(at, "swap pop is not produced by this compiler"));
        }
        let Reference::Variable { id, kind } = ins.reference else {
            return Err(self.structure(at, "pop without a variable"));
        };
        let name = self.tables.variable(id)?.name.clone();
        let value_on_top = ins.type1 == DataType::Int32;
        let early = if value_on_top { Some(self.take(at, seq)?) } else { None };
        let (instance, indices) = self.access(ins, kind, at, seq)?;
        let value = match early {
            Some(v) => v,
            None => self.take(at, seq)?,
        };
        self.boolify(value, ins.type2);
        let target = self.ast.add(Node::Variable(VariableNode { name, instance, kind, indices, opcode: Opcode::Pop }));

        // `++x` / `x++` en expression : le résultat reste sur la pile.
        if !value_on_top && matches!(kind, VariableType::Normal | VariableType::Instance) {
            if let Some((step, one)) = seq.stack.last().and_then(|top| self.step_kind(value.id, top.id)) {
                if matches!(step, AssignKind::Prefix { .. }) {
                    self.ast.replace(one, Node::Int16 { value: 1, step: StepMark::Prefix });
                }
                let id = self.ast.add(Node::Assign { target, value: target, kind: step, declare: false, pop_int: false });
                if let Some(last) = seq.stack.last_mut() {
                    *last = Slot::new(id);
                }
                return Ok(());
            }
        }
        self.statement(
            seq,
            Node::Assign { target, value: value.id, kind: AssignKind::Normal, declare: false, pop_int: value_on_top },
        );
        Ok(())
    }

    /// Forme `++x`/`x++` d'une écriture suivie de sa valeur sur la pile, avec
    /// le littéral `1` marqué.
    fn step_kind(&self, value: NodeId, top: NodeId) -> Option<(AssignKind, NodeId)> {
        let (opcode, left, right) = match self.ast.get(value) {
            Node::Binary { opcode, left, right, .. } => (*opcode, *left, *right),
            _ => return None,
        };
        let increment = match opcode {
            Opcode::Add => true,
            Opcode::Sub => false,
            _ => return None,
        };
        if !matches!(self.ast.get(right), Node::Int16 { value: 1, step: StepMark::Postfix | StepMark::Prefix }) {
            return None;
        }
        if top == value {
            Some((AssignKind::Prefix { increment }, right))
        } else if top == left {
            Some((AssignKind::Postfix { increment }, right))
        } else {
            None
        }
    }

    /// `popz` : instruction-expression, ou déroulement si la pile locale est vide.
    fn popz(&mut self, at: usize, seq: &mut Seq) {
        let Some(slot) = seq.stack.pop() else {
            trace!("{}: unwinding popz at {}", self.entry.name, self.addr(at));
            return;
        };
        let thrown = match self.ast.get(slot.id) {
            Node::Call { name, args } if name == internal::THROW && args.len() == 1 => Some(args[0]),
            _ => None,
        };
        match thrown {
            Some(value) => self.statement(seq, Node::Throw(value)),
            None => seq.stmts.push(slot.id),
        }
    }

    /// Le premier dépilé est l'argument 0.
    fn arguments(&self, at: usize, count: usize, seq: &mut Seq) -> DResult<Vec<NodeId>> {
        (0..count).map(|_| self.take(at, seq).map(|s| s.id)).collect()
    }

    fn call(&mut self, at: usize, seq: &mut Seq) -> DResult<usize> {
        let (entry, tables) = (self.entry, self.tables);
        let ins = &entry.instructions[at];
        let function = ins.function().ok_or_else(|| self.structure(at, "call without a function"))?;
        let name = tables.function(function)?;
        if name == internal::TRY_HOOK {
            return self.try_block(at, seq);
        }
        let args = self.arguments(at, ins.argc(), seq)?;
        self.push_node(seq, Node::Call { name: name.to_owned(), args });
        Ok(at + 1)
    }

    fn dup(&mut self, at: usize, seq: &mut Seq) -> DResult<usize> {
        let entry = self.entry;
        let ins = &entry.instructions[at];
        if ins.swap != 0 {
            return Err(self.structure(at, "dup with swap is not produced by this compiler"));
        }
        if ins.extra == 0 {
            if self.is_repeat(at) {
                return self.repeat(at, seq);
            }
            if self.is_switch(at) {
                let value = self.take(at, seq)?;
                self.boolify(value, ins.type1);
                return self.switch(at, value, seq);
            }
        }
        let n = usize::from(ins.extra) + 1;
        let from = seq
            .stack
            .len()
            .checked_sub(n)
            .ok_or(Fault::Error(DecompileError::StackUnderflow { address: self.addr(at) }))?;
        let copy: SmallVec<[Slot; 4]> = seq.stack[from..].iter().copied().collect();
        seq.stack.extend(copy);
        Ok(at + 1)
    }

    fn extended(&mut self, at: usize, seq: &mut Seq) -> DResult<usize> {
        match self.entry.instructions[at].break_type() {
            Some(BreakType::IsStaticOk) => self.static_block(at, seq),
            Some(BreakType::PushAc | BreakType::PushAf) => {
                let index = self.take(at, seq)?;
                let var = self.take(at, seq)?;
                self.add_index(at, var.id, index.id)?;
                seq.stack.push(Slot::new(var.id));
                Ok(at + 1)
            }
            Some(BreakType::PopAf) => {
                let index = self.take(at, seq)?;
                let var = self.take(at, seq)?;
                let value = self.take(at, seq)?;
                self.add_index(at, var.id, index.id)?;
                self.statement(
                    seq,
                    Node::Assign { target: var.id, value: value.id, kind: AssignKind::Normal, declare: false, pop_int: false },
                );
                Ok(at + 1)
            }
            Some(BreakType::SetOwner) => {
                self.take(at, seq)?;
                Ok(at + 1)
            }
            _ => Ok(at + 1),
        }
    }

    fn add_index(&mut self, at: usize, var: NodeId, index: NodeId) -> DResult<()> {
        match self.ast.get_mut(var) {
            Node::Variable(v) => {
                v.indices.push(index);
                Ok(())
            }
            _ => Err(self.structure(at, "array break without an array access")),
        }
    }

    /* ─────────── Sauts ─────────── */

    fn jump(&mut self, at: usize, seq: &mut Seq) -> DResult<usize> {
        let entry = self.entry;
        let target = self.jump_target(at)?;
        if let Some(child) = entry.child_at(self.addr(at + 1)) {
            return self.child_function(at, child, target);
        }
        if !seq.stack.is_empty() {
            // `switch` sans `case`
            let value = self.take(at, seq)?;
            let depth = self.depths.get(at).ok_or_else(|| self.structure(at, "switch in unreachable code"))?;
            return self.switch_body(at, value, Vec::new(), target, depth, seq);
        }
        let node = self.jump_statement(at, target)?;
        self.statement(seq, node);
        Ok(at + 1)
    }

    fn jump_statement(&mut self, at: usize, target: u32) -> DResult<Node> {
        if self.frames.last().is_some_and(|f| f.break_to == Some(target)) {
            return Ok(Node::Break);
        }
        let loop_frame = self.frames.iter().rposition(|f| f.kind != FrameKind::Switch);
        if let Some(k) = loop_frame {
            if self.frames[k].continue_to == Some(target) {
                self.frames[k].continue_used = true;
                return Ok(Node::Continue);
            }
        }
        if target == self.entry.length {
            return Ok(Node::Exit);
        }
        if let Some(k) = loop_frame {
            let f = self.frames[k];
            if f.first_attempt
                && matches!(f.kind, FrameKind::While | FrameKind::DoUntil)
                && target > self.addr(at)
                && target <= f.body_end
            {
                return Err(Fault::Continue { frame: k, target });
            }
        }
        Err(self.structure(at, format!("unexplained jump to {target}")))
    }

    /// Le saut vers `target` est un `break`/`continue` d'une boucle ouverte.
    fn explains(&self, target: u32) -> bool {
        self.frames.last().is_some_and(|f| f.break_to == Some(target))
            || self
                .frames
                .iter()
                .rev()
                .find(|f| f.kind != FrameKind::Switch)
                .is_some_and(|f| f.continue_to == Some(target))
    }

    fn is_short_circuit(&self, x: usize, value: i16) -> bool {
        let ins = &self.entry.instructions;
        x >= 1
            && ins.get(x).is_some_and(|p| {
                p.opcode == Opcode::Push && p.type1 == DataType::Int16 && p.value == Value::Int16(value)
            })
            && ins[x - 1].opcode == Opcode::B
            && ins[x - 1].target() == i64::from(self.addr(x + 1))
    }

    fn branch_false(&mut self, at: usize, end: usize, stmt_start: usize, seq: &mut Seq) -> DResult<usize> {
        let cond = self.take(at, seq)?;
        self.boolify(cond, DataType::Boolean);
        let target = self.jump_target(at)?;
        if target <= self.addr(at) {
            return Err(self.structure(at, "backward bf outside of a do-until"));
        }
        let x = self.index(at, target)?;
        if self.is_short_circuit(x, 0) {
            return self.short_circuit(true, cond, at, x, seq);
        }
        if x > at + 1 && self.entry.instructions[x - 1].opcode == Opcode::B {
            let back = self.jump_target(x - 1)?;
            if back == self.addr(stmt_start) && seq.stack.is_empty() {
                return self.while_loop(cond, at, x, stmt_start, seq);
            }
            if back > self.addr(x - 1) && back <= self.addr(end) {
                return self.if_else(cond, at, x, back, seq);
            }
        }
        let then = self.statements(at + 1, x)?;
        let then = self.ast.add(Node::Block(then));
        self.statement(seq, Node::If { cond: cond.id, then, otherwise: None, else_if: false });
        Ok(x)
    }

    fn branch_true(&mut self, at: usize, seq: &mut Seq) -> DResult<usize> {
        let cond = self.take(at, seq)?;
        self.boolify(cond, DataType::Boolean);
        let target = self.jump_target(at)?;
        let x = self.index(at, target)?;
        if target > self.addr(at) && self.is_short_circuit(x, 1) {
            return self.short_circuit(false, cond, at, x, seq);
        }
        Err(self.structure(at, "bt outside of a short-circuit, repeat or switch"))
    }

    fn short_circuit(&mut self, and: bool, first: Slot, at: usize, x: usize, seq: &mut Seq) -> DResult<usize> {
        let skip = i64::from(self.addr(x));
        let op = if and { Opcode::Bf } else { Opcode::Bt };
        let mut operands = vec![first.id];
        let mut from = at + 1;
        for j in at + 1..x - 1 {
            let ins = &self.entry.instructions[j];
            if ins.opcode == op && ins.target() == skip {
                let operand = self.expression(from, j)?;
                self.boolify(operand, DataType::Boolean);
                operands.push(operand.id);
                from = j + 1;
            }
        }
        let last = self.expression(from, x - 1)?;
        self.boolify(last, DataType::Boolean);
        operands.push(last.id);
        self.push_node(seq, Node::ShortCircuit { and, operands });
        Ok(x + 1)
    }

    fn if_else(&mut self, cond: Slot, at: usize, x: usize, end_addr: u32, seq: &mut Seq) -> DResult<usize> {
        let e = self.index(x - 1, end_addr)?;
        if x == e && self.explains(end_addr) {
            // `if (c) { …; break; }` en fin de bras ou de corps
            let then = self.statements(at + 1, x)?;
            let then = self.ast.add(Node::Block(then));
            self.statement(seq, Node::If { cond: cond.id, then, otherwise: None, else_if: false });
            return Ok(x);
        }
        let then = self.decode(at + 1, x - 1, Vec::new())?;
        if then.stmts.is_empty() && then.stack.len() == 1 {
            let otherwise = self
                .expression(x, e)
                .map_err(|_| Fault::Error(DecompileError::TernaryShape { address: self.addr(x) }))?;
            self.push_node(seq, Node::Conditional { cond: cond.id, then: then.stack[0].id, otherwise: otherwise.id });
            return Ok(e);
        }
        if !then.stack.is_empty() {
            return Err(self.structure(at, "value left in an if branch"));
        }
        let otherwise = self.statements(x, e)?;
        let then = self.ast.add(Node::Block(then.stmts));
        let otherwise = self.ast.add(Node::Block(otherwise));
        self.statement(seq, Node::If { cond: cond.id, then, otherwise: Some(otherwise), else_if: false });
        Ok(e)
    }

    /* ─────────── Boucles ─────────── */

    fn while_loop(&mut self, cond: Slot, at: usize, x: usize, head: usize, seq: &mut Seq) -> DResult<usize> {
        let body_end = self.addr(x - 1);
        let exit = self.addr(x);
        self.frames.push(Frame::new(FrameKind::While, Some(exit), Some(self.addr(head)), body_end).probing());
        let k = self.frames.len() - 1;
        let first = self.statements(at + 1, x - 1);
        let done = self.frames.pop();
        let node = match first {
            Ok(body) => {
                let body = self.ast.add(Node::Block(body));
                Node::While { cond: Some(cond.id), body, continue_used: done.is_some_and(|f| f.continue_used) }
            }
            Err(Fault::Continue { frame, target }) if frame == k => {
                trace!("{}: continue lands at {target}, loop at {} is a for", self.entry.name, self.addr(head));
                let t = self.index(x - 1, target)?;
                self.frames.push(Frame::new(FrameKind::For, Some(exit), Some(target), body_end));
                let body = self.statements(at + 1, t);
                self.frames.pop();
                let body = body?;
                let step = match self.statements(t, x - 1)?.as_slice() {
                    [] => None,
                    [one] => Some(*one),
                    _ => return Err(self.structure(t, "for step with several statements")),
                };
                let body = self.ast.add(Node::Block(body));
                Node::For { init: None, cond: Some(cond.id), step, body }
            }
            Err(e) => return Err(e),
        };
        self.statement(seq, node);
        Ok(x)
    }

    /// `do … until` débutant à `start` : dernier `bf` de la plage qui y revient.
    fn do_until(&mut self, start: usize, end: usize, seq: &mut Seq) -> DResult<Option<usize>> {
        let head = i64::from(self.addr(start));
        let ins = &self.entry.instructions;
        let Some(j) = (start..end).rev().find(|&j| ins[j].opcode == Opcode::Bf && ins[j].target() == head) else {
            return Ok(None);
        };
        let exit = self.addr(j + 1);
        let body_end = self.addr(j);
        self.frames.push(Frame::new(FrameKind::DoUntil, Some(exit), None, body_end).probing());
        let k = self.frames.len() - 1;
        let first = self.decode(start, j, Vec::new());
        self.frames.pop();
        let (body, cond) = match first {
            Ok(mut inner) => {
                let cond = self.take(j, &mut inner)?;
                if !inner.stack.is_empty() {
                    return Err(self.structure(j, "do-until condition leaves values behind"));
                }
                (inner.stmts, cond)
            }
            Err(Fault::Continue { frame, target }) if frame == k => {
                let t = self.index(j, target)?;
                self.frames.push(Frame::new(FrameKind::DoUntil, Some(exit), Some(target), body_end));
                let body = self.statements(start, t);
                self.frames.pop();
                (body?, self.expression(t, j)?)
            }
            Err(e) => return Err(e),
        };
        self.boolify(cond, DataType::Boolean);
        let body = self.ast.add(Node::Block(body));
        self.statement(seq, Node::DoUntil { body, cond: cond.id });
        Ok(Some(j + 1))
    }

    fn is_repeat(&self, at: usize) -> bool {
        let ins = &self.entry.instructions;
        ins[at].type1 == DataType::Int32
            && ins.get(at + 1).is_some_and(|p| p.opcode == Opcode::PushI && p.value == Value::Int16(0))
            && ins
                .get(at + 2)
                .is_some_and(|c| c.opcode == Opcode::Cmp && c.comparison == Some(ComparisonType::Lte))
            && ins.get(at + 3).is_some_and(|b| b.opcode == Opcode::Bt && b.target() > i64::from(b.address))
    }

    /// `dup.i 0; pushi.e 0; cmp LTE; bt END; corps; décrément; bt tête; END: popz.i`
    fn repeat(&mut self, at: usize, seq: &mut Seq) -> DResult<usize> {
        let count = self.take(at, seq)?;
        let target = self.jump_target(at + 3)?;
        let end = self.index(at + 3, target)?;
        let ins = &self.entry.instructions;
        if end < at + 9 || !ins.get(end).is_some_and(|p| p.opcode == Opcode::Popz) {
            return Err(self.structure(at, "repeat without its counter epilogue"));
        }
        let decrement = end - 5;
        let frame = Frame::new(FrameKind::Repeat, Some(self.addr(end)), Some(self.addr(decrement)), self.addr(decrement));
        self.frames.push(frame);
        let body = self.statements(at + 4, decrement);
        self.frames.pop();
        let body = self.ast.add(Node::Block(body?));
        self.statement(seq, Node::Repeat { count: count.id, body });
        Ok(end + 1)
    }

    fn with(&mut self, at: usize, seq: &mut Seq) -> DResult<usize> {
        let target = self.take_instance(at, seq)?;
        let x = self.index(at, self.jump_target(at)?)?;
        let ins = &self.entry.instructions;
        if !ins.get(x).is_some_and(|p| p.opcode == Opcode::PopEnv && !p.exit_magic) {
            return Err(self.structure(at, "pushenv without its popenv"));
        }
        let mut break_to = None;
        let mut resume = x + 1;
        if ins.get(x + 1).is_some_and(|b| b.opcode == Opcode::B) {
            if let Ok(e) = self.jump_target(x + 1).and_then(|t| self.index(x + 1, t)) {
                if e >= 1 && ins[e - 1].opcode == Opcode::PopEnv && ins[e - 1].exit_magic {
                    break_to = Some(self.addr(e - 1));
                    resume = e;
                }
            }
        }
        self.frames.push(Frame::new(FrameKind::With, break_to, Some(self.addr(x)), self.addr(x)));
        let body = self.statements(at + 1, x);
        self.frames.pop();
        let body = self.ast.add(Node::Block(body?));
        self.statement(seq, Node::With { target: target.id, body });
        Ok(resume)
    }

    /* ─────────── switch ─────────── */

    /// Premier test `cmp EQ; bt` d'un `switch` dont la valeur est sous `dup` en `at`.
    fn switch_test(&self, at: usize, depth: usize) -> Option<usize> {
        let ins = &self.entry.instructions;
        for j in at + 1..ins.len() {
            let d = self.depths.get(j)?;
            if d <= depth {
                return None;
            }
            if d == depth + 2
                && ins[j].opcode == Opcode::Cmp
                && ins[j].comparison == Some(ComparisonType::Eq)
                && ins.get(j + 1).is_some_and(|b| b.opcode == Opcode::Bt && b.target() > i64::from(b.address))
            {
                return Some(j);
            }
        }
        None
    }

    fn is_switch(&self, at: usize) -> bool {
        self.depths.get(at).is_some_and(|d| self.switch_test(at, d).is_some())
    }

    fn switch(&mut self, at: usize, value: Slot, seq: &mut Seq) -> DResult<usize> {
        let depth = self.depths.get(at).ok_or_else(|| self.structure(at, "switch in unreachable code"))?;
        let entry = self.entry;
        let mut labels = Vec::new();
        let mut p = at;
        loop {
            let ins = entry.instructions.get(p).ok_or_else(|| self.structure(at, "switch tests run off the entry"))?;
            match ins.opcode {
                Opcode::Dup if ins.extra == 0 && self.depths.get(p) == Some(depth) => {
                    let cmp = self.switch_test(p, depth).ok_or_else(|| self.structure(p, "switch test without cmp"))?;
                    let label = self.expression(p + 1, cmp)?;
                    self.boolify(label, entry.instructions[cmp].type1);
                    labels.push((label.id, self.jump_target(cmp + 1)?));
                    p = cmp + 2;
                }
                Opcode::B => break,
                _ => return Err(self.structure(p, "unexpected instruction among switch tests")),
            }
        }
        let fallback = self.jump_target(p)?;
        self.switch_body(p, value, labels, fallback, depth, seq)
    }

    fn switch_body(
        &mut self,
        at: usize,
        value: Slot,
        labels: Vec<(NodeId, u32)>,
        fallback: u32,
        depth: usize,
        seq: &mut Seq,
    ) -> DResult<usize> {
        let mut from = at + 1;
        for &t in labels.iter().map(|(_, t)| t).chain(std::iter::once(&fallback)) {
            from = from.max(self.index(at, t)?);
        }
        let end = self.switch_end(from, depth).ok_or_else(|| self.structure(at, "switch without its closing popz"))?;
        let end_addr = self.addr(end);
        let default = (fallback != end_addr).then_some(fallback);
        let mut starts: Vec<u32> = labels.iter().map(|(_, t)| *t).chain(default).collect();
        starts.sort_unstable();
        starts.dedup();

        self.frames.push(Frame::new(FrameKind::Switch, Some(end_addr), None, end_addr));
        let body = self.switch_arms(at, &starts, &labels, default, end);
        self.frames.pop();
        let body = body?;
        self.statement(seq, Node::Switch { value: value.id, body });
        Ok(end + 1)
    }

    fn switch_arms(
        &mut self,
        at: usize,
        starts: &[u32],
        labels: &[(NodeId, u32)],
        default: Option<u32>,
        end: usize,
    ) -> DResult<Vec<NodeId>> {
        let mut body = Vec::new();
        for (k, &start) in starts.iter().enumerate() {
            for (label, _) in labels.iter().filter(|(_, t)| *t == start) {
                body.push(self.ast.add(Node::SwitchCase(*label)));
            }
            if default == Some(start) {
                body.push(self.ast.add(Node::SwitchDefault));
            }
            let from = self.index(at, start)?;
            let to = match starts.get(k + 1) {
                Some(&next) => self.index(at, next)?,
                None => end,
            };
            body.extend(self.statements(from, to)?);
        }
        Ok(body)
    }

    /// Premier `popz` à la profondeur du `switch` qui n'est pas un déroulement.
    fn switch_end(&self, from: usize, depth: usize) -> Option<usize> {
        (from..self.entry.instructions.len()).find(|&j| {
            self.entry.instructions[j].opcode == Opcode::Popz
                && self.depths.get(j) == Some(depth)
                && !self.is_unwind(j, depth)
        })
    }

    fn is_unwind(&self, at: usize, depth: usize) -> bool {
        let ins = &self.entry.instructions;
        let mut k = at;
        while let Some(x) = ins.get(k) {
            match x.opcode {
                Opcode::Popz | Opcode::PushLoc => k += 1,
                Opcode::PopEnv if x.exit_magic => k += 1,
                _ => break,
            }
        }
        ins.get(k).is_some_and(is_terminator) && self.depths.get(k + 1).is_some_and(|d| d >= depth)
    }

    /* ─────────── try / static / fonctions ─────────── */

    /// `push.i F; conv; push.i C|-1; conv; call @@try_hook@@ 2; popz` en `at - 4 .. at + 1`.
    fn try_block(&mut self, at: usize, seq: &mut Seq) -> DResult<usize> {
        self.take(at, seq)?;
        self.take(at, seq)?;
        let ins = &self.entry.instructions;
        if at < 4 || !ins.get(at + 1).is_some_and(|p| p.opcode == Opcode::Popz) {
            return Err(self.structure(at, "malformed try hook"));
        }
        let address = |v: Value| v.as_i64().and_then(|a| u32::try_from(a).ok());
        let finally_addr = address(ins[at - 4].value).ok_or_else(|| self.structure(at, "try without finally address"))?;
        let f = self.index(at, finally_addr)?;
        let catch_addr = address(ins[at - 2].value);

        let (body, catch) = match catch_addr {
            None => {
                let body_end = f.checked_sub(2).filter(|&e| e >= at + 2).ok_or_else(|| self.structure(at, "try body"))?;
                (self.statements(at + 2, body_end)?, None)
            }
            Some(catch_addr) => {
                let c = self.index(at, catch_addr)?;
                let body_end = c.checked_sub(3).filter(|&e| e >= at + 2).ok_or_else(|| self.structure(at, "try body"))?;
                let body = self.statements(at + 2, body_end)?;
                let handler_end = f.checked_sub(2).filter(|&e| e >= c).ok_or_else(|| self.structure(c, "catch body"))?;
                let exception = self.ast.add(Node::Exception);
                let mut handler = self.decode(c, handler_end, vec![Slot::new(exception)])?;
                if !handler.stack.is_empty() {
                    return Err(self.structure(c, "value left in a catch block"));
                }
                let name = self.catch_variable(c, &mut handler.stmts, exception)?;
                let handler = self.ast.add(Node::Block(handler.stmts));
                (body, Some((name, handler)))
            }
        };

        let close = self.finally_end(f)?;
        let finally_stmts = self.statements(f, close)?;
        let finally = if catch.is_none() || !finally_stmts.is_empty() {
            Some(self.ast.add(Node::Block(finally_stmts)))
        } else {
            None
        };
        let body = self.ast.add(Node::Block(body));
        self.statement(seq, Node::Try { body, catch, finally });
        Ok(close + 2)
    }

    fn catch_variable(&self, at: usize, stmts: &mut Vec<NodeId>, exception: NodeId) -> DResult<String> {
        let name = stmts.first().and_then(|&id| match self.ast.get(id) {
            Node::Assign { target, value, .. } if *value == exception => self.ast.variable(*target).map(|v| v.name.clone()),
            _ => None,
        });
        let name = name.ok_or_else(|| self.structure(at, "catch without its variable"))?;
        stmts.remove(0);
        Ok(name)
    }

    /// `call @@finish_finally@@` fermant le `finally` ouvert en `from`.
    fn finally_end(&self, from: usize) -> DResult<usize> {
        let mut nesting = 0usize;
        for (j, ins) in self.entry.instructions.iter().enumerate().skip(from) {
            if is_call_to(ins, self.tables, internal::TRY_HOOK) {
                nesting += 1;
            } else if is_call_to(ins, self.tables, internal::FINISH_FINALLY) {
                if nesting == 0 {
                    return Ok(j);
                }
                nesting -= 1;
            }
        }
        Err(self.structure(from, "finally without its closing call"))
    }

    /// `break.e -6; bt FIN; initialisations; break.e -7; FIN:`
    fn static_block(&mut self, at: usize, seq: &mut Seq) -> DResult<usize> {
        let ins = &self.entry.instructions;
        if !ins.get(at + 1).is_some_and(|b| b.opcode == Opcode::Bt) {
            return Err(self.structure(at, "isstaticok without its branch"));
        }
        let t = self.index(at + 1, self.jump_target(at + 1)?)?;
        if t < at + 3 || ins[t - 1].break_type() != Some(BreakType::SetStatic) {
            return Err(self.structure(at, "static block without setstatic"));
        }
        let inits = self.statements(at + 2, t - 1)?;
        self.statement(seq, Node::Static(inits));
        Ok(t)
    }

    /// `b FIN` sautant le corps d'une fonction enfant ; corps sans son `exit.i` final.
    fn child_function(&mut self, at: usize, child: &ChildFunction, target: u32) -> DResult<usize> {
        let t = self.index(at, target)?;
        let body_end = if t > at + 1 && self.entry.instructions[t - 1].opcode == Opcode::Exit { t - 1 } else { t };
        let outer = std::mem::take(&mut self.frames);
        let body = self.statements(at + 1, body_end);
        self.frames = outer;
        let body = body.map_err(|f| Fault::Error(settle(f)))?;
        let body = self.ast.add(Node::Block(body));
        let id = self.ast.add(Node::Function {
            child: child.name.clone(),
            argument_count: child.argument_count,
            constructor: child.constructor,
            body,
            named: false,
            preamble: Vec::new(),
        });
        trace!("{}: child function {} at {}", self.entry.name, child.name, child.offset);
        self.functions.insert(child.name.clone(), id);
        Ok(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::compile;
    use pretty_assertions::assert_eq;

    fn decoded(src: &str) -> Program {
        let (entry, tables) = compile(src);
        decode_entry(&entry, &tables).unwrap()
    }

    fn root(program: &Program) -> Vec<Node> {
        match program.ast.get(program.root) {
            Node::Block(items) => items.iter().map(|&id| program.ast.get(id).clone()).collect(),
            other => panic!("root is {other:?}"),
        }
    }

    fn block(program: &Program, id: NodeId) -> Vec<Node> {
        match program.ast.get(id) {
            Node::Block(items) => items.iter().map(|&id| program.ast.get(id).clone()).collect(),
            other => panic!("not a block: {other:?}"),
        }
    }

    #[test]
    fn while_loop_is_recognized() {
        let p = decoded("while (a) { b = 1; }");
        let stmts = root(&p);
        assert_eq!(stmts.len(), 1);
        let Node::While { cond: Some(cond), body, continue_used } = &stmts[0] else { panic!("{stmts:?}") };
        assert_eq!(p.ast.variable(*cond).map(|v| v.name.as_str()), Some("a"));
        assert_eq!(block(&p, *body).len(), 1);
        assert!(!continue_used);
    }

    #[test]
    fn forward_continue_turns_loop_into_for() {
        let p = decoded("for (i = 0; i < 3; i += 1) { continue; }");
        let stmts = root(&p);
        assert_eq!(stmts.len(), 2);
        let Node::For { init: None, cond: Some(_), step: Some(step), body } = &stmts[1] else { panic!("{stmts:?}") };
        assert!(matches!(p.ast.get(*step), Node::Assign { .. }));
        assert_eq!(block(&p, *body), vec![Node::Continue]);
    }

    #[test]
    fn bare_true_condition_is_boolean() {
        let p = decoded("while (true) { }");
        let stmts = root(&p);
        let Node::While { cond: Some(cond), .. } = &stmts[0] else { panic!("{stmts:?}") };
        assert_eq!(p.ast.get(*cond), &Node::Boolean(true));
    }

    #[test]
    fn switch_labels_and_shared_default() {
        let p = decoded("switch (a) { case 1: b = 1; break; case 2: default: b = 2; }");
        let stmts = root(&p);
        let Node::Switch { body, .. } = &stmts[0] else { panic!("{stmts:?}") };
        let kinds: Vec<&str> = body
            .iter()
            .map(|&id| match p.ast.get(id) {
                Node::SwitchCase(_) => "case",
                Node::SwitchDefault => "default",
                Node::Assign { .. } => "assign",
                Node::Break => "break",
                _ => "?",
            })
            .collect();
        assert_eq!(kinds, vec!["case", "assign", "break", "case", "default", "assign"]);
    }

    #[test]
    fn ternary_and_short_circuit_values() {
        let p = decoded("x = a ? b : c; y = a && b || c;");
        let stmts = root(&p);
        let Node::Assign { value, .. } = &stmts[0] else { panic!() };
        assert!(matches!(p.ast.get(*value), Node::Conditional { .. }));
        let Node::Assign { value, .. } = &stmts[1] else { panic!() };
        let Node::ShortCircuit { and: false, operands } = p.ast.get(*value) else { panic!("{:?}", p.ast.get(*value)) };
        assert_eq!(operands.len(), 2);
        assert!(matches!(p.ast.get(operands[0]), Node::ShortCircuit { and: true, .. }));
    }

    #[test]
    fn postfix_in_expression() {
        let p = decoded("x = y++;");
        let stmts = root(&p);
        assert_eq!(stmts.len(), 1);
        let Node::Assign { value, .. } = &stmts[0] else { panic!() };
        assert!(matches!(p.ast.get(*value), Node::Assign { kind: AssignKind::Postfix { increment: true }, .. }));
    }

    #[test]
    fn repeat_with_and_do_until() {
        let p = decoded("repeat (3) { a += 1; } with (obj) { break; } do { continue; } until (a);");
        let stmts = root(&p);
        assert_eq!(stmts.len(), 3);
        let Node::Repeat { count, .. } = &stmts[0] else { panic!("{stmts:?}") };
        assert_eq!(p.ast.get(*count), &Node::Int16 { value: 3, step: StepMark::None });
        let Node::With { body, .. } = &stmts[1] else { panic!("{stmts:?}") };
        assert_eq!(block(&p, *body), vec![Node::Break]);
        let Node::DoUntil { body, .. } = &stmts[2] else { panic!("{stmts:?}") };
        assert_eq!(block(&p, *body), vec![Node::Continue]);
    }

    #[test]
    fn try_catch_finally_blocks() {
        let p = decoded("try { a = 1; } catch (e) { b = e; } finally { c = 1; }");
        let stmts = root(&p);
        let Node::Try { body, catch: Some((name, handler)), finally: Some(fin) } = &stmts[0] else { panic!("{stmts:?}") };
        assert_eq!(name, "e");
        assert_eq!(block(&p, *body).len(), 1);
        assert_eq!(block(&p, *handler).len(), 1);
        assert_eq!(block(&p, *fin).len(), 1);
    }

    #[test]
    fn child_functions_are_collected() {
        let p = decoded("function f() { return 1; }");
        let id = p.functions.get("f").copied().unwrap();
        let Node::Function { body, named: false, .. } = p.ast.get(id) else { panic!() };
        assert!(matches!(block(&p, *body).as_slice(), [Node::Return(_)]));
    }

    #[test]
    fn jump_into_an_instruction_is_an_error() {
        let mut bad = Instruction::new(Opcode::B);
        bad.jump = 2;
        let mut exit = Instruction::new(Opcode::Exit);
        exit.type1 = DataType::Int32;
        let mut push = Instruction::new(Opcode::Push);
        push.type1 = DataType::Int32;
        push.value = Value::Int32(1);
        let entry = CodeEntry::new("e", vec![bad, push, exit]);
        assert!(matches!(decode_entry(&entry, &NameTables::new()), Err(DecompileError::Structure { .. })));
    }
}
