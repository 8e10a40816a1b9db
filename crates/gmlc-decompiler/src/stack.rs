//! Profondeur de la pile d'exécution avant chaque instruction.
//!
//! Propagation en file de travail depuis l'entrée, les corps de fonctions
//! enfants et les blocs `catch` (qui démarrent avec l'exception empilée).
//! Chaque case de pile retient si elle porte un marqueur `pushi.e -9` :
//! un accès `[stacktop]`/`[array]` consomme alors une case de plus.
//!
//! Une instruction jamais atteinte qui suit un saut inconditionnel hérite
//! de la profondeur d'avant les `popz` de déroulement qui précèdent ce saut.

use gmlc_core::{BreakType, CodeEntry, DataType, InstanceType, Instruction, NameTables, Opcode, Value, VariableType};
use gmlc_builtins::internal;
use log::trace;
use smallvec::SmallVec;

/// Profondeurs calculées pour une entrée.
#[derive(Debug, Clone, Default)]
pub struct StackDepths {
    before: Vec<Option<usize>>,
}

impl StackDepths {
    /// Analyse `entry`.
    #[must_use]
    pub fn analyze(entry: &CodeEntry, tables: &NameTables) -> Self {
        let mut flow = Flow { entry, states: vec![None; entry.instructions.len()], work: Vec::new() };
        if entry.instructions.is_empty() {
            return Self::default();
        }

        flow.seed(0, Vec::new());
        for child in &entry.children {
            if let Some(idx) = entry.index_of(child.offset) {
                flow.seed(idx, Vec::new());
            }
        }
        for (i, ins) in entry.instructions.iter().enumerate() {
            if is_call_to(ins, tables, internal::TRY_HOOK) && i >= 2 {
                let catch = entry.instructions[i - 2].value.as_i64().unwrap_or(-1);
                if let Some(idx) = u32::try_from(catch).ok().and_then(|a| entry.index_of(a)) {
                    flow.seed(idx, vec![false]);
                }
            }
        }
        flow.run();

        // Instructions inatteignables : reprise après chaque terminateur.
        loop {
            let mut progressed = false;
            for idx in 1..entry.instructions.len() {
                if flow.states[idx].is_some() || !is_terminator(&entry.instructions[idx - 1]) {
                    continue;
                }
                let Some(mut term) = flow.states[idx - 1].clone() else { continue };
                apply(&entry.instructions[idx - 1], &mut term);
                let depth = term.len() + unwinds_before(&entry.instructions, idx - 1);
                trace!("{}: unreached instruction {idx} assumed at depth {depth}", entry.name);
                flow.seed(idx, vec![false; depth]);
                flow.run();
                progressed = true;
            }
            if !progressed {
                break;
            }
        }

        Self { before: flow.states.into_iter().map(|s| s.map(|v| v.len())).collect() }
    }

    /// Profondeur avant l'instruction `idx`, si connue.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<usize> {
        self.before.get(idx).copied().flatten()
    }

    /// Nombre d'instructions couvertes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.before.len()
    }

    /// Aucune instruction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.before.is_empty()
    }
}

struct Flow<'e> {
    entry: &'e CodeEntry,
    states: Vec<Option<Vec<bool>>>,
    work: Vec<usize>,
}

impl Flow<'_> {
    fn seed(&mut self, idx: usize, state: Vec<bool>) {
        if self.states[idx].is_none() {
            self.states[idx] = Some(state);
            self.work.push(idx);
        }
    }

    fn run(&mut self) {
        let entry = self.entry;
        while let Some(idx) = self.work.pop() {
            let Some(mut state) = self.states[idx].clone() else { continue };
            apply(&entry.instructions[idx], &mut state);
            for next in successors(entry, idx) {
                match self.states[next].as_ref().map(Vec::len) {
                    None => self.seed(next, state.clone()),
                    Some(known) if known != state.len() => {
                        trace!("{}: depth mismatch at instruction {next} ({known} vs {})", entry.name, state.len());
                    }
                    Some(_) => {}
                }
            }
        }
    }
}

/// Vrai si `ins` est un `call` vers la fonction `name`.
pub(crate) fn is_call_to(ins: &Instruction, tables: &NameTables, name: &str) -> bool {
    ins.opcode == Opcode::Call && ins.function().and_then(|id| tables.function(id).ok()) == Some(name)
}

/// `b`, `exit` ou `ret`.
pub(crate) const fn is_terminator(ins: &Instruction) -> bool {
    matches!(ins.opcode, Opcode::B | Opcode::Exit | Opcode::Ret)
}

/// Vrai pour le marqueur d'instance `pushi.e -9`.
pub(crate) fn is_stacktop_marker(ins: &Instruction) -> bool {
    ins.opcode == Opcode::PushI && ins.value == Value::Int16(InstanceType::STACK_TOP.0)
}

/// `popz` de déroulement juste avant le terminateur `term`.
fn unwinds_before(instructions: &[Instruction], term: usize) -> usize {
    let mut count = 0;
    for ins in instructions[..term].iter().rev() {
        match ins.opcode {
            Opcode::Popz => count += 1,
            Opcode::PushLoc => {}
            Opcode::PopEnv if ins.exit_magic => {}
            _ => break,
        }
    }
    count
}

/// Index des instructions qui peuvent suivre `idx`.
fn successors(entry: &CodeEntry, idx: usize) -> SmallVec<[usize; 2]> {
    let ins = &entry.instructions[idx];
    let mut out = SmallVec::new();
    let fallthrough = idx + 1 < entry.instructions.len();
    let target = u32::try_from(ins.target()).ok().and_then(|a| entry.index_of(a));
    match ins.opcode {
        Opcode::B => out.extend(target),
        Opcode::Exit | Opcode::Ret => {}
        Opcode::Bt | Opcode::Bf | Opcode::PushEnv => {
            if fallthrough {
                out.push(idx + 1);
            }
            out.extend(target);
        }
        Opcode::PopEnv if !ins.exit_magic => {
            if fallthrough {
                out.push(idx + 1);
            }
            out.extend(target);
        }
        _ => {
            if fallthrough {
                out.push(idx + 1);
            }
        }
    }
    out
}

fn pop_n(stack: &mut Vec<bool>, n: usize) {
    let keep = stack.len().saturating_sub(n);
    stack.truncate(keep);
}

/// Dépile une instance et son éventuel marqueur `-9`.
fn pop_instance(stack: &mut Vec<bool>) {
    if stack.pop() == Some(true) {
        stack.pop();
    }
}

/// Effet de `ins` sur la pile abstraite.
pub(crate) fn apply(ins: &Instruction, stack: &mut Vec<bool>) {
    match ins.opcode {
        Opcode::Conv | Opcode::Neg | Opcode::Not => {
            if stack.pop().is_some() {
                stack.push(false);
            }
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
            pop_n(stack, 2);
            stack.push(false);
        }
        Opcode::Dup => {
            if ins.swap == 0 {
                let n = usize::from(ins.extra) + 1;
                let from = stack.len().saturating_sub(n);
                let copy: SmallVec<[bool; 4]> = stack[from..].iter().copied().collect();
                stack.extend(copy);
            }
        }
        Opcode::Popz | Opcode::Ret | Opcode::Bt | Opcode::Bf => pop_n(stack, 1),
        Opcode::Exit | Opcode::B | Opcode::PopEnv => {}
        Opcode::PushEnv => pop_instance(stack),
        Opcode::Push | Opcode::PushLoc | Opcode::PushGlb | Opcode::PushBltn | Opcode::PushI => {
            match ins.variable_type() {
                None => stack.push(is_stacktop_marker(ins)),
                Some(VariableType::Normal | VariableType::Instance) => stack.push(false),
                Some(VariableType::StackTop) => {
                    pop_instance(stack);
                    stack.push(false);
                }
                Some(VariableType::Array | VariableType::MultiPush | VariableType::MultiPushPop) => {
                    stack.pop();
                    pop_instance(stack);
                    stack.push(false);
                }
            }
        }
        Opcode::Pop => {
            if ins.is_swap_pop() {
                return;
            }
            let value_on_top = ins.type1 == DataType::Int32;
            match ins.variable_type() {
                Some(VariableType::StackTop) => {
                    if value_on_top {
                        stack.pop();
                        pop_instance(stack);
                    } else {
                        pop_instance(stack);
                        stack.pop();
                    }
                }
                Some(VariableType::Array | VariableType::MultiPush | VariableType::MultiPushPop) => {
                    if value_on_top {
                        stack.pop();
                        stack.pop();
                        pop_instance(stack);
                    } else {
                        stack.pop();
                        pop_instance(stack);
                        stack.pop();
                    }
                }
                _ => pop_n(stack, 1),
            }
        }
        Opcode::Call => {
            pop_n(stack, ins.argc());
            stack.push(false);
        }
        Opcode::CallV => {
            pop_n(stack, ins.argc() + 2);
            stack.push(false);
        }
        Opcode::Break => match ins.break_type() {
            Some(BreakType::PushAc | BreakType::PushAf) => {
                pop_n(stack, 2);
                stack.push(false);
            }
            Some(BreakType::PopAf) => pop_n(stack, 3),
            Some(BreakType::SetOwner) => pop_n(stack, 1),
            Some(BreakType::IsStaticOk) => stack.push(false),
            _ => {}
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gmlc_core::Reference;
    use pretty_assertions::assert_eq;

    fn pushi(v: i16) -> Instruction {
        let mut i = Instruction::new(Opcode::PushI);
        i.type1 = DataType::Int16;
        i.value = Value::Int16(v);
        i
    }

    fn branch(op: Opcode, jump: i32) -> Instruction {
        let mut i = Instruction::new(op);
        i.jump = jump;
        i
    }

    fn single(op: Opcode, t: DataType) -> Instruction {
        let mut i = Instruction::new(op);
        i.type1 = t;
        i
    }

    fn entry(instructions: Vec<Instruction>) -> CodeEntry {
        CodeEntry::new("test", instructions)
    }

    #[test]
    fn straight_line_depths() {
        let mut add = Instruction::new(Opcode::Add);
        add.type1 = DataType::Int32;
        let e = entry(vec![pushi(1), pushi(2), add, single(Opcode::Popz, DataType::Int32)]);
        let d = StackDepths::analyze(&e, &NameTables::new());
        let got: Vec<Option<usize>> = (0..4).map(|i| d.get(i)).collect();
        assert_eq!(got, vec![Some(0), Some(1), Some(2), Some(1)]);
    }

    #[test]
    fn stacktop_marker_takes_an_extra_slot() {
        let mut tables = NameTables::new();
        let id = tables.intern_variable("x", InstanceType::SELF);
        let mut push = Instruction::new(Opcode::Push);
        push.type1 = DataType::Variable;
        push.reference = Reference::Variable { id, kind: VariableType::StackTop };
        let e = entry(vec![pushi(5), pushi(-9), push, single(Opcode::Popz, DataType::Variable)]);
        let d = StackDepths::analyze(&e, &tables);
        assert_eq!(d.get(2), Some(2));
        assert_eq!(d.get(3), Some(1));
    }

    #[test]
    fn unreached_code_after_unwinding_jump_keeps_outer_depth() {
        // switch value; popz (continue unwind); b out; [unreached] popz; exit
        let e = entry(vec![
            pushi(1),
            single(Opcode::Popz, DataType::Int32),
            branch(Opcode::B, 3),
            single(Opcode::Popz, DataType::Int32),
            single(Opcode::Exit, DataType::Int32),
        ]);
        let d = StackDepths::analyze(&e, &NameTables::new());
        assert_eq!(d.get(2), Some(0));
        assert_eq!(d.get(3), Some(1));
        assert_eq!(d.get(4), Some(0));
    }

    #[test]
    fn branches_propagate_to_targets() {
        let e = entry(vec![
            pushi(1),
            branch(Opcode::Bf, 3),
            pushi(3),
            single(Opcode::Popz, DataType::Int32),
            single(Opcode::Exit, DataType::Int32),
        ]);
        let d = StackDepths::analyze(&e, &NameTables::new());
        assert_eq!(d.get(2), Some(0));
        assert_eq!(d.get(3), Some(1));
        assert_eq!(d.get(4), Some(0));
        assert_eq!(d.len(), 5);
    }
}
