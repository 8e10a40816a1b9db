//! Désassemblage texte et découpage en blocs de base.

use std::fmt::Write as _;

use gmlc_builtins::internal;
use gmlc_core::{CodeEntry, DataType, InstanceType, Instruction, InstructionClass, NameTables, Opcode, Reference, Value, VariableType};

use crate::stack::is_call_to;
use crate::DecompileError;

/// Adresses de début de bloc, triées et sans doublon.
///
/// Adresse 0 ; suite et cible de chaque `b`/`bt`/`bf`/`pushenv` ; cible
/// d'un `popenv` sans marqueur magique ; adresse suivant `exit`/`ret`.
/// Un appel `@@try_hook@@` ajoute les adresses `finally` et `catch` lues
/// dans les deux `push.i` qui le précèdent, et isole son enveloppe
/// (`adresse - 24` .. `adresse + 12`).
#[must_use]
pub fn find_block_addresses(entry: &CodeEntry, tables: &NameTables) -> Vec<u32> {
    let ins = &entry.instructions;
    if ins.is_empty() {
        return Vec::new();
    }
    let mut out = vec![0u32];
    let mut add = |addr: i64| {
        if let Ok(a) = u32::try_from(addr) {
            out.push(a);
        }
    };
    for (i, instr) in ins.iter().enumerate() {
        let next = i64::from(instr.address + instr.length());
        match instr.opcode {
            Opcode::B | Opcode::Bt | Opcode::Bf | Opcode::PushEnv => {
                add(next);
                add(instr.target());
            }
            Opcode::PopEnv if !instr.exit_magic => add(instr.target()),
            Opcode::Exit | Opcode::Ret => add(next),
            Opcode::Call if i >= 4 && is_call_to(instr, tables, internal::TRY_HOOK) => {
                add(ins[i - 4].value.as_i64().unwrap_or(-1));
                let catch = ins[i - 2].value.as_i64().unwrap_or(-1);
                if catch != -1 {
                    add(catch);
                }
                add(i64::from(instr.address) - 24);
                add(i64::from(instr.address) + 12);
            }
            _ => {}
        }
    }
    out.sort_unstable();
    out.dedup();
    out
}

/// Texte échappé d'une chaîne de désassemblage.
#[must_use]
pub fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\u{0B}' => out.push_str("\\v"),
            '\u{07}' => out.push_str("\\a"),
            other => out.push(other),
        }
    }
    out
}

/// Listing d'une entrée, blocs numérotés `:[n]`.
pub fn disassemble(entry: &CodeEntry, tables: &NameTables) -> Result<String, DecompileError> {
    let blocks = find_block_addresses(entry, tables);
    let block_of = |addr: i64| u32::try_from(addr).ok().and_then(|a| blocks.binary_search(&a).ok());

    let mut out = String::new();
    let _ = writeln!(out, "# Name: {}", entry.name);
    for ins in &entry.instructions {
        if let Some(n) = block_of(i64::from(ins.address)) {
            let _ = writeln!(out, "\n:[{n}]");
        }
        line(&mut out, ins, entry, tables, &block_of)?;
        out.push('\n');
    }
    out.push_str("\n:[end]");
    Ok(out)
}

fn line(
    out: &mut String,
    ins: &Instruction,
    entry: &CodeEntry,
    tables: &NameTables,
    block_of: &dyn Fn(i64) -> Option<usize>,
) -> Result<(), DecompileError> {
    if ins.opcode != Opcode::Break {
        out.push_str(ins.opcode.name());
    }
    match ins.opcode.class() {
        InstructionClass::SingleType => {
            let _ = write!(out, ".{}", ins.type1);
            match ins.opcode {
                Opcode::CallV => {
                    let _ = write!(out, " {}", ins.extra);
                }
                Opcode::Dup => {
                    let _ = write!(out, " {}", ins.extra);
                    if ins.swap != 0 {
                        let _ = write!(out, " {}", ins.swap & 0x7F);
                    }
                }
                _ => {}
            }
        }
        InstructionClass::DoubleType => {
            let _ = write!(out, ".{}.{}", ins.type1, ins.type2);
        }
        InstructionClass::Comparison => {
            let kind = ins.comparison.map_or("?", gmlc_core::ComparisonType::name);
            let _ = write!(out, ".{}.{} {kind}", ins.type1, ins.type2);
        }
        InstructionClass::Branch => {
            if ins.target() == i64::from(entry.length) {
                out.push_str(" [end]");
            } else if ins.exit_magic {
                out.push_str(" [magic]");
            } else {
                match block_of(ins.target()) {
                    Some(n) => {
                        let _ = write!(out, " [{n}]");
                    }
                    None => {
                        let _ = write!(out, " [{}]", ins.target());
                    }
                }
            }
        }
        InstructionClass::Pop => {
            let _ = write!(out, ".{}.{} ", ins.type1, ins.type2);
            if ins.type1 == DataType::Int16 {
                let _ = write!(out, "{}", ins.instance.0);
            } else {
                variable(out, ins, tables)?;
            }
        }
        InstructionClass::Push => {
            let _ = write!(out, ".{} ", ins.type1);
            if ins.type1 == DataType::Variable {
                variable(out, ins, tables)?;
            } else if let Value::String(id) = ins.value {
                let _ = write!(out, "\"{}\"", sanitize(tables.string(id)?));
            } else if let Reference::Function(id) = ins.reference {
                out.push_str(tables.function(id)?);
            } else {
                value(out, ins.value);
            }
        }
        InstructionClass::Call => {
            let name = match ins.reference {
                Reference::Function(id) => tables.function(id)?,
                _ => "?",
            };
            let _ = write!(out, ".{} {name} {}", ins.type1, ins.argc());
        }
        InstructionClass::Break => {
            let name = ins.break_type().map_or("?", gmlc_core::BreakType::name);
            let _ = write!(out, "{name}.{}", ins.type1);
        }
    }
    Ok(())
}

fn variable(out: &mut String, ins: &Instruction, tables: &NameTables) -> Result<(), DecompileError> {
    let Reference::Variable { id, kind } = ins.reference else {
        out.push('?');
        return Ok(());
    };
    if ins.instance != InstanceType::UNDEFINED {
        let _ = write!(out, "{}.", ins.instance);
    }
    let entry = tables.variable(id)?;
    if kind == VariableType::Normal {
        out.push_str(&entry.name);
    } else {
        let _ = write!(out, "[{}]{}.{}", kind.name(), entry.scope, entry.name);
    }
    Ok(())
}

fn value(out: &mut String, v: Value) {
    let _ = match v {
        Value::None => Ok(()),
        Value::Int16(n) => write!(out, "{n}"),
        Value::Int32(n) => write!(out, "{n}"),
        Value::Int64(n) => write!(out, "{n}"),
        Value::Float(f) => write!(out, "{f}"),
        Value::Double(d) => write!(out, "{d}"),
        Value::Boolean(b) => write!(out, "{b}"),
        Value::String(id) => write!(out, "#{id}"),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn blocks_split_at_branches() {
        let mut popz = Instruction::new(Opcode::Popz);
        popz.type1 = DataType::Int32;
        let entry = CodeEntry::new("e", vec![pushi(1), branch(Opcode::Bf, 2), pushi(2), popz]);
        assert_eq!(find_block_addresses(&entry, &NameTables::new()), vec![0, 8, 12]);
    }

    #[test]
    fn empty_entry_has_no_blocks() {
        let entry = CodeEntry::new("e", Vec::new());
        assert!(find_block_addresses(&entry, &NameTables::new()).is_empty());
    }

    #[test]
    fn listing_format() {
        let mut tables = NameTables::new();
        let x = tables.intern_variable("x", InstanceType::SELF);
        let s = tables.intern_string("a\"b\n");
        let mut push_s = Instruction::new(Opcode::Push);
        push_s.type1 = DataType::String;
        push_s.value = Value::String(s);
        let mut pop = Instruction::new(Opcode::Pop);
        pop.type1 = DataType::Variable;
        pop.type2 = DataType::String;
        pop.instance = InstanceType::SELF;
        pop.reference = Reference::Variable { id: x, kind: VariableType::Normal };
        let entry = CodeEntry::new("gml_Script_t", vec![push_s, pop, branch(Opcode::B, 1)]);

        let text = disassemble(&entry, &tables).unwrap();
        assert_eq!(
            text,
            "# Name: gml_Script_t\n\n:[0]\npush.s \"a\\\"b\\n\"\npop.v.s self.x\nb [end]\n\n:[end]"
        );
    }

    #[test]
    fn sanitize_escapes_controls() {
        assert_eq!(sanitize("a\\b\t\r"), "a\\\\b\\t\\r");
    }
}
