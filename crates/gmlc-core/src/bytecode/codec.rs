//! Codec binaire little-endian des instructions.
//!
//! Mot d'en-tête `[b0][b1][b2][opcode]` :
//! - simple/double/comparaison : `b0 = extra`, `b1 = comparaison | swap`, `b2 = type1 | type2 << 4`
//! - saut : 23 bits signés (mots), bit `0x800000` = sortie magique (écrite `0xF00000`)
//! - pop : `b0|b1 = instance`, puis mot de référence (sauf swap `type1 == e`)
//! - push : `b2 = type1`, `b0|b1 = valeur e` ou instance (variable), puis référence ou immédiat
//! - call : `b0|b1 = argc`, puis id de fonction
//! - break : `b0|b1 = genre`
//!
//! Mot de référence variable : `genre << 24 | id`. Un `push.i` portant une
//! référence de fonction est marqué par `b0 = 1`.

use std::io::{self, Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use super::instruction::{Instruction, Reference, Value};
use super::kinds::{ComparisonType, DataType, InstanceType, InstructionClass, Opcode, VariableType};

const EXIT_MAGIC_BIT: u32 = 0x0080_0000;
const EXIT_MAGIC_WORD: u32 = 0x00F0_0000;
const JUMP_MASK: u32 = 0x007F_FFFF;
const JUMP_SIGN: u32 = 0x0040_0000;
const ID_MASK: u32 = 0x00FF_FFFF;
const FUNCTION_REF_MARK: u32 = 0x0000_0001;

/// Erreurs de (dé)codage.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Flux tronqué au milieu d'une instruction.
    #[error("truncated instruction at address {address}")]
    Truncated {
        /// Adresse de l'instruction.
        address: u32,
    },
    /// Opcode inconnu.
    #[error("unknown opcode 0x{byte:02X} at address {address}")]
    UnknownOpcode {
        /// Adresse de l'instruction.
        address: u32,
        /// Octet lu.
        byte: u8,
    },
    /// Type de donnée inconnu.
    #[error("unknown data type nibble {nibble} at address {address}")]
    UnknownDataType {
        /// Adresse de l'instruction.
        address: u32,
        /// Nibble lu.
        nibble: u8,
    },
    /// Genre de variable inconnu.
    #[error("unknown variable type 0x{byte:02X} at address {address}")]
    UnknownVariableType {
        /// Adresse de l'instruction.
        address: u32,
        /// Octet lu.
        byte: u8,
    },
    /// Genre de comparaison inconnu.
    #[error("unknown comparison kind {byte} at address {address}")]
    UnknownComparison {
        /// Adresse de l'instruction.
        address: u32,
        /// Octet lu.
        byte: u8,
    },
    /// Flux dont la longueur n'est pas multiple de 4.
    #[error("code length {0} is not a multiple of 4")]
    Misaligned(usize),
    /// Erreur d'E/S sous-jacente.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/* ─────────────────────────── Encodage ─────────────────────────── */

fn types_byte(ins: &Instruction) -> u32 {
    u32::from(ins.type1 as u8 & 0x0F) | (u32::from(ins.type2 as u8 & 0x0F) << 4)
}

fn header_word(ins: &Instruction) -> u32 {
    let op = u32::from(ins.opcode as u8) << 24;
    let types = types_byte(ins) << 16;
    match ins.opcode.class() {
        InstructionClass::SingleType | InstructionClass::DoubleType | InstructionClass::Comparison => {
            let b1 = ins.comparison.map_or(ins.swap, |c| c as u8);
            op | types | (u32::from(b1) << 8) | u32::from(ins.extra)
        }
        InstructionClass::Branch => {
            if ins.exit_magic {
                op | EXIT_MAGIC_WORD
            } else {
                op | (ins.jump as u32 & JUMP_MASK)
            }
        }
        InstructionClass::Pop => op | types | u32::from(ins.instance.0 as u16),
        InstructionClass::Push => {
            let low = match (ins.type1, ins.value) {
                (DataType::Int16, Value::Int16(v)) => u32::from(v as u16),
                (DataType::Variable, _) => u32::from(ins.instance.0 as u16),
                (DataType::Int32, _) if matches!(ins.reference, Reference::Function(_)) => {
                    FUNCTION_REF_MARK
                }
                _ => 0,
            };
            op | (u32::from(ins.type1 as u8 & 0x0F) << 16) | low
        }
        InstructionClass::Call | InstructionClass::Break => {
            let low = match ins.value {
                Value::Int16(v) => u32::from(v as u16),
                _ => 0,
            };
            op | types | low
        }
    }
}

fn reference_word(reference: Reference) -> u32 {
    match reference {
        Reference::Variable { id, kind } => (u32::from(kind as u8) << 24) | (id & ID_MASK),
        Reference::Function(id) => id,
        Reference::None => 0,
    }
}

/// Écrit une instruction dans `w`.
pub fn write_instruction<W: io::Write>(w: &mut W, ins: &Instruction) -> io::Result<()> {
    w.write_u32::<LittleEndian>(header_word(ins))?;
    match ins.opcode.class() {
        InstructionClass::Pop if ins.type1 != DataType::Int16 => {
            w.write_u32::<LittleEndian>(reference_word(ins.reference))?;
        }
        InstructionClass::Call => w.write_u32::<LittleEndian>(reference_word(ins.reference))?,
        InstructionClass::Push => match ins.type1 {
            DataType::Int16 => {}
            DataType::Variable => w.write_u32::<LittleEndian>(reference_word(ins.reference))?,
            DataType::Int32 => match (ins.reference, ins.value) {
                (Reference::Function(id), _) => w.write_u32::<LittleEndian>(id)?,
                (_, Value::Int32(v)) => w.write_i32::<LittleEndian>(v)?,
                (_, v) => w.write_i32::<LittleEndian>(v.as_i64().unwrap_or(0) as i32)?,
            },
            DataType::Int64 => match ins.value {
                Value::Int64(v) => w.write_i64::<LittleEndian>(v)?,
                v => w.write_i64::<LittleEndian>(v.as_i64().unwrap_or(0))?,
            },
            DataType::Double => match ins.value {
                Value::Double(v) => w.write_f64::<LittleEndian>(v)?,
                v => w.write_f64::<LittleEndian>(v.as_i64().unwrap_or(0) as f64)?,
            },
            DataType::Float => match ins.value {
                Value::Float(v) => w.write_f32::<LittleEndian>(v)?,
                v => w.write_f32::<LittleEndian>(v.as_i64().unwrap_or(0) as f32)?,
            },
            DataType::Boolean => w.write_i32::<LittleEndian>(i32::from(matches!(ins.value, Value::Boolean(true))))?,
            DataType::String => match ins.value {
                Value::String(id) => w.write_u32::<LittleEndian>(id)?,
                _ => w.write_u32::<LittleEndian>(0)?,
            },
        },
        _ => {}
    }
    Ok(())
}

/// Encode une liste d'instructions.
pub fn encode(instructions: &[Instruction]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(instructions.len() * 8);
    for ins in instructions {
        write_instruction(&mut out, ins)?;
    }
    Ok(out)
}

/* ─────────────────────────── Décodage ─────────────────────────── */

fn data_type(nibble: u8, address: u32) -> Result<DataType, CodecError> {
    DataType::from_nibble(nibble).ok_or(CodecError::UnknownDataType { address, nibble })
}

fn variable_reference(word: u32, address: u32) -> Result<Reference, CodecError> {
    let byte = (word >> 24) as u8;
    let kind = VariableType::from_u8(byte).ok_or(CodecError::UnknownVariableType { address, byte })?;
    Ok(Reference::Variable { id: word & ID_MASK, kind })
}

fn truncated(address: u32) -> impl FnOnce(io::Error) -> CodecError {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CodecError::Truncated { address }
        } else {
            CodecError::Io(e)
        }
    }
}

fn read_one<R: Read>(r: &mut R, address: u32) -> Result<Instruction, CodecError> {
    let word = r.read_u32::<LittleEndian>().map_err(truncated(address))?;
    let byte = (word >> 24) as u8;
    let opcode = Opcode::from_u8(byte).ok_or(CodecError::UnknownOpcode { address, byte })?;
    let b0 = (word & 0xFF) as u8;
    let b1 = ((word >> 8) & 0xFF) as u8;
    let b2 = ((word >> 16) & 0xFF) as u8;
    let low16 = (word & 0xFFFF) as u16 as i16;

    let mut ins = Instruction::new(opcode);
    ins.address = address;

    match opcode.class() {
        InstructionClass::SingleType | InstructionClass::DoubleType | InstructionClass::Comparison => {
            ins.type1 = data_type(b2 & 0x0F, address)?;
            ins.type2 = data_type(b2 >> 4, address)?;
            ins.extra = b0;
            if opcode == Opcode::Cmp {
                ins.comparison =
                    Some(ComparisonType::from_u8(b1).ok_or(CodecError::UnknownComparison { address, byte: b1 })?);
            } else {
                ins.swap = b1;
            }
        }
        InstructionClass::Branch => {
            if word & EXIT_MAGIC_BIT != 0 {
                ins.exit_magic = true;
            } else {
                let raw = word & JUMP_MASK;
                ins.jump = if raw & JUMP_SIGN != 0 { (raw | !JUMP_MASK) as i32 } else { raw as i32 };
            }
        }
        InstructionClass::Pop => {
            ins.type1 = data_type(b2 & 0x0F, address)?;
            ins.type2 = data_type(b2 >> 4, address)?;
            ins.instance = InstanceType(low16);
            if ins.type1 != DataType::Int16 {
                let r = r.read_u32::<LittleEndian>().map_err(truncated(address))?;
                ins.reference = variable_reference(r, address)?;
            }
        }
        InstructionClass::Push => {
            ins.type1 = data_type(b2 & 0x0F, address)?;
            match ins.type1 {
                DataType::Int16 => ins.value = Value::Int16(low16),
                DataType::Variable => {
                    ins.instance = InstanceType(low16);
                    let r = r.read_u32::<LittleEndian>().map_err(truncated(address))?;
                    ins.reference = variable_reference(r, address)?;
                }
                DataType::Int32 => {
                    let v = r.read_i32::<LittleEndian>().map_err(truncated(address))?;
                    if word & 0xFFFF == FUNCTION_REF_MARK {
                        ins.reference = Reference::Function(v as u32);
                        ins.value = Value::Int32(0);
                    } else {
                        ins.value = Value::Int32(v);
                    }
                }
                DataType::Int64 => {
                    ins.value = Value::Int64(r.read_i64::<LittleEndian>().map_err(truncated(address))?);
                }
                DataType::Double => {
                    ins.value = Value::Double(r.read_f64::<LittleEndian>().map_err(truncated(address))?);
                }
                DataType::Float => {
                    ins.value = Value::Float(r.read_f32::<LittleEndian>().map_err(truncated(address))?);
                }
                DataType::Boolean => {
                    ins.value = Value::Boolean(r.read_i32::<LittleEndian>().map_err(truncated(address))? != 0);
                }
                DataType::String => {
                    ins.value = Value::String(r.read_u32::<LittleEndian>().map_err(truncated(address))?);
                }
            }
        }
        InstructionClass::Call => {
            ins.type1 = data_type(b2 & 0x0F, address)?;
            ins.value = Value::Int16(low16);
            let f = r.read_u32::<LittleEndian>().map_err(truncated(address))?;
            ins.reference = Reference::Function(f);
        }
        InstructionClass::Break => {
            ins.type1 = data_type(b2 & 0x0F, address)?;
            ins.type2 = data_type(b2 >> 4, address)?;
            ins.value = Value::Int16(low16);
        }
    }
    Ok(ins)
}

/// Décode un flux complet ; les adresses sont attribuées depuis 0.
pub fn decode(bytes: &[u8]) -> Result<Vec<Instruction>, CodecError> {
    if bytes.len() % 4 != 0 {
        return Err(CodecError::Misaligned(bytes.len()));
    }
    let mut cursor = Cursor::new(bytes);
    let mut out = Vec::new();
    while (cursor.position() as usize) < bytes.len() {
        let address = u32::try_from(cursor.position()).unwrap_or(u32::MAX);
        out.push(read_one(&mut cursor, address)?);
    }
    Ok(out)
}

/* ─────────────────────────── Tests ─────────────────────────── */
#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::instruction::assign_addresses;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn sample() -> Vec<Instruction> {
        let mut v = Vec::new();

        let mut pushi = Instruction::new(Opcode::PushI);
        pushi.type1 = DataType::Int16;
        pushi.value = Value::Int16(-9);
        v.push(pushi);

        let mut pushv = Instruction::new(Opcode::Push);
        pushv.type1 = DataType::Variable;
        pushv.instance = InstanceType::SELF;
        pushv.reference = Reference::Variable { id: 7, kind: VariableType::StackTop };
        v.push(pushv);

        let mut pushd = Instruction::new(Opcode::Push);
        pushd.type1 = DataType::Double;
        pushd.value = Value::Double(1.5);
        v.push(pushd);

        let mut add = Instruction::new(Opcode::Add);
        add.type1 = DataType::Double;
        add.type2 = DataType::Variable;
        v.push(add);

        let mut cmp = Instruction::new(Opcode::Cmp);
        cmp.type1 = DataType::Int32;
        cmp.type2 = DataType::Variable;
        cmp.comparison = Some(ComparisonType::Gte);
        v.push(cmp);

        let mut bf = Instruction::new(Opcode::Bf);
        bf.jump = -5;
        v.push(bf);

        let mut popenv = Instruction::new(Opcode::PopEnv);
        popenv.exit_magic = true;
        v.push(popenv);

        let mut call = Instruction::new(Opcode::Call);
        call.value = Value::Int16(2);
        call.reference = Reference::Function(3);
        v.push(call);

        let mut func = Instruction::new(Opcode::Push);
        func.type1 = DataType::Int32;
        func.value = Value::Int32(0);
        func.reference = Reference::Function(11);
        v.push(func);

        let mut brk = Instruction::new(Opcode::Break);
        brk.type1 = DataType::Int16;
        brk.value = Value::Int16(-2);
        v.push(brk);

        let mut pop = Instruction::new(Opcode::Pop);
        pop.type1 = DataType::Variable;
        pop.type2 = DataType::Int32;
        pop.instance = InstanceType::GLOBAL;
        pop.reference = Reference::Variable { id: 2, kind: VariableType::Normal };
        v.push(pop);

        assign_addresses(&mut v);
        v
    }

    #[test]
    fn decode_restores_encoded_stream() -> Result<(), CodecError> {
        let original = sample();
        let bytes = encode(&original)?;
        let total: u32 = original.iter().map(Instruction::length).sum();
        assert_eq!(bytes.len() as u32, total);
        assert_eq!(decode(&bytes)?, original);
        Ok(())
    }

    #[test]
    fn header_layout_for_pushi() -> Result<(), CodecError> {
        let mut pushi = Instruction::new(Opcode::PushI);
        pushi.type1 = DataType::Int16;
        pushi.value = Value::Int16(5);
        let bytes = encode(&[pushi])?;
        assert_eq!(bytes, vec![0x05, 0x00, 0x0F, 0x84]);
        Ok(())
    }

    #[test]
    fn popenv_magic_is_written_as_f00000() -> Result<(), CodecError> {
        let mut popenv = Instruction::new(Opcode::PopEnv);
        popenv.exit_magic = true;
        let bytes = encode(&[popenv])?;
        assert_eq!(bytes, vec![0x00, 0x00, 0xF0, 0xBB]);
        Ok(())
    }

    #[test]
    fn truncated_stream_is_reported() {
        let bytes = [0x00, 0x00, 0x02, 0xD9];
        assert!(matches!(decode(&bytes), Err(CodecError::Truncated { address: 0 })));
        assert!(matches!(decode(&[0u8; 3]), Err(CodecError::Misaligned(3))));
    }

    #[test]
    fn unknown_opcode_is_reported() {
        let bytes = [0x00, 0x00, 0x00, 0x01];
        assert!(matches!(decode(&bytes), Err(CodecError::UnknownOpcode { byte: 0x01, .. })));
    }

    proptest! {
        #[test]
        fn branch_offsets_survive(jump in -0x3F_FFFFi32..0x3F_FFFF) {
            let mut b = Instruction::new(Opcode::Bt);
            b.jump = jump;
            let bytes = encode(&[b]).map_err(|e| TestCaseError::fail(e.to_string()))?;
            let back = decode(&bytes).map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(back[0].jump, jump);
        }

        #[test]
        fn int32_immediates_survive(v in any::<i32>()) {
            let mut p = Instruction::new(Opcode::Push);
            p.type1 = DataType::Int32;
            p.value = Value::Int32(v);
            let bytes = encode(&[p.clone()]).map_err(|e| TestCaseError::fail(e.to_string()))?;
            let back = decode(&bytes).map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(&back[0], &p);
        }
    }
}
