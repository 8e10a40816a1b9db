//! Bytecode GML (format 15+) : énumérations, instruction, codec binaire.
//!
//! Une instruction commence toujours par un mot u32 little-endian
//! `[b0][b1][b2][opcode]` ; certaines classes sont suivies d'un mot de
//! référence ou d'une valeur immédiate (voir [`codec`]).

/// Énumérations (opcodes, types de données, instances, variables, breaks).
pub mod kinds;
/// Instruction décodée + valeurs/références.
pub mod instruction;
/// Encodage/décodage binaire des listes d'instructions.
pub mod codec;

pub use codec::{decode, encode, CodecError};
pub use instruction::{assign_addresses, Instruction, Reference, Value};
pub use kinds::{
    BreakType, ComparisonType, DataType, InstanceType, InstructionClass, Opcode, VariableType,
};
