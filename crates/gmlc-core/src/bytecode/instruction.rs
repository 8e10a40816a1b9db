#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::kinds::{
    BreakType, ComparisonType, DataType, InstanceType, InstructionClass, Opcode, VariableType,
};

/// Valeur immédiate d'une instruction.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Value {
    /// Pas de valeur.
    #[default]
    None,
    /// Immédiat 16 bits (`pushi`, `push.e`, genre de `break`, argc d'un `call`).
    Int16(i16),
    /// Immédiat 32 bits (ou adresse absolue pour les hooks `try`).
    Int32(i32),
    /// Immédiat 64 bits.
    Int64(i64),
    /// Flottant 32 bits.
    Float(f32),
    /// Flottant 64 bits.
    Double(f64),
    /// Booléen (encodé sur 32 bits).
    Boolean(bool),
    /// Id dans la table des chaînes.
    String(u32),
}

impl Value {
    /// Valeur entière si l'immédiat est entier.
    #[must_use]
    pub const fn as_i64(self) -> Option<i64> {
        match self {
            Self::Int16(v) => Some(v as i64),
            Self::Int32(v) => Some(v as i64),
            Self::Int64(v) => Some(v),
            Self::Boolean(b) => Some(b as i64),
            _ => None,
        }
    }
}

/// Référence résolue vers une table de noms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Reference {
    /// Aucune référence.
    #[default]
    None,
    /// Variable (id dans `NameTables::variables`) + genre d'accès.
    Variable {
        /// Id de la variable.
        id: u32,
        /// Genre d'accès.
        kind: VariableType,
    },
    /// Fonction (id dans `NameTables::functions`).
    Function(u32),
}

/// Instruction de bytecode décodée.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Instruction {
    /// Adresse (offset en octets, multiple de 4).
    pub address: u32,
    /// Opcode.
    pub opcode: Opcode,
    /// Premier type.
    pub type1: DataType,
    /// Second type.
    pub type2: DataType,
    /// Genre de comparaison (`cmp`).
    pub comparison: Option<ComparisonType>,
    /// Octet d'échange d'un `dup` (0 si absent).
    pub swap: u8,
    /// Octet `b0` (compte d'un `dup`, argc d'un `callv`).
    pub extra: u8,
    /// Instance (push/pop de variable).
    pub instance: InstanceType,
    /// Décalage de saut en mots.
    pub jump: i32,
    /// Marqueur « sortie par magie » d'un `popenv`.
    pub exit_magic: bool,
    /// Valeur immédiate.
    pub value: Value,
    /// Référence variable/fonction.
    pub reference: Reference,
}

impl Instruction {
    /// Instruction vide pour `opcode` (types `Int32`, aucune valeur).
    #[must_use]
    pub const fn new(opcode: Opcode) -> Self {
        Self {
            address: 0,
            opcode,
            type1: DataType::Int32,
            type2: DataType::Int32,
            comparison: None,
            swap: 0,
            extra: 0,
            instance: InstanceType::UNDEFINED,
            jump: 0,
            exit_magic: false,
            value: Value::None,
            reference: Reference::None,
        }
    }

    /// Longueur encodée en octets.
    #[must_use]
    pub fn length(&self) -> u32 {
        match self.opcode.class() {
            InstructionClass::Pop => {
                if self.type1 == DataType::Int16 {
                    4
                } else {
                    8
                }
            }
            InstructionClass::Push => match self.type1 {
                DataType::Int16 => 4,
                DataType::Double | DataType::Int64 => 12,
                _ => 8,
            },
            InstructionClass::Call => 8,
            _ => 4,
        }
    }

    /// Adresse visée par un saut.
    #[must_use]
    pub fn target(&self) -> i64 {
        i64::from(self.address) + i64::from(self.jump) * 4
    }

    /// Genre d'un `break`.
    #[must_use]
    pub fn break_type(&self) -> Option<BreakType> {
        match (self.opcode, self.value) {
            (Opcode::Break, Value::Int16(v)) => BreakType::from_i16(v),
            _ => None,
        }
    }

    /// Nombre d'arguments d'un `call` (ou `callv`).
    #[must_use]
    pub fn argc(&self) -> usize {
        match self.opcode {
            Opcode::Call => match self.value {
                Value::Int16(n) => usize::try_from(n).unwrap_or(0),
                _ => 0,
            },
            Opcode::CallV => usize::from(self.extra),
            _ => 0,
        }
    }

    /// Genre d'accès variable si l'instruction référence une variable.
    #[must_use]
    pub const fn variable_type(&self) -> Option<VariableType> {
        match self.reference {
            Reference::Variable { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Id de fonction référencée.
    #[must_use]
    pub const fn function(&self) -> Option<u32> {
        match self.reference {
            Reference::Function(id) => Some(id),
            _ => None,
        }
    }

    /// Vrai pour un `pop` d'échange (`type1 == Int16`, sans référence).
    #[must_use]
    pub fn is_swap_pop(&self) -> bool {
        self.opcode == Opcode::Pop && self.type1 == DataType::Int16
    }
}

/// Recalcule des adresses contiguës à partir de 0 ; renvoie la longueur totale.
pub fn assign_addresses(instructions: &mut [Instruction]) -> u32 {
    let mut addr = 0u32;
    for ins in instructions {
        ins.address = addr;
        addr += ins.length();
    }
    addr
}

/* ─────────────────────────── Tests ─────────────────────────── */
#[cfg(test)]
mod tests {
    use super::*;

    fn push(t: DataType) -> Instruction {
        let mut i = Instruction::new(Opcode::Push);
        i.type1 = t;
        i
    }

    #[test]
    fn lengths_follow_operand_sizes() {
        assert_eq!(push(DataType::Int16).length(), 4);
        assert_eq!(push(DataType::Int32).length(), 8);
        assert_eq!(push(DataType::Variable).length(), 8);
        assert_eq!(push(DataType::Double).length(), 12);
        assert_eq!(push(DataType::Int64).length(), 12);
        assert_eq!(Instruction::new(Opcode::Call).length(), 8);
        assert_eq!(Instruction::new(Opcode::Add).length(), 4);

        let mut swap = Instruction::new(Opcode::Pop);
        swap.type1 = DataType::Int16;
        assert_eq!(swap.length(), 4);
    }

    #[test]
    fn addresses_are_contiguous() {
        let mut v = vec![push(DataType::Double), push(DataType::Int16), Instruction::new(Opcode::Call)];
        let len = assign_addresses(&mut v);
        assert_eq!(v.iter().map(|i| i.address).collect::<Vec<_>>(), vec![0, 12, 16]);
        assert_eq!(len, 24);
    }

    #[test]
    fn branch_target_uses_words() {
        let mut b = Instruction::new(Opcode::B);
        b.address = 40;
        b.jump = -3;
        assert_eq!(b.target(), 28);
    }
}
