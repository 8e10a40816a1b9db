use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/* ─────────────────────────── Opcodes ─────────────────────────── */

/// Opcodes (valeurs encodées du format 15+).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum Opcode {
    /// Conversion `type1 → type2`.
    Conv = 0x07,
    /// Multiplication.
    Mul = 0x08,
    /// Division flottante.
    Div = 0x09,
    /// Division entière (`div`).
    Rem = 0x0A,
    /// Modulo (`mod`, `%`).
    Mod = 0x0B,
    /// Addition.
    Add = 0x0C,
    /// Soustraction.
    Sub = 0x0D,
    /// Et bit à bit / logique.
    And = 0x0E,
    /// Ou bit à bit / logique.
    Or = 0x0F,
    /// Ou exclusif.
    Xor = 0x10,
    /// Négation arithmétique.
    Neg = 0x11,
    /// Négation logique / bit à bit.
    Not = 0x12,
    /// Décalage à gauche.
    Shl = 0x13,
    /// Décalage à droite.
    Shr = 0x14,
    /// Comparaison (genre dans `b1`).
    Cmp = 0x15,
    /// Dépile vers une variable.
    Pop = 0x45,
    /// Duplique le sommet de pile.
    Dup = 0x86,
    /// Retour de fonction avec valeur.
    Ret = 0x9C,
    /// Sortie sans valeur.
    Exit = 0x9D,
    /// Dépile et jette.
    Popz = 0x9E,
    /// Saut inconditionnel.
    B = 0xB6,
    /// Saut si vrai.
    Bt = 0xB7,
    /// Saut si faux.
    Bf = 0xB8,
    /// Entrée dans un environnement `with`.
    PushEnv = 0xBA,
    /// Sortie / itération d'un environnement `with`.
    PopEnv = 0xBB,
    /// Empile une valeur ou une variable.
    Push = 0xC0,
    /// Empile une variable locale.
    PushLoc = 0xC1,
    /// Empile une variable globale.
    PushGlb = 0xC2,
    /// Empile une variable builtin.
    PushBltn = 0xC3,
    /// Empile un entier 16 bits immédiat.
    PushI = 0x84,
    /// Appel de fonction.
    Call = 0xD9,
    /// Appel d'une valeur fonction (méthode).
    CallV = 0x99,
    /// Instruction « break » étendue (opérations tableau, statics…).
    Break = 0xFF,
}

/// Classe d'encodage d'un opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionClass {
    /// Un seul type (`neg`, `not`, `dup`, `ret`, `exit`, `popz`, `callv`).
    SingleType,
    /// Deux types (`conv` et opérateurs binaires).
    DoubleType,
    /// Comparaison (deux types + genre).
    Comparison,
    /// Saut (`b`, `bt`, `bf`, `pushenv`, `popenv`).
    Branch,
    /// `pop`.
    Pop,
    /// `push*`.
    Push,
    /// `call`.
    Call,
    /// `break`.
    Break,
}

impl Opcode {
    /// Tous les opcodes connus, dans l'ordre de déclaration.
    pub const ALL: [Self; 33] = [
        Self::Conv,
        Self::Mul,
        Self::Div,
        Self::Rem,
        Self::Mod,
        Self::Add,
        Self::Sub,
        Self::And,
        Self::Or,
        Self::Xor,
        Self::Neg,
        Self::Not,
        Self::Shl,
        Self::Shr,
        Self::Cmp,
        Self::Pop,
        Self::Dup,
        Self::Ret,
        Self::Exit,
        Self::Popz,
        Self::B,
        Self::Bt,
        Self::Bf,
        Self::PushEnv,
        Self::PopEnv,
        Self::Push,
        Self::PushLoc,
        Self::PushGlb,
        Self::PushBltn,
        Self::PushI,
        Self::Call,
        Self::CallV,
        Self::Break,
    ];

    /// Décode un octet d'opcode.
    #[must_use]
    pub fn from_u8(b: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| *op as u8 == b)
    }

    /// Classe d'encodage.
    #[must_use]
    pub const fn class(self) -> InstructionClass {
        match self {
            Self::Neg | Self::Not | Self::Dup | Self::Ret | Self::Exit | Self::Popz | Self::CallV => {
                InstructionClass::SingleType
            }
            Self::Conv
            | Self::Mul
            | Self::Div
            | Self::Rem
            | Self::Mod
            | Self::Add
            | Self::Sub
            | Self::And
            | Self::Or
            | Self::Xor
            | Self::Shl
            | Self::Shr => InstructionClass::DoubleType,
            Self::Cmp => InstructionClass::Comparison,
            Self::B | Self::Bt | Self::Bf | Self::PushEnv | Self::PopEnv => InstructionClass::Branch,
            Self::Pop => InstructionClass::Pop,
            Self::Push | Self::PushLoc | Self::PushGlb | Self::PushBltn | Self::PushI => {
                InstructionClass::Push
            }
            Self::Call => InstructionClass::Call,
            Self::Break => InstructionClass::Break,
        }
    }

    /// Nom en minuscules (désassemblage).
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Conv => "conv",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Rem => "rem",
            Self::Mod => "mod",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Neg => "neg",
            Self::Not => "not",
            Self::Shl => "shl",
            Self::Shr => "shr",
            Self::Cmp => "cmp",
            Self::Pop => "pop",
            Self::Dup => "dup",
            Self::Ret => "ret",
            Self::Exit => "exit",
            Self::Popz => "popz",
            Self::B => "b",
            Self::Bt => "bt",
            Self::Bf => "bf",
            Self::PushEnv => "pushenv",
            Self::PopEnv => "popenv",
            Self::Push => "push",
            Self::PushLoc => "pushloc",
            Self::PushGlb => "pushglb",
            Self::PushBltn => "pushbltn",
            Self::PushI => "pushi",
            Self::Call => "call",
            Self::CallV => "callv",
            Self::Break => "break",
        }
    }

    /// Vrai pour les opérateurs binaires arithmétiques/bit à bit.
    #[must_use]
    pub const fn is_binary_operator(self) -> bool {
        matches!(
            self,
            Self::Mul
                | Self::Div
                | Self::Rem
                | Self::Mod
                | Self::Add
                | Self::Sub
                | Self::And
                | Self::Or
                | Self::Xor
                | Self::Shl
                | Self::Shr
        )
    }

    /// Vrai pour les opcodes qui empilent une variable (`push.v`, `pushloc`, …).
    #[must_use]
    pub const fn is_variable_push(self) -> bool {
        matches!(self, Self::Push | Self::PushLoc | Self::PushGlb | Self::PushBltn)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/* ─────────────────────────── Types de données ─────────────────────────── */

/// Type de donnée d'un opérande (nibble dans `b2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum DataType {
    /// Flottant 64 bits.
    Double = 0,
    /// Flottant 32 bits.
    Float = 1,
    /// Entier 32 bits.
    Int32 = 2,
    /// Entier 64 bits.
    Int64 = 3,
    /// Booléen.
    Boolean = 4,
    /// Valeur dynamique (variable).
    Variable = 5,
    /// Chaîne (id de la table des chaînes).
    String = 6,
    /// Entier 16 bits immédiat.
    Int16 = 0x0F,
}

impl DataType {
    /// Décode un nibble.
    #[must_use]
    pub const fn from_nibble(n: u8) -> Option<Self> {
        Some(match n {
            0 => Self::Double,
            1 => Self::Float,
            2 => Self::Int32,
            3 => Self::Int64,
            4 => Self::Boolean,
            5 => Self::Variable,
            6 => Self::String,
            0x0F => Self::Int16,
            _ => return None,
        })
    }

    /// Caractère de désassemblage (`d f i l b v s e`).
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Double => 'd',
            Self::Float => 'f',
            Self::Int32 => 'i',
            Self::Int64 => 'l',
            Self::Boolean => 'b',
            Self::Variable => 'v',
            Self::String => 's',
            Self::Int16 => 'e',
        }
    }

    /// Inverse de [`DataType::as_char`].
    #[must_use]
    pub const fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'd' => Self::Double,
            'f' => Self::Float,
            'i' => Self::Int32,
            'l' => Self::Int64,
            'b' => Self::Boolean,
            'v' => Self::Variable,
            's' => Self::String,
            'e' => Self::Int16,
            _ => return None,
        })
    }

    /// Biais utilisé pour choisir le type résultat d'un opérateur binaire.
    #[must_use]
    pub const fn bias(self) -> u8 {
        match self {
            Self::Double | Self::Int64 => 1,
            Self::Variable => 2,
            _ => 0,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/* ─────────────────────────── Comparaisons ─────────────────────────── */

/// Genre de comparaison (`b1` d'un `cmp`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum ComparisonType {
    /// `<`
    Lt = 1,
    /// `<=`
    Lte = 2,
    /// `==`
    Eq = 3,
    /// `!=`
    Neq = 4,
    /// `>=`
    Gte = 5,
    /// `>`
    Gt = 6,
}

impl ComparisonType {
    /// Décode un octet.
    #[must_use]
    pub const fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            1 => Self::Lt,
            2 => Self::Lte,
            3 => Self::Eq,
            4 => Self::Neq,
            5 => Self::Gte,
            6 => Self::Gt,
            _ => return None,
        })
    }

    /// Nom de désassemblage (`LT`, `LTE`, …).
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Lt => "LT",
            Self::Lte => "LTE",
            Self::Eq => "EQ",
            Self::Neq => "NEQ",
            Self::Gte => "GTE",
            Self::Gt => "GT",
        }
    }

    /// Opérateur source.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Gte => ">=",
            Self::Gt => ">",
        }
    }
}

/* ─────────────────────────── Instances ─────────────────────────── */

/// Qualificateur d'instance (i16) : valeurs spéciales négatives, ids d'objet sinon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InstanceType(pub i16);

impl InstanceType {
    /// Non spécifié (coïncide avec l'objet 0).
    pub const UNDEFINED: Self = Self(0);
    /// `self`
    pub const SELF: Self = Self(-1);
    /// `other`
    pub const OTHER: Self = Self(-2);
    /// `all`
    pub const ALL: Self = Self(-3);
    /// `noone`
    pub const NOONE: Self = Self(-4);
    /// `global`
    pub const GLOBAL: Self = Self(-5);
    /// Variable builtin.
    pub const BUILTIN: Self = Self(-6);
    /// Variable locale.
    pub const LOCAL: Self = Self(-7);
    /// Instance prise sur la pile.
    pub const STACK_TOP: Self = Self(-9);
    /// Argument de fonction.
    pub const ARGUMENT: Self = Self(-15);
    /// Variable statique.
    pub const STATIC: Self = Self(-16);

    /// Nom symbolique (minuscules) si la valeur est spéciale.
    #[must_use]
    pub const fn name(self) -> Option<&'static str> {
        Some(match self.0 {
            0 => "undefined",
            -1 => "self",
            -2 => "other",
            -3 => "all",
            -4 => "noone",
            -5 => "global",
            -6 => "builtin",
            -7 => "local",
            -9 => "stacktop",
            -15 => "argument",
            -16 => "static",
            _ => return None,
        })
    }

    /// Vrai pour un id d'objet (`>= 0`).
    #[must_use]
    pub const fn is_object(self) -> bool {
        self.0 >= 0
    }

    /// Portée de rangement dans la table des variables : les ids d'objet,
    /// `other`, `all` et `noone` sont rangés avec `self`.
    #[must_use]
    pub const fn scope(self) -> Self {
        match self.0 {
            -5 | -6 | -7 | -15 | -16 | -1 => self,
            _ => Self::SELF,
        }
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(n) => f.write_str(n),
            None => write!(f, "{}", self.0),
        }
    }
}

/* ─────────────────────────── Genres de variables ─────────────────────────── */

/// Genre d'accès variable (octet haut du mot de référence).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum VariableType {
    /// Accès tableau (instance + index sur la pile).
    Array = 0x00,
    /// Instance prise sur la pile.
    StackTop = 0x80,
    /// Accès simple.
    Normal = 0xA0,
    /// Accès par instance explicite.
    Instance = 0xE0,
    /// Tableau multi-dimensionnel (lecture).
    MultiPush = 0x10,
    /// Tableau multi-dimensionnel (écriture).
    MultiPushPop = 0x90,
}

impl VariableType {
    /// Décode l'octet haut.
    #[must_use]
    pub const fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0x00 => Self::Array,
            0x80 => Self::StackTop,
            0xA0 => Self::Normal,
            0xE0 => Self::Instance,
            0x10 => Self::MultiPush,
            0x90 => Self::MultiPushPop,
            _ => return None,
        })
    }

    /// Nom de désassemblage.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Array => "array",
            Self::StackTop => "stacktop",
            Self::Normal => "normal",
            Self::Instance => "instance",
            Self::MultiPush => "multipush",
            Self::MultiPushPop => "multipushpop",
        }
    }

    /// Nombre de paramètres (instance, index) lus sur la pile, hors marqueur `-9`.
    #[must_use]
    pub const fn stack_params(self) -> usize {
        match self {
            Self::Array | Self::MultiPush | Self::MultiPushPop => 2,
            Self::StackTop => 1,
            Self::Normal | Self::Instance => 0,
        }
    }
}

/* ─────────────────────────── Breaks étendus ─────────────────────────── */

/// Sous-genre d'une instruction `break` (valeur i16).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(i16)]
pub enum BreakType {
    /// Vérification d'index.
    ChkIndex = -1,
    /// Lecture finale d'un tableau multi-dimensionnel.
    PushAf = -2,
    /// Écriture finale d'un tableau multi-dimensionnel.
    PopAf = -3,
    /// Lecture intermédiaire d'un tableau multi-dimensionnel.
    PushAc = -4,
    /// Fixe le propriétaire d'un tableau.
    SetOwner = -5,
    /// Empile « statics déjà initialisées ».
    IsStaticOk = -6,
    /// Marque les statics comme initialisées.
    SetStatic = -7,
    /// Sauve la référence tableau courante.
    SaveARef = -8,
    /// Restaure la référence tableau courante.
    RestoreARef = -9,
    /// Test « nullish ».
    IsNullish = -10,
}

impl BreakType {
    /// Décode une valeur i16.
    #[must_use]
    pub const fn from_i16(v: i16) -> Option<Self> {
        Some(match v {
            -1 => Self::ChkIndex,
            -2 => Self::PushAf,
            -3 => Self::PopAf,
            -4 => Self::PushAc,
            -5 => Self::SetOwner,
            -6 => Self::IsStaticOk,
            -7 => Self::SetStatic,
            -8 => Self::SaveARef,
            -9 => Self::RestoreARef,
            -10 => Self::IsNullish,
            _ => return None,
        })
    }

    /// Nom de désassemblage.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ChkIndex => "chkindex",
            Self::PushAf => "pushaf",
            Self::PopAf => "popaf",
            Self::PushAc => "pushac",
            Self::SetOwner => "setowner",
            Self::IsStaticOk => "isstaticok",
            Self::SetStatic => "setstatic",
            Self::SaveARef => "savearef",
            Self::RestoreARef => "restorearef",
            Self::IsNullish => "isnullish",
        }
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_bytes_roundtrip() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_u8(op as u8), Some(op));
        }
        assert_eq!(Opcode::from_u8(0x00), None);
        assert_eq!(Opcode::Call as u8, 0xD9);
        assert_eq!(Opcode::PushI as u8, 0x84);
    }

    #[test]
    fn classes_match_encoding_groups() {
        assert_eq!(Opcode::Dup.class(), InstructionClass::SingleType);
        assert_eq!(Opcode::Conv.class(), InstructionClass::DoubleType);
        assert_eq!(Opcode::PopEnv.class(), InstructionClass::Branch);
        assert_eq!(Opcode::PushBltn.class(), InstructionClass::Push);
    }

    #[test]
    fn data_type_chars() {
        for c in ['d', 'f', 'i', 'l', 'b', 'v', 's', 'e'] {
            let t = DataType::from_char(c).expect("known char");
            assert_eq!(t.as_char(), c);
            assert_eq!(DataType::from_nibble(t as u8), Some(t));
        }
        assert_eq!(DataType::from_nibble(7), None);
    }

    #[test]
    fn instance_names_and_scope() {
        assert_eq!(InstanceType::GLOBAL.to_string(), "global");
        assert_eq!(InstanceType(12).to_string(), "12");
        assert_eq!(InstanceType(12).scope(), InstanceType::SELF);
        assert_eq!(InstanceType::OTHER.scope(), InstanceType::SELF);
        assert_eq!(InstanceType::LOCAL.scope(), InstanceType::LOCAL);
    }

    #[test]
    fn break_values() {
        assert_eq!(BreakType::from_i16(-4), Some(BreakType::PushAc));
        assert_eq!(BreakType::IsNullish as i16, -10);
        assert_eq!(BreakType::from_i16(3), None);
    }
}
