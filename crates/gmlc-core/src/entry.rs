#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::bytecode::{codec, CodecError, Instruction};

/// Fonction interne (ou constructeur de struct) logée dans le code du parent.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChildFunction {
    /// Nom de la fonction (`anon_…`, `___struct___…` ou nom déclaré).
    pub name: String,
    /// Adresse de la première instruction du corps.
    pub offset: u32,
    /// Nombre d'arguments.
    pub argument_count: u16,
    /// Nombre de locales.
    pub locals: u16,
    /// Vrai pour un constructeur.
    pub constructor: bool,
}

/// Unité de code : script, événement ou fonction de haut niveau.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CodeEntry {
    /// Nom de l'entrée.
    pub name: String,
    /// Instructions, adresses contiguës depuis 0.
    pub instructions: Vec<Instruction>,
    /// Longueur du code en octets.
    pub length: u32,
    /// Noms des variables locales déclarées.
    pub locals: Vec<String>,
    /// Nombre d'arguments.
    pub argument_count: u16,
    /// Fonctions internes.
    #[cfg_attr(feature = "serde", serde(default))]
    pub children: Vec<ChildFunction>,
}

impl CodeEntry {
    /// Construit une entrée depuis des instructions (adresses recalculées).
    #[must_use]
    pub fn new(name: impl Into<String>, mut instructions: Vec<Instruction>) -> Self {
        let length = crate::bytecode::assign_addresses(&mut instructions);
        Self { name: name.into(), instructions, length, ..Self::default() }
    }

    /// Décode une entrée depuis son code binaire.
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Result<Self, CodecError> {
        let instructions = codec::decode(bytes)?;
        Ok(Self::new(name, instructions))
    }

    /// Code binaire de l'entrée.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(&self.instructions)
    }

    /// Index de l'instruction située à `address`.
    #[must_use]
    pub fn index_of(&self, address: u32) -> Option<usize> {
        self.instructions.binary_search_by_key(&address, |i| i.address).ok()
    }

    /// Fonction interne dont le corps commence à `offset`.
    #[must_use]
    pub fn child_at(&self, offset: u32) -> Option<&ChildFunction> {
        self.children.iter().find(|c| c.offset == offset)
    }
}
