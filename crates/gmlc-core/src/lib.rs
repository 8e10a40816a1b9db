//! gmlc-core — primitives partagées par le compilateur et le décompilateur GML
//!
//! Fournit :
//! - `Pos`, `Span`, `Spanned<T>` (offsets dans une source GML)
//! - le modèle de bytecode (format 15+) : `Opcode`, `DataType`, `InstanceType`,
//!   `VariableType`, `BreakType`, `Instruction` + codec binaire little-endian
//! - `Target` : drapeaux de version (GMS1, GMS2, GMS2.3, short-circuit, format id)
//! - `NameTables` : tables de chaînes/fonctions/variables/assets référencées par index
//! - `CodeEntry` / `ChildFunction` : une unité de code compilée ou à décompiler
//!
//! Features :
//! - `serde` (par défaut) : (dé)sérialisation des tables, cibles et entrées

#![deny(missing_docs)]

/* ─────────────────────────── Imports ─────────────────────────── */

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/* ─────────────────────────── Modules publics ─────────────────────────── */

/// Modèle de bytecode (énumérations, instruction, codec).
pub mod bytecode;
/// Entrées de code (unité compilée / à décompiler).
pub mod entry;
/// Tables de noms partagées (chaînes, fonctions, variables, assets).
pub mod tables;
/// Cible : version du runtime et drapeaux associés.
pub mod target;

pub use bytecode::{
    BreakType, ComparisonType, DataType, InstanceType, Instruction, InstructionClass, Opcode,
    Reference, Value, VariableType,
};
pub use entry::{ChildFunction, CodeEntry};
pub use tables::{AssetKind, AssetRef, AssetTable, NameTables, TableError, VariableEntry};
pub use target::{GameVersion, Target, TargetFlags};

/* ─────────────────────────── Spans / Positions ─────────────────────────── */

/// Position (offset byte) depuis le début de la source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pos(pub u32);

impl Pos {
    /// Position nulle.
    pub const ZERO: Self = Self(0);

    /// Construit une position depuis un offset `usize` (saturé à `u32::MAX`).
    #[must_use]
    pub fn from_usize(off: usize) -> Self {
        Self(u32::try_from(off).unwrap_or(u32::MAX))
    }

    /// Offset sous forme `usize`.
    #[must_use]
    pub const fn offset(self) -> usize {
        self.0 as usize
    }
}

/// Plage (demi-ouverte) `[start, end)` dans une source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Span {
    /// Début inclus.
    pub start: Pos,
    /// Fin exclue.
    pub end: Pos,
}

impl Span {
    /// Crée un span.
    #[must_use]
    pub const fn new(start: Pos, end: Pos) -> Self {
        Self { start, end }
    }
    /// Longueur en bytes.
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.end.0.saturating_sub(self.start.0)
    }
    /// Vrai si le span est vide.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start.0 >= self.end.0
    }
}

/// Wrapper utilitaire « valeur + span ».
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Spanned<T> {
    /// La valeur.
    pub value: T,
    /// La localisation.
    pub span: Span,
}

impl<T> Spanned<T> {
    /// Construit un `Spanned<T>`.
    pub const fn new(value: T, span: Span) -> Self {
        Self { value, span }
    }
    /// Applique une fonction à la valeur et conserve le span.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned { value: f(self.value), span: self.span }
    }
}

/* ─────────────────────────── Prélude ─────────────────────────── */

/// Prélude pratique pour importer les types clés du crate.
pub mod prelude {
    /// Réexports utiles pour une importation rapide.
    pub use super::{
        BreakType, ChildFunction, CodeEntry, ComparisonType, DataType, GameVersion, InstanceType,
        Instruction, NameTables, Opcode, Pos, Reference, Span, Spanned, Target, Value,
        VariableType,
    };
}

/* ─────────────────────────── Tests ─────────────────────────── */
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_len_and_empty() {
        let s = Span::new(Pos(3), Pos(8));
        assert_eq!(s.len(), 5);
        assert!(!s.is_empty());
        assert!(Span::new(Pos(4), Pos(4)).is_empty());
    }

    #[test]
    fn spanned_map_keeps_span() {
        let sp = Spanned::new(2, Span::new(Pos(1), Pos(2)));
        let mapped = sp.map(|v| v * 10);
        assert_eq!(mapped.value, 20);
        assert_eq!(mapped.span, Span::new(Pos(1), Pos(2)));
    }

    #[test]
    fn pos_from_usize_saturates() {
        assert_eq!(Pos::from_usize(12), Pos(12));
        assert_eq!(Pos::from_usize(usize::MAX), Pos(u32::MAX));
    }
}
