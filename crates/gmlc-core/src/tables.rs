//! Tables de noms partagées entre les entrées de code.
//!
//! Le compilateur n'y écrit qu'en phase de résolution ; le décompilateur
//! ne fait que les lire. Les ids sont les index d'insertion.

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::bytecode::InstanceType;

/// Id absent d'une table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// Id de chaîne inconnu.
    #[error("unknown string id {0}")]
    UnknownString(u32),
    /// Id de fonction inconnu.
    #[error("unknown function id {0}")]
    UnknownFunction(u32),
    /// Id de variable inconnu.
    #[error("unknown variable id {0}")]
    UnknownVariable(u32),
}

/// Variable référencée : nom + portée de rangement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VariableEntry {
    /// Nom.
    pub name: String,
    /// Portée (voir [`InstanceType::scope`]).
    pub scope: InstanceType,
}

/// Catégorie d'asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AssetKind {
    /// Objet.
    Object,
    /// Sprite.
    Sprite,
    /// Son.
    Sound,
    /// Room.
    Room,
    /// Background.
    Background,
    /// Chemin.
    Path,
    /// Script.
    Script,
    /// Police.
    Font,
    /// Timeline.
    Timeline,
    /// Shader.
    Shader,
    /// Séquence.
    Sequence,
    /// Courbe d'animation.
    AnimCurve,
}

/// Référence d'asset (catégorie + id dans sa catégorie).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AssetRef {
    /// Catégorie.
    pub kind: AssetKind,
    /// Id.
    pub id: i32,
}

/// Noms d'assets du projet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct AssetTable {
    by_name: IndexMap<String, AssetRef>,
}

impl AssetTable {
    /// Table vide.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ajoute (ou remplace) un asset.
    pub fn insert(&mut self, name: impl Into<String>, kind: AssetKind, id: i32) {
        self.by_name.insert(name.into(), AssetRef { kind, id });
    }

    /// Recherche par nom.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<AssetRef> {
        self.by_name.get(name).copied()
    }

    /// Recherche inverse par catégorie et id.
    #[must_use]
    pub fn name_of(&self, kind: AssetKind, id: i32) -> Option<&str> {
        self.by_name
            .iter()
            .find(|(_, r)| r.kind == kind && r.id == id)
            .map(|(n, _)| n.as_str())
    }

    /// Nombre d'assets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Vrai si la table est vide.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Tables de noms indexées par id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NameTables {
    /// Chaînes.
    pub strings: IndexSet<String>,
    /// Fonctions.
    pub functions: IndexSet<String>,
    /// Variables `(nom, portée)`.
    pub variables: IndexSet<VariableEntry>,
    /// Assets.
    pub assets: AssetTable,
}

fn id_of(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

impl NameTables {
    /// Tables vides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Id d'une chaîne (ajoutée si absente).
    pub fn intern_string(&mut self, s: &str) -> u32 {
        if let Some(i) = self.strings.get_index_of(s) {
            return id_of(i);
        }
        id_of(self.strings.insert_full(s.to_owned()).0)
    }

    /// Id d'une fonction (ajoutée si absente).
    pub fn intern_function(&mut self, name: &str) -> u32 {
        if let Some(i) = self.functions.get_index_of(name) {
            return id_of(i);
        }
        id_of(self.functions.insert_full(name.to_owned()).0)
    }

    /// Id d'une variable `(nom, portée)` (ajoutée si absente).
    pub fn intern_variable(&mut self, name: &str, scope: InstanceType) -> u32 {
        let entry = VariableEntry { name: name.to_owned(), scope: scope.scope() };
        id_of(self.variables.insert_full(entry).0)
    }

    /// Chaîne d'id `id`.
    pub fn string(&self, id: u32) -> Result<&str, TableError> {
        self.strings
            .get_index(id as usize)
            .map(String::as_str)
            .ok_or(TableError::UnknownString(id))
    }

    /// Fonction d'id `id`.
    pub fn function(&self, id: u32) -> Result<&str, TableError> {
        self.functions
            .get_index(id as usize)
            .map(String::as_str)
            .ok_or(TableError::UnknownFunction(id))
    }

    /// Variable d'id `id`.
    pub fn variable(&self, id: u32) -> Result<&VariableEntry, TableError> {
        self.variables.get_index(id as usize).ok_or(TableError::UnknownVariable(id))
    }

    /// Id d'une fonction déjà connue.
    #[must_use]
    pub fn function_id(&self, name: &str) -> Option<u32> {
        self.functions.get_index_of(name).map(id_of)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn interning_is_stable() {
        let mut t = NameTables::new();
        assert_eq!(t.intern_string("a"), 0);
        assert_eq!(t.intern_string("b"), 1);
        assert_eq!(t.intern_string("a"), 0);
        assert_eq!(t.string(1), Ok("b"));
        assert_eq!(t.string(9), Err(TableError::UnknownString(9)));
    }

    #[test]
    fn variables_are_keyed_by_scope() {
        let mut t = NameTables::new();
        let a = t.intern_variable("x", InstanceType::SELF);
        let b = t.intern_variable("x", InstanceType::LOCAL);
        let c = t.intern_variable("x", InstanceType(4));
        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_eq!(t.variable(b).map(|v| v.scope), Ok(InstanceType::LOCAL));
    }

    #[test]
    fn assets_reverse_lookup() {
        let mut t = AssetTable::new();
        t.insert("obj_player", AssetKind::Object, 3);
        t.insert("spr_player", AssetKind::Sprite, 3);
        assert_eq!(t.name_of(AssetKind::Sprite, 3), Some("spr_player"));
        assert_eq!(t.get("obj_player").map(|r| r.id), Some(3));
        assert_eq!(t.name_of(AssetKind::Room, 3), None);
    }

    #[test]
    fn tables_deserialize_from_json() -> Result<(), serde_json::Error> {
        let t: NameTables = serde_json::from_str(
            r#"{ "functions": ["show_debug_message"], "assets": { "obj_a": { "kind": "object", "id": 0 } } }"#,
        )?;
        assert_eq!(t.function_id("show_debug_message"), Some(0));
        assert_eq!(t.assets.get("obj_a"), Some(AssetRef { kind: AssetKind::Object, id: 0 }));
        Ok(())
    }
}
