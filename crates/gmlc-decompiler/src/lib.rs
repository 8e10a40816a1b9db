//! gmlc-decompiler — bytecode GML vers source
//!
//! Chaîne par entrée de code :
//! 1. [`decode::decode_entry`] : simulation de pile par plages d'instructions,
//!    reconnaissance des formes émises par le compilateur → [`ast::Program`]
//! 2. [`clean::clean`] : réécritures (appels internes, affectations composées,
//!    `for`, `else if`, `var`, `static`)
//! 3. [`macros::resolve`] (facultatif) : littéraux réécrits en constantes
//! 4. [`write::write_program`] : texte GML
//!
//! [`disasm::disassemble`] produit en parallèle le listing texte, blocs numérotés.
//!
//! ```
//! use gmlc_compiler::CompileSession;
//! use gmlc_core::{NameTables, Target};
//! use gmlc_decompiler::{decompile_entry, DecompileEnv};
//!
//! let target = Target::default();
//! let mut session = CompileSession::new(target);
//! let mut tables = NameTables::new();
//! let sources = vec![("gml_Script_demo".to_owned(), "var a = 1; b = a + 2;".to_owned())];
//! let entry = session.compile_sources(&sources, &mut tables).remove(0).unwrap();
//!
//! let env = DecompileEnv { target: &target, tables: &tables, macros: None };
//! assert_eq!(decompile_entry(&entry, &env).unwrap(), "var a = 1;\nb = a + 2;\n");
//! ```

#![deny(missing_docs)]

use gmlc_core::{CodeEntry, NameTables, TableError, Target};
use log::{debug, warn};
use rayon::prelude::*;
use thiserror::Error;

/* ─────────────────────────── Modules ─────────────────────────── */

/// Arbre reconstruit.
pub mod ast;
/// Réécritures.
pub mod clean;
/// Reconstruction structurée.
pub mod decode;
/// Listing et blocs.
pub mod disasm;
/// Résolution des macros.
pub mod macros;
/// Profondeurs de pile.
pub mod stack;
/// Écriture du source.
pub mod write;

pub use disasm::disassemble;
pub use macros::{MacroType, MacroTypes};

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Échec de décompilation d'une entrée.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecompileError {
    /// Forme d'instructions non reconnue.
    #[error("unrecognized structure at {address}: {message}")]
    Structure {
        /// Adresse de l'instruction fautive.
        address: u32,
        /// Détail.
        message: String,
    },
    /// Dépilement sur une pile vide.
    #[error("stack underflow at {address}")]
    StackUnderflow {
        /// Adresse de l'instruction fautive.
        address: u32,
    },
    /// Ternaire dont une branche ne laisse pas une seule valeur.
    #[error("malformed conditional expression at {address}")]
    TernaryShape {
        /// Adresse du `bf` du ternaire.
        address: u32,
    },
    /// Id hors des tables de noms.
    #[error(transparent)]
    Table(#[from] TableError),
}

/* ─────────────────────────── Entrées publiques ─────────────────────────── */

/// Contexte partagé par les entrées d'un même jeu.
#[derive(Debug, Clone, Copy)]
pub struct DecompileEnv<'a> {
    /// Cible (format des chaînes, tableaux, heuristiques).
    pub target: &'a Target,
    /// Tables de noms et d'assets.
    pub tables: &'a NameTables,
    /// Règles de macros ; `None` laisse les littéraux tels quels.
    pub macros: Option<&'a MacroTypes>,
}

/// Source GML de `entry`.
pub fn decompile_entry(entry: &CodeEntry, env: &DecompileEnv<'_>) -> Result<String, DecompileError> {
    let mut program = decode::decode_entry(entry, env.tables)?;
    clean::clean(&mut program, env.target, entry);
    if let Some(types) = env.macros {
        macros::resolve(&mut program, types, &entry.name, &env.tables.assets);
    }
    Ok(write::write_program(&program, env.target, &env.tables.assets))
}

/// Décompile `entries` en parallèle ; un résultat par entrée, dans l'ordre.
pub fn decompile_entries(entries: &[CodeEntry], env: &DecompileEnv<'_>) -> Vec<Result<String, DecompileError>> {
    debug!("decompiling {} entries for {:?}", entries.len(), env.target.version);
    entries
        .par_iter()
        .map(|entry| {
            let out = decompile_entry(entry, env);
            if let Err(e) = &out {
                warn!("{}: {e}", entry.name);
            }
            out
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use gmlc_compiler::CompileSession;
    use gmlc_core::{CodeEntry, NameTables, Target};

    /// Nom d'entrée des tests.
    pub const ENTRY: &str = "gml_Object_obj_test_Create_0";

    /// Compile `src` pour `target` en une entrée résolue.
    pub fn compile_for(target: Target, src: &str) -> (CodeEntry, NameTables) {
        let mut session = CompileSession::new(target);
        let mut tables = NameTables::new();
        let sources = vec![(ENTRY.to_owned(), src.to_owned())];
        match session.compile_sources(&sources, &mut tables).pop() {
            Some(Ok(entry)) => (entry, tables),
            Some(Err(e)) => panic!("{e:?}"),
            None => panic!("no entry compiled"),
        }
    }

    pub fn compile(src: &str) -> (CodeEntry, NameTables) {
        compile_for(Target::default(), src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::compile;
    use gmlc_core::{AssetKind, Instruction, Opcode};
    use pretty_assertions::assert_eq;

    #[test]
    fn entry_text() {
        let (entry, tables) = compile("with (other) { x += 1; }");
        let target = Target::default();
        let env = DecompileEnv { target: &target, tables: &tables, macros: None };
        assert_eq!(decompile_entry(&entry, &env).unwrap(), "with (other)\n{\n    x += 1;\n}\n");
    }

    #[test]
    fn macros_are_optional() {
        let (entry, mut tables) = compile("a = instance_exists(2);");
        tables.assets.insert("obj_wall", AssetKind::Object, 2);
        let target = Target::default();
        let types = MacroTypes::new();
        let plain = DecompileEnv { target: &target, tables: &tables, macros: None };
        let typed = DecompileEnv { macros: Some(&types), ..plain };
        assert_eq!(decompile_entry(&entry, &plain).unwrap(), "a = instance_exists(2);\n");
        assert_eq!(decompile_entry(&entry, &typed).unwrap(), "a = instance_exists(obj_wall);\n");
    }

    #[test]
    fn failures_stay_with_their_entry() {
        let (good, tables) = compile("a = 1;");
        let mut bad = Instruction::new(Opcode::Ret);
        bad.type1 = gmlc_core::DataType::Variable;
        let bad = CodeEntry::new("gml_Script_bad", vec![bad]);
        let target = Target::default();
        let env = DecompileEnv { target: &target, tables: &tables, macros: None };
        let out = decompile_entries(&[good, bad], &env);
        assert_eq!(out[0].as_deref(), Ok("a = 1;\n"));
        assert!(matches!(out[1], Err(DecompileError::StackUnderflow { .. })));
    }
}
