//! gmlc-compiler — compilation GML vers bytecode à pile
//!
//! Entrée : un [`gmlc_ast::Program`] (ou des sources brutes via
//! [`CompileSession`]). Sortie : une [`PendingEntry`] par entrée de code,
//! puis un [`gmlc_core::CodeEntry`] une fois les noms résolus.
//!
//! - Deux phases : l'émission ne touche jamais aux [`gmlc_core::NameTables`] ;
//!   les chaînes, variables et fonctions restent symboliques jusqu'à
//!   [`PendingEntry::resolve`]
//! - Une pile de types suit chaque expression : une expression bien formée
//!   laisse exactement une entrée de plus qu'avant
//! - Sauts différés : [`ForwardPatch`] / [`BackwardPatch`], adresses absolues :
//!   [`AddressPatch`]
//! - Les erreurs s'arrêtent à la frontière d'une entrée ([`EntryError`])
//!
//! ```
//! use gmlc_builtins::Builtins;
//! use gmlc_compiler::{compile_program, CompileEnv};
//! use gmlc_core::{NameTables, Target};
//! use indexmap::IndexSet;
//!
//! let target = Target::default();
//! let builtins = Builtins::new(&target);
//! let functions = IndexSet::new();
//! let env = CompileEnv { target: &target, builtins: &builtins, functions: &functions };
//!
//! let tokens = gmlc_compiler::tokenize("x = 1;", &target, &builtins);
//! let program = gmlc_parser::parse(&tokens, &builtins).unwrap();
//! let pending = compile_program(env, "gml_Script_demo", &program).unwrap();
//!
//! let mut tables = NameTables::new();
//! let entry = pending.resolve(&mut tables);
//! assert_eq!(entry.length, 12);
//! assert_eq!(tables.variables.len(), 1);
//! ```

#![deny(missing_docs)]

use gmlc_ast::Program;
use gmlc_builtins::Builtins;
use gmlc_core::{Pos, Target};
use gmlc_lexer::{LexError, Token};
use gmlc_parser::ParseError;
use thiserror::Error;

/* ─────────────────────────── Modules ─────────────────────────── */

mod context;
mod expr;
mod patch;
mod resolve;
/// Pilote de session (plusieurs entrées, macros partagées, parallélisme).
pub mod session;
mod stmt;

pub use context::{CodeContext, CompileEnv, PendingEntry, Symbol};
pub use patch::{AddressPatch, BackwardPatch, ForwardPatch};
pub use session::CompileSession;

pub use gmlc_builtins::internal::RETURN_TEMP;

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Genre d'erreur de compilation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileErrorKind {
    /// Construction reconnue par le parseur mais non compilée.
    #[error("{0} is not supported")]
    Unsupported(&'static str),
    /// Arité d'une fonction intégrée non respectée.
    #[error("Built-in function \"{name}\" expects {expected} arguments; {supplied} supplied")]
    ArityMismatch {
        /// Fonction appelée.
        name: String,
        /// Arité déclarée.
        expected: usize,
        /// Arguments fournis.
        supplied: usize,
    },
    /// Opérande refusé par un opérateur.
    #[error("invalid operand: {0}")]
    InvalidOperand(String),
    /// Fonction inconnue.
    #[error("unresolved name \"{0}\"")]
    UnresolvedName(String),
    /// `break` hors boucle.
    #[error("break used outside of a loop or switch")]
    BreakOutsideLoop,
    /// `continue` hors boucle.
    #[error("continue used outside of a loop")]
    ContinueOutsideLoop,
    /// Pile de types vide au moment d'un dépilement.
    #[error("type stack underflow")]
    TypeStackUnderflow,
    /// Pile de types non vide en fin d'entrée.
    #[error("type stack holds {0} entries at the end of the entry")]
    TypeStackImbalance(usize),
}

/// Erreur de compilation localisée.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at offset {}", .pos.0)]
pub struct CompileError {
    /// Position du nœud fautif.
    pub pos: Pos,
    /// Genre.
    pub kind: CompileErrorKind,
}

impl CompileError {
    /// Construit une erreur.
    #[must_use]
    pub const fn new(pos: Pos, kind: CompileErrorKind) -> Self {
        Self { pos, kind }
    }
}

/// Échec d'une entrée de code, quelle que soit la phase.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EntryError {
    /// Au moins un diagnostic lexical.
    #[error("{entry}: lexing failed with {} error(s)", .errors.len())]
    Lex {
        /// Entrée.
        entry: String,
        /// Diagnostics, dans l'ordre de rencontre.
        errors: Vec<LexError>,
    },
    /// Erreur de syntaxe.
    #[error("{entry}: {source}")]
    Parse {
        /// Entrée.
        entry: String,
        /// Cause.
        source: ParseError,
    },
    /// Erreur de compilation.
    #[error("{entry}: {source}")]
    Compile {
        /// Entrée.
        entry: String,
        /// Cause.
        source: CompileError,
    },
}

impl EntryError {
    /// Nom de l'entrée en échec.
    #[must_use]
    pub fn entry(&self) -> &str {
        match self {
            Self::Lex { entry, .. } | Self::Parse { entry, .. } | Self::Compile { entry, .. } => entry,
        }
    }
}

/// Résultat interne des passes d'émission.
pub(crate) type CResult<T> = Result<T, CompileError>;

/* ─────────────────────────── Entrées publiques ─────────────────────────── */

/// Compile un programme complet en une entrée en attente de résolution.
pub fn compile_program(env: CompileEnv<'_>, name: &str, program: &Program) -> Result<PendingEntry, CompileError> {
    let mut ctx = CodeContext::new(env, name);
    ctx.predeclare(&program.body);
    for stmt in &program.body {
        ctx.stmt(stmt)?;
    }
    ctx.finish()
}

/// Lexe et résout les identifiants d'une source isolée (sans assets ni
/// macros préalables). Les diagnostics lexicaux sont ignorés ; utiliser
/// [`CompileSession`] pour les récupérer.
#[must_use]
pub fn tokenize(src: &str, target: &Target, builtins: &Builtins) -> Vec<Token> {
    let mut macros = gmlc_lexer::MacroTable::new();
    let mut out = gmlc_lexer::lex(src, target, &mut macros);
    let assets = gmlc_core::AssetTable::new();
    let env = gmlc_lexer::ProcessEnv { builtins, macros: &macros, assets: &assets, target };
    let _ = gmlc_lexer::process_identifiers(&mut out.tokens, &env);
    out.tokens
}

/* ─────────────────────────── Tests ─────────────────────────── */
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use gmlc_core::{DataType, GameVersion, Instruction, Opcode, Value};
    use indexmap::IndexSet;

    /// Compile `src` pour `target` et rend l'entrée en attente.
    pub fn compile_with(src: &str, target: Target) -> Result<PendingEntry, CompileError> {
        let builtins = Builtins::new(&target);
        let functions: IndexSet<String> = ["scr_helper".to_owned()].into_iter().collect();
        let env = CompileEnv { target: &target, builtins: &builtins, functions: &functions };
        let tokens = tokenize(src, &target, &builtins);
        let program = gmlc_parser::parse(&tokens, &builtins).map_err(|e| CompileError::new(e.pos, CompileErrorKind::InvalidOperand(e.message)))?;
        compile_program(env, "gml_Script_test", &program)
    }

    pub fn compile(src: &str) -> Result<PendingEntry, CompileError> {
        compile_with(src, Target::default())
    }

    pub fn compile_gms2(src: &str) -> Result<PendingEntry, CompileError> {
        compile_with(src, Target::for_version(GameVersion::Gms2))
    }

    /// Forme textuelle compacte `op.t1[.t2]` de chaque instruction.
    pub fn shape(entry: &PendingEntry) -> Vec<String> {
        entry.instructions.iter().map(shape_of).collect()
    }

    pub fn shape_of(ins: &Instruction) -> String {
        use gmlc_core::InstructionClass as C;
        let op = ins.opcode.name();
        match ins.opcode.class() {
            C::DoubleType | C::Pop => format!("{op}.{}.{}", ins.type1, ins.type2),
            C::Comparison => format!(
                "{op}.{}.{} {}",
                ins.type1,
                ins.type2,
                ins.comparison.map_or("?", gmlc_core::ComparisonType::name)
            ),
            C::Branch => format!("{op} {:+}", ins.jump),
            C::Push if ins.type1 == DataType::Int16 => match ins.value {
                Value::Int16(v) => format!("{op}.e {v}"),
                _ => format!("{op}.e"),
            },
            C::Break => match ins.value {
                Value::Int16(v) => format!("{op}.e {v}"),
                _ => format!("{op}.e"),
            },
            C::Call => format!("{op}.{} {}", ins.type1, ins.argc()),
            C::SingleType if matches!(ins.opcode, Opcode::Dup | Opcode::CallV) => {
                format!("{op}.{} {}", ins.type1, ins.extra)
            }
            _ => format!("{op}.{}", ins.type1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn error_messages_carry_offsets() {
        let e = CompileError::new(Pos(12), CompileErrorKind::Unsupported("null coalescing"));
        assert_eq!(e.to_string(), "null coalescing is not supported at offset 12");
        let e = CompileError::new(
            Pos(0),
            CompileErrorKind::ArityMismatch { name: "abs".into(), expected: 1, supplied: 2 },
        );
        assert_eq!(e.to_string(), "Built-in function \"abs\" expects 1 arguments; 2 supplied at offset 0");
    }

    #[test]
    fn entry_error_names_its_entry() {
        let e = EntryError::Compile {
            entry: "gml_Script_a".into(),
            source: CompileError::new(Pos(3), CompileErrorKind::BreakOutsideLoop),
        };
        assert_eq!(e.entry(), "gml_Script_a");
        assert!(e.to_string().starts_with("gml_Script_a: break used outside"));
    }

    #[test]
    fn empty_program_is_empty_entry() {
        let p = compile("").unwrap();
        assert!(p.instructions.is_empty());
        assert_eq!(p.length, 0);
    }
}
