//! gmlc-lexer — analyse lexicale GML et résolution des identifiants
//!
//! Faits saillants :
//! - [`lex`] : commentaires `//` et `/* */` (non imbriqués), directives `#macro`,
//!   `#region`/`#endregion`, littéraux couleur `#RRGGBB[AA]`, identifiants et
//!   mots-clés, nombres décimaux/hex (`0x`, `$`), chaînes GMS1/GMS2
//! - les corps de `#macro` sont lexés immédiatement et rangés dans une
//!   [`MacroTable`] partagée par toute la session
//! - [`process_identifiers`] : remplace chaque identifiant brut par une macro
//!   développée, une fonction, une constante (asset ou intégrée) ou une variable
//! - [`LineMap`] pour `(ligne, colonne)` dans les diagnostics
//!
//! Le premier caractère invalide arrête le flux ; les diagnostics non bloquants
//! (chaîne non fermée, échappement invalide, directive inconnue…) sont
//! collectés et le lexer continue.
//!
//! Exemple éclair :
//! ```
//! use gmlc_core::Target;
//! use gmlc_lexer::{lex, MacroTable, TokenKind};
//!
//! let mut macros = MacroTable::new();
//! let out = lex("#macro TWO 2\nx = TWO;", &Target::default(), &mut macros);
//! assert!(out.errors.is_empty());
//! assert_eq!(out.tokens[0].kind, TokenKind::Identifier);
//! assert!(macros.contains("TWO"));
//! ```

#![deny(missing_docs)]

use gmlc_core::Pos;
use thiserror::Error;

/* ─────────────────────────── Modules ─────────────────────────── */

mod lexer;
/// Table des macros de session.
pub mod macros;
/// Résolution des identifiants (macros, fonctions, constantes, variables).
pub mod process;
/// Jetons.
pub mod token;

pub use lexer::{lex, lex_macro_body};
pub use macros::MacroTable;
pub use process::{process_identifiers, ProcessEnv, MAX_MACRO_EXPANSIONS};
pub use token::{
    ConstantToken, ConstantValue, FunctionToken, Token, TokenKind, TokenValue, VariableToken,
};

/// Nombre de copies du dernier jeton ajoutées en fin de flux.
pub const LOOKAHEAD_PADDING: usize = 8;

/* ─────────────────────────── LineMap ─────────────────────────── */

/// Table des lignes pour (byte offset) → (ligne, colonne).
#[derive(Debug, Clone)]
pub struct LineMap {
    /// Offsets des débuts de lignes (contient toujours 0).
    pub line_starts: Vec<u32>,
}

impl LineMap {
    /// Construit la table à partir d'une source.
    #[must_use]
    pub fn new(src: &str) -> Self {
        let mut starts = Vec::with_capacity(64);
        starts.push(0);
        starts.extend(
            src.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| u32::try_from(i + 1).unwrap_or(u32::MAX)),
        );
        Self { line_starts: starts }
    }

    /// Convertit un `Pos` en (ligne, colonne), 1-based.
    #[must_use]
    pub fn line_col(&self, pos: Pos) -> (u32, u32) {
        let idx = match self.line_starts.binary_search(&pos.0) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let start = self.line_starts.get(idx).copied().unwrap_or(0);
        let line = u32::try_from(idx + 1).unwrap_or(u32::MAX);
        (line, pos.0.saturating_sub(start) + 1)
    }
}

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Genre de diagnostic lexical.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexErrorKind {
    /// Caractère qui ne commence aucun jeton.
    #[error("Invalid token")]
    InvalidToken,
    /// Littéral décimal illisible.
    #[error("Invalid number \"{0}\"")]
    InvalidNumber(String),
    /// Littéral hexadécimal illisible.
    #[error("Invalid hex literal \"{0}\"")]
    InvalidHex(String),
    /// Deuxième `#macro` du même nom.
    #[error("Duplicate macro \"{0}\" found")]
    DuplicateMacro(String),
    /// Directive `#…` inconnue.
    #[error("Unrecognized directive \"{0}\"")]
    UnrecognizedDirective(String),
    /// Chaîne sans guillemet fermant.
    #[error("Unenclosed string")]
    UnenclosedString,
    /// Saut de ligne brut dans une chaîne normale.
    #[error("Cannot have raw newlines in normal strings")]
    RawNewline,
    /// `\u` hors de la plage Unicode.
    #[error("\\u value in string not in valid range")]
    UnicodeRange,
    /// `\x` sans deux chiffres hexadécimaux.
    #[error("\\x value in string is missing valid hex characters")]
    HexEscape,
    /// Échappement octal sans trois chiffres.
    #[error("octal escape in string is missing valid octal characters")]
    OctalEscape,
    /// Développement de macro trop profond (macro récursive).
    #[error("macro \"{0}\" expands too deeply")]
    MacroDepth(String),
}

impl LexErrorKind {
    /// Vrai si ce diagnostic produit un jeton d'erreur qui arrête le flux.
    #[must_use]
    pub const fn is_halting(&self) -> bool {
        matches!(self, Self::InvalidToken | Self::InvalidNumber(_) | Self::InvalidHex(_))
    }
}

/// Diagnostic lexical localisé.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at offset {}", .pos.0)]
pub struct LexError {
    /// Offset dans la source.
    pub pos: Pos,
    /// Genre.
    pub kind: LexErrorKind,
}

impl LexError {
    /// Construit un diagnostic.
    #[must_use]
    pub const fn new(pos: Pos, kind: LexErrorKind) -> Self {
        Self { pos, kind }
    }
}

/// Résultat du lexer pour une entrée.
#[derive(Debug, Clone, Default)]
pub struct LexOutput {
    /// Jetons (fin de flux + copies de garde pour le code ordinaire).
    pub tokens: Vec<Token>,
    /// Diagnostics dans l'ordre de rencontre.
    pub errors: Vec<LexError>,
}

impl LexOutput {
    /// Vrai si le flux a été interrompu par un jeton d'erreur.
    #[must_use]
    pub fn halted(&self) -> bool {
        self.errors.last().is_some_and(|e| e.kind.is_halting())
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn linemap_basic() {
        let lm = LineMap::new("a\nbc\n\nd");
        assert_eq!(lm.line_col(Pos(0)), (1, 1));
        assert_eq!(lm.line_col(Pos(2)), (2, 1));
        assert_eq!(lm.line_col(Pos(3)), (2, 2));
        assert_eq!(lm.line_col(Pos(6)), (4, 1));
    }

    #[test]
    fn halting_kinds() {
        assert!(LexErrorKind::InvalidToken.is_halting());
        assert!(LexErrorKind::InvalidHex("g".into()).is_halting());
        assert!(!LexErrorKind::UnenclosedString.is_halting());
        let e = LexError::new(Pos(4), LexErrorKind::InvalidToken);
        assert_eq!(e.to_string(), "Invalid token at offset 4");
    }
}
