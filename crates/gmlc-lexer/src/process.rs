//! Deuxième passe : chaque [`TokenKind::Identifier`] devient macro développée,
//! fonction, constante ou variable. L'ordre des essais est fixe : une macro
//! masque une fonction, qui masque un asset, qui masque une constante.

use gmlc_builtins::Builtins;
use gmlc_core::{AssetTable, Target};
use log::warn;

use crate::macros::MacroTable;
use crate::token::{ConstantToken, ConstantValue, FunctionToken, Token, TokenKind, TokenValue, VariableToken};
use crate::{LexError, LexErrorKind};

/// Nombre maximal de développements de macros pour une entrée.
pub const MAX_MACRO_EXPANSIONS: usize = 4096;

/// Environnement figé de la résolution (partagé entre entrées).
#[derive(Debug, Clone, Copy)]
pub struct ProcessEnv<'a> {
    /// Noms intégrés.
    pub builtins: &'a Builtins,
    /// Macros de la session.
    pub macros: &'a MacroTable,
    /// Noms d'assets.
    pub assets: &'a AssetTable,
    /// Cible.
    pub target: &'a Target,
}

/// Résout les identifiants de `tokens` en place.
///
/// Rend les diagnostics produits (développement de macro trop profond) ; la
/// résolution s'arrête au premier.
pub fn process_identifiers(tokens: &mut Vec<Token>, env: &ProcessEnv<'_>) -> Vec<LexError> {
    let mut expansions = 0usize;
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i].kind != TokenKind::Identifier {
            i += 1;
            continue;
        }
        let TokenValue::Identifier(name) = std::mem::take(&mut tokens[i].value) else {
            i += 1;
            continue;
        };
        let pos = tokens[i].pos;

        if let Some(body) = env.macros.get(&name) {
            expansions += 1;
            if expansions > MAX_MACRO_EXPANSIONS {
                warn!("macro \"{name}\" exceeded the expansion limit");
                tokens[i].value = TokenValue::Identifier(name.clone());
                return vec![LexError::new(pos, LexErrorKind::MacroDepth(name))];
            }
            let spliced = body.iter().cloned().map(|mut t| {
                t.pos = pos;
                t
            });
            tokens.splice(i..=i, spliced);
            continue;
        }

        let followed_by_open = tokens.get(i + 1).is_some_and(|t| t.kind == TokenKind::Open);
        tokens[i] = if followed_by_open {
            let builtin = env.builtins.function(&name).cloned();
            Token { kind: TokenKind::Function, pos, value: TokenValue::Function(FunctionToken { name, builtin }) }
        } else if let Some(asset) = env.assets.get(&name) {
            let c = ConstantToken { value: ConstantValue::Number(f64::from(asset.id)), is_bool: false, name: Some(name) };
            Token::constant(c, pos)
        } else if let Some(value) = env.builtins.constant(&name) {
            let is_bool = env.target.is_gms2_3() && (name == "true" || name == "false");
            Token::constant(ConstantToken { value: ConstantValue::Number(value), is_bool, name: Some(name) }, pos)
        } else {
            let builtin = env.builtins.variable(&name).cloned();
            Token { kind: TokenKind::Variable, pos, value: TokenValue::Variable(VariableToken { name, builtin }) }
        };
        i += 1;
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lex;
    use gmlc_core::{AssetKind, GameVersion, Pos};
    use pretty_assertions::assert_eq;

    struct Fixture {
        builtins: Builtins,
        macros: MacroTable,
        assets: AssetTable,
        target: Target,
    }

    impl Fixture {
        fn new(target: Target) -> Self {
            let mut assets = AssetTable::new();
            assets.insert("obj_player", AssetKind::Object, 4);
            Self { builtins: Builtins::new(&target), macros: MacroTable::new(), assets, target }
        }

        fn run(&mut self, src: &str) -> (Vec<Token>, Vec<LexError>) {
            let mut out = lex(src, &self.target, &mut self.macros);
            let env = ProcessEnv { builtins: &self.builtins, macros: &self.macros, assets: &self.assets, target: &self.target };
            let errors = process_identifiers(&mut out.tokens, &env);
            (out.tokens, errors)
        }
    }

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).take_while(|k| *k != TokenKind::Eof).collect()
    }

    #[test]
    fn macro_is_spliced_at_use_site() {
        let mut fx = Fixture::new(Target::default());
        let (tokens, errors) = fx.run("#macro FOO 1+2\nFOO;");
        assert!(errors.is_empty());
        assert_eq!(kinds(&tokens), vec![TokenKind::Constant, TokenKind::Plus, TokenKind::Constant, TokenKind::Semicolon]);
        assert!(tokens[..3].iter().all(|t| t.pos == Pos(15)));
    }

    #[test]
    fn nested_macros_are_rescanned() {
        let mut fx = Fixture::new(Target::default());
        let (tokens, _) = fx.run("#macro A B * 2\n#macro B x\nA");
        assert_eq!(kinds(&tokens), vec![TokenKind::Variable, TokenKind::Times, TokenKind::Constant]);
        assert_eq!(tokens[0].name(), Some("x"));
    }

    #[test]
    fn empty_macro_disappears() {
        let mut fx = Fixture::new(Target::default());
        let (tokens, _) = fx.run("#macro NOTHING \nNOTHING x");
        assert_eq!(kinds(&tokens), vec![TokenKind::Variable]);
    }

    #[test]
    fn recursive_macro_is_bounded() {
        let mut fx = Fixture::new(Target::default());
        let (_, errors) = fx.run("#macro LOOP LOOP\nLOOP");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, LexErrorKind::MacroDepth("LOOP".into()));
    }

    #[test]
    fn resolution_order() {
        let mut fx = Fixture::new(Target::default());
        let (tokens, _) = fx.run("show_debug_message(obj_player, c_red, true, x, room, my_var, my_fn())");
        let t = &tokens;
        assert!(matches!(&t[0].value, TokenValue::Function(f) if f.builtin.is_some()));
        assert!(matches!(&t[2].value, TokenValue::Constant(c) if c.value == ConstantValue::Number(4.0) && c.name.as_deref() == Some("obj_player")));
        assert!(matches!(&t[4].value, TokenValue::Constant(c) if c.value == ConstantValue::Number(255.0) && !c.is_bool));
        assert!(matches!(&t[6].value, TokenValue::Constant(c) if c.is_bool));
        assert!(matches!(&t[8].value, TokenValue::Variable(v) if v.builtin.as_ref().is_some_and(|b| !b.is_global)));
        assert!(matches!(&t[10].value, TokenValue::Variable(v) if v.builtin.as_ref().is_some_and(|b| b.is_global)));
        assert!(matches!(&t[12].value, TokenValue::Variable(v) if v.builtin.is_none()));
        assert!(matches!(&t[14].value, TokenValue::Function(f) if f.builtin.is_none() && f.name == "my_fn"));
    }

    #[test]
    fn booleans_are_untyped_before_2_3() {
        let mut fx = Fixture::new(Target::for_version(GameVersion::Gms2));
        let (tokens, _) = fx.run("true");
        assert!(matches!(&tokens[0].value, TokenValue::Constant(c) if !c.is_bool));
    }
}
