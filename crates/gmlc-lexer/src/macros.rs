use indexmap::IndexMap;

use crate::token::Token;

/// Macros `#macro NOM CONTENU` d'une session : nom → jetons du corps.
///
/// Une macro est enregistrée une seule fois ; la table est ensuite lue en
/// parallèle par la résolution des identifiants.
#[derive(Debug, Clone, Default)]
pub struct MacroTable {
    bodies: IndexMap<String, Vec<Token>>,
}

impl MacroTable {
    /// Table vide.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Vrai si `name` est défini.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.bodies.contains_key(name)
    }

    /// Corps lexé de `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[Token]> {
        self.bodies.get(name).map(Vec::as_slice)
    }

    /// Enregistre une macro. Rend `false` (et ne touche à rien) si le nom existe déjà.
    pub fn insert(&mut self, name: impl Into<String>, body: Vec<Token>) -> bool {
        match self.bodies.entry(name.into()) {
            indexmap::map::Entry::Occupied(_) => false,
            indexmap::map::Entry::Vacant(v) => {
                v.insert(body);
                true
            }
        }
    }

    /// Noms dans l'ordre d'enregistrement.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bodies.keys().map(String::as_str)
    }

    /// Nombre de macros.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// Vrai si aucune macro n'est définie.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenKind;
    use gmlc_core::Pos;

    #[test]
    fn duplicate_insert_keeps_first_body() {
        let mut t = MacroTable::new();
        assert!(t.insert("A", vec![Token::new(TokenKind::Plus, Pos(0))]));
        assert!(!t.insert("A", vec![]));
        assert_eq!(t.get("A").map(<[Token]>::len), Some(1));
        assert_eq!(t.names().collect::<Vec<_>>(), vec!["A"]);
    }
}
