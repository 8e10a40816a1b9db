use core::fmt;

use gmlc_builtins::{BuiltinFunction, BuiltinVariable};
use gmlc_core::Pos;

/// Genre de jeton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Fin de source.
    Eof,
    /// Caractère invalide (arrête le lexer).
    Error,
    /// Identifiant brut, avant résolution.
    Identifier,
    /// Constante (nombre, entier 64 bits, chaîne).
    Constant,
    /// Variable résolue.
    Variable,
    /// Fonction résolue (identifiant suivi de `(`).
    Function,

    /// `{` ou `begin`
    Begin,
    /// `}` ou `end`
    End,
    /// `(`
    Open,
    /// `)`
    Close,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `:`
    Colon,
    /// `;`
    Semicolon,
    /// `[`
    ArrayOpen,
    /// `[|`
    ArrayListOpen,
    /// `[?`
    ArrayMapOpen,
    /// `[#`
    ArrayGridOpen,
    /// `[@`
    ArrayDirectOpen,
    /// `[$`
    ArrayStructOpen,
    /// `]`
    ArrayClose,
    /// `?`
    Conditional,
    /// `??`
    NullCoalesce,

    /// `=` ou `:=`
    Assign,
    /// `+=`
    AssignPlus,
    /// `-=`
    AssignMinus,
    /// `*=`
    AssignTimes,
    /// `/=`
    AssignDivide,
    /// `%=`
    AssignMod,
    /// `&=`
    AssignAnd,
    /// `|=`
    AssignOr,
    /// `^=`
    AssignXor,
    /// `??=`
    AssignNullCoalesce,
    /// `++`
    Increment,
    /// `--`
    Decrement,

    /// `==`
    Equal,
    /// `!=` ou `<>`
    NotEqual,
    /// `<`
    Lesser,
    /// `<=`
    LesserEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterEqual,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Times,
    /// `/`
    Divide,
    /// `div`
    Div,
    /// `%` ou `mod`
    Mod,
    /// `&&` ou `and`
    And,
    /// `||` ou `or`
    Or,
    /// `^^` ou `xor`
    Xor,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `~`
    BitNegate,
    /// `<<`
    BitShiftLeft,
    /// `>>`
    BitShiftRight,
    /// `!` ou `not`
    Not,

    /// `while`
    While,
    /// `with`
    With,
    /// `if`
    If,
    /// `do`
    Do,
    /// `enum`
    Enum,
    /// `var`
    Var,
    /// `globalvar`
    Globalvar,
    /// `return`
    Return,
    /// `default`
    Default,
    /// `for`
    For,
    /// `case`
    Case,
    /// `switch`
    Switch,
    /// `until`
    Until,
    /// `continue`
    Continue,
    /// `break`
    Break,
    /// `else`
    Else,
    /// `repeat`
    Repeat,
    /// `exit`
    Exit,
    /// `then`
    Then,
    /// `function`
    FunctionDecl,
    /// `new`
    New,
    /// `delete`
    Delete,
    /// `throw`
    Throw,
    /// `try`
    Try,
    /// `catch`
    Catch,
    /// `finally`
    Finally,
    /// `static`
    Static,
    /// `constructor`
    Constructor,
}

impl TokenKind {
    /// Mot-clé (ou opérateur alphabétique) correspondant à `s`.
    #[must_use]
    pub fn keyword(s: &str) -> Option<Self> {
        use TokenKind::*;
        Some(match s {
            "and" => And,
            "or" => Or,
            "xor" => Xor,
            "while" => While,
            "with" => With,
            "if" => If,
            "do" => Do,
            "not" => Not,
            "enum" => Enum,
            "begin" => Begin,
            "end" => End,
            "var" => Var,
            "globalvar" => Globalvar,
            "return" => Return,
            "default" => Default,
            "for" => For,
            "case" => Case,
            "switch" => Switch,
            "until" => Until,
            "continue" => Continue,
            "break" => Break,
            "else" => Else,
            "repeat" => Repeat,
            "exit" => Exit,
            "then" => Then,
            "mod" => Mod,
            "div" => Div,
            "function" => FunctionDecl,
            "new" => New,
            "delete" => Delete,
            "throw" => Throw,
            "try" => Try,
            "catch" => Catch,
            "finally" => Finally,
            "static" => Static,
            "constructor" => Constructor,
            _ => return None,
        })
    }

    /// Vrai pour les opérateurs d'affectation (simple ou composée).
    #[must_use]
    pub const fn is_assign(self) -> bool {
        matches!(
            self,
            Self::Assign
                | Self::AssignPlus
                | Self::AssignMinus
                | Self::AssignTimes
                | Self::AssignDivide
                | Self::AssignMod
                | Self::AssignAnd
                | Self::AssignOr
                | Self::AssignXor
                | Self::AssignNullCoalesce
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Valeur d'une constante.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    /// Nombre (double).
    Number(f64),
    /// Entier 64 bits non représentable exactement en double.
    Int64(i64),
    /// Chaîne.
    String(String),
}

/// Constante, éventuellement nommée (asset, constante intégrée).
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantToken {
    /// Valeur.
    pub value: ConstantValue,
    /// Booléen typé (`true`/`false` en 2.3).
    pub is_bool: bool,
    /// Nom d'origine, pour l'affichage.
    pub name: Option<String>,
}

impl ConstantToken {
    /// Constante numérique anonyme.
    #[must_use]
    pub const fn number(v: f64) -> Self {
        Self { value: ConstantValue::Number(v), is_bool: false, name: None }
    }
}

/// Variable résolue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableToken {
    /// Nom.
    pub name: String,
    /// Variable intégrée correspondante.
    pub builtin: Option<BuiltinVariable>,
}

/// Fonction résolue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionToken {
    /// Nom.
    pub name: String,
    /// Fonction intégrée correspondante (sinon fonction utilisateur).
    pub builtin: Option<BuiltinFunction>,
}

/// Charge utile d'un jeton.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TokenValue {
    /// Aucune.
    #[default]
    None,
    /// Texte d'un identifiant brut.
    Identifier(String),
    /// Constante.
    Constant(ConstantToken),
    /// Variable.
    Variable(VariableToken),
    /// Fonction.
    Function(FunctionToken),
}

/// Jeton.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Genre.
    pub kind: TokenKind,
    /// Offset dans la source.
    pub pos: Pos,
    /// Charge utile.
    pub value: TokenValue,
}

impl Token {
    /// Jeton sans charge utile.
    #[must_use]
    pub const fn new(kind: TokenKind, pos: Pos) -> Self {
        Self { kind, pos, value: TokenValue::None }
    }

    /// Jeton constante.
    #[must_use]
    pub const fn constant(c: ConstantToken, pos: Pos) -> Self {
        Self { kind: TokenKind::Constant, pos, value: TokenValue::Constant(c) }
    }

    /// Nom porté (identifiant, variable, fonction ou constante nommée).
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match &self.value {
            TokenValue::Identifier(s) => Some(s),
            TokenValue::Variable(v) => Some(&v.name),
            TokenValue::Function(f) => Some(&f.name),
            TokenValue::Constant(c) => c.name.as_deref(),
            TokenValue::None => None,
        }
    }
}
