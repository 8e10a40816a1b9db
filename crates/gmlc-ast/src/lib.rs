//! gmlc-ast — arbre syntaxique GML
//!
//! Représente une entrée de code après analyse syntaxique, avant émission de
//! bytecode. Les identifiants sont déjà résolus par le lexer (variables
//! intégrées, fonctions intégrées) ; la portée finale d'une variable (locale,
//! argument, static…) n'est décidée qu'à la compilation.
//!
//! - Chaque nœud porte la [`Pos`] de son premier jeton
//! - Les chaînes d'un même opérateur binaire sont aplaties (`a + b + c` est un
//!   seul [`Expr::Binary`] à trois opérandes) ; les parenthèses coupent la chaîne
//! - Les énumérations sont repliées en constantes par le parseur
//!
//! # Exemple
//! ```rust
//! use gmlc_ast::{Expr, Literal};
//! use gmlc_core::Pos;
//!
//! let one = Expr::Literal { value: Literal::Number(1.0), pos: Pos(0) };
//! assert_eq!(one.pos(), Pos(0));
//! ```

#![deny(missing_docs)]

use gmlc_builtins::{BuiltinFunction, BuiltinVariable};
use gmlc_core::{InstanceType, Pos};

/* ─────────────────────────── Programme ─────────────────────────── */

/// Une entrée de code complète.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    /// Instructions de premier niveau.
    pub body: Vec<Stmt>,
}

/// Bloc `{ … }`.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Instructions.
    pub stmts: Vec<Stmt>,
    /// Position de l'accolade ouvrante.
    pub pos: Pos,
}

/* ─────────────────────────── Instructions ─────────────────────────── */

/// Opérateur d'affectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignOp {
    /// `=`
    Assign,
    /// `+=`
    Add,
    /// `-=`
    Sub,
    /// `*=`
    Mul,
    /// `/=`
    Div,
    /// `%=`
    Mod,
    /// `&=`
    BitAnd,
    /// `|=`
    BitOr,
    /// `^=`
    BitXor,
    /// `??=`
    NullCoalesce,
}

impl AssignOp {
    /// Opérateur binaire sous-jacent d'une affectation composée.
    #[must_use]
    pub const fn binary(self) -> Option<BinaryOp> {
        Some(match self {
            Self::Add => BinaryOp::Add,
            Self::Sub => BinaryOp::Sub,
            Self::Mul => BinaryOp::Mul,
            Self::Div => BinaryOp::Div,
            Self::Mod => BinaryOp::Mod,
            Self::BitAnd => BinaryOp::BitAnd,
            Self::BitOr => BinaryOp::BitOr,
            Self::BitXor => BinaryOp::BitXor,
            Self::Assign | Self::NullCoalesce => return None,
        })
    }
}

/// Déclaration `var`/`static` : nom et valeur initiale éventuelle.
#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    /// Nom déclaré.
    pub name: String,
    /// Valeur initiale.
    pub value: Option<Expr>,
    /// Position du nom.
    pub pos: Pos,
}

/// Bras de `switch`.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchArm {
    /// Valeur du `case`, `None` pour `default`.
    pub label: Option<Expr>,
    /// Instructions jusqu'au bras suivant.
    pub body: Vec<Stmt>,
    /// Position du mot-clé.
    pub pos: Pos,
}

/// Une instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Expression évaluée pour ses effets (appel, `new`, …).
    Expr {
        /// Expression.
        expr: Expr,
        /// Position.
        pos: Pos,
    },
    /// Affectation simple ou composée.
    Assign {
        /// Cible (variable, indexée ou chaînée).
        target: Expr,
        /// Opérateur.
        op: AssignOp,
        /// Valeur.
        value: Expr,
        /// Position.
        pos: Pos,
    },
    /// `x++`, `++x`, `x--`, `--x` en position d'instruction.
    IncDec {
        /// Cible.
        target: Expr,
        /// `++` (sinon `--`).
        increment: bool,
        /// Forme préfixe.
        prefix: bool,
        /// Position.
        pos: Pos,
    },
    /// `var a = 1, b;`
    Var {
        /// Déclarations.
        decls: Vec<Declarator>,
        /// Position.
        pos: Pos,
    },
    /// `globalvar a, b;`
    GlobalVar {
        /// Noms.
        names: Vec<String>,
        /// Position.
        pos: Pos,
    },
    /// `static a = v;`
    Static {
        /// Déclarations.
        decls: Vec<Declarator>,
        /// Position.
        pos: Pos,
    },
    /// Bloc.
    Block(Block),
    /// `if … [then] … [else …]`
    If {
        /// Condition.
        cond: Expr,
        /// Branche vraie.
        then: Box<Stmt>,
        /// Branche fausse.
        otherwise: Option<Box<Stmt>>,
        /// Position.
        pos: Pos,
    },
    /// `while (c) body`
    While {
        /// Condition.
        cond: Expr,
        /// Corps.
        body: Box<Stmt>,
        /// Position.
        pos: Pos,
    },
    /// `for (init; cond; step) body`
    For {
        /// Initialisation.
        init: Option<Box<Stmt>>,
        /// Condition (absente = vraie).
        cond: Option<Expr>,
        /// Incrément.
        step: Option<Box<Stmt>>,
        /// Corps.
        body: Box<Stmt>,
        /// Position.
        pos: Pos,
    },
    /// `do body until (c)`
    DoUntil {
        /// Corps.
        body: Box<Stmt>,
        /// Condition de sortie.
        cond: Expr,
        /// Position.
        pos: Pos,
    },
    /// `repeat (n) body`
    Repeat {
        /// Nombre d'itérations.
        count: Expr,
        /// Corps.
        body: Box<Stmt>,
        /// Position.
        pos: Pos,
    },
    /// `with (t) body`
    With {
        /// Instance(s) cible(s).
        target: Expr,
        /// Corps.
        body: Box<Stmt>,
        /// Position.
        pos: Pos,
    },
    /// `switch (v) { case …: … default: … }`
    Switch {
        /// Valeur testée.
        value: Expr,
        /// Bras, dans l'ordre du source.
        arms: Vec<SwitchArm>,
        /// Position.
        pos: Pos,
    },
    /// `break`
    Break(Pos),
    /// `continue`
    Continue(Pos),
    /// `exit`
    Exit(Pos),
    /// `return [x]`
    Return {
        /// Valeur.
        value: Option<Expr>,
        /// Position.
        pos: Pos,
    },
    /// `throw x`
    Throw {
        /// Valeur levée.
        value: Expr,
        /// Position.
        pos: Pos,
    },
    /// `try … catch (e) … finally …`
    Try {
        /// Corps protégé.
        body: Block,
        /// Variable et bloc `catch`.
        catch: Option<(String, Block)>,
        /// Bloc `finally`.
        finally: Option<Block>,
        /// Position.
        pos: Pos,
    },
    /// `function name(params) [constructor] { … }`
    Function(FunctionDecl),
    /// `enum E { A, B = 4 }` (déjà replié dans les expressions)
    Enum {
        /// Nom.
        name: String,
        /// Membres et valeurs.
        members: Vec<(String, i64)>,
        /// Position.
        pos: Pos,
    },
    /// `delete x`
    Delete {
        /// Cible.
        target: Expr,
        /// Position.
        pos: Pos,
    },
    /// `;` seul.
    Empty(Pos),
}

impl Stmt {
    /// Position du premier jeton.
    #[must_use]
    pub const fn pos(&self) -> Pos {
        match self {
            Self::Expr { pos, .. }
            | Self::Assign { pos, .. }
            | Self::IncDec { pos, .. }
            | Self::Var { pos, .. }
            | Self::GlobalVar { pos, .. }
            | Self::Static { pos, .. }
            | Self::If { pos, .. }
            | Self::While { pos, .. }
            | Self::For { pos, .. }
            | Self::DoUntil { pos, .. }
            | Self::Repeat { pos, .. }
            | Self::With { pos, .. }
            | Self::Switch { pos, .. }
            | Self::Return { pos, .. }
            | Self::Throw { pos, .. }
            | Self::Try { pos, .. }
            | Self::Enum { pos, .. }
            | Self::Delete { pos, .. } => *pos,
            Self::Block(b) => b.pos,
            Self::Function(f) => f.pos,
            Self::Break(pos) | Self::Continue(pos) | Self::Exit(pos) | Self::Empty(pos) => *pos,
        }
    }
}

/* ─────────────────────────── Fonctions ─────────────────────────── */

/// Paramètre de fonction.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Nom.
    pub name: String,
    /// Valeur par défaut.
    pub default: Option<Expr>,
    /// Position.
    pub pos: Pos,
}

/// Déclaration de fonction (instruction ou expression).
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    /// Nom (`None` pour une fonction anonyme).
    pub name: Option<String>,
    /// Paramètres.
    pub params: Vec<Param>,
    /// Marquée `constructor`.
    pub constructor: bool,
    /// Appel du constructeur parent (`: Parent(args)`).
    pub inherits: Option<Call>,
    /// Corps.
    pub body: Block,
    /// Position du mot-clé `function`.
    pub pos: Pos,
}

/// Appel d'une fonction nommée.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Nom appelé.
    pub name: String,
    /// Fonction intégrée correspondante.
    pub builtin: Option<BuiltinFunction>,
    /// Arguments, dans l'ordre du source.
    pub args: Vec<Expr>,
    /// Position du nom.
    pub pos: Pos,
}

/* ─────────────────────────── Expressions ─────────────────────────── */

/// Littéral.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Nombre (double).
    Number(f64),
    /// Entier 64 bits non exact en double.
    Int64(i64),
    /// Chaîne.
    String(String),
    /// Booléen typé (GMS2.3).
    Bool(bool),
}

/// Référence de variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Nom.
    pub name: String,
    /// Variable intégrée correspondante.
    pub builtin: Option<BuiltinVariable>,
    /// Qualificateur explicite (`global.x`, `other.x`, `obj.x`…).
    pub instance: Option<InstanceType>,
    /// Indices de tableau (`a[i]`, `a[i, j]`, `a[i][j]`).
    pub indices: Vec<Expr>,
    /// Position.
    pub pos: Pos,
}

impl Variable {
    /// Variable simple sans qualificateur.
    #[must_use]
    pub fn named(name: impl Into<String>, pos: Pos) -> Self {
        Self { name: name.into(), builtin: None, instance: None, indices: Vec::new(), pos }
    }
}

/// Opérateur binaire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `div`
    IntDiv,
    /// `%` / `mod`
    Mod,
    /// `&&` / `and`
    And,
    /// `||` / `or`
    Or,
    /// `^^` / `xor`
    Xor,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `==`
    Eq,
    /// `!=`
    Neq,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
}

impl BinaryOp {
    /// Vrai pour les comparaisons.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(self, Self::Eq | Self::Neq | Self::Lt | Self::Lte | Self::Gt | Self::Gte)
    }

    /// Vrai pour `and`/`or`/`xor`.
    #[must_use]
    pub const fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or | Self::Xor)
    }

    /// Orthographe source.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::IntDiv => "div",
            Self::Mod => "%",
            Self::And => "&&",
            Self::Or => "||",
            Self::Xor => "^^",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }
}

/// Opérateur unaire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `!` / `not`
    Not,
    /// `-`
    Neg,
    /// `~`
    BitNot,
}

/// Une expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Littéral.
    Literal {
        /// Valeur.
        value: Literal,
        /// Position.
        pos: Pos,
    },
    /// Variable (éventuellement indexée ou qualifiée).
    Variable(Variable),
    /// Accès chaîné `left.right` (`right` est une variable ou un appel).
    Chain {
        /// Côté gauche (instance).
        left: Box<Expr>,
        /// Membre.
        right: Box<Expr>,
        /// Position.
        pos: Pos,
    },
    /// Appel.
    Call(Call),
    /// Chaîne d'un même opérateur (n ≥ 2 opérandes).
    Binary {
        /// Opérateur.
        op: BinaryOp,
        /// Opérandes, de gauche à droite.
        operands: Vec<Expr>,
        /// Position.
        pos: Pos,
    },
    /// Opération unaire.
    Unary {
        /// Opérateur.
        op: UnaryOp,
        /// Opérande.
        operand: Box<Expr>,
        /// Position.
        pos: Pos,
    },
    /// `++x` / `--x` en position d'expression.
    Prefix {
        /// Cible.
        target: Box<Expr>,
        /// `++` (sinon `--`).
        increment: bool,
        /// Position.
        pos: Pos,
    },
    /// `x++` / `x--` en position d'expression.
    Postfix {
        /// Cible.
        target: Box<Expr>,
        /// `++` (sinon `--`).
        increment: bool,
        /// Position.
        pos: Pos,
    },
    /// `c ? a : b`
    Conditional {
        /// Condition.
        cond: Box<Expr>,
        /// Valeur si vrai.
        then: Box<Expr>,
        /// Valeur si faux.
        otherwise: Box<Expr>,
        /// Position.
        pos: Pos,
    },
    /// `a ?? b`
    NullCoalesce {
        /// Valeur testée.
        left: Box<Expr>,
        /// Valeur de repli.
        right: Box<Expr>,
        /// Position.
        pos: Pos,
    },
    /// `[a, b]`
    Array {
        /// Éléments.
        elements: Vec<Expr>,
        /// Position.
        pos: Pos,
    },
    /// `{ k: v, … }`
    Struct {
        /// Champs, dans l'ordre du source.
        fields: Vec<(String, Expr)>,
        /// Position.
        pos: Pos,
    },
    /// `function (…) { … }` en position d'expression.
    Function(Box<FunctionDecl>),
    /// `new F(args)`
    New(Call),
}

impl Expr {
    /// Position du premier jeton.
    #[must_use]
    pub const fn pos(&self) -> Pos {
        match self {
            Self::Literal { pos, .. }
            | Self::Chain { pos, .. }
            | Self::Binary { pos, .. }
            | Self::Unary { pos, .. }
            | Self::Prefix { pos, .. }
            | Self::Postfix { pos, .. }
            | Self::Conditional { pos, .. }
            | Self::NullCoalesce { pos, .. }
            | Self::Array { pos, .. }
            | Self::Struct { pos, .. } => *pos,
            Self::Variable(v) => v.pos,
            Self::Call(c) | Self::New(c) => c.pos,
            Self::Function(f) => f.pos,
        }
    }

    /// Nombre littéral.
    #[must_use]
    pub const fn number(value: f64, pos: Pos) -> Self {
        Self::Literal { value: Literal::Number(value), pos }
    }

    /// Vrai pour une variable sans indice ni chaîne.
    #[must_use]
    pub fn is_simple_variable(&self) -> bool {
        matches!(self, Self::Variable(v) if v.indices.is_empty())
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn positions_are_reported() {
        let v = Expr::Variable(Variable::named("x", Pos(7)));
        assert_eq!(v.pos(), Pos(7));
        let s = Stmt::Assign { target: v, op: AssignOp::Add, value: Expr::number(1.0, Pos(12)), pos: Pos(7) };
        assert_eq!(s.pos(), Pos(7));
        assert_eq!(Stmt::Break(Pos(3)).pos(), Pos(3));
    }

    #[test]
    fn compound_ops_map_to_binary() {
        assert_eq!(AssignOp::Add.binary(), Some(BinaryOp::Add));
        assert_eq!(AssignOp::BitXor.binary(), Some(BinaryOp::BitXor));
        assert_eq!(AssignOp::Assign.binary(), None);
        assert_eq!(AssignOp::NullCoalesce.binary(), None);
    }

    #[test]
    fn operator_classes() {
        assert!(BinaryOp::Lte.is_comparison());
        assert!(!BinaryOp::Shl.is_comparison());
        assert!(BinaryOp::Xor.is_logical());
        assert_eq!(BinaryOp::IntDiv.symbol(), "div");
    }

    #[test]
    fn simple_variable_detection() {
        let mut v = Variable::named("a", Pos(0));
        assert!(Expr::Variable(v.clone()).is_simple_variable());
        v.indices.push(Expr::number(0.0, Pos(2)));
        assert!(!Expr::Variable(v).is_simple_variable());
    }
}
