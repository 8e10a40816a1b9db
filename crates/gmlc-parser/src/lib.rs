//! gmlc-parser — analyseur syntaxique GML
//!
//! Branches :
//! - `gmlc-lexer` pour les jetons déjà résolus (macros développées, fonctions,
//!   constantes, variables)
//! - `gmlc-ast` pour l'arbre cible
//! - `gmlc-builtins` pour les appels produits par les accesseurs `[| [? [# [$`
//!
//! Grammaire (essentiel) :
//! ```text
//! program     := stmt*
//! stmt        := block | "var" decls | "globalvar" names | "static" decls
//!              | "if" expr "then"? stmt ("else" stmt)?
//!              | "while" expr stmt | "for" "(" stmt? ";" expr? ";" stmt? ")" stmt
//!              | "do" stmt "until" expr | "repeat" expr stmt | "with" expr stmt
//!              | "switch" expr "{" (("case" expr | "default") ":" stmt*)* "}"
//!              | "break" | "continue" | "exit" | "return" expr? | "throw" expr
//!              | "try" block ("catch" "(" name ")" block)? ("finally" block)?
//!              | "function" name params (":" call)? "constructor"? block
//!              | "enum" name "{" member ("," member)* "}" | "delete" expr
//!              | access assign_op expr | access ("++"|"--") | ("++"|"--") access
//!              | access
//!              ";"?
//! expr        := cond
//! cond        := coalesce ("?" expr ":" expr)?
//! coalesce    := or ("??" or)*
//! or … mul    := binaire, du plus lâche au plus serré :
//!                || ; && ; ^^ ; | ; ^ ; & ; == != < <= > >= ; << >> ; + - ; * / div mod
//! unary       := ("!"|"-"|"~"|"+") unary | ("++"|"--") access | postfix
//! postfix     := access ("++"|"--")?
//! access      := primary ("." member | "[" args "]" | "[|" … "]" | "(" …)*
//! primary     := constant | variable | call | "(" expr ")" | "[" args "]"
//!              | "{" (name ":" expr),* "}" | "function" params block | "new" call
//! ```
//!
//! Dans une expression, `=` est une comparaison d'égalité. Les chaînes d'un même
//! opérateur sont aplaties (`a - b - c` : un seul nœud à trois opérandes) ; les
//! parenthèses coupent la chaîne.

#![deny(missing_docs)]

/* ─────────────────────────── Imports ─────────────────────────── */

use gmlc_ast::{
    AssignOp, BinaryOp, Block, Call, Declarator, Expr, FunctionDecl, Literal, Param, Program, Stmt,
    SwitchArm, UnaryOp, Variable,
};
use gmlc_builtins::Builtins;
use gmlc_core::{InstanceType, Pos};
use gmlc_lexer::{ConstantValue, Token, TokenKind, TokenValue};
use indexmap::IndexMap;
use log::{debug, warn};
use thiserror::Error;

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Erreur de parsing avec position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {}", .pos.0)]
pub struct ParseError {
    /// Localisation.
    pub pos: Pos,
    /// Message humain.
    pub message: String,
}

impl ParseError {
    fn new(pos: Pos, message: impl Into<String>) -> Self {
        Self { pos, message: message.into() }
    }
}

type PResult<T> = Result<T, ParseError>;

/// Énumérations connues : nom → (membre → valeur).
pub type EnumTable = IndexMap<String, IndexMap<String, i64>>;

/* ─────────────────────────── Entrées publiques ─────────────────────────── */

/// Parse un flux complet en utilisant uniquement les énumérations qu'il déclare.
pub fn parse(tokens: &[Token], builtins: &Builtins) -> PResult<Program> {
    let mut enums = EnumTable::new();
    collect_enums(tokens, builtins, &mut enums);
    Parser::new(tokens, builtins, &enums).parse_program()
}

/// Pré-passe : relève les `enum` d'un flux pour que `E.membre` soit replié
/// même avant la déclaration (ou depuis une autre entrée).
///
/// Une déclaration mal formée est ignorée ici ; le parse principal la signale.
pub fn collect_enums(tokens: &[Token], builtins: &Builtins, into: &mut EnumTable) {
    let empty = EnumTable::new();
    for (i, tok) in tokens.iter().enumerate() {
        if tok.kind != TokenKind::Enum {
            continue;
        }
        let mut p = Parser::new(tokens, builtins, &empty);
        p.idx = i;
        if let Ok((name, members, _)) = p.enum_decl() {
            if into.contains_key(&name) {
                warn!("enum \"{name}\" declared more than once");
            }
            into.insert(name, members.into_iter().collect());
        }
    }
}

/* ─────────────────────────── Parser ─────────────────────────── */

const ACCESSORS: &[(TokenKind, &str, &str)] = &[
    (TokenKind::ArrayListOpen, "ds_list_find_value", "ds_list_set"),
    (TokenKind::ArrayMapOpen, "ds_map_find_value", "ds_map_set"),
    (TokenKind::ArrayGridOpen, "ds_grid_get", "ds_grid_set"),
    (TokenKind::ArrayStructOpen, "variable_struct_get", "variable_struct_set"),
];

const BINARY_LEVELS: &[&[(TokenKind, BinaryOp)]] = &[
    &[(TokenKind::Or, BinaryOp::Or)],
    &[(TokenKind::And, BinaryOp::And)],
    &[(TokenKind::Xor, BinaryOp::Xor)],
    &[(TokenKind::BitOr, BinaryOp::BitOr)],
    &[(TokenKind::BitXor, BinaryOp::BitXor)],
    &[(TokenKind::BitAnd, BinaryOp::BitAnd)],
    &[
        (TokenKind::Equal, BinaryOp::Eq),
        (TokenKind::Assign, BinaryOp::Eq),
        (TokenKind::NotEqual, BinaryOp::Neq),
        (TokenKind::Lesser, BinaryOp::Lt),
        (TokenKind::LesserEqual, BinaryOp::Lte),
        (TokenKind::Greater, BinaryOp::Gt),
        (TokenKind::GreaterEqual, BinaryOp::Gte),
    ],
    &[(TokenKind::BitShiftLeft, BinaryOp::Shl), (TokenKind::BitShiftRight, BinaryOp::Shr)],
    &[(TokenKind::Plus, BinaryOp::Add), (TokenKind::Minus, BinaryOp::Sub)],
    &[
        (TokenKind::Times, BinaryOp::Mul),
        (TokenKind::Divide, BinaryOp::Div),
        (TokenKind::Div, BinaryOp::IntDiv),
        (TokenKind::Mod, BinaryOp::Mod),
    ],
];

/// Parser GML sur un flux de jetons résolus.
pub struct Parser<'a> {
    tokens: &'a [Token],
    idx: usize,
    builtins: &'a Builtins,
    enums: &'a EnumTable,
    eof: Token,
}

impl<'a> Parser<'a> {
    /// Crée un parser. `enums` contient les énumérations visibles (en général
    /// celles de toute la session).
    #[must_use]
    pub fn new(tokens: &'a [Token], builtins: &'a Builtins, enums: &'a EnumTable) -> Self {
        let end = tokens.last().map_or(Pos::ZERO, |t| t.pos);
        Self { tokens, idx: 0, builtins, enums, eof: Token::new(TokenKind::Eof, end) }
    }

    /// Parse un programme complet.
    pub fn parse_program(&mut self) -> PResult<Program> {
        let mut body = Vec::new();
        while !self.at(TokenKind::Eof) {
            body.push(self.statement()?);
        }
        debug!("parsed {} top-level statements", body.len());
        Ok(Program { body })
    }

    /// Parse une seule expression (le flux doit être épuisé ensuite).
    pub fn parse_expression(&mut self) -> PResult<Expr> {
        let e = self.expression()?;
        if !self.at(TokenKind::Eof) {
            return Err(self.unexpected("end of expression"));
        }
        Ok(e)
    }

    /* ─────────── Curseur ─────────── */

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> &Token {
        self.tokens.get(self.idx + n).unwrap_or(&self.eof)
    }

    fn kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.kind() == kind
    }

    fn pos(&self) -> Pos {
        self.peek().pos
    }

    fn bump(&mut self) -> Token {
        let t = self.peek().clone();
        if self.idx < self.tokens.len() {
            self.idx += 1;
        }
        t
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> PResult<Pos> {
        if self.at(kind) {
            Ok(self.bump().pos)
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, what: &str) -> ParseError {
        let t = self.peek();
        ParseError::new(t.pos, format!("expected {what}, found {}", t.kind))
    }

    /// Nom porté par le jeton courant (variable, identifiant, constante nommée).
    fn name(&mut self, what: &str) -> PResult<(String, Pos)> {
        let t = self.peek();
        match (t.kind, t.name()) {
            (TokenKind::Variable | TokenKind::Identifier | TokenKind::Constant | TokenKind::Function, Some(n)) => {
                let n = n.to_owned();
                Ok((n, self.bump().pos))
            }
            _ => Err(self.unexpected(what)),
        }
    }

    /* ─────────── Instructions ─────────── */

    fn statement(&mut self) -> PResult<Stmt> {
        let s = self.statement_inner()?;
        self.eat(TokenKind::Semicolon);
        Ok(s)
    }

    fn statement_inner(&mut self) -> PResult<Stmt> {
        let pos = self.pos();
        match self.kind() {
            TokenKind::Begin => Ok(Stmt::Block(self.block()?)),
            TokenKind::Semicolon => {
                self.bump();
                Ok(Stmt::Empty(pos))
            }
            TokenKind::Var => {
                self.bump();
                Ok(Stmt::Var { decls: self.declarators()?, pos })
            }
            TokenKind::Static if self.peek_at(1).kind != TokenKind::Dot => {
                self.bump();
                Ok(Stmt::Static { decls: self.declarators()?, pos })
            }
            TokenKind::Globalvar => {
                self.bump();
                let mut names = vec![self.name("global variable name")?.0];
                while self.eat(TokenKind::Comma) {
                    names.push(self.name("global variable name")?.0);
                }
                Ok(Stmt::GlobalVar { names, pos })
            }
            TokenKind::If => {
                self.bump();
                let cond = self.expression()?;
                self.eat(TokenKind::Then);
                let then = Box::new(self.statement()?);
                let otherwise = if self.eat(TokenKind::Else) { Some(Box::new(self.statement()?)) } else { None };
                Ok(Stmt::If { cond, then, otherwise, pos })
            }
            TokenKind::While => {
                self.bump();
                let cond = self.expression()?;
                self.eat(TokenKind::Do);
                Ok(Stmt::While { cond, body: Box::new(self.statement()?), pos })
            }
            TokenKind::For => self.for_loop(),
            TokenKind::Do => {
                self.bump();
                let body = Box::new(self.statement()?);
                self.expect(TokenKind::Until, "`until`")?;
                Ok(Stmt::DoUntil { body, cond: self.expression()?, pos })
            }
            TokenKind::Repeat => {
                self.bump();
                let count = self.expression()?;
                Ok(Stmt::Repeat { count, body: Box::new(self.statement()?), pos })
            }
            TokenKind::With => {
                self.bump();
                let target = self.expression()?;
                self.eat(TokenKind::Do);
                Ok(Stmt::With { target, body: Box::new(self.statement()?), pos })
            }
            TokenKind::Switch => self.switch(),
            TokenKind::Break => {
                self.bump();
                Ok(Stmt::Break(pos))
            }
            TokenKind::Continue => {
                self.bump();
                Ok(Stmt::Continue(pos))
            }
            TokenKind::Exit => {
                self.bump();
                Ok(Stmt::Exit(pos))
            }
            TokenKind::Return => {
                self.bump();
                let value = match self.kind() {
                    TokenKind::Semicolon | TokenKind::End | TokenKind::Eof => None,
                    _ => Some(self.expression()?),
                };
                Ok(Stmt::Return { value, pos })
            }
            TokenKind::Throw => {
                self.bump();
                Ok(Stmt::Throw { value: self.expression()?, pos })
            }
            TokenKind::Try => self.try_catch(),
            TokenKind::FunctionDecl if self.peek_at(1).kind != TokenKind::Open => {
                Ok(Stmt::Function(self.function_decl(true)?))
            }
            TokenKind::Enum => {
                let (name, members, pos) = self.enum_decl()?;
                Ok(Stmt::Enum { name, members, pos })
            }
            TokenKind::Delete => {
                self.bump();
                Ok(Stmt::Delete { target: self.expression()?, pos })
            }
            TokenKind::Increment | TokenKind::Decrement => {
                let increment = self.bump().kind == TokenKind::Increment;
                let target = self.access()?;
                self.inc_dec(target, increment, true, pos)
            }
            _ => self.simple_statement(),
        }
    }

    /// Affectation, `x++`/`x--` ou expression évaluée pour ses effets.
    fn simple_statement(&mut self) -> PResult<Stmt> {
        let pos = self.pos();
        let target = self.access()?;
        if let Some(op) = assign_op(self.kind()) {
            self.bump();
            let value = self.expression()?;
            return Ok(match accessor_setter(self.builtins, target, op, value, pos) {
                Ok(call) => call,
                Err((target, value)) => Stmt::Assign { target, op, value, pos },
            });
        }
        match self.kind() {
            TokenKind::Increment | TokenKind::Decrement => {
                let increment = self.bump().kind == TokenKind::Increment;
                self.inc_dec(target, increment, false, pos)
            }
            _ => Ok(Stmt::Expr { expr: target, pos }),
        }
    }

    fn inc_dec(&self, target: Expr, increment: bool, prefix: bool, pos: Pos) -> PResult<Stmt> {
        let op = if increment { AssignOp::Add } else { AssignOp::Sub };
        match accessor_setter(self.builtins, target, op, Expr::number(1.0, pos), pos) {
            Ok(call) => Ok(call),
            Err((target @ (Expr::Variable(_) | Expr::Chain { .. }), _)) => {
                Ok(Stmt::IncDec { target, increment, prefix, pos })
            }
            Err((other, _)) => Err(ParseError::new(other.pos(), "invalid increment target")),
        }
    }

    fn block(&mut self) -> PResult<Block> {
        let pos = self.expect(TokenKind::Begin, "`{`")?;
        let mut stmts = Vec::new();
        while !self.at(TokenKind::End) {
            if self.at(TokenKind::Eof) {
                return Err(self.unexpected("`}`"));
            }
            stmts.push(self.statement()?);
        }
        self.bump();
        Ok(Block { stmts, pos })
    }

    fn declarators(&mut self) -> PResult<Vec<Declarator>> {
        let mut decls = Vec::new();
        loop {
            let (name, pos) = self.name("variable name")?;
            let value = if self.eat(TokenKind::Assign) { Some(self.expression()?) } else { None };
            decls.push(Declarator { name, value, pos });
            if !self.eat(TokenKind::Comma) {
                return Ok(decls);
            }
        }
    }

    fn for_loop(&mut self) -> PResult<Stmt> {
        let pos = self.bump().pos;
        self.expect(TokenKind::Open, "`(`")?;
        let init = if self.at(TokenKind::Semicolon) { None } else { Some(Box::new(self.statement_inner()?)) };
        self.expect(TokenKind::Semicolon, "`;`")?;
        let cond = if self.at(TokenKind::Semicolon) { None } else { Some(self.expression()?) };
        self.expect(TokenKind::Semicolon, "`;`")?;
        let step = if self.at(TokenKind::Close) { None } else { Some(Box::new(self.statement_inner()?)) };
        self.expect(TokenKind::Close, "`)`")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::For { init, cond, step, body, pos })
    }

    fn switch(&mut self) -> PResult<Stmt> {
        let pos = self.bump().pos;
        let value = self.expression()?;
        self.expect(TokenKind::Begin, "`{`")?;
        let mut arms: Vec<SwitchArm> = Vec::new();
        loop {
            let arm_pos = self.pos();
            let label = match self.kind() {
                TokenKind::Case => {
                    self.bump();
                    Some(self.expression()?)
                }
                TokenKind::Default => {
                    self.bump();
                    None
                }
                TokenKind::End => {
                    self.bump();
                    return Ok(Stmt::Switch { value, arms, pos });
                }
                _ => return Err(self.unexpected("`case`, `default` or `}`")),
            };
            self.expect(TokenKind::Colon, "`:`")?;
            let mut body = Vec::new();
            while !matches!(self.kind(), TokenKind::Case | TokenKind::Default | TokenKind::End) {
                if self.at(TokenKind::Eof) {
                    return Err(self.unexpected("`}`"));
                }
                body.push(self.statement()?);
            }
            arms.push(SwitchArm { label, body, pos: arm_pos });
        }
    }

    fn try_catch(&mut self) -> PResult<Stmt> {
        let pos = self.bump().pos;
        let body = self.block()?;
        let catch = if self.eat(TokenKind::Catch) {
            self.expect(TokenKind::Open, "`(`")?;
            let (name, _) = self.name("exception variable")?;
            self.expect(TokenKind::Close, "`)`")?;
            Some((name, self.block()?))
        } else {
            None
        };
        let finally = if self.eat(TokenKind::Finally) { Some(self.block()?) } else { None };
        Ok(Stmt::Try { body, catch, finally, pos })
    }

    fn function_decl(&mut self, named: bool) -> PResult<FunctionDecl> {
        let pos = self.expect(TokenKind::FunctionDecl, "`function`")?;
        let name = if named { Some(self.name("function name")?.0) } else { None };
        self.expect(TokenKind::Open, "`(`")?;
        let mut params = Vec::new();
        if !self.at(TokenKind::Close) {
            loop {
                let (name, pos) = self.name("parameter name")?;
                let default = if self.eat(TokenKind::Assign) { Some(self.expression()?) } else { None };
                params.push(Param { name, default, pos });
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::Close, "`)`")?;
        let inherits = if self.eat(TokenKind::Colon) {
            if !self.at(TokenKind::Function) {
                return Err(self.unexpected("parent constructor call"));
            }
            Some(self.call()?)
        } else {
            None
        };
        let constructor = self.eat(TokenKind::Constructor);
        let body = self.block()?;
        Ok(FunctionDecl { name, params, constructor, inherits, body, pos })
    }

    fn enum_decl(&mut self) -> PResult<(String, Vec<(String, i64)>, Pos)> {
        let pos = self.expect(TokenKind::Enum, "`enum`")?;
        let (name, _) = self.name("enum name")?;
        self.expect(TokenKind::Begin, "`{`")?;
        let mut members: Vec<(String, i64)> = Vec::new();
        let mut next = 0i64;
        while !self.at(TokenKind::End) {
            let (member, _) = self.name("enum member")?;
            if self.eat(TokenKind::Assign) {
                next = self.enum_value(&members)?;
            }
            members.push((member, next));
            next = next.wrapping_add(1);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::End, "`}`")?;
        Ok((name, members, pos))
    }

    fn enum_value(&mut self, earlier: &[(String, i64)]) -> PResult<i64> {
        let negate = self.eat(TokenKind::Minus);
        let t = self.bump();
        let v = match &t.value {
            TokenValue::Constant(c) => match c.value {
                ConstantValue::Number(n) if n.fract() == 0.0 => n as i64,
                ConstantValue::Int64(n) => n,
                _ => return Err(ParseError::new(t.pos, "enum value must be an integer")),
            },
            TokenValue::Variable(v) => match earlier.iter().find(|(n, _)| *n == v.name) {
                Some((_, value)) => *value,
                None => return Err(ParseError::new(t.pos, format!("unknown enum member \"{}\"", v.name))),
            },
            _ => return Err(ParseError::new(t.pos, "enum value must be an integer")),
        };
        Ok(if negate { v.wrapping_neg() } else { v })
    }

    /* ─────────── Expressions ─────────── */

    fn expression(&mut self) -> PResult<Expr> {
        let cond = self.coalesce()?;
        if !self.at(TokenKind::Conditional) {
            return Ok(cond);
        }
        self.bump();
        let then = self.expression()?;
        self.expect(TokenKind::Colon, "`:`")?;
        let otherwise = self.expression()?;
        let pos = cond.pos();
        Ok(Expr::Conditional { cond: Box::new(cond), then: Box::new(then), otherwise: Box::new(otherwise), pos })
    }

    fn coalesce(&mut self) -> PResult<Expr> {
        let mut left = self.binary(0)?;
        while self.eat(TokenKind::NullCoalesce) {
            let right = self.binary(0)?;
            let pos = left.pos();
            left = Expr::NullCoalesce { left: Box::new(left), right: Box::new(right), pos };
        }
        Ok(left)
    }

    fn binary_op(&self, ops: &[(TokenKind, BinaryOp)]) -> Option<BinaryOp> {
        let k = self.kind();
        ops.iter().find(|(t, _)| *t == k).map(|(_, op)| *op)
    }

    fn binary(&mut self, level: usize) -> PResult<Expr> {
        let Some(ops) = BINARY_LEVELS.get(level) else {
            return self.unary();
        };
        let first = self.binary(level + 1)?;
        let Some(mut op) = self.binary_op(ops) else {
            return Ok(first);
        };
        let pos = first.pos();
        let mut operands = vec![first];
        loop {
            self.bump();
            operands.push(self.binary(level + 1)?);
            match self.binary_op(ops) {
                None => return Ok(Expr::Binary { op, operands, pos }),
                Some(next) if next == op => {}
                Some(next) => {
                    let done = Expr::Binary { op, operands: std::mem::take(&mut operands), pos };
                    operands.push(done);
                    op = next;
                }
            }
        }
    }

    fn unary(&mut self) -> PResult<Expr> {
        let pos = self.pos();
        let op = match self.kind() {
            TokenKind::Not => UnaryOp::Not,
            TokenKind::BitNegate => UnaryOp::BitNot,
            TokenKind::Minus => {
                self.bump();
                return Ok(match self.unary()? {
                    Expr::Literal { value: Literal::Number(v), .. } => Expr::Literal { value: Literal::Number(-v), pos },
                    Expr::Literal { value: Literal::Int64(v), .. } => {
                        Expr::Literal { value: Literal::Int64(v.wrapping_neg()), pos }
                    }
                    operand => Expr::Unary { op: UnaryOp::Neg, operand: Box::new(operand), pos },
                });
            }
            TokenKind::Plus => {
                self.bump();
                return self.unary();
            }
            TokenKind::Increment | TokenKind::Decrement => {
                let increment = self.bump().kind == TokenKind::Increment;
                let target = self.access()?;
                return Ok(Expr::Prefix { target: Box::new(target), increment, pos });
            }
            _ => return self.postfix(),
        };
        self.bump();
        let operand = self.unary()?;
        Ok(Expr::Unary { op, operand: Box::new(operand), pos })
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let e = self.access()?;
        match (self.kind(), &e) {
            (TokenKind::Increment | TokenKind::Decrement, Expr::Variable(_) | Expr::Chain { .. }) => {
                let increment = self.bump().kind == TokenKind::Increment;
                let pos = e.pos();
                Ok(Expr::Postfix { target: Box::new(e), increment, pos })
            }
            _ => Ok(e),
        }
    }

    /// Primaire suivi de ses accès `.membre`, `[i]` et accesseurs.
    fn access(&mut self) -> PResult<Expr> {
        let mut e = match self.qualified()? {
            Some(v) => v,
            None => self.primary()?,
        };
        loop {
            match self.kind() {
                TokenKind::Dot => {
                    self.bump();
                    e = self.member(e)?;
                }
                TokenKind::ArrayOpen | TokenKind::ArrayDirectOpen => {
                    self.bump();
                    let indices = self.list(TokenKind::ArrayClose)?;
                    if indices.is_empty() {
                        return Err(ParseError::new(e.pos(), "empty index"));
                    }
                    e = index(e, indices)?;
                }
                k => match ACCESSORS.iter().find(|(t, _, _)| *t == k) {
                    Some((_, getter, _)) => {
                        self.bump();
                        let pos = e.pos();
                        let mut args = vec![e];
                        args.extend(self.list(TokenKind::ArrayClose)?);
                        e = Expr::Call(self.builtin_call(getter, args, pos));
                    }
                    None => return Ok(e),
                },
            }
        }
    }

    /// `self.x`, `global.x`, `static.x`, `obj.x` : variable à instance explicite.
    fn qualified(&mut self) -> PResult<Option<Expr>> {
        if self.peek_at(1).kind != TokenKind::Dot || self.peek_at(2).kind == TokenKind::Function {
            return Ok(None);
        }
        let t = self.peek();
        let instance = match (&t.kind, &t.value) {
            (TokenKind::Static, _) => InstanceType::STATIC,
            (TokenKind::Constant, TokenValue::Constant(c)) if c.name.is_some() && !c.is_bool => match c.value {
                ConstantValue::Number(n) if n.fract() == 0.0 && n >= f64::from(i16::MIN) && n <= f64::from(i16::MAX) => {
                    InstanceType(n as i16)
                }
                _ => return Ok(None),
            },
            _ => return Ok(None),
        };
        self.bump();
        self.bump();
        let (name, pos) = self.name("member name")?;
        let builtin = self.builtins.variable(&name).cloned();
        Ok(Some(Expr::Variable(Variable { name, builtin, instance: Some(instance), indices: Vec::new(), pos })))
    }

    fn member(&mut self, left: Expr) -> PResult<Expr> {
        let enums = self.enums;
        if let Expr::Variable(v) = &left {
            if v.instance.is_none() && v.indices.is_empty() {
                if let Some(members) = enums.get(&v.name) {
                    let (member, pos) = self.name("enum member")?;
                    return match members.get(&member) {
                        Some(value) => Ok(Expr::number(*value as f64, v.pos)),
                        None => Err(ParseError::new(pos, format!("\"{member}\" is not a member of enum \"{}\"", v.name))),
                    };
                }
            }
        }
        let pos = left.pos();
        let right = if self.at(TokenKind::Function) {
            Expr::Call(self.call()?)
        } else {
            let (name, npos) = self.name("member name")?;
            let builtin = self.builtins.variable(&name).cloned();
            Expr::Variable(Variable { name, builtin, instance: None, indices: Vec::new(), pos: npos })
        };
        Ok(Expr::Chain { left: Box::new(left), right: Box::new(right), pos })
    }

    fn primary(&mut self) -> PResult<Expr> {
        let pos = self.pos();
        match self.kind() {
            TokenKind::Constant => {
                let t = self.bump();
                let TokenValue::Constant(c) = t.value else {
                    return Err(ParseError::new(pos, "malformed constant"));
                };
                let value = match c.value {
                    ConstantValue::Number(n) if c.is_bool => Literal::Bool(n != 0.0),
                    ConstantValue::Number(n) => Literal::Number(n),
                    ConstantValue::Int64(n) => Literal::Int64(n),
                    ConstantValue::String(s) => Literal::String(s),
                };
                Ok(Expr::Literal { value, pos })
            }
            TokenKind::Variable | TokenKind::Identifier => {
                let t = self.bump();
                let (name, builtin) = match t.value {
                    TokenValue::Variable(v) => (v.name, v.builtin),
                    TokenValue::Identifier(name) => (name, None),
                    _ => return Err(ParseError::new(pos, "malformed variable")),
                };
                Ok(Expr::Variable(Variable { name, builtin, instance: None, indices: Vec::new(), pos }))
            }
            TokenKind::Function => Ok(Expr::Call(self.call()?)),
            TokenKind::Open => {
                self.bump();
                let e = self.expression()?;
                self.expect(TokenKind::Close, "`)`")?;
                Ok(e)
            }
            TokenKind::ArrayOpen => {
                self.bump();
                Ok(Expr::Array { elements: self.list(TokenKind::ArrayClose)?, pos })
            }
            TokenKind::Begin => self.struct_literal(),
            TokenKind::FunctionDecl => Ok(Expr::Function(Box::new(self.function_decl(false)?))),
            TokenKind::New => {
                self.bump();
                if !self.at(TokenKind::Function) {
                    return Err(self.unexpected("constructor call"));
                }
                Ok(Expr::New(self.call()?))
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    fn struct_literal(&mut self) -> PResult<Expr> {
        let pos = self.expect(TokenKind::Begin, "`{`")?;
        let mut fields = Vec::new();
        while !self.at(TokenKind::End) {
            let key = match &self.peek().value {
                TokenValue::Constant(c) if c.name.is_none() => match &c.value {
                    ConstantValue::String(s) => {
                        let s = s.clone();
                        self.bump();
                        s
                    }
                    _ => return Err(self.unexpected("field name")),
                },
                _ => self.name("field name")?.0,
            };
            self.expect(TokenKind::Colon, "`:`")?;
            fields.push((key, self.expression()?));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::End, "`}`")?;
        Ok(Expr::Struct { fields, pos })
    }

    fn call(&mut self) -> PResult<Call> {
        let t = self.bump();
        let TokenValue::Function(f) = t.value else {
            return Err(ParseError::new(t.pos, "expected function call"));
        };
        self.expect(TokenKind::Open, "`(`")?;
        let args = self.list(TokenKind::Close)?;
        Ok(Call { name: f.name, builtin: f.builtin, args, pos: t.pos })
    }

    /// Liste d'expressions séparées par des virgules, fermée par `close`.
    fn list(&mut self, close: TokenKind) -> PResult<Vec<Expr>> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.expression()?);
            if self.eat(TokenKind::Comma) {
                if self.eat(close) {
                    return Ok(items);
                }
                continue;
            }
            self.expect(close, &format!("`,` or {close}"))?;
            return Ok(items);
        }
    }

    fn builtin_call(&self, name: &str, args: Vec<Expr>, pos: Pos) -> Call {
        Call { name: name.to_owned(), builtin: self.builtins.function(name).cloned(), args, pos }
    }
}

/* ─────────────────────────── Helpers ─────────────────────────── */

const fn assign_op(kind: TokenKind) -> Option<AssignOp> {
    Some(match kind {
        TokenKind::Assign => AssignOp::Assign,
        TokenKind::AssignPlus => AssignOp::Add,
        TokenKind::AssignMinus => AssignOp::Sub,
        TokenKind::AssignTimes => AssignOp::Mul,
        TokenKind::AssignDivide => AssignOp::Div,
        TokenKind::AssignMod => AssignOp::Mod,
        TokenKind::AssignAnd => AssignOp::BitAnd,
        TokenKind::AssignOr => AssignOp::BitOr,
        TokenKind::AssignXor => AssignOp::BitXor,
        TokenKind::AssignNullCoalesce => AssignOp::NullCoalesce,
        _ => return None,
    })
}

fn index(e: Expr, indices: Vec<Expr>) -> PResult<Expr> {
    match e {
        Expr::Variable(mut v) => {
            v.indices.extend(indices);
            Ok(Expr::Variable(v))
        }
        Expr::Chain { left, right, pos } => match *right {
            Expr::Variable(mut v) => {
                v.indices.extend(indices);
                Ok(Expr::Chain { left, right: Box::new(Expr::Variable(v)), pos })
            }
            other => Err(ParseError::new(other.pos(), "only variables can be indexed")),
        },
        other => Err(ParseError::new(other.pos(), "only variables can be indexed")),
    }
}

/// Réécrit une affectation sur un accesseur (`l[| i] = v`, `m[? k] += v`) en
/// appel du setter correspondant. Rend la cible et la valeur intactes sinon.
fn accessor_setter(
    builtins: &Builtins,
    target: Expr,
    op: AssignOp,
    value: Expr,
    pos: Pos,
) -> Result<Stmt, (Expr, Expr)> {
    let setter = match &target {
        Expr::Call(c) if c.builtin.is_some() => ACCESSORS.iter().find(|(_, g, _)| *g == c.name).map(|(_, _, s)| *s),
        _ => None,
    };
    let (Some(setter), Expr::Call(getter)) = (setter, &target) else {
        return Err((target, value));
    };
    let value = match op.binary() {
        Some(bop) => Expr::Binary { op: bop, operands: vec![target.clone(), value], pos },
        None if op == AssignOp::Assign => value,
        None => return Err((target, value)),
    };
    let mut args = getter.args.clone();
    args.push(value);
    let call = Call { name: setter.to_owned(), builtin: builtins.function(setter).cloned(), args, pos };
    Ok(Stmt::Expr { expr: Expr::Call(call), pos })
}

/* ─────────────────────────── Tests ─────────────────────────── */
#[cfg(test)]
mod tests {
    use super::*;
    use gmlc_core::{AssetKind, AssetTable, Target};
    use gmlc_lexer::{lex, process_identifiers, MacroTable, ProcessEnv};
    use pretty_assertions::assert_eq;

    fn tokens(src: &str) -> (Vec<Token>, Builtins) {
        let target = Target::default();
        let builtins = Builtins::new(&target);
        let mut macros = MacroTable::new();
        let mut out = lex(src, &target, &mut macros);
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        let mut assets = AssetTable::new();
        assets.insert("obj_enemy", AssetKind::Object, 3);
        let env = ProcessEnv { builtins: &builtins, macros: &macros, assets: &assets, target: &target };
        assert!(process_identifiers(&mut out.tokens, &env).is_empty());
        (out.tokens, builtins)
    }

    fn program(src: &str) -> Program {
        let (toks, builtins) = tokens(src);
        match parse(&toks, &builtins) {
            Ok(p) => p,
            Err(e) => panic!("{src}: {e}"),
        }
    }

    fn expr(src: &str) -> Expr {
        let (toks, builtins) = tokens(src);
        let enums = EnumTable::new();
        match Parser::new(&toks, &builtins, &enums).parse_expression() {
            Ok(e) => e,
            Err(e) => panic!("{src}: {e}"),
        }
    }

    fn var_name(e: &Expr) -> &str {
        match e {
            Expr::Variable(v) => &v.name,
            other => panic!("not a variable: {other:?}"),
        }
    }

    #[test]
    fn precedence_and_flattening() {
        let Expr::Binary { op, operands, .. } = expr("a + b * c + d") else { panic!() };
        assert_eq!(op, BinaryOp::Add);
        assert_eq!(operands.len(), 3);
        assert!(matches!(&operands[1], Expr::Binary { op: BinaryOp::Mul, operands, .. } if operands.len() == 2));

        let Expr::Binary { operands, .. } = expr("(a + b) + c") else { panic!() };
        assert_eq!(operands.len(), 2);
        assert!(matches!(&operands[0], Expr::Binary { op: BinaryOp::Add, .. }));
    }

    #[test]
    fn mixed_operators_at_one_level_nest_leftwards() {
        let Expr::Binary { op, operands, .. } = expr("a - b + c") else { panic!() };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(&operands[0], Expr::Binary { op: BinaryOp::Sub, .. }));
        assert_eq!(var_name(&operands[1]), "c");
    }

    #[test]
    fn single_equals_is_comparison_in_expressions() {
        assert!(matches!(expr("a = 1"), Expr::Binary { op: BinaryOp::Eq, .. }));
        assert!(matches!(expr("a <> 1"), Expr::Binary { op: BinaryOp::Neq, .. }));
        assert!(matches!(expr("a and b or c"), Expr::Binary { op: BinaryOp::Or, .. }));
    }

    #[test]
    fn negative_literals_fold() {
        assert_eq!(expr("-5"), Expr::Literal { value: Literal::Number(-5.0), pos: Pos(0) });
        assert!(matches!(expr("-x"), Expr::Unary { op: UnaryOp::Neg, .. }));
        assert!(matches!(expr("true"), Expr::Literal { value: Literal::Bool(true), .. }));
    }

    #[test]
    fn conditional_is_right_associative() {
        let Expr::Conditional { otherwise, .. } = expr("a ? 1 : b ? 2 : 3") else { panic!() };
        assert!(matches!(*otherwise, Expr::Conditional { .. }));
    }

    #[test]
    fn instance_qualifiers() {
        let Expr::Variable(v) = expr("global.score") else { panic!() };
        assert_eq!(v.instance, Some(InstanceType::GLOBAL));
        let Expr::Variable(v) = expr("other.hp") else { panic!() };
        assert_eq!(v.instance, Some(InstanceType::OTHER));
        let Expr::Variable(v) = expr("obj_enemy.hp") else { panic!() };
        assert_eq!(v.instance, Some(InstanceType(3)));
        assert!(matches!(expr("target.hp"), Expr::Chain { .. }));
        assert!(matches!(expr("a.b.c"), Expr::Chain { left, .. } if matches!(*left, Expr::Chain { .. })));
    }

    #[test]
    fn indexing() {
        let Expr::Variable(v) = expr("a[i, j]") else { panic!() };
        assert_eq!(v.indices.len(), 2);
        let Expr::Variable(v) = expr("a[i][j]") else { panic!() };
        assert_eq!(v.indices.len(), 2);
        let Expr::Chain { right, .. } = expr("p.list[@ 0]") else { panic!() };
        assert!(matches!(*right, Expr::Variable(v) if v.indices.len() == 1));
    }

    #[test]
    fn accessors_desugar_to_calls() {
        let Expr::Call(c) = expr("m[? \"k\"]") else { panic!() };
        assert_eq!(c.name, "ds_map_find_value");
        assert!(c.builtin.is_some());
        assert_eq!(c.args.len(), 2);

        let p = program("l[| 0] = 5; g[# 1, 2] += 1;");
        let Stmt::Expr { expr: Expr::Call(set), .. } = &p.body[0] else { panic!() };
        assert_eq!(set.name, "ds_list_set");
        assert_eq!(set.args.len(), 3);
        let Stmt::Expr { expr: Expr::Call(set), .. } = &p.body[1] else { panic!() };
        assert_eq!(set.name, "ds_grid_set");
        assert!(matches!(&set.args[3], Expr::Binary { op: BinaryOp::Add, operands, .. }
            if matches!(&operands[0], Expr::Call(c) if c.name == "ds_grid_get")));
    }

    #[test]
    fn enums_fold_including_forward_references() {
        let p = program("x = Dir.Down; enum Dir { Up, Down = 5, Left, Back = -1 }");
        let Stmt::Assign { value, .. } = &p.body[0] else { panic!() };
        assert_eq!(*value, Expr::number(5.0, Pos(4)));
        let Stmt::Enum { members, .. } = &p.body[1] else { panic!() };
        assert_eq!(
            members,
            &vec![("Up".to_owned(), 0), ("Down".to_owned(), 5), ("Left".to_owned(), 6), ("Back".to_owned(), -1)]
        );
    }

    #[test]
    fn unknown_enum_member_is_an_error() {
        let (toks, builtins) = tokens("enum E { A }\nx = E.B;");
        let err = parse(&toks, &builtins).err();
        assert!(matches!(err, Some(e) if e.message.contains("not a member")));
    }

    #[test]
    fn statements() {
        let p = program(
            "var i = 0, j;\n\
             if i < 3 then j = 1 else { j = 2 }\n\
             for (i = 0; i < 10; i += 1) { show_debug_message(i); }\n\
             while (j) j--;\n\
             do { j++ } until (j > 3)\n\
             repeat (4) ++i;\n\
             with (obj_enemy) instance_destroy();\n\
             exit;",
        );
        assert!(matches!(&p.body[0], Stmt::Var { decls, .. } if decls.len() == 2 && decls[1].value.is_none()));
        assert!(matches!(&p.body[1], Stmt::If { otherwise: Some(_), .. }));
        assert!(matches!(&p.body[2], Stmt::For { init: Some(_), cond: Some(_), step: Some(_), .. }));
        assert!(matches!(&p.body[3], Stmt::While { body, .. }
            if matches!(**body, Stmt::IncDec { increment: false, prefix: false, .. })));
        assert!(matches!(&p.body[4], Stmt::DoUntil { .. }));
        assert!(matches!(&p.body[5], Stmt::Repeat { body, .. }
            if matches!(**body, Stmt::IncDec { increment: true, prefix: true, .. })));
        assert!(matches!(&p.body[6], Stmt::With { .. }));
        assert!(matches!(&p.body[7], Stmt::Exit(_)));
        assert_eq!(p.body.len(), 8);
    }

    #[test]
    fn switch_arms_in_source_order() {
        let p = program("switch (k) { case 1: case 2: a = 1; break; default: a = 0; }");
        let Stmt::Switch { arms, .. } = &p.body[0] else { panic!() };
        assert_eq!(arms.len(), 3);
        assert!(arms[0].body.is_empty());
        assert_eq!(arms[1].body.len(), 2);
        assert!(arms[2].label.is_none());
    }

    #[test]
    fn return_without_value() {
        let p = program("function f() { return }\nfunction g(a, b) constructor { return a; }");
        let Stmt::Function(f) = &p.body[0] else { panic!() };
        assert!(matches!(&f.body.stmts[0], Stmt::Return { value: None, .. }));
        let Stmt::Function(g) = &p.body[1] else { panic!() };
        assert!(g.constructor);
        assert_eq!(g.params.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn try_catch_finally() {
        let p = program("try { a = 1 } catch (e) { show_debug_message(e) } finally { b = 2 }");
        let Stmt::Try { catch: Some((name, _)), finally: Some(_), .. } = &p.body[0] else { panic!() };
        assert_eq!(name, "e");
    }

    #[test]
    fn literals_and_new() {
        assert!(matches!(expr("[1, 2, 3]"), Expr::Array { elements, .. } if elements.len() == 3));
        assert!(matches!(expr("{ a: 1, \"b\": 2 }"), Expr::Struct { fields, .. } if fields[1].0 == "b"));
        assert!(matches!(expr("new Vec2(1, 2)"), Expr::New(c) if c.args.len() == 2 && c.builtin.is_none()));
        assert!(matches!(expr("function (x) { return x; }"), Expr::Function(f) if f.name.is_none()));
    }

    #[test]
    fn method_call_on_chain() {
        let Expr::Chain { right, .. } = expr("inv.add(3)") else { panic!() };
        assert!(matches!(*right, Expr::Call(c) if c.name == "add"));
    }

    #[test]
    fn errors_carry_positions() {
        let (toks, builtins) = tokens("x = ;");
        let err = parse(&toks, &builtins).err();
        assert_eq!(err.map(|e| e.pos), Some(Pos(4)));

        let (toks, builtins) = tokens("{ a = 1");
        assert!(parse(&toks, &builtins).is_err());
    }
}
