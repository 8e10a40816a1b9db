//! Scanner : source → jetons bruts.

use gmlc_core::{Pos, Target};
use log::{debug, trace};

use crate::macros::MacroTable;
use crate::token::{ConstantToken, ConstantValue, Token, TokenKind, TokenValue};
use crate::{LexError, LexErrorKind, LexOutput, LOOKAHEAD_PADDING};

/// Lexe une entrée de code ordinaire.
///
/// Le flux se termine par `Eof` (ou par le jeton d'erreur qui l'a arrêté),
/// suivi de [`LOOKAHEAD_PADDING`] copies de ce dernier jeton. Les `#macro`
/// rencontrées sont enregistrées dans `macros`.
pub fn lex(src: &str, target: &Target, macros: &mut MacroTable) -> LexOutput {
    Scanner::new(src, 0, target, macros).run(false)
}

/// Lexe le corps d'une macro : pas d'`Eof` final, pas de copies de garde.
pub fn lex_macro_body(src: &str, target: &Target, macros: &mut MacroTable) -> LexOutput {
    Scanner::new(src, 0, target, macros).run(true)
}

struct Scanner<'s, 'm> {
    src: &'s str,
    off: usize,
    /// Décalage ajouté aux positions (corps de macro dans sa source).
    base: usize,
    target: &'s Target,
    macros: &'m mut MacroTable,
    errors: Vec<LexError>,
}

#[inline]
const fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

#[inline]
const fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl<'s, 'm> Scanner<'s, 'm> {
    fn new(src: &'s str, base: usize, target: &'s Target, macros: &'m mut MacroTable) -> Self {
        Self { src, off: 0, base, target, macros, errors: Vec::new() }
    }

    fn run(mut self, macro_body: bool) -> LexOutput {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token();
            let stop = matches!(tok.kind, TokenKind::Eof | TokenKind::Error);
            tokens.push(tok);
            if stop {
                break;
            }
        }

        let last_kind = tokens.last().map(|t| t.kind);
        if macro_body {
            if last_kind == Some(TokenKind::Eof) {
                tokens.pop();
            }
        } else if let Some(last) = tokens.last().cloned() {
            tokens.extend(std::iter::repeat(last).take(LOOKAHEAD_PADDING));
        }
        trace!("lexed {} tokens, {} diagnostics", tokens.len(), self.errors.len());
        LexOutput { tokens, errors: self.errors }
    }

    /* ────────── Primitives ────────── */

    #[inline]
    fn pos_at(&self, off: usize) -> Pos {
        Pos::from_usize(self.base + off)
    }

    #[inline]
    fn peek(&self) -> Option<char> {
        self.src[self.off..].chars().next()
    }

    #[inline]
    fn peek2(&self) -> Option<char> {
        self.src[self.off..].chars().nth(1)
    }

    #[inline]
    fn peek_byte_at(&self, ahead: usize) -> Option<u8> {
        self.src.as_bytes().get(self.off + ahead).copied()
    }

    #[inline]
    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.off += c.len_utf8();
        Some(c)
    }

    fn consume_while(&mut self, mut p: impl FnMut(char) -> bool) -> &'s str {
        let src = self.src;
        let start = self.off;
        while let Some(c) = self.peek() {
            if !p(c) {
                break;
            }
            self.off += c.len_utf8();
        }
        &src[start..self.off]
    }

    fn error(&mut self, off: usize, kind: LexErrorKind) {
        let pos = self.pos_at(off);
        self.errors.push(LexError::new(pos, kind));
    }

    fn simple(&mut self, kind: TokenKind, width: usize) -> Token {
        let pos = self.pos_at(self.off);
        self.off += width;
        Token::new(kind, pos)
    }

    fn constant(&self, value: ConstantValue, off: usize) -> Token {
        Token::constant(ConstantToken { value, is_bool: false, name: None }, self.pos_at(off))
    }

    fn halt(&mut self, off: usize, kind: LexErrorKind) -> Token {
        self.error(off, kind);
        Token::new(TokenKind::Error, self.pos_at(off))
    }

    /* ────────── Blancs et commentaires ────────── */

    fn skip_whitespace(&mut self) {
        loop {
            self.consume_while(char::is_whitespace);
            if self.peek() != Some('/') {
                return;
            }
            match self.peek_byte_at(1) {
                Some(b'/') => {
                    self.off += 2;
                    self.consume_while(|c| c != '\n');
                }
                Some(b'*') => {
                    self.off += 2;
                    match self.src[self.off..].find("*/") {
                        Some(end) => self.off += end + 2,
                        None => self.off = self.src.len(),
                    }
                }
                _ => return,
            }
        }
    }

    /* ────────── Jeton suivant ────────── */

    fn next_token(&mut self) -> Token {
        self.skip_whitespace();
        let Some(mut c) = self.peek() else {
            return Token::new(TokenKind::Eof, self.pos_at(self.off));
        };
        let mut lookahead = self.peek2();

        while c == '#' && lookahead.is_some() {
            if let Some(tok) = self.directive() {
                return tok;
            }
            self.skip_whitespace();
            let Some(next) = self.peek() else {
                return Token::new(TokenKind::Eof, self.pos_at(self.off));
            };
            c = next;
            lookahead = self.peek2();
        }

        if is_ident_start(c) {
            return self.identifier();
        }
        if c.is_ascii_digit() {
            if c == '0' && lookahead == Some('x') {
                return self.hex();
            }
            return self.number();
        }
        if c == '$' {
            return self.hex();
        }
        if c == '.' && lookahead.is_some_and(|d| d.is_ascii_digit()) {
            return self.number();
        }

        if self.target.is_gms2() {
            if c == '@' && matches!(lookahead, Some('"' | '\'')) {
                self.off += 1;
                return self.verbatim_string();
            }
            if c == '"' {
                return self.string();
            }
        } else if c == '"' || c == '\'' {
            return self.verbatim_string();
        }

        self.operator(c, lookahead)
    }

    fn operator(&mut self, c: char, la: Option<char>) -> Token {
        use TokenKind as K;
        match (c, la) {
            ('{', _) => self.simple(K::Begin, 1),
            ('}', _) => self.simple(K::End, 1),
            ('(', _) => self.simple(K::Open, 1),
            (')', _) => self.simple(K::Close, 1),
            (',', _) => self.simple(K::Comma, 1),
            ('.', _) => self.simple(K::Dot, 1),
            (';', _) => self.simple(K::Semicolon, 1),
            (']', _) => self.simple(K::ArrayClose, 1),
            ('~', _) => self.simple(K::BitNegate, 1),

            ('=', Some('=')) => self.simple(K::Equal, 2),
            ('=', _) => self.simple(K::Assign, 1),
            ('+', Some('+')) => self.simple(K::Increment, 2),
            ('+', Some('=')) => self.simple(K::AssignPlus, 2),
            ('+', _) => self.simple(K::Plus, 1),
            ('-', Some('-')) => self.simple(K::Decrement, 2),
            ('-', Some('=')) => self.simple(K::AssignMinus, 2),
            ('-', _) => self.simple(K::Minus, 1),
            ('*', Some('=')) => self.simple(K::AssignTimes, 2),
            ('*', _) => self.simple(K::Times, 1),
            ('/', Some('=')) => self.simple(K::AssignDivide, 2),
            ('/', _) => self.simple(K::Divide, 1),
            ('!', Some('=')) => self.simple(K::NotEqual, 2),
            ('!', _) => self.simple(K::Not, 1),
            (':', Some('=')) => self.simple(K::Assign, 2),
            (':', _) => self.simple(K::Colon, 1),

            ('[', Some('|')) => self.simple(K::ArrayListOpen, 2),
            ('[', Some('?')) => self.simple(K::ArrayMapOpen, 2),
            ('[', Some('#')) => self.simple(K::ArrayGridOpen, 2),
            ('[', Some('@')) => self.simple(K::ArrayDirectOpen, 2),
            ('[', Some('$')) => self.simple(K::ArrayStructOpen, 2),
            ('[', _) => self.simple(K::ArrayOpen, 1),

            ('<', Some('=')) => self.simple(K::LesserEqual, 2),
            ('<', Some('<')) => self.simple(K::BitShiftLeft, 2),
            ('<', Some('>')) => self.simple(K::NotEqual, 2),
            ('<', _) => self.simple(K::Lesser, 1),
            ('>', Some('=')) => self.simple(K::GreaterEqual, 2),
            ('>', Some('>')) => self.simple(K::BitShiftRight, 2),
            ('>', _) => self.simple(K::Greater, 1),

            ('?', Some('?')) if self.peek_byte_at(2) == Some(b'=') => {
                self.simple(K::AssignNullCoalesce, 3)
            }
            ('?', Some('?')) => self.simple(K::NullCoalesce, 2),
            ('?', _) => self.simple(K::Conditional, 1),

            ('%', Some('=')) => self.simple(K::AssignMod, 2),
            ('%', _) => self.simple(K::Mod, 1),
            ('&', Some('&')) => self.simple(K::And, 2),
            ('&', Some('=')) => self.simple(K::AssignAnd, 2),
            ('&', _) => self.simple(K::BitAnd, 1),
            ('|', Some('|')) => self.simple(K::Or, 2),
            ('|', Some('=')) => self.simple(K::AssignOr, 2),
            ('|', _) => self.simple(K::BitOr, 1),
            ('^', Some('^')) => self.simple(K::Xor, 2),
            ('^', Some('=')) => self.simple(K::AssignXor, 2),
            ('^', _) => self.simple(K::BitXor, 1),

            (other, _) => {
                let at = self.off;
                self.off += other.len_utf8();
                self.halt(at, LexErrorKind::InvalidToken)
            }
        }
    }

    /* ────────── Directives ────────── */

    /// Traite une directive `#…`. Rend un jeton quand la directive est un
    /// littéral couleur, `None` sinon.
    fn directive(&mut self) -> Option<Token> {
        let start = self.off;
        self.off += 1;
        let first = self.bump()?;
        let rest = self.consume_while(|c| !c.is_whitespace());
        let mut name = String::with_capacity(rest.len() + 1);
        name.push(first);
        name.push_str(rest);

        match name.as_str() {
            "macro" => {
                self.bump();
                let macro_name = self.consume_while(|c| !c.is_whitespace()).to_owned();
                self.bump();
                let body_start = self.off;
                let content = self.macro_content();
                self.register_macro(macro_name, &content, start, body_start);
                None
            }
            "region" | "endregion" => {
                self.consume_while(|c| c != '\n');
                None
            }
            _ => {
                if let Some(value) = colour_literal(&name) {
                    return Some(self.constant(value, start));
                }
                self.error(start, LexErrorKind::UnrecognizedDirective(name));
                None
            }
        }
    }

    /// Contenu d'une macro jusqu'à la fin de ligne ; `\` suivi d'espaces puis
    /// d'un saut de ligne efface ce saut.
    fn macro_content(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            if c == '\\' && self.off + 1 < self.src.len() {
                let after = self.off + 1;
                let found = self.src[after..]
                    .char_indices()
                    .find(|&(_, ch)| !(ch.is_whitespace() && ch != '\n'));
                if let Some((k, '\n')) = found {
                    self.off = after + k + 1;
                    continue;
                }
            }
            out.push(c);
            self.off += c.len_utf8();
        }
        out
    }

    fn register_macro(&mut self, name: String, content: &str, start: usize, body_start: usize) {
        if self.macros.contains(&name) {
            self.error(start, LexErrorKind::DuplicateMacro(name));
            return;
        }
        let body = Scanner::new(content, self.base + body_start, self.target, &mut *self.macros).run(true);
        self.errors.extend(body.errors);
        debug!("macro \"{name}\" registered ({} tokens)", body.tokens.len());
        self.macros.insert(name, body.tokens);
    }

    /* ────────── Identifiants ────────── */

    fn identifier(&mut self) -> Token {
        let start = self.off;
        let text = self.consume_while(is_ident_continue);
        let pos = self.pos_at(start);
        TokenKind::keyword(text).map_or_else(
            || Token {
                kind: TokenKind::Identifier,
                pos,
                value: TokenValue::Identifier(text.to_owned()),
            },
            |kind| Token::new(kind, pos),
        )
    }

    /* ────────── Nombres ────────── */

    fn number(&mut self) -> Token {
        let start = self.off;
        let text = self.consume_while(|c| c.is_ascii_digit() || c == '.');
        match parse_decimal(text) {
            Some(value) => self.constant(value, start),
            None => self.halt(start, LexErrorKind::InvalidNumber(text.to_owned())),
        }
    }

    fn hex(&mut self) -> Token {
        let start = self.off;
        self.off += 1;
        if self.peek() == Some('x') {
            self.off += 1;
        }
        let digits = self.consume_while(|c| c.is_ascii_hexdigit());
        match parse_hex(digits) {
            Some(value) => self.constant(value, start),
            None => self.halt(start, LexErrorKind::InvalidHex(digits.to_owned())),
        }
    }

    /* ────────── Chaînes ────────── */

    fn verbatim_string(&mut self) -> Token {
        let start = self.off;
        let Some(quote) = self.bump() else {
            return self.constant(ConstantValue::String(String::new()), start);
        };
        let mut out = String::new();
        let mut finished = false;
        while let Some(c) = self.bump() {
            if c == quote {
                finished = true;
                break;
            }
            out.push(c);
        }
        if !finished {
            self.error(start, LexErrorKind::UnenclosedString);
        }
        self.constant(ConstantValue::String(out), start)
    }

    fn string(&mut self) -> Token {
        let start = self.off;
        self.off += 1;
        let mut out = String::new();
        let mut finished = false;

        while let Some(c) = self.peek() {
            match c {
                '"' => {
                    self.off += 1;
                    finished = true;
                    break;
                }
                '\\' => {
                    self.off += 1;
                    if let Some(e) = self.bump() {
                        self.escape(e, start, &mut out);
                    }
                }
                '\n' => {
                    self.error(start, LexErrorKind::RawNewline);
                    self.off += 1;
                }
                _ => {
                    out.push(c);
                    self.off += c.len_utf8();
                }
            }
        }

        if !finished {
            self.error(start, LexErrorKind::UnenclosedString);
        }
        self.constant(ConstantValue::String(out), start)
    }

    fn escape(&mut self, e: char, start: usize, out: &mut String) {
        match e {
            '\n' => {}
            'a' => out.push('\u{07}'),
            'b' => out.push('\u{08}'),
            'f' => out.push('\u{0C}'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\u{0B}'),
            'u' => {
                let (value, read) = self.radix_digits(16, 6);
                if read > 0 {
                    match char::from_u32(value) {
                        Some(ch) => out.push(ch),
                        None => self.error(start, LexErrorKind::UnicodeRange),
                    }
                }
            }
            'x' => {
                let (value, read) = self.radix_digits(16, 2);
                match char::from_u32(value) {
                    Some(ch) if read == 2 => out.push(ch),
                    _ => self.error(start, LexErrorKind::HexEscape),
                }
            }
            '0'..='7' => {
                let (rest, read) = self.radix_digits(8, 2);
                let value = (u32::from(e) - u32::from('0')) * 8u32.pow(u32::try_from(read).unwrap_or(0)) + rest;
                match char::from_u32(value) {
                    Some(ch) if read == 2 => out.push(ch),
                    _ => self.error(start, LexErrorKind::OctalEscape),
                }
            }
            other => out.push(other),
        }
    }

    /// Lit au plus `max` chiffres dans la base `radix`. Rend (valeur, nombre lu).
    fn radix_digits(&mut self, radix: u32, max: usize) -> (u32, usize) {
        let mut value = 0u32;
        let mut read = 0;
        while read < max {
            let Some(d) = self.peek().and_then(|c| c.to_digit(radix)) else { break };
            value = value * radix + d;
            self.off += 1;
            read += 1;
        }
        (value, read)
    }
}

/* ─────────────────────────── Littéraux ─────────────────────────── */

/// Décimal : entier exact en double → `Number`, entier i64 non exact → `Int64`,
/// sinon flottant.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn parse_decimal(text: &str) -> Option<ConstantValue> {
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
    if let Ok(v) = text.parse::<i64>() {
        let d = v as f64;
        if d < TWO_POW_63 && d as i64 == v {
            return Some(ConstantValue::Number(d));
        }
        return Some(ConstantValue::Int64(v));
    }
    text.parse::<f64>().ok().map(ConstantValue::Number)
}

/// Hexadécimal non signé (64 bits) ; tient dans un i32 → `Number`, sinon `Int64`.
#[allow(clippy::cast_possible_wrap)]
fn parse_hex(digits: &str) -> Option<ConstantValue> {
    let bits = u64::from_str_radix(digits, 16).ok()?;
    let v = bits as i64;
    Some(match i32::try_from(v) {
        Ok(small) => ConstantValue::Number(f64::from(small)),
        Err(_) => ConstantValue::Int64(v),
    })
}

/// `RRGGBB[AA]` → valeur de `BBGGRR[AA]`.
fn colour_literal(name: &str) -> Option<ConstantValue> {
    if !(name.len() == 6 || name.len() == 8) || !name.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let mut swapped = String::with_capacity(name.len());
    swapped.push_str(&name[4..6]);
    swapped.push_str(&name[2..4]);
    swapped.push_str(&name[0..2]);
    if name.len() == 8 {
        swapped.push_str(&name[6..8]);
    }
    parse_hex(&swapped)
}

/* ─────────────────────────── Tests ─────────────────────────── */
#[cfg(test)]
mod tests {
    use super::*;
    use gmlc_core::GameVersion;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn lex23(src: &str) -> LexOutput {
        lex(src, &Target::default(), &mut MacroTable::new())
    }

    fn kinds(out: &LexOutput) -> Vec<TokenKind> {
        out.tokens.iter().map(|t| t.kind).take_while(|k| *k != TokenKind::Eof).collect()
    }

    fn constant(t: &Token) -> Option<&ConstantValue> {
        match &t.value {
            TokenValue::Constant(c) => Some(&c.value),
            _ => None,
        }
    }

    #[test]
    fn operators_are_greedy() {
        use TokenKind as K;
        let out = lex23("a ??= b ?? c <> d := e << 1 [| [? [# [@ [$ ] ^^ &= ++");
        assert_eq!(
            kinds(&out),
            vec![
                K::Identifier, K::AssignNullCoalesce, K::Identifier, K::NullCoalesce, K::Identifier,
                K::NotEqual, K::Identifier, K::Assign, K::Identifier, K::BitShiftLeft, K::Constant,
                K::ArrayListOpen, K::ArrayMapOpen, K::ArrayGridOpen, K::ArrayDirectOpen,
                K::ArrayStructOpen, K::ArrayClose, K::Xor, K::AssignAnd, K::Increment,
            ]
        );
    }

    #[test]
    fn keywords_and_word_operators() {
        use TokenKind as K;
        let out = lex23("begin end not mod div and or xor repeat constructor foo");
        assert_eq!(
            kinds(&out),
            vec![K::Begin, K::End, K::Not, K::Mod, K::Div, K::And, K::Or, K::Xor, K::Repeat, K::Constructor, K::Identifier]
        );
    }

    #[test]
    fn comments_are_skipped() {
        let out = lex23("a // line\n/* block */ b /* open");
        assert_eq!(kinds(&out), vec![TokenKind::Identifier, TokenKind::Identifier]);
        assert!(out.errors.is_empty());
    }

    #[test]
    fn stream_is_padded_with_last_token() {
        let out = lex23("x");
        assert_eq!(out.tokens.len(), 2 + LOOKAHEAD_PADDING);
        assert!(out.tokens[1..].iter().all(|t| t.kind == TokenKind::Eof));
    }

    #[test]
    fn invalid_token_halts_stream() {
        let out = lex23("a ` b c");
        assert_eq!(out.tokens.len(), 2 + LOOKAHEAD_PADDING);
        assert_eq!(out.tokens[1].kind, TokenKind::Error);
        assert_eq!(out.tokens.last().map(|t| t.kind), Some(TokenKind::Error));
        assert_eq!(out.errors, vec![LexError::new(Pos(2), LexErrorKind::InvalidToken)]);
        assert!(out.halted());
    }

    #[test]
    fn number_kinds() {
        let out = lex23("32767 9007199254740993 1.5 .25 9223372036854775807 $FF 0xFFFFFFFF 0x7fffffff");
        let values: Vec<_> = out.tokens.iter().filter_map(constant).cloned().collect();
        assert_eq!(
            values,
            vec![
                ConstantValue::Number(32767.0),
                ConstantValue::Int64(9_007_199_254_740_993),
                ConstantValue::Number(1.5),
                ConstantValue::Number(0.25),
                ConstantValue::Int64(i64::MAX),
                ConstantValue::Number(255.0),
                ConstantValue::Int64(0xFFFF_FFFF),
                ConstantValue::Number(2_147_483_647.0),
            ]
        );
    }

    #[test]
    fn bad_numbers_halt() {
        let out = lex23("x = 1.2.3;");
        assert_eq!(out.errors[0].kind, LexErrorKind::InvalidNumber("1.2.3".into()));
        assert!(out.halted());
        let out = lex23("$");
        assert_eq!(out.errors[0].kind, LexErrorKind::InvalidHex(String::new()));
    }

    #[test]
    fn colour_directive_is_byte_swapped() {
        let out = lex23("#FF0000");
        assert_eq!(constant(&out.tokens[0]), Some(&ConstantValue::Number(f64::from(0x0000_FF))));
        let out = lex23("#FF000080");
        assert_eq!(constant(&out.tokens[0]), Some(&ConstantValue::Number(f64::from(0x0000_FF80))));
    }

    #[test]
    fn unknown_directive_is_reported_and_skipped() {
        let out = lex23("#macr0 X 1\n#region stuff\nx");
        assert_eq!(out.errors, vec![LexError::new(Pos(0), LexErrorKind::UnrecognizedDirective("macr0".into()))]);
        // le reste de la ligne est relexé
        assert_eq!(out.tokens[0].name(), Some("X"));
        assert_eq!(out.tokens[2].name(), Some("x"));
    }

    #[test]
    fn macro_body_is_lexed_and_registered() {
        let mut macros = MacroTable::new();
        let out = lex("#macro FOO 1+2\nFOO;", &Target::default(), &mut macros);
        assert_eq!(kinds(&out), vec![TokenKind::Identifier, TokenKind::Semicolon]);
        let body: Vec<_> = macros.get("FOO").unwrap_or_default().iter().map(|t| t.kind).collect();
        assert_eq!(body, vec![TokenKind::Constant, TokenKind::Plus, TokenKind::Constant]);
    }

    #[test]
    fn macro_continuation_and_duplicates() {
        let mut macros = MacroTable::new();
        let out = lex("#macro A 1 + \\  \n 2\n#macro A 3\n", &Target::default(), &mut macros);
        assert_eq!(macros.get("A").map(<[Token]>::len), Some(3));
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].kind, LexErrorKind::DuplicateMacro("A".into()));
    }

    #[test]
    fn string_escapes() {
        let out = lex23(r#""a\nb\x41\101\u263A\q""#);
        assert!(out.errors.is_empty());
        assert_eq!(constant(&out.tokens[0]), Some(&ConstantValue::String("a\nbAA\u{263A}q".into())));
    }

    #[test]
    fn bad_escapes_are_reported() {
        let out = lex23(r#""\xZ" "\12" "\uD800""#);
        let kinds: Vec<_> = out.errors.iter().map(|e| e.kind.clone()).collect();
        assert_eq!(kinds, vec![LexErrorKind::HexEscape, LexErrorKind::OctalEscape, LexErrorKind::UnicodeRange]);
    }

    #[test]
    fn raw_newline_and_unenclosed() {
        let out = lex23("\"ab\ncd");
        let kinds: Vec<_> = out.errors.iter().map(|e| e.kind.clone()).collect();
        assert_eq!(kinds, vec![LexErrorKind::RawNewline, LexErrorKind::UnenclosedString]);
        assert_eq!(constant(&out.tokens[0]), Some(&ConstantValue::String("abcd".into())));
    }

    #[test]
    fn verbatim_strings_by_version() {
        let out = lex23(r#"@"C:\dir" @'it"s'"#);
        assert_eq!(constant(&out.tokens[0]), Some(&ConstantValue::String(r"C:\dir".into())));
        assert_eq!(constant(&out.tokens[1]), Some(&ConstantValue::String("it\"s".into())));

        let gms1 = Target::for_version(GameVersion::Gms1);
        let out = lex(r#"'a\n' "b""#, &gms1, &mut MacroTable::new());
        assert_eq!(constant(&out.tokens[0]), Some(&ConstantValue::String(r"a\n".into())));
        assert_eq!(constant(&out.tokens[1]), Some(&ConstantValue::String("b".into())));

        // `'` seul n'ouvre pas de chaîne en GMS2
        assert!(lex23("'a'").halted());
    }

    #[test]
    fn macro_body_has_no_eof() {
        let out = lex_macro_body("1 + 2", &Target::default(), &mut MacroTable::new());
        assert_eq!(out.tokens.len(), 3);
    }

    proptest! {
        #[test]
        fn lexer_never_panics(src in "\\PC{0,64}") {
            let out = lex23(&src);
            prop_assert!(out.tokens.len() > LOOKAHEAD_PADDING);
            let last = out.tokens.last().map(|t| t.kind);
            prop_assert!(matches!(last, Some(TokenKind::Eof | TokenKind::Error)));
        }
    }
}
