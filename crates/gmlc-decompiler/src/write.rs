//! Écriture du texte GML d'un [`Program`] nettoyé.
//!
//! Accolades Allman, indentation de quatre espaces. Le texte produit se
//! recompile vers le même bytecode autant que possible : paramètres écrits
//! `argument0..N`, `self.` devant un membre homonyme d'un local, `static.`
//! devant un statique lu avant sa déclaration.

use std::collections::HashSet;
use std::fmt::Write as _;

use gmlc_core::{AssetKind, AssetTable, DataType, InstanceType, Opcode, Target};

use crate::ast::{AssignKind, Ast, Instance, Node, NodeId, Program, VariableNode};

const INDENT: &str = "    ";

/// Texte source de `program`.
#[must_use]
pub fn write_program(program: &Program, target: &Target, assets: &AssetTable) -> String {
    let mut w = Writer { ast: &program.ast, target, assets, out: String::new(), indent: 0, scopes: Vec::new() };
    w.enter(program.root, &program.preamble);
    w.preamble(&program.preamble);
    w.statements(program.root);
    w.scopes.pop();
    w.out
}

/* ─────────────────────────── Précédences ─────────────────────────── */

const P_CONDITIONAL: u8 = 1;
const P_OR: u8 = 3;
const P_AND: u8 = 4;
const P_XOR: u8 = 5;
const P_BIT_OR: u8 = 6;
const P_BIT_XOR: u8 = 7;
const P_BIT_AND: u8 = 8;
const P_COMPARE: u8 = 9;
const P_SHIFT: u8 = 10;
const P_ADD: u8 = 11;
const P_MUL: u8 = 12;
const P_UNARY: u8 = 13;
const P_PRIMARY: u8 = 14;

fn logical(left: DataType, right: DataType) -> bool {
    left == DataType::Boolean && right == DataType::Boolean
}

/// Opérateur source et précédence d'un nœud binaire. Sur une cible à
/// court-circuit, un `or` booléen sans branchement ne vient que de `^^`.
fn binary_operator(opcode: Opcode, left: DataType, right: DataType, short_circuit: bool) -> (&'static str, u8) {
    match opcode {
        Opcode::Mul => ("*", P_MUL),
        Opcode::Div => ("/", P_MUL),
        Opcode::Rem => ("div", P_MUL),
        Opcode::Mod => ("%", P_MUL),
        Opcode::Add => ("+", P_ADD),
        Opcode::Sub => ("-", P_ADD),
        Opcode::Shl => ("<<", P_SHIFT),
        Opcode::Shr => (">>", P_SHIFT),
        Opcode::And if logical(left, right) => ("&&", P_AND),
        Opcode::And => ("&", P_BIT_AND),
        Opcode::Or if logical(left, right) && short_circuit => ("^^", P_XOR),
        Opcode::Or if logical(left, right) => ("||", P_OR),
        Opcode::Or => ("|", P_BIT_OR),
        Opcode::Xor => ("^", P_BIT_XOR),
        _ => ("?", P_COMPARE),
    }
}

fn precedence(ast: &Ast, id: NodeId, short_circuit: bool) -> u8 {
    match ast.get(id) {
        Node::Conditional { .. } => P_CONDITIONAL,
        Node::ShortCircuit { and: true, .. } => P_AND,
        Node::ShortCircuit { and: false, .. } => P_OR,
        Node::Binary { comparison: Some(_), .. } => P_COMPARE,
        Node::Binary { opcode, left_type, right_type, .. } => {
            binary_operator(*opcode, *left_type, *right_type, short_circuit).1
        }
        Node::Unary { .. } | Node::Assign { kind: AssignKind::Prefix { .. }, .. } => P_UNARY,
        Node::Int16 { value, .. } if *value < 0 => P_UNARY,
        Node::Int32(v) if *v < 0 => P_UNARY,
        Node::Int64(v) if *v < 0 => P_UNARY,
        Node::Double(v) if v.is_sign_negative() => P_UNARY,
        Node::Float(v) if v.is_sign_negative() => P_UNARY,
        _ => P_PRIMARY,
    }
}

const fn compound_operator(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::Add => "+=",
        Opcode::Sub => "-=",
        Opcode::Mul => "*=",
        Opcode::Div => "/=",
        Opcode::Mod => "%=",
        Opcode::And => "&=",
        Opcode::Or => "|=",
        Opcode::Xor => "^=",
        _ => "=",
    }
}

/* ─────────────────────────── Chaînes ─────────────────────────── */

/// Littéral GMS2 : échappements `\n`, `\xHH`, …
fn escaped(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{07}' => out.push_str("\\a"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\u{0B}' => out.push_str("\\v"),
            c if u32::from(c) < 0x20 || c == '\u{7F}' => {
                let _ = write!(out, "\\x{:02X}", u32::from(c));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Littéral GMS1 : pas d'échappement, guillemets simples si besoin, et
/// concaténation quand la chaîne contient les deux.
fn raw(s: &str) -> String {
    if !s.contains('"') {
        return format!("\"{s}\"");
    }
    if !s.contains('\'') {
        return format!("'{s}'");
    }
    let parts: Vec<String> = s.split('"').map(|p| format!("\"{p}\"")).collect();
    format!("({})", parts.join(" + '\"' + "))
}

/* ─────────────────────────── Portées ─────────────────────────── */

#[derive(Debug, Default)]
struct Scope {
    /// Noms locaux de la fonction.
    locals: HashSet<String>,
    /// Statiques déjà déclarés, dans l'ordre d'écriture.
    statics: HashSet<String>,
}

/// Locaux d'une portée : préambule, accès `local`, variables de `catch`.
fn scope_locals(ast: &Ast, body: NodeId, preamble: &[String]) -> HashSet<String> {
    let mut out: HashSet<String> = preamble.iter().cloned().collect();
    let mut seen = HashSet::new();
    let mut stack = vec![body];
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        match ast.get(id) {
            Node::Function { .. } if id != body => continue,
            Node::Variable(v) if v.instance == Instance::Fixed(InstanceType::LOCAL) => {
                out.insert(v.name.clone());
            }
            Node::Try { catch: Some((name, _)), .. } => {
                out.insert(name.clone());
            }
            _ => {}
        }
        stack.extend(ast.children(id));
    }
    out
}

/* ─────────────────────────── Écrivain ─────────────────────────── */

struct Writer<'a> {
    ast: &'a Ast,
    target: &'a Target,
    assets: &'a AssetTable,
    out: String,
    indent: usize,
    scopes: Vec<Scope>,
}

impl Writer<'_> {
    fn enter(&mut self, body: NodeId, preamble: &[String]) {
        let locals = scope_locals(self.ast, body, preamble);
        self.scopes.push(Scope { locals, statics: HashSet::new() });
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn preamble(&mut self, names: &[String]) {
        if !names.is_empty() {
            self.line(&format!("var {};", names.join(", ")));
        }
    }

    /// Instructions d'un bloc, sans accolades.
    fn statements(&mut self, block: NodeId) {
        match self.ast.get(block) {
            Node::Block(items) => {
                for &item in items {
                    self.statement(item);
                }
            }
            _ => self.statement(block),
        }
    }

    /// Bloc entre accolades, au niveau courant.
    fn block(&mut self, block: NodeId) {
        self.line("{");
        self.indent += 1;
        self.statements(block);
        self.indent -= 1;
        self.line("}");
    }

    fn statement(&mut self, id: NodeId) {
        let ast = self.ast;
        match ast.get(id) {
            Node::Block(_) => self.block(id),
            Node::Assign { .. } => {
                let text = self.assignment(id);
                self.line(&format!("{text};"));
            }
            Node::Break => self.line("break;"),
            Node::Continue => self.line("continue;"),
            Node::Exit => self.line("exit;"),
            Node::Return(v) => {
                let v = self.expr(*v);
                self.line(&format!("return {v};"));
            }
            Node::Throw(v) => {
                let v = self.expr(*v);
                self.line(&format!("throw {v};"));
            }
            Node::If { .. } => self.if_statement(id, ""),
            Node::While { cond: Some(cond), body, .. } => {
                let cond = self.expr(*cond);
                self.line(&format!("while ({cond})"));
                self.block(*body);
            }
            Node::While { cond: None, body, .. } => {
                self.line("for (;;)");
                self.block(*body);
            }
            Node::For { init, cond, step, body } => {
                let init = init.map(|i| self.assignment(i)).unwrap_or_default();
                let cond = cond.map(|c| self.expr(c)).unwrap_or_default();
                let step = step.map(|s| self.assignment(s)).unwrap_or_default();
                let header = format!("for ({init}; {cond}; {step})");
                self.line(header.trim_end());
                self.block(*body);
            }
            Node::DoUntil { body, cond } => {
                self.line("do");
                self.block(*body);
                let cond = self.expr(*cond);
                self.line(&format!("until ({cond});"));
            }
            Node::Repeat { count, body } => {
                let count = self.expr(*count);
                self.line(&format!("repeat ({count})"));
                self.block(*body);
            }
            Node::With { target, body } => {
                let target = self.expr(*target);
                self.line(&format!("with ({target})"));
                self.block(*body);
            }
            Node::Switch { value, body } => {
                let value = self.expr(*value);
                self.line(&format!("switch ({value})"));
                self.line("{");
                self.indent += 1;
                for &item in body {
                    match ast.get(item) {
                        Node::SwitchCase(v) => {
                            let v = self.expr(*v);
                            self.line(&format!("case {v}:"));
                        }
                        Node::SwitchDefault => self.line("default:"),
                        _ => {
                            self.indent += 1;
                            self.statement(item);
                            self.indent -= 1;
                        }
                    }
                }
                self.indent -= 1;
                self.line("}");
            }
            Node::SwitchCase(v) => {
                let v = self.expr(*v);
                self.line(&format!("case {v}:"));
            }
            Node::SwitchDefault => self.line("default:"),
            Node::Try { body, catch, finally } => {
                self.line("try");
                self.block(*body);
                if let Some((name, block)) = catch {
                    self.line(&format!("catch ({name})"));
                    self.block(*block);
                }
                if let Some(finally) = finally {
                    self.line("finally");
                    self.block(*finally);
                }
            }
            Node::Static(items) => {
                let decls: Vec<String> = items.iter().map(|&item| self.static_declarator(item)).collect();
                self.line(&format!("static {};", decls.join(", ")));
            }
            Node::Function { named: true, .. } => {
                let text = self.function(id);
                self.out.push_str(&INDENT.repeat(self.indent));
                self.out.push_str(&text);
                self.out.push('\n');
            }
            _ => {
                let text = self.expr(id);
                self.line(&format!("{text};"));
            }
        }
    }

    fn if_statement(&mut self, id: NodeId, prefix: &str) {
        let Node::If { cond, then, otherwise, else_if } = *self.ast.get(id) else { return };
        let cond = self.expr(cond);
        self.line(&format!("{prefix}if ({cond})"));
        self.block(then);
        let Some(otherwise) = otherwise else { return };
        match self.ast.get(otherwise) {
            Node::Block(items) if else_if && items.len() == 1 => self.if_statement(items[0], "else "),
            _ => {
                self.line("else");
                self.block(otherwise);
            }
        }
    }

    fn static_declarator(&mut self, item: NodeId) -> String {
        let (name, value) = match self.ast.get(item) {
            Node::Assign { target, value, .. } => (self.ast.variable(*target).map(|v| v.name.clone()), Some(*value)),
            Node::Variable(v) => (Some(v.name.clone()), None),
            _ => (None, None),
        };
        let name = name.unwrap_or_default();
        let text = match value {
            Some(v) => format!("{name} = {}", self.expr(v)),
            None => name.clone(),
        };
        if let Some(scope) = self.scopes.last_mut() {
            scope.statics.insert(name);
        }
        text
    }

    /// Affectation sans `;` (instruction, initialisation ou pas de `for`).
    fn assignment(&mut self, id: NodeId) -> String {
        let Node::Assign { target, value, kind, declare, .. } = *self.ast.get(id) else {
            return self.expr(id);
        };
        let t = self.expr(target);
        match kind {
            AssignKind::Normal => {
                let v = self.expr(value);
                if declare {
                    format!("var {t} = {v}")
                } else {
                    format!("{t} = {v}")
                }
            }
            AssignKind::Compound(op) => format!("{t} {} {}", compound_operator(op), self.expr(value)),
            AssignKind::Prefix { increment: true } => format!("++{t}"),
            AssignKind::Prefix { increment: false } => format!("--{t}"),
            AssignKind::Postfix { increment: true } => format!("{t}++"),
            AssignKind::Postfix { increment: false } => format!("{t}--"),
        }
    }

    /// `function nom(argument0, …) constructor` suivi de son bloc.
    fn function(&mut self, id: NodeId) -> String {
        let Node::Function { child, argument_count, constructor, body, named, preamble } = self.ast.get(id) else {
            return String::new();
        };
        let params: Vec<String> = (0..*argument_count).map(|k| format!("argument{k}")).collect();
        let mut text = String::from("function");
        if *named {
            let _ = write!(text, " {child}");
        }
        let _ = write!(text, "({})", params.join(", "));
        if *constructor {
            text.push_str(" constructor");
        }
        text.push('\n');

        let saved = std::mem::take(&mut self.out);
        self.enter(*body, preamble);
        self.line("{");
        self.indent += 1;
        self.preamble(preamble);
        self.statements(*body);
        self.indent -= 1;
        self.line("}");
        self.scopes.pop();
        let block = std::mem::replace(&mut self.out, saved);
        text.push_str(block.trim_end_matches('\n'));
        text
    }

    /* ─────────── Expressions ─────────── */

    /// Opérande entouré de parenthèses si sa précédence l'exige.
    fn operand(&mut self, id: NodeId, min: u8) -> String {
        let text = self.expr(id);
        if precedence(self.ast, id, self.target.short_circuit) < min {
            format!("({text})")
        } else {
            text
        }
    }

    fn expr(&mut self, id: NodeId) -> String {
        let ast = self.ast;
        match ast.get(id) {
            Node::Int16 { value, .. } => value.to_string(),
            Node::Int32(v) => v.to_string(),
            Node::Int64(v) => v.to_string(),
            Node::Float(v) => v.to_string(),
            Node::Double(v) => v.to_string(),
            Node::String(s) if self.target.is_gms2() => escaped(s),
            Node::String(s) => raw(s),
            Node::Boolean(b) => b.to_string(),
            Node::Constant(name) | Node::FunctionRef(name) => name.clone(),
            Node::TypeInst(inst) => self.instance_name(*inst),
            Node::Variable(v) => self.variable(v),
            Node::Binary { opcode, comparison, left, right, left_type, right_type } => {
                let (op, p) = match comparison {
                    Some(c) => (c.symbol(), P_COMPARE),
                    None => binary_operator(*opcode, *left_type, *right_type, self.target.short_circuit),
                };
                let l = self.operand(*left, p);
                let r = self.operand(*right, p + 1);
                format!("{l} {op} {r}")
            }
            Node::Unary { opcode, operand, ty } => {
                let op = match opcode {
                    Opcode::Neg => "-",
                    Opcode::Not if *ty == DataType::Boolean => "!",
                    _ => "~",
                };
                let text = self.operand(*operand, P_UNARY);
                if text.starts_with(['-', '+', '!', '~']) {
                    format!("{op}({text})")
                } else {
                    format!("{op}{text}")
                }
            }
            Node::ShortCircuit { and, operands } => {
                let (op, p) = if *and { (" && ", P_AND) } else { (" || ", P_OR) };
                let parts: Vec<String> = operands.iter().map(|&o| self.operand(o, p + 1)).collect();
                parts.join(op)
            }
            Node::Conditional { cond, then, otherwise } => {
                let c = self.operand(*cond, P_CONDITIONAL + 1);
                let a = self.operand(*then, P_CONDITIONAL + 1);
                let b = self.operand(*otherwise, P_CONDITIONAL + 1);
                format!("{c} ? {a} : {b}")
            }
            Node::Call { name, args } => {
                let args = self.arguments(args);
                format!("{name}({args})")
            }
            Node::CallVar { function, args, .. } => {
                let f = self.operand(*function, P_PRIMARY);
                let args = self.arguments(args);
                format!("{f}({args})")
            }
            Node::New { function, args } => {
                let args = self.arguments(args);
                format!("new {function}({args})")
            }
            Node::Struct(fields) => {
                if fields.is_empty() {
                    return "{}".to_owned();
                }
                let parts: Vec<String> = fields.iter().map(|(name, v)| format!("{name}: {}", self.expr(*v))).collect();
                format!("{{ {} }}", parts.join(", "))
            }
            Node::ArrayLiteral(items) => format!("[{}]", self.arguments(items)),
            Node::Function { .. } => self.function(id),
            Node::Assign { .. } => self.assignment(id),
            Node::Exception => "undefined".to_owned(),
            _ => String::new(),
        }
    }

    fn arguments(&mut self, args: &[NodeId]) -> String {
        let parts: Vec<String> = args.iter().map(|&a| self.expr(a)).collect();
        parts.join(", ")
    }

    fn instance_name(&self, inst: InstanceType) -> String {
        if inst.is_object() {
            if let Some(name) = self.assets.name_of(AssetKind::Object, i32::from(inst.0)) {
                return name.to_owned();
            }
            return format!("({})", inst.0);
        }
        inst.to_string()
    }

    fn variable(&mut self, v: &VariableNode) -> String {
        let scope = self.scopes.last();
        let prefix = match v.instance {
            Instance::Fixed(InstanceType::SELF) if scope.is_some_and(|s| s.locals.contains(&v.name)) => "self.".to_owned(),
            Instance::Fixed(InstanceType::SELF | InstanceType::LOCAL | InstanceType::ARGUMENT | InstanceType::BUILTIN) => {
                String::new()
            }
            Instance::Fixed(InstanceType::STATIC) if scope.is_some_and(|s| s.statics.contains(&v.name)) => String::new(),
            Instance::Fixed(inst) => format!("{}.", self.instance_name(inst)),
            Instance::Expr(e) => format!("{}.", self.operand(e, P_PRIMARY)),
        };
        let mut text = prefix + &v.name;
        if v.indices.is_empty() {
            return text;
        }
        let indices: Vec<String> = v.indices.iter().map(|&i| self.expr(i)).collect();
        if self.target.is_gms2_3() {
            for i in indices {
                let _ = write!(text, "[{i}]");
            }
        } else {
            let _ = write!(text, "[{}]", indices.join(", "));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clean::clean;
    use crate::decode::decode_entry;
    use crate::testing::{compile, compile_for};
    use gmlc_core::GameVersion;
    use pretty_assertions::assert_eq;

    fn source_for(target: Target, src: &str) -> String {
        let (entry, tables) = compile_for(target, src);
        let mut program = decode_entry(&entry, &tables).unwrap();
        clean(&mut program, &target, &entry);
        write_program(&program, &target, &tables.assets)
    }

    fn source(src: &str) -> String {
        source_for(Target::default(), src)
    }

    #[test]
    fn precedence_parentheses() {
        assert_eq!(source("a = (b + c) * d;"), "a = (b + c) * d;\n");
        assert_eq!(source("a = b + c * d;"), "a = b + c * d;\n");
        assert_eq!(source("a = b - (c - d);"), "a = b - (c - d);\n");
    }

    #[test]
    fn allman_if_else() {
        assert_eq!(
            source("if (a < 3) { b = 1; } else { b = 2; }"),
            "if (a < 3)\n{\n    b = 1;\n}\nelse\n{\n    b = 2;\n}\n"
        );
    }

    #[test]
    fn compound_and_step_statements() {
        assert_eq!(source("a += 2; b++; c[1] *= 3;"), "a += 2;\nb++;\nc[1] *= 3;\n");
    }

    #[test]
    fn eager_boolean_or_is_xor_under_short_circuit() {
        assert_eq!(source("a = b ^^ c;"), "a = b ^^ c;\n");
        let eager = Target { short_circuit: false, ..Target::default() };
        assert_eq!(source_for(eager, "a = b || c;"), "a = b || c;\n");
    }

    #[test]
    fn locals_keep_the_long_form() {
        assert_eq!(source("var i = 0; i = i * 2; i += 3;"), "var i = 0;\ni = i * 2;\ni = i + 3;\n");
    }

    #[test]
    fn locals_are_declared() {
        assert_eq!(source("var i = 0; var j; x = j + i;"), "var j;\nvar i = 0;\nx = j + i;\n");
    }

    #[test]
    fn member_shadowed_by_local_keeps_self() {
        assert_eq!(source("var k = 1; self.k = k;"), "var k = 1;\nself.k = k;\n");
    }

    #[test]
    fn qualified_access() {
        assert_eq!(source("global.total = other.hp;"), "global.total = other.hp;\n");
    }

    #[test]
    fn escapes_in_gms2_strings() {
        assert_eq!(source("s = \"a\\n\\\"b\";"), "s = \"a\\n\\\"b\";\n");
    }

    #[test]
    fn raw_strings_in_gms1() {
        assert_eq!(source_for(Target::for_version(GameVersion::Gms1), "s = 'say \"hi\"';"), "s = 'say \"hi\"';\n");
    }

    #[test]
    fn raw_string_forms() {
        assert_eq!(raw("plain"), "\"plain\"");
        assert_eq!(raw("a\"b"), "'a\"b'");
        assert_eq!(raw("a\"b'c"), "(\"a\" + '\"' + \"b'c\")");
    }

    #[test]
    fn named_function_and_struct() {
        assert_eq!(
            source("function f(a, b) { return a + b; } v = { k: 1 };"),
            "function f(argument0, argument1)\n{\n    return argument0 + argument1;\n}\nv = { k: 1 };\n"
        );
    }

    #[test]
    fn switch_layout() {
        assert_eq!(
            source("switch (a) { case 1: b = 1; break; default: b = 2; }"),
            "switch (a)\n{\n    case 1:\n        b = 1;\n        break;\n    default:\n        b = 2;\n}\n"
        );
    }

    #[test]
    fn legacy_arrays_use_comma_indices() {
        assert_eq!(source_for(Target::for_version(GameVersion::Gms2), "a[1, 2] = 3;"), "a[1, 2] = 3;\n");
    }

    #[test]
    fn for_loop_header() {
        assert_eq!(
            source("for (i = 0; i < 3; i++) { s += i; }"),
            "for (i = 0; i < 3; i++)\n{\n    s += i;\n}\n"
        );
    }
}
