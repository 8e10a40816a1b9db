//! Réécritures de l'arbre décodé, appliquées une fois avant l'écriture.
//!
//! Ordre des passes :
//! 1. appels internes du runtime (`@@GetInstance@@`, `@@NewGMLObject@@`,
//!    `method` sur une fonction enfant, …) remplacés par leur forme source ;
//! 2. affectations composées, `x++`, indices `i * 32000 + j` d'avant 2.3 ;
//! 3. par liste d'instructions : `function nom()`, `return` par temporaire,
//!    `for` reconstruits depuis `while` ;
//! 4. `continue` en fin de boucle, `else if` ;
//! 5. par portée de fonction : `var` en tête ou à la première affectation,
//!    noms `static` manquants.
//!
//! Relancer [`clean`] sur un arbre nettoyé ne change rien.

use std::collections::HashSet;

use gmlc_builtins::internal::{self, RETURN_TEMP};
use gmlc_core::{CodeEntry, DataType, InstanceType, Opcode, Target, VariableType};
use indexmap::{IndexMap, IndexSet};
use log::{debug, trace};
use smallvec::{smallvec, SmallVec};

use crate::ast::{AssignKind, Ast, Instance, Node, NodeId, Program, StepMark, VariableNode};

/// Nom donné à un `static` vide pour qu'il reste écrivable.
pub const EMPTY_STATIC: &str = "__static_unused";

/// Nettoie `program`, décodé depuis `entry`.
pub fn clean(program: &mut Program, target: &Target, entry: &CodeEntry) {
    map_internals(program);

    let nodes = reachable(&program.ast, program.root);
    for &id in &nodes {
        fold_compound(&mut program.ast, id, target.is_old_format());
        if !target.is_gms2_3() {
            split_pair_index(&mut program.ast, id);
        }
        name_with_target(&mut program.ast, id);
    }
    for &id in &nodes {
        with_list(&mut program.ast, id, |ast, list| {
            fold_named_functions(ast, list);
            elide_return_temp(ast, list);
            recover_for(ast, list);
        });
        fold_trailing_continue(&mut program.ast, id);
        mark_else_if(&mut program.ast, id);
    }

    let (declared, nested) = declare_scope(&mut program.ast, program.root);
    program.preamble = root_preamble(entry, declared);
    let mut pending = nested;
    while let Some(function) = pending.pop() {
        let Node::Function { body, .. } = *program.ast.get(function) else { continue };
        let (scope, nested) = declare_scope(&mut program.ast, body);
        if let Node::Function { preamble, .. } = program.ast.get_mut(function) {
            *preamble = scope.preamble.into_iter().collect();
        }
        pending.extend(nested);
    }
    debug!("{}: cleaned, {} local(s) declared up front", entry.name, program.preamble.len());
}

/// Nœuds atteignables depuis `root`, en pré-ordre, sans doublon.
fn reachable(ast: &Ast, root: NodeId) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        out.push(id);
        stack.extend(ast.children(id).iter().rev());
    }
    out
}

/// Applique `f` à la liste d'instructions d'un bloc ou d'un `switch`.
fn with_list(ast: &mut Ast, id: NodeId, f: impl FnOnce(&mut Ast, &mut Vec<NodeId>)) {
    let mut list = match ast.get_mut(id) {
        Node::Block(items) | Node::Switch { body: items, .. } => std::mem::take(items),
        _ => return,
    };
    f(ast, &mut list);
    if let Node::Block(items) | Node::Switch { body: items, .. } = ast.get_mut(id) {
        *items = list;
    }
}

/* ─────────────────────────── Appels internes ─────────────────────────── */

fn map_internals(program: &mut Program) {
    let Program { ast, root, functions, .. } = program;
    let mut seen = HashSet::new();
    let mut stack = vec![*root];
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        while let Some(node) = internal_call(ast, functions, id) {
            ast.replace(id, node);
        }
        stack.extend(ast.children(id).iter().rev());
    }
}

/// Forme source d'un appel interne, s'il en est un.
fn internal_call(ast: &Ast, functions: &IndexMap<String, NodeId>, id: NodeId) -> Option<Node> {
    let Node::Call { name, args } = ast.get(id) else { return None };
    match (name.as_str(), args.as_slice()) {
        (internal::GET_INSTANCE, [value]) => Some(ast.get(*value).clone()),
        (internal::THIS, []) => Some(Node::TypeInst(InstanceType::SELF)),
        (internal::OTHER, []) => Some(Node::TypeInst(InstanceType::OTHER)),
        (internal::GLOBAL, []) => Some(Node::TypeInst(InstanceType::GLOBAL)),
        (internal::NEW_ARRAY, _) => Some(Node::ArrayLiteral(args.clone())),
        (internal::NEW_OBJECT, [ctor, rest @ ..]) => match ast.get(*ctor) {
            Node::FunctionRef(f) => Some(Node::New { function: f.clone(), args: rest.to_vec() }),
            _ => bound_child(ast, functions, *ctor).and_then(|f| struct_fields(ast, f, rest)),
        },
        (internal::METHOD, _) => bound_child(ast, functions, id).map(|f| ast.get(f).clone()),
        _ => None,
    }
}

/// `method(instance, f)` où `f` est une fonction enfant de l'entrée.
fn bound_child(ast: &Ast, functions: &IndexMap<String, NodeId>, id: NodeId) -> Option<NodeId> {
    match ast.get(id) {
        Node::Call { name, args } if name == internal::METHOD && args.len() == 2 => match ast.get(args[1]) {
            Node::FunctionRef(f) => functions.get(f).copied(),
            _ => None,
        },
        _ => None,
    }
}

/// Champs d'un littéral struct : le constructeur recopie `argumentK` dans
/// chaque champ, et `values[K]` porte la valeur source.
fn struct_fields(ast: &Ast, ctor: NodeId, values: &[NodeId]) -> Option<Node> {
    let Node::Function { body, constructor: true, .. } = ast.get(ctor) else { return None };
    let Node::Block(items) = ast.get(*body) else { return None };
    let mut fields = Vec::with_capacity(items.len());
    for &item in items {
        let Node::Assign { target, value, kind: AssignKind::Normal, .. } = ast.get(item) else { return None };
        let field = ast.variable(*target)?;
        let arg = ast.variable(*value)?;
        if arg.instance != Instance::Fixed(InstanceType::ARGUMENT) {
            return None;
        }
        let k: usize = arg.name.strip_prefix("argument")?.parse().ok()?;
        fields.push((field.name.clone(), *values.get(k)?));
    }
    Some(Node::Struct(fields))
}

/* ─────────────────────────── Affectations ─────────────────────────── */

/// `x = x op y` → `x op= y` ; `x = x + 1` (marqué) → `x++` ou `++x`.
fn fold_compound(ast: &mut Ast, id: NodeId, old_format: bool) {
    let Node::Assign { target, value, kind: AssignKind::Normal, pop_int, .. } = *ast.get(id) else { return };
    let Node::Binary { opcode, comparison: None, left, right, left_type, right_type } = *ast.get(value) else {
        return;
    };
    if !same_access(ast, target, left, pop_int) {
        return;
    }
    let step = match *ast.get(right) {
        Node::Int16 { value: 1, step } if matches!(opcode, Opcode::Add | Opcode::Sub) => step,
        _ => StepMark::None,
    };
    let increment = opcode == Opcode::Add;
    let folded = match (opcode, step) {
        (_, StepMark::Postfix) => (AssignKind::Postfix { increment }, target),
        (_, StepMark::Prefix) => (AssignKind::Prefix { increment }, target),
        // lecture `pushloc`/`pushglb`/`pushbltn` : peut-être deux accès distincts
        _ if !compound_source(ast, left, old_format) => return,
        (Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod | Opcode::Xor, _) => {
            (AssignKind::Compound(opcode), right)
        }
        (Opcode::And | Opcode::Or, _) if left_type != DataType::Boolean && right_type != DataType::Boolean => {
            (AssignKind::Compound(opcode), right)
        }
        _ => return,
    };
    trace!("compound store on {:?}", ast.variable(target).map(|v| v.name.as_str()));
    if let Node::Assign { value, kind, .. } = ast.get_mut(id) {
        *kind = folded.0;
        *value = folded.1;
    }
}

/// La lecture `read` vise la même variable que l'écriture `target`.
fn same_access(ast: &Ast, target: NodeId, read: NodeId, pop_int: bool) -> bool {
    let (Some(t), Some(r)) = (ast.variable(target), ast.variable(read)) else { return false };
    if t.name != r.name || t.instance != r.instance {
        return false;
    }
    if pop_int {
        // instance et indice dupliqués : mêmes nœuds des deux côtés
        return t.indices == r.indices;
    }
    t.is_simple() && r.is_simple()
}

/// Lecture admise pour `x op= y` à partir du format 15 : `push` ou instance `self`.
fn compound_source(ast: &Ast, read: NodeId, old_format: bool) -> bool {
    ast.variable(read).is_some_and(|r| {
        old_format || r.opcode == Opcode::Push || r.instance == Instance::Fixed(InstanceType::SELF)
    })
}

/// `a[i * 32000 + j]` → `a[i, j]`.
fn split_pair_index(ast: &mut Ast, id: NodeId) {
    let Some(v) = ast.variable(id) else { return };
    let [only] = v.indices.as_slice() else { return };
    let Node::Binary { opcode: Opcode::Add, left: product, right: second, .. } = *ast.get(*only) else { return };
    let Node::Binary { opcode: Opcode::Mul, left: first, right: scale, .. } = *ast.get(product) else { return };
    if *ast.get(scale) != Node::Int32(32000) {
        return;
    }
    if let Node::Variable(v) = ast.get_mut(id) {
        v.indices = smallvec![first, second];
    }
}

/// `with (-2)` → `with (other)`.
fn name_with_target(ast: &mut Ast, id: NodeId) {
    let Node::With { target, .. } = *ast.get(id) else { return };
    if let Node::Int16 { value: v @ -5..=-1, step: StepMark::None } = *ast.get(target) {
        ast.replace(target, Node::TypeInst(InstanceType(v)));
    }
}

/* ─────────────────────────── Listes d'instructions ─────────────────────────── */

/// `nom = method(self, nom)` sur une fonction enfant → `function nom()`.
fn fold_named_functions(ast: &mut Ast, list: &mut [NodeId]) {
    for slot in list.iter_mut() {
        let Node::Assign { target, value, kind: AssignKind::Normal, .. } = *ast.get(*slot) else { continue };
        let named = match (ast.variable(target), ast.get(value)) {
            (Some(v), Node::Function { child, named: false, .. }) => {
                v.is_simple() && v.instance == Instance::Fixed(InstanceType::SELF) && v.name == *child
            }
            _ => false,
        };
        if named {
            if let Node::Function { named, .. } = ast.get_mut(value) {
                *named = true;
            }
            *slot = value;
        }
    }
}

fn is_return_temp(ast: &Ast, id: NodeId) -> bool {
    ast.variable(id).is_some_and(|v| v.name == RETURN_TEMP)
}

/// `TMP = v; return TMP;` → `return v;`
fn elide_return_temp(ast: &mut Ast, list: &mut Vec<NodeId>) {
    let mut i = 0;
    while i + 1 < list.len() {
        let stored = match *ast.get(list[i]) {
            Node::Assign { target, value, kind: AssignKind::Normal, .. } if is_return_temp(ast, target) => Some(value),
            _ => None,
        };
        let returned = matches!(*ast.get(list[i + 1]), Node::Return(r) if is_return_temp(ast, r));
        if let (Some(value), true) = (stored, returned) {
            ast.replace(list[i + 1], Node::Return(value));
            list.remove(i);
        }
        i += 1;
    }
}

/// Affectation suivie d'un `while` sans `continue` finissant par une
/// affectation → `for` ; affectation suivie d'un `for` sans initialisation
/// → initialisation de ce `for`.
fn recover_for(ast: &mut Ast, list: &mut Vec<NodeId>) {
    let mut i = 1;
    while i < list.len() {
        let (init, looped) = (list[i - 1], list[i]);
        if matches!(ast.get(init), Node::Assign { kind: AssignKind::Normal, .. }) {
            if let Some(node) = for_from(ast, init, looped) {
                ast.replace(looped, node);
                list.remove(i - 1);
                continue;
            }
        }
        i += 1;
    }
}

fn for_from(ast: &mut Ast, init: NodeId, looped: NodeId) -> Option<Node> {
    match *ast.get(looped) {
        Node::While { cond, body, continue_used: false } => {
            let Node::Block(items) = ast.get(body) else { return None };
            let step = *items.last()?;
            if !matches!(ast.get(step), Node::Assign { .. }) {
                return None;
            }
            if let Node::Block(items) = ast.get_mut(body) {
                items.pop();
            }
            Some(Node::For { init: Some(init), cond, step: Some(step), body })
        }
        Node::For { init: None, cond, step, body } => Some(Node::For { init: Some(init), cond, step, body }),
        _ => None,
    }
}

/// Corps de `for`, `do … until` ou `repeat` finissant par `if (c) { } else { … }` :
/// le saut du bras vide vise la cible de `continue` de la boucle, d'où
/// `if (c) { continue; } …`.
fn fold_trailing_continue(ast: &mut Ast, id: NodeId) {
    let body = match *ast.get(id) {
        Node::For { body, .. } | Node::DoUntil { body, .. } | Node::Repeat { body, .. } => body,
        _ => return,
    };
    loop {
        let Node::Block(items) = ast.get(body) else { return };
        let Some(&last) = items.last() else { return };
        let Node::If { cond, then, otherwise: Some(otherwise), else_if: false } = *ast.get(last) else { return };
        if !matches!(ast.get(then), Node::Block(t) if t.is_empty()) {
            return;
        }
        let Node::Block(rest) = ast.get_mut(otherwise) else { return };
        let rest = std::mem::take(rest);
        trace!("empty then-branch at the end of a loop read as continue");
        let cont = ast.add(Node::Continue);
        ast.replace(then, Node::Block(vec![cont]));
        ast.replace(last, Node::If { cond, then, otherwise: None, else_if: false });
        if let Node::Block(items) = ast.get_mut(body) {
            items.extend(rest);
        }
    }
}

fn mark_else_if(ast: &mut Ast, id: NodeId) {
    let Node::If { otherwise: Some(otherwise), else_if: false, .. } = *ast.get(id) else { return };
    let single_if = matches!(ast.get(otherwise), Node::Block(items) if items.len() == 1 && matches!(ast.get(items[0]), Node::If { .. }));
    if single_if {
        if let Node::If { else_if, .. } = ast.get_mut(id) {
            *else_if = true;
        }
    }
}

/* ─────────────────────────── Portées ─────────────────────────── */

/// Nœuds d'une portée de fonction dans l'ordre de compilation ; la cible
/// d'une affectation précède sa valeur. Les fonctions imbriquées sont
/// relevées sans être parcourues.
struct ScopeScan<'a> {
    ast: &'a Ast,
    seen: HashSet<NodeId>,
    order: Vec<NodeId>,
    nested: Vec<NodeId>,
}

impl ScopeScan<'_> {
    fn visit(&mut self, id: NodeId) {
        if !self.seen.insert(id) {
            return;
        }
        self.order.push(id);
        match *self.ast.get(id) {
            Node::Function { .. } => self.nested.push(id),
            Node::Assign { target, value, kind: AssignKind::Normal | AssignKind::Compound(_), .. } => {
                self.visit(target);
                self.visit(value);
            }
            _ => {
                for child in self.ast.children(id) {
                    self.visit(child);
                }
            }
        }
    }
}

/// Locaux d'une portée.
#[derive(Debug, Default)]
struct ScopeLocals {
    /// Noms déclarés (affectation `var`, `catch`, préambule).
    declared: IndexSet<String>,
    /// Noms lus avant toute affectation.
    preamble: IndexSet<String>,
}

fn local_name(ast: &Ast, id: NodeId) -> Option<&str> {
    ast.variable(id)
        .filter(|v| v.instance == Instance::Fixed(InstanceType::LOCAL) && v.name != RETURN_TEMP)
        .map(|v| v.name.as_str())
}

/// Marque les `var` de la portée `body` et complète ses `static`.
fn declare_scope(ast: &mut Ast, body: NodeId) -> (ScopeLocals, Vec<NodeId>) {
    let mut scan = ScopeScan { ast, seen: HashSet::new(), order: Vec::new(), nested: Vec::new() };
    scan.visit(body);
    let ScopeScan { order, nested, .. } = scan;

    let mut locals = ScopeLocals::default();
    let mut declares = Vec::new();
    for &id in &order {
        match ast.get(id) {
            Node::Assign { target, kind: AssignKind::Normal, .. } => {
                let simple = ast.variable(*target).is_some_and(VariableNode::is_simple);
                if let (true, Some(name)) = (simple, local_name(ast, *target)) {
                    if locals.declared.insert(name.to_owned()) {
                        declares.push(id);
                    }
                }
            }
            Node::Try { catch: Some((name, _)), .. } => {
                locals.declared.insert(name.clone());
            }
            Node::Variable(_) => {
                if let Some(name) = local_name(ast, id) {
                    if locals.declared.insert(name.to_owned()) {
                        locals.preamble.insert(name.to_owned());
                    }
                }
            }
            _ => {}
        }
    }
    for id in declares {
        if let Node::Assign { declare, .. } = ast.get_mut(id) {
            *declare = true;
        }
    }

    complete_statics(ast, &order);
    (locals, nested)
}

/// Ajoute au premier `static` de la portée les noms statiques employés sans
/// y être déclarés ; un `static` resté vide reçoit [`EMPTY_STATIC`].
fn complete_statics(ast: &mut Ast, order: &[NodeId]) {
    let blocks: SmallVec<[NodeId; 2]> = order.iter().copied().filter(|&id| matches!(ast.get(id), Node::Static(_))).collect();
    let Some(&first) = blocks.first() else { return };

    let mut declared = IndexSet::new();
    for &block in &blocks {
        let Node::Static(items) = ast.get(block) else { continue };
        for &item in items {
            let var = match ast.get(item) {
                Node::Assign { target, .. } => *target,
                _ => item,
            };
            if let Some(v) = ast.variable(var) {
                declared.insert(v.name.clone());
            }
        }
    }
    let missing: IndexSet<String> = order
        .iter()
        .filter_map(|&id| ast.variable(id))
        .filter(|v| v.instance == Instance::Fixed(InstanceType::STATIC) && !declared.contains(&v.name))
        .map(|v| v.name.clone())
        .collect();

    let add = |ast: &mut Ast, block: NodeId, name: &str| {
        let id = ast.add(Node::Variable(VariableNode {
            name: name.to_owned(),
            instance: Instance::Fixed(InstanceType::STATIC),
            kind: VariableType::Normal,
            indices: SmallVec::new(),
            opcode: Opcode::Pop,
        }));
        if let Node::Static(items) = ast.get_mut(block) {
            items.push(id);
        }
    };
    for name in &missing {
        add(ast, first, name);
    }
    for &block in &blocks {
        if matches!(ast.get(block), Node::Static(items) if items.is_empty()) {
            add(ast, block, EMPTY_STATIC);
        }
    }
}

/// Préambule de la racine : locaux de l'entrée lus avant affectation ou
/// jamais employés, dans l'ordre de l'entrée.
fn root_preamble(entry: &CodeEntry, scope: ScopeLocals) -> Vec<String> {
    let ScopeLocals { declared, mut preamble } = scope;
    let mut out = Vec::new();
    for name in &entry.locals {
        if preamble.shift_remove(name) || !declared.contains(name) {
            out.push(name.clone());
        }
    }
    out.extend(preamble);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_entry;
    use crate::testing::{compile, compile_for};
    use gmlc_core::GameVersion;
    use pretty_assertions::assert_eq;

    fn cleaned(src: &str) -> Program {
        let (entry, tables) = compile(src);
        let mut p = decode_entry(&entry, &tables).unwrap();
        clean(&mut p, &Target::default(), &entry);
        p
    }

    fn root(p: &Program) -> Vec<Node> {
        match p.ast.get(p.root) {
            Node::Block(items) => items.iter().map(|&id| p.ast.get(id).clone()).collect(),
            other => panic!("root is {other:?}"),
        }
    }

    fn kind_of(node: &Node) -> AssignKind {
        match node {
            Node::Assign { kind, .. } => *kind,
            other => panic!("not an assignment: {other:?}"),
        }
    }

    #[test]
    fn compound_and_step_stores() {
        let p = cleaned("a = a + b; c = c + 1; d++; e[1] += 2;");
        let kinds: Vec<AssignKind> = root(&p).iter().map(kind_of).collect();
        assert_eq!(
            kinds,
            vec![
                AssignKind::Compound(Opcode::Add),
                AssignKind::Compound(Opcode::Add),
                AssignKind::Postfix { increment: true },
                AssignKind::Compound(Opcode::Add),
            ]
        );
    }

    #[test]
    fn local_and_global_reads_keep_the_long_form() {
        let src = "var a = 0; a = a + 2; global.g = global.g * 3; a++;";
        let p = cleaned(src);
        let kinds: Vec<AssignKind> = root(&p).iter().map(kind_of).collect();
        assert_eq!(
            kinds,
            vec![AssignKind::Normal, AssignKind::Normal, AssignKind::Normal, AssignKind::Postfix { increment: true }]
        );

        let (entry, tables) = compile(src);
        let mut old = decode_entry(&entry, &tables).unwrap();
        clean(&mut old, &Target { format_id: 14, ..Target::default() }, &entry);
        let kinds: Vec<AssignKind> = root(&old).iter().skip(1).map(kind_of).collect();
        assert_eq!(kinds[..2].to_vec(), vec![AssignKind::Compound(Opcode::Add), AssignKind::Compound(Opcode::Mul)]);
    }

    #[test]
    fn step_literal_decides_prefix_or_postfix() {
        let fold = |step: StepMark| {
            let mut ast = Ast::new();
            let var = |ast: &mut Ast, opcode| {
                ast.add(Node::Variable(VariableNode {
                    name: "x".into(),
                    instance: Instance::Fixed(InstanceType::SELF),
                    kind: VariableType::Normal,
                    indices: SmallVec::new(),
                    opcode,
                }))
            };
            let read = var(&mut ast, Opcode::Push);
            let target = var(&mut ast, Opcode::Pop);
            let one = ast.add(Node::Int16 { value: 1, step });
            let sum = ast.add(Node::Binary {
                opcode: Opcode::Sub,
                comparison: None,
                left: read,
                right: one,
                left_type: DataType::Variable,
                right_type: DataType::Int32,
            });
            let id = ast.add(Node::Assign { target, value: sum, kind: AssignKind::Normal, declare: false, pop_int: false });
            fold_compound(&mut ast, id, false);
            kind_of(ast.get(id))
        };
        assert_eq!(fold(StepMark::Prefix), AssignKind::Prefix { increment: false });
        assert_eq!(fold(StepMark::Postfix), AssignKind::Postfix { increment: false });
        assert_eq!(fold(StepMark::None), AssignKind::Compound(Opcode::Sub));
    }

    #[test]
    fn statement_increments_read_as_postfix() {
        // `++a;` et `a++;` produisent le même bytecode
        let p = cleaned("++a; a--;");
        let kinds: Vec<AssignKind> = root(&p).iter().map(kind_of).collect();
        assert_eq!(kinds, vec![AssignKind::Postfix { increment: true }, AssignKind::Postfix { increment: false }]);
    }

    #[test]
    fn while_after_assignment_becomes_for() {
        let p = cleaned("i = 0; while (i < 10) { j = i; i = i + 1; }");
        let stmts = root(&p);
        assert_eq!(stmts.len(), 1);
        let Node::For { init: Some(init), cond: Some(_), step: Some(step), body } = &stmts[0] else { panic!("{stmts:?}") };
        assert_eq!(kind_of(p.ast.get(*init)), AssignKind::Normal);
        assert_eq!(kind_of(p.ast.get(*step)), AssignKind::Compound(Opcode::Add));
        assert!(matches!(p.ast.get(*body), Node::Block(items) if items.len() == 1));
    }

    #[test]
    fn loop_with_continue_stays_while() {
        let p = cleaned("i = 0; while (i < 10) { if (i) { continue; } i = i + 1; }");
        assert!(matches!(root(&p).as_slice(), [Node::Assign { .. }, Node::While { continue_used: true, .. }]));
    }

    #[test]
    fn empty_branch_closing_a_loop_body_is_continue() {
        let p = cleaned("for (i = 0; i < 3; i++) { if (i == 1) { continue; } a += i; }");
        let Node::For { body, .. } = &root(&p)[0] else { panic!("{:?}", root(&p)) };
        let Node::Block(items) = p.ast.get(*body) else { panic!() };
        assert_eq!(items.len(), 2);
        let Node::If { then, otherwise: None, .. } = p.ast.get(items[0]) else { panic!("{:?}", p.ast.get(items[0])) };
        assert!(matches!(p.ast.get(*then), Node::Block(t) if t.len() == 1 && *p.ast.get(t[0]) == Node::Continue));
        assert_eq!(kind_of(p.ast.get(items[1])), AssignKind::Compound(Opcode::Add));

        let p = cleaned("do { a -= 1; if (a) { continue; } b = 2; } until (a < 0);");
        let Node::DoUntil { body, .. } = &root(&p)[0] else { panic!("{:?}", root(&p)) };
        let Node::Block(items) = p.ast.get(*body) else { panic!() };
        assert_eq!(items.len(), 3);
        assert!(matches!(p.ast.get(items[1]), Node::If { otherwise: None, .. }));
    }

    #[test]
    fn return_through_temporary_is_collapsed() {
        let p = cleaned("with (obj) { return 5; }");
        let Node::With { body, .. } = &root(&p)[0] else { panic!() };
        let Node::Block(items) = p.ast.get(*body) else { panic!() };
        assert_eq!(items.len(), 1);
        let Node::Return(value) = p.ast.get(items[0]) else { panic!("{:?}", p.ast.get(items[0])) };
        assert_eq!(p.ast.get(*value), &Node::Int16 { value: 5, step: StepMark::None });
    }

    #[test]
    fn locals_are_declared_once() {
        let p = cleaned("var a = 1; b = a; var c; var d; d = c;");
        assert_eq!(p.preamble, vec!["c".to_owned()]);
        let declares: Vec<bool> = root(&p)
            .iter()
            .map(|n| match n {
                Node::Assign { declare, .. } => *declare,
                _ => false,
            })
            .collect();
        assert_eq!(declares, vec![true, false, true]);
    }

    #[test]
    fn unused_locals_go_to_the_preamble() {
        let p = cleaned("var unused; x = 1;");
        assert_eq!(p.preamble, vec!["unused".to_owned()]);
    }

    #[test]
    fn runtime_helpers_become_source_forms() {
        let p = cleaned("function F() constructor { } x = new F(1); y = { a: 1, b: [2, 3] }; g = function() { return 1; };");
        let stmts = root(&p);
        assert!(matches!(&stmts[0], Node::Function { named: true, constructor: true, child, .. } if child == "F"));
        let Node::Assign { value, .. } = &stmts[1] else { panic!() };
        assert!(matches!(p.ast.get(*value), Node::New { function, args } if function == "F" && args.len() == 1));
        let Node::Assign { value, .. } = &stmts[2] else { panic!() };
        let Node::Struct(fields) = p.ast.get(*value) else { panic!("{:?}", p.ast.get(*value)) };
        let names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(matches!(p.ast.get(fields[1].1), Node::ArrayLiteral(items) if items.len() == 2));
        let Node::Assign { value, .. } = &stmts[3] else { panic!() };
        assert!(matches!(p.ast.get(*value), Node::Function { named: false, .. }));
    }

    #[test]
    fn special_with_targets_are_named() {
        let p = cleaned("with (other) { } with (all) { }");
        let targets: Vec<Node> = root(&p)
            .iter()
            .map(|n| match n {
                Node::With { target, .. } => p.ast.get(*target).clone(),
                other => panic!("{other:?}"),
            })
            .collect();
        assert_eq!(targets, vec![Node::TypeInst(InstanceType::OTHER), Node::TypeInst(InstanceType::ALL)]);
    }

    #[test]
    fn else_branch_with_single_if_is_marked() {
        let p = cleaned("if (a) { b = 1; } else if (c) { b = 2; }");
        assert!(matches!(root(&p)[0], Node::If { else_if: true, .. }));
    }

    #[test]
    fn legacy_two_dimensional_index_is_split() {
        let target = Target::for_version(GameVersion::Gms2);
        let (entry, tables) = compile_for(target, "a[1, 2] = 3;");
        let mut p = decode_entry(&entry, &tables).unwrap();
        clean(&mut p, &target, &entry);
        let Node::Assign { target: t, .. } = &root(&p)[0] else { panic!() };
        assert_eq!(p.ast.variable(*t).map(|v| v.indices.len()), Some(2));
    }

    #[test]
    fn statics_used_without_initializer_are_declared() {
        let p = cleaned("function f() { static s; s = 1; static t = 2; }");
        let Node::Function { body, .. } = &root(&p)[0] else { panic!("{:?}", root(&p)) };
        let Node::Block(items) = p.ast.get(*body) else { panic!() };
        let Node::Static(first) = p.ast.get(items[0]) else { panic!() };
        assert_eq!(first.len(), 1);
        assert_eq!(p.ast.variable(first[0]).map(|v| v.name.as_str()), Some("s"));
    }

    #[test]
    fn cleaning_twice_changes_nothing() {
        let (entry, tables) = compile("var k; i = 0; while (i < 3) { k = i; i++; } if (k) { } else if (i) { x = [1]; }");
        let mut p = decode_entry(&entry, &tables).unwrap();
        let target = Target::default();
        clean(&mut p, &target, &entry);
        let once = (format!("{:?}", p.ast), p.preamble.clone());
        clean(&mut p, &target, &entry);
        assert_eq!((format!("{:?}", p.ast), p.preamble.clone()), once);
    }
}
