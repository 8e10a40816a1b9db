//! Source → bytecode → source → bytecode : les deux listings doivent coïncider.

use gmlc_compiler::CompileSession;
use gmlc_core::{CodeEntry, GameVersion, NameTables, Target};
use gmlc_decompiler::{decompile_entry, disassemble, DecompileEnv};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

const ENTRY: &str = "gml_Object_obj_player_Step_0";

fn compile(target: Target, src: &str) -> (CodeEntry, NameTables) {
    let mut session = CompileSession::new(target);
    let mut tables = NameTables::new();
    let sources = vec![(ENTRY.to_owned(), src.to_owned())];
    match session.compile_sources(&sources, &mut tables).pop() {
        Some(Ok(entry)) => (entry, tables),
        Some(Err(e)) => panic!("{e:?}\n--- source ---\n{src}"),
        None => panic!("no entry compiled"),
    }
}

fn roundtrip(target: Target, src: &str) {
    let (first, tables) = compile(target, src);
    let env = DecompileEnv { target: &target, tables: &tables, macros: None };
    let text = decompile_entry(&first, &env).unwrap();
    let (second, again) = compile(target, &text);
    assert_eq!(
        disassemble(&second, &again).unwrap(),
        disassemble(&first, &tables).unwrap(),
        "decompiled source:\n{text}"
    );
}

#[test]
fn assignments_and_branches() {
    roundtrip(Target::default(), "a = 1; if (a > 2) { b = a * 3; } else { b = a - 1; }");
}

#[test]
fn locals() {
    roundtrip(Target::default(), "var t = 2; u = t * t;");
}

#[test]
fn counting_loop_with_break() {
    roundtrip(Target::default(), "s = 0; for (i = 0; i < 10; i += 1) { if (i == 5) { break; } s += i; }");
}

#[test]
fn repeat_do_until_and_switch() {
    roundtrip(
        Target::default(),
        "repeat (3) { n += 1; } do { n -= 1; } until (n < 0); switch (n) { case 1: m = 2; break; default: m = 3; }",
    );
}

#[test]
fn functions_and_literals() {
    roundtrip(Target::default(), "function add(a, b) { return a + b; } v = { k: 1 }; w = [1, 2];");
}

#[test]
fn boolean_xor() {
    roundtrip(Target::default(), "a = b ^^ c;");
    roundtrip(Target::for_version(GameVersion::Gms2), "a = b ^^ c; d = (a ^^ b) && c;");
}

#[test]
fn local_and_global_read_modify_write() {
    roundtrip(Target::default(), "var a = 0; a = a + 2; a += 1; global.g = global.g * 3; global.g -= 1; a++;");
}

#[test]
fn continue_inside_for_and_do_until() {
    roundtrip(Target::default(), "for (i = 0; i < 4; i++) { if (i == 1) { continue; } a += i; }");
    roundtrip(Target::default(), "do { a -= 1; if (a == 2) { continue; } b = a; } until (a < 0);");
}

#[test]
fn method_stored_in_an_instance_variable() {
    roundtrip(Target::default(), "cb = function() { return 1; }; cb(); r = cb(2);");
}

fn arithmetic() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        (1_u32..40_000).prop_map(|n| n.to_string()),
        Just("a".to_owned()),
        Just("b".to_owned()),
        Just("c".to_owned()),
    ];
    leaf.prop_recursive(4, 24, 2, |inner| {
        (inner.clone(), prop::sample::select(vec!["+", "-", "*", "/", "<", "=="]), inner)
            .prop_map(|(l, op, r)| format!("({l} {op} {r})"))
    })
}

proptest! {
    #[test]
    fn parentheses_survive_the_round_trip(e in arithmetic()) {
        roundtrip(Target::default(), &format!("r = {e};"));
    }
}
