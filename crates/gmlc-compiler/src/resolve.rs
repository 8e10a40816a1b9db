//! Phase 2 : remplacement des références symboliques par des ids de tables.

use gmlc_core::{CodeEntry, NameTables, Reference, Value};
use log::trace;

use crate::context::{PendingEntry, Symbol};

impl PendingEntry {
    /// Interne chaque symbole dans `tables` et rend l'entrée finale.
    ///
    /// Les ids sont attribués dans l'ordre d'émission ; résoudre les
    /// entrées dans un ordre fixe donne donc des tables reproductibles.
    #[must_use]
    pub fn resolve(self, tables: &mut NameTables) -> CodeEntry {
        let Self { name, mut instructions, length, refs, locals, argument_count, children } = self;
        for (idx, symbol) in refs {
            let Some(ins) = instructions.get_mut(idx) else { continue };
            match symbol {
                Symbol::String(s) => ins.value = Value::String(tables.intern_string(&s)),
                Symbol::Variable { name, scope, kind } => {
                    let id = tables.intern_variable(&name, scope);
                    ins.reference = Reference::Variable { id, kind };
                }
                Symbol::Function(f) => ins.reference = Reference::Function(tables.intern_function(&f)),
            }
        }
        trace!(
            "resolved {name}: {} strings, {} functions, {} variables in tables",
            tables.strings.len(),
            tables.functions.len(),
            tables.variables.len()
        );
        CodeEntry { name, instructions, length, locals, argument_count, children }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::compile;
    use gmlc_core::{InstanceType, NameTables, Reference, Value, VariableEntry, VariableType};
    use pretty_assertions::assert_eq;

    #[test]
    fn strings_functions_and_variables_are_interned() {
        let entry = compile("foo = \"hi\"; scr_helper(foo); bar = \"hi\";").unwrap().resolve(&mut NameTables::new());
        let mut tables = NameTables::new();
        let entry2 = compile("foo = \"hi\"; scr_helper(foo); bar = \"hi\";").unwrap().resolve(&mut tables);
        assert_eq!(entry, entry2);

        assert_eq!(tables.strings.len(), 1);
        assert_eq!(tables.function_id("scr_helper"), Some(0));
        assert_eq!(tables.variables.len(), 2);
        assert_eq!(entry.instructions[0].value, Value::String(0));
        assert_eq!(entry.instructions[1].reference, Reference::Variable { id: 0, kind: VariableType::Normal });
    }

    #[test]
    fn variables_share_ids_per_scope() {
        let mut tables = NameTables::new();
        compile("var a = 1; a = 2;").unwrap().resolve(&mut tables);
        compile("a = 3; other.a = 4;").unwrap().resolve(&mut tables);
        assert_eq!(
            tables.variables.iter().cloned().collect::<Vec<_>>(),
            vec![
                VariableEntry { name: "a".into(), scope: InstanceType::LOCAL },
                VariableEntry { name: "a".into(), scope: InstanceType::SELF },
            ]
        );
    }

    #[test]
    fn resolution_keeps_layout() {
        let pending = compile("foo = 1; while (foo) foo -= 1;").unwrap();
        let addresses: Vec<u32> = pending.instructions.iter().map(|i| i.address).collect();
        let length = pending.length;
        let entry = pending.resolve(&mut NameTables::new());
        assert_eq!(entry.length, length);
        assert_eq!(entry.instructions.iter().map(|i| i.address).collect::<Vec<_>>(), addresses);
    }
}
