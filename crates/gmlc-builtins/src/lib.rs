//! gmlc-builtins — registre des noms intégrés du langage GML.
//!
//! Un compteur d'ids unique est partagé entre fonctions et variables ; les
//! constantes n'ont pas d'id. `undefined` est toujours la variable globale 0.
//!
//! Le catalogue compilé ([`catalogue`]) décrit les fonctions courantes du
//! runtime (arité, `-1` = variadique) et les variables globales/d'instance
//! avec leurs permissions. Les tables de constantes nommées ([`constants`])
//! sont aussi utilisées par le résolveur de macros du décompilateur.

#![deny(missing_docs)]

use gmlc_core::Target;
use indexmap::IndexMap;
use log::trace;

pub mod catalogue;
pub mod constants;

/// Nombre d'arguments d'une fonction variadique.
pub const VARIADIC: i32 = -1;

/// Fonctions internes utilisées par le bytecode généré.
pub mod internal {
    /// Objet nul.
    pub const NULL_OBJECT: &str = "@@NullObject@@";
    /// Copie des statics du parent.
    pub const COPY_STATIC: &str = "@@CopyStatic@@";
    /// Littéral tableau.
    pub const NEW_ARRAY: &str = "@@NewGMLArray@@";
    /// `new` / littéral struct.
    pub const NEW_OBJECT: &str = "@@NewGMLObject@@";
    /// Conversion valeur → instance.
    pub const GET_INSTANCE: &str = "@@GetInstance@@";
    /// `self` en tant que valeur.
    pub const THIS: &str = "@@This@@";
    /// `other` en tant que valeur.
    pub const OTHER: &str = "@@Other@@";
    /// `global` en tant que valeur.
    pub const GLOBAL: &str = "@@Global@@";
    /// Installation d'un bloc `try`.
    pub const TRY_HOOK: &str = "@@try_hook@@";
    /// Retrait d'un bloc `try`.
    pub const TRY_UNHOOK: &str = "@@try_unhook@@";
    /// Fin d'un bloc `catch`.
    pub const FINISH_CATCH: &str = "@@finish_catch@@";
    /// Fin d'un bloc `finally`.
    pub const FINISH_FINALLY: &str = "@@finish_finally@@";
    /// `throw`.
    pub const THROW: &str = "@@throw@@";
    /// Liaison fonction/instance.
    pub const METHOD: &str = "method";
    /// Local temporaire des `return` sortant d'un `with`/`switch`/`repeat`.
    pub const RETURN_TEMP: &str = "$$$$temp$$$$";
}

/// Fonction intégrée.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinFunction {
    /// Nom.
    pub name: String,
    /// Arité fixe, ou [`VARIADIC`].
    pub argument_count: i32,
    /// Id stable.
    pub id: u32,
}

impl BuiltinFunction {
    /// Vrai si l'arité est vérifiée à l'appel.
    #[must_use]
    pub const fn has_fixed_arity(&self) -> bool {
        self.argument_count >= 0
    }
}

/// Variable intégrée.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinVariable {
    /// Nom.
    pub name: String,
    /// Globale (sinon d'instance).
    pub is_global: bool,
    /// Écriture permise.
    pub can_set: bool,
    /// Lecture permise.
    pub can_get: bool,
    /// Id stable.
    pub id: u32,
}

/// Registre des noms intégrés pour une cible.
#[derive(Debug, Clone)]
pub struct Builtins {
    constants: IndexMap<String, f64>,
    var_global: IndexMap<String, BuiltinVariable>,
    var_global_array: IndexMap<String, BuiltinVariable>,
    var_instance: IndexMap<String, BuiltinVariable>,
    functions: IndexMap<String, BuiltinFunction>,
    arguments: Vec<String>,
    next_id: u32,
}

impl Builtins {
    /// Construit le registre pour `target`.
    #[must_use]
    pub fn new(target: &Target) -> Self {
        let mut b = Self {
            constants: IndexMap::new(),
            var_global: IndexMap::new(),
            var_global_array: IndexMap::new(),
            var_instance: IndexMap::new(),
            functions: IndexMap::new(),
            arguments: Vec::with_capacity(17),
            next_id: 0,
        };

        b.define_global("undefined", false, true);

        for (name, value) in [
            ("self", -1.0),
            ("other", -2.0),
            ("all", -3.0),
            ("noone", -4.0),
            ("global", -5.0),
            ("false", 0.0),
            ("true", 1.0),
            ("pi", std::f64::consts::PI),
        ] {
            b.define_constant(name, value);
        }

        b.define_function(internal::NULL_OBJECT, 0);
        b.define_function(internal::COPY_STATIC, 1);

        b.arguments.extend((0..=15).map(|i| format!("argument{i}")));
        b.arguments.push("argument".to_owned());
        if !target.is_gms2_3() {
            let args = b.arguments.clone();
            for a in &args {
                b.define_instance(a, true, true);
            }
        }

        b.load_catalogue(target);
        trace!(
            "builtins: {} functions, {} variables, {} constants",
            b.functions.len(),
            b.var_global.len() + b.var_global_array.len() + b.var_instance.len(),
            b.constants.len()
        );
        b
    }

    fn fresh_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn define_global(&mut self, name: &str, can_set: bool, can_get: bool) {
        let id = self.fresh_id();
        self.var_global.insert(
            name.to_owned(),
            BuiltinVariable { name: name.to_owned(), is_global: true, can_set, can_get, id },
        );
    }

    fn define_global_array(&mut self, name: &str, can_set: bool, can_get: bool) {
        let id = self.fresh_id();
        self.var_global_array.insert(
            name.to_owned(),
            BuiltinVariable { name: name.to_owned(), is_global: true, can_set, can_get, id },
        );
    }

    fn define_instance(&mut self, name: &str, can_set: bool, can_get: bool) {
        let id = self.fresh_id();
        self.var_instance.insert(
            name.to_owned(),
            BuiltinVariable { name: name.to_owned(), is_global: false, can_set, can_get, id },
        );
    }

    fn define_function(&mut self, name: &str, argument_count: i32) {
        let id = self.fresh_id();
        self.functions
            .insert(name.to_owned(), BuiltinFunction { name: name.to_owned(), argument_count, id });
    }

    fn define_constant(&mut self, name: &str, value: f64) {
        self.constants.insert(name.to_owned(), value);
    }

    fn load_catalogue(&mut self, target: &Target) {
        for &(name, argc) in catalogue::INTERNAL_FUNCTIONS {
            self.define_function(name, argc);
        }
        for &(name, argc) in catalogue::FUNCTIONS {
            self.define_function(name, argc);
        }
        for &(name, set, get) in catalogue::GLOBAL_VARIABLES {
            self.define_global(name, set, get);
        }
        for &(name, set, get) in catalogue::GLOBAL_ARRAYS {
            self.define_global_array(name, set, get);
        }
        if !target.is_gms2() {
            for &(name, set, get) in catalogue::LEGACY_GLOBAL_ARRAYS {
                self.define_global_array(name, set, get);
            }
        }
        for &(name, set, get) in catalogue::INSTANCE_VARIABLES {
            self.define_instance(name, set, get);
        }
        for table in constants::ALL_TABLES {
            for &(name, value) in *table {
                self.define_constant(name, f64::from(value));
            }
        }
    }

    /* ─────────────────────────── Lookups ─────────────────────────── */

    /// Fonction par nom.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&BuiltinFunction> {
        self.functions.get(name)
    }

    /// Fonction par id.
    #[must_use]
    pub fn function_by_id(&self, id: u32) -> Option<&BuiltinFunction> {
        self.functions.values().find(|f| f.id == id)
    }

    /// Constante par nom.
    #[must_use]
    pub fn constant(&self, name: &str) -> Option<f64> {
        self.constants.get(name).copied()
    }

    /// Variable globale simple.
    #[must_use]
    pub fn global_variable(&self, name: &str) -> Option<&BuiltinVariable> {
        self.var_global.get(name)
    }

    /// Variable globale tableau.
    #[must_use]
    pub fn global_array_variable(&self, name: &str) -> Option<&BuiltinVariable> {
        self.var_global_array.get(name)
    }

    /// Variable d'instance.
    #[must_use]
    pub fn instance_variable(&self, name: &str) -> Option<&BuiltinVariable> {
        self.var_instance.get(name)
    }

    /// Variable intégrée, cherchée dans les globales, les tableaux globaux
    /// puis les variables d'instance.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&BuiltinVariable> {
        self.global_variable(name)
            .or_else(|| self.global_array_variable(name))
            .or_else(|| self.instance_variable(name))
    }

    /// Vrai pour `argument`, `argument0` … `argument15`.
    #[must_use]
    pub fn is_argument(&self, name: &str) -> bool {
        self.arguments.iter().any(|a| a == name)
    }

    /// Index d'un argument numéroté (`argument3` → 3).
    #[must_use]
    pub fn argument_index(name: &str) -> Option<usize> {
        name.strip_prefix("argument")
            .filter(|rest| !rest.is_empty() && rest.bytes().all(|c| c.is_ascii_digit()))
            .and_then(|rest| rest.parse().ok())
            .filter(|i| *i <= 15)
    }

    /// Nombre total d'ids attribués.
    #[must_use]
    pub const fn id_count(&self) -> u32 {
        self.next_id
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */
#[cfg(test)]
mod tests {
    use super::*;
    use gmlc_core::GameVersion;
    use pretty_assertions::assert_eq;

    #[test]
    fn undefined_is_first_variable() {
        let b = Builtins::new(&Target::default());
        assert_eq!(b.global_variable("undefined").map(|v| v.id), Some(0));
        assert_eq!(b.function(internal::NULL_OBJECT).map(|f| f.id), Some(1));
    }

    #[test]
    fn ids_are_unique_across_kinds() {
        let b = Builtins::new(&Target::default());
        let x = b.instance_variable("x").map(|v| v.id);
        let f = b.function("show_debug_message").map(|f| f.id);
        assert!(x.is_some() && f.is_some());
        assert_ne!(x, f);
        assert_eq!(b.function_by_id(f.unwrap_or_default()).map(|f| f.name.as_str()), Some("show_debug_message"));
    }

    #[test]
    fn arguments_are_variables_before_2_3() {
        let old = Builtins::new(&Target::for_version(GameVersion::Gms2));
        let new = Builtins::new(&Target::default());
        assert!(old.instance_variable("argument3").is_some());
        assert!(new.instance_variable("argument3").is_none());
        assert!(new.is_argument("argument3"));
        assert_eq!(Builtins::argument_index("argument12"), Some(12));
        assert_eq!(Builtins::argument_index("argument"), None);
        assert_eq!(Builtins::argument_index("argument16"), None);
    }

    #[test]
    fn constants_cover_named_tables() {
        let b = Builtins::new(&Target::default());
        assert_eq!(b.constant("c_red"), Some(255.0));
        assert_eq!(b.constant("vk_space"), Some(32.0));
        assert_eq!(b.constant("gp_face1"), Some(32769.0));
        assert_eq!(b.constant("noone"), Some(-4.0));
    }

    #[test]
    fn variable_lookup_order() {
        let b = Builtins::new(&Target::for_version(GameVersion::Gms1));
        assert!(b.variable("room").is_some_and(|v| v.is_global));
        assert!(b.variable("view_xview").is_some());
        assert!(b.variable("x").is_some_and(|v| !v.is_global));
        assert!(b.variable("not_a_builtin").is_none());
    }

    #[test]
    fn arity_flags() {
        let b = Builtins::new(&Target::default());
        assert!(b.function("choose").is_some_and(|f| !f.has_fixed_arity()));
        assert!(b.function("point_distance").is_some_and(BuiltinFunction::has_fixed_arity));
    }
}
