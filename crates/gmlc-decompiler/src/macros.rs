//! Résolution des macros : les littéraux numériques dont le rôle est connu
//! (argument de fonction, variable typée, comparaison, `case`, valeur de
//! retour) sont réécrits avec le nom de constante ou d'asset correspondant.
//!
//! Seule l'orthographe change. Les règles intégrées peuvent être complétées
//! par des fichiers JSON :
//!
//! ```json
//! {
//!   "FunctionArgs": { "scr_tint": ["Color", "None"] },
//!   "FunctionArgsCond": {
//!     "scr_spawn": [
//!       { "condition": { "argument": 0, "equals": 1 }, "types": ["None", "Sprite"] },
//!       { "types": ["None", "Object"] }
//!     ]
//!   },
//!   "FunctionReturns": { "scr_pick": "Sound" },
//!   "VariableTypes": { "tint": "Color" },
//!   "CodeEntries": { "object: obj_door": { "VariableTypes": { "target": "Room" } } }
//! }
//! ```

use std::collections::{HashMap, HashSet};

use gmlc_builtins::constants::{self, COLORS, GAMEPAD, KEYBOARD, OS_TYPES, PATH_END_ACTIONS};
use gmlc_core::{AssetKind, AssetTable};
use log::trace;
use serde::Deserialize;

use crate::ast::{AssignKind, Ast, Node, NodeId, Program};

/// Rôle sémantique d'une valeur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
pub enum MacroType {
    /// Aucun.
    #[default]
    None,
    /// Id d'objet.
    Object,
    /// Booléen.
    Boolean,
    /// Couleur `c_*`.
    Color,
    /// Id de sprite.
    Sprite,
    /// Id de police.
    Font,
    /// Id de room.
    Room,
    /// Touche `vk_*` ou `ord("A")`.
    Keyboard,
    /// Id de son.
    Sound,
    /// Id de chemin.
    Path,
    /// `path_action_*`
    PathEndAction,
    /// `gp_*`
    Gamepad,
    /// `os_*`
    #[serde(rename = "OSType")]
    OsType,
}

/// Littéral attendu par une condition.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    /// Booléen.
    Bool(bool),
    /// Nombre.
    Number(f64),
    /// Chaîne (ou nom de constante déjà résolu).
    Text(String),
}

/// Condition d'une règle : l'argument `argument` vaut `equals`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Condition {
    /// Position de l'argument.
    pub argument: usize,
    /// Valeur attendue.
    pub equals: Literal,
}

/// Types d'arguments appliqués si `condition` tient (ou sans condition).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConditionalTypes {
    /// Condition ; absente pour l'alternative par défaut.
    #[serde(default)]
    pub condition: Option<Condition>,
    /// Types des arguments.
    pub types: Vec<MacroType>,
}

/// Jeu de règles, tel qu'il apparaît dans un fichier JSON.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MacroRules {
    /// Types des arguments par fonction.
    pub function_args: HashMap<String, Vec<MacroType>>,
    /// Alternatives conditionnelles par fonction, essayées avant `function_args`.
    pub function_args_cond: HashMap<String, Vec<ConditionalTypes>>,
    /// Type de retour par fonction.
    pub function_returns: HashMap<String, MacroType>,
    /// Type par nom de variable.
    pub variable_types: HashMap<String, MacroType>,
    /// Règles propres à une entrée (`gml_…`) ou aux entrées d'un objet (`object: nom`).
    pub code_entries: HashMap<String, MacroRules>,
}

impl MacroRules {
    fn merge(&mut self, other: Self) {
        self.function_args.extend(other.function_args);
        self.function_args_cond.extend(other.function_args_cond);
        self.function_returns.extend(other.function_returns);
        self.variable_types.extend(other.variable_types);
        for (key, rules) in other.code_entries {
            self.code_entries.entry(key).or_default().merge(rules);
        }
    }
}

/* ─────────────────────────── Règles intégrées ─────────────────────────── */

use MacroType as M;

const FUNCTION_ARGS: &[(&str, &[MacroType])] = &[
    ("instance_create", &[M::None, M::None, M::Object]),
    ("instance_create_depth", &[M::None, M::None, M::None, M::Object]),
    ("instance_create_layer", &[M::None, M::None, M::None, M::Object]),
    ("instance_exists", &[M::Object]),
    ("instance_number", &[M::Object]),
    ("instance_find", &[M::Object, M::None]),
    ("instance_nearest", &[M::None, M::None, M::Object]),
    ("instance_furthest", &[M::None, M::None, M::Object]),
    ("instance_place", &[M::None, M::None, M::Object]),
    ("instance_position", &[M::None, M::None, M::Object]),
    ("instance_change", &[M::Object, M::Boolean]),
    ("instance_destroy", &[M::Object, M::Boolean]),
    ("instance_activate_object", &[M::Object]),
    ("instance_deactivate_object", &[M::Object]),
    ("instance_deactivate_all", &[M::Boolean]),
    ("place_meeting", &[M::None, M::None, M::Object]),
    ("position_meeting", &[M::None, M::None, M::Object]),
    ("collision_point", &[M::None, M::None, M::Object, M::Boolean, M::Boolean]),
    ("collision_line", &[M::None, M::None, M::None, M::None, M::Object, M::Boolean, M::Boolean]),
    ("collision_rectangle", &[M::None, M::None, M::None, M::None, M::Object, M::Boolean, M::Boolean]),
    ("collision_circle", &[M::None, M::None, M::None, M::Object, M::Boolean, M::Boolean]),
    ("distance_to_object", &[M::Object]),
    ("application_surface_enable", &[M::Boolean]),
    ("application_surface_draw_enable", &[M::Boolean]),
    ("draw_set_color", &[M::Color]),
    ("draw_set_colour", &[M::Color]),
    ("draw_set_font", &[M::Font]),
    ("draw_sprite", &[M::Sprite]),
    ("draw_sprite_ext", &[M::Sprite, M::None, M::None, M::None, M::None, M::None, M::None, M::Color]),
    ("draw_sprite_stretched", &[M::Sprite]),
    ("draw_sprite_tiled", &[M::Sprite]),
    ("draw_text_color", &[M::None, M::None, M::None, M::Color, M::Color, M::Color, M::Color]),
    ("draw_text_colour", &[M::None, M::None, M::None, M::Color, M::Color, M::Color, M::Color]),
    ("draw_rectangle", &[M::None, M::None, M::None, M::None, M::Boolean]),
    ("merge_color", &[M::Color, M::Color, M::None]),
    ("merge_colour", &[M::Color, M::Color, M::None]),
    ("room_goto", &[M::Room]),
    ("keyboard_check", &[M::Keyboard]),
    ("keyboard_check_pressed", &[M::Keyboard]),
    ("keyboard_check_released", &[M::Keyboard]),
    ("keyboard_check_direct", &[M::Keyboard]),
    ("keyboard_clear", &[M::Keyboard]),
    ("keyboard_key_press", &[M::Keyboard]),
    ("keyboard_key_release", &[M::Keyboard]),
    ("keyboard_set_map", &[M::Keyboard, M::Keyboard]),
    ("sprite_exists", &[M::Sprite]),
    ("sprite_get_name", &[M::Sprite]),
    ("sprite_get_number", &[M::Sprite]),
    ("sprite_get_width", &[M::Sprite]),
    ("sprite_get_height", &[M::Sprite]),
    ("sprite_set_offset", &[M::Sprite, M::None, M::None]),
    ("audio_exists", &[M::Sound]),
    ("audio_play_sound", &[M::Sound, M::None, M::Boolean]),
    ("audio_stop_sound", &[M::Sound]),
    ("audio_pause_sound", &[M::Sound]),
    ("audio_resume_sound", &[M::Sound]),
    ("audio_is_playing", &[M::Sound]),
    ("audio_sound_gain", &[M::Sound, M::None, M::None]),
    ("audio_sound_pitch", &[M::Sound, M::None]),
    ("path_start", &[M::Path, M::None, M::PathEndAction, M::Boolean]),
    ("path_exists", &[M::Path]),
    ("path_get_length", &[M::Path]),
    ("path_get_x", &[M::Path, M::None]),
    ("path_get_y", &[M::Path, M::None]),
    ("gamepad_axis_value", &[M::None, M::Gamepad]),
    ("gamepad_button_check", &[M::None, M::Gamepad]),
    ("gamepad_button_check_pressed", &[M::None, M::Gamepad]),
    ("gamepad_button_check_released", &[M::None, M::Gamepad]),
    ("layer_sprite_change", &[M::None, M::Sprite]),
];

const FUNCTION_RETURNS: &[(&str, MacroType)] = &[
    ("instance_exists", M::Boolean),
    ("draw_get_color", M::Color),
    ("draw_get_colour", M::Color),
    ("draw_get_font", M::Font),
    ("keyboard_check", M::Boolean),
    ("keyboard_check_pressed", M::Boolean),
    ("keyboard_check_released", M::Boolean),
    ("keyboard_check_direct", M::Boolean),
    ("sprite_exists", M::Boolean),
    ("place_meeting", M::Boolean),
    ("merge_color", M::Color),
    ("merge_colour", M::Color),
];

const BUILTIN_VARIABLES: &[(&str, MacroType)] = &[
    ("sprite_index", M::Sprite),
    ("mask_index", M::Sprite),
    ("object_index", M::Object),
    ("room", M::Room),
    ("image_blend", M::Color),
    ("path_index", M::Path),
    ("os_type", M::OsType),
    ("visible", M::Boolean),
    ("solid", M::Boolean),
    ("persistent", M::Boolean),
];

/* ─────────────────────────── Table de règles ─────────────────────────── */

/// Règles intégrées et règles chargées.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroTypes {
    rules: MacroRules,
}

impl Default for MacroTypes {
    fn default() -> Self {
        Self::new()
    }
}

impl MacroTypes {
    /// Règles intégrées seules.
    #[must_use]
    pub fn new() -> Self {
        let rules = MacroRules {
            function_args: FUNCTION_ARGS.iter().map(|(n, t)| ((*n).to_owned(), t.to_vec())).collect(),
            function_returns: FUNCTION_RETURNS.iter().map(|(n, t)| ((*n).to_owned(), *t)).collect(),
            variable_types: BUILTIN_VARIABLES.iter().map(|(n, t)| ((*n).to_owned(), *t)).collect(),
            ..MacroRules::default()
        };
        Self { rules }
    }

    /// Fusionne un fichier de règles ; ses entrées remplacent les existantes.
    pub fn add_json(&mut self, json: &str) -> Result<(), serde_json::Error> {
        let rules: MacroRules = serde_json::from_str(json)?;
        self.rules.merge(rules);
        Ok(())
    }

    /// Règles globales.
    #[must_use]
    pub const fn rules(&self) -> &MacroRules {
        &self.rules
    }

    /// Vue des règles applicables à l'entrée `entry`.
    fn view<'a>(&'a self, entry: &str) -> View<'a> {
        let overrides = self
            .rules
            .code_entries
            .iter()
            .filter(|(key, _)| match key.strip_prefix("object: ") {
                Some(object) => entry.strip_prefix("gml_Object_").is_some_and(|rest| {
                    rest.strip_prefix(object).is_some_and(|tail| tail.starts_with('_'))
                }),
                None => key.as_str() == entry,
            })
            .map(|(_, rules)| rules)
            .collect();
        View { base: &self.rules, overrides }
    }
}

/// Règles de base, précédées des règles propres à l'entrée.
struct View<'a> {
    base: &'a MacroRules,
    overrides: Vec<&'a MacroRules>,
}

impl View<'_> {
    fn layers(&self) -> impl Iterator<Item = &MacroRules> {
        self.overrides.iter().copied().chain(std::iter::once(self.base))
    }

    fn variable(&self, name: &str) -> Option<MacroType> {
        self.layers().find_map(|r| r.variable_types.get(name).copied())
    }

    fn returns(&self, name: &str) -> Option<MacroType> {
        self.layers().find_map(|r| r.function_returns.get(name).copied())
    }

    fn arguments(&self, ast: &Ast, name: &str, args: &[NodeId]) -> Option<Vec<MacroType>> {
        for rules in self.layers() {
            if let Some(alternatives) = rules.function_args_cond.get(name) {
                let hit = alternatives.iter().find(|alt| match &alt.condition {
                    Some(c) => args.get(c.argument).is_some_and(|&a| literal_matches(ast.get(a), &c.equals)),
                    None => true,
                });
                if let Some(alt) = hit {
                    return Some(alt.types.clone());
                }
            }
            if let Some(types) = rules.function_args.get(name) {
                return Some(types.clone());
            }
        }
        None
    }
}

fn literal_matches(node: &Node, expected: &Literal) -> bool {
    match (node, expected) {
        (Node::Boolean(b), Literal::Bool(e)) => b == e,
        (Node::String(s) | Node::Constant(s), Literal::Text(e)) => s == e,
        (node, Literal::Number(e)) => integral(node).is_some_and(|v| f64::from(v) == *e),
        (node, Literal::Bool(e)) => integral(node) == Some(i32::from(*e)),
        _ => false,
    }
}

/// Valeur entière d'un littéral numérique.
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn integral(node: &Node) -> Option<i32> {
    match node {
        Node::Int16 { value, .. } => Some(i32::from(*value)),
        Node::Int32(v) => Some(*v),
        Node::Int64(v) => i32::try_from(*v).ok(),
        Node::Double(v) if v.fract() == 0.0 && v.abs() <= f64::from(i32::MAX) => Some(*v as i32),
        _ => None,
    }
}

/* ─────────────────────────── Résolution ─────────────────────────── */

/// Nom de constante pour `value` dans le rôle `kind`.
#[must_use]
pub fn spelling(kind: MacroType, value: i32, assets: &AssetTable) -> Option<String> {
    let asset = |k: AssetKind| assets.name_of(k, value).map(str::to_owned);
    match kind {
        MacroType::None => None,
        MacroType::Boolean => match value {
            0 => Some("false".to_owned()),
            1 => Some("true".to_owned()),
            _ => None,
        },
        MacroType::Color => constants::name_of(COLORS, value).map(str::to_owned),
        MacroType::Keyboard => constants::name_of(KEYBOARD, value).map(str::to_owned).or_else(|| {
            u8::try_from(value)
                .ok()
                .map(char::from)
                .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
                .map(|c| format!("ord(\"{c}\")"))
        }),
        MacroType::PathEndAction => constants::name_of(PATH_END_ACTIONS, value).map(str::to_owned),
        MacroType::Gamepad => constants::name_of(GAMEPAD, value).map(str::to_owned),
        MacroType::OsType => constants::name_of(OS_TYPES, value).map(str::to_owned),
        MacroType::Object => asset(AssetKind::Object),
        MacroType::Sprite => asset(AssetKind::Sprite),
        MacroType::Font => asset(AssetKind::Font),
        MacroType::Room => asset(AssetKind::Room),
        MacroType::Sound => asset(AssetKind::Sound),
        MacroType::Path => asset(AssetKind::Path),
    }
}

struct Resolver<'a> {
    ast: &'a mut Ast,
    view: View<'a>,
    assets: &'a AssetTable,
}

impl Resolver<'_> {
    /// Type connu d'une expression (variable ou appel typés).
    fn type_of(&self, id: NodeId) -> Option<MacroType> {
        match self.ast.get(id) {
            Node::Variable(v) => self.view.variable(&v.name),
            Node::Call { name, .. } => self.view.returns(name),
            _ => None,
        }
    }

    /// Réécrit `id` (ou les branches d'un ternaire) dans le rôle `kind`.
    fn apply(&mut self, id: NodeId, kind: MacroType) {
        if kind == MacroType::None {
            return;
        }
        if let Node::Conditional { then, otherwise, .. } = *self.ast.get(id) {
            self.apply(then, kind);
            self.apply(otherwise, kind);
            return;
        }
        let Some(value) = integral(self.ast.get(id)) else { return };
        if let Some(name) = spelling(kind, value, self.assets) {
            trace!("{value} spelled {name} as {kind:?}");
            self.ast.replace(id, Node::Constant(name));
        }
    }

    fn node(&mut self, id: NodeId, function: Option<&str>) {
        match self.ast.get(id).clone() {
            Node::Call { name, args } => {
                if let Some(types) = self.view.arguments(self.ast, &name, &args) {
                    for (arg, kind) in args.iter().zip(types) {
                        self.apply(*arg, kind);
                    }
                }
            }
            Node::Binary { comparison: Some(_), left, right, .. } => {
                if let Some(kind) = self.type_of(left) {
                    self.apply(right, kind);
                } else if let Some(kind) = self.type_of(right) {
                    self.apply(left, kind);
                }
            }
            Node::Assign { target, value, kind: AssignKind::Normal, .. } => {
                if let Some(kind) = self.type_of(target) {
                    self.apply(value, kind);
                }
            }
            Node::Switch { value, body } => {
                if let Some(kind) = self.type_of(value) {
                    for item in body {
                        if let Node::SwitchCase(v) = *self.ast.get(item) {
                            self.apply(v, kind);
                        }
                    }
                }
            }
            Node::Return(value) => {
                if let Some(kind) = function.and_then(|f| self.view.returns(f)) {
                    self.apply(value, kind);
                }
            }
            _ => {}
        }
    }
}

/// Applique les règles de `types` à `program`, décodé depuis l'entrée `entry`.
pub fn resolve(program: &mut Program, types: &MacroTypes, entry: &str, assets: &AssetTable) {
    let view = types.view(entry);
    let script = entry.strip_prefix("gml_Script_").map(str::to_owned);
    let mut resolver = Resolver { ast: &mut program.ast, view, assets };

    let mut seen = HashSet::new();
    let mut stack: Vec<(NodeId, Option<String>)> = vec![(program.root, script)];
    while let Some((id, function)) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        resolver.node(id, function.as_deref());
        let inner = match resolver.ast.get(id) {
            Node::Function { child, .. } => Some(child.clone()),
            _ => function,
        };
        for child in resolver.ast.children(id).into_iter().rev() {
            stack.push((child, inner.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clean::clean;
    use crate::decode::decode_entry;
    use crate::testing::compile;
    use crate::write::write_program;
    use gmlc_core::{NameTables, Target};
    use pretty_assertions::assert_eq;

    fn resolved_with(src: &str, types: &MacroTypes, setup: impl FnOnce(&mut NameTables)) -> String {
        let (entry, mut tables) = compile(src);
        setup(&mut tables);
        let target = Target::default();
        let mut program = decode_entry(&entry, &tables).unwrap();
        clean(&mut program, &target, &entry);
        resolve(&mut program, types, &entry.name, &tables.assets);
        write_program(&program, &target, &tables.assets)
    }

    fn resolved(src: &str) -> String {
        resolved_with(src, &MacroTypes::new(), |_| {})
    }

    #[test]
    fn function_arguments_use_constant_names() {
        assert_eq!(resolved("draw_set_color(255);"), "draw_set_color(c_red);\n");
        assert_eq!(resolved("a = keyboard_check(37);"), "a = keyboard_check(vk_left);\n");
        assert_eq!(resolved("a = keyboard_check(65);"), "a = keyboard_check(ord(\"A\"));\n");
    }

    #[test]
    fn typed_variables_and_comparisons() {
        assert_eq!(resolved("image_blend = 16777215;"), "image_blend = c_white;\n");
        assert_eq!(resolved("if (os_type == 4) { a = 1; }"), "if (os_type == os_android)\n{\n    a = 1;\n}\n");
    }

    #[test]
    fn asset_ids_use_asset_names() {
        let out = resolved_with("a = instance_exists(3);", &MacroTypes::new(), |t| {
            t.assets.insert("obj_player", AssetKind::Object, 3);
        });
        assert_eq!(out, "a = instance_exists(obj_player);\n");
    }

    #[test]
    fn unknown_values_are_left_alone() {
        assert_eq!(resolved("draw_set_color(12345);"), "draw_set_color(12345);\n");
    }

    #[test]
    fn json_rules_override_and_add() {
        let mut types = MacroTypes::new();
        types
            .add_json(r#"{ "FunctionArgs": { "draw_set_alpha": ["Boolean"] }, "VariableTypes": { "tint": "Color" } }"#)
            .unwrap();
        assert_eq!(resolved_with("draw_set_alpha(1); tint = 0;", &types, |_| {}), "draw_set_alpha(true);\ntint = c_black;\n");
    }

    #[test]
    fn conditional_rules_pick_the_first_match() {
        let mut types = MacroTypes::new();
        types
            .add_json(
                r#"{ "FunctionArgsCond": { "merge_color": [
                    { "condition": { "argument": 2, "equals": 0 }, "types": ["Color", "None", "None"] },
                    { "types": ["None", "None", "None"] }
                ] } }"#,
            )
            .unwrap();
        assert_eq!(
            resolved_with("a = merge_color(255, 255, 0); b = merge_color(255, 255, 1);", &types, |_| {}),
            "a = merge_color(c_red, 255, 0);\nb = merge_color(255, 255, 1);\n"
        );
    }

    #[test]
    fn entry_overrides_apply_by_object_name() {
        let mut types = MacroTypes::new();
        types.add_json(r#"{ "CodeEntries": { "object: obj_test": { "VariableTypes": { "tint": "Color" } } } }"#).unwrap();
        assert_eq!(resolved_with("tint = 255;", &types, |_| {}), "tint = c_red;\n");
        let view = types.view("gml_Object_obj_test2_Create_0");
        assert_eq!(view.variable("tint"), None);
    }

    #[test]
    fn bad_json_is_an_error() {
        assert!(MacroTypes::new().add_json("{ \"FunctionArgs\": 3 }").is_err());
    }
}
