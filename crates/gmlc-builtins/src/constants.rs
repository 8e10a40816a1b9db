//! Tables de constantes nommées `(nom, valeur)`.
//!
//! L'ordre compte : pour une valeur partagée par plusieurs noms, le premier
//! nom est celui que le décompilateur affiche.

/// Couleurs (BGR).
pub const COLORS: &[(&str, i32)] = &[
    ("c_aqua", 16_776_960),
    ("c_black", 0),
    ("c_blue", 16_711_680),
    ("c_dkgray", 4_210_752),
    ("c_fuchsia", 16_711_935),
    ("c_gray", 8_421_504),
    ("c_green", 32_768),
    ("c_lime", 65_280),
    ("c_ltgray", 12_632_256),
    ("c_maroon", 128),
    ("c_navy", 8_388_608),
    ("c_olive", 32_896),
    ("c_purple", 8_388_736),
    ("c_red", 255),
    ("c_silver", 12_632_256),
    ("c_teal", 8_421_376),
    ("c_white", 16_777_215),
    ("c_yellow", 65_535),
    ("c_orange", 4_235_519),
];

/// Touches clavier.
pub const KEYBOARD: &[(&str, i32)] = &[
    ("vk_nokey", 0),
    ("vk_anykey", 1),
    ("vk_backspace", 8),
    ("vk_tab", 9),
    ("vk_enter", 13),
    ("vk_shift", 16),
    ("vk_control", 17),
    ("vk_alt", 18),
    ("vk_pause", 19),
    ("vk_escape", 27),
    ("vk_space", 32),
    ("vk_pageup", 33),
    ("vk_pagedown", 34),
    ("vk_end", 35),
    ("vk_home", 36),
    ("vk_left", 37),
    ("vk_up", 38),
    ("vk_right", 39),
    ("vk_down", 40),
    ("vk_printscreen", 44),
    ("vk_insert", 45),
    ("vk_delete", 46),
    ("vk_numpad0", 96),
    ("vk_numpad1", 97),
    ("vk_numpad2", 98),
    ("vk_numpad3", 99),
    ("vk_numpad4", 100),
    ("vk_numpad5", 101),
    ("vk_numpad6", 102),
    ("vk_numpad7", 103),
    ("vk_numpad8", 104),
    ("vk_numpad9", 105),
    ("vk_multiply", 106),
    ("vk_add", 107),
    ("vk_subtract", 109),
    ("vk_decimal", 110),
    ("vk_divide", 111),
    ("vk_f1", 112),
    ("vk_f2", 113),
    ("vk_f3", 114),
    ("vk_f4", 115),
    ("vk_f5", 116),
    ("vk_f6", 117),
    ("vk_f7", 118),
    ("vk_f8", 119),
    ("vk_f9", 120),
    ("vk_f10", 121),
    ("vk_f11", 122),
    ("vk_f12", 123),
    ("vk_lshift", 160),
    ("vk_rshift", 161),
    ("vk_lcontrol", 162),
    ("vk_rcontrol", 163),
    ("vk_lalt", 164),
    ("vk_ralt", 165),
];

/// Actions de fin de chemin.
pub const PATH_END_ACTIONS: &[(&str, i32)] = &[
    ("path_action_stop", 0),
    ("path_action_restart", 1),
    ("path_action_continue", 2),
    ("path_action_reverse", 3),
];

/// Boutons et axes de manette.
pub const GAMEPAD: &[(&str, i32)] = &[
    ("gp_face1", 32_769),
    ("gp_face2", 32_770),
    ("gp_face3", 32_771),
    ("gp_face4", 32_772),
    ("gp_shoulderl", 32_773),
    ("gp_shoulderr", 32_774),
    ("gp_shoulderlb", 32_775),
    ("gp_shoulderrb", 32_776),
    ("gp_select", 32_777),
    ("gp_start", 32_778),
    ("gp_stickl", 32_779),
    ("gp_stickr", 32_780),
    ("gp_padu", 32_781),
    ("gp_padd", 32_782),
    ("gp_padl", 32_783),
    ("gp_padr", 32_784),
    ("gp_axislh", 32_785),
    ("gp_axislv", 32_786),
    ("gp_axisrh", 32_787),
    ("gp_axisrv", 32_788),
];

/// Systèmes d'exploitation.
pub const OS_TYPES: &[(&str, i32)] = &[
    ("os_unknown", -1),
    ("os_windows", 0),
    ("os_macosx", 1),
    ("os_psp", 2),
    ("os_ios", 3),
    ("os_android", 4),
    ("os_symbian", 5),
    ("os_linux", 6),
    ("os_winphone", 7),
    ("os_tizen", 8),
    ("os_win8native", 9),
    ("os_wiiu", 10),
    ("os_3ds", 11),
    ("os_psvita", 12),
    ("os_bb10", 13),
    ("os_ps4", 14),
    ("os_xboxone", 15),
    ("os_ps3", 16),
    ("os_xbox360", 17),
    ("os_uwp", 18),
    ("os_tvos", 20),
    ("os_switch", 21),
    ("os_ps5", 22),
    ("os_xboxseriesxs", 23),
    ("os_operagx", 24),
];

/// Toutes les tables, enregistrées comme constantes du langage.
pub const ALL_TABLES: &[&[(&str, i32)]] = &[COLORS, KEYBOARD, PATH_END_ACTIONS, GAMEPAD, OS_TYPES];

/// Premier nom associé à `value` dans `table`.
#[must_use]
pub fn name_of(table: &[(&'static str, i32)], value: i32) -> Option<&'static str> {
    table.iter().find(|(_, v)| *v == value).map(|(n, _)| *n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_name_wins_for_shared_values() {
        assert_eq!(name_of(COLORS, 12_632_256), Some("c_ltgray"));
        assert_eq!(name_of(OS_TYPES, -1), Some("os_unknown"));
        assert_eq!(name_of(KEYBOARD, 65), None);
    }
}
