//! Catalogue compilé : fonctions `(nom, arité)` et variables `(nom, écriture, lecture)`.

use crate::VARIADIC;

/// Fonctions internes émises par le compilateur.
pub const INTERNAL_FUNCTIONS: &[(&str, i32)] = &[
    ("@@NewGMLArray@@", VARIADIC),
    ("@@NewGMLObject@@", VARIADIC),
    ("@@GetInstance@@", 1),
    ("@@This@@", 0),
    ("@@Other@@", 0),
    ("@@Global@@", 0),
    ("@@try_hook@@", 2),
    ("@@try_unhook@@", 0),
    ("@@finish_catch@@", 0),
    ("@@finish_finally@@", 0),
    ("@@throw@@", 1),
    ("method", 2),
];

/// Fonctions courantes du runtime.
pub const FUNCTIONS: &[(&str, i32)] = &[
    // debug / jeu
    ("show_debug_message", 1),
    ("show_message", 1),
    ("game_end", 0),
    ("game_restart", 0),
    ("event_inherited", 0),
    ("event_user", 1),
    ("script_execute", VARIADIC),
    // maths
    ("abs", 1),
    ("sign", 1),
    ("round", 1),
    ("floor", 1),
    ("ceil", 1),
    ("frac", 1),
    ("sqrt", 1),
    ("sqr", 1),
    ("power", 2),
    ("exp", 1),
    ("ln", 1),
    ("sin", 1),
    ("cos", 1),
    ("dsin", 1),
    ("dcos", 1),
    ("arctan2", 2),
    ("min", VARIADIC),
    ("max", VARIADIC),
    ("mean", VARIADIC),
    ("clamp", 3),
    ("lerp", 3),
    ("random", 1),
    ("irandom", 1),
    ("random_range", 2),
    ("irandom_range", 2),
    ("randomize", 0),
    ("choose", VARIADIC),
    ("point_distance", 4),
    ("point_direction", 4),
    ("lengthdir_x", 2),
    ("lengthdir_y", 2),
    ("angle_difference", 2),
    // chaînes / types
    ("string", VARIADIC),
    ("string_length", 1),
    ("string_char_at", 2),
    ("string_copy", 3),
    ("string_pos", 2),
    ("string_upper", 1),
    ("string_lower", 1),
    ("string_replace_all", 3),
    ("real", 1),
    ("ord", 1),
    ("chr", 1),
    ("is_string", 1),
    ("is_real", 1),
    ("is_undefined", 1),
    ("is_struct", 1),
    ("is_method", 1),
    ("typeof", 1),
    // instances
    ("instance_create", 3),
    ("instance_create_depth", 4),
    ("instance_create_layer", 4),
    ("instance_exists", 1),
    ("instance_destroy", VARIADIC),
    ("instance_number", 1),
    ("instance_find", 2),
    ("instance_nearest", 3),
    ("instance_furthest", 3),
    ("instance_place", 3),
    ("instance_position", 3),
    ("instance_change", 2),
    ("instance_copy", 1),
    ("instance_activate_object", 1),
    ("instance_deactivate_object", 1),
    ("instance_deactivate_all", 1),
    ("place_meeting", 3),
    ("place_free", 2),
    ("position_meeting", 3),
    ("collision_point", 5),
    ("collision_line", 7),
    ("collision_rectangle", 7),
    ("collision_circle", 6),
    ("distance_to_object", 1),
    ("distance_to_point", 2),
    ("move_towards_point", 3),
    ("motion_set", 2),
    // dessin
    ("draw_self", 0),
    ("draw_sprite", 4),
    ("draw_sprite_ext", 9),
    ("draw_sprite_part", 8),
    ("draw_sprite_stretched", 6),
    ("draw_text", 3),
    ("draw_text_ext", 5),
    ("draw_text_color", 8),
    ("draw_text_colour", 8),
    ("draw_rectangle", 5),
    ("draw_circle", 4),
    ("draw_line", 4),
    ("draw_set_color", 1),
    ("draw_set_colour", 1),
    ("draw_get_color", 0),
    ("draw_get_colour", 0),
    ("draw_set_alpha", 1),
    ("draw_set_font", 1),
    ("draw_get_font", 0),
    ("draw_set_halign", 1),
    ("draw_set_valign", 1),
    ("merge_color", 3),
    ("merge_colour", 3),
    ("make_color_rgb", 3),
    ("make_colour_rgb", 3),
    // sprites
    ("sprite_exists", 1),
    ("sprite_get_name", 1),
    ("sprite_get_number", 1),
    ("sprite_get_width", 1),
    ("sprite_get_height", 1),
    ("sprite_get_xoffset", 1),
    ("sprite_get_yoffset", 1),
    ("sprite_set_offset", 3),
    ("sprite_delete", 1),
    // rooms
    ("room_goto", 1),
    ("room_goto_next", 0),
    ("room_goto_previous", 0),
    ("room_restart", 0),
    // entrées
    ("keyboard_check", 1),
    ("keyboard_check_pressed", 1),
    ("keyboard_check_released", 1),
    ("keyboard_check_direct", 1),
    ("keyboard_clear", 1),
    ("mouse_check_button", 1),
    ("mouse_check_button_pressed", 1),
    ("gamepad_is_connected", 1),
    ("gamepad_button_check", 2),
    ("gamepad_button_check_pressed", 2),
    ("gamepad_button_check_released", 2),
    ("gamepad_axis_value", 2),
    // audio
    ("audio_play_sound", 3),
    ("audio_stop_sound", 1),
    ("audio_stop_all", 0),
    ("audio_is_playing", 1),
    ("audio_pause_sound", 1),
    ("audio_resume_sound", 1),
    ("audio_sound_gain", 3),
    ("audio_sound_pitch", 2),
    ("audio_exists", 1),
    // chemins
    ("path_start", 4),
    ("path_end", 0),
    ("path_exists", 1),
    ("path_get_length", 1),
    // structures de données
    ("ds_list_create", 0),
    ("ds_list_destroy", 1),
    ("ds_list_add", VARIADIC),
    ("ds_list_size", 1),
    ("ds_list_find_value", 2),
    ("ds_list_set", 3),
    ("ds_map_create", 0),
    ("ds_map_destroy", 1),
    ("ds_map_add", 3),
    ("ds_map_exists", 2),
    ("ds_map_find_value", 2),
    ("ds_map_set", 3),
    ("ds_grid_create", 2),
    ("ds_grid_get", 3),
    ("ds_grid_set", 4),
    // tableaux / structs
    ("array_create", VARIADIC),
    ("array_length", 1),
    ("array_length_1d", 1),
    ("array_push", VARIADIC),
    ("array_pop", 1),
    ("variable_struct_get", 2),
    ("variable_struct_set", 3),
    ("variable_struct_exists", 2),
    ("variable_instance_get", 2),
    ("variable_instance_set", 3),
    ("variable_global_get", 1),
    ("variable_global_set", 2),
    // fichiers / os
    ("file_exists", 1),
    ("get_timer", 0),
    ("os_get_language", 0),
];

/// Variables globales simples.
pub const GLOBAL_VARIABLES: &[(&str, bool, bool)] = &[
    ("room", true, true),
    ("room_first", false, true),
    ("room_last", false, true),
    ("room_width", true, true),
    ("room_height", true, true),
    ("room_speed", true, true),
    ("score", true, true),
    ("lives", true, true),
    ("health", true, true),
    ("fps", false, true),
    ("fps_real", false, true),
    ("current_time", false, true),
    ("delta_time", false, true),
    ("keyboard_key", true, true),
    ("keyboard_lastkey", true, true),
    ("keyboard_lastchar", true, true),
    ("keyboard_string", true, true),
    ("mouse_x", false, true),
    ("mouse_y", false, true),
    ("mouse_button", true, true),
    ("os_type", false, true),
    ("os_device", false, true),
    ("debug_mode", false, true),
    ("instance_count", false, true),
    ("argument_count", false, true),
    ("working_directory", false, true),
    ("game_id", false, true),
];

/// Variables globales tableau.
pub const GLOBAL_ARRAYS: &[(&str, bool, bool)] = &[
    ("view_visible", true, true),
    ("view_xport", true, true),
    ("view_yport", true, true),
    ("view_wport", true, true),
    ("view_hport", true, true),
    ("view_camera", true, true),
    ("instance_id", false, true),
];

/// Tableaux globaux des vues d'avant 2.0.
pub const LEGACY_GLOBAL_ARRAYS: &[(&str, bool, bool)] = &[
    ("view_xview", true, true),
    ("view_yview", true, true),
    ("view_wview", true, true),
    ("view_hview", true, true),
    ("view_angle", true, true),
    ("view_object", true, true),
];

/// Variables d'instance.
pub const INSTANCE_VARIABLES: &[(&str, bool, bool)] = &[
    ("x", true, true),
    ("y", true, true),
    ("xprevious", true, true),
    ("yprevious", true, true),
    ("xstart", true, true),
    ("ystart", true, true),
    ("hspeed", true, true),
    ("vspeed", true, true),
    ("speed", true, true),
    ("direction", true, true),
    ("friction", true, true),
    ("gravity", true, true),
    ("gravity_direction", true, true),
    ("image_index", true, true),
    ("image_speed", true, true),
    ("image_number", false, true),
    ("image_xscale", true, true),
    ("image_yscale", true, true),
    ("image_angle", true, true),
    ("image_alpha", true, true),
    ("image_blend", true, true),
    ("sprite_index", true, true),
    ("sprite_width", false, true),
    ("sprite_height", false, true),
    ("mask_index", true, true),
    ("depth", true, true),
    ("layer", true, true),
    ("visible", true, true),
    ("solid", true, true),
    ("persistent", true, true),
    ("object_index", false, true),
    ("id", false, true),
    ("alarm", true, true),
    ("path_index", false, true),
    ("path_position", true, true),
    ("path_speed", true, true),
    ("path_endaction", true, true),
    ("bbox_left", false, true),
    ("bbox_right", false, true),
    ("bbox_top", false, true),
    ("bbox_bottom", false, true),
];
