//! gmlc-cli — bibliothèque interne du binaire `gmlc`
//!
//! Le binaire ne fait que parser les arguments et initialiser le logger ;
//! la lecture des entrées, le pipeline et l'écriture vivent ici pour rester
//! testables sans processus.
//!
//! Formats manipulés :
//! - sources GML en texte, une entrée de code par fichier (nom de l'entrée =
//!   nom du fichier sans extension, ex. `gml_Script_scr_move.gml`) ;
//! - lot compilé [`Bundle`] en JSON : cible, tables de noms, entrées ;
//! - tables de noms et règles de macros en JSON (`--tables`, `--macro-types`).

#![deny(unused_must_use)]
#![forbid(unsafe_code)]

use std::{
    fmt::Write as _,
    fs,
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::{anyhow, Context, Result};
use gmlc_builtins::Builtins;
use gmlc_compiler::{CompileSession, EntryError};
use gmlc_core::{CodeEntry, NameTables, Pos, Target};
use gmlc_decompiler::{decompile_entries, disassemble, DecompileEnv, MacroTypes};
use gmlc_lexer::{LineMap, MacroTable, ProcessEnv, TokenValue};
use log::debug;
use serde::{Deserialize, Serialize};

#[cfg(feature = "color")]
use owo_colors::OwoColorize;

// ───────────────────────────── Types publics ─────────────────────────────

/// Commande haut-niveau (le parsing CLI reste dans main.rs).
#[derive(Clone, Debug)]
pub enum Command {
    /// Jetons d'une source, identifiants résolus.
    Lex(LexTask),
    /// Sources → lot compilé (JSON) ou listing.
    Compile(CompileTask),
    /// Lot compilé → listing texte.
    Disasm(DisasmTask),
    /// Lot compilé → sources GML.
    Decompile(DecompileTask),
    /// Compile, décompile, recompile et compare.
    Roundtrip(RoundtripTask),
}

#[derive(Clone, Debug, Default)]
pub struct LexTask {
    pub input: Input,
    pub output: Output,
}

#[derive(Clone, Debug, Default)]
pub struct CompileTask {
    pub inputs: Vec<Input>, // une entrée de code par source
    pub output: Output,
    pub listing: bool, // listing texte au lieu du JSON
    pub time: bool,
}

#[derive(Clone, Debug, Default)]
pub struct DisasmTask {
    pub input: Input, // lot JSON
    pub output: Output,
}

#[derive(Clone, Debug, Default)]
pub struct DecompileTask {
    pub input: Input,             // lot JSON
    pub out_dir: Option<PathBuf>, // un `<entrée>.gml` par entrée ; stdout sinon
    pub macros: bool,             // résolution des constantes
    pub time: bool,
}

#[derive(Clone, Debug, Default)]
pub struct RoundtripTask {
    pub inputs: Vec<Input>,
}

/// Entrée texte : fichier ou `-` (=stdin).
#[derive(Clone, Debug)]
pub enum Input {
    Path(PathBuf),
    Stdin,
}
impl Default for Input {
    fn default() -> Self {
        Self::Stdin
    }
}

impl Input {
    /// Nom d'entrée de code associé : nom de fichier sans extension.
    #[must_use]
    pub fn entry_name(&self) -> String {
        match self {
            Self::Path(p) => p.file_stem().map_or_else(|| display(p), |s| s.to_string_lossy().into_owned()),
            Self::Stdin => "stdin".to_owned(),
        }
    }
}

/// Sortie texte.
#[derive(Clone, Debug)]
pub enum Output {
    Path(PathBuf),
    Stdout,
}
impl Default for Output {
    fn default() -> Self {
        Self::Stdout
    }
}

/// Réglages communs à toutes les commandes.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Cible de compilation (les lots compilés portent la leur).
    pub target: Target,
    /// Tables de noms de départ (assets notamment).
    pub tables: Option<PathBuf>,
    /// Fichiers de règles de macros, appliqués dans l'ordre.
    pub macro_types: Vec<PathBuf>,
}

impl Config {
    /// Tables de départ, vides sans `--tables`.
    pub fn load_tables(&self) -> Result<NameTables> {
        let Some(path) = &self.tables else {
            return Ok(NameTables::new());
        };
        let text = fs::read_to_string(path).with_context(|| format!("lecture des tables: {}", display(path)))?;
        serde_json::from_str(&text).with_context(|| format!("tables de noms invalides: {}", display(path)))
    }

    /// Tables de types intégrées, complétées par chaque fichier de règles.
    pub fn load_macros(&self) -> Result<MacroTypes> {
        let mut types = MacroTypes::new();
        for path in &self.macro_types {
            let text = fs::read_to_string(path).with_context(|| format!("lecture des règles: {}", display(path)))?;
            types.add_json(&text).with_context(|| format!("règles de macros invalides: {}", display(path)))?;
        }
        Ok(types)
    }
}

/// Cible décrite par un document JSON (champs absents = valeurs par défaut).
pub fn load_target(path: &Path) -> Result<Target> {
    let text = fs::read_to_string(path).with_context(|| format!("lecture de la cible: {}", display(path)))?;
    serde_json::from_str(&text).with_context(|| format!("cible invalide: {}", display(path)))
}

/// Résultat de `compile` : ce qu'il faut pour désassembler ou décompiler plus tard.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Bundle {
    pub target: Target,
    pub tables: NameTables,
    pub entries: Vec<CodeEntry>,
}

impl Bundle {
    pub fn read(input: &Input) -> Result<Self> {
        let text = read_source(input)?;
        serde_json::from_str(&text).context("lot compilé invalide")
    }

    pub fn to_json(&self) -> Result<String> {
        let mut s = serde_json::to_string_pretty(self)?;
        s.push('\n');
        Ok(s)
    }

    /// Listings de toutes les entrées, dans l'ordre.
    pub fn listing(&self) -> Result<String> {
        let mut out = String::new();
        for entry in &self.entries {
            let text = disassemble(entry, &self.tables).with_context(|| format!("désassemblage de {}", entry.name))?;
            out.push_str(&text);
            out.push('\n');
        }
        Ok(out)
    }
}

// ───────────────────────────── Initialisation ─────────────────────────────

/// Initialise le logger selon la feature `trace`.
pub fn init_logger() {
    #[cfg(feature = "trace")]
    {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
            .format_timestamp_secs()
            .try_init();
    }
}

// ───────────────────────────── Exécution ─────────────────────────────

/// Exécute une commande. Retourne un code de sortie (1 si une entrée a échoué).
pub fn execute(cmd: Command, config: &Config) -> Result<i32> {
    match cmd {
        Command::Lex(t) => lex_entry(t, config),
        Command::Compile(t) => compile_entry(t, config),
        Command::Disasm(t) => {
            let bundle = Bundle::read(&t.input)?;
            write_output(&t.output, &bundle.listing()?)?;
            Ok(0)
        },
        Command::Decompile(t) => decompile_entry(t, config),
        Command::Roundtrip(t) => roundtrip_entry(t, config),
    }
}

fn lex_entry(task: LexTask, config: &Config) -> Result<i32> {
    let src = read_source(&task.input).context("lecture de la source")?;
    let tables = config.load_tables()?;
    let builtins = Builtins::new(&config.target);
    let mut macros = MacroTable::new();

    let mut out = gmlc_lexer::lex(&src, &config.target, &mut macros);
    let mut errors = std::mem::take(&mut out.errors);
    let env = ProcessEnv { builtins: &builtins, macros: &macros, assets: &tables.assets, target: &config.target };
    errors.extend(gmlc_lexer::process_identifiers(&mut out.tokens, &env));

    let lines = LineMap::new(&src);
    let mut text = String::new();
    for token in &out.tokens {
        let (line, col) = lines.line_col(token.pos);
        let _ = writeln!(text, "{line}:{col}\t{:?}{}", token.kind, token_value(&token.value));
    }
    write_output(&task.output, &text)?;

    for e in &errors {
        status_err("LEX", &at(&lines, e.pos, &e.to_string()));
    }
    Ok(i32::from(!errors.is_empty()))
}

fn compile_entry(task: CompileTask, config: &Config) -> Result<i32> {
    let sources = read_sources(&task.inputs)?;
    let mut tables = config.load_tables()?;

    let start = Instant::now();
    let mut session = CompileSession::new(config.target).with_assets(tables.assets.clone());
    let results = session.compile_sources(&sources, &mut tables);
    let elapsed = start.elapsed();

    let mut failed = 0usize;
    let mut entries = Vec::with_capacity(results.len());
    for ((_, src), result) in sources.iter().zip(results) {
        match result {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                failed += 1;
                report_entry_error(src, &e);
            },
        }
    }

    let bundle = Bundle { target: config.target, tables, entries };
    let text = if task.listing { bundle.listing()? } else { bundle.to_json()? };
    write_output(&task.output, &text)?;
    status_ok("COMPILE", &format!("{} entries, {failed} failed", bundle.entries.len()));

    if task.time {
        status_info("TIME", &format!("compile: {} ms", elapsed.as_millis()));
    }
    Ok(i32::from(failed > 0))
}

fn decompile_entry(task: DecompileTask, config: &Config) -> Result<i32> {
    let bundle = Bundle::read(&task.input)?;
    let macros = if task.macros { Some(config.load_macros()?) } else { None };
    let env = DecompileEnv { target: &bundle.target, tables: &bundle.tables, macros: macros.as_ref() };

    let start = Instant::now();
    let results = decompile_entries(&bundle.entries, &env);
    let elapsed = start.elapsed();

    if let Some(dir) = &task.out_dir {
        fs::create_dir_all(dir).with_context(|| format!("création de {}", display(dir)))?;
    }
    let mut failed = 0usize;
    let mut combined = String::new();
    for (entry, result) in bundle.entries.iter().zip(results) {
        match (result, &task.out_dir) {
            (Ok(text), Some(dir)) => {
                let path = dir.join(format!("{}.gml", entry.name));
                write_text_atomic(&path, &text).with_context(|| format!("écriture de {}", display(&path)))?;
            },
            (Ok(text), None) => {
                let _ = write!(combined, "// {}\n{text}\n", entry.name);
            },
            (Err(e), _) => {
                failed += 1;
                status_err("DECOMPILE", &format!("{}: {e}", entry.name));
            },
        }
    }
    if task.out_dir.is_none() {
        write_output(&Output::Stdout, &combined)?;
    }
    status_ok("DECOMPILE", &format!("{} entries, {failed} failed", bundle.entries.len()));

    if task.time {
        status_info("TIME", &format!("decompile: {} ms", elapsed.as_millis()));
    }
    Ok(i32::from(failed > 0))
}

fn roundtrip_entry(task: RoundtripTask, config: &Config) -> Result<i32> {
    let sources = read_sources(&task.inputs)?;
    let base = config.load_tables()?;

    let mut tables = base.clone();
    let mut session = CompileSession::new(config.target).with_assets(base.assets.clone());
    let results = session.compile_sources(&sources, &mut tables);
    let known: Vec<String> = session.functions().iter().cloned().collect();
    let env = DecompileEnv { target: &config.target, tables: &tables, macros: None };

    let mut mismatched = 0usize;
    for ((name, src), result) in sources.iter().zip(results) {
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                mismatched += 1;
                report_entry_error(src, &e);
                continue;
            },
        };
        match recompile_matches(&entry, &env, &base, &known) {
            Ok(None) => status_ok("SAME", name),
            Ok(Some(text)) => {
                mismatched += 1;
                status_err("DIFF", name);
                debug!("{name} decompiled as:\n{text}");
            },
            Err(e) => {
                mismatched += 1;
                status_err("FAIL", &format!("{name}: {e:#}"));
            },
        }
    }
    Ok(i32::from(mismatched > 0))
}

/// `None` si la source décompilée redonne le même listing, sinon cette source.
fn recompile_matches(
    entry: &CodeEntry,
    env: &DecompileEnv<'_>,
    base: &NameTables,
    known: &[String],
) -> Result<Option<String>> {
    let text = gmlc_decompiler::decompile_entry(entry, env)?;

    let mut tables = base.clone();
    let mut session = CompileSession::new(*env.target).with_assets(base.assets.clone());
    for name in known {
        session.add_function(name.clone());
    }
    let sources = vec![(entry.name.clone(), text.clone())];
    let again = session
        .compile_sources(&sources, &mut tables)
        .pop()
        .ok_or_else(|| anyhow!("aucune entrée recompilée"))?
        .context("recompilation")?;

    let before = disassemble(entry, env.tables)?;
    let after = disassemble(&again, &tables)?;
    Ok((before != after).then_some(text))
}

// ───────────────────────────── Diagnostics ─────────────────────────────

fn report_entry_error(src: &str, err: &EntryError) {
    let lines = LineMap::new(src);
    match err {
        EntryError::Lex { entry, errors } => {
            for e in errors {
                status_err("LEX", &format!("{entry}:{}", at(&lines, e.pos, &e.to_string())));
            }
        },
        EntryError::Parse { entry, source } => {
            status_err("PARSE", &format!("{entry}:{}", at(&lines, source.pos, &source.to_string())));
        },
        EntryError::Compile { entry, source } => {
            status_err("COMPILE", &format!("{entry}:{}", at(&lines, source.pos, &source.to_string())));
        },
    }
}

fn at(lines: &LineMap, pos: Pos, message: &str) -> String {
    let (line, col) = lines.line_col(pos);
    format!("{line}:{col}: {message}")
}

fn token_value(value: &TokenValue) -> String {
    match value {
        TokenValue::None => String::new(),
        TokenValue::Identifier(name) => format!("\t{name}"),
        TokenValue::Constant(c) => match &c.name {
            Some(name) => format!("\t{name} = {:?}", c.value),
            None => format!("\t{:?}", c.value),
        },
        TokenValue::Variable(v) => format!("\t{}", v.name),
        TokenValue::Function(f) => format!("\t{}()", f.name),
    }
}

// ───────────────────────────── Utilitaires E/S ─────────────────────────────

fn read_source(input: &Input) -> Result<String> {
    match input {
        Input::Stdin => {
            let mut s = String::new();
            io::stdin().read_to_string(&mut s)?;
            Ok(s)
        },
        Input::Path(p) => {
            let f = File::open(p).with_context(|| format!("ouverture: {}", display(p)))?;
            let mut r = BufReader::new(f);
            let mut s = String::new();
            r.read_to_string(&mut s)?;
            Ok(s)
        },
    }
}

/// `(nom d'entrée, source)` par entrée ; stdin seul par défaut.
fn read_sources(inputs: &[Input]) -> Result<Vec<(String, String)>> {
    if inputs.is_empty() {
        return Ok(vec![(Input::Stdin.entry_name(), read_source(&Input::Stdin)?)]);
    }
    inputs.iter().map(|input| Ok((input.entry_name(), read_source(input)?))).collect()
}

fn write_output(output: &Output, text: &str) -> Result<()> {
    match output {
        Output::Stdout => {
            let mut w = BufWriter::new(io::stdout().lock());
            w.write_all(text.as_bytes())?;
            w.flush()?;
            Ok(())
        },
        Output::Path(p) => write_text_atomic(p, text).with_context(|| format!("écriture de {}", display(p))),
    }
}

fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let base = path.file_name().ok_or_else(|| anyhow!("chemin de sortie sans nom: {}", display(path)))?;
    let tmp = unique_tmp_path(parent, base);
    {
        let mut w = BufWriter::new(File::create(&tmp)?);
        w.write_all(bytes)?;
        w.flush()?;
    }
    if path.exists() {
        // Windows : Rename sur cible existante peut échouer
        let _ = fs::remove_file(path);
    }
    fs::rename(&tmp, path).or_else(|_| fs::copy(&tmp, path).map(|_| ()).and_then(|()| fs::remove_file(&tmp)))?;
    Ok(())
}

fn write_text_atomic(path: &Path, text: &str) -> Result<()> {
    write_bytes_atomic(path, text.as_bytes())
}

fn unique_tmp_path(dir: &Path, base: &std::ffi::OsStr) -> PathBuf {
    let mut i = 0u32;
    loop {
        let candidate = dir.join(format!("{}.tmp{}", base.to_string_lossy(), i));
        if !candidate.exists() {
            return candidate;
        }
        i = i.wrapping_add(1);
    }
}

fn display(p: &Path) -> String {
    p.to_string_lossy().to_string()
}

// ───────────────────────────── Sorties jolies ─────────────────────────────

fn status_ok(tag: &str, msg: &str) {
    #[cfg(feature = "color")]
    {
        eprintln!("{} {}", tag.green().bold(), msg);
    }
    #[cfg(not(feature = "color"))]
    {
        eprintln!("{} {}", tag, msg);
    }
}

fn status_info(tag: &str, msg: &str) {
    #[cfg(feature = "color")]
    {
        eprintln!("{} {}", tag.blue().bold(), msg);
    }
    #[cfg(not(feature = "color"))]
    {
        eprintln!("{} {}", tag, msg);
    }
}

fn status_err(tag: &str, msg: &str) {
    #[cfg(feature = "color")]
    {
        eprintln!("{} {}", tag.red().bold(), msg);
    }
    #[cfg(not(feature = "color"))]
    {
        eprintln!("{} {}", tag, msg);
    }
}

// ───────────────────────────── Tests ─────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use gmlc_core::GameVersion;
    use pretty_assertions::assert_eq;

    fn write_file(dir: &Path, name: &str, text: &str) -> PathBuf {
        let p = dir.join(name);
        fs::write(&p, text).unwrap();
        p
    }

    fn compile_to(dir: &Path, sources: &[PathBuf], listing: bool) -> (i32, PathBuf) {
        let out = dir.join(if listing { "out.asm" } else { "out.json" });
        let task = CompileTask {
            inputs: sources.iter().cloned().map(Input::Path).collect(),
            output: Output::Path(out.clone()),
            listing,
            time: false,
        };
        (execute(Command::Compile(task), &Config::default()).unwrap(), out)
    }

    #[test]
    fn entry_names_come_from_file_stems() {
        assert_eq!(Input::Path(PathBuf::from("src/gml_Script_move.gml")).entry_name(), "gml_Script_move");
        assert_eq!(Input::Stdin.entry_name(), "stdin");
    }

    #[test]
    fn compile_then_decompile_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(dir.path(), "gml_Script_demo.gml", "var a = 1; b = a + 2;");
        let (code, bundle) = compile_to(dir.path(), &[src], false);
        assert_eq!(code, 0);

        let out_dir = dir.path().join("decompiled");
        let task = DecompileTask { input: Input::Path(bundle), out_dir: Some(out_dir.clone()), macros: false, time: false };
        assert_eq!(execute(Command::Decompile(task), &Config::default()).unwrap(), 0);
        let text = fs::read_to_string(out_dir.join("gml_Script_demo.gml")).unwrap();
        assert_eq!(text, "var a = 1;\nb = a + 2;\n");
    }

    #[test]
    fn listing_names_each_entry() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "gml_Script_one.gml", "a = 1;");
        let b = write_file(dir.path(), "gml_Script_two.gml", "b = 2;");
        let (code, out) = compile_to(dir.path(), &[a, b], true);
        assert_eq!(code, 0);
        let text = fs::read_to_string(out).unwrap();
        assert!(text.contains("# Name: gml_Script_one"));
        assert!(text.contains("# Name: gml_Script_two"));
    }

    #[test]
    fn failing_entries_set_the_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_file(dir.path(), "gml_Script_good.gml", "a = 1;");
        let bad = write_file(dir.path(), "gml_Script_bad.gml", "a = ;");
        let (code, out) = compile_to(dir.path(), &[good, bad], false);
        assert_eq!(code, 1);
        let bundle = Bundle::read(&Input::Path(out)).unwrap();
        let names: Vec<&str> = bundle.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["gml_Script_good"]);
    }

    #[test]
    fn roundtrip_of_a_simple_script() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_file(dir.path(), "gml_Object_obj_a_Step_0.gml", "if (hp < 10) { hp += 1; } else { hp = 0; }");
        let task = RoundtripTask { inputs: vec![Input::Path(src)] };
        assert_eq!(execute(Command::Roundtrip(task), &Config::default()).unwrap(), 0);
    }

    #[test]
    fn target_documents_fill_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let p = write_file(dir.path(), "target.json", r#"{ "version": "gms1" }"#);
        let target = load_target(&p).unwrap();
        assert_eq!(target.version, GameVersion::Gms1);
        assert_eq!(target.short_circuit, Target::default().short_circuit);
    }

    #[test]
    fn macro_rule_files_are_checked() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_file(dir.path(), "good.json", r#"{ "VariableTypes": { "door_color": "Color" } }"#);
        let bad = write_file(dir.path(), "bad.json", "{ not json");
        let config = Config { macro_types: vec![good.clone()], ..Config::default() };
        assert!(config.load_macros().is_ok());
        let config = Config { macro_types: vec![good, bad], ..Config::default() };
        assert!(config.load_macros().is_err());
    }
}
