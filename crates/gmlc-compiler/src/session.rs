//! Compilation de plusieurs entrées partageant macros, assets et fonctions.
//!
//! Déroulé de [`CompileSession::compile_sources`] :
//! 1. lexing séquentiel (les `#macro` de toutes les entrées rejoignent la table)
//! 2. résolution des identifiants en parallèle, table de macros figée
//! 3. relevé des `enum` et des fonctions déclarées dans toutes les entrées
//! 4. analyse syntaxique et émission en parallèle
//! 5. résolution des noms, séquentielle, dans l'ordre des entrées

use gmlc_builtins::Builtins;
use gmlc_core::{AssetTable, CodeEntry, NameTables, Target};
use gmlc_lexer::{lex, process_identifiers, LexError, MacroTable, ProcessEnv, Token, TokenKind};
use gmlc_parser::{collect_enums, EnumTable, Parser};
use indexmap::IndexSet;
use log::{debug, trace};
use rayon::prelude::*;

use crate::context::{CompileEnv, PendingEntry};
use crate::{compile_program, EntryError};

/// Préfixe des entrées de script ; le reste du nom est une fonction appelable.
const SCRIPT_PREFIX: &str = "gml_Script_";

/// État partagé d'une compilation multi-entrées.
#[derive(Debug)]
pub struct CompileSession {
    target: Target,
    builtins: Builtins,
    macros: MacroTable,
    assets: AssetTable,
    functions: IndexSet<String>,
}

impl CompileSession {
    /// Session vide pour `target`.
    #[must_use]
    pub fn new(target: Target) -> Self {
        Self {
            builtins: Builtins::new(&target),
            target,
            macros: MacroTable::new(),
            assets: AssetTable::new(),
            functions: IndexSet::new(),
        }
    }

    /// Remplace la table d'assets.
    #[must_use]
    pub fn with_assets(mut self, assets: AssetTable) -> Self {
        self.assets = assets;
        self
    }

    /// Déclare une fonction utilisateur appelable depuis toutes les entrées.
    pub fn add_function(&mut self, name: impl Into<String>) {
        self.functions.insert(name.into());
    }

    /// Cible.
    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// Noms intégrés de la cible.
    #[must_use]
    pub const fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    /// Macros enregistrées jusqu'ici.
    #[must_use]
    pub const fn macros(&self) -> &MacroTable {
        &self.macros
    }

    /// Fonctions utilisateur connues.
    #[must_use]
    pub const fn functions(&self) -> &IndexSet<String> {
        &self.functions
    }

    /// Compile puis résout chaque `(nom, source)` dans `tables`. Les
    /// fonctions déjà présentes dans `tables` sont appelables.
    pub fn compile_sources(
        &mut self,
        sources: &[(String, String)],
        tables: &mut NameTables,
    ) -> Vec<Result<CodeEntry, EntryError>> {
        self.functions.extend(tables.functions.iter().filter(|f| !f.starts_with("@@")).cloned());
        self.compile_pending(sources)
            .into_iter()
            .map(|r| r.map(|pending| pending.resolve(tables)))
            .collect()
    }

    /// Phase 1 seule : une [`PendingEntry`] (ou une erreur) par source.
    pub fn compile_pending(&mut self, sources: &[(String, String)]) -> Vec<Result<PendingEntry, EntryError>> {
        debug!("compiling {} entries for {:?}", sources.len(), self.target.version);

        let lexed: Vec<(Vec<Token>, Vec<LexError>)> = sources
            .iter()
            .map(|(_, src)| {
                let out = lex(src, &self.target, &mut self.macros);
                (out.tokens, out.errors)
            })
            .collect();
        trace!("{} macros registered", self.macros.len());

        let env = ProcessEnv { builtins: &self.builtins, macros: &self.macros, assets: &self.assets, target: &self.target };
        let processed: Vec<(Vec<Token>, Vec<LexError>)> = lexed
            .into_par_iter()
            .map(|(mut tokens, mut errors)| {
                errors.extend(process_identifiers(&mut tokens, &env));
                (tokens, errors)
            })
            .collect();

        let mut enums = EnumTable::new();
        for (tokens, _) in &processed {
            collect_enums(tokens, &self.builtins, &mut enums);
            self.functions.extend(declared_functions(tokens));
        }
        for (name, _) in sources {
            if let Some(script) = name.strip_prefix(SCRIPT_PREFIX) {
                self.functions.insert(script.to_owned());
            }
        }
        trace!("{} enums, {} known functions", enums.len(), self.functions.len());

        let env = CompileEnv { target: &self.target, builtins: &self.builtins, functions: &self.functions };
        sources
            .par_iter()
            .zip(processed.into_par_iter())
            .map(|((name, _), (tokens, errors))| compile_entry(env, &enums, name, &tokens, errors))
            .collect()
    }
}

fn compile_entry(
    env: CompileEnv<'_>,
    enums: &EnumTable,
    name: &str,
    tokens: &[Token],
    errors: Vec<LexError>,
) -> Result<PendingEntry, EntryError> {
    if !errors.is_empty() {
        return Err(EntryError::Lex { entry: name.to_owned(), errors });
    }
    let program = Parser::new(tokens, env.builtins, enums)
        .parse_program()
        .map_err(|source| EntryError::Parse { entry: name.to_owned(), source })?;
    compile_program(env, name, &program).map_err(|source| EntryError::Compile { entry: name.to_owned(), source })
}

/// Noms des `function nom(` d'un flux de jetons.
fn declared_functions(tokens: &[Token]) -> impl Iterator<Item = String> + '_ {
    tokens.windows(2).filter_map(|w| match (&w[0].kind, &w[1].kind) {
        (TokenKind::FunctionDecl, TokenKind::Function) => w[1].name().map(str::to_owned),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompileErrorKind;
    use gmlc_core::{AssetKind, Value};
    use pretty_assertions::assert_eq;

    fn sources(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter().map(|(n, s)| ((*n).to_owned(), (*s).to_owned())).collect()
    }

    #[test]
    fn macros_are_shared_across_entries() {
        let mut session = CompileSession::new(Target::default());
        let mut tables = NameTables::new();
        let out = session.compile_sources(
            &sources(&[("gml_Script_defs", "#macro LIMIT 40"), ("gml_Script_use", "foo = LIMIT;")]),
            &mut tables,
        );
        assert!(out.iter().all(Result::is_ok));
        let used = out[1].as_ref().unwrap();
        assert_eq!(used.instructions[0].value, Value::Int16(40));
        assert!(session.macros().contains("LIMIT"));
    }

    #[test]
    fn functions_declared_elsewhere_are_callable() {
        let mut session = CompileSession::new(Target::default());
        let mut tables = NameTables::new();
        let out = session.compile_sources(
            &sources(&[
                ("gml_Script_a", "function greet() { return 1; }"),
                ("gml_Script_b", "greet(); scr_other();"),
                ("gml_Script_scr_other", "exit;"),
            ]),
            &mut tables,
        );
        assert!(out.iter().all(Result::is_ok), "{out:?}");
        assert!(session.functions().contains("greet"));
        assert!(tables.function_id("scr_other").is_some());
    }

    #[test]
    fn functions_of_the_name_tables_are_callable() {
        let mut tables = NameTables::new();
        tables.intern_function("scr_existing");
        let mut session = CompileSession::new(Target::for_version(gmlc_core::GameVersion::Gms2));
        let out = session.compile_sources(&sources(&[("e", "scr_existing(1);")]), &mut tables);
        assert!(out[0].is_ok(), "{out:?}");
        assert!(session.functions().contains("scr_existing"));
    }

    #[test]
    fn errors_stay_in_their_entry() {
        let mut session = CompileSession::new(Target::default());
        let mut tables = NameTables::new();
        let out = session.compile_sources(
            &sources(&[("ok", "foo = 1;"), ("bad_parse", "foo = ;"), ("bad_compile", "break;"), ("after", "bar = 2;")]),
            &mut tables,
        );
        assert!(out[0].is_ok());
        assert!(matches!(&out[1], Err(EntryError::Parse { entry, .. }) if entry == "bad_parse"));
        match &out[2] {
            Err(EntryError::Compile { source, .. }) => assert_eq!(source.kind, CompileErrorKind::BreakOutsideLoop),
            other => panic!("unexpected {other:?}"),
        }
        assert!(out[3].is_ok());
    }

    #[test]
    fn lex_errors_fail_the_entry() {
        let mut session = CompileSession::new(Target::default());
        let out = session.compile_pending(&sources(&[("e", "foo = \"open;")]));
        assert!(matches!(&out[0], Err(EntryError::Lex { errors, .. }) if !errors.is_empty()));
    }

    #[test]
    fn assets_become_constants() {
        let mut assets = AssetTable::new();
        assets.insert("spr_player", AssetKind::Sprite, 7);
        let mut session = CompileSession::new(Target::default()).with_assets(assets);
        let out = session.compile_pending(&sources(&[("e", "foo = spr_player;")]));
        let entry = out[0].as_ref().unwrap();
        assert_eq!(entry.instructions[0].value, Value::Int16(7));
    }

    #[test]
    fn results_follow_input_order() {
        let mut session = CompileSession::new(Target::default());
        let list: Vec<(String, String)> = (0..32).map(|i| (format!("e{i}"), format!("foo = {i};"))).collect();
        let out = session.compile_pending(&list);
        let names: Vec<&str> = out.iter().map(|r| r.as_ref().map_or("?", |p| p.name.as_str())).collect();
        assert_eq!(names, list.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>());
    }
}
