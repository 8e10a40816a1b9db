//! `gmlc` — CLI du compilateur/décompilateur GML
//!
//! Ici on fait uniquement : parsing d'arguments, initialisation du logger,
//! construction de la cible et délégation à `gmlc_cli` (lib).

#![forbid(unsafe_code)]

use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use gmlc_core::{GameVersion, Target};

use gmlc_cli as cli;

// ──────────────────────────── CLI (clap) ────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "gmlc", version, about = "Bytecode GML : compiler, désassembler, décompiler", long_about = None)]
struct Opt {
    /// Augmente la verbosité (-v, -vv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux (casse la verbosité)
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue, global = true)]
    quiet: bool,

    #[command(flatten)]
    target: TargetArgs,

    /// Tables de noms de départ (JSON : strings, functions, variables, assets)
    #[arg(long, global = true)]
    tables: Option<PathBuf>,

    /// Règles de macros (JSON), répétable
    #[arg(long = "macro-types", global = true)]
    macro_types: Vec<PathBuf>,

    /// Sous-commandes
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Args)]
struct TargetArgs {
    /// Cible complète (JSON) ; exclut les drapeaux ci-dessous
    #[arg(long, global = true, conflicts_with_all = ["gm_version", "short_circuit", "format_id"])]
    target: Option<PathBuf>,

    /// Génération du runtime
    #[arg(long = "gm-version", value_enum, global = true)]
    gm_version: Option<VersionArg>,

    /// Évaluation paresseuse de `and`/`or`
    #[arg(long = "short-circuit", global = true)]
    short_circuit: Option<bool>,

    /// Id de format du conteneur
    #[arg(long = "format-id", global = true)]
    format_id: Option<u8>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VersionArg {
    Gms1,
    Gms2,
    #[value(name = "gms2_3")]
    Gms23,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Afficher les jetons d'une source (identifiants résolus)
    Lex {
        /// Fichier source (ou - pour stdin)
        input: Option<PathBuf>,
        /// Fichier de sortie (stdout si omis)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compiler des sources (une entrée de code par fichier) vers un lot JSON
    Compile {
        /// Fichiers sources (stdin si aucun)
        inputs: Vec<PathBuf>,
        /// Fichier de sortie (stdout si omis)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Écrire le listing au lieu du lot JSON
        #[arg(long)]
        listing: bool,
        /// Afficher le temps de compilation
        #[arg(long)]
        time: bool,
    },

    /// Désassembler un lot compilé
    Disasm {
        /// Lot JSON (ou - pour stdin)
        input: Option<PathBuf>,
        /// Sortie texte (stdout si omis)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Décompiler un lot compilé vers du GML
    Decompile {
        /// Lot JSON (ou - pour stdin)
        input: Option<PathBuf>,
        /// Dossier de sortie, un `<entrée>.gml` par entrée (stdout si omis)
        #[arg(short = 'd', long = "out-dir")]
        out_dir: Option<PathBuf>,
        /// Laisser les littéraux tels quels (pas de résolution de constantes)
        #[arg(long = "no-macros")]
        no_macros: bool,
        /// Afficher le temps de décompilation
        #[arg(long)]
        time: bool,
    },

    /// Compiler, décompiler, recompiler et comparer les listings
    Roundtrip {
        /// Fichiers sources (stdin si aucun)
        inputs: Vec<PathBuf>,
    },
}

// ──────────────────────────── Entrée / Sortie ────────────────────────────

fn input_from_opt(p: Option<PathBuf>) -> cli::Input {
    match p {
        Some(path) if path.as_os_str() == "-" => cli::Input::Stdin,
        Some(path) => cli::Input::Path(path),
        None => cli::Input::Stdin,
    }
}

fn inputs_from_opt(paths: Vec<PathBuf>) -> Vec<cli::Input> {
    paths.into_iter().map(|p| input_from_opt(Some(p))).collect()
}

fn output_from_opt(output: Option<PathBuf>) -> cli::Output {
    output.map_or(cli::Output::Stdout, cli::Output::Path)
}

// ──────────────────────────── Cible ────────────────────────────

fn target_from_args(args: &TargetArgs) -> Result<Target> {
    if let Some(path) = &args.target {
        return cli::load_target(path);
    }
    let version = match args.gm_version {
        Some(VersionArg::Gms1) => GameVersion::Gms1,
        Some(VersionArg::Gms2) => GameVersion::Gms2,
        Some(VersionArg::Gms23) | None => GameVersion::Gms2_3,
    };
    let mut target = Target::for_version(version);
    if let Some(short_circuit) = args.short_circuit {
        target.short_circuit = short_circuit;
    }
    if let Some(format_id) = args.format_id {
        target.format_id = format_id;
    }
    Ok(target)
}

// ──────────────────────────── Logger / Verbosité ────────────────────────────

fn init_telemetry(verbose: u8, quiet: bool) {
    #[cfg(feature = "trace")]
    {
        let level = if quiet {
            "error"
        } else {
            match verbose {
                0 => "warn",
                1 => "debug",
                _ => "trace",
            }
        };
        std::env::set_var("RUST_LOG", std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string()));
        cli::init_logger();
    }
    #[cfg(not(feature = "trace"))]
    {
        let _ = (verbose, quiet);
    }
}

// ──────────────────────────── main ────────────────────────────

fn main() -> ExitCode {
    match real_main() {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        },
    }
}

fn real_main() -> Result<i32> {
    let opt = Opt::parse();
    init_telemetry(opt.verbose, opt.quiet);

    let config = cli::Config {
        target: target_from_args(&opt.target)?,
        tables: opt.tables,
        macro_types: opt.macro_types,
    };
    log::debug!("target: {:?}", config.target);

    use cli::{Command as C, CompileTask, DecompileTask, DisasmTask, LexTask, RoundtripTask};

    let command = match opt.cmd {
        Command::Lex { input, output } => {
            C::Lex(LexTask { input: input_from_opt(input), output: output_from_opt(output) })
        },
        Command::Compile { inputs, output, listing, time } => C::Compile(CompileTask {
            inputs: inputs_from_opt(inputs),
            output: output_from_opt(output),
            listing,
            time,
        }),
        Command::Disasm { input, output } => {
            C::Disasm(DisasmTask { input: input_from_opt(input), output: output_from_opt(output) })
        },
        Command::Decompile { input, out_dir, no_macros, time } => C::Decompile(DecompileTask {
            input: input_from_opt(input),
            out_dir,
            macros: !no_macros,
            time,
        }),
        Command::Roundtrip { inputs } => C::Roundtrip(RoundtripTask { inputs: inputs_from_opt(inputs) }),
    };

    cli::execute(command, &config).context("échec d'exécution de la commande")
}
