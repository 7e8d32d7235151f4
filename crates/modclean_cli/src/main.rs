use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand, ValueEnum};
use modclean_core::{
    CoreError, DetectorMask, FogFixReport, Game, NoProgress, ScanOptions, fix_fog,
    read_mod_details, read_plugin_header, scan_many,
};
use modclean_render::{
    JsonStyle, TextRenderOptions, render_details_json, render_details_text, render_fog_json,
    render_fog_text, render_header_json, render_header_text, render_scan_json, render_scan_text,
};
use serde_json::Value as JsonValue;
use tracing::{debug, trace};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "MODCLEAN_LOG";

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum GameArg {
    #[value(alias = "tes4")]
    Oblivion,
    #[value(alias = "fo3")]
    Fallout3,
    #[value(alias = "fnv")]
    FalloutNv,
    #[value(alias = "tes5")]
    Skyrim,
    #[value(alias = "sse")]
    SkyrimSe,
    #[value(alias = "fo4")]
    Fallout4,
}

impl From<GameArg> for Game {
    fn from(value: GameArg) -> Self {
        match value {
            GameArg::Oblivion => Game::Oblivion,
            GameArg::Fallout3 => Game::Fallout3,
            GameArg::FalloutNv => Game::FalloutNv,
            GameArg::Skyrim => Game::Skyrim,
            GameArg::SkyrimSe => Game::SkyrimSe,
            GameArg::Fallout4 => Game::Fallout4,
        }
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Raise log verbosity on stderr (repeatable). Overridden by MODCLEAN_LOG.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan plugins for deleted references and broken cell fog.
    Scan(ScanArgs),
    /// Patch cells with broken fog in place, keeping a .bak copy.
    FixFog(FixFogArgs),
    /// List the records of each top-level group.
    Details(DetailsArgs),
    /// Show the plugin header: flags, author, description and masters.
    Info(InfoArgs),
}

#[derive(Debug, Args)]
struct GameOpt {
    /// Game the plugins belong to; auto-detected from the header when omitted.
    #[arg(long, value_enum)]
    game: Option<GameArg>,
}

impl GameOpt {
    fn game(&self) -> Option<Game> {
        self.game.map(Game::from)
    }
}

#[derive(Debug, Args)]
struct ScanArgs {
    #[arg(value_name = "PLUGIN", required = true)]
    paths: Vec<PathBuf>,
    /// Look for deleted references.
    #[arg(long)]
    udr: bool,
    /// Report identical-to-master records (needs a master comparison; always empty here).
    #[arg(long)]
    itm: bool,
    /// Look for cells with all fog distances set to zero.
    #[arg(long)]
    fog: bool,
    /// Enable every detector.
    #[arg(long, conflicts_with_all = ["udr", "itm", "fog"])]
    all: bool,
    /// Resolve parent cell and worldspace names and grid positions.
    #[arg(long)]
    detailed: bool,
    /// Report progress on every group instead of once per file.
    #[arg(long)]
    fine_progress: bool,
    #[command(flatten)]
    game: GameOpt,
    #[arg(long)]
    json: bool,
}

impl ScanArgs {
    fn mask(&self) -> DetectorMask {
        if self.all {
            return DetectorMask::ALL;
        }
        let mut mask = DetectorMask::NONE;
        if self.udr {
            mask |= DetectorMask::UDR;
        }
        if self.itm {
            mask |= DetectorMask::ITM;
        }
        if self.fog {
            mask |= DetectorMask::FOG;
        }
        if mask == DetectorMask::NONE {
            DetectorMask::DEFAULT
        } else {
            mask
        }
    }

    fn options(&self) -> ScanOptions {
        ScanOptions {
            detailed: self.detailed,
            fine_progress: self.fine_progress,
            game: self.game.game(),
        }
    }
}

#[derive(Debug, Args)]
struct FixFogArgs {
    #[arg(value_name = "PLUGIN", required = true)]
    paths: Vec<PathBuf>,
    #[command(flatten)]
    game: GameOpt,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct DetailsArgs {
    #[arg(value_name = "PLUGIN")]
    path: PathBuf,
    #[command(flatten)]
    game: GameOpt,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct InfoArgs {
    #[arg(value_name = "PLUGIN")]
    path: PathBuf,
    #[command(flatten)]
    game: GameOpt,
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match cli.command {
        Command::Scan(args) => run_scan(&args),
        Command::FixFog(args) => run_fix_fog(&args),
        Command::Details(args) => run_details(&args),
        Command::Info(args) => run_info(&args),
    };
    process::exit(code);
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Progress callback that forwards to the log; the CLI never cancels.
fn log_progress(fraction: f64, message: &str) -> ControlFlow<()> {
    trace!(percent = fraction * 100.0, "{}", message.replace('\n', " "));
    ControlFlow::Continue(())
}

fn run_scan(args: &ScanArgs) -> i32 {
    let mask = args.mask();
    let options = args.options();
    debug!(?mask, ?options, files = args.paths.len(), "starting scan");

    let mut progress = log_progress;
    let outcomes = match scan_many(&args.paths, mask, &options, &mut progress) {
        Ok(outcomes) => outcomes,
        Err(e) => {
            eprintln!("Error scanning plugins: {}", e.message);
            return 1;
        }
    };
    let failed = outcomes.iter().any(|o| o.is_undetermined());
    let outcomes: Vec<(PathBuf, _)> = args.paths.iter().cloned().zip(outcomes).collect();

    if args.json {
        print_json(&render_scan_json(&outcomes, mask, JsonStyle::CanonicalV1));
    } else {
        let options = TextRenderOptions {
            verbose: args.detailed,
        };
        print!("{}", render_scan_text(&outcomes, mask, options));
    }
    exit_code(failed)
}

fn run_fix_fog(args: &FixFogArgs) -> i32 {
    let game = args.game.game();
    let mut results: Vec<(PathBuf, Result<FogFixReport, CoreError>)> = Vec::new();
    for path in &args.paths {
        let mut progress = log_progress;
        let result = fix_fog(path, game, &mut progress);
        if let Err(e) = &result {
            debug!(path = %path.display(), error = %e, "fog fix failed");
        }
        results.push((path.clone(), result));
    }
    let failed = results.iter().any(|(_, r)| r.is_err());

    if args.json {
        print_json(&render_fog_json(&results, JsonStyle::CanonicalV1));
    } else {
        print!("{}", render_fog_text(&results));
    }
    exit_code(failed)
}

fn run_details(args: &DetailsArgs) -> i32 {
    let details = match read_mod_details(&args.path, args.game.game(), &mut NoProgress) {
        Ok(details) => details,
        Err(e) => return report_error("reading details of", &args.path, &e),
    };
    if args.json {
        print_json(&render_details_json(&args.path, &details, JsonStyle::CanonicalV1));
    } else {
        print!("{}", render_details_text(&args.path, &details));
    }
    0
}

fn run_info(args: &InfoArgs) -> i32 {
    let header = match read_plugin_header(&args.path, args.game.game()) {
        Ok(header) => header,
        Err(e) => return report_error("reading header of", &args.path, &e),
    };
    if args.json {
        print_json(&render_header_json(&args.path, &header, JsonStyle::CanonicalV1));
    } else {
        print!("{}", render_header_text(&args.path, &header));
    }
    0
}

fn report_error(action: &str, path: &Path, error: &CoreError) -> i32 {
    eprintln!("Error {action} {}", path.display());
    eprintln!("  {}", error.message);
    1
}

fn print_json(value: &JsonValue) {
    match serde_json::to_string_pretty(value) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => {
            eprintln!("Error rendering JSON output: {e}");
            process::exit(1);
        }
    }
}

fn exit_code(failed: bool) -> i32 {
    if failed { 1 } else { 0 }
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};
    use modclean_core::{DetectorMask, Game};

    use super::{Cli, Command};

    fn scan_mask(args: &[&str]) -> DetectorMask {
        let cli = Cli::try_parse_from(args).expect("arguments should parse");
        match cli.command {
            Command::Scan(scan) => scan.mask(),
            other => panic!("expected scan, got {other:?}"),
        }
    }

    #[test]
    fn detector_flags_build_the_mask() {
        assert_eq!(scan_mask(&["modclean", "scan", "A.esp"]), DetectorMask::DEFAULT);
        assert_eq!(
            scan_mask(&["modclean", "scan", "--fog", "A.esp"]),
            DetectorMask::FOG
        );
        assert_eq!(
            scan_mask(&["modclean", "scan", "--udr", "--fog", "A.esp"]),
            DetectorMask::UDR | DetectorMask::FOG
        );
        assert_eq!(
            scan_mask(&["modclean", "scan", "--all", "A.esp"]),
            DetectorMask::ALL
        );
    }

    #[test]
    fn game_aliases_map_onto_core_games() {
        let cli = Cli::try_parse_from(["modclean", "info", "--game", "fnv", "A.esp"])
            .expect("arguments should parse");
        match cli.command {
            Command::Info(info) => assert_eq!(info.game.game(), Some(Game::FalloutNv)),
            other => panic!("expected info, got {other:?}"),
        }
    }

    #[test]
    fn all_conflicts_with_single_detectors() {
        assert!(Cli::try_parse_from(["modclean", "scan", "--all", "--udr", "A.esp"]).is_err());
        assert!(Cli::try_parse_from(["modclean", "scan"]).is_err());
    }

    #[test]
    fn detector_help_names_what_is_detected() {
        let cli = Cli::command();
        let scan = cli.find_subcommand("scan").expect("scan subcommand");
        let help = |id: &str| {
            scan.get_arguments()
                .find(|arg| arg.get_id() == id)
                .and_then(|arg| arg.get_help())
                .map(|help| help.to_string().trim_end_matches('.').to_string())
                .unwrap_or_default()
        };
        assert_eq!(help("udr"), "Look for deleted references");
        assert_eq!(help("fog"), "Look for cells with all fog distances set to zero");
    }
}
