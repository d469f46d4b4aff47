//! gambit CLI - centipawn-guided study lines from a store of chess games.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gambit::annotate::{annotate_game, evaluate_chess_games, AnnotateOptions};
use gambit::ingest::ingest_pgn_file;
use gambit::mate_repair::repair_partitions;
use gambit::storage::count_unique_game_ids_and_total_rows;
use gambit::{Config, Dagger, GameStore, Preference, SearchResult, UciEngine};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "gambit")]
#[command(version)]
#[command(about = "Find study lines in annotated master games from your biggest mistake")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "gambit.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a PGN file into total_ply partitions
    Ingest {
        /// PGN file to read
        pgn: PathBuf,

        /// Store to write (defaults to storage.source_dir)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Id of the first ingested game
        #[arg(long, default_value = "0")]
        first_game_id: u64,
    },

    /// Add engine evaluations to stored partitions
    Annotate {
        /// First total_ply partition (defaults to storage.start_ply)
        #[arg(long)]
        start_ply: Option<u32>,

        /// Last total_ply partition (defaults to storage.end_ply)
        #[arg(long)]
        end_ply: Option<u32>,
    },

    /// Count games and rows in a store
    Stats {
        /// Store to inspect (defaults to storage.output_dir)
        store: Option<PathBuf>,
    },

    /// Repair mate scores that were stored as raw centipawns
    RepairMates {
        /// Store to read (defaults to storage.output_dir)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Store to write
        #[arg(long)]
        output: PathBuf,
    },

    /// Search the store for a line starting from your game's learning moment
    Search {
        /// Your game, as a PGN file
        pgn: PathBuf,

        /// Side to optimise for (defaults to search.preference)
        #[arg(short, long, value_enum)]
        preference: Option<Preference>,

        /// Store to search (defaults to storage.output_dir)
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("a global tracing subscriber was already installed");
    }
}

fn print_example_config() {
    let example = r#"# gambit configuration file

# Worker threads for parsing and annotation (defaults to the CPU count)
# num_threads = 8

[engine]
path = "Engines/Stockfish"
depth = 20
threads = 1
hash_mb = 16
timeout_secs = 120     # give up when the engine is silent this long
# args = []

[storage]
source_dir = "../Project Scotch/Games/Storage"
output_dir = "Games/Storage"
start_ply = 0
end_ply = 350

[search]
preference = "white"   # or "black"
lambda = 0.01
depth = 10
line_length = 5
alternatives = 2
"#;
    println!("{example}");
}

/// Use the config file when present, defaults otherwise.
fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::from_file(path).with_context(|| format!("Failed to load config from {:?}", path))
    } else {
        warn!("config file {:?} not found, using defaults", path);
        Ok(Config::default())
    }
}

fn print_result(result: &SearchResult) {
    if let Some(moment) = &result.moment {
        println!(
            "\nLearning moment: ply {} ({:+} cp, swing {} cp)",
            moment.ply, moment.centipawn_value, moment.swing
        );
    }
    if result.steps.is_empty() {
        println!("No stored game reaches this position.");
        return;
    }
    for (i, step) in result.steps.iter().enumerate() {
        let event = step.game.header("Event").unwrap_or("?");
        println!(
            "{}. {:<8} game {} ({}) ply {}  cost {:.2}  eval {}",
            i + 1,
            step.next_move.as_deref().unwrap_or("-"),
            step.game_id,
            event,
            step.ply,
            step.cost,
            step.centipawn
                .map(|cp| format!("{cp:+}"))
                .unwrap_or_else(|| "?".to_string()),
        );
        for alt in &step.alternatives {
            println!(
                "     or game {} ply {}  cost {:.2}",
                alt.game_id, alt.ply, alt.cost
            );
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print_example_config();
        }

        Commands::Validate => {
            let config = Config::from_file(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
            info!("Configuration is valid");
            info!("  Engine: {:?} at depth {}", config.engine.path, config.engine.depth);
            info!(
                "  Partitions: total_ply {}..={}",
                config.storage.start_ply, config.storage.end_ply
            );
            info!(
                "  Search: {:?}, line of {}",
                config.search.preference, config.search.line_length
            );
        }

        Commands::Ingest {
            pgn,
            output,
            first_game_id,
        } => {
            let config = load_config(&cli.config)?;
            let output = output.unwrap_or(config.storage.source_dir);
            let stats = ingest_pgn_file(&pgn, &output, first_game_id)
                .with_context(|| format!("Failed to ingest {:?}", pgn))?;

            println!("\n=== Ingest Complete ===");
            println!("Games read:     {}", stats.games_read);
            println!("Games skipped:  {}", stats.games_skipped);
            println!("Partitions:     {}", stats.partitions_written);
            println!("Rows:           {}", stats.rows_written);
            println!("Next game id:   {}", stats.next_game_id);
        }

        Commands::Annotate { start_ply, end_ply } => {
            let config = load_config(&cli.config)?;
            let mut options = AnnotateOptions::from_config(&config);
            if let Some(start_ply) = start_ply {
                options.start_ply = start_ply;
            }
            if let Some(end_ply) = end_ply {
                options.end_ply = end_ply;
            }
            if options.start_ply > options.end_ply {
                bail!(
                    "start ply {} is after end ply {}",
                    options.start_ply,
                    options.end_ply
                );
            }
            let engine = config.engine.clone();
            let stats = evaluate_chess_games(&options, || UciEngine::spawn(&engine))
                .context("Annotation failed")?;

            println!("\n=== Annotation Complete ===");
            println!("Partitions written:  {}", stats.partitions_written);
            println!("Partitions missing:  {}", stats.partitions_missing);
            println!("Games evaluated:     {}", stats.games_evaluated);
            println!("Positions evaluated: {}", stats.positions_evaluated);
        }

        Commands::Stats { store } => {
            let config = load_config(&cli.config)?;
            let store = store.unwrap_or(config.storage.output_dir);
            let stats = count_unique_game_ids_and_total_rows(&store)
                .with_context(|| format!("Failed to read {:?}", store))?;

            println!("Partitions                      : {}", stats.partitions);
            println!("Total number of unique game IDs : {}", stats.unique_game_ids);
            println!("Total number of rows            : {}", stats.total_rows);
        }

        Commands::RepairMates { input, output } => {
            let config = load_config(&cli.config)?;
            let input = input.unwrap_or(config.storage.output_dir);
            let stats = repair_partitions(
                &input,
                &output,
                config.storage.start_ply,
                config.storage.end_ply,
            )
            .with_context(|| format!("Failed to repair {:?}", input))?;

            println!("\n=== Repair Complete ===");
            println!("Partitions:     {}", stats.partitions);
            println!("Games:          {}", stats.games);
            println!("Values changed: {}", stats.values_changed);
        }

        Commands::Search {
            pgn,
            preference,
            store,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(preference) = preference {
                config.search.preference = preference;
            }
            let store_dir = store.unwrap_or_else(|| config.storage.output_dir.clone());

            let text = std::fs::read_to_string(&pgn)
                .with_context(|| format!("Failed to read {:?}", pgn))?;
            let user_game = gambit::parse_single_game_native(&text)
                .with_context(|| format!("Failed to parse {:?}", pgn))?;
            if let Some(err) = &user_game.error {
                warn!("your game was only partially replayed: {}", err);
            }

            let mut centipawns = user_game.centipawns();
            if centipawns.iter().all(Option::is_none) {
                info!("no evals in the PGN comments, scoring the game with the engine");
                let mut engine = UciEngine::spawn(&config.engine)
                    .context("Failed to start the engine")?;
                centipawns = annotate_game(&user_game, &mut engine)?;
            }

            let games = GameStore::load(&store_dir)
                .with_context(|| format!("Failed to load store {:?}", store_dir))?;
            let dagger = Dagger::new(&games, config.search.clone());
            let result = dagger.search_user_game(&user_game, &centipawns)?;
            print_result(&result);
        }
    }

    Ok(())
}
