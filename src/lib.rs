use pgn_reader::Reader;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::io::{Cursor, Read};

pub mod annotate;
pub mod board_serialization;
pub mod comment_parsing;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod mate_repair;
pub mod search;
pub mod storage;
pub mod visitor;

pub use config::{Config, EngineConfig, Preference, SearchConfig, StorageConfig};
pub use engine::{Evaluator, Score, UciEngine, MATE_SCORE};
pub use error::{ConfigError, GambitError, Result};
pub use search::{Dagger, GameStore, LearningMoment, LineStep, SearchResult};
pub use storage::{DatasetStats, PositionRow};
pub use visitor::{GameVisitor, ParsedGame, PlyRecord};

/// Parse a single PGN game string.
pub fn parse_single_game_native(pgn: &str) -> Result<ParsedGame> {
    let mut reader = Reader::new(Cursor::new(pgn));
    let mut visitor = GameVisitor::new();
    match reader.read_game(&mut visitor) {
        Ok(Some(game)) => Ok(game),
        Ok(None) => Err(GambitError::NoGame),
        Err(err) => Err(GambitError::Pgn(format!("Parsing error: {}", err))),
    }
}

/// In parallel, parse a set of games.
pub fn parse_multiple_games_native(
    pgns: &[String],
    num_threads: Option<usize>,
) -> Result<Vec<ParsedGame>> {
    let num_threads = num_threads.unwrap_or_else(num_cpus::get);

    // Build a custom Rayon thread pool with the desired number of threads
    let thread_pool = ThreadPoolBuilder::new().num_threads(num_threads).build()?;

    thread_pool.install(|| {
        pgns.par_iter()
            .map(|pgn| parse_single_game_native(pgn))
            .collect()
    })
}

/// Read every game from a multi-game PGN source.
pub fn read_games<R: Read>(source: R) -> Result<Vec<ParsedGame>> {
    let mut reader = Reader::new(source);
    let mut visitor = GameVisitor::new();
    let mut games = Vec::new();
    loop {
        match reader.read_game(&mut visitor) {
            Ok(Some(game)) => games.push(game),
            Ok(None) => return Ok(games),
            Err(err) => return Err(GambitError::Pgn(format!("Parsing error: {}", err))),
        }
    }
}
