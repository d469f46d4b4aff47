//! Building a position store from PGN files.

use crate::error::{GambitError, Result};
use crate::storage::{self, PositionRow};
use crate::visitor::ParsedGame;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub games_read: usize,
    pub games_skipped: usize,
    pub rows_written: usize,
    pub partitions_written: usize,
    /// Id to use for the first game of the next ingest.
    pub next_game_id: u64,
}

/// Rows for every position of a game, carrying its comment evals.
pub fn game_rows(game_id: u64, game: &ParsedGame) -> Vec<PositionRow> {
    let pgn = game.to_pgn();
    let final_cp = game.plies.iter().rev().find_map(|p| p.comment_eval);
    let mut previous: Option<i32> = None;
    game.plies
        .iter()
        .map(|p| {
            let diff = match (previous, p.comment_eval) {
                (Some(prev), Some(cur)) => Some(storage::centipawn_diff(prev, cur)),
                (None, Some(_)) => Some(0),
                _ => None,
            };
            if p.comment_eval.is_some() {
                previous = p.comment_eval;
            }
            PositionRow {
                game_id,
                ply: p.ply,
                board_sum: p.board_sum,
                pgn: pgn.clone(),
                centipawn_evaluation: p.comment_eval,
                centipawn_diff: diff,
                final_centipawn_value: final_cp,
            }
        })
        .collect()
}

/// Write games into `total_ply` partitions under `out_root`.
///
/// Games that failed to replay are skipped. Rows are appended to any existing
/// partition with the same `total_ply`, and its `num_rows.txt` is rewritten
/// with the combined count.
pub fn ingest_games(games: &[ParsedGame], out_root: &Path, first_game_id: u64) -> Result<IngestStats> {
    let mut stats = IngestStats {
        games_read: games.len(),
        next_game_id: first_game_id,
        ..Default::default()
    };

    let mut partitions: BTreeMap<u32, Vec<PositionRow>> = BTreeMap::new();
    for (index, game) in games.iter().enumerate() {
        if !game.valid || game.plies.is_empty() {
            warn!(
                index,
                "skipping game: {}",
                game.error.as_deref().unwrap_or("no moves recorded")
            );
            stats.games_skipped += 1;
            continue;
        }
        let rows = game_rows(stats.next_game_id, game);
        stats.next_game_id += 1;
        partitions.entry(game.total_ply()).or_default().extend(rows);
    }

    for (total_ply, rows) in partitions {
        let path = storage::partition_path(out_root, total_ply);
        let added = rows.len();
        let combined = if path.is_file() {
            let mut existing = storage::read_partition(&path)?;
            debug!(total_ply, existing = existing.len(), added, "appending to partition");
            existing.extend(rows);
            existing
        } else {
            rows
        };
        storage::write_partition(&path, &combined)?;
        storage::write_num_rows(&storage::partition_dir(out_root, total_ply), combined.len())?;
        stats.rows_written += added;
        stats.partitions_written += 1;
    }

    info!(
        games = stats.games_read - stats.games_skipped,
        skipped = stats.games_skipped,
        partitions = stats.partitions_written,
        "ingest complete"
    );
    Ok(stats)
}

/// Parse a PGN file and ingest every game in it.
pub fn ingest_pgn_file(path: &Path, out_root: &Path, first_game_id: u64) -> Result<IngestStats> {
    let file = File::open(path).map_err(|e| GambitError::io(format!("opening {:?}", path), e))?;
    let games = crate::read_games(BufReader::new(file))?;
    ingest_games(&games, out_root, first_game_id)
}
