//! Centipawn annotation of stored games.
//!
//! Each partition is read, every distinct game in it is replayed and scored
//! position by position, and the scores are merged back onto the rows by
//! `(game_id, ply)` before the partition is written to the output store.

use crate::config::Config;
use crate::engine::{Evaluator, Score};
use crate::error::Result;
use crate::storage::{self, PositionRow};
use crate::visitor::ParsedGame;
use crate::parse_single_game_native;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Score of one position of one game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub game_id: u64,
    pub ply: u32,
    pub centipawn_evaluation: i32,
    /// Absolute change from the previous ply; 0 for the first evaluated ply.
    pub centipawn_diff: i32,
}

/// What to annotate and where to put it.
#[derive(Debug, Clone)]
pub struct AnnotateOptions {
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub start_ply: u32,
    pub end_ply: u32,
    pub num_threads: Option<usize>,
}

impl AnnotateOptions {
    /// Store locations, ply range and thread count from the configuration.
    pub fn from_config(config: &Config) -> Self {
        AnnotateOptions {
            source_dir: config.storage.source_dir.clone(),
            output_dir: config.storage.output_dir.clone(),
            start_ply: config.storage.start_ply,
            end_ply: config.storage.end_ply,
            num_threads: Some(config.threads()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnotateStats {
    pub partitions_written: usize,
    pub partitions_missing: usize,
    pub games_evaluated: usize,
    pub positions_evaluated: usize,
}

fn score_position<E: Evaluator>(
    evaluator: &mut E,
    fen: &str,
    white_to_move: bool,
    is_checkmate: bool,
) -> Result<i32> {
    let score = if is_checkmate {
        Score::checkmated(white_to_move)
    } else {
        evaluator.evaluate(fen, white_to_move)?
    };
    Ok(score.centipawns())
}

/// Score every position after the first move of a stored game.
pub fn evaluate_game<E: Evaluator>(
    game_id: u64,
    pgn: &str,
    evaluator: &mut E,
) -> Result<Vec<Evaluation>> {
    let game = parse_single_game_native(pgn)?;
    if let Some(err) = &game.error {
        warn!(game_id, "game only partially replayed: {}", err);
    }

    let mut evaluations = Vec::with_capacity(game.plies.len());
    let mut previous: Option<i32> = None;
    for record in game.plies.iter().skip(1) {
        let cp = score_position(
            evaluator,
            &record.fen,
            record.white_to_move,
            record.is_checkmate,
        )?;
        evaluations.push(Evaluation {
            game_id,
            ply: record.ply,
            centipawn_evaluation: cp,
            centipawn_diff: previous.map(|p| storage::centipawn_diff(p, cp)).unwrap_or(0),
        });
        previous = Some(cp);
    }
    Ok(evaluations)
}

/// Centipawn value of every ply of a user game.
///
/// Evals already present in the game's comments are kept; the remaining
/// positions are scored with the evaluator.
pub fn annotate_game<E: Evaluator>(game: &ParsedGame, evaluator: &mut E) -> Result<Vec<Option<i32>>> {
    game.plies
        .iter()
        .map(|record| match record.comment_eval {
            Some(cp) => Ok(Some(cp)),
            None => score_position(
                evaluator,
                &record.fen,
                record.white_to_move,
                record.is_checkmate,
            )
            .map(Some),
        })
        .collect()
}

/// Distinct `(game_id, pgn)` pairs in first-seen order.
fn distinct_games(rows: &[PositionRow]) -> Vec<(u64, &str)> {
    let mut seen = HashSet::new();
    rows.iter()
        .filter(|r| seen.insert(r.game_id))
        .map(|r| (r.game_id, r.pgn.as_str()))
        .collect()
}

/// Left-merge evaluations onto rows by `(game_id, ply)` and fill each game's final value.
pub fn merge_evaluations(rows: &mut [PositionRow], evaluations: &[Evaluation]) {
    let by_key: HashMap<(u64, u32), &Evaluation> = evaluations
        .iter()
        .map(|e| ((e.game_id, e.ply), e))
        .collect();

    let mut finals: HashMap<u64, (u32, i32)> = HashMap::new();
    for e in evaluations {
        let entry = finals
            .entry(e.game_id)
            .or_insert((e.ply, e.centipawn_evaluation));
        if e.ply >= entry.0 {
            *entry = (e.ply, e.centipawn_evaluation);
        }
    }

    for row in rows.iter_mut() {
        match by_key.get(&(row.game_id, row.ply)) {
            Some(e) => {
                row.centipawn_evaluation = Some(e.centipawn_evaluation);
                row.centipawn_diff = Some(e.centipawn_diff);
            }
            None => {
                row.centipawn_evaluation = None;
                row.centipawn_diff = None;
            }
        }
        row.final_centipawn_value = finals.get(&row.game_id).map(|&(_, cp)| cp);
    }
}

/// Annotate a range of partitions.
///
/// `make_evaluator` is called once per worker chunk, so each worker owns its
/// own engine process.
pub fn evaluate_chess_games<E, F>(options: &AnnotateOptions, make_evaluator: F) -> Result<AnnotateStats>
where
    E: Evaluator,
    F: Fn() -> Result<E> + Sync + Send,
{
    let num_threads = options.num_threads.unwrap_or_else(num_cpus::get).max(1);
    let thread_pool = ThreadPoolBuilder::new().num_threads(num_threads).build()?;

    let mut stats = AnnotateStats::default();
    for total_ply in options.start_ply..=options.end_ply {
        let source = storage::partition_path(&options.source_dir, total_ply);
        if !source.is_file() {
            stats.partitions_missing += 1;
            continue;
        }
        info!("Processing total_ply={}...", total_ply);

        let mut rows = storage::read_partition(&source)?;
        let games = distinct_games(&rows);
        let games_per_thread = games.len().div_ceil(num_threads).max(1);

        let pb = ProgressBar::new(games.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        pb.set_message(format!("total_ply={total_ply}"));

        let per_chunk: Vec<Vec<Evaluation>> = thread_pool.install(|| {
            games
                .par_chunks(games_per_thread)
                .map(|chunk| {
                    let mut evaluator = make_evaluator()?;
                    let mut evaluations = Vec::new();
                    for &(game_id, pgn) in chunk {
                        evaluations.extend(evaluate_game(game_id, pgn, &mut evaluator)?);
                        pb.inc(1);
                    }
                    Ok(evaluations)
                })
                .collect::<Result<Vec<_>>>()
        })?;
        pb.finish_and_clear();

        let evaluations: Vec<Evaluation> = per_chunk.into_iter().flatten().collect();
        stats.games_evaluated += games.len();
        stats.positions_evaluated += evaluations.len();
        merge_evaluations(&mut rows, &evaluations);

        let target_dir = storage::partition_dir(&options.output_dir, total_ply);
        storage::write_partition(&storage::partition_path(&options.output_dir, total_ply), &rows)?;
        storage::copy_num_rows(&storage::partition_dir(&options.source_dir, total_ply), &target_dir)?;
        debug!(total_ply, rows = rows.len(), "partition annotated");
        stats.partitions_written += 1;
    }

    info!("Processing completed!");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MATE_SCORE;
    use crate::error::GambitError;
    use crate::storage::{partition_dir, partition_path, read_partition, write_num_rows, write_partition};
    use shakmaty::{fen::Fen, CastlingMode, Chess, Color, Position, Role};
    use tempfile::TempDir;

    /// Scores positions by material balance in pawns × 100.
    struct MaterialEvaluator {
        calls: usize,
    }

    impl Evaluator for MaterialEvaluator {
        fn evaluate(&mut self, fen: &str, _white_to_move: bool) -> Result<Score> {
            self.calls += 1;
            let fen: Fen = fen.parse().map_err(|e| GambitError::Engine(format!("{e}")))?;
            let pos: Chess = fen
                .into_position(CastlingMode::Standard)
                .map_err(|e| GambitError::Engine(format!("{e}")))?;
            let balance = pos
                .board()
                .clone()
                .into_iter()
                .map(|(_, piece)| {
                    let value = match piece.role {
                        Role::Pawn => 100,
                        Role::Knight | Role::Bishop => 300,
                        Role::Rook => 500,
                        Role::Queen => 900,
                        Role::King => 0,
                    };
                    if piece.color == Color::White {
                        value
                    } else {
                        -value
                    }
                })
                .sum();
            Ok(Score::Centipawns(balance))
        }
    }

    struct FailingEvaluator;

    impl Evaluator for FailingEvaluator {
        fn evaluate(&mut self, _fen: &str, _white_to_move: bool) -> Result<Score> {
            Err(GambitError::Engine("boom".into()))
        }
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.num_threads = Some(3);
        config.storage.start_ply = 10;
        let options = AnnotateOptions::from_config(&config);
        assert_eq!(options.num_threads, Some(3));
        assert_eq!(options.start_ply, 10);
        assert_eq!(options.end_ply, 350);
        assert_eq!(options.source_dir, config.storage.source_dir);

        config.num_threads = None;
        assert_eq!(
            AnnotateOptions::from_config(&config).num_threads,
            Some(num_cpus::get())
        );
    }

    #[test]
    fn test_evaluate_game_diffs() {
        // 2. exd5 wins a pawn, 2... Qxd5 wins it back.
        let mut evaluator = MaterialEvaluator { calls: 0 };
        let evals = evaluate_game(9, "1. e4 d5 2. exd5 Qxd5 *", &mut evaluator).unwrap();

        let cps: Vec<i32> = evals.iter().map(|e| e.centipawn_evaluation).collect();
        let diffs: Vec<i32> = evals.iter().map(|e| e.centipawn_diff).collect();
        let plies: Vec<u32> = evals.iter().map(|e| e.ply).collect();
        assert_eq!(plies, vec![1, 2, 3, 4]);
        assert_eq!(cps, vec![0, 0, 100, 0]);
        assert_eq!(diffs, vec![0, 0, 100, 100]);
        assert!(evals.iter().all(|e| e.game_id == 9));
        assert_eq!(evaluator.calls, 4);
    }

    #[test]
    fn test_checkmate_scored_without_engine() {
        let mut evaluator = MaterialEvaluator { calls: 0 };
        let evals = evaluate_game(1, "1. f3 e5 2. g4 Qh4# 0-1", &mut evaluator).unwrap();
        assert_eq!(evals.last().unwrap().centipawn_evaluation, -MATE_SCORE);
        assert_eq!(evaluator.calls, 3);
    }

    #[test]
    fn test_engine_errors_propagate() {
        let result = evaluate_game(1, "1. e4 *", &mut FailingEvaluator);
        assert!(matches!(result, Err(GambitError::Engine(_))));
    }

    #[test]
    fn test_annotate_game_prefers_comment_evals() {
        let game =
            parse_single_game_native("1. e4 { [%eval 0.3] } d5 2. exd5 { [%eval 1.1] } *").unwrap();
        let mut evaluator = MaterialEvaluator { calls: 0 };
        let cps = annotate_game(&game, &mut evaluator).unwrap();
        assert_eq!(cps, vec![Some(0), Some(30), Some(0), Some(110)]);
        assert_eq!(evaluator.calls, 2);
    }

    #[test]
    fn test_merge_evaluations_left_join() {
        let mut rows: Vec<PositionRow> = (0..3)
            .map(|ply| PositionRow {
                game_id: 4,
                ply,
                board_sum: 0,
                pgn: String::new(),
                centipawn_evaluation: None,
                centipawn_diff: None,
                final_centipawn_value: None,
            })
            .collect();
        let evaluations = vec![
            Evaluation {
                game_id: 4,
                ply: 2,
                centipawn_evaluation: -80,
                centipawn_diff: 100,
            },
            Evaluation {
                game_id: 4,
                ply: 1,
                centipawn_evaluation: 20,
                centipawn_diff: 0,
            },
        ];
        merge_evaluations(&mut rows, &evaluations);
        assert_eq!(rows[0].centipawn_evaluation, None);
        assert_eq!(rows[1].centipawn_evaluation, Some(20));
        assert_eq!(rows[2].centipawn_diff, Some(100));
        assert!(rows.iter().all(|r| r.final_centipawn_value == Some(-80)));
    }

    fn stored_rows(game_id: u64, pgn: &str) -> Vec<PositionRow> {
        let game = parse_single_game_native(pgn).unwrap();
        game.plies
            .iter()
            .map(|p| PositionRow {
                game_id,
                ply: p.ply,
                board_sum: p.board_sum,
                pgn: pgn.to_string(),
                centipawn_evaluation: None,
                centipawn_diff: None,
                final_centipawn_value: None,
            })
            .collect()
    }

    #[test]
    fn test_evaluate_chess_games_over_partitions() {
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        let mut rows = stored_rows(1, "1. e4 d5 2. exd5 Qxd5 *");
        rows.extend(stored_rows(2, "1. d4 e5 2. dxe5 Nc6 *"));
        write_partition(&partition_path(source.path(), 4), &rows).unwrap();
        write_num_rows(&partition_dir(source.path(), 4), rows.len()).unwrap();

        let options = AnnotateOptions {
            source_dir: source.path().to_path_buf(),
            output_dir: output.path().to_path_buf(),
            start_ply: 3,
            end_ply: 4,
            num_threads: Some(2),
        };
        let stats =
            evaluate_chess_games(&options, || Ok(MaterialEvaluator { calls: 0 })).unwrap();
        assert_eq!(
            stats,
            AnnotateStats {
                partitions_written: 1,
                partitions_missing: 1,
                games_evaluated: 2,
                positions_evaluated: 8,
            }
        );

        let annotated = read_partition(&partition_path(output.path(), 4)).unwrap();
        assert_eq!(annotated.len(), 10);
        let game2: Vec<Option<i32>> = annotated
            .iter()
            .filter(|r| r.game_id == 2)
            .map(|r| r.centipawn_evaluation)
            .collect();
        assert_eq!(game2, vec![None, Some(0), Some(0), Some(100), Some(100)]);
        assert!(annotated
            .iter()
            .filter(|r| r.game_id == 1)
            .all(|r| r.final_centipawn_value == Some(0)));
        assert!(partition_dir(output.path(), 4).join("num_rows.txt").is_file());
    }

    #[test]
    fn test_evaluator_start_failure_aborts() {
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_partition(&partition_path(source.path(), 1), &stored_rows(1, "1. e4 *")).unwrap();

        let options = AnnotateOptions {
            source_dir: source.path().to_path_buf(),
            output_dir: output.path().to_path_buf(),
            start_ply: 1,
            end_ply: 1,
            num_threads: Some(1),
        };
        let result = evaluate_chess_games::<MaterialEvaluator, _>(&options, || {
            Err(GambitError::EngineUnavailable("missing binary".into()))
        });
        assert!(matches!(result, Err(GambitError::EngineUnavailable(_))));
        assert!(!partition_path(output.path(), 1).exists());
    }
}
