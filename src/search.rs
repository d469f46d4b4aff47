//! Centipawn-guided line search across stored games (the "Dagger").
//!
//! Positions of all stored games form a directed graph: each position points
//! to the position reached by the move its game played next, and positions
//! with equal board sums are the same node. Starting from a node taken from the
//! user's own game, every step enqueues all stored occurrences of the current
//! node with a loss-function cost, takes the cheapest, and follows that game's
//! next move to the next node.
//!
//! The loss for an occurrence at ply `p` of a game averages the known
//! evaluations at plies `p .. p + depth` of that game into `pred` (negated when
//! searching for Black), then
//!
//! ```text
//! loss = (pred - user_centipawns)^2 / depth + lambda * pred^2
//! ```
//!
//! Ties on cost go to the game whose final evaluation most favours the
//! preferred side, then to the lower game id and ply.

use crate::config::{Preference, SearchConfig};
use crate::error::{GambitError, Result};
use crate::storage::{self, PositionRow};
use crate::visitor::ParsedGame;
use crate::parse_single_game_native;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::path::Path;
use tracing::{debug, info};

/// One stored game, positions in ply order.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredGame {
    pub game_id: u64,
    pub pgn: String,
    pub plies: Vec<u32>,
    pub board_sums: Vec<u64>,
    pub centipawns: Vec<Option<i32>>,
    pub final_centipawn_value: Option<i32>,
}

/// Stored games indexed by board sum.
#[derive(Debug, Clone, Default)]
pub struct GameStore {
    games: Vec<StoredGame>,
    /// board sum -> (game index, position index)
    index: HashMap<u64, Vec<(usize, usize)>>,
}

impl GameStore {
    /// Group rows into games and index every position.
    pub fn from_rows(rows: Vec<PositionRow>) -> Self {
        let mut grouped: BTreeMap<u64, Vec<PositionRow>> = BTreeMap::new();
        for row in rows {
            grouped.entry(row.game_id).or_default().push(row);
        }

        let mut store = GameStore::default();
        for (game_id, mut rows) in grouped {
            rows.sort_by_key(|r| r.ply);
            rows.dedup_by_key(|r| r.ply);

            let final_centipawn_value = rows
                .iter()
                .find_map(|r| r.final_centipawn_value)
                .or_else(|| rows.iter().rev().find_map(|r| r.centipawn_evaluation));
            let game_index = store.games.len();
            for (position, row) in rows.iter().enumerate() {
                store
                    .index
                    .entry(row.board_sum)
                    .or_default()
                    .push((game_index, position));
            }
            store.games.push(StoredGame {
                game_id,
                pgn: rows.first().map(|r| r.pgn.clone()).unwrap_or_default(),
                plies: rows.iter().map(|r| r.ply).collect(),
                board_sums: rows.iter().map(|r| r.board_sum).collect(),
                centipawns: rows.iter().map(|r| r.centipawn_evaluation).collect(),
                final_centipawn_value,
            });
        }
        store
    }

    /// Load every partition under `root`.
    pub fn load(root: &Path) -> Result<Self> {
        let rows = storage::read_dataset(root)?;
        let store = Self::from_rows(rows);
        info!(
            games = store.games.len(),
            positions = store.index.values().map(Vec::len).sum::<usize>(),
            "position store loaded"
        );
        Ok(store)
    }

    pub fn games(&self) -> &[StoredGame] {
        &self.games
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    /// Every stored occurrence of a board sum.
    pub fn occurrences(&self, board_sum: u64) -> &[(usize, usize)] {
        self.index.get(&board_sum).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// The position of the user's game with the largest centipawn swing after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LearningMoment {
    /// Index of the position before the swing.
    pub ply: u32,
    pub board_sum: u64,
    pub centipawn_value: i32,
    /// Absolute centipawn change to the following position.
    pub swing: u32,
}

/// Find the largest absolute change between consecutive known evaluations.
///
/// The first of equally large swings wins.
pub fn find_best_learning_moment(
    centipawns: &[Option<i32>],
    board_sums: &[u64],
) -> Result<LearningMoment> {
    let n = centipawns.len().min(board_sums.len());
    let mut best: Option<LearningMoment> = None;
    for i in 0..n.saturating_sub(1) {
        let (Some(cur), Some(next)) = (centipawns[i], centipawns[i + 1]) else {
            continue;
        };
        let swing = next.abs_diff(cur);
        if best.map_or(true, |b| swing > b.swing) {
            best = Some(LearningMoment {
                ply: i as u32,
                board_sum: board_sums[i],
                centipawn_value: cur,
                swing,
            });
        }
    }
    best.ok_or(GambitError::NoLearningMoment)
}

/// A ranked occurrence that was not chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alternative {
    pub game_id: u64,
    pub ply: u32,
    pub cost: f64,
}

/// One step of the returned line.
#[derive(Debug, Clone)]
pub struct LineStep {
    pub game_id: u64,
    /// Ply of the matched position in the chosen game.
    pub ply: u32,
    pub cost: f64,
    pub centipawn: Option<i32>,
    /// Move the chosen game played from the matched position.
    pub next_move: Option<String>,
    /// The chosen game, replayed from its stored PGN.
    pub game: ParsedGame,
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub moment: Option<LearningMoment>,
    pub steps: Vec<LineStep>,
}

/// Heap entry for one occurrence.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    cost: f64,
    /// Final evaluation from the preferred side's perspective.
    final_for_side: Option<i64>,
    game_id: u64,
    ply: u32,
    game_index: usize,
    position: usize,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost
            .total_cmp(&other.cost)
            // Higher final value first; unknown finals last.
            .then_with(|| match (self.final_for_side, other.final_for_side) {
                (Some(a), Some(b)) => b.cmp(&a),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| self.game_id.cmp(&other.game_id))
            .then_with(|| self.ply.cmp(&other.ply))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

/// Line search over a `GameStore`.
pub struct Dagger<'a> {
    store: &'a GameStore,
    config: SearchConfig,
}

impl<'a> Dagger<'a> {
    pub fn new(store: &'a GameStore, config: SearchConfig) -> Self {
        Dagger { store, config }
    }

    pub fn preference(&self) -> Preference {
        self.config.preference
    }

    /// Cost of continuing from `position` of `game`; `None` when no evaluation
    /// is known in the window.
    pub fn loss(&self, game: &StoredGame, position: usize, user_centipawns: f64) -> Option<f64> {
        let depth = self.config.depth.max(1);
        let end = (position + depth).min(game.centipawns.len());
        let known: Vec<f64> = game
            .centipawns
            .get(position..end)?
            .iter()
            .flatten()
            .map(|&cp| cp as f64)
            .collect();
        if known.is_empty() {
            return None;
        }

        let pred = self.config.preference.sign() * known.iter().sum::<f64>() / known.len() as f64;
        let mse_term = (pred - user_centipawns).powi(2);
        let reg_term = self.config.lambda * pred.powi(2);
        Some(mse_term / depth as f64 + reg_term)
    }

    fn candidate(&self, game_index: usize, position: usize, user_centipawns: f64) -> Option<Candidate> {
        let game = &self.store.games[game_index];
        // The last position of a game has no move to follow.
        if position + 1 >= game.board_sums.len() {
            return None;
        }
        let cost = self.loss(game, position, user_centipawns)?;
        let side = self.config.preference.sign() as i64;
        Some(Candidate {
            cost,
            final_for_side: game.final_centipawn_value.map(|cp| side * cp as i64),
            game_id: game.game_id,
            ply: game.plies[position],
            game_index,
            position,
        })
    }

    /// Build a line starting at `board_sum`.
    pub fn search(&self, board_sum: u64, user_centipawns: i32) -> Result<SearchResult> {
        let target = user_centipawns as f64;
        let mut current = board_sum;
        let mut steps = Vec::with_capacity(self.config.line_length);

        for step in 0..self.config.line_length {
            let mut queue: BinaryHeap<Reverse<Candidate>> = self
                .store
                .occurrences(current)
                .iter()
                .filter_map(|&(g, p)| self.candidate(g, p, target))
                .map(Reverse)
                .collect();

            let Some(Reverse(best)) = queue.pop() else {
                debug!(step, board_sum = current, "no continuation found");
                break;
            };
            let alternatives = std::iter::from_fn(|| queue.pop())
                .take(self.config.alternatives)
                .map(|Reverse(c)| Alternative {
                    game_id: c.game_id,
                    ply: c.ply,
                    cost: c.cost,
                })
                .collect();

            let stored = &self.store.games[best.game_index];
            let game = parse_single_game_native(&stored.pgn)?;
            let next_move = game.san_at(best.ply + 1).map(str::to_string);
            debug!(
                step,
                game_id = best.game_id,
                ply = best.ply,
                cost = best.cost,
                "step chosen"
            );

            steps.push(LineStep {
                game_id: best.game_id,
                ply: best.ply,
                cost: best.cost,
                centipawn: stored.centipawns[best.position],
                next_move,
                game,
                alternatives,
            });
            current = stored.board_sums[best.position + 1];
        }

        Ok(SearchResult {
            moment: None,
            steps,
        })
    }

    /// Find the user's learning moment and search from it.
    pub fn search_user_game(
        &self,
        user_game: &ParsedGame,
        centipawns: &[Option<i32>],
    ) -> Result<SearchResult> {
        let moment = find_best_learning_moment(centipawns, &user_game.board_sums())?;
        info!(
            ply = moment.ply,
            centipawns = moment.centipawn_value,
            swing = moment.swing,
            "learning moment found"
        );
        let mut result = self.search(moment.board_sum, moment.centipawn_value)?;
        result.moment = Some(moment);
        Ok(result)
    }
}
