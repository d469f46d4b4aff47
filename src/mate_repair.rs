//! Repair of mate scores stored as raw centipawns.
//!
//! Older annotations stored "mate in n" as the plain number n, which reads as a
//! near-equal position. Such entries are recognised by a jump that stands out
//! from the game's recent centipawn changes, a small non-zero magnitude, and a
//! magnitude close to the number of plies left in the game.

use crate::error::Result;
use crate::storage::{self, PositionRow};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Centipawn value used for mate, matching `engine::MATE_SCORE`.
pub const LARGE_CONSTANT: i32 = crate::engine::MATE_SCORE;

const WINDOW: usize = 10;
const INTERVAL: i32 = 50;
const NEAR_END_TOLERANCE: i64 = 5;

/// Mean and sample standard deviation (0 for fewer than two values).
fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

/// Corrected centipawn values of one game.
///
/// `plies` and `centipawns` describe the game's positions in ply order.
pub fn correct_mate_in_x_notation(plies: &[u32], centipawns: &[Option<i32>]) -> Vec<Option<i32>> {
    let n = plies.len().min(centipawns.len());
    let Some(&max_ply) = plies[..n].iter().max() else {
        return Vec::new();
    };

    let diffs: Vec<f64> = (0..n)
        .map(|i| match (i.checked_sub(1).and_then(|j| centipawns[j]), centipawns[i]) {
            (Some(prev), Some(cur)) => (i64::from(cur) - i64::from(prev)) as f64,
            _ => 0.0,
        })
        .collect();

    let flagged: Vec<bool> = (0..n)
        .map(|i| {
            let Some(cp) = centipawns[i] else {
                return false;
            };
            let window = &diffs[(i + 1).saturating_sub(WINDOW)..=i];
            let (mean, std) = mean_std(window);
            let significant = (diffs[i] - mean).abs() >= 2.0 * std;
            let in_interval = (-INTERVAL..=INTERVAL).contains(&cp) && cp != 0;
            let ply_from_end = (max_ply - plies[i]) as i64;
            let near_end = ((cp as i64).abs() - ply_from_end).abs() <= NEAR_END_TOLERANCE;
            significant && in_interval && near_end && plies[i] != 0
        })
        .collect();

    (0..n)
        .map(|i| {
            let follows_flagged =
                i > 0 && flagged[i - 1] && (diffs[i] == 1.0 || diffs[i] == -1.0);
            match centipawns[i] {
                Some(cp) if flagged[i] || follows_flagged => {
                    Some(cp.signum() * LARGE_CONSTANT - cp)
                }
                Some(cp) => Some(cp),
                None if plies[i] == max_ply && plies[i] != 0 => Some(-LARGE_CONSTANT),
                None => None,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairStats {
    pub partitions: usize,
    pub games: usize,
    pub values_changed: usize,
}

/// Repair one partition's rows in place; returns the number of changed values.
pub fn repair_rows(rows: &mut [PositionRow]) -> usize {
    let mut by_game: HashMap<u64, Vec<usize>> = HashMap::new();
    for (i, row) in rows.iter().enumerate() {
        by_game.entry(row.game_id).or_default().push(i);
    }

    let mut changed = 0;
    for indices in by_game.values_mut() {
        indices.sort_by_key(|&i| rows[i].ply);
        let plies: Vec<u32> = indices.iter().map(|&i| rows[i].ply).collect();
        let before: Vec<Option<i32>> = indices.iter().map(|&i| rows[i].centipawn_evaluation).collect();
        let after = correct_mate_in_x_notation(&plies, &before);

        let final_cp = after.iter().rev().flatten().next().copied();
        let mut previous: Option<i32> = None;
        for (k, &i) in indices.iter().enumerate() {
            if before[k] != after[k] {
                changed += 1;
            }
            let row = &mut rows[i];
            row.centipawn_evaluation = after[k];
            row.centipawn_diff =
                after[k].map(|cp| previous.map(|p| storage::centipawn_diff(p, cp)).unwrap_or(0));
            if after[k].is_some() {
                previous = after[k];
            }
            row.final_centipawn_value = final_cp;
        }
    }
    changed
}

/// Repair a range of partitions from `source_root` into `out_root`.
pub fn repair_partitions(
    source_root: &Path,
    out_root: &Path,
    start_ply: u32,
    end_ply: u32,
) -> Result<RepairStats> {
    let mut stats = RepairStats::default();
    for total_ply in storage::list_partitions(source_root)? {
        if total_ply < start_ply || total_ply > end_ply {
            continue;
        }
        let mut rows = storage::read_partition(&storage::partition_path(source_root, total_ply))?;
        let changed = repair_rows(&mut rows);
        let games = rows
            .iter()
            .map(|r| r.game_id)
            .collect::<std::collections::HashSet<_>>()
            .len();

        storage::write_partition(&storage::partition_path(out_root, total_ply), &rows)?;
        storage::copy_num_rows(
            &storage::partition_dir(source_root, total_ply),
            &storage::partition_dir(out_root, total_ply),
        )?;
        debug!(total_ply, games, changed, "partition repaired");

        stats.partitions += 1;
        stats.games += games;
        stats.values_changed += changed;
    }
    info!(
        partitions = stats.partitions,
        changed = stats.values_changed,
        "mate notation repair complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{partition_path, read_partition, write_partition};
    use tempfile::TempDir;

    /// 21 positions: steady +300 advantage, then mate-in-3 written as 3, 2, 1.
    fn mating_game() -> (Vec<u32>, Vec<Option<i32>>) {
        let plies: Vec<u32> = (0..=20).collect();
        let mut cps: Vec<Option<i32>> = vec![None];
        cps.extend(std::iter::repeat(Some(300)).take(16));
        cps.extend([Some(3), Some(2), Some(1), None]);
        (plies, cps)
    }

    #[test]
    fn test_mean_std() {
        let (mean, std) = mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((mean - 5.0).abs() < 1e-12);
        assert!((std - 2.138_089_935).abs() < 1e-6);
        assert_eq!(mean_std(&[3.0]), (3.0, 0.0));
    }

    #[test]
    fn test_mate_jump_is_corrected() {
        let (plies, cps) = mating_game();
        let fixed = correct_mate_in_x_notation(&plies, &cps);
        assert_eq!(fixed[16], Some(300));
        assert_eq!(fixed[17], Some(99_997));
        // A one-point step right after a corrected value is the same mate counting down.
        assert_eq!(fixed[18], Some(99_998));
        assert_eq!(fixed[19], Some(1));
        // Missing final evaluation is treated as checkmate.
        assert_eq!(fixed[20], Some(-LARGE_CONSTANT));
        assert_eq!(fixed[0], None);
    }

    #[test]
    fn test_ordinary_game_untouched() {
        let plies: Vec<u32> = (0..8).collect();
        let cps = vec![
            Some(20),
            Some(35),
            Some(-60),
            Some(120),
            Some(110),
            Some(240),
            Some(-400),
            Some(-380),
        ];
        assert_eq!(correct_mate_in_x_notation(&plies, &cps), cps);
    }

    #[test]
    fn test_extreme_values_do_not_overflow() {
        let plies: Vec<u32> = (0..4).collect();
        let cps = vec![None, Some(i32::MAX), Some(i32::MIN), Some(i32::MAX)];
        assert_eq!(correct_mate_in_x_notation(&plies, &cps), cps);

        let mut rows: Vec<PositionRow> = plies
            .iter()
            .zip(&cps)
            .map(|(&ply, &cp)| PositionRow {
                game_id: 1,
                ply,
                board_sum: ply as u64,
                pgn: String::new(),
                centipawn_evaluation: cp,
                centipawn_diff: None,
                final_centipawn_value: None,
            })
            .collect();
        assert_eq!(repair_rows(&mut rows), 0);
        assert_eq!(rows[2].centipawn_diff, Some(i32::MAX));
    }

    #[test]
    fn test_empty_game() {
        assert!(correct_mate_in_x_notation(&[], &[]).is_empty());
    }

    #[test]
    fn test_repair_partitions_recomputes_derived_columns() {
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let (plies, cps) = mating_game();
        let rows: Vec<PositionRow> = plies
            .iter()
            .zip(&cps)
            .map(|(&ply, &cp)| PositionRow {
                game_id: 8,
                ply,
                board_sum: ply as u64,
                pgn: String::new(),
                centipawn_evaluation: cp,
                centipawn_diff: None,
                final_centipawn_value: None,
            })
            .rev()
            .collect();
        write_partition(&partition_path(source.path(), 20), &rows).unwrap();

        let stats = repair_partitions(source.path(), output.path(), 0, 350).unwrap();
        assert_eq!(
            stats,
            RepairStats {
                partitions: 1,
                games: 1,
                values_changed: 3
            }
        );

        let mut repaired = read_partition(&partition_path(output.path(), 20)).unwrap();
        repaired.sort_by_key(|r| r.ply);
        assert_eq!(repaired[17].centipawn_evaluation, Some(99_997));
        assert_eq!(repaired[17].centipawn_diff, Some(99_697));
        assert_eq!(repaired[1].centipawn_diff, Some(0));
        assert!(repaired
            .iter()
            .all(|r| r.final_centipawn_value == Some(-LARGE_CONSTANT)));
    }
}
