//! Hive-style partitioned Parquet store of game positions.
//!
//! Layout: `<root>/total_ply=<N>/data.parquet`, one row per position of every
//! game whose mainline has N half-moves, optionally with a `num_rows.txt`
//! sidecar. Files written by other tools are accepted as long as the required
//! columns can be cast to the types below.

use crate::error::{GambitError, Result};
use arrow::array::{Array, ArrayRef, Int32Array, StringArray, UInt32Array, UInt64Array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const DATA_FILE: &str = "data.parquet";
pub const NUM_ROWS_FILE: &str = "num_rows.txt";
const PARTITION_PREFIX: &str = "total_ply=";

/// One position of one stored game.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionRow {
    pub game_id: u64,
    pub ply: u32,
    pub board_sum: u64,
    pub pgn: String,
    pub centipawn_evaluation: Option<i32>,
    pub centipawn_diff: Option<i32>,
    pub final_centipawn_value: Option<i32>,
}

/// Absolute change between two evaluations, clamped to the `i32` range.
pub fn centipawn_diff(previous: i32, current: i32) -> i32 {
    i32::try_from(current.abs_diff(previous)).unwrap_or(i32::MAX)
}

/// Totals across a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatasetStats {
    pub partitions: usize,
    pub unique_game_ids: usize,
    pub total_rows: usize,
}

pub fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("game_id", DataType::UInt64, false),
        Field::new("ply", DataType::UInt32, false),
        Field::new("board_sum", DataType::UInt64, false),
        Field::new("pgn", DataType::Utf8, false),
        Field::new("centipawn_evaluation", DataType::Int32, true),
        Field::new("centipawn_diff", DataType::Int32, true),
        Field::new("final_centipawn_value", DataType::Int32, true),
    ]))
}

/// Directory of the partition holding games of `total_ply` half-moves.
pub fn partition_dir(root: &Path, total_ply: u32) -> PathBuf {
    root.join(format!("{PARTITION_PREFIX}{total_ply}"))
}

/// Data file of the partition holding games of `total_ply` half-moves.
pub fn partition_path(root: &Path, total_ply: u32) -> PathBuf {
    partition_dir(root, total_ply).join(DATA_FILE)
}

/// `total_ply` values of every partition under `root` that has a data file, ascending.
pub fn list_partitions(root: &Path) -> Result<Vec<u32>> {
    let entries = fs::read_dir(root)
        .map_err(|e| GambitError::io(format!("listing partitions in {:?}", root), e))?;

    let mut plies = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| GambitError::io(format!("listing {:?}", root), e))?;
        let name = entry.file_name();
        let Some(total_ply) = name
            .to_str()
            .and_then(|n| n.strip_prefix(PARTITION_PREFIX))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        if entry.path().join(DATA_FILE).is_file() {
            plies.push(total_ply);
        }
    }
    plies.sort_unstable();
    Ok(plies)
}

fn rows_to_batch(rows: &[PositionRow]) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(UInt64Array::from_iter_values(rows.iter().map(|r| r.game_id))),
        Arc::new(UInt32Array::from_iter_values(rows.iter().map(|r| r.ply))),
        Arc::new(UInt64Array::from_iter_values(
            rows.iter().map(|r| r.board_sum),
        )),
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.pgn.as_str()),
        )),
        Arc::new(Int32Array::from_iter(
            rows.iter().map(|r| r.centipawn_evaluation),
        )),
        Arc::new(Int32Array::from_iter(rows.iter().map(|r| r.centipawn_diff))),
        Arc::new(Int32Array::from_iter(
            rows.iter().map(|r| r.final_centipawn_value),
        )),
    ];
    Ok(RecordBatch::try_new(schema(), columns)?)
}

/// Write rows to a Parquet file, creating parent directories.
pub fn write_partition(path: &Path, rows: &[PositionRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| GambitError::io(format!("creating {:?}", parent), e))?;
    }
    let file =
        File::create(path).map_err(|e| GambitError::io(format!("creating {:?}", path), e))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let batch = rows_to_batch(rows)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    debug!(path = ?path, rows = rows.len(), "wrote partition");
    Ok(())
}

/// Write the row-count sidecar next to a partition's data file.
pub fn write_num_rows(dir: &Path, rows: usize) -> Result<()> {
    let path = dir.join(NUM_ROWS_FILE);
    fs::write(&path, format!("{rows}\n"))
        .map_err(|e| GambitError::io(format!("writing {:?}", path), e))
}

/// Copy `num_rows.txt` from one partition directory to another if it exists.
pub fn copy_num_rows(from_dir: &Path, to_dir: &Path) -> Result<bool> {
    let source = from_dir.join(NUM_ROWS_FILE);
    if !source.is_file() {
        return Ok(false);
    }
    let target = to_dir.join(NUM_ROWS_FILE);
    fs::copy(&source, &target)
        .map_err(|e| GambitError::io(format!("copying {:?} to {:?}", source, target), e))?;
    Ok(true)
}

/// Read every row of one Parquet file.
pub fn read_partition(path: &Path) -> Result<Vec<PositionRow>> {
    let file = File::open(path).map_err(|e| GambitError::io(format!("opening {:?}", path), e))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut rows = Vec::new();
    for batch in reader {
        append_batch(&batch?, path, &mut rows)?;
    }
    Ok(rows)
}

/// Read every partition under `root`, in ascending `total_ply` order.
pub fn read_dataset(root: &Path) -> Result<Vec<PositionRow>> {
    let mut rows = Vec::new();
    for total_ply in list_partitions(root)? {
        rows.extend(read_partition(&partition_path(root, total_ply))?);
    }
    Ok(rows)
}

/// Count distinct games and rows across every partition.
pub fn count_unique_game_ids_and_total_rows(root: &Path) -> Result<DatasetStats> {
    let mut unique_game_ids = HashSet::new();
    let mut stats = DatasetStats::default();
    for total_ply in list_partitions(root)? {
        let rows = read_partition(&partition_path(root, total_ply))?;
        unique_game_ids.extend(rows.iter().map(|r| r.game_id));
        stats.total_rows += rows.len();
        stats.partitions += 1;
    }
    stats.unique_game_ids = unique_game_ids.len();
    Ok(stats)
}

fn append_batch(batch: &RecordBatch, path: &Path, rows: &mut Vec<PositionRow>) -> Result<()> {
    let game_ids = required_u64(batch, "game_id", path)?;
    let plies = required_u32(batch, "ply", path)?;
    let board_sums = required_u64(batch, "board_sum", path)?;
    let pgns = required_strings(batch, "pgn", path)?;
    let evals = optional_i32(batch, "centipawn_evaluation", path)?;
    let diffs = optional_i32(batch, "centipawn_diff", path)?;
    let finals = optional_i32(batch, "final_centipawn_value", path)?;

    rows.reserve(batch.num_rows());
    for i in 0..batch.num_rows() {
        rows.push(PositionRow {
            game_id: game_ids[i],
            ply: plies[i],
            board_sum: board_sums[i],
            pgn: pgns[i].clone(),
            centipawn_evaluation: evals[i],
            centipawn_diff: diffs[i],
            final_centipawn_value: finals[i],
        });
    }
    Ok(())
}

fn column_type_error(column: &str, path: &Path) -> GambitError {
    GambitError::ColumnType {
        column: column.to_string(),
        path: path.to_owned(),
    }
}

fn cast_column(
    batch: &RecordBatch,
    column: &str,
    to: &DataType,
    path: &Path,
) -> Result<Option<ArrayRef>> {
    match batch.column_by_name(column) {
        None => Ok(None),
        Some(array) => cast(array, to)
            .map(Some)
            .map_err(|_| column_type_error(column, path)),
    }
}

fn require(array: Option<ArrayRef>, column: &str, path: &Path) -> Result<ArrayRef> {
    let array = array.ok_or_else(|| GambitError::MissingColumn {
        column: column.to_string(),
        path: path.to_owned(),
    })?;
    // Nulls here mean the source values did not fit the target type.
    if array.null_count() > 0 {
        return Err(column_type_error(column, path));
    }
    Ok(array)
}

fn required_u64(batch: &RecordBatch, column: &str, path: &Path) -> Result<Vec<u64>> {
    let array = require(cast_column(batch, column, &DataType::UInt64, path)?, column, path)?;
    let values = array
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| column_type_error(column, path))?;
    Ok(values.values().to_vec())
}

fn required_u32(batch: &RecordBatch, column: &str, path: &Path) -> Result<Vec<u32>> {
    let array = require(cast_column(batch, column, &DataType::UInt32, path)?, column, path)?;
    let values = array
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| column_type_error(column, path))?;
    Ok(values.values().to_vec())
}

fn required_strings(batch: &RecordBatch, column: &str, path: &Path) -> Result<Vec<String>> {
    let array = require(cast_column(batch, column, &DataType::Utf8, path)?, column, path)?;
    let values = array
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| column_type_error(column, path))?;
    Ok(values.iter().map(|v| v.unwrap_or_default().to_string()).collect())
}

/// Nullable integer column; a missing column reads as all nulls.
fn optional_i32(batch: &RecordBatch, column: &str, path: &Path) -> Result<Vec<Option<i32>>> {
    let Some(array) = cast_column(batch, column, &DataType::Int32, path)? else {
        return Ok(vec![None; batch.num_rows()]);
    };
    let values = array
        .as_any()
        .downcast_ref::<Int32Array>()
        .ok_or_else(|| column_type_error(column, path))?;
    Ok(values.iter().collect())
}
