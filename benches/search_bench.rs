//! Benchmarks for PGN parsing and line search over a synthetic store.
//!
//! The store is built from a handful of openings, each repeated under many
//! game ids with varying evaluations, so the search sees crowded nodes near
//! the start position.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gambit::ingest::game_rows;
use gambit::{parse_multiple_games_native, parse_single_game_native, Dagger, GameStore, SearchConfig};

const OPENINGS: &[&str] = &[
    "1. e4 e5 2. Nf3 Nc6 3. Bb5 a6 4. Ba4 Nf6 5. O-O Be7 6. Re1 b5 7. Bb3 d6 8. c3 O-O *",
    "1. e4 c5 2. Nf3 d6 3. d4 cxd4 4. Nxd4 Nf6 5. Nc3 a6 6. Be3 e5 7. Nb3 Be6 8. f3 Be7 *",
    "1. d4 d5 2. c4 e6 3. Nc3 Nf6 4. Bg5 Be7 5. e3 O-O 6. Nf3 h6 7. Bh4 b6 8. cxd5 Nxd5 *",
    "1. e4 e5 2. Nf3 Nc6 3. Bc4 Bc5 4. c3 Nf6 5. d4 exd4 6. cxd4 Bb4+ 7. Bd2 Bxd2+ 8. Nbxd2 d5 *",
    "1. c4 e5 2. Nc3 Nf6 3. Nf3 Nc6 4. g3 d5 5. cxd5 Nxd5 6. Bg2 Nb6 7. O-O Be7 8. d3 O-O *",
];

const COPIES: u64 = 200;

fn synthetic_store() -> GameStore {
    let mut rows = Vec::new();
    let mut game_id = 0;
    for pgn in OPENINGS {
        let game = parse_single_game_native(pgn).expect("opening parses");
        for copy in 0..COPIES {
            let mut game_rows = game_rows(game_id, &game);
            let bias = (copy as i32 % 41) * 10 - 200;
            for row in game_rows.iter_mut().filter(|r| r.ply > 0) {
                row.centipawn_evaluation = Some(bias + (row.ply as i32 % 7) * 5);
                row.final_centipawn_value = Some(bias * 2);
            }
            rows.extend(game_rows);
            game_id += 1;
        }
    }
    GameStore::from_rows(rows)
}

fn bench_parsing(c: &mut Criterion) {
    let pgns: Vec<String> = OPENINGS
        .iter()
        .cycle()
        .take(1000)
        .map(|s| s.to_string())
        .collect();

    c.bench_function("parse_single_game", |b| {
        b.iter(|| parse_single_game_native(black_box(OPENINGS[0])))
    });
    c.bench_function("parse_multiple_games_1000", |b| {
        b.iter(|| parse_multiple_games_native(black_box(&pgns), None))
    });
}

fn bench_search(c: &mut Criterion) {
    let store = synthetic_store();
    let start = parse_single_game_native(OPENINGS[0])
        .expect("opening parses")
        .plies[2]
        .board_sum;

    let dagger = Dagger::new(&store, SearchConfig::default());
    c.bench_function("dagger_search_from_1_e4_e5", |b| {
        b.iter(|| dagger.search(black_box(start), black_box(35)))
    });

    c.bench_function("game_store_from_rows", |b| {
        b.iter_with_large_drop(synthetic_store)
    });
}

criterion_group!(benches, bench_parsing, bench_search);
criterion_main!(benches);
