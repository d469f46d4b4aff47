//! Per-ply PGN visitor.
//!
//! Walks the mainline of a game and records one `PlyRecord` per position,
//! starting with the initial position at ply 0. Comment evals and clocks are
//! attached to the position reached by the move they follow.

use crate::board_serialization::{board_sum, fen};
use crate::comment_parsing::{clock_seconds, eval_centipawns, parse_comments};
use pgn_reader::{KnownOutcome, Outcome, RawComment, RawTag, SanPlus, Skip, Visitor};
use shakmaty::{fen::Fen, CastlingMode, Chess, Color, Position};
use std::ops::ControlFlow;

/// One position of a game's mainline.
#[derive(Debug, Clone, PartialEq)]
pub struct PlyRecord {
    pub ply: u32,
    pub board_sum: u64,
    pub fen: String,
    /// Move that produced this position; `None` at ply 0.
    pub san: Option<String>,
    pub white_to_move: bool,
    pub is_checkmate: bool,
    pub comment_eval: Option<i32>,
    pub clock_seconds: Option<f32>,
}

/// A parsed game.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedGame {
    pub headers: Vec<(String, String)>,
    pub plies: Vec<PlyRecord>,
    /// "White", "Black", "Draw", "Unknown", or None when the movetext has no result.
    pub outcome: Option<String>,
    pub valid: bool,
    pub error: Option<String>,
}

impl ParsedGame {
    /// Number of half-moves on the recorded mainline.
    pub fn total_ply(&self) -> u32 {
        self.plies.len().saturating_sub(1) as u32
    }

    /// Header value by case-insensitive key.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Comment evals, one entry per ply.
    pub fn centipawns(&self) -> Vec<Option<i32>> {
        self.plies.iter().map(|p| p.comment_eval).collect()
    }

    pub fn board_sums(&self) -> Vec<u64> {
        self.plies.iter().map(|p| p.board_sum).collect()
    }

    /// SAN of the move leading to `ply`.
    pub fn san_at(&self, ply: u32) -> Option<&str> {
        self.plies.get(ply as usize).and_then(|p| p.san.as_deref())
    }

    /// Result token for the movetext.
    pub fn result_token(&self) -> &'static str {
        match self.outcome.as_deref() {
            Some("White") => "1-0",
            Some("Black") => "0-1",
            Some("Draw") => "1/2-1/2",
            _ => "*",
        }
    }

    /// Canonical PGN: headers, numbered mainline and the result token.
    pub fn to_pgn(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.headers {
            out.push_str(&format!("[{} \"{}\"]\n", key, value.replace('"', "\\\"")));
        }
        if !self.headers.is_empty() {
            out.push('\n');
        }

        let mut tokens: Vec<String> = Vec::with_capacity(self.plies.len() * 3 / 2 + 1);
        let mut fullmove = self.start_fullmove();
        for (i, pair) in self.plies.windows(2).enumerate() {
            let (before, after) = (&pair[0], &pair[1]);
            let Some(san) = after.san.as_deref() else {
                continue;
            };
            if before.white_to_move {
                tokens.push(format!("{}.", fullmove));
            } else if i == 0 {
                tokens.push(format!("{}...", fullmove));
            }
            tokens.push(san.to_string());
            if !before.white_to_move {
                fullmove += 1;
            }
        }
        tokens.push(self.result_token().to_string());
        out.push_str(&tokens.join(" "));
        out
    }

    fn start_fullmove(&self) -> u32 {
        self.plies
            .first()
            .and_then(|p| p.fen.split_whitespace().nth(5))
            .and_then(|n| n.parse().ok())
            .unwrap_or(1)
    }
}

/// Visitor that fills a `ParsedGame`.
pub struct GameVisitor {
    game: ParsedGame,
    pos: Chess,
}

impl GameVisitor {
    pub fn new() -> Self {
        GameVisitor {
            game: ParsedGame::default(),
            pos: Chess::default(),
        }
    }

    /// Record the current position.
    fn push_position(&mut self, san: Option<String>) {
        let ply = self.game.plies.len() as u32;
        self.game.plies.push(PlyRecord {
            ply,
            board_sum: board_sum(&self.pos),
            fen: fen(&self.pos),
            san,
            white_to_move: self.pos.turn() == Color::White,
            is_checkmate: self.pos.is_checkmate(),
            comment_eval: None,
            clock_seconds: None,
        });
    }

    /// Record a parse error for the current game.
    fn set_error(&mut self, msg: String) {
        self.game.valid = false;
        self.game.error = Some(msg);
    }
}

impl Default for GameVisitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Visitor for GameVisitor {
    type Tags = Vec<(String, String)>;
    type Movetext = ();
    type Output = ParsedGame;

    fn begin_tags(&mut self) -> ControlFlow<Self::Output, Self::Tags> {
        self.game = ParsedGame::default();
        ControlFlow::Continue(Vec::with_capacity(10))
    }

    fn tag(
        &mut self,
        tags: &mut Self::Tags,
        key: &[u8],
        value: RawTag<'_>,
    ) -> ControlFlow<Self::Output> {
        let key_str = String::from_utf8_lossy(key).into_owned();
        let value_str = String::from_utf8_lossy(value.as_bytes()).into_owned();
        tags.push((key_str, value_str));
        ControlFlow::Continue(())
    }

    fn begin_movetext(&mut self, tags: Self::Tags) -> ControlFlow<Self::Output, Self::Movetext> {
        self.game.headers = tags;
        self.game.valid = true;

        let castling_mode = match self.game.header("Variant") {
            Some(v) if v.eq_ignore_ascii_case("chess960") => CastlingMode::Chess960,
            _ => CastlingMode::Standard,
        };

        let start = match self.game.header("FEN").map(str::parse::<Fen>) {
            None => Ok(Chess::default()),
            Some(Ok(parsed)) => parsed
                .into_position(castling_mode)
                .map_err(|e| format!("invalid FEN position: {}", e)),
            Some(Err(e)) => Err(format!("failed to parse FEN: {}", e)),
        };
        match start {
            Ok(pos) => self.pos = pos,
            Err(msg) => {
                self.set_error(msg);
                self.pos = Chess::default();
            }
        }

        self.push_position(None);
        ControlFlow::Continue(())
    }

    fn san(
        &mut self,
        _movetext: &mut Self::Movetext,
        san_plus: SanPlus,
    ) -> ControlFlow<Self::Output> {
        if self.game.valid {
            match san_plus.san.to_move(&self.pos) {
                Ok(m) => {
                    self.pos.play_unchecked(m);
                    self.push_position(Some(san_plus.to_string()));
                }
                Err(err) => {
                    self.set_error(format!("illegal move: {} {}", err, san_plus));
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn comment(
        &mut self,
        _movetext: &mut Self::Movetext,
        comment: RawComment<'_>,
    ) -> ControlFlow<Self::Output> {
        if !self.game.valid {
            return ControlFlow::Continue(());
        }
        let text = String::from_utf8_lossy(comment.as_bytes());
        if let Ok((_, contents)) = parse_comments(&text) {
            if let Some(last) = self.game.plies.last_mut() {
                if let Some(cp) = eval_centipawns(&contents) {
                    last.comment_eval = Some(cp);
                }
                if let Some(clock) = clock_seconds(&contents) {
                    last.clock_seconds = Some(clock);
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn begin_variation(
        &mut self,
        _movetext: &mut Self::Movetext,
    ) -> ControlFlow<Self::Output, Skip> {
        ControlFlow::Continue(Skip(true)) // Skip variations, stay in mainline
    }

    fn outcome(
        &mut self,
        _movetext: &mut Self::Movetext,
        outcome: Outcome,
    ) -> ControlFlow<Self::Output> {
        self.game.outcome = Some(match outcome {
            Outcome::Known(KnownOutcome::Decisive { winner }) => format!("{:?}", winner),
            Outcome::Known(KnownOutcome::Draw) => "Draw".to_string(),
            Outcome::Unknown => "Unknown".to_string(),
        });
        ControlFlow::Continue(())
    }

    fn end_game(&mut self, _movetext: Self::Movetext) -> Self::Output {
        std::mem::take(&mut self.game)
    }
}
