//! Centipawn scores and the UCI engine client.
//!
//! Stockfish (or any UCI engine) runs as a child process. Scores reported by
//! the engine are relative to the side to move; everything outside this module
//! works from White's perspective.

use crate::config::EngineConfig;
use crate::error::{GambitError, Result};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Centipawn value standing in for a forced mate.
pub const MATE_SCORE: i32 = 100_000;

/// How long an engine gets to exit after `quit` before it is killed.
const QUIT_GRACE: Duration = Duration::from_millis(500);

/// Engine evaluation from White's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Centipawns(i32),
    /// Mate in n moves; positive when White mates.
    Mate(i32),
}

impl Score {
    /// Collapse the score onto the centipawn axis.
    ///
    /// Mates map to `±MATE_SCORE` shifted towards zero by the distance to mate,
    /// so a faster mate scores higher than a slower one.
    pub fn centipawns(self) -> i32 {
        match self {
            Score::Centipawns(cp) => cp,
            Score::Mate(n) if n > 0 => MATE_SCORE.saturating_sub(n),
            Score::Mate(n) if n < 0 => (-MATE_SCORE).saturating_sub(n),
            // Mate(0) carries no side; callers resolve it with `checkmated`.
            Score::Mate(_) => 0,
        }
    }

    /// Score of a position in which the side to move is checkmated.
    pub fn checkmated(white_to_move: bool) -> Score {
        if white_to_move {
            Score::Centipawns(-MATE_SCORE)
        } else {
            Score::Centipawns(MATE_SCORE)
        }
    }
}

/// Score as printed by the engine, relative to the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawScore {
    Cp(i32),
    Mate(i32),
}

impl RawScore {
    pub fn to_white(self, white_to_move: bool) -> Score {
        let sign = if white_to_move { 1 } else { -1 };
        match self {
            RawScore::Cp(cp) => Score::Centipawns(cp.saturating_mul(sign)),
            RawScore::Mate(0) => Score::checkmated(white_to_move),
            RawScore::Mate(n) => Score::Mate(n.saturating_mul(sign)),
        }
    }
}

/// Something that can score a position.
pub trait Evaluator {
    fn evaluate(&mut self, fen: &str, white_to_move: bool) -> Result<Score>;
}

/// Extract the score from a UCI `info` line.
///
/// Bound-only scores (`lowerbound`/`upperbound`) are ignored, as are lines
/// belonging to secondary principal variations.
pub fn parse_info_score(line: &str) -> Option<RawScore> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("info") {
        return None;
    }
    let mut score = None;
    while let Some(token) = tokens.next() {
        match token {
            "multipv" => {
                if tokens.next() != Some("1") {
                    return None;
                }
            }
            "score" => {
                let kind = tokens.next()?;
                let value: i32 = tokens.next()?.parse().ok()?;
                score = match kind {
                    "cp" => Some(RawScore::Cp(value)),
                    "mate" => Some(RawScore::Mate(value)),
                    _ => None,
                };
            }
            "lowerbound" | "upperbound" => return None,
            // Everything after the principal variation is move text.
            "pv" => break,
            _ => {}
        }
    }
    score
}

/// A running UCI engine.
///
/// Engine output is read on a separate thread so that every read can give up
/// after `EngineConfig::timeout_secs`.
pub struct UciEngine {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    lines: Receiver<io::Result<String>>,
    depth: u32,
    timeout: Duration,
}

impl UciEngine {
    /// Start the engine and complete the UCI handshake.
    pub fn spawn(config: &EngineConfig) -> Result<Self> {
        let mut child = Command::new(&config.path)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                GambitError::io(format!("failed to start engine {:?}", config.path), e)
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GambitError::EngineUnavailable("engine stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GambitError::EngineUnavailable("engine stdout not captured".into()))?;

        let (tx, lines) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        let mut engine = UciEngine {
            child,
            stdin: BufWriter::new(stdin),
            lines,
            depth: config.depth,
            timeout: Duration::from_secs(config.timeout_secs),
        };

        engine.send("uci")?;
        engine.wait_for("uciok")?;
        engine.send(&format!("setoption name Threads value {}", config.threads))?;
        engine.send(&format!("setoption name Hash value {}", config.hash_mb))?;
        engine.send("isready")?;
        engine.wait_for("readyok")?;
        debug!(path = ?config.path, depth = config.depth, "engine ready");
        Ok(engine)
    }

    fn send(&mut self, command: &str) -> Result<()> {
        writeln!(self.stdin, "{command}")
            .and_then(|_| self.stdin.flush())
            .map_err(|e| GambitError::io(format!("writing `{command}` to engine"), e))
    }

    fn read_line(&mut self) -> Result<String> {
        match self.lines.recv_timeout(self.timeout) {
            Ok(Ok(line)) => Ok(line),
            Ok(Err(e)) => Err(GambitError::io("reading from engine", e)),
            Err(RecvTimeoutError::Timeout) => Err(GambitError::Engine(format!(
                "no output from engine for {}s",
                self.timeout.as_secs()
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(GambitError::Engine("engine closed its output".into()))
            }
        }
    }

    fn wait_for(&mut self, token: &str) -> Result<()> {
        loop {
            let line = self.read_line()?;
            if line.trim() == token {
                return Ok(());
            }
        }
    }
}

impl Evaluator for UciEngine {
    fn evaluate(&mut self, fen: &str, white_to_move: bool) -> Result<Score> {
        self.send(&format!("position fen {fen}"))?;
        self.send(&format!("go depth {}", self.depth))?;

        let mut last = None;
        loop {
            let line = self.read_line()?;
            if line.starts_with("bestmove") {
                break;
            }
            if let Some(score) = parse_info_score(&line) {
                last = Some(score);
            }
        }

        last.map(|raw| raw.to_white(white_to_move))
            .ok_or_else(|| GambitError::Engine(format!("no score reported for {fen}")))
    }
}

impl Drop for UciEngine {
    fn drop(&mut self) {
        if self.send("quit").is_ok() {
            let deadline = Instant::now() + QUIT_GRACE;
            while Instant::now() < deadline {
                match self.child.try_wait() {
                    Ok(Some(_)) => return,
                    Ok(None) => thread::sleep(Duration::from_millis(10)),
                    Err(_) => break,
                }
            }
        }
        let _ = self.child.kill();
        if let Err(e) = self.child.wait() {
            warn!("failed to reap engine process: {}", e);
        }
    }
}
