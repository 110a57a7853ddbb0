use std::time::Duration;

use serde::{Deserialize, Serialize};

// =============================================================================
// Constants
// =============================================================================

/// Default deadline for a single search request
pub const ENGINE_SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default window for the `uci`/`isready` handshake
pub const ENGINE_INIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period between `quit` and a forced kill of the engine process
pub const ENGINE_QUIT_GRACE: Duration = Duration::from_millis(100);

/// Largest candidate count accepted by `get_top_moves`
pub const MAX_CANDIDATES: u8 = 5;

/// Centipawn magnitude used when a mate score has to be compared with centipawns
pub const MATE_SCORE: i32 = 10_000;

/// Largest centipawn magnitude taken at face value. Tablebase wins are
/// reported as huge `cp` scores and must still rank below any forced mate.
pub const MAX_CENTIPAWNS: i32 = MATE_SCORE - 1_000;

/// UCI option name for multi-line search
pub const MULTIPV_OPTION: &str = "MultiPV";

// =============================================================================
// Error Types
// =============================================================================

/// Failure kinds surfaced by the engine session and the move-quality evaluator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Engine is not initialized")]
    NotInitialized,

    #[error("Failed to start engine: {0}")]
    SpawnError(String),

    #[error("Engine initialization timeout")]
    InitializationTimeout,

    #[error("Request superseded by a newer request")]
    Superseded,

    #[error("Engine calculation timeout")]
    CalculationTimeout,

    #[error("Engine reported no legal move")]
    NoLegalMove,

    #[error("Engine reported no candidate moves")]
    NoCandidates,

    #[error("Engine failure: {0}")]
    EngineFailure(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Malformed move token from engine: {0}")]
    MalformedMove(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid position: {0}")]
    InvalidPosition(String),
}

impl EngineError {
    /// Outcomes that happen in normal operation and are not worth an error log
    pub fn is_expected(&self) -> bool {
        matches!(self, EngineError::Superseded | EngineError::Cancelled)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

// =============================================================================
// Session State
// =============================================================================

/// A player colour, as seen by the evaluation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn other(self) -> Self {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }
}

impl From<shakmaty::Color> for Side {
    fn from(color: shakmaty::Color) -> Self {
        match color {
            shakmaty::Color::White => Side::White,
            shakmaty::Color::Black => Side::Black,
        }
    }
}

/// Lifecycle of one engine session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No engine process or worker exists
    Uninitialized,
    /// Transport started, waiting for `uciok`/`readyok`
    Initializing,
    /// Handshake complete, no request outstanding
    Ready,
    /// Handshake complete, one request outstanding
    Busy,
    /// Transport died or the engine reported an error; `initialize()` is required again
    Crashed,
}

/// The two kinds of search a caller can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    SingleBestMove,
    TopMoves,
}

/// Transcript entry: a command we sent or a line the engine printed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum EngineLog {
    Gui(String),
    Engine(String),
}

/// What the engine told us about itself during the handshake
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineIdentity {
    pub name: Option<String>,
    pub author: Option<String>,
    pub max_multipv: Option<u8>,
}

// =============================================================================
// Evaluations
// =============================================================================

/// Raw engine score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Score {
    Centipawns(i32),
    /// Positive: the perspective side mates. Negative or zero: it gets mated.
    MateIn(i32),
}

impl Score {
    pub fn negate(self) -> Self {
        match self {
            Score::Centipawns(cp) => Score::Centipawns(-cp),
            Score::MateIn(n) => Score::MateIn(-n),
        }
    }
}

/// A score together with the side it was computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineEvaluation {
    pub score: Score,
    /// Side to move in the evaluated position; never changes on re-expression
    pub side_to_move: Side,
    /// Side whose point of view `score` is expressed from
    pub perspective: Side,
}

impl EngineEvaluation {
    /// Score as reported by the engine, i.e. from the side to move
    pub fn from_engine(score: Score, side_to_move: Side) -> Self {
        Self {
            score,
            side_to_move,
            perspective: side_to_move,
        }
    }

    /// Re-express the score from `color`'s point of view
    pub fn relative_to(&self, color: Side) -> Self {
        let score = if color == self.perspective {
            self.score
        } else {
            self.score.negate()
        };
        Self {
            score,
            side_to_move: self.side_to_move,
            perspective: color,
        }
    }

    /// `mate 0` means the side to move is already checkmated, so its sign
    /// depends on who we are looking from rather than on the value.
    fn mate_sign(&self, n: i32) -> i32 {
        if n == 0 {
            if self.perspective == self.side_to_move {
                -1
            } else {
                1
            }
        } else {
            n.signum()
        }
    }

    /// The perspective side has a forced mate
    pub fn is_winning_mate(&self) -> bool {
        matches!(self.score, Score::MateIn(n) if self.mate_sign(n) > 0)
    }

    /// The perspective side is getting mated
    pub fn is_losing_mate(&self) -> bool {
        matches!(self.score, Score::MateIn(n) if self.mate_sign(n) < 0)
    }

    /// Centipawn value clamped to `±MAX_CENTIPAWNS`, with mates mapped to `±(MATE_SCORE - |n|)`
    pub fn centipawns(&self) -> i32 {
        match self.score {
            Score::Centipawns(cp) => cp.clamp(-MAX_CENTIPAWNS, MAX_CENTIPAWNS),
            Score::MateIn(n) => self.mate_sign(n) * (MATE_SCORE - n.abs()),
        }
    }
}

/// Discrete grade of a played move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MoveQuality {
    Blunder,
    Mistake,
    Inaccuracy,
    Good,
}

/// Outcome of comparing the position before and after a move
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveQualityResult {
    pub eval_before: EngineEvaluation,
    pub eval_after: EngineEvaluation,
    pub best_move: Option<String>,
    pub best_move_san: Option<String>,
    pub eval_delta: i32,
    pub quality: MoveQuality,
}

/// Evaluation of one position plus the engine's preferred move there
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionEvaluation {
    pub evaluation: EngineEvaluation,
    pub best_move: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_to_same_side_keeps_value() {
        let eval = EngineEvaluation::from_engine(Score::Centipawns(42), Side::White);
        assert_eq!(eval.relative_to(Side::White).score, Score::Centipawns(42));
    }

    #[test]
    fn relative_to_round_trips() {
        for score in [Score::Centipawns(-130), Score::Centipawns(0), Score::MateIn(4), Score::MateIn(-2)] {
            let eval = EngineEvaluation::from_engine(score, Side::Black);
            let flipped = eval.relative_to(Side::White);
            assert_eq!(flipped.score, score.negate());
            assert_eq!(flipped.side_to_move, Side::Black);
            assert_eq!(flipped.relative_to(Side::Black), eval);
        }
    }

    #[test]
    fn mate_zero_follows_side_to_move() {
        let mated = EngineEvaluation::from_engine(Score::MateIn(0), Side::Black);
        assert!(mated.is_losing_mate());
        assert!(mated.relative_to(Side::White).is_winning_mate());
        assert_eq!(mated.relative_to(Side::White).centipawns(), MATE_SCORE);
    }

    #[test]
    fn mate_centipawn_equivalents() {
        let eval = EngineEvaluation::from_engine(Score::MateIn(3), Side::White);
        assert_eq!(eval.centipawns(), MATE_SCORE - 3);
        assert_eq!(eval.relative_to(Side::Black).centipawns(), -(MATE_SCORE - 3));
    }

    #[test]
    fn tablebase_scores_rank_below_mates() {
        let won = EngineEvaluation::from_engine(Score::Centipawns(20_000), Side::White);
        assert_eq!(won.centipawns(), MAX_CENTIPAWNS);
        assert_eq!(won.relative_to(Side::Black).centipawns(), -MAX_CENTIPAWNS);

        let slow_mate = EngineEvaluation::from_engine(Score::MateIn(200), Side::White);
        assert!(slow_mate.centipawns() > won.centipawns());
    }

    #[test]
    fn expected_errors() {
        assert!(EngineError::Superseded.is_expected());
        assert!(EngineError::Cancelled.is_expected());
        assert!(!EngineError::CalculationTimeout.is_expected());
    }
}
