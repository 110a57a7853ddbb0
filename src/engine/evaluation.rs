use log::{debug, warn};

use super::{
    manager::EngineSession,
    process::UciTransport,
    types::{
        EngineError, EngineEvaluation, EngineResult, MoveQuality, MoveQualityResult, PositionEvaluation,
    },
};
use crate::rules::RulesEngine;

/// Centipawn loss at or beyond which a move is a blunder
pub const BLUNDER_THRESHOLD: i32 = 200;
pub const MISTAKE_THRESHOLD: i32 = 100;
pub const INACCURACY_THRESHOLD: i32 = 50;

/// Grade a centipawn delta (`after - before`, mover's perspective)
pub fn classify_delta(delta: i32) -> MoveQuality {
    let loss = -delta;
    if loss >= BLUNDER_THRESHOLD {
        MoveQuality::Blunder
    } else if loss >= MISTAKE_THRESHOLD {
        MoveQuality::Mistake
    } else if loss >= INACCURACY_THRESHOLD {
        MoveQuality::Inaccuracy
    } else {
        MoveQuality::Good
    }
}

/// Grade a move from the evaluations around it.
///
/// Both evaluations must already be expressed from the mover's perspective.
/// Throwing away a forced mate, or walking into one, is a blunder whatever
/// the numbers say.
pub fn classify(before: &EngineEvaluation, after: &EngineEvaluation) -> MoveQuality {
    if before.is_winning_mate() && !after.is_winning_mate() {
        return MoveQuality::Blunder;
    }
    if after.is_losing_mate() && !before.is_losing_mate() {
        return MoveQuality::Blunder;
    }
    classify_delta(after.centipawns() - before.centipawns())
}

/// Grades moves by asking the engine about the position before and after them
pub struct MoveQualityEvaluator<T: UciTransport, R: RulesEngine> {
    session: EngineSession<T>,
    rules: R,
}

impl<T: UciTransport, R: RulesEngine> MoveQualityEvaluator<T, R> {
    pub fn new(session: EngineSession<T>, rules: R) -> Self {
        Self { session, rules }
    }

    pub fn session(&self) -> &EngineSession<T> {
        &self.session
    }

    /// Score of `fen` from its side to move, plus the engine's choice there
    pub async fn evaluate_position(&self, fen: &str, depth: u32) -> EngineResult<PositionEvaluation> {
        let side_to_move = self.rules.turn(fen)?;
        let outcome = self.session.search_with_score(fen, depth).await?;

        let score = match (outcome.score, &outcome.best_move) {
            (Some(score), _) => score,
            (None, None) => return Err(EngineError::NoLegalMove),
            (None, Some(best_move)) => {
                warn!("Engine chose {} in {} without reporting a score", best_move, fen);
                return Err(EngineError::EngineFailure(format!(
                    "no score reported for {}",
                    fen
                )));
            }
        };

        Ok(PositionEvaluation {
            evaluation: EngineEvaluation::from_engine(score, side_to_move),
            best_move: outcome.best_move,
        })
    }

    /// Compare the positions before and after a move.
    ///
    /// The two searches run one after the other on the shared session.
    pub async fn compare_move_quality(
        &self,
        fen_before: &str,
        fen_after: &str,
        depth: u32,
    ) -> EngineResult<MoveQualityResult> {
        let mover = self.rules.turn(fen_before)?;
        let after_turn = self.rules.turn(fen_after)?;
        if after_turn == mover {
            debug!("Same side to move before and after: {} / {}", fen_before, fen_after);
        }

        let before = self.evaluate_position(fen_before, depth).await?;
        let after = self.evaluate_position(fen_after, depth).await?;

        let eval_before = before.evaluation.relative_to(mover);
        let eval_after = after.evaluation.relative_to(mover);
        let eval_delta = eval_after.centipawns() - eval_before.centipawns();
        let quality = classify(&eval_before, &eval_after);

        let best_move_san = match &before.best_move {
            Some(best_move) => match self.rules.to_san(fen_before, best_move) {
                Ok(san) => Some(san),
                Err(e) => {
                    warn!("Could not convert best move {} to SAN: {}", best_move, e);
                    None
                }
            },
            None => None,
        };

        debug!(
            "Move quality {:?}: {} -> {} ({:+})",
            quality,
            eval_before.centipawns(),
            eval_after.centipawns(),
            eval_delta
        );

        Ok(MoveQualityResult {
            eval_before,
            eval_after,
            best_move: before.best_move,
            best_move_san,
            eval_delta,
            quality,
        })
    }
}
