use log::{debug, info, warn};
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::{
    engine::{EngineError, EngineResult, EngineSession, UciTransport, MAX_CANDIDATES},
    rules::RulesEngine,
};

/// Where a selected move came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MoveSource {
    /// Picked among the engine's top candidates
    TopMoves,
    /// The engine's single best move
    BestMove,
    /// Any legal move; the engine was unavailable or failed
    Random,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedMove {
    pub uci: String,
    pub source: MoveSource,
}

/// Chooses the opponent's reply, degrading gracefully when the engine does not answer
pub struct MoveSelector<T: UciTransport, R: RulesEngine> {
    session: EngineSession<T>,
    rules: R,
}

impl<T: UciTransport, R: RulesEngine> MoveSelector<T, R> {
    pub fn new(session: EngineSession<T>, rules: R) -> Self {
        Self { session, rules }
    }

    /// Pick a move for `fen`.
    ///
    /// `variety` > 1 picks uniformly among that many engine candidates,
    /// searched slightly shallower. Failures fall back to the single best
    /// move and then to a random legal move. Superseded or cancelled
    /// searches are returned as-is: someone else now owns the engine.
    pub async fn select_move(&self, fen: &str, depth: u32, variety: u8) -> EngineResult<SelectedMove> {
        let legal = self.rules.legal_moves(fen)?;
        if legal.is_empty() {
            return Err(EngineError::NoLegalMove);
        }

        if !self.session.is_ready() {
            info!("Engine not ready, playing a random move");
            return Self::random(&legal);
        }

        if variety > 1 {
            let count = variety.min(MAX_CANDIDATES).min(legal.len().min(u8::MAX as usize) as u8);
            let reduced = self.session.config().multipv_depth(depth, count);
            match self.session.get_top_moves(fen, reduced, count).await {
                Ok(candidates) => {
                    let picked = candidates.choose(&mut rand::thread_rng()).cloned();
                    if let Some(uci) = picked {
                        debug!("Picked {} among {:?}", uci, candidates);
                        return Ok(SelectedMove {
                            uci,
                            source: MoveSource::TopMoves,
                        });
                    }
                }
                Err(e) if e.is_expected() => return Err(e),
                Err(e) => warn!("Top moves failed ({}), trying the best move", e),
            }
        }

        match self.session.get_best_move(fen, depth).await {
            Ok(uci) => Ok(SelectedMove {
                uci,
                source: MoveSource::BestMove,
            }),
            Err(e) if e.is_expected() => Err(e),
            Err(e) => {
                warn!("Best move failed ({}), playing a random move", e);
                Self::random(&legal)
            }
        }
    }

    fn random(legal: &[String]) -> EngineResult<SelectedMove> {
        let uci = legal
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(EngineError::NoLegalMove)?;
        Ok(SelectedMove {
            uci,
            source: MoveSource::Random,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::{
            stub::{Search, StubScript},
            SessionConfig, WorkerTransport,
        },
        rules::ShakmatyRules,
    };

    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
    const MATED: &str = "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3";

    fn selector(script: &StubScript) -> MoveSelector<WorkerTransport, ShakmatyRules> {
        let config = SessionConfig {
            search_timeout_ms: 300,
            init_timeout_ms: 300,
            ..SessionConfig::default()
        };
        MoveSelector::new(EngineSession::new(script.transport(), config), ShakmatyRules)
    }

    #[tokio::test]
    async fn random_move_when_engine_not_ready() {
        let script = StubScript::new();
        let selector = selector(&script);
        let selected = selector.select_move(START, 10, 3).await.unwrap();
        assert_eq!(selected.source, MoveSource::Random);
        assert!(ShakmatyRules.legal_moves(START).unwrap().contains(&selected.uci));
        assert_eq!(script.starts(), 0);
    }

    #[tokio::test]
    async fn variety_picks_among_candidates_at_reduced_depth() {
        let script = StubScript::new();
        script.push(Search::reply(&[
            "info depth 8 multipv 1 score cp 25 pv e2e4",
            "info depth 8 multipv 2 score cp 20 pv d2d4",
            "info depth 8 multipv 3 score cp 18 pv g1f3",
            "bestmove e2e4",
        ]));
        let selector = selector(&script);
        selector.session.initialize().await.unwrap();

        let selected = selector.select_move(START, 10, 3).await.unwrap();
        assert_eq!(selected.source, MoveSource::TopMoves);
        assert!(["e2e4", "d2d4", "g1f3"].contains(&selected.uci.as_str()));
        assert!(script.received().contains(&"go depth 8".to_string()));
    }

    #[tokio::test]
    async fn falls_back_to_best_move() {
        let script = StubScript::new();
        script.push(Search::reply(&["bestmove e2e4"]));
        script.push(Search::reply(&["info depth 10 score cp 20 pv d2d4", "bestmove d2d4"]));
        let selector = selector(&script);
        selector.session.initialize().await.unwrap();

        let selected = selector.select_move(START, 10, 2).await.unwrap();
        assert_eq!(
            selected,
            SelectedMove {
                uci: "d2d4".to_string(),
                source: MoveSource::BestMove
            }
        );
    }

    #[tokio::test]
    async fn falls_back_to_random_when_engine_dies() {
        let script = StubScript::new();
        script.push(Search::Crash);
        let selector = selector(&script);
        selector.session.initialize().await.unwrap();

        let selected = selector.select_move(START, 10, 1).await.unwrap();
        assert_eq!(selected.source, MoveSource::Random);
        assert!(!selector.session.is_ready());
    }

    #[tokio::test]
    async fn no_legal_moves() {
        let script = StubScript::new();
        let selector = selector(&script);
        assert_eq!(selector.select_move(MATED, 10, 1).await, Err(EngineError::NoLegalMove));
    }
}
