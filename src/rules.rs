use log::warn;
use shakmaty::{fen::Fen, san::SanPlus, uci::UciMove, CastlingMode, Chess, Position};

use crate::engine::{EngineError, EngineResult, Side};

/// Chess rules needed around the engine: whose turn it is, which moves are
/// legal, and how a move reads in SAN
pub trait RulesEngine: Send + Sync {
    fn turn(&self, fen: &str) -> EngineResult<Side>;

    /// Legal moves as UCI tokens, standard castling notation (`e1g1`)
    fn legal_moves(&self, fen: &str) -> EngineResult<Vec<String>>;

    fn to_san(&self, fen: &str, uci_move: &str) -> EngineResult<String>;
}

/// [`RulesEngine`] backed by `shakmaty`
#[derive(Debug, Clone, Copy, Default)]
pub struct ShakmatyRules;

impl ShakmatyRules {
    fn position(fen: &str) -> EngineResult<Chess> {
        let parsed: Fen = fen
            .trim()
            .parse()
            .map_err(|e| EngineError::InvalidPosition(format!("{}: {}", fen, e)))?;
        match parsed.into_position(CastlingMode::Chess960) {
            Ok(pos) => Ok(pos),
            Err(e) => {
                warn!("Position error for {}, attempting to ignore extra material", fen);
                e.ignore_too_much_material()
                    .map_err(|e| EngineError::InvalidPosition(format!("{}: {}", fen, e)))
            }
        }
    }
}

impl RulesEngine for ShakmatyRules {
    fn turn(&self, fen: &str) -> EngineResult<Side> {
        Ok(Self::position(fen)?.turn().into())
    }

    fn legal_moves(&self, fen: &str) -> EngineResult<Vec<String>> {
        let pos = Self::position(fen)?;
        Ok(pos
            .legal_moves()
            .iter()
            .map(|m| m.to_uci(CastlingMode::Standard).to_string())
            .collect())
    }

    fn to_san(&self, fen: &str, uci_move: &str) -> EngineResult<String> {
        let mut pos = Self::position(fen)?;
        let uci = UciMove::from_ascii(uci_move.as_bytes())
            .map_err(|_| EngineError::MalformedMove(uci_move.to_string()))?;
        let mv = uci
            .to_move(&pos)
            .map_err(|e| EngineError::MalformedMove(format!("{}: {}", uci_move, e)))?;
        Ok(SanPlus::from_move_and_play_unchecked(&mut pos, &mv).to_string())
    }
}
