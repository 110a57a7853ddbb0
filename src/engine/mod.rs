// =============================================================================
// Engine Session Module
// =============================================================================
//
// Drives one UCI engine on behalf of the opening trainer: the AI opponent asks
// it for moves and the coach asks it to grade the moves the student plays.
//
// ## Architecture Overview
//
// ```
// ┌─────────────────┐    ┌─────────────────┐
// │   Evaluation    │    │  MoveSelector   │   (crate::selector)
// │ (Move quality)  │    │ (Fallbacks)     │
// └─────────────────┘    └─────────────────┘
//          │                       │
// ┌────────────────────────────────────────┐
// │        Manager (EngineSession)         │
// │ one request slot, state machine, pump  │
// └────────────────────────────────────────┘
//          │                       │
// ┌─────────────────┐    ┌─────────────────┐
// │ Communication   │    │ Process/Worker  │
// │  (UCI parsing)  │    │  (Transports)   │
// └─────────────────┘    └─────────────────┘
// ```
//
// ## Module Responsibilities
//
// - **types**: Shared type definitions, constants, scores and error types
// - **config**: Session tunables, loadable from JSON
// - **communication**: Stateless UCI line parsing into `UciEvent`s
// - **process**: The `UciTransport` seam and the native subprocess transport
// - **worker**: In-process engines driven over channels
// - **manager**: `EngineSession`, lifecycle and request/response correlation
// - **evaluation**: Move-quality grading on top of the session
//
// ## Usage
//
// ```rust,ignore
// let session = EngineSession::new(ProcessTransport::new("/usr/bin/stockfish"), SessionConfig::default());
// session.initialize().await?;
// let best = session.get_best_move(fen, 12).await?;
// let top = session.get_top_moves(fen, 10, 3).await?;
//
// let evaluator = MoveQualityEvaluator::new(session.clone(), ShakmatyRules);
// let graded = evaluator.compare_move_quality(fen_before, fen_after, 12).await?;
// ```

pub mod types;
pub mod config;
pub mod communication;
pub mod process;
pub mod worker;
pub mod manager;
pub mod evaluation;

#[cfg(test)]
pub(crate) mod stub;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use types::{
    // Error handling
    EngineError, EngineResult,

    // Session lifecycle
    SessionState, RequestKind, EngineIdentity, EngineLog,

    // Scores and grading
    Side, Score, EngineEvaluation, MoveQuality, MoveQualityResult, PositionEvaluation,

    // Constants
    ENGINE_SEARCH_TIMEOUT, ENGINE_INIT_TIMEOUT, ENGINE_QUIT_GRACE, MAX_CANDIDATES, MATE_SCORE, MAX_CENTIPAWNS,
};

pub use config::SessionConfig;

pub use communication::{is_move_token, parse_line, UciEvent};

pub use process::{ProcessTransport, TransportEvent, UciTransport};

pub use worker::{UciWorker, WorkerFactory, WorkerTransport};

pub use manager::{EngineSession, MultipvAccumulator, SearchOutcome};

pub use evaluation::{classify, classify_delta, MoveQualityEvaluator};
