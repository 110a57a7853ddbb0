//! Engine plumbing for an opening trainer.
//!
//! [`engine`] owns the UCI engine session and the move-quality evaluator,
//! [`rules`] answers chess-rule questions the engine layer needs, and
//! [`selector`] picks the AI opponent's moves with explicit fallbacks.

pub mod engine;
pub mod rules;
pub mod selector;

pub use engine::{
    EngineError, EngineResult, EngineSession, MoveQualityEvaluator, ProcessTransport, SessionConfig,
    WorkerTransport,
};
pub use rules::{RulesEngine, ShakmatyRules};
pub use selector::{MoveSelector, MoveSource, SelectedMove};
