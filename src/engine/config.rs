use std::{path::Path, time::Duration};

use derivative::Derivative;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::types::{EngineError, EngineResult, ENGINE_INIT_TIMEOUT, ENGINE_SEARCH_TIMEOUT};

/// Tunables for one engine session
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```json
/// { "searchTimeoutMs": 5000, "multipvDepthReduction": 3 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Derivative)]
#[derivative(Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Deadline for each search request
    #[derivative(Default(value = "ENGINE_SEARCH_TIMEOUT.as_millis() as u64"))]
    pub search_timeout_ms: u64,

    /// Deadline for the `uci`/`isready` handshake
    #[derivative(Default(value = "ENGINE_INIT_TIMEOUT.as_millis() as u64"))]
    pub init_timeout_ms: u64,

    /// Plies removed from the requested depth when more than one candidate is searched
    #[derivative(Default(value = "2"))]
    pub multipv_depth_reduction: u32,

    /// Floor applied after the depth reduction
    #[derivative(Default(value = "1"))]
    pub min_search_depth: u32,

    /// Number of transcript entries kept per session
    #[derivative(Default(value = "500"))]
    pub transcript_limit: usize,
}

impl SessionConfig {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    /// Depth to use for a multi-candidate search derived from the single-line depth
    pub fn multipv_depth(&self, depth: u32, candidates: u8) -> u32 {
        if candidates <= 1 {
            return depth;
        }
        depth
            .saturating_sub(self.multipv_depth_reduction)
            .max(self.min_search_depth)
            .max(1)
    }

    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let config: SessionConfig = serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidArgument(format!("session config: {}", e)))?;
        config.validate()?;
        debug!("Parsed session config: {:?}", config);
        Ok(config)
    }

    /// Read a JSON config file
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        info!("Loading session config from: {:?}", path);
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::InvalidArgument(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.search_timeout_ms == 0 {
            return Err(EngineError::InvalidArgument("searchTimeoutMs must be positive".to_string()));
        }
        if self.init_timeout_ms == 0 {
            return Err(EngineError::InvalidArgument("initTimeoutMs must be positive".to_string()));
        }
        Ok(())
    }
}
