//! Runner configuration
//!
//! Declared policy choices for the engine: missing-placeholder handling,
//! parallel fan-out width, and timeout bounds for model calls and whole
//! invocations.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Policy for instruction placeholders that reference an absent state key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingKeyPolicy {
    /// Substitute an empty string and continue (non-fatal)
    #[default]
    Empty,
    /// Fail the invocation with `EngineError::MissingStateKey`
    Fail,
}

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// How leaf templates treat absent state keys
    pub missing_key_policy: MissingKeyPolicy,

    /// Maximum concurrent parallel branches per fan-out
    pub parallelism: usize,

    /// Timeout for a single opaque model call
    #[serde(with = "humantime_serde")]
    pub model_timeout: Duration,

    /// Timeout for one whole invocation
    #[serde(with = "humantime_serde")]
    pub invocation_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            missing_key_policy: MissingKeyPolicy::default(),
            parallelism: num_cpus::get(),
            model_timeout: Duration::from_secs(300),       // 5 min per call
            invocation_timeout: Duration::from_secs(3600), // 1 hour total
        }
    }
}

impl RunnerConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the missing-key policy
    pub fn with_missing_key_policy(mut self, policy: MissingKeyPolicy) -> Self {
        self.missing_key_policy = policy;
        self
    }

    /// Set the parallel fan-out width (clamped to at least 1)
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Set the per-model-call timeout
    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    /// Set the whole-invocation timeout
    pub fn with_invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = timeout;
        self
    }
}
