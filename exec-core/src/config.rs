//! Configuration
//!
//! [`ExecConfig`] holds the tunables of a [`System`](crate::exec::System).
//! It is plain data: build it with the `with_*` methods or load it from JSON.

use serde::{Deserialize, Serialize};

use crate::error::{ExecError, Result};

/// Which data manager backs the executor cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataManagerKind {
    /// Dense storage indexed by node index. Best for large, stable networks.
    #[default]
    Vector,
    /// Sparse concurrent hash map. Best when few nodes hold data.
    Hash,
}

/// Execution tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Worker threads for compilation and parallel execution. `None` uses
    /// rayon's default (one per core).
    pub worker_threads: Option<usize>,

    /// Maximum iterations a speculation group may run before settling on a
    /// best-effort result.
    pub speculation_iteration_cap: usize,

    /// Schedules with fewer units than this run on the calling thread.
    pub parallel_threshold: usize,

    pub data_manager: DataManagerKind,

    /// Whether compilation removes nodes no request can reach.
    pub uncompile_unreachable: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            speculation_iteration_cap: 32,
            parallel_threshold: 16,
            data_manager: DataManagerKind::Vector,
            uncompile_unreachable: true,
        }
    }
}

impl ExecConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    pub fn with_speculation_iteration_cap(mut self, cap: usize) -> Self {
        self.speculation_iteration_cap = cap;
        self
    }

    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    pub fn with_data_manager(mut self, kind: DataManagerKind) -> Self {
        self.data_manager = kind;
        self
    }

    pub fn with_uncompile_unreachable(mut self, enabled: bool) -> Self {
        self.uncompile_unreachable = enabled;
        self
    }

    /// Parse and validate a JSON configuration. Missing fields take their
    /// defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ExecConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == Some(0) {
            return Err(ExecError::InvalidConfig(
                "worker_threads must be at least 1".into(),
            ));
        }
        if self.speculation_iteration_cap == 0 {
            return Err(ExecError::InvalidConfig(
                "speculation_iteration_cap must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
