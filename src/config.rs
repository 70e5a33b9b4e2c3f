//! Runtime limits.

/// Default bound on nested method invocations.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1024;

/// Configuration shared by every frame of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Maximum number of live frames, the entry method included.
    pub max_call_depth: usize,
    /// Maximum number of instructions executed across all frames. `None`
    /// leaves the run unbounded.
    pub max_steps: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_steps: None,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_call_depth(mut self, max_call_depth: usize) -> Self {
        self.max_call_depth = max_call_depth;
        self
    }

    pub fn with_max_steps(mut self, max_steps: Option<u64>) -> Self {
        self.max_steps = max_steps;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bound_depth_but_not_steps() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_call_depth, DEFAULT_MAX_CALL_DEPTH);
        assert_eq!(config.max_steps, None);
        assert_eq!(config, RuntimeConfig::new());
    }

    #[test]
    fn builder_overrides() {
        let config = RuntimeConfig::new()
            .with_max_call_depth(8)
            .with_max_steps(Some(100));
        assert_eq!(config.max_call_depth, 8);
        assert_eq!(config.max_steps, Some(100));
    }
}
