use std::time::Duration;

/// Default time a factory may take
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default time `wait_for` waits for a service
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings of an [Orchestrator](crate::Orchestrator)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Applied to descriptors without their own timeout
    pub default_timeout: Duration,
    /// Used by `wait_for` and `wait_for_all`
    pub default_wait_timeout: Duration,
    /// Whether registering a name twice replaces the first descriptor
    pub allow_overwrite: bool,
}
impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_INIT_TIMEOUT,
            default_wait_timeout: DEFAULT_WAIT_TIMEOUT,
            allow_overwrite: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_wait_timeout(mut self, timeout: Duration) -> Self {
        self.default_wait_timeout = timeout;
        self
    }

    pub fn allow_overwrite(mut self, allow: bool) -> Self {
        self.allow_overwrite = allow;
        self
    }
}
