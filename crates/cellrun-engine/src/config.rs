//! Engine configuration.

use std::time::Duration;

use cellrun_session::SessionConfig;

/// Settings fixed for the lifetime of an [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long the idle worker blocks before rechecking for shutdown.
    pub poll_interval: Duration,
    /// Also write captured output to the real process streams.
    pub echo_output: bool,
    /// Constructor name the session guard looks for.
    pub session_constructor: String,
    pub session: SessionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            echo_output: true,
            session_constructor: "Session".to_owned(),
            session: SessionConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Credential name written by `UPDATE_API_KEY`.
    #[must_use]
    pub fn credential_var(&self) -> &str {
        &self.session.credential_var
    }
}
