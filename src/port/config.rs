#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::backoff::Constant;
use bon::Builder;

use crate::types::Browser;

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Configuration for [`super::ConnectionManager`] behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Builder)]
pub struct Config {
    /// Reconnection strategy configuration
    #[builder(default)]
    pub reconnect: ReconnectConfig,
    /// Browser the owning extension runs in, attached to diagnostics
    #[builder(default)]
    pub environment: Browser,
}

/// Configuration for automatic reconnection behavior.
///
/// Retries never stop and never grow: every attempt waits the same `delay`.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct ReconnectConfig {
    /// Time between a disconnect (or failed connect) and the next connection attempt
    #[builder(default = DEFAULT_RECONNECT_DELAY)]
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl From<ReconnectConfig> for Constant {
    fn from(config: ReconnectConfig) -> Self {
        Constant::new(config.delay)
    }
}
