use std::env;
use std::time::Duration;

/// Tunables for the sync engine. These are configuration, not business rules:
/// deployments with chattier players may need a longer settle window.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// A remote `play` forces a seek when the local position differs from the
    /// target by more than this many seconds.
    pub drift_threshold_secs: f64,
    /// How long the applying-remote guard stays up after an action finishes,
    /// absorbing the asynchronous player events the action itself triggers.
    pub settle_window: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drift_threshold_secs: 1.5,
            settle_window: Duration::from_millis(300),
        }
    }
}

impl SyncConfig {
    /// Defaults overridable via `WATCHLINK_DRIFT_THRESHOLD_SECS` and
    /// `WATCHLINK_SETTLE_WINDOW_MS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env::var("WATCHLINK_DRIFT_THRESHOLD_SECS")
            .ok()
            .and_then(|val| val.parse::<f64>().ok())
        {
            config.drift_threshold_secs = secs;
        }
        if let Some(ms) = env::var("WATCHLINK_SETTLE_WINDOW_MS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
        {
            config.settle_window = Duration::from_millis(ms);
        }
        config
    }
}
