use std::time::Duration;

/// Runtime knobs for a session. Read from `LABSYNC_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Buffer of the change channel.
    pub queue_cap: usize,
    /// First delay between resnapshot attempts after losing the channel.
    pub resync_backoff: Duration,
    pub resync_backoff_max: Duration,
    /// Failed resnapshot attempts before the session gives up.
    pub resync_max_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_cap: 2048,
            resync_backoff: Duration::from_millis(500),
            resync_backoff_max: Duration::from_secs(30),
            resync_max_attempts: 5,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            queue_cap: env_parse("LABSYNC_QUEUE_CAP").unwrap_or(d.queue_cap).max(1),
            resync_backoff: env_parse("LABSYNC_RESYNC_BACKOFF_MS").map(Duration::from_millis).unwrap_or(d.resync_backoff),
            resync_backoff_max: env_parse("LABSYNC_RESYNC_BACKOFF_MAX_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.resync_backoff_max),
            resync_max_attempts: env_parse("LABSYNC_RESYNC_MAX_ATTEMPTS").unwrap_or(d.resync_max_attempts).max(1),
        }
    }

    /// Delay before attempt `n + 1`, doubling from `resync_backoff` up to the cap.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.resync_backoff.saturating_mul(factor).min(self.resync_backoff_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let c = SessionConfig {
            resync_backoff: Duration::from_millis(100),
            resync_backoff_max: Duration::from_millis(350),
            ..SessionConfig::default()
        };
        assert_eq!(c.backoff_for(1), Duration::from_millis(100));
        assert_eq!(c.backoff_for(2), Duration::from_millis(200));
        assert_eq!(c.backoff_for(3), Duration::from_millis(350));
        assert_eq!(c.backoff_for(40), Duration::from_millis(350));
    }
}
