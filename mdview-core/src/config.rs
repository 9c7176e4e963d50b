use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::debounce::{DebouncePolicy, WriteStability};

/// Serialisable watch tuning as it appears in `mdview.toml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet window after the last raw event before a path fires.
    pub quiet_period_ms: u64,
    /// How long size and mtime must hold still before a single-file event
    /// enters its quiet window. `0` disables write stability.
    pub stability_threshold_ms: u64,
    pub stability_poll_ms: u64,
    /// Per-subscriber event buffer.
    pub channel_capacity: usize,
    pub keep_alive_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 300,
            stability_threshold_ms: 100,
            stability_poll_ms: 50,
            channel_capacity: 256,
            keep_alive_secs: 15,
        }
    }
}

/// Runtime form of [`WatchConfig`].
#[derive(Clone, Debug)]
pub struct FsWatchConfig {
    pub quiet_period: Duration,
    pub write_stability: Option<WriteStability>,
    pub channel_capacity: usize,
    pub keep_alive: Duration,
}

impl Default for FsWatchConfig {
    fn default() -> Self {
        WatchConfig::default().into()
    }
}

impl From<WatchConfig> for FsWatchConfig {
    fn from(cfg: WatchConfig) -> Self {
        let write_stability = (cfg.stability_threshold_ms > 0).then(|| WriteStability {
            threshold: Duration::from_millis(cfg.stability_threshold_ms),
            poll_interval: Duration::from_millis(
                cfg.stability_poll_ms.clamp(1, cfg.stability_threshold_ms),
            ),
        });

        Self {
            quiet_period: Duration::from_millis(cfg.quiet_period_ms.max(1)),
            write_stability,
            channel_capacity: cfg.channel_capacity.max(1),
            keep_alive: Duration::from_secs(cfg.keep_alive_secs.max(1)),
        }
    }
}

impl FsWatchConfig {
    pub fn debounce_policy(&self) -> DebouncePolicy {
        DebouncePolicy {
            quiet_period: self.quiet_period,
            stability: self.write_stability,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let runtime = FsWatchConfig::default();
        assert_eq!(runtime.quiet_period, Duration::from_millis(300));
        assert_eq!(
            runtime.write_stability,
            Some(WriteStability {
                threshold: Duration::from_millis(100),
                poll_interval: Duration::from_millis(50),
            })
        );
        assert_eq!(runtime.channel_capacity, 256);
    }

    #[test]
    fn zero_threshold_disables_stability_and_zero_values_are_clamped() {
        let runtime = FsWatchConfig::from(WatchConfig {
            quiet_period_ms: 0,
            stability_threshold_ms: 0,
            stability_poll_ms: 0,
            channel_capacity: 0,
            keep_alive_secs: 0,
        });
        assert_eq!(runtime.quiet_period, Duration::from_millis(1));
        assert!(runtime.write_stability.is_none());
        assert_eq!(runtime.channel_capacity, 1);
        assert_eq!(runtime.keep_alive, Duration::from_secs(1));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg: WatchConfig = toml::from_str("quiet_period_ms = 50").unwrap();
        assert_eq!(cfg.quiet_period_ms, 50);
        assert_eq!(cfg.stability_poll_ms, 50);
        assert_eq!(cfg.channel_capacity, 256);
    }
}
