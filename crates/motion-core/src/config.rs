//! Controller instance configuration.
//!
//! Deserialized from a TOML table and validated before a controller is
//! built. Timeouts are humantime strings (`"500ms"`, `"2s"`).

use std::time::Duration;

use anyhow::{bail, Result};
use serde::Deserialize;

/// Polling ceiling, matching the fastest supported hardware scan.
pub const MAX_SCAN_RATE_HZ: u32 = 60;

/// Communication timeout ceiling for every controller family.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(5);

fn default_baud() -> u32 {
    9600
}

fn default_scan_rate() -> u32 {
    6
}

fn default_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_no_motion_ceiling() -> u32 {
    10
}

fn default_max_reply() -> usize {
    256
}

/// Configuration for one controller instance.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Serial port path (e.g. `/dev/ttyUSB0`). Unused when the caller
    /// supplies its own wire (tests, bridged channels).
    #[serde(default)]
    pub port: Option<String>,

    #[serde(default = "default_baud")]
    pub baud: u32,

    /// Axis count; omit to discover it from the controller where the
    /// dialect supports that.
    #[serde(default)]
    pub axes: Option<usize>,

    /// Poll rate in Hz, clamped to `1..=60`.
    #[serde(default = "default_scan_rate")]
    pub scan_rate_hz: u32,

    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub send_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub recv_timeout: Duration,

    /// Stale-data delay: minimum gap between a motion/velocity command
    /// and the first status query for that axis. Zero disables it.
    #[serde(with = "humantime_serde", default)]
    pub update_delay: Duration,

    /// Consecutive no-motion polls tolerated while a move is
    /// outstanding before the stall escape hatch fires.
    #[serde(default = "default_no_motion_ceiling")]
    pub no_motion_ceiling: u32,

    /// Largest reply accepted from the controller.
    #[serde(default = "default_max_reply")]
    pub max_reply_len: usize,
}

impl ControllerConfig {
    /// Semantic validation beyond what serde enforces.
    pub fn validate(&self) -> Result<()> {
        if self.scan_rate_hz == 0 {
            bail!("scan_rate_hz must be at least 1");
        }
        if self.send_timeout > MAX_TIMEOUT || self.recv_timeout > MAX_TIMEOUT {
            bail!(
                "timeouts are capped at {}s for all controller families",
                MAX_TIMEOUT.as_secs()
            );
        }
        if self.recv_timeout.is_zero() {
            bail!("recv_timeout must be nonzero");
        }
        if let Some(axes) = self.axes {
            if axes == 0 {
                bail!("axes must be at least 1 when given");
            }
        }
        Ok(())
    }

    /// Poll period derived from the (clamped) scan rate.
    pub fn scan_period(&self) -> Duration {
        let hz = self.scan_rate_hz.clamp(1, MAX_SCAN_RATE_HZ);
        Duration::from_secs_f64(1.0 / f64::from(hz))
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: default_baud(),
            axes: None,
            scan_rate_hz: default_scan_rate(),
            send_timeout: default_timeout(),
            recv_timeout: default_timeout(),
            update_delay: Duration::ZERO,
            no_motion_ceiling: default_no_motion_ceiling(),
            max_reply_len: default_max_reply(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_from_toml_with_defaults() {
        let cfg: ControllerConfig = toml::from_str(
            r#"
            port = "/dev/ttyUSB0"
            axes = 3
            recv_timeout = "500ms"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(cfg.axes, Some(3));
        assert_eq!(cfg.recv_timeout, Duration::from_millis(500));
        assert_eq!(cfg.scan_rate_hz, 6);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_timeout_over_cap() {
        let cfg = ControllerConfig {
            recv_timeout: Duration::from_secs(30),
            ..ControllerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn scan_period_clamps_rate() {
        let cfg = ControllerConfig {
            scan_rate_hz: 600,
            ..ControllerConfig::default()
        };
        assert_eq!(cfg.scan_period(), Duration::from_secs_f64(1.0 / 60.0));
    }
}
