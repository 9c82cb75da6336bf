use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Emulator and protocol parameters for one simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Probability that a packet is lost in the channel.
    pub loss_rate: f64,
    /// Probability that a surviving packet has one byte corrupted.
    pub corrupt_rate: f64,
    /// One-way latency bounds; latency is uniform in `[min, max]`.
    pub min_latency: f64,
    pub max_latency: f64,
    pub seed: u64,
    /// Sender/receiver window for Go-Back-N and Selective Repeat.
    /// Alternating-Bit ignores it.
    pub window_size: usize,
    /// Retransmission timeout in simulator time units.
    pub timeout: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            corrupt_rate: 0.0,
            min_latency: 1.0,
            max_latency: 9.0,
            seed: 0,
            window_size: 8,
            timeout: 20.0,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be within [0, 1], got {value}")]
    RateOutOfRange { name: &'static str, value: f64 },
    #[error("latency bounds are invalid: min {min}, max {max}")]
    InvalidLatency { min: f64, max: f64 },
    #[error("window size must be between 1 and 127, got {0}")]
    InvalidWindow(usize),
    #[error("timeout must be positive, got {0}")]
    InvalidTimeout(f64),
}

impl SimConfig {
    /// Check that every parameter is usable by the emulator and protocols.
    ///
    /// The window is capped so that `2 * window_size` sequence numbers fit
    /// in one byte, which keeps the 8-bit checksum exact.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("loss_rate", self.loss_rate),
            ("corrupt_rate", self.corrupt_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::RateOutOfRange { name, value });
            }
        }
        if !(self.min_latency >= 0.0 && self.min_latency <= self.max_latency) {
            return Err(ConfigError::InvalidLatency {
                min: self.min_latency,
                max: self.max_latency,
            });
        }
        if self.window_size == 0 || self.window_size > 127 {
            return Err(ConfigError::InvalidWindow(self.window_size));
        }
        if self.timeout.is_nan() || self.timeout <= 0.0 {
            return Err(ConfigError::InvalidTimeout(self.timeout));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(SimConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_bad_values() {
        let cfg = SimConfig {
            loss_rate: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::RateOutOfRange { name: "loss_rate", .. })
        ));

        let cfg = SimConfig {
            min_latency: 10.0,
            max_latency: 2.0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidLatency { .. })));

        let cfg = SimConfig {
            window_size: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidWindow(0)));

        let cfg = SimConfig {
            timeout: 0.0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidTimeout(0.0)));
    }
}
