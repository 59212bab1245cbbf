use std::{net::SocketAddr, ops::RangeInclusive, path::PathBuf, time::Duration};

use clap::Parser;

use crate::{
    DEFAULT_BAUD_RATE,
    bus::{MAX_SERVO_ID, MIN_SERVO_ID, SweepPolicy},
};

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("probe range {first}..={last} must lie within 1..=252")]
    ProbeRange { first: u8, last: u8 },
    #[error("baud rate must be positive")]
    BaudRate,
}

/// Servo bus manager: scan ports, enumerate, re-address and sweep servos
/// over HTTP.
#[derive(Debug, Clone, Parser)]
#[command(name = "bus_manager", version)]
pub struct ServiceConfig {
    /// Address the HTTP server listens on.
    #[arg(long, default_value = "127.0.0.1:5000", env = "SERVO_BIND")]
    pub bind: SocketAddr,

    /// Baud rate set on every connected port.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE, env = "SERVO_BAUD_RATE")]
    pub baud_rate: u32,

    /// Serial read timeout in milliseconds.
    #[arg(long, default_value_t = 1000, env = "SERVO_TIMEOUT_MS")]
    pub timeout_ms: u64,

    /// First id probed by enumeration.
    #[arg(long, default_value_t = 1, env = "SERVO_PROBE_FIRST")]
    pub probe_first: u8,

    /// Last id probed by enumeration.
    #[arg(long, default_value_t = 9, env = "SERVO_PROBE_LAST")]
    pub probe_last: u8,

    /// Pause after every sweep step, in milliseconds.
    #[arg(long, default_value_t = 2000, env = "SERVO_SWEEP_PAUSE_MS")]
    pub sweep_pause_ms: u64,

    /// Whether failed sweep steps fail the request.
    #[arg(long, value_enum, default_value_t = SweepPolicy::Ignore, env = "SERVO_SWEEP_POLICY")]
    pub sweep_policy: SweepPolicy,

    /// Append-only log file.
    #[arg(long, default_value = "app.log", env = "SERVO_LOG_FILE")]
    pub log_file: PathBuf,
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.probe_first < MIN_SERVO_ID
            || self.probe_last > MAX_SERVO_ID
            || self.probe_first > self.probe_last
        {
            return Err(ConfigError::ProbeRange {
                first: self.probe_first,
                last: self.probe_last,
            });
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::BaudRate);
        }
        Ok(())
    }

    pub fn probe_ids(&self) -> RangeInclusive<u8> {
        self.probe_first..=self.probe_last
    }

    pub fn sweep_pause(&self) -> Duration {
        Duration::from_millis(self.sweep_pause_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5000)),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: 1000,
            probe_first: 1,
            probe_last: 9,
            sweep_pause_ms: 2000,
            sweep_policy: SweepPolicy::Ignore,
            log_file: PathBuf::from("app.log"),
        }
    }
}
