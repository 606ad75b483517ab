//! Handle configuration (§6 "External interfaces"): the values a
//! caller supplies to open an RTU or TCP endpoint.
//!
//! Grounded on the `serde`-derived config structs in
//! `voltage-protocols/src/modbus/types.rs` (`ModbusPollingConfig` and
//! friends) — this crate only needs the per-connection parameters,
//! not the polling/batch layer above them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transport::{ErrorPolicy, DEFAULT_TCP_PORT};

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_parity() -> String {
    "none".to_string()
}

/// RTU serial line configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtuConfig {
    /// Serial device path, e.g. `/dev/ttyUSB0`.
    pub device: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// One of `"none"`, `"even"`, `"odd"`.
    #[serde(default = "default_parity")]
    pub parity: String,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl RtuConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn parity(&self) -> tokio_serial::Parity {
        match self.parity.as_str() {
            "even" => tokio_serial::Parity::Even,
            "odd" => tokio_serial::Parity::Odd,
            _ => tokio_serial::Parity::None,
        }
    }

    pub fn data_bits(&self) -> tokio_serial::DataBits {
        match self.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        }
    }

    pub fn stop_bits(&self) -> tokio_serial::StopBits {
        match self.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        }
    }
}

/// TCP/MBAP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    pub host: String,
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// `"reconnect-on-error"` (default) or `"nop-on-error"`.
    #[serde(default)]
    pub error_policy: ErrorPolicyConfig,
}

impl TcpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Serde-friendly mirror of [`ErrorPolicy`]; kept distinct so the wire
/// config format doesn't have to track the enum's internal layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicyConfig {
    #[default]
    ReconnectOnError,
    NopOnError,
}

impl From<ErrorPolicyConfig> for ErrorPolicy {
    fn from(value: ErrorPolicyConfig) -> Self {
        match value {
            ErrorPolicyConfig::ReconnectOnError => ErrorPolicy::ReconnectOnError,
            ErrorPolicyConfig::NopOnError => ErrorPolicy::NopOnError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtu_config_default_helpers_match_spec_defaults() {
        assert_eq!(default_baud_rate(), 9600);
        assert_eq!(default_data_bits(), 8);
        assert_eq!(default_stop_bits(), 1);
        assert_eq!(default_parity(), "none");
    }

    #[test]
    fn tcp_config_defaults_to_port_502() {
        let config = TcpConfig {
            host: "10.0.0.5".to_string(),
            port: default_tcp_port(),
            connect_timeout_ms: default_timeout_ms(),
            error_policy: ErrorPolicyConfig::default(),
        };
        assert_eq!(config.port, 502);
        assert_eq!(ErrorPolicy::from(config.error_policy), ErrorPolicy::ReconnectOnError);
    }
}
