//! YAML Configuration for the Baseband Unit
//!
//! The file carries the station configuration verbatim under `station:`,
//! plus transport endpoints and logging options that belong to the binary
//! rather than the core.

use layers::StationConfig;
use serde::Deserialize;

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_base_port() -> u16 {
    8200
}

fn default_remote_addr() -> String {
    "127.0.0.1:8100".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

/// Top-level configuration file structure.
#[derive(Debug, Deserialize)]
pub struct BbuConfig {
    /// The immutable station configuration handed to the core.
    pub station: StationConfig,
    /// Sample transport endpoints.
    #[serde(default)]
    pub net: NetConfig,
    /// Logging configuration.
    #[serde(default)]
    pub log: LogConfig,
}

/// Sample transport endpoints.
#[derive(Debug, Deserialize)]
pub struct NetConfig {
    /// Local RX bind address; socket thread i listens on `base_port + i`.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// Radio front-end address TX packets are sent to.
    #[serde(default = "default_remote_addr")]
    pub remote_addr: String,
    /// Directory for the optional shutdown dumps.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            base_port: default_base_port(),
            remote_addr: default_remote_addr(),
            data_dir: default_data_dir(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl BbuConfig {
    pub fn from_yaml_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: BbuConfig = serde_yaml::from_str(&contents)?;
        config.station.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
station:
  bs_ant_num: 8
  ue_ant_num: 2
  ofdm_data_num: 304
  ofdm_ca_num: 512
  samps_per_symbol: 640
  frame: "PPUUDD"
  num_blocks_in_symbol: 1
  num_bytes_per_cb: 64
  worker_thread_num: 6
  socket_thread_num: 2
  frames_to_test: 500
net:
  base_port: 9200
log:
  level: debug
"#;
        let cfg: BbuConfig = serde_yaml::from_str(yaml).unwrap();
        cfg.station.validate().unwrap();
        assert_eq!(cfg.station.bs_ant_num, 8);
        assert_eq!(cfg.net.base_port, 9200);
        assert_eq!(cfg.net.bind_addr, "0.0.0.0");
        assert_eq!(cfg.log.level, "debug");
    }

    #[test]
    fn test_defaults() {
        let yaml = r#"
station:
  bs_ant_num: 4
  ue_ant_num: 2
  ofdm_data_num: 48
  ofdm_ca_num: 64
  samps_per_symbol: 80
  frame: "PPUU"
  num_blocks_in_symbol: 1
  num_bytes_per_cb: 8
  worker_thread_num: 2
  socket_thread_num: 1
"#;
        let cfg: BbuConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.net.remote_addr, "127.0.0.1:8100");
        assert_eq!(cfg.log.level, "info");
    }
}
