// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Highest channel index usable by registrations. 254 and 255 are sentinels.
pub const MAX_CHANNEL_INDEX: u8 = 253;

pub const ENV_SHM_PATH: &str = "LABWIRED_COSIM_SHM";
pub const ENV_SYNC: &str = "LABWIRED_COSIM_SYNC";
pub const ENV_SIGNAL: &str = "LABWIRED_COSIM_SIGNAL";
pub const ENV_TIMEOUT_MS: &str = "LABWIRED_COSIM_TIMEOUT_MS";
pub const ENV_LOG: &str = "LABWIRED_COSIM_LOG";

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    "1.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_shm_path() -> PathBuf {
    std::env::temp_dir().join("labwired-cosim.shm")
}

fn default_signal() -> i32 {
    libc::SIGUSR1
}

fn default_signal_timeout_ms() -> u64 {
    1000
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("channel index {0} is reserved (maximum is 253)")]
    ReservedIndex(u8),
    #[error("channel index {0} is declared more than once")]
    DuplicateIndex(u8),
    #[error("channel {index}: {reason}")]
    InvalidChannel { index: u8, reason: String },
}

/// Synchronization strategy used while waiting on the shared segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[serde(alias = "busy-wait", alias = "spin")]
    Busy,
    #[default]
    Signal,
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "busy" | "busy-wait" | "spin" => Ok(Self::Busy),
            "signal" => Ok(Self::Signal),
            _ => Err(format!(
                "unsupported sync mode '{}'; supported: busy, signal",
                value
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" | "0" => Ok(Self::Error),
            "warn" | "warning" | "1" => Ok(Self::Warn),
            "info" | "2" => Ok(Self::Info),
            "debug" | "3" => Ok(Self::Debug),
            "trace" | "4" => Ok(Self::Trace),
            _ => Err(format!(
                "unsupported log level '{}'; supported: error, warn, info, debug, trace",
                value
            )),
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// A driver-side memory region exposed to the simulator at `base`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RegionDecl {
    pub base: u64,
    pub size: String, // e.g. "4KB"
    #[serde(default)]
    pub data: Vec<u8>,
}

/// Channel declaration as written in the manifest.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChannelDecl {
    Port {
        index: u8,
        bitsize: u16,
        #[serde(default)]
        value: Vec<u8>,
    },
    Pointer {
        index: u8,
        address: u64,
    },
    Array {
        index: u8,
        bitsize: u16,
        align: u16,
        /// Element count. Falls back to the parameter size table when absent.
        #[serde(default)]
        count: Option<u32>,
        /// Elements reachable by shifted accesses. Defaults to `count`.
        #[serde(default)]
        window: Option<u32>,
        #[serde(default)]
        data: Vec<u8>,
    },
    Fifo {
        index: u8,
        bitsize: u16,
        align: u16,
        #[serde(default)]
        count: Option<u32>,
        #[serde(default)]
        window: Option<u32>,
        #[serde(default)]
        data: Vec<u8>,
    },
    Memory {
        index: u8,
        #[serde(default)]
        regions: Vec<RegionDecl>,
    },
}

impl ChannelDecl {
    pub fn index(&self) -> u8 {
        match self {
            ChannelDecl::Port { index, .. }
            | ChannelDecl::Pointer { index, .. }
            | ChannelDecl::Array { index, .. }
            | ChannelDecl::Fifo { index, .. }
            | ChannelDecl::Memory { index, .. } => *index,
        }
    }

    fn validate(&self, params: &BTreeMap<u8, u64>) -> Result<(), ConfigError> {
        let index = self.index();
        if index > MAX_CHANNEL_INDEX {
            return Err(ConfigError::ReservedIndex(index));
        }
        let invalid = |reason: &str| ConfigError::InvalidChannel {
            index,
            reason: reason.to_string(),
        };
        match self {
            ChannelDecl::Port { bitsize, .. } if *bitsize == 0 => Err(invalid("bitsize is zero")),
            ChannelDecl::Array {
                bitsize,
                align,
                count,
                ..
            }
            | ChannelDecl::Fifo {
                bitsize,
                align,
                count,
                ..
            } => {
                if *bitsize == 0 {
                    return Err(invalid("bitsize is zero"));
                }
                if *align == 0 {
                    return Err(invalid("alignment is zero"));
                }
                if u32::from(*bitsize) > u32::from(*align) * 8 {
                    return Err(invalid("bitsize exceeds the element alignment"));
                }
                if count.is_none() && !params.contains_key(&index) {
                    return Err(invalid(
                        "no element count and no parameter size to derive it from",
                    ));
                }
                let window = match self {
                    ChannelDecl::Array { window, .. } | ChannelDecl::Fifo { window, .. } => *window,
                    _ => None,
                };
                if let (Some(w), Some(c)) = (window, count) {
                    if w > *c {
                        return Err(invalid("window is larger than the element count"));
                    }
                }
                Ok(())
            }
            ChannelDecl::Memory { regions, .. } => {
                for region in regions {
                    let size = parse_size(&region.size).map_err(|e| invalid(&e.to_string()))?;
                    if region.data.len() as u64 > size {
                        return Err(invalid(&format!(
                            "region {:#x} holds {} bytes of data but is only {} bytes long",
                            region.base,
                            region.data.len(),
                            size
                        )));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Bridge configuration shared by both entities.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CosimConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// Backing file used by both processes to rendezvous.
    #[serde(default = "default_shm_path")]
    pub shm_path: PathBuf,
    #[serde(default)]
    pub sync: SyncMode,
    /// Signal number used by the signal backend.
    #[serde(default = "default_signal")]
    pub signal: i32,
    /// Re-check interval for the signal backend wait.
    #[serde(default = "default_signal_timeout_ms")]
    pub signal_timeout_ms: u64,
    /// Reject commits that do not start from LOCKED.
    #[serde(default = "default_true")]
    pub checked_transitions: bool,
    /// Wait for the peer to attach during initialization.
    #[serde(default = "default_true")]
    pub rendezvous: bool,
    #[serde(default)]
    pub log_level: LogLevel,
    /// Parameter sizes in bytes, keyed by parameter index.
    #[serde(default)]
    pub params: BTreeMap<u8, u64>,
    #[serde(default)]
    pub channels: Vec<ChannelDecl>,
}

impl Default for CosimConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            shm_path: default_shm_path(),
            sync: SyncMode::default(),
            signal: default_signal(),
            signal_timeout_ms: default_signal_timeout_ms(),
            checked_transitions: true,
            rendezvous: true,
            log_level: LogLevel::default(),
            params: BTreeMap::new(),
            channels: Vec::new(),
        }
    }
}

impl CosimConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open co-simulation config at {:?}", path.as_ref()))?;
        let cfg: Self =
            serde_yaml::from_reader(f).context("Failed to parse co-simulation config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let cfg: Self =
            serde_yaml::from_str(yaml).context("Failed to parse co-simulation config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }
        if self.signal <= 0 || self.signal > libc::SIGRTMAX() {
            anyhow::bail!("Signal number {} is out of range", self.signal);
        }
        if self.signal_timeout_ms == 0 {
            anyhow::bail!("'signal_timeout_ms' must be greater than zero");
        }
        let mut seen = HashSet::new();
        for decl in &self.channels {
            if !seen.insert(decl.index()) {
                return Err(ConfigError::DuplicateIndex(decl.index()).into());
            }
            decl.validate(&self.params)?;
        }
        Ok(())
    }

    /// Apply `LABWIRED_COSIM_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let invalid = |key: &str, value: &str, reason: String| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason,
        };

        if let Some(path) = lookup(ENV_SHM_PATH) {
            if path.trim().is_empty() {
                return Err(invalid(ENV_SHM_PATH, &path, "path is empty".into()).into());
            }
            self.shm_path = PathBuf::from(path);
        }
        if let Some(v) = lookup(ENV_SYNC) {
            self.sync = v.parse().map_err(|e| invalid(ENV_SYNC, &v, e))?;
        }
        if let Some(v) = lookup(ENV_SIGNAL) {
            self.signal = v
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| invalid(ENV_SIGNAL, &v, e.to_string()))?;
        }
        if let Some(v) = lookup(ENV_TIMEOUT_MS) {
            self.signal_timeout_ms = v
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| invalid(ENV_TIMEOUT_MS, &v, e.to_string()))?;
        }
        if let Some(v) = lookup(ENV_LOG) {
            self.log_level = v.parse().map_err(|e| invalid(ENV_LOG, &v, e))?;
        }
        self.validate()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScriptOp {
    Read,
    Write,
    Pop,
    Push,
    Info,
    Exit,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedOutcome {
    #[default]
    Ok,
    Empty,
    Full,
    Error,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportTarget {
    Read,
    Write,
}

/// One simulator-side interface operation replayed by the CLI.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScriptStep {
    pub op: ScriptOp,
    pub index: u8,
    #[serde(default)]
    pub address: u64,
    /// Defaults to `8 * data.len()` for writes and 64 for reads.
    #[serde(default)]
    pub bitsize: Option<u16>,
    #[serde(default)]
    pub data: Vec<u8>,
    #[serde(default)]
    pub query: Option<ReportTarget>,
    #[serde(default)]
    pub expect: ExpectedOutcome,
    #[serde(default)]
    pub expect_remaining: Option<u32>,
    #[serde(default)]
    pub expect_data: Option<Vec<u8>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SimScript {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default)]
    pub steps: Vec<ScriptStep>,
    /// Return value announced with END when every step matches.
    #[serde(default)]
    pub retval: u8,
}

impl SimScript {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open simulator script at {:?}", path.as_ref()))?;
        let script: Self =
            serde_yaml::from_reader(f).context("Failed to parse simulator script YAML")?;
        script.validate()?;
        Ok(script)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.index > MAX_CHANNEL_INDEX {
                anyhow::bail!("Step {}: {}", i, ConfigError::ReservedIndex(step.index));
            }
            if step.op == ScriptOp::Info && step.query.is_none() {
                anyhow::bail!("Step {}: 'info' requires a 'query' (read or write)", i);
            }
            if step.data.len() > 512 {
                anyhow::bail!("Step {}: data exceeds the 512-byte payload buffer", i);
            }
        }
        Ok(())
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = CosimConfig::default();
        assert_eq!(cfg.sync, SyncMode::Signal);
        assert_eq!(cfg.signal, libc::SIGUSR1);
        assert_eq!(cfg.signal_timeout_ms, 1000);
        assert!(cfg.checked_transitions);
        assert!(cfg.shm_path.ends_with("labwired-cosim.shm"));
        cfg.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_SHM_PATH, "/tmp/other.shm"),
            (ENV_SYNC, "busy"),
            (ENV_TIMEOUT_MS, "25"),
            (ENV_LOG, "debug"),
        ]
        .into_iter()
        .collect();

        let mut cfg = CosimConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.shm_path, PathBuf::from("/tmp/other.shm"));
        assert_eq!(cfg.sync, SyncMode::Busy);
        assert_eq!(cfg.signal_timeout_ms, 25);
        assert_eq!(cfg.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut cfg = CosimConfig::default();
        let err = cfg
            .apply_overrides(|k| (k == ENV_SYNC).then(|| "futex".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_SYNC));
    }

    #[test]
    fn test_reserved_channel_index() {
        let yaml = r#"
channels:
  - kind: port
    index: 254
    bitsize: 32
"#;
        let err = CosimConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_fifo_count_from_params() {
        let yaml = r#"
params:
  3: 16
channels:
  - kind: fifo
    index: 3
    bitsize: 32
    align: 4
"#;
        let cfg = CosimConfig::from_yaml(yaml).unwrap();
        assert_eq!(cfg.channels.len(), 1);
        assert_eq!(cfg.params.get(&3), Some(&16));
    }

    #[test]
    fn test_fifo_without_count_is_rejected() {
        let yaml = r#"
channels:
  - kind: fifo
    index: 3
    bitsize: 32
    align: 4
"#;
        assert!(CosimConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_region_data_longer_than_size_is_rejected() {
        let yaml = r#"
channels:
  - kind: memory
    index: 2
    regions:
      - { base: 0x1000, size: "2B", data: [1, 2, 3] }
"#;
        let err = CosimConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("only 2 bytes long"), "{}", err);

        let fits = yaml.replace("[1, 2, 3]", "[1, 2]");
        CosimConfig::from_yaml(&fits).unwrap();
    }

    #[test]
    fn test_array_window_cannot_exceed_count() {
        let yaml = r#"
channels:
  - { kind: array, index: 1, bitsize: 8, align: 1, count: 2, window: 3 }
"#;
        let err = CosimConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("window"));
    }

    #[test]
    fn test_script_info_requires_query() {
        let yaml = r#"
steps:
  - op: info
    index: 1
"#;
        let script: SimScript = serde_yaml::from_str(yaml).unwrap();
        assert!(script.validate().is_err());
    }

    #[test]
    fn test_parse_size() {
        assert!(parse_size("4KB").unwrap() >= 4000);
        assert!(parse_size("lots").is_err());
    }
}
