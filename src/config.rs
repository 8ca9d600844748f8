use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;

/// Configuration for the tracing core and its CLI harness.
///
/// Loaded from an optional TOML file, then CLI/env overrides, then
/// validation.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Master switch. When `false`, the pipeline exits without reading any
    /// input.
    #[serde(default)]
    pub mongodb_tracing_enabled: bool,

    pub log_level: Option<String>,

    /// Period between Parser+Stitcher passes over a connection's buffered
    /// bytes, in milliseconds.
    #[serde(default = "default_transfer_cycle_ms")]
    pub transfer_cycle_ms: u64,

    /// Period between pushes of accumulated records downstream, in
    /// milliseconds.
    #[serde(default = "default_push_cycle_ms")]
    pub push_cycle_ms: u64,

    /// Bounded-memory cap on pending (unconsumed) requests per
    /// connection-direction. Exceeding it drops the oldest requests and
    /// counts them as errors.
    #[serde(default = "default_max_pending_requests")]
    pub max_pending_requests: usize,

    /// Offset added to a captured `timestamp_ns` when projecting
    /// `OutputRow::time_`, to translate monotonic capture clocks to
    /// wall-clock time.
    #[serde(default)]
    pub clock_offset_ns: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mongodb_tracing_enabled: false,
            log_level: None,
            transfer_cycle_ms: default_transfer_cycle_ms(),
            push_cycle_ms: default_push_cycle_ms(),
            max_pending_requests: default_max_pending_requests(),
            clock_offset_ns: 0,
        }
    }
}

fn default_transfer_cycle_ms() -> u64 {
    100
}

fn default_push_cycle_ms() -> u64 {
    1000
}

fn default_max_pending_requests() -> usize {
    1024
}

impl Config {
    /// Load configuration from a TOML file. If `path_opt` is None or the file is
    /// missing/unreadable, returns defaults. Parsing errors are returned.
    pub fn load_from_file(path_opt: Option<&str>) -> Result<Self> {
        let path = path_opt.unwrap_or("mongotrace.toml");
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(cfg) => Ok(cfg),
                Err(e) => Err(Error::Msg(format!("Failed to parse {}: {}", path, e))),
            },
            Err(_e) => Ok(Self::default()),
        }
    }

    /// Apply CLI/env overrides (highest precedence) to an existing config.
    pub fn with_overrides(
        mut self,
        tracing_enabled: Option<bool>,
        log_level: Option<String>,
        max_pending_requests: Option<usize>,
    ) -> Self {
        if let Some(v) = tracing_enabled {
            self.mongodb_tracing_enabled = v;
        }
        if let Some(ll) = log_level {
            self.log_level = Some(ll);
        }
        if let Some(v) = max_pending_requests {
            self.max_pending_requests = v;
        }
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.transfer_cycle_ms == 0 {
            return Err(Error::Msg("transfer_cycle_ms cannot be zero".to_string()));
        }
        if self.push_cycle_ms == 0 {
            return Err(Error::Msg("push_cycle_ms cannot be zero".to_string()));
        }
        if self.max_pending_requests == 0 {
            return Err(Error::Msg(
                "max_pending_requests cannot be zero".to_string(),
            ));
        }
        Ok(())
    }
}
