//! Index tunables and the `key=value` parameter string accepted at open.
//!
//! ```text
//! metric=cosine, low_watermark=16, high_watermark=256, probe_count=8
//! ```
//!
//! Pairs may be separated by commas, semicolons, or whitespace. Unknown keys
//! are ignored so older engines accept newer parameter strings.

use crate::metric::Metric;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing or validating [`IndexParams`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("Malformed parameter '{0}': expected key=value")]
    Malformed(String),

    #[error("Invalid value '{value}' for parameter '{key}'")]
    InvalidValue { key: String, value: String },

    #[error("Invalid parameters: {0}")]
    Inconsistent(String),
}

/// Tunables for a single index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexParams {
    /// Distance metric. `None` means "keep the stored metric, or L2 for a new index".
    pub metric: Option<Metric>,

    /// Partitions smaller than this are merged on the idle tick (0 disables merging).
    pub low_watermark: usize,

    /// Partitions larger than this are split synchronously after insert.
    pub high_watermark: usize,

    /// Number of partitions scanned per query.
    pub probe_count: usize,

    /// Create the index directory when it does not exist.
    pub create: bool,

    /// Number of partitions seeded from the first distinct vectors.
    pub seed_partitions: usize,

    /// Lloyd iterations in the 2-means used by split.
    pub split_iterations: usize,

    /// Extra save attempts after a transient I/O failure.
    pub save_retries: u32,

    /// Base backoff between save attempts, doubled each retry.
    pub retry_backoff_ms: u64,

    /// Period of the background idle rebalance tick. 0 disables the thread.
    pub idle_rebalance_ms: u64,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            metric: None,
            low_watermark: 16,
            high_watermark: 256,
            probe_count: 8,
            create: true,
            seed_partitions: 1,
            split_iterations: 10,
            save_retries: 3,
            retry_backoff_ms: 10,
            idle_rebalance_ms: 0,
        }
    }
}

impl IndexParams {
    /// Parse a parameter string on top of the defaults.
    pub fn parse(params: &str) -> Result<Self, ParamError> {
        let mut out = Self::default();

        for pair in params
            .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
            .filter(|s| !s.is_empty())
        {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| ParamError::Malformed(pair.to_string()))?;
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "metric" => {
                    out.metric = Some(value.parse().map_err(|_| invalid(&key, value))?)
                }
                "low_watermark" => out.low_watermark = parse_num(&key, value)?,
                "high_watermark" => out.high_watermark = parse_num(&key, value)?,
                "probe_count" | "nprobe" => out.probe_count = parse_num(&key, value)?,
                "create" => out.create = parse_bool(&key, value)?,
                "seed_partitions" => out.seed_partitions = parse_num(&key, value)?,
                "split_iterations" => out.split_iterations = parse_num(&key, value)?,
                "save_retries" => out.save_retries = parse_num(&key, value)?,
                "retry_backoff_ms" => out.retry_backoff_ms = parse_num(&key, value)?,
                "idle_rebalance_ms" => out.idle_rebalance_ms = parse_num(&key, value)?,
                _ => tracing::debug!(key = %key, "ignoring unrecognized index parameter"),
            }
        }

        out.validate()?;
        Ok(out)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ParamError> {
        if self.high_watermark == 0 {
            return Err(ParamError::Inconsistent("high_watermark must be >= 1".into()));
        }
        if self.low_watermark > 0 && self.high_watermark < 2 * self.low_watermark {
            return Err(ParamError::Inconsistent(format!(
                "high_watermark ({}) must be at least twice low_watermark ({})",
                self.high_watermark, self.low_watermark
            )));
        }
        if self.probe_count == 0 {
            return Err(ParamError::Inconsistent("probe_count must be >= 1".into()));
        }
        if self.seed_partitions == 0 {
            return Err(ParamError::Inconsistent("seed_partitions must be >= 1".into()));
        }
        Ok(())
    }

    /// The metric to use for a new index.
    pub fn metric_or_default(&self) -> Metric {
        self.metric.unwrap_or_default()
    }
}

fn invalid(key: &str, value: &str) -> ParamError {
    ParamError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ParamError> {
    value.parse().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ParamError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}
