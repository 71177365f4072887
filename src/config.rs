//! In-process pipeline configuration.
//!
//! spec.md places YAML parsing and the CLI/GUI front-end out of scope; this
//! module is the data model that front-end is expected to produce. It is
//! still loadable directly from TOML (mirrors the teacher's
//! [`Pipeline`](https://github.com/metno/rove) deserialization in
//! `pipeline.rs`) for standalone and test use.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::filter::window::SnapshotWindow;

/// Errors loading a [`PipelineConfig`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Generic IO error reading the config file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML deserialize error.
    #[error("failed to deserialize toml: {0}")]
    TomlDeserialize(#[from] toml::de::Error),
    /// Windows were not in non-decreasing start order, or a window had `start > end`.
    #[error("invalid snapshot window at index {index}: {reason}")]
    InvalidWindow { index: usize, reason: &'static str },
}

/// Output record format for trajectory/heatmap sinks.
#[derive(Debug, Deserialize, PartialEq, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// `x,y,timestamp,angle,person_id,interval_id` CSV.
    #[default]
    Csv,
    /// GeoJSON `FeatureCollection` of Point features.
    GeoJson,
}

/// Full configuration for one pipeline run.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct PipelineConfig {
    /// Path to the authoritative road-network source (GeoJSON or CSV+WKT).
    pub network_path: PathBuf,
    /// Name of the link-id field/property in the network source.
    #[serde(default = "default_id_field")]
    pub link_id_field: String,
    /// Path to the raw event log (MATSim-style XML events).
    pub event_log_path: PathBuf,
    /// Configured snapshot windows, in the order the first-match-wins rule applies.
    #[serde(rename = "window")]
    pub windows: Vec<SnapshotWindow>,
    /// Approximate number of events per reader chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Number of worker tasks; defaults to available parallelism.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Bounded channel capacity between reader and workers; defaults to `4 * worker_count`.
    pub queue_capacity: Option<usize>,
    /// Stride, in seconds, between emitted trajectory points. `1` is the
    /// spec-mandated default; see SPEC_FULL.md "Alternate sample stride".
    #[serde(default = "default_sample_stride")]
    pub sample_stride_seconds: u32,
    /// Sampling interval, in seconds, for the heatmap stage.
    pub heatmap_interval_seconds: i64,
    /// Optional explicit heatmap time range; derived from the traversal set if absent.
    pub heatmap_range: Option<(i64, i64)>,
    /// Output format for both trajectory and heatmap sinks.
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Path the trajectory output is written to.
    pub trajectory_output_path: PathBuf,
    /// Path the heatmap output is written to.
    pub heatmap_output_path: PathBuf,
}

fn default_id_field() -> String {
    "linkId".to_string()
}

fn default_chunk_size() -> usize {
    100_000
}

fn default_worker_count() -> usize {
    num_cpus::get().max(1)
}

fn default_sample_stride() -> u32 {
    1
}

impl PipelineConfig {
    /// Effective bounded-queue capacity between reader and workers (§5: `4·N` default).
    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(4 * self.worker_count.max(1))
    }

    /// Validate window ordering/shape invariants that deserialization alone can't express.
    pub fn validate(&self) -> Result<(), Error> {
        for (index, window) in self.windows.iter().enumerate() {
            if window.start > window.end {
                return Err(Error::InvalidWindow {
                    index,
                    reason: "start is after end",
                });
            }
        }
        Ok(())
    }
}

/// Load and validate a [`PipelineConfig`] from a TOML file.
pub fn load_pipeline_config(path: impl AsRef<Path>) -> Result<PipelineConfig, Error> {
    let text = std::fs::read_to_string(path)?;
    let config: PipelineConfig = toml::from_str(&text)?;
    config.validate()?;
    Ok(config)
}
