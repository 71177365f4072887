//! Top-level error aggregation. Each stage keeps its own narrow error
//! enum (§7's taxonomy split by fatal vs. per-record); this type lets the
//! pipeline driver and CLI propagate any of them with `?` without the
//! caller needing to know which stage failed.

use thiserror::Error;

/// Any fatal error surfaced by [`crate::pipeline::run`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Configuration was invalid (§7 `ConfigInvalid`).
    #[error(transparent)]
    Config(#[from] crate::config::Error),
    /// The road-network source could not be read (§7 `SourceMissing`).
    #[error(transparent)]
    NetworkSource(#[from] crate::network::source::Error),
    /// The network cache was missing, stale, or corrupt (§7 `CacheMissing`/`CacheCorrupt`).
    #[error(transparent)]
    NetworkCache(#[from] crate::network::cache::Error),
    /// The road graph could not be built from the hydrated network rows.
    #[error(transparent)]
    LinkIndex(#[from] crate::network::index::Error),
    /// The intermediate traversal file could not be written or read back.
    #[error(transparent)]
    Intermediate(#[from] crate::intermediate::Error),
    /// Stage 1 (EventFilter) failed fatally.
    #[error(transparent)]
    Filter(#[from] crate::filter::Error),
    /// Stage 2 (TrajectoryExporter) failed fatally.
    #[error(transparent)]
    Export(#[from] crate::export::Error),
    /// Stage 3 (HeatmapSampler) failed fatally.
    #[error(transparent)]
    Heatmap(#[from] crate::heatmap::Error),
    /// An output sink failed to write or flush.
    #[error(transparent)]
    Output(#[from] crate::schema::output::Error),
}
