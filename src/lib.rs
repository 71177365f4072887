//! Streaming post-processor that turns traffic-simulation event logs into
//! interpolated trajectories and per-link heatmaps.
//!
//! The pipeline runs in three stages: [`filter`] pairs and window-filters
//! raw Enter/LeaveLink events into compact [`schema::Traversal`] rows;
//! [`export`] expands each surviving traversal into a dense series of
//! [`schema::TrajectoryPoint`]s; [`heatmap`] samples the same traversal set
//! at fixed clock instants into [`schema::HeatmapCell`]s. [`network`]
//! hydrates and caches the road graph both stages consult; [`pipeline`]
//! wires the stages together end to end.
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use flowcast::config::load_pipeline_config;
//!
//! let config = load_pipeline_config("pipeline.toml")?;
//! // `network_source` and `event_source` come from `flowcast-sources`.
//! # let network_source: &dyn flowcast::network::source::NetworkSource = unimplemented!();
//! # let mut event_source: Box<dyn flowcast::filter::event::EventSource> = unimplemented!();
//! let report = flowcast::pipeline::run(&config, network_source, event_source.as_mut()).await?;
//! println!("{:?}", report.filter_stats);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod export;
pub mod filter;
pub mod geometry;
pub mod heatmap;
pub mod intermediate;
pub mod network;
pub mod pipeline;
pub mod schema;

pub use error::Error;
