//! Top-level driver wiring NetworkCache → LinkIndex → EventFilter →
//! {TrajectoryExporter, HeatmapSampler} into one pipeline run (§5).

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::config::{OutputFormat, PipelineConfig};
use crate::error::Error;
use crate::export::{self, ExportConfig, TrajectorySink};
use crate::filter::{self, event::EventSource, window::SnapshotWindows, FilterConfig, TraversalSink};
use crate::heatmap::{self, HeatmapConfig, HeatmapSink};
use crate::intermediate::{self, IntermediateReader, IntermediateWriter};
use crate::network::cache::{self, NetworkCacheStats};
use crate::network::index::LinkIndex;
use crate::network::source::NetworkSource;
use crate::schema::output;
use crate::schema::{HeatmapCell, TrajectoryPoint};

/// Per-stage reporting rolled up at the end of a [`run`] call.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Network cache hit/miss and row count.
    pub cache_stats: NetworkCacheStats,
    /// Stage 1 outcome counters.
    pub filter_stats: filter::FilterStats,
    /// Stage 2 outcome counters.
    pub export_stats: export::ExportStats,
    /// Stage 3 outcome counters.
    pub heatmap_stats: heatmap::HeatmapStats,
}

/// Run the full pipeline: hydrate the network, filter the event log,
/// expand surviving traversals into trajectories, and sample the heatmap.
///
/// Must be called from within a Tokio runtime.
pub async fn run(
    config: &PipelineConfig,
    network_source: &dyn NetworkSource,
    event_source: &mut dyn EventSource,
) -> Result<PipelineReport, Error> {
    config.validate()?;

    let (rows, cache_stats) =
        cache::load_or_build(network_source, &config.network_path, &config.link_id_field)?;
    let index = LinkIndex::build(rows)?;

    let windows = SnapshotWindows::new(config.windows.clone());
    let filter_cfg = FilterConfig::from(config);
    let intermediate_path = intermediate::intermediate_path(&config.event_log_path);
    let mut intermediate_sink = IntermediateWriter::create(&intermediate_path)?;
    let filter_stats = filter::run(
        event_source,
        &index,
        &windows,
        &filter_cfg,
        &mut intermediate_sink as &mut dyn TraversalSink,
    )
    .await?;

    // Stage 2 reads the intermediate file back one row group at a time:
    // traversals never accumulate unbounded in memory between stage 1 and
    // stage 2 (§5).
    let export_cfg = ExportConfig::from(config);
    let mut trajectory_sink = make_trajectory_sink(config.output_format, &config.trajectory_output_path)?;
    let mut export_stats = export::ExportStats::default();
    for batch in IntermediateReader::open(&intermediate_path)? {
        let batch = batch?;
        let batch_stats = export::run(batch, &index, &export_cfg, trajectory_sink.as_mut()).await?;
        export_stats.traversals_processed += batch_stats.traversals_processed;
        export_stats.points_emitted += batch_stats.points_emitted;
        export_stats.link_unknown_skips += batch_stats.link_unknown_skips;
    }

    // Stage 3 needs every traversal at once: each sampled instant's vehicle
    // count depends on traversals that may land in any row group, so they
    // are read back in full here rather than streamed batch by batch.
    let traversals = intermediate::read_all(&intermediate_path)?;
    let heatmap_cfg = HeatmapConfig::from(config);
    let mut heatmap_sink = make_heatmap_sink(config.output_format, &config.heatmap_output_path)?;
    let heatmap_stats = heatmap::run(traversals, &index, &heatmap_cfg, heatmap_sink.as_mut()).await?;

    Ok(PipelineReport {
        cache_stats,
        filter_stats,
        export_stats,
        heatmap_stats,
    })
}

struct CsvTrajectorySink {
    writer: csv::Writer<File>,
}

impl TrajectorySink for CsvTrajectorySink {
    fn write_batch(&mut self, batch: &[TrajectoryPoint]) -> Result<(), export::SinkError> {
        output::write_trajectory_csv(&mut self.writer, batch).map_err(|e| Box::new(e) as export::SinkError)
    }

    fn finish(&mut self) -> Result<(), export::SinkError> {
        self.writer.flush().map_err(|e| Box::new(e) as export::SinkError)
    }
}

struct GeoJsonTrajectorySink {
    points: Vec<TrajectoryPoint>,
    path: PathBuf,
}

impl TrajectorySink for GeoJsonTrajectorySink {
    fn write_batch(&mut self, batch: &[TrajectoryPoint]) -> Result<(), export::SinkError> {
        self.points.extend_from_slice(batch);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), export::SinkError> {
        let collection = output::trajectory_feature_collection(&self.points);
        let geojson = geojson::GeoJson::from(collection);
        std::fs::write(&self.path, geojson.to_string()).map_err(|e| Box::new(e) as export::SinkError)
    }
}

struct CsvHeatmapSink {
    writer: csv::Writer<File>,
}

impl HeatmapSink for CsvHeatmapSink {
    fn write_batch(&mut self, batch: &[HeatmapCell]) -> Result<(), heatmap::SinkError> {
        output::write_heatmap_csv(&mut self.writer, batch).map_err(|e| Box::new(e) as heatmap::SinkError)
    }

    fn finish(&mut self) -> Result<(), heatmap::SinkError> {
        self.writer.flush().map_err(|e| Box::new(e) as heatmap::SinkError)
    }
}

struct GeoJsonHeatmapSink {
    cells: Vec<HeatmapCell>,
    path: PathBuf,
}

impl HeatmapSink for GeoJsonHeatmapSink {
    fn write_batch(&mut self, batch: &[HeatmapCell]) -> Result<(), heatmap::SinkError> {
        self.cells.extend_from_slice(batch);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), heatmap::SinkError> {
        let collection = output::heatmap_feature_collection(&self.cells);
        let geojson = geojson::GeoJson::from(collection);
        std::fs::write(&self.path, geojson.to_string()).map_err(|e| Box::new(e) as heatmap::SinkError)
    }
}

fn make_trajectory_sink(
    format: OutputFormat,
    path: &Path,
) -> Result<Box<dyn TrajectorySink>, Error> {
    Ok(match format {
        OutputFormat::Csv => Box::new(CsvTrajectorySink {
            writer: csv::Writer::from_path(path).map_err(|e| output::Error::Csv(e))?,
        }),
        OutputFormat::GeoJson => Box::new(GeoJsonTrajectorySink {
            points: Vec::new(),
            path: path.to_path_buf(),
        }),
    })
}

fn make_heatmap_sink(format: OutputFormat, path: &Path) -> Result<Box<dyn HeatmapSink>, Error> {
    Ok(match format {
        OutputFormat::Csv => Box::new(CsvHeatmapSink {
            writer: csv::Writer::from_path(path).map_err(|e| output::Error::Csv(e))?,
        }),
        OutputFormat::GeoJson => Box::new(GeoJsonHeatmapSink {
            cells: Vec::new(),
            path: path.to_path_buf(),
        }),
    })
}
