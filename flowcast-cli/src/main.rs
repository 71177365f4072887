//! Command-line driver: load a `PipelineConfig` from TOML, pick the right
//! network/event connectors by file extension, and run the pipeline.

use std::path::PathBuf;

use clap::Parser;
use flowcast::config::load_pipeline_config;
use flowcast::network::source::NetworkSource;
use flowcast_sources::network_csv_wkt::CsvWktNetworkSource;
use flowcast_sources::network_geojson::GeoJsonNetworkSource;
use flowcast_sources::events_xml::XmlEventSource;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the pipeline's TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,
    /// Maximum tracing verbosity.
    #[arg(short = 'l', long, default_value_t = Level::INFO)]
    max_trace_level: Level,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.max_trace_level)
        .init();

    let config = load_pipeline_config(&args.config)?;

    let network_source = network_source_for(&config.network_path)?;
    let mut event_source = XmlEventSource::open(&config.event_log_path)?;

    let report = flowcast::pipeline::run(&config, network_source.as_ref(), &mut event_source).await?;

    tracing::info!(
        cache_hit = report.cache_stats.cache_hit,
        rows = report.cache_stats.row_count,
        traversals = report.filter_stats.traversals_emitted,
        trajectory_points = report.export_stats.points_emitted,
        heatmap_cells = report.heatmap_stats.cells_emitted,
        "pipeline run complete"
    );

    Ok(())
}

fn network_source_for(path: &std::path::Path) -> anyhow::Result<Box<dyn NetworkSource>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("geojson") | Some("json") => Ok(Box::new(GeoJsonNetworkSource::new(path))),
        Some("csv") => Ok(Box::new(CsvWktNetworkSource::new(path))),
        other => anyhow::bail!(
            "unrecognised network source extension {other:?}; expected .geojson or .csv"
        ),
    }
}
