use flowcast::config::{OutputFormat, PipelineConfig};
use flowcast::filter::event::{EventKind, RawEvent, VecEventSource};
use flowcast::filter::window::SnapshotWindow;
use flowcast::geometry::LinkGeometry;
use flowcast::network::source::{Error as SourceError, NetworkSource, RawLinkRow};

use geo_types::{Coord, LineString};

struct FixtureNetwork;

impl NetworkSource for FixtureNetwork {
    fn read(&self, _id_field: &str) -> Result<Vec<RawLinkRow>, SourceError> {
        Ok(vec![RawLinkRow {
            link_id: "L1".into(),
            from_node: "N1".into(),
            to_node: "N2".into(),
            length: 100.0,
            free_speed: 10.0,
            geometry: LinkGeometry::Single(LineString::from(vec![
                Coord { x: 0.0, y: 0.0 },
                Coord { x: 0.0, y: 1.0 },
            ])),
        }])
    }
}

#[tokio::test]
async fn end_to_end_pipeline_writes_csv_outputs() {
    let network_dir = tempfile::tempdir().unwrap();
    let network_path = network_dir.path().join("network.geojson");
    std::fs::write(&network_path, "{}").unwrap();

    let trajectory_path = network_dir.path().join("trajectories.csv");
    let heatmap_path = network_dir.path().join("heatmap.csv");

    let config = PipelineConfig {
        network_path,
        link_id_field: "linkId".into(),
        event_log_path: network_dir.path().join("raw").join("events.xml"),
        windows: vec![SnapshotWindow { start: 0, end: 1000 }],
        chunk_size: 100_000,
        worker_count: 1,
        queue_capacity: None,
        sample_stride_seconds: 10,
        heatmap_interval_seconds: 50,
        heatmap_range: None,
        output_format: OutputFormat::Csv,
        trajectory_output_path: trajectory_path.clone(),
        heatmap_output_path: heatmap_path.clone(),
    };

    let mut event_source = VecEventSource::new(vec![
        RawEvent {
            kind: EventKind::EnterLink,
            person: "A".into(),
            link: "L1".into(),
            time: Some(100),
        },
        RawEvent {
            kind: EventKind::LeaveLink,
            person: "A".into(),
            link: "L1".into(),
            time: Some(200),
        },
    ]);

    let report = flowcast::pipeline::run(&config, &FixtureNetwork, &mut event_source)
        .await
        .unwrap();

    assert_eq!(report.filter_stats.traversals_emitted, 1);
    assert!(report.export_stats.points_emitted > 0);
    assert!(report.heatmap_stats.timepoints_sampled > 0);

    let trajectory_csv = std::fs::read_to_string(&trajectory_path).unwrap();
    assert!(trajectory_csv.lines().count() > 1, "expected a header plus data rows");

    let heatmap_csv = std::fs::read_to_string(&heatmap_path).unwrap();
    assert!(heatmap_csv.lines().count() > 1, "expected a header plus data rows");
}

#[tokio::test]
async fn unpaired_enter_yields_no_output_rows() {
    let network_dir = tempfile::tempdir().unwrap();
    let network_path = network_dir.path().join("network.geojson");
    std::fs::write(&network_path, "{}").unwrap();

    let config = PipelineConfig {
        network_path,
        link_id_field: "linkId".into(),
        event_log_path: network_dir.path().join("raw").join("events.xml"),
        windows: vec![SnapshotWindow { start: 0, end: 1000 }],
        chunk_size: 100_000,
        worker_count: 1,
        queue_capacity: None,
        sample_stride_seconds: 10,
        heatmap_interval_seconds: 50,
        heatmap_range: None,
        output_format: OutputFormat::Csv,
        trajectory_output_path: network_dir.path().join("trajectories.csv"),
        heatmap_output_path: network_dir.path().join("heatmap.csv"),
    };

    let mut event_source = VecEventSource::new(vec![RawEvent {
        kind: EventKind::EnterLink,
        person: "A".into(),
        link: "L1".into(),
        time: Some(100),
    }]);

    let report = flowcast::pipeline::run(&config, &FixtureNetwork, &mut event_source)
        .await
        .unwrap();

    assert_eq!(report.filter_stats.traversals_emitted, 0);
    assert_eq!(report.filter_stats.unpaired_enters, 1);
    assert_eq!(report.export_stats.points_emitted, 0);
}
