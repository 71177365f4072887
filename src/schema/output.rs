//! CSV and GeoJSON sinks for trajectory and heatmap output (§6).

use std::io::Write;

use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue, Value as GeoValue};
use serde::Serialize;
use thiserror::Error;

use crate::schema::{HeatmapCell, TrajectoryPoint};

/// Errors writing an output sink.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Generic IO error from the underlying writer.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// CSV-specific encoding error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Serialize)]
struct TrajectoryRow<'a> {
    x: f64,
    y: f64,
    timestamp: &'a str,
    angle: u16,
    person_id: &'a str,
    interval_id: i32,
}

#[derive(Serialize)]
struct HeatmapRow<'a> {
    link_id: &'a str,
    x: f64,
    y: f64,
    timestamp: &'a str,
    timepoint_seconds: i64,
    vehicle_count: u32,
}

/// Append a batch of trajectory points to a CSV writer, per the
/// `x,y,timestamp,angle,person_id,interval_id` schema.
pub fn write_trajectory_csv<W: Write>(
    writer: &mut csv::Writer<W>,
    points: &[TrajectoryPoint],
) -> Result<(), Error> {
    for p in points {
        writer.serialize(TrajectoryRow {
            x: p.x,
            y: p.y,
            timestamp: &p.timestamp,
            angle: p.bearing,
            person_id: &p.person,
            interval_id: p.interval_id,
        })?;
    }
    Ok(())
}

/// Append a batch of heatmap cells to a CSV writer, per the
/// `link_id,x,y,timestamp,timepoint_seconds,vehicle_count` schema.
pub fn write_heatmap_csv<W: Write>(
    writer: &mut csv::Writer<W>,
    cells: &[HeatmapCell],
) -> Result<(), Error> {
    for c in cells {
        writer.serialize(HeatmapRow {
            link_id: &c.link_id,
            x: c.x,
            y: c.y,
            timestamp: &c.timestamp,
            timepoint_seconds: c.timepoint_seconds,
            vehicle_count: c.vehicle_count,
        })?;
    }
    Ok(())
}

/// Render a batch of trajectory points as a GeoJSON `FeatureCollection`,
/// one Point feature per sample, properties `{timestamp, angle, person_id, interval_id}`.
pub fn trajectory_feature_collection(points: &[TrajectoryPoint]) -> FeatureCollection {
    let features = points
        .iter()
        .map(|p| {
            let mut properties = JsonObject::new();
            properties.insert("timestamp".to_string(), JsonValue::from(p.timestamp.clone()));
            properties.insert("angle".to_string(), JsonValue::from(p.bearing));
            properties.insert("person_id".to_string(), JsonValue::from(p.person.clone()));
            properties.insert("interval_id".to_string(), JsonValue::from(p.interval_id));
            if let Some(sf) = p.speed_fraction {
                properties.insert("speed_fraction".to_string(), JsonValue::from(sf as f64));
            }

            Feature {
                bbox: None,
                geometry: Some(Geometry::new(GeoValue::Point(vec![p.x, p.y]))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Render a batch of heatmap cells as a GeoJSON `FeatureCollection`, one
/// Point feature (at the link's center) per cell, properties
/// `{link_id, timestamp, timepoint_seconds, vehicle_count}`.
pub fn heatmap_feature_collection(cells: &[HeatmapCell]) -> FeatureCollection {
    let features = cells
        .iter()
        .map(|c| {
            let mut properties = JsonObject::new();
            properties.insert("link_id".to_string(), JsonValue::from(c.link_id.clone()));
            properties.insert("timestamp".to_string(), JsonValue::from(c.timestamp.clone()));
            properties.insert(
                "timepoint_seconds".to_string(),
                JsonValue::from(c.timepoint_seconds),
            );
            properties.insert("vehicle_count".to_string(), JsonValue::from(c.vehicle_count));

            Feature {
                bbox: None,
                geometry: Some(Geometry::new(GeoValue::Point(vec![c.x, c.y]))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_point() -> TrajectoryPoint {
        TrajectoryPoint {
            x: 10.5,
            y: 59.9,
            timestamp: "2024/01/01 08:00:00".to_string(),
            bearing: 90,
            person: "A".to_string(),
            interval_id: 0,
            speed_fraction: None,
        }
    }

    #[test]
    fn csv_roundtrip_header() {
        let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
        write_trajectory_csv(&mut writer, &[sample_point()]).unwrap();
        let bytes = writer.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("x,y,timestamp,angle,person_id,interval_id"));
        assert!(text.contains("10.5,59.9,2024/01/01 08:00:00,90,A,0"));
    }

    #[test]
    fn geojson_feature_count_matches_input() {
        let fc = trajectory_feature_collection(&[sample_point(), sample_point()]);
        assert_eq!(fc.features.len(), 2);
    }

    #[test]
    fn heatmap_csv_and_geojson_agree_on_row_count() {
        let cell = HeatmapCell {
            link_id: "L1".to_string(),
            x: 10.5,
            y: 59.9,
            timestamp: "2024/01/01 08:00:00".to_string(),
            timepoint_seconds: 28_800,
            vehicle_count: 3,
        };
        let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
        write_heatmap_csv(&mut writer, &[cell.clone()]).unwrap();
        let bytes = writer.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("link_id,x,y,timestamp,timepoint_seconds,vehicle_count"));

        let fc = heatmap_feature_collection(&[cell]);
        assert_eq!(fc.features.len(), 1);
    }
}
