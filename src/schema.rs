//! Record shapes shared across stages, and the wire/file formats they are
//! written in.
//!
//! [`Traversal`] is the stage 1 → stage 2/3 intermediate. [`TrajectoryPoint`]
//! and [`HeatmapCell`] are the final output records of stage 2 and stage 3
//! respectively.

use chrono::{TimeZone, Utc};

/// Base epoch all rendered timestamps are anchored to, per spec.
const EPOCH_YEAR: i32 = 2024;

/// Render `seconds` (seconds since midnight of the simulation day) as
/// `YYYY/MM/DD HH:MM:SS` against the fixed 2024-01-01 00:00:00 UTC epoch.
///
/// The anchor is fixed rather than derived from the simulation's own
/// calendar date, for byte-compatibility with the reference outputs; see
/// DESIGN.md for the Open Question this resolves.
pub fn render_timestamp(seconds: i64) -> String {
    let base = Utc.with_ymd_and_hms(EPOCH_YEAR, 1, 1, 0, 0, 0).unwrap();
    let stamp = base + chrono::Duration::seconds(seconds);
    stamp.format("%Y/%m/%d %H:%M:%S").to_string()
}

/// A matched (EnterLink, LeaveLink) pair for one person on one link,
/// restricted to a single snapshot window.
#[derive(Debug, Clone, PartialEq)]
pub struct Traversal {
    /// Opaque identifier of the traversing person/vehicle.
    pub person: String,
    /// Identifier of the link being traversed.
    pub link_id: String,
    /// Enter time, seconds since midnight of the simulation day.
    pub time_enter: i32,
    /// Leave time, seconds since midnight, clipped to the window end if the
    /// traversal straddled the boundary.
    pub time_leave: i32,
    /// Index of the [`SnapshotWindow`](crate::filter::window::SnapshotWindow) this traversal was assigned to.
    pub interval_id: i32,
}

impl Traversal {
    /// Duration of the traversal in seconds. May be zero but never negative.
    pub fn duration(&self) -> i32 {
        self.time_leave - self.time_enter
    }
}

/// One interpolated position sample along a traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryPoint {
    /// Longitude (or projected x), rounded to 12 decimal places.
    pub x: f64,
    /// Latitude (or projected y), rounded to 12 decimal places.
    pub y: f64,
    /// Rendered timestamp, `YYYY/MM/DD HH:MM:SS`.
    pub timestamp: String,
    /// Forward bearing in integer degrees, constant across a traversal's points.
    pub bearing: u16,
    /// Person/vehicle identifier.
    pub person: String,
    /// Snapshot window index this point's traversal belongs to.
    pub interval_id: i32,
    /// `(link_length / duration) / free_speed`, rounded to one decimal place,
    /// when both are known. Supplements the mandated columns; see
    /// SPEC_FULL.md "Speed fraction".
    pub speed_fraction: Option<f32>,
}

/// One per-link vehicle count at a sampled instant.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapCell {
    /// Link identifier.
    pub link_id: String,
    /// Longitude (or projected x) of the link's center point.
    pub x: f64,
    /// Latitude (or projected y) of the link's center point.
    pub y: f64,
    /// Rendered timestamp of the sampled instant.
    pub timestamp: String,
    /// Raw seconds-since-midnight of the sampled instant.
    pub timepoint_seconds: i64,
    /// Number of traversals active on this link at `timepoint_seconds`.
    pub vehicle_count: u32,
}

pub mod arrow_schema {
    //! The Arrow schema for the intermediate traversal file (§6).
    use std::sync::Arc;

    use arrow::datatypes::{DataType, Field, Schema};

    /// Build the five-column schema: person, link_id, time_enter, time_leave, interval_id.
    pub fn traversal_schema() -> Schema {
        Schema::new(vec![
            Field::new("person", DataType::Utf8, false),
            Field::new("link_id", DataType::Utf8, false),
            Field::new("time_enter", DataType::Int32, false),
            Field::new("time_leave", DataType::Int32, false),
            Field::new("interval_id", DataType::Int32, false),
        ])
    }

    /// Same schema, wrapped for APIs that want an `Arc<Schema>`.
    pub fn traversal_schema_ref() -> Arc<Schema> {
        Arc::new(traversal_schema())
    }
}

pub mod output;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn epoch_renders_midnight() {
        assert_eq!(render_timestamp(0), "2024/01/01 00:00:00");
    }

    #[test]
    fn render_past_midnight_rolls_to_next_day() {
        assert_eq!(render_timestamp(86_400), "2024/01/02 00:00:00");
    }

    #[test]
    fn traversal_duration_is_leave_minus_enter() {
        let t = Traversal {
            person: "A".into(),
            link_id: "L1".into(),
            time_enter: 100,
            time_leave: 115,
            interval_id: 0,
        };
        assert_eq!(t.duration(), 15);
    }
}
