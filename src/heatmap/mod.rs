//! Stage 3: at each configured clock instant, counts active traversals per
//! link and emits a [`HeatmapCell`] (§4.5).

use std::collections::HashMap;
use std::sync::Arc;

use geo_types::Coord;
use thiserror::Error;

use crate::config::PipelineConfig;
use crate::network::index::LinkIndex;
use crate::schema::{render_timestamp, HeatmapCell, Traversal};

/// Error type a [`HeatmapSink`] implementation may return.
pub type SinkError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Consumes batches of [`HeatmapCell`]s as they are produced.
pub trait HeatmapSink {
    /// Append one timepoint's batch of cells.
    fn write_batch(&mut self, batch: &[HeatmapCell]) -> Result<(), SinkError>;

    /// Flush and close the sink.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Accumulates every [`HeatmapCell`] in memory; useful for tests and small runs.
#[derive(Debug, Default)]
pub struct VecHeatmapSink {
    /// Every cell written so far.
    pub cells: Vec<HeatmapCell>,
}

impl HeatmapSink for VecHeatmapSink {
    fn write_batch(&mut self, batch: &[HeatmapCell]) -> Result<(), SinkError> {
        self.cells.extend_from_slice(batch);
        Ok(())
    }
}

/// Errors from [`run`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The sink failed to accept or flush a batch.
    #[error("sink error: {0}")]
    Sink(SinkError),
    /// A worker task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Tuning parameters for [`run`].
#[derive(Debug, Clone, Copy)]
pub struct HeatmapConfig {
    /// Sampling interval `S`, in seconds.
    pub interval_seconds: i64,
    /// Explicit `[t0, t1]` range; derived from the traversal set if `None`.
    pub range: Option<(i64, i64)>,
}

impl From<&PipelineConfig> for HeatmapConfig {
    fn from(cfg: &PipelineConfig) -> Self {
        HeatmapConfig {
            interval_seconds: cfg.heatmap_interval_seconds,
            range: cfg.heatmap_range,
        }
    }
}

/// Per-record outcome counters accumulated across the whole run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeatmapStats {
    /// Number of timepoints sampled.
    pub timepoints_sampled: u64,
    /// Cells emitted across every timepoint.
    pub cells_emitted: u64,
    /// (link_id, timepoint) groups skipped because the link was absent from the [`LinkIndex`].
    pub link_unknown_skips: u64,
}

/// Generate `t0, t0+S, t0+2S, ...` up to and including the first timepoint `>= t1`.
fn generate_timepoints(t0: i64, t1: i64, interval_seconds: i64) -> Vec<i64> {
    if interval_seconds <= 0 {
        return vec![t0];
    }
    let mut timepoints = Vec::new();
    let mut t = t0;
    loop {
        timepoints.push(t);
        if t >= t1 {
            break;
        }
        t += interval_seconds;
    }
    timepoints
}

fn derive_range(traversals: &[Traversal], range: Option<(i64, i64)>) -> Option<(i64, i64)> {
    if let Some(range) = range {
        return Some(range);
    }
    let min_enter = traversals.iter().map(|t| t.time_enter as i64).min()?;
    let max_leave = traversals.iter().map(|t| t.time_leave as i64).max()?;
    Some((min_enter, max_leave))
}

/// Run stage 3: sample `traversals` at each configured timepoint and write
/// the resulting cells to `sink`. Timepoints are processed concurrently on
/// the blocking pool; must be called from within a Tokio runtime.
pub async fn run(
    traversals: Vec<Traversal>,
    index: &LinkIndex,
    cfg: &HeatmapConfig,
    sink: &mut dyn HeatmapSink,
) -> Result<HeatmapStats, Error> {
    let Some((t0, t1)) = derive_range(&traversals, cfg.range) else {
        return Ok(HeatmapStats::default());
    };
    let timepoints = generate_timepoints(t0, t1, cfg.interval_seconds);

    let centers: Arc<HashMap<String, Coord<f64>>> = Arc::new(
        index
            .link_ids()
            .filter_map(|id| index.get(id).map(|link| (id.clone(), link.center)))
            .collect(),
    );
    let traversals = Arc::new(traversals);

    let mut set = tokio::task::JoinSet::new();
    for t in timepoints {
        let centers = Arc::clone(&centers);
        let traversals = Arc::clone(&traversals);
        set.spawn_blocking(move || sample_timepoint(t, &traversals, &centers));
    }

    let mut stats = HeatmapStats::default();
    while let Some(joined) = set.join_next().await {
        let (cells, link_unknown_skips) = joined?;
        stats.timepoints_sampled += 1;
        stats.cells_emitted += cells.len() as u64;
        stats.link_unknown_skips += link_unknown_skips;
        if !cells.is_empty() {
            sink.write_batch(&cells).map_err(Error::Sink)?;
        }
    }

    sink.finish().map_err(Error::Sink)?;
    Ok(stats)
}

fn sample_timepoint(
    t: i64,
    traversals: &[Traversal],
    centers: &HashMap<String, Coord<f64>>,
) -> (Vec<HeatmapCell>, u64) {
    let mut counts: HashMap<&str, u32> = HashMap::new();
    for traversal in traversals {
        let enter = traversal.time_enter as i64;
        let leave = traversal.time_leave as i64;
        if enter <= t && t < leave {
            *counts.entry(traversal.link_id.as_str()).or_insert(0) += 1;
        }
    }

    let mut cells = Vec::with_capacity(counts.len());
    let mut link_unknown_skips = 0u64;
    for (link_id, vehicle_count) in counts {
        let Some(center) = centers.get(link_id) else {
            link_unknown_skips += 1;
            continue;
        };
        cells.push(HeatmapCell {
            link_id: link_id.to_string(),
            x: center.x,
            y: center.y,
            timestamp: render_timestamp(t),
            timepoint_seconds: t,
            vehicle_count,
        });
    }

    (cells, link_unknown_skips)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::LinkGeometry;
    use crate::network::index::RawLinkRow;
    use geo_types::LineString;

    fn index_with_links(ids: &[&str]) -> LinkIndex {
        LinkIndex::build(
            ids.iter()
                .enumerate()
                .map(|(i, id)| RawLinkRow {
                    link_id: id.to_string(),
                    from_node: format!("N{i}"),
                    to_node: format!("N{}", i + 1),
                    length: 100.0,
                    free_speed: 10.0,
                    geometry: LinkGeometry::Single(LineString::from(vec![
                        geo_types::Coord { x: i as f64, y: 0.0 },
                        geo_types::Coord { x: i as f64 + 1.0, y: 0.0 },
                    ])),
                })
                .collect(),
        )
        .unwrap()
    }

    fn traversal(person: &str, link: &str, enter: i32, leave: i32) -> Traversal {
        Traversal {
            person: person.to_string(),
            link_id: link.to_string(),
            time_enter: enter,
            time_leave: leave,
            interval_id: 0,
        }
    }

    #[tokio::test]
    async fn counts_match_spec_scenario() {
        let index = index_with_links(&["L1", "L2"]);
        let traversals = vec![
            traversal("A", "L1", 100, 200),
            traversal("B", "L1", 150, 180),
            traversal("C", "L2", 160, 170),
        ];
        let cfg = HeatmapConfig {
            interval_seconds: 35,
            range: Some((100, 200)),
        };
        let mut sink = VecHeatmapSink::default();

        run(traversals, &index, &cfg, &mut sink).await.unwrap();

        let at = |t: i64, link: &str| -> Option<u32> {
            sink.cells
                .iter()
                .find(|c| c.timepoint_seconds == t && c.link_id == link)
                .map(|c| c.vehicle_count)
        };

        assert_eq!(at(100, "L1"), Some(1));
        // C hasn't entered L2 yet at t=135.
        assert_eq!(at(135, "L1"), Some(1));
        assert_eq!(at(135, "L2"), None);
        // t=170 excludes C: it left at exactly 170 (half-open on the right).
        // B is still mid-traversal (150 <= 170 < 180), so L1's count is 2.
        assert_eq!(at(170, "L2"), None);
        assert_eq!(at(170, "L1"), Some(2));
    }

    #[tokio::test]
    async fn unknown_link_is_skipped() {
        let index = index_with_links(&["L1"]);
        let traversals = vec![traversal("A", "Lx", 0, 10)];
        let cfg = HeatmapConfig {
            interval_seconds: 5,
            range: Some((0, 10)),
        };
        let mut sink = VecHeatmapSink::default();

        let stats = run(traversals, &index, &cfg, &mut sink).await.unwrap();

        assert!(sink.cells.is_empty());
        assert!(stats.link_unknown_skips > 0);
    }

    #[test]
    fn timepoints_include_first_at_or_past_t1() {
        let points = generate_timepoints(100, 200, 35);
        assert_eq!(points, vec![100, 135, 170, 205]);
    }
}
