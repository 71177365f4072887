//! Stage 1: streams a raw event log, pairs Enter/Leave events, applies
//! window and spatial filtering and end-time clipping, and writes a
//! compact columnar intermediate of [`Traversal`] rows (§4.3).

pub mod event;
pub mod window;

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::config::PipelineConfig;
use crate::network::index::LinkIndex;
use crate::schema::Traversal;

use event::{EventKind, EventSource, RawEvent};
use window::SnapshotWindows;

/// Error type a [`TraversalSink`] implementation may return.
pub type SinkError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Consumes batches of filtered [`Traversal`] rows as they are produced.
///
/// Implementations back the intermediate file of §6 (an Arrow/Parquet
/// writer in production use, a `Vec` accumulator in tests).
pub trait TraversalSink {
    /// Append one worker's output batch. May be called many times, from a
    /// single logical writer (§5: "a single writer task serialises worker
    /// output").
    fn write_batch(&mut self, batch: &[Traversal]) -> Result<(), SinkError>;

    /// Flush and close the sink. Called once, after all batches have been
    /// written, even on abort, so partial output stays structurally
    /// well-formed (§5).
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Accumulates every [`Traversal`] in memory; useful for tests and small runs.
#[derive(Debug, Default)]
pub struct VecTraversalSink {
    /// All traversals written so far, in arrival order (unspecified overall order, §5).
    pub traversals: Vec<Traversal>,
}

impl TraversalSink for VecTraversalSink {
    fn write_batch(&mut self, batch: &[Traversal]) -> Result<(), SinkError> {
        self.traversals.extend_from_slice(batch);
        Ok(())
    }
}

/// Errors from [`run`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The event source failed to produce the next record.
    #[error("event source error: {0}")]
    Source(#[from] event::Error),
    /// The sink failed to accept or flush a batch.
    #[error("sink error: {0}")]
    Sink(SinkError),
    /// A worker task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    /// Internal channel closed unexpectedly (a worker panicked mid-stream).
    #[error("internal channel closed before the stream finished")]
    ChannelClosed,
}

/// Tuning parameters for [`run`] (§4.3, §5).
#[derive(Debug, Clone, Copy)]
pub struct FilterConfig {
    /// Approximate number of events per reader chunk.
    pub chunk_size: usize,
    /// Number of worker tasks.
    pub worker_count: usize,
    /// Bounded channel capacity between reader and workers.
    pub queue_capacity: usize,
}

impl From<&PipelineConfig> for FilterConfig {
    fn from(cfg: &PipelineConfig) -> Self {
        FilterConfig {
            chunk_size: cfg.chunk_size,
            worker_count: cfg.worker_count.max(1),
            queue_capacity: cfg.effective_queue_capacity(),
        }
    }
}

/// Per-record outcome counters accumulated across the whole run (§7, §9 summary log).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FilterStats {
    /// Total events pulled from the source.
    pub events_read: u64,
    /// Traversals successfully emitted to the sink.
    pub traversals_emitted: u64,
    /// Matched pairs dropped because their link was not in the [`LinkIndex`].
    pub spatial_rejections: u64,
    /// Matched pairs dropped because `time_enter` fell outside every configured window.
    pub window_rejections: u64,
    /// EnterLink events with no matching LeaveLink by end of stream.
    pub unpaired_enters: u64,
    /// Records skipped for a missing/non-integer `time`.
    pub malformed_records: u64,
}

impl FilterStats {
    fn merge_chunk(&mut self, other: ChunkStats) {
        self.traversals_emitted += other.traversals_emitted;
        self.spatial_rejections += other.spatial_rejections;
        self.window_rejections += other.window_rejections;
        self.malformed_records += other.malformed_records;
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ChunkStats {
    traversals_emitted: u64,
    spatial_rejections: u64,
    window_rejections: u64,
    malformed_records: u64,
}

struct WorkerOutput {
    traversals: Vec<Traversal>,
    stats: ChunkStats,
}

/// Run stage 1: stream `source`, filter against `index` and `windows`,
/// and write every surviving [`Traversal`] to `sink`.
///
/// Must be called from within a Tokio runtime; the reader, worker pool, and
/// writer are coordinated through bounded channels per §5.
pub async fn run(
    source: &mut dyn EventSource,
    index: &LinkIndex,
    windows: &SnapshotWindows,
    cfg: &FilterConfig,
    sink: &mut dyn TraversalSink,
) -> Result<FilterStats, Error> {
    let worker_count = cfg.worker_count.max(1);
    let queue_capacity = cfg.queue_capacity.max(1);

    let link_ids: Arc<HashSet<String>> = Arc::new(index.link_ids().cloned().collect());

    let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<RawEvent>>(queue_capacity);
    let chunk_rx = Arc::new(Mutex::new(chunk_rx));
    let (batch_tx, mut batch_rx) = mpsc::channel::<WorkerOutput>(queue_capacity);

    let mut worker_handles = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let chunk_rx = Arc::clone(&chunk_rx);
        let batch_tx = batch_tx.clone();
        let windows = windows.clone();
        let link_ids = Arc::clone(&link_ids);
        worker_handles.push(tokio::spawn(async move {
            worker_loop(chunk_rx, batch_tx, windows, link_ids).await
        }));
    }
    drop(batch_tx);

    let (events_read, unpaired_enters) = read_chunks(source, cfg.chunk_size, chunk_tx).await?;

    let mut stats = FilterStats {
        events_read,
        unpaired_enters,
        ..FilterStats::default()
    };

    while let Some(output) = batch_rx.recv().await {
        if !output.traversals.is_empty() {
            sink.write_batch(&output.traversals).map_err(Error::Sink)?;
        }
        stats.merge_chunk(output.stats);
    }

    for handle in worker_handles {
        handle.await?;
    }

    sink.finish().map_err(Error::Sink)?;

    Ok(stats)
}

/// Reader half of §4.3 step 1: pulls events in order, chunking at
/// approximately `chunk_size` events, holding pending EnterLinks over
/// (keyed by `(person, link)`) until their LeaveLink arrives so a matched
/// pair is never split across chunks.
async fn read_chunks(
    source: &mut dyn EventSource,
    chunk_size: usize,
    chunk_tx: mpsc::Sender<Vec<RawEvent>>,
) -> Result<(u64, u64), Error> {
    let mut chunk: Vec<RawEvent> = Vec::with_capacity(chunk_size.max(1));
    let mut pending: HashMap<(String, String), Vec<RawEvent>> = HashMap::new();
    let mut events_read: u64 = 0;

    while let Some(event) = source.next_event()? {
        events_read += 1;
        let key = (event.person.clone(), event.link.clone());

        match event.kind {
            EventKind::EnterLink => {
                pending.entry(key).or_default().push(event);
            }
            EventKind::LeaveLink => {
                if let Some(mut held) = pending.remove(&key) {
                    chunk.append(&mut held);
                }
                chunk.push(event);
            }
            EventKind::Other => {}
        }

        if chunk.len() >= chunk_size {
            let to_send = std::mem::replace(&mut chunk, Vec::with_capacity(chunk_size.max(1)));
            chunk_tx
                .send(to_send)
                .await
                .map_err(|_| Error::ChannelClosed)?;
        }
    }

    if !chunk.is_empty() {
        chunk_tx
            .send(chunk)
            .await
            .map_err(|_| Error::ChannelClosed)?;
    }

    let unpaired_enters: u64 = pending.values().map(|held| held.len() as u64).sum();
    if unpaired_enters > 0 {
        tracing::debug!(unpaired_enters, "unmatched EnterLink events at end of stream");
    }

    Ok((events_read, unpaired_enters))
}

/// Worker half of §4.3 step 2: drains self-contained chunks from the shared
/// receiver, pairing Enter/Leave events, applying the window/spatial/clip
/// rules, and forwarding the resulting batch to the writer.
async fn worker_loop(
    chunk_rx: Arc<Mutex<mpsc::Receiver<Vec<RawEvent>>>>,
    batch_tx: mpsc::Sender<WorkerOutput>,
    windows: SnapshotWindows,
    link_ids: Arc<HashSet<String>>,
) {
    loop {
        let chunk = {
            let mut rx = chunk_rx.lock().await;
            rx.recv().await
        };
        let Some(chunk) = chunk else { break };

        let (traversals, stats) = process_chunk(chunk, &windows, &link_ids);
        if batch_tx
            .send(WorkerOutput { traversals, stats })
            .await
            .is_err()
        {
            break;
        }
    }
}

fn process_chunk(
    chunk: Vec<RawEvent>,
    windows: &SnapshotWindows,
    link_ids: &HashSet<String>,
) -> (Vec<Traversal>, ChunkStats) {
    let mut enter_events: HashMap<(String, String), RawEvent> = HashMap::new();
    let mut traversals = Vec::new();
    let mut stats = ChunkStats::default();

    for event in chunk {
        let key = (event.person.clone(), event.link.clone());
        match event.kind {
            EventKind::EnterLink => {
                enter_events.insert(key, event);
            }
            EventKind::LeaveLink => {
                let Some(enter) = enter_events.remove(&key) else {
                    continue;
                };

                let (Some(time_enter), Some(time_leave)) = (enter.time, event.time) else {
                    stats.malformed_records += 1;
                    continue;
                };

                if time_leave < time_enter {
                    stats.malformed_records += 1;
                    continue;
                }

                let time_enter = time_enter as i32;
                let time_leave = time_leave as i32;

                let Some((interval_id, window)) = windows.find_containing(time_enter) else {
                    stats.window_rejections += 1;
                    continue;
                };

                if !link_ids.contains(&event.link) {
                    stats.spatial_rejections += 1;
                    continue;
                }

                let clipped_leave = time_leave.min(window.end);

                traversals.push(Traversal {
                    person: event.person.clone(),
                    link_id: event.link.clone(),
                    time_enter,
                    time_leave: clipped_leave,
                    interval_id: interval_id as i32,
                });
                stats.traversals_emitted += 1;
            }
            EventKind::Other => {}
        }
    }

    (traversals, stats)
}
