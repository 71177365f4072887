//! The pluggable event-source seam stage 1 reads from.
//!
//! Per the "Dynamic schema from attributes" design note, event attributes
//! are parsed into a fixed record shape ([`RawEvent`]) at the earliest
//! point; nothing downstream of [`EventSource::next_event`] sees untyped
//! strings.

use thiserror::Error;

/// Errors an [`EventSource`] implementation may surface. Per-record parse
/// failures are not represented here — they are reported as `RawEvent`s
/// with `time: None` / `kind: EventKind::Other` and counted by the filter,
/// per §7's `EventMalformed` taxonomy entry.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The underlying stream could not be read (file I/O, decompression, etc).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The stream was not well-formed enough to continue parsing at all.
    #[error("malformed stream: {0}")]
    Malformed(String),
}

/// The kind of a raw event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A vehicle entered a link.
    EnterLink,
    /// A vehicle left a link.
    LeaveLink,
    /// Any other event type; ignored by the filter.
    Other,
}

/// One event record, already coerced into typed fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Which kind of event this is.
    pub kind: EventKind,
    /// Opaque person/vehicle identifier.
    pub person: String,
    /// Link identifier; compared as a string against [`crate::network::index::LinkIndex`] keys.
    pub link: String,
    /// Seconds since midnight; `None` if the source `time` attribute was
    /// missing or not an integer (§7 `EventMalformed`).
    pub time: Option<i64>,
}

/// Streams [`RawEvent`] records from a source log, in document order.
///
/// Implementations must not buffer the entire source in memory (per the
/// "Streaming, not in-memory XML DOM" design note) — `next_event` should
/// pull incrementally from the underlying reader.
pub trait EventSource {
    /// Pull the next event, or `Ok(None)` at end of stream.
    fn next_event(&mut self) -> Result<Option<RawEvent>, Error>;
}

/// An in-memory [`EventSource`] over a pre-built `Vec`, useful for tests and
/// for small embedders that already have events in memory.
pub struct VecEventSource {
    events: std::vec::IntoIter<RawEvent>,
}

impl VecEventSource {
    /// Wrap a `Vec<RawEvent>` as an [`EventSource`].
    pub fn new(events: Vec<RawEvent>) -> Self {
        VecEventSource {
            events: events.into_iter(),
        }
    }
}

impl EventSource for VecEventSource {
    fn next_event(&mut self) -> Result<Option<RawEvent>, Error> {
        Ok(self.events.next())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn vec_source_yields_in_order_then_none() {
        let mut source = VecEventSource::new(vec![RawEvent {
            kind: EventKind::EnterLink,
            person: "A".into(),
            link: "L1".into(),
            time: Some(10),
        }]);
        assert!(source.next_event().unwrap().is_some());
        assert!(source.next_event().unwrap().is_none());
    }
}
