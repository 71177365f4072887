//! Streaming MATSim-style XML [`EventSource`] connector (§4.2, §6 "Event
//! log").
//!
//! Parses `<event type="..." .../>` records one at a time off a buffered
//! reader rather than building a DOM, per the "Streaming, not in-memory XML
//! DOM" design note.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use flowcast::filter::event::{Error, EventKind, EventSource, RawEvent};
use quick_xml::events::Event;
use quick_xml::Reader;

/// Streams events from a MATSim-style `events.xml` file.
pub struct XmlEventSource {
    reader: Reader<BufReader<File>>,
    buf: Vec<u8>,
}

impl XmlEventSource {
    /// Open `path` for streaming read.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = File::open(path)?;
        let mut reader = Reader::from_reader(BufReader::new(file));
        reader.config_mut().trim_text(true);
        Ok(XmlEventSource {
            reader,
            buf: Vec::new(),
        })
    }
}

impl EventSource for XmlEventSource {
    fn next_event(&mut self) -> Result<Option<RawEvent>, Error> {
        loop {
            self.buf.clear();
            let event = self
                .reader
                .read_event_into(&mut self.buf)
                .map_err(|e| Error::Malformed(e.to_string()))?;

            match event {
                Event::Eof => return Ok(None),
                Event::Empty(e) | Event::Start(e) if e.name().as_ref() == b"event" => {
                    return Ok(Some(raw_event_from_attributes(&e)?));
                }
                _ => continue,
            }
        }
    }
}

fn raw_event_from_attributes(
    e: &quick_xml::events::BytesStart,
) -> Result<RawEvent, Error> {
    let mut event_type = String::new();
    let mut person = String::new();
    let mut link = String::new();
    let mut time: Option<i64> = None;

    for attr in e.attributes().flatten() {
        let value = attr
            .unescape_value()
            .map_err(|err| Error::Malformed(err.to_string()))?;
        match attr.key.as_ref() {
            b"type" => event_type = value.into_owned(),
            b"person" | b"vehicle" => person = value.into_owned(),
            b"link" => link = value.into_owned(),
            b"time" => time = value.parse::<f64>().ok().map(|t| t as i64),
            _ => {}
        }
    }

    let kind = match event_type.as_str() {
        "entered link" | "EnterLink" => EventKind::EnterLink,
        "left link" | "LeaveLink" => EventKind::LeaveLink,
        _ => EventKind::Other,
    };

    Ok(RawEvent {
        kind,
        person,
        link,
        time,
    })
}
