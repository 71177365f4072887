//! The intermediate traversal file stage 1 writes and stages 2/3 read
//! (§5 scheduling model, §6 "Intermediate traversal schema").
//!
//! Traversals live only in this file between stage 1 and stages 2/3:
//! [`IntermediateWriter`] appends one Arrow record batch per
//! `write_batch` call rather than buffering the whole traversal set, and
//! [`IntermediateReader`] streams row groups back out independently for
//! each downstream stage.

use std::fs::File;
use std::path::{Path, PathBuf};

use arrow::array::{Array, Int32Array, StringArray};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::ArrowWriter;
use thiserror::Error;

use crate::filter::{SinkError, TraversalSink};
use crate::schema::arrow_schema::traversal_schema_ref;
use crate::schema::Traversal;

/// Errors reading or writing the intermediate traversal file.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Arrow array construction or conversion failed.
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    /// Parquet encode/decode failed.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    /// A record batch didn't match the expected traversal schema shape.
    #[error("corrupt intermediate file: {0}")]
    Corrupt(String),
}

/// Derive the intermediate file path for a given event log path: a
/// sibling `interim/` directory next to the log's parent, named
/// `<event-log-stem>_traversals.parquet`. Mirrors
/// [`cache_path`](crate::network::cache::cache_path)'s convention.
pub fn intermediate_path(event_log_path: &Path) -> PathBuf {
    let stem = event_log_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("events");
    let parent = event_log_path.parent().unwrap_or_else(|| Path::new("."));
    let interim_root = parent.parent().unwrap_or(parent);
    interim_root
        .join("interim")
        .join(format!("{stem}_traversals.parquet"))
}

/// Writes [`Traversal`] batches to a Parquet file conforming to
/// [`traversal_schema`](crate::schema::arrow_schema::traversal_schema), one
/// row group per [`TraversalSink::write_batch`] call.
pub struct IntermediateWriter {
    writer: Option<ArrowWriter<File>>,
}

impl IntermediateWriter {
    /// Create (or truncate) the intermediate file at `path`, creating its
    /// parent directory if needed.
    pub fn create(path: &Path) -> Result<Self, Error> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = File::create(path)?;
        let writer = ArrowWriter::try_new(file, traversal_schema_ref(), None)?;
        Ok(IntermediateWriter {
            writer: Some(writer),
        })
    }
}

impl TraversalSink for IntermediateWriter {
    fn write_batch(&mut self, batch: &[Traversal]) -> Result<(), SinkError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Box::new(Error::Corrupt("writer already closed".into())) as SinkError)?;
        let record_batch = encode_batch(batch).map_err(|e| Box::new(e) as SinkError)?;
        writer
            .write(&record_batch)
            .map_err(|e| Box::new(Error::from(e)) as SinkError)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        if let Some(writer) = self.writer.take() {
            writer
                .close()
                .map_err(|e| Box::new(Error::from(e)) as SinkError)?;
        }
        Ok(())
    }
}

fn encode_batch(batch: &[Traversal]) -> Result<RecordBatch, Error> {
    let person: StringArray = batch.iter().map(|t| Some(t.person.as_str())).collect();
    let link_id: StringArray = batch.iter().map(|t| Some(t.link_id.as_str())).collect();
    let time_enter: Int32Array = batch.iter().map(|t| Some(t.time_enter)).collect();
    let time_leave: Int32Array = batch.iter().map(|t| Some(t.time_leave)).collect();
    let interval_id: Int32Array = batch.iter().map(|t| Some(t.interval_id)).collect();

    Ok(RecordBatch::try_new(
        traversal_schema_ref(),
        vec![
            std::sync::Arc::new(person) as std::sync::Arc<dyn Array>,
            std::sync::Arc::new(link_id) as std::sync::Arc<dyn Array>,
            std::sync::Arc::new(time_enter) as std::sync::Arc<dyn Array>,
            std::sync::Arc::new(time_leave) as std::sync::Arc<dyn Array>,
            std::sync::Arc::new(interval_id) as std::sync::Arc<dyn Array>,
        ],
    )?)
}

fn decode_batch(batch: &RecordBatch) -> Result<Vec<Traversal>, Error> {
    let person = downcast::<StringArray>(batch, "person")?;
    let link_id = downcast::<StringArray>(batch, "link_id")?;
    let time_enter = downcast::<Int32Array>(batch, "time_enter")?;
    let time_leave = downcast::<Int32Array>(batch, "time_leave")?;
    let interval_id = downcast::<Int32Array>(batch, "interval_id")?;

    Ok((0..batch.num_rows())
        .map(|i| Traversal {
            person: person.value(i).to_string(),
            link_id: link_id.value(i).to_string(),
            time_enter: time_enter.value(i),
            time_leave: time_leave.value(i),
            interval_id: interval_id.value(i),
        })
        .collect())
}

fn downcast<'a, T: Array + 'static>(batch: &'a RecordBatch, column: &str) -> Result<&'a T, Error> {
    batch
        .column_by_name(column)
        .ok_or_else(|| Error::Corrupt(format!("missing column {column:?}")))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::Corrupt(format!("column {column:?} had unexpected type")))
}

/// Streams [`Traversal`] batches back out of an intermediate file, one
/// `Vec` per row group.
pub struct IntermediateReader {
    inner: ParquetRecordBatchReader,
}

impl IntermediateReader {
    /// Open the intermediate file at `path` for streaming read.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        let inner = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
        Ok(IntermediateReader { inner })
    }
}

impl Iterator for IntermediateReader {
    type Item = Result<Vec<Traversal>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|batch| decode_batch(&batch?).map_err(Error::from))
    }
}

/// Read every traversal out of the intermediate file at `path` into one
/// `Vec`. Used by stages that need the full traversal set at once (the
/// heatmap sampler's per-instant vehicle counts require seeing every
/// traversal together; see DESIGN.md).
pub fn read_all(path: &Path) -> Result<Vec<Traversal>, Error> {
    let mut traversals = Vec::new();
    for batch in IntermediateReader::open(path)? {
        traversals.extend(batch?);
    }
    Ok(traversals)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn intermediate_path_lands_in_sibling_interim_dir() {
        let path = intermediate_path(Path::new("/data/raw/v4/events.xml"));
        assert_eq!(
            path,
            Path::new("/data/raw/interim/events_traversals.parquet")
        );
    }

    #[test]
    fn roundtrips_through_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traversals.parquet");

        let batch = vec![
            Traversal {
                person: "A".into(),
                link_id: "L1".into(),
                time_enter: 100,
                time_leave: 200,
                interval_id: 0,
            },
            Traversal {
                person: "B".into(),
                link_id: "L2".into(),
                time_enter: 150,
                time_leave: 180,
                interval_id: 0,
            },
        ];

        let mut writer = IntermediateWriter::create(&path).unwrap();
        writer.write_batch(&batch).unwrap();
        writer.finish().unwrap();

        let read_back = read_all(&path).unwrap();
        assert_eq!(read_back, batch);
    }

    #[test]
    fn reader_yields_one_vec_per_row_group() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traversals.parquet");

        let mut writer = IntermediateWriter::create(&path).unwrap();
        writer
            .write_batch(&[Traversal {
                person: "A".into(),
                link_id: "L1".into(),
                time_enter: 0,
                time_leave: 10,
                interval_id: 0,
            }])
            .unwrap();
        writer
            .write_batch(&[Traversal {
                person: "B".into(),
                link_id: "L2".into(),
                time_enter: 5,
                time_leave: 15,
                interval_id: 0,
            }])
            .unwrap();
        writer.finish().unwrap();

        let batches: Vec<Vec<Traversal>> = IntermediateReader::open(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[1].len(), 1);
    }
}
