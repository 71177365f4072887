//! Parquet-backed cache of hydrated, EPSG:4326-reprojected network rows
//! (§4.1). Mirrors the `gpkg → interim/*_cache.parquet` convention of the
//! network preprocessing this module supersedes: a cache is valid when it
//! exists and its mtime is no older than the source file's.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, BinaryArray, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use geo_types::{Geometry, LineString, MultiLineString};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use proj::Proj;
use thiserror::Error;

use crate::geometry::LinkGeometry;
use crate::network::source::{self, NetworkSource, RawLinkRow};

/// Errors loading or building a [`NetworkCache`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The configured network source could not be read.
    #[error("network source error: {0}")]
    Source(#[from] source::Error),
    /// Generic IO error reading or writing the cache file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The cache file existed but its columns/row shape were not as expected.
    #[error("network cache is corrupt: {0}")]
    CacheCorrupt(String),
    /// Reprojection to EPSG:4326 failed.
    #[error("reprojection failed: {0}")]
    Reproject(String),
    /// The Arrow/Parquet writer or reader reported an error.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    /// Arrow reported an error building or reading a record batch.
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

/// Reporting counters for one [`load_or_build`] call.
#[derive(Debug, Clone)]
pub struct NetworkCacheStats {
    /// Number of link rows loaded.
    pub row_count: usize,
    /// `true` if a valid cache file was reused; `false` if it was rebuilt from source.
    pub cache_hit: bool,
    /// Path of the cache file used or written.
    pub cache_path: PathBuf,
}

/// Derive the cache path for a given network source path: siblings the
/// source's parent directory under an `interim/` directory, named
/// `<source-stem>_cache.parquet`.
pub fn cache_path(source_path: &Path) -> PathBuf {
    let stem = source_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("network");
    let parent = source_path.parent().unwrap_or_else(|| Path::new("."));
    let interim_root = parent.parent().unwrap_or(parent);
    interim_root.join("interim").join(format!("{stem}_cache.parquet"))
}

fn is_cache_valid(source_path: &Path, cache_file: &Path) -> bool {
    let (Ok(source_meta), Ok(cache_meta)) = (source_path.metadata(), cache_file.metadata()) else {
        return false;
    };
    let (Ok(source_mtime), Ok(cache_mtime)) = (source_meta.modified(), cache_meta.modified()) else {
        return false;
    };
    cache_mtime >= source_mtime
}

fn cache_schema() -> Schema {
    Schema::new(vec![
        Field::new("link_id", DataType::Utf8, false),
        Field::new("from_node", DataType::Utf8, false),
        Field::new("to_node", DataType::Utf8, false),
        Field::new("length", DataType::Float64, false),
        Field::new("free_speed", DataType::Float64, false),
        Field::new("geometry_wkb", DataType::Binary, false),
    ])
}

fn geometry_to_geo(geometry: &LinkGeometry) -> Geometry<f64> {
    match geometry {
        LinkGeometry::Single(line) => Geometry::LineString(line.clone()),
        LinkGeometry::Multi(chains) => Geometry::MultiLineString(MultiLineString(chains.clone())),
    }
}

fn geo_to_geometry(geo: Geometry<f64>) -> Result<LinkGeometry, Error> {
    match geo {
        Geometry::LineString(line) => Ok(LinkGeometry::Single(line)),
        Geometry::MultiLineString(multi) => Ok(LinkGeometry::Multi(multi.0)),
        other => Err(Error::CacheCorrupt(format!(
            "unexpected geometry type in cache: {other:?}"
        ))),
    }
}

fn reproject_geometry(geometry: &LinkGeometry, proj: &Proj) -> Result<LinkGeometry, Error> {
    let transform_coords = |line: &LineString<f64>| -> Result<LineString<f64>, Error> {
        let mut points = Vec::with_capacity(line.0.len());
        for coord in &line.0 {
            let (x, y) = proj
                .convert((coord.x, coord.y))
                .map_err(|e| Error::Reproject(e.to_string()))?;
            points.push(geo_types::Coord { x, y });
        }
        Ok(LineString::from(points))
    };

    match geometry {
        LinkGeometry::Single(line) => Ok(LinkGeometry::Single(transform_coords(line)?)),
        LinkGeometry::Multi(chains) => {
            let mut out = Vec::with_capacity(chains.len());
            for chain in chains {
                out.push(transform_coords(chain)?);
            }
            Ok(LinkGeometry::Multi(out))
        }
    }
}

fn write_cache(cache_file: &Path, rows: &[RawLinkRow]) -> Result<(), Error> {
    let schema = Arc::new(cache_schema());

    let link_ids: StringArray = rows.iter().map(|r| Some(r.link_id.as_str())).collect();
    let from_nodes: StringArray = rows.iter().map(|r| Some(r.from_node.as_str())).collect();
    let to_nodes: StringArray = rows.iter().map(|r| Some(r.to_node.as_str())).collect();
    let lengths: Float64Array = rows.iter().map(|r| Some(r.length)).collect();
    let speeds: Float64Array = rows.iter().map(|r| Some(r.free_speed)).collect();
    let wkb_bytes: Vec<Vec<u8>> = rows
        .iter()
        .map(|r| wkb::geom_to_wkb(&geometry_to_geo(&r.geometry)))
        .collect();
    let geometries = BinaryArray::from_iter_values(wkb_bytes.iter().map(Vec::as_slice));

    let batch = RecordBatch::try_new(
        Arc::clone(&schema),
        vec![
            Arc::new(link_ids) as Arc<dyn Array>,
            Arc::new(from_nodes) as Arc<dyn Array>,
            Arc::new(to_nodes) as Arc<dyn Array>,
            Arc::new(lengths) as Arc<dyn Array>,
            Arc::new(speeds) as Arc<dyn Array>,
            Arc::new(geometries) as Arc<dyn Array>,
        ],
    )?;

    let file = File::create(cache_file)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn read_cache(cache_file: &Path) -> Result<Vec<RawLinkRow>, Error> {
    let file = File::open(cache_file)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;
        let link_id = downcast::<StringArray>(&batch, "link_id")?;
        let from_node = downcast::<StringArray>(&batch, "from_node")?;
        let to_node = downcast::<StringArray>(&batch, "to_node")?;
        let length = downcast::<Float64Array>(&batch, "length")?;
        let free_speed = downcast::<Float64Array>(&batch, "free_speed")?;
        let geometry_wkb = downcast::<BinaryArray>(&batch, "geometry_wkb")?;

        for i in 0..batch.num_rows() {
            let mut bytes = geometry_wkb.value(i);
            let geo = wkb::wkb_to_geom(&mut bytes)
                .map_err(|e| Error::CacheCorrupt(format!("invalid wkb: {e}")))?;
            rows.push(RawLinkRow {
                link_id: link_id.value(i).to_string(),
                from_node: from_node.value(i).to_string(),
                to_node: to_node.value(i).to_string(),
                length: length.value(i),
                free_speed: free_speed.value(i),
                geometry: geo_to_geometry(geo)?,
            });
        }
    }
    Ok(rows)
}

fn downcast<'a, T: Array + 'static>(
    batch: &'a RecordBatch,
    column: &str,
) -> Result<&'a T, Error> {
    batch
        .column_by_name(column)
        .ok_or_else(|| Error::CacheCorrupt(format!("missing column {column:?}")))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::CacheCorrupt(format!("column {column:?} had unexpected type")))
}

/// Load network rows for `source_path`, reusing a valid Parquet cache when
/// present, or reading `source`, reprojecting to EPSG:4326 if needed, and
/// writing a fresh cache otherwise.
pub fn load_or_build(
    source: &dyn NetworkSource,
    source_path: &Path,
    id_field: &str,
) -> Result<(Vec<RawLinkRow>, NetworkCacheStats), Error> {
    let cache_file = cache_path(source_path);

    if is_cache_valid(source_path, &cache_file) {
        tracing::debug!(cache = %cache_file.display(), "reusing valid network cache");
        let rows = read_cache(&cache_file)?;
        let stats = NetworkCacheStats {
            row_count: rows.len(),
            cache_hit: true,
            cache_path: cache_file,
        };
        return Ok((rows, stats));
    }

    tracing::info!(source = %source_path.display(), "network cache missing or stale, rebuilding");
    let mut rows = source.read(id_field)?;

    if let Some(epsg) = source.source_epsg() {
        let proj = Proj::new_known_crs(&format!("EPSG:{epsg}"), "EPSG:4326", None)
            .map_err(|e| Error::Reproject(e.to_string()))?;
        for row in &mut rows {
            row.geometry = reproject_geometry(&row.geometry, &proj)?;
        }
    }

    if let Some(dir) = cache_file.parent() {
        std::fs::create_dir_all(dir)?;
    }
    write_cache(&cache_file, &rows)?;

    let stats = NetworkCacheStats {
        row_count: rows.len(),
        cache_hit: false,
        cache_path: cache_file,
    };
    Ok((rows, stats))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cache_path_lands_in_sibling_interim_dir() {
        let path = Path::new("/data/raw/v4/network.geojson");
        let cache = cache_path(path);
        assert_eq!(cache, Path::new("/data/raw/interim/network_cache.parquet"));
    }

    #[test]
    fn roundtrips_through_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let cache_file = dir.path().join("cache.parquet");
        let rows = vec![RawLinkRow {
            link_id: "L1".to_string(),
            from_node: "N1".to_string(),
            to_node: "N2".to_string(),
            length: 42.0,
            free_speed: 13.4,
            geometry: LinkGeometry::Single(LineString::from(vec![
                geo_types::Coord { x: 0.0, y: 0.0 },
                geo_types::Coord { x: 1.0, y: 1.0 },
            ])),
        }];

        write_cache(&cache_file, &rows).unwrap();
        let loaded = read_cache(&cache_file).unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].link_id, "L1");
        assert_eq!(loaded[0].from_node, "N1");
        assert!((loaded[0].length - 42.0).abs() < 1e-9);
        assert_eq!(loaded[0].geometry, rows[0].geometry);
    }
}
