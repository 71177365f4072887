//! CSV+WKT [`NetworkSource`] connector: one row per link, geometry stored
//! as a well-known-text string column (§4.1, §6 "Source network").

use std::path::PathBuf;

use flowcast::geometry::LinkGeometry;
use flowcast::network::source::{Error, NetworkSource, RawLinkRow};
use geo_types::Geometry;
use serde::Deserialize;
use wkt::TryFromWkt;

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(flatten)]
    rest: std::collections::HashMap<String, String>,
}

/// Reads a road network from a CSV file whose geometry column holds WKT
/// `LINESTRING`/`MULTILINESTRING` text.
pub struct CsvWktNetworkSource {
    path: PathBuf,
    from_field: String,
    to_field: String,
    length_field: String,
    free_speed_field: String,
    geometry_field: String,
    source_epsg: Option<u32>,
}

impl CsvWktNetworkSource {
    /// Build a source reading from `path`, with conventional column names
    /// (`from`, `to`, `length`, `freespeed`, `geometry`).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvWktNetworkSource {
            path: path.into(),
            from_field: "from".to_string(),
            to_field: "to".to_string(),
            length_field: "length".to_string(),
            free_speed_field: "freespeed".to_string(),
            geometry_field: "geometry".to_string(),
            source_epsg: None,
        }
    }

    /// Override the column names used for the from-node, to-node, length,
    /// free-speed, and geometry attributes.
    pub fn with_field_names(
        mut self,
        from: &str,
        to: &str,
        length: &str,
        free_speed: &str,
        geometry: &str,
    ) -> Self {
        self.from_field = from.to_string();
        self.to_field = to.to_string();
        self.length_field = length.to_string();
        self.free_speed_field = free_speed.to_string();
        self.geometry_field = geometry.to_string();
        self
    }

    /// Declare the source's native EPSG code, so the network cache
    /// reprojects to EPSG:4326 before caching.
    pub fn with_source_epsg(mut self, epsg: u32) -> Self {
        self.source_epsg = Some(epsg);
        self
    }
}

impl NetworkSource for CsvWktNetworkSource {
    fn read(&self, id_field: &str) -> Result<Vec<RawLinkRow>, Error> {
        let mut reader = csv::Reader::from_path(&self.path)?;

        let mut rows = Vec::new();
        for (row_index, record) in reader.deserialize::<CsvRow>().enumerate() {
            let record = record.map_err(|e| Error::Malformed(e.to_string()))?;

            let link_id = field(&record, id_field, row_index)?;
            let from_node = field(&record, &self.from_field, row_index)?;
            let to_node = field(&record, &self.to_field, row_index)?;
            let length = field(&record, &self.length_field, row_index)?
                .parse::<f64>()
                .map_err(|e| Error::Malformed(format!("row {row_index}: length: {e}")))?;
            let free_speed = field(&record, &self.free_speed_field, row_index)?
                .parse::<f64>()
                .map_err(|e| Error::Malformed(format!("row {row_index}: free_speed: {e}")))?;
            let wkt_text = field(&record, &self.geometry_field, row_index)?;

            let geometry = parse_wkt_geometry(&wkt_text, row_index)?;

            rows.push(RawLinkRow {
                link_id,
                from_node,
                to_node,
                length,
                free_speed,
                geometry,
            });
        }

        Ok(rows)
    }

    fn source_epsg(&self) -> Option<u32> {
        self.source_epsg
    }
}

fn field(row: &CsvRow, key: &str, row_index: usize) -> Result<String, Error> {
    row.rest
        .get(key)
        .cloned()
        .ok_or_else(|| Error::MissingIdField {
            field: key.to_string(),
            row_index,
        })
}

fn parse_wkt_geometry(text: &str, row_index: usize) -> Result<LinkGeometry, Error> {
    let geometry = Geometry::<f64>::try_from_wkt_str(text)
        .map_err(|e| Error::Malformed(format!("row {row_index}: invalid wkt: {e}")))?;

    match geometry {
        Geometry::LineString(line) => Ok(LinkGeometry::Single(line)),
        Geometry::MultiLineString(multi) => Ok(LinkGeometry::Multi(multi.0)),
        other => Err(Error::Malformed(format!(
            "row {row_index}: unsupported wkt geometry type {other:?}"
        ))),
    }
}
