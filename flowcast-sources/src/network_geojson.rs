//! GeoJSON [`NetworkSource`] connector (§4.1, §6 "Source network").

use std::fs;
use std::path::PathBuf;

use flowcast::geometry::LinkGeometry;
use flowcast::network::source::{Error, NetworkSource, RawLinkRow};
use geo_types::{Coord, LineString};
use geojson::{GeoJson, Geometry as GeoJsonGeometry, Value as GeoValue};

/// Reads a road network from a GeoJSON `FeatureCollection` of
/// LineString/MultiLineString features.
pub struct GeoJsonNetworkSource {
    path: PathBuf,
    from_field: String,
    to_field: String,
    length_field: String,
    free_speed_field: String,
    source_epsg: Option<u32>,
}

impl GeoJsonNetworkSource {
    /// Build a source reading from `path`, using MATSim-conventional
    /// property names (`from`, `to`, `length`, `freespeed`).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        GeoJsonNetworkSource {
            path: path.into(),
            from_field: "from".to_string(),
            to_field: "to".to_string(),
            length_field: "length".to_string(),
            free_speed_field: "freespeed".to_string(),
            source_epsg: None,
        }
    }

    /// Override the property names used for the from-node, to-node,
    /// length, and free-speed attributes.
    pub fn with_field_names(mut self, from: &str, to: &str, length: &str, free_speed: &str) -> Self {
        self.from_field = from.to_string();
        self.to_field = to.to_string();
        self.length_field = length.to_string();
        self.free_speed_field = free_speed.to_string();
        self
    }

    /// Declare the source's native EPSG code, so the network cache
    /// reprojects to EPSG:4326 before caching.
    pub fn with_source_epsg(mut self, epsg: u32) -> Self {
        self.source_epsg = Some(epsg);
        self
    }
}

impl NetworkSource for GeoJsonNetworkSource {
    fn read(&self, id_field: &str) -> Result<Vec<RawLinkRow>, Error> {
        let text = fs::read_to_string(&self.path)?;
        let geojson: GeoJson = text.parse().map_err(|e| Error::Malformed(format!("{e}")))?;

        let GeoJson::FeatureCollection(collection) = geojson else {
            return Err(Error::Malformed(
                "expected a GeoJSON FeatureCollection".to_string(),
            ));
        };

        let mut rows = Vec::with_capacity(collection.features.len());
        for (row_index, feature) in collection.features.iter().enumerate() {
            let properties = feature.properties.as_ref().ok_or_else(|| {
                Error::Malformed(format!("feature {row_index} has no properties"))
            })?;

            let link_id = property_string(properties, id_field, row_index)?;
            let from_node = property_string(properties, &self.from_field, row_index)?;
            let to_node = property_string(properties, &self.to_field, row_index)?;
            let length = property_f64(properties, &self.length_field, row_index)?;
            let free_speed = property_f64(properties, &self.free_speed_field, row_index)?;

            let geometry_value = feature.geometry.as_ref().ok_or_else(|| {
                Error::Malformed(format!("feature {row_index} has no geometry"))
            })?;
            let geometry = parse_geometry(geometry_value, row_index)?;

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

fn property_string(
    properties: &geojson::JsonObject,
    key: &str,
    row_index: usize,
) -> Result<String, Error> {
    properties
        .get(key)
        .map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .ok_or_else(|| Error::MissingIdField {
            field: key.to_string(),
            row_index,
        })
}

fn property_f64(properties: &geojson::JsonObject, key: &str, row_index: usize) -> Result<f64, Error> {
    properties
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| {
            Error::Malformed(format!(
                "row {row_index}: property {key:?} is missing or not numeric"
            ))
        })
}

fn parse_geometry(geometry: &GeoJsonGeometry, row_index: usize) -> Result<LinkGeometry, Error> {
    match &geometry.value {
        GeoValue::LineString(coords) => Ok(LinkGeometry::Single(line_string_from(coords))),
        GeoValue::MultiLineString(chains) => Ok(LinkGeometry::Multi(
            chains.iter().map(|c| line_string_from(c)).collect(),
        )),
        other => Err(Error::Malformed(format!(
            "row {row_index}: unsupported geometry type {other:?}"
        ))),
    }
}

fn line_string_from(coords: &[Vec<f64>]) -> LineString<f64> {
    LineString::from(
        coords
            .iter()
            .map(|c| Coord { x: c[0], y: c[1] })
            .collect::<Vec<_>>(),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_linestring_features() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "type": "FeatureCollection",
                "features": [
                    {{
                        "type": "Feature",
                        "properties": {{"linkId": "L1", "from": "N1", "to": "N2", "length": 100.0, "freespeed": 13.4}},
                        "geometry": {{"type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]]}}
                    }}
                ]
            }}"#
        )
        .unwrap();

        let source = GeoJsonNetworkSource::new(file.path());
        let rows = source.read("linkId").unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].link_id, "L1");
        assert_eq!(rows[0].from_node, "N1");
        assert!((rows[0].length - 100.0).abs() < 1e-9);
    }
}
