//! The pluggable road-network source seam (§4.1).

use thiserror::Error;

use crate::geometry::LinkGeometry;

/// Errors a [`NetworkSource`] implementation may surface.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The underlying file or connection could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The source was readable but not in the expected shape.
    #[error("malformed network source: {0}")]
    Malformed(String),
    /// A row referenced `id_field` but it was absent from that row.
    #[error("missing link id field {field:?} on row {row_index}")]
    MissingIdField { field: String, row_index: usize },
}

/// One road-network link row, already coerced into typed fields.
///
/// `from_node`/`to_node` are opaque strings compared only for equality —
/// [`LinkIndex`](crate::network::index::LinkIndex) never interprets them as
/// coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLinkRow {
    /// The link's identifier, read from the configured id field.
    pub link_id: String,
    /// Identifier of the link's origin node.
    pub from_node: String,
    /// Identifier of the link's destination node.
    pub to_node: String,
    /// Link length in the source's native units.
    pub length: f64,
    /// Free-flow speed in the source's native units.
    pub free_speed: f64,
    /// The link's shape.
    pub geometry: LinkGeometry,
}

/// Reads a full road network into memory as [`RawLinkRow`]s.
///
/// Implementations live in `flowcast-sources`; this trait is the seam
/// [`crate::network::cache::NetworkCache`] builds against so the reprojection
/// and caching logic stays independent of the wire format (GeoJSON, CSV+WKT, ...).
pub trait NetworkSource {
    /// Read every link, using `id_field` as the link identifier property/column.
    fn read(&self, id_field: &str) -> Result<Vec<RawLinkRow>, Error>;

    /// EPSG code of the coordinate reference system `read` returns geometry
    /// in. `None` means EPSG:4326 (no reprojection needed).
    fn source_epsg(&self) -> Option<u32> {
        None
    }
}
