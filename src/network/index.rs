//! Builds the in-memory road-graph index: per-link derived attributes
//! (`travel_start`, `travel_end`, `bearing`, `center`) and the node
//! incidence lookups used to resolve them (§4.2).

use std::collections::HashMap;

use geo_types::Coord;
use thiserror::Error;

use crate::geometry::{bearing_degrees, LinkGeometry};

pub use crate::network::source::RawLinkRow;

/// Errors building a [`LinkIndex`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Two rows shared the same link id.
    #[error("duplicate link id {0:?}")]
    DuplicateLinkId(String),
    /// A link's geometry had fewer than two distinct coordinates.
    #[error("link {0:?} has degenerate (zero-length) geometry")]
    DegenerateGeometry(String),
}

/// One link with its source attributes and derived travel endpoints.
#[derive(Debug, Clone)]
pub struct Link {
    /// Stable string identifier.
    pub link_id: String,
    /// Origin node id.
    pub from_node: String,
    /// Destination node id.
    pub to_node: String,
    /// Length in the source's native units.
    pub length: f64,
    /// Free-flow speed in the source's native units.
    pub free_speed: f64,
    /// The link's shape.
    pub geometry: LinkGeometry,
    /// First coordinate of the link's own geometry.
    pub edge_start: Coord<f64>,
    /// Last coordinate of the link's own geometry.
    pub edge_end: Coord<f64>,
    /// True travel start, resolved via the neighbour-resolution rule (§4.2).
    pub travel_start: Coord<f64>,
    /// True travel end, resolved via the neighbour-resolution rule (§4.2).
    pub travel_end: Coord<f64>,
    /// Forward bearing in integer degrees, from `travel_start` to `travel_end`.
    pub bearing: u16,
    /// Point at geometric parameter 0.5 along the polyline.
    pub center: Coord<f64>,
}

/// The built road-graph index: every link keyed by id, plus the node
/// incidence maps needed to re-derive neighbours on demand.
#[derive(Debug)]
pub struct LinkIndex {
    links: HashMap<String, Link>,
    from_index: HashMap<String, Vec<String>>,
    to_index: HashMap<String, Vec<String>>,
}

impl LinkIndex {
    /// Build the index from raw rows (§4.2).
    ///
    /// Neighbour-resolution tie-breaks are taken in lexicographic LinkId
    /// order, per the spec's determinism note: iteration order is otherwise
    /// unspecified, so a fixed sort is the only way to get reproducible
    /// output across runs (see DESIGN.md).
    pub fn build(mut rows: Vec<RawLinkRow>) -> Result<LinkIndex, Error> {
        rows.sort_by(|a, b| a.link_id.cmp(&b.link_id));

        let mut edges: HashMap<String, (Coord<f64>, Coord<f64>)> = HashMap::with_capacity(rows.len());
        let mut from_index: HashMap<String, Vec<String>> = HashMap::new();
        let mut to_index: HashMap<String, Vec<String>> = HashMap::new();

        for row in &rows {
            if edges.contains_key(&row.link_id) {
                return Err(Error::DuplicateLinkId(row.link_id.clone()));
            }
            if !row.geometry.is_non_degenerate() {
                return Err(Error::DegenerateGeometry(row.link_id.clone()));
            }
            let (edge_start, edge_end) = row
                .geometry
                .endpoints()
                .ok_or_else(|| Error::DegenerateGeometry(row.link_id.clone()))?;

            edges.insert(row.link_id.clone(), (edge_start, edge_end));
            from_index
                .entry(row.from_node.clone())
                .or_default()
                .push(row.link_id.clone());
            to_index
                .entry(row.to_node.clone())
                .or_default()
                .push(row.link_id.clone());
        }

        let mut links = HashMap::with_capacity(rows.len());
        for row in rows {
            let (edge_start, edge_end) = edges[&row.link_id];

            // Candidate previous link: ends at our from_node, and does not
            // itself start where we end (the U-turn exclusion, §4.2 step 1).
            let previous = to_index
                .get(&row.from_node)
                .into_iter()
                .flatten()
                .find(|candidate| {
                    *candidate != &row.link_id && edges[*candidate].0 != edge_end
                });

            // Candidate next link: starts at our to_node, and does not
            // itself end where we start (step 2).
            let next = from_index
                .get(&row.to_node)
                .into_iter()
                .flatten()
                .find(|candidate| {
                    *candidate != &row.link_id && edges[*candidate].1 != edge_start
                });

            let travel_start = previous
                .map(|p| edges[p])
                .and_then(|(p1, p2)| {
                    if p1 == edge_start {
                        Some(p1)
                    } else if p2 == edge_start {
                        Some(p2)
                    } else {
                        None
                    }
                })
                .unwrap_or(edge_start);

            let travel_end = next
                .map(|n| edges[n])
                .and_then(|(n1, n2)| {
                    if n1 == edge_end {
                        Some(n1)
                    } else if n2 == edge_end {
                        Some(n2)
                    } else {
                        None
                    }
                })
                .unwrap_or(edge_end);

            let bearing = bearing_degrees(travel_start, travel_end);
            let center = row
                .geometry
                .sample_fraction(0.5)
                .unwrap_or(edge_start);

            links.insert(
                row.link_id.clone(),
                Link {
                    link_id: row.link_id,
                    from_node: row.from_node,
                    to_node: row.to_node,
                    length: row.length,
                    free_speed: row.free_speed,
                    geometry: row.geometry,
                    edge_start,
                    edge_end,
                    travel_start,
                    travel_end,
                    bearing,
                    center,
                },
            );
        }

        Ok(LinkIndex {
            links,
            from_index,
            to_index,
        })
    }

    /// Look up one link by id.
    pub fn get(&self, link_id: &str) -> Option<&Link> {
        self.links.get(link_id)
    }

    /// Every link id in the index, in unspecified order.
    pub fn link_ids(&self) -> impl Iterator<Item = &String> {
        self.links.keys()
    }

    /// Number of links in the index.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// `true` if the index holds no links.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Link ids starting at `node`, in lexicographic order.
    pub fn links_from(&self, node: &str) -> &[String] {
        self.from_index.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Link ids ending at `node`, in lexicographic order.
    pub fn links_to(&self, node: &str) -> &[String] {
        self.to_index.get(node).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use geo_types::LineString;

    fn row(id: &str, from: &str, to: &str, coords: &[(f64, f64)]) -> RawLinkRow {
        RawLinkRow {
            link_id: id.to_string(),
            from_node: from.to_string(),
            to_node: to.to_string(),
            length: 100.0,
            free_speed: 10.0,
            geometry: LinkGeometry::Single(LineString::from(
                coords.iter().map(|&(x, y)| Coord { x, y }).collect::<Vec<_>>(),
            )),
        }
    }

    #[test]
    fn chain_of_three_resolves_neighbours() {
        // N1 --L1--> N2 --L2--> N3
        let rows = vec![
            row("L1", "N1", "N2", &[(0.0, 0.0), (1.0, 0.0)]),
            row("L2", "N2", "N3", &[(1.0, 0.0), (2.0, 0.0)]),
        ];
        let index = LinkIndex::build(rows).unwrap();

        let l1 = index.get("L1").unwrap();
        // No previous link: travel_start falls back to edge_start.
        assert_eq!(l1.travel_start, Coord { x: 0.0, y: 0.0 });
        // L2 starts where L1 ends: travel_end is the shared endpoint itself.
        assert_eq!(l1.travel_end, Coord { x: 1.0, y: 0.0 });

        let l2 = index.get("L2").unwrap();
        assert_eq!(l2.travel_start, Coord { x: 1.0, y: 0.0 });
        assert_eq!(l2.travel_end, Coord { x: 2.0, y: 0.0 });
    }

    #[test]
    fn dead_end_falls_back_to_own_edge() {
        let rows = vec![row("L1", "N1", "N2", &[(0.0, 0.0), (1.0, 0.0)])];
        let index = LinkIndex::build(rows).unwrap();
        let l1 = index.get("L1").unwrap();
        assert_eq!(l1.travel_start, l1.edge_start);
        assert_eq!(l1.travel_end, l1.edge_end);
    }

    #[test]
    fn u_turn_pair_is_excluded_as_neighbour() {
        // L1: N1->N2, L2: N2->N1 (the exact reverse). Neither should treat
        // the other as a real neighbour.
        let rows = vec![
            row("L1", "N1", "N2", &[(0.0, 0.0), (1.0, 0.0)]),
            row("L2", "N2", "N1", &[(1.0, 0.0), (0.0, 0.0)]),
        ];
        let index = LinkIndex::build(rows).unwrap();
        let l1 = index.get("L1").unwrap();
        assert_eq!(l1.travel_start, l1.edge_start);
        assert_eq!(l1.travel_end, l1.edge_end);
    }

    #[test]
    fn duplicate_link_id_is_rejected() {
        let rows = vec![
            row("L1", "N1", "N2", &[(0.0, 0.0), (1.0, 0.0)]),
            row("L1", "N2", "N3", &[(1.0, 0.0), (2.0, 0.0)]),
        ];
        assert!(matches!(
            LinkIndex::build(rows),
            Err(Error::DuplicateLinkId(id)) if id == "L1"
        ));
    }

    #[test]
    fn degenerate_geometry_is_rejected() {
        let rows = vec![row("L1", "N1", "N2", &[(0.0, 0.0), (0.0, 0.0)])];
        assert!(matches!(
            LinkIndex::build(rows),
            Err(Error::DegenerateGeometry(id)) if id == "L1"
        ));
    }
}
