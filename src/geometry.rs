//! The link geometry sum type and the two operations downstream code is
//! allowed to use on it.
//!
//! Source road networks represent a link's shape as either a single
//! polyline or a set of polylines (multi-chain). Rather than let every
//! consumer match on which variant it got, [`LinkGeometry`] exposes
//! [`LinkGeometry::endpoints`] and [`LinkGeometry::sample_fraction`]; no
//! other code should inspect the variant directly.

use geo_types::{Coord, LineString};

/// Shape of a single road link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkGeometry {
    /// A single connected polyline.
    Single(LineString<f64>),
    /// A set of polylines, ordered; treated as one continuous chain for the
    /// purposes of [`LinkGeometry::endpoints`].
    Multi(Vec<LineString<f64>>),
}

impl LinkGeometry {
    /// First coordinate of the first chain, last coordinate of the last
    /// chain. Returns `None` if the geometry has no coordinates at all.
    pub fn endpoints(&self) -> Option<(Coord<f64>, Coord<f64>)> {
        match self {
            LinkGeometry::Single(line) => {
                let coords = line.0.as_slice();
                let first = coords.first()?;
                let last = coords.last()?;
                Some((*first, *last))
            }
            LinkGeometry::Multi(chains) => {
                let first_chain = chains.first()?;
                let last_chain = chains.last()?;
                let first = first_chain.0.first()?;
                let last = last_chain.0.last()?;
                Some((*first, *last))
            }
        }
    }

    /// Point at geometric parameter `f` (0.0..=1.0) along the polyline,
    /// measured by cumulative Euclidean arc length across chains in order.
    /// Returns `None` for a degenerate (zero-length or empty) geometry.
    pub fn sample_fraction(&self, f: f64) -> Option<Coord<f64>> {
        let segments: Vec<Coord<f64>> = match self {
            LinkGeometry::Single(line) => line.0.clone(),
            LinkGeometry::Multi(chains) => {
                let mut all = Vec::new();
                for chain in chains {
                    all.extend(chain.0.iter().copied());
                }
                all
            }
        };

        if segments.len() < 2 {
            return segments.first().copied();
        }

        let lengths: Vec<f64> = segments
            .windows(2)
            .map(|pair| {
                let (a, b) = (pair[0], pair[1]);
                ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt()
            })
            .collect();
        let total: f64 = lengths.iter().sum();
        if total <= 0.0 {
            return segments.first().copied();
        }

        let target = f.clamp(0.0, 1.0) * total;
        let mut walked = 0.0;
        for (i, seg_len) in lengths.iter().enumerate() {
            if walked + seg_len >= target || i == lengths.len() - 1 {
                let local_f = if *seg_len > 0.0 {
                    (target - walked) / seg_len
                } else {
                    0.0
                };
                let a = segments[i];
                let b = segments[i + 1];
                return Some(Coord {
                    x: a.x + local_f * (b.x - a.x),
                    y: a.y + local_f * (b.y - a.y),
                });
            }
            walked += seg_len;
        }

        segments.last().copied()
    }

    /// `true` if the geometry has at least two distinct coordinate tuples,
    /// the non-degeneracy invariant links in a [`LinkIndex`](crate::network::index::LinkIndex) must uphold.
    pub fn is_non_degenerate(&self) -> bool {
        let coords: Vec<Coord<f64>> = match self {
            LinkGeometry::Single(line) => line.0.clone(),
            LinkGeometry::Multi(chains) => chains.iter().flat_map(|c| c.0.clone()).collect(),
        };
        coords.windows(2).any(|w| w[0] != w[1])
    }
}

/// Forward azimuth in integer degrees (0..360) from `start` to `end`,
/// treating each [`Coord`] as `(latitude, longitude)` per the wire
/// convention the output schema requires.
pub fn bearing_degrees(start: Coord<f64>, end: Coord<f64>) -> u16 {
    let lat1 = start.x.to_radians();
    let lon1 = start.y.to_radians();
    let lat2 = end.x.to_radians();
    let lon2 = end.y.to_radians();

    let delta_lon = lon2 - lon1;
    let x = lat2.cos() * delta_lon.sin();
    let y = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lon.cos();

    let angle_degrees = x.atan2(y).to_degrees();
    (((angle_degrees + 360.0) % 360.0).round() as i64).rem_euclid(360) as u16
}

#[cfg(test)]
mod test {
    use super::*;

    fn line(coords: &[(f64, f64)]) -> LineString<f64> {
        LineString::from(coords.iter().map(|&(x, y)| Coord { x, y }).collect::<Vec<_>>())
    }

    #[test]
    fn endpoints_single_chain() {
        let geom = LinkGeometry::Single(line(&[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)]));
        let (start, end) = geom.endpoints().unwrap();
        assert_eq!(start, Coord { x: 0.0, y: 0.0 });
        assert_eq!(end, Coord { x: 2.0, y: 2.0 });
    }

    #[test]
    fn endpoints_multi_chain() {
        let geom = LinkGeometry::Multi(vec![
            line(&[(0.0, 0.0), (1.0, 0.0)]),
            line(&[(2.0, 0.0), (3.0, 0.0)]),
        ]);
        let (start, end) = geom.endpoints().unwrap();
        assert_eq!(start, Coord { x: 0.0, y: 0.0 });
        assert_eq!(end, Coord { x: 3.0, y: 0.0 });
    }

    #[test]
    fn sample_fraction_midpoint() {
        let geom = LinkGeometry::Single(line(&[(0.0, 0.0), (10.0, 0.0)]));
        let mid = geom.sample_fraction(0.5).unwrap();
        assert!((mid.x - 5.0).abs() < 1e-9);
    }

    #[test]
    fn bearing_due_north_is_zero() {
        let b = bearing_degrees(Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 0.0 });
        assert_eq!(b, 0);
    }

    #[test]
    fn bearing_due_east_is_90() {
        let b = bearing_degrees(Coord { x: 0.0, y: 0.0 }, Coord { x: 0.0, y: 1.0 });
        assert_eq!(b, 90);
    }

    #[test]
    fn degenerate_geometry_rejected() {
        let geom = LinkGeometry::Single(line(&[(1.0, 1.0), (1.0, 1.0)]));
        assert!(!geom.is_non_degenerate());
    }
}
