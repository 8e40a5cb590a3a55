//! Node / coordinate index (§4.C).
//!
//! Stores one [`Coordinate`] per internal node and answers nearest-neighbor
//! snap queries via an R-tree of edge bounding rectangles, using haversine
//! distance as the metric. A snap result identifies the containing edge and
//! the fractional offset along it so the caller can treat the snap point as
//! a phantom node on that edge.

use geo::{HaversineDistance, Point};
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use viaduct_common::{Coordinate, EdgeId, NodeId, SegmentId};

/// Maximum distance (meters) a coordinate may snap; beyond this the query
/// core reports `NoSegment` rather than returning a distant match.
pub const MAX_SNAP_DISTANCE_M: f64 = 5000.0;

/// Identifies where a coordinate landed on the network: the edge it snapped
/// to, the edge's two endpoints, the snapped coordinate itself, and the
/// fractional offset from `node1` to `node2` along that edge.
///
/// `forward_segment`/`reverse_segment` carry the same two endpoints again,
/// each packed with whether a search can actually leave the phantom toward
/// it: `forward_segment` (landing at `node2`) is enabled iff the edge is
/// forward-traversable, `reverse_segment` (landing at `node1`) iff it's
/// backward-traversable. A one-way edge disables the direction the phantom
/// can't actually be walked in.
#[derive(Debug, Clone, Copy)]
pub struct EdgeHint {
    pub edge: EdgeId,
    pub node1: NodeId,
    pub node2: NodeId,
    pub forward_segment: SegmentId,
    pub reverse_segment: SegmentId,
    pub snapped: Coordinate,
    pub offset: f64,
}

struct IndexedEdge {
    edge: EdgeId,
    u: NodeId,
    v: NodeId,
    forward: bool,
    backward: bool,
    u_lon: f64,
    u_lat: f64,
    v_lon: f64,
    v_lat: f64,
}

impl RTreeObject for IndexedEdge {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.u_lon.min(self.v_lon), self.u_lat.min(self.v_lat)],
            [self.u_lon.max(self.v_lon), self.u_lat.max(self.v_lat)],
        )
    }
}

impl PointDistance for IndexedEdge {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        self.envelope().distance_2(point)
    }
}

/// Maps internal node ids to coordinates and supports nearest-edge
/// snapping.
pub struct NodeIndex {
    coordinates: Vec<Coordinate>,
    tree: RTree<IndexedEdge>,
}

impl NodeIndex {
    /// `coordinates[n]` is node `n`'s position; `edges` lists the
    /// `(edge id, u, v, forward, backward)` quintuples to index for snapping
    /// (typically every base edge of the underlying graph, one direction
    /// only, carrying that edge's own traversability flags).
    pub fn build(coordinates: Vec<Coordinate>, edges: &[(EdgeId, NodeId, NodeId, bool, bool)]) -> Self {
        let indexed: Vec<IndexedEdge> = edges
            .iter()
            .map(|&(edge, u, v, forward, backward)| IndexedEdge {
                edge,
                u,
                v,
                forward,
                backward,
                u_lon: coordinates[u as usize].lon_degrees(),
                u_lat: coordinates[u as usize].lat_degrees(),
                v_lon: coordinates[v as usize].lon_degrees(),
                v_lat: coordinates[v as usize].lat_degrees(),
            })
            .collect();
        NodeIndex {
            coordinates,
            tree: RTree::bulk_load(indexed),
        }
    }

    pub fn coord(&self, n: NodeId) -> Coordinate {
        self.coordinates[n as usize]
    }

    pub fn num_nodes(&self) -> usize {
        self.coordinates.len()
    }

    /// Finds the nearest edge to `(lon, lat)`, returning the snap point and
    /// the node the query can treat as a phantom. `None` if nothing is
    /// within [`MAX_SNAP_DISTANCE_M`].
    pub fn nearest(&self, lon: f64, lat: f64) -> Option<EdgeHint> {
        self.nearest_k(lon, lat, 1).into_iter().next()
    }

    /// As [`NodeIndex::nearest`], returning up to `k` candidates ordered by
    /// ascending distance (used by `/nearest?number=N`).
    pub fn nearest_k(&self, lon: f64, lat: f64, k: usize) -> Vec<EdgeHint> {
        let query = Point::new(lon, lat);
        let mut candidates: Vec<(f64, EdgeHint)> = Vec::new();

        // Broad-phase: the R-tree orders by planar distance to the
        // envelope, which is a reasonable proxy at the degree scale of a
        // single metro-area extract. Pull enough candidates to be robust
        // to the planar/haversine discrepancy, then re-rank precisely.
        for indexed in self.tree.nearest_neighbor_iter(&[lon, lat]).take(k.max(8) * 4) {
            let (snapped, offset) = project_onto_segment(
                lon,
                lat,
                indexed.u_lon,
                indexed.u_lat,
                indexed.v_lon,
                indexed.v_lat,
            );
            let distance = query.haversine_distance(&Point::new(snapped.0, snapped.1));
            if distance > MAX_SNAP_DISTANCE_M {
                continue;
            }
            candidates.push((
                distance,
                EdgeHint {
                    edge: indexed.edge,
                    node1: indexed.u,
                    node2: indexed.v,
                    forward_segment: SegmentId::new(indexed.v, indexed.forward),
                    reverse_segment: SegmentId::new(indexed.u, indexed.backward),
                    snapped: Coordinate::from_degrees(snapped.0, snapped.1),
                    offset,
                },
            ));
        }

        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));
        candidates.truncate(k);
        candidates.into_iter().map(|(_, hint)| hint).collect()
    }
}

/// Projects `(lon, lat)` onto the segment `(u..v)` in a local planar
/// approximation, returning the projected point and the fractional offset
/// from `u` to `v`. Adequate at the scale of a single edge, where the
/// curvature of the earth is negligible.
fn project_onto_segment(lon: f64, lat: f64, ulon: f64, ulat: f64, vlon: f64, vlat: f64) -> ((f64, f64), f64) {
    let dx = vlon - ulon;
    let dy = vlat - ulat;
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return ((ulon, ulat), 0.0);
    }
    let t = (((lon - ulon) * dx) + ((lat - ulat) * dy)) / len_sq;
    let t = t.clamp(0.0, 1.0);
    ((ulon + t * dx, ulat + t * dy), t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx() -> NodeIndex {
        let coords = vec![
            Coordinate::from_degrees(13.0, 52.0),
            Coordinate::from_degrees(13.01, 52.0),
            Coordinate::from_degrees(13.02, 52.0),
        ];
        NodeIndex::build(coords, &[(0, 0, 1, true, true), (1, 1, 2, true, true)])
    }

    #[test]
    fn snaps_onto_nearest_edge_midpoint() {
        let index = idx();
        let hint = index.nearest(13.005, 52.0001).unwrap();
        assert_eq!((hint.node1, hint.node2), (0, 1));
        assert!(hint.offset > 0.3 && hint.offset < 0.7);
    }

    #[test]
    fn one_way_edge_disables_its_unreachable_segment() {
        let coords = vec![Coordinate::from_degrees(13.0, 52.0), Coordinate::from_degrees(13.01, 52.0)];
        let index = NodeIndex::build(coords, &[(0, 0, 1, true, false)]);
        let hint = index.nearest(13.005, 52.0001).unwrap();
        assert!(hint.forward_segment.enabled());
        assert!(!hint.reverse_segment.enabled());
        assert_eq!(hint.forward_segment.node(), 1);
        assert_eq!(hint.reverse_segment.node(), 0);
    }

    #[test]
    fn rejects_points_far_outside_the_network() {
        let index = idx();
        assert!(index.nearest(1000.0, 1000.0).is_none());
    }

    #[test]
    fn nearest_k_orders_by_distance() {
        let index = idx();
        let hits = index.nearest_k(13.0, 52.0, 2);
        assert_eq!(hits.len(), 2);
        assert!(hits[0].snapped.lon_degrees() <= hits[1].snapped.lon_degrees() + 0.05);
    }
}
