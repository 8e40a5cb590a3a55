//! Contraction-Hierarchies index (§4.D).
//!
//! A thin view over [`CsrGraph`] that exposes only the edges traversable in
//! a given search direction, plus shortcut unpacking. Rank is implicit in
//! build order and never represented explicitly at query time — the
//! `forward`/`backward` bits on each edge already encode which direction is
//! "upward" for that edge.

use viaduct_common::{EdgeDuration, EdgeWeight, GeometryId, NodeId, SPECIAL_NODEID};

use crate::graph::{CsrGraph, EdgeData};

/// One base edge of an unpacked path. `geometry` identifies the CSR record
/// this edge came from: the node it's filed under, packed with whether it
/// was read in its stored (`forward`) orientation or reversed to serve this
/// path, so a caller can re-locate the original edge without re-deriving
/// which way it was walked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaseEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub weight: EdgeWeight,
    pub duration: EdgeDuration,
    pub name_id: u32,
    pub geometry: GeometryId,
}

/// A Contraction-Hierarchies search graph.
pub struct ChIndex {
    graph: CsrGraph,
}

impl ChIndex {
    pub fn new(graph: CsrGraph) -> Self {
        ChIndex { graph }
    }

    pub fn graph(&self) -> &CsrGraph {
        &self.graph
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.num_nodes()
    }

    /// Out-edges from `n` usable in the forward (source→target) direction.
    pub fn forward_edges(&self, n: NodeId) -> impl Iterator<Item = (u32, &EdgeData)> {
        let base = self.graph.begin_edges(n);
        self.graph
            .edges_of(n)
            .iter()
            .enumerate()
            .filter(|(_, e)| e.forward)
            .map(move |(i, e)| (base + i as u32, e))
    }

    /// Out-edges from `n` usable in the backward (target→source) direction,
    /// i.e. edges of the reverse graph rooted at `n`. The CSR only stores
    /// each edge once, filed under its source, so this walks `n`'s true
    /// incoming edges (via the graph's reverse index) rather than `n`'s own
    /// out-edge bucket, and synthesizes the reversed `EdgeData` the same
    /// way [`ChIndex::find_half`] does for a shortcut's reversed half:
    /// target becomes the original source, and `forward`/`backward` swap
    /// since traversing the edge backward inverts which direction is now
    /// "forward" from `n`'s perspective.
    pub fn backward_edges(&self, n: NodeId) -> impl Iterator<Item = (u32, EdgeData)> + '_ {
        self.graph.incoming_edges(n).filter_map(move |(source, e)| {
            let data = self.graph.data(e);
            if !data.backward {
                return None;
            }
            Some((
                e,
                EdgeData {
                    target: source,
                    weight: data.weight,
                    duration: data.duration,
                    forward: data.backward,
                    backward: data.forward,
                    shortcut: data.shortcut,
                    via: data.via,
                    name_id: data.name_id,
                },
            ))
        })
    }

    /// Recovers the base-edge sequence represented by `edge`, recursing
    /// through shortcuts via their midpoint. `edge` is interpreted as
    /// starting at `from`, and is assumed to be a record found stored under
    /// `from` itself (true of every top-level call site, which all resolve
    /// `edge` via `find_edge(from, ..)`).
    pub fn unpack(&self, from: NodeId, edge: &EdgeData) -> Vec<BaseEdge> {
        let mut out = Vec::new();
        self.unpack_into(from, edge, GeometryId::new(from, true), &mut out);
        out
    }

    fn unpack_into(&self, from: NodeId, edge: &EdgeData, geometry: GeometryId, out: &mut Vec<BaseEdge>) {
        if !edge.shortcut {
            out.push(BaseEdge {
                from,
                to: edge.target,
                weight: edge.weight,
                duration: edge.duration,
                name_id: edge.name_id,
                geometry,
            });
            return;
        }
        let via = edge.via;
        debug_assert_ne!(via, SPECIAL_NODEID, "shortcut missing its midpoint");

        let (first, first_geom) = self.find_half(from, via);
        let (second, second_geom) = self.find_half(via, edge.target);
        self.unpack_into(from, &first, first_geom, out);
        self.unpack_into(via, &second, second_geom, out);
    }

    /// Locates the edge representing one half of a shortcut's
    /// concatenation, trying both adjacency directions since a shortcut's
    /// constituent edges may themselves be stored from either endpoint, and
    /// reports which one it found via the returned [`GeometryId`].
    fn find_half(&self, from: NodeId, to: NodeId) -> (EdgeData, GeometryId) {
        let e = self.graph.find_edge(from, to);
        if e != viaduct_common::SPECIAL_EDGEID {
            return (*self.graph.data(e), GeometryId::new(from, true));
        }
        let back = self.graph.find_edge(to, from);
        debug_assert_ne!(back, viaduct_common::SPECIAL_EDGEID, "shortcut half is dangling");
        let data = self.graph.data(back);
        (
            EdgeData {
                target: from,
                weight: data.weight,
                duration: data.duration,
                forward: data.backward,
                backward: data.forward,
                shortcut: data.shortcut,
                via: data.via,
                name_id: data.name_id,
            },
            GeometryId::new(to, false),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeData;

    fn build_simple_ch() -> ChIndex {
        // 0 -> 1 -> 2, plus a shortcut 0 -> 2 via 1.
        let e01 = EdgeData::base(1, 5, 50, true, false);
        let e12 = EdgeData::base(2, 7, 70, true, false);
        let mut shortcut = EdgeData::base(2, 12, 120, true, false);
        shortcut.shortcut = true;
        shortcut.via = 1;
        let graph = CsrGraph::build(3, vec![(0, e01), (1, e12), (0, shortcut)]);
        ChIndex::new(graph)
    }

    #[test]
    fn unpacks_shortcut_into_base_edges_with_matching_weight() {
        let ch = build_simple_ch();
        let edges = ch.graph().edges_of(0);
        let shortcut = edges.iter().find(|e| e.shortcut).unwrap();
        let unpacked = ch.unpack(0, shortcut);
        assert_eq!(unpacked.len(), 2);
        assert_eq!(unpacked[0].from, 0);
        assert_eq!(unpacked[1].to, 2);
        let total: i32 = unpacked.iter().map(|e| e.weight).sum();
        assert_eq!(total, shortcut.weight);
        // Both halves are stored forward (0->1 under node 0, 1->2 under
        // node 1), so unpacking never needed to reverse either one.
        assert!(unpacked[0].geometry.is_forward());
        assert!(unpacked[1].geometry.is_forward());
    }

    #[test]
    fn forward_edges_excludes_backward_only() {
        let e = EdgeData::base(1, 1, 1, false, true);
        let graph = CsrGraph::build(2, vec![(0, e)]);
        let ch = ChIndex::new(graph);
        assert_eq!(ch.forward_edges(0).count(), 0);
        // The edge is filed under node 0 (the source) with target 1; its
        // backward direction is usable from node 1, the target, not from
        // node 0 where it's stored.
        assert_eq!(ch.backward_edges(0).count(), 0);
        assert_eq!(ch.backward_edges(1).count(), 1);
        let (_, reversed) = ch.backward_edges(1).next().unwrap();
        assert_eq!(reversed.target, 0);
    }

    #[test]
    fn backward_search_relaxes_true_incoming_edges_not_the_query_nodes_own_bucket() {
        // Node 3 has no out-edges of its own at all; its only connection is
        // a single edge stored under node 1 (1 -> 3) marked forward=false,
        // backward=true, i.e. usable only by a backward search walking it
        // in reverse. A forward-only search can never reach node 3 (the
        // edge can't be taken forward), so the route can only be found if
        // the backward frontier genuinely expands past its seed (node 3)
        // back to node 1 via this edge, meeting the forward frontier there
        // instead of at node 3. A `backward_edges` that scans node 3's own
        // (empty) out-edge bucket finds nothing and the search fails
        // outright.
        let edges = vec![
            (0, EdgeData::base(1, 2, 20, true, true)),
            (1, EdgeData::base(3, 5, 50, false, true)),
        ];
        let ch = ChIndex::new(CsrGraph::build(4, edges));

        assert_eq!(ch.backward_edges(3).count(), 1);
        let (_, reversed) = ch.backward_edges(3).next().unwrap();
        assert_eq!(reversed.target, 1);

        let mut scratch = crate::search::SearchScratch::new(ch.num_nodes());
        let result = crate::search::bidirectional_search(&ch, &mut scratch, &[(0, 0)], &[(3, 0)]).unwrap();
        assert_eq!(result.weight, 7);
        assert_eq!(result.meeting_node, 1);
    }
}
