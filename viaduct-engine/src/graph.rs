//! Static CSR graph (§4.B).
//!
//! Immutable adjacency representation: a contiguous edge array plus a
//! per-node first-edge offset array. Built once from an edge list sorted by
//! source and never mutated; this is the topology shared by both the CH and
//! MLP query paths.

use viaduct_common::{EdgeDuration, EdgeWeight, NodeId, SPECIAL_EDGEID};

/// Per-edge payload. `forward`/`backward` record which direction(s) the
/// edge is traversable in; `shortcut` marks a CH shortcut edge whose weight
/// equals the concatenation of the two edges meeting at `via`. `name_id`
/// indexes the road name this edge carries in the mode's name table (§4.F);
/// `SPECIAL_NODEID`-valued `via` aside, an unnamed edge uses `name_id = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeData {
    pub target: NodeId,
    pub weight: EdgeWeight,
    pub duration: EdgeDuration,
    pub forward: bool,
    pub backward: bool,
    pub shortcut: bool,
    pub via: NodeId,
    pub name_id: u32,
}

impl EdgeData {
    pub fn base(target: NodeId, weight: EdgeWeight, duration: EdgeDuration, forward: bool, backward: bool) -> Self {
        EdgeData {
            target,
            weight,
            duration,
            forward,
            backward,
            shortcut: false,
            via: viaduct_common::SPECIAL_NODEID,
            name_id: 0,
        }
    }

    pub fn with_name_id(mut self, name_id: u32) -> Self {
        self.name_id = name_id;
        self
    }
}

/// An immutable CSR graph: `node_array[n]` is the offset into `edge_array`
/// of node `n`'s first out-edge, and `node_array[num_nodes()]` is the
/// sentinel `edge_array.len()`.
///
/// Edges are filed once, under their source node only (matching the
/// source container's on-disk edge array, which `loader.rs` persists and
/// reconstructs verbatim). `rev_node_array`/`rev_entries` are a derived,
/// never-persisted reverse index built alongside `edge_array` so callers
/// can walk a node's true incoming edges without a linear scan over every
/// edge in the graph; they hold no information `edge_array` doesn't
/// already carry.
#[derive(Debug, Clone)]
pub struct CsrGraph {
    node_array: Vec<u32>,
    edge_array: Vec<EdgeData>,
    rev_node_array: Vec<u32>,
    rev_entries: Vec<(NodeId, u32)>,
}

/// Bucket-sorts `edge_array`'s indices by target, producing a CSR-shaped
/// `(offsets, entries)` pair over incoming edges. `edge_array` is already
/// laid out in source-ascending order (it's `CsrGraph::build`'s own
/// output), so the source owning each index is derived by walking the
/// forward `node_array` in lockstep rather than searching it.
/// `O(n + m)`: one pass to count per-target bucket sizes, one to place
/// entries.
fn build_reverse_index(
    num_nodes: usize,
    forward_node_array: &[u32],
    edge_array: &[EdgeData],
) -> (Vec<u32>, Vec<(NodeId, u32)>) {
    let mut rev_node_array = vec![0u32; num_nodes + 1];
    for e in edge_array {
        rev_node_array[e.target as usize + 1] += 1;
    }
    for n in 0..num_nodes {
        rev_node_array[n + 1] += rev_node_array[n];
    }

    let mut cursor = rev_node_array.clone();
    let mut entries = vec![(0u32, 0u32); edge_array.len()];
    let mut source = 0u32;
    for (i, e) in edge_array.iter().enumerate() {
        while forward_node_array[source as usize + 1] <= i as u32 {
            source += 1;
        }
        let slot = &mut cursor[e.target as usize];
        entries[*slot as usize] = (source, i as u32);
        *slot += 1;
    }
    (rev_node_array, entries)
}

impl CsrGraph {
    /// Builds a CSR graph from `(source, edge)` pairs. `edges` need not be
    /// pre-sorted by source; this constructor buckets and sorts them.
    pub fn build(num_nodes: usize, mut edges: Vec<(NodeId, EdgeData)>) -> Self {
        edges.sort_by_key(|(src, _)| *src);

        let mut node_array = vec![0u32; num_nodes + 1];
        let mut edge_array = Vec::with_capacity(edges.len());
        let mut cursor = 0usize;
        for n in 0..num_nodes as u32 {
            node_array[n as usize] = cursor as u32;
            while cursor < edges.len() && edges[cursor].0 == n {
                edge_array.push(edges[cursor].1);
                cursor += 1;
            }
        }
        node_array[num_nodes] = edge_array.len() as u32;

        let (rev_node_array, rev_entries) = build_reverse_index(num_nodes, &node_array, &edge_array);

        let graph = CsrGraph {
            node_array,
            edge_array,
            rev_node_array,
            rev_entries,
        };
        debug_assert!(graph.check_shortcut_invariant(), "dangling shortcut reference");
        graph
    }

    pub fn num_nodes(&self) -> usize {
        self.node_array.len() - 1
    }

    pub fn num_edges(&self) -> usize {
        self.edge_array.len()
    }

    pub fn begin_edges(&self, n: NodeId) -> u32 {
        self.node_array[n as usize]
    }

    pub fn end_edges(&self, n: NodeId) -> u32 {
        self.node_array[n as usize + 1]
    }

    pub fn edges_of(&self, n: NodeId) -> &[EdgeData] {
        &self.edge_array[self.begin_edges(n) as usize..self.end_edges(n) as usize]
    }

    pub fn target(&self, e: u32) -> NodeId {
        self.edge_array[e as usize].target
    }

    pub fn data(&self, e: u32) -> &EdgeData {
        &self.edge_array[e as usize]
    }

    /// Linear scan over `u`'s out-edges for one targeting `v`.
    pub fn find_edge(&self, u: NodeId, v: NodeId) -> u32 {
        for e in self.begin_edges(u)..self.end_edges(u) {
            if self.target(e) == v {
                return e;
            }
        }
        SPECIAL_EDGEID
    }

    /// Every edge whose target is `n`, as `(source, edge_array index)`
    /// pairs, via the reverse index built alongside `edge_array`. This is
    /// the graph's true incoming-edge set, distinct from `edges_of(n)`
    /// (which lists `n`'s own out-edges, i.e. edges where `n` is the
    /// source).
    pub fn incoming_edges(&self, n: NodeId) -> impl Iterator<Item = (NodeId, u32)> + '_ {
        let start = self.rev_node_array[n as usize] as usize;
        let end = self.rev_node_array[n as usize + 1] as usize;
        self.rev_entries[start..end].iter().copied()
    }

    /// Debug-only post-construction check: every shortcut's two halves
    /// exist somewhere in the base graph (§4.B).
    fn check_shortcut_invariant(&self) -> bool {
        for n in 0..self.num_nodes() as u32 {
            for e in self.begin_edges(n)..self.end_edges(n) {
                let data = self.data(e);
                if !data.shortcut {
                    continue;
                }
                let via = data.via;
                let first_ok =
                    self.find_edge(n, via) != SPECIAL_EDGEID || self.find_edge(via, n) != SPECIAL_EDGEID;
                let second_ok = self.find_edge(via, data.target) != SPECIAL_EDGEID
                    || self.find_edge(data.target, via) != SPECIAL_EDGEID;
                if !first_ok || !second_ok {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(target: NodeId, weight: EdgeWeight) -> EdgeData {
        EdgeData::base(target, weight, weight * 10, true, false)
    }

    #[test]
    fn builds_offsets_from_unsorted_edges() {
        let edges = vec![
            (2, base(0, 5)),
            (0, base(1, 1)),
            (0, base(2, 2)),
            (1, base(2, 3)),
        ];
        let g = CsrGraph::build(3, edges);
        assert_eq!(g.num_nodes(), 3);
        assert_eq!(g.num_edges(), 4);
        assert_eq!(g.edges_of(0).len(), 2);
        assert_eq!(g.edges_of(1).len(), 1);
        assert_eq!(g.edges_of(2).len(), 1);
    }

    #[test]
    fn find_edge_is_special_when_absent() {
        let g = CsrGraph::build(2, vec![(0, base(1, 1))]);
        assert_eq!(g.find_edge(0, 1), 0);
        assert_eq!(g.find_edge(1, 0), SPECIAL_EDGEID);
    }

    #[test]
    fn incoming_edges_finds_true_predecessors_not_the_nodes_own_bucket() {
        // 0 -> 2 and 1 -> 2 are node 2's true incoming edges; node 2 itself
        // has no out-edges, so a lookup that (incorrectly) scanned node 2's
        // own bucket would find nothing.
        let edges = vec![(0, base(2, 1)), (1, base(2, 2))];
        let g = CsrGraph::build(3, edges);
        let mut sources: Vec<NodeId> = g.incoming_edges(2).map(|(source, _)| source).collect();
        sources.sort();
        assert_eq!(sources, vec![0, 1]);
        assert_eq!(g.incoming_edges(0).count(), 0);
        assert_eq!(g.incoming_edges(1).count(), 0);
    }

    #[test]
    fn shortcut_invariant_holds_for_valid_shortcut() {
        let mut shortcut = base(2, 3);
        shortcut.shortcut = true;
        shortcut.via = 1;
        let edges = vec![(0, base(1, 1)), (1, base(2, 2)), (0, shortcut)];
        let g = CsrGraph::build(3, edges);
        assert!(g.check_shortcut_invariant());
    }
}
