//! Bidirectional search core (§4.G).
//!
//! Generic over a successor oracle — the CH index or the MLP cell-metric
//! overlay — so the same forward/reverse Dijkstra loop serves both
//! acceleration structures. Distance/parent/version arrays are owned by a
//! [`SearchScratch`] reused across queries: resetting them lazily via a
//! per-slot generation tag avoids an O(N) clear on every call, which is the
//! whole point of keeping this struct around rather than allocating fresh
//! vectors per query (grounded in the teacher's `NbgChQuery`, which keeps
//! exactly this fwd/bwd distance + version-tag shape as instance fields).

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use viaduct_common::{EdgeDuration, EdgeWeight, NodeId, INVALID_EDGE_WEIGHT, SPECIAL_NODEID};

use crate::cellstore::{CellStore, MetricSet};
use crate::ch::ChIndex;
use crate::mlp::MultiLevelPartition;

/// A source of out-edges for the search core, abstracting over which
/// acceleration index supplies them (§4.G: "Parametric over which index
/// (D or E+F) supplies successors").
pub trait SuccessorOracle {
    /// Out-edges usable from `node` in the given direction. `reverse=true`
    /// asks for the reverse-search adjacency (edges traversable
    /// target→source).
    fn successors(&self, node: NodeId, reverse: bool) -> Vec<(NodeId, EdgeWeight, EdgeDuration)>;

    /// Incoming edges into `node` from the *same* direction's allowed set,
    /// used by stall-on-demand. An oracle that does not support stalling
    /// (the MLP overlay) returns nothing.
    fn stall_incoming(&self, _node: NodeId, _reverse: bool) -> Vec<(NodeId, EdgeWeight)> {
        Vec::new()
    }

    fn supports_stall(&self) -> bool {
        false
    }
}

impl SuccessorOracle for ChIndex {
    fn successors(&self, node: NodeId, reverse: bool) -> Vec<(NodeId, EdgeWeight, EdgeDuration)> {
        if reverse {
            self.backward_edges(node)
                .map(|(_, e)| (e.target, e.weight, e.duration))
                .collect()
        } else {
            self.forward_edges(node)
                .map(|(_, e)| (e.target, e.weight, e.duration))
                .collect()
        }
    }

    fn stall_incoming(&self, node: NodeId, reverse: bool) -> Vec<(NodeId, EdgeWeight)> {
        // An incoming edge (v, node) in the forward-allowed set is exactly
        // a backward-direction out-edge from `node` (the graph is stored
        // as forward adjacency only).
        if reverse {
            self.forward_edges(node).map(|(_, e)| (e.target, e.weight)).collect()
        } else {
            self.backward_edges(node).map(|(_, e)| (e.target, e.weight)).collect()
        }
    }

    fn supports_stall(&self) -> bool {
        true
    }
}

/// Overlays the base graph with cell-metric shortcut edges at every level a
/// node is a boundary of. Real edges are always present so the union graph
/// has identical shortest-path distances to the base graph (§8 invariant
/// 1); the shortcuts let bidirectional search terminate early without
/// requiring the stronger stall-on-demand pruning CH uses.
pub struct MlpOracle<'a> {
    graph: &'a ChIndex,
    mlp: &'a MultiLevelPartition,
    cells: &'a CellStore,
    metrics: &'a MetricSet,
}

impl<'a> MlpOracle<'a> {
    pub fn new(graph: &'a ChIndex, mlp: &'a MultiLevelPartition, cells: &'a CellStore, metrics: &'a MetricSet) -> Self {
        MlpOracle { graph, mlp, cells, metrics }
    }
}

impl SuccessorOracle for MlpOracle<'_> {
    fn successors(&self, node: NodeId, reverse: bool) -> Vec<(NodeId, EdgeWeight, EdgeDuration)> {
        let mut out: Vec<(NodeId, EdgeWeight, EdgeDuration)> = if reverse {
            self.graph
                .backward_edges(node)
                .map(|(_, e)| (e.target, e.weight, e.duration))
                .collect()
        } else {
            self.graph
                .forward_edges(node)
                .map(|(_, e)| (e.target, e.weight, e.duration))
                .collect()
        };

        for level in 0..self.mlp.num_levels() {
            let cell = self.mlp.cell(level, node);
            let boundaries = self.cells.boundaries(level, cell);
            let Some(s_idx) = boundaries.source_boundary.iter().position(|&n| n == node) else {
                continue;
            };
            let metric = self.metrics.metric(level, cell);
            for (d_idx, &dest) in boundaries.destination_boundary.iter().enumerate() {
                let w = metric.weight(s_idx, d_idx);
                if w != INVALID_EDGE_WEIGHT && dest != node {
                    out.push((dest, w, metric.duration(s_idx, d_idx)));
                }
            }
        }
        out
    }
}

/// Lazily-reset per-connection scratch for one search. `version[n] ==
/// current_version` means `dist[n]`/`parent[n]` hold live data for the
/// current query; anything else is treated as `+∞` without being written.
pub struct SearchScratch {
    forward_dist: Vec<EdgeWeight>,
    backward_dist: Vec<EdgeWeight>,
    forward_parent: Vec<NodeId>,
    backward_parent: Vec<NodeId>,
    forward_version: Vec<u32>,
    backward_version: Vec<u32>,
    current_version: u32,
}

impl SearchScratch {
    pub fn new(num_nodes: usize) -> Self {
        SearchScratch {
            forward_dist: vec![INVALID_EDGE_WEIGHT; num_nodes],
            backward_dist: vec![INVALID_EDGE_WEIGHT; num_nodes],
            forward_parent: vec![SPECIAL_NODEID; num_nodes],
            backward_parent: vec![SPECIAL_NODEID; num_nodes],
            forward_version: vec![0; num_nodes],
            backward_version: vec![0; num_nodes],
            current_version: 0,
        }
    }

    /// Starts a fresh query: bumps the generation tag instead of clearing
    /// the distance arrays.
    fn begin_query(&mut self) {
        self.current_version = self.current_version.wrapping_add(1);
        if self.current_version == 0 {
            // Wrapped back to the sentinel; the O(N) clear below only ever
            // happens once every 2^32 queries.
            self.forward_version.fill(0);
            self.backward_version.fill(0);
            self.current_version = 1;
        }
    }

    fn dist(&self, node: NodeId, reverse: bool) -> EdgeWeight {
        let (version, dist) = if reverse {
            (&self.backward_version, &self.backward_dist)
        } else {
            (&self.forward_version, &self.forward_dist)
        };
        if version[node as usize] == self.current_version {
            dist[node as usize]
        } else {
            INVALID_EDGE_WEIGHT
        }
    }

    fn set(&mut self, node: NodeId, reverse: bool, dist: EdgeWeight, parent: NodeId) {
        if reverse {
            self.backward_dist[node as usize] = dist;
            self.backward_parent[node as usize] = parent;
            self.backward_version[node as usize] = self.current_version;
        } else {
            self.forward_dist[node as usize] = dist;
            self.forward_parent[node as usize] = parent;
            self.forward_version[node as usize] = self.current_version;
        }
    }
}

/// The outcome of a bidirectional search: total weight and the meeting
/// node, from which both directions' parent chains reconstruct the path.
#[derive(Debug, Clone, Copy)]
pub struct SearchResult {
    pub weight: EdgeWeight,
    pub meeting_node: NodeId,
}

/// Runs bidirectional Dijkstra (§4.G) from `sources` to `targets`, each a
/// list of `(node, initial_weight)` pairs — phantom endpoints seed both
/// real endpoints of their edge, pre-weighted by the offset along it.
pub fn bidirectional_search<O: SuccessorOracle>(
    oracle: &O,
    scratch: &mut SearchScratch,
    sources: &[(NodeId, EdgeWeight)],
    targets: &[(NodeId, EdgeWeight)],
) -> Option<SearchResult> {
    scratch.begin_query();

    let mut forward_queue: BinaryHeap<Reverse<(EdgeWeight, NodeId)>> = BinaryHeap::new();
    let mut backward_queue: BinaryHeap<Reverse<(EdgeWeight, NodeId)>> = BinaryHeap::new();

    for &(node, weight) in sources {
        scratch.set(node, false, weight, SPECIAL_NODEID);
        forward_queue.push(Reverse((weight, node)));
    }
    for &(node, weight) in targets {
        scratch.set(node, true, weight, SPECIAL_NODEID);
        backward_queue.push(Reverse((weight, node)));
    }

    let mut best_weight = INVALID_EDGE_WEIGHT;
    let mut best_meeting_node = SPECIAL_NODEID;

    loop {
        let forward_top = forward_queue.peek().map(|Reverse((w, _))| *w);
        let backward_top = backward_queue.peek().map(|Reverse((w, _))| *w);

        let settle_forward = match (forward_top, backward_top) {
            (Some(f), Some(b)) => f <= b,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };

        let queue_top = if settle_forward { forward_top } else { backward_top };
        if let Some(top) = queue_top {
            if best_weight != INVALID_EDGE_WEIGHT && top > best_weight {
                break;
            }
        }

        if settle_forward {
            let Reverse((d, u)) = forward_queue.pop().unwrap();
            if d != scratch.dist(u, false) {
                continue;
            }
            let other = scratch.dist(u, true);
            if other != INVALID_EDGE_WEIGHT {
                let total = d.saturating_add(other);
                if best_weight == INVALID_EDGE_WEIGHT || total < best_weight {
                    best_weight = total;
                    best_meeting_node = u;
                }
            }

            if oracle.supports_stall() && is_stalled(oracle, scratch, u, d, false) {
                continue;
            }

            for (v, w, _duration) in oracle.successors(u, false) {
                let nd = d.saturating_add(w);
                if scratch.dist(v, false) == INVALID_EDGE_WEIGHT || nd < scratch.dist(v, false) {
                    scratch.set(v, false, nd, u);
                    forward_queue.push(Reverse((nd, v)));
                }
            }
        } else {
            let Reverse((d, u)) = backward_queue.pop().unwrap();
            if d != scratch.dist(u, true) {
                continue;
            }
            let other = scratch.dist(u, false);
            if other != INVALID_EDGE_WEIGHT {
                let total = d.saturating_add(other);
                if best_weight == INVALID_EDGE_WEIGHT || total < best_weight {
                    best_weight = total;
                    best_meeting_node = u;
                }
            }

            if oracle.supports_stall() && is_stalled(oracle, scratch, u, d, true) {
                continue;
            }

            for (v, w, _duration) in oracle.successors(u, true) {
                let nd = d.saturating_add(w);
                if scratch.dist(v, true) == INVALID_EDGE_WEIGHT || nd < scratch.dist(v, true) {
                    scratch.set(v, true, nd, u);
                    backward_queue.push(Reverse((nd, v)));
                }
            }
        }
    }

    if best_meeting_node == SPECIAL_NODEID {
        None
    } else {
        Some(SearchResult {
            weight: best_weight,
            meeting_node: best_meeting_node,
        })
    }
}

/// Stall-on-demand: skip relaxing out of `u` if some incoming edge proves a
/// strictly shorter path into `u` already exists.
fn is_stalled<O: SuccessorOracle>(oracle: &O, scratch: &SearchScratch, u: NodeId, dist_u: EdgeWeight, reverse: bool) -> bool {
    for (v, w) in oracle.stall_incoming(u, reverse) {
        let dv = scratch.dist(v, reverse);
        if dv != INVALID_EDGE_WEIGHT && dv.saturating_add(w) < dist_u {
            return true;
        }
    }
    false
}

/// Reconstructs the forward-prefix then reverse-suffix node sequence from
/// a completed search's scratch state.
pub fn reconstruct_path(scratch: &SearchScratch, meeting_node: NodeId) -> Vec<NodeId> {
    let mut forward_prefix = Vec::new();
    let mut node = meeting_node;
    loop {
        forward_prefix.push(node);
        let parent = scratch.forward_parent[node as usize];
        if parent == SPECIAL_NODEID {
            break;
        }
        node = parent;
    }
    forward_prefix.reverse();

    let mut reverse_suffix = Vec::new();
    let mut node = meeting_node;
    loop {
        let parent = scratch.backward_parent[node as usize];
        if parent == SPECIAL_NODEID {
            break;
        }
        reverse_suffix.push(parent);
        node = parent;
    }

    forward_prefix.extend(reverse_suffix);
    forward_prefix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cellstore::{customize, CellStore};
    use crate::graph::{CsrGraph, EdgeData};
    use crate::mlp::{LevelData, MultiLevelPartition};

    fn chain_ch() -> ChIndex {
        let edges = vec![
            (0, EdgeData::base(1, 2, 20, true, true)),
            (1, EdgeData::base(2, 3, 30, true, true)),
            (2, EdgeData::base(3, 4, 40, true, true)),
        ];
        ChIndex::new(CsrGraph::build(4, edges))
    }

    #[test]
    fn finds_shortest_distance_over_ch() {
        let ch = chain_ch();
        let mut scratch = SearchScratch::new(ch.num_nodes());
        let result = bidirectional_search(&ch, &mut scratch, &[(0, 0)], &[(3, 0)]).unwrap();
        assert_eq!(result.weight, 9);
    }

    #[test]
    fn zero_length_route_when_endpoints_match() {
        let ch = chain_ch();
        let mut scratch = SearchScratch::new(ch.num_nodes());
        let result = bidirectional_search(&ch, &mut scratch, &[(1, 0)], &[(1, 0)]).unwrap();
        assert_eq!(result.weight, 0);
        assert_eq!(result.meeting_node, 1);
    }

    #[test]
    fn reconstructs_full_path() {
        let ch = chain_ch();
        let mut scratch = SearchScratch::new(ch.num_nodes());
        let result = bidirectional_search(&ch, &mut scratch, &[(0, 0)], &[(3, 0)]).unwrap();
        let path = reconstruct_path(&scratch, result.meeting_node);
        assert_eq!(path.first(), Some(&0));
        assert_eq!(path.last(), Some(&3));
    }

    #[test]
    fn scratch_reuse_does_not_leak_state_across_queries() {
        let ch = chain_ch();
        let mut scratch = SearchScratch::new(ch.num_nodes());
        bidirectional_search(&ch, &mut scratch, &[(0, 0)], &[(2, 0)]).unwrap();
        // A second query from a disjoint pair must not see the first
        // query's distances.
        let result = bidirectional_search(&ch, &mut scratch, &[(1, 0)], &[(3, 0)]).unwrap();
        assert_eq!(result.weight, 7);
    }

    #[test]
    fn mlp_oracle_reaches_the_same_distance_as_the_base_ch() {
        let ch = chain_ch();
        let level_data = LevelData::new(&[2]).unwrap();
        let partition = MultiLevelPartition::new(level_data, vec![0, 0, 1, 1]);
        let cells = CellStore::derive(&partition, &ch);
        let metrics = customize("duration", &ch, &partition, &cells);
        let oracle = MlpOracle::new(&ch, &partition, &cells, &metrics);

        let mut scratch = SearchScratch::new(ch.num_nodes());
        let plain = bidirectional_search(&ch, &mut scratch, &[(0, 0)], &[(3, 0)]).unwrap();

        let mut scratch = SearchScratch::new(ch.num_nodes());
        let overlaid = bidirectional_search(&oracle, &mut scratch, &[(0, 0)], &[(3, 0)]).unwrap();

        assert_eq!(overlaid.weight, plain.weight);
    }
}
