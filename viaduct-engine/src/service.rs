//! Request dispatch (§4.K).
//!
//! Each service is a plugin function `handle(params, facade) -> Result<_>`,
//! matching §4.K's `handle(params, facade) → result_or_error`; [`ModeData`]
//! is the facade, already exposing read-only access to (B,C,D,E,F,H). The
//! HTTP layer (`http::dispatch`) only parses the URI/query string into a
//! params record, calls one of these, and serializes the result — none of
//! the routing logic lives in the HTTP layer itself.

use viaduct_common::{Coordinate, EdgeId, Error, NodeId, Result};

use crate::annotate::{annotate, zero_length_route, AnnotatedEdge, RouteResult};
use crate::ch::ChIndex;
use crate::geo::haversine_distance_m;
use crate::loader::ModeData;
use crate::mode::Mode;
use crate::nodeindex::EdgeHint;
use crate::params::{IndexSelector, MatchParams, NearestParams, RouteParams, TableParams, TripParams};
use crate::search::{bidirectional_search, reconstruct_path, SearchScratch};

/// One snapped input coordinate, as returned in every service's `waypoints`
/// array.
#[derive(Debug, Clone, Copy)]
pub struct Waypoint {
    pub snapped: Coordinate,
    pub distance_to_input_m: f64,
    pub hint: EdgeHint,
}

fn snap_one(mode_data: &ModeData, coord: Coordinate) -> Result<Waypoint> {
    let hint = mode_data
        .nodes
        .nearest(coord.lon_degrees(), coord.lat_degrees())
        .ok_or_else(|| Error::no_segment(format!("coordinate ({}, {}) has no nearby segment", coord.lon_degrees(), coord.lat_degrees())))?;
    let distance_to_input_m = haversine_distance_m(coord, hint.snapped);
    Ok(Waypoint {
        snapped: hint.snapped,
        distance_to_input_m,
        hint,
    })
}

/// The phantom "terminals" a snap point contributes to a search: the
/// already-covered distance to each of the edge's real endpoints, one per
/// endpoint a search can actually reach from the phantom. A one-way edge
/// disables the endpoint behind it (`hint.reverse_segment`/`forward_segment`
/// carry that reachability), so such a phantom contributes only one
/// terminal rather than both.
fn phantom_terminals(ch: &ChIndex, hint: &EdgeHint) -> Vec<(NodeId, i32)> {
    let edge = ch.graph().data(ch.graph().find_edge(hint.node1, hint.node2));
    let to_node1 = (hint.offset * edge.weight as f64).round() as i32;
    let to_node2 = ((1.0 - hint.offset) * edge.weight as f64).round() as i32;
    let mut terminals = Vec::with_capacity(2);
    if hint.reverse_segment.enabled() {
        terminals.push((hint.reverse_segment.node(), to_node1));
    }
    if hint.forward_segment.enabled() {
        terminals.push((hint.forward_segment.node(), to_node2));
    }
    terminals
}

/// Runs one leg's search and unpacks the winning path into base edges, or
/// `None` for a zero-length leg (identical snap point on both ends).
fn search_leg(ch: &ChIndex, scratch: &mut SearchScratch, from: &Waypoint, to: &Waypoint) -> Result<Option<Vec<AnnotatedEdge>>> {
    if from.hint.node1 == to.hint.node1 && from.hint.node2 == to.hint.node2 && (from.hint.offset - to.hint.offset).abs() < 1e-9 {
        return Ok(None);
    }

    let sources = phantom_terminals(ch, &from.hint);
    let targets = phantom_terminals(ch, &to.hint);
    let result = bidirectional_search(ch, scratch, &sources, &targets)
        .ok_or_else(|| Error::no_route("no path connects the requested coordinates"))?;
    let path = reconstruct_path(scratch, result.meeting_node);
    Ok(Some(edges_along_path(ch, &path)))
}

/// Expands a node-id path into base edges by looking up (and unpacking) the
/// connecting edge between every consecutive pair. Each unpacked base edge
/// carries the `name_id` of the underlying graph edge it came from (§4.B),
/// threaded through shortcut unpacking by `ChIndex::unpack`.
fn edges_along_path(ch: &ChIndex, path: &[NodeId]) -> Vec<AnnotatedEdge> {
    let mut out = Vec::new();
    for pair in path.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let e: EdgeId = ch.graph().find_edge(a, b);
        debug_assert_ne!(e, viaduct_common::SPECIAL_EDGEID, "reconstructed path edge is missing from the graph");
        for base in ch.unpack(a, ch.graph().data(e)) {
            let name_id = base.name_id;
            out.push(AnnotatedEdge { edge: base, name_id });
        }
    }
    out
}

pub fn route(mode_data: &ModeData, mode: Mode, params: &RouteParams) -> Result<(Vec<Waypoint>, RouteResult)> {
    let waypoints: Vec<Waypoint> = params
        .base
        .coordinates
        .iter()
        .map(|&c| snap_one(mode_data, c))
        .collect::<Result<_>>()?;

    let mut scratch = SearchScratch::new(mode_data.ch.num_nodes());
    let mut all_edges: Vec<AnnotatedEdge> = Vec::new();
    for pair in waypoints.windows(2) {
        if let Some(mut leg) = search_leg(&mode_data.ch, &mut scratch, &pair[0], &pair[1])? {
            all_edges.append(&mut leg);
        }
    }

    let route = if all_edges.is_empty() {
        zero_length_route()
    } else {
        annotate(&all_edges, &mode_data.nodes, mode, &mode_data.names)
    };
    Ok((waypoints, route))
}

pub fn nearest(mode_data: &ModeData, params: &NearestParams) -> Result<Vec<Waypoint>> {
    let coord = params.base.coordinates[0];
    let hints = mode_data.nodes.nearest_k(coord.lon_degrees(), coord.lat_degrees(), params.number as usize);
    if hints.is_empty() {
        return Err(Error::no_segment("coordinate has no nearby segment"));
    }
    Ok(hints
        .into_iter()
        .map(|hint| Waypoint {
            snapped: hint.snapped,
            distance_to_input_m: haversine_distance_m(coord, hint.snapped),
            hint,
        })
        .collect())
}

/// A dense duration/distance matrix, `sources.len() x destinations.len()`,
/// row-major. `None` marks an unreachable pair.
pub struct TableResult {
    pub sources: Vec<Waypoint>,
    pub destinations: Vec<Waypoint>,
    pub durations_ds: Vec<Option<i32>>,
    pub distances_m: Vec<Option<f64>>,
}

pub fn table(mode_data: &ModeData, mode: Mode, params: &TableParams) -> Result<TableResult> {
    let waypoints: Vec<Waypoint> = params
        .base
        .coordinates
        .iter()
        .map(|&c| snap_one(mode_data, c))
        .collect::<Result<_>>()?;

    let source_idx = selected_indices(&params.sources, waypoints.len());
    let dest_idx = selected_indices(&params.destinations, waypoints.len());

    let sources: Vec<Waypoint> = source_idx.iter().map(|&i| waypoints[i]).collect();
    let destinations: Vec<Waypoint> = dest_idx.iter().map(|&i| waypoints[i]).collect();

    let mut scratch = SearchScratch::new(mode_data.ch.num_nodes());
    let mut durations_ds = Vec::with_capacity(sources.len() * destinations.len());
    let mut distances_m = Vec::with_capacity(sources.len() * destinations.len());

    for src in &sources {
        for dst in &destinations {
            match search_leg(&mode_data.ch, &mut scratch, src, dst)? {
                None => {
                    durations_ds.push(Some(0));
                    distances_m.push(Some(0.0));
                }
                Some(edges) => {
                    let route = annotate(&edges, &mode_data.nodes, mode, &mode_data.names);
                    durations_ds.push(Some(route.total_duration_ds));
                    distances_m.push(Some(route.total_distance_m));
                }
            }
        }
    }

    Ok(TableResult {
        sources,
        destinations,
        durations_ds,
        distances_m,
    })
}

fn selected_indices(selector: &IndexSelector, num_coords: usize) -> Vec<usize> {
    match selector {
        IndexSelector::All => (0..num_coords).collect(),
        IndexSelector::Subset(indices) => indices.clone(),
    }
}

/// `/trip` parses per §4.I but the trip solver plugin behind it is out of
/// scope (§3 Non-goals: "map-matching/trip solver *plugins*... the plugin
/// seam exists per §6, the solvers behind it do not").
pub fn trip(_mode_data: &ModeData, _params: &TripParams) -> Result<()> {
    Err(Error::new(viaduct_common::ErrorCode::NoTrip, "trip solver is not implemented"))
}

/// `/match` parses per §4.I but the map-matching plugin behind it is out of
/// scope, for the same reason as [`trip`].
pub fn map_match(_mode_data: &ModeData, _params: &MatchParams) -> Result<()> {
    Err(Error::new(viaduct_common::ErrorCode::NoMatch, "map matching is not implemented"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ch::ChIndex;
    use crate::graph::{CsrGraph, EdgeData};
    use crate::loader::ModeData;
    use crate::nametable::{Encoding, NameTableBuilder};
    use crate::nodeindex::NodeIndex;
    use crate::params::parse_route_params;

    fn mode_data_with_chain() -> ModeData {
        let edges = vec![
            (0u32, EdgeData::base(1, 100, 1000, true, true)),
            (1, EdgeData::base(2, 100, 1000, true, true)),
        ];
        let graph = CsrGraph::build(3, edges);
        let ch = ChIndex::new(graph);
        let coords = vec![
            Coordinate::from_degrees(13.0, 52.0),
            Coordinate::from_degrees(13.001, 52.0),
            Coordinate::from_degrees(13.002, 52.0),
        ];
        let nodes = NodeIndex::build(coords, &[(0, 0, 1, true, true), (1, 1, 2, true, true)]);
        let names = NameTableBuilder::new().build(Encoding::Fixed).unwrap();
        ModeData {
            ch,
            nodes,
            names,
            mlp: None,
            cells: None,
            duration_metric: None,
        }
    }

    #[test]
    fn routes_between_snapped_endpoints() {
        let mode_data = mode_data_with_chain();
        let coords = vec![
            Coordinate::from_degrees(13.0, 52.0),
            Coordinate::from_degrees(13.002, 52.0),
        ];
        let params = parse_route_params(&coords, "").unwrap();
        let (waypoints, result) = route(&mode_data, Mode::Car, &params).unwrap();
        assert_eq!(waypoints.len(), 2);
        assert!(result.total_distance_m > 0.0);
    }

    #[test]
    fn zero_length_route_for_identical_endpoints() {
        let mode_data = mode_data_with_chain();
        let coords = vec![Coordinate::from_degrees(13.0, 52.0), Coordinate::from_degrees(13.0, 52.0)];
        let params = parse_route_params(&coords, "").unwrap();
        let (_, result) = route(&mode_data, Mode::Car, &params).unwrap();
        assert_eq!(result.total_distance_m, 0.0);
    }

    #[test]
    fn trip_and_match_report_unimplemented() {
        let mode_data = mode_data_with_chain();
        let coords = vec![
            Coordinate::from_degrees(13.0, 52.0),
            Coordinate::from_degrees(13.002, 52.0),
        ];
        let trip_params = crate::params::parse_trip_params(&coords, "").unwrap();
        let err = trip(&mode_data, &trip_params).unwrap_err();
        assert_eq!(err.code, viaduct_common::ErrorCode::NoTrip);

        let match_params = crate::params::parse_match_params(&coords, "timestamps=0;1").unwrap();
        let err = map_match(&mode_data, &match_params).unwrap_err();
        assert_eq!(err.code, viaduct_common::ErrorCode::NoMatch);
    }
}
