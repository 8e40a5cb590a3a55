//! Route annotation (§4.H).
//!
//! Turns an unpacked base-edge sequence into an ordered list of steps:
//! distance, duration, bearings, the turn instruction, and the segment's
//! road name. Consecutive segments that share a name and carry no turn
//! other than `Continue`/`NewName` may be collapsed (`necessary=false`).

use serde::Serialize;
use viaduct_common::{EdgeDuration, NodeId};

use crate::ch::BaseEdge;
use crate::geo::{bearing_degrees, haversine_distance_m};
use crate::mode::Mode;
use crate::nametable::NameTable;
use crate::nodeindex::NodeIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TurnType {
    NoTurn,
    Continue,
    Turn,
    NewName,
    Ramp,
    Merge,
    Fork,
    EndOfRoad,
    Restriction,
    Notification,
    EnterRoundabout,
    LeaveRoundabout,
    StayOnRoundabout,
    UseLane,
    Suppressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TurnModifier {
    UTurn,
    SharpRight,
    Right,
    SlightRight,
    Straight,
    SlightLeft,
    Left,
    SharpLeft,
}

/// Classifies a signed turn angle (normalized to `[0,360)`) into a
/// modifier, per the documented angle bins in §4.H.
pub fn classify_modifier(angle_degrees: f64) -> TurnModifier {
    let angle = angle_degrees.rem_euclid(360.0);
    match angle {
        a if (0.0..60.0).contains(&a) => TurnModifier::SharpRight,
        a if (60.0..140.0).contains(&a) => TurnModifier::Right,
        a if (140.0..170.0).contains(&a) => TurnModifier::SlightRight,
        a if (170.0..=190.0).contains(&a) => TurnModifier::Straight,
        a if a > 190.0 && a <= 220.0 => TurnModifier::SlightLeft,
        a if a > 220.0 && a <= 300.0 => TurnModifier::Left,
        a if a > 300.0 && a < 360.0 => TurnModifier::SharpLeft,
        _ => TurnModifier::UTurn,
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TurnInstruction {
    #[serde(rename = "type")]
    pub turn_type: TurnType,
    pub modifier: TurnModifier,
}

#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    pub name_id: u32,
    /// The road name `name_id` resolves to in the mode's name table, empty
    /// for `name_id == 0` ("unnamed").
    pub name: String,
    pub length_m: f64,
    pub duration_ds: EdgeDuration,
    pub travel_mode: Mode,
    pub turn_instruction: TurnInstruction,
    pub bearing_pre: f64,
    pub bearing_post: f64,
    pub necessary: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteResult {
    pub segments: Vec<Segment>,
    pub total_distance_m: f64,
    pub total_duration_ds: EdgeDuration,
}

/// One base edge annotated with the `NameID` it carries; the route core
/// supplies this alongside the path since name assignment lives on the
/// original graph edges, not the unpacked `BaseEdge` value (which only
/// carries weight/duration).
pub struct AnnotatedEdge {
    pub edge: BaseEdge,
    pub name_id: u32,
}

/// Produces the ordered segment list for a path, given the node
/// coordinates it visits via `nodes`. Road names are resolved against
/// `names`; an edge whose `name_id` falls outside the table (including the
/// convention `name_id == 0` on an empty table) reports an empty name
/// rather than `NameTable::at`'s index-out-of-range panic, since an
/// unnamed edge is a normal occurrence, not a corrupt one.
pub fn annotate(edges: &[AnnotatedEdge], nodes: &NodeIndex, mode: Mode, names: &NameTable) -> RouteResult {
    let mut segments = Vec::with_capacity(edges.len());
    let mut total_distance = 0.0;
    let mut total_duration: EdgeDuration = 0;

    let coord_of = |n: NodeId| nodes.coord(n);

    for (i, annotated) in edges.iter().enumerate() {
        let from = coord_of(annotated.edge.from);
        let to = coord_of(annotated.edge.to);
        let length_m = haversine_distance_m(from, to);
        let bearing_post = bearing_degrees(from, to);
        let bearing_pre = if i == 0 {
            bearing_post
        } else {
            let prev = coord_of(edges[i - 1].edge.from);
            bearing_degrees(prev, from)
        };

        let turn_type = if i == 0 {
            TurnType::NoTurn
        } else if edges[i - 1].name_id == annotated.name_id {
            TurnType::Continue
        } else {
            TurnType::NewName
        };
        let modifier = classify_modifier(bearing_post - bearing_pre);

        let necessary = turn_type != TurnType::Continue;
        let name = if (annotated.name_id as usize) < names.len() {
            names.at(annotated.name_id).to_string()
        } else {
            String::new()
        };

        segments.push(Segment {
            name_id: annotated.name_id,
            name,
            length_m,
            duration_ds: annotated.edge.duration,
            travel_mode: mode,
            turn_instruction: TurnInstruction { turn_type, modifier },
            bearing_pre,
            bearing_post,
            necessary,
        });

        total_distance += length_m;
        total_duration += annotated.edge.duration;
    }

    // The very first and last segments always carry geometry that matters
    // for phantom snapping, even if collapsed elsewhere.
    if let Some(first) = segments.first_mut() {
        first.necessary = true;
    }
    if let Some(last) = segments.last_mut() {
        last.necessary = true;
    }

    RouteResult {
        segments,
        total_distance_m: total_distance,
        total_duration_ds: total_duration,
    }
}

/// Coordinate-level convenience used for zero-length routes (§8 boundary
/// behavior: identical endpoints yield `routes[0].distance == 0`).
pub fn zero_length_route() -> RouteResult {
    RouteResult {
        segments: Vec::new(),
        total_distance_m: 0.0,
        total_duration_ds: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_straight_ahead() {
        assert_eq!(classify_modifier(180.0), TurnModifier::Straight);
    }

    #[test]
    fn classifies_sharp_right_near_zero() {
        assert_eq!(classify_modifier(10.0), TurnModifier::SharpRight);
    }

    #[test]
    fn classifies_left_and_uturn_boundaries() {
        assert_eq!(classify_modifier(250.0), TurnModifier::Left);
        assert_eq!(classify_modifier(0.0), TurnModifier::SharpRight);
        assert_eq!(classify_modifier(359.9), TurnModifier::UTurn);
    }

    #[test]
    fn zero_length_route_has_no_segments_and_zero_distance() {
        let route = zero_length_route();
        assert!(route.segments.is_empty());
        assert_eq!(route.total_distance_m, 0.0);
    }
}
