//! Shared primitives for the viaduct routing engine.
//!
//! Everything here is a value type with no I/O: coordinates, node/edge ids,
//! weight/duration newtypes, and the error taxonomy of the HTTP surface.
//! Library-level code uses `thiserror` throughout; `anyhow` is reserved for
//! the server binary's CLI boundary.

pub mod coordinate;
pub mod error;
pub mod ids;

pub use coordinate::{parse_fixed_degrees, Coordinate};
pub use error::{Error, ErrorCode, Result};
pub use ids::{
    EdgeDistance, EdgeDuration, EdgeId, EdgeWeight, GeometryId, NodeId, SegmentId, INVALID_EDGE_WEIGHT, SPECIAL_EDGEID, SPECIAL_NODEID,
};
