//! Viaduct: contraction-hierarchies / multi-level-partition street router.
//!
//! Pipeline (mirrors §2's data-flow note: one load produces every other
//! structure, either from disk or by re-deriving it):
//! - §4.A `container` — tar-framed binary container (fingerprint, named
//!   blocks, little-endian arrays).
//! - §4.B/C `graph`, `nodeindex` — the CSR base graph and its R-tree
//!   nearest-edge index.
//! - §4.D `ch` — Contraction-Hierarchies shortcut index and unpacker.
//! - §4.E/F `mlp`, `cellstore` — the Multi-Level Partition and its
//!   per-cell metric tables, recomputed at load time rather than persisted.
//! - §4.G `search` — the bidirectional Dijkstra core, generic over a
//!   successor oracle (CH or the MLP cell-metric overlay).
//! - §4.H `annotate` — turns an unpacked path into route steps.
//! - §4.I `params` — the query-string parameter grammar.
//! - §4.K `service` — the per-service plugin layer (route/nearest/table/
//!   trip/match) that ties the above together behind a read-only facade.
//! - §4.J/K `http` — the axum-based HTTP surface over `service`.
//!
//! `loader` is the seam between the container and everything above it:
//! it reconstructs the graph/partition/name table from disk and derives
//! cell storage and metrics in memory, per §2's data-flow rule.

pub mod annotate;
pub mod cellstore;
pub mod ch;
pub mod container;
pub mod elevation;
pub mod geo;
pub mod graph;
pub mod http;
pub mod loader;
pub mod mlp;
pub mod mode;
pub mod nametable;
pub mod nodeindex;
pub mod params;
pub mod search;
pub mod service;

pub use loader::ModeData;
pub use mode::Mode;
