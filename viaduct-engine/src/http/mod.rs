//! HTTP surface (§4.J, §4.K): a thin axum adapter over [`crate::service`].

pub mod dispatch;
pub mod keepalive;
pub mod server;
pub mod state;

pub use server::{build_router, serve};
pub use state::ServerState;
