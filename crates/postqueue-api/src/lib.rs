//! Postqueue HTTP and websocket surface
//!
//! Thin axum adapters over the core scheduler facade: JSON endpoints for job
//! CRUD and scheduler lifecycle, plus the room-scoped websocket feed.

pub mod response;
pub mod routes;
pub mod serialize;
pub mod server;
pub mod state;

pub use server::{build_router, run};
pub use state::AppState;
