//! Aftercare API crate - axum HTTP surface over the support controller.
//!
//! Exposes session creation, turns, session read-out, closing and a health
//! check. The surface carries no authentication.

pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
