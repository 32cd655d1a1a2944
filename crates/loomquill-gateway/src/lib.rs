//! HTTP Surface (spec §4.K): axum router over the Generation Pipeline,
//! Librarian Scheduler, Active-Agent Registry, and Fragment Store.

pub mod error;
pub mod ndjson;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
