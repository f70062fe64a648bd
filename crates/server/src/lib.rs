//! HTTP boundary and process wiring for the mediagrab job service.

pub mod api;
pub mod metrics;
pub mod state;

pub use api::create_router;
pub use state::AppState;
