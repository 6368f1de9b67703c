// ABOUTME: HTTP server for flock, exposing backup, restore, and export over a JSON API.
// ABOUTME: Uses Axum with bearer auth attaching the calling Principal to each request.

pub mod api;
pub mod app_state;
pub mod auth;
pub mod config;
pub mod routes;

pub use app_state::{AppState, SharedState};
pub use auth::AuthLayer;
pub use config::{ConfigError, FlockConfig};
pub use routes::create_router;
