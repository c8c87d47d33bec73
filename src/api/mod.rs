//! HTTP API for health, metrics and mention data.

pub mod handlers;
pub mod routes;

pub use handlers::AppState;
pub use routes::create_router;
