//! HTTP API handlers for pictor-mi

pub mod health;
pub mod import;
pub mod upload;

pub use health::health_routes;
pub use import::import_routes;
pub use upload::upload_routes;
