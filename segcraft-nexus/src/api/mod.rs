//! HTTP status surface
//!
//! Read-only: fabrication is driven by the supervisor, never by requests.

pub mod chains;
pub mod health;

pub use chains::chain_routes;
pub use health::health_routes;
