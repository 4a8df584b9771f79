//! HTTP surface: listener audio endpoints plus the admin JSON API.

pub mod routes;

pub use routes::{build_router, AdminState};
