//! HTTP surface: axum router, proxy handler, admin endpoints.

pub mod admin;
pub mod handler;
pub mod routes;
pub mod server;

pub use routes::{Resolved, RouteTable};
pub use server::{
    build_router, spawn_config_reloader, start_server, AppState, ADMIN_PREFIX,
};
