//! # Valet Gateway
//! Admin HTTP API: bot lifecycle control, worker supervision, config
//! editing, plus a reverse proxy that forwards `/app` traffic to the
//! supervised worker process.

pub mod proxy;
pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
