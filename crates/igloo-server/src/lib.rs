//! Igloo server: the host process around the signing broker.
//!
//! Wires the blob store, session store, request queue, relay pool, auth
//! gateway, and broker core together and exposes them to the operator over
//! a JSON HTTP API. The library crate exists so the routes can be driven
//! in-process by the test suite; `main.rs` is a thin shell around
//! [`state::build`] and [`routes::router`].

pub mod config;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use routes::router;
pub use state::{build, AppState, StartupError};
