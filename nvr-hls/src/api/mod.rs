//! HTTP API.
//!
//! Thin dispatch onto the stream supervisor, plus static serving of the HLS
//! output directory.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
