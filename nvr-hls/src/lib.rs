//! Republishes NVR camera feeds as HLS.
//!
//! One ffmpeg process per requested channel pulls the RTSP feed and writes a
//! rolling HLS playlist into a shared output directory, which the HTTP API
//! serves alongside the start/stop/status endpoints.

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod panic_hook;
pub mod stream;
pub mod utils;

pub use error::{Error, Result};
