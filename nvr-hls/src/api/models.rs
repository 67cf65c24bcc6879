//! Request and response bodies.

use serde::{Deserialize, Serialize};

use crate::stream::StreamInfo;

/// Query string of the start endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartStreamQuery {
    /// Sub-stream index on the NVR (0 = main, 1 = sub).
    #[serde(default)]
    pub stream_type: u32,
}

/// Response of the start endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartStreamResponse {
    pub message: String,
    pub hls_url: String,
    pub already_running: bool,
}

/// Response of the stop endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopStreamResponse {
    pub message: String,
    pub was_running: bool,
}

/// Response of the list endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StreamListResponse {
    pub streams: Vec<StreamInfo>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub active_streams: usize,
}

/// Current or requested log filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFilterBody {
    pub filter: String,
}
