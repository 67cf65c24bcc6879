//! Registry entries for running transcoders.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::stream::process::ProcessControl;

/// Lifecycle state of a transcoder process.
///
/// `Starting -> Running -> Stopping -> (removed)`, or `Running -> Exited`
/// when the process dies on its own. `Failed` is only ever observed on a
/// handle that never made it into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Starting,
    Running,
    Stopping,
    Exited,
    Failed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Exited => "exited",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Snapshot of a registry entry, safe to hand out.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub channel: u32,
    pub stream_type: u32,
    pub pid: Option<u32>,
    pub state: StreamState,
    pub started_at: DateTime<Utc>,
    pub hls_url: String,
}

/// One supervised transcoder.
///
/// The `Child` itself lives in the waiter task; the handle only keeps the
/// control endpoint, which is taken exactly once when the process is stopped.
#[derive(Debug)]
pub struct ProcessHandle {
    pub channel: u32,
    pub stream_type: u32,
    /// Distinguishes this process from earlier ones on the same channel.
    pub generation: u64,
    pub pid: Option<u32>,
    pub state: StreamState,
    pub started_at: DateTime<Utc>,
    pub hls_url: String,
    control: Option<ProcessControl>,
}

impl ProcessHandle {
    pub fn new(channel: u32, stream_type: u32, generation: u64, hls_url: String) -> Self {
        Self {
            channel,
            stream_type,
            generation,
            pid: None,
            state: StreamState::Starting,
            started_at: Utc::now(),
            hls_url,
            control: None,
        }
    }

    pub fn mark_running(&mut self, pid: Option<u32>) {
        self.pid = pid;
        self.state = StreamState::Running;
    }

    pub fn attach_control(&mut self, control: ProcessControl) {
        self.control = Some(control);
    }

    pub fn mark_failed(&mut self) {
        self.state = StreamState::Failed;
    }

    pub fn mark_exited(&mut self) {
        self.control = None;
        self.state = StreamState::Exited;
    }

    /// Take the control endpoint and move to `Stopping`.
    pub fn begin_stop(&mut self) -> Option<ProcessControl> {
        self.state = StreamState::Stopping;
        self.control.take()
    }

    pub fn info(&self) -> StreamInfo {
        StreamInfo {
            channel: self.channel,
            stream_type: self.stream_type,
            pid: self.pid,
            state: self.state,
            started_at: self.started_at,
            hls_url: self.hls_url.clone(),
        }
    }
}
