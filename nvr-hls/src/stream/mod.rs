//! Per-channel RTSP to HLS transcoding.

pub mod command;
pub mod handle;
pub mod layout;
pub mod output;
pub mod process;
pub mod source;
pub mod supervisor;

pub use handle::{StreamInfo, StreamState};
pub use layout::HlsLayout;
pub use supervisor::{StartOutcome, StopOutcome, StreamStatus, StreamSupervisor, SupervisorEvent};
