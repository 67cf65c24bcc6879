//! Stream supervisor.
//!
//! Owns the registry of running transcoders (at most one per channel) and
//! implements the Start / Stop / Status operations exposed over HTTP.
//!
//! Start and Stop for the same channel are serialized by a per-channel async
//! lock held for the whole operation, including the wait for the process to
//! exit. Operations on different channels never wait on each other.
//!
//! Unexpected process exits are reported by the waiter tasks to a single
//! reaper task, which drops the stale registry entry so Status stops
//! reporting the channel as streaming.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{HlsSettings, RtspSettings};
use crate::stream::command::TranscodeCommand;
use crate::stream::handle::{ProcessHandle, StreamInfo};
use crate::stream::layout::{CleanupReport, HlsLayout};
use crate::stream::output::spawn_forwarders;
use crate::stream::process::{ExitNotice, TerminateMode, spawn_process_waiter};
use crate::stream::source::StreamSource;
use crate::{Error, Result};

/// Events emitted by the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    /// A transcoder was spawned.
    Started { channel: u32, pid: Option<u32> },
    /// A transcoder was stopped on request.
    Stopped {
        channel: u32,
        exit_code: Option<i32>,
        forced: bool,
    },
    /// A transcoder exited without being asked to.
    Exited { channel: u32, exit_code: Option<i32> },
    /// An artifact could not be deleted.
    CleanupFailed {
        channel: u32,
        path: String,
        error: String,
    },
}

/// Result of a Start request.
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Started(StreamInfo),
    /// A process was already registered for the channel; nothing was spawned.
    AlreadyRunning(StreamInfo),
}

impl StartOutcome {
    pub fn info(&self) -> &StreamInfo {
        match self {
            Self::Started(info) | Self::AlreadyRunning(info) => info,
        }
    }
}

/// Result of a Stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { exit_code: Option<i32>, forced: bool },
    NotRunning,
}

/// Answer to a Status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    pub channel: u32,
    pub is_streaming: bool,
    pub hls_url: Option<String>,
}

type ChannelLocks = DashMap<u32, Arc<Mutex<()>>>;

/// Holds a channel's lock for the duration of one operation.
///
/// On drop the lock entry is removed again unless another task is waiting on
/// it, so the map only ever holds channels with an operation in flight.
struct ChannelGuard<'a> {
    channel: u32,
    locks: &'a ChannelLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ChannelGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.channel, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Supervises one ffmpeg process per active channel.
pub struct StreamSupervisor {
    rtsp: RtspSettings,
    hls: HlsSettings,
    layout: HlsLayout,
    /// Active transcoders keyed by channel.
    registry: Arc<DashMap<u32, ProcessHandle>>,
    /// Serializes Start/Stop per channel.
    channel_locks: ChannelLocks,
    next_generation: AtomicU64,
    exit_tx: mpsc::UnboundedSender<ExitNotice>,
    event_tx: broadcast::Sender<SupervisorEvent>,
    cancel_token: CancellationToken,
}

impl StreamSupervisor {
    /// Create a supervisor and start its reaper task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(rtsp: RtspSettings, hls: HlsSettings) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(DashMap::new());
        let cancel_token = CancellationToken::new();

        tokio::spawn(run_reaper(
            registry.clone(),
            exit_rx,
            event_tx.clone(),
            cancel_token.clone(),
        ));

        Self {
            layout: HlsLayout::from_settings(&hls),
            rtsp,
            hls,
            registry,
            channel_locks: DashMap::new(),
            next_generation: AtomicU64::new(1),
            exit_tx,
            event_tx,
            cancel_token,
        }
    }

    pub fn layout(&self) -> &HlsLayout {
        &self.layout
    }

    /// Subscribe to supervisor events.
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.event_tx.subscribe()
    }

    async fn lock_channel(&self, channel: u32) -> ChannelGuard<'_> {
        let lock = self.channel_locks.entry(channel).or_default().clone();
        ChannelGuard {
            channel,
            locks: &self.channel_locks,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Start transcoding `channel`.
    ///
    /// Returns [`StartOutcome::AlreadyRunning`] without spawning anything when
    /// the channel already has a registered process.
    pub async fn start(&self, channel: u32, stream_type: u32) -> Result<StartOutcome> {
        if self.cancel_token.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let _guard = self.lock_channel(channel).await;

        if let Some(existing) = self.registry.get(&channel) {
            warn!(channel, pid = ?existing.pid, "Stream is already running");
            return Ok(StartOutcome::AlreadyRunning(existing.info()));
        }

        let Some(binary) = process_utils::find_executable(&self.rtsp.ffmpeg_path) else {
            error!(
                channel,
                path = %self.rtsp.ffmpeg_path.display(),
                "Transcoder binary not found"
            );
            return Err(Error::binary_not_found(&self.rtsp.ffmpeg_path));
        };

        self.layout.ensure_dir().await?;

        let source = StreamSource::new(&self.rtsp, channel, stream_type);
        let command = TranscodeCommand::with_settings(&source, &self.layout, channel, &self.hls);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut handle = ProcessHandle::new(
            channel,
            stream_type,
            generation,
            self.layout.manifest_url(channel),
        );

        info!(
            channel,
            stream_type,
            binary = %binary.display(),
            args = ?command.redacted_args(&source),
            "Starting transcoder"
        );

        let mut child = match process_utils::tokio_command(&binary)
            .args(command.build_args())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                handle.mark_failed();
                error!(channel, state = %handle.state, error = %source, "Failed to spawn transcoder");
                return Err(Error::SpawnFailed { channel, source });
            }
        };

        let pid = child.id();
        handle.mark_running(pid);
        let info = handle.info();
        spawn_forwarders(channel, child.stdout.take(), child.stderr.take());

        // Registered before the waiter exists so an immediate exit is reaped.
        self.registry.insert(channel, handle);
        let control = spawn_process_waiter(channel, generation, child, self.exit_tx.clone());
        if let Some(mut handle) = self.registry.get_mut(&channel) {
            handle.attach_control(control);
        }

        info!(channel, pid = ?pid, hls_url = %info.hls_url, "Transcoder started");
        let _ = self.event_tx.send(SupervisorEvent::Started { channel, pid });

        Ok(StartOutcome::Started(info))
    }

    /// Stop transcoding `channel` and delete its HLS artifacts.
    pub async fn stop(&self, channel: u32) -> StopOutcome {
        let _guard = self.lock_channel(channel).await;

        let (generation, control) = match self.registry.get_mut(&channel) {
            Some(mut handle) => (handle.generation, handle.begin_stop()),
            None => {
                warn!(channel, "No stream running for channel");
                return StopOutcome::NotRunning;
            }
        };

        let mode = TerminateMode::Graceful {
            timeout: Duration::from_secs(self.hls.stop_timeout_secs),
        };
        let termination = match control {
            Some(control) => control.terminate(mode).await,
            None => None,
        };
        self.registry
            .remove_if(&channel, |_, handle| handle.generation == generation);

        let (exit_code, forced) = match termination {
            Some(t) => (t.exit_code, t.forced),
            None => {
                // The exit beat this request; the reaper will find the entry gone.
                error!(channel, "Transcoder exited unexpectedly before it was stopped");
                (None, false)
            }
        };
        info!(channel, exit_code = ?exit_code, forced, "Transcoder stopped");

        let report = self.layout.cleanup(channel).await;
        self.report_cleanup(channel, &report);

        let _ = self.event_tx.send(SupervisorEvent::Stopped {
            channel,
            exit_code,
            forced,
        });
        StopOutcome::Stopped { exit_code, forced }
    }

    /// Whether `channel` currently has a registered process.
    pub fn status(&self, channel: u32) -> StreamStatus {
        match self.registry.get(&channel) {
            Some(handle) => StreamStatus {
                channel,
                is_streaming: true,
                hls_url: Some(handle.hls_url.clone()),
            },
            None => StreamStatus {
                channel,
                is_streaming: false,
                hls_url: None,
            },
        }
    }

    /// All active streams, ordered by channel.
    pub fn list(&self) -> Vec<StreamInfo> {
        let mut streams: Vec<StreamInfo> =
            self.registry.iter().map(|entry| entry.value().info()).collect();
        streams.sort_by_key(|info| info.channel);
        streams
    }

    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// Kill every transcoder, delete their artifacts and empty the registry.
    ///
    /// Further Start requests are rejected afterwards.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();

        let channels: Vec<u32> = self.registry.iter().map(|entry| *entry.key()).collect();
        info!(count = channels.len(), "Stopping all transcoders");

        for channel in channels {
            let _guard = self.lock_channel(channel).await;

            let Some((_, mut handle)) = self.registry.remove(&channel) else {
                continue;
            };
            if let Some(control) = handle.begin_stop() {
                control.terminate(TerminateMode::Kill).await;
            }
            debug!(channel, pid = ?handle.pid, "Transcoder killed");

            let report = self.layout.cleanup(channel).await;
            self.report_cleanup(channel, &report);
        }

        self.registry.clear();
        info!("All transcoders stopped");
    }

    fn report_cleanup(&self, channel: u32, report: &CleanupReport) {
        debug!(channel, removed = report.removed.len(), "Cleaned up HLS artifacts");
        if report.is_clean() {
            return;
        }
        for (path, err) in &report.failures {
            warn!(channel, path = %path.display(), error = %err, "Failed to clean up HLS artifact");
            let _ = self.event_tx.send(SupervisorEvent::CleanupFailed {
                channel,
                path: path.display().to_string(),
                error: err.to_string(),
            });
        }
    }
}

async fn run_reaper(
    registry: Arc<DashMap<u32, ProcessHandle>>,
    mut exit_rx: mpsc::UnboundedReceiver<ExitNotice>,
    event_tx: broadcast::Sender<SupervisorEvent>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            notice = exit_rx.recv() => {
                let Some(notice) = notice else { break };
                reap(&registry, &event_tx, notice);
            }
        }
    }
    debug!("Reaper stopped");
}

fn reap(
    registry: &DashMap<u32, ProcessHandle>,
    event_tx: &broadcast::Sender<SupervisorEvent>,
    notice: ExitNotice,
) {
    let ExitNotice {
        channel,
        generation,
        exit_code,
    } = notice;

    match registry.remove_if(&channel, |_, handle| handle.generation == generation) {
        Some((_, mut handle)) => {
            handle.mark_exited();
            error!(
                channel,
                pid = ?handle.pid,
                exit_code = ?exit_code,
                state = %handle.state,
                "Transcoder exited unexpectedly"
            );
            let _ = event_tx.send(SupervisorEvent::Exited { channel, exit_code });
        }
        None => debug!(channel, generation, "Ignoring exit of a replaced transcoder"),
    }
}
