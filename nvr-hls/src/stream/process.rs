//! Process ownership for spawned transcoders.
//!
//! Every child process is moved into a dedicated waiter task. Nothing else
//! holds the `Child`; the supervisor talks to the waiter through a
//! [`ProcessControl`] and hears about unexpected exits through [`ExitNotice`]s.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

/// How a running process should be terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateMode {
    /// Ask ffmpeg to quit (`q` on stdin), then kill after `timeout`.
    Graceful { timeout: Duration },
    /// Kill immediately.
    Kill,
}

/// Result of an explicit termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    pub exit_code: Option<i32>,
    /// Whether the process had to be killed.
    pub forced: bool,
}

/// Sent by a waiter when its process exits without being asked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitNotice {
    pub channel: u32,
    pub generation: u64,
    pub exit_code: Option<i32>,
}

struct TerminateRequest {
    mode: TerminateMode,
    reply: oneshot::Sender<Termination>,
}

/// Control endpoint for one waiter task.
#[derive(Debug)]
pub struct ProcessControl {
    tx: oneshot::Sender<TerminateRequest>,
}

impl std::fmt::Debug for TerminateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminateRequest")
            .field("mode", &self.mode)
            .finish()
    }
}

impl ProcessControl {
    /// Terminate the process and wait for it to be reaped.
    ///
    /// Returns `None` when the process had already exited on its own.
    pub async fn terminate(self, mode: TerminateMode) -> Option<Termination> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(TerminateRequest { mode, reply }).is_err() {
            return None;
        }
        rx.await.ok()
    }
}

/// Move `child` into a waiter task.
///
/// The task either serves a single termination request from the returned
/// [`ProcessControl`] or, if the process exits first, sends an
/// [`ExitNotice`] on `exit_tx`. Dropping the control kills the process.
pub fn spawn_process_waiter(
    channel: u32,
    generation: u64,
    mut child: Child,
    exit_tx: mpsc::UnboundedSender<ExitNotice>,
) -> ProcessControl {
    let (tx, rx) = oneshot::channel::<TerminateRequest>();
    let stdin = child.stdin.take();

    tokio::spawn(async move {
        tokio::select! {
            request = rx => {
                match request {
                    Ok(TerminateRequest { mode, reply }) => {
                        let termination = terminate(channel, &mut child, stdin, mode).await;
                        let _ = reply.send(termination);
                    }
                    Err(_) => {
                        debug!(channel, "Process control dropped, killing transcoder");
                        let _ = child.kill().await;
                    }
                }
            }
            status = child.wait() => {
                let exit_code = match status {
                    Ok(exit_status) => exit_status.code(),
                    Err(e) => {
                        error!(channel, error = %e, "Error waiting for transcoder");
                        None
                    }
                };
                let _ = exit_tx.send(ExitNotice {
                    channel,
                    generation,
                    exit_code,
                });
            }
        }
    });

    ProcessControl { tx }
}

async fn terminate(
    channel: u32,
    child: &mut Child,
    stdin: Option<ChildStdin>,
    mode: TerminateMode,
) -> Termination {
    if let TerminateMode::Graceful { timeout } = mode {
        if let Some(mut stdin) = stdin {
            if let Err(e) = stdin.write_all(b"q\n").await {
                debug!(channel, error = %e, "Failed to send quit command to transcoder");
            }
            let _ = stdin.flush().await;
        }

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                return Termination {
                    exit_code: status.code(),
                    forced: false,
                };
            }
            Ok(Err(e)) => {
                warn!(channel, error = %e, "Error waiting for transcoder to quit");
            }
            Err(_) => {
                warn!(
                    channel,
                    timeout_secs = timeout.as_secs(),
                    "Transcoder did not quit in time, killing it"
                );
            }
        }
    }

    if let Err(e) = child.kill().await {
        warn!(channel, error = %e, "Failed to kill transcoder");
    }
    let exit_code = child
        .try_wait()
        .ok()
        .flatten()
        .and_then(|status| status.code());

    Termination {
        exit_code,
        forced: true,
    }
}
