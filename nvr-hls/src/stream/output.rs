//! Transcoder output forwarding.
//!
//! ffmpeg rewrites its progress line with bare `\r`, so output is split on
//! either `\r` or `\n` rather than with `lines()`. Every record is turned into a
//! `tracing` event tagged with the channel it belongs to.

use std::io;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Minimum spacing between progress summaries for one channel.
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Splits a byte stream into text records delimited by `\r` or `\n`.
pub struct RecordReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R> RecordReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
        }
    }

    /// Next non-empty record, or `None` at end of stream.
    pub async fn next_record(&mut self) -> io::Result<Option<String>> {
        loop {
            let Some(raw) = read_until_delimiter(&mut self.reader, &mut self.pending).await? else {
                return Ok(None);
            };
            let record = raw.trim();
            if !record.is_empty() {
                return Ok(Some(record.to_string()));
            }
        }
    }
}

async fn read_until_delimiter<B>(reader: &mut B, buf: &mut Vec<u8>) -> io::Result<Option<String>>
where
    B: AsyncBufRead + Unpin,
{
    buf.clear();
    loop {
        let (found, used) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                if buf.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(String::from_utf8_lossy(buf).into_owned()));
            }
            match available.iter().position(|&b| b == b'\n' || b == b'\r') {
                Some(pos) => {
                    buf.extend_from_slice(&available[..pos]);
                    (true, pos + 1)
                }
                None => {
                    buf.extend_from_slice(available);
                    (false, available.len())
                }
            }
        };
        reader.consume(used);
        if found {
            return Ok(Some(String::from_utf8_lossy(buf).into_owned()));
        }
    }
}

/// Fields of an ffmpeg progress line
/// (`frame=X fps=X size=XkB time=HH:MM:SS.ms bitrate=Xkbits/s speed=Xx`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub frame: Option<u64>,
    pub time_secs: Option<f64>,
    pub bitrate_kbps: Option<f64>,
    pub speed: Option<f64>,
}

/// What a stderr record is.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    Progress(Progress),
    Error,
    Info,
}

/// Parse time string in HH:MM:SS.ms format to seconds.
pub fn parse_time(time_str: &str) -> Option<f64> {
    let mut parts = time_str.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Value following `key` up to the next whitespace. ffmpeg pads some values
/// (`frame=  100`), so leading spaces are skipped.
fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let start = line.find(key)? + key.len();
    let rest = line[start..].trim_start();
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let value = &rest[..end];
    (!value.is_empty()).then_some(value)
}

/// Parse an ffmpeg progress line. Returns `None` for any other line.
pub fn parse_progress(line: &str) -> Option<Progress> {
    if !line.contains("time=") || !(line.contains("frame=") || line.contains("size=")) {
        return None;
    }

    Some(Progress {
        frame: field(line, "frame=").and_then(|v| v.parse().ok()),
        time_secs: field(line, "time=").and_then(parse_time),
        bitrate_kbps: field(line, "bitrate=")
            .and_then(|v| v.strip_suffix("kbits/s"))
            .and_then(|v| v.parse().ok()),
        speed: field(line, "speed=")
            .and_then(|v| v.strip_suffix('x'))
            .and_then(|v| v.parse().ok()),
    })
}

/// Classify one stderr record.
pub fn classify(line: &str) -> OutputLine {
    if let Some(progress) = parse_progress(line) {
        return OutputLine::Progress(progress);
    }
    let lower = line.to_ascii_lowercase();
    if lower.contains("error") || lower.contains("failed") {
        OutputLine::Error
    } else {
        OutputLine::Info
    }
}

/// Forward stdout records as `info` events.
pub async fn forward_stdout<R>(channel: u32, stream: R)
where
    R: AsyncRead + Unpin,
{
    let mut reader = RecordReader::new(stream);
    loop {
        match reader.next_record().await {
            Ok(Some(line)) => info!(channel, stream = "stdout", "{}", line),
            Ok(None) => break,
            Err(e) => {
                debug!(channel, error = %e, "Transcoder stdout closed");
                break;
            }
        }
    }
}

/// Forward stderr records. Errors are logged at error level, progress is
/// summarised periodically and everything else goes to debug.
pub async fn forward_stderr<R>(channel: u32, stream: R)
where
    R: AsyncRead + Unpin,
{
    let mut reader = RecordReader::new(stream);
    let mut last_progress: Option<Instant> = None;

    loop {
        let line = match reader.next_record().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!(channel, error = %e, "Transcoder stderr closed");
                break;
            }
        };

        match classify(&line) {
            OutputLine::Progress(progress) => {
                let due = last_progress.is_none_or(|at| at.elapsed() >= PROGRESS_LOG_INTERVAL);
                if due {
                    info!(
                        channel,
                        time_secs = progress.time_secs.unwrap_or(0.0),
                        speed = progress.speed.unwrap_or(0.0),
                        bitrate_kbps = progress.bitrate_kbps.unwrap_or(0.0),
                        "Transcoding progress"
                    );
                    last_progress = Some(Instant::now());
                } else {
                    debug!(channel, stream = "stderr", "{}", line);
                }
            }
            OutputLine::Error => error!(channel, stream = "stderr", "{}", line),
            OutputLine::Info => debug!(channel, stream = "stderr", "{}", line),
        }
    }
}

/// Spawn one forwarding task per output stream.
pub fn spawn_forwarders<O, E>(
    channel: u32,
    stdout: Option<O>,
    stderr: Option<E>,
) -> Vec<JoinHandle<()>>
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    let mut tasks = Vec::with_capacity(2);
    if let Some(stdout) = stdout {
        tasks.push(tokio::spawn(forward_stdout(channel, stdout)));
    }
    if let Some(stderr) = stderr {
        tasks.push(tokio::spawn(forward_stderr(channel, stderr)));
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_splits_on_cr_and_lf() {
        let (mut tx, rx) = tokio::io::duplex(1024);

        tokio::spawn(async move {
            let _ = tx.write_all(b"first\rsecond\nthird\r\n\r\nlast").await;
        });

        let mut reader = RecordReader::new(rx);
        let mut records = Vec::new();
        while let Some(line) = reader.next_record().await.unwrap() {
            records.push(line);
        }

        assert_eq!(records, vec!["first", "second", "third", "last"]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let (mut tx, rx) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let _ = tx.write_all(b"bad \xff byte\n").await;
        });

        let mut reader = RecordReader::new(rx);
        let line = reader.next_record().await.unwrap().unwrap();
        assert!(line.starts_with("bad "));
        assert!(reader.next_record().await.unwrap().is_none());
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("00:00:10.50"), Some(10.5));
        assert_eq!(parse_time("01:30:00.00"), Some(5400.0));
        assert_eq!(parse_time("10.5"), None);
        assert_eq!(parse_time("N/A"), None);
    }

    #[test]
    fn test_parse_progress() {
        let line = "frame=  100 fps=25 q=-1.0 size=N/A time=00:00:04.00 bitrate=2097.2kbits/s speed=1.00x";
        let progress = parse_progress(line).unwrap();

        assert_eq!(progress.frame, Some(100));
        assert_eq!(progress.time_secs, Some(4.0));
        assert_eq!(progress.bitrate_kbps, Some(2097.2));
        assert_eq!(progress.speed, Some(1.0));
    }

    #[test]
    fn test_parse_progress_rejects_other_lines() {
        assert!(parse_progress("Input #0, rtsp, from 'rtsp://nvr/unicast/c1/s0/live':").is_none());
        assert!(parse_progress("[hls @ 0x55] Opening 'segment_channel1_3.ts' for writing").is_none());
    }

    #[test]
    fn test_classify() {
        assert!(matches!(
            classify("frame=  10 fps=0.0 q=0.0 size=N/A time=00:00:00.40 bitrate=N/A speed=0.8x"),
            OutputLine::Progress(_)
        ));
        assert_eq!(
            classify("[rtsp @ 0x1] method DESCRIBE failed: 401 Unauthorized"),
            OutputLine::Error
        );
        assert_eq!(
            classify("Error opening input files: Connection refused"),
            OutputLine::Error
        );
        assert_eq!(
            classify("Stream #0:0: Video: h264 (High), yuvj420p, 2560x1440, 25 fps"),
            OutputLine::Info
        );
    }
}
