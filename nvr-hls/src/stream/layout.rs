//! HLS artifact layout.
//!
//! Every manifest and segment path is derived here from the channel number,
//! so two channels never share an output file and the public manifest URL can
//! be computed without asking the supervisor.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::Result;
use crate::config::HlsSettings;
use crate::utils::fs;

/// Output locations for all channels.
#[derive(Debug, Clone)]
pub struct HlsLayout {
    dir: PathBuf,
    url_prefix: String,
}

/// Outcome of a best-effort artifact cleanup.
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Files that were deleted.
    pub removed: Vec<PathBuf>,
    /// Files (or the directory listing) that could not be deleted.
    pub failures: Vec<(PathBuf, crate::Error)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl HlsLayout {
    pub fn new(dir: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        let url_prefix = url_prefix.into().trim_end_matches('/').to_string();
        Self {
            dir: dir.into(),
            url_prefix,
        }
    }

    pub fn from_settings(settings: &HlsSettings) -> Self {
        Self::new(settings.output_dir.clone(), settings.url_prefix.clone())
    }

    /// Output directory shared by all channels.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// URL path the output directory is served under, without a trailing `/`.
    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    pub fn manifest_file_name(channel: u32) -> String {
        format!("stream_channel{}.m3u8", channel)
    }

    fn segment_prefix(channel: u32) -> String {
        format!("segment_channel{}_", channel)
    }

    pub fn manifest_path(&self, channel: u32) -> PathBuf {
        self.dir.join(Self::manifest_file_name(channel))
    }

    /// Segment naming pattern handed to the transcoder (`%d` is the index).
    pub fn segment_pattern(&self, channel: u32) -> PathBuf {
        self.dir.join(format!("{}%d.ts", Self::segment_prefix(channel)))
    }

    /// Client-facing manifest URL.
    pub fn manifest_url(&self, channel: u32) -> String {
        format!("{}/{}", self.url_prefix, Self::manifest_file_name(channel))
    }

    /// Whether `file_name` is a segment written for `channel`.
    pub fn is_segment_of(channel: u32, file_name: &str) -> bool {
        let Some(rest) = file_name.strip_prefix(&Self::segment_prefix(channel)) else {
            return false;
        };
        let Some(index) = rest.strip_suffix(".ts") else {
            return false;
        };
        !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit())
    }

    /// Create the output directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> Result<()> {
        fs::ensure_dir_all_with_op("creating HLS output directory", &self.dir).await
    }

    /// Delete the manifest and every segment of `channel`.
    ///
    /// Never fails; problems are collected in the report.
    pub async fn cleanup(&self, channel: u32) -> CleanupReport {
        let mut report = CleanupReport::default();

        let manifest = self.manifest_path(channel);
        match fs::remove_file_if_exists(&manifest).await {
            Ok(true) => report.removed.push(manifest),
            Ok(false) => {}
            Err(e) => report.failures.push((manifest, e)),
        }

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
            Err(e) => {
                let err = fs::io_error("listing HLS output directory", &self.dir, e);
                report.failures.push((self.dir.clone(), err));
                return report;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    let err = fs::io_error("listing HLS output directory", &self.dir, e);
                    report.failures.push((self.dir.clone(), err));
                    break;
                }
            };

            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !Self::is_segment_of(channel, name) {
                continue;
            }

            let path = entry.path();
            match fs::remove_file_if_exists(&path).await {
                Ok(true) => {
                    debug!(channel, path = %path.display(), "Deleted segment");
                    report.removed.push(path);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(channel, path = %path.display(), error = %e, "Failed to delete segment");
                    report.failures.push((path, e));
                }
            }
        }

        report
    }
}
