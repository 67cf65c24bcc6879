//! Application configuration.
//!
//! Settings are resolved once at startup: an optional JSON file named by
//! `NVR_CONFIG`, then individual environment variables on top. The resolved
//! [`AppConfig`] is handed to the supervisor and API server as plain values.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::server::ApiServerConfig;
use crate::{Error, Result};

/// Environment variable naming an optional JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "NVR_CONFIG";

/// Default directory for rolling log files.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Connection settings for the NVR and the transcoder binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RtspSettings {
    /// NVR host name or IP address.
    pub nvr_ip: String,
    /// RTSP port on the NVR.
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Path to the ffmpeg executable.
    pub ffmpeg_path: PathBuf,
    /// Path part of the RTSP URL. `{channel}` and `{stream_type}` are substituted.
    pub path_template: String,
}

impl Default for RtspSettings {
    fn default() -> Self {
        Self {
            nvr_ip: "127.0.0.1".to_string(),
            port: 554,
            username: String::new(),
            password: String::new(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            path_template: "/unicast/c{channel}/s{stream_type}/live".to_string(),
        }
    }
}

/// How the audio track of the camera feed is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioMode {
    /// Drop audio entirely (`-an`).
    #[default]
    Drop,
    /// Re-encode audio to AAC.
    Aac,
}

impl FromStr for AudioMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "drop" | "none" | "off" => Ok(Self::Drop),
            "aac" => Ok(Self::Aac),
            other => Err(Error::config(format!("Unknown audio mode: {}", other))),
        }
    }
}

/// HLS output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsSettings {
    /// Directory that receives manifests and segments.
    pub output_dir: PathBuf,
    /// URL prefix under which `output_dir` is served.
    pub url_prefix: String,
    /// Target segment duration (`-hls_time`).
    pub segment_duration_secs: u32,
    /// Forced keyframe interval.
    pub keyframe_interval_secs: u32,
    /// Rolling window size (`-hls_list_size`). 0 keeps every segment.
    pub list_size: u32,
    pub audio: AudioMode,
    /// x264 preset.
    pub preset: String,
    /// Value passed to `-loglevel`.
    pub ffmpeg_log_level: String,
    /// How long Stop waits for a graceful exit before killing the process.
    pub stop_timeout_secs: u64,
}

impl Default for HlsSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("wwwroot").join("hls"),
            url_prefix: "/hls".to_string(),
            segment_duration_secs: 5,
            keyframe_interval_secs: 2,
            list_size: 0,
            audio: AudioMode::Drop,
            preset: "ultrafast".to_string(),
            ffmpeg_log_level: "info".to_string(),
            stop_timeout_secs: 5,
        }
    }
}

/// Fully resolved application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub rtsp: RtspSettings,
    pub hls: HlsSettings,
    pub api: ApiServerConfig,
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from `NVR_CONFIG` (if set) and the environment.
    pub fn load() -> Result<Self> {
        let mut config = match env_var(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Parse a JSON configuration file. Missing sections fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::io_path("reading config file", path, e))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("Invalid config file {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "Parsed config file");
        Ok(config)
    }

    /// Override individual fields from environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(ip) = env_var("NVR_IP") {
            self.rtsp.nvr_ip = ip;
        }
        if let Some(port) = parse_env::<u16>("NVR_PORT")? {
            self.rtsp.port = port;
        }
        if let Some(username) = env_var("NVR_USERNAME") {
            self.rtsp.username = username;
        }
        if let Some(password) = env_var("NVR_PASSWORD") {
            self.rtsp.password = password;
        }
        if let Some(path) = env_var("FFMPEG_PATH") {
            self.rtsp.ffmpeg_path = PathBuf::from(path);
        }
        if let Some(dir) = env_var("HLS_DIR") {
            self.hls.output_dir = PathBuf::from(dir);
        }
        if let Some(size) = parse_env::<u32>("HLS_LIST_SIZE")? {
            self.hls.list_size = size;
        }
        if let Some(audio) = parse_env::<AudioMode>("HLS_AUDIO")? {
            self.hls.audio = audio;
        }
        if let Some(bind_address) = env_var("API_BIND_ADDRESS") {
            self.api.bind_address = bind_address;
        }
        if let Some(port) = parse_env::<u16>("API_PORT")? {
            self.api.port = port;
        }
        if let Some(dir) = env_var("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Directory for log files.
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR))
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::config(format!("Invalid value for {}: {} ({})", name, raw, e))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.rtsp.port, 554);
        assert_eq!(config.hls.segment_duration_secs, 5);
        assert_eq!(config.hls.keyframe_interval_secs, 2);
        assert_eq!(config.hls.list_size, 0);
        assert_eq!(config.hls.audio, AudioMode::Drop);
        assert_eq!(config.hls.stop_timeout_secs, 5);
        assert_eq!(config.hls.url_prefix, "/hls");
        assert_eq!(config.log_dir(), PathBuf::from(DEFAULT_LOG_DIR));
    }

    #[test]
    fn test_audio_mode_from_str() {
        assert_eq!("aac".parse::<AudioMode>().unwrap(), AudioMode::Aac);
        assert_eq!("DROP".parse::<AudioMode>().unwrap(), AudioMode::Drop);
        assert_eq!("none".parse::<AudioMode>().unwrap(), AudioMode::Drop);
        assert!("opus".parse::<AudioMode>().is_err());
    }

    #[test]
    fn test_from_file_with_partial_sections() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nvr.json");
        std::fs::write(
            &path,
            r#"{
                "rtsp": { "nvr_ip": "10.0.0.20", "port": 8554, "username": "viewer" },
                "hls": { "list_size": 10, "audio": "aac" }
            }"#,
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.rtsp.nvr_ip, "10.0.0.20");
        assert_eq!(config.rtsp.port, 8554);
        assert_eq!(config.rtsp.username, "viewer");
        assert_eq!(config.rtsp.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.hls.list_size, 10);
        assert_eq!(config.hls.audio, AudioMode::Aac);
        assert_eq!(config.hls.segment_duration_secs, 5);
    }

    #[test]
    fn test_from_file_rejects_invalid_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = AppConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_from_file_missing() {
        let err = AppConfig::from_file(Path::new("/nonexistent/nvr.json")).unwrap_err();
        assert!(matches!(err, Error::IoPath { .. }));
    }
}
