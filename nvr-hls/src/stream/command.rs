//! Transcoder invocation.
//!
//! Builds the ffmpeg argument list that pulls one RTSP feed and writes a
//! segmented HLS output for a single channel.

use std::path::PathBuf;

use crate::config::{AudioMode, HlsSettings};
use crate::stream::layout::HlsLayout;
use crate::stream::source::StreamSource;

/// Probe/analyze buffer size in bytes. Large enough for slow-starting cameras.
const PROBE_SIZE: u64 = 100_000_000;

/// Argument builder for one channel's transcode job.
#[derive(Debug, Clone)]
pub struct TranscodeCommand {
    input_url: String,
    log_level: String,
    preset: String,
    keyframe_interval_secs: u32,
    segment_duration_secs: u32,
    list_size: u32,
    audio: AudioMode,
    segment_pattern: PathBuf,
    manifest_path: PathBuf,
}

impl TranscodeCommand {
    /// Create a command for `channel` reading from `source`.
    pub fn new(source: &StreamSource, layout: &HlsLayout, channel: u32) -> Self {
        Self::with_settings(source, layout, channel, &HlsSettings::default())
    }

    /// Create a command using the given output settings.
    pub fn with_settings(
        source: &StreamSource,
        layout: &HlsLayout,
        channel: u32,
        settings: &HlsSettings,
    ) -> Self {
        Self {
            input_url: source.url(),
            log_level: settings.ffmpeg_log_level.clone(),
            preset: settings.preset.clone(),
            keyframe_interval_secs: settings.keyframe_interval_secs.max(1),
            segment_duration_secs: settings.segment_duration_secs.max(1),
            list_size: settings.list_size,
            audio: settings.audio,
            segment_pattern: layout.segment_pattern(channel),
            manifest_path: layout.manifest_path(channel),
        }
    }

    /// Build ffmpeg command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        // 1. Global options
        args.extend([
            "-hide_banner".to_string(),
            "-y".to_string(),
            "-loglevel".to_string(),
            self.log_level.clone(),
        ]);

        // 2. Input options: TCP transport, generous probing, regenerated timestamps
        args.extend([
            "-re".to_string(),
            "-rtsp_transport".to_string(),
            "tcp".to_string(),
            "-probesize".to_string(),
            PROBE_SIZE.to_string(),
            "-analyzeduration".to_string(),
            PROBE_SIZE.to_string(),
            "-fflags".to_string(),
            "+genpts".to_string(),
        ]);

        // 3. Input URL
        args.extend(["-i".to_string(), self.input_url.clone()]);

        // 4. Video is always re-encoded so keyframes land on segment boundaries
        args.extend([
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            self.preset.clone(),
            "-force_key_frames".to_string(),
            format!("expr:gte(t,n_forced*{})", self.keyframe_interval_secs),
        ]);

        // 5. Audio
        match self.audio {
            AudioMode::Drop => args.push("-an".to_string()),
            AudioMode::Aac => args.extend(["-c:a".to_string(), "aac".to_string()]),
        }

        // 6. HLS muxer
        args.extend([
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            self.segment_duration_secs.to_string(),
            "-hls_list_size".to_string(),
            self.list_size.to_string(),
        ]);
        if self.list_size > 0 {
            args.extend(["-hls_flags".to_string(), "delete_segments".to_string()]);
        }
        args.extend([
            "-hls_segment_filename".to_string(),
            self.segment_pattern.to_string_lossy().to_string(),
        ]);

        // Output path
        args.push(self.manifest_path.to_string_lossy().to_string());

        args
    }

    /// Same as [`build_args`](Self::build_args) but with the input URL's
    /// password masked, for logging.
    pub fn redacted_args(&self, source: &StreamSource) -> Vec<String> {
        let redacted = source.redacted_url();
        self.build_args()
            .into_iter()
            .map(|arg| if arg == self.input_url { redacted.clone() } else { arg })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RtspSettings;

    fn fixture() -> (StreamSource, HlsLayout) {
        let settings = RtspSettings {
            nvr_ip: "10.0.0.5".to_string(),
            username: "admin".to_string(),
            password: "pa:ss".to_string(),
            ..Default::default()
        };
        (
            StreamSource::new(&settings, 1, 0),
            HlsLayout::new("/srv/hls", "/hls"),
        )
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_default_args() {
        let (source, layout) = fixture();
        let args = TranscodeCommand::new(&source, &layout, 1).build_args();

        assert_eq!(value_after(&args, "-rtsp_transport"), Some("tcp"));
        assert_eq!(value_after(&args, "-fflags"), Some("+genpts"));
        assert_eq!(value_after(&args, "-probesize"), Some("100000000"));
        assert_eq!(value_after(&args, "-analyzeduration"), Some("100000000"));
        assert_eq!(value_after(&args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(&args, "-preset"), Some("ultrafast"));
        assert_eq!(
            value_after(&args, "-force_key_frames"),
            Some("expr:gte(t,n_forced*2)")
        );
        assert!(args.contains(&"-an".to_string()));
        assert_eq!(value_after(&args, "-f"), Some("hls"));
        assert_eq!(value_after(&args, "-hls_time"), Some("5"));
        assert_eq!(value_after(&args, "-hls_list_size"), Some("0"));
        assert!(!args.contains(&"-hls_flags".to_string()));
        assert_eq!(
            value_after(&args, "-hls_segment_filename"),
            Some("/srv/hls/segment_channel1_%d.ts")
        );
        assert_eq!(
            args.last().map(String::as_str),
            Some("/srv/hls/stream_channel1.m3u8")
        );
    }

    #[test]
    fn test_input_precedes_output_options() {
        let (source, layout) = fixture();
        let args = TranscodeCommand::new(&source, &layout, 1).build_args();

        let input = args.iter().position(|a| a == "-i").unwrap();
        let transport = args.iter().position(|a| a == "-rtsp_transport").unwrap();
        let codec = args.iter().position(|a| a == "-c:v").unwrap();
        assert!(transport < input);
        assert!(input < codec);
        assert_eq!(args[input + 1], source.url());
    }

    #[test]
    fn test_bounded_list_deletes_old_segments() {
        let (source, layout) = fixture();
        let settings = HlsSettings {
            list_size: 10,
            ..Default::default()
        };
        let args = TranscodeCommand::with_settings(&source, &layout, 1, &settings).build_args();

        assert_eq!(value_after(&args, "-hls_list_size"), Some("10"));
        assert_eq!(value_after(&args, "-hls_flags"), Some("delete_segments"));
    }

    #[test]
    fn test_aac_audio() {
        let (source, layout) = fixture();
        let settings = HlsSettings {
            audio: AudioMode::Aac,
            ..Default::default()
        };
        let args = TranscodeCommand::with_settings(&source, &layout, 1, &settings).build_args();

        assert_eq!(value_after(&args, "-c:a"), Some("aac"));
        assert!(!args.contains(&"-an".to_string()));
    }

    #[test]
    fn test_redacted_args_hide_password() {
        let (source, layout) = fixture();
        let command = TranscodeCommand::new(&source, &layout, 1);
        let args = command.redacted_args(&source);

        assert_eq!(value_after(&args, "-i"), Some(source.redacted_url().as_str()));
        assert!(args.iter().all(|a| !a.contains("pa%3Ass")));
    }
}
