// --- Configuration ----------------------------------------------------------
//
// Everything the streamer needs is read from the environment exactly once at
// startup and carried around as a plain `Config`. Components take the pieces
// they need by reference; nothing reads the environment after `main`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::error::ConfigError;

pub const DEFAULT_NOWPLAYING_FILE: &str = "/tmp/nowplaying.txt";
pub const DEFAULT_AUDIO_EXTENSIONS: [&str; 4] = ["mp3", "wav", "flac", "m4a"];

/// How the pipeline process relates to the playlist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineMode {
    /// One long-lived ffmpeg reading the whole shuffled concat list in a loop.
    Continuous,
    /// One ffmpeg per track, bounded by the track's duration.
    PerTrack,
}

impl PipelineMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "continuous" => Some(Self::Continuous),
            "per-track" | "per_track" | "pertrack" => Some(Self::PerTrack),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputGeometry {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub playlist_dir: PathBuf,
    pub audio_extensions: Vec<String>,

    pub logo_file: PathBuf,
    pub video_file: PathBuf,
    pub fallback_color: String,
    pub fallback_fps: u32,
    pub output: OutputGeometry,

    pub stream_url_file: PathBuf,
    /// Raw `LOFI_YOUTUBE_URL`; takes precedence over `stream_url_file`.
    pub stream_url_override: Option<String>,

    pub check_host: String,
    pub check_port: u16,
    pub skip_network_check: bool,
    pub skip_boot_wait: bool,

    pub nowplaying_file: PathBuf,
    pub concat_file: PathBuf,
    pub status_file: Option<PathBuf>,

    pub mode: PipelineMode,
    pub retry_interval: Duration,
    pub restart_backoff: Duration,
    pub fallback_duration_secs: u32,
    pub clock_epsilon: Duration,
    pub track_exit_buffer: Duration,
    pub terminate_grace: Duration,

    pub ffmpeg: String,
    pub ffprobe: String,
    pub probe_timeout: Duration,
}

impl Config {
    /// Defaults rooted at `base`, matching the layout of a streamer checkout:
    /// `Sounds/`, `Logo/`, `Videos/`, `stream_url.txt`.
    pub fn with_base_dir(base: &Path) -> Self {
        let logo_dir = base.join("Logo");
        let video_dir = base.join("Videos");
        Self {
            playlist_dir: base.join("Sounds"),
            audio_extensions: DEFAULT_AUDIO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            logo_file: logo_dir.join("LoFiLogo700.png"),
            video_file: video_dir.join("Lofi3.mp4"),
            fallback_color: "black".into(),
            fallback_fps: 30,
            output: OutputGeometry { width: 1280, height: 720 },
            stream_url_file: base.join("stream_url.txt"),
            stream_url_override: None,
            check_host: "a.rtmp.youtube.com".into(),
            check_port: 1935,
            skip_network_check: false,
            skip_boot_wait: false,
            nowplaying_file: PathBuf::from(DEFAULT_NOWPLAYING_FILE),
            concat_file: base.join("lofi_concat.txt"),
            status_file: None,
            mode: PipelineMode::Continuous,
            retry_interval: Duration::from_secs(5),
            restart_backoff: Duration::from_secs(5),
            fallback_duration_secs: 180,
            clock_epsilon: Duration::from_secs(1),
            track_exit_buffer: Duration::from_secs(5),
            terminate_grace: Duration::from_secs(5),
            ffmpeg: "ffmpeg".into(),
            ffprobe: "ffprobe".into(),
            probe_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset keys fall back to
    /// [`Config::with_base_dir`]; malformed numbers are rejected.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let home = lookup("HOME");
        let path = |raw: String| expand_home(&raw, home.as_deref());

        let base = match get("LOFI_BASE_DIR") {
            Some(raw) => path(raw),
            None => detect_base_dir(&std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))),
        };
        let mut cfg = Self::with_base_dir(&base);

        if let Some(v) = get("LOFI_PLAYLIST_DIR") {
            cfg.playlist_dir = path(v);
        }
        if let Some(v) = get("LOFI_AUDIO_EXTENSIONS") {
            cfg.audio_extensions = parse_extensions(&v);
        }

        let logo_dir = get("LOFI_BRAND_DIR").map(path).unwrap_or_else(|| base.join("Logo"));
        cfg.logo_file = get("LOFI_BRAND_IMAGE")
            .map(path)
            .unwrap_or_else(|| logo_dir.join("LoFiLogo700.png"));
        let video_dir = get("LOFI_VIDEO_DIR").map(path).unwrap_or_else(|| base.join("Videos"));
        cfg.video_file = get("LOFI_VIDEO_FILE")
            .map(path)
            .unwrap_or_else(|| video_dir.join("Lofi3.mp4"));

        if let Some(v) = get("LOFI_FALLBACK_COLOR") {
            cfg.fallback_color = v.trim().to_string();
        }
        cfg.fallback_fps = parse_num("LOFI_FALLBACK_FPS", get("LOFI_FALLBACK_FPS"), cfg.fallback_fps)?;

        if let Some(v) = get("LOFI_STREAM_URL_FILE") {
            cfg.stream_url_file = path(v);
        }
        cfg.stream_url_override = get("LOFI_YOUTUBE_URL").map(|v| v.trim().to_string());

        if let Some(v) = get("LOFI_CHECK_HOST") {
            cfg.check_host = v.trim().to_string();
        }
        cfg.check_port = parse_num("LOFI_CHECK_PORT", get("LOFI_CHECK_PORT"), cfg.check_port)?;
        cfg.skip_network_check = get("LOFI_SKIP_NETWORK_CHECK").is_some_and(|v| parse_bool(&v));
        cfg.skip_boot_wait = get("LOFI_SKIP_BOOT_WAIT").is_some_and(|v| parse_bool(&v));

        if let Some(v) = get("LOFI_NOWPLAYING_FILE") {
            cfg.nowplaying_file = path(v);
        }
        if let Some(v) = get("LOFI_CONCAT_FILE") {
            cfg.concat_file = path(v);
        }
        cfg.status_file = get("LOFI_STATUS_FILE").map(path);

        if let Some(v) = get("LOFI_MODE") {
            cfg.mode = PipelineMode::parse(&v).ok_or(ConfigError::Invalid { key: "LOFI_MODE", value: v })?;
        }
        if cfg.mode == PipelineMode::PerTrack {
            cfg.restart_backoff = Duration::from_secs(1);
        }

        cfg.retry_interval = secs("LOFI_RETRY_SECS", get("LOFI_RETRY_SECS"), cfg.retry_interval)?;
        cfg.restart_backoff = secs(
            "LOFI_RESTART_BACKOFF_SECS",
            get("LOFI_RESTART_BACKOFF_SECS"),
            cfg.restart_backoff,
        )?;
        cfg.fallback_duration_secs = parse_num(
            "LOFI_FALLBACK_DURATION_SECS",
            get("LOFI_FALLBACK_DURATION_SECS"),
            cfg.fallback_duration_secs,
        )?
        .max(1);
        cfg.clock_epsilon = secs("LOFI_CLOCK_EPSILON_SECS", get("LOFI_CLOCK_EPSILON_SECS"), cfg.clock_epsilon)?;
        cfg.track_exit_buffer = secs(
            "LOFI_TRACK_EXIT_BUFFER_SECS",
            get("LOFI_TRACK_EXIT_BUFFER_SECS"),
            cfg.track_exit_buffer,
        )?;
        cfg.terminate_grace = secs(
            "LOFI_TERMINATE_GRACE_SECS",
            get("LOFI_TERMINATE_GRACE_SECS"),
            cfg.terminate_grace,
        )?;

        if let Some(v) = get("LOFI_FFMPEG") {
            cfg.ffmpeg = v;
        }
        if let Some(v) = get("LOFI_FFPROBE") {
            cfg.ffprobe = v;
        }
        cfg.probe_timeout = secs("LOFI_PROBE_TIMEOUT_SECS", get("LOFI_PROBE_TIMEOUT_SECS"), cfg.probe_timeout)?;

        Ok(cfg)
    }

    /// Resolve the outbound endpoint: environment override first, then the
    /// first non-empty line of the URL file.
    pub fn stream_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = self.stream_url_override.as_deref().map(str::trim) {
            if !url.is_empty() {
                tracing::info!("using stream URL from environment");
                return Ok(url.to_string());
            }
        }

        match std::fs::read_to_string(&self.stream_url_file) {
            Ok(contents) => {
                let url = contents.lines().map(str::trim).find(|l| !l.is_empty());
                match url {
                    Some(url) => {
                        tracing::info!("loaded stream URL from {}", self.stream_url_file.display());
                        Ok(url.to_string())
                    }
                    None => Err(ConfigError::MissingStreamUrl(self.stream_url_file.clone())),
                }
            }
            Err(e) => {
                tracing::debug!("stream URL file {} unreadable: {e}", self.stream_url_file.display());
                Err(ConfigError::MissingStreamUrl(self.stream_url_file.clone()))
            }
        }
    }
}

/// Running from a `servers/` subdirectory means the assets live one level up.
pub fn detect_base_dir(start: &Path) -> PathBuf {
    let is_servers = start
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.eq_ignore_ascii_case("servers"));
    match (is_servers, start.parent()) {
        (true, Some(parent)) => parent.to_path_buf(),
        _ => start.to_path_buf(),
    }
}

pub fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

fn parse_num<T: std::str::FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid { key, value: v }),
    }
}

fn secs(key: &'static str, raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    parse_num(key, raw, default.as_secs()).map(Duration::from_secs)
}

fn expand_home(raw: &str, home: Option<&str>) -> PathBuf {
    let raw = raw.trim();
    match (raw.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => Path::new(home).join(rest),
        _ if raw == "~" && home.is_some() => PathBuf::from(home.unwrap_or_default()),
        _ => PathBuf::from(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_are_rooted_at_base_dir() {
        let cfg = Config::from_lookup(lookup(&[("LOFI_BASE_DIR", "/srv/lofi")])).unwrap();
        assert_eq!(cfg.playlist_dir, PathBuf::from("/srv/lofi/Sounds"));
        assert_eq!(cfg.logo_file, PathBuf::from("/srv/lofi/Logo/LoFiLogo700.png"));
        assert_eq!(cfg.video_file, PathBuf::from("/srv/lofi/Videos/Lofi3.mp4"));
        assert_eq!(cfg.concat_file, PathBuf::from("/srv/lofi/lofi_concat.txt"));
        assert_eq!(cfg.nowplaying_file, PathBuf::from(DEFAULT_NOWPLAYING_FILE));
        assert_eq!(cfg.check_port, 1935);
        assert_eq!(cfg.mode, PipelineMode::Continuous);
        assert_eq!(cfg.restart_backoff, Duration::from_secs(5));
        assert!(!cfg.skip_network_check);
    }

    #[test]
    fn overrides_and_flags() {
        let cfg = Config::from_lookup(lookup(&[
            ("HOME", "/home/pi"),
            ("LOFI_BASE_DIR", "/srv/lofi"),
            ("LOFI_PLAYLIST_DIR", "~/music"),
            ("LOFI_BRAND_DIR", "/brand"),
            ("LOFI_AUDIO_EXTENSIONS", "MP3, .ogg"),
            ("LOFI_SKIP_NETWORK_CHECK", "Yes"),
            ("LOFI_CHECK_PORT", "443"),
            ("LOFI_MODE", "per-track"),
        ]))
        .unwrap();
        assert_eq!(cfg.playlist_dir, PathBuf::from("/home/pi/music"));
        assert_eq!(cfg.logo_file, PathBuf::from("/brand/LoFiLogo700.png"));
        assert_eq!(cfg.audio_extensions, vec!["mp3".to_string(), "ogg".to_string()]);
        assert!(cfg.skip_network_check);
        assert_eq!(cfg.check_port, 443);
        assert_eq!(cfg.mode, PipelineMode::PerTrack);
        assert_eq!(cfg.restart_backoff, Duration::from_secs(1));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = Config::from_lookup(lookup(&[("LOFI_BASE_DIR", "/x"), ("LOFI_CHECK_PORT", "rtmp")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "LOFI_CHECK_PORT", .. }));

        let err = Config::from_lookup(lookup(&[("LOFI_BASE_DIR", "/x"), ("LOFI_MODE", "sometimes")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "LOFI_MODE", .. }));
    }

    #[test]
    fn servers_subdir_resolves_to_parent() {
        assert_eq!(detect_base_dir(Path::new("/opt/lofi/servers")), PathBuf::from("/opt/lofi"));
        assert_eq!(detect_base_dir(Path::new("/opt/lofi")), PathBuf::from("/opt/lofi"));
    }

    #[test]
    fn stream_url_prefers_environment_then_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::with_base_dir(dir.path());
        assert!(matches!(cfg.stream_url(), Err(ConfigError::MissingStreamUrl(_))));

        std::fs::write(&cfg.stream_url_file, "\n  rtmp://ingest.local/live/key \n").unwrap();
        assert_eq!(cfg.stream_url().unwrap(), "rtmp://ingest.local/live/key");

        cfg.stream_url_override = Some("rtmp://env/live/other".into());
        assert_eq!(cfg.stream_url().unwrap(), "rtmp://env/live/other");
    }

    #[test]
    fn booleans() {
        for v in ["1", "true", "YES", "On"] {
            assert!(parse_bool(v), "{v}");
        }
        for v in ["0", "false", "off", "nope"] {
            assert!(!parse_bool(v), "{v}");
        }
    }
}
