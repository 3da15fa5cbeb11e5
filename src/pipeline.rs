// --- ffmpeg invocation ---------------------------------------------------------------
//
// The command line is built as plain data so it can be inspected and tested
// without spawning anything. Inputs are fixed in position:
//   0: background video (looped file) or a generated colour pattern
//   1: audio, read from the concat playlist
//   2: logo image (optional)

use std::path::Path;

use crate::config::{Config, PipelineMode};

const BAR_SEG_WIDTH: u32 = 16;
const BAR_HEIGHT: u32 = 120;
const LOGO_PADDING: u32 = 40;
const TEXT_PADDING: u32 = 40;
const FONT_SIZE: u32 = 28;

/// Filesystem inputs for one pipeline process.
#[derive(Clone, Debug)]
pub struct PipelineInputs<'a> {
    pub stream_url: &'a str,
    pub playlist: &'a Path,
    pub nowplaying: &'a Path,
    /// Looped background video, `None` for the generated pattern.
    pub video: Option<&'a Path>,
    pub logo: Option<&'a Path>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// Kept separately so logs can redact it.
    pub stream_url: String,
}

impl PipelineInvocation {
    /// The command line with the stream key masked, safe to log.
    pub fn redacted(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(&redact_line(arg, &self.stream_url));
        }
        out
    }
}

/// Mask the final path segment of an ingest URL (the stream key).
pub fn redact_stream_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://").map(|i| i + 3) else {
        return "****".to_string();
    };
    match url[scheme_end..].rfind('/') {
        Some(slash) => format!("{}/****", &url[..scheme_end + slash]),
        None => url.to_string(),
    }
}

/// Replace any occurrence of the URL (or its key alone) in a line of output.
pub fn redact_line(line: &str, stream_url: &str) -> String {
    if stream_url.is_empty() {
        return line.to_string();
    }
    let mut s = line.replace(stream_url, &redact_stream_url(stream_url));
    if let Some(key) = stream_url.rsplit('/').next().filter(|k| k.len() >= 4 && !k.contains(':')) {
        s = s.replace(key, "****");
    }
    s
}

pub fn build_invocation(cfg: &Config, inputs: &PipelineInputs<'_>) -> PipelineInvocation {
    let mut args: Vec<String> = Vec::new();
    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    push(&["-hide_banner", "-loglevel", "error"]);

    match inputs.video {
        Some(video) => {
            let video = video.to_string_lossy();
            push(&["-stream_loop", "-1", "-re", "-i", &*video]);
        }
        None => {
            let pattern = format!(
                "color=c={}:s={}x{}:r={}",
                cfg.fallback_color, cfg.output.width, cfg.output.height, cfg.fallback_fps
            );
            push(&["-f", "lavfi", "-re", "-i", pattern.as_str()]);
        }
    }

    push(&["-re"]);
    if cfg.mode == PipelineMode::Continuous {
        push(&["-stream_loop", "-1"]);
    }
    let playlist = inputs.playlist.to_string_lossy();
    push(&["-f", "concat", "-safe", "0", "-i", &*playlist]);

    if let Some(logo) = inputs.logo {
        let logo = logo.to_string_lossy();
        push(&["-loop", "1", "-i", &*logo]);
    }

    let filter = build_filter_chain(cfg, inputs.nowplaying, inputs.logo.is_some());
    push(&["-filter_complex", filter.as_str(), "-map", "[vout]", "-map", "[aout]"]);

    push(&[
        "-c:v", "libx264", "-preset", "veryfast", "-b:v", "2500k",
        "-g", "60", "-keyint_min", "60", "-sc_threshold", "0",
        "-pix_fmt", "yuv420p",
        "-c:a", "aac", "-b:a", "160k",
    ]);
    if cfg.mode == PipelineMode::PerTrack {
        push(&["-shortest"]);
    }
    push(&["-f", "flv", inputs.stream_url]);

    PipelineInvocation {
        program: cfg.ffmpeg.clone(),
        args,
        stream_url: inputs.stream_url.to_string(),
    }
}

/// Scale the background, pin the logo top-right, draw a grey spectrum bar
/// bottom-left and the now-playing text bottom-right. Audio is loudness
/// normalised on the way out.
fn build_filter_chain(cfg: &Config, nowplaying: &Path, has_logo: bool) -> String {
    let (w, h) = (cfg.output.width, cfg.output.height);
    let bar_w = BAR_SEG_WIDTH * 8;
    let bar_x = 45;
    let bar_y = h.saturating_sub(BAR_HEIGHT + 25);
    let text_y = h.saturating_sub(25 + FONT_SIZE);
    let np_path = nowplaying.to_string_lossy().replace('\\', "/").replace(':', r"\:");

    let base = if has_logo {
        format!("[0:v]scale={w}x{h},format=yuv420p[v0];[v0][2:v]overlay=W-w-{LOGO_PADDING}:{LOGO_PADDING}[vbase]")
    } else {
        format!("[0:v]scale={w}x{h},format=yuv420p[vbase]")
    };

    let bar = format!(
        "[1:a]asplit=2[a_raw][a_vis];\
         [a_raw]loudnorm=I=-16:LRA=11:TP=-1.5[aout];\
         [a_vis]showfreqs=s={bar_w}x{BAR_HEIGHT}[vf];\
         [vf]format=rgba,colorchannelmixer=rr=0.6:gg=0.6:bb=0.6:aa=1[vbar];\
         [vbase][vbar]overlay={bar_x}:{bar_y}[vstrip]"
    );

    let text = format!(
        "[vstrip]drawtext=textfile='{np_path}':reload=1:\
         fontcolor=white:fontsize={FONT_SIZE}:\
         shadowcolor=black:shadowx=2:shadowy=2:\
         x=w-tw-{TEXT_PADDING}:y={text_y}[vout]"
    );

    format!("{base};{bar};{text}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const URL: &str = "rtmp://a.rtmp.youtube.com/live2/abcd-efgh-ijkl";

    fn config(mode: PipelineMode) -> Config {
        let mut cfg = Config::with_base_dir(Path::new("/srv/lofi"));
        cfg.mode = mode;
        cfg
    }

    fn position(args: &[String], needle: &str) -> Option<usize> {
        args.iter().position(|a| a == needle)
    }

    #[test]
    fn continuous_loops_the_concat_playlist() {
        let cfg = config(PipelineMode::Continuous);
        let playlist = PathBuf::from("/srv/lofi/lofi_concat.txt");
        let video = PathBuf::from("/srv/lofi/Videos/Lofi3.mp4");
        let logo = PathBuf::from("/srv/lofi/Logo/LoFiLogo700.png");
        let inv = build_invocation(
            &cfg,
            &PipelineInputs {
                stream_url: URL,
                playlist: &playlist,
                nowplaying: Path::new("/tmp/nowplaying.txt"),
                video: Some(&video),
                logo: Some(&logo),
            },
        );

        assert_eq!(inv.program, "ffmpeg");
        assert_eq!(inv.args.last().map(String::as_str), Some(URL));

        let concat = position(&inv.args, "concat").unwrap();
        assert_eq!(&inv.args[concat - 4..concat - 1], &["-re", "-stream_loop", "-1"]);
        assert_eq!(inv.args[concat + 4], "/srv/lofi/lofi_concat.txt");

        assert_eq!(inv.args[..8].join(" "), "-hide_banner -loglevel error -stream_loop -1 -re -i /srv/lofi/Videos/Lofi3.mp4");
        let logo_at = position(&inv.args, "/srv/lofi/Logo/LoFiLogo700.png").unwrap();
        assert_eq!(&inv.args[logo_at - 3..logo_at], &["-loop", "1", "-i"]);

        let filter = &inv.args[position(&inv.args, "-filter_complex").unwrap() + 1];
        assert!(filter.contains("textfile='/tmp/nowplaying.txt':reload=1"));
        assert!(filter.contains("[2:v]overlay=W-w-40:40"));
        assert!(position(&inv.args, "-shortest").is_none());
    }

    #[test]
    fn missing_video_uses_colour_pattern_and_no_logo_input() {
        let cfg = config(PipelineMode::Continuous);
        let inv = build_invocation(
            &cfg,
            &PipelineInputs {
                stream_url: URL,
                playlist: Path::new("/p.txt"),
                nowplaying: Path::new("/np.txt"),
                video: None,
                logo: None,
            },
        );
        assert!(inv.args.contains(&"color=c=black:s=1280x720:r=30".to_string()));
        assert!(position(&inv.args, "-loop").is_none());
        let filter = &inv.args[position(&inv.args, "-filter_complex").unwrap() + 1];
        assert!(!filter.contains("[2:v]"));
    }

    #[test]
    fn per_track_plays_the_list_once() {
        let cfg = config(PipelineMode::PerTrack);
        let inv = build_invocation(
            &cfg,
            &PipelineInputs {
                stream_url: URL,
                playlist: Path::new("/p.txt"),
                nowplaying: Path::new("/np.txt"),
                video: None,
                logo: None,
            },
        );
        let concat = position(&inv.args, "concat").unwrap();
        assert_eq!(inv.args[concat - 2], "-re");
        assert!(position(&inv.args, "-shortest").is_some());
    }

    #[test]
    fn stream_key_is_redacted() {
        assert_eq!(redact_stream_url(URL), "rtmp://a.rtmp.youtube.com/live2/****");
        assert_eq!(redact_stream_url("rtmp://host"), "rtmp://host");
        assert_eq!(
            redact_line("Error opening output rtmp://a.rtmp.youtube.com/live2/abcd-efgh-ijkl", URL),
            "Error opening output rtmp://a.rtmp.youtube.com/live2/****"
        );
        assert_eq!(redact_line("key abcd-efgh-ijkl rejected", URL), "key **** rejected");

        let inv = PipelineInvocation {
            program: "ffmpeg".into(),
            args: vec!["-f".into(), "flv".into(), URL.into()],
            stream_url: URL.into(),
        };
        assert!(!inv.redacted().contains("abcd-efgh-ijkl"));
    }
}
