// --- Track durations -----------------------------------------------------------
//
// Resolution order: embedded metadata, then ffprobe, then a fixed fallback.
// Every failure degrades to the next strategy; callers always get a usable
// number of whole seconds (>= 1).

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use lofty::file::AudioFile;
use lofty::probe::Probe;

use crate::catalog::CatalogItem;
use crate::config::Config;

/// One way of finding out how long a file plays.
pub trait DurationSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Length in seconds, or `None` if this source cannot tell.
    fn duration_secs(&self, path: &Path) -> Option<f64>;
}

/// Container/stream properties read through `lofty`.
pub struct EmbeddedDuration;

impl DurationSource for EmbeddedDuration {
    fn name(&self) -> &'static str {
        "embedded"
    }

    fn duration_secs(&self, path: &Path) -> Option<f64> {
        let tagged = Probe::open(path).ok()?.read().ok()?;
        let secs = tagged.properties().duration().as_secs_f64();
        (secs > 0.0).then_some(secs)
    }
}

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_POLL: Duration = Duration::from_millis(50);

/// `ffprobe -show_entries format=duration`, abandoned after a timeout.
pub struct FfprobeDuration {
    program: String,
    timeout: Duration,
}

impl FfprobeDuration {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl DurationSource for FfprobeDuration {
    fn name(&self) -> &'static str {
        "ffprobe"
    }

    fn duration_secs(&self, path: &Path) -> Option<f64> {
        let mut child = Command::new(&self.program)
            .arg("-v").arg("error")
            .arg("-show_entries").arg("format=duration")
            .arg("-of").arg("default=noprint_wrappers=1:nokey=1")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .ok()?;

        // The answer is one short line, so the pipe cannot fill up while we poll.
        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() < deadline => std::thread::sleep(PROBE_POLL),
                Ok(None) => {
                    tracing::warn!(
                        "ffprobe on {} gave no answer within {}s, killing it",
                        path.display(),
                        self.timeout.as_secs()
                    );
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                Err(e) => {
                    tracing::debug!("ffprobe wait failed: {e}");
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
            }
        };

        if !status.success() {
            return None;
        }
        let mut stdout = String::new();
        child.stdout.take()?.read_to_string(&mut stdout).ok()?;
        parse_probe_output(&stdout)
    }
}

fn parse_probe_output(stdout: &str) -> Option<f64> {
    let secs: f64 = stdout.trim().parse().ok()?;
    (secs.is_finite() && secs > 0.0).then_some(secs)
}

pub struct DurationResolver {
    sources: Vec<Box<dyn DurationSource>>,
    fallback_secs: u32,
}

impl DurationResolver {
    pub fn new(sources: Vec<Box<dyn DurationSource>>, fallback_secs: u32) -> Self {
        Self {
            sources,
            fallback_secs: fallback_secs.max(1),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            vec![
                Box::new(EmbeddedDuration),
                Box::new(FfprobeDuration::new(cfg.ffprobe.clone()).with_timeout(cfg.probe_timeout)),
            ],
            cfg.fallback_duration_secs,
        )
    }

    pub fn resolve(&self, item: &CatalogItem) -> u32 {
        for source in &self.sources {
            match source.duration_secs(item.path()) {
                Some(secs) if secs.is_finite() && secs > 0.0 => {
                    let whole = (secs as u32).max(1);
                    tracing::debug!("{}: {whole}s via {}", item.path().display(), source.name());
                    return whole;
                }
                _ => tracing::debug!("{}: no duration via {}", item.path().display(), source.name()),
            }
        }

        tracing::warn!(
            "could not determine duration of {}; assuming {}s",
            item.path().display(),
            self.fallback_secs
        );
        self.fallback_secs
    }
}
