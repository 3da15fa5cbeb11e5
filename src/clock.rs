// --- Now-playing clock --------------------------------------------------------------
//
// ffmpeg gives us no signal about which concat entry it is decoding, so the
// label is driven open-loop: walk the schedule, publish, sleep for the entry's
// duration (minus a small bias so the label flips early rather than late),
// wrap around after the last entry just like `-stream_loop -1` does.
//
// Drift versus the real playback position only grows within a cycle; it is
// reset when the supervisor starts a new cycle with a fresh clock.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::schedule::Schedule;

/// What to show and for how long.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tick {
    pub index: usize,
    pub label: String,
    pub hold: Duration,
}

/// Source of "currently audible" labels. The open-loop implementation below
/// is the only one today; a feedback-driven clock can replace it without the
/// supervisor noticing.
pub trait NowPlayingClock: Send + 'static {
    /// Advance to the next entry. `None` means there is nothing to show.
    fn advance(&mut self) -> Option<Tick>;
}

pub struct OpenLoopClock {
    schedule: Schedule,
    next: usize,
    epsilon: Duration,
}

impl OpenLoopClock {
    pub fn new(schedule: Schedule, epsilon: Duration) -> Self {
        Self {
            schedule,
            next: 0,
            epsilon,
        }
    }
}

impl NowPlayingClock for OpenLoopClock {
    fn advance(&mut self) -> Option<Tick> {
        let entry = self.schedule.entries().get(self.next)?;
        let index = self.next;
        self.next = (self.next + 1) % self.schedule.len();

        let hold = Duration::from_secs(u64::from(entry.duration_secs))
            .saturating_sub(self.epsilon)
            .max(Duration::from_secs(1));
        Some(Tick {
            index,
            label: entry.label.clone(),
            hold,
        })
    }
}

/// Where labels go. Exactly one clock writes to a sink at a time.
pub trait NowPlayingSink: Send + Sync {
    fn publish(&self, label: &str) -> std::io::Result<()>;
}

/// The text file ffmpeg's `drawtext` reloads.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl NowPlayingSink for FileSink {
    fn publish(&self, label: &str) -> std::io::Result<()> {
        std::fs::write(&self.path, label.as_bytes())
    }
}

/// A running clock task.
pub struct ClockHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ClockHandle {
    /// Cancel and wait for the task, so the sink has no writer afterwards.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                tracing::warn!("now-playing clock task failed: {e}");
            }
        }
    }
}

/// Start publishing on a background task. The task also stops when `parent`
/// is cancelled.
pub fn spawn_clock<C>(mut clock: C, sink: Arc<dyn NowPlayingSink>, parent: &CancellationToken) -> ClockHandle
where
    C: NowPlayingClock,
{
    let cancel = parent.child_token();
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        tracing::debug!("now-playing clock started");
        while !token.is_cancelled() {
            let Some(tick) = clock.advance() else {
                break;
            };

            match sink.publish(&tick.label) {
                Ok(()) => tracing::info!("now playing: {}", tick.label),
                Err(e) => tracing::warn!("failed to write now-playing label: {e}"),
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(tick.hold) => {}
            }
        }
        tracing::debug!("now-playing clock stopped");
    });

    ClockHandle { cancel, task }
}
