// --- Pipeline supervisor ---------------------------------------------------------------
//
// The supervisor owns the encoder for its whole life and cycles through an
// explicit state machine:
//
//   Gating -> Spawning -> Running -> Exiting -> Backoff -> Gating -> ...
//
// `Stopped` is only reachable through cancellation. Any exit, clean or not,
// leads to a backoff and a fresh cycle; there is no retry ceiling.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::catalog::{load_catalog, CatalogFilter, CatalogItem};
use crate::clock::{spawn_clock, ClockHandle, FileSink, NowPlayingSink, OpenLoopClock};
use crate::config::{Config, PipelineMode};
use crate::duration::DurationResolver;
use crate::error::ProcessError;
use crate::gate::{GateOutcome, ReachabilityGate};
use crate::label::now_playing_label;
use crate::pipeline::{build_invocation, PipelineInputs};
use crate::playlist;
use crate::process::{shutdown, FfmpegLauncher, PipelineExit, PipelineLauncher, PipelineProcess};
use crate::schedule::Schedule;
use crate::status::{StatusReporter, SupervisorState, SupervisorStatus};

pub type Labeler = Arc<dyn Fn(&CatalogItem) -> String + Send + Sync>;

/// One pipeline process lifetime.
struct Cycle {
    span: tracing::Span,
    process: Box<dyn PipelineProcess>,
    /// Per-track mode bounds the wait; continuous mode waits forever.
    deadline: Option<Duration>,
}

enum Phase {
    Gating,
    Spawning,
    Running(Cycle),
    Exiting(Cycle, Option<PipelineExit>),
    Backoff,
    Stopped,
}

impl Phase {
    fn state(&self) -> SupervisorState {
        match self {
            Phase::Gating => SupervisorState::Gating,
            Phase::Spawning => SupervisorState::Spawning,
            Phase::Running(_) => SupervisorState::Running,
            Phase::Exiting(..) => SupervisorState::Exiting,
            Phase::Backoff => SupervisorState::Backoff,
            Phase::Stopped => SupervisorState::Stopped,
        }
    }
}

enum Waited {
    Exited(Result<PipelineExit, ProcessError>),
    TimedOut,
    Cancelled,
}

async fn wait_bounded(process: &mut dyn PipelineProcess, deadline: Option<Duration>) -> Waited {
    match deadline {
        None => Waited::Exited(process.wait().await),
        Some(limit) => match tokio::time::timeout(limit, process.wait()).await {
            Ok(res) => Waited::Exited(res),
            Err(_) => Waited::TimedOut,
        },
    }
}

/// The catalog-to-schedule step of a cycle. Directory scans, tag parsing
/// and ffprobe all block, so this runs on the blocking pool.
#[derive(Clone)]
struct Sequencer {
    mode: PipelineMode,
    playlist_dir: PathBuf,
    concat_file: PathBuf,
    filter: CatalogFilter,
    resolver: Arc<DurationResolver>,
    labeler: Labeler,
    /// Remainder of the current shuffled pass (per-track mode).
    pending: Arc<Mutex<VecDeque<CatalogItem>>>,
}

impl Sequencer {
    fn from_config(config: &Config) -> Self {
        Self {
            mode: config.mode,
            playlist_dir: config.playlist_dir.clone(),
            concat_file: config.concat_file.clone(),
            filter: CatalogFilter::new(&config.audio_extensions),
            resolver: Arc::new(DurationResolver::from_config(config)),
            labeler: Arc::new(now_playing_label),
            pending: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Persist this cycle's playlist and build the schedule from the very
    /// order that was written. `None` when there is nothing to play.
    fn rebuild(&self) -> std::io::Result<Option<Schedule>> {
        let Some(order) = self.sequence()? else {
            return Ok(None);
        };
        Ok(Some(Schedule::build(&order, &self.resolver, self.labeler.as_ref())))
    }

    fn sequence(&self) -> std::io::Result<Option<Vec<CatalogItem>>> {
        match self.mode {
            PipelineMode::Continuous => {
                let catalog = load_catalog(&self.playlist_dir, &self.filter);
                if catalog.is_empty() {
                    return Ok(None);
                }
                playlist::build_concat_playlist(&catalog, &self.concat_file).map(Some)
            }
            PipelineMode::PerTrack => {
                let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
                loop {
                    if pending.is_empty() {
                        let catalog = load_catalog(&self.playlist_dir, &self.filter);
                        if catalog.is_empty() {
                            return Ok(None);
                        }
                        *pending = playlist::shuffle(&catalog).into();
                    }
                    let Some(item) = pending.pop_front() else {
                        return Ok(None);
                    };
                    if !item.path().is_file() {
                        tracing::debug!("{} disappeared, skipping", item.path().display());
                        continue;
                    }
                    let order = vec![item];
                    playlist::write_concat_list(&self.concat_file, &order)?;
                    return Ok(Some(order));
                }
            }
        }
    }
}

pub struct Supervisor {
    config: Config,
    stream_url: String,
    sequencer: Sequencer,
    gate: ReachabilityGate,
    launcher: Arc<dyn PipelineLauncher>,
    sink: Arc<dyn NowPlayingSink>,
    status: StatusReporter,
    clock: Option<ClockHandle>,
}

impl Supervisor {
    /// Production wiring: TCP gate, ffmpeg, ffprobe, now-playing text file.
    pub fn new(config: Config, stream_url: impl Into<String>) -> Self {
        Self {
            sequencer: Sequencer::from_config(&config),
            gate: ReachabilityGate::from_config(&config),
            launcher: Arc::new(FfmpegLauncher),
            sink: Arc::new(FileSink::new(config.nowplaying_file.clone())),
            status: StatusReporter::new(config.status_file.clone(), config.mode),
            clock: None,
            stream_url: stream_url.into(),
            config,
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn PipelineLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn NowPlayingSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_resolver(mut self, resolver: DurationResolver) -> Self {
        self.sequencer.resolver = Arc::new(resolver);
        self
    }

    pub fn with_gate(mut self, gate: ReachabilityGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_labeler<F>(mut self, labeler: F) -> Self
    where
        F: Fn(&CatalogItem) -> String + Send + Sync + 'static,
    {
        self.sequencer.labeler = Arc::new(labeler);
        self
    }

    /// Drive cycles until `cancel` fires. Returns the final status.
    pub async fn run(mut self, cancel: CancellationToken) -> SupervisorStatus {
        info!("supervisor started ({:?} pipeline)", self.config.mode);

        let mut phase = Phase::Gating;
        loop {
            let state = phase.state();
            self.status.update(|s| s.state = state);

            phase = match phase {
                Phase::Gating => self.gating(&cancel).await,
                Phase::Spawning => {
                    let id = Uuid::new_v4();
                    let span = tracing::info_span!("cycle", %id);
                    self.spawning(id, span.clone(), &cancel).instrument(span).await
                }
                Phase::Running(cycle) => {
                    let span = cycle.span.clone();
                    self.running(cycle, &cancel).instrument(span).await
                }
                Phase::Exiting(cycle, exit) => {
                    let span = cycle.span.clone();
                    self.exiting(cycle, exit).instrument(span).await
                }
                Phase::Backoff => self.backoff(&cancel).await,
                Phase::Stopped => break,
            };
        }

        self.stop_clock().await;
        info!("supervisor stopped");
        self.status.snapshot().clone()
    }

    async fn gating(&mut self, cancel: &CancellationToken) -> Phase {
        match self.gate.wait(cancel).await {
            GateOutcome::Reachable => Phase::Spawning,
            GateOutcome::Cancelled => Phase::Stopped,
        }
    }

    async fn spawning(&mut self, id: Uuid, span: tracing::Span, cancel: &CancellationToken) -> Phase {
        if cancel.is_cancelled() {
            return Phase::Stopped;
        }

        let sequencer = self.sequencer.clone();
        let cycle_span = tracing::Span::current();
        let rebuild = tokio::task::spawn_blocking(move || cycle_span.in_scope(|| sequencer.rebuild()));
        let rebuilt = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = rebuild => Some(res),
        };
        let Some(rebuilt) = rebuilt else {
            info!("shutdown requested during playlist rebuild");
            return Phase::Stopped;
        };

        let schedule = match rebuilt {
            Ok(Ok(Some(schedule))) => schedule,
            Ok(Ok(None)) => {
                warn!("no audio tracks in {}", self.config.playlist_dir.display());
                self.status.update(|s| s.last_error = Some("no playable audio".into()));
                return Phase::Backoff;
            }
            Ok(Err(e)) => {
                warn!("failed to write playlist {}: {e}", self.config.concat_file.display());
                self.status.update(|s| s.last_error = Some(format!("playlist: {e}")));
                return Phase::Backoff;
            }
            Err(e) => {
                warn!("playlist rebuild failed: {e}");
                self.status.update(|s| s.last_error = Some(format!("playlist: {e}")));
                return Phase::Backoff;
            }
        };

        let tracks = schedule.len();
        let deadline = match self.config.mode {
            PipelineMode::Continuous => None,
            PipelineMode::PerTrack => {
                Some(Duration::from_secs(schedule.total_secs()) + self.config.track_exit_buffer)
            }
        };

        self.stop_clock().await;
        if cancel.is_cancelled() {
            return Phase::Stopped;
        }
        self.clock = Some(spawn_clock(
            OpenLoopClock::new(schedule, self.config.clock_epsilon),
            self.sink.clone(),
            cancel,
        ));

        let video = Some(self.config.video_file.as_path()).filter(|p| p.is_file());
        if video.is_none() {
            info!("background video missing; using solid colour fallback");
        }
        let logo = Some(self.config.logo_file.as_path()).filter(|p| p.is_file());
        let invocation = build_invocation(
            &self.config,
            &PipelineInputs {
                stream_url: &self.stream_url,
                playlist: &self.config.concat_file,
                nowplaying: &self.config.nowplaying_file,
                video,
                logo,
            },
        );

        info!("starting pipeline: {}", invocation.redacted());
        match self.launcher.launch(&invocation).await {
            Ok(process) => {
                let pid = process.id();
                self.status.update(|s| {
                    s.cycle_id = Some(id);
                    s.cycles += 1;
                    if s.cycles > 1 {
                        s.restarts += 1;
                    }
                    s.pid = pid;
                    s.tracks = tracks;
                    s.last_error = None;
                });
                Phase::Running(Cycle {
                    span,
                    process,
                    deadline,
                })
            }
            Err(e) => {
                warn!("{e}");
                self.stop_clock().await;
                self.status.update(|s| s.last_error = Some(e.to_string()));
                Phase::Backoff
            }
        }
    }

    async fn running(&mut self, mut cycle: Cycle, cancel: &CancellationToken) -> Phase {
        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => Waited::Cancelled,
            w = wait_bounded(cycle.process.as_mut(), cycle.deadline) => w,
        };

        let grace = self.config.terminate_grace;
        match waited {
            Waited::Exited(Ok(exit)) => Phase::Exiting(cycle, Some(exit)),
            Waited::Exited(Err(e)) => {
                warn!("{e}");
                let exit = shutdown(cycle.process.as_mut(), grace).await;
                Phase::Exiting(cycle, exit)
            }
            Waited::TimedOut => {
                info!("track window elapsed, stopping pipeline");
                let exit = shutdown(cycle.process.as_mut(), grace).await;
                Phase::Exiting(cycle, exit)
            }
            Waited::Cancelled => {
                info!("shutdown requested, stopping pipeline");
                let exit = shutdown(cycle.process.as_mut(), grace).await;
                self.stop_clock().await;
                let summary = exit.map(|e| e.to_string());
                self.status.update(|s| {
                    s.pid = None;
                    s.last_exit = summary;
                });
                Phase::Stopped
            }
        }
    }

    async fn exiting(&mut self, cycle: Cycle, exit: Option<PipelineExit>) -> Phase {
        self.stop_clock().await;
        drop(cycle);

        let summary = exit.map_or_else(|| "unknown status".to_string(), |e| e.to_string());
        match exit {
            Some(e) if e.success() && self.config.mode == PipelineMode::PerTrack => {
                info!("pipeline finished track ({summary})")
            }
            _ => warn!("pipeline exited ({summary})"),
        }
        self.status.update(|s| {
            s.pid = None;
            s.last_exit = Some(summary);
        });
        Phase::Backoff
    }

    async fn backoff(&mut self, cancel: &CancellationToken) -> Phase {
        let delay = self.config.restart_backoff;
        info!("restarting in {delay:?}");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Phase::Stopped,
            _ = tokio::time::sleep(delay) => Phase::Gating,
        }
    }

    async fn stop_clock(&mut self) {
        if let Some(clock) = self.clock.take() {
            clock.stop().await;
        }
    }
}
