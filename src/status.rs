// --- Status snapshot ------------------------------------------------------------------
//
// Optional JSON file describing what the supervisor is doing right now, for
// operators poking at the box over SSH or a dashboard tailing the file.

use std::path::PathBuf;

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::PipelineMode;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Gating,
    Spawning,
    Running,
    Exiting,
    Backoff,
    Stopped,
}

#[derive(Clone, Debug, Serialize)]
pub struct SupervisorStatus {
    pub state: SupervisorState,
    pub mode: PipelineMode,
    pub cycle_id: Option<Uuid>,
    pub cycles: u64,
    /// Pipeline launches after the first one.
    pub restarts: u64,
    pub pid: Option<u32>,
    pub tracks: usize,
    pub last_exit: Option<String>,
    pub last_error: Option<String>,
    pub updated_at: String,
}

pub struct StatusReporter {
    path: Option<PathBuf>,
    status: SupervisorStatus,
}

impl StatusReporter {
    pub fn new(path: Option<PathBuf>, mode: PipelineMode) -> Self {
        Self {
            path,
            status: SupervisorStatus {
                state: SupervisorState::Gating,
                mode,
                cycle_id: None,
                cycles: 0,
                restarts: 0,
                pid: None,
                tracks: 0,
                last_exit: None,
                last_error: None,
                updated_at: now_rfc3339(),
            },
        }
    }

    pub fn snapshot(&self) -> &SupervisorStatus {
        &self.status
    }

    /// Apply `f` and persist the result. Write failures are logged only.
    pub fn update<F>(&mut self, f: F)
    where
        F: FnOnce(&mut SupervisorStatus),
    {
        f(&mut self.status);
        self.status.updated_at = now_rfc3339();
        if let Err(e) = self.persist() {
            tracing::warn!("failed to write status file: {e}");
        }
    }

    fn persist(&self) -> anyhow::Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(&self.status)?;
        // Readers never see a half-written file.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_json_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let mut reporter = StatusReporter::new(Some(path.clone()), PipelineMode::Continuous);

        reporter.update(|s| {
            s.state = SupervisorState::Running;
            s.pid = Some(4242);
            s.cycles = 1;
        });

        let v: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(v["state"], "running");
        assert_eq!(v["mode"], "continuous");
        assert_eq!(v["pid"], 4242);
        assert!(OffsetDateTime::parse(v["updated_at"].as_str().unwrap(), &Rfc3339).is_ok());
    }

    #[test]
    fn no_path_means_memory_only() {
        let mut reporter = StatusReporter::new(None, PipelineMode::PerTrack);
        reporter.update(|s| s.state = SupervisorState::Backoff);
        assert_eq!(reporter.snapshot().state, SupervisorState::Backoff);
    }
}
