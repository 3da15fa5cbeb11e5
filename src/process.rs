// --- Pipeline process ----------------------------------------------------------------
//
// The encoder is an owned resource: whoever holds the `PipelineProcess` is
// responsible for it, and dropping the real implementation kills the child
// (`kill_on_drop`). The supervisor additionally walks every exit path through
// `shutdown`, which asks politely first.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::ProcessError;
use crate::pipeline::{redact_line, PipelineInvocation};

/// How a pipeline process ended. Diagnostic only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl PipelineExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for PipelineExit {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for PipelineExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "code {code}"),
            (None, Some(sig)) => write!(f, "signal {sig}"),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

#[async_trait]
pub trait PipelineProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Resolve once the process has exited.
    async fn wait(&mut self) -> Result<PipelineExit, ProcessError>;

    /// Ask the process to finish (SIGTERM on unix). Does not wait.
    fn terminate(&mut self) -> Result<(), ProcessError>;

    /// Force the process down and reap it.
    async fn kill(&mut self) -> Result<(), ProcessError>;
}

#[async_trait]
pub trait PipelineLauncher: Send + Sync {
    async fn launch(&self, invocation: &PipelineInvocation) -> Result<Box<dyn PipelineProcess>, ProcessError>;
}

/// Terminate, give the process `grace` to exit on its own, then kill it.
/// Returns the exit status when one could be observed.
pub async fn shutdown(process: &mut dyn PipelineProcess, grace: Duration) -> Option<PipelineExit> {
    if let Err(e) = process.terminate() {
        tracing::warn!("{e}");
    }

    match tokio::time::timeout(grace, process.wait()).await {
        Ok(Ok(exit)) => return Some(exit),
        Ok(Err(e)) => tracing::warn!("{e}"),
        Err(_) => tracing::warn!("pipeline ignored terminate for {}s, killing", grace.as_secs()),
    }

    if let Err(e) = process.kill().await {
        tracing::warn!("{e}");
        return None;
    }
    process.wait().await.ok()
}

// --- ffmpeg ----------------------------------------------------------------------------

/// Spawns the real encoder and forwards its stderr to the log.
#[derive(Default)]
pub struct FfmpegLauncher;

pub struct FfmpegProcess {
    child: Child,
    stderr_task: Option<JoinHandle<()>>,
}

#[async_trait]
impl PipelineLauncher for FfmpegLauncher {
    async fn launch(&self, invocation: &PipelineInvocation) -> Result<Box<dyn PipelineProcess>, ProcessError> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

        // ffmpeg runs at `-loglevel error`, so anything on stderr is worth a warning.
        let stderr_task = child.stderr.take().map(|stderr| {
            let stream_url = invocation.stream_url.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = redact_line(&line, &stream_url);
                    if !line.trim().is_empty() {
                        tracing::warn!("ffmpeg: {}", line.trim_end());
                    }
                }
            })
        });

        tracing::info!("ffmpeg started (pid {})", child.id().unwrap_or_default());
        Ok(Box::new(FfmpegProcess { child, stderr_task }))
    }
}

#[async_trait]
impl PipelineProcess for FfmpegProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<PipelineExit, ProcessError> {
        let status = self.child.wait().await.map_err(ProcessError::Wait)?;
        Ok(status.into())
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> Result<(), ProcessError> {
        // Already reaped.
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        // SAFETY: `pid` is our own child and has not been reaped yet, so it
        // cannot have been recycled for an unrelated process.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            Ok(())
        } else {
            Err(ProcessError::Signal(std::io::Error::last_os_error()))
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> Result<(), ProcessError> {
        self.child.start_kill().map_err(ProcessError::Signal)
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        self.child.kill().await.map_err(ProcessError::Signal)
    }
}

impl Drop for FfmpegProcess {
    fn drop(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn invocation(program: &str, args: &[&str]) -> PipelineInvocation {
        PipelineInvocation {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            stream_url: String::new(),
        }
    }

    #[tokio::test]
    async fn exit_code_is_reported() {
        let mut p = FfmpegLauncher
            .launch(&invocation("sh", &["-c", "exit 3"]))
            .await
            .unwrap();
        let exit = p.wait().await.unwrap();
        assert_eq!(exit.code, Some(3));
        assert!(!exit.success());
        assert_eq!(exit.to_string(), "code 3");
    }

    #[tokio::test]
    async fn shutdown_terminates_a_cooperative_process() {
        let mut p = FfmpegLauncher.launch(&invocation("sleep", &["30"])).await.unwrap();
        let exit = shutdown(p.as_mut(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(exit.signal, Some(libc::SIGTERM));
    }

    #[tokio::test]
    async fn shutdown_kills_a_process_ignoring_sigterm() {
        let mut p = FfmpegLauncher
            .launch(&invocation("sh", &["-c", "trap '' TERM; sleep 30"]))
            .await
            .unwrap();
        // Let the shell install its trap before we signal it.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let exit = shutdown(p.as_mut(), Duration::from_millis(300)).await.unwrap();
        assert_eq!(exit.signal, Some(libc::SIGKILL));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let err = FfmpegLauncher
            .launch(&invocation("/nonexistent/ffmpeg", &[]))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
