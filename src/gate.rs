// --- Reachability gate ---------------------------------------------------------------
//
// Before every (re)start we make sure the ingest endpoint accepts TCP
// connections. Retries are unlimited.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> bool;

    fn target(&self) -> String;
}

pub struct TcpProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: PROBE_TIMEOUT,
        }
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn probe(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect((self.host.as_str(), self.port))).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                tracing::debug!("connect to {}:{} failed: {e}", self.host, self.port);
                false
            }
            Err(_) => {
                tracing::debug!("connect to {}:{} timed out", self.host, self.port);
                false
            }
        }
    }

    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateOutcome {
    Reachable,
    Cancelled,
}

pub struct ReachabilityGate {
    /// `None` bypasses the check entirely.
    probe: Option<Box<dyn ReachabilityProbe>>,
    retry_interval: Duration,
}

impl ReachabilityGate {
    pub fn new(probe: Box<dyn ReachabilityProbe>, retry_interval: Duration) -> Self {
        Self {
            probe: Some(probe),
            retry_interval,
        }
    }

    pub fn bypassed() -> Self {
        Self {
            probe: None,
            retry_interval: Duration::ZERO,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        if cfg.skip_network_check {
            return Self::bypassed();
        }
        Self::new(
            Box::new(TcpProbe::new(cfg.check_host.clone(), cfg.check_port)),
            cfg.retry_interval,
        )
    }

    /// Block until the target is reachable or `cancel` fires.
    pub async fn wait(&self, cancel: &CancellationToken) -> GateOutcome {
        let Some(probe) = self.probe.as_deref() else {
            return GateOutcome::Reachable;
        };

        let mut failures: u64 = 0;
        loop {
            let reachable = tokio::select! {
                biased;
                _ = cancel.cancelled() => return GateOutcome::Cancelled,
                ok = probe.probe() => ok,
            };
            if reachable {
                if failures > 0 {
                    tracing::info!("{} reachable again after {failures} failed checks", probe.target());
                }
                return GateOutcome::Reachable;
            }

            failures += 1;
            tracing::warn!(
                "{} offline, retry in {}s (attempt {failures})",
                probe.target(),
                self.retry_interval.as_secs()
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return GateOutcome::Cancelled,
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }
}
