// --- Boot readiness --------------------------------------------------------------------
//
// On a freshly booted Pi the network, resolver and wall clock come up in no
// particular order. TLS-backed ingest endpoints reject a clock stuck in 1970,
// so we hold off the first cycle until DNS answers and NTP has set the date.

use std::time::Duration;

use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::gate::GateOutcome;

const DNS_PROBE: &str = "google.com:443";
const MIN_SANE_YEAR: i32 = 2023;
const RETRY: Duration = Duration::from_secs(2);

pub fn clock_synced(now: OffsetDateTime) -> bool {
    now.year() >= MIN_SANE_YEAR
}

async fn dns_ready() -> bool {
    match tokio::net::lookup_host(DNS_PROBE).await {
        Ok(mut addrs) => addrs.next().is_some(),
        Err(e) => {
            tracing::debug!("lookup of {DNS_PROBE} failed: {e}");
            false
        }
    }
}

async fn retry_until<F, Fut>(what: &str, cancel: &CancellationToken, mut check: F) -> GateOutcome
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    loop {
        let ok = tokio::select! {
            biased;
            _ = cancel.cancelled() => return GateOutcome::Cancelled,
            ok = check() => ok,
        };
        if ok {
            tracing::info!("{what} OK");
            return GateOutcome::Reachable;
        }
        tracing::info!("waiting for {what}...");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return GateOutcome::Cancelled,
            _ = tokio::time::sleep(RETRY) => {}
        }
    }
}

/// Wait until name resolution works and the system clock has been set.
pub async fn wait_until_ready(cancel: &CancellationToken) -> GateOutcome {
    tracing::info!("waiting for system to be fully ready");

    if retry_until("DNS", cancel, dns_ready).await == GateOutcome::Cancelled {
        return GateOutcome::Cancelled;
    }
    let outcome = retry_until("time sync", cancel, || async { clock_synced(OffsetDateTime::now_utc()) }).await;
    if outcome == GateOutcome::Reachable {
        tracing::info!("system ready");
    }
    outcome
}
