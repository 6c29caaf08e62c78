//! Periodic device poll: fetch → normalize → classify → control, once per
//! interval, starting immediately.
//!
//! ```text
//! start ──▶ cycle ──[interval]──▶ cycle ──[interval]──▶ ...
//!                                                    │
//!                                  stop / drop ──────┘ (no further cycles)
//! ```
//!
//! Cycles run one at a time on a single task. A slow device delays the next
//! tick instead of causing a burst. A fetch that is still outstanding when
//! the poller is stopped is abandoned and its result never published.

use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dashboard::{Dashboard, SharedDashboard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A reading was ingested and published.
    Published,
    /// Fetch failed; the last good state stays published.
    Failed,
    /// The poller was stopped while the fetch was outstanding.
    Discarded,
}

pub struct Poller {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    /// Spawn the poll loop. Must be called inside a tokio runtime.
    pub fn start(dashboard: SharedDashboard, interval: Duration) -> Self {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            run(dashboard, interval, task_token).await;
        });
        Self {
            token,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel the loop and wait for it to exit. No cycle starts after this
    /// returns.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("poller task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(dashboard: SharedDashboard, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval_ms = interval.as_millis() as u64, "poller started");

    let mut published: u64 = 0;
    let mut failed: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match cycle(&dashboard, &token).await {
            CycleOutcome::Published => published += 1,
            CycleOutcome::Failed => failed += 1,
            CycleOutcome::Discarded => {
                debug!("poll result discarded after stop");
                break;
            }
        }
    }

    info!(published, failed, "poller stopped");
}

/// Run one poll cycle against `dashboard`.
pub async fn cycle(dashboard: &Dashboard, token: &CancellationToken) -> CycleOutcome {
    let fetched = tokio::select! {
        biased;
        _ = token.cancelled() => return CycleOutcome::Discarded,
        r = dashboard.fetch() => r,
    };
    if token.is_cancelled() {
        return CycleOutcome::Discarded;
    }

    match fetched {
        Ok(payload) => {
            if let Some(command) = dashboard.ingest(&payload).await {
                debug!(command = command.name(), "alert rule fired");
            }
            CycleOutcome::Published
        }
        Err(e) => {
            match dashboard.current().device.map(|d| d.timestamp()) {
                Some(at) => warn!(
                    stale_secs = (OffsetDateTime::now_utc() - at).whole_seconds(),
                    "poll failed: {e}"
                ),
                None => warn!("poll failed: {e}"),
            }
            dashboard.record_poll_failure(&e).await;
            CycleOutcome::Failed
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
