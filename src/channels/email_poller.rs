//! Triage poller: one task, one cycle per tick.
//!
//! Each tick:
//! 1. Opens a fresh mailbox session via the connector
//! 2. Lists unread messages newer than `now - lookback`
//! 3. Runs them through the `TriageProcessor`, which skips ids it handled in
//!    an earlier cycle since consecutive windows overlap
//!
//! A cycle runs to completion before the next tick is awaited, so cycles
//! never overlap. Ticks missed while a cycle was running are skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::channels::mailbox::MailboxConnector;
use crate::config::TriageConfig;
use crate::pipeline::TriageProcessor;
use crate::pipeline::types::CycleReport;

/// Spawn a background task that runs a triage cycle on every tick.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop polling.
pub fn spawn_triage_poller(
    connector: Arc<dyn MailboxConnector>,
    processor: Arc<TriageProcessor>,
    config: TriageConfig,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            "Triage poller started: polling every {}s, looking back {}s",
            config.poll_interval.as_secs(),
            config.lookback.as_secs()
        );

        let mut tick = tokio::time::interval(config.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Triage poller shutting down");
                return;
            }

            poll_once(connector.as_ref(), &processor, &config).await;
        }
    });

    (handle, shutdown_flag)
}

/// Run a single cycle: connect → list → process.
///
/// Session or listing failures are logged and end the cycle early; the
/// next tick starts over with a new session.
pub async fn poll_once(
    connector: &dyn MailboxConnector,
    processor: &TriageProcessor,
    config: &TriageConfig,
) -> Option<CycleReport> {
    let mailbox = match connector.connect().await {
        Ok(mailbox) => mailbox,
        Err(e) => {
            error!("Mailbox session failed: {e}");
            return None;
        }
    };

    let lookback = chrono::Duration::from_std(config.lookback).unwrap_or(chrono::Duration::zero());
    let since = Utc::now() - lookback;

    match processor.run_cycle(mailbox.as_ref(), since).await {
        Ok(report) => Some(report),
        Err(e) => {
            error!("Listing unread messages failed: {e}");
            None
        }
    }
}
