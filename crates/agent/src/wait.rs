use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use procura_core::domain::quote_unit::{QuoteUnit, QuoteUnitStatus};
use procura_core::domain::request::QuoteRequestId;
use procura_db::repositories::QuoteUnitRepository;

use crate::error::EngineError;
use crate::signal::ReplySignal;

/// Cap for deadlines that would overflow the clock; roughly thirty years.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Final state of one wait. Timing out with a partial snapshot is a normal result.
#[derive(Clone, Debug, PartialEq)]
pub struct WaitSnapshot {
    pub units: Vec<QuoteUnit>,
    pub received: Vec<QuoteUnit>,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl WaitSnapshot {
    fn from_units(units: Vec<QuoteUnit>, timed_out: bool, elapsed: Duration) -> Self {
        let received =
            units.iter().filter(|unit| unit.status == QuoteUnitStatus::Received).cloned().collect();
        Self { units, received, timed_out, elapsed }
    }

    pub fn still_pending(&self) -> Vec<QuoteUnit> {
        self.units.iter().filter(|unit| unit.status == QuoteUnitStatus::Pending).cloned().collect()
    }
}

/// Deadline-bounded poll over a request's quote units.
pub struct WaitScheduler {
    units: Arc<dyn QuoteUnitRepository>,
    poll_interval: Duration,
    signal: Option<ReplySignal>,
}

impl WaitScheduler {
    pub fn new(units: Arc<dyn QuoteUnitRepository>, poll_interval: Duration) -> Self {
        Self { units, poll_interval, signal: None }
    }

    /// Re-reads the store as soon as a correlated reply is signalled instead of waiting
    /// for the next tick.
    pub fn with_signal(mut self, signal: ReplySignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Returns once `expected` units left `pending` or `deadline` elapsed, whichever
    /// comes first. Store errors propagate; the deadline never does.
    pub async fn wait_for(
        &self,
        request_id: &QuoteRequestId,
        expected: usize,
        deadline: Duration,
    ) -> Result<WaitSnapshot, EngineError> {
        let started = Instant::now();
        let deadline_at = started.checked_add(deadline).unwrap_or_else(|| started + FAR_FUTURE);

        loop {
            // Enabled before the read so a reply landing in between is not missed.
            let mut notified = self.signal.as_ref().map(|signal| Box::pin(signal.notified()));
            if let Some(notified) = notified.as_mut() {
                notified.as_mut().enable();
            }

            let units = self.units.list_for_request(request_id).await?;
            let settled = units.iter().filter(|unit| unit.status.is_terminal_for_wait()).count();
            let now = Instant::now();

            if settled >= expected {
                let snapshot = WaitSnapshot::from_units(units, false, now - started);
                info!(
                    event_name = "engine.wait.completed",
                    request_id = %request_id,
                    received = snapshot.received.len(),
                    expected,
                    elapsed_ms = snapshot.elapsed.as_millis() as u64,
                    "all expected replies arrived"
                );
                return Ok(snapshot);
            }
            if now >= deadline_at {
                let snapshot = WaitSnapshot::from_units(units, true, now - started);
                info!(
                    event_name = "engine.wait.timed_out",
                    request_id = %request_id,
                    received = snapshot.received.len(),
                    expected,
                    "deadline reached with partial replies"
                );
                return Ok(snapshot);
            }

            debug!(
                event_name = "engine.wait.tick",
                request_id = %request_id,
                settled,
                expected,
                "waiting for replies"
            );
            let nap = self.poll_interval.min(deadline_at - now);
            match notified {
                Some(notified) => {
                    tokio::select! {
                        _ = tokio::time::sleep(nap) => {}
                        _ = notified => {}
                    }
                }
                None => tokio::time::sleep(nap).await,
            }
        }
    }
}
