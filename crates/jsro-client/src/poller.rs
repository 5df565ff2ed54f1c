//! Long-poll loop: watchdog, deduplication, ordering.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;

use jsro_core::error::ProtocolError;
use jsro_core::protocol::{MessageId, PollMessage, PollPayload};
use jsro_core::transport::Method;

use crate::connection::ConnectionInner;

struct PollState {
    generation: u64,
    last_seen: Option<MessageId>,
    stopped: bool,
}

/// Drives the long-poll loop against the session URL.
///
/// One attempt per cycle: tag it with the current generation, GET with the
/// last-seen message id appended, race the request against the watchdog.
/// A watchdog expiry aborts the request (by dropping it) and reissues
/// immediately with the same last-seen id; a genuine failure is terminal and
/// reported as connection loss. Outcomes from a superseded generation are
/// discarded.
pub(crate) struct Poller {
    session_url: String,
    watchdog: Duration,
    state: Mutex<PollState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    pub(crate) fn new(session_url: String, watchdog: Duration) -> Self {
        Self {
            session_url,
            watchdog,
            state: Mutex::new(PollState {
                generation: 0,
                last_seen: None,
                stopped: false,
            }),
            task: Mutex::new(None),
        }
    }

    /// Spawn the loop. Called once, right after the session is established.
    pub(crate) fn start(&self, conn: &Arc<ConnectionInner>) {
        let task = tokio::spawn(run(Arc::downgrade(conn)));
        *self.task.lock().unwrap() = Some(task);
    }

    /// Stop issuing attempts and abort the in-flight one.
    pub(crate) fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.stopped = true;
            // Supersede whatever is in flight.
            state.generation += 1;
        }
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }

    /// Begin an attempt: bump the generation and build the poll URL.
    /// `None` once stopped; a stopped poller issues no further requests.
    fn begin_attempt(&self) -> Option<(u64, String)> {
        let mut state = self.state.lock().unwrap();
        if state.stopped {
            return None;
        }
        state.generation += 1;
        let url = match state.last_seen {
            Some(id) => format!("{}/{id}", self.session_url),
            None => self.session_url.clone(),
        };
        Some((state.generation, url))
    }

    /// Accept a response for `generation`: drop already-seen message ids,
    /// advance the last-seen id to the maximum observed, and hand back the
    /// surviving payloads in increasing id order.
    ///
    /// `Ok(None)` when the attempt was superseded in the meantime.
    fn accept(
        &self,
        generation: u64,
        body: serde_json::Value,
    ) -> Result<Option<Vec<PollPayload>>, ProtocolError> {
        let mut state = self.state.lock().unwrap();
        if state.stopped || state.generation != generation {
            return Ok(None);
        }
        let messages: Vec<PollMessage> = serde_json::from_value(body)
            .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))?;
        let mut fresh: Vec<PollMessage> = messages
            .into_iter()
            .filter(|m| state.last_seen.is_none_or(|seen| m.id > seen))
            .collect();
        fresh.sort_by_key(|m| m.id);
        fresh.dedup_by_key(|m| m.id);
        if let Some(last) = fresh.last() {
            state.last_seen = Some(last.id);
        }
        Ok(Some(fresh.into_iter().map(|m| m.payload).collect()))
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.state.lock().unwrap();
        !state.stopped && state.generation == generation
    }
}

/// The poll loop body. Holds only a weak reference between attempts so a
/// dropped connection ends the loop.
async fn run(conn: Weak<ConnectionInner>) {
    loop {
        let Some(inner) = conn.upgrade() else { return };
        let Some((generation, url)) = inner.poller.begin_attempt() else {
            return;
        };

        let request = inner.transport().request(Method::Get, &url, None);
        match timeout(inner.poller.watchdog, request).await {
            // Watchdog expiry is benign keepalive churn: the drop aborted
            // the GET, reissue with the same last-seen id.
            Err(_) => tracing::trace!(generation, "poll watchdog expired, reissuing"),
            Ok(Ok(body)) => match inner.poller.accept(generation, body) {
                Ok(Some(deliveries)) => inner.on_poll(deliveries),
                // Superseded by stop().
                Ok(None) => return,
                Err(e) => {
                    inner.handle_loss(e.into());
                    return;
                }
            },
            Ok(Err(e)) => {
                if inner.poller.is_current(generation) {
                    inner.handle_loss(e.into());
                }
                return;
            }
        }
    }
}
