//! Outgoing request buffering and result correlation.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::Error;
use crate::protocol::{CorrelationId, OutboundRequest, RequestAction, ResultMessage};

/// Future half of one queued request.
pub type ResultReceiver = oneshot::Receiver<Result<Value, Error>>;

/// Buffers outgoing requests, assigns monotonic correlation ids, and routes
/// incoming results back to the caller that queued the request.
///
/// Not synchronized: the owning connection guards it together with the rest
/// of its mutable state.
#[derive(Default)]
pub struct RequestQueue {
    next_correlation: CorrelationId,
    pending: Vec<OutboundRequest>,
    results: HashMap<CorrelationId, oneshot::Sender<Result<Value, Error>>>,
}

impl RequestQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a request and return the receiver its result will arrive on.
    pub fn add(&mut self, action: RequestAction) -> ResultReceiver {
        let correlation_id = self.next_correlation;
        self.next_correlation += 1;
        let (tx, rx) = oneshot::channel();
        self.results.insert(correlation_id, tx);
        self.pending.push(OutboundRequest {
            correlation_id,
            action,
        });
        rx
    }

    /// Take the batch queued so far, in enqueue order.
    #[must_use]
    pub fn drain(&mut self) -> Vec<OutboundRequest> {
        std::mem::take(&mut self.pending)
    }

    /// Whether any requests are waiting to be sent.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Route one result to the caller that queued the matching request.
    ///
    /// A correlation id with no waiter is a duplicate delivery (the batch
    /// response and the poll channel can both carry the same result) and is
    /// dropped.
    pub fn handle_result(&mut self, message: ResultMessage) {
        let Some(tx) = self.results.remove(&message.correlation_id) else {
            tracing::debug!(
                correlation_id = message.correlation_id,
                "dropping result with no waiter"
            );
            return;
        };
        let outcome = match message.error {
            Some(error) => Err(Error::Server(error)),
            None => Ok(message.result.unwrap_or(Value::Null)),
        };
        // The receiver may be gone (fire-and-forget destroy).
        let _ = tx.send(outcome);
    }

    /// Reject every waiter. Called once at connection teardown so no future
    /// dangles unresolved.
    pub fn fail_all(&mut self) {
        for (_, tx) in self.results.drain() {
            let _ = tx.send(Err(Error::ConnectionLost));
        }
    }
}
