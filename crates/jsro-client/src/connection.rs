//! Connection lifecycle and the send pipeline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use jsro_core::error::{Error, ProtocolError, StateError};
use jsro_core::events::{EventRegistry, ListenerId};
use jsro_core::protocol::{
    CreateReply, EstablishReply, OutboundRequest, PollPayload, RequestAction, ResultMessage,
};
use jsro_core::queue::{RequestQueue, ResultReceiver};
use jsro_core::transport::{Method, Transport};

use crate::poller::Poller;
use crate::proxy::{ProxyHandle, RemoteObject};

/// Fired on involuntary termination, before [`EVENT_DISCONNECT`], carrying
/// the cause.
pub const EVENT_LOSS: &str = "loss";
/// Fired when the connection is gone, voluntarily or not.
pub const EVENT_DISCONNECT: &str = "disconnect";

/// Payload handed to connection event listeners.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Teardown ran, voluntarily or after a loss.
    Disconnect,
    /// The connection failed; teardown follows.
    Loss(Error),
}

const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(15);

/// Tuning knobs for [`establish`].
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Client-side watchdog for each long-poll attempt. Unset or zero falls
    /// back to 15 seconds. Purely local: the server's hold duration is not
    /// negotiated, so an impatient client aborts and reissues harmlessly.
    pub poll_timeout: Option<Duration>,
}

impl ConnectOptions {
    fn effective_poll_timeout(&self) -> Duration {
        match self.poll_timeout {
            Some(timeout) if !timeout.is_zero() => timeout,
            _ => DEFAULT_POLL_TIMEOUT,
        }
    }
}

struct ConnState {
    connected: bool,
    sending: bool,
    queue: RequestQueue,
    instances: HashMap<String, ProxyHandle>,
    send_task: Option<JoinHandle<()>>,
}

/// State stripped out by the first teardown entrant; later entrants get
/// nothing, which makes teardown safely reentrant.
struct TeardownParts {
    instances: Vec<ProxyHandle>,
    send_task: Option<JoinHandle<()>>,
}

pub(crate) struct ConnectionInner {
    transport: Arc<dyn Transport>,
    session_url: String,
    connection_id: String,
    events: EventRegistry<ConnectionEvent>,
    state: Mutex<ConnState>,
    pub(crate) poller: Poller,
}

/// Client-side session bound to one server-issued connection id.
///
/// The sole owner of the request queue, the poll loop, and the live-proxy
/// table. Not `Clone`; dropping it without [`disconnect`](Self::disconnect)
/// performs the same teardown so background tasks never outlive the handle.
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connection_id", &self.inner.connection_id)
            .finish()
    }
}

/// Establish a session: GET the base URL, read the connection id, start the
/// long-poll loop.
///
/// # Errors
/// `Error::Transport` when the GET fails,
/// `ProtocolError::MissingConnectionId` when the response carries no id.
pub async fn establish(
    transport: Arc<dyn Transport>,
    base_url: impl Into<String>,
    options: ConnectOptions,
) -> Result<Connection, Error> {
    let base_url = base_url.into();
    let body = transport.request(Method::Get, &base_url, None).await?;
    let reply: EstablishReply =
        serde_json::from_value(body).map_err(|_| ProtocolError::MissingConnectionId)?;
    tracing::debug!(connection_id = %reply.connection_id, "session established");

    let session_url = format!("{base_url}{}", reply.connection_id);
    let inner = Arc::new(ConnectionInner {
        transport,
        session_url: session_url.clone(),
        connection_id: reply.connection_id,
        events: EventRegistry::new(),
        state: Mutex::new(ConnState {
            connected: true,
            sending: false,
            queue: RequestQueue::new(),
            instances: HashMap::new(),
            send_task: None,
        }),
        poller: Poller::new(session_url, options.effective_poll_timeout()),
    });
    inner.poller.start(&inner);
    Ok(Connection { inner })
}

impl Connection {
    /// Server-issued connection id.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.inner.connection_id
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().unwrap().connected
    }

    /// Create a server-side instance and return its proxy.
    ///
    /// # Errors
    /// `StateError::Disconnected` when the connection is already gone,
    /// `Error::Server` when the server rejects the creation,
    /// `ProtocolError` when the reply is malformed or reuses a live
    /// instance id.
    pub async fn create(&self, name: &str, spec: Value) -> Result<RemoteObject, Error> {
        let rx = self.inner.enqueue(RequestAction::Create {
            name: name.to_owned(),
            spec,
        })?;
        let value = match rx.await {
            Ok(outcome) => outcome?,
            Err(_) => return Err(Error::ConnectionLost),
        };
        let reply: CreateReply = serde_json::from_value(value)
            .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))?;
        self.inner.register(reply)
    }

    /// Tear the session down and inform the server best-effort.
    ///
    /// Every live proxy is forced into the lost state; their pending
    /// invocations reject. No per-instance destroy is sent, the whole
    /// connection is going away.
    ///
    /// # Errors
    /// `StateError::Disconnected` when called on an already-dead connection.
    pub fn disconnect(&self) -> Result<(), StateError> {
        let parts = self
            .inner
            .begin_teardown()
            .ok_or(StateError::Disconnected)?;
        self.inner
            .events
            .fire(EVENT_DISCONNECT, &ConnectionEvent::Disconnect);
        self.inner.finish_teardown(parts);

        // Best-effort server-side teardown; the outcome is irrelevant.
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let url = inner.session_url.clone();
            if let Err(e) = inner.transport.request(Method::Delete, &url, None).await {
                tracing::debug!(error = %e, "teardown DELETE failed");
            }
        });
        Ok(())
    }

    /// Subscribe to [`EVENT_LOSS`] / [`EVENT_DISCONNECT`].
    pub fn on(
        &self,
        event: &str,
        listener: impl Fn(&ConnectionEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.events.on(event, listener)
    }

    /// Remove one subscription. Returns whether it was present.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.inner.events.off(event, id)
    }

    /// Remove every subscription for `event`.
    pub fn off_all(&self, event: &str) {
        self.inner.events.off_all(event);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Same teardown as disconnect(), minus the DELETE: Drop may run
        // outside a runtime, where nothing can be spawned.
        if let Some(parts) = self.inner.begin_teardown() {
            self.inner
                .events
                .fire(EVENT_DISCONNECT, &ConnectionEvent::Disconnect);
            self.inner.finish_teardown(parts);
        }
    }
}

impl ConnectionInner {
    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Queue a request and nudge the send pipeline.
    pub(crate) fn enqueue(
        self: &Arc<Self>,
        action: RequestAction,
    ) -> Result<ResultReceiver, Error> {
        let rx = {
            let mut state = self.state.lock().unwrap();
            if !state.connected {
                return Err(StateError::Disconnected.into());
            }
            state.queue.add(action)
        };
        self.flush();
        Ok(rx)
    }

    /// Proxy-initiated destroy: drop the registration and tell the server.
    /// The result is never awaited.
    pub(crate) fn destroy_instance(self: &Arc<Self>, instance_id: &str) {
        {
            let mut state = self.state.lock().unwrap();
            state.instances.remove(instance_id);
            if !state.connected {
                return;
            }
            drop(state.queue.add(RequestAction::Destroy {
                instance_id: instance_id.to_owned(),
            }));
        }
        self.flush();
    }

    /// Send everything queued, unless a batch is already in flight.
    fn flush(self: &Arc<Self>) {
        let batch = {
            let mut state = self.state.lock().unwrap();
            if !state.connected || state.sending || !state.queue.has_pending() {
                return;
            }
            state.sending = true;
            state.queue.drain()
        };
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move { inner.send_batch(batch).await });
        self.state.lock().unwrap().send_task = Some(task);
    }

    async fn send_batch(self: Arc<Self>, batch: Vec<OutboundRequest>) {
        let body = match serde_json::to_value(&batch) {
            Ok(body) => body,
            Err(e) => {
                self.state.lock().unwrap().sending = false;
                self.handle_loss(ProtocolError::MalformedPayload(e.to_string()).into());
                return;
            }
        };
        match self
            .transport
            .request(Method::Post, &self.session_url, Some(body))
            .await
        {
            Ok(response) => match serde_json::from_value::<Vec<ResultMessage>>(response) {
                Ok(results) => {
                    {
                        let mut state = self.state.lock().unwrap();
                        state.sending = false;
                        for message in results {
                            state.queue.handle_result(message);
                        }
                    }
                    // Pick up anything queued while the batch was in flight.
                    self.flush();
                }
                Err(e) => {
                    self.state.lock().unwrap().sending = false;
                    self.handle_loss(ProtocolError::MalformedPayload(e.to_string()).into());
                }
            },
            Err(e) => {
                // Send failures are never retried; the whole connection goes.
                self.state.lock().unwrap().sending = false;
                self.handle_loss(e.into());
            }
        }
    }

    /// Register the proxy for a successful create.
    fn register(self: &Arc<Self>, reply: CreateReply) -> Result<RemoteObject, Error> {
        let (object, handle) =
            RemoteObject::new(Arc::downgrade(self), reply.instance_id.clone(), reply.methods);
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(StateError::Disconnected.into());
        }
        if state.instances.contains_key(&reply.instance_id) {
            tracing::error!(instance_id = %reply.instance_id, "server reissued a live instance id");
            return Err(ProtocolError::DuplicateInstance(reply.instance_id).into());
        }
        state.instances.insert(reply.instance_id, handle);
        Ok(object)
    }

    /// Apply one poll cycle's surviving messages: results to the queue,
    /// events to the owning proxy.
    pub(crate) fn on_poll(&self, deliveries: Vec<PollPayload>) {
        for delivery in deliveries {
            match delivery {
                PollPayload::Result(message) => {
                    self.state.lock().unwrap().queue.handle_result(message);
                }
                PollPayload::Event {
                    event,
                    instance_id,
                    args,
                } => {
                    let handle = self
                        .state
                        .lock()
                        .unwrap()
                        .instances
                        .get(&instance_id)
                        .cloned();
                    match handle {
                        Some(handle) => handle.fire_event(&event, args),
                        // The server may race a client-side destroy.
                        None => tracing::debug!(
                            %instance_id,
                            %event,
                            "dropping event for unregistered instance"
                        ),
                    }
                }
            }
        }
    }

    /// Poller- or send-reported failure: escalate to full teardown.
    pub(crate) fn handle_loss(self: &Arc<Self>, error: Error) {
        let Some(parts) = self.begin_teardown() else {
            return;
        };
        tracing::warn!(error = %error, "connection lost");
        self.events.fire(EVENT_LOSS, &ConnectionEvent::Loss(error));
        self.events
            .fire(EVENT_DISCONNECT, &ConnectionEvent::Disconnect);
        self.finish_teardown(parts);
    }

    /// First half of teardown: atomically claim the connected flag and strip
    /// the state that must see no further use. Only the first entrant gets
    /// the parts, so loss and disconnect cannot tear down twice.
    fn begin_teardown(&self) -> Option<TeardownParts> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return None;
        }
        state.connected = false;
        Some(TeardownParts {
            instances: state.instances.drain().map(|(_, handle)| handle).collect(),
            send_task: state.send_task.take(),
        })
    }

    fn finish_teardown(&self, parts: TeardownParts) {
        for handle in parts.instances {
            handle.force_loss();
        }
        if let Some(task) = parts.send_task {
            task.abort();
        }
        self.poller.stop();
        // Queue-only waiters (e.g. an in-flight create) reject rather than
        // dangle.
        self.state.lock().unwrap().queue.fail_all();
    }
}
