//! Client-side handle for one server-hosted instance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tokio::sync::oneshot;

use jsro_core::error::{Error, ProtocolError, StateError};
use jsro_core::events::{EventRegistry, ListenerId};
use jsro_core::protocol::{InvokeReply, RequestAction};

use crate::connection::ConnectionInner;

/// Local event fired when the owning connection goes away, before
/// [`EVENT_DESTROY`].
pub const EVENT_LOSS: &str = "loss";
/// Local event fired when the proxy reaches its terminal state.
pub const EVENT_DESTROY: &str = "destroy";

type CallId = u64;
type CallSender = oneshot::Sender<Result<Value, Error>>;

struct ProxyState {
    destroyed: bool,
    next_call: CallId,
    pending: HashMap<CallId, CallSender>,
}

pub(crate) struct ProxyInner {
    instance_id: String,
    methods: Vec<String>,
    owner: Weak<ConnectionInner>,
    state: Mutex<ProxyState>,
    events: EventRegistry<Vec<Value>>,
}

/// Proxy for one server-side instance.
///
/// Forwards method calls to the server and fans server-pushed events out to
/// subscribers. Terminal once destroyed, whether voluntarily via
/// [`destroy`](Self::destroy) or because the connection was lost; there is
/// no transition back.
pub struct RemoteObject {
    inner: Arc<ProxyInner>,
}

impl std::fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObject")
            .field("instance_id", &self.inner.instance_id)
            .finish()
    }
}

/// Owner-side capability over a proxy: event fan-out and forced loss.
/// Held by the connection's instance table, never by the application.
#[derive(Clone)]
pub(crate) struct ProxyHandle {
    inner: Arc<ProxyInner>,
}

impl RemoteObject {
    pub(crate) fn new(
        owner: Weak<ConnectionInner>,
        instance_id: String,
        methods: Vec<String>,
    ) -> (Self, ProxyHandle) {
        let inner = Arc::new(ProxyInner {
            instance_id,
            methods,
            owner,
            state: Mutex::new(ProxyState {
                destroyed: false,
                next_call: 0,
                pending: HashMap::new(),
            }),
            events: EventRegistry::new(),
        });
        (
            Self {
                inner: Arc::clone(&inner),
            },
            ProxyHandle { inner },
        )
    }

    /// Server-assigned instance id.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// Methods the instance exposed at creation time.
    #[must_use]
    pub fn methods(&self) -> &[String] {
        &self.inner.methods
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().unwrap().destroyed
    }

    /// Call `method` on the server-side instance.
    ///
    /// # Errors
    /// `Error::State` when the proxy is destroyed or `method` was not listed
    /// at creation; `Error::Server` when the server rejects the call;
    /// `Error::ConnectionLost` when the connection goes away first.
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, Error> {
        let owner = self.inner.owner.upgrade().ok_or(Error::ConnectionLost)?;
        let (call_id, rx) = {
            let mut state = self.inner.state.lock().unwrap();
            if state.destroyed {
                return Err(StateError::Destroyed(self.inner.instance_id.clone()).into());
            }
            if !self.inner.methods.iter().any(|m| m == method) {
                return Err(StateError::UnknownMethod {
                    instance_id: self.inner.instance_id.clone(),
                    method: method.to_owned(),
                }
                .into());
            }
            let call_id = state.next_call;
            state.next_call += 1;
            let (tx, rx) = oneshot::channel();
            state.pending.insert(call_id, tx);
            (call_id, rx)
        };

        let request = owner.enqueue(RequestAction::Invoke {
            instance_id: self.inner.instance_id.clone(),
            method: method.to_owned(),
            args,
        });
        let request = match request {
            Ok(rx) => rx,
            Err(e) => {
                self.inner.state.lock().unwrap().pending.remove(&call_id);
                return Err(e);
            }
        };

        // Relay the queued result into the call table. A destroy in the
        // interim already rejected the call, so the late result is dropped.
        let relay = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = match request.await {
                Ok(Ok(value)) => serde_json::from_value::<InvokeReply>(value)
                    .map(|reply| reply.result)
                    .map_err(|e| ProtocolError::MalformedPayload(e.to_string()).into()),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(Error::ConnectionLost),
            };
            let waiter = relay.state.lock().unwrap().pending.remove(&call_id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(outcome);
                }
                None => tracing::debug!(
                    instance_id = %relay.instance_id,
                    call_id,
                    "dropping result for a destroyed call"
                ),
            }
        });

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::ConnectionLost),
        }
    }

    /// Destroy the server-side instance: reject in-flight calls, tell the
    /// owner to inform the server best-effort, fire the local destroy event.
    ///
    /// # Errors
    /// `StateError::Destroyed` when called on an already-dead proxy.
    pub fn destroy(&self) -> Result<(), StateError> {
        let pending = self
            .inner
            .mark_destroyed()
            .ok_or_else(|| StateError::Destroyed(self.inner.instance_id.clone()))?;
        self.inner.reject_pending(pending);
        if let Some(owner) = self.inner.owner.upgrade() {
            owner.destroy_instance(&self.inner.instance_id);
        }
        self.inner.events.fire(EVENT_DESTROY, &Vec::new());
        Ok(())
    }

    /// Subscribe to a server-pushed event, or to the local [`EVENT_LOSS`] /
    /// [`EVENT_DESTROY`] notifications.
    pub fn on(
        &self,
        event: &str,
        listener: impl Fn(&[Value]) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner
            .events
            .on(event, move |args: &Vec<Value>| listener(args))
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

impl ProxyInner {
    /// Flip to destroyed and strip the call table. `None` when already
    /// terminal, so destroy and loss cannot double-fire.
    fn mark_destroyed(&self) -> Option<Vec<CallSender>> {
        let mut state = self.state.lock().unwrap();
        if state.destroyed {
            return None;
        }
        state.destroyed = true;
        Some(state.pending.drain().map(|(_, tx)| tx).collect())
    }

    fn reject_pending(&self, senders: Vec<CallSender>) {
        for tx in senders {
            let _ = tx.send(Err(StateError::Destroyed(self.instance_id.clone()).into()));
        }
    }
}

impl ProxyHandle {
    /// Fan a server-pushed event out to subscribers.
    pub(crate) fn fire_event(&self, event: &str, args: Vec<Value>) {
        self.inner.events.fire(event, &args);
    }

    /// Force the proxy into the lost state. The connection itself is gone,
    /// so no server-side destroy is sent.
    pub(crate) fn force_loss(&self) {
        let Some(pending) = self.inner.mark_destroyed() else {
            return;
        };
        self.inner.reject_pending(pending);
        self.inner.events.fire(EVENT_LOSS, &Vec::new());
        self.inner.events.fire(EVENT_DESTROY, &Vec::new());
    }
}
