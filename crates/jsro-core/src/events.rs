//! Name-keyed observer registry with ordered, synchronous fan-out.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Token identifying one subscription; returned by [`EventRegistry::on`].
///
/// Rust closures have no usable identity, so removal goes through this token
/// instead of the callback itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener<A> {
    id: ListenerId,
    callback: Arc<dyn Fn(&A) + Send + Sync>,
}

struct Inner<A> {
    next_id: u64,
    listeners: HashMap<String, Vec<Listener<A>>>,
}

/// Minimal typed pub/sub: event name to ordered listener list.
///
/// The lock is released before listeners run, so a listener may subscribe,
/// unsubscribe, or fire on the same registry. Removals made while a fire is
/// in progress affect the next fire, not the running snapshot.
pub struct EventRegistry<A> {
    inner: Mutex<Inner<A>>,
}

impl<A> EventRegistry<A> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 0,
                listeners: HashMap::new(),
            }),
        }
    }

    /// Subscribe to `event`. Listeners fire in subscription order.
    pub fn on(&self, event: &str, callback: impl Fn(&A) + Send + Sync + 'static) -> ListenerId {
        let mut inner = self.inner.lock().unwrap();
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;
        inner
            .listeners
            .entry(event.to_owned())
            .or_default()
            .push(Listener {
                id,
                callback: Arc::new(callback),
            });
        id
    }

    /// Remove one subscription. Returns whether it was present.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(listeners) = inner.listeners.get_mut(event) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|listener| listener.id != id);
        before != listeners.len()
    }

    /// Remove every subscription for `event`.
    pub fn off_all(&self, event: &str) {
        self.inner.lock().unwrap().listeners.remove(event);
    }

    /// Fire `event`, invoking the current listeners in subscription order.
    pub fn fire(&self, event: &str, arg: &A) {
        let snapshot: Vec<_> = {
            let inner = self.inner.lock().unwrap();
            inner
                .listeners
                .get(event)
                .map(|listeners| {
                    listeners
                        .iter()
                        .map(|listener| Arc::clone(&listener.callback))
                        .collect()
                })
                .unwrap_or_default()
        };
        for callback in snapshot {
            callback(arg);
        }
    }
}

impl<A> Default for EventRegistry<A> {
    fn default() -> Self {
        Self::new()
    }
}
