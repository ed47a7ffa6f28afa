use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};

use crate::topology::Topology;

/// Events raised by a [`RequestExecutor`](crate::request_executor::RequestExecutor).
#[derive(Clone, Debug)]
pub enum RequestEvent {
    /// A request to `url` failed and the node was marked as failed.
    FailedRequest { url: String, error: String },
    /// A request completed with a status code below 400.
    SucceedRequest { url: String, status: u16 },
    /// The executor switched to a newer topology.
    TopologyUpdated { topology: Topology },
}

/// Handle returned by [`EventListeners::register`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A list of typed callbacks.
///
/// Listeners are called synchronously, in registration order. Notification works on a snapshot of
/// the list, so a listener may register or unregister listeners (itself included) while being
/// called.
pub struct EventListeners<E> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener<E>)>>,
}

impl<E> Default for EventListeners<E> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<E> std::fmt::Debug for EventListeners<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListeners")
            .field("count", &self.len())
            .finish()
    }
}

impl<E> EventListeners<E> {
    pub fn register<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Returns `false` if no listener was registered under `id`.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn notify(&self, event: &E) {
        let snapshot = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect::<Vec<_>>();

        for listener in snapshot {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
