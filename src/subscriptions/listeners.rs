//! Listener registry and the stock listener kinds.

use super::types::{Event, MessageEvent, PresenceEvent, SignalEvent, StatusEvent};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Observer of subscription traffic. All callbacks default to no-ops.
///
/// Callbacks run on the subscribe loop thread, one listener after another.
/// They must not block: while a callback runs, no long-poll is in flight
/// and every other listener waits. Hand slow work to another thread, or
/// register a [`ChannelListener`] and consume its [`EventReceiver`] at your
/// own pace.
pub trait Listener: Send + Sync {
    fn on_message(&self, _event: &MessageEvent) {}
    fn on_signal(&self, _event: &SignalEvent) {}
    fn on_presence(&self, _event: &PresenceEvent) {}
    fn on_status(&self, _event: &StatusEvent) {}
}

/// Identifier returned when registering a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

struct Entry {
    id: ListenerId,
    listener: Arc<dyn Listener>,
    /// Cleared on removal so an in-progress dispatch stops delivering.
    active: AtomicBool,
}

/// Thread-safe set of listeners.
///
/// Dispatch iterates a snapshot taken under a read lock, so listeners may
/// add or remove listeners (including themselves) from inside a callback.
pub struct ListenerRegistry {
    entries: RwLock<Vec<Arc<Entry>>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener. Registering the same `Arc` twice returns the
    /// existing id.
    pub fn add(&self, listener: Arc<dyn Listener>) -> ListenerId {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.iter().find(|e| same_listener(&e.listener, &listener)) {
            return existing.id;
        }
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        entries.push(Arc::new(Entry {
            id,
            listener,
            active: AtomicBool::new(true),
        }));
        id
    }

    /// Remove by id. Returns false if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        match entries.iter().position(|e| e.id == id) {
            Some(index) => {
                let entry = entries.remove(index);
                entry.active.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Remove by identity.
    pub fn remove_listener(&self, listener: &Arc<dyn Listener>) -> bool {
        let id = self
            .entries
            .read()
            .iter()
            .find(|e| same_listener(&e.listener, listener))
            .map(|e| e.id);
        id.map(|id| self.remove(id)).unwrap_or(false)
    }

    pub fn clear(&self) {
        for entry in self.entries.write().drain(..) {
            entry.active.store(false, Ordering::SeqCst);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn dispatch(&self, event: &Event) {
        self.dispatch_batch(std::slice::from_ref(event));
    }

    /// Deliver events in order to every listener registered when the batch
    /// started and still registered when its turn comes.
    pub fn dispatch_batch(&self, events: &[Event]) {
        if events.is_empty() {
            return;
        }
        let snapshot: Vec<Arc<Entry>> = self.entries.read().clone();

        for event in events {
            for entry in &snapshot {
                if !entry.active.load(Ordering::SeqCst) {
                    continue;
                }
                let delivered = catch_unwind(AssertUnwindSafe(|| deliver(&*entry.listener, event)));
                if delivered.is_err() {
                    tracing::warn!(listener = entry.id.0, "listener panicked during dispatch");
                }
            }
        }
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn same_listener(a: &Arc<dyn Listener>, b: &Arc<dyn Listener>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

fn deliver(listener: &dyn Listener, event: &Event) {
    match event {
        Event::Message(e) => listener.on_message(e),
        Event::Signal(e) => listener.on_signal(e),
        Event::Presence(e) => listener.on_presence(e),
        Event::Status(e) => listener.on_status(e),
    }
}

type Callback<E> = Box<dyn Fn(&E) + Send + Sync>;

/// Listener assembled from closures.
///
/// The closures run inline on the subscribe loop thread and must return
/// quickly; see [`Listener`]. Use [`ChannelListener`] when the consumer may
/// be slow.
#[derive(Default)]
pub struct CallbackListener {
    message: Option<Callback<MessageEvent>>,
    signal: Option<Callback<SignalEvent>>,
    presence: Option<Callback<PresenceEvent>>,
    status: Option<Callback<StatusEvent>>,
}

impl CallbackListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_message(mut self, f: impl Fn(&MessageEvent) + Send + Sync + 'static) -> Self {
        self.message = Some(Box::new(f));
        self
    }

    pub fn on_signal(mut self, f: impl Fn(&SignalEvent) + Send + Sync + 'static) -> Self {
        self.signal = Some(Box::new(f));
        self
    }

    pub fn on_presence(mut self, f: impl Fn(&PresenceEvent) + Send + Sync + 'static) -> Self {
        self.presence = Some(Box::new(f));
        self
    }

    pub fn on_status(mut self, f: impl Fn(&StatusEvent) + Send + Sync + 'static) -> Self {
        self.status = Some(Box::new(f));
        self
    }
}

impl Listener for CallbackListener {
    fn on_message(&self, event: &MessageEvent) {
        if let Some(f) = &self.message {
            f(event);
        }
    }

    fn on_signal(&self, event: &SignalEvent) {
        if let Some(f) = &self.signal {
            f(event);
        }
    }

    fn on_presence(&self, event: &PresenceEvent) {
        if let Some(f) = &self.presence {
            f(event);
        }
    }

    fn on_status(&self, event: &StatusEvent) {
        if let Some(f) = &self.status {
            f(event);
        }
    }
}

/// Listener forwarding events into a bounded queue.
///
/// Decouples the consumer from the subscribe loop. Never blocks dispatch:
/// when the queue is full the event is dropped and counted.
pub struct ChannelListener {
    sender: Sender<Event>,
    dropped: AtomicU64,
}

impl ChannelListener {
    /// Create the listener and the receiving end of its queue.
    pub fn new(buffer_size: usize) -> (Arc<Self>, EventReceiver) {
        let (sender, receiver) = bounded(buffer_size.max(1));
        let listener = Arc::new(Self {
            sender,
            dropped: AtomicU64::new(0),
        });
        (listener, EventReceiver { receiver })
    }

    /// Events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn forward(&self, event: Event) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(dropped, "channel listener queue full, dropping event");
            }
            // Receiver gone; nothing to deliver to.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl Listener for ChannelListener {
    fn on_message(&self, event: &MessageEvent) {
        self.forward(Event::Message(event.clone()));
    }

    fn on_signal(&self, event: &SignalEvent) {
        self.forward(Event::Signal(event.clone()));
    }

    fn on_presence(&self, event: &PresenceEvent) {
        self.forward(Event::Presence(event.clone()));
    }

    fn on_status(&self, event: &StatusEvent) {
        self.forward(Event::Status(event.clone()));
    }
}

/// Receiving end of a [`ChannelListener`].
pub struct EventReceiver {
    receiver: Receiver<Event>,
}

impl EventReceiver {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<Event, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<Event, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Event, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently queued.
    pub fn drain(&self) -> Vec<Event> {
        self.receiver.try_iter().collect()
    }
}
