//! Subscription manager: the long-poll state machine.
//!
//! One background thread per manager runs the subscribe loop:
//!
//! ```text
//! Unsubscribed -> Connecting -> Connected <-> Reconnecting -> Disconnected
//!       ^______________________________________________________|
//! ```
//!
//! Callers mutate the channel set through `subscribe`/`unsubscribe`, which
//! take the state lock, cancel the in-flight long-poll and wake the loop so
//! it re-issues the request with the new set. Only the loop advances the
//! cursor.

use super::listeners::ListenerRegistry;
use super::types::{
    ConnectionStatus, Event, StatusCategory, StatusEvent, SubscribeRequest, UnsubscribeRequest,
    PRESENCE_SUFFIX,
};
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};
use crate::operations::{
    EnvelopeMessage, LeaveRequest, SubscribeEnvelope, SubscribeOperation,
    MISSING_CHANNEL_OR_GROUP,
};
use crate::pipeline::Pipeline;
use crate::types::{Cursor, OperationType};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Internal subscription state. Guarded by `Shared::state`.
#[derive(Default)]
struct State {
    channels: BTreeSet<String>,
    groups: BTreeSet<String>,
    cursor: Cursor,
    status: ConnectionStatus,
    /// Whether the loop thread is alive.
    running: bool,
    shutdown: bool,
    /// Bumped by unsubscribe-all; responses from an older epoch are stale.
    epoch: u64,
    in_flight: Option<CancellationToken>,
    /// Highest timetoken delivered per subscription entry (channel, group
    /// or wildcard). Entries are pruned when the entry is unsubscribed.
    watermarks: HashMap<String, u64>,
    worker: Option<JoinHandle<()>>,
}

impl State {
    fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.groups.is_empty()
    }

    fn transition(
        &mut self,
        next: ConnectionStatus,
        category: StatusCategory,
        error: Option<Error>,
    ) -> StatusEvent {
        let previous = std::mem::replace(&mut self.status, next);
        if previous != next {
            info!(?previous, current = ?next, "subscription status changed");
        }
        StatusEvent {
            category,
            previous,
            current: next,
            channels: self.channels.iter().cloned().collect(),
            channel_groups: self.groups.iter().cloned().collect(),
            cursor: self.cursor,
            error,
        }
    }

    /// Interrupt the in-flight long-poll so the loop re-reads the state.
    fn interrupt(&mut self) {
        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }
    }

    /// Drop watermarks for entries no longer subscribed, so a later
    /// re-subscribe starts clean.
    fn prune_watermarks(&mut self) {
        let State {
            channels,
            groups,
            watermarks,
            ..
        } = self;
        watermarks.retain(|key, _| channels.contains(key) || groups.contains(key));
    }

    fn wants(&self, message: &EnvelopeMessage) -> bool {
        self.channels.contains(&message.channel)
            || message
                .subscription
                .as_ref()
                .is_some_and(|s| self.channels.contains(s) || self.groups.contains(s))
    }
}

struct Shared {
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
    listeners: Arc<ListenerRegistry>,
    state: Mutex<State>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl Shared {
    fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }

    fn notify(&self, event: StatusEvent) {
        self.listeners.dispatch(&Event::Status(event));
    }

    /// Sleep up to `delay`, returning early if the state changes.
    fn pause(&self, delay: Duration) {
        let _ = self.wake_rx.recv_timeout(delay);
    }
}

/// Owns the subscription set, the cursor and the long-poll thread.
pub struct SubscriptionManager {
    shared: Arc<Shared>,
}

impl SubscriptionManager {
    pub fn new(
        config: Arc<Config>,
        pipeline: Arc<Pipeline>,
        listeners: Arc<ListenerRegistry>,
    ) -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            shared: Arc::new(Shared {
                config,
                pipeline,
                listeners,
                state: Mutex::new(State::default()),
                wake_tx,
                wake_rx,
            }),
        }
    }

    /// Add channels and groups, starting the loop if it is not running.
    pub fn subscribe(&self, request: SubscribeRequest) -> Result<()> {
        if request.channels.is_empty() && request.channel_groups.is_empty() {
            return Err(Error::validation(
                OperationType::Subscribe,
                MISSING_CHANNEL_OR_GROUP,
            ));
        }

        let mut state = self.shared.state.lock();
        let mut changed = false;
        for channel in &request.channels {
            changed |= state.channels.insert(channel.clone());
            if request.with_presence {
                changed |= state.channels.insert(format!("{channel}{PRESENCE_SUFFIX}"));
            }
        }
        for group in &request.channel_groups {
            changed |= state.groups.insert(group.clone());
            if request.with_presence {
                changed |= state.groups.insert(format!("{group}{PRESENCE_SUFFIX}"));
            }
        }
        if let Some(timetoken) = request.timetoken {
            if state.cursor.is_initial() {
                state.cursor = Cursor::new(timetoken, 0);
            }
        }

        if state.running {
            if changed {
                debug!("subscription set changed, re-issuing long-poll");
                state.interrupt();
                drop(state);
                self.shared.wake();
            }
            return Ok(());
        }

        // The loop announces Connecting itself so it always precedes the
        // loop's own status events.
        let connecting =
            state.transition(ConnectionStatus::Connecting, StatusCategory::Connecting, None);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("pubwire-subscribe".to_string())
            .spawn(move || run_loop(shared, connecting));

        match spawned {
            Ok(handle) => {
                state.running = true;
                state.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                let error = Error::Connection {
                    operation: OperationType::Subscribe,
                    message: format!("failed to spawn subscribe loop: {e}"),
                    timed_out: false,
                };
                let failed = state.transition(
                    ConnectionStatus::Disconnected(ErrorKind::Connection),
                    StatusCategory::Disconnected,
                    Some(error.clone()),
                );
                drop(state);
                self.shared.notify(failed);
                Err(error)
            }
        }
    }

    /// Remove channels and groups. Removing the last one stops the loop.
    pub fn unsubscribe(&self, request: UnsubscribeRequest) {
        let mut state = self.shared.state.lock();
        let mut removed_channels = Vec::new();
        let mut removed_groups = Vec::new();

        for channel in &request.channels {
            if state.channels.remove(channel) {
                removed_channels.push(channel.clone());
            }
            state.channels.remove(&format!("{channel}{PRESENCE_SUFFIX}"));
        }
        for group in &request.channel_groups {
            if state.groups.remove(group) {
                removed_groups.push(group.clone());
            }
            state.groups.remove(&format!("{group}{PRESENCE_SUFFIX}"));
        }
        state.prune_watermarks();

        if removed_channels.is_empty() && removed_groups.is_empty() {
            return;
        }

        let event = if state.is_empty() {
            Some(self.reset(&mut state))
        } else {
            None
        };
        state.interrupt();
        drop(state);
        self.shared.wake();

        if let Some(event) = event {
            self.shared.notify(event);
        }
        self.leave(removed_channels, removed_groups);
    }

    /// Drop every channel and group and stop the loop.
    pub fn unsubscribe_all(&self) {
        let mut state = self.shared.state.lock();
        if state.is_empty() && state.status == ConnectionStatus::Unsubscribed {
            return;
        }
        let channels: Vec<String> = std::mem::take(&mut state.channels).into_iter().collect();
        let groups: Vec<String> = std::mem::take(&mut state.groups).into_iter().collect();
        state.watermarks.clear();
        let event = self.reset(&mut state);
        state.interrupt();
        drop(state);
        self.shared.wake();

        self.shared.notify(event);
        self.leave(channels, groups);
    }

    /// Back to `Unsubscribed` with a fresh cursor.
    fn reset(&self, state: &mut State) -> StatusEvent {
        state.epoch += 1;
        state.cursor = Cursor::default();
        state.transition(
            ConnectionStatus::Unsubscribed,
            StatusCategory::Acknowledgment,
            None,
        )
    }

    /// Best-effort presence leave for removed channels.
    fn leave(&self, channels: Vec<String>, groups: Vec<String>) {
        if self.shared.config.suppress_leave_events {
            return;
        }
        let request = LeaveRequest {
            channels: channels
                .into_iter()
                .filter(|c| !c.ends_with(PRESENCE_SUFFIX))
                .collect(),
            channel_groups: groups
                .into_iter()
                .filter(|g| !g.ends_with(PRESENCE_SUFFIX))
                .collect(),
        };
        if request.channels.is_empty() && request.channel_groups.is_empty() {
            return;
        }
        if let Err(e) = self.shared.pipeline.execute(&request, None) {
            warn!(error = %e, "leave request failed");
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.state.lock().status
    }

    pub fn cursor(&self) -> Cursor {
        self.shared.state.lock().cursor
    }

    pub fn subscribed_channels(&self) -> Vec<String> {
        self.shared.state.lock().channels.iter().cloned().collect()
    }

    pub fn subscribed_groups(&self) -> Vec<String> {
        self.shared.state.lock().groups.iter().cloned().collect()
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.shared.listeners
    }

    /// Stop the loop and wait for its thread.
    pub fn shutdown(&self) {
        let handle = {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.interrupt();
            state.worker.take()
        };
        self.shared.wake();

        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Outcome of one loop iteration.
enum Step {
    Continue,
    Backoff(Duration),
    Exit,
}

fn run_loop(shared: Arc<Shared>, connecting: StatusEvent) {
    debug!("subscribe loop started");
    shared.notify(connecting);
    let mut failures: u32 = 0;

    loop {
        while shared.wake_rx.try_recv().is_ok() {}

        let (operation, token, epoch) = {
            let mut state = shared.state.lock();
            if state.shutdown || state.is_empty() {
                state.running = false;
                state.in_flight = None;
                debug!("subscribe loop stopped");
                return;
            }
            let token = CancellationToken::new();
            state.in_flight = Some(token.clone());
            let operation = SubscribeOperation {
                channels: state.channels.iter().cloned().collect(),
                channel_groups: state.groups.iter().cloned().collect(),
                cursor: state.cursor,
                heartbeat: shared.config.presence_timeout,
                filter_expression: shared.config.filter_expression.clone(),
            };
            (operation, token, state.epoch)
        };

        let result = shared.pipeline.execute(&operation, Some(&token));

        let step = match result {
            Ok(outcome) => {
                failures = 0;
                handle_envelope(&shared, outcome.value, epoch);
                Step::Continue
            }
            // Membership change or shutdown; the top of the loop decides.
            Err(Error::Cancelled { .. }) => Step::Continue,
            Err(e) => handle_failure(&shared, e, &mut failures),
        };

        match step {
            Step::Continue => {}
            Step::Backoff(delay) => shared.pause(delay),
            Step::Exit => return,
        }
    }
}

fn handle_envelope(shared: &Shared, envelope: SubscribeEnvelope, epoch: u64) {
    let mut state = shared.state.lock();
    state.in_flight = None;
    if state.epoch != epoch || state.shutdown || state.is_empty() {
        debug!("discarding long-poll response for a stale subscription");
        return;
    }

    let mut events = Vec::with_capacity(envelope.messages.len());
    let mut delivered: HashMap<String, u64> = HashMap::new();
    for message in envelope.messages {
        if !state.wants(&message) {
            continue;
        }
        let key = watermark_key(&message);
        if let Some(&seen) = state.watermarks.get(key) {
            if message.timetoken <= seen {
                debug!(channel = %message.channel, timetoken = message.timetoken, "skipping already delivered event");
                continue;
            }
        }
        let high = delivered.entry(key.to_string()).or_insert(0);
        *high = (*high).max(message.timetoken);
        events.push(Event::from_envelope(message));
    }
    for (key, timetoken) in delivered {
        let mark = state.watermarks.entry(key).or_insert(0);
        *mark = (*mark).max(timetoken);
    }

    if envelope.cursor >= state.cursor || state.cursor.is_initial() {
        state.cursor = envelope.cursor;
    } else {
        warn!(current = ?state.cursor, received = ?envelope.cursor, "ignoring cursor regression");
    }

    let status = match state.status {
        ConnectionStatus::Connected => None,
        ConnectionStatus::Reconnecting => Some(state.transition(
            ConnectionStatus::Connected,
            StatusCategory::Reconnected,
            None,
        )),
        _ => Some(state.transition(
            ConnectionStatus::Connected,
            StatusCategory::Connected,
            None,
        )),
    };
    drop(state);

    if let Some(status) = status {
        shared.notify(status);
    }
    shared.listeners.dispatch_batch(&events);
}

/// Group and wildcard traffic is tracked under the entry it arrived for.
fn watermark_key(message: &EnvelopeMessage) -> &str {
    message.subscription.as_deref().unwrap_or(&message.channel)
}

fn handle_failure(shared: &Shared, error: Error, failures: &mut u32) -> Step {
    let mut state = shared.state.lock();
    state.in_flight = None;
    if state.shutdown || state.is_empty() {
        return Step::Continue;
    }

    if let Error::Parsing { .. } = error {
        warn!(error = %error, "skipping malformed long-poll response");
        let current = state.status;
        let event = state.transition(current, StatusCategory::MalformedResponse, Some(error));
        drop(state);
        shared.notify(event);
        return Step::Backoff(shared.config.reconnection_base_delay);
    }

    *failures += 1;
    let give_up = !error.is_retryable() || *failures > shared.config.maximum_reconnection_retries;
    if give_up {
        warn!(error = %error, failures = *failures, "subscribe loop giving up");
        let category = if error.kind() == ErrorKind::Validation {
            StatusCategory::ValidationFailed
        } else {
            StatusCategory::Disconnected
        };
        let event = state.transition(
            ConnectionStatus::Disconnected(error.kind()),
            category,
            Some(error),
        );
        state.running = false;
        drop(state);
        shared.notify(event);
        return Step::Exit;
    }

    let delay = shared.config.reconnection_delay(*failures);
    warn!(error = %error, attempt = *failures, delay_ms = delay.as_millis() as u64, "long-poll failed, reconnecting");
    let event = if state.status != ConnectionStatus::Reconnecting {
        Some(state.transition(
            ConnectionStatus::Reconnecting,
            StatusCategory::Reconnecting,
            Some(error),
        ))
    } else {
        None
    };
    drop(state);

    if let Some(event) = event {
        shared.notify(event);
    }
    Step::Backoff(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriptions::listeners::{ChannelListener, EventReceiver};
    use crate::telemetry::NoopTelemetry;
    use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};
    use crossbeam_channel::RecvTimeoutError;

    /// Serves one handshake, then holds every long-poll for a while or
    /// until it is cancelled.
    struct Idle {
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl Transport for Idle {
        fn send(
            &self,
            request: &HttpRequest,
            cancel: Option<&CancellationToken>,
        ) -> std::result::Result<HttpResponse, TransportError> {
            let first = {
                let mut requests = self.requests.lock();
                requests.push(request.clone());
                requests.len() == 1
            };
            if first {
                return Ok(HttpResponse::new(200, r#"{"t":{"t":"10","r":1},"m":[]}"#));
            }
            let hold = Duration::from_millis(200);
            match cancel {
                Some(token) => {
                    if let Err(RecvTimeoutError::Disconnected) = token.receiver().recv_timeout(hold) {
                        return Err(TransportError::cancelled());
                    }
                }
                None => thread::sleep(hold),
            }
            Ok(HttpResponse::new(200, r#"{"t":{"t":"10","r":1},"m":[]}"#))
        }
    }

    fn manager(transport: Arc<dyn Transport>) -> (SubscriptionManager, EventReceiver) {
        let config = Arc::new(Config {
            subscribe_key: "sub".into(),
            suppress_leave_events: true,
            ..Default::default()
        });
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&config),
            Pipeline::shared_factory(transport),
            Arc::new(NoopTelemetry),
        ));
        let listeners = Arc::new(ListenerRegistry::new());
        let (listener, receiver) = ChannelListener::new(100);
        listeners.add(listener);
        (SubscriptionManager::new(config, pipeline, listeners), receiver)
    }

    fn wait_for_status(receiver: &EventReceiver, want: ConnectionStatus) -> StatusEvent {
        loop {
            match receiver.recv_timeout(Duration::from_secs(5)) {
                Ok(Event::Status(s)) if s.current == want => return s,
                Ok(_) => continue,
                Err(e) => panic!("no {want:?} status: {e}"),
            }
        }
    }

    #[test]
    fn test_empty_subscribe_rejected() {
        let (manager, _rx) = manager(Arc::new(Idle {
            requests: Mutex::new(Vec::new()),
        }));
        let err = manager.subscribe(SubscribeRequest::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(manager.status(), ConnectionStatus::Unsubscribed);
    }

    #[test]
    fn test_presence_channels_added_and_removed() {
        let transport = Arc::new(Idle {
            requests: Mutex::new(Vec::new()),
        });
        let (manager, rx) = manager(transport);
        manager
            .subscribe(SubscribeRequest::channels(["room-1"]).with_presence())
            .unwrap();
        wait_for_status(&rx, ConnectionStatus::Connected);
        assert_eq!(manager.subscribed_channels(), vec!["room-1", "room-1-pnpres"]);

        manager.unsubscribe(UnsubscribeRequest::channels(["room-1"]));
        let ack = wait_for_status(&rx, ConnectionStatus::Unsubscribed);
        assert_eq!(ack.category, StatusCategory::Acknowledgment);
        assert!(ack.error.is_none());
        assert!(manager.subscribed_channels().is_empty());
        assert_eq!(manager.cursor(), Cursor::default());
    }

    #[test]
    fn test_membership_change_reissues_long_poll() {
        let transport = Arc::new(Idle {
            requests: Mutex::new(Vec::new()),
        });
        let (manager, rx) = manager(Arc::clone(&transport) as Arc<dyn Transport>);
        manager.subscribe(SubscribeRequest::channels(["a"])).unwrap();
        wait_for_status(&rx, ConnectionStatus::Connected);

        manager.subscribe(SubscribeRequest::channels(["b"])).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            let found = transport
                .requests
                .lock()
                .iter()
                .any(|r| r.path() == "/v2/subscribe/sub/a,b/0" && r.query_param("tt") == Some("10"));
            if found {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "no re-issued long-poll");
            thread::sleep(Duration::from_millis(10));
        }
        manager.shutdown();
    }

    #[test]
    fn test_watermarks_follow_subscription_entries() {
        let (manager, rx) = manager(Arc::new(Idle {
            requests: Mutex::new(Vec::new()),
        }));
        {
            // Loop not started; envelopes are fed by hand.
            let mut state = manager.shared.state.lock();
            state.channels.insert("room-1".into());
            state.channels.insert("room-1-pnpres".into());
            state.groups.insert("g1".into());
        }
        let body = br#"{"t":{"t":"20","r":1},"m":[
            {"c":"room-1","d":"hi","p":{"t":"11","r":1}},
            {"c":"room-1-pnpres","d":{"action":"join","uuid":"u1"},"p":{"t":"12","r":1},"b":"room-1-pnpres"},
            {"c":"member-7","d":"from group","p":{"t":"13","r":1},"b":"g1"}
        ]}"#;
        let envelope = || SubscribeEnvelope::parse(body).unwrap();
        let drain = || std::iter::from_fn(|| rx.try_recv().ok()).filter(|e| !matches!(e, Event::Status(_))).count();

        handle_envelope(&manager.shared, envelope(), 0);
        assert_eq!(drain(), 3);
        let mut keys: Vec<String> = manager.shared.state.lock().watermarks.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["g1", "room-1", "room-1-pnpres"]);

        manager.unsubscribe(UnsubscribeRequest::channel_groups(["g1"]));
        let mut keys: Vec<String> = manager.shared.state.lock().watermarks.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["room-1", "room-1-pnpres"]);

        // Re-subscribing the group delivers its replayed traffic again, the
        // channel traffic is still deduplicated.
        manager.shared.state.lock().groups.insert("g1".into());
        handle_envelope(&manager.shared, envelope(), 0);
        assert_eq!(drain(), 1);

        manager.unsubscribe(UnsubscribeRequest::channels(["room-1"]));
        assert_eq!(
            manager.shared.state.lock().watermarks.keys().collect::<Vec<_>>(),
            vec!["g1"]
        );
    }
}
