//! Client facade tying all components together.

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::error::Result;
use crate::operations::{
    GrantRequest, GrantResponse, HistoryRequest, HistoryResponse, ListPushProvisionsRequest,
    ListPushProvisionsResponse, Operation, Publish, PublishRequest, PublishResponse,
    SignalRequest, TimeRequest, TimeResponse,
};
use crate::pipeline::{Outcome, Pipeline, TransportFactory};
use crate::sequence::SequenceGenerator;
use crate::subscriptions::{
    ChannelListener, ConnectionStatus, EventReceiver, Listener, ListenerId, ListenerRegistry,
    SubscribeRequest, SubscriptionManager, UnsubscribeRequest,
};
use crate::telemetry::{LatencyTelemetry, TelemetryRecorder};
use crate::transport::Transport;
use crate::types::Cursor;
use std::sync::Arc;

/// The pub/sub client.
///
/// Provides a unified interface for:
/// - Transactional operations (publish, history, access grants, push)
/// - Real-time subscriptions with listener fan-out
///
/// Cheap to share behind an `Arc`; every method takes `&self`. Dropping the
/// client stops the subscribe loop.
pub struct Client {
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
    sequence: SequenceGenerator,
    listeners: Arc<ListenerRegistry>,
    subscriptions: SubscriptionManager,
}

impl Client {
    /// Client backed by `reqwest`, with latency telemetry.
    ///
    /// HTTP clients are built lazily on first use.
    pub fn new(config: Config) -> Self {
        Self::with_parts(
            config,
            Pipeline::reqwest_factory(),
            Arc::new(LatencyTelemetry::new()),
        )
    }

    /// Client using `transport` for both transactional and long-poll
    /// requests.
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        Self::with_parts(
            config,
            Pipeline::shared_factory(transport),
            Arc::new(LatencyTelemetry::new()),
        )
    }

    pub fn with_parts(
        config: Config,
        factory: TransportFactory,
        telemetry: Arc<dyn TelemetryRecorder>,
    ) -> Self {
        let config = Arc::new(config);
        let pipeline = Arc::new(Pipeline::new(Arc::clone(&config), factory, telemetry));
        let listeners = Arc::new(ListenerRegistry::new());
        let subscriptions = SubscriptionManager::new(
            Arc::clone(&config),
            Arc::clone(&pipeline),
            Arc::clone(&listeners),
        );

        Self {
            config,
            pipeline,
            sequence: SequenceGenerator::new(),
            listeners,
            subscriptions,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run any operation through the pipeline, keeping the status metadata.
    pub fn execute<O: Operation>(
        &self,
        operation: &O,
        cancel: Option<&CancellationToken>,
    ) -> Result<Outcome<O::Response>> {
        self.pipeline.execute(operation, cancel)
    }

    // --- Messaging ---

    /// Publish a message. Each call takes the next sequence number.
    pub fn publish(&self, request: PublishRequest) -> Result<PublishResponse> {
        self.publish_with_cancel(request, None)
    }

    pub fn publish_with_cancel(
        &self,
        request: PublishRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<PublishResponse> {
        let publish = Publish {
            request,
            sequence: self.sequence.next(),
        };
        self.run(&publish, cancel)
    }

    pub fn signal(&self, request: SignalRequest) -> Result<PublishResponse> {
        self.signal_with_cancel(request, None)
    }

    pub fn signal_with_cancel(
        &self,
        request: SignalRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<PublishResponse> {
        self.run(&request, cancel)
    }

    pub fn history(&self, request: HistoryRequest) -> Result<HistoryResponse> {
        self.history_with_cancel(request, None)
    }

    pub fn history_with_cancel(
        &self,
        request: HistoryRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<HistoryResponse> {
        self.run(&request, cancel)
    }

    // --- Access Manager ---

    pub fn grant(&self, request: GrantRequest) -> Result<GrantResponse> {
        self.grant_with_cancel(request, None)
    }

    pub fn grant_with_cancel(
        &self,
        request: GrantRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<GrantResponse> {
        self.run(&request, cancel)
    }

    // --- Push ---

    /// Channels a device is registered on for push notifications.
    pub fn list_push_provisions(
        &self,
        request: ListPushProvisionsRequest,
    ) -> Result<ListPushProvisionsResponse> {
        self.list_push_provisions_with_cancel(request, None)
    }

    pub fn list_push_provisions_with_cancel(
        &self,
        request: ListPushProvisionsRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<ListPushProvisionsResponse> {
        self.run(&request, cancel)
    }

    // --- Misc ---

    pub fn time(&self) -> Result<TimeResponse> {
        self.time_with_cancel(None)
    }

    pub fn time_with_cancel(&self, cancel: Option<&CancellationToken>) -> Result<TimeResponse> {
        self.run(&TimeRequest, cancel)
    }

    fn run<O: Operation>(&self, operation: &O, cancel: Option<&CancellationToken>) -> Result<O::Response> {
        self.pipeline
            .execute(operation, cancel)
            .map(|outcome| outcome.value)
    }

    // --- Subscriptions ---

    pub fn subscribe(&self, request: SubscribeRequest) -> Result<()> {
        self.subscriptions.subscribe(request)
    }

    pub fn unsubscribe(&self, request: UnsubscribeRequest) {
        self.subscriptions.unsubscribe(request)
    }

    pub fn unsubscribe_all(&self) {
        self.subscriptions.unsubscribe_all()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.subscriptions.status()
    }

    pub fn cursor(&self) -> Cursor {
        self.subscriptions.cursor()
    }

    pub fn subscribed_channels(&self) -> Vec<String> {
        self.subscriptions.subscribed_channels()
    }

    pub fn subscribed_groups(&self) -> Vec<String> {
        self.subscriptions.subscribed_groups()
    }

    // --- Listeners ---

    pub fn add_listener(&self, listener: Arc<dyn Listener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Register a queue-backed listener sized by `listener_buffer_size`.
    pub fn listen(&self) -> (ListenerId, EventReceiver) {
        let (listener, receiver) = ChannelListener::new(self.config.listener_buffer_size);
        (self.listeners.add(listener), receiver)
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }
}
