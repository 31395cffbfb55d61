//! # pubwire
//!
//! Blocking client for a pub/sub HTTP service.
//!
//! ## Core Concepts
//!
//! - **Operations**: every request type implements one [`Operation`]
//!   contract (validate, build path/query/body, parse)
//! - **Pipeline**: executes any operation on a lazily built HTTP client,
//!   signing, classifying and parsing along the way
//! - **Subscriptions**: a background long-poll loop with reconnects, a
//!   persistent cursor and listener fan-out
//!
//! ## Example
//!
//! ```ignore
//! use pubwire::{Client, Config, PublishRequest, SubscribeRequest, Event};
//!
//! let client = Client::new(Config {
//!     publish_key: "pub-key".into(),
//!     subscribe_key: "sub-key".into(),
//!     ..Default::default()
//! });
//!
//! let (_, events) = client.listen();
//! client.subscribe(SubscribeRequest::channels(["room-1"]))?;
//!
//! client.publish(PublishRequest::new("room-1", "hello"))?;
//!
//! if let Ok(Event::Message(m)) = events.recv() {
//!     println!("{} says {}", m.channel, m.payload);
//! }
//! ```

pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod operations;
pub mod pipeline;
pub mod sequence;
pub mod signature;
pub mod subscriptions;
pub mod telemetry;
pub mod transport;
pub mod types;

// Re-exports
pub use cancel::CancellationToken;
pub use client::Client;
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use operations::{
    AccessKeyData, GrantRequest, GrantResponse, HistoryItem, HistoryRequest, HistoryResponse,
    ListPushProvisionsRequest, ListPushProvisionsResponse, Operation, PublishRequest,
    PublishResponse, SignalRequest, TimeRequest, TimeResponse,
};
pub use pipeline::{Outcome, Pipeline, RequestStatus};
pub use sequence::SequenceGenerator;
pub use subscriptions::{
    CallbackListener, ChannelListener, ConnectionStatus, Event, EventReceiver, Listener,
    ListenerId, MessageEvent, PresenceEvent, SignalEvent, StatusCategory, StatusEvent,
    SubscribeRequest, UnsubscribeRequest,
};
pub use telemetry::{LatencyTelemetry, NoopTelemetry, TelemetryRecorder};
pub use transport::{HttpRequest, HttpResponse, Transport, TransportError};
pub use types::{Cursor, HttpMethod, OperationType, PushEnvironment, PushType};
