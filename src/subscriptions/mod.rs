//! Real-time subscriptions over long-poll.
//!
//! This module provides:
//! - [`SubscriptionManager`]: the long-poll loop with reconnects and a
//!   persistent cursor
//! - [`ListenerRegistry`]: fan-out of messages, signals, presence and
//!   status changes to registered listeners
//! - Stock listeners: [`CallbackListener`] and the queue-backed
//!   [`ChannelListener`]
//!
//! # Example
//!
//! ```ignore
//! let (listener, events) = ChannelListener::new(1000);
//! client.add_listener(listener);
//! client.subscribe(SubscribeRequest::channels(["room-1"]))?;
//!
//! loop {
//!     match events.recv() {
//!         Ok(Event::Message(m)) => println!("{}: {}", m.channel, m.payload),
//!         Ok(Event::Status(s)) => println!("status: {:?}", s.current),
//!         Ok(_) => {}
//!         Err(_) => break,
//!     }
//! }
//! ```

mod listeners;
mod manager;
mod types;

pub use listeners::{
    CallbackListener, ChannelListener, EventReceiver, Listener, ListenerId, ListenerRegistry,
};
pub use manager::SubscriptionManager;
pub use types::{
    ConnectionStatus, Event, MessageEvent, PresenceEvent, SignalEvent, StatusCategory,
    StatusEvent, SubscribeRequest, UnsubscribeRequest, PRESENCE_SUFFIX,
};
