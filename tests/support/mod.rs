//! Scripted in-memory transport shared by the integration tests.

#![allow(dead_code)]

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use pubwire::{
    CancellationToken, Client, Config, ConnectionStatus, Event, EventReceiver, HttpRequest,
    HttpResponse, StatusEvent, Transport, TransportError,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// What the transport answers with.
#[derive(Clone, Debug)]
pub enum Reply {
    Ok(String),
    Status(u16, String),
    Timeout,
}

impl Reply {
    pub fn ok(body: impl Into<String>) -> Self {
        Reply::Ok(body.into())
    }
}

/// Answers long-polls from a script, then idles with empty envelopes that
/// echo the request cursor. Other requests get queued replies or `{}`.
#[derive(Default)]
pub struct ScriptedTransport {
    subscribe: Mutex<VecDeque<Reply>>,
    other: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_subscribe(&self, replies: impl IntoIterator<Item = Reply>) {
        self.subscribe.lock().extend(replies);
    }

    pub fn script(&self, replies: impl IntoIterator<Item = Reply>) {
        self.other.lock().extend(replies);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn subscribe_requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| is_subscribe(r))
            .cloned()
            .collect()
    }

    pub fn requests_to(&self, path_fragment: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.path().contains(path_fragment))
            .cloned()
            .collect()
    }
}

fn is_subscribe(request: &HttpRequest) -> bool {
    request.path().starts_with("/v2/subscribe/")
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        request: &HttpRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request.clone());

        let reply = if is_subscribe(request) {
            let scripted = self.subscribe.lock().pop_front();
            match scripted {
                Some(reply) => reply,
                None => {
                    hold(cancel, Duration::from_millis(20))?;
                    let tt = request.query_param("tt").unwrap_or("0");
                    Reply::Ok(format!(r#"{{"t":{{"t":"{tt}","r":1}},"m":[]}}"#))
                }
            }
        } else {
            self.other
                .lock()
                .pop_front()
                .unwrap_or_else(|| Reply::ok("{}"))
        };

        match reply {
            Reply::Ok(body) => Ok(HttpResponse::new(200, body)),
            Reply::Status(status, body) => Ok(HttpResponse::new(status, body)),
            Reply::Timeout => {
                thread::sleep(Duration::from_millis(5));
                Err(TransportError::timeout("read timed out"))
            }
        }
    }
}

/// Block like a server holding the request, for `duration` or until
/// `cancel` fires.
pub fn hold(cancel: Option<&CancellationToken>, duration: Duration) -> Result<(), TransportError> {
    match cancel {
        Some(token) => match token.receiver().recv_timeout(duration) {
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::cancelled()),
            _ => Ok(()),
        },
        None => {
            thread::sleep(duration);
            Ok(())
        }
    }
}

/// Route `tracing` output through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> Config {
    Config {
        publish_key: "pub-key".into(),
        subscribe_key: "sub-key".into(),
        uuid: "client-1".into(),
        reconnection_base_delay: Duration::from_millis(10),
        reconnection_max_delay: Duration::from_millis(40),
        ..Default::default()
    }
}

pub fn client(transport: &Arc<ScriptedTransport>) -> Client {
    client_with(test_config(), transport)
}

pub fn client_with(config: Config, transport: &Arc<ScriptedTransport>) -> Client {
    init_tracing();
    Client::with_transport(config, Arc::clone(transport) as Arc<dyn Transport>)
}

/// Envelope with `(channel, payload json, timetoken)` messages.
pub fn envelope(cursor: (u64, u32), messages: &[(&str, &str, u64)]) -> Reply {
    let messages: Vec<String> = messages
        .iter()
        .map(|(channel, payload, tt)| {
            format!(r#"{{"c":"{channel}","d":{payload},"p":{{"t":"{tt}","r":1}},"i":"pub-1"}}"#)
        })
        .collect();
    Reply::Ok(format!(
        r#"{{"t":{{"t":"{}","r":{}}},"m":[{}]}}"#,
        cursor.0,
        cursor.1,
        messages.join(",")
    ))
}

pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Collect events until a status event with `current == want` arrives.
pub fn events_until(events: &EventReceiver, want: ConnectionStatus) -> (Vec<Event>, StatusEvent) {
    let mut seen = Vec::new();
    loop {
        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(Event::Status(status)) if status.current == want => return (seen, status),
            Ok(event) => seen.push(event),
            Err(e) => panic!("no {want:?} status after {seen:?}: {e}"),
        }
    }
}

pub fn message_timetokens(events: &[Event]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Message(m) => Some(m.timetoken),
            _ => None,
        })
        .collect()
}
