//! Request execution pipeline.
//!
//! Turns any [`Operation`] into an HTTP request, runs it on the right
//! client, classifies the outcome and parses the body. No retries happen
//! here; the subscribe loop owns its own retry policy.

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::operations::Operation;
use crate::signature;
use crate::telemetry::{Endpoint, TelemetryRecorder};
use crate::transport::{HttpRequest, ReqwestTransport, Transport, TransportError, TransportKind};
use crate::types::{unix_seconds, OperationType};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// SDK identifier sent as `pnsdk`.
pub const SDK_NAME: &str = concat!("pubwire-rust/", env!("CARGO_PKG_VERSION"));

/// Builds a transport for a given kind on first use.
pub type TransportFactory =
    Arc<dyn Fn(&Config, TransportKind) -> std::result::Result<Arc<dyn Transport>, TransportError> + Send + Sync>;

/// Status metadata of a completed request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestStatus {
    pub status_code: u16,
    pub operation: OperationType,
    pub affiliated_channels: usize,
    pub affiliated_groups: usize,
}

/// Parsed payload plus the status it arrived with.
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub status: RequestStatus,
}

/// Executes operations against the transactional and streaming clients.
pub struct Pipeline {
    config: Arc<Config>,
    factory: TransportFactory,
    transactional: OnceCell<Arc<dyn Transport>>,
    streaming: OnceCell<Arc<dyn Transport>>,
    telemetry: Arc<dyn TelemetryRecorder>,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        factory: TransportFactory,
        telemetry: Arc<dyn TelemetryRecorder>,
    ) -> Self {
        Self {
            config,
            factory,
            transactional: OnceCell::new(),
            streaming: OnceCell::new(),
            telemetry,
        }
    }

    /// Factory building `reqwest` clients from the config timeouts.
    pub fn reqwest_factory() -> TransportFactory {
        Arc::new(
            |config: &Config, kind: TransportKind| -> std::result::Result<Arc<dyn Transport>, TransportError> {
                let transport = ReqwestTransport::for_config(config, kind)?;
                Ok(Arc::new(transport))
            },
        )
    }

    /// Factory handing out the same transport for both kinds.
    pub fn shared_factory(transport: Arc<dyn Transport>) -> TransportFactory {
        Arc::new(
            move |_: &Config, _: TransportKind| -> std::result::Result<Arc<dyn Transport>, TransportError> {
                Ok(Arc::clone(&transport))
            },
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Client for `kind`, constructed once on first use.
    pub fn transport(&self, kind: TransportKind) -> std::result::Result<Arc<dyn Transport>, TransportError> {
        let cell = match kind {
            TransportKind::Transactional => &self.transactional,
            TransportKind::Streaming => &self.streaming,
        };
        cell.get_or_try_init(|| (self.factory)(&self.config, kind))
            .map(Arc::clone)
    }

    /// Validate, build, send and parse one operation.
    ///
    /// Every call is recorded with the telemetry recorder, including calls
    /// that fail validation before reaching the network.
    pub fn execute<O: Operation>(
        &self,
        operation: &O,
        cancel: Option<&CancellationToken>,
    ) -> Result<Outcome<O::Response>> {
        let op_type = operation.operation_type();

        let started = Instant::now();
        let result = self.run(operation, cancel);
        let elapsed = started.elapsed();

        self.telemetry
            .record(op_type, elapsed, Endpoint::of(op_type), result.is_ok());

        match &result {
            Ok(_) => debug!(operation = %op_type, elapsed_ms = elapsed.as_millis() as u64, "request completed"),
            Err(Error::Cancelled { .. }) => debug!(operation = %op_type, "request cancelled"),
            Err(e) => warn!(operation = %op_type, elapsed_ms = elapsed.as_millis() as u64, error = %e, "request failed"),
        }

        result
    }

    fn run<O: Operation>(
        &self,
        operation: &O,
        cancel: Option<&CancellationToken>,
    ) -> Result<Outcome<O::Response>> {
        let op_type = operation.operation_type();

        operation.validate(&self.config)?;
        let request = self.prepare(operation)?;

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(Error::Cancelled { operation: op_type });
        }

        let kind = if op_type.is_streaming() {
            TransportKind::Streaming
        } else {
            TransportKind::Transactional
        };
        let transport = self
            .transport(kind)
            .map_err(|e| transport_error(op_type, e))?;

        debug!(operation = %op_type, method = %request.method, path = request.path(), "sending request");

        let response = transport
            .send(&request, cancel)
            .map_err(|e| transport_error(op_type, e))?;

        if !response.is_success() {
            return Err(Error::Server {
                operation: op_type,
                status: response.status,
                body: response.body,
            });
        }

        let value = operation.parse_response(&response.body)?;
        Ok(Outcome {
            value,
            status: RequestStatus {
                status_code: response.status,
                operation: op_type,
                affiliated_channels: operation.affiliated_channels(),
                affiliated_groups: operation.affiliated_groups(),
            },
        })
    }

    /// Build the full HTTP request for an operation, including per-request
    /// parameters and the signature.
    pub fn prepare<O: Operation>(&self, operation: &O) -> Result<HttpRequest> {
        let config = &*self.config;
        let path = operation.build_path(config)?;
        let mut query = operation.build_query(config)?;
        let body = operation.build_body(config)?;
        let method = operation.http_method();

        query.set("pnsdk", SDK_NAME);
        query.set("requestid", uuid::Uuid::new_v4().to_string());
        if !config.auth_key.is_empty() && !query.contains("auth") {
            query.set("auth", config.auth_key.as_str());
        }
        for (key, value) in self.telemetry.latency_query() {
            query.set(key, value);
        }
        query.set("timestamp", unix_seconds().to_string());

        if operation.requires_auth() && !config.secret_key.is_empty() {
            let signature = signature::sign(
                &config.secret_key,
                &config.subscribe_key,
                &config.publish_key,
                method,
                &path,
                &query,
                &body,
            );
            query.set("signature", signature);
        }

        Ok(HttpRequest {
            method,
            url: format!("{}{}?{}", config.base_url(), path, query.encode()),
            body,
            connect_timeout: operation.connect_timeout(config),
            timeout: operation.request_timeout(config),
        })
    }
}

fn transport_error(operation: OperationType, e: TransportError) -> Error {
    if e.cancelled {
        return Error::Cancelled { operation };
    }
    Error::Connection {
        operation,
        message: e.message,
        timed_out: e.timed_out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::operations::{GrantRequest, ListPushProvisionsRequest, TimeRequest};
    use crate::telemetry::NoopTelemetry;
    use crate::transport::HttpResponse;
    use crate::types::PushType;
    use crossbeam_channel::RecvTimeoutError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    struct Scripted {
        responses: Mutex<Vec<std::result::Result<HttpResponse, TransportError>>>,
        requests: Mutex<Vec<HttpRequest>>,
        delay: Duration,
    }

    impl Scripted {
        fn new(responses: Vec<std::result::Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            })
        }
    }

    impl Transport for Scripted {
        fn send(
            &self,
            request: &HttpRequest,
            cancel: Option<&CancellationToken>,
        ) -> std::result::Result<HttpResponse, TransportError> {
            self.requests.lock().push(request.clone());
            match cancel {
                Some(token) => {
                    if let Err(RecvTimeoutError::Disconnected) =
                        token.receiver().recv_timeout(self.delay)
                    {
                        return Err(TransportError::cancelled());
                    }
                }
                None => thread::sleep(self.delay),
            }
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Err(TransportError::new("no scripted response"))
            } else {
                responses.remove(0)
            }
        }
    }

    fn config() -> Arc<Config> {
        Arc::new(Config {
            publish_key: "pub".into(),
            subscribe_key: "sub".into(),
            secret_key: "sec".into(),
            uuid: "client-1".into(),
            ..Default::default()
        })
    }

    /// Remembers every recorded call.
    #[derive(Default)]
    struct Recorded {
        calls: Mutex<Vec<(OperationType, bool)>>,
    }

    impl TelemetryRecorder for Recorded {
        fn record(&self, operation: OperationType, _: Duration, _: Endpoint, success: bool) {
            self.calls.lock().push((operation, success));
        }
    }

    fn pipeline(transport: Arc<Scripted>) -> Pipeline {
        Pipeline::new(config(), Pipeline::shared_factory(transport), Arc::new(NoopTelemetry))
    }

    #[test]
    fn test_validation_fails_before_network() {
        let transport = Scripted::new(vec![]);
        let p = pipeline(Arc::clone(&transport));
        let err = p
            .execute(
                &ListPushProvisionsRequest {
                    device_id: "d".into(),
                    push_type: PushType::None,
                    ..Default::default()
                },
                None,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(transport.requests.lock().is_empty());
    }

    #[test]
    fn test_validation_failure_is_recorded() {
        let transport = Scripted::new(vec![Ok(HttpResponse::new(200, "[15]"))]);
        let telemetry = Arc::new(Recorded::default());
        let p = Pipeline::new(
            config(),
            Pipeline::shared_factory(transport),
            Arc::clone(&telemetry) as Arc<dyn TelemetryRecorder>,
        );

        let invalid = ListPushProvisionsRequest {
            device_id: String::new(),
            push_type: PushType::Gcm,
            ..Default::default()
        };
        assert!(p.execute(&invalid, None).is_err());
        p.execute(&TimeRequest, None).unwrap();

        assert_eq!(
            *telemetry.calls.lock(),
            vec![
                (OperationType::ListPushProvisions, false),
                (OperationType::Time, true),
            ]
        );
    }

    #[test]
    fn test_signed_request_carries_signature_and_defaults() {
        let transport = Scripted::new(vec![Ok(HttpResponse::new(200, r#"{"payload":{}}"#))]);
        let p = pipeline(Arc::clone(&transport));
        p.execute(&GrantRequest::default(), None).unwrap();

        let requests = transport.requests.lock();
        let req = &requests[0];
        assert_eq!(req.path(), "/v1/auth/grant/sub-key/sub");
        assert!(req.query_param("signature").unwrap().starts_with("v2."));
        assert!(req.query_param("timestamp").is_some());
        assert!(req.query_param("requestid").is_some());
        assert_eq!(req.query_param("uuid"), Some("client-1"));
        assert_eq!(req.connect_timeout, p.config().connect_timeout);
        assert_eq!(req.timeout, p.config().non_subscribe_request_timeout);
    }

    #[test]
    fn test_non_2xx_becomes_server_error() {
        let transport = Scripted::new(vec![Ok(HttpResponse::new(403, "Forbidden"))]);
        let err = pipeline(transport).execute(&TimeRequest, None).unwrap_err();
        match err {
            Error::Server { status, body, .. } => {
                assert_eq!(status, 403);
                assert_eq!(body, b"Forbidden");
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[test]
    fn test_transport_failure_is_not_retried() {
        let transport = Scripted::new(vec![
            Err(TransportError::timeout("timed out")),
            Ok(HttpResponse::new(200, "[1]")),
        ]);
        let err = pipeline(Arc::clone(&transport))
            .execute(&TimeRequest, None)
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(transport.requests.lock().len(), 1);
    }

    #[test]
    fn test_outcome_carries_status() {
        let transport = Scripted::new(vec![Ok(HttpResponse::new(200, "[15]"))]);
        let outcome = pipeline(transport).execute(&TimeRequest, None).unwrap();
        assert_eq!(outcome.value.timetoken, 15);
        assert_eq!(outcome.status.status_code, 200);
        assert_eq!(outcome.status.operation, OperationType::Time);
    }

    #[test]
    fn test_cancellation_aborts_in_flight_request() {
        let transport = Arc::new(Scripted {
            responses: Mutex::new(vec![Ok(HttpResponse::new(200, "[15]"))]),
            requests: Mutex::new(Vec::new()),
            delay: Duration::from_secs(2),
        });
        let p = pipeline(Arc::clone(&transport));
        let token = CancellationToken::new();
        let canceller = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });

        let started = Instant::now();
        let err = p.execute(&TimeRequest, Some(&token)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(1));
        // The send ran on this thread and has returned; nothing is left behind.
        assert_eq!(transport.requests.lock().len(), 1);
    }

    #[test]
    fn test_transports_constructed_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let shared: Arc<dyn Transport> = Scripted::new(vec![]);
        let factory: TransportFactory = Arc::new(
            move |_: &Config, _: TransportKind| -> std::result::Result<Arc<dyn Transport>, TransportError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::clone(&shared))
            },
        );
        let p = Arc::new(Pipeline::new(config(), factory, Arc::new(NoopTelemetry)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let p = Arc::clone(&p);
                thread::spawn(move || {
                    p.transport(TransportKind::Transactional).unwrap();
                    p.transport(TransportKind::Streaming).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }
}
