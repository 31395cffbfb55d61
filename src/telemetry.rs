//! Request timing telemetry.
//!
//! The pipeline reports every request to a [`TelemetryRecorder`]. The
//! default [`LatencyTelemetry`] keeps a sliding window of successful
//! latencies per endpoint and reports their averages back to the service
//! as `l_<endpoint>` query parameters on later requests.

use crate::types::OperationType;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Default averaging window.
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Service endpoint family an operation belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Endpoint {
    Publish,
    History,
    AccessManager,
    Push,
    Presence,
    Time,
    Subscribe,
}

impl Endpoint {
    pub fn of(operation: OperationType) -> Self {
        match operation {
            OperationType::Publish | OperationType::Signal => Endpoint::Publish,
            OperationType::History => Endpoint::History,
            OperationType::Grant => Endpoint::AccessManager,
            OperationType::ListPushProvisions => Endpoint::Push,
            OperationType::Leave => Endpoint::Presence,
            OperationType::Time => Endpoint::Time,
            OperationType::Subscribe => Endpoint::Subscribe,
        }
    }

    /// Query key used when reporting latency, `None` for endpoints that
    /// are not reported.
    pub fn query_key(self) -> Option<&'static str> {
        match self {
            Endpoint::Publish => Some("l_pub"),
            Endpoint::History => Some("l_hist"),
            Endpoint::AccessManager => Some("l_pam"),
            Endpoint::Push => Some("l_push"),
            Endpoint::Presence => Some("l_pres"),
            Endpoint::Time => Some("l_time"),
            Endpoint::Subscribe => None,
        }
    }
}

/// Sink for per-request timings.
pub trait TelemetryRecorder: Send + Sync {
    /// Record one finished request, successful or not.
    fn record(&self, operation: OperationType, elapsed: Duration, endpoint: Endpoint, success: bool);

    /// Parameters to attach to outgoing requests.
    fn latency_query(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// Recorder that discards everything.
#[derive(Debug, Default)]
pub struct NoopTelemetry;

impl TelemetryRecorder for NoopTelemetry {
    fn record(&self, _: OperationType, _: Duration, _: Endpoint, _: bool) {}
}

/// Sliding-window latency averages per endpoint.
pub struct LatencyTelemetry {
    window: Duration,
    samples: Mutex<HashMap<Endpoint, VecDeque<(Instant, Duration)>>>,
}

impl LatencyTelemetry {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            samples: Mutex::new(HashMap::new()),
        }
    }

    /// Average latency of samples still inside the window.
    pub fn average(&self, endpoint: Endpoint) -> Option<Duration> {
        let mut samples = self.samples.lock();
        let queue = samples.get_mut(&endpoint)?;
        Self::prune(queue, self.window, Instant::now());
        if queue.is_empty() {
            return None;
        }
        let total: Duration = queue.iter().map(|(_, d)| *d).sum();
        Some(total / queue.len() as u32)
    }

    fn prune(queue: &mut VecDeque<(Instant, Duration)>, window: Duration, now: Instant) {
        while let Some((at, _)) = queue.front() {
            if now.duration_since(*at) > window {
                queue.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for LatencyTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryRecorder for LatencyTelemetry {
    fn record(&self, _operation: OperationType, elapsed: Duration, endpoint: Endpoint, success: bool) {
        if !success || endpoint.query_key().is_none() {
            return;
        }
        let now = Instant::now();
        let mut samples = self.samples.lock();
        let queue = samples.entry(endpoint).or_default();
        queue.push_back((now, elapsed));
        Self::prune(queue, self.window, now);
    }

    fn latency_query(&self) -> Vec<(String, String)> {
        let now = Instant::now();
        let mut samples = self.samples.lock();
        let mut params: Vec<(String, String)> = samples
            .iter_mut()
            .filter_map(|(endpoint, queue)| {
                Self::prune(queue, self.window, now);
                let key = endpoint.query_key()?;
                if queue.is_empty() {
                    return None;
                }
                let total: Duration = queue.iter().map(|(_, d)| *d).sum();
                let avg = total.as_secs_f64() / queue.len() as f64;
                Some((key.to_string(), format!("{:.3}", avg)))
            })
            .collect();
        params.sort();
        params
    }
}
