//! In-memory transport used by unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::transport::{GuardTransport, TransportError, TransportResponse};

#[derive(Debug, Clone)]
pub enum Behavior {
    /// Answer immediately with this status and body
    Respond(u16, String),
    /// Answer 200 after a delay
    Slow(Duration),
    /// Never answer
    Hang,
    /// Fail with a connection error
    Refuse,
    /// Panic inside the transport
    Panic,
}

/// Transport keyed by URL that records every call and the peak concurrency
pub struct MockTransport {
    behaviors: HashMap<String, Behavior>,
    default: Behavior,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockTransport {
    pub fn new(default: Behavior) -> Self {
        Self {
            behaviors: HashMap::new(),
            default,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn healthy() -> Self {
        Self::new(Behavior::Respond(200, r#"{"status":"ok"}"#.to_string()))
    }

    pub fn with(mut self, url: impl Into<String>, behavior: Behavior) -> Self {
        self.behaviors.insert(url.into(), behavior);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|u| u.as_str() == url).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn respond(&self, url: &str) -> Result<TransportResponse, TransportError> {
        self.calls.lock().push(url.to_string());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let behavior = self.behaviors.get(url).cloned().unwrap_or_else(|| self.default.clone());
        match behavior {
            Behavior::Respond(status, body) => Ok(TransportResponse::new(status, body)),
            Behavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(TransportResponse::new(200, "{}"))
            }
            Behavior::Hang => std::future::pending().await,
            Behavior::Refuse => Err(TransportError::Connection("connection refused".to_string())),
            Behavior::Panic => panic!("transport exploded"),
        }
    }
}

#[async_trait]
impl GuardTransport for MockTransport {
    async fn get(&self, url: &str, _timeout: Duration) -> Result<TransportResponse, TransportError> {
        self.respond(url).await
    }

    async fn post_json(
        &self,
        url: &str,
        _body: &serde_json::Value,
        _timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        self.respond(url).await
    }
}
