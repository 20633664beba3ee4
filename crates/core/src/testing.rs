// In-memory provider transport for tests and local development

use crate::transport::{ProviderTransport, TransportError};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What a scripted call does
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Echo the capability and payload back
    Echo,
    Reply(Value),
    Fail(TransportError),
    /// Reply after sleeping on the tokio clock
    Delay(Duration, Value),
    /// Panic inside the transport
    Panic,
}

/// Transport that replays queued outcomes, then falls back to a default
pub struct MockTransport {
    name: String,
    script: Mutex<VecDeque<MockOutcome>>,
    fallback: Mutex<MockOutcome>,
    connect_error: Mutex<Option<TransportError>>,
    calls: AtomicUsize,
    connects: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl MockTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(MockOutcome::Echo),
            connect_error: Mutex::new(None),
            calls: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        }
    }

    /// Outcome used once the script is exhausted
    pub fn always(self, outcome: MockOutcome) -> Self {
        *self.fallback.lock() = outcome;
        self
    }

    /// Queue an outcome for the next unscripted call
    pub fn push(&self, outcome: MockOutcome) {
        self.script.lock().push_back(outcome);
    }

    /// Replace the fallback outcome
    pub fn set(&self, outcome: MockOutcome) {
        *self.fallback.lock() = outcome;
    }

    pub fn fail_connect(&self, error: TransportError) {
        *self.connect_error.lock() = Some(error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> MockOutcome {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().clone())
    }
}

#[async_trait::async_trait]
impl ProviderTransport for MockTransport {
    async fn call(&self, capability: &str, payload: &Value) -> Result<Value, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match self.next_outcome() {
            MockOutcome::Echo => Ok(json!({
                "provider": self.name,
                "capability": capability,
                "payload": payload,
            })),
            MockOutcome::Reply(value) => Ok(value),
            MockOutcome::Fail(error) => Err(error),
            MockOutcome::Delay(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            MockOutcome::Panic => panic!("mock transport {} panicked", self.name),
        }
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.connect_error.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }

    fn describe(&self) -> String {
        format!("mock:{}", self.name)
    }
}
