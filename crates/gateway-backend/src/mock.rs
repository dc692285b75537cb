use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gateway_core::backend::{BackendConnector, Bootstrapper, ExecutionBackend};
use gateway_core::kernel::BackendLanguage;
use gateway_core::{GatewayError, Target};
use parking_lot::Mutex;

/// Pre-programmed evaluation outcomes for deterministic tests.
pub enum MockResponse {
    /// Evaluation succeeds with this output.
    Output(String),
    /// The backend ran the code and reported failure.
    Failure(String),
    /// The connection broke mid-call.
    Unavailable(String),
    /// Wait, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
    /// Never completes on its own.
    Hang,
}

impl MockResponse {
    pub fn output(text: &str) -> Self {
        Self::Output(text.to_string())
    }

    pub fn failure(text: &str) -> Self {
        Self::Failure(text.to_string())
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockCall {
    pub code: String,
    pub language: BackendLanguage,
}

#[derive(Default)]
struct MockState {
    script: Mutex<VecDeque<MockResponse>>,
    calls: Mutex<Vec<MockCall>>,
    connects: AtomicUsize,
    terminations: AtomicUsize,
    interrupts: AtomicUsize,
    fail_connect: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
}

/// Connector whose backends share one response script. With the script
/// exhausted, evaluation echoes the code back.
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<MockState>,
    interruptible: bool,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState::default()),
            interruptible: true,
        }
    }

    pub fn with_responses(responses: Vec<MockResponse>) -> Self {
        let connector = Self::new();
        connector.state.script.lock().extend(responses);
        connector
    }

    /// Backends from this connector report no interrupt primitive.
    pub fn without_interrupt(mut self) -> Self {
        self.interruptible = false;
        self
    }

    pub fn push(&self, response: MockResponse) {
        self.state.script.lock().push_back(response);
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.calls.lock().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn terminate_count(&self) -> usize {
        self.state.terminations.load(Ordering::SeqCst)
    }

    pub fn interrupt_count(&self) -> usize {
        self.state.interrupts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendConnector for MockConnector {
    async fn connect(&self, target: &Target) -> Result<Box<dyn ExecutionBackend>, GatewayError> {
        let delay = *self.state.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(GatewayError::backend(format!(
                "connection to {} refused",
                target.key
            )));
        }
        let _ = self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockBackend {
            state: self.state.clone(),
            interruptible: self.interruptible,
            terminated: false,
        }))
    }
}

pub struct MockBackend {
    state: Arc<MockState>,
    interruptible: bool,
    terminated: bool,
}

#[async_trait]
impl ExecutionBackend for MockBackend {
    async fn evaluate(&mut self, code: &str, language: BackendLanguage) -> Result<String, GatewayError> {
        self.state.calls.lock().push(MockCall {
            code: code.to_string(),
            language,
        });
        let next = self.state.script.lock().pop_front();
        let mut current = next.unwrap_or_else(|| MockResponse::Output(code.to_string()));
        loop {
            match current {
                MockResponse::Output(out) => return Ok(out),
                MockResponse::Failure(text) => return Err(GatewayError::ExecutionFailure(text)),
                MockResponse::Unavailable(text) => return Err(GatewayError::backend(text)),
                MockResponse::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    current = *inner;
                }
                MockResponse::Hang => return std::future::pending().await,
            }
        }
    }

    fn supports_interrupt(&self) -> bool {
        self.interruptible
    }

    async fn interrupt(&mut self) -> Result<(), GatewayError> {
        if !self.interruptible {
            return Err(GatewayError::Unsupported("interrupt".into()));
        }
        let _ = self.state.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn terminate(&mut self) {
        if !self.terminated {
            self.terminated = true;
            let _ = self.state.terminations.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Counts bootstrap calls; optionally slow or failing.
#[derive(Default)]
pub struct MockBootstrapper {
    calls: AtomicUsize,
    delay: Option<Duration>,
    fail: AtomicBool,
}

impl MockBootstrapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Bootstrapper for MockBootstrapper {
    async fn ensure_support(&self, target: &Target) -> Result<(), GatewayError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::no_kernels(format!(
                "Namespace '{}' on server '{}' cannot run kernels.",
                target.namespace(),
                target.server()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::NamespaceKey;

    fn target() -> Target {
        Target {
            key: NamespaceKey::new("mock", "USER"),
            connection: None,
        }
    }

    #[tokio::test]
    async fn scripted_then_echo() {
        let connector = MockConnector::with_responses(vec![
            MockResponse::output("first"),
            MockResponse::failure("<UNDEFINED>"),
        ]);
        let mut backend = connector.connect(&target()).await.unwrap();
        let lang = BackendLanguage::ObjectScript;
        assert_eq!(backend.evaluate("a", lang).await.unwrap(), "first");
        assert!(matches!(
            backend.evaluate("b", lang).await,
            Err(GatewayError::ExecutionFailure(t)) if t == "<UNDEFINED>"
        ));
        assert_eq!(backend.evaluate("echo me", lang).await.unwrap(), "echo me");
        assert_eq!(connector.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_then_output() {
        let connector = MockConnector::with_responses(vec![MockResponse::delayed(
            Duration::from_secs(5),
            MockResponse::output("late"),
        )]);
        let mut backend = connector.connect(&target()).await.unwrap();
        let out = backend.evaluate("x", BackendLanguage::Python).await.unwrap();
        assert_eq!(out, "late");
    }

    #[tokio::test]
    async fn connect_failure_and_terminate_once() {
        let connector = MockConnector::new();
        connector.fail_connect(true);
        assert!(connector.connect(&target()).await.is_err());
        connector.fail_connect(false);
        let mut backend = connector.connect(&target()).await.unwrap();
        backend.terminate().await;
        backend.terminate().await;
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(connector.terminate_count(), 1);
    }

    #[tokio::test]
    async fn interrupt_support_is_configurable() {
        let connector = MockConnector::new().without_interrupt();
        let mut backend = connector.connect(&target()).await.unwrap();
        assert!(!backend.supports_interrupt());
        assert!(matches!(backend.interrupt().await, Err(GatewayError::Unsupported(_))));
    }
}
