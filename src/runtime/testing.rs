//! Mock implementations for testing
//!
//! These mocks enable orchestrator and adapter tests without real I/O.

use super::traits::*;
use crate::db::InteractionRecord;
use crate::language::Language;
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService, Usage};
use crate::retrieval::{Embedder, VectorIndex};
use crate::router::{AsideAnswer, Classification, HeuristicClassifier, Intent};
use crate::session::ContactContext;
use crate::store::{BackendError, MemoryBackend, SessionBackend};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Mock LLM Service
// ============================================================================

/// Mock LLM service that returns queued responses
pub struct MockLlmService {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    /// Record of all requests made
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmService {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn queue_text(&self, text: &str) {
        self.queue_response(LlmResponse {
            text: text.to_string(),
            usage: Usage::default(),
        });
    }

    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmService for MockLlmService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

// ============================================================================
// Mock Classifiers
// ============================================================================

/// Classifier that replays queued results, then falls back to the heuristic
pub struct ScriptedClassifier {
    results: Mutex<VecDeque<Result<Classification, CapabilityError>>>,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn queue(&self, result: Result<Classification, CapabilityError>) {
        self.results.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntentClassifier for ScriptedClassifier {
    async fn classify(
        &self,
        _language: Language,
        _dialogue_summary: &str,
        text: &str,
    ) -> Result<Classification, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let queued = self.results.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| Ok(HeuristicClassifier::classify_text(text)))
    }
}

/// Classifier that takes `delay` before answering
pub struct SlowClassifier {
    delay: Duration,
}

impl SlowClassifier {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl IntentClassifier for SlowClassifier {
    async fn classify(
        &self,
        _language: Language,
        _dialogue_summary: &str,
        _text: &str,
    ) -> Result<Classification, CapabilityError> {
        tokio::time::sleep(self.delay).await;
        Ok(Classification::new(Intent::Answer, 1.0))
    }
}

// ============================================================================
// Mock Retrieval
// ============================================================================

/// Retriever that replays queued results, then reports no information
pub struct MockRetriever {
    results: Mutex<VecDeque<Result<AsideAnswer, CapabilityError>>>,
    questions: Mutex<Vec<String>>,
}

impl MockRetriever {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            questions: Mutex::new(Vec::new()),
        }
    }

    pub fn queue(&self, result: Result<AsideAnswer, CapabilityError>) {
        self.results.lock().unwrap().push_back(result);
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Retriever for MockRetriever {
    async fn answer(&self, _language: Language, text: &str) -> Result<AsideAnswer, CapabilityError> {
        self.questions.lock().unwrap().push(text.to_string());
        let queued = self.results.lock().unwrap().pop_front();
        queued.unwrap_or(Ok(AsideAnswer::NoInformation))
    }
}

pub struct StaticEmbedder;

#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
        Ok(vec![0.1, 0.2, 0.3])
    }
}

/// Index that returns the same passages for every query
pub struct StaticIndex {
    passages: Vec<String>,
}

impl StaticIndex {
    pub fn new(passages: Vec<&str>) -> Self {
        Self {
            passages: passages.into_iter().map(str::to_string).collect(),
        }
    }
}

#[async_trait]
impl VectorIndex for StaticIndex {
    async fn query(&self, _vector: Vec<f32>, top_k: usize) -> Result<Vec<String>, CapabilityError> {
        Ok(self.passages.iter().take(top_k).cloned().collect())
    }
}

// ============================================================================
// Mock Language Detection and Context
// ============================================================================

/// Detector with a fixed verdict
pub struct StaticDetector(pub Option<Language>);

#[async_trait]
impl LanguageDetector for StaticDetector {
    async fn detect(&self, _text: &str) -> Result<Option<Language>, CapabilityError> {
        Ok(self.0)
    }
}

pub struct FailingDetector;

#[async_trait]
impl LanguageDetector for FailingDetector {
    async fn detect(&self, _text: &str) -> Result<Option<Language>, CapabilityError> {
        Err(CapabilityError::Transport("detector offline".into()))
    }
}

/// Context lookup with a fixed result
pub struct MockContextLookup {
    context: Option<ContactContext>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockContextLookup {
    pub fn new(context: Option<ContactContext>) -> Self {
        Self {
            context,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            context: None,
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextLookup for MockContextLookup {
    async fn lookup(&self, _user_id: &str) -> Result<Option<ContactContext>, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CapabilityError::Transport("directory offline".into()));
        }
        Ok(self.context.clone())
    }
}

// ============================================================================
// Mock Audit Sink
// ============================================================================

/// Audit sink that keeps records in memory
#[derive(Default)]
pub struct RecordingAuditSink {
    records: Mutex<Vec<InteractionRecord>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<InteractionRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Wait until at least `n` records arrived from detached tasks
    pub async fn wait_for(&self, n: usize) -> Vec<InteractionRecord> {
        for _ in 0..100 {
            if self.records.lock().unwrap().len() >= n {
                break;
            }
            tokio::task::yield_now().await;
        }
        self.records()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, record: &InteractionRecord) -> Result<(), CapabilityError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

// ============================================================================
// Mock Session Backends
// ============================================================================

/// Strict in-memory backend that can be switched off or slowed down
pub struct FlakyBackend {
    inner: MemoryBackend,
    available: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            available: AtomicBool::new(true),
            delay: Mutex::new(None),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    async fn gate(&self) -> Result<(), BackendError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable("connection refused".into()))
        }
    }
}

#[async_trait]
impl SessionBackend for FlakyBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.gate().await?;
        self.inner.get(key).await
    }

    async fn put(
        &self,
        key: &str,
        payload: &str,
        expected_version: u64,
        ttl: Duration,
    ) -> Result<(), BackendError> {
        self.gate().await?;
        self.inner.put(key, payload, expected_version, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        self.gate().await?;
        self.inner.delete(key).await
    }

    async fn count(&self, prefix: &str) -> Result<usize, BackendError> {
        self.gate().await?;
        self.inner.count(prefix).await
    }

    async fn purge(&self, prefix: &str) -> Result<usize, BackendError> {
        self.gate().await?;
        self.inner.purge(prefix).await
    }
}

/// Backend where another writer bumps the record right before our writes
///
/// Simulates a second instance updating the same session between our load
/// and our save.
pub struct InterferingBackend {
    inner: MemoryBackend,
    remaining: AtomicUsize,
}

impl InterferingBackend {
    /// Interfere with the next `times` writes to existing records
    pub fn new(times: usize) -> Self {
        Self {
            inner: MemoryBackend::new(),
            remaining: AtomicUsize::new(times),
        }
    }

    async fn bump(&self, key: &str) -> Result<(), BackendError> {
        let Some(payload) = self.inner.get(key).await? else {
            return Ok(());
        };
        let Ok(mut value) = serde_json::from_str::<serde_json::Value>(&payload) else {
            return Ok(());
        };
        let version = value["version"].as_u64().unwrap_or(0);
        value["version"] = serde_json::json!(version + 1);
        self.inner
            .put(key, &value.to_string(), version, Duration::from_secs(3600))
            .await
    }
}

#[async_trait]
impl SessionBackend for InterferingBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.inner.get(key).await
    }

    async fn put(
        &self,
        key: &str,
        payload: &str,
        expected_version: u64,
        ttl: Duration,
    ) -> Result<(), BackendError> {
        if expected_version > 0
            && self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            self.bump(key).await?;
        }
        self.inner.put(key, payload, expected_version, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        self.inner.delete(key).await
    }

    async fn count(&self, prefix: &str) -> Result<usize, BackendError> {
        self.inner.count(prefix).await
    }

    async fn purge(&self, prefix: &str) -> Result<usize, BackendError> {
        self.inner.purge(prefix).await
    }
}
