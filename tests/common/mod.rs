//! Shared test doubles for the integration suites
//!
//! Scripted models stand in for the opaque LLM: they return canned
//! turns, record what they were asked, or fail on purpose, so the
//! orchestration semantics can be asserted deterministically.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentloom::{
    EngineError, Event, EventKind, EventStream, InvocationOutcome, LanguageModel, ModelRequest,
    ModelTurn, StateMap,
};

/// Always answers with the same text
pub struct TextModel(pub String);

impl TextModel {
    pub fn new(text: impl Into<String>) -> Arc<Self> {
        Arc::new(Self(text.into()))
    }
}

#[async_trait]
impl LanguageModel for TextModel {
    async fn complete(&self, _request: &ModelRequest) -> Result<ModelTurn, EngineError> {
        Ok(ModelTurn::Text(self.0.clone()))
    }
}

/// Pops scripted turns in order; fails when the script runs dry
pub struct ScriptModel {
    turns: Mutex<VecDeque<ModelTurn>>,
}

impl ScriptModel {
    pub fn new(turns: Vec<ModelTurn>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
        })
    }
}

#[async_trait]
impl LanguageModel for ScriptModel {
    async fn complete(&self, _request: &ModelRequest) -> Result<ModelTurn, EngineError> {
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| EngineError::model_error("script", "script exhausted"))
    }
}

/// Records every request it sees, then delegates to an inner model
pub struct RecordingModel {
    inner: Arc<dyn LanguageModel>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
}

impl RecordingModel {
    pub fn new(inner: Arc<dyn LanguageModel>) -> (Arc<Self>, Arc<Mutex<Vec<ModelRequest>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let model = Arc::new(Self {
            inner,
            requests: requests.clone(),
        });
        (model, requests)
    }
}

#[async_trait]
impl LanguageModel for RecordingModel {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelTurn, EngineError> {
        self.requests.lock().unwrap().push(request.clone());
        self.inner.complete(request).await
    }
}

/// Sleeps, then answers (or fails)
pub struct SlowModel {
    pub delay: Duration,
    pub result: Result<String, String>,
}

impl SlowModel {
    pub fn text(delay: Duration, text: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            delay,
            result: Ok(text.into()),
        })
    }

    pub fn failing(delay: Duration, message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            delay,
            result: Err(message.into()),
        })
    }
}

#[async_trait]
impl LanguageModel for SlowModel {
    async fn complete(&self, _request: &ModelRequest) -> Result<ModelTurn, EngineError> {
        tokio::time::sleep(self.delay).await;
        match &self.result {
            Ok(text) => Ok(ModelTurn::Text(text.clone())),
            Err(message) => Err(EngineError::model_error("slow", message.clone())),
        }
    }
}

/// Seed-state helper
pub fn seeded(entries: &[(&str, Value)]) -> StateMap {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Drain a stream into its events and terminal outcome
pub async fn collect(stream: EventStream) -> (Vec<Event>, InvocationOutcome) {
    stream.drain().await
}

/// Sequence numbers must be gapless and strictly increasing
pub fn assert_gapless(events: &[Event]) {
    let Some(first) = events.first() else { return };
    for (offset, event) in events.iter().enumerate() {
        assert_eq!(
            event.sequence_number,
            first.sequence_number + offset as u64,
            "sequence gap at position {}",
            offset
        );
    }
}

/// Text-output events authored by the given agent
pub fn text_events<'a>(events: &'a [Event], author: &str) -> Vec<&'a Event> {
    events
        .iter()
        .filter(|e| e.author == author && matches!(e.kind, EventKind::TextOutput { .. }))
        .collect()
}
