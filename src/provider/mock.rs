use super::{ImageProvider, Outcome};
use crate::models::Payload;
use crate::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Scripted provider for dispatcher tests: queued outcomes are served in
/// order (cycling), and every invocation is recorded for assertions.
#[derive(Clone)]
pub struct MockImageProvider {
    outcomes: Arc<Mutex<Vec<Outcome>>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockImageProvider {
    pub fn new() -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_outcome(self, outcome: Outcome) -> Self {
        self.outcomes.lock().unwrap().push(outcome);
        self
    }

    pub fn get_call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// `(model, prompt)` pairs in invocation order.
    pub fn get_calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.calls.lock().unwrap().last().map(|(_, p)| p.clone())
    }

    fn default_outcome() -> Outcome {
        // Tiny valid PNG header, enough for callers that only size-check.
        Outcome::Success(Payload::Bytes(vec![
            0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48,
            0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x02, 0x00, 0x00,
            0x00, 0x90, 0x77, 0x53, 0xDE, 0x00, 0x00, 0x00, 0x0C, 0x49, 0x44, 0x41, 0x54, 0x08,
            0x99, 0x63, 0xF8, 0xCF, 0xC0, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0xE2, 0x25, 0x00,
            0xBC, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
        ]))
    }
}

impl Default for MockImageProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageProvider for MockImageProvider {
    async fn invoke(&self, model: &str, prompt: &str) -> Result<Outcome> {
        let mut calls = self.calls.lock().unwrap();
        calls.push((model.to_string(), prompt.to_string()));
        let count = calls.len();
        drop(calls);

        let outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            Ok(Self::default_outcome())
        } else {
            Ok(outcomes[(count - 1) % outcomes.len()].clone())
        }
    }
}
