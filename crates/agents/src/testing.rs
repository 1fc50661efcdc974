use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use sop_llm::{GeneratedText, GenerationError, GenerationRequest, TextGenerator};

enum Exhausted {
    Panic,
    Repeat(String),
    Stall,
}

/// Replays canned replies and records every request it receives.
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<String, GenerationError>>>,
    exhausted: Exhausted,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<Result<String, GenerationError>>) -> Arc<Self> {
        Self::build(replies, Exhausted::Panic)
    }

    pub fn repeating(text: &str) -> Arc<Self> {
        Self::build(Vec::new(), Exhausted::Repeat(text.to_string()))
    }

    pub fn stalled() -> Arc<Self> {
        Self::build(Vec::new(), Exhausted::Stall)
    }

    fn build(replies: Vec<Result<String, GenerationError>>, exhausted: Exhausted) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            exhausted,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedText, GenerationError> {
        self.requests.lock().push(request.clone());
        let next = self.replies.lock().pop_front();

        let reply = match (next, &self.exhausted) {
            (Some(reply), _) => reply,
            (None, Exhausted::Repeat(text)) => Ok(text.clone()),
            (None, Exhausted::Stall) => std::future::pending().await,
            (None, Exhausted::Panic) => panic!("scripted generator ran out of replies"),
        };
        reply.map(|text| GeneratedText { text })
    }
}
