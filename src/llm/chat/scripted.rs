use async_trait::async_trait;
use std::sync::{ Arc, Mutex };
use std::time::Duration;

use super::{ create_streaming_response, ChatClient, FragmentStream };
use crate::llm::{ LlmError, SamplingParams };
use crate::models::chat::{ Message, Role };

/// What a [`ScriptedChatClient`] was asked to complete.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub model: String,
    pub params: SamplingParams,
}

#[derive(Debug, Clone)]
enum Script {
    Fragments(Vec<String>),
    Echo,
}

/// Provider that replays fixed fragments. Used by tests and by
/// `CHAT_LLM_TYPE=scripted` for running the relay without a provider.
#[derive(Debug, Clone)]
pub struct ScriptedChatClient {
    script: Script,
    delay: Option<Duration>,
    fail_on_call: Option<String>,
    fail_after: Option<(usize, String)>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl ScriptedChatClient {
    pub fn new<I, S>(fragments: I) -> Self where I: IntoIterator<Item = S>, S: Into<String> {
        Self::with_script(Script::Fragments(fragments.into_iter().map(Into::into).collect()))
    }

    /// Streams the last user message back word by word.
    pub fn echo() -> Self {
        Self::with_script(Script::Echo)
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            delay: None,
            fail_on_call: None,
            fail_after: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Pause before every fragment.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Reject the call before any fragment is produced.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_on_call = Some(message.into());
        self
    }

    /// Emit `count` fragments, then a stream error.
    pub fn failing_after(mut self, count: usize, message: impl Into<String>) -> Self {
        self.fail_after = Some((count, message.into()));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn fragments_for(&self, messages: &[Message]) -> Vec<String> {
        match &self.script {
            Script::Fragments(fragments) => fragments.clone(),
            Script::Echo => {
                let text = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.text())
                    .unwrap_or_default();
                let mut words: Vec<String> = text
                    .split_inclusive(' ')
                    .map(str::to_string)
                    .collect();
                if words.is_empty() {
                    words.push("(empty message)".to_string());
                }
                words
            }
        }
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    async fn stream_chat(
        &self,
        messages: &[Message],
        model: &str,
        params: SamplingParams
    ) -> Result<FragmentStream, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                messages: messages.to_vec(),
                model: model.to_string(),
                params,
            });
        }

        if let Some(message) = &self.fail_on_call {
            return Err(LlmError::Api { status: 400, body: message.clone() });
        }

        let fragments = self.fragments_for(messages);
        let delay = self.delay;
        let fail_after = self.fail_after.clone();

        Ok(
            create_streaming_response(move |tx| async move {
                for (i, fragment) in fragments.into_iter().enumerate() {
                    if let Some((count, message)) = &fail_after {
                        if i == *count {
                            let _ = tx.send(Err(LlmError::Stream(message.clone()))).await;
                            return;
                        }
                    }
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    if tx.send(Ok(fragment)).await.is_err() {
                        return;
                    }
                }
                if let Some((_, message)) = fail_after {
                    let _ = tx.send(Err(LlmError::Stream(message))).await;
                }
            })
        )
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
