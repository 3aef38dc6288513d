//! Forwards a chat envelope to the completion provider and re-encodes the
//! provider's fragments into the data-stream format.

use futures::{ Stream, StreamExt };
use log::{ debug, error, info, warn };
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{ timeout_at, Instant };
use tokio_stream::wrappers::ReceiverStream;

use crate::llm::chat::ChatClient;
use crate::llm::{ LlmError, SamplingParams };
use crate::models::chat::{ Message, MessageContent };
use crate::models::envelope::{ ChatRequest, DEFAULT_MODEL };
use crate::protocol::{ encode_finish, encode_fragment };

pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(30);
/// Envelopes carry every image of the conversation as a data URI.
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Encoded data-stream lines, ready to be written to the response body.
pub type RelayStream = Pin<Box<dyn Stream<Item = String> + Send>>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Provider(#[from] LlmError),
    #[error("Provider did not respond within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub default_model: String,
    pub params: SamplingParams,
    pub max_duration: Duration,
    pub max_body_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            params: SamplingParams::default(),
            max_duration: DEFAULT_MAX_DURATION,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

pub fn validate(request: &ChatRequest) -> Result<(), RelayError> {
    if request.messages.is_empty() {
        return Err(RelayError::Validation("messages must be a non-empty array".to_string()));
    }
    Ok(())
}

pub fn resolve_model(requested: Option<&str>, default: &str) -> String {
    requested
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Replaces the content of the last message only.
pub fn merge_override(
    mut messages: Vec<Message>,
    override_content: Option<MessageContent>
) -> Vec<Message> {
    if let Some(content) = override_content {
        if let Some(last) = messages.last_mut() {
            last.content = content;
        }
    }
    messages
}

pub struct Relay {
    client: Arc<dyn ChatClient>,
    config: RelayConfig,
}

enum Ending {
    Finished(usize),
    ProviderFailed(LlmError),
    ClientGone,
}

impl Relay {
    pub fn new(client: Arc<dyn ChatClient>, config: RelayConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Starts the provider call and waits for its first item, so failures at
    /// call time surface as errors instead of an empty stream.
    pub async fn open(&self, request: ChatRequest) -> Result<RelayStream, RelayError> {
        validate(&request)?;

        let model = resolve_model(request.model.as_deref(), &self.config.default_model);
        let has_override = request.data.is_some();
        let messages = merge_override(
            request.messages,
            request.data.map(|d| d.content)
        );
        info!(
            "Relaying {} messages to {} (model: {}, override: {})",
            messages.len(),
            self.client.name(),
            model,
            has_override
        );

        let max_duration = self.config.max_duration;
        let deadline = Instant::now() + max_duration;

        let mut upstream = timeout_at(
            deadline,
            self.client.stream_chat(&messages, &model, self.config.params)
        ).await
            .map_err(|_| RelayError::Timeout(max_duration))??;

        let first = match timeout_at(deadline, upstream.next()).await {
            Err(_) => {
                return Err(RelayError::Timeout(max_duration));
            }
            Ok(Some(Err(e))) => {
                return Err(e.into());
            }
            Ok(Some(Ok(fragment))) => Some(fragment),
            Ok(None) => None,
        };

        let (tx, rx) = mpsc::channel::<String>(32);

        tokio::spawn(async move {
            let pump = async {
                let mut count = 0;
                let mut pending = first;
                loop {
                    let item = match pending.take() {
                        Some(fragment) => Some(Ok(fragment)),
                        None => upstream.next().await,
                    };
                    match item {
                        Some(Ok(fragment)) => {
                            if fragment.is_empty() {
                                continue;
                            }
                            count += 1;
                            if tx.send(encode_fragment(&fragment)).await.is_err() {
                                return Ending::ClientGone;
                            }
                        }
                        Some(Err(e)) => {
                            return Ending::ProviderFailed(e);
                        }
                        None => {
                            if tx.send(encode_finish("stop")).await.is_err() {
                                return Ending::ClientGone;
                            }
                            return Ending::Finished(count);
                        }
                    }
                }
            };

            match timeout_at(deadline, pump).await {
                Ok(Ending::Finished(count)) => {
                    info!("Stream completed with {} fragments", count);
                }
                Ok(Ending::ProviderFailed(e)) => {
                    error!("Provider failed mid-stream, closing response: {}", e);
                }
                Ok(Ending::ClientGone) => {
                    debug!("Client disconnected before the stream finished");
                }
                Err(_) => {
                    warn!("Stream exceeded {:?}, terminating", max_duration);
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::chat::scripted::ScriptedChatClient;
    use crate::models::chat::ContentPart;
    use crate::models::envelope::OverrideData;
    use crate::protocol::{ decode_line, StreamPart };

    fn relay_with(client: ScriptedChatClient, max_duration: Duration) -> Relay {
        Relay::new(Arc::new(client), RelayConfig {
            max_duration,
            ..RelayConfig::default()
        })
    }

    async fn collect(stream: RelayStream) -> Vec<StreamPart> {
        stream
            .collect::<Vec<_>>().await
            .iter()
            .filter_map(|line| decode_line(line.trim_end()))
            .collect()
    }

    #[test]
    fn rejects_empty_messages() {
        let err = validate(&ChatRequest::default()).unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn model_defaults_when_absent_or_blank() {
        assert_eq!(resolve_model(None, "gpt-4o"), "gpt-4o");
        assert_eq!(resolve_model(Some("  "), "gpt-4o"), "gpt-4o");
        assert_eq!(resolve_model(Some("gpt-4o-mini"), "gpt-4o"), "gpt-4o-mini");
    }

    #[test]
    fn override_replaces_only_last_content() {
        let history = vec![Message::user("first"), Message::assistant("reply"), Message::user("What is this?")];
        let parts = MessageContent::Parts(
            vec![ContentPart::text("What is this?"), ContentPart::image("data:image/png;base64,AA")]
        );
        let merged = merge_override(history.clone(), Some(parts.clone()));
        assert_eq!(merged[0], history[0]);
        assert_eq!(merged[1], history[1]);
        assert_eq!(merged[2].id, history[2].id);
        assert_eq!(merged[2].content, parts);

        assert_eq!(merge_override(history.clone(), None), history);
    }

    #[tokio::test]
    async fn streams_fragments_then_finish() {
        let client = ScriptedChatClient::new(["Re", "cur", "sion"]);
        let relay = relay_with(client.clone(), DEFAULT_MAX_DURATION);
        let stream = relay
            .open(ChatRequest {
                messages: vec![Message::user("Explain recursion")],
                model: None,
                data: None,
            }).await
            .unwrap();

        let parts = collect(stream).await;
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], StreamPart::Text("Re".into()));
        assert!(matches!(parts[3], StreamPart::Finish(_)));
        assert_eq!(client.calls()[0].model, "gpt-4o");
    }

    #[tokio::test]
    async fn forwards_merged_messages() {
        let client = ScriptedChatClient::new(["ok"]);
        let relay = relay_with(client.clone(), DEFAULT_MAX_DURATION);
        let parts = MessageContent::Parts(
            vec![ContentPart::text("What is this?"), ContentPart::image("data:image/png;base64,AA")]
        );
        let stream = relay
            .open(ChatRequest {
                messages: vec![Message::user("What is this?")],
                model: Some("gpt-4o-mini".into()),
                data: Some(OverrideData { content: parts.clone() }),
            }).await
            .unwrap();
        collect(stream).await;

        let call = &client.calls()[0];
        assert_eq!(call.model, "gpt-4o-mini");
        assert_eq!(call.messages[0].content, parts);
    }

    #[tokio::test]
    async fn provider_failure_at_call_time_is_an_error() {
        let relay = relay_with(ScriptedChatClient::new(["x"]).failing("invalid model"), DEFAULT_MAX_DURATION);
        let result = relay.open(ChatRequest {
            messages: vec![Message::user("hi")],
            ..ChatRequest::default()
        }).await;
        assert!(matches!(result, Err(RelayError::Provider(_))));
    }

    #[tokio::test]
    async fn mid_stream_failure_closes_without_finish() {
        let relay = relay_with(
            ScriptedChatClient::new(["a", "b", "c"]).failing_after(2, "reset"),
            DEFAULT_MAX_DURATION
        );
        let stream = relay
            .open(ChatRequest {
                messages: vec![Message::user("hi")],
                ..ChatRequest::default()
            }).await
            .unwrap();
        let parts = collect(stream).await;
        assert_eq!(parts, vec![StreamPart::Text("a".into()), StreamPart::Text("b".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn duration_ceiling_terminates_stream() {
        let relay = relay_with(
            ScriptedChatClient::new(["a", "b", "c", "d"]).with_delay(Duration::from_secs(4)),
            Duration::from_secs(10)
        );
        let stream = relay
            .open(ChatRequest {
                messages: vec![Message::user("hi")],
                ..ChatRequest::default()
            }).await
            .unwrap();
        let parts = collect(stream).await;
        assert_eq!(parts, vec![StreamPart::Text("a".into()), StreamPart::Text("b".into())]);
    }
}
