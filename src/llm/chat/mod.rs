pub mod ollama;
pub mod openai;
pub mod scripted;

use async_trait::async_trait;
use futures::{ Future, Stream, StreamExt };
use log::{ debug, warn };
use reqwest::StatusCode;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use self::ollama::OllamaClient;
use self::openai::OpenAIChatClient;
use self::scripted::ScriptedChatClient;
use super::{ LlmConfig, LlmError, LlmType, SamplingParams };
use crate::models::chat::Message;
use crate::protocol::LineBuffer;

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// A streaming text-completion provider.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Starts a completion over `messages` and yields text fragments as the
    /// provider produces them.
    async fn stream_chat(
        &self,
        messages: &[Message],
        model: &str,
        params: SamplingParams
    ) -> Result<FragmentStream, LlmError>;

    fn name(&self) -> &str;
}

/// Outcome of parsing one line of a provider's streaming body.
#[derive(Debug, PartialEq, Eq)]
pub enum LineEvent {
    Fragment(String),
    Done,
    Skip,
}

pub fn create_streaming_response<F, Fut>(response_fn: F) -> FragmentStream
    where
        F: FnOnce(mpsc::Sender<Result<String, LlmError>>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static
{
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        response_fn(tx).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, LlmError> {
    let client: Arc<dyn ChatClient> = match config.llm_type {
        LlmType::OpenAI | LlmType::Groq | LlmType::XAI => {
            Arc::new(OpenAIChatClient::from_config(config)?)
        }
        LlmType::Ollama => Arc::new(OllamaClient::from_config(config)?),
        LlmType::Scripted => Arc::new(ScriptedChatClient::echo()),
    };
    Ok(client)
}

/// POSTs `payload` and turns the response body into a fragment stream, one
/// `line_parser` call per complete line.
pub async fn http_stream_generate(
    http: reqwest::Client,
    url: String,
    payload: impl serde::Serialize + Send + 'static,
    line_parser: fn(&str) -> LineEvent,
    headers: Option<Vec<(String, String)>>
) -> Result<FragmentStream, LlmError> {
    let mut req = http.post(&url).json(&payload);

    if let Some(header_list) = headers {
        for (name, value) in header_list {
            req = req.header(name, value);
        }
    }

    let resp = req.send().await?;
    let status = resp.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(LlmError::RateLimited);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        warn!("Provider at {} answered {}: {}", url, status, body);
        return Err(LlmError::Api { status: status.as_u16(), body });
    }

    Ok(
        create_streaming_response(move |tx| async move {
            let mut bytes = resp.bytes_stream();
            let mut lines = LineBuffer::new();

            while let Some(chunk) = bytes.next().await {
                let buf = match chunk {
                    Ok(buf) => buf,
                    Err(e) => {
                        let _ = tx.send(Err(LlmError::Stream(e.to_string()))).await;
                        return;
                    }
                };
                for line in lines.push(&buf) {
                    match line_parser(&line) {
                        LineEvent::Fragment(tok) => {
                            if tx.send(Ok(tok)).await.is_err() {
                                return;
                            }
                        }
                        LineEvent::Done => {
                            return;
                        }
                        LineEvent::Skip => {}
                    }
                }
            }

            if let Some(line) = lines.finish() {
                if let LineEvent::Fragment(tok) = line_parser(&line) {
                    let _ = tx.send(Ok(tok)).await;
                }
            }
            debug!("Provider stream from {} ended", url);
        })
    )
}
