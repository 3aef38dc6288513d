use async_trait::async_trait;
use futures::{ Stream, StreamExt };
use log::{ debug, error };
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::models::envelope::{ ChatRequest, ErrorBody };
use crate::protocol::{ DataStreamDecoder, StreamPart };
use crate::relay::Relay;

pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("{error}: {details}")]
    Relay {
        status: u16,
        error: String,
        details: String,
    },
    #[error("Stream error: {0}")]
    Stream(String),
}

/// Delivers an envelope to the relay and yields the reply's text fragments.
/// The stream ends cleanly only when the relay signalled completion.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<ReplyStream, TransportError>;
}

/// Talks to a relay over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn send(&self, request: &ChatRequest) -> Result<ReplyStream, TransportError> {
        let resp = self.http
            .post(&self.endpoint)
            .json(request)
            .send().await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let body = serde_json::from_str::<ErrorBody>(&text).unwrap_or(ErrorBody {
                error: format!("HTTP {}", status),
                details: text,
            });
            error!("Relay rejected request: {} ({})", body.error, body.details);
            return Err(TransportError::Relay {
                status: status.as_u16(),
                error: body.error,
                details: body.details,
            });
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut bytes = resp.bytes_stream();
            let mut decoder = DataStreamDecoder::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(TransportError::Stream(e.to_string()))).await;
                        return;
                    }
                };
                for part in decoder.push(&chunk) {
                    if !forward_part(&tx, part).await {
                        return;
                    }
                }
            }
            if let Some(part) = decoder.finish() {
                if !forward_part(&tx, part).await {
                    return;
                }
            }
            let _ = tx.send(Err(TransportError::Stream("stream closed before completion".into()))).await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Sends one decoded part on; false once the stream is over.
async fn forward_part(
    tx: &mpsc::Sender<Result<String, TransportError>>,
    part: StreamPart
) -> bool {
    match part {
        StreamPart::Text(text) => tx.send(Ok(text)).await.is_ok(),
        StreamPart::Error(message) => {
            let _ = tx.send(Err(TransportError::Stream(message))).await;
            false
        }
        StreamPart::Finish(info) => {
            debug!("Reply finished: {}", info.finish_reason);
            false
        }
    }
}

/// Runs the relay in-process, skipping HTTP. Same wire format, same errors.
#[derive(Clone)]
pub struct LocalTransport {
    relay: Arc<Relay>,
}

impl LocalTransport {
    pub fn new(relay: Arc<Relay>) -> Self {
        Self { relay }
    }
}

#[async_trait]
impl ChatTransport for LocalTransport {
    async fn send(&self, request: &ChatRequest) -> Result<ReplyStream, TransportError> {
        let mut lines = self.relay.open(request.clone()).await.map_err(|e| TransportError::Relay {
            status: 500,
            error: "Internal Server Error".to_string(),
            details: e.to_string(),
        })?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut decoder = DataStreamDecoder::new();
            while let Some(line) = lines.next().await {
                for part in decoder.push(line.as_bytes()) {
                    if !forward_part(&tx, part).await {
                        return;
                    }
                }
            }
            let _ = tx.send(Err(TransportError::Stream("stream closed before completion".into()))).await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
