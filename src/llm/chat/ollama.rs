use async_trait::async_trait;
use log::debug;
use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };

use super::{ http_stream_generate, ChatClient, FragmentStream, LineEvent };
use crate::llm::{ LlmConfig, LlmError, LlmType, SamplingParams };
use crate::models::chat::{ Message, Role };

pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug)]
pub struct OllamaClient {
    http: HttpClient,
    base_url: String,
}

#[derive(Serialize, Debug, PartialEq)]
struct OllamaMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Deserialize)]
struct StreamResponse {
    message: Option<StreamMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct StreamMessage {
    #[serde(default)]
    content: String,
}

impl OllamaClient {
    pub fn new(base_url: Option<String>) -> Self {
        let url = base_url.unwrap_or_else(|| OLLAMA_BASE_URL.into());

        Self {
            http: HttpClient::new(),
            base_url: url,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        if config.llm_type != LlmType::Ollama {
            return Err(LlmError::InvalidConfig("Invalid config type for OllamaClient".into()));
        }

        Ok(Self::new(config.base_url.clone()))
    }
}

/// Ollama wants raw base64 payloads, not data URIs.
fn strip_data_uri(url: &str) -> String {
    match url.split_once(";base64,") {
        Some((_, payload)) if url.starts_with("data:") => payload.to_string(),
        _ => url.to_string(),
    }
}

fn to_ollama_message(message: &Message) -> OllamaMessage {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    OllamaMessage {
        role,
        content: message.content.text(),
        images: message.content.image_urls().into_iter().map(strip_data_uri).collect(),
    }
}

pub(crate) fn parse_ndjson_line(line: &str) -> LineEvent {
    if line.trim().is_empty() {
        return LineEvent::Skip;
    }
    match serde_json::from_str::<StreamResponse>(line) {
        Ok(resp) => {
            let text = resp.message.map(|m| m.content).unwrap_or_default();
            if !text.is_empty() {
                LineEvent::Fragment(text)
            } else if resp.done {
                LineEvent::Done
            } else {
                LineEvent::Skip
            }
        }
        Err(e) => {
            debug!("JSON parse error: {} for line: {}", e, line);
            LineEvent::Skip
        }
    }
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn stream_chat(
        &self,
        messages: &[Message],
        model: &str,
        params: SamplingParams
    ) -> Result<FragmentStream, LlmError> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let req = ChatRequest {
            model: model.to_string(),
            messages: messages.iter().map(to_ollama_message).collect(),
            stream: true,
            options: OllamaOptions {
                temperature: params.temperature,
                num_predict: params.max_tokens,
            },
        };

        http_stream_generate(self.http.clone(), url, req, parse_ndjson_line, None).await
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
