use async_trait::async_trait;
use log::debug;
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };

use super::{ http_stream_generate, ChatClient, FragmentStream, LineEvent };
use crate::llm::{ LlmConfig, LlmError, LlmType, SamplingParams };
use crate::models::chat::{ ContentPart, Message, MessageContent, Role };

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const XAI_BASE_URL: &str = "https://api.x.ai/v1";

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAIChatClient {
    http: HttpClient,
    base_url: String,
    name: String,
}

#[derive(Serialize, Debug, PartialEq)]
struct OpenAIMessage {
    role: &'static str,
    content: OpenAIContent,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(untagged)]
enum OpenAIContent {
    Text(String),
    Parts(Vec<OpenAIPart>),
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAIPart {
    Text {
        text: String,
    },
    ImageUrl {
        image_url: OpenAIImageUrl,
    },
}

#[derive(Serialize, Debug, PartialEq)]
struct OpenAIImageUrl {
    url: String,
}

#[derive(Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAIStreamResponse {
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIDelta,
    #[serde(rename = "finish_reason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
}

impl OpenAIChatClient {
    pub fn new(
        name: &str,
        api_key: String,
        base_url: Option<String>,
        default_base_url: &str
    ) -> Result<Self, LlmError> {
        let api_url = base_url.unwrap_or_else(|| default_base_url.to_string());
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e|
                LlmError::InvalidConfig(format!("Invalid API key format: {}", e))
            )?
        );

        let http = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| LlmError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            http,
            base_url: api_url,
            name: name.to_string(),
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let default_base_url = match config.llm_type {
            LlmType::OpenAI => OPENAI_BASE_URL,
            LlmType::Groq => GROQ_BASE_URL,
            LlmType::XAI => XAI_BASE_URL,
            other => {
                return Err(
                    LlmError::InvalidConfig(
                        format!("{} is not an OpenAI-compatible provider", other)
                    )
                );
            }
        };
        let api_key = config.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or(LlmError::MissingApiKey(config.llm_type))?;

        Self::new(
            &config.llm_type.to_string(),
            api_key,
            config.base_url.clone(),
            default_base_url
        )
    }

    fn completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{}/chat/completions", base)
        }
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn to_openai_message(message: &Message) -> OpenAIMessage {
    let content = match &message.content {
        MessageContent::Text(text) => OpenAIContent::Text(text.clone()),
        MessageContent::Parts(parts) =>
            OpenAIContent::Parts(
                parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => OpenAIPart::Text { text: text.clone() },
                        ContentPart::Image { url } =>
                            OpenAIPart::ImageUrl {
                                image_url: OpenAIImageUrl { url: url.clone() },
                            },
                    })
                    .collect()
            ),
    };
    OpenAIMessage {
        role: role_name(message.role),
        content,
    }
}

pub(crate) fn parse_sse_line(line: &str) -> LineEvent {
    let line = line.trim();
    if line.is_empty() {
        return LineEvent::Skip;
    }
    let Some(data) = line.strip_prefix("data:") else {
        return LineEvent::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return LineEvent::Done;
    }
    match serde_json::from_str::<OpenAIStreamResponse>(data) {
        Ok(stream_resp) => {
            let mut text = String::new();
            let mut finished = false;
            for choice in stream_resp.choices {
                if let Some(content) = choice.delta.content {
                    text.push_str(&content);
                }
                if choice.finish_reason.is_some() {
                    finished = true;
                }
            }
            if !text.is_empty() {
                LineEvent::Fragment(text)
            } else if finished {
                LineEvent::Done
            } else {
                LineEvent::Skip
            }
        }
        Err(e) => {
            debug!("JSON parse error: {} for data: {}", e, data);
            LineEvent::Skip
        }
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn stream_chat(
        &self,
        messages: &[Message],
        model: &str,
        params: SamplingParams
    ) -> Result<FragmentStream, LlmError> {
        let req = OpenAIChatRequest {
            model: model.to_string(),
            messages: messages.iter().map(to_openai_message).collect(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stream: true,
        };

        http_stream_generate(self.http.clone(), self.completions_url(), req, parse_sse_line, None).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
