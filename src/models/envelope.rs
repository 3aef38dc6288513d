use serde::{ Deserialize, Serialize };

use super::chat::{ Message, MessageContent };

/// Body of `POST /api/chat`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<OverrideData>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OverrideData {
    pub content: MessageContent,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub details: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

pub const DEFAULT_MODEL: &str = "gpt-4o";

pub const MODELS: &[ModelInfo] = &[
    ModelInfo { id: "gpt-4o", name: "GPT-4o", description: "Most capable model" },
    ModelInfo { id: "gpt-4o-mini", name: "GPT-4o mini", description: "Faster and cheaper" },
    ModelInfo { id: "gpt-4-turbo", name: "GPT-4 Turbo", description: "Previous generation" },
    ModelInfo { id: "gpt-3.5-turbo", name: "GPT-3.5 Turbo", description: "Fast and efficient" },
];

pub fn find_model(id: &str) -> Option<&'static ModelInfo> {
    MODELS.iter().find(|m| m.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_fields_are_optional_except_messages() {
        let req: ChatRequest = serde_json::from_value(
            json!({ "messages": [{ "role": "user", "content": "hi" }] })
        ).unwrap();
        assert_eq!(req.messages.len(), 1);
        assert!(req.model.is_none());
        assert!(req.data.is_none());
    }

    #[test]
    fn request_serializes_without_absent_fields() {
        let req = ChatRequest {
            messages: Vec::new(),
            model: Some("gpt-4o".into()),
            data: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value, json!({ "messages": [], "model": "gpt-4o" }));
    }

    #[test]
    fn catalog_lookup() {
        assert_eq!(find_model("gpt-4o-mini").map(|m| m.name), Some("GPT-4o mini"));
        assert!(find_model("llama3").is_none());
        assert!(find_model(DEFAULT_MODEL).is_some());
    }
}
