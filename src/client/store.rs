use chrono::{ DateTime, Utc };
use log::debug;

use crate::models::chat::{ Conversation, Message, Role, DEFAULT_TITLE };

pub const TITLE_MAX_CHARS: usize = 50;

/// In-memory conversation threads plus the message buffer of the active one.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    active_id: String,
    buffer: Vec<Message>,
}

impl ConversationStore {
    pub fn new() -> Self {
        let first = Conversation::new();
        let active_id = first.id.clone();
        Self {
            conversations: vec![first],
            active_id,
            buffer: Vec::new(),
        }
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn active_id(&self) -> &str {
        &self.active_id
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.get(&self.active_id)
    }

    pub fn active_messages(&self) -> &[Message] {
        &self.buffer
    }

    /// New conversation at the head of the list, made active.
    pub fn create_conversation(&mut self) -> String {
        let conversation = Conversation::new();
        let id = conversation.id.clone();
        self.conversations.insert(0, conversation);
        self.active_id = id.clone();
        self.buffer.clear();
        debug!("Created conversation {}", id);
        id
    }

    pub fn switch_to(&mut self, id: &str) -> bool {
        let Some(messages) = self.get(id).map(|c| c.messages.clone()) else {
            return false;
        };
        self.buffer = messages;
        self.active_id = id.to_string();
        true
    }

    pub fn delete(&mut self, id: &str) -> bool {
        let before = self.conversations.len();
        self.conversations.retain(|c| c.id != id);
        if self.conversations.len() == before {
            return false;
        }
        debug!("Deleted conversation {}", id);

        if self.active_id == id {
            match self.conversations.first().map(|c| c.id.clone()) {
                Some(next) => {
                    self.switch_to(&next);
                }
                None => {
                    self.create_conversation();
                }
            }
        }
        true
    }

    /// Replaces the active buffer and writes it through to the active
    /// conversation.
    pub fn sync_active(&mut self, messages: Vec<Message>) {
        self.buffer = messages;
        self.persist_active();
    }

    pub fn push_message(&mut self, message: Message) {
        self.buffer.push(message);
        self.persist_active();
    }

    /// Extends the trailing assistant message. Returns false when the buffer
    /// does not end with one.
    ///
    /// Only the last stored message is touched, so streaming cost does not
    /// grow with the images held earlier in the thread.
    pub fn extend_last(&mut self, fragment: &str) -> bool {
        match self.buffer.last_mut() {
            Some(last) if last.role == Role::Assistant => {
                last.content.push_str(fragment);
            }
            _ => {
                return false;
            }
        }
        let active_id = &self.active_id;
        let stored = self.conversations
            .iter_mut()
            .find(|c| &c.id == active_id)
            .and_then(|c| c.messages.last_mut());
        if let Some(stored) = stored {
            stored.content.push_str(fragment);
        }
        true
    }

    /// Derives the title from the first user message, once per conversation.
    /// Returns the title only when it was set by this call.
    pub fn finalize_title(&mut self, id: &str) -> Option<String> {
        let conversation = self.conversations.iter_mut().find(|c| c.id == id)?;
        if conversation.title_finalized {
            return None;
        }
        let text = conversation
            .first_user_message()
            .map(|m| m.content.text())
            .unwrap_or_default();
        conversation.title_finalized = true;
        if text.trim().is_empty() {
            return None;
        }
        conversation.title = derive_title(&text);
        Some(conversation.title.clone())
    }

    fn persist_active(&mut self) {
        if let Some(conversation) = self.conversations.iter_mut().find(|c| c.id == self.active_id) {
            conversation.messages = self.buffer.clone();
        }
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

pub fn derive_title(text: &str) -> String {
    let mut title: String = text.chars().take(TITLE_MAX_CHARS).collect();
    if text.chars().count() > TITLE_MAX_CHARS {
        title.push_str("...");
    }
    if title.is_empty() {
        title.push_str(DEFAULT_TITLE);
    }
    title
}

pub fn relative_age(created: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(created);
    let minutes = elapsed.num_minutes();
    let hours = elapsed.num_hours();
    let days = elapsed.num_days();

    if minutes < 1 {
        "Just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if hours < 24 {
        format!("{}h ago", hours)
    } else {
        format!("{}d ago", days)
    }
}
