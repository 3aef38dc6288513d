//! Client-side controller for the single outstanding completion request of
//! the active conversation.

use futures::StreamExt;
use log::{ info, warn };
use thiserror::Error;
use tokio::sync::mpsc;

use super::attachment::{ self, Attachment, AttachmentError };
use super::store::ConversationStore;
use super::transport::{ ChatTransport, TransportError };
use crate::models::chat::{ ContentPart, Message, MessageContent };
use crate::models::envelope::{ find_model, ChatRequest, OverrideData, DEFAULT_MODEL };

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Composing,
    Sending,
    Streaming,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(RequestState),
    Fragment {
        conversation_id: String,
        text: String,
    },
    TitleChanged {
        conversation_id: String,
        title: String,
    },
    Finished {
        conversation_id: String,
        message_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Nothing to send, or a request is already in flight.
    Ignored,
    Completed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub struct ChatSession<T: ChatTransport> {
    transport: T,
    store: ConversationStore,
    input: String,
    attachments: Vec<Attachment>,
    model: String,
    state: RequestState,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl<T: ChatTransport> ChatSession<T> {
    pub fn new(transport: T, store: ConversationStore) -> Self {
        Self {
            transport,
            store,
            input: String::new(),
            attachments: Vec::new(),
            model: DEFAULT_MODEL.to_string(),
            state: RequestState::Idle,
            events: None,
        }
    }

    /// Events emitted from now on. A later call replaces the earlier receiver.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ConversationStore {
        &mut self.store
    }

    pub fn state(&self) -> &RequestState {
        &self.state
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.state, RequestState::Sending | RequestState::Streaming)
    }

    /// Picks the model for later requests; ids outside the catalog fall back
    /// to the default.
    pub fn select_model(&mut self, id: &str) -> &str {
        self.model = find_model(id)
            .map(|m| m.id)
            .unwrap_or(DEFAULT_MODEL)
            .to_string();
        &self.model
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
        self.refresh_composing();
    }

    pub fn append_input(&mut self, text: &str) {
        self.input.push_str(text);
        self.refresh_composing();
    }

    pub fn attach(&mut self, attachment: Attachment) {
        self.attachments.push(attachment);
        self.refresh_composing();
    }

    pub fn remove_attachment(&mut self, index: usize) -> Option<Attachment> {
        if index >= self.attachments.len() {
            return None;
        }
        let removed = self.attachments.remove(index);
        self.refresh_composing();
        Some(removed)
    }

    pub fn dismiss_error(&mut self) {
        if let RequestState::Error(_) = self.state {
            let next = if self.has_pending() { RequestState::Composing } else { RequestState::Idle };
            self.set_state(next);
        }
    }

    pub async fn submit(&mut self) -> Result<SubmitOutcome, SessionError> {
        if self.is_busy() || !self.has_pending() {
            return Ok(SubmitOutcome::Ignored);
        }

        let text = self.input.clone();
        let attachments = self.attachments.clone();

        let image_urls = match attachment::read_all(&attachments).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!("Aborting send: {}", e);
                self.set_state(RequestState::Error(e.to_string()));
                return Err(e.into());
            }
        };
        self.set_state(RequestState::Sending);

        let content = build_user_content(&text, &image_urls);
        let override_content = if image_urls.is_empty() { None } else { Some(content.clone()) };

        let conversation_id = self.store.active_id().to_string();
        let snapshot = self.store.active_messages().to_vec();
        self.store.push_message(Message::user(content));
        self.input.clear();
        self.attachments.clear();

        let request = ChatRequest {
            messages: self.store.active_messages().to_vec(),
            model: Some(self.model.clone()),
            data: override_content.map(|content| OverrideData { content }),
        };
        info!(
            "Sending {} messages in conversation {} ({} attachments)",
            request.messages.len(),
            conversation_id,
            image_urls.len()
        );

        match self.stream_reply(&request, &conversation_id).await {
            Ok(message_id) => {
                if let Some(title) = self.store.finalize_title(&conversation_id) {
                    self.emit(SessionEvent::TitleChanged {
                        conversation_id: conversation_id.clone(),
                        title,
                    });
                }
                self.emit(SessionEvent::Finished { conversation_id, message_id });
                self.set_state(RequestState::Idle);
                Ok(SubmitOutcome::Completed)
            }
            Err(e) => {
                warn!("Send failed, restoring conversation {}: {}", conversation_id, e);
                self.store.sync_active(snapshot);
                self.input = text;
                self.attachments = attachments;
                self.set_state(RequestState::Error(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Streams the reply into a fresh assistant message and returns its id.
    async fn stream_reply(
        &mut self,
        request: &ChatRequest,
        conversation_id: &str
    ) -> Result<String, TransportError> {
        let mut stream = self.transport.send(request).await?;

        let reply = Message::assistant(String::new());
        let message_id = reply.id.clone();
        self.store.push_message(reply);
        self.set_state(RequestState::Streaming);

        while let Some(item) = stream.next().await {
            let fragment = item?;
            self.store.extend_last(&fragment);
            self.emit(SessionEvent::Fragment {
                conversation_id: conversation_id.to_string(),
                text: fragment,
            });
        }

        Ok(message_id)
    }

    fn has_pending(&self) -> bool {
        !self.input.trim().is_empty() || !self.attachments.is_empty()
    }

    fn refresh_composing(&mut self) {
        match self.state {
            RequestState::Idle | RequestState::Composing | RequestState::Error(_) => {
                let next = if self.has_pending() { RequestState::Composing } else { RequestState::Idle };
                self.set_state(next);
            }
            RequestState::Sending | RequestState::Streaming => {}
        }
    }

    fn set_state(&mut self, state: RequestState) {
        if self.state != state {
            self.state = state.clone();
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Plain text when there are no images; otherwise the text part (if any)
/// followed by one image part per attachment, in selection order.
pub fn build_user_content(text: &str, image_urls: &[String]) -> MessageContent {
    if image_urls.is_empty() {
        return MessageContent::Text(text.to_string());
    }
    let mut parts = Vec::with_capacity(image_urls.len() + 1);
    if !text.is_empty() {
        parts.push(ContentPart::text(text));
    }
    parts.extend(image_urls.iter().map(ContentPart::image));
    MessageContent::Parts(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{ Arc, Mutex };
    use crate::client::transport::ReplyStream;

    /// Replays fixed replies and records what was sent.
    #[derive(Clone, Default)]
    struct FakeTransport {
        fragments: Vec<&'static str>,
        fail_after: Option<usize>,
        sent: Arc<Mutex<Vec<ChatRequest>>>,
    }

    #[async_trait]
    impl ChatTransport for FakeTransport {
        async fn send(&self, request: &ChatRequest) -> Result<ReplyStream, TransportError> {
            self.sent.lock().unwrap().push(request.clone());
            let mut items: Vec<Result<String, TransportError>> = self.fragments
                .iter()
                .map(|f| Ok(f.to_string()))
                .collect();
            if let Some(n) = self.fail_after {
                items.truncate(n);
                items.push(Err(TransportError::Stream("reset".into())));
            }
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    fn session(fragments: Vec<&'static str>) -> (ChatSession<FakeTransport>, Arc<Mutex<Vec<ChatRequest>>>) {
        let transport = FakeTransport { fragments, ..FakeTransport::default() };
        let sent = transport.sent.clone();
        (ChatSession::new(transport, ConversationStore::new()), sent)
    }

    #[test]
    fn builds_text_then_images() {
        let urls = vec!["data:a".to_string(), "data:b".to_string()];
        assert_eq!(
            build_user_content("look", &urls),
            MessageContent::Parts(
                vec![ContentPart::text("look"), ContentPart::image("data:a"), ContentPart::image("data:b")]
            )
        );
        assert_eq!(
            build_user_content("", &urls),
            MessageContent::Parts(vec![ContentPart::image("data:a"), ContentPart::image("data:b")])
        );
        assert_eq!(build_user_content("plain", &[]), MessageContent::Text("plain".into()));
    }

    #[tokio::test]
    async fn whitespace_submit_is_ignored() {
        let (mut session, sent) = session(vec!["x"]);
        session.set_input("   \n");
        assert_eq!(session.submit().await.unwrap(), SubmitOutcome::Ignored);
        assert!(sent.lock().unwrap().is_empty());
        assert!(session.store().active_messages().is_empty());
        assert_eq!(session.state(), &RequestState::Idle);
    }

    #[tokio::test]
    async fn completes_and_titles_conversation() {
        let (mut session, sent) = session(vec!["Recursion ", "is ", "self-reference."]);
        let mut events = session.subscribe();
        session.set_input("Explain recursion");
        assert_eq!(session.state(), &RequestState::Composing);

        assert_eq!(session.submit().await.unwrap(), SubmitOutcome::Completed);
        assert_eq!(session.state(), &RequestState::Idle);
        assert_eq!(session.input(), "");

        let messages = session.store().active_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, MessageContent::Text("Explain recursion".into()));
        assert_eq!(messages[1].content.text(), "Recursion is self-reference.");
        assert_eq!(session.store().active().unwrap().title, "Explain recursion");

        let request = &sent.lock().unwrap()[0];
        assert_eq!(request.model.as_deref(), Some(DEFAULT_MODEL));
        assert!(request.data.is_none());

        let mut states = Vec::new();
        let mut fragments = String::new();
        while let Ok(event) = events.try_recv() {
            match event {
                SessionEvent::StateChanged(state) => states.push(state),
                SessionEvent::Fragment { text, .. } => fragments.push_str(&text),
                _ => {}
            }
        }
        assert_eq!(
            states,
            vec![
                RequestState::Composing,
                RequestState::Sending,
                RequestState::Streaming,
                RequestState::Idle
            ]
        );
        assert_eq!(fragments, "Recursion is self-reference.");
    }

    #[tokio::test]
    async fn later_replies_keep_the_first_title() {
        let (mut session, _) = session(vec!["ok"]);
        session.set_input("First question");
        session.submit().await.unwrap();
        session.set_input("A completely different second question");
        session.submit().await.unwrap();
        assert_eq!(session.store().active().unwrap().title, "First question");
        assert_eq!(session.store().active_messages().len(), 4);
    }

    #[tokio::test]
    async fn stream_failure_rolls_back_and_restores_input() {
        let transport = FakeTransport {
            fragments: vec!["par", "tial"],
            fail_after: Some(1),
            ..FakeTransport::default()
        };
        let mut session = ChatSession::new(transport, ConversationStore::new());
        session.set_input("hello");

        let err = session.submit().await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::Stream(_))));
        assert!(matches!(session.state(), RequestState::Error(_)));
        assert!(session.store().active_messages().is_empty());
        assert!(session.store().active().unwrap().messages.is_empty());
        assert_eq!(session.input(), "hello");
        assert!(!session.store().active().unwrap().title_finalized);

        session.dismiss_error();
        assert_eq!(session.state(), &RequestState::Composing);
    }

    #[tokio::test]
    async fn unreadable_attachment_aborts_without_sending() {
        let (mut session, sent) = session(vec!["x"]);
        session.set_input("What is this?");
        session.attach(Attachment::from_path("/definitely/not/here.png"));

        let err = session.submit().await.unwrap_err();
        assert!(matches!(err, SessionError::Attachment(_)));
        assert!(sent.lock().unwrap().is_empty());
        assert!(session.store().active_messages().is_empty());
        assert_eq!(session.attachments().len(), 1);
        assert!(matches!(session.state(), RequestState::Error(_)));
    }

    #[test]
    fn attachments_are_removed_by_index() {
        let (mut session, _) = session(vec![]);
        session.attach(Attachment::from_path("a.png"));
        session.attach(Attachment::from_path("b.png"));
        assert_eq!(session.remove_attachment(5), None);
        assert_eq!(session.remove_attachment(0).map(|a| a.name), Some("a.png".to_string()));
        assert_eq!(session.attachments()[0].name, "b.png");
        session.remove_attachment(0);
        assert_eq!(session.state(), &RequestState::Idle);
    }

    #[test]
    fn unknown_model_falls_back_to_default() {
        let (mut session, _) = session(vec![]);
        assert_eq!(session.select_model("gpt-4o-mini"), "gpt-4o-mini");
        assert_eq!(session.select_model("made-up"), DEFAULT_MODEL);
    }
}
