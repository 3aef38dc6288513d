use chat_relay::cli::ClientArgs;
use chat_relay::client::attachment::Attachment;
use chat_relay::client::render::{ parse_segments, Segment };
use chat_relay::client::store::relative_age;
use chat_relay::client::{
    ChatSession,
    ChatTransport,
    ConversationStore,
    HttpTransport,
    SessionError,
    SessionEvent,
};
use chat_relay::models::chat::{ Message, Role };
use chat_relay::models::envelope::MODELS;
use chrono::Utc;
use clap::Parser;
use dotenv::dotenv;
use log::{ debug, info };
use std::error::Error;
use std::io::Write;
use tokio::io::{ AsyncBufReadExt, BufReader };

const HELP: &str = "\
Commands:
  /new              start a new conversation
  /list             list conversations
  /switch <n>       switch to conversation n (from /list)
  /delete <n>       delete conversation n
  /attach <path>    attach an image to the next message
  /detach <n>       remove attachment n
  /model <id>       choose the model
  /models           list available models
  /show             print the active conversation
  /help             show this help
  /quit             exit
Anything else is sent as a message.";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenv().ok();
    let args = ClientArgs::parse();
    let default_filter = if args.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let transport = HttpTransport::new(&args.relay_url);
    info!("Using relay at {}", transport.endpoint());

    let mut session = ChatSession::new(transport, ConversationStore::new());
    let model = session.select_model(&args.model).to_string();
    if model != args.model {
        println!("Unknown model '{}', using {}", args.model, model);
    }

    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Fragment { text, .. } => {
                    print!("{}", text);
                    let _ = std::io::stdout().flush();
                }
                SessionEvent::Finished { .. } => println!(),
                SessionEvent::TitleChanged { title, .. } => println!("[title: {}]", title),
                SessionEvent::StateChanged(state) => debug!("State: {:?}", state),
            }
        }
    });

    println!("Connected to {} (model: {}). Type /help for commands.", args.relay_url, session.model());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim_end();
        let (command, arg) = match line.split_once(' ') {
            Some((c, a)) => (c, a.trim()),
            None => (line, ""),
        };

        match command {
            "/quit" | "/exit" => {
                break;
            }
            "/help" => println!("{}", HELP),
            "/new" => {
                session.store_mut().create_conversation();
                println!("Started a new conversation");
            }
            "/list" => print_conversations(&session),
            "/switch" => {
                match conversation_id_at(&session, arg) {
                    Some(id) => {
                        session.store_mut().switch_to(&id);
                        print_messages(session.store().active_messages());
                    }
                    None => println!("No conversation '{}'", arg),
                }
            }
            "/delete" => {
                match conversation_id_at(&session, arg) {
                    Some(id) => {
                        session.store_mut().delete(&id);
                        println!("Deleted");
                    }
                    None => println!("No conversation '{}'", arg),
                }
            }
            "/attach" if !arg.is_empty() => {
                let attachment = Attachment::from_path(arg);
                println!("Attached {} ({})", attachment.name, attachment.mime_type());
                session.attach(attachment);
            }
            "/detach" => {
                let removed = arg
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| session.remove_attachment(i));
                match removed {
                    Some(attachment) => println!("Removed {}", attachment.name),
                    None => println!("No attachment '{}'", arg),
                }
            }
            "/model" if !arg.is_empty() => {
                println!("Model: {}", session.select_model(arg));
            }
            "/models" => {
                for model in MODELS {
                    let marker = if model.id == session.model() { "*" } else { " " };
                    println!("{} {:<14} {} - {}", marker, model.id, model.name, model.description);
                }
            }
            "/show" => print_messages(session.store().active_messages()),
            "" => {}
            _ => {
                session.set_input(line);
                if let Err(e) = session.submit().await {
                    println!("\nError: {}", e);
                    if let Some(dropped) = recover_from_failure(&mut session, &e) {
                        println!("Removed unreadable attachment {}", dropped.name);
                    }
                    for (i, attachment) in session.attachments().iter().enumerate() {
                        println!("Still attached: {}. {} (/detach {} to remove)", i + 1, attachment.name, i + 1);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Clears the failed text and leaves the error state. An attachment that
/// could not be read is removed so it does not fail every later send.
fn recover_from_failure<T: ChatTransport>(
    session: &mut ChatSession<T>,
    err: &SessionError
) -> Option<Attachment> {
    let failed_index = match err {
        SessionError::Attachment(failed) =>
            session
                .attachments()
                .iter()
                .position(|a| a.name == failed.name),
        SessionError::Transport(_) => None,
    };
    let dropped = failed_index.and_then(|i| session.remove_attachment(i));
    session.set_input("");
    session.dismiss_error();
    dropped
}

fn conversation_id_at<T: ChatTransport>(
    session: &ChatSession<T>,
    arg: &str
) -> Option<String> {
    let index = arg.parse::<usize>().ok()?.checked_sub(1)?;
    session.store().conversations().get(index).map(|c| c.id.clone())
}

fn print_conversations<T: ChatTransport>(session: &ChatSession<T>) {
    let now = Utc::now();
    for (i, conversation) in session.store().conversations().iter().enumerate() {
        let marker = if conversation.id == session.store().active_id() { "*" } else { " " };
        println!(
            "{} {}. {} ({} messages, {})",
            marker,
            i + 1,
            conversation.title,
            conversation.messages.len(),
            relative_age(conversation.created_at, now)
        );
    }
}

fn print_messages(messages: &[Message]) {
    if messages.is_empty() {
        println!("(no messages yet)");
    }
    for message in messages {
        let label = match message.role {
            Role::User => "you",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        println!("[{}]", label);
        for segment in parse_segments(&message.content.text()) {
            match segment {
                Segment::Text(text) => println!("{}", text.trim()),
                Segment::Code { language, code } => {
                    println!("--- {} ---", language);
                    print!("{}", code);
                    println!("---");
                }
            }
        }
        let images = message.content.image_urls().len();
        if images > 0 {
            println!("({} image{})", images, if images == 1 { "" } else { "s" });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_relay::client::{ LocalTransport, RequestState };
    use chat_relay::llm::chat::scripted::ScriptedChatClient;
    use chat_relay::relay::{ Relay, RelayConfig };
    use std::sync::Arc;

    fn session(client: &ScriptedChatClient) -> ChatSession<LocalTransport> {
        let relay = Relay::new(Arc::new(client.clone()), RelayConfig::default());
        ChatSession::new(LocalTransport::new(Arc::new(relay)), ConversationStore::new())
    }

    #[tokio::test]
    async fn unreadable_attachment_does_not_block_later_sends() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("ok.png");
        std::fs::write(&good, b"img").unwrap();

        let client = ScriptedChatClient::new(["fine"]);
        let mut session = session(&client);
        session.set_input("look");
        session.attach(Attachment::from_path(&good));
        session.attach(Attachment::from_path(dir.path().join("gone.png")));

        let err = session.submit().await.unwrap_err();
        let dropped = recover_from_failure(&mut session, &err);
        assert_eq!(dropped.map(|a| a.name), Some("gone.png".to_string()));
        assert_eq!(session.attachments().len(), 1);
        assert_eq!(session.input(), "");
        assert_eq!(session.state(), &RequestState::Composing);

        session.set_input("try again");
        session.submit().await.unwrap();
        assert_eq!(client.calls().len(), 1);
        assert_eq!(client.calls()[0].messages[0].content.image_urls().len(), 1);
    }

    #[tokio::test]
    async fn transport_failure_keeps_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("ok.png");
        std::fs::write(&good, b"img").unwrap();

        let client = ScriptedChatClient::new(["x"]).failing("down");
        let mut session = session(&client);
        session.set_input("hello");
        session.attach(Attachment::from_path(&good));

        let err = session.submit().await.unwrap_err();
        assert!(recover_from_failure(&mut session, &err).is_none());
        assert_eq!(session.attachments().len(), 1);
        assert_eq!(session.input(), "");
    }
}
