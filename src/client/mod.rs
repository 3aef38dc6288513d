//! Client side: conversation state, the send/stream state machine and the
//! transports that reach a relay.

pub mod attachment;
pub mod render;
pub mod session;
pub mod store;
pub mod transport;

pub use session::{ ChatSession, RequestState, SessionError, SessionEvent, SubmitOutcome };
pub use store::ConversationStore;
pub use transport::{ ChatTransport, HttpTransport, LocalTransport };
