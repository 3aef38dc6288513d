pub mod chat;
pub mod envelope;
