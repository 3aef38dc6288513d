use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Server Args ---
    /// Host address and port for the relay to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:3000")]
    pub server_addr: String,

    /// Hard ceiling, in seconds, on how long a single response stream stays open.
    #[arg(long, env = "MAX_DURATION_SECS", default_value = "30")]
    pub max_duration_secs: u64,

    /// Largest accepted `/api/chat` body in bytes. Images travel inline as data URIs.
    #[arg(long, env = "MAX_BODY_BYTES", default_value = "33554432")]
    pub max_body_bytes: usize,

    // --- Chat LLM Provider Args ---
    /// Type of LLM provider for chat completion (openai, groq, xai, ollama, scripted)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "openai")]
    pub chat_llm_type: String,

    /// Base URL for the Chat LLM provider API (e.g., http://localhost:11434 for Ollama)
    #[arg(long, env = "CHAT_BASE_URL")] // No default, let adapters handle defaults if None
    pub chat_base_url: Option<String>,

    /// API Key for the Chat LLM provider
    #[arg(long, env = "CHAT_API_KEY", default_value = "")]
    pub chat_api_key: String,

    /// Model used when a request does not name one (e.g., gpt-4o, llama3)
    #[arg(long, env = "CHAT_MODEL", default_value = "gpt-4o")]
    pub chat_model: String,

    /// Sampling temperature forwarded with every request.
    #[arg(long, env = "CHAT_TEMPERATURE", default_value = "0.7")]
    pub chat_temperature: f32,

    /// Response-length ceiling forwarded with every request.
    #[arg(long, env = "CHAT_MAX_TOKENS", default_value = "4000")]
    pub chat_max_tokens: u32,

    // --- General App Args ---
    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    /// Optional path to the TLS certificate file (PEM format) for serving HTTPS. Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format) for serving HTTPS. Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

/// Arguments of the terminal chat client.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Terminal client for the chat relay", long_about = None)]
pub struct ClientArgs {
    /// Base URL of a running relay.
    #[arg(long, env = "RELAY_URL", default_value = "http://127.0.0.1:3000")]
    pub relay_url: String,

    /// Model to request (falls back to gpt-4o when not in the catalog)
    #[arg(long, env = "CHAT_MODEL", default_value = "gpt-4o")]
    pub model: String,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}
