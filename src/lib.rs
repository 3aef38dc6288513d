pub mod cli;
pub mod client;
pub mod llm;
pub mod models;
pub mod protocol;
pub mod relay;
pub mod server;

use cli::Args;
use llm::chat::new_client;
use llm::{ LlmConfig, SamplingParams };
use log::info;
use relay::{ Relay, RelayConfig };
use server::Server;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

pub fn relay_from_args(args: &Args) -> Result<Relay, Box<dyn Error + Send + Sync>> {
    let llm_config = LlmConfig {
        llm_type: args.chat_llm_type
            .parse()
            .map_err(|e| format!("Invalid chat LLM type: {}", e))?,
        api_key: Some(args.chat_api_key.clone()).filter(|k| !k.is_empty()),
        base_url: args.chat_base_url.clone(),
    };
    let client = new_client(&llm_config)?;

    Ok(
        Relay::new(client, RelayConfig {
            default_model: args.chat_model.clone(),
            params: SamplingParams {
                temperature: args.chat_temperature,
                max_tokens: args.chat_max_tokens,
            },
            max_duration: Duration::from_secs(args.max_duration_secs),
            max_body_bytes: args.max_body_bytes,
        })
    )
}

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Chat LLM Type: {}", args.chat_llm_type);
    info!("Chat Base URL: {}", args.chat_base_url.as_deref().unwrap_or("(provider default)"));
    info!("Default Model: {}", args.chat_model);
    info!("Temperature: {}", args.chat_temperature);
    info!("Max Tokens: {}", args.chat_max_tokens);
    info!("Max Stream Duration: {}s", args.max_duration_secs);
    info!("Max Request Body: {} bytes", args.max_body_bytes);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let relay = Arc::new(relay_from_args(&args)?);
    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, relay, args.clone());
    server.run().await?;

    Ok(())
}
