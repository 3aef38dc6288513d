use crate::cli::Args;
use crate::models::envelope::{ ChatRequest, ErrorBody };
use crate::protocol::{ DATA_STREAM_HEADER, DATA_STREAM_VERSION };
use crate::relay::{ Relay, RelayError };
use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::{
    body::Body,
    routing::{ get, post },
    Router,
    extract::{ rejection::JsonRejection, DefaultBodyLimit, State },
    response::{ IntoResponse, Response },
    http::{ header, StatusCode },
    Json,
};
use futures::StreamExt;
use serde_json::json;
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, error };

#[derive(Clone)]
struct AppState {
    relay: Arc<Relay>,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                error: "Internal Server Error".to_string(),
                details: self.to_string(),
            }),
        ).into_response()
    }
}

pub fn router(relay: Arc<Relay>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let body_limit = DefaultBodyLimit::max(relay.config().max_body_bytes);

    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/health", get(health_handler))
        .layer(body_limit)
        .layer(cors)
        .with_state(AppState { relay })
}

pub async fn start_http_server(
    addr: SocketAddr,
    relay: Arc<Relay>,
    args: &Args
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let app = router(relay);

    if args.enable_tls {
        let (cert_path, key_path) = match (&args.tls_cert_path, &args.tls_key_path) {
            (Some(cert), Some(key)) => (cert, key),
            _ => {
                error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
                return Err("TLS enabled without cert/key".into());
            }
        };
        info!("TLS enabled. Loading certificate from '{}' and key from '{}'", cert_path, key_path);
        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
            cert_path,
            key_path
        ).await?;

        info!("Relay listening on https://{}", addr);
        axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await?;
    } else {
        let listener = tokio::net::TcpListener
            ::bind(addr).await
            .map_err(|e| format!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e))?;

        info!("Relay listening on http://{}", addr);
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Received shutdown signal");
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

async fn chat_handler(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            error!("Rejected chat request: {}", rejection.body_text());
            return RelayError::Validation(rejection.body_text()).into_response();
        }
    };

    match state.relay.open(request).await {
        Ok(stream) => {
            let body = Body::from_stream(stream.map(Ok::<_, Infallible>));
            (
                [
                    (header::CONTENT_TYPE.as_str(), "text/plain; charset=utf-8"),
                    (header::CACHE_CONTROL.as_str(), "no-cache"),
                    (DATA_STREAM_HEADER, DATA_STREAM_VERSION),
                ],
                body,
            ).into_response()
        }
        Err(e) => {
            error!("Error in chat API: {}", e);
            e.into_response()
        }
    }
}
