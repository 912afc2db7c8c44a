use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use kb_core::{respond, EmbeddingProvider, InboundMessage, OutboundMessage, Resolver};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

pub type SharedResolver = Arc<Resolver<Box<dyn EmbeddingProvider>>>;

/// Payload the dialogue engine posts for every user turn.
#[derive(Debug, Deserialize)]
struct WebhookRequest {
    sender: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Clone)]
struct AppState {
    resolver: SharedResolver,
    // Bounds how many turns run model inference at once.
    inference_permits: Arc<Semaphore>,
}

pub fn router(resolver: SharedResolver) -> Router {
    let permits = resolver.config().max_concurrent_requests;
    let state = AppState {
        resolver,
        inference_permits: Arc::new(Semaphore::new(permits)),
    };

    Router::new()
        .route("/webhooks/rest/webhook", post(handle_webhook))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

async fn handle_webhook(
    State(state): State<AppState>,
    Json(request): Json<WebhookRequest>,
) -> Json<Vec<OutboundMessage>> {
    let inbound = InboundMessage {
        sender_id: request.sender,
        utterance: request.message,
    };
    Json(reply(&state, inbound).await)
}

async fn reply(state: &AppState, inbound: InboundMessage) -> Vec<OutboundMessage> {
    let blank = inbound
        .utterance
        .as_deref()
        .map_or(true, |u| u.trim().is_empty());
    if blank {
        return Vec::new();
    }

    let fallback = vec![OutboundMessage {
        recipient_id: inbound.sender_id.clone(),
        text: state.resolver.config().fallback_message.clone(),
    }];

    let Ok(permit) = state.inference_permits.clone().acquire_owned().await else {
        warn!("Inference queue closed, replying with fallback");
        return fallback;
    };

    let resolver = Arc::clone(&state.resolver);
    // The permit travels with the blocking job: it must outlive a dropped handler.
    let job = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        respond(&resolver, &inbound)
    });
    match job.await {
        Ok(replies) => replies,
        Err(err) => {
            warn!(error = %err, "Resolver task failed, replying with fallback");
            fallback
        }
    }
}

pub async fn serve(resolver: SharedResolver, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(resolver);
    info!("Starting webhook receiver on {addr}");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
