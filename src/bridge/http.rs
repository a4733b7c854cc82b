//! HTTP front door.
//!
//! Serves the welcome page, the operational health probe, and the push
//! delivery endpoint. The webhook route authenticates by a path-embedded
//! secret token matched against the bot credential and acknowledges
//! immediately; event processing happens asynchronously behind the
//! dispatch channel.

use super::UpdateInjector;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use teloxide::types::Update;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

const WELCOME_PAGE: &str = r"<!DOCTYPE html>
<html>
<head><title>tg-courier</title></head>
<body style='font-family: sans-serif; text-align: center; margin-top: 4em;'>
  <h1>tg-courier</h1>
  <p>The bot is running. Talk to it on Telegram.</p>
</body>
</html>";

/// Shared state of the HTTP front door.
pub struct WebhookState {
    pub injector: UpdateInjector,
    pub bot_token: String,
}

/// Builds the router: `GET /`, `GET /health`, `POST /webhook/{token}`.
pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/health", get(health))
        .route("/webhook/{token}", post(receive_update))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn welcome() -> Html<&'static str> {
    Html(WELCOME_PAGE)
}

async fn health(State(state): State<Arc<WebhookState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "handler_registered": state.injector.is_registered(),
    }))
}

async fn receive_update(
    State(state): State<Arc<WebhookState>>,
    Path(token): Path<String>,
    body: String,
) -> (StatusCode, Json<Value>) {
    if token != state.bot_token {
        warn!("webhook request with invalid token rejected");
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"ok": false, "description": "invalid token"})),
        );
    }

    let update: Update = match serde_json::from_str(&body) {
        Ok(update) => update,
        Err(e) => {
            // One malformed event must never halt subsequent processing;
            // acknowledge so the platform does not redeliver it forever.
            warn!(error = %e, "discarding malformed pushed update");
            return (
                StatusCode::OK,
                Json(json!({"ok": false, "description": format!("malformed update: {e}")})),
            );
        }
    };

    debug!(update_id = update.id.0, "received pushed update");
    match state.injector.dispatch(update) {
        Ok(()) => (StatusCode::OK, Json(json!({"ok": true}))),
        Err(e) => {
            warn!(error = %e, "pushed update acknowledged but not processed");
            (
                StatusCode::OK,
                Json(json!({"ok": false, "description": e.to_string()})),
            )
        }
    }
}
