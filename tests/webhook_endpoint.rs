//! Push endpoint behavior: token authentication, malformed-event
//! isolation, and health reporting.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use std::sync::Arc;
use tg_courier::bridge::http::{router, WebhookState};
use tg_courier::bridge::UpdateInjector;
use tower::ServiceExt;

const TOKEN: &str = "12345:testtoken";

fn valid_update(id: u32) -> String {
    serde_json::json!({
        "update_id": id,
        "message": {
            "message_id": id,
            "date": 1,
            "chat": {"id": 7, "type": "private"},
            "from": {"id": 7, "is_bot": false, "first_name": "T"},
            "text": "/save https://t.me/somechannel/10"
        }
    })
    .to_string()
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

#[tokio::test]
async fn wrong_token_is_rejected_and_not_dispatched() {
    let injector = UpdateInjector::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    injector.register(tx);
    let app = router(Arc::new(WebhookState {
        injector,
        bot_token: TOKEN.to_string(),
    }));

    let response = app
        .oneshot(post("/webhook/wrong-token", &valid_update(1)))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(rx.try_recv().is_err(), "rejected event must not dispatch");
}

#[tokio::test]
async fn malformed_event_does_not_halt_subsequent_events() {
    let injector = UpdateInjector::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    injector.register(tx);
    let app = router(Arc::new(WebhookState {
        injector,
        bot_token: TOKEN.to_string(),
    }));
    let uri = format!("/webhook/{TOKEN}");

    // Malformed body: acknowledged, logged, not dispatched.
    let response = app
        .clone()
        .oneshot(post(&uri, r#"{"bogus": "#))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(rx.try_recv().is_err());

    // A well-formed event right after is processed normally.
    let response = app
        .clone()
        .oneshot(post(&uri, &valid_update(7)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let update = rx.try_recv().expect("dispatched update");
    assert_eq!(update.id.0, 7);
}

#[tokio::test]
async fn acknowledges_even_without_registered_handler() {
    let app = router(Arc::new(WebhookState {
        injector: UpdateInjector::new(),
        bot_token: TOKEN.to_string(),
    }));

    let response = app
        .oneshot(post(&format!("/webhook/{TOKEN}"), &valid_update(1)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_reports_handler_registration() {
    let injector = UpdateInjector::new();
    let app = router(Arc::new(WebhookState {
        injector: injector.clone(),
        bot_token: TOKEN.to_string(),
    }));

    let get_health = || {
        Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .expect("request")
    };

    let response = app.clone().oneshot(get_health()).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.expect("body").to_bytes();
    let parsed: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(parsed["status"], "ok");
    assert_eq!(parsed["handler_registered"], false);

    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    injector.register(tx);

    let response = app.clone().oneshot(get_health()).await.expect("response");
    let body = response.into_body().collect().await.expect("body").to_bytes();
    let parsed: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(parsed["handler_registered"], true);
}

#[tokio::test]
async fn welcome_page_is_served() {
    let app = router(Arc::new(WebhookState {
        injector: UpdateInjector::new(),
        bot_token: TOKEN.to_string(),
    }));

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}
