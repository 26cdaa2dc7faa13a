use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use basic_chat::memory::MemoryBackend;
use basic_chat::relay::NotificationRelay;
use basic_chat::server::app;
use basic_chat::session::{register_push_token, sign_up, Session};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn backend_with_users() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    sign_up(&*backend, "u1", "ann@example.com", "Ann").await.unwrap();
    sign_up(&*backend, "u2", "bob@example.com", "Bob").await.unwrap();
    register_push_token(&*backend, &Session::new("u2", None), "token-u2")
        .await
        .unwrap();
    backend
}

fn relay(backend: &Arc<MemoryBackend>) -> Arc<NotificationRelay> {
    Arc::new(NotificationRelay::new(backend.clone(), backend.clone()))
}

fn created(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/events/message-created")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json(response: axum::http::Response<axum::body::BoxBody>) -> Value {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn status_route_answers_ok() {
    let backend = backend_with_users().await;
    let response = app(relay(&backend))
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn created_message_is_pushed_to_receiver() {
    let backend = backend_with_users().await;
    let event = json!({
        "chatRoomId": "u1_u2",
        "messageId": "m1",
        "message": {
            "text": "hi",
            "sender": "u1",
            "receiver": "u2",
            "senderName": "Ann",
            "timestamp": 100
        }
    });

    let response = app(relay(&backend)).oneshot(created(&event)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["outcome"], "sent");

    let pushes = backend.sent_pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].token, "token-u2");
    assert_eq!(pushes[0].data.receiver_uid, "u2");
}

#[tokio::test]
async fn receiver_without_token_is_skipped() {
    let backend = backend_with_users().await;
    let event = json!({
        "chatRoomId": "u1_u2",
        "messageId": "m2",
        "message": { "text": "hey", "sender": "u2", "receiver": "u1", "timestamp": 200 }
    });

    let response = app(relay(&backend)).oneshot(created(&event)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["outcome"], "skipped");
    assert_eq!(body["detail"], "receiver has no push token");
    assert_eq!(backend.user_lookups(), 1);
    assert!(backend.sent_pushes().is_empty());
}

#[tokio::test]
async fn malformed_event_is_rejected() {
    let backend = backend_with_users().await;
    let response = app(relay(&backend))
        .oneshot(created(&json!({ "chatRoomId": "u1_u2" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(backend.user_lookups(), 0);
}
