use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, Extension},
    handler::{get, post},
    routing::BoxRoute,
    AddExtensionLayer, Json, Router,
};
use google_authz::Credentials;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::database::FirestoreStore;
use crate::logging::{LogError, WebResult};
use crate::model::Message;
use crate::push::FcmSender;
use crate::relay::NotificationRelay;

async fn status() -> &'static str {
    "ok"
}

/// A "document created" trigger for `chats/{chatRoomId}/messages/{messageId}`.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MessageCreated {
    pub chat_room_id: String,
    pub message_id: String,
    pub message: Message,
}

#[derive(Serialize, Debug)]
pub struct RelayResponse {
    outcome: &'static str,
    detail: String,
}

async fn message_created(
    Extension(relay): Extension<Arc<NotificationRelay>>,
    event: Result<Json<MessageCreated>, JsonRejection>,
) -> WebResult<Json<RelayResponse>> {
    let Json(event) = event.log_error_bad_request()?;

    let outcome = relay
        .on_message_created(&event.chat_room_id, &event.message_id, &event.message)
        .await;

    Ok(Json(RelayResponse {
        outcome: outcome.kind(),
        detail: outcome.detail(),
    }))
}

pub fn app(relay: Arc<NotificationRelay>) -> Router<BoxRoute> {
    Router::new()
        .route("/", get(status))
        .route("/events/message-created", post(message_created))
        .layer(AddExtensionLayer::new(relay))
        .boxed()
}

pub async fn serve(config: &Config, port: Option<u16>) -> Result<()> {
    let project_id = config.project_id()?;
    let store = FirestoreStore::new(project_id, config.poll_interval)?;
    let sender = FcmSender::new(Credentials::default().await.into(), project_id);
    let relay = Arc::new(NotificationRelay::new(Arc::new(store), Arc::new(sender)));

    let port = port.unwrap_or(config.port);
    let app = app(relay).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
