use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use google_authz::TokenSource;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::PushSender;
use crate::model::{Message, IMAGE_SENTINEL};

pub const CHANNEL_ID: &str = "chat_notifications";
pub const CHANNEL_NAME: &str = "Chat Notifications";
pub const MESSAGE_TYPE_CHAT: &str = "chat";

const FCM_ENDPOINT: &str = "https://fcm.googleapis.com/v1/projects";
const TOKEN_PREFIX_LEN: usize = 20;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("push token is not registered or has expired")]
    TokenNotRegistered,
    #[error("push token is malformed")]
    InvalidToken,
    #[error("sender credentials do not match the token's project")]
    MismatchedCredential,
    #[error("push dispatch failed: {0}")]
    Other(String),
}

impl PushError {
    /// Classifies a provider error code. Accepts both the HTTP v1 `errorCode`
    /// values and the `messaging/*` codes used by the admin SDKs.
    ///
    /// FCM reports any malformed field as `INVALID_ARGUMENT`; only the ones
    /// whose message names the registration token count as a bad token.
    pub fn from_code(code: &str, detail: &str) -> Self {
        match code {
            "UNREGISTERED" | "messaging/registration-token-not-registered" => {
                PushError::TokenNotRegistered
            }
            "INVALID_ARGUMENT" if detail.contains("registration token") => PushError::InvalidToken,
            "messaging/invalid-registration-token" => PushError::InvalidToken,
            "SENDER_ID_MISMATCH" | "messaging/mismatched-credential" => {
                PushError::MismatchedCredential
            }
            _ => PushError::Other(format!("{}: {}", code, detail)),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PushData {
    pub chat_room_id: String,
    pub sender_uid: String,
    pub receiver_uid: String,
    pub message_type: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AndroidNotification {
    pub channel_id: String,
    pub notification_priority: String,
    pub default_sound: bool,
    pub default_vibrate_timings: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AndroidConfig {
    pub priority: String,
    pub notification: AndroidNotification,
}

/// One push notification addressed to a single device token.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub token: String,
    pub notification: Notification,
    pub data: PushData,
    pub android: AndroidConfig,
}

impl PushMessage {
    pub fn for_chat(token: &str, room_id: &str, message: &Message) -> Self {
        let title = sender_title(message);
        let body = if message.text == IMAGE_SENTINEL && message.has_image() {
            format!("{} sent an image.", title)
        } else {
            message.text.clone()
        };

        PushMessage {
            token: token.to_string(),
            notification: Notification { title, body },
            data: PushData {
                chat_room_id: room_id.to_string(),
                sender_uid: message.sender.clone(),
                receiver_uid: message.receiver.clone(),
                message_type: MESSAGE_TYPE_CHAT.to_string(),
            },
            android: AndroidConfig {
                priority: "HIGH".to_string(),
                notification: AndroidNotification {
                    channel_id: CHANNEL_ID.to_string(),
                    notification_priority: "PRIORITY_HIGH".to_string(),
                    default_sound: true,
                    default_vibrate_timings: true,
                },
            },
        }
    }
}

fn sender_title(message: &Message) -> String {
    if message.sender_name.is_empty() {
        "Someone".to_string()
    } else {
        message.sender_name.clone()
    }
}

/// Shortened form of a push token that is safe to log.
pub fn redact_token(token: &str) -> String {
    let prefix: String = token.chars().take(TOKEN_PREFIX_LEN).collect();
    format!("{}...", prefix)
}

#[derive(Serialize)]
struct SendRequest<'a> {
    message: &'a PushMessage,
}

#[derive(Deserialize)]
struct SendResponse {
    name: String,
}

#[derive(Deserialize, Default)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorStatus,
}

#[derive(Deserialize, Default)]
struct ErrorStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
}

/// Maps an HTTP v1 error response body onto a [PushError].
pub fn classify_fcm_error(status: u16, body: &str) -> PushError {
    let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let error = envelope.error;

    // The bare status is too coarse to classify; only `errorCode` details are.
    match error.details.iter().find_map(|d| d.error_code.as_deref()) {
        Some(code) => PushError::from_code(code, &error.message),
        None if !error.status.is_empty() => {
            PushError::Other(format!("{}: {}", error.status, error.message))
        }
        None => PushError::Other(format!("HTTP {}: {}", status, body)),
    }
}

/// Sends notifications through the FCM HTTP v1 API.
pub struct FcmSender {
    client: reqwest::Client,
    token_source: Arc<TokenSource>,
    project_id: String,
}

impl FcmSender {
    pub fn new(token_source: TokenSource, project_id: &str) -> Self {
        FcmSender {
            client: reqwest::Client::new(),
            token_source: Arc::new(token_source),
            project_id: project_id.to_string(),
        }
    }
}

#[async_trait]
impl PushSender for FcmSender {
    async fn send(&self, message: &PushMessage) -> Result<String, PushError> {
        let token = self
            .token_source
            .token()
            .await
            .map_err(|e| PushError::Other(format!("could not obtain access token: {}", e)))?;

        let url = format!("{}/{}/messages:send", FCM_ENDPOINT, self.project_id);
        let response = self
            .client
            .post(&url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("{} {}", token.token_type, token.access_token),
            )
            .json(&SendRequest { message })
            .send()
            .await
            .map_err(|e| PushError::Other(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_fcm_error(status.as_u16(), &body));
        }

        let sent: SendResponse = response
            .json()
            .await
            .map_err(|e| PushError::Other(e.to_string()))?;

        Ok(sent.name)
    }
}

/// A notification to show on the device after a push arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNotification {
    pub title: String,
    pub body: String,
    pub channel_id: &'static str,
    pub channel_name: &'static str,
    pub high_priority: bool,

    /// Peer to open a chat with when the notification is tapped.
    pub open_chat_with: Option<String>,
}

impl LocalNotification {
    pub fn from_remote(
        title: Option<&str>,
        body: Option<&str>,
        data: &HashMap<String, String>,
    ) -> Self {
        let is_chat = data.get("messageType").map(String::as_str) == Some(MESSAGE_TYPE_CHAT);
        let open_chat_with = data
            .get("senderUid")
            .filter(|uid| is_chat && !uid.is_empty())
            .cloned();

        LocalNotification {
            title: title.unwrap_or("New Message").to_string(),
            body: body.unwrap_or("You have a new message").to_string(),
            channel_id: CHANNEL_ID,
            channel_name: CHANNEL_NAME,
            high_priority: true,
            open_chat_with,
        }
    }
}
