//! Forwards newly created messages to the receiver's device.
//!
//! Runs once per created message document. Nothing here is retried, and a
//! redelivered trigger dispatches a second notification.

use std::fmt;
use std::sync::Arc;

use tracing::Instrument;

use crate::backend::{ChatStore, PushSender};
use crate::model::Message;
use crate::push::{redact_token, PushError, PushMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingReceiver,
    SelfMessage,
    UnknownReceiver,
    NoToken,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::MissingReceiver => "message has no receiver",
            SkipReason::SelfMessage => "sender and receiver are the same",
            SkipReason::UnknownReceiver => "receiver has no user document",
            SkipReason::NoToken => "receiver has no push token",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Sent(String),
    Skipped(SkipReason),
    LookupFailed(String),
    PushFailed(PushError),
}

impl RelayOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            RelayOutcome::Sent(_) => "sent",
            RelayOutcome::Skipped(_) => "skipped",
            RelayOutcome::LookupFailed(_) | RelayOutcome::PushFailed(_) => "failed",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            RelayOutcome::Sent(id) => id.clone(),
            RelayOutcome::Skipped(reason) => reason.to_string(),
            RelayOutcome::LookupFailed(error) => error.clone(),
            RelayOutcome::PushFailed(error) => error.to_string(),
        }
    }
}

pub struct NotificationRelay {
    store: Arc<dyn ChatStore>,
    sender: Arc<dyn PushSender>,
}

impl NotificationRelay {
    pub fn new(store: Arc<dyn ChatStore>, sender: Arc<dyn PushSender>) -> Self {
        NotificationRelay { store, sender }
    }

    pub async fn on_message_created(
        &self,
        room_id: &str,
        message_id: &str,
        message: &Message,
    ) -> RelayOutcome {
        let span = tracing::info_span!("relay", %room_id, %message_id);
        self.relay(room_id, message).instrument(span).await
    }

    async fn relay(&self, room_id: &str, message: &Message) -> RelayOutcome {
        let receiver = message.receiver.as_str();
        tracing::info!(sender = %message.sender, %receiver, "New message.");

        if receiver.is_empty() {
            tracing::info!("Message is missing a receiver.");
            return RelayOutcome::Skipped(SkipReason::MissingReceiver);
        }

        if message.sender == receiver {
            tracing::info!("Sender and receiver are the same, skipping.");
            return RelayOutcome::Skipped(SkipReason::SelfMessage);
        }

        if !message.belongs_to(room_id) {
            tracing::warn!(%room_id, "Message participants do not match the room.");
        }

        let user = match self.store.get_user(receiver).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                tracing::info!(%receiver, "No user document for receiver.");
                return RelayOutcome::Skipped(SkipReason::UnknownReceiver);
            }
            Err(error) => {
                tracing::error!(?error, "Receiver lookup failed.");
                return RelayOutcome::LookupFailed(error.to_string());
            }
        };

        let token = match user.push_token() {
            Some(token) => token,
            None => {
                tracing::info!(%receiver, "No push token registered.");
                return RelayOutcome::Skipped(SkipReason::NoToken);
            }
        };

        tracing::info!(token = %redact_token(token), "Dispatching notification.");
        let push = PushMessage::for_chat(token, room_id, message);

        match self.sender.send(&push).await {
            Ok(id) => {
                tracing::info!(%id, "Notification sent.");
                RelayOutcome::Sent(id)
            }
            Err(error) => {
                match &error {
                    PushError::TokenNotRegistered => {
                        tracing::error!(?error, "Push token is invalid or expired.")
                    }
                    PushError::InvalidToken => {
                        tracing::error!(?error, "Push token format is invalid.")
                    }
                    PushError::MismatchedCredential => {
                        tracing::error!(?error, "Project credentials mismatch.")
                    }
                    PushError::Other(_) => tracing::error!(?error, "Error sending notification."),
                }
                RelayOutcome::PushFailed(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::model::User;

    fn message(sender: &str, receiver: &str) -> Message {
        Message {
            text: "hi".to_string(),
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            sender_name: "Ann".to_string(),
            image_url: None,
            timestamp: 100,
        }
    }

    fn relay(backend: &Arc<MemoryBackend>) -> NotificationRelay {
        NotificationRelay::new(backend.clone(), backend.clone())
    }

    async fn add_user(backend: &MemoryBackend, uid: &str, token: Option<&str>) {
        backend
            .put_user(&User {
                uid: uid.to_string(),
                first: uid.to_string(),
                email: format!("{}@example.com", uid),
                fcm_token: token.map(str::to_string),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sends_to_registered_receiver() {
        let backend = Arc::new(MemoryBackend::new());
        add_user(&backend, "u2", Some("token-u2")).await;

        let outcome = relay(&backend)
            .on_message_created("u1_u2", "m1", &message("u1", "u2"))
            .await;

        assert_eq!(outcome.kind(), "sent");
        let pushes = backend.sent_pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].token, "token-u2");
        assert_eq!(pushes[0].data.chat_room_id, "u1_u2");
    }

    #[tokio::test]
    async fn self_message_skips_lookup() {
        let backend = Arc::new(MemoryBackend::new());
        add_user(&backend, "u1", Some("token-u1")).await;

        let outcome = relay(&backend)
            .on_message_created("u1_u1", "m1", &message("u1", "u1"))
            .await;

        assert_eq!(outcome, RelayOutcome::Skipped(SkipReason::SelfMessage));
        assert_eq!(backend.user_lookups(), 0);
        assert!(backend.sent_pushes().is_empty());
    }

    #[tokio::test]
    async fn missing_token_sends_nothing() {
        let backend = Arc::new(MemoryBackend::new());
        add_user(&backend, "u2", None).await;

        let outcome = relay(&backend)
            .on_message_created("u1_u2", "m1", &message("u1", "u2"))
            .await;

        assert_eq!(outcome, RelayOutcome::Skipped(SkipReason::NoToken));
        assert_eq!(backend.user_lookups(), 1);
        assert!(backend.sent_pushes().is_empty());
    }

    #[tokio::test]
    async fn unknown_receiver_and_missing_receiver_are_skipped() {
        let backend = Arc::new(MemoryBackend::new());
        let relay = relay(&backend);

        let outcome = relay
            .on_message_created("u1_u9", "m1", &message("u1", "u9"))
            .await;
        assert_eq!(outcome, RelayOutcome::Skipped(SkipReason::UnknownReceiver));

        let outcome = relay.on_message_created("u1_", "m2", &message("u1", "")).await;
        assert_eq!(outcome, RelayOutcome::Skipped(SkipReason::MissingReceiver));
        assert_eq!(backend.user_lookups(), 1);
    }

    #[tokio::test]
    async fn push_failures_are_reported_not_retried() {
        let backend = Arc::new(MemoryBackend::new());
        add_user(&backend, "u2", Some("stale")).await;
        backend.fail_pushes_with(PushError::TokenNotRegistered);

        let outcome = relay(&backend)
            .on_message_created("u1_u2", "m1", &message("u1", "u2"))
            .await;

        assert_eq!(outcome, RelayOutcome::PushFailed(PushError::TokenNotRegistered));
        assert_eq!(outcome.kind(), "failed");
        assert!(backend.sent_pushes().is_empty());
        assert_eq!(backend.user_lookups(), 1);
    }
}
