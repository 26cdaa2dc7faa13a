//! Controller for a single 1:1 conversation screen.
//!
//! The screen owns its live subscription as a stream. Dropping the screen
//! drops the stream, which ends the subscription, and any upload future
//! still being awaited by the screen is dropped with it.

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use thiserror::Error;

use crate::backend::{BlobStore, ChangeKind, ChatStore, MessageFeed};
use crate::message_list::{ListChange, MessageListAdapter};
use crate::model::{image_blob_path, room_id_for, truncate_with, Message, IMAGE_SENTINEL};
use crate::session::Session;

pub const TITLE_LIMIT: usize = 15;
const UNKNOWN_TITLE: &str = "Unknown";
const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("missing sender or receiver identifier")]
    MissingIdentifiers,
    #[error("chat screen is not subscribed")]
    NotSubscribed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatState {
    Uninitialized,
    Subscribed { room_id: String },
    MissingIdentifiers,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenEvent {
    /// Rows appended by one change batch, and where the view should scroll.
    Appended {
        positions: Vec<usize>,
        scroll_to: Option<usize>,
    },
    ListenFailed(String),
}

type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

struct Participants<'a> {
    session: &'a Session,
    peer_uid: &'a str,
    room_id: &'a str,
}

pub struct ChatScreen {
    store: Arc<dyn ChatStore>,
    blobs: Arc<dyn BlobStore>,
    session: Option<Session>,
    peer_uid: Option<String>,
    room_id: Option<String>,
    state: ChatState,
    adapter: MessageListAdapter,
    feed: Option<MessageFeed>,
    title: String,
    clock: Clock,
}

impl ChatScreen {
    pub fn new(
        store: Arc<dyn ChatStore>,
        blobs: Arc<dyn BlobStore>,
        session: Option<Session>,
        peer_uid: Option<String>,
    ) -> Self {
        let local_uid = session.as_ref().map(|s| s.uid.clone()).unwrap_or_default();
        let room_id = match (&session, &peer_uid) {
            (Some(session), Some(peer)) => Some(room_id_for(&session.uid, peer)),
            _ => None,
        };

        ChatScreen {
            store,
            blobs,
            session,
            peer_uid,
            room_id,
            state: ChatState::Uninitialized,
            adapter: MessageListAdapter::new(&local_uid),
            feed: None,
            title: UNKNOWN_TITLE.to_string(),
            clock: Box::new(|| chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Replaces the time source used for message timestamps and blob names.
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_adapter(mut self, adapter: MessageListAdapter) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn adapter(&self) -> &MessageListAdapter {
        &self.adapter
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Position to keep in view, e.g. after the keyboard opens.
    pub fn scroll_target(&self) -> Option<usize> {
        self.adapter.last_position()
    }

    fn participants(&self) -> Option<Participants<'_>> {
        Some(Participants {
            session: self.session.as_ref()?,
            peer_uid: self.peer_uid.as_deref()?,
            room_id: self.room_id.as_deref()?,
        })
    }

    /// Subscribes to the room's messages ordered by timestamp. Opening an
    /// already subscribed screen keeps the existing subscription.
    pub async fn open(&mut self) -> Result<()> {
        if let ChatState::Subscribed { room_id } = &self.state {
            tracing::debug!(%room_id, "Already listening for messages.");
            return Ok(());
        }

        let room_id = match &self.room_id {
            Some(room_id) => room_id.clone(),
            None => {
                tracing::error!("Missing sender or receiver UID.");
                self.state = ChatState::MissingIdentifiers;
                return Err(ChatError::MissingIdentifiers.into());
            }
        };

        let feed = self.store.watch_messages(&room_id).await?;
        self.feed = Some(feed);
        tracing::info!(%room_id, "Listening for messages.");
        self.state = ChatState::Subscribed { room_id };
        Ok(())
    }

    /// Loads the peer's name for the title bar and as a fallback sender name.
    pub async fn load_title(&mut self) -> &str {
        let peer_uid = match &self.peer_uid {
            Some(peer_uid) => peer_uid.clone(),
            None => return &self.title,
        };

        match self.store.get_user(&peer_uid).await {
            Ok(user) => {
                let name = user
                    .map(|user| user.first)
                    .filter(|first| !first.is_empty());
                if let Some(name) = &name {
                    self.adapter.remember_sender_name(&peer_uid, name);
                }
                let name = name.unwrap_or_else(|| UNKNOWN_TITLE.to_string());
                self.title = truncate_with(&name, TITLE_LIMIT, "…");
            }
            Err(error) => {
                tracing::warn!(?error, "Could not load receiver name.");
            }
        }

        &self.title
    }

    /// Waits for the next change batch and appends its "added" records.
    ///
    /// Returns `None` once the subscription has ended or was never opened.
    pub async fn next_event(&mut self) -> Option<ScreenEvent> {
        let batch = self.feed.as_mut()?.next().await?;

        let changes = match batch {
            Ok(changes) => changes,
            Err(error) => {
                tracing::warn!(?error, "Listen failed.");
                return Some(ScreenEvent::ListenFailed(error.to_string()));
            }
        };

        let mut positions = Vec::new();
        for change in changes {
            if change.kind != ChangeKind::Added {
                continue;
            }
            if let ListChange::Inserted(position) = self.adapter.add_message(change.value) {
                positions.push(position);
            }
        }

        Some(ScreenEvent::Appended {
            positions,
            scroll_to: self.scroll_target(),
        })
    }

    /// Sends `text` after trimming. Blank input writes nothing.
    ///
    /// A failed write is logged and returned; the input is not restored.
    pub async fn send_text(&self, text: &str) -> Result<Option<String>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        self.send_message(text, None).await.map(Some)
    }

    async fn send_message(&self, text: &str, image_url: Option<String>) -> Result<String> {
        let participants = match self.participants() {
            Some(participants) => participants,
            None => {
                tracing::warn!("Missing chat room, sender or receiver.");
                return Err(ChatError::MissingIdentifiers.into());
            }
        };

        let message = Message {
            text: text.to_string(),
            sender: participants.session.uid.clone(),
            receiver: participants.peer_uid.to_string(),
            sender_name: participants.session.display_name().to_string(),
            image_url,
            timestamp: (self.clock)(),
        };

        let room_id = participants.room_id;
        match self.store.add_message(room_id, &message).await {
            Ok(id) => {
                tracing::debug!(%room_id, %id, "Message sent.");
                Ok(id)
            }
            Err(error) => {
                tracing::warn!(?error, %room_id, "Error sending message.");
                Err(error)
            }
        }
    }

    /// Uploads picked image bytes, then sends an image message pointing at them.
    ///
    /// Nothing is sent if the upload or URL resolution fails.
    pub async fn attach_image(&self, bytes: Vec<u8>) -> Result<String> {
        let room_id = match self.participants() {
            Some(participants) => participants.room_id.to_string(),
            None => {
                tracing::warn!("Missing chat room, sender or receiver.");
                return Err(ChatError::MissingIdentifiers.into());
            }
        };

        let path = image_blob_path(&room_id, (self.clock)());
        let uploaded = async {
            self.blobs.upload(&path, bytes, IMAGE_CONTENT_TYPE).await?;
            self.blobs.download_url(&path).await
        };

        let url = match uploaded.await {
            Ok(url) => url,
            Err(error) => {
                tracing::error!(?error, %path, "Failed to upload image.");
                return Err(error);
            }
        };

        let id = self.send_message(IMAGE_SENTINEL, Some(url)).await?;
        tracing::info!(%path, "Image uploaded and message sent.");
        Ok(id)
    }

    /// Ends the subscription.
    pub fn close(mut self) {
        if self.feed.take().is_some() {
            tracing::info!(room_id = ?self.room_id, "Stopped listening for messages.");
        }
    }
}
