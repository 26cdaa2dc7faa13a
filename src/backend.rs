//! The seams between the chat client and the managed backend.
//!
//! Everything that touches the document store, the blob store or the push
//! service goes through one of these traits, so screens and the relay can be
//! driven by Firestore in production and by [`crate::memory`] in tests.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::model::{Message, User};
use crate::push::{PushError, PushMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange<T> {
    pub kind: ChangeKind,
    pub id: String,
    pub value: T,
}

impl<T> DocumentChange<T> {
    pub fn added(id: impl Into<String>, value: T) -> Self {
        DocumentChange {
            kind: ChangeKind::Added,
            id: id.into(),
            value,
        }
    }
}

/// Change batches for one room, delivered in commit order.
pub type MessageFeed = BoxStream<'static, Result<Vec<DocumentChange<Message>>>>;

/// Full snapshots of the user collection, one per change.
pub type UserFeed = BoxStream<'static, Result<Vec<User>>>;

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn list_users(&self) -> Result<Vec<User>>;

    async fn watch_users(&self) -> Result<UserFeed>;

    /// `Ok(None)` when `users/{uid}` does not exist.
    async fn get_user(&self, uid: &str) -> Result<Option<User>>;

    async fn put_user(&self, user: &User) -> Result<()>;

    async fn set_push_token(&self, uid: &str, token: &str) -> Result<()>;

    /// Writes a new document into `chats/{room_id}/messages` and returns its id.
    async fn add_message(&self, room_id: &str, message: &Message) -> Result<String>;

    /// Live query over `chats/{room_id}/messages` ordered by timestamp.
    async fn watch_messages(&self, room_id: &str) -> Result<MessageFeed>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    /// Durable URL for an object previously uploaded to `path`.
    async fn download_url(&self, path: &str) -> Result<String>;
}

#[async_trait]
pub trait PushSender: Send + Sync {
    /// Dispatches one notification, returning the provider's message id.
    async fn send(&self, message: &PushMessage) -> std::result::Result<String, PushError>;
}
