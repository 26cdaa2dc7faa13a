use serde::{Deserialize, Serialize};

pub const USERS_COLLECTION: &str = "users";
pub const CHATS_COLLECTION: &str = "chats";
pub const MESSAGES_COLLECTION: &str = "messages";
pub const CHAT_IMAGES_PREFIX: &str = "chat_images";

/// Text stored in place of a body when a message carries an image.
pub const IMAGE_SENTINEL: &str = "[Image]";

const ROOM_SEPARATOR: char = '_';

/// One chat message, as stored under `chats/{roomId}/messages/{messageId}`.
///
/// The room a message belongs to is implied by its path and is not stored in
/// the record itself.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Message {
    pub text: String,
    pub sender: String,
    pub receiver: String,

    /// Denormalized at send time; may be stale or empty.
    pub sender_name: String,

    pub image_url: Option<String>,

    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl Message {
    pub fn has_image(&self) -> bool {
        self.image_url.as_deref().map_or(false, |url| !url.is_empty())
    }

    /// True when `(sender, receiver)` are exactly the two participants of `room_id`.
    pub fn belongs_to(&self, room_id: &str) -> bool {
        room_id_for(&self.sender, &self.receiver) == room_id
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    pub uid: String,

    /// Display name.
    pub first: String,

    pub email: String,

    pub fcm_token: Option<String>,
}

impl User {
    /// The registered push token, treating an empty string as unregistered.
    pub fn push_token(&self) -> Option<&str> {
        self.fcm_token.as_deref().filter(|token| !token.is_empty())
    }
}

/// Room identifier for the 1:1 conversation between `a` and `b`.
///
/// The smaller identifier always comes first, so both participants compute
/// the same key regardless of who opens the conversation.
pub fn room_id_for(a: &str, b: &str) -> String {
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    format!("{}{}{}", low, ROOM_SEPARATOR, high)
}

/// Blob path for an image uploaded into `room_id` at `epoch_millis`.
pub fn image_blob_path(room_id: &str, epoch_millis: i64) -> String {
    format!("{}/{}/IMG_{}.jpg", CHAT_IMAGES_PREFIX, room_id, epoch_millis)
}

/// Truncate to `max` characters, appending `marker` when anything was cut.
pub fn truncate_with(name: &str, max: usize, marker: &str) -> String {
    if name.chars().count() > max {
        let mut short: String = name.chars().take(max).collect();
        short.push_str(marker);
        short
    } else {
        name.to_string()
    }
}
