//! View model for the message list of a chat screen.
//!
//! The list is append-only: rows are added at the end as the live query
//! delivers them and are never updated, removed or reordered.

use std::collections::HashMap;
use std::fmt::Display;

use chrono::{FixedOffset, Local, TimeZone};

use crate::model::{truncate_with, Message};

pub const SENDER_NAME_LIMIT: usize = 10;
pub const ELLIPSIS: &str = "…";

const CLOCK_FORMAT: &str = "%-I:%M %p";

/// Change notification for whatever renders a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListChange {
    /// One row was inserted at this position.
    Inserted(usize),
    /// The whole backing list was replaced.
    DataSetChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageScale {
    CenterCrop,
    FitCenter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// Loaded asynchronously by the renderer; the text view stays hidden.
    Image { url: String, scale: ImageScale },
    /// The image view stays hidden.
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bubble {
    pub sender_label: String,
    pub time_label: String,
    pub content: Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageRow {
    Sent(Bubble),
    Received(Bubble),
}

impl MessageRow {
    pub fn bubble(&self) -> &Bubble {
        match self {
            MessageRow::Sent(bubble) | MessageRow::Received(bubble) => bubble,
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, MessageRow::Sent(_))
    }

    pub fn alignment(&self) -> Alignment {
        match self {
            MessageRow::Sent(_) => Alignment::Right,
            MessageRow::Received(_) => Alignment::Left,
        }
    }
}

/// 12-hour wall-clock time of an epoch-millis timestamp in `tz`.
pub fn format_clock<Tz>(timestamp: i64, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    tz.timestamp_millis_opt(timestamp)
        .single()
        .map(|time| time.format(CLOCK_FORMAT).to_string())
        .unwrap_or_default()
}

pub struct MessageListAdapter {
    local_uid: String,
    messages: Vec<Message>,
    sender_names: HashMap<String, String>,
    offset: Option<FixedOffset>,
}

impl MessageListAdapter {
    pub fn new(local_uid: &str) -> Self {
        MessageListAdapter {
            local_uid: local_uid.to_string(),
            messages: Vec::new(),
            sender_names: HashMap::new(),
            offset: None,
        }
    }

    /// Formats times in a fixed offset instead of the device's local zone.
    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn item_count(&self) -> usize {
        self.messages.len()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Name to use for `uid` when a message arrives without `senderName`.
    pub fn remember_sender_name(&mut self, uid: &str, name: &str) {
        self.sender_names.insert(uid.to_string(), name.to_string());
    }

    pub fn add_message(&mut self, message: Message) -> ListChange {
        self.messages.push(message);
        ListChange::Inserted(self.messages.len() - 1)
    }

    /// Position of the newest row, if any.
    pub fn last_position(&self) -> Option<usize> {
        self.messages.len().checked_sub(1)
    }

    pub fn is_sent(&self, position: usize) -> Option<bool> {
        self.messages
            .get(position)
            .map(|message| message.sender == self.local_uid)
    }

    pub fn bind(&self, position: usize) -> Option<MessageRow> {
        let message = self.messages.get(position)?;
        let sent = message.sender == self.local_uid;

        let bubble = Bubble {
            sender_label: self.sender_label(message, sent),
            time_label: self.time_label(message.timestamp),
            content: match &message.image_url {
                Some(url) if !url.is_empty() => Content::Image {
                    url: url.clone(),
                    scale: ImageScale::CenterCrop,
                },
                _ => Content::Text(message.text.clone()),
            },
        };

        Some(if sent {
            MessageRow::Sent(bubble)
        } else {
            MessageRow::Received(bubble)
        })
    }

    /// Full-screen preview of an image row.
    pub fn preview(&self, position: usize) -> Option<Content> {
        let url = self.messages.get(position)?.image_url.as_ref()?;
        if url.is_empty() {
            return None;
        }
        Some(Content::Image {
            url: url.clone(),
            scale: ImageScale::FitCenter,
        })
    }

    pub fn rows(&self) -> Vec<MessageRow> {
        (0..self.messages.len())
            .filter_map(|position| self.bind(position))
            .collect()
    }

    fn sender_label(&self, message: &Message, sent: bool) -> String {
        let name = Some(message.sender_name.as_str())
            .filter(|name| !name.is_empty())
            .or_else(|| {
                self.sender_names
                    .get(&message.sender)
                    .map(String::as_str)
                    .filter(|name| !name.is_empty())
            });

        match name {
            Some(name) => truncate_with(name, SENDER_NAME_LIMIT, ELLIPSIS),
            None if sent => "You".to_string(),
            None => "Unknown".to_string(),
        }
    }

    fn time_label(&self, timestamp: i64) -> String {
        match &self.offset {
            Some(offset) => format_clock(timestamp, offset),
            None => format_clock(timestamp, &Local),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(sender: &str, name: &str, text: &str, image_url: Option<&str>, ts: i64) -> Message {
        Message {
            text: text.to_string(),
            sender: sender.to_string(),
            receiver: if sender == "me" { "peer" } else { "me" }.to_string(),
            sender_name: name.to_string(),
            image_url: image_url.map(str::to_string),
            timestamp: ts,
        }
    }

    fn adapter() -> MessageListAdapter {
        MessageListAdapter::new("me").with_offset(FixedOffset::east_opt(0).unwrap())
    }

    #[test]
    fn variant_follows_sender_identity() {
        let mut list = adapter();
        list.add_message(message("me", "Me", "hi", None, 1));
        list.add_message(message("peer", "Peer", "hey", None, 2));

        let rows = list.rows();
        assert!(rows[0].is_sent());
        assert_eq!(rows[0].alignment(), Alignment::Right);
        assert!(!rows[1].is_sent());
        assert_eq!(rows[1].alignment(), Alignment::Left);
        assert_eq!(list.is_sent(1), Some(false));
    }

    #[test]
    fn image_rows_hide_text_and_text_rows_hide_image() {
        let mut list = adapter();
        list.add_message(message("me", "Me", "[Image]", Some("https://img/1.jpg"), 1));
        list.add_message(message("me", "Me", "plain", Some(""), 2));
        list.add_message(message("peer", "Peer", "also plain", None, 3));

        match &list.bind(0).unwrap().bubble().content {
            Content::Image { url, scale } => {
                assert_eq!(url, "https://img/1.jpg");
                assert_eq!(*scale, ImageScale::CenterCrop);
            }
            other => panic!("expected image, got {:?}", other),
        }
        assert_eq!(
            list.bind(1).unwrap().bubble().content,
            Content::Text("plain".to_string())
        );
        assert_eq!(
            list.bind(2).unwrap().bubble().content,
            Content::Text("also plain".to_string())
        );

        assert_eq!(
            list.preview(0),
            Some(Content::Image {
                url: "https://img/1.jpg".to_string(),
                scale: ImageScale::FitCenter,
            })
        );
        assert_eq!(list.preview(1), None);
    }

    #[test]
    fn long_sender_names_are_shortened() {
        let mut list = adapter();
        list.add_message(message("peer", "Maximilianus", "hi", None, 1));
        list.add_message(message("peer", "Tenletters", "hi", None, 2));

        let label = list.bind(0).unwrap().bubble().sender_label.clone();
        assert_eq!(label, "Maximilian…");
        assert_eq!(label.chars().count(), 11);
        assert_eq!(list.bind(1).unwrap().bubble().sender_label, "Tenletters");
    }

    #[test]
    fn empty_sender_name_falls_back() {
        let mut list = adapter();
        list.add_message(message("me", "", "hi", None, 1));
        list.add_message(message("peer", "", "hey", None, 2));
        assert_eq!(list.bind(0).unwrap().bubble().sender_label, "You");
        assert_eq!(list.bind(1).unwrap().bubble().sender_label, "Unknown");

        list.remember_sender_name("peer", "Peer Person");
        assert_eq!(list.bind(1).unwrap().bubble().sender_label, "Peer Perso…");
    }

    #[test]
    fn times_use_twelve_hour_clock() {
        let mut list = adapter();
        // 2023-11-14 22:13:20 UTC
        list.add_message(message("me", "Me", "late", None, 1_700_000_000_000));
        // 1970-01-01 00:00:00.1 UTC
        list.add_message(message("me", "Me", "early", None, 100));

        assert_eq!(list.bind(0).unwrap().bubble().time_label, "10:13 PM");
        assert_eq!(list.bind(1).unwrap().bubble().time_label, "12:00 AM");

        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let list = MessageListAdapter::new("me").with_offset(offset);
        assert_eq!(format_clock(1_700_000_000_000, &list.offset.unwrap()), "12:13 AM");
    }

    #[test]
    fn append_reports_point_insertions() {
        let mut list = adapter();
        assert_eq!(list.last_position(), None);
        assert_eq!(list.add_message(message("me", "Me", "a", None, 1)), ListChange::Inserted(0));
        assert_eq!(list.add_message(message("me", "Me", "b", None, 2)), ListChange::Inserted(1));
        assert_eq!(list.last_position(), Some(1));
        assert_eq!(list.item_count(), 2);
        assert!(list.bind(2).is_none());
    }
}
