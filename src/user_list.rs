use crate::message_list::ListChange;
use crate::model::{truncate_with, User};

pub const DISPLAY_NAME_LIMIT: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub display_name: String,
    pub email: String,
}

/// Navigation argument handed to the chat screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenChat {
    pub peer_uid: String,
}

#[derive(Default)]
pub struct UserDirectoryAdapter {
    users: Vec<User>,
}

impl UserDirectoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the backing list; renderers redraw everything.
    pub fn set_users(&mut self, users: Vec<User>) -> ListChange {
        self.users = users;
        ListChange::DataSetChanged
    }

    pub fn item_count(&self) -> usize {
        self.users.len()
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn bind(&self, position: usize) -> Option<UserRow> {
        let user = self.users.get(position)?;
        Some(UserRow {
            display_name: truncate_with(&user.first, DISPLAY_NAME_LIMIT, "..."),
            email: user.email.clone(),
        })
    }

    /// Tap on a row or on its chat icon.
    pub fn select(&self, position: usize) -> Option<OpenChat> {
        self.users.get(position).map(|user| OpenChat {
            peer_uid: user.uid.clone(),
        })
    }
}
