use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;

use crate::backend::{ChatStore, UserFeed};
use crate::message_list::ListChange;
use crate::model::User;
use crate::session::Session;
use crate::user_list::{OpenChat, UserDirectoryAdapter};

/// Lists everyone except the signed-in user and opens chats with them.
pub struct DirectoryScreen {
    store: Arc<dyn ChatStore>,
    session: Session,
    adapter: UserDirectoryAdapter,
    feed: Option<UserFeed>,
}

impl DirectoryScreen {
    pub fn new(store: Arc<dyn ChatStore>, session: Session) -> Self {
        DirectoryScreen {
            store,
            session,
            adapter: UserDirectoryAdapter::new(),
            feed: None,
        }
    }

    pub fn adapter(&self) -> &UserDirectoryAdapter {
        &self.adapter
    }

    fn rebind(&mut self, users: Vec<User>) -> ListChange {
        let others = users
            .into_iter()
            .filter(|user| user.uid != self.session.uid)
            .collect();
        self.adapter.set_users(others)
    }

    /// One-shot fetch, as used by pull-to-refresh.
    pub async fn refresh(&mut self) -> Result<ListChange> {
        match self.store.list_users().await {
            Ok(users) => Ok(self.rebind(users)),
            Err(error) => {
                tracing::warn!(?error, "Error refreshing users.");
                Err(error)
            }
        }
    }

    /// Starts the live subscription; snapshots arrive through [Self::next_snapshot].
    pub async fn watch(&mut self) -> Result<()> {
        self.feed = Some(self.store.watch_users().await?);
        Ok(())
    }

    pub async fn next_snapshot(&mut self) -> Option<Result<ListChange>> {
        let snapshot = self.feed.as_mut()?.next().await?;
        match snapshot {
            Ok(users) => Some(Ok(self.rebind(users))),
            Err(error) => {
                tracing::warn!(?error, "Listen failed.");
                Some(Err(error))
            }
        }
    }

    pub fn open_chat(&self, position: usize) -> Option<OpenChat> {
        self.adapter.select(position)
    }
}
