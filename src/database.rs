use std::collections::HashSet;
use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use deadpool::managed::{self, Object};
use futures::stream::{self, StreamExt};
use google_authz::Credentials;
use tiny_firestore_odm::{Collection, Database};

use crate::backend::{ChatStore, DocumentChange, MessageFeed, UserFeed};
use crate::model::{Message, User, CHATS_COLLECTION, MESSAGES_COLLECTION, USERS_COLLECTION};

pub struct ChatDatabase {
    db: Database,
}

impl ChatDatabase {
    pub fn users(&self) -> Collection<User> {
        self.db.collection(USERS_COLLECTION)
    }

    pub fn messages(&self, room_id: &str) -> Collection<Message> {
        self.db
            .collection::<serde_json::Value>(CHATS_COLLECTION)
            .subcollection(room_id, MESSAGES_COLLECTION)
    }
}

pub struct ChatDatabaseManager {
    project_id: String,
}

impl ChatDatabaseManager {
    pub fn new(project_id: &str) -> Self {
        ChatDatabaseManager {
            project_id: project_id.to_string(),
        }
    }
}

#[async_trait]
impl managed::Manager for ChatDatabaseManager {
    type Type = ChatDatabase;
    type Error = Infallible;

    async fn create(&self) -> Result<ChatDatabase, Infallible> {
        let creds = Credentials::default().await;
        let db = Database::new(creds.into(), &self.project_id).await;

        Ok(ChatDatabase { db })
    }

    async fn recycle(&self, _: &mut ChatDatabase) -> managed::RecycleResult<Infallible> {
        Ok(())
    }
}

pub type ChatDatabasePool = managed::Pool<ChatDatabaseManager>;

/// [ChatStore] over Firestore.
///
/// The REST/gRPC surface has no listener we can use from here, so live
/// queries poll the ordered collection and emit documents they have not
/// seen yet.
#[derive(Clone)]
pub struct FirestoreStore {
    pool: ChatDatabasePool,
    poll_interval: Duration,
}

impl FirestoreStore {
    pub fn new(project_id: &str, poll_interval: Duration) -> Result<Self> {
        let pool = ChatDatabasePool::builder(ChatDatabaseManager::new(project_id))
            .build()
            .map_err(|e| anyhow!("could not build database pool: {:?}", e))?;

        Ok(FirestoreStore {
            pool,
            poll_interval,
        })
    }

    pub fn from_pool(pool: ChatDatabasePool, poll_interval: Duration) -> Self {
        FirestoreStore {
            pool,
            poll_interval,
        }
    }

    async fn db(&self) -> Result<Object<ChatDatabaseManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| anyhow!("could not get database handle: {:?}", e))
    }
}

async fn fetch_users(store: FirestoreStore) -> Result<Vec<User>> {
    let db = store.db().await?;
    let users = db
        .users()
        .list()
        .map(|doc| doc.value)
        .collect::<Vec<_>>()
        .await;
    Ok(users)
}

async fn fetch_messages(store: FirestoreStore, room_id: String) -> Result<Vec<(String, Message)>> {
    let db = store.db().await?;
    let docs = db
        .messages(&room_id)
        .list()
        .with_order_by("timestamp")
        .map(|doc| (doc.name.leaf_name().to_string(), doc.value))
        .collect::<Vec<_>>()
        .await;
    Ok(docs)
}

/// Runs a read on its own task. The list stream of tiny-firestore-odm panics
/// on RPC and decoding failures; those come back here as errors.
async fn guarded<T, F>(read: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    tokio::spawn(read)
        .await
        .map_err(|e| anyhow!("firestore read aborted: {}", e))?
}

/// Turns a full ordered listing into "added" changes for ids not seen before.
fn unseen_changes(
    seen: &mut HashSet<String>,
    docs: Vec<(String, Message)>,
) -> Vec<DocumentChange<Message>> {
    docs.into_iter()
        .filter(|(id, _)| seen.insert(id.clone()))
        .map(|(id, message)| DocumentChange::added(id, message))
        .collect()
}

/// Returns the snapshot if it differs from the last one delivered.
fn changed_snapshot(last: &mut Option<Vec<User>>, users: Vec<User>) -> Option<Vec<User>> {
    if last.as_ref() == Some(&users) {
        return None;
    }
    *last = Some(users.clone());
    Some(users)
}

struct Poller<F, S> {
    fetch: F,
    seen: S,
    first: bool,
}

/// Polls `fetch` every `interval`. The first listing is always delivered,
/// later ones only when they add messages. Failed reads are yielded and
/// polling carries on.
fn poll_messages<F, Fut>(fetch: F, interval: Duration) -> MessageFeed
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<(String, Message)>>> + Send + 'static,
{
    let poll = Poller {
        fetch,
        seen: HashSet::new(),
        first: true,
    };

    stream::unfold(poll, move |mut poll| async move {
        loop {
            if !poll.first {
                tokio::time::sleep(interval).await;
            }
            let first = std::mem::replace(&mut poll.first, false);

            match guarded((poll.fetch)()).await {
                Ok(docs) => {
                    let added = unseen_changes(&mut poll.seen, docs);
                    if !added.is_empty() || first {
                        return Some((Ok(added), poll));
                    }
                }
                Err(e) => return Some((Err(e), poll)),
            }
        }
    })
    .boxed()
}

fn poll_users<F, Fut>(fetch: F, interval: Duration) -> UserFeed
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<User>>> + Send + 'static,
{
    let poll = Poller {
        fetch,
        seen: None,
        first: true,
    };

    stream::unfold(poll, move |mut poll| async move {
        loop {
            if !poll.first {
                tokio::time::sleep(interval).await;
            }
            poll.first = false;

            match guarded((poll.fetch)()).await {
                Ok(users) => {
                    if let Some(users) = changed_snapshot(&mut poll.seen, users) {
                        return Some((Ok(users), poll));
                    }
                }
                Err(e) => return Some((Err(e), poll)),
            }
        }
    })
    .boxed()
}

#[async_trait]
impl ChatStore for FirestoreStore {
    async fn list_users(&self) -> Result<Vec<User>> {
        guarded(fetch_users(self.clone())).await
    }

    async fn watch_users(&self) -> Result<UserFeed> {
        let store = self.clone();
        Ok(poll_users(move || fetch_users(store.clone()), self.poll_interval))
    }

    async fn get_user(&self, uid: &str) -> Result<Option<User>> {
        let db = self.db().await?;
        match db.users().get(uid).await {
            Ok(user) => Ok(Some(user)),
            Err(e) => match e.downcast_ref::<tonic::Status>() {
                Some(status) if status.code() == tonic::Code::NotFound => Ok(None),
                _ => Err(e),
            },
        }
    }

    async fn put_user(&self, user: &User) -> Result<()> {
        let db = self.db().await?;
        db.users().upsert(user, user.uid.as_str()).await
    }

    async fn set_push_token(&self, uid: &str, token: &str) -> Result<()> {
        let db = self.db().await?;
        let users = db.users();
        let mut user = users.get(uid).await?;
        user.fcm_token = Some(token.to_string());
        users.update(&user, uid).await
    }

    async fn add_message(&self, room_id: &str, message: &Message) -> Result<String> {
        let db = self.db().await?;
        let name = db.messages(room_id).create(message).await?;
        Ok(name.leaf_name().to_string())
    }

    async fn watch_messages(&self, room_id: &str) -> Result<MessageFeed> {
        let store = self.clone();
        let room_id = room_id.to_string();
        Ok(poll_messages(
            move || fetch_messages(store.clone(), room_id.clone()),
            self.poll_interval,
        ))
    }
}
