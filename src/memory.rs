//! In-process backend: document store, blob store and push sender in one
//! struct. Writes fan out to live subscribers through broadcast channels.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::backend::{
    BlobStore, ChatStore, DocumentChange, MessageFeed, PushSender, UserFeed,
};
use crate::model::{Message, User};
use crate::push::{PushError, PushMessage};

const EVENT_CAPACITY: usize = 256;

type RoomSender = broadcast::Sender<DocumentChange<Message>>;

#[derive(Default)]
struct State {
    users: BTreeMap<String, User>,
    rooms: HashMap<String, Vec<(String, Message)>>,
    room_events: HashMap<String, RoomSender>,
    blobs: HashMap<String, Vec<u8>>,
    next_id: u64,
}

impl State {
    /// Each room fans out on its own channel, so traffic in one room never
    /// makes another room's subscribers lag.
    fn room_sender(&mut self, room_id: &str) -> &RoomSender {
        self.room_events
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(EVENT_CAPACITY).0)
    }
}

pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
    user_events: broadcast::Sender<()>,
    user_lookups: AtomicUsize,
    pushes: Mutex<Vec<PushMessage>>,
    push_failure: Mutex<Option<PushError>>,
    fail_writes: Mutex<bool>,
    fail_uploads: Mutex<bool>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (user_events, _) = broadcast::channel(EVENT_CAPACITY);

        MemoryBackend {
            state: Arc::new(Mutex::new(State::default())),
            user_events,
            user_lookups: AtomicUsize::new(0),
            pushes: Mutex::new(Vec::new()),
            push_failure: Mutex::new(None),
            fail_writes: Mutex::new(false),
            fail_uploads: Mutex::new(false),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("memory backend state poisoned"))
    }

    /// Number of `get_user` calls served so far.
    pub fn user_lookups(&self) -> usize {
        self.user_lookups.load(Ordering::SeqCst)
    }

    /// Notifications accepted by the push sender so far.
    pub fn sent_pushes(&self) -> Vec<PushMessage> {
        self.pushes.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Every subsequent push dispatch fails with `error`.
    pub fn fail_pushes_with(&self, error: PushError) {
        if let Ok(mut failure) = self.push_failure.lock() {
            *failure = Some(error);
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_writes.lock() {
            *flag = fail;
        }
    }

    pub fn fail_uploads(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_uploads.lock() {
            *flag = fail;
        }
    }

    /// Stored messages of a room, in commit order.
    pub fn messages(&self, room_id: &str) -> Vec<Message> {
        self.state()
            .map(|state| {
                state
                    .rooms
                    .get(room_id)
                    .map(|docs| docs.iter().map(|(_, m)| m.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    pub fn blob(&self, path: &str) -> Option<Vec<u8>> {
        self.state().ok()?.blobs.get(path).cloned()
    }
}

fn snapshot_users(state: &Arc<Mutex<State>>) -> Result<Vec<User>> {
    let state = state
        .lock()
        .map_err(|_| anyhow!("memory backend state poisoned"))?;
    Ok(state.users.values().cloned().collect())
}

#[async_trait]
impl ChatStore for MemoryBackend {
    async fn list_users(&self) -> Result<Vec<User>> {
        snapshot_users(&self.state)
    }

    async fn watch_users(&self) -> Result<UserFeed> {
        let receiver = self.user_events.subscribe();
        let initial = snapshot_users(&self.state);
        let state = self.state.clone();

        let updates = BroadcastStream::new(receiver).map(move |event| match event {
            Ok(()) => snapshot_users(&state),
            Err(e) => Err(anyhow!("user listener fell behind: {}", e)),
        });

        Ok(stream::once(async move { initial }).chain(updates).boxed())
    }

    async fn get_user(&self, uid: &str) -> Result<Option<User>> {
        self.user_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.state()?.users.get(uid).cloned())
    }

    async fn put_user(&self, user: &User) -> Result<()> {
        self.state()?.users.insert(user.uid.clone(), user.clone());
        let _ = self.user_events.send(());
        Ok(())
    }

    async fn set_push_token(&self, uid: &str, token: &str) -> Result<()> {
        {
            let mut state = self.state()?;
            let user = state
                .users
                .get_mut(uid)
                .ok_or_else(|| anyhow!("no user document for {}", uid))?;
            user.fcm_token = Some(token.to_string());
        }
        let _ = self.user_events.send(());
        Ok(())
    }

    async fn add_message(&self, room_id: &str, message: &Message) -> Result<String> {
        if *self.fail_writes.lock().map_err(|_| anyhow!("poisoned"))? {
            return Err(anyhow!("permission denied writing to chats/{}", room_id));
        }

        let mut state = self.state()?;
        state.next_id += 1;
        let id = format!("m{}", state.next_id);
        state
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .push((id.clone(), message.clone()));

        // Sent while the lock is held so subscribers never miss or repeat a write.
        let _ = state
            .room_sender(room_id)
            .send(DocumentChange::added(id.clone(), message.clone()));

        Ok(id)
    }

    async fn watch_messages(&self, room_id: &str) -> Result<MessageFeed> {
        let (receiver, initial) = {
            let mut state = self.state()?;
            let receiver = state.room_sender(room_id).subscribe();

            let mut docs = state.rooms.get(room_id).cloned().unwrap_or_default();
            docs.sort_by_key(|(_, m)| m.timestamp);
            let initial: Vec<_> = docs
                .into_iter()
                .map(|(id, m)| DocumentChange::added(id, m))
                .collect();

            (receiver, initial)
        };

        let updates = BroadcastStream::new(receiver).map(|event| match event {
            Ok(change) => Ok(vec![change]),
            Err(e) => Err(anyhow!("message listener fell behind: {}", e)),
        });

        let first = if initial.is_empty() {
            None
        } else {
            Some(Ok(initial))
        };

        Ok(stream::iter(first).chain(updates).boxed())
    }
}

#[async_trait]
impl BlobStore for MemoryBackend {
    async fn upload(&self, path: &str, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        if *self.fail_uploads.lock().map_err(|_| anyhow!("poisoned"))? {
            return Err(anyhow!("upload of {} rejected", path));
        }
        self.state()?.blobs.insert(path.to_string(), bytes);
        Ok(())
    }

    async fn download_url(&self, path: &str) -> Result<String> {
        if self.state()?.blobs.contains_key(path) {
            Ok(format!("memory://{}", path))
        } else {
            Err(anyhow!("no object at {}", path))
        }
    }
}

#[async_trait]
impl PushSender for MemoryBackend {
    async fn send(&self, message: &PushMessage) -> Result<String, PushError> {
        if let Some(error) = self.push_failure.lock().ok().and_then(|f| f.clone()) {
            return Err(error);
        }
        let mut pushes = self
            .pushes
            .lock()
            .map_err(|_| PushError::Other("poisoned".to_string()))?;
        pushes.push(message.clone());
        Ok(format!("projects/memory/messages/{}", pushes.len()))
    }
}
