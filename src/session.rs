use anyhow::{bail, Result};

use crate::backend::ChatStore;
use crate::model::User;

/// The signed-in user, handed explicitly to every screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub uid: String,
    pub display_name: Option<String>,
}

impl Session {
    pub fn new(uid: &str, display_name: Option<&str>) -> Self {
        Session {
            uid: uid.to_string(),
            display_name: display_name.map(str::to_string),
        }
    }

    /// Name stamped onto outgoing messages.
    pub fn display_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or("You")
    }
}

/// Profile written to `users/{uid}` right after account creation.
pub fn new_profile(uid: &str, email: &str, user_name: &str) -> User {
    let first = if !user_name.is_empty() {
        user_name.to_string()
    } else {
        email
            .split('@')
            .next()
            .filter(|local| !local.is_empty())
            .unwrap_or("Unknown")
            .to_string()
    };

    User {
        uid: uid.to_string(),
        first,
        email: email.to_string(),
        fcm_token: Some(String::new()),
    }
}

pub async fn sign_up(
    store: &dyn ChatStore,
    uid: &str,
    email: &str,
    user_name: &str,
) -> Result<User> {
    if uid.is_empty() || email.is_empty() {
        bail!("Fields cannot be empty");
    }

    let profile = new_profile(uid, email, user_name);
    match store.put_user(&profile).await {
        Ok(()) => {
            tracing::info!(%uid, "User profile created.");
            Ok(profile)
        }
        Err(error) => {
            tracing::warn!(?error, %uid, "Error creating user profile.");
            Err(error)
        }
    }
}

/// Stores a freshly issued push token on the session's user document.
pub async fn register_push_token(
    store: &dyn ChatStore,
    session: &Session,
    token: &str,
) -> Result<()> {
    match store.set_push_token(&session.uid, token).await {
        Ok(()) => {
            tracing::info!(uid = %session.uid, "Push token stored.");
            Ok(())
        }
        Err(error) => {
            tracing::warn!(?error, uid = %session.uid, "Error storing push token.");
            Err(error)
        }
    }
}
