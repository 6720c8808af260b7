use tokio::sync::watch;

use crate::models::user::AuthUser;

/// The one owner of "who is signed in". Readers hold a `SessionSubscription`
/// and are told when the user changes; nothing else keeps a copy.
#[derive(Debug)]
pub struct Session {
    sender: watch::Sender<Option<AuthUser>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    pub fn signed_in(user: AuthUser) -> Self {
        let session = Self::new();
        session.set_user(Some(user));
        session
    }

    pub fn current(&self) -> Option<AuthUser> {
        self.sender.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.sender.borrow().is_some()
    }

    /// Subscribers are only woken when the user actually differs.
    pub fn set_user(&self, user: Option<AuthUser>) {
        self.sender.send_if_modified(|current| {
            if *current == user {
                return false;
            }
            *current = user;
            true
        });
    }

    pub fn clear(&self) {
        self.set_user(None);
    }

    pub fn subscribe(&self) -> SessionSubscription {
        SessionSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[derive(Debug, Clone)]
pub struct SessionSubscription {
    receiver: watch::Receiver<Option<AuthUser>>,
}

impl SessionSubscription {
    pub fn current(&self) -> Option<AuthUser> {
        self.receiver.borrow().clone()
    }

    pub fn has_changed(&self) -> bool {
        self.receiver.has_changed().unwrap_or(false)
    }

    /// The new user if it changed since the last look.
    pub fn take_change(&mut self) -> Option<Option<AuthUser>> {
        if !self.has_changed() {
            return None;
        }
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Waits for the next change. `None` once the session is gone.
    pub async fn changed(&mut self) -> Option<Option<AuthUser>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    pub fn unsubscribe(self) {}
}
