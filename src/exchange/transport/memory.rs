//! In-process notification routing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::exchange::message::Notification;
use crate::exchange::services::{Inbox, Notifier};
use crate::exchange::ExchangeError;

/// Routes notifications to registered users.
///
/// Notifications for users that are not registered, or whose inbox has been
/// dropped, are discarded. Delivery is best effort, like a socket broadcast.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    routes: Arc<Mutex<Routes>>,
}

type Routes = HashMap<String, mpsc::UnboundedSender<Notification>>;

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `user_id` and returns its inbox. A second registration
    /// replaces the first; the old inbox then sees end of stream.
    pub fn register_user(&self, user_id: &str) -> MemoryInbox {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes().insert(user_id.to_string(), tx);
        tracing::debug!(user = %user_id, "registered inbox");
        MemoryInbox { rx }
    }

    pub fn unregister_user(&self, user_id: &str) {
        self.routes().remove(user_id);
    }

    /// Every update is a single insert or remove, so a map left behind by a
    /// panicking holder is still consistent.
    fn routes(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Notifier for MemoryHub {
    async fn notify(&self, notification: &Notification) -> Result<(), ExchangeError> {
        let routes = self.routes();
        match routes.get(&notification.recipient_id) {
            Some(tx) if tx.send(notification.clone()).is_ok() => {}
            _ => tracing::debug!(
                recipient = %notification.recipient_id,
                "recipient offline, notification dropped"
            ),
        }
        Ok(())
    }
}

/// Receiving end created by [`MemoryHub::register_user`].
#[derive(Debug)]
pub struct MemoryInbox {
    rx: mpsc::UnboundedReceiver<Notification>,
}

#[async_trait]
impl Inbox for MemoryInbox {
    async fn next(&mut self) -> Result<Option<Notification>, ExchangeError> {
        Ok(self.rx.recv().await)
    }
}
