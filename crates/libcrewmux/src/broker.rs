use std::collections::HashMap;

use tokio::sync::{broadcast, RwLock};

use crewmux_protocol::{Event, SessionName};

use crate::error::CrewmuxError;

const CHANNEL_CAPACITY: usize = 1024;

/// Fan-out hub: one broadcast channel per session name.
///
/// Delivery order within one session follows send order for every subscriber;
/// nothing is guaranteed across sessions.
pub struct EventBroker {
    channels: RwLock<HashMap<SessionName, broadcast::Sender<Event>>>,
}

impl EventBroker {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, session_name: &str) -> broadcast::Sender<Event> {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        self.channels
            .write()
            .await
            .insert(session_name.to_string(), tx.clone());
        tx
    }

    pub async fn remove(&self, session_name: &str) {
        self.channels.write().await.remove(session_name);
    }

    pub async fn broadcast(&self, session_name: &str, event: Event) {
        if let Some(tx) = self.channels.read().await.get(session_name) {
            // Send fails only when no subscriber is listening; that is fine.
            let _ = tx.send(event);
        }
    }

    pub async fn subscribe(
        &self,
        session_name: &str,
    ) -> Result<broadcast::Receiver<Event>, CrewmuxError> {
        let tx = self
            .channels
            .read()
            .await
            .get(session_name)
            .cloned()
            .ok_or_else(|| CrewmuxError::SessionNotFound(session_name.to_string()))?;
        Ok(tx.subscribe())
    }
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new()
    }
}
