//! In-process reference transport. One hub plays the role of the realtime
//! service for every participant in the same process, which is what the demo
//! binary and the distributed integration tests run against.
//!
//! Delivery matches the real service closely enough to exercise the filter
//! rules: a published message is handed to every attached subscriber,
//! including the publisher itself, so self-echo is observable.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ConnectionError, DetachError, JoinError, PublishError};
use crate::transport::{
    Channel, ChannelMessage, Connection, MessageHandler, PresenceAction, PresenceEvent,
    PresenceHandler, Transport,
};

#[derive(Default)]
pub struct LocalHub {
    channels: Arc<DashMap<String, Arc<ChannelCore>>>,
    reject_connects: AtomicBool,
}

/// Shared per-channel-name state: every connection's view of the channel and
/// the presence set. Views register once at creation; the attached flag gates
/// delivery.
struct ChannelCore {
    name: String,
    views: Mutex<Vec<Arc<HubChannel>>>,
    presence: Mutex<Vec<String>>,
}

impl ChannelCore {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            views: Mutex::new(Vec::new()),
            presence: Mutex::new(Vec::new()),
        })
    }

    fn attached_views(&self) -> Vec<Arc<HubChannel>> {
        self.views
            .lock()
            .iter()
            .filter(|view| view.attached.load(Ordering::SeqCst))
            .cloned()
            .collect()
    }

    fn fire_presence(&self, event: PresenceEvent) {
        for view in self.attached_views() {
            let handlers: Vec<PresenceHandler> = view.presence_handlers.lock().clone();
            for handler in handlers {
                handler(event.clone());
            }
        }
    }
}

impl LocalHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make subsequent connect attempts fail, simulating an unreachable
    /// service.
    pub fn set_reject_connects(&self, reject: bool) {
        self.reject_connects.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for LocalHub {
    async fn connect(&self, client_id: &str) -> Result<Arc<dyn Connection>, ConnectionError> {
        if self.reject_connects.load(Ordering::SeqCst) {
            return Err(ConnectionError("hub rejected the connection".to_string()));
        }
        Ok(Arc::new(HubConnection {
            channels: Arc::clone(&self.channels),
            client_id: client_id.to_string(),
            views: DashMap::new(),
        }))
    }
}

struct HubConnection {
    channels: Arc<DashMap<String, Arc<ChannelCore>>>,
    client_id: String,
    views: DashMap<String, Arc<HubChannel>>,
}

impl Connection for HubConnection {
    fn client_id(&self) -> String {
        self.client_id.clone()
    }

    fn channel(&self, name: &str) -> Arc<dyn Channel> {
        self.views
            .entry(name.to_string())
            .or_insert_with(|| {
                let core = self
                    .channels
                    .entry(name.to_string())
                    .or_insert_with(|| ChannelCore::new(name))
                    .clone();
                let view = Arc::new(HubChannel {
                    client_id: self.client_id.clone(),
                    core: Arc::clone(&core),
                    attached: AtomicBool::new(false),
                    handlers: Mutex::new(Vec::new()),
                    presence_handlers: Mutex::new(Vec::new()),
                });
                core.views.lock().push(Arc::clone(&view));
                view
            })
            .clone()
    }
}

/// One connection's view of a channel.
pub struct HubChannel {
    client_id: String,
    core: Arc<ChannelCore>,
    attached: AtomicBool,
    handlers: Mutex<Vec<(String, MessageHandler)>>,
    presence_handlers: Mutex<Vec<PresenceHandler>>,
}

impl HubChannel {
    fn leave_presence_set(&self) {
        let was_present = {
            let mut presence = self.core.presence.lock();
            let before = presence.len();
            presence.retain(|id| id != &self.client_id);
            presence.len() != before
        };
        if was_present {
            self.core.fire_presence(PresenceEvent {
                action: PresenceAction::Leave,
                client_id: self.client_id.clone(),
            });
        }
    }
}

#[async_trait]
impl Channel for HubChannel {
    fn name(&self) -> String {
        self.core.name.clone()
    }

    async fn attach(&self) -> Result<(), JoinError> {
        self.attached.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn detach(&self) -> Result<(), DetachError> {
        if self.attached.swap(false, Ordering::SeqCst) {
            self.leave_presence_set();
        }
        Ok(())
    }

    async fn publish(&self, event: &str, payload: Value) -> Result<(), PublishError> {
        if !self.attached.load(Ordering::SeqCst) {
            return Err(PublishError(format!(
                "channel {} is not attached",
                self.core.name
            )));
        }
        for view in self.core.attached_views() {
            let handlers: Vec<MessageHandler> = view
                .handlers
                .lock()
                .iter()
                .filter(|(name, _)| name == event)
                .map(|(_, handler)| handler.clone())
                .collect();
            for handler in handlers {
                handler(ChannelMessage {
                    name: event.to_string(),
                    client_id: self.client_id.clone(),
                    data: payload.clone(),
                });
            }
        }
        Ok(())
    }

    fn subscribe(&self, event: &str, handler: MessageHandler) {
        self.handlers.lock().push((event.to_string(), handler));
    }

    fn unsubscribe(&self) {
        self.handlers.lock().clear();
    }

    async fn presence_enter(&self) -> Result<(), JoinError> {
        if !self.attached.load(Ordering::SeqCst) {
            return Err(JoinError::Attach {
                channel: self.core.name.clone(),
                reason: "presence enter on a detached channel".to_string(),
            });
        }
        let entered = {
            let mut presence = self.core.presence.lock();
            if presence.iter().any(|id| id == &self.client_id) {
                false
            } else {
                presence.push(self.client_id.clone());
                true
            }
        };
        if entered {
            self.core.fire_presence(PresenceEvent {
                action: PresenceAction::Enter,
                client_id: self.client_id.clone(),
            });
        }
        Ok(())
    }

    async fn presence_leave(&self) -> Result<(), DetachError> {
        self.leave_presence_set();
        Ok(())
    }

    async fn presence_members(&self) -> Result<Vec<String>, ConnectionError> {
        if !self.attached.load(Ordering::SeqCst) {
            return Err(ConnectionError(format!(
                "channel {} is not attached",
                self.core.name
            )));
        }
        Ok(self.core.presence.lock().clone())
    }

    fn subscribe_presence(&self, handler: PresenceHandler) {
        self.presence_handlers.lock().push(handler);
    }

    fn unsubscribe_presence(&self) {
        self.presence_handlers.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counting_handler(counter: Arc<AtomicUsize>) -> MessageHandler {
        Arc::new(move |_msg| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn publish_reaches_every_attached_view_including_sender() {
        let hub = LocalHub::new();
        let a = hub.connect("client-a").await.unwrap();
        let b = hub.connect("client-b").await.unwrap();

        let ch_a = a.channel("watch-party-1");
        let ch_b = b.channel("watch-party-1");
        ch_a.attach().await.unwrap();
        ch_b.attach().await.unwrap();

        let seen_a = Arc::new(AtomicUsize::new(0));
        let seen_b = Arc::new(AtomicUsize::new(0));
        ch_a.subscribe("player-action", counting_handler(Arc::clone(&seen_a)));
        ch_b.subscribe("player-action", counting_handler(Arc::clone(&seen_b)));

        ch_a.publish("player-action", json!({"action": "play"}))
            .await
            .unwrap();

        assert_eq!(seen_a.load(Ordering::SeqCst), 1, "sender sees its own message");
        assert_eq!(seen_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn detach_drops_delivery_and_presence() {
        let hub = LocalHub::new();
        let a = hub.connect("client-a").await.unwrap();
        let b = hub.connect("client-b").await.unwrap();

        let ch_a = a.channel("watch-party-1");
        let ch_b = b.channel("watch-party-1");
        ch_a.attach().await.unwrap();
        ch_b.attach().await.unwrap();
        ch_a.presence_enter().await.unwrap();
        ch_b.presence_enter().await.unwrap();
        assert_eq!(ch_a.presence_members().await.unwrap().len(), 2);

        let seen_b = Arc::new(AtomicUsize::new(0));
        ch_b.subscribe("player-action", counting_handler(Arc::clone(&seen_b)));
        ch_b.detach().await.unwrap();

        ch_a.publish("player-action", json!({"action": "pause"}))
            .await
            .unwrap();
        assert_eq!(seen_b.load(Ordering::SeqCst), 0);
        assert_eq!(ch_a.presence_members().await.unwrap(), vec!["client-a"]);
    }

    #[tokio::test]
    async fn publish_requires_attachment() {
        let hub = LocalHub::new();
        let a = hub.connect("client-a").await.unwrap();
        let ch = a.channel("watch-party-1");
        assert!(ch.publish("player-action", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn same_name_returns_same_view() {
        let hub = LocalHub::new();
        let a = hub.connect("client-a").await.unwrap();
        let first = a.channel("watch-party-1");
        first.attach().await.unwrap();
        let second = a.channel("watch-party-1");
        // Attachment state is shared, so this must be the same view.
        second.detach().await.unwrap();
        assert!(first.publish("player-action", json!({})).await.is_err());
    }
}
