use parking_lot::Mutex as StateMutex;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::constants::{CHANNEL_NAME_PREFIX, CLIENT_ID_PREFIX, PLAYER_MESSAGE_NAME};
use crate::error::{ConnectionError, JoinError, PublishError};
use crate::presence::{PresenceMonitor, PresenceObserver};
use crate::protocol::PlayerActionMessage;
use crate::transport::{Channel, Connection, MessageHandler, Transport};

/// Wraps the pub/sub transport: connection lifecycle, the single active
/// channel, and presence wiring.
///
/// Connect, join, publish and leave all serialize on one async guard, so a
/// second join while one is in flight waits for the existing attempt and then
/// observes its result instead of starting a duplicate attach.
pub struct ChannelClient {
    transport: Arc<dyn Transport>,
    state: Mutex<ClientState>,
    client_id: StateMutex<Option<String>>,
    presence_observer: StateMutex<Option<PresenceObserver>>,
}

struct ClientState {
    connection: Option<Arc<dyn Connection>>,
    active: Option<ActiveChannel>,
}

struct ActiveChannel {
    room_id: String,
    channel: Arc<dyn Channel>,
}

impl ChannelClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: Mutex::new(ClientState {
                connection: None,
                active: None,
            }),
            client_id: StateMutex::new(None),
            presence_observer: StateMutex::new(None),
        }
    }

    /// Register the observer that receives participant counts. Must be set
    /// before the first join for that join's counts to be delivered.
    pub fn set_presence_observer(&self, observer: PresenceObserver) {
        *self.presence_observer.lock() = Some(observer);
    }

    /// The client identity assigned on connect. Stable for the lifetime of
    /// one connection; cleared on connection failure.
    pub fn client_id(&self) -> Option<String> {
        self.client_id.lock().clone()
    }

    /// Establish the transport connection. Idempotent: an existing connection
    /// is reused.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let mut state = self.state.lock().await;
        self.ensure_connected(&mut state).await.map(|_| ())
    }

    async fn ensure_connected(
        &self,
        state: &mut ClientState,
    ) -> Result<Arc<dyn Connection>, ConnectionError> {
        if let Some(connection) = &state.connection {
            return Ok(Arc::clone(connection));
        }

        let proposed = format!("{}{}", CLIENT_ID_PREFIX, Uuid::new_v4().simple());
        match self.transport.connect(&proposed).await {
            Ok(connection) => {
                // The transport may supersede the locally generated id.
                let assigned = connection.client_id();
                info!("Connected to transport. Client ID: {}", assigned);
                *self.client_id.lock() = Some(assigned);
                state.connection = Some(Arc::clone(&connection));
                Ok(connection)
            }
            Err(err) => {
                state.connection = None;
                state.active = None;
                *self.client_id.lock() = None;
                Err(err)
            }
        }
    }

    /// Attach to the channel for `room_id` and subscribe `on_message` to
    /// player-action events. Re-joining the current channel re-installs
    /// listeners without duplicating them; joining a different channel tears
    /// the old one down first.
    pub async fn join_channel(
        &self,
        room_id: &str,
        on_message: MessageHandler,
    ) -> Result<(), JoinError> {
        let mut state = self.state.lock().await;
        let connection = self.ensure_connected(&mut state).await?;
        let observer = self.presence_observer.lock().clone();

        if let Some(active) = &state.active {
            if active.room_id == room_id {
                debug!(
                    "Already attached to {}; re-installing listeners",
                    active.channel.name()
                );
                active.channel.unsubscribe();
                active.channel.subscribe(PLAYER_MESSAGE_NAME, on_message);
                if let Some(observer) = observer {
                    PresenceMonitor::install(&active.channel, Arc::clone(&observer));
                    PresenceMonitor::refresh(&active.channel, &observer).await;
                }
                return Ok(());
            }
        }

        if let Some(old) = state.active.take() {
            info!("Switching channels; detaching from {}", old.channel.name());
            old.channel.unsubscribe_presence();
            if let Err(err) = old.channel.detach().await {
                warn!("Error detaching from old channel: {}", err);
            }
            old.channel.unsubscribe();
        }

        let channel_name = format!("{}{}", CHANNEL_NAME_PREFIX, room_id);
        let channel = connection.channel(&channel_name);
        if let Err(err) = channel.attach().await {
            warn!("Failed to attach to {}: {}", channel_name, err);
            if let Err(detach_err) = channel.detach().await {
                warn!("Error detaching failed channel: {}", detach_err);
            }
            return Err(err);
        }

        channel.unsubscribe();
        channel.subscribe(PLAYER_MESSAGE_NAME, on_message);

        if let Some(observer) = &observer {
            PresenceMonitor::install(&channel, Arc::clone(observer));
        }
        if let Err(err) = channel.presence_enter().await {
            warn!("Failed to enter presence on {}: {}", channel_name, err);
            if let Err(detach_err) = channel.detach().await {
                warn!("Error detaching failed channel: {}", detach_err);
            }
            return Err(err);
        }
        if let Some(observer) = &observer {
            PresenceMonitor::refresh(&channel, observer).await;
        }

        info!("Attached and subscribed to {}", channel_name);
        state.active = Some(ActiveChannel {
            room_id: room_id.to_string(),
            channel,
        });
        Ok(())
    }

    /// Publish a player action into the room. If the active channel does not
    /// match, a one-off attach is attempted first; the active channel is not
    /// switched.
    pub async fn publish(
        &self,
        room_id: &str,
        message: &PlayerActionMessage,
    ) -> Result<(), PublishError> {
        let mut state = self.state.lock().await;
        let connection = self
            .ensure_connected(&mut state)
            .await
            .map_err(|err| PublishError(err.to_string()))?;
        let payload =
            serde_json::to_value(message).map_err(|err| PublishError(err.to_string()))?;

        let channel = match &state.active {
            Some(active) if active.room_id == room_id => Arc::clone(&active.channel),
            _ => {
                let channel_name = format!("{}{}", CHANNEL_NAME_PREFIX, room_id);
                warn!(
                    "Not attached to {} for publishing; attaching one-off",
                    channel_name
                );
                let channel = connection.channel(&channel_name);
                channel
                    .attach()
                    .await
                    .map_err(|err| PublishError(err.to_string()))?;
                channel
            }
        };

        channel.publish(PLAYER_MESSAGE_NAME, payload).await
    }

    /// Tear down the active channel: unsubscribe listeners first so no stale
    /// event is processed mid-teardown, then leave presence, then detach.
    /// Local state is cleared regardless of errors and observers are told the
    /// count is 0.
    pub async fn leave(&self) {
        {
            let mut state = self.state.lock().await;
            if let Some(active) = state.active.take() {
                let channel_name = active.channel.name();
                active.channel.unsubscribe();
                if let Err(err) = active.channel.presence_leave().await {
                    warn!("Error leaving presence on {}: {}", channel_name, err);
                }
                active.channel.unsubscribe_presence();
                if let Err(err) = active.channel.detach().await {
                    warn!("Error detaching {}: {}", channel_name, err);
                }
                info!("Left channel {}", channel_name);
            } else {
                debug!("No active channel to leave");
            }
        }

        let observer = self.presence_observer.lock().clone();
        if let Some(observer) = observer {
            observer(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::LocalHub;
    use crate::protocol::{PlayerAction, Site};
    use crate::transport::{ChannelMessage, PresenceHandler};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: Arc<AtomicUsize>) -> MessageHandler {
        Arc::new(move |_msg: ChannelMessage| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    async fn raw_publisher(hub: &Arc<LocalHub>, room: &str) -> Arc<dyn Channel> {
        let conn = hub.connect("raw-publisher").await.unwrap();
        let channel = conn.channel(&format!("{}{}", CHANNEL_NAME_PREFIX, room));
        channel.attach().await.unwrap();
        channel
    }

    fn play_message() -> PlayerActionMessage {
        PlayerActionMessage::new(Site::Netflix, PlayerAction::Play, 1.0)
    }

    #[tokio::test]
    async fn rejoining_same_room_does_not_duplicate_handlers() {
        let hub = LocalHub::new();
        let client = ChannelClient::new(hub.clone() as Arc<dyn Transport>);
        let seen = Arc::new(AtomicUsize::new(0));

        client
            .join_channel("r1", counting_handler(Arc::clone(&seen)))
            .await
            .unwrap();
        client
            .join_channel("r1", counting_handler(Arc::clone(&seen)))
            .await
            .unwrap();

        let publisher = raw_publisher(&hub, "r1").await;
        publisher
            .publish(PLAYER_MESSAGE_NAME, serde_json::to_value(play_message()).unwrap())
            .await
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn switching_rooms_detaches_old_channel_first() {
        let hub = LocalHub::new();
        let client = ChannelClient::new(hub.clone() as Arc<dyn Transport>);
        let seen_old = Arc::new(AtomicUsize::new(0));
        let seen_new = Arc::new(AtomicUsize::new(0));

        client
            .join_channel("alpha", counting_handler(Arc::clone(&seen_old)))
            .await
            .unwrap();
        client
            .join_channel("beta", counting_handler(Arc::clone(&seen_new)))
            .await
            .unwrap();

        let old = raw_publisher(&hub, "alpha").await;
        let new = raw_publisher(&hub, "beta").await;
        let payload = serde_json::to_value(play_message()).unwrap();
        old.publish(PLAYER_MESSAGE_NAME, payload.clone()).await.unwrap();
        new.publish(PLAYER_MESSAGE_NAME, payload).await.unwrap();

        assert_eq!(seen_old.load(Ordering::SeqCst), 0, "old room must be silent");
        assert_eq!(seen_new.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connect_failure_clears_client_identity() {
        let hub = LocalHub::new();
        hub.set_reject_connects(true);
        let client = ChannelClient::new(hub.clone() as Arc<dyn Transport>);

        let result = client
            .join_channel("r1", Arc::new(|_msg| {}))
            .await;
        assert!(matches!(result, Err(JoinError::Connection(_))));
        assert!(client.client_id().is_none());
    }

    #[tokio::test]
    async fn leave_reports_zero_to_presence_observer() {
        let hub = LocalHub::new();
        let client = ChannelClient::new(hub.clone() as Arc<dyn Transport>);
        let counts = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&counts);
        client.set_presence_observer(Arc::new(move |count| sink.lock().push(count)));

        client.join_channel("r1", Arc::new(|_msg| {})).await.unwrap();
        assert_eq!(counts.lock().last().copied(), Some(1));

        client.leave().await;
        assert_eq!(counts.lock().last().copied(), Some(0));
    }

    // Transport wrapper whose detach always fails, for the "leaving A fails"
    // property.
    struct FlakyDetach(Arc<LocalHub>);
    struct FlakyConnection(Arc<dyn Connection>);
    struct FlakyChannel(Arc<dyn Channel>);

    #[async_trait]
    impl Transport for FlakyDetach {
        async fn connect(
            &self,
            client_id: &str,
        ) -> Result<Arc<dyn Connection>, ConnectionError> {
            let inner = self.0.connect(client_id).await?;
            Ok(Arc::new(FlakyConnection(inner)))
        }
    }

    impl Connection for FlakyConnection {
        fn client_id(&self) -> String {
            self.0.client_id()
        }
        fn channel(&self, name: &str) -> Arc<dyn Channel> {
            Arc::new(FlakyChannel(self.0.channel(name)))
        }
    }

    #[async_trait]
    impl Channel for FlakyChannel {
        fn name(&self) -> String {
            self.0.name()
        }
        async fn attach(&self) -> Result<(), JoinError> {
            self.0.attach().await
        }
        async fn detach(&self) -> Result<(), crate::error::DetachError> {
            // Drop delivery like a real detach would, then report failure.
            let _ = self.0.detach().await;
            Err(crate::error::DetachError("simulated detach failure".to_string()))
        }
        async fn publish(&self, event: &str, payload: Value) -> Result<(), PublishError> {
            self.0.publish(event, payload).await
        }
        fn subscribe(&self, event: &str, handler: MessageHandler) {
            self.0.subscribe(event, handler)
        }
        fn unsubscribe(&self) {
            self.0.unsubscribe()
        }
        async fn presence_enter(&self) -> Result<(), JoinError> {
            self.0.presence_enter().await
        }
        async fn presence_leave(&self) -> Result<(), crate::error::DetachError> {
            self.0.presence_leave().await
        }
        async fn presence_members(&self) -> Result<Vec<String>, ConnectionError> {
            self.0.presence_members().await
        }
        fn subscribe_presence(&self, handler: PresenceHandler) {
            self.0.subscribe_presence(handler)
        }
        fn unsubscribe_presence(&self) {
            self.0.unsubscribe_presence()
        }
    }

    #[tokio::test]
    async fn detach_failure_does_not_block_the_next_join() {
        let hub = LocalHub::new();
        let flaky = Arc::new(FlakyDetach(hub.clone()));
        let client = ChannelClient::new(flaky as Arc<dyn Transport>);
        let seen_new = Arc::new(AtomicUsize::new(0));

        client.join_channel("alpha", Arc::new(|_msg| {})).await.unwrap();
        client
            .join_channel("beta", counting_handler(Arc::clone(&seen_new)))
            .await
            .unwrap();

        let publisher = raw_publisher(&hub, "beta").await;
        publisher
            .publish(PLAYER_MESSAGE_NAME, serde_json::to_value(play_message()).unwrap())
            .await
            .unwrap();
        assert_eq!(seen_new.load(Ordering::SeqCst), 1, "beta is the active room");
    }
}
