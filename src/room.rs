use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::bus::{BusRequest, LeaveOutcome, MessageBus, PublishOutcome, TabId, TabPush};
use crate::channel::ChannelClient;
use crate::constants::PLAYER_MESSAGE_NAME;
use crate::error::JoinError;
use crate::protocol::{PlayerActionMessage, PopupStatus, UiEvent};
use crate::transport::{ChannelMessage, MessageHandler, Transport};

type UiObservers = Arc<Mutex<Vec<mpsc::UnboundedSender<UiEvent>>>>;

/// Owns room membership and host assignment, and routes inbound channel
/// traffic to the local tabs' sync engines.
///
/// Runs as a single task over the bus request stream, so room and host
/// mutations are serialized; host election is local, single-writer by
/// convention.
pub struct RoomCoordinator {
    channel: Arc<ChannelClient>,
    bus: MessageBus,
    current_room: Option<String>,
    host_tab: Option<TabId>,
    participant_count: Arc<AtomicUsize>,
    observers: UiObservers,
}

impl RoomCoordinator {
    pub fn new(transport: Arc<dyn Transport>, bus: MessageBus) -> Self {
        let channel = Arc::new(ChannelClient::new(transport));
        let participant_count = Arc::new(AtomicUsize::new(0));
        let observers: UiObservers = Arc::new(Mutex::new(Vec::new()));

        let count = Arc::clone(&participant_count);
        let count_observers = Arc::clone(&observers);
        channel.set_presence_observer(Arc::new(move |n| {
            count.store(n, Ordering::SeqCst);
            notify_observers(&count_observers, UiEvent::ParticipantCount(n));
        }));

        Self {
            channel,
            bus,
            current_room: None,
            host_tab: None,
            participant_count,
            observers,
        }
    }

    /// Register a UI surface; it receives every subsequent event.
    pub fn subscribe_ui(&self) -> mpsc::UnboundedReceiver<UiEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.lock().push(tx);
        rx
    }

    /// Connect eagerly, announce the client id to tabs, then serve bus
    /// requests until every bus handle is dropped.
    pub async fn run(mut self, mut requests: mpsc::UnboundedReceiver<BusRequest>) {
        match self.channel.connect().await {
            Ok(()) => {
                if let Some(client_id) = self.channel.client_id() {
                    self.bus
                        .broadcast_to_tabs(TabPush::ClientIdNotification { client_id });
                }
            }
            Err(err) => warn!("Initial transport connection failed: {}", err),
        }

        while let Some(request) = requests.recv().await {
            self.handle(request).await;
        }
    }

    async fn handle(&mut self, request: BusRequest) {
        match request {
            BusRequest::JoinRoom { room_id, reply } => {
                let _ = reply.send(self.join_room(&room_id).await);
            }
            BusRequest::LeaveRoom { room_id, reply } => {
                let _ = reply.send(self.leave_room(&room_id).await);
            }
            BusRequest::SetTabAsHost { tab_id, reply } => {
                let _ = reply.send(self.designate_host(tab_id));
            }
            BusRequest::TabClosed { tab_id } => {
                self.on_tab_closed(tab_id).await;
            }
            BusRequest::PublishPlayerAction {
                tab_id,
                payload,
                reply,
            } => {
                let _ = reply.send(self.publish_from_tab(tab_id, payload).await);
            }
            BusRequest::PopupStatus { tab_id, reply } => {
                let _ = reply.send(self.popup_status(tab_id));
            }
            BusRequest::GetMyClientId { reply } => {
                let _ = reply.send(self.channel.client_id());
            }
        }
    }

    /// Join a room, leaving the previous one first. Re-joining the current
    /// room is a no-op success.
    async fn join_room(&mut self, room_id: &str) -> Result<String, JoinError> {
        let room = room_id.trim();
        if room.is_empty() {
            return Err(JoinError::EmptyRoomId);
        }

        if self.current_room.as_deref() == Some(room) {
            info!("Already in room {}", room);
            self.notify(UiEvent::RoomJoined {
                room_id: room.to_string(),
            });
            return Ok(room.to_string());
        }

        let previous = self.current_room.clone();
        if let Some(old_room) = &previous {
            info!("Leaving room {} before joining {}", old_room, room);
            // Leave failures are logged inside and never block the join.
            self.channel.leave().await;
        }

        // Current room is set before the join so an identical concurrent
        // request is recognized as redundant.
        self.current_room = Some(room.to_string());
        let handler = inbound_router(self.bus.clone());
        match self.channel.join_channel(room, handler).await {
            Ok(()) => {
                info!("Joined room {}", room);
                self.notify(UiEvent::RoomJoined {
                    room_id: room.to_string(),
                });
                Ok(room.to_string())
            }
            Err(err) => {
                warn!("Failed to join room {}: {}", room, err);
                if self.current_room.as_deref() == Some(room) {
                    self.current_room = previous;
                }
                self.notify(UiEvent::RoomJoinFailed {
                    room_id: room.to_string(),
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn leave_room(&mut self, room_id: &str) -> LeaveOutcome {
        match self.current_room.clone() {
            Some(current) if current == room_id => {
                self.channel.leave().await;
                self.current_room = None;
                self.host_tab = None;
                info!("Left room {}", current);
                self.notify(UiEvent::LeftRoom { room_id: current });
                LeaveOutcome::Left
            }
            _ => LeaveOutcome::Ignored,
        }
    }

    /// Designate a tab as host. The previous host (if any, and different) is
    /// told it lost host status before the new tab is told it gained it; both
    /// pushes are fire-and-forget.
    fn designate_host(&mut self, tab_id: TabId) -> Result<(), String> {
        let Some(room) = self.current_room.clone() else {
            let reason = "cannot set host, not in a room".to_string();
            self.notify(UiEvent::HostSetFailed {
                room_id: None,
                reason: reason.clone(),
            });
            return Err(reason);
        };

        let old_host = self.host_tab;
        self.host_tab = Some(tab_id);
        if let Some(old_tab) = old_host {
            if old_tab != tab_id {
                self.bus
                    .push_to_tab(old_tab, TabPush::SetHostStatus { is_host: false });
            }
        }
        self.bus
            .push_to_tab(tab_id, TabPush::SetHostStatus { is_host: true });

        info!("Tab {} is now host for room {}", tab_id, room);
        self.notify(UiEvent::HostSet {
            room_id: room,
            tab_id,
        });
        Ok(())
    }

    /// Tab lifecycle hook: a closing host tab clears the assignment and tells
    /// the room.
    async fn on_tab_closed(&mut self, tab_id: TabId) {
        if self.host_tab != Some(tab_id) {
            return;
        }
        info!("Host tab {} closed; clearing host status", tab_id);
        self.host_tab = None;

        if let Some(room) = self.current_room.clone() {
            if let Err(err) = self
                .channel
                .publish(&room, &PlayerActionMessage::host_left())
                .await
            {
                warn!("Failed to publish host_left to {}: {}", room, err);
            }
            self.notify(UiEvent::HostLeft { room_id: room });
        }
    }

    /// Only the host tab may publish, and only while a room is current.
    async fn publish_from_tab(
        &mut self,
        tab_id: TabId,
        payload: PlayerActionMessage,
    ) -> PublishOutcome {
        match (self.current_room.clone(), self.host_tab) {
            (Some(room), Some(host)) if host == tab_id => {
                match self.channel.publish(&room, &payload).await {
                    Ok(()) => PublishOutcome::Published,
                    Err(err) => {
                        warn!("Publish from tab {} failed: {}", tab_id, err);
                        PublishOutcome::Failed(err.to_string())
                    }
                }
            }
            _ => PublishOutcome::Ignored("not host or no room"),
        }
    }

    fn popup_status(&self, tab_id: TabId) -> PopupStatus {
        PopupStatus {
            room_id: self.current_room.clone(),
            is_host: self.host_tab == Some(tab_id) && self.current_room.is_some(),
            participant_count: self.participant_count.load(Ordering::SeqCst),
        }
    }

    fn notify(&self, event: UiEvent) {
        notify_observers(&self.observers, event);
    }
}

fn notify_observers(observers: &UiObservers, event: UiEvent) {
    observers
        .lock()
        .retain(|observer| observer.send(event.clone()).is_ok());
}

/// Pure dispatch: decode inbound player-action messages and forward them to
/// every registered tab together with the sender identity. Filtering is the
/// sync engines' job.
fn inbound_router(bus: MessageBus) -> MessageHandler {
    Arc::new(move |message: ChannelMessage| {
        if message.name != PLAYER_MESSAGE_NAME {
            return;
        }
        match serde_json::from_value::<PlayerActionMessage>(message.data) {
            Ok(data) => bus.broadcast_to_tabs(TabPush::ChannelEvent {
                data,
                sender_client_id: message.client_id,
            }),
            Err(err) => warn!("Dropping malformed player action: {}", err),
        }
    })
}
