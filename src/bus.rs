//! Cross-context message bus: the in-process stand-in for extension runtime
//! messaging. Tabs (player sync engines) and UI surfaces talk to the room
//! coordinator with request/response messages; the coordinator pushes
//! fire-and-forget notifications back to tabs.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::JoinError;
use crate::protocol::{PlayerActionMessage, PopupStatus};

pub type TabId = u32;

/// Pushes from the coordinator to a tab's sync engine.
#[derive(Debug, Clone)]
pub enum TabPush {
    /// This tab gained or lost host status.
    SetHostStatus { is_host: bool },
    /// The extension's transport client id, announced after connect.
    ClientIdNotification { client_id: String },
    /// An inbound room message, forwarded verbatim with its sender identity.
    ChannelEvent {
        data: PlayerActionMessage,
        sender_client_id: String,
    },
}

/// Requests handled by the room coordinator task.
#[derive(Debug)]
pub enum BusRequest {
    JoinRoom {
        room_id: String,
        reply: oneshot::Sender<Result<String, JoinError>>,
    },
    LeaveRoom {
        room_id: String,
        reply: oneshot::Sender<LeaveOutcome>,
    },
    SetTabAsHost {
        tab_id: TabId,
        reply: oneshot::Sender<Result<(), String>>,
    },
    TabClosed {
        tab_id: TabId,
    },
    PublishPlayerAction {
        tab_id: TabId,
        payload: PlayerActionMessage,
        reply: oneshot::Sender<PublishOutcome>,
    },
    PopupStatus {
        tab_id: TabId,
        reply: oneshot::Sender<PopupStatus>,
    },
    GetMyClientId {
        reply: oneshot::Sender<Option<String>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// The sender was not the host tab or no room is current.
    Ignored(&'static str),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left,
    /// Not in that room, nothing to leave.
    Ignored,
}

/// Cloneable handle shared by every context in the process.
#[derive(Clone)]
pub struct MessageBus {
    requests: mpsc::UnboundedSender<BusRequest>,
    tabs: Arc<DashMap<TabId, mpsc::UnboundedSender<TabPush>>>,
}

impl MessageBus {
    /// Create the bus and the request stream the coordinator consumes.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BusRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                requests: tx,
                tabs: Arc::new(DashMap::new()),
            },
            rx,
        )
    }

    /// Register a tab and get its push stream. Re-registering a tab id
    /// replaces the previous stream.
    pub fn register_tab(&self, tab_id: TabId) -> mpsc::UnboundedReceiver<TabPush> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.tabs.insert(tab_id, tx);
        rx
    }

    /// Drop a tab's push stream and tell the coordinator its tab closed.
    pub fn unregister_tab(&self, tab_id: TabId) {
        self.tabs.remove(&tab_id);
        let _ = self.requests.send(BusRequest::TabClosed { tab_id });
    }

    /// Fire-and-forget push; delivery to a closed tab is silently dropped.
    pub fn push_to_tab(&self, tab_id: TabId, push: TabPush) {
        if let Some(sender) = self.tabs.get(&tab_id) {
            if sender.send(push).is_err() {
                debug!("Tab {} is gone; push dropped", tab_id);
            }
        }
    }

    /// Push to every registered tab.
    pub fn broadcast_to_tabs(&self, push: TabPush) {
        for entry in self.tabs.iter() {
            if entry.value().send(push.clone()).is_err() {
                debug!("Tab {} is gone; broadcast entry dropped", entry.key());
            }
        }
    }

    pub async fn join_room(&self, room_id: &str) -> Result<String, JoinError> {
        let (reply, response) = oneshot::channel();
        let _ = self.requests.send(BusRequest::JoinRoom {
            room_id: room_id.to_string(),
            reply,
        });
        response.await.unwrap_or_else(|_| {
            Err(JoinError::Attach {
                channel: room_id.to_string(),
                reason: "coordinator unavailable".to_string(),
            })
        })
    }

    pub async fn leave_room(&self, room_id: &str) -> LeaveOutcome {
        let (reply, response) = oneshot::channel();
        let _ = self.requests.send(BusRequest::LeaveRoom {
            room_id: room_id.to_string(),
            reply,
        });
        response.await.unwrap_or(LeaveOutcome::Ignored)
    }

    pub async fn set_tab_as_host(&self, tab_id: TabId) -> Result<(), String> {
        let (reply, response) = oneshot::channel();
        let _ = self
            .requests
            .send(BusRequest::SetTabAsHost { tab_id, reply });
        response
            .await
            .unwrap_or_else(|_| Err("coordinator unavailable".to_string()))
    }

    pub async fn publish_player_action(
        &self,
        tab_id: TabId,
        payload: PlayerActionMessage,
    ) -> PublishOutcome {
        let (reply, response) = oneshot::channel();
        let _ = self.requests.send(BusRequest::PublishPlayerAction {
            tab_id,
            payload,
            reply,
        });
        response
            .await
            .unwrap_or_else(|_| PublishOutcome::Failed("coordinator unavailable".to_string()))
    }

    pub async fn popup_status(&self, tab_id: TabId) -> PopupStatus {
        let (reply, response) = oneshot::channel();
        let _ = self.requests.send(BusRequest::PopupStatus { tab_id, reply });
        response.await.unwrap_or(PopupStatus {
            room_id: None,
            is_host: false,
            participant_count: 0,
        })
    }

    pub async fn my_client_id(&self) -> Option<String> {
        let (reply, response) = oneshot::channel();
        let _ = self.requests.send(BusRequest::GetMyClientId { reply });
        response.await.ok().flatten()
    }
}
