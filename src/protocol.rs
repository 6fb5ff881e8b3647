use serde::{Deserialize, Serialize};

/// Streaming sites the sync layer knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Site {
    #[serde(rename = "NETFLIX", alias = "netflix")]
    Netflix,
    #[serde(rename = "HOTSTAR", alias = "hotstar")]
    Hotstar,
}

impl std::fmt::Display for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Site::Netflix => write!(f, "NETFLIX"),
            Site::Hotstar => write!(f, "HOTSTAR"),
        }
    }
}

/// Player actions carried over the room channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerAction {
    #[serde(rename = "play")]
    Play,
    #[serde(rename = "pause")]
    Pause,
    /// Seek to an absolute position. "skip" is the legacy alias used by the
    /// skip-forward/backward buttons.
    #[serde(rename = "seeked", alias = "skip")]
    Seek,
    #[serde(rename = "nextEpisodeTriggered")]
    NextEpisode,
    #[serde(rename = "host_left")]
    HostLeft,
}

impl PlayerAction {
    /// The name this action carries on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            PlayerAction::Play => "play",
            PlayerAction::Pause => "pause",
            PlayerAction::Seek => "seeked",
            PlayerAction::NextEpisode => "nextEpisodeTriggered",
            PlayerAction::HostLeft => "host_left",
        }
    }
}

/// Payload published under [`crate::constants::PLAYER_MESSAGE_NAME`]. The
/// sender's client identity travels in the transport envelope, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerActionMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<Site>,
    pub action: PlayerAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(rename = "logMessage", skip_serializing_if = "Option::is_none")]
    pub log_message: Option<String>,
}

impl PlayerActionMessage {
    pub fn new(site: Site, action: PlayerAction, time: f64) -> Self {
        Self {
            site: Some(site),
            action,
            time: Some(time),
            log_message: None,
        }
    }

    /// Informational message published when the host's tab goes away.
    pub fn host_left() -> Self {
        Self {
            site: None,
            action: PlayerAction::HostLeft,
            time: None,
            log_message: Some("Host has left the party.".to_string()),
        }
    }
}

/// Snapshot returned to the popup/UI for one tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopupStatus {
    pub room_id: Option<String>,
    pub is_host: bool,
    pub participant_count: usize,
}

/// Notifications pushed from the coordinator to registered UI observers.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    RoomJoined { room_id: String },
    RoomJoinFailed { room_id: String, error: String },
    HostSet { room_id: String, tab_id: u32 },
    HostSetFailed { room_id: Option<String>, reason: String },
    HostLeft { room_id: String },
    LeftRoom { room_id: String },
    ParticipantCount(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_action_wire_names() {
        let msg = PlayerActionMessage::new(Site::Netflix, PlayerAction::Play, 120.5);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["site"], "NETFLIX");
        assert_eq!(json["action"], "play");
        assert_eq!(json["time"], 120.5);
        assert!(json.get("logMessage").is_none());

        let seek = PlayerActionMessage::new(Site::Hotstar, PlayerAction::Seek, 3.0);
        let json = serde_json::to_value(&seek).unwrap();
        assert_eq!(json["action"], "seeked");
    }

    #[test]
    fn skip_is_an_alias_for_seek() {
        let msg: PlayerActionMessage =
            serde_json::from_str(r#"{"site":"HOTSTAR","action":"skip","time":42.0}"#).unwrap();
        assert_eq!(msg.action, PlayerAction::Seek);
        assert_eq!(msg.time, Some(42.0));
    }

    #[test]
    fn lowercase_site_accepted_on_input() {
        let msg: PlayerActionMessage =
            serde_json::from_str(r#"{"site":"netflix","action":"pause","time":1.0}"#).unwrap();
        assert_eq!(msg.site, Some(Site::Netflix));
    }

    #[test]
    fn host_left_omits_site_and_time() {
        let json = serde_json::to_value(PlayerActionMessage::host_left()).unwrap();
        assert_eq!(json["action"], "host_left");
        assert!(json.get("site").is_none());
        assert!(json.get("time").is_none());
        assert_eq!(json["logMessage"], "Host has left the party.");
    }
}
