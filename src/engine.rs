use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::sleep_until;
use tracing::{debug, info, warn};

use crate::bus::{MessageBus, PublishOutcome, TabId, TabPush};
use crate::config::SyncConfig;
use crate::error::ApplyActionError;
use crate::player::SitePlayer;
use crate::protocol::{PlayerAction, PlayerActionMessage};

/// A user-initiated event observed on the local player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalPlayerEvent {
    Play,
    Pause,
    Seek,
}

impl LocalPlayerEvent {
    fn action(self) -> PlayerAction {
        match self {
            LocalPlayerEvent::Play => PlayerAction::Play,
            LocalPlayerEvent::Pause => PlayerAction::Pause,
            LocalPlayerEvent::Seek => PlayerAction::Seek,
        }
    }
}

/// How an inbound message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Our own message came back around; dropped.
    IgnoredSelf,
    /// This tab is host and does not accept remote corrections.
    IgnoredAsHost,
    /// Message targets a different streaming site.
    IgnoredWrongSite,
}

/// Callback for informational party events (currently only host departure).
pub type NoticeHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Per-tab state machine deciding which local player events get published and
/// which inbound messages get applied.
pub struct PlayerSyncEngine {
    tab_id: TabId,
    player: Arc<dyn SitePlayer>,
    bus: MessageBus,
    config: SyncConfig,
    is_host: AtomicBool,
    client_id: Mutex<Option<String>>,
    /// Up while a remote action (and its asynchronous fallout) is being
    /// applied; local events seen during this window are never published.
    applying_remote: AtomicBool,
    apply_generation: AtomicU64,
    notice: Mutex<Option<NoticeHandler>>,
}

impl PlayerSyncEngine {
    pub fn new(
        tab_id: TabId,
        player: Arc<dyn SitePlayer>,
        bus: MessageBus,
        config: SyncConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            tab_id,
            player,
            bus,
            config,
            is_host: AtomicBool::new(false),
            client_id: Mutex::new(None),
            applying_remote: AtomicBool::new(false),
            apply_generation: AtomicU64::new(0),
            notice: Mutex::new(None),
        })
    }

    pub fn set_notice_handler(&self, handler: NoticeHandler) {
        *self.notice.lock() = Some(handler);
    }

    pub fn is_host(&self) -> bool {
        self.is_host.load(Ordering::SeqCst)
    }

    /// Consume pushes from the coordinator. Fetches the client id and initial
    /// host status up front.
    pub async fn run(self: Arc<Self>, mut pushes: mpsc::UnboundedReceiver<TabPush>) {
        if let Some(client_id) = self.bus.my_client_id().await {
            *self.client_id.lock() = Some(client_id);
        }
        let status = self.bus.popup_status(self.tab_id).await;
        self.is_host.store(status.is_host, Ordering::SeqCst);

        while let Some(push) = pushes.recv().await {
            self.handle_push(push).await;
        }
    }

    pub async fn handle_push(self: &Arc<Self>, push: TabPush) {
        match push {
            TabPush::SetHostStatus { is_host } => {
                info!("Tab {}: host status is now {}", self.tab_id, is_host);
                self.is_host.store(is_host, Ordering::SeqCst);
            }
            TabPush::ClientIdNotification { client_id } => {
                debug!("Tab {}: client id is {}", self.tab_id, client_id);
                *self.client_id.lock() = Some(client_id);
            }
            TabPush::ChannelEvent {
                data,
                sender_client_id,
            } => match self.apply_remote(data, &sender_client_id).await {
                Ok(outcome) => debug!("Tab {}: inbound handled: {:?}", self.tab_id, outcome),
                Err(err) => warn!("Tab {}: failed to apply remote action: {}", self.tab_id, err),
            },
        }
    }

    pub async fn on_local_play(&self) {
        self.handle_local_event(LocalPlayerEvent::Play).await;
    }

    pub async fn on_local_pause(&self) {
        self.handle_local_event(LocalPlayerEvent::Pause).await;
    }

    pub async fn on_local_seek(&self) {
        self.handle_local_event(LocalPlayerEvent::Seek).await;
    }

    /// Outbound rule: publish only when host, and never while a remote action
    /// is being applied (that would echo the command straight back).
    pub async fn handle_local_event(&self, event: LocalPlayerEvent) {
        if self.applying_remote.load(Ordering::SeqCst) {
            debug!(
                "Tab {}: local {:?} ignored, remote action in progress",
                self.tab_id, event
            );
            return;
        }
        if !self.is_host() {
            return;
        }

        let time = match self.player.current_time() {
            Ok(time) => time,
            Err(err) => {
                warn!("Tab {}: cannot read player time: {}", self.tab_id, err);
                return;
            }
        };

        let site = self.player.site();
        let action = event.action();
        let mut message = PlayerActionMessage::new(site, action, time);
        message.log_message = Some(format!(
            "Host user initiated {} on {}. Time: {:.2}",
            action.wire_name(),
            site,
            time
        ));

        match self.bus.publish_player_action(self.tab_id, message).await {
            PublishOutcome::Published => {}
            PublishOutcome::Ignored(reason) => {
                debug!("Tab {}: publish ignored: {}", self.tab_id, reason)
            }
            PublishOutcome::Failed(err) => {
                warn!("Tab {}: publish failed: {}", self.tab_id, err)
            }
        }
    }

    /// Inbound rule, evaluated in order: self-echo, host role, site match,
    /// then apply under the applying-remote guard.
    pub async fn apply_remote(
        self: &Arc<Self>,
        message: PlayerActionMessage,
        sender_client_id: &str,
    ) -> Result<ApplyOutcome, ApplyActionError> {
        {
            let my_id = self.client_id.lock();
            if let Some(my_id) = my_id.as_deref() {
                if my_id == sender_client_id {
                    return Ok(ApplyOutcome::IgnoredSelf);
                }
            }
        }

        if self.is_host() {
            debug!(
                "Tab {}: host ignoring inbound command from {}",
                self.tab_id, sender_client_id
            );
            return Ok(ApplyOutcome::IgnoredAsHost);
        }

        if let Some(site) = message.site {
            if site != self.player.site() {
                return Ok(ApplyOutcome::IgnoredWrongSite);
            }
        }

        if message.action == PlayerAction::HostLeft {
            let text = message
                .log_message
                .unwrap_or_else(|| "Host has left the party.".to_string());
            info!("Tab {}: {}", self.tab_id, text);
            if let Some(notice) = self.notice.lock().clone() {
                notice(text);
            }
            return Ok(ApplyOutcome::Applied);
        }

        if !self.player.find_player() {
            // One re-find attempt; players appear late on dynamic pages.
            if !self.player.find_player() {
                return Err(ApplyActionError::PlayerNotFound);
            }
        }

        self.applying_remote.store(true, Ordering::SeqCst);
        let generation = self.apply_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.perform(&message);
        self.release_after_settle(generation);
        result.map(|_| ApplyOutcome::Applied)
    }

    /// Keep the guard up for the settle window, unless a newer apply has
    /// taken over in the meantime.
    fn release_after_settle(self: &Arc<Self>, generation: u64) {
        let engine = Arc::clone(self);
        // Anchor the window at apply time, not at the spawned task's first poll.
        let deadline = tokio::time::Instant::now() + self.config.settle_window;
        tokio::spawn(async move {
            sleep_until(deadline).await;
            if engine.apply_generation.load(Ordering::SeqCst) == generation {
                engine.applying_remote.store(false, Ordering::SeqCst);
            }
        });
    }

    fn perform(&self, message: &PlayerActionMessage) -> Result<(), ApplyActionError> {
        match message.action {
            PlayerAction::Play => {
                if let Some(target) = message.time {
                    let current = self.player.current_time().map_err(player_err("play"))?;
                    if (current - target).abs() > self.config.drift_threshold_secs {
                        debug!(
                            "Tab {}: adjusting time to {:.2} before play",
                            self.tab_id, target
                        );
                        self.player.seek(target).map_err(player_err("play"))?;
                    }
                }
                if self.player.is_paused().map_err(player_err("play"))? {
                    self.player.play().map_err(player_err("play"))?;
                }
                Ok(())
            }
            PlayerAction::Pause => {
                if !self.player.is_paused().map_err(player_err("pause"))? {
                    self.player.pause().map_err(player_err("pause"))?;
                }
                // The host's paused position is authoritative.
                if let Some(target) = message.time {
                    self.player.seek(target).map_err(player_err("pause"))?;
                }
                Ok(())
            }
            PlayerAction::Seek => match message.time {
                Some(target) => self.player.seek(target).map_err(player_err("seeked")),
                None => Err(ApplyActionError::Player {
                    action: "seeked",
                    reason: "missing target time".to_string(),
                }),
            },
            PlayerAction::NextEpisode => {
                if self.player.trigger_next_episode() {
                    Ok(())
                } else {
                    Err(ApplyActionError::Player {
                        action: "nextEpisodeTriggered",
                        reason: "next episode control not found".to_string(),
                    })
                }
            }
            // Handled before the guard; no playback change.
            PlayerAction::HostLeft => Ok(()),
        }
    }
}

fn player_err(action: &'static str) -> impl FnOnce(String) -> ApplyActionError {
    move |reason| ApplyActionError::Player { action, reason }
}
