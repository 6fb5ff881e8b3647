use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

use watchlink::bus::MessageBus;
use watchlink::config::SyncConfig;
use watchlink::engine::PlayerSyncEngine;
use watchlink::hub::LocalHub;
use watchlink::player::{SimPlayer, SitePlayer};
use watchlink::protocol::Site;
use watchlink::room::RoomCoordinator;
use watchlink::transport::Transport;

/// One simulated extension process: a coordinator, a bus, and a single tab
/// with a player and a sync engine.
struct Participant {
    name: &'static str,
    tab_id: u32,
    bus: MessageBus,
    player: Arc<SimPlayer>,
    engine: Arc<PlayerSyncEngine>,
}

impl Participant {
    fn spawn(name: &'static str, tab_id: u32, hub: Arc<LocalHub>, config: SyncConfig) -> Self {
        let (bus, requests) = MessageBus::channel();
        let coordinator = RoomCoordinator::new(hub as Arc<dyn Transport>, bus.clone());
        tokio::spawn(coordinator.run(requests));

        let player = Arc::new(SimPlayer::new(Site::Netflix));
        let engine = PlayerSyncEngine::new(
            tab_id,
            Arc::clone(&player) as Arc<dyn SitePlayer>,
            bus.clone(),
            config,
        );
        engine.set_notice_handler(Arc::new(move |message| {
            info!("[{}] notice: {}", name, message);
        }));

        let pushes = bus.register_tab(tab_id);
        tokio::spawn(Arc::clone(&engine).run(pushes));

        Self {
            name,
            tab_id,
            bus,
            player,
            engine,
        }
    }

    async fn report(&self) {
        let status = self.bus.popup_status(self.tab_id).await;
        let time = self.player.current_time().unwrap_or(-1.0);
        let paused = self.player.is_paused().unwrap_or(true);
        info!(
            "[{}] room={:?} host={} participants={} time={:.2} paused={}",
            self.name, status.room_id, status.is_host, status.participant_count, time, paused
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "watchlink=debug,info".into()),
        )
        .init();

    let config = SyncConfig::from_env();
    let hub = LocalHub::new();

    let alice = Participant::spawn("alice", 1, Arc::clone(&hub), config.clone());
    let bob = Participant::spawn("bob", 2, Arc::clone(&hub), config.clone());

    let room = "movie-night";
    alice.bus.join_room(room).await?;
    bob.bus.join_room(room).await?;
    info!("Both participants joined {}", room);

    alice
        .bus
        .set_tab_as_host(alice.tab_id)
        .await
        .map_err(anyhow::Error::msg)?;
    sleep(Duration::from_millis(50)).await;
    info!(
        "alice is host: {} / bob is host: {}",
        alice.engine.is_host(),
        bob.engine.is_host()
    );

    // Host starts playback; bob's engine seeks to match and plays.
    alice.player.play().map_err(anyhow::Error::msg)?;
    alice.engine.on_local_play().await;
    sleep(Duration::from_millis(200)).await;
    alice.report().await;
    bob.report().await;

    // Host pauses a moment later; bob reconciles to the exact position.
    alice.player.pause().map_err(anyhow::Error::msg)?;
    alice.engine.on_local_pause().await;
    sleep(Duration::from_millis(200)).await;
    alice.report().await;
    bob.report().await;

    // Host tab closes; the room hears about it and bob gets the notice.
    alice.bus.unregister_tab(alice.tab_id);
    sleep(Duration::from_millis(200)).await;
    bob.report().await;

    Ok(())
}
