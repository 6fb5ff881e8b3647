use std::sync::Arc;
use tracing::warn;

use crate::transport::Channel;

/// Observer invoked with the live participant count.
pub type PresenceObserver = Arc<dyn Fn(usize) + Send + Sync>;

/// Relays channel presence changes to an observer as an integer count.
///
/// Installed once per channel join: every enter/leave/update re-fetches the
/// member list and reports its length. A failed fetch reports 0 rather than
/// leaving the observer stale.
pub struct PresenceMonitor;

impl PresenceMonitor {
    /// Replace any previously installed presence listeners on `channel` and
    /// wire `observer` to its presence events.
    pub fn install(channel: &Arc<dyn Channel>, observer: PresenceObserver) {
        channel.unsubscribe_presence();
        let chan = Arc::clone(channel);
        let obs = Arc::clone(&observer);
        channel.subscribe_presence(Arc::new(move |_event| {
            let chan = Arc::clone(&chan);
            let obs = Arc::clone(&obs);
            tokio::spawn(async move {
                Self::refresh(&chan, &obs).await;
            });
        }));
    }

    /// Fetch the current member count and report it.
    pub async fn refresh(channel: &Arc<dyn Channel>, observer: &PresenceObserver) {
        match channel.presence_members().await {
            Ok(members) => observer(members.len()),
            Err(err) => {
                warn!("Failed to fetch presence members: {}", err);
                observer(0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::LocalHub;
    use crate::transport::Transport;
    use parking_lot::Mutex;
    use tokio::time::{sleep, Duration};

    fn recording_observer() -> (PresenceObserver, Arc<Mutex<Vec<usize>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: PresenceObserver = Arc::new(move |count| {
            sink.lock().push(count);
        });
        (observer, seen)
    }

    #[tokio::test]
    async fn counts_follow_enters_and_leaves() {
        let hub = LocalHub::new();
        let a = hub.connect("client-a").await.unwrap();
        let b = hub.connect("client-b").await.unwrap();
        let ch_a = a.channel("watch-party-p");
        let ch_b = b.channel("watch-party-p");
        ch_a.attach().await.unwrap();
        ch_b.attach().await.unwrap();

        let (observer, seen) = recording_observer();
        PresenceMonitor::install(&ch_a, observer);

        ch_a.presence_enter().await.unwrap();
        sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.lock().clone(), vec![1]);

        ch_b.presence_enter().await.unwrap();
        sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.lock().last().copied(), Some(2));

        ch_b.presence_leave().await.unwrap();
        sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.lock().last().copied(), Some(1));
    }

    #[tokio::test]
    async fn fetch_failure_reports_zero() {
        let hub = LocalHub::new();
        let a = hub.connect("client-a").await.unwrap();
        let ch = a.channel("watch-party-p");
        // Never attached, so the member fetch fails.
        let (observer, seen) = recording_observer();
        PresenceMonitor::refresh(&ch, &observer).await;
        assert_eq!(seen.lock().clone(), vec![0]);
    }
}
