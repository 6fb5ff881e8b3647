use parking_lot::Mutex;
use std::time::Instant;

use crate::protocol::Site;

/// Per-site player capability. A real deployment backs this with the site's
/// DOM (locating the `<video>` element, clicking the next-episode control);
/// [`SimPlayer`] backs it with a clock for the demo binary and tests.
pub trait SitePlayer: Send + Sync {
    fn site(&self) -> Site;

    /// Locate (or re-locate) the player element. Returns false when no usable
    /// player is available yet.
    fn find_player(&self) -> bool;

    fn play(&self) -> Result<(), String>;
    fn pause(&self) -> Result<(), String>;
    /// Seek to an absolute position in seconds.
    fn seek(&self, seconds: f64) -> Result<(), String>;
    fn current_time(&self) -> Result<f64, String>;
    fn is_paused(&self) -> Result<bool, String>;

    /// Trigger the site's next-episode control. Returns false when the
    /// control could not be found.
    fn trigger_next_episode(&self) -> bool;
}

/// In-memory player that advances its position with wall-clock time while
/// playing.
pub struct SimPlayer {
    site: Site,
    state: Mutex<SimState>,
}

struct SimState {
    loaded: bool,
    paused: bool,
    position: f64,
    resumed_at: Option<Instant>,
    episode: u32,
}

impl SimPlayer {
    pub fn new(site: Site) -> Self {
        Self {
            site,
            state: Mutex::new(SimState {
                loaded: true,
                paused: true,
                position: 0.0,
                resumed_at: None,
                episode: 1,
            }),
        }
    }

    /// A player whose element has not been located yet; `find_player` loads
    /// it on the first call, mirroring the deferred DOM lookup.
    pub fn unloaded(site: Site) -> Self {
        let player = Self::new(site);
        player.state.lock().loaded = false;
        player
    }

    pub fn episode(&self) -> u32 {
        self.state.lock().episode
    }
}

impl SimState {
    fn position_now(&self) -> f64 {
        match self.resumed_at {
            Some(resumed) if !self.paused => self.position + resumed.elapsed().as_secs_f64(),
            _ => self.position,
        }
    }

    fn ensure_loaded(&self) -> Result<(), String> {
        if self.loaded {
            Ok(())
        } else {
            Err("no media loaded".to_string())
        }
    }
}

impl SitePlayer for SimPlayer {
    fn site(&self) -> Site {
        self.site
    }

    fn find_player(&self) -> bool {
        let mut state = self.state.lock();
        state.loaded = true;
        state.loaded
    }

    fn play(&self) -> Result<(), String> {
        let mut state = self.state.lock();
        state.ensure_loaded()?;
        if state.paused {
            state.paused = false;
            state.resumed_at = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&self) -> Result<(), String> {
        let mut state = self.state.lock();
        state.ensure_loaded()?;
        if !state.paused {
            state.position = state.position_now();
            state.paused = true;
            state.resumed_at = None;
        }
        Ok(())
    }

    fn seek(&self, seconds: f64) -> Result<(), String> {
        let mut state = self.state.lock();
        state.ensure_loaded()?;
        state.position = seconds.max(0.0);
        if !state.paused {
            state.resumed_at = Some(Instant::now());
        }
        Ok(())
    }

    fn current_time(&self) -> Result<f64, String> {
        let state = self.state.lock();
        state.ensure_loaded()?;
        Ok(state.position_now())
    }

    fn is_paused(&self) -> Result<bool, String> {
        let state = self.state.lock();
        state.ensure_loaded()?;
        Ok(state.paused)
    }

    fn trigger_next_episode(&self) -> bool {
        let mut state = self.state.lock();
        if !state.loaded {
            return false;
        }
        state.episode += 1;
        state.position = 0.0;
        state.paused = true;
        state.resumed_at = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_and_pause_reconcile_position() {
        let player = SimPlayer::new(Site::Netflix);
        player.seek(42.0).unwrap();
        assert!(player.is_paused().unwrap());
        assert_eq!(player.current_time().unwrap(), 42.0);

        player.play().unwrap();
        player.pause().unwrap();
        assert!(player.current_time().unwrap() >= 42.0);
    }

    #[test]
    fn next_episode_resets_position() {
        let player = SimPlayer::new(Site::Hotstar);
        player.seek(1000.0).unwrap();
        assert!(player.trigger_next_episode());
        assert_eq!(player.episode(), 2);
        assert_eq!(player.current_time().unwrap(), 0.0);
    }

    #[test]
    fn unloaded_player_errors_until_found() {
        let player = SimPlayer::unloaded(Site::Netflix);
        assert!(player.play().is_err());
        assert!(player.find_player());
        assert!(player.play().is_ok());
    }
}
