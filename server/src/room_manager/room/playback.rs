use tokio::time::Instant;

/// Authoritative playback position of a room, anchored to the server clock.
///
/// While playing, the current position is the anchored position plus the time
/// elapsed since the anchor was taken. Clients never report elapsed time.
#[derive(Debug, Clone)]
pub struct Playback {
    track_id: String,
    anchor_position: u64,
    anchored_at: Instant,
    paused: bool,
}

impl Playback {
    /// A paused playback of `track_id` at `position` milliseconds
    pub fn new(track_id: &str, position: u64) -> Self {
        Playback {
            track_id: String::from(track_id),
            anchor_position: position,
            anchored_at: Instant::now(),
            paused: true,
        }
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Current position in milliseconds
    pub fn position(&self) -> u64 {
        if self.paused {
            return self.anchor_position;
        }

        let elapsed = u64::try_from(self.anchored_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.anchor_position.saturating_add(elapsed)
    }

    pub fn play(&mut self, position: u64) {
        self.anchor(position);
        self.paused = false;
    }

    pub fn pause(&mut self, position: u64) {
        self.anchor(position);
        self.paused = true;
    }

    /// Move to `position`, keeping the paused flag as it is
    pub fn seek(&mut self, position: u64) {
        self.anchor(position);
    }

    fn anchor(&mut self, position: u64) {
        self.anchor_position = position;
        self.anchored_at = Instant::now();
    }
}
