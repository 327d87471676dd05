//! Per-identity emission cooldown.
//!
//! A person standing in front of the camera is matched on every processed
//! frame; the tracker lets at most one recognition per identity through per
//! cooldown window.

use crate::types::MatchResult;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);

/// Last-emission timestamps keyed by identity id.
///
/// Owned by a single capture session; entries are never evicted.
#[derive(Debug, Clone)]
pub struct CooldownTracker {
    window: Duration,
    last_emission: HashMap<String, Instant>,
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emission: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decide whether `identity_id` seen at `now` is a new recognition.
    ///
    /// Emits on first sighting, and again only once strictly more than the
    /// window has elapsed since the previous emission. Suppressed sightings
    /// leave the timer untouched.
    pub fn should_emit(&mut self, identity_id: &str, now: Instant) -> bool {
        let emit = match self.last_emission.get(identity_id) {
            None => true,
            Some(&last) => now.saturating_duration_since(last) > self.window,
        };
        if emit {
            self.last_emission.insert(identity_id.to_string(), now);
        }
        emit
    }

    /// Apply the cooldown to a match result. Unknown faces never emit and
    /// never touch the tracker.
    pub fn observe(&mut self, result: &MatchResult, now: Instant) -> bool {
        match result.identity_id() {
            Some(id) => self.should_emit(id, now),
            None => false,
        }
    }

    /// Number of identities emitted at least once this session.
    pub fn tracked(&self) -> usize {
        self.last_emission.len()
    }
}
