//! Decides which transport status changes become progress saves.
//!
//! - Position changes are saved locally, at most once per interval.
//! - Stopping playback (pause or end of book) is a durable save, which also
//!   queues the upload.
//! - The first status seen for a book only sets the baseline.

use core_playback::PlaybackStatus;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SaveAction {
    None,
    Local,
    Durable,
}

#[derive(Debug)]
pub(crate) struct AutosavePolicy {
    interval: Duration,
    item_id: Option<String>,
    was_playing: bool,
    last_save: Option<Instant>,
    last_position: Option<f64>,
}

impl AutosavePolicy {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            item_id: None,
            was_playing: false,
            last_save: None,
            last_position: None,
        }
    }

    /// Forget the current book; the next status starts a new baseline.
    pub(crate) fn reset(&mut self) {
        self.item_id = None;
        self.was_playing = false;
        self.last_save = None;
        self.last_position = None;
    }

    pub(crate) fn observe(&mut self, item_id: &str, status: &PlaybackStatus, now: Instant) -> SaveAction {
        if self.item_id.as_deref() != Some(item_id) {
            self.item_id = Some(item_id.to_string());
            self.was_playing = status.is_playing;
            self.last_save = Some(now);
            self.last_position = Some(status.position);
            return SaveAction::None;
        }

        let stopped = self.was_playing && !status.is_playing;
        self.was_playing = status.is_playing;

        if status.duration <= 0.0 {
            return SaveAction::None;
        }

        if stopped || status.did_just_finish {
            self.mark_saved(status.position, now);
            return SaveAction::Durable;
        }

        let moved = self
            .last_position
            .map_or(true, |last| (last - status.position).abs() > f64::EPSILON);
        let due = self
            .last_save
            .map_or(true, |at| now.duration_since(at) >= self.interval);

        if moved && due {
            self.mark_saved(status.position, now);
            SaveAction::Local
        } else {
            SaveAction::None
        }
    }

    fn mark_saved(&mut self, position: f64, now: Instant) {
        self.last_save = Some(now);
        self.last_position = Some(position);
    }
}
