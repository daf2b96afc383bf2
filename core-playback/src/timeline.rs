//! Whole-book timeline built from ordered physical tracks.

use crate::error::{PlaybackError, Result};
use core_library::models::Track;

/// Ordered tracks of one loaded book.
///
/// Track indices are positions in the sorted list.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    tracks: Vec<Track>,
}

impl Timeline {
    /// Build a timeline, sorting tracks by `start_offset`.
    pub fn new(mut tracks: Vec<Track>) -> Result<Self> {
        if tracks.is_empty() {
            return Err(PlaybackError::InvalidTracks("no tracks".to_string()));
        }

        for track in &tracks {
            track.validate().map_err(PlaybackError::InvalidTracks)?;
        }

        tracks.sort_by(|a, b| a.start_offset.total_cmp(&b.start_offset));
        for (i, track) in tracks.iter_mut().enumerate() {
            track.index = i;
        }

        Ok(Self { tracks })
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn is_last(&self, index: usize) -> bool {
        index + 1 >= self.tracks.len()
    }

    /// End of the last track on the global timeline.
    pub fn total_duration(&self) -> f64 {
        self.tracks.last().map(Track::end_offset).unwrap_or(0.0)
    }

    /// Global position for a local position within `index`.
    pub fn global(&self, index: usize, local: f64) -> f64 {
        self.tracks
            .get(index)
            .map(|t| t.start_offset + local)
            .unwrap_or(0.0)
    }

    /// Clamp a global position into `[0, total_duration]`, mapping NaN to 0.
    pub fn clamp(&self, global: f64) -> f64 {
        if global.is_nan() {
            return 0.0;
        }
        global.clamp(0.0, self.total_duration())
    }

    /// Translate a global position into `(track index, local position)`.
    ///
    /// Linear scan. A target less than `snap` seconds before the end of a
    /// non-final track lands on the next track's start; the last track
    /// clamps to its end instead.
    pub fn locate(&self, global: f64, snap: f64) -> (usize, f64) {
        let target = self.clamp(global);
        let last = self.tracks.len() - 1;

        for (i, track) in self.tracks.iter().enumerate() {
            if target < track.end_offset() || i == last {
                let local = (target - track.start_offset).clamp(0.0, track.duration);
                if i != last && track.duration - local < snap {
                    return (i + 1, 0.0);
                }
                return (i, local);
            }
        }

        (last, self.tracks[last].duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_tracks() -> Timeline {
        Timeline::new(
            (0..3)
                .map(|i| Track {
                    index: i,
                    start_offset: i as f64 * 600.0,
                    duration: 600.0,
                    content_url: format!("/file/{}", i),
                    mime_type: None,
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_locate_inside_track() {
        let timeline = three_tracks();
        assert_eq!(timeline.locate(0.0, 0.5), (0, 0.0));
        assert_eq!(timeline.locate(1190.0, 0.5), (1, 590.0));
        assert_eq!(timeline.locate(1200.0, 0.5), (2, 0.0));
    }

    #[test]
    fn test_locate_snaps_near_track_end() {
        let timeline = three_tracks();
        let (index, local) = timeline.locate(1199.8, 0.5);
        assert_eq!(index, 2);
        assert_eq!(local, 0.0);
    }

    #[test]
    fn test_last_track_clamps_instead_of_snapping() {
        let timeline = three_tracks();
        let (index, local) = timeline.locate(1799.9, 0.5);
        assert_eq!(index, 2);
        assert!((local - 599.9).abs() < 1e-9);

        assert_eq!(timeline.locate(5000.0, 0.5), (2, 600.0));
        assert_eq!(timeline.locate(-10.0, 0.5), (0, 0.0));
        assert_eq!(timeline.locate(f64::NAN, 0.5), (0, 0.0));
    }

    #[test]
    fn test_tracks_sorted_and_reindexed() {
        let timeline = Timeline::new(vec![
            Track {
                index: 7,
                start_offset: 600.0,
                duration: 300.0,
                content_url: "/b".into(),
                mime_type: None,
            },
            Track {
                index: 3,
                start_offset: 0.0,
                duration: 600.0,
                content_url: "/a".into(),
                mime_type: None,
            },
        ])
        .unwrap();

        assert_eq!(timeline.track(0).unwrap().content_url, "/a");
        assert_eq!(timeline.track(1).unwrap().index, 1);
        assert_eq!(timeline.total_duration(), 900.0);
        assert!(timeline.is_last(1));
        assert!(!timeline.is_last(0));
    }

    #[test]
    fn test_empty_or_invalid_tracks_rejected() {
        assert!(matches!(
            Timeline::new(Vec::new()),
            Err(PlaybackError::InvalidTracks(_))
        ));

        let bad = Track {
            index: 0,
            start_offset: 0.0,
            duration: -1.0,
            content_url: "/a".into(),
            mime_type: None,
        };
        assert!(Timeline::new(vec![bad]).is_err());
    }
}
