use std::collections::VecDeque;

use crate::protocol::tracks::Track;

/// Previously played tracks, most recent first.
#[derive(Debug, Clone)]
pub struct History {
    tracks: VecDeque<Track>,
    max_size: usize,
}

impl History {
    pub fn new(max_size: usize) -> Self {
        Self {
            tracks: VecDeque::new(),
            max_size,
        }
    }

    pub fn push(&mut self, track: Track) {
        if self.max_size == 0 {
            return;
        }
        self.tracks.push_front(track);
        self.tracks.truncate(self.max_size);
    }

    /// Takes the most recently played track.
    pub fn pop_previous(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }

    pub fn previous(&self) -> Option<&Track> {
        self.tracks.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::tracks::TrackInfo;

    fn track(title: &str) -> Track {
        Track::new(TrackInfo {
            title: title.into(),
            ..Default::default()
        })
    }

    #[test]
    fn test_bounded_most_recent_first() {
        let mut history = History::new(2);
        history.push(track("A"));
        history.push(track("B"));
        history.push(track("C"));

        let titles: Vec<_> = history.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["C", "B"]);
        assert_eq!(history.pop_previous().unwrap().title, "C");
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_zero_size_keeps_nothing() {
        let mut history = History::new(0);
        history.push(track("A"));
        assert!(history.is_empty());
    }
}
