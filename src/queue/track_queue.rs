use std::collections::VecDeque;

use crate::{
    common::{PlayerError, PlayerResult},
    configs::QueueStrategy,
    protocol::{
        codec::{SerializedTrack, UserDirectory},
        tracks::Track,
    },
};

/// Points at a queued track, by identity or by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackRef {
    Id(String),
    Index(usize),
}

impl From<&Track> for TrackRef {
    fn from(track: &Track) -> Self {
        TrackRef::Id(track.id().to_string())
    }
}

impl From<usize> for TrackRef {
    fn from(index: usize) -> Self {
        TrackRef::Index(index)
    }
}

impl From<&str> for TrackRef {
    fn from(id: &str) -> Self {
        TrackRef::Id(id.to_string())
    }
}

impl std::fmt::Display for TrackRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackRef::Id(id) => write!(f, "{}", id),
            TrackRef::Index(i) => write!(f, "#{}", i),
        }
    }
}

/// Pending tracks of one session.
///
/// Indices are 0-based from the head. With [`QueueStrategy::Fifo`] the head
/// is dispatched first, with [`QueueStrategy::Lifo`] the tail is. Every
/// mutation either succeeds completely or leaves the queue untouched.
#[derive(Debug, Clone)]
pub struct TrackQueue {
    tracks: VecDeque<Track>,
    strategy: QueueStrategy,
    max_size: Option<usize>,
}

impl TrackQueue {
    pub fn new(strategy: QueueStrategy, max_size: Option<usize>) -> Self {
        Self {
            tracks: VecDeque::new(),
            strategy,
            max_size,
        }
    }

    pub fn strategy(&self) -> QueueStrategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: QueueStrategy) {
        self.strategy = strategy;
    }

    pub fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.max_size.is_some_and(|cap| self.tracks.len() >= cap)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    pub fn to_vec(&self) -> Vec<Track> {
        self.tracks.iter().cloned().collect()
    }

    pub fn at(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tracks.iter().any(|t| t.id() == id)
    }

    /// Sum of the queued durations.
    pub fn duration_ms(&self) -> u64 {
        self.tracks.iter().map(|t| t.duration_ms).sum()
    }

    /// Position of the referenced track.
    pub fn position(&self, target: &TrackRef) -> Option<usize> {
        match target {
            TrackRef::Id(id) => self.tracks.iter().position(|t| t.id() == id),
            TrackRef::Index(i) => (*i < self.tracks.len()).then_some(*i),
        }
    }

    fn ensure_room(&self, incoming: usize) -> PlayerResult<()> {
        match self.max_size {
            Some(capacity) if self.tracks.len() + incoming > capacity => {
                Err(PlayerError::QueueCapacityExceeded { capacity })
            }
            _ => Ok(()),
        }
    }

    fn ensure_unique(&self, track: &Track) -> PlayerResult<()> {
        if self.contains(track.id()) {
            return Err(PlayerError::DuplicateTrack(track.id().to_string()));
        }
        Ok(())
    }

    fn locate(&self, target: &TrackRef) -> PlayerResult<usize> {
        self.position(target)
            .ok_or_else(|| PlayerError::TrackNotFound(target.to_string()))
    }

    pub fn add(&mut self, track: Track) -> PlayerResult<()> {
        self.ensure_unique(&track)?;
        self.ensure_room(1)?;
        self.tracks.push_back(track);
        Ok(())
    }

    /// Appends all of `tracks` or none of them.
    pub fn add_many(&mut self, tracks: Vec<Track>) -> PlayerResult<()> {
        self.ensure_room(tracks.len())?;
        for (i, track) in tracks.iter().enumerate() {
            self.ensure_unique(track)?;
            if tracks[..i].iter().any(|t| t.id() == track.id()) {
                return Err(PlayerError::DuplicateTrack(track.id().to_string()));
            }
        }
        self.tracks.extend(tracks);
        Ok(())
    }

    /// Inserts at `index` (0 ≤ index ≤ len).
    pub fn insert(&mut self, track: Track, index: usize) -> PlayerResult<()> {
        if index > self.tracks.len() {
            return Err(PlayerError::IndexOutOfRange {
                index,
                len: self.tracks.len(),
            });
        }
        self.ensure_unique(&track)?;
        self.ensure_room(1)?;
        self.tracks.insert(index, track);
        Ok(())
    }

    pub fn remove(&mut self, target: &TrackRef) -> PlayerResult<Track> {
        let index = self.locate(target)?;
        self.tracks
            .remove(index)
            .ok_or_else(|| PlayerError::TrackNotFound(target.to_string()))
    }

    /// Moves the referenced track so that it ends up at index `to`.
    pub fn move_track(&mut self, from: &TrackRef, to: usize) -> PlayerResult<()> {
        let index = self.locate(from)?;
        if to >= self.tracks.len() {
            return Err(PlayerError::IndexOutOfRange {
                index: to,
                len: self.tracks.len(),
            });
        }
        if let Some(track) = self.tracks.remove(index) {
            self.tracks.insert(to, track);
        }
        Ok(())
    }

    /// Inserts a duplicate of the referenced track, with a fresh identity,
    /// at index `to`.
    pub fn copy_track(&mut self, from: &TrackRef, to: usize) -> PlayerResult<Track> {
        let index = self.locate(from)?;
        if to > self.tracks.len() {
            return Err(PlayerError::IndexOutOfRange {
                index: to,
                len: self.tracks.len(),
            });
        }
        self.ensure_room(1)?;
        let copy = self.tracks[index].duplicate();
        self.tracks.insert(to, copy.clone());
        Ok(copy)
    }

    pub fn swap(&mut self, first: &TrackRef, second: &TrackRef) -> PlayerResult<()> {
        let a = self.locate(first)?;
        let b = self.locate(second)?;
        self.tracks.swap(a, b);
        Ok(())
    }

    pub fn clear(&mut self) -> Vec<Track> {
        self.tracks.drain(..).collect()
    }

    /// Takes the next track to play.
    pub fn dispatch(&mut self) -> Option<Track> {
        match self.strategy {
            QueueStrategy::Fifo => self.tracks.pop_front(),
            QueueStrategy::Lifo => self.tracks.pop_back(),
        }
    }

    /// Puts a track where [`TrackQueue::dispatch`] takes from next.
    pub fn push_next(&mut self, track: Track) -> PlayerResult<()> {
        self.ensure_unique(&track)?;
        self.ensure_room(1)?;
        match self.strategy {
            QueueStrategy::Fifo => self.tracks.push_front(track),
            QueueStrategy::Lifo => self.tracks.push_back(track),
        }
        Ok(())
    }

    /// Removes every track that would be dispatched before the referenced
    /// one, returning them in queue order. The target stays queued.
    pub fn drain_before(&mut self, target: &TrackRef) -> PlayerResult<Vec<Track>> {
        let index = self.locate(target)?;
        let drained = match self.strategy {
            QueueStrategy::Fifo => self.tracks.drain(..index).collect(),
            QueueStrategy::Lifo => self.tracks.drain(index + 1..).collect(),
        };
        Ok(drained)
    }

    pub fn snapshot(&self) -> Vec<SerializedTrack> {
        self.tracks.iter().map(Track::serialize).collect()
    }

    /// Appends serialized tracks. Every entry is validated before the queue
    /// is touched.
    pub fn restore(
        &mut self,
        data: Vec<SerializedTrack>,
        users: &dyn UserDirectory,
    ) -> PlayerResult<Vec<Track>> {
        let tracks = data
            .into_iter()
            .map(|t| Track::from_serialized(t, users))
            .collect::<PlayerResult<Vec<_>>>()?;
        self.add_many(tracks.clone())?;
        Ok(tracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        codec::{NoUsers, SerializedType},
        tracks::TrackInfo,
    };

    fn track(title: &str) -> Track {
        Track::new(TrackInfo {
            title: title.into(),
            author: "Artist".into(),
            duration_ms: 60_000,
            ..Default::default()
        })
    }

    fn titles(queue: &TrackQueue) -> Vec<String> {
        queue.iter().map(|t| t.title.clone()).collect()
    }

    fn ids(queue: &TrackQueue) -> Vec<String> {
        queue.iter().map(|t| t.id().to_string()).collect()
    }

    fn abc() -> TrackQueue {
        let mut queue = TrackQueue::new(QueueStrategy::Fifo, None);
        for t in ["A", "B", "C"] {
            queue.add(track(t)).unwrap();
        }
        queue
    }

    #[test]
    fn test_fifo_and_lifo_dispatch() {
        let mut queue = abc();
        assert_eq!(queue.dispatch().unwrap().title, "A");

        queue.set_strategy(QueueStrategy::Lifo);
        assert_eq!(queue.dispatch().unwrap().title, "C");
        assert_eq!(titles(&queue), vec!["B"]);
    }

    #[test]
    fn test_insert_then_remove_restores_queue() {
        let mut queue = abc();
        let before = ids(&queue);
        for index in 0..=queue.len() {
            let t = track("X");
            queue.insert(t.clone(), index).unwrap();
            assert_eq!(queue.at(index).unwrap().id(), t.id());
            queue.remove(&TrackRef::from(&t)).unwrap();
            assert_eq!(ids(&queue), before);
        }
    }

    #[test]
    fn test_move_is_reversible() {
        let mut queue = abc();
        let before = ids(&queue);
        for a in 0..3 {
            for b in 0..3 {
                queue.move_track(&TrackRef::Index(a), b).unwrap();
                queue.move_track(&TrackRef::Index(b), a).unwrap();
                assert_eq!(ids(&queue), before);
            }
        }
    }

    #[test]
    fn test_capacity_leaves_queue_unchanged() {
        let mut queue = TrackQueue::new(QueueStrategy::Fifo, Some(2));
        queue.add(track("A")).unwrap();
        queue.add(track("B")).unwrap();
        assert!(queue.is_full());

        assert!(matches!(
            queue.add(track("C")),
            Err(PlayerError::QueueCapacityExceeded { capacity: 2 })
        ));
        assert!(matches!(
            queue.insert(track("C"), 0),
            Err(PlayerError::QueueCapacityExceeded { .. })
        ));
        assert!(matches!(
            queue.copy_track(&TrackRef::Index(0), 0),
            Err(PlayerError::QueueCapacityExceeded { .. })
        ));
        assert_eq!(titles(&queue), vec!["A", "B"]);
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let mut queue = abc();
        let existing = queue.at(1).unwrap().clone();
        assert!(matches!(
            queue.add(existing.clone()),
            Err(PlayerError::DuplicateTrack(_))
        ));
        assert!(matches!(
            queue.add_many(vec![track("D"), existing]),
            Err(PlayerError::DuplicateTrack(_))
        ));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_references_and_errors() {
        let mut queue = abc();
        let b = queue.at(1).unwrap().clone();
        assert_eq!(queue.position(&TrackRef::from(&b)), Some(1));
        assert_eq!(queue.position(&TrackRef::Index(2)), Some(2));
        assert_eq!(queue.position(&TrackRef::Index(3)), None);

        assert!(matches!(
            queue.remove(&TrackRef::from("missing")),
            Err(PlayerError::TrackNotFound(_))
        ));
        assert!(matches!(
            queue.insert(track("X"), 4),
            Err(PlayerError::IndexOutOfRange { index: 4, len: 3 })
        ));
        assert!(matches!(
            queue.move_track(&TrackRef::Index(0), 3),
            Err(PlayerError::IndexOutOfRange { .. })
        ));
        assert_eq!(titles(&queue), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_copy_and_swap() {
        let mut queue = abc();
        let copy = queue.copy_track(&TrackRef::Index(0), 3).unwrap();
        assert_eq!(titles(&queue), vec!["A", "B", "C", "A"]);
        assert_ne!(copy.id(), queue.at(0).unwrap().id());

        queue.swap(&TrackRef::Index(0), &TrackRef::Index(2)).unwrap();
        assert_eq!(titles(&queue), vec!["C", "B", "A", "A"]);
    }

    #[test]
    fn test_drain_before_follows_strategy() {
        let mut queue = abc();
        let drained = queue.drain_before(&TrackRef::Index(2)).unwrap();
        assert_eq!(
            drained.iter().map(|t| t.title.as_str()).collect::<Vec<_>>(),
            vec!["A", "B"]
        );
        assert_eq!(titles(&queue), vec!["C"]);

        let mut queue = abc();
        queue.set_strategy(QueueStrategy::Lifo);
        let drained = queue.drain_before(&TrackRef::Index(0)).unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(titles(&queue), vec!["A"]);
    }

    #[test]
    fn test_push_next_is_dispatched_first() {
        let mut queue = abc();
        queue.push_next(track("N")).unwrap();
        assert_eq!(queue.dispatch().unwrap().title, "N");

        queue.set_strategy(QueueStrategy::Lifo);
        queue.push_next(track("M")).unwrap();
        assert_eq!(queue.dispatch().unwrap().title, "M");
    }

    #[test]
    fn test_restore_validates_before_touching_queue() {
        let mut queue = abc();
        let mut snapshot = queue.snapshot();
        snapshot[1].kind = SerializedType::Playlist;

        let mut target = TrackQueue::new(QueueStrategy::Fifo, None);
        target.add(track("Z")).unwrap();
        assert!(target.restore(snapshot, &NoUsers).is_err());
        assert_eq!(titles(&target), vec!["Z"]);

        let restored = target.restore(queue.snapshot(), &NoUsers).unwrap();
        assert_eq!(restored.len(), 3);
        assert_eq!(titles(&target), vec!["Z", "A", "B", "C"]);
        assert_eq!(queue.clear().len(), 3);
    }
}
