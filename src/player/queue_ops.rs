use std::sync::Arc;

use crate::{
    common::PlayerResult,
    player::{
        control::{PlayOptions, PlayOutcome},
        events::PlayerEvent,
        session::Session,
    },
    protocol::{
        codec::{SerializedTrack, UserDirectory},
        tracks::Track,
    },
    queue::TrackRef,
};

impl Session {
    fn emit_added(&self, track: &Track, insert: bool) {
        if insert && self.ctx.config.no_emit_insert {
            return;
        }
        self.ctx.emit(PlayerEvent::AudioTrackAdd {
            tenant: self.tenant().clone(),
            track: track.clone(),
        });
    }

    pub async fn add(&self, track: Track) -> PlayerResult<()> {
        {
            let mut inner = self.inner.lock().await;
            inner.queue.add(track.clone())?;
            inner.cancel_leave_timer();
        }
        self.emit_added(&track, false);
        Ok(())
    }

    /// Appends all of `tracks` or none of them.
    pub async fn add_many(&self, tracks: Vec<Track>) -> PlayerResult<()> {
        if tracks.is_empty() {
            return Ok(());
        }
        {
            let mut inner = self.inner.lock().await;
            inner.queue.add_many(tracks.clone())?;
            inner.cancel_leave_timer();
        }
        self.ctx.emit(PlayerEvent::AudioTracksAdd {
            tenant: self.tenant().clone(),
            tracks,
        });
        Ok(())
    }

    pub async fn insert(&self, track: Track, index: usize) -> PlayerResult<()> {
        {
            let mut inner = self.inner.lock().await;
            inner.queue.insert(track.clone(), index)?;
            inner.cancel_leave_timer();
        }
        self.emit_added(&track, true);
        Ok(())
    }

    pub async fn remove(&self, target: impl Into<TrackRef>) -> PlayerResult<Track> {
        let track = self.inner.lock().await.queue.remove(&target.into())?;
        self.ctx.emit(PlayerEvent::AudioTrackRemove {
            tenant: self.tenant().clone(),
            track: track.clone(),
        });
        Ok(track)
    }

    pub async fn move_track(&self, from: impl Into<TrackRef>, to: usize) -> PlayerResult<()> {
        self.inner.lock().await.queue.move_track(&from.into(), to)
    }

    /// Inserts a copy of a queued track at `to`. The copy gets its own
    /// identity.
    pub async fn copy_track(&self, from: impl Into<TrackRef>, to: usize) -> PlayerResult<Track> {
        let copy = self.inner.lock().await.queue.copy_track(&from.into(), to)?;
        self.emit_added(&copy, true);
        Ok(copy)
    }

    pub async fn swap(&self, first: impl Into<TrackRef>, second: impl Into<TrackRef>) -> PlayerResult<()> {
        self.inner
            .lock()
            .await
            .queue
            .swap(&first.into(), &second.into())
    }

    /// Removes every queued track, returning them.
    pub async fn clear(&self) -> Vec<Track> {
        let removed = self.inner.lock().await.queue.clear();
        if !removed.is_empty() {
            self.ctx.emit(PlayerEvent::AudioTracksRemove {
                tenant: self.tenant().clone(),
                tracks: removed.clone(),
            });
        }
        removed
    }

    /// Moves the target to the front of the queue and skips to it.
    pub async fn jump(&self, target: impl Into<TrackRef>) -> PlayerResult<bool> {
        {
            let mut inner = self.inner.lock().await;
            let track = inner.queue.remove(&target.into())?;
            inner.queue.push_next(track)?;
        }
        Ok(self.skip().await)
    }

    /// Drops every track queued before the target, then skips so that the
    /// target plays next.
    pub async fn skip_to(&self, target: impl Into<TrackRef>) -> PlayerResult<bool> {
        let dropped = self.inner.lock().await.queue.drain_before(&target.into())?;
        if !dropped.is_empty() {
            self.ctx.emit(PlayerEvent::AudioTracksRemove {
                tenant: self.tenant().clone(),
                tracks: dropped,
            });
        }
        Ok(self.skip().await)
    }

    /// Plays the most recent history entry. With `preserve_current` the
    /// interrupted track is queued to play right after it.
    pub async fn back(self: &Arc<Self>, preserve_current: bool) -> PlayerResult<bool> {
        let (previous, requeued) = {
            let mut inner = self.inner.lock().await;
            let Some(previous) = inner.history.pop_previous() else {
                return Ok(false);
            };
            let mut requeued = None;
            if preserve_current {
                if let Some(current) = inner.current.clone() {
                    if let Err(e) = inner.queue.push_next(current.clone()) {
                        inner.history.push(previous);
                        return Err(e);
                    }
                    requeued = Some(current);
                }
            }
            (previous, requeued)
        };

        let opts = PlayOptions {
            queue: Some(false),
            ..Default::default()
        };
        match self.play(Some(previous.clone()), opts).await {
            Ok(outcome) => Ok(matches!(outcome, PlayOutcome::Started(_))),
            Err(e) => {
                let mut inner = self.inner.lock().await;
                if let Some(current) = requeued {
                    // Already dispatched if the play loop skipped ahead.
                    let _ = inner.queue.remove(&TrackRef::from(&current));
                }
                inner.history.push(previous);
                Err(e)
            }
        }
    }

    pub async fn snapshot_queue(&self) -> Vec<SerializedTrack> {
        self.inner.lock().await.queue.snapshot()
    }

    /// Appends serialized tracks; nothing is queued if any entry is invalid.
    pub async fn restore_queue(
        &self,
        data: Vec<SerializedTrack>,
        users: &dyn UserDirectory,
    ) -> PlayerResult<usize> {
        let restored = {
            let mut inner = self.inner.lock().await;
            let restored = inner.queue.restore(data, users)?;
            if !restored.is_empty() {
                inner.cancel_leave_timer();
            }
            restored
        };
        let count = restored.len();
        if count > 0 {
            self.ctx.emit(PlayerEvent::AudioTracksAdd {
                tenant: self.tenant().clone(),
                tracks: restored,
            });
        }
        Ok(count)
    }
}
