// chatstats-core/src/platforms/telegram/gaps.rs
//
// Update-sequence bookkeeping for one bot. Duplicates (stale pts/qts/seq)
// are suppressed before dispatch; forward jumps are accepted with a warning
// since remote recovery belongs to the transport. Cursors are persisted only
// after the handler has finished with the envelope, so a crash replays
// instead of losing updates.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::kv::{StateStore, SyncState};
use crate::platforms::telegram::types::{ChannelEntity, Update, UpdateEnvelope};
use crate::Error;

/// Receiver of gap-filtered envelopes; implemented by the dispatcher.
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    async fn handle(&self, envelope: &UpdateEnvelope) -> Result<(), Error>;
}

pub struct GapManager {
    bot_id: i64,
    store: StateStore,
    handler: Arc<dyn UpdateHandler>,
}

impl GapManager {
    pub fn new(bot_id: i64, store: StateStore, handler: Arc<dyn UpdateHandler>) -> Self {
        Self { bot_id, store, handler }
    }

    /// Prepare the cursor before streaming. `forget` drops the recorded
    /// position and accepts whatever arrives next (used on first
    /// registration); otherwise a missing state is seeded empty.
    pub fn run(&self, forget: bool) -> Result<(), Error> {
        if forget || self.store.get_state(self.bot_id)?.is_none() {
            self.store.set_state(self.bot_id, SyncState::default())?;
        }
        info!(bot_id = self.bot_id, forget, "gaps started");
        Ok(())
    }

    /// Feed one envelope through duplicate suppression, the handler, and
    /// cursor persistence.
    pub async fn handle(&self, envelope: &UpdateEnvelope) -> Result<(), Error> {
        let mut state = self.store.get_state(self.bot_id)?.unwrap_or_default();

        let (filtered, channels) = match envelope {
            UpdateEnvelope::Updates { updates, users, chats, channels, date, seq } => {
                if !self.seq_acceptable(&state, *seq) {
                    return Ok(());
                }
                let kept = self.filter_updates(&mut state, updates)?;
                if *date > state.date {
                    state.date = *date;
                }
                if *seq > state.seq {
                    state.seq = *seq;
                }
                (
                    UpdateEnvelope::Updates {
                        updates: kept,
                        users: users.clone(),
                        chats: chats.clone(),
                        channels: channels.clone(),
                        date: *date,
                        seq: *seq,
                    },
                    channels.clone(),
                )
            }
            UpdateEnvelope::Combined { updates, users, chats, channels, date, seq_start, seq } => {
                if !self.seq_acceptable(&state, *seq) {
                    return Ok(());
                }
                let kept = self.filter_updates(&mut state, updates)?;
                if *date > state.date {
                    state.date = *date;
                }
                if *seq > state.seq {
                    state.seq = *seq;
                }
                (
                    UpdateEnvelope::Combined {
                        updates: kept,
                        users: users.clone(),
                        chats: chats.clone(),
                        channels: channels.clone(),
                        date: *date,
                        seq_start: *seq_start,
                        seq: *seq,
                    },
                    channels.clone(),
                )
            }
            UpdateEnvelope::Short { update, date } => {
                let kept = self.filter_updates(&mut state, std::slice::from_ref(update))?;
                if kept.is_empty() {
                    return Ok(());
                }
                if *date > state.date {
                    state.date = *date;
                }
                let update = kept.into_iter().next().ok_or(Error::NotFound("update"))?;
                (UpdateEnvelope::Short { update, date: *date }, Vec::new())
            }
            UpdateEnvelope::TooLong => {
                warn!(bot_id = self.bot_id, "update stream too long; transport must re-sync");
                return Ok(());
            }
            other => (other.clone(), Vec::new()),
        };

        self.record_access_hashes(&channels)?;

        self.handler.handle(&filtered).await?;

        // Handler done; advance the cursor in one atomic write.
        self.store.set_state(self.bot_id, state)?;
        for (channel_id, pts) in Self::channel_cursors(&filtered) {
            self.store.set_channel_pts(self.bot_id, channel_id, pts)?;
        }
        Ok(())
    }

    fn seq_acceptable(&self, state: &SyncState, seq: i64) -> bool {
        if seq != 0 && seq <= state.seq {
            debug!(bot_id = self.bot_id, seq, have = state.seq, "duplicate envelope suppressed");
            return false;
        }
        true
    }

    /// Drop updates already covered by the recorded cursor; advance the
    /// in-memory cursor for the rest.
    fn filter_updates(&self, state: &mut SyncState, updates: &[Update]) -> Result<Vec<Update>, Error> {
        let mut kept = Vec::with_capacity(updates.len());
        let mut channel_cursor: HashMap<i64, i64> = HashMap::new();

        for update in updates {
            if let Some(pts) = update.common_pts() {
                if pts.pts <= state.pts {
                    debug!(bot_id = self.bot_id, pts = pts.pts, have = state.pts, "stale update suppressed");
                    continue;
                }
                if pts.pts > state.pts + pts.count {
                    warn!(bot_id = self.bot_id, pts = pts.pts, have = state.pts, "pts gap accepted");
                }
                state.pts = pts.pts;
            }
            if let Some((channel_id, pts)) = update.channel_pts() {
                let have = match channel_cursor.get(&channel_id) {
                    Some(pts) => Some(*pts),
                    None => self.store.get_channel_pts(self.bot_id, channel_id)?,
                };
                if let Some(have) = have {
                    if pts.pts <= have {
                        debug!(
                            bot_id = self.bot_id,
                            channel_id,
                            pts = pts.pts,
                            have,
                            "stale channel update suppressed"
                        );
                        continue;
                    }
                    if pts.pts > have + pts.count {
                        warn!(bot_id = self.bot_id, channel_id, pts = pts.pts, have, "channel pts gap accepted");
                    }
                }
                channel_cursor.insert(channel_id, pts.pts);
            }
            if let Some(qts) = update.qts() {
                if qts != 0 && qts <= state.qts {
                    debug!(bot_id = self.bot_id, qts, have = state.qts, "stale qts update suppressed");
                    continue;
                }
                if qts > state.qts {
                    state.qts = qts;
                }
            }
            kept.push(update.clone());
        }
        Ok(kept)
    }

    /// Channel access hashes ride along in entity sidecars and are needed to
    /// reference those peers later.
    fn record_access_hashes(&self, channels: &[ChannelEntity]) -> Result<(), Error> {
        for channel in channels {
            if let Some(hash) = channel.access_hash {
                self.store.set_channel_access_hash(self.bot_id, channel.id, hash)?;
            }
        }
        Ok(())
    }

    fn channel_cursors(envelope: &UpdateEnvelope) -> Vec<(i64, i64)> {
        let updates: Vec<&Update> = match envelope {
            UpdateEnvelope::Updates { updates, .. }
            | UpdateEnvelope::Combined { updates, .. } => updates.iter().collect(),
            UpdateEnvelope::Short { update, .. } => vec![update],
            _ => Vec::new(),
        };

        let mut cursors: HashMap<i64, i64> = HashMap::new();
        for update in updates {
            if let Some((channel_id, pts)) = update.channel_pts() {
                let entry = cursors.entry(channel_id).or_insert(pts.pts);
                if pts.pts > *entry {
                    *entry = pts.pts;
                }
            }
        }
        cursors.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::telegram::types::{Message, Peer, Pts};
    use tokio::sync::Mutex;

    struct RecordingHandler {
        seen: Mutex<Vec<UpdateEnvelope>>,
    }

    #[async_trait]
    impl UpdateHandler for RecordingHandler {
        async fn handle(&self, envelope: &UpdateEnvelope) -> Result<(), Error> {
            self.seen.lock().await.push(envelope.clone());
            Ok(())
        }
    }

    fn message_update(msg_id: i64, pts: i64) -> Update {
        Update::NewMessage {
            message: Message::Plain {
                id: msg_id,
                out: false,
                mentioned: false,
                post: false,
                edit_hide: false,
                date: 1_700_000_000,
                edit_date: None,
                via_bot_id: None,
                media: None,
                peer: Peer::User { user_id: 1 },
                from: None,
            },
            pts: Some(Pts { pts, count: 1 }),
        }
    }

    fn envelope(updates: Vec<Update>) -> UpdateEnvelope {
        UpdateEnvelope::Updates {
            updates,
            users: Vec::new(),
            chats: Vec::new(),
            channels: Vec::new(),
            date: 1_700_000_000,
            seq: 0,
        }
    }

    #[tokio::test]
    async fn duplicate_pts_is_suppressed_and_cursor_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state.redb")).unwrap();
        let handler = Arc::new(RecordingHandler { seen: Mutex::new(Vec::new()) });
        let gaps = GapManager::new(7, store.clone(), handler.clone());
        gaps.run(false).unwrap();

        gaps.handle(&envelope(vec![message_update(1, 10)])).await.unwrap();
        // same pts again: delivered envelope carries no updates
        gaps.handle(&envelope(vec![message_update(1, 10)])).await.unwrap();
        gaps.handle(&envelope(vec![message_update(2, 11)])).await.unwrap();

        let seen = handler.seen.lock().await;
        let counts: Vec<usize> = seen
            .iter()
            .map(|e| match e {
                UpdateEnvelope::Updates { updates, .. } => updates.len(),
                _ => 0,
            })
            .collect();
        assert_eq!(counts, vec![1, 0, 1]);

        let state = store.get_state(7).unwrap().unwrap();
        assert_eq!(state.pts, 11);
        assert_eq!(state.date, 1_700_000_000);
    }

    #[tokio::test]
    async fn forget_resets_the_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state.redb")).unwrap();
        store.set_state(7, SyncState { pts: 100, qts: 5, date: 50, seq: 3 }).unwrap();

        let handler = Arc::new(RecordingHandler { seen: Mutex::new(Vec::new()) });
        let gaps = GapManager::new(7, store.clone(), handler);
        gaps.run(true).unwrap();

        assert_eq!(store.get_state(7).unwrap(), Some(SyncState::default()));
    }
}
