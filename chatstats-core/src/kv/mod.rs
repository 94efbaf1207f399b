// chatstats-core/src/kv/mod.rs
//
// Durable per-bot sync state: the platform's common update cursor
// {pts, qts, date, seq}, per-channel pts, channel access hashes and opaque
// client session material. One file, one writer at a time, snapshot reads.
//
// Key layout: every key is prefixed with the 16-byte little-endian bot id;
// channel tables append the 16-byte little-endian channel id. Cursor values
// are 64-bit integers.

use std::path::Path;
use std::sync::Arc;

use redb::{ReadableTable, TableDefinition};

use crate::Error;

const STATE: TableDefinition<&[u8], i64> = TableDefinition::new("state");
const CHANNELS: TableDefinition<&[u8], i64> = TableDefinition::new("channels");
const CHANNEL_HASHES: TableDefinition<&[u8], i64> = TableDefinition::new("channelsHashes");
const SESSION: TableDefinition<&[u8], &[u8]> = TableDefinition::new("session");

/// The platform's common update-stream cursor. All four fields are written
/// atomically; a partial write would silently lose updates after a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncState {
    pub pts: i64,
    pub qts: i64,
    pub date: i64,
    pub seq: i64,
}

fn id16(v: i64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&(v as u64).to_le_bytes());
    key
}

fn id16_decode(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf) as i64
}

fn state_key(bot_id: i64, field: &str) -> Vec<u8> {
    let mut key = id16(bot_id).to_vec();
    key.extend_from_slice(field.as_bytes());
    key
}

fn channel_key(bot_id: i64, channel_id: i64) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(&id16(bot_id));
    key[16..].copy_from_slice(&id16(channel_id));
    key
}

/// Embedded ACID store shared by all bot sessions.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<redb::Database>,
}

impl StateStore {
    /// Open (or create) the store. All tables are created up front so that
    /// later snapshot reads never observe a missing table.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let db = redb::Database::create(path)?;
        let txn = db.begin_write()?;
        {
            txn.open_table(STATE)?;
            txn.open_table(CHANNELS)?;
            txn.open_table(CHANNEL_HASHES)?;
            txn.open_table(SESSION)?;
        }
        txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Read all four cursor fields within one snapshot. Missing any field
    /// means the bot has no recorded state yet.
    pub fn get_state(&self, bot_id: i64) -> Result<Option<SyncState>, Error> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(STATE)?;

        let mut read = |field: &str| -> Result<Option<i64>, Error> {
            Ok(table.get(state_key(bot_id, field).as_slice())?.map(|g| g.value()))
        };

        let (pts, qts, date, seq) = (read("pts")?, read("qts")?, read("date")?, read("seq")?);
        match (pts, qts, date, seq) {
            (Some(pts), Some(qts), Some(date), Some(seq)) => {
                Ok(Some(SyncState { pts, qts, date, seq }))
            }
            _ => Ok(None),
        }
    }

    /// Write all four cursor fields in a single transaction.
    pub fn set_state(&self, bot_id: i64, state: SyncState) -> Result<(), Error> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(STATE)?;
            table.insert(state_key(bot_id, "pts").as_slice(), state.pts)?;
            table.insert(state_key(bot_id, "qts").as_slice(), state.qts)?;
            table.insert(state_key(bot_id, "date").as_slice(), state.date)?;
            table.insert(state_key(bot_id, "seq").as_slice(), state.seq)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn set_fields(&self, bot_id: i64, fields: &[(&str, i64)]) -> Result<(), Error> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(STATE)?;
            // Partial updates require the state to have been initialized;
            // set_state writes all four fields together.
            if table.get(state_key(bot_id, "pts").as_slice())?.is_none() {
                return Err(Error::NotFound("sync state"));
            }
            for (field, value) in fields {
                table.insert(state_key(bot_id, field).as_slice(), *value)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn set_pts(&self, bot_id: i64, pts: i64) -> Result<(), Error> {
        self.set_fields(bot_id, &[("pts", pts)])
    }

    pub fn set_qts(&self, bot_id: i64, qts: i64) -> Result<(), Error> {
        self.set_fields(bot_id, &[("qts", qts)])
    }

    pub fn set_date(&self, bot_id: i64, date: i64) -> Result<(), Error> {
        self.set_fields(bot_id, &[("date", date)])
    }

    pub fn set_seq(&self, bot_id: i64, seq: i64) -> Result<(), Error> {
        self.set_fields(bot_id, &[("seq", seq)])
    }

    pub fn set_date_seq(&self, bot_id: i64, date: i64, seq: i64) -> Result<(), Error> {
        self.set_fields(bot_id, &[("date", date), ("seq", seq)])
    }

    pub fn get_channel_pts(&self, bot_id: i64, channel_id: i64) -> Result<Option<i64>, Error> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHANNELS)?;
        Ok(table.get(channel_key(bot_id, channel_id).as_slice())?.map(|g| g.value()))
    }

    pub fn set_channel_pts(&self, bot_id: i64, channel_id: i64, pts: i64) -> Result<(), Error> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CHANNELS)?;
            table.insert(channel_key(bot_id, channel_id).as_slice(), pts)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn delete_channel_pts(&self, bot_id: i64, channel_id: i64) -> Result<(), Error> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CHANNELS)?;
            table.remove(channel_key(bot_id, channel_id).as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Visit every tracked channel of one bot.
    pub fn for_each_channels<F>(&self, bot_id: i64, mut f: F) -> Result<(), Error>
    where
        F: FnMut(i64, i64) -> Result<(), Error>,
    {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHANNELS)?;

        let lower = channel_key(bot_id, 0);
        let mut upper = [0xffu8; 32];
        upper[..16].copy_from_slice(&id16(bot_id));

        for entry in table.range::<&[u8]>(lower.as_slice()..=upper.as_slice())? {
            let (key, value) = entry?;
            let channel_id = id16_decode(&key.value()[16..]);
            f(channel_id, value.value())?;
        }
        Ok(())
    }

    pub fn get_channel_access_hash(
        &self,
        bot_id: i64,
        channel_id: i64,
    ) -> Result<Option<i64>, Error> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHANNEL_HASHES)?;
        Ok(table.get(channel_key(bot_id, channel_id).as_slice())?.map(|g| g.value()))
    }

    pub fn set_channel_access_hash(
        &self,
        bot_id: i64,
        channel_id: i64,
        access_hash: i64,
    ) -> Result<(), Error> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CHANNEL_HASHES)?;
            table.insert(channel_key(bot_id, channel_id).as_slice(), access_hash)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Bot-scoped view over the `session` table, handed to the platform
    /// client for its opaque session material.
    pub fn session_view(&self, bot_id: i64) -> SessionView {
        SessionView { store: self.clone(), bot_id }
    }
}

/// Scoped accessor for one bot's session material.
#[derive(Clone)]
pub struct SessionView {
    store: StateStore,
    bot_id: i64,
}

impl SessionView {
    pub fn bot_id(&self) -> i64 {
        self.bot_id
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let txn = self.store.db.begin_read()?;
        let table = txn.open_table(SESSION)?;
        Ok(table
            .get(state_key(self.bot_id, key).as_slice())?
            .map(|g| g.value().to_vec()))
    }

    pub fn set(&self, key: &str, value: &[u8]) -> Result<(), Error> {
        let txn = self.store.db.begin_write()?;
        {
            let mut table = txn.open_table(SESSION)?;
            table.insert(state_key(self.bot_id, key).as_slice(), value)?;
        }
        txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn state_roundtrip_is_bit_identical() {
        let (_dir, store) = open_store();
        assert_eq!(store.get_state(42).unwrap(), None);

        let state = SyncState { pts: 1001, qts: -3, date: 1_700_000_000, seq: 77 };
        store.set_state(42, state).unwrap();
        assert_eq!(store.get_state(42).unwrap(), Some(state));

        store.set_pts(42, 1002).unwrap();
        store.set_date_seq(42, 1_700_000_100, 78).unwrap();
        let read = store.get_state(42).unwrap().unwrap();
        assert_eq!(read, SyncState { pts: 1002, qts: -3, date: 1_700_000_100, seq: 78 });
    }

    #[test]
    fn partial_update_requires_initialized_state() {
        let (_dir, store) = open_store();
        let err = store.set_pts(42, 10).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn channel_pts_delete_returns_not_found() {
        let (_dir, store) = open_store();
        store.set_channel_pts(1, 777, 500).unwrap();
        assert_eq!(store.get_channel_pts(1, 777).unwrap(), Some(500));

        store.delete_channel_pts(1, 777).unwrap();
        assert_eq!(store.get_channel_pts(1, 777).unwrap(), None);
    }

    #[test]
    fn channels_are_scoped_per_bot() {
        let (_dir, store) = open_store();
        store.set_channel_pts(1, 777, 10).unwrap();
        store.set_channel_pts(2, 777, 20).unwrap();
        store.set_channel_pts(1, 778, 11).unwrap();

        let mut seen = Vec::new();
        store
            .for_each_channels(1, |channel_id, pts| {
                seen.push((channel_id, pts));
                Ok(())
            })
            .unwrap();
        seen.sort_unstable();
        assert_eq!(seen, vec![(777, 10), (778, 11)]);
    }

    #[test]
    fn access_hash_roundtrip() {
        let (_dir, store) = open_store();
        assert_eq!(store.get_channel_access_hash(1, 777).unwrap(), None);
        store.set_channel_access_hash(1, 777, -987654321).unwrap();
        assert_eq!(store.get_channel_access_hash(1, 777).unwrap(), Some(-987654321));
    }

    #[test]
    fn session_material_is_scoped_per_bot() {
        let (_dir, store) = open_store();
        let a = store.session_view(1);
        let b = store.session_view(2);

        a.set("token", b"secret-a").unwrap();
        assert_eq!(a.get("token").unwrap(), Some(b"secret-a".to_vec()));
        assert_eq!(b.get("token").unwrap(), None);
    }
}
