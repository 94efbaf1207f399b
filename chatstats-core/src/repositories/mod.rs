// chatstats-core/src/repositories/mod.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Bot, Chat, ChatMember, User};
use crate::Error;

pub mod postgres;

pub use postgres::{
    PostgresBotRepository, PostgresChatMemberRepository, PostgresChatRepository,
    PostgresUserRepository,
};

#[async_trait]
pub trait BotRepo: Send + Sync {
    async fn get(&self, bot_id: i64) -> Result<Option<Bot>, Error>;
    async fn upsert(&self, bot: &Bot) -> Result<(), Error>;
    async fn set_logged_in(&self, bot_id: i64, logged_in: bool) -> Result<(), Error>;
    /// Bot ids to resurrect on startup.
    async fn list_logged_in(&self) -> Result<Vec<i64>, Error>;
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn get(&self, bot_id: i64, user_id: i64) -> Result<Option<User>, Error>;
    async fn insert(&self, user: &User) -> Result<(), Error>;
    async fn update(&self, user: &User) -> Result<(), Error>;
    /// Bulk-seed rows for externally known user ids; rows that already exist
    /// are skipped, or have their action clock refreshed when `touch_existing`.
    async fn insert_missing(
        &self,
        bot_id: i64,
        user_ids: &[i64],
        ts: DateTime<Utc>,
        touch_existing: bool,
    ) -> Result<(), Error>;
}

#[async_trait]
pub trait ChatRepo: Send + Sync {
    async fn get(&self, bot_id: i64, chat_id: i64) -> Result<Option<Chat>, Error>;
    async fn insert(&self, chat: &Chat) -> Result<(), Error>;
    async fn update(&self, chat: &Chat) -> Result<(), Error>;
    /// Move a chat row to its post-migration id within one transaction:
    /// the target inherits history, the source row is removed.
    async fn migrate_chat_id(&self, bot_id: i64, old_id: i64, new_id: i64) -> Result<(), Error>;
}

#[async_trait]
pub trait ChatMemberRepo: Send + Sync {
    async fn get(&self, chat_id: i64, user_id: i64) -> Result<Option<ChatMember>, Error>;
    async fn insert(&self, member: &ChatMember) -> Result<(), Error>;
    async fn update(&self, member: &ChatMember) -> Result<(), Error>;
}
