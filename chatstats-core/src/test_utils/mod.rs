// chatstats-core/src/test_utils/mod.rs
//
// In-memory doubles for the relational repositories, the analytics sink and
// the platform client. Shared by unit tests and the integration suite.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::models::{Bot, Chat, ChatMember, EventRow, User};
use crate::platforms::telegram::client::{ClientFactory, PlatformClient};
use crate::platforms::telegram::types::{AuthStatus, AuthUser, UpdateEnvelope};
use crate::repositories::{BotRepo, ChatMemberRepo, ChatRepo, UserRepo};
use crate::sink::EventSink;
use crate::Error;

#[derive(Default, Clone)]
pub struct MemoryBotRepo {
    rows: Arc<Mutex<HashMap<i64, Bot>>>,
}

#[async_trait]
impl BotRepo for MemoryBotRepo {
    async fn get(&self, bot_id: i64) -> Result<Option<Bot>, Error> {
        Ok(self.rows.lock().await.get(&bot_id).cloned())
    }

    async fn upsert(&self, bot: &Bot) -> Result<(), Error> {
        self.rows.lock().await.insert(bot.bot_id, bot.clone());
        Ok(())
    }

    async fn set_logged_in(&self, bot_id: i64, logged_in: bool) -> Result<(), Error> {
        if let Some(bot) = self.rows.lock().await.get_mut(&bot_id) {
            bot.logged_in = logged_in;
        }
        Ok(())
    }

    async fn list_logged_in(&self) -> Result<Vec<i64>, Error> {
        let mut ids: Vec<i64> = self
            .rows
            .lock()
            .await
            .values()
            .filter(|b| b.logged_in)
            .map(|b| b.bot_id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[derive(Default, Clone)]
pub struct MemoryUserRepo {
    rows: Arc<Mutex<HashMap<(i64, i64), User>>>,
}

impl MemoryUserRepo {
    pub async fn snapshot(&self, bot_id: i64, user_id: i64) -> Option<User> {
        self.rows.lock().await.get(&(bot_id, user_id)).cloned()
    }
}

#[async_trait]
impl UserRepo for MemoryUserRepo {
    async fn get(&self, bot_id: i64, user_id: i64) -> Result<Option<User>, Error> {
        Ok(self.rows.lock().await.get(&(bot_id, user_id)).cloned())
    }

    async fn insert(&self, user: &User) -> Result<(), Error> {
        let mut rows = self.rows.lock().await;
        let key = (user.bot_id, user.user_id);
        if rows.contains_key(&key) {
            return Err(Error::DuplicateKey);
        }
        rows.insert(key, user.clone());
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<(), Error> {
        self.rows
            .lock()
            .await
            .insert((user.bot_id, user.user_id), user.clone());
        Ok(())
    }

    async fn insert_missing(
        &self,
        bot_id: i64,
        user_ids: &[i64],
        ts: DateTime<Utc>,
        touch_existing: bool,
    ) -> Result<(), Error> {
        let mut rows = self.rows.lock().await;
        for user_id in user_ids {
            match rows.get_mut(&(bot_id, *user_id)) {
                Some(existing) => {
                    if touch_existing && ts > existing.last_action_time {
                        existing.last_action_time = ts;
                    }
                }
                None => {
                    rows.insert((bot_id, *user_id), User::new(bot_id, *user_id, ts, ""));
                }
            }
        }
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct MemoryChatRepo {
    rows: Arc<Mutex<HashMap<(i64, i64), Chat>>>,
}

impl MemoryChatRepo {
    pub async fn snapshot(&self, bot_id: i64, chat_id: i64) -> Option<Chat> {
        self.rows.lock().await.get(&(bot_id, chat_id)).cloned()
    }
}

#[async_trait]
impl ChatRepo for MemoryChatRepo {
    async fn get(&self, bot_id: i64, chat_id: i64) -> Result<Option<Chat>, Error> {
        Ok(self.rows.lock().await.get(&(bot_id, chat_id)).cloned())
    }

    async fn insert(&self, chat: &Chat) -> Result<(), Error> {
        let mut rows = self.rows.lock().await;
        let key = (chat.bot_id, chat.chat_id);
        if rows.contains_key(&key) {
            return Err(Error::DuplicateKey);
        }
        rows.insert(key, chat.clone());
        Ok(())
    }

    async fn update(&self, chat: &Chat) -> Result<(), Error> {
        self.rows
            .lock()
            .await
            .insert((chat.bot_id, chat.chat_id), chat.clone());
        Ok(())
    }

    async fn migrate_chat_id(&self, bot_id: i64, old_id: i64, new_id: i64) -> Result<(), Error> {
        if old_id == new_id {
            return Ok(());
        }
        let mut rows = self.rows.lock().await;
        let old = match rows.remove(&(bot_id, old_id)) {
            Some(chat) => chat,
            None => return Ok(()),
        };

        let mut target = rows.remove(&(bot_id, new_id)).unwrap_or_else(|| {
            let mut fresh = old.clone();
            fresh.chat_id = new_id;
            fresh
        });
        target.absorb_migration(&old);
        rows.insert((bot_id, new_id), target);
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct MemoryChatMemberRepo {
    rows: Arc<Mutex<HashMap<(i64, i64), ChatMember>>>,
}

impl MemoryChatMemberRepo {
    pub async fn snapshot(&self, chat_id: i64, user_id: i64) -> Option<ChatMember> {
        self.rows.lock().await.get(&(chat_id, user_id)).cloned()
    }
}

#[async_trait]
impl ChatMemberRepo for MemoryChatMemberRepo {
    async fn get(&self, chat_id: i64, user_id: i64) -> Result<Option<ChatMember>, Error> {
        Ok(self.rows.lock().await.get(&(chat_id, user_id)).cloned())
    }

    async fn insert(&self, member: &ChatMember) -> Result<(), Error> {
        let mut rows = self.rows.lock().await;
        let key = (member.chat_id, member.user_id);
        if rows.contains_key(&key) {
            return Err(Error::DuplicateKey);
        }
        rows.insert(key, member.clone());
        Ok(())
    }

    async fn update(&self, member: &ChatMember) -> Result<(), Error> {
        self.rows
            .lock()
            .await
            .insert((member.chat_id, member.user_id), member.clone());
        Ok(())
    }
}

/// Sink that remembers every delivered batch.
#[derive(Default, Clone)]
pub struct CollectingSink {
    batches: Arc<Mutex<Vec<Vec<EventRow>>>>,
}

impl CollectingSink {
    pub async fn batches(&self) -> Vec<Vec<EventRow>> {
        self.batches.lock().await.clone()
    }

    pub async fn rows(&self) -> Vec<EventRow> {
        self.batches.lock().await.iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn insert_batch(&self, rows: &[EventRow]) -> Result<(), Error> {
        if rows.is_empty() {
            return Ok(());
        }
        self.batches.lock().await.push(rows.to_vec());
        Ok(())
    }
}

/// Sink whose first `n` flushes fail, collecting the rest.
#[derive(Clone)]
pub struct FlakySink {
    failures_left: Arc<Mutex<usize>>,
    inner: CollectingSink,
}

impl FlakySink {
    pub fn failing_first(n: usize) -> Self {
        Self { failures_left: Arc::new(Mutex::new(n)), inner: CollectingSink::default() }
    }

    pub async fn rows(&self) -> Vec<EventRow> {
        self.inner.rows().await
    }
}

#[async_trait]
impl EventSink for FlakySink {
    async fn insert_batch(&self, rows: &[EventRow]) -> Result<(), Error> {
        let mut left = self.failures_left.lock().await;
        if *left > 0 {
            *left -= 1;
            return Err(Error::Platform("sink unavailable".to_string()));
        }
        drop(left);
        self.inner.insert_batch(rows).await
    }
}

/// Platform client fed from a fixed script of envelopes; pends forever once
/// the script is exhausted, like an idle long-poll.
#[derive(Debug)]
pub struct ScriptedClient {
    pub authorized: Mutex<AuthStatus>,
    envelopes: Mutex<VecDeque<UpdateEnvelope>>,
    signed_in_with: Mutex<Option<String>>,
}

impl ScriptedClient {
    pub fn authorized_bot(bot_id: i64, envelopes: Vec<UpdateEnvelope>) -> Arc<Self> {
        Arc::new(Self {
            authorized: Mutex::new(AuthStatus {
                authorized: true,
                user: Some(AuthUser { id: bot_id, username: format!("bot{bot_id}"), bot: true }),
            }),
            envelopes: Mutex::new(envelopes.into()),
            signed_in_with: Mutex::new(None),
        })
    }

    pub fn unauthorized() -> Arc<Self> {
        Arc::new(Self {
            authorized: Mutex::new(AuthStatus { authorized: false, user: None }),
            envelopes: Mutex::new(VecDeque::new()),
            signed_in_with: Mutex::new(None),
        })
    }

    pub async fn signed_in_with(&self) -> Option<String> {
        self.signed_in_with.lock().await.clone()
    }

    pub async fn is_drained(&self) -> bool {
        self.envelopes.lock().await.is_empty()
    }
}

#[async_trait]
impl PlatformClient for ScriptedClient {
    async fn connect(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn auth_status(&self) -> Result<AuthStatus, Error> {
        Ok(self.authorized.lock().await.clone())
    }

    async fn sign_in_bot(&self, token: &str) -> Result<AuthUser, Error> {
        *self.signed_in_with.lock().await = Some(token.to_string());
        let mut status = self.authorized.lock().await;
        let user = AuthUser {
            id: crate::auth::bot_id_from_token(token)?,
            username: "scripted".to_string(),
            bot: true,
        };
        *status = AuthStatus { authorized: true, user: Some(user.clone()) };
        Ok(user)
    }

    async fn next_updates(&self) -> Result<Option<UpdateEnvelope>, Error> {
        let next = self.envelopes.lock().await.pop_front();
        match next {
            Some(envelope) => Ok(Some(envelope)),
            None => {
                // idle long-poll; the session task is expected to be
                // cancelled out of this await
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Factory handing out one pre-built scripted client for every bot.
pub struct ScriptedClientFactory {
    client: Arc<ScriptedClient>,
}

impl ScriptedClientFactory {
    pub fn new(client: Arc<ScriptedClient>) -> Self {
        Self { client }
    }
}

impl ClientFactory for ScriptedClientFactory {
    fn create(&self, _session: crate::kv::SessionView) -> Arc<dyn PlatformClient> {
        Arc::clone(&self.client) as Arc<dyn PlatformClient>
    }
}
