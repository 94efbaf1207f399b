// chatstats-core/src/pool/mod.rs
//
// Registry of live bot sessions. Sessions fail independently; the pool only
// wires dependencies and routes add/run/stop/get_client by bot id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::dispatcher::UpdateDispatcher;
use crate::kv::StateStore;
use crate::models::EventRow;
use crate::platforms::telegram::client::{ClientFactory, PlatformClient};
use crate::platforms::telegram::gaps::GapManager;
use crate::repositories::{BotRepo, ChatMemberRepo, ChatRepo, UserRepo};
use crate::Error;

pub mod session;

pub use session::BotSession;

/// Everything a bot session needs, shared across the pool.
pub struct PoolDeps {
    pub bots: Arc<dyn BotRepo>,
    pub users: Arc<dyn UserRepo>,
    pub chats: Arc<dyn ChatRepo>,
    pub members: Arc<dyn ChatMemberRepo>,
    pub state: StateStore,
    pub events_tx: mpsc::Sender<EventRow>,
    pub factory: Arc<dyn ClientFactory>,
}

pub struct ConnectionPool {
    deps: PoolDeps,
    cancel: CancellationToken,
    sessions: Mutex<HashMap<i64, Arc<BotSession>>>,
}

impl ConnectionPool {
    pub fn new(deps: PoolDeps, cancel: CancellationToken) -> Self {
        Self { deps, cancel, sessions: Mutex::new(HashMap::new()) }
    }

    /// Instantiate the per-bot objects and register the session. Streaming
    /// starts separately via `run_bot`.
    pub async fn add_bot(&self, bot_id: i64) -> Result<(), Error> {
        let bot = self
            .deps
            .bots
            .get(bot_id)
            .await?
            .ok_or(Error::NotFound("bot"))?;

        let session_view = self.deps.state.session_view(bot_id);
        let client = self.deps.factory.create(session_view);

        let dispatcher = Arc::new(UpdateDispatcher::new(
            bot_id,
            bot.app.clone(),
            Arc::clone(&self.deps.users),
            Arc::clone(&self.deps.chats),
            Arc::clone(&self.deps.members),
            self.deps.events_tx.clone(),
        ));
        let gaps = Arc::new(GapManager::new(bot_id, self.deps.state.clone(), dispatcher));

        let session = Arc::new(BotSession::new(
            bot_id,
            client,
            gaps,
            Arc::clone(&self.deps.bots),
            self.cancel.child_token(),
        ));

        let previous = self.sessions.lock().await.insert(bot_id, session);
        if let Some(previous) = previous {
            previous.stop().await;
        }
        info!(bot_id, app = %bot.app, "bot registered");
        Ok(())
    }

    pub async fn run_bot(&self, bot_id: i64, forget: bool) -> Result<(), Error> {
        let session = self.get_session(bot_id).await?;
        session.start(forget).await;
        Ok(())
    }

    pub async fn stop_bot(&self, bot_id: i64) -> Result<(), Error> {
        let session = self.get_session(bot_id).await?;
        session.stop().await;
        Ok(())
    }

    /// Underlying platform client, for out-of-band API calls.
    pub async fn get_client(&self, bot_id: i64) -> Result<Arc<dyn PlatformClient>, Error> {
        let session = self.get_session(bot_id).await?;
        Ok(session.client())
    }

    async fn get_session(&self, bot_id: i64) -> Result<Arc<BotSession>, Error> {
        self.sessions
            .lock()
            .await
            .get(&bot_id)
            .cloned()
            .ok_or(Error::NotFound("bot"))
    }
}
