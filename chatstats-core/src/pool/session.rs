// chatstats-core/src/pool/session.rs
//
// One long-lived task per bot: connect, verify auth, stream updates through
// the gap manager, retry with a backoff on transient failures. Auth
// rejection flips the relational `logged_in` flag and ends the session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::platforms::telegram::client::PlatformClient;
use crate::platforms::telegram::gaps::GapManager;
use crate::repositories::BotRepo;
use crate::Error;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

pub struct BotSession {
    bot_id: i64,
    client: Arc<dyn PlatformClient>,
    gaps: Arc<GapManager>,
    bots: Arc<dyn BotRepo>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BotSession {
    pub fn new(
        bot_id: i64,
        client: Arc<dyn PlatformClient>,
        gaps: Arc<GapManager>,
        bots: Arc<dyn BotRepo>,
        cancel: CancellationToken,
    ) -> Self {
        Self { bot_id, client, gaps, bots, cancel, handle: Mutex::new(None) }
    }

    pub fn client(&self) -> Arc<dyn PlatformClient> {
        Arc::clone(&self.client)
    }

    /// Spawn the streaming task. `forget` applies to the first connection
    /// only; reconnects resume from the recorded cursor.
    pub async fn start(self: Arc<Self>, forget: bool) {
        let mut guard = self.handle.lock().await;
        if guard.as_ref().is_some_and(|h| !h.is_finished()) {
            info!(bot_id = self.bot_id, "session already running");
            return;
        }

        let session = Arc::clone(&self);
        *guard = Some(tokio::spawn(async move {
            session.run_loop(forget).await;
        }));
    }

    /// Cancel the session and wait for its task to finish.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(bot_id = self.bot_id, "session task join error: {e}");
            }
        }
        info!(bot_id = self.bot_id, "session stopped");
    }

    async fn run_loop(&self, forget: bool) {
        let mut forget = forget;
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            match self.run_once(forget).await {
                Ok(()) => return,
                Err(Error::Auth(reason)) => {
                    error!(bot_id = self.bot_id, "session ended: {reason}");
                    if let Err(e) = self.bots.set_logged_in(self.bot_id, false).await {
                        error!(bot_id = self.bot_id, "failed to record logged_in=false: {e}");
                    }
                    return;
                }
                Err(e) => {
                    error!(bot_id = self.bot_id, "session error, reconnecting: {e}");
                }
            }
            forget = false;
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = sleep(RECONNECT_BACKOFF) => {}
            }
        }
    }

    async fn run_once(&self, forget: bool) -> Result<(), Error> {
        self.client.connect().await?;

        let status = self.client.auth_status().await?;
        if !status.authorized {
            return Err(Error::Auth("bot not authorized; log it in first".to_string()));
        }
        if let Some(user) = &status.user {
            info!(bot_id = self.bot_id, username = %user.username, "bot login restored");
        }

        self.gaps.run(forget)?;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    if let Err(e) = self.client.disconnect().await {
                        warn!(bot_id = self.bot_id, "disconnect error: {e}");
                    }
                    return Ok(());
                }
                polled = self.client.next_updates() => {
                    match polled? {
                        Some(envelope) => {
                            // Per-envelope failures are logged and the stream
                            // keeps going; the cursor was not advanced, so the
                            // platform may redeliver.
                            if let Err(e) = self.gaps.handle(&envelope).await {
                                error!(bot_id = self.bot_id, "envelope dispatch failed: {e}");
                            }
                        }
                        None => {} // idle poll
                    }
                }
            }
        }
    }
}
