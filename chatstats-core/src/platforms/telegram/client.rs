// chatstats-core/src/platforms/telegram/client.rs
//
// Boundary to the chat platform. The wire protocol is opaque to the core:
// everything goes through `PlatformClient`, produced per bot by a
// `ClientFactory`. The production implementation talks to an update gateway
// over HTTP long-polling; session material (the bot credential) lives in the
// per-bot `session` bucket of the state store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::kv::SessionView;
use crate::platforms::telegram::types::{AuthStatus, AuthUser, UpdateEnvelope};
use crate::Error;

/// Session-bucket key holding the platform credential.
const SESSION_TOKEN_KEY: &str = "token";

/// How long the gateway may hold an idle poll open.
const POLL_TIMEOUT_SECS: u64 = 25;

#[async_trait]
pub trait PlatformClient: Send + Sync + std::fmt::Debug {
    /// Establish whatever transport state is needed before polling.
    async fn connect(&self) -> Result<(), Error>;
    async fn auth_status(&self) -> Result<AuthStatus, Error>;
    /// Authenticate with a bot token and persist the session material.
    async fn sign_in_bot(&self, token: &str) -> Result<AuthUser, Error>;
    /// Long-poll the next update envelope; `None` on an idle poll.
    async fn next_updates(&self) -> Result<Option<UpdateEnvelope>, Error>;
    async fn disconnect(&self) -> Result<(), Error>;
}

pub trait ClientFactory: Send + Sync {
    fn create(&self, session: SessionView) -> Arc<dyn PlatformClient>;
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: serde::de::DeserializeOwned"))]
struct GatewayResponse<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MeResult {
    id: i64,
    #[serde(default)]
    username: String,
    #[serde(default)]
    bot: bool,
}

/// HTTP long-polling client against the platform's update gateway.
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    api_id: i32,
    api_hash: String,
    session: SessionView,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GatewayClient {
    fn token(&self) -> Result<Option<String>, Error> {
        let raw = self.session.get(SESSION_TOKEN_KEY)?;
        match raw {
            Some(bytes) => {
                let token = String::from_utf8(bytes)
                    .map_err(|e| Error::Parse(format!("stored session token: {e}")))?;
                Ok(Some(token))
            }
            None => Ok(None),
        }
    }

    fn require_token(&self) -> Result<String, Error> {
        self.token()?
            .ok_or_else(|| Error::Auth("no session material; sign in first".to_string()))
    }

    fn method_url(&self, token: &str, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, token, method)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        method: &str,
        query: &[(&str, String)],
    ) -> Result<GatewayResponse<T>, Error> {
        let response = self
            .http
            .get(self.method_url(token, method))
            .header("X-Api-Id", self.api_id.to_string())
            .header("X-Api-Hash", self.api_hash.clone())
            .query(query)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Ok(GatewayResponse { ok: false, result: None, description: Some("unauthorized".to_string()) });
        }

        Ok(response.json::<GatewayResponse<T>>().await?)
    }
}

#[async_trait]
impl PlatformClient for GatewayClient {
    async fn connect(&self) -> Result<(), Error> {
        // The gateway transport is connectionless; polls carry the session.
        Ok(())
    }

    async fn auth_status(&self) -> Result<AuthStatus, Error> {
        let token = match self.token()? {
            Some(token) => token,
            None => return Ok(AuthStatus { authorized: false, user: None }),
        };

        let response = self.call::<MeResult>(&token, "getMe", &[]).await?;
        match response.result {
            Some(me) if response.ok => Ok(AuthStatus {
                authorized: true,
                user: Some(AuthUser { id: me.id, username: me.username, bot: me.bot }),
            }),
            _ => Ok(AuthStatus { authorized: false, user: None }),
        }
    }

    async fn sign_in_bot(&self, token: &str) -> Result<AuthUser, Error> {
        let response = self.call::<MeResult>(token, "getMe", &[]).await?;
        let me = match response.result {
            Some(me) if response.ok => me,
            _ => {
                let reason = response
                    .description
                    .unwrap_or_else(|| "token rejected by the platform".to_string());
                return Err(Error::Auth(reason));
            }
        };

        self.session.set(SESSION_TOKEN_KEY, token.as_bytes())?;
        Ok(AuthUser { id: me.id, username: me.username, bot: me.bot })
    }

    async fn next_updates(&self) -> Result<Option<UpdateEnvelope>, Error> {
        let token = self.require_token()?;
        let response = self
            .call::<UpdateEnvelope>(
                &token,
                "getUpdates",
                &[("timeout", POLL_TIMEOUT_SECS.to_string())],
            )
            .await?;

        if !response.ok {
            let reason = response
                .description
                .unwrap_or_else(|| "gateway refused the poll".to_string());
            return Err(Error::Platform(reason));
        }
        Ok(response.result)
    }

    async fn disconnect(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Builds `GatewayClient`s sharing one HTTP connection pool.
pub struct GatewayClientFactory {
    http: reqwest::Client,
    base_url: String,
    api_id: i32,
    api_hash: String,
}

impl GatewayClientFactory {
    pub fn new(base_url: &str, api_id: i32, api_hash: &str) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_id,
            api_hash: api_hash.to_string(),
        })
    }
}

impl ClientFactory for GatewayClientFactory {
    fn create(&self, session: SessionView) -> Arc<dyn PlatformClient> {
        Arc::new(GatewayClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            session,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::StateStore;
    use httpmock::prelude::*;

    fn session() -> (tempfile::TempDir, SessionView) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state.redb")).unwrap();
        let view = store.session_view(42);
        (dir, view)
    }

    #[tokio::test]
    async fn sign_in_persists_session_material() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/bot42:abc/getMe");
            then.status(200).json_body(serde_json::json!({
                "ok": true,
                "result": {"id": 42, "username": "statsbot", "bot": true}
            }));
        });

        let (_dir, view) = session();
        let factory = GatewayClientFactory::new(&server.base_url(), 1234, "hash").unwrap();
        let client = factory.create(view.clone());

        let me = client.sign_in_bot("42:abc").await.unwrap();
        assert_eq!(me.id, 42);
        assert_eq!(view.get("token").unwrap(), Some(b"42:abc".to_vec()));

        let status = client.auth_status().await.unwrap();
        assert!(status.authorized);
    }

    #[tokio::test]
    async fn rejected_token_is_an_auth_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/bot42:bad/getMe");
            then.status(200)
                .json_body(serde_json::json!({"ok": false, "description": "invalid token"}));
        });

        let (_dir, view) = session();
        let factory = GatewayClientFactory::new(&server.base_url(), 1234, "hash").unwrap();
        let client = factory.create(view);

        let err = client.sign_in_bot("42:bad").await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[tokio::test]
    async fn poll_decodes_an_envelope() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/bot42:abc/getUpdates");
            then.status(200).json_body(serde_json::json!({
                "ok": true,
                "result": {
                    "Short": {
                        "update": {"User": {"user_id": 100}},
                        "date": 1_700_000_000i64
                    }
                }
            }));
        });

        let (_dir, view) = session();
        view.set("token", b"42:abc").unwrap();
        let factory = GatewayClientFactory::new(&server.base_url(), 1234, "hash").unwrap();
        let client = factory.create(view);

        let envelope = client.next_updates().await.unwrap();
        assert!(matches!(
            envelope,
            Some(UpdateEnvelope::Short { update: crate::platforms::telegram::types::Update::User { user_id: 100 }, .. })
        ));
    }

    #[tokio::test]
    async fn unauthorized_status_reports_not_logged_in() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/bot42:abc/getMe");
            then.status(401);
        });

        let (_dir, view) = session();
        view.set("token", b"42:abc").unwrap();
        let factory = GatewayClientFactory::new(&server.base_url(), 1234, "hash").unwrap();
        let client = factory.create(view);

        let status = client.auth_status().await.unwrap();
        assert!(!status.authorized);
    }
}
