// chatstats-core/src/auth.rs
//
// Bot-token authentication against the platform. Tokens are never persisted
// in the relational store; only a salted hash is.

use sha2::{Digest, Sha256};
use tracing::info;

use crate::kv::SessionView;
use crate::platforms::telegram::client::ClientFactory;
use crate::Error;

/// SHA-256 over token ‖ salt; stored in the Bot row instead of the token.
pub fn hash_token(token: &str, salt: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.update(salt.as_bytes());
    hasher.finalize().to_vec()
}

/// The numeric bot identity is the part of the token before ':'.
pub fn bot_id_from_token(token: &str) -> Result<i64, Error> {
    let id = token.split(':').next().unwrap_or("");
    id.parse::<i64>()
        .map_err(|_| Error::Parse("invalid token: bot id is not an integer".to_string()))
}

/// Transiently connect and authenticate a bot. When the session is already
/// authorized and `force` is unset, nothing happens; otherwise the token is
/// exchanged and the session material persisted under the bot's bucket.
pub async fn login_bot(
    factory: &dyn ClientFactory,
    session: SessionView,
    token: &str,
    force: bool,
) -> Result<(), Error> {
    let bot_id = session.bot_id();
    let client = factory.create(session);

    client.connect().await?;

    let status = client.auth_status().await?;
    if status.authorized && !force {
        info!(bot_id, "bot already authorized");
        client.disconnect().await?;
        return Ok(());
    }

    let user = client.sign_in_bot(token).await?;

    let status = client.auth_status().await?;
    if !status.authorized {
        client.disconnect().await?;
        return Err(Error::Auth("not authorized after login".to_string()));
    }

    info!(bot_id, username = %user.username, "bot login succeeded");
    client.disconnect().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_hash_is_salted() {
        let a = hash_token("42:abc", "salt-1");
        let b = hash_token("42:abc", "salt-2");
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert_eq!(a, hash_token("42:abc", "salt-1"));
    }

    #[test]
    fn bot_id_is_the_token_prefix() {
        assert_eq!(bot_id_from_token("1264915325:AAFxyz").unwrap(), 1264915325);
        assert!(bot_id_from_token("not-a-token").is_err());
        assert!(bot_id_from_token("").is_err());
    }
}
