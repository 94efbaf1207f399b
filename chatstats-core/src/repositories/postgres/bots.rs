use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::models::Bot;
use crate::repositories::BotRepo;
use crate::Error;

pub struct PostgresBotRepository {
    pool: Pool<Postgres>,
}

impl PostgresBotRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BotRepo for PostgresBotRepository {
    async fn get(&self, bot_id: i64) -> Result<Option<Bot>, Error> {
        let row = sqlx::query_as::<_, Bot>(
            r#"
            SELECT bot_id, source, app, token_hash, logged_in
            FROM bots
            WHERE bot_id = $1
            "#,
        )
        .bind(bot_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn upsert(&self, bot: &Bot) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO bots (bot_id, source, app, token_hash, logged_in)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (bot_id) DO UPDATE
              SET source = EXCLUDED.source,
                  app = EXCLUDED.app,
                  token_hash = EXCLUDED.token_hash,
                  logged_in = EXCLUDED.logged_in
            "#,
        )
        .bind(bot.bot_id)
        .bind(&bot.source)
        .bind(&bot.app)
        .bind(&bot.token_hash)
        .bind(bot.logged_in)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_logged_in(&self, bot_id: i64, logged_in: bool) -> Result<(), Error> {
        sqlx::query("UPDATE bots SET logged_in = $1 WHERE bot_id = $2")
            .bind(logged_in)
            .bind(bot_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_logged_in(&self) -> Result<Vec<i64>, Error> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT bot_id FROM bots WHERE logged_in = true ORDER BY bot_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}
