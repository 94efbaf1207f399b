use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::models::Chat;
use crate::repositories::ChatRepo;
use crate::Error;

pub struct PostgresChatRepository {
    pool: Pool<Postgres>,
}

impl PostgresChatRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

const SELECT_CHAT: &str = r#"
    SELECT bot_id, chat_id, migrated_from, chat_type,
           first_action_time, last_action_time, last_update_time,
           referer_id, can_write, was_banned
    FROM chats
    WHERE bot_id = $1 AND chat_id = $2
"#;

#[async_trait]
impl ChatRepo for PostgresChatRepository {
    async fn get(&self, bot_id: i64, chat_id: i64) -> Result<Option<Chat>, Error> {
        let row = sqlx::query_as::<_, Chat>(SELECT_CHAT)
            .bind(bot_id)
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn insert(&self, chat: &Chat) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO chats (
                bot_id, chat_id, migrated_from, chat_type,
                first_action_time, last_action_time, last_update_time,
                referer_id, can_write, was_banned
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(chat.bot_id)
        .bind(chat.chat_id)
        .bind(chat.migrated_from)
        .bind(&chat.chat_type)
        .bind(chat.first_action_time)
        .bind(chat.last_action_time)
        .bind(chat.last_update_time)
        .bind(&chat.referer_id)
        .bind(chat.can_write)
        .bind(chat.was_banned)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, chat: &Chat) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE chats
            SET chat_type = $1,
                last_action_time = $2,
                last_update_time = $3,
                can_write = $4,
                was_banned = $5
            WHERE bot_id = $6 AND chat_id = $7
            "#,
        )
        .bind(&chat.chat_type)
        .bind(chat.last_action_time)
        .bind(chat.last_update_time)
        .bind(chat.can_write)
        .bind(chat.was_banned)
        .bind(chat.bot_id)
        .bind(chat.chat_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn migrate_chat_id(&self, bot_id: i64, old_id: i64, new_id: i64) -> Result<(), Error> {
        if old_id == new_id {
            return Ok(());
        }

        let mut txn = self.pool.begin().await?;

        let old = sqlx::query_as::<_, Chat>(SELECT_CHAT)
            .bind(bot_id)
            .bind(old_id)
            .fetch_optional(&mut *txn)
            .await?;
        let old = match old {
            Some(chat) => chat,
            None => return Ok(()),
        };

        let new = sqlx::query_as::<_, Chat>(SELECT_CHAT)
            .bind(bot_id)
            .bind(new_id)
            .fetch_optional(&mut *txn)
            .await?;

        let mut target = match new {
            Some(chat) => chat,
            None => {
                let mut fresh = old.clone();
                fresh.chat_id = new_id;
                fresh
            }
        };
        target.absorb_migration(&old);

        sqlx::query(
            r#"
            INSERT INTO chats (
                bot_id, chat_id, migrated_from, chat_type,
                first_action_time, last_action_time, last_update_time,
                referer_id, can_write, was_banned
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (bot_id, chat_id) DO UPDATE
              SET migrated_from = EXCLUDED.migrated_from,
                  chat_type = EXCLUDED.chat_type,
                  first_action_time = EXCLUDED.first_action_time,
                  last_action_time = EXCLUDED.last_action_time,
                  last_update_time = EXCLUDED.last_update_time,
                  referer_id = EXCLUDED.referer_id,
                  can_write = EXCLUDED.can_write,
                  was_banned = EXCLUDED.was_banned
            "#,
        )
        .bind(target.bot_id)
        .bind(target.chat_id)
        .bind(target.migrated_from)
        .bind(&target.chat_type)
        .bind(target.first_action_time)
        .bind(target.last_action_time)
        .bind(target.last_update_time)
        .bind(&target.referer_id)
        .bind(target.can_write)
        .bind(target.was_banned)
        .execute(&mut *txn)
        .await?;

        sqlx::query("DELETE FROM chats WHERE bot_id = $1 AND chat_id = $2")
            .bind(bot_id)
            .bind(old_id)
            .execute(&mut *txn)
            .await?;

        txn.commit().await?;
        Ok(())
    }
}
