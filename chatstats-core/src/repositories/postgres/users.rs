use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::models::User;
use crate::repositories::UserRepo;
use crate::Error;

pub struct PostgresUserRepository {
    pool: Pool<Postgres>,
}

impl PostgresUserRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepo for PostgresUserRepository {
    async fn get(&self, bot_id: i64, user_id: i64) -> Result<Option<User>, Error> {
        let row = sqlx::query_as::<_, User>(
            r#"
            SELECT bot_id, user_id,
                   first_action_time, last_action_time,
                   referer_id, session_id, session_referer_id
            FROM users
            WHERE bot_id = $1 AND user_id = $2
            "#,
        )
        .bind(bot_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn insert(&self, user: &User) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO users (
                bot_id, user_id,
                first_action_time, last_action_time,
                referer_id, session_id, session_referer_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.bot_id)
        .bind(user.user_id)
        .bind(user.first_action_time)
        .bind(user.last_action_time)
        .bind(&user.referer_id)
        .bind(user.session_id)
        .bind(&user.session_referer_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, user: &User) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET last_action_time = $1,
                session_id = $2,
                session_referer_id = $3
            WHERE bot_id = $4 AND user_id = $5
            "#,
        )
        .bind(user.last_action_time)
        .bind(user.session_id)
        .bind(&user.session_referer_id)
        .bind(user.bot_id)
        .bind(user.user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_missing(
        &self,
        bot_id: i64,
        user_ids: &[i64],
        ts: DateTime<Utc>,
        touch_existing: bool,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO users (
                bot_id, user_id,
                first_action_time, last_action_time,
                referer_id, session_id, session_referer_id
            )
            SELECT $1, uid, $3, $3, '', 1, ''
            FROM unnest($2::bigint[]) AS uid
            ON CONFLICT (bot_id, user_id) DO NOTHING
            "#,
        )
        .bind(bot_id)
        .bind(user_ids)
        .bind(ts)
        .execute(&self.pool)
        .await?;

        if touch_existing {
            sqlx::query(
                r#"
                UPDATE users
                SET last_action_time = GREATEST(last_action_time, $3)
                WHERE bot_id = $1 AND user_id = ANY($2)
                "#,
            )
            .bind(bot_id)
            .bind(user_ids)
            .bind(ts)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }
}
