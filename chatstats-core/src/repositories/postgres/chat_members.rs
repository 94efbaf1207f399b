use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::models::ChatMember;
use crate::repositories::ChatMemberRepo;
use crate::Error;

pub struct PostgresChatMemberRepository {
    pool: Pool<Postgres>,
}

impl PostgresChatMemberRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatMemberRepo for PostgresChatMemberRepository {
    async fn get(&self, chat_id: i64, user_id: i64) -> Result<Option<ChatMember>, Error> {
        let row = sqlx::query_as::<_, ChatMember>(
            r#"
            SELECT chat_id, user_id,
                   first_join_time, last_join_time, last_leave_time,
                   last_action_time, is_member,
                   first_join_actor_id, last_join_actor_id, last_leave_actor_id,
                   join_url
            FROM chatmembers
            WHERE chat_id = $1 AND user_id = $2
            "#,
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn insert(&self, member: &ChatMember) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO chatmembers (
                chat_id, user_id,
                first_join_time, last_join_time, last_leave_time,
                last_action_time, is_member,
                first_join_actor_id, last_join_actor_id, last_leave_actor_id,
                join_url
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(member.chat_id)
        .bind(member.user_id)
        .bind(member.first_join_time)
        .bind(member.last_join_time)
        .bind(member.last_leave_time)
        .bind(member.last_action_time)
        .bind(member.is_member)
        .bind(member.first_join_actor_id)
        .bind(member.last_join_actor_id)
        .bind(member.last_leave_actor_id)
        .bind(&member.join_url)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, member: &ChatMember) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE chatmembers
            SET last_join_time = $1,
                last_leave_time = $2,
                last_action_time = $3,
                is_member = $4,
                last_join_actor_id = $5,
                last_leave_actor_id = $6,
                join_url = $7
            WHERE chat_id = $8 AND user_id = $9
            "#,
        )
        .bind(member.last_join_time)
        .bind(member.last_leave_time)
        .bind(member.last_action_time)
        .bind(member.is_member)
        .bind(member.last_join_actor_id)
        .bind(member.last_leave_actor_id)
        .bind(&member.join_url)
        .bind(member.chat_id)
        .bind(member.user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
