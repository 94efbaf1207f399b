// chatstats-core/src/models/mod.rs

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub mod event;
pub use event::EventRow;

/// A registered bot identity. Created by the control plane, flipped to
/// `logged_in = false` by its session when the platform rejects the auth.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Bot {
    pub bot_id: i64,
    pub source: String,
    pub app: String,
    pub token_hash: Option<Vec<u8>>,
    pub logged_in: bool,
}

/// Per-(bot, user) activity row. `session_id` starts at 1 and only grows.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub bot_id: i64,
    pub user_id: i64,
    pub first_action_time: DateTime<Utc>,
    pub last_action_time: DateTime<Utc>,
    pub referer_id: String,
    pub session_id: i16,
    pub session_referer_id: String,
}

/// Gap between two session-bearing events that starts a new session.
const SESSION_GAP: i64 = 5 * 60;

impl User {
    pub fn new(bot_id: i64, user_id: i64, ts: DateTime<Utc>, referer: &str) -> Self {
        Self {
            bot_id,
            user_id,
            first_action_time: ts,
            last_action_time: ts,
            referer_id: referer.to_string(),
            session_id: 1,
            session_referer_id: referer.to_string(),
        }
    }

    /// Advance the activity clock for a session-bearing event. Rolls the
    /// session counter when more than five minutes passed since the last
    /// action; returns whether a new session started.
    pub fn roll_session(&mut self, ts: DateTime<Utc>, referer: &str) -> bool {
        let rolled = self.last_action_time < ts - Duration::seconds(SESSION_GAP);
        if rolled {
            self.session_id += 1;
            self.session_referer_id = referer.to_string();
        }
        if ts > self.last_action_time {
            self.last_action_time = ts;
        }
        rolled
    }
}

/// Per-(bot, chat) row. `last_update_time` guards the mutable attributes:
/// `chat_type`, `can_write` and `was_banned` only move forward in time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Chat {
    pub bot_id: i64,
    pub chat_id: i64,
    pub migrated_from: i64,
    pub chat_type: String,
    pub first_action_time: DateTime<Utc>,
    pub last_action_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    pub referer_id: String,
    pub can_write: bool,
    pub was_banned: bool,
}

impl Chat {
    pub fn new(
        bot_id: i64,
        chat_id: i64,
        ts: DateTime<Utc>,
        chat_type: &str,
        can_write: bool,
        ban: bool,
        referer: &str,
    ) -> Self {
        Self {
            bot_id,
            chat_id,
            migrated_from: 0,
            chat_type: chat_type.to_string(),
            first_action_time: ts,
            last_action_time: ts,
            last_update_time: ts,
            referer_id: referer.to_string(),
            can_write,
            was_banned: ban,
        }
    }

    /// Fold one observed event into the row. Attribute changes are rejected
    /// when the event is older than the last applied update; the action
    /// clock always moves to the latest observed timestamp.
    pub fn apply_observation(
        &mut self,
        ts: DateTime<Utc>,
        chat_type: &str,
        can_write: bool,
        ban: bool,
    ) {
        if ts > self.last_action_time {
            self.last_action_time = ts;
        }
        if ts >= self.last_update_time && !chat_type.is_empty() && self.chat_type != chat_type {
            self.chat_type = chat_type.to_string();
            self.last_update_time = ts;
        }
        if ts >= self.last_update_time && (can_write || ban) {
            self.can_write = !ban && (self.can_write || can_write);
            self.was_banned = self.was_banned || ban;
            self.last_update_time = ts;
        }
    }

    /// Carry identity and history from the pre-migration row. Action and
    /// update clocks of an already-known target row are left alone.
    pub fn absorb_migration(&mut self, old: &Chat) {
        self.migrated_from = old.chat_id;
        self.first_action_time = old.first_action_time;
        self.referer_id = old.referer_id.clone();
        self.can_write = old.can_write;
        self.was_banned = old.was_banned;
    }
}

/// Per-(chat, user) membership row. Join/leave transitions are applied only
/// when not older than both recorded transition times (`can_apply`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatMember {
    pub chat_id: i64,
    pub user_id: i64,
    pub first_join_time: Option<DateTime<Utc>>,
    pub last_join_time: Option<DateTime<Utc>>,
    pub last_leave_time: Option<DateTime<Utc>>,
    pub last_action_time: DateTime<Utc>,
    pub is_member: bool,
    pub first_join_actor_id: i64,
    pub last_join_actor_id: i64,
    pub last_leave_actor_id: i64,
    pub join_url: String,
}

impl ChatMember {
    /// First sighting of this member. With neither flag set, membership is
    /// inferred from the fact that they acted inside the chat.
    pub fn new(
        chat_id: i64,
        user_id: i64,
        ts: DateTime<Utc>,
        join: bool,
        leave: bool,
        join_url: &str,
        actor_id: i64,
    ) -> Self {
        let mut member = Self {
            chat_id,
            user_id,
            first_join_time: None,
            last_join_time: None,
            last_leave_time: None,
            last_action_time: ts,
            is_member: true,
            first_join_actor_id: 0,
            last_join_actor_id: 0,
            last_leave_actor_id: 0,
            join_url: String::new(),
        };
        if join {
            member.first_join_time = Some(ts);
            member.last_join_time = Some(ts);
            member.join_url = join_url.to_string();
            member.first_join_actor_id = actor_id;
            member.last_join_actor_id = actor_id;
            member.is_member = !leave;
        } else if leave {
            member.last_leave_time = Some(ts);
            member.last_leave_actor_id = actor_id;
            member.is_member = false;
        }
        member
    }

    /// Apply a join/leave transition to a known member. Stale events (older
    /// than either recorded transition) only touch the action clock.
    pub fn apply_transition(
        &mut self,
        ts: DateTime<Utc>,
        join: bool,
        leave: bool,
        join_url: &str,
        actor_id: i64,
    ) {
        let can_apply_join = self.last_join_time.map_or(true, |t| ts >= t);
        let can_apply_leave = self.last_leave_time.map_or(true, |t| ts >= t);
        let can_apply = can_apply_join && can_apply_leave;

        if can_apply && join {
            self.last_join_time = Some(ts);
            self.last_join_actor_id = actor_id;
            self.is_member = true;
            if self.join_url.is_empty() {
                self.join_url = join_url.to_string();
            }
        }
        if can_apply && leave {
            self.last_leave_time = Some(ts);
            self.last_leave_actor_id = actor_id;
            self.is_member = false;
        }
        if ts > self.last_action_time {
            self.last_action_time = ts;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn session_rolls_only_after_five_minute_gap() {
        let mut user = User::new(1, 100, ts(0), "");
        assert_eq!(user.session_id, 1);

        assert!(!user.roll_session(ts(300), "ref-a"));
        assert_eq!(user.session_id, 1);

        assert!(user.roll_session(ts(300 + 301), "ref-b"));
        assert_eq!(user.session_id, 2);
        assert_eq!(user.session_referer_id, "ref-b");
        assert!(user.first_action_time <= user.last_action_time);
    }

    #[test]
    fn session_id_never_decreases_under_stale_events() {
        let mut user = User::new(1, 100, ts(1000), "");
        user.roll_session(ts(2000), "");
        let session = user.session_id;
        user.roll_session(ts(500), "");
        assert!(user.session_id >= session);
        assert!(user.first_action_time <= user.last_action_time);
    }

    #[test]
    fn chat_type_changes_only_forward_in_time() {
        let mut chat = Chat::new(1, 7, ts(100), "group", false, false, "");
        chat.apply_observation(ts(50), "supergroup", false, false);
        assert_eq!(chat.chat_type, "group");

        chat.apply_observation(ts(150), "supergroup", false, false);
        assert_eq!(chat.chat_type, "supergroup");
        assert_eq!(chat.last_update_time, ts(150));
        assert!(chat.first_action_time <= chat.last_update_time);
        assert!(chat.last_update_time <= chat.last_action_time);
    }

    #[test]
    fn was_banned_is_monotone() {
        let mut chat = Chat::new(1, 7, ts(0), "private", true, false, "");
        chat.apply_observation(ts(10), "", false, true);
        assert!(chat.was_banned);
        assert!(!chat.can_write);

        chat.apply_observation(ts(20), "", true, false);
        assert!(chat.was_banned, "ban flag must not reset");
        assert!(chat.can_write);
    }

    #[test]
    fn stale_join_is_rejected() {
        // join at T2, stale join at T1 < T2, leave at T3 > T2
        let mut member = ChatMember::new(7, 100, ts(200), true, false, "", 0);
        member.apply_transition(ts(100), true, false, "", 5);
        assert_eq!(member.first_join_time, Some(ts(200)));
        assert_eq!(member.last_join_time, Some(ts(200)));

        member.apply_transition(ts(300), false, true, "", 0);
        assert_eq!(member.last_leave_time, Some(ts(300)));
        assert!(!member.is_member);
        assert_eq!(member.last_action_time, ts(300));
    }

    #[test]
    fn join_url_is_write_once() {
        let mut member = ChatMember::new(7, 100, ts(0), true, false, "joinchat/abc", 1);
        member.apply_transition(ts(10), true, false, "joinchat/other", 1);
        assert_eq!(member.join_url, "joinchat/abc");
    }

    #[test]
    fn member_inferred_from_in_chat_activity() {
        let member = ChatMember::new(7, 100, ts(0), false, false, "", 0);
        assert!(member.is_member);
        assert!(member.first_join_time.is_none());
    }
}
