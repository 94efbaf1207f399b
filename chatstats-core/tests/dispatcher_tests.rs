// End-to-end dispatcher scenarios over in-memory repositories.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use chatstats_core::dispatcher::UpdateDispatcher;
use chatstats_core::models::{Chat, EventRow};
use chatstats_core::platforms::telegram::types::{
    ChatInvite, Message, MessageAction, Participant, Peer, Update, UpdateEnvelope, UserEntity,
};
use chatstats_core::repositories::ChatRepo;
use chatstats_core::test_utils::{MemoryChatMemberRepo, MemoryChatRepo, MemoryUserRepo};
use chatstats_core::Error;

const BOT_ID: i64 = 999;

struct Harness {
    dispatcher: UpdateDispatcher,
    users: MemoryUserRepo,
    chats: MemoryChatRepo,
    members: MemoryChatMemberRepo,
    events_rx: mpsc::Receiver<EventRow>,
}

fn harness() -> Harness {
    let users = MemoryUserRepo::default();
    let chats = MemoryChatRepo::default();
    let members = MemoryChatMemberRepo::default();
    let (tx, rx) = mpsc::channel(64);

    let dispatcher = UpdateDispatcher::new(
        BOT_ID,
        "testapp".to_string(),
        Arc::new(users.clone()),
        Arc::new(chats.clone()),
        Arc::new(members.clone()),
        tx,
    );

    Harness { dispatcher, users, chats, members, events_rx: rx }
}

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn plain_message(peer: Peer, date_offset: i64) -> Message {
    Message::Plain {
        id: 10,
        out: false,
        mentioned: false,
        post: false,
        edit_hide: false,
        date: ts(date_offset).timestamp(),
        edit_date: None,
        via_bot_id: None,
        media: None,
        peer,
        from: None,
    }
}

fn envelope(updates: Vec<Update>) -> UpdateEnvelope {
    UpdateEnvelope::Updates {
        updates,
        users: Vec::new(),
        chats: Vec::new(),
        channels: Vec::new(),
        date: 0,
        seq: 0,
    }
}

#[tokio::test]
async fn first_seen_user_gets_session_one() {
    let mut h = harness();

    let env = envelope(vec![Update::NewMessage {
        message: plain_message(Peer::User { user_id: 100 }, 0),
        pts: None,
    }]);
    h.dispatcher.handle(&env).await.unwrap();

    let event = h.events_rx.recv().await.unwrap();
    assert_eq!(event.event_type, "raw");
    assert_eq!(event.event_subtype, "NewMessage");
    assert_eq!(event.user_id, 100);
    assert_eq!(event.chat_id, 100);
    assert_eq!(event.chat_type, "private");
    assert_eq!(event.session_id, 1);
    assert_eq!(event.user_created_at, Some(ts(0).timestamp_millis()));
    assert_eq!(event.timestamp, ts(0).timestamp_millis());

    let user = h.users.snapshot(BOT_ID, 100).await.unwrap();
    assert_eq!(user.first_action_time, ts(0));
    assert_eq!(user.last_action_time, ts(0));
    assert_eq!(user.session_id, 1);

    let chat = h.chats.snapshot(BOT_ID, 100).await.unwrap();
    assert_eq!(chat.chat_type, "private");
    assert!(chat.can_write);
}

#[tokio::test]
async fn session_rolls_over_after_five_minutes() {
    let mut h = harness();

    for offset in [0, 301] {
        let env = envelope(vec![Update::NewMessage {
            message: plain_message(Peer::User { user_id: 100 }, offset),
            pts: None,
        }]);
        h.dispatcher.handle(&env).await.unwrap();
    }

    let first = h.events_rx.recv().await.unwrap();
    let second = h.events_rx.recv().await.unwrap();
    assert_eq!(first.session_id, 1);
    assert_eq!(second.session_id, 2);

    let user = h.users.snapshot(BOT_ID, 100).await.unwrap();
    assert_eq!(user.session_id, 2);
    assert_eq!(user.last_action_time, ts(301));
}

#[tokio::test]
async fn language_is_copied_from_the_entity_sidecar() {
    let mut h = harness();

    let env = UpdateEnvelope::Updates {
        updates: vec![Update::NewMessage {
            message: plain_message(Peer::User { user_id: 100 }, 0),
            pts: None,
        }],
        users: vec![UserEntity { id: 100, bot: false, lang_code: Some("de".to_string()) }],
        chats: Vec::new(),
        channels: Vec::new(),
        date: 0,
        seq: 0,
    };
    h.dispatcher.handle(&env).await.unwrap();

    let event = h.events_rx.recv().await.unwrap();
    assert_eq!(event.language, "de");
}

#[tokio::test]
async fn passive_channel_noise_is_not_ingested() {
    let mut h = harness();

    let env = envelope(vec![Update::NewChannelMessage {
        message: plain_message(Peer::Channel { channel_id: 777 }, 0),
        pts: None,
    }]);
    h.dispatcher.handle(&env).await.unwrap();

    assert!(h.events_rx.try_recv().is_err(), "no event for passive broadcast");

    // fallthrough still refreshed the chat row
    let chat = h.chats.snapshot(BOT_ID, 777).await.unwrap();
    assert_eq!(chat.last_action_time, ts(0));
    assert!(!chat.can_write);
}

#[tokio::test]
async fn chat_migration_carries_history() {
    let h = harness();

    let old = Chat::new(BOT_ID, -100, ts(0), "group", true, false, "ref-0");
    h.chats.insert(&old).await.unwrap();

    let env = envelope(vec![Update::NewMessage {
        message: Message::Service {
            id: 11,
            out: false,
            mentioned: false,
            date: ts(50).timestamp(),
            action: MessageAction::ChatMigrateTo { channel_id: 555 },
            peer: Peer::Chat { chat_id: -100 },
            from: Some(Peer::User { user_id: 100 }),
        },
        pts: None,
    }]);
    h.dispatcher.handle(&env).await.unwrap();

    assert!(h.chats.snapshot(BOT_ID, -100).await.is_none(), "old row removed");
    let migrated = h.chats.snapshot(BOT_ID, 555).await.unwrap();
    assert_eq!(migrated.migrated_from, -100);
    assert_eq!(migrated.first_action_time, ts(0));
    assert_eq!(migrated.referer_id, "ref-0");
}

#[tokio::test]
async fn bot_stopped_and_restarted_keeps_ban_flag() {
    let h = harness();

    let stopped = envelope(vec![Update::BotStopped {
        user_id: 100,
        date: ts(10).timestamp(),
        stopped: true,
        qts: None,
    }]);
    h.dispatcher.handle(&stopped).await.unwrap();

    let chat = h.chats.snapshot(BOT_ID, 100).await.unwrap();
    assert!(!chat.can_write);
    assert!(chat.was_banned);

    let restarted = envelope(vec![Update::BotStopped {
        user_id: 100,
        date: ts(20).timestamp(),
        stopped: false,
        qts: None,
    }]);
    h.dispatcher.handle(&restarted).await.unwrap();

    let chat = h.chats.snapshot(BOT_ID, 100).await.unwrap();
    assert!(chat.can_write);
    assert!(chat.was_banned, "ban flag is monotone");
}

#[tokio::test]
async fn out_of_order_join_leave_is_guarded() {
    let h = harness();

    let participant = |offset: i64, prev: Option<Participant>, new: Option<Participant>| {
        envelope(vec![Update::ChannelParticipant {
            channel_id: 500,
            date: ts(offset).timestamp(),
            actor_id: 42,
            user_id: 100,
            via_chatlist: false,
            prev_participant: prev,
            new_participant: new,
            invite: None,
            qts: None,
        }])
    };

    // join at T2, stale join at T1, leave at T3
    h.dispatcher.handle(&participant(200, None, Some(Participant::Member))).await.unwrap();
    h.dispatcher.handle(&participant(100, None, Some(Participant::Member))).await.unwrap();
    h.dispatcher.handle(&participant(300, Some(Participant::Member), Some(Participant::Left))).await.unwrap();

    let member = h.members.snapshot(500, 100).await.unwrap();
    assert_eq!(member.first_join_time, Some(ts(200)));
    assert_eq!(member.last_join_time, Some(ts(200)));
    assert_eq!(member.last_leave_time, Some(ts(300)));
    assert!(!member.is_member);
}

#[tokio::test]
async fn own_membership_updates_the_chat_row() {
    let h = harness();

    // the bot itself is added through an exported invite link
    let env = envelope(vec![Update::ChannelParticipant {
        channel_id: 500,
        date: ts(10).timestamp(),
        actor_id: 42,
        user_id: BOT_ID,
        via_chatlist: false,
        prev_participant: None,
        new_participant: Some(Participant::Member),
        invite: Some(ChatInvite::Exported { link: "https://t.me/+AbCdEf".to_string() }),
        qts: None,
    }]);
    h.dispatcher.handle(&env).await.unwrap();

    let chat = h.chats.snapshot(BOT_ID, 500).await.unwrap();
    assert!(chat.can_write);

    let member = h.members.snapshot(500, BOT_ID).await.unwrap();
    assert!(member.is_member);
    assert_eq!(member.join_url, "https://t.me/+AbCdEf");
    assert_eq!(member.last_join_actor_id, 42);
}

#[tokio::test]
async fn added_users_become_members() {
    let h = harness();

    let env = envelope(vec![Update::NewMessage {
        message: Message::Service {
            id: 12,
            out: false,
            mentioned: false,
            date: ts(5).timestamp(),
            action: MessageAction::ChatAddUser { users: vec![200, 201] },
            peer: Peer::Chat { chat_id: 300 },
            from: Some(Peer::User { user_id: 100 }),
        },
        pts: None,
    }]);
    h.dispatcher.handle(&env).await.unwrap();

    for user_id in [200, 201] {
        let member = h.members.snapshot(300, user_id).await.unwrap();
        assert!(member.is_member);
        assert_eq!(member.first_join_time, Some(ts(5)));
        assert_eq!(member.first_join_actor_id, 100, "the inviter is the actor");
    }
}

/// Chat repository that refuses inserts, to exercise error accumulation.
#[derive(Clone)]
struct BrokenChatRepo;

#[async_trait]
impl ChatRepo for BrokenChatRepo {
    async fn get(&self, _bot_id: i64, _chat_id: i64) -> Result<Option<Chat>, Error> {
        Ok(None)
    }
    async fn insert(&self, _chat: &Chat) -> Result<(), Error> {
        Err(Error::Platform("chats table unavailable".to_string()))
    }
    async fn update(&self, _chat: &Chat) -> Result<(), Error> {
        Err(Error::Platform("chats table unavailable".to_string()))
    }
    async fn migrate_chat_id(&self, _bot_id: i64, _old: i64, _new: i64) -> Result<(), Error> {
        Ok(())
    }
}

#[tokio::test]
async fn per_update_errors_do_not_abort_siblings() {
    let users = MemoryUserRepo::default();
    let members = MemoryChatMemberRepo::default();
    let (tx, mut rx) = mpsc::channel(64);

    let dispatcher = UpdateDispatcher::new(
        BOT_ID,
        "testapp".to_string(),
        Arc::new(users.clone()),
        Arc::new(BrokenChatRepo),
        Arc::new(members),
        tx,
    );

    let env = envelope(vec![
        Update::NewMessage { message: plain_message(Peer::User { user_id: 100 }, 0), pts: None },
        Update::NewMessage { message: plain_message(Peer::User { user_id: 101 }, 1), pts: None },
    ]);

    let err = dispatcher.handle(&env).await.unwrap_err();
    assert!(matches!(err, Error::Multiple(_)), "both chat writes failed: {err}");

    // both events were still emitted and both user rows reconciled
    assert_eq!(rx.recv().await.unwrap().user_id, 100);
    assert_eq!(rx.recv().await.unwrap().user_id, 101);
    assert!(users.snapshot(BOT_ID, 100).await.is_some());
    assert!(users.snapshot(BOT_ID, 101).await.is_some());
}
