// Bot session lifecycle against a scripted platform client.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use chatstats_core::kv::StateStore;
use chatstats_core::models::Bot;
use chatstats_core::platforms::telegram::types::{Message, Peer, Update, UpdateEnvelope};
use chatstats_core::pool::{ConnectionPool, PoolDeps};
use chatstats_core::repositories::BotRepo;
use chatstats_core::test_utils::{
    MemoryBotRepo, MemoryChatMemberRepo, MemoryChatRepo, MemoryUserRepo, ScriptedClient,
    ScriptedClientFactory,
};
use chatstats_core::Error;

const BOT_ID: i64 = 4242;

struct PoolHarness {
    pool: ConnectionPool,
    bots: MemoryBotRepo,
    users: MemoryUserRepo,
    events_rx: mpsc::Receiver<chatstats_core::models::EventRow>,
    cancel: CancellationToken,
    _dir: tempfile::TempDir,
}

async fn pool_with_client(client: Arc<ScriptedClient>) -> PoolHarness {
    let dir = tempfile::tempdir().unwrap();
    let state = StateStore::open(dir.path().join("state.redb")).unwrap();

    let bots = MemoryBotRepo::default();
    bots.upsert(&Bot {
        bot_id: BOT_ID,
        source: "test".to_string(),
        app: "testapp".to_string(),
        token_hash: None,
        logged_in: true,
    })
    .await
    .unwrap();

    let users = MemoryUserRepo::default();
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();

    let deps = PoolDeps {
        bots: Arc::new(bots.clone()),
        users: Arc::new(users.clone()),
        chats: Arc::new(MemoryChatRepo::default()),
        members: Arc::new(MemoryChatMemberRepo::default()),
        state,
        events_tx: tx,
        factory: Arc::new(ScriptedClientFactory::new(client)),
    };

    PoolHarness {
        pool: ConnectionPool::new(deps, cancel.clone()),
        bots,
        users,
        events_rx: rx,
        cancel,
        _dir: dir,
    }
}

fn message_envelope(user_id: i64) -> UpdateEnvelope {
    UpdateEnvelope::Updates {
        updates: vec![Update::NewMessage {
            message: Message::Plain {
                id: 1,
                out: false,
                mentioned: false,
                post: false,
                edit_hide: false,
                date: 1_700_000_000,
                edit_date: None,
                via_bot_id: None,
                media: None,
                peer: Peer::User { user_id },
                from: None,
            },
            pts: None,
        }],
        users: Vec::new(),
        chats: Vec::new(),
        channels: Vec::new(),
        date: 1_700_000_000,
        seq: 0,
    }
}

#[tokio::test]
async fn unknown_bot_is_rejected() {
    let h = pool_with_client(ScriptedClient::authorized_bot(BOT_ID, Vec::new())).await;

    let err = h.pool.run_bot(1, false).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    let err = h.pool.stop_bot(1).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    let err = h.pool.get_client(1).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    let err = h.pool.add_bot(1).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn streamed_updates_flow_to_events_and_state() {
    let client = ScriptedClient::authorized_bot(BOT_ID, vec![message_envelope(100)]);
    let mut h = pool_with_client(client).await;

    h.pool.add_bot(BOT_ID).await.unwrap();
    h.pool.run_bot(BOT_ID, true).await.unwrap();

    let event = timeout(Duration::from_secs(2), h.events_rx.recv())
        .await
        .expect("event within deadline")
        .expect("channel open");
    assert_eq!(event.bot_id, BOT_ID);
    assert_eq!(event.user_id, 100);

    assert!(h.users.snapshot(BOT_ID, 100).await.is_some());

    h.pool.stop_bot(BOT_ID).await.unwrap();
}

#[tokio::test]
async fn unauthorized_bot_is_marked_logged_out() {
    let client = ScriptedClient::unauthorized();
    let h = pool_with_client(client).await;

    h.pool.add_bot(BOT_ID).await.unwrap();
    h.pool.run_bot(BOT_ID, false).await.unwrap();

    let mut logged_in = true;
    for _ in 0..40 {
        sleep(Duration::from_millis(50)).await;
        logged_in = h.bots.get(BOT_ID).await.unwrap().unwrap().logged_in;
        if !logged_in {
            break;
        }
    }
    assert!(!logged_in, "auth failure must flip logged_in");
}

#[tokio::test]
async fn stop_cancels_only_that_session() {
    let client = ScriptedClient::authorized_bot(BOT_ID, Vec::new());
    let h = pool_with_client(client).await;

    h.pool.add_bot(BOT_ID).await.unwrap();
    h.pool.run_bot(BOT_ID, false).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    // stop resolves even though the client is parked in a long poll
    timeout(Duration::from_secs(2), h.pool.stop_bot(BOT_ID))
        .await
        .expect("stop within deadline")
        .unwrap();

    assert!(!h.cancel.is_cancelled(), "process token unaffected");
}
