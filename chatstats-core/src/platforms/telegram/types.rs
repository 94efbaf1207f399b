// chatstats-core/src/platforms/telegram/types.rs
//
// Domain model of the platform update stream. The wire protocol behind it is
// an external concern; these types are what the gateway delivers and what the
// classifier consumes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A message envelope target. Channel ids stay positive 64-bit, there is no
/// -100 prefixing anywhere in this system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Peer {
    User { user_id: i64 },
    Chat { chat_id: i64 },
    Channel { channel_id: i64 },
}

impl Peer {
    pub fn id(&self) -> i64 {
        match *self {
            Peer::User { user_id } => user_id,
            Peer::Chat { chat_id } => chat_id,
            Peer::Channel { channel_id } => channel_id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Peer::User { .. } => "PeerUser",
            Peer::Chat { .. } => "PeerChat",
            Peer::Channel { .. } => "PeerChannel",
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Peer::User { .. })
    }

    pub fn is_channel(&self) -> bool {
        matches!(self, Peer::Channel { .. })
    }
}

/// Service-message payloads the reconciler reacts to. The long tail of other
/// actions is carried by name only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageAction {
    BotAllowed,
    ChatAddUser { users: Vec<i64> },
    ChatJoinedByLink { inviter_id: i64 },
    ChatJoinedByRequest,
    ChatDeleteUser { user_id: i64 },
    ChatMigrateTo { channel_id: i64 },
    Other { name: String },
}

impl MessageAction {
    pub fn type_name(&self) -> String {
        match self {
            MessageAction::BotAllowed => "MessageActionBotAllowed".to_string(),
            MessageAction::ChatAddUser { .. } => "MessageActionChatAddUser".to_string(),
            MessageAction::ChatJoinedByLink { .. } => "MessageActionChatJoinedByLink".to_string(),
            MessageAction::ChatJoinedByRequest => "MessageActionChatJoinedByRequest".to_string(),
            MessageAction::ChatDeleteUser { .. } => "MessageActionChatDeleteUser".to_string(),
            MessageAction::ChatMigrateTo { .. } => "MessageActionChatMigrateTo".to_string(),
            MessageAction::Other { name } => name.clone(),
        }
    }
}

/// One message in any of its three shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Empty {
        id: i64,
        #[serde(default)]
        peer: Option<Peer>,
    },
    Service {
        id: i64,
        #[serde(default)]
        out: bool,
        #[serde(default)]
        mentioned: bool,
        date: i64,
        action: MessageAction,
        peer: Peer,
        #[serde(default)]
        from: Option<Peer>,
    },
    Plain {
        id: i64,
        #[serde(default)]
        out: bool,
        #[serde(default)]
        mentioned: bool,
        #[serde(default)]
        post: bool,
        #[serde(default)]
        edit_hide: bool,
        date: i64,
        #[serde(default)]
        edit_date: Option<i64>,
        #[serde(default)]
        via_bot_id: Option<i64>,
        /// Media type tag as reported by the platform, absent for plain text.
        #[serde(default)]
        media: Option<String>,
        peer: Peer,
        #[serde(default)]
        from: Option<Peer>,
    },
}

impl Message {
    pub fn peer(&self) -> Option<&Peer> {
        match self {
            Message::Empty { peer, .. } => peer.as_ref(),
            Message::Service { peer, .. } | Message::Plain { peer, .. } => Some(peer),
        }
    }
}

/// Membership standing inside a chat or channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Participant {
    Creator,
    Admin,
    Member,
    Left,
    Banned,
}

impl Participant {
    /// Left and Banned do not count as present membership.
    pub fn is_present(&self) -> bool {
        !matches!(self, Participant::Left | Participant::Banned)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChatInvite {
    Exported { link: String },
    PublicJoinRequests,
}

/// Where an inline query was typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InlineQueryPeerType {
    SameBotPm,
    Pm,
    Chat,
    Megagroup,
    Broadcast,
    BotPm,
}

impl InlineQueryPeerType {
    pub fn name(&self) -> &'static str {
        match self {
            InlineQueryPeerType::SameBotPm => "SameBotPM",
            InlineQueryPeerType::Pm => "PM",
            InlineQueryPeerType::Chat => "Chat",
            InlineQueryPeerType::Megagroup => "Megagroup",
            InlineQueryPeerType::Broadcast => "Broadcast",
            InlineQueryPeerType::BotPm => "BotPM",
        }
    }
}

/// Common-sequence position of an update: the new cursor value and how many
/// slots it advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pts {
    pub pts: i64,
    pub count: i64,
}

/// A single platform update. Variants without analytics or reconcile
/// semantics collapse into `Other` and degrade to a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Update {
    NewMessage {
        message: Message,
        #[serde(default)]
        pts: Option<Pts>,
    },
    NewChannelMessage {
        message: Message,
        #[serde(default)]
        pts: Option<Pts>,
    },
    EditMessage {
        message: Message,
        #[serde(default)]
        pts: Option<Pts>,
    },
    EditChannelMessage {
        message: Message,
        #[serde(default)]
        pts: Option<Pts>,
    },
    DeleteMessages {
        ids: Vec<i64>,
        #[serde(default)]
        pts: Option<Pts>,
    },
    ChannelTooLong {
        channel_id: i64,
        #[serde(default)]
        pts: Option<i64>,
    },
    ChannelMessageViews {
        channel_id: i64,
        msg_id: i64,
        views: i64,
    },
    BotCallbackQuery {
        query_id: i64,
        user_id: i64,
        peer: Peer,
        msg_id: i64,
        chat_instance: i64,
        #[serde(default)]
        game_short_name: Option<String>,
    },
    InlineBotCallbackQuery {
        query_id: i64,
        user_id: i64,
        chat_instance: i64,
        #[serde(default)]
        game_short_name: Option<String>,
    },
    BotInlineQuery {
        query_id: i64,
        user_id: i64,
        query: String,
        offset: String,
        peer_type: InlineQueryPeerType,
        #[serde(default)]
        geo: bool,
    },
    BotInlineSend {
        user_id: i64,
        query: String,
        id: String,
        #[serde(default)]
        geo: bool,
        #[serde(default)]
        msg_id: Option<i64>,
    },
    ChatParticipant {
        chat_id: i64,
        date: i64,
        actor_id: i64,
        user_id: i64,
        #[serde(default)]
        prev_participant: Option<Participant>,
        #[serde(default)]
        new_participant: Option<Participant>,
        #[serde(default)]
        invite: Option<ChatInvite>,
        #[serde(default)]
        qts: Option<i64>,
    },
    ChannelParticipant {
        channel_id: i64,
        date: i64,
        actor_id: i64,
        user_id: i64,
        #[serde(default)]
        via_chatlist: bool,
        #[serde(default)]
        prev_participant: Option<Participant>,
        #[serde(default)]
        new_participant: Option<Participant>,
        #[serde(default)]
        invite: Option<ChatInvite>,
        #[serde(default)]
        qts: Option<i64>,
    },
    BotStopped {
        user_id: i64,
        date: i64,
        stopped: bool,
        #[serde(default)]
        qts: Option<i64>,
    },
    User {
        user_id: i64,
    },
    Other {
        name: String,
    },
}

impl Update {
    /// Variant name as used for `event_subtype`.
    pub fn name(&self) -> &str {
        match self {
            Update::NewMessage { .. } => "NewMessage",
            Update::NewChannelMessage { .. } => "NewChannelMessage",
            Update::EditMessage { .. } => "EditMessage",
            Update::EditChannelMessage { .. } => "EditChannelMessage",
            Update::DeleteMessages { .. } => "DeleteMessages",
            Update::ChannelTooLong { .. } => "ChannelTooLong",
            Update::ChannelMessageViews { .. } => "ChannelMessageViews",
            Update::BotCallbackQuery { .. } => "BotCallbackQuery",
            Update::InlineBotCallbackQuery { .. } => "InlineBotCallbackQuery",
            Update::BotInlineQuery { .. } => "BotInlineQuery",
            Update::BotInlineSend { .. } => "BotInlineSend",
            Update::ChatParticipant { .. } => "ChatParticipant",
            Update::ChannelParticipant { .. } => "ChannelParticipant",
            Update::BotStopped { .. } => "BotStopped",
            Update::User { .. } => "User",
            Update::Other { name } => name.as_str(),
        }
    }

    /// Position in the common update sequence, when the update carries one.
    pub fn common_pts(&self) -> Option<Pts> {
        match self {
            Update::NewMessage { pts, .. }
            | Update::EditMessage { pts, .. }
            | Update::DeleteMessages { pts, .. } => *pts,
            _ => None,
        }
    }

    /// Position in a channel-local sequence, keyed by channel id.
    pub fn channel_pts(&self) -> Option<(i64, Pts)> {
        match self {
            Update::NewChannelMessage { message, pts: Some(pts) }
            | Update::EditChannelMessage { message, pts: Some(pts) } => {
                match message.peer() {
                    Some(Peer::Channel { channel_id }) => Some((*channel_id, *pts)),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Secondary-sequence position for qts-carrying updates.
    pub fn qts(&self) -> Option<i64> {
        match self {
            Update::ChatParticipant { qts, .. }
            | Update::ChannelParticipant { qts, .. }
            | Update::BotStopped { qts, .. } => *qts,
            _ => None,
        }
    }
}

/// Sidecar user record accompanying an update envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEntity {
    pub id: i64,
    #[serde(default)]
    pub bot: bool,
    #[serde(default)]
    pub lang_code: Option<String>,
}

/// Sidecar record for a basic group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntity {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
}

/// Sidecar record for a channel or supergroup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEntity {
    pub id: i64,
    #[serde(default)]
    pub broadcast: bool,
    #[serde(default)]
    pub megagroup: bool,
    #[serde(default)]
    pub access_hash: Option<i64>,
}

/// The update container shapes the stream delivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpdateEnvelope {
    Updates {
        updates: Vec<Update>,
        #[serde(default)]
        users: Vec<UserEntity>,
        #[serde(default)]
        chats: Vec<ChatEntity>,
        #[serde(default)]
        channels: Vec<ChannelEntity>,
        date: i64,
        seq: i64,
    },
    Combined {
        updates: Vec<Update>,
        #[serde(default)]
        users: Vec<UserEntity>,
        #[serde(default)]
        chats: Vec<ChatEntity>,
        #[serde(default)]
        channels: Vec<ChannelEntity>,
        date: i64,
        seq_start: i64,
        seq: i64,
    },
    Short {
        update: Update,
        date: i64,
    },
    TooLong,
    ShortMessage,
    ShortChatMessage,
    ShortSentMessage,
}

/// Entity lookup maps built from an envelope sidecar. A short envelope has
/// empty maps and `short = true`.
#[derive(Debug, Clone, Default)]
pub struct Entities {
    pub short: bool,
    pub users: HashMap<i64, UserEntity>,
    pub chats: HashMap<i64, ChatEntity>,
    pub channels: HashMap<i64, ChannelEntity>,
}

impl Entities {
    pub fn short() -> Self {
        Self { short: true, ..Default::default() }
    }

    pub fn from_lists(
        users: &[UserEntity],
        chats: &[ChatEntity],
        channels: &[ChannelEntity],
    ) -> Self {
        Self {
            short: false,
            users: users.iter().map(|u| (u.id, u.clone())).collect(),
            chats: chats.iter().map(|c| (c.id, c.clone())).collect(),
            channels: channels.iter().map(|c| (c.id, c.clone())).collect(),
        }
    }
}

/// Result of an auth-status probe against the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthStatus {
    pub authorized: bool,
    #[serde(default)]
    pub user: Option<AuthUser>,
}

/// The authenticated identity behind a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}
