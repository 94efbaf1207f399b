// chatstats-core/src/dispatcher/classifier.rs
//
// Pure extraction of analytics fields from a single update. No I/O, no
// clock reads: the caller supplies `now` for updates that carry no
// timestamp of their own.

use chrono::{DateTime, Utc};

use crate::platforms::telegram::types::{ChatInvite, Message, Peer, Update};

/// Public invite links arrive fully qualified; only the slug is recorded.
const INVITE_LINK_PREFIX: &str = "https://t.me/";

/// Fields extracted from one update, later enriched by entity resolution
/// and user-session stamping.
#[derive(Debug, Clone)]
pub struct ExtractedInfo {
    /// Suppress event emission for this update (broadcast noise).
    pub ignore: bool,
    pub from_bot: bool,
    pub user_id: i64,
    pub chat_id: i64,
    pub chat_type: String,
    /// Whether this update counts as user activity for session tracking.
    pub update_session: bool,
    pub data: Vec<String>,
    pub data_low_cardinality: Vec<String>,
    pub data_int: Vec<i64>,
    pub data_flags: Vec<bool>,
    pub referer: String,
    pub timestamp: DateTime<Utc>,
}

impl ExtractedInfo {
    fn empty(now: DateTime<Utc>) -> Self {
        Self {
            ignore: false,
            from_bot: false,
            user_id: 0,
            chat_id: 0,
            chat_type: String::new(),
            update_session: false,
            data: Vec::new(),
            data_low_cardinality: Vec::new(),
            data_int: Vec::new(),
            data_flags: Vec::new(),
            referer: String::new(),
            timestamp: now,
        }
    }
}

fn unix(secs: i64, fallback: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(fallback)
}

fn strip_invite_link(invite: &ChatInvite) -> Option<String> {
    match invite {
        ChatInvite::Exported { link } => {
            Some(link.strip_prefix(INVITE_LINK_PREFIX).unwrap_or(link).to_string())
        }
        ChatInvite::PublicJoinRequests => None,
    }
}

/// Classify one update into its analytics fields.
pub fn classify(update: &Update, now: DateTime<Utc>) -> ExtractedInfo {
    let mut info = ExtractedInfo::empty(now);

    match update {
        Update::NewMessage { message, .. }
        | Update::NewChannelMessage { message, .. }
        | Update::EditMessage { message, .. }
        | Update::EditChannelMessage { message, .. } => {
            classify_message(message, &mut info, now);
        }
        Update::ChannelMessageViews { channel_id, msg_id, views } => {
            info.chat_id = *channel_id;
            info.data_int.push(*msg_id);
            info.data_int.push(*views);
        }
        Update::BotInlineQuery { user_id, query, offset, peer_type, geo, .. } => {
            info.user_id = *user_id;
            info.update_session = true;
            info.data_low_cardinality.push(peer_type.name().to_string());
            info.data_low_cardinality.push(offset.clone());
            info.data_int.push(query.chars().count() as i64);
            info.data_flags.push(*geo);
        }
        Update::BotInlineSend { user_id, query, id, geo, msg_id } => {
            info.user_id = *user_id;
            info.from_bot = true;
            info.update_session = true;
            info.data_low_cardinality.push(id.clone());
            info.data_int.push(query.chars().count() as i64);
            info.data_flags.push(*geo);
            info.data_flags.push(msg_id.is_some());
        }
        Update::BotCallbackQuery { user_id, peer, msg_id, chat_instance, game_short_name, .. } => {
            info.user_id = *user_id;
            info.chat_id = peer.id();
            info.update_session = true;
            info.data_int.push(*chat_instance);
            info.data_int.push(*msg_id);
            info.data_low_cardinality.push(peer.type_name().to_string());
            if let Some(game) = game_short_name {
                info.data_low_cardinality.push(game.clone());
            }
        }
        Update::InlineBotCallbackQuery { user_id, chat_instance, game_short_name, .. } => {
            info.user_id = *user_id;
            info.update_session = true;
            info.data_int.push(*chat_instance);
            if let Some(game) = game_short_name {
                info.data_low_cardinality.push(game.clone());
            }
        }
        Update::ChatParticipant {
            chat_id,
            date,
            actor_id,
            user_id,
            prev_participant,
            new_participant,
            invite,
            ..
        } => {
            info.from_bot = user_id == actor_id;
            info.chat_id = *chat_id;
            info.user_id = *user_id;
            info.data_flags.push(prev_participant.is_some());
            info.data_flags.push(new_participant.is_some());
            if let Some(link) = invite.as_ref().and_then(strip_invite_link) {
                info.data_low_cardinality.push(link);
            }
            info.timestamp = unix(*date, now);
        }
        Update::ChannelParticipant {
            channel_id,
            date,
            actor_id,
            user_id,
            via_chatlist,
            prev_participant,
            new_participant,
            invite,
            ..
        } => {
            info.from_bot = user_id == actor_id;
            info.chat_id = *channel_id;
            info.user_id = *user_id;
            info.data_flags.push(prev_participant.is_some());
            info.data_flags.push(new_participant.is_some());
            info.data_flags.push(*via_chatlist);
            if let Some(link) = invite.as_ref().and_then(strip_invite_link) {
                info.data_low_cardinality.push(link);
            }
            info.timestamp = unix(*date, now);
        }
        Update::BotStopped { user_id, date, stopped, .. } => {
            info.chat_id = *user_id;
            info.user_id = *user_id;
            info.data_flags.push(*stopped);
            info.timestamp = unix(*date, now);
        }
        Update::User { user_id } => {
            info.user_id = *user_id;
        }
        // Read markers, deletions, typing indicators and the rest of the
        // long tail advance the sync cursor but emit nothing.
        Update::DeleteMessages { .. } | Update::ChannelTooLong { .. } | Update::Other { .. } => {}
    }

    info
}

fn classify_message(message: &Message, info: &mut ExtractedInfo, now: DateTime<Utc>) {
    match message {
        Message::Empty { id, peer } => {
            info.data_int.push(*id);
            info.data_low_cardinality.push("MessageEmpty".to_string());
            info.data_low_cardinality.push("Empty".to_string());
            if let Some(peer) = peer {
                info.chat_id = peer.id();
                info.data_low_cardinality.push(peer.type_name().to_string());
            }
        }
        Message::Service { id, out, mentioned, date, action, peer, from } => {
            info.from_bot = *out;
            info.update_session = !info.from_bot;

            info.data_int.push(*id);
            info.data_flags.push(false);
            info.data_flags.push(*mentioned);
            info.timestamp = unix(*date, now);

            info.data_low_cardinality.push("MessageService".to_string());
            info.data_low_cardinality.push(action.type_name());

            push_peers(info, peer, from.as_ref());
        }
        Message::Plain {
            id,
            out,
            mentioned,
            post,
            edit_hide,
            date,
            edit_date,
            via_bot_id,
            media,
            peer,
            from,
        } => {
            info.from_bot = *out;
            info.update_session = !info.from_bot;

            info.data_int.push(*id);
            if let Some(via_bot) = via_bot_id {
                info.data_int.push(*via_bot);
            }

            info.data_flags.push(*edit_hide);
            info.data_flags.push(*mentioned);

            info.timestamp = unix(edit_date.unwrap_or(*date), now);

            info.data_low_cardinality.push("Message".to_string());
            info.data_low_cardinality
                .push(media.clone().unwrap_or_else(|| "Text".to_string()));

            push_peers(info, peer, from.as_ref());

            // Passive broadcast traffic: not a post of ours, not via-bot,
            // not mentioning us. Recorded in chat state but not ingested.
            if !post && via_bot_id.is_none() && peer.is_channel() {
                info.ignore = true;
            }
        }
    }
}

fn push_peers(info: &mut ExtractedInfo, peer: &Peer, from: Option<&Peer>) {
    match from {
        Some(from) => {
            info.chat_id = peer.id();
            info.user_id = from.id();
            info.data_low_cardinality.push(peer.type_name().to_string());
            info.data_low_cardinality.push(from.type_name().to_string());
        }
        None => {
            info.chat_id = peer.id();
            info.user_id = peer.id();
            info.data_low_cardinality.push(peer.type_name().to_string());
        }
    }

    // Unambiguous peer kinds name the chat type themselves; the entity
    // sidecar, when present, still overrides. Channels stay undecided here
    // (broadcast vs supergroup needs the sidecar).
    match peer {
        Peer::User { .. } => info.chat_type = "private".to_string(),
        Peer::Chat { .. } => info.chat_type = "group".to_string(),
        Peer::Channel { .. } => {}
    }
}
