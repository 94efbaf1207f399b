// chatstats-core/src/dispatcher/mod.rs
//
// Per-bot orchestration: expand the envelope's entity sidecar, classify each
// update, reconcile relational state and emit analytics events. Everything
// runs on the task delivering the update so the gap manager can advance its
// cursor only after state is settled.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::models::{Chat, ChatMember, EventRow, User};
use crate::platforms::telegram::gaps::UpdateHandler;
use crate::platforms::telegram::types::{
    ChatInvite, Entities, Message, MessageAction, Update, UpdateEnvelope,
};
use crate::repositories::{ChatMemberRepo, ChatRepo, UserRepo};
use crate::Error;

pub mod classifier;

pub use classifier::{classify, ExtractedInfo};

pub struct UpdateDispatcher {
    bot_id: i64,
    app: String,
    users: Arc<dyn UserRepo>,
    chats: Arc<dyn ChatRepo>,
    members: Arc<dyn ChatMemberRepo>,
    events_tx: mpsc::Sender<EventRow>,
}

impl UpdateDispatcher {
    pub fn new(
        bot_id: i64,
        app: String,
        users: Arc<dyn UserRepo>,
        chats: Arc<dyn ChatRepo>,
        members: Arc<dyn ChatMemberRepo>,
        events_tx: mpsc::Sender<EventRow>,
    ) -> Self {
        Self { bot_id, app, users, chats, members, events_tx }
    }

    /// Entry point for one update envelope. Errors of individual updates are
    /// accumulated; siblings in the same envelope still run.
    pub async fn handle(&self, envelope: &UpdateEnvelope) -> Result<(), Error> {
        let (updates, entities) = match envelope {
            UpdateEnvelope::Updates { updates, users, chats, channels, .. }
            | UpdateEnvelope::Combined { updates, users, chats, channels, .. } => {
                (updates.iter().collect::<Vec<_>>(), Entities::from_lists(users, chats, channels))
            }
            UpdateEnvelope::Short { update, .. } => (vec![update], Entities::short()),
            UpdateEnvelope::TooLong
            | UpdateEnvelope::ShortMessage
            | UpdateEnvelope::ShortChatMessage
            | UpdateEnvelope::ShortSentMessage => return Ok(()),
        };

        let mut errors = Vec::new();
        for update in updates {
            if let Err(e) = self.dispatch_sync(&entities, update).await {
                errors.push(e);
            }
        }
        Error::combine(errors)
    }

    async fn dispatch_sync(&self, entities: &Entities, update: &Update) -> Result<(), Error> {
        let now = Utc::now();
        let mut info = classify(update, now);

        // chat_type resolution: the entity sidecar is authoritative.
        if info.chat_id != 0 {
            if entities.users.contains_key(&info.chat_id) {
                info.chat_type = "private".to_string();
            }
            if entities.chats.contains_key(&info.chat_id) {
                info.chat_type = "group".to_string();
            }
            if let Some(channel) = entities.channels.get(&info.chat_id) {
                if channel.broadcast {
                    info.chat_type = "channel".to_string();
                }
                if channel.megagroup {
                    info.chat_type = "supergroup".to_string();
                }
            }
        }

        let mut event = EventRow::raw(&self.app, self.bot_id, info.timestamp.timestamp_millis());
        event.event_subtype = update.name().to_string();
        event.from_bot = info.from_bot;
        event.data = info.data.clone();
        event.data_low_cardinality = info.data_low_cardinality.clone();
        event.data_int = info.data_int.clone();
        event.data_flags = info.data_flags.clone();
        event.chat_id = info.chat_id;
        event.user_id = info.user_id;
        event.chat_type = info.chat_type.clone();

        let mut errors = Vec::new();

        if !info.ignore {
            if event.user_id != 0 {
                if let Err(e) = self.stamp_user_session(&mut event, &info, entities).await {
                    errors.push(e);
                }
            }
            self.events_tx.send(event).await.map_err(|_| Error::QueueClosed)?;
        }

        debug!(bot_id = self.bot_id, subtype = update.name(), "dispatched update");

        if let Err(e) = self.high_level_dispatch(update, &mut info).await {
            errors.push(e);
        }
        Error::combine(errors)
    }

    /// User reconciliation plus event stamping with the resulting session.
    async fn stamp_user_session(
        &self,
        event: &mut EventRow,
        info: &ExtractedInfo,
        entities: &Entities,
    ) -> Result<(), Error> {
        if let Some(entity) = entities.users.get(&event.user_id) {
            if let Some(lang) = &entity.lang_code {
                event.language = lang.clone();
            }
        }

        let user = match self.users.get(self.bot_id, event.user_id).await? {
            Some(user) => {
                let mut user = user;
                if info.update_session {
                    user.roll_session(info.timestamp, &info.referer);
                    self.users.update(&user).await?;
                }
                user
            }
            None => {
                let user = User::new(self.bot_id, event.user_id, info.timestamp, &info.referer);
                match self.users.insert(&user).await {
                    Ok(()) => user,
                    // A sibling bot observed the same user first.
                    Err(e) if e.is_duplicate_key() => {
                        match self.users.get(self.bot_id, event.user_id).await? {
                            Some(mut existing) => {
                                if info.update_session {
                                    existing.roll_session(info.timestamp, &info.referer);
                                    self.users.update(&existing).await?;
                                }
                                existing
                            }
                            None => return Err(e),
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        event.session_id = user.session_id;
        event.referer = user.referer_id.clone();
        event.session_referer = user.session_referer_id.clone();
        event.user_created_at = Some(user.first_action_time.timestamp_millis());
        Ok(())
    }

    /// Reconcile chat and membership state implied by the update.
    async fn high_level_dispatch(
        &self,
        update: &Update,
        info: &mut ExtractedInfo,
    ) -> Result<(), Error> {
        match update {
            Update::NewMessage { message, .. } | Update::NewChannelMessage { message, .. } => {
                self.handle_message(message, info).await?;
            }
            Update::ChannelParticipant {
                channel_id,
                user_id,
                actor_id,
                prev_participant,
                new_participant,
                invite,
                ..
            }
            | Update::ChatParticipant {
                chat_id: channel_id,
                user_id,
                actor_id,
                prev_participant,
                new_participant,
                invite,
                ..
            } => {
                let was_member = prev_participant.map_or(false, |p| p.is_present());
                let is_member = new_participant.map_or(false, |p| p.is_present());

                if *user_id == self.bot_id {
                    self.update_chat(info, is_member, was_member && !is_member).await?;
                }

                let join_url = match invite {
                    Some(ChatInvite::Exported { link }) => link.as_str(),
                    _ => "",
                };
                self.update_chat_member(
                    *channel_id,
                    *user_id,
                    info,
                    is_member && !was_member,
                    was_member && !is_member,
                    join_url,
                    *actor_id,
                )
                .await?;
            }
            Update::BotStopped { stopped, .. } => {
                self.update_chat(info, !stopped, *stopped).await?;
            }
            _ => {}
        }

        // Any update tying a user to a chat refreshes membership and chat
        // activity clocks, without implying a join/leave transition.
        if info.chat_id != 0 && info.user_id != 0 && info.chat_id != info.user_id {
            self.update_chat_member(info.chat_id, info.user_id, info, false, false, "", 0)
                .await?;
        }
        if info.chat_id != 0 {
            self.update_chat(info, false, false).await?;
        }

        Ok(())
    }

    async fn handle_message(&self, message: &Message, info: &mut ExtractedInfo) -> Result<(), Error> {
        match message {
            Message::Empty { .. } => Ok(()),
            Message::Service { action, .. } => match action {
                MessageAction::BotAllowed => self.update_chat(info, true, false).await,
                MessageAction::ChatAddUser { users } => {
                    for user_id in users {
                        self.update_chat_member(
                            info.chat_id,
                            *user_id,
                            info,
                            true,
                            false,
                            "",
                            info.user_id,
                        )
                        .await?;
                    }
                    Ok(())
                }
                MessageAction::ChatJoinedByLink { inviter_id } => {
                    self.update_chat_member(
                        info.chat_id,
                        info.user_id,
                        info,
                        true,
                        false,
                        "",
                        *inviter_id,
                    )
                    .await
                }
                MessageAction::ChatJoinedByRequest => {
                    self.update_chat_member(info.chat_id, info.user_id, info, true, false, "", 0)
                        .await
                }
                MessageAction::ChatDeleteUser { user_id } => {
                    self.update_chat_member(
                        info.chat_id,
                        *user_id,
                        info,
                        false,
                        true,
                        "",
                        info.user_id,
                    )
                    .await
                }
                MessageAction::ChatMigrateTo { channel_id } => {
                    self.chats.migrate_chat_id(self.bot_id, info.chat_id, *channel_id).await?;
                    // State now lives under the new id; the refresh below must
                    // not resurrect the deleted row.
                    info.chat_id = *channel_id;
                    Ok(())
                }
                MessageAction::Other { .. } => Ok(()),
            },
            Message::Plain { peer, out, .. } => {
                if peer.is_user() || *out {
                    self.update_chat(info, true, false).await
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn update_chat(&self, info: &ExtractedInfo, can_write: bool, ban: bool) -> Result<(), Error> {
        match self.try_update_chat(info, can_write, ban).await {
            Err(e) if e.is_duplicate_key() => self.try_update_chat(info, can_write, ban).await,
            other => other,
        }
    }

    async fn try_update_chat(
        &self,
        info: &ExtractedInfo,
        can_write: bool,
        ban: bool,
    ) -> Result<(), Error> {
        match self.chats.get(self.bot_id, info.chat_id).await? {
            Some(mut chat) => {
                chat.apply_observation(info.timestamp, &info.chat_type, can_write, ban);
                self.chats.update(&chat).await
            }
            None => {
                let chat = Chat::new(
                    self.bot_id,
                    info.chat_id,
                    info.timestamp,
                    &info.chat_type,
                    can_write,
                    ban,
                    &info.referer,
                );
                self.chats.insert(&chat).await
            }
        }
    }

    /// The same logical transition can arrive concurrently from two bots
    /// watching one chat; a unique-key collision is retried once so the
    /// second attempt takes the update path.
    async fn update_chat_member(
        &self,
        chat_id: i64,
        member_id: i64,
        info: &ExtractedInfo,
        join: bool,
        leave: bool,
        join_url: &str,
        actor_id: i64,
    ) -> Result<(), Error> {
        let attempt = self
            .try_update_chat_member(chat_id, member_id, info, join, leave, join_url, actor_id)
            .await;
        match attempt {
            Err(e) if e.is_duplicate_key() => {
                self.try_update_chat_member(chat_id, member_id, info, join, leave, join_url, actor_id)
                    .await
            }
            other => other,
        }
    }

    async fn try_update_chat_member(
        &self,
        chat_id: i64,
        member_id: i64,
        info: &ExtractedInfo,
        join: bool,
        leave: bool,
        join_url: &str,
        actor_id: i64,
    ) -> Result<(), Error> {
        match self.members.get(chat_id, member_id).await? {
            Some(mut member) => {
                member.apply_transition(info.timestamp, join, leave, join_url, actor_id);
                self.members.update(&member).await
            }
            None => {
                let member = ChatMember::new(
                    chat_id,
                    member_id,
                    info.timestamp,
                    join,
                    leave,
                    join_url,
                    actor_id,
                );
                self.members.insert(&member).await
            }
        }
    }
}

#[async_trait]
impl UpdateHandler for UpdateDispatcher {
    async fn handle(&self, envelope: &UpdateEnvelope) -> Result<(), Error> {
        UpdateDispatcher::handle(self, envelope).await
    }
}
