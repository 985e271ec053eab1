//! Direct and project messaging.
//!
//! A direct chat has a deterministic id derived from its two participants,
//! so both sides converge on the same document. Sending a direct message
//! writes the message, the chat preview and the recipient's unread
//! increment in one batch.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use cliquest_shared::constants::{CHATS_FOLDER, LOADING_LABEL};
use cliquest_shared::{UserId, ValidationError};
use cliquest_store::document::encode;
use cliquest_store::{
    fetch, Attachment, BatchOp, Chat, Direction, Message, MessageTarget, Model, Patch, Project,
    Query, ReplySnapshot, UserProfile, DOCUMENT_ID,
};

use crate::aggregate::{
    group_by_day, resolve_person, Aggregator, DayGroup, Inputs, PersonView, View, ViewBuilder,
};
use crate::commands::files::ensure_system_folders;
use crate::commands::profile::fetch_profiles;
use crate::commands::projects::{load_project, require_member};
use crate::composer::{
    mirror_attachments, preview, reactions_value, toggle_reaction, upload_attachments,
    MessageDraft,
};
use crate::error::{ClientError, Result};
use crate::read_tracker::{mark_as_read, unread_count, unread_field, ReadScope};
use crate::session::Session;

/// Open (creating if needed) the direct chat with `other`. Returns its id.
pub async fn open_direct_chat(session: &Session, other: &UserId) -> Result<String> {
    let me = session.uid();
    if other == me || other.as_str().is_empty() {
        return Err(ValidationError::InvalidParticipants.into());
    }

    let chat_id = Chat::id_for(me, other);
    if session.gateway().get(Chat::COLLECTION, &chat_id).await?.is_some() {
        return Ok(chat_id);
    }

    create_direct_chat(session, other, &chat_id).await?;
    info!(chat = %chat_id, "Direct chat created");
    Ok(chat_id)
}

/// Write the participant fields of a direct chat. The write merges into
/// whatever is stored, so a chat the peer created and wrote to meanwhile
/// keeps its preview and counters.
async fn create_direct_chat(session: &Session, other: &UserId, chat_id: &str) -> Result<()> {
    let me = session.uid();
    let profiles = fetch_profiles(session, std::slice::from_ref(other)).await;
    let other_snapshot = match profiles.get(other) {
        Some(profile) => profile.snapshot(),
        None => return Err(ClientError::not_found("user")),
    };

    let mut participant_ids = vec![me.clone(), other.clone()];
    participant_ids.sort();
    let patch = Patch::new()
        .set("participantIds", encode(&participant_ids)?)
        .set("participants", encode(&[session.me_snapshot(), other_snapshot])?)
        .increment(unread_field(me), 0)
        .increment(unread_field(other), 0);
    session
        .gateway()
        .merge(Chat::COLLECTION, chat_id, patch)
        .await?;
    Ok(())
}

/// Send a message. Returns the new message id.
///
/// Content is validated before anything else. Attachment uploads run
/// concurrently; failed ones are reported and skipped. Attachments of
/// project messages are also recorded in the project's chats folder, even
/// if the message write itself fails.
pub async fn send_message(
    session: &Session,
    target: &MessageTarget,
    draft: MessageDraft,
) -> Result<String> {
    draft.validate()?;
    let me = session.uid().clone();

    let (recipient, prefix) = match target {
        MessageTarget::Direct { chat_id } => {
            let chat = fetch::<Chat>(session.gateway(), chat_id)
                .await?
                .ok_or_else(|| ClientError::not_found("chat"))?;
            if !chat.has_participant(&me) {
                return Err(ClientError::forbidden("not a participant of this chat"));
            }
            (chat.other_participant(&me).cloned(), format!("chats/{chat_id}"))
        }
        MessageTarget::Project { project_id } => {
            let project = load_project(session, project_id).await?;
            require_member(&project, &me)?;
            (None, format!("projects/{project_id}/chats"))
        }
    };

    let content = draft.body().to_string();
    let uploaded = upload_attachments(session, &prefix, draft.attachments).await;
    if content.is_empty() && uploaded.is_empty() {
        // Every attachment failed and there is no text left to send.
        return Err(ValidationError::EmptyMessage.into());
    }

    let mut message = Message::new(target, session.me_snapshot(), content);
    message.attachments = uploaded.iter().map(|f| f.attachment.clone()).collect();
    message.reply_to = draft.reply_to;

    let message_id = session.gateway().new_id();
    let mut ops = vec![BatchOp::set(
        Message::COLLECTION,
        &message_id,
        encode(&message)?,
    )];
    if let MessageTarget::Direct { chat_id } = target {
        let mut patch = Patch::new()
            .set("lastMessage", preview(&message.content, &message.attachments))
            .set("lastMessageTime", message.created_at.as_str());
        if let Some(recipient) = &recipient {
            patch = patch.increment(unread_field(recipient), 1);
        }
        ops.push(BatchOp::update(Chat::COLLECTION, chat_id, patch));
    }
    let written = session.gateway().commit_batch(ops).await;

    if let MessageTarget::Project { project_id } = target {
        if !uploaded.is_empty() {
            let mirrored = async {
                ensure_system_folders(session, project_id).await?;
                mirror_attachments(session, project_id, CHATS_FOLDER, &uploaded).await
            }
            .await;
            session.report("file attachments in the chats folder", mirrored);
        }
    }

    written?;
    debug!(message = %message_id, target = ?target, "Message sent");
    Ok(message_id)
}

/// Add or remove the user's `emoji` reaction on a message.
pub async fn react_to_message(session: &Session, message_id: &str, emoji: &str) -> Result<()> {
    let message = fetch::<Message>(session.gateway(), message_id)
        .await?
        .ok_or_else(|| ClientError::not_found("message"))?;
    let reactions = toggle_reaction(&message.reactions, session.uid(), emoji);
    session
        .gateway()
        .update(
            Message::COLLECTION,
            message_id,
            Patch::new().set("reactions", reactions_value(&reactions)?),
        )
        .await?;
    Ok(())
}

/// Delete one of the user's own messages.
pub async fn delete_message(session: &Session, message_id: &str) -> Result<()> {
    let message = fetch::<Message>(session.gateway(), message_id)
        .await?
        .ok_or_else(|| ClientError::not_found("message"))?;
    if &message.sender.id != session.uid() {
        return Err(ClientError::forbidden("only the sender can delete a message"));
    }
    session
        .gateway()
        .delete(Message::COLLECTION, message_id)
        .await?;
    Ok(())
}

/// Delete a direct chat together with all of its messages.
pub async fn remove_chat(session: &Session, chat_id: &str) -> Result<()> {
    let chat = fetch::<Chat>(session.gateway(), chat_id)
        .await?
        .ok_or_else(|| ClientError::not_found("chat"))?;
    if !chat.has_participant(session.uid()) {
        return Err(ClientError::forbidden("not a participant of this chat"));
    }

    let messages = session
        .gateway()
        .query(&Query::collection(Message::COLLECTION).where_eq("chatId", chat_id))
        .await?;
    let mut ops: Vec<BatchOp> = messages
        .iter()
        .map(|doc| BatchOp::delete(Message::COLLECTION, &doc.id))
        .collect();
    ops.push(BatchOp::delete(Chat::COLLECTION, chat_id));
    let count = ops.len() - 1;
    session.gateway().commit_batch(ops).await?;
    info!(chat = %chat_id, messages = count, "Chat removed");
    Ok(())
}

// ---------------------------------------------------------------------------
// Chat list
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub chat_id: String,
    pub partner: PersonView,
    pub last_message: String,
    pub last_message_time: Option<String>,
    pub unread: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatList {
    pub loading: bool,
    pub chats: Vec<ChatSummary>,
    pub total_unread: u32,
}

/// List entry for `chat` as seen by `me`; `None` if `me` is not a participant.
pub(crate) fn summarize_chat(
    chat: Chat,
    me: &UserId,
    profiles: &HashMap<UserId, UserProfile>,
    avatar_service: &str,
) -> Option<ChatSummary> {
    let partner_id = chat.other_participant(me)?.clone();
    let partner = resolve_person(
        &partner_id,
        profiles,
        chat.participant(&partner_id),
        avatar_service,
    );
    Some(ChatSummary {
        unread: unread_count(&chat, me),
        chat_id: chat.id,
        partner,
        last_message: chat.last_message.unwrap_or_default(),
        last_message_time: chat.last_message_time,
    })
}

pub struct ChatListAggregator {
    me: UserId,
    avatar_service: String,
}

impl Aggregator for ChatListAggregator {
    type Output = ChatList;

    fn aggregate(&self, inputs: &Inputs) -> ChatList {
        if !inputs.is_loaded("chats") {
            return ChatList {
                loading: true,
                ..Default::default()
            };
        }
        let profiles = inputs.profiles("profiles");
        let chats: Vec<ChatSummary> = inputs
            .decode::<Chat>("chats")
            .into_iter()
            .filter_map(|chat| summarize_chat(chat, &self.me, &profiles, &self.avatar_service))
            .collect();
        ChatList {
            loading: false,
            total_unread: chats.iter().map(|c| c.unread).sum(),
            chats,
        }
    }
}

pub(crate) fn my_chats_query(me: &UserId) -> Query {
    Query::collection(Chat::COLLECTION)
        .array_contains("participantIds", me.as_str())
        .order_by("lastMessageTime", Direction::Descending)
}

pub(crate) fn profiles_query(ids: &[UserId]) -> Option<Query> {
    if ids.is_empty() {
        return None;
    }
    let values = ids.iter().map(|id| Value::String(id.to_string())).collect();
    Some(Query::collection(UserProfile::COLLECTION).where_in(DOCUMENT_ID, values))
}

/// Open the list of the user's direct chats, newest first.
pub async fn open_chat_list(session: &Session) -> Result<View<ChatList>> {
    let me = session.uid().clone();
    let existing = session.gateway().query(&my_chats_query(&me)).await?;
    let mut partners: Vec<UserId> = existing
        .iter()
        .filter_map(|doc| doc.decode::<Chat>().ok())
        .filter_map(|chat| chat.other_participant(&me).cloned())
        .collect();
    partners.sort();
    partners.dedup();

    let aggregator = ChatListAggregator {
        me: me.clone(),
        avatar_service: session.config().avatar_service.clone(),
    };
    let mut builder =
        ViewBuilder::new(session, "chat-list", aggregator).source("chats", my_chats_query(&me));
    if let Some(query) = profiles_query(&partners) {
        builder = builder.source("profiles", query);
    }
    Ok(builder.open().await)
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionSummary {
    pub emoji: String,
    pub count: usize,
    pub mine: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub sender: PersonView,
    pub content: String,
    pub created_at: String,
    pub is_mine: bool,
    pub attachments: Vec<Attachment>,
    pub reactions: Vec<ReactionSummary>,
    pub reply_to: Option<ReplySnapshot>,
    /// For my own messages: whether anyone else has read it.
    pub seen: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub loading: bool,
    pub title: String,
    pub days: Vec<DayGroup<MessageView>>,
    pub message_count: usize,
}

fn summarize_reactions(message: &Message, me: &UserId) -> Vec<ReactionSummary> {
    let mut summary: Vec<ReactionSummary> = Vec::new();
    for reaction in &message.reactions {
        let mine = &reaction.user_id == me;
        match summary.iter_mut().find(|s| s.emoji == reaction.emoji) {
            Some(entry) => {
                entry.count += 1;
                entry.mine |= mine;
            }
            None => summary.push(ReactionSummary {
                emoji: reaction.emoji.clone(),
                count: 1,
                mine,
            }),
        }
    }
    summary
}

pub struct ConversationAggregator {
    me: UserId,
    target: MessageTarget,
    avatar_service: String,
}

impl ConversationAggregator {
    fn title(&self, inputs: &Inputs) -> Option<String> {
        match &self.target {
            MessageTarget::Direct { .. } => {
                let chat = inputs.first::<Chat>("chat")?;
                let partner_id = chat.other_participant(&self.me)?.clone();
                let partner = resolve_person(
                    &partner_id,
                    &inputs.profiles("profiles"),
                    chat.participant(&partner_id),
                    &self.avatar_service,
                );
                Some(partner.name)
            }
            MessageTarget::Project { .. } => inputs.first::<Project>("project").map(|p| p.title),
        }
    }
}

impl Aggregator for ConversationAggregator {
    type Output = Conversation;

    fn aggregate(&self, inputs: &Inputs) -> Conversation {
        let profiles = inputs.profiles("profiles");
        let messages: Vec<MessageView> = inputs
            .decode::<Message>("messages")
            .into_iter()
            .filter(|m| m.target().as_ref() == Some(&self.target))
            .map(|m| {
                let is_mine = m.sender.id == self.me;
                MessageView {
                    sender: resolve_person(
                        &m.sender.id,
                        &profiles,
                        Some(&m.sender),
                        &self.avatar_service,
                    ),
                    reactions: summarize_reactions(&m, &self.me),
                    seen: is_mine && m.read_by.iter().any(|u| u != &self.me),
                    is_mine,
                    id: m.id,
                    content: m.content,
                    created_at: m.created_at,
                    attachments: m.attachments,
                    reply_to: m.reply_to,
                }
            })
            .collect();

        let scope_source = match self.target {
            MessageTarget::Direct { .. } => "chat",
            MessageTarget::Project { .. } => "project",
        };
        Conversation {
            loading: !inputs.is_loaded("messages") || !inputs.is_loaded(scope_source),
            title: self
                .title(inputs)
                .unwrap_or_else(|| LOADING_LABEL.to_string()),
            message_count: messages.len(),
            days: group_by_day(messages, |m| m.created_at.as_str()),
        }
    }
}

/// Open a conversation and mark it read in the background.
pub async fn open_conversation(
    session: &Session,
    target: &MessageTarget,
) -> Result<View<Conversation>> {
    let me = session.uid().clone();
    let (scope_source, scope_query, messages_query, people, read_scope) = match target {
        MessageTarget::Direct { chat_id } => {
            let chat = fetch::<Chat>(session.gateway(), chat_id)
                .await?
                .ok_or_else(|| ClientError::not_found("chat"))?;
            if !chat.has_participant(&me) {
                return Err(ClientError::forbidden("not a participant of this chat"));
            }
            (
                "chat",
                Query::collection(Chat::COLLECTION).where_eq(DOCUMENT_ID, chat_id.as_str()),
                Query::collection(Message::COLLECTION).where_eq("chatId", chat_id.as_str()),
                chat.participant_ids,
                ReadScope::Chat(chat_id.clone()),
            )
        }
        MessageTarget::Project { project_id } => {
            let project = load_project(session, project_id).await?;
            require_member(&project, &me)?;
            (
                "project",
                Query::collection(Project::COLLECTION).where_eq(DOCUMENT_ID, project_id.as_str()),
                Query::collection(Message::COLLECTION).where_eq("projectId", project_id.as_str()),
                project.members.iter().map(|m| m.id.clone()).collect(),
                ReadScope::Project(project_id.clone()),
            )
        }
    };

    let aggregator = ConversationAggregator {
        me,
        target: target.clone(),
        avatar_service: session.config().avatar_service.clone(),
    };
    let mut builder = ViewBuilder::new(session, "conversation", aggregator)
        .source(scope_source, scope_query)
        .source(
            "messages",
            messages_query.order_by("createdAt", Direction::Ascending),
        );
    if let Some(query) = profiles_query(&people) {
        builder = builder.source("profiles", query);
    }
    let view = builder.open().await;

    let reader = session.clone();
    session.spawn_write("mark conversation as read", async move {
        mark_as_read(&reader, &read_scope).await.map(|_| ())
    });
    Ok(view)
}
