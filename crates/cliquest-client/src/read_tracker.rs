//! Read/unread bookkeeping.
//!
//! Two representations are kept in step: a per-message `readBy` array and,
//! for direct chats, a per-participant `unreadCount` map on the chat
//! document. The map is the source of truth for badges; `readBy` drives
//! per-message read receipts. All counter changes go through atomic
//! backend increments so concurrent senders never lose an update.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use cliquest_shared::types::JoinRequestStatus;
use cliquest_shared::UserId;
use cliquest_store::{fetch, BatchOp, Chat, JoinRequest, Message, Model, Patch, Query};

use crate::error::{ClientError, Result};
use crate::session::Session;

/// Field path of a participant's unread counter on a chat document.
pub fn unread_field(user: &UserId) -> String {
    format!("unreadCount.{user}")
}

/// Unread count of `user` in `chat`, clamped at zero.
pub fn unread_count(chat: &Chat, user: &UserId) -> u32 {
    chat.unread_count
        .get(user)
        .copied()
        .unwrap_or(0)
        .clamp(0, i64::from(u32::MAX)) as u32
}

/// Patch bumping the recipient's unread counter by one.
pub fn unread_increment(recipient: &UserId) -> Patch {
    Patch::new().increment(unread_field(recipient), 1)
}

/// Conversation whose messages are being marked read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadScope {
    Chat(String),
    Project(String),
}

impl ReadScope {
    fn messages_query(&self) -> Query {
        match self {
            Self::Chat(chat_id) => {
                Query::collection(Message::COLLECTION).where_eq("chatId", chat_id.as_str())
            }
            Self::Project(project_id) => {
                Query::collection(Message::COLLECTION).where_eq("projectId", project_id.as_str())
            }
        }
    }
}

/// Mark every message in `scope` not sent by the user as read by them, and
/// zero their unread counter when the scope is a chat. Returns the number of
/// messages newly marked.
///
/// Safe to run repeatedly: `readBy` is extended with an array union and the
/// counter is set, not decremented. Only a participant may mark a chat.
pub async fn mark_as_read(session: &Session, scope: &ReadScope) -> Result<usize> {
    let me = session.uid();
    if let ReadScope::Chat(chat_id) = scope {
        let chat = fetch::<Chat>(session.gateway(), chat_id)
            .await?
            .ok_or_else(|| ClientError::not_found("chat"))?;
        if !chat.has_participant(me) {
            return Err(ClientError::forbidden("not a participant of this chat"));
        }
    }
    let messages = session.gateway().query(&scope.messages_query()).await?;

    let me_value = Value::String(me.to_string());
    let mut ops: Vec<BatchOp> = messages
        .iter()
        .filter_map(|doc| {
            let message: Message = doc.decode().ok()?;
            if &message.sender.id == me || message.is_read_by(me) {
                return None;
            }
            Some(BatchOp::update(
                Message::COLLECTION,
                &doc.id,
                Patch::new().array_union("readBy", vec![me_value.clone()]),
            ))
        })
        .collect();
    let marked = ops.len();

    if let ReadScope::Chat(chat_id) = scope {
        ops.push(BatchOp::update(
            Chat::COLLECTION,
            chat_id,
            Patch::new().set(unread_field(me), 0),
        ));
    }

    if ops.is_empty() {
        return Ok(0);
    }
    session.gateway().commit_batch(ops).await?;
    debug!(scope = ?scope, marked, "Marked messages read");
    Ok(marked)
}

/// Notification badge breakdown for the signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeCounts {
    /// Join requests to my projects still awaiting a first look.
    pub pending_requests: u32,
    /// Decisions on my own join requests not yet dismissed.
    pub request_updates: u32,
    pub unread_messages: u32,
}

impl BadgeCounts {
    pub fn compute(
        me: &UserId,
        incoming: &[JoinRequest],
        mine: &[JoinRequest],
        chats: &[Chat],
    ) -> Self {
        Self {
            pending_requests: incoming
                .iter()
                .filter(|r| &r.project_owner_id == me && r.status == JoinRequestStatus::Pending)
                .count() as u32,
            request_updates: mine
                .iter()
                .filter(|r| &r.user_id == me && r.status.is_decided())
                .count() as u32,
            unread_messages: chats.iter().map(|c| unread_count(c, me)).sum(),
        }
    }

    pub fn total(&self) -> u32 {
        self.pending_requests + self.request_updates + self.unread_messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{session_on, test_session};
    use cliquest_store::{MessageTarget, UserSnapshot};
    use serde_json::json;

    fn snapshot(uid: &str) -> UserSnapshot {
        UserSnapshot {
            id: UserId::new(uid),
            name: uid.into(),
            avatar: None,
        }
    }

    fn seed_message(gateway: &cliquest_store::MemoryGateway, id: &str, chat: &str, from: &str) {
        let target = MessageTarget::Direct {
            chat_id: chat.into(),
        };
        let message = Message::new(&target, snapshot(from), format!("hello {id}"));
        gateway.seed(
            Message::COLLECTION,
            id,
            cliquest_store::document::encode(&message).unwrap(),
        );
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let (alice, gateway, _events) = test_session("alice");
        let (carol, _carol_events) = session_on(&gateway, "carol");
        gateway.seed(Chat::COLLECTION, "c1", json!({"participantIds": ["alice", "bob"]}));

        let bob = UserId::new("bob");
        let a = alice.gateway().update(Chat::COLLECTION, "c1", unread_increment(&bob));
        let c = carol.gateway().update(Chat::COLLECTION, "c1", unread_increment(&bob));
        let (a, c) = tokio::join!(a, c);
        a.unwrap();
        c.unwrap();

        let chat: Chat = gateway.documents(Chat::COLLECTION)[0].decode().unwrap();
        assert_eq!(unread_count(&chat, &bob), 2);
    }

    #[tokio::test]
    async fn test_mark_as_read_is_idempotent() {
        let (bob, gateway, _events) = test_session("bob");
        gateway.seed(
            Chat::COLLECTION,
            "c1",
            json!({"participantIds": ["alice", "bob"], "unreadCount": {"bob": 2}}),
        );
        seed_message(&gateway, "m1", "c1", "alice");
        seed_message(&gateway, "m2", "c1", "alice");
        seed_message(&gateway, "m3", "c1", "bob");

        let scope = ReadScope::Chat("c1".into());
        assert_eq!(mark_as_read(&bob, &scope).await.unwrap(), 2);
        let first: Vec<_> = gateway.documents(Message::COLLECTION);
        let chat_after_first = gateway.document(Chat::COLLECTION, "c1");

        assert_eq!(mark_as_read(&bob, &scope).await.unwrap(), 0);
        assert_eq!(gateway.documents(Message::COLLECTION), first);
        assert_eq!(gateway.document(Chat::COLLECTION, "c1"), chat_after_first);

        let chat: Chat = gateway.documents(Chat::COLLECTION)[0].decode().unwrap();
        assert_eq!(unread_count(&chat, &UserId::new("bob")), 0);
        let m3: Message = gateway
            .documents(Message::COLLECTION)
            .into_iter()
            .find(|d| d.id == "m3")
            .unwrap()
            .decode()
            .unwrap();
        assert!(m3.read_by.is_empty());
    }

    #[tokio::test]
    async fn test_outsider_cannot_mark_chat_read() {
        let (carol, gateway, _events) = test_session("carol");
        gateway.seed(
            Chat::COLLECTION,
            "c1",
            json!({"participantIds": ["alice", "bob"], "unreadCount": {"bob": 1}}),
        );
        seed_message(&gateway, "m1", "c1", "alice");
        let before = gateway.write_count();

        assert!(matches!(
            mark_as_read(&carol, &ReadScope::Chat("c1".into())).await,
            Err(ClientError::Forbidden(_))
        ));
        assert!(matches!(
            mark_as_read(&carol, &ReadScope::Chat("missing".into())).await,
            Err(ClientError::NotFound(_))
        ));
        assert_eq!(gateway.write_count(), before);
        let m1: Message = gateway.documents(Message::COLLECTION)[0].decode().unwrap();
        assert!(m1.read_by.is_empty());
    }

    #[tokio::test]
    async fn test_project_scope_without_unread_writes_nothing() {
        let (alice, gateway, _events) = test_session("alice");
        let before = gateway.write_count();
        let marked = mark_as_read(&alice, &ReadScope::Project("p1".into())).await.unwrap();
        assert_eq!(marked, 0);
        assert_eq!(gateway.write_count(), before);
    }

    #[test]
    fn test_badge_total() {
        let me = UserId::new("alice");
        let request = |status, owner: &str, user: &str| JoinRequest {
            project_owner_id: UserId::new(owner),
            user_id: UserId::new(user),
            status,
            ..Default::default()
        };
        let incoming = vec![
            request(JoinRequestStatus::Pending, "alice", "bob"),
            request(JoinRequestStatus::Pending, "alice", "carol"),
            request(JoinRequestStatus::Read, "alice", "dave"),
        ];
        let mine = vec![
            request(JoinRequestStatus::Accepted, "erin", "alice"),
            request(JoinRequestStatus::Pending, "erin", "alice"),
        ];
        let mut chat_a = Chat::default();
        chat_a.unread_count.insert(me.clone(), 3);
        let mut chat_b = Chat::default();
        chat_b.unread_count.insert(me.clone(), 1);
        chat_b.unread_count.insert(UserId::new("bob"), 7);

        let badge = BadgeCounts::compute(&me, &incoming, &mine, &[chat_a, chat_b]);
        assert_eq!(badge.pending_requests, 2);
        assert_eq!(badge.request_updates, 1);
        assert_eq!(badge.unread_messages, 4);
        assert_eq!(badge.total(), 7);
    }

    #[test]
    fn test_negative_counter_reads_as_zero() {
        let mut chat = Chat::default();
        chat.unread_count.insert(UserId::new("bob"), -3);
        assert_eq!(unread_count(&chat, &UserId::new("bob")), 0);
    }
}
