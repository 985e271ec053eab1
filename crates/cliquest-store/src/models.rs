//! Domain documents stored in the managed backend.
//!
//! Field names follow the backend's camelCase layout. Every model exposes
//! the document id through an `id` field that is filled on decode and never
//! written back.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use cliquest_shared::avatar::{resolve_avatar_with, resolve_name};
use cliquest_shared::constants::DEFAULT_AVATAR_SERVICE;
use cliquest_shared::paths;
use cliquest_shared::types::{
    JoinRequestStatus, MessageKind, Priority, ProjectStatus, TaskStatus, ThreadStatus, ThreadType,
    UserId,
};

use crate::error::Result;
use crate::gateway::Gateway;

/// A model bound to its backend collection.
pub trait Model: DeserializeOwned + Serialize + Send {
    const COLLECTION: &'static str;
}

/// Fetch and decode one document, `None` if it does not exist.
pub async fn fetch<T: Model>(gateway: &dyn Gateway, id: &str) -> Result<Option<T>> {
    match gateway.get(T::COLLECTION, id).await? {
        Some(doc) => Ok(Some(doc.decode()?)),
        None => Ok(None),
    }
}

/// Current time as the RFC 3339 string stored in `createdAt` fields.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Parse a stored RFC 3339 timestamp.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// A user profile document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default, skip_serializing)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
    #[serde(default, rename = "photoURL", skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
}

impl Model for UserProfile {
    const COLLECTION: &'static str = "users";
}

impl UserProfile {
    pub fn user_id(&self) -> UserId {
        UserId::new(self.id.clone())
    }

    pub fn resolved_name(&self) -> String {
        resolve_name(&[self.display_name.as_deref(), self.name.as_deref()])
    }

    /// Avatar URL: `profileImage`, then `photoURL`, then `avatar`, then generated.
    pub fn resolved_avatar(&self, avatar_service: &str) -> String {
        resolve_avatar_with(
            avatar_service,
            &[
                self.profile_image.as_deref(),
                self.photo_url.as_deref(),
                self.avatar.as_deref(),
            ],
            &self.resolved_name(),
        )
    }

    /// Denormalized snapshot of this profile for embedding in other documents.
    pub fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            id: self.user_id(),
            name: self.resolved_name(),
            avatar: Some(self.resolved_avatar(DEFAULT_AVATAR_SERVICE)),
        }
    }
}

/// Denormalized copy of a user embedded at write time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    pub id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMember {
    pub id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub joined_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RequiredRole {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub is_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub owner: UserSnapshot,
    #[serde(default)]
    pub members: Vec<ProjectMember>,
    /// Ids of `members`, kept alongside for membership queries.
    #[serde(default)]
    pub member_ids: Vec<UserId>,
    #[serde(default)]
    pub required_roles: Vec<RequiredRole>,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub created_at: String,
}

impl Model for Project {
    const COLLECTION: &'static str = "projects";
}

impl Project {
    pub fn is_owner(&self, user: &UserId) -> bool {
        &self.owner.id == user
    }

    pub fn member(&self, user: &UserId) -> Option<&ProjectMember> {
        self.members.iter().find(|m| &m.id == user)
    }

    /// Owners count as members even if the member list lags behind.
    pub fn is_member(&self, user: &UserId) -> bool {
        self.is_owner(user) || self.member(user).is_some()
    }

    pub fn role_of(&self, user: &UserId) -> Option<&str> {
        self.member(user).map(|m| m.role.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub project_id: String,
    pub project_owner_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_title: Option<String>,
    pub user_id: UserId,
    pub user: UserSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub status: JoinRequestStatus,
    #[serde(default)]
    pub created_at: String,
}

impl Model for JoinRequest {
    const COLLECTION: &'static str = "joinRequests";
}

impl JoinRequest {
    /// One request document per requester and project.
    pub fn id_for(project_id: &str, user: &UserId) -> String {
        format!("{project_id}-{user}")
    }
}

// ---------------------------------------------------------------------------
// Chats and messages
// ---------------------------------------------------------------------------

/// A direct-message conversation between exactly two users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub participant_ids: Vec<UserId>,
    #[serde(default)]
    pub participants: Vec<UserSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<String>,
    #[serde(default)]
    pub unread_count: HashMap<UserId, i64>,
}

impl Model for Chat {
    const COLLECTION: &'static str = "chats";
}

impl Chat {
    /// Deterministic chat id for a pair of users, independent of order.
    pub fn id_for(a: &UserId, b: &UserId) -> String {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        format!("{first}_{second}")
    }

    pub fn other_participant(&self, me: &UserId) -> Option<&UserId> {
        self.participant_ids.iter().find(|id| *id != me)
    }

    pub fn participant(&self, user: &UserId) -> Option<&UserSnapshot> {
        self.participants.iter().find(|p| &p.id == user)
    }

    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participant_ids.contains(user)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(rename = "type", default)]
    pub content_type: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji: String,
    pub user_id: UserId,
}

/// Snapshot of a replied-to message, frozen at reply time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplySnapshot {
    pub id: String,
    pub content: String,
    pub sender_name: String,
}

/// Where a message lives. Direct messages belong to a chat, project
/// messages to a project; never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageTarget {
    Direct { chat_id: String },
    Project { project_id: String },
}

impl MessageTarget {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Direct { .. } => MessageKind::Dm,
            Self::Project { .. } => MessageKind::Project,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing)]
    pub id: String,
    #[serde(default)]
    pub content: String,
    pub sender: UserSnapshot,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplySnapshot>,
    #[serde(default)]
    pub read_by: Vec<UserId>,
}

impl Model for Message {
    const COLLECTION: &'static str = "messages";
}

impl Message {
    /// Build a message whose type and scope id agree by construction.
    pub fn new(target: &MessageTarget, sender: UserSnapshot, content: String) -> Self {
        let (chat_id, project_id) = match target {
            MessageTarget::Direct { chat_id } => (Some(chat_id.clone()), None),
            MessageTarget::Project { project_id } => (None, Some(project_id.clone())),
        };
        Self {
            id: String::new(),
            content,
            sender,
            kind: target.kind(),
            chat_id,
            project_id,
            created_at: timestamp_now(),
            attachments: Vec::new(),
            reactions: Vec::new(),
            reply_to: None,
            read_by: Vec::new(),
        }
    }

    /// `None` when the stored type and scope ids disagree.
    pub fn target(&self) -> Option<MessageTarget> {
        match (self.kind, &self.chat_id, &self.project_id) {
            (MessageKind::Dm, Some(chat_id), None) => Some(MessageTarget::Direct {
                chat_id: chat_id.clone(),
            }),
            (MessageKind::Project, None, Some(project_id)) => Some(MessageTarget::Project {
                project_id: project_id.clone(),
            }),
            _ => None,
        }
    }

    pub fn is_read_by(&self, user: &UserId) -> bool {
        self.read_by.contains(user)
    }
}

// ---------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub votes: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub question: String,
    pub options: Vec<PollOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

impl Poll {
    pub fn is_closed_at(&self, now: DateTime<Utc>) -> bool {
        self.end_date
            .as_deref()
            .and_then(parse_timestamp)
            .is_some_and(|end| end <= now)
    }

    pub fn total_votes(&self) -> usize {
        self.options.iter().map(|o| o.votes.len()).sum()
    }

    pub fn voted_option(&self, user: &UserId) -> Option<&PollOption> {
        self.options.iter().find(|o| o.votes.contains(user))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub created_by: UserSnapshot,
    #[serde(rename = "type", default)]
    pub thread_type: ThreadType,
    #[serde(default)]
    pub status: ThreadStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub message_count: i64,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll: Option<Poll>,
    #[serde(default)]
    pub created_at: String,
}

impl Model for Thread {
    const COLLECTION: &'static str = "threads";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ThreadReply {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub thread_id: String,
    pub project_id: String,
    #[serde(default)]
    pub content: String,
    pub sender: UserSnapshot,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplySnapshot>,
    #[serde(default)]
    pub created_at: String,
}

impl Model for ThreadReply {
    const COLLECTION: &'static str = "threadReplies";
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub project_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub assigned_users: Vec<UserId>,
    #[serde(default)]
    pub assigned_roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    pub created_by: UserId,
    #[serde(default)]
    pub created_at: String,
}

impl Model for Task {
    const COLLECTION: &'static str = "tasks";
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// A file or folder of a project's file manager. `path` is the containing
/// folder; the item's own location is `path` joined with `name`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileItem {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub name: String,
    pub path: String,
    pub project_id: String,
    pub created_by: UserId,
    #[serde(default)]
    pub is_folder: bool,
    #[serde(default)]
    pub is_system_folder: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub created_at: String,
}

impl Model for FileItem {
    const COLLECTION: &'static str = "files";
}

impl FileItem {
    pub fn full_path(&self) -> String {
        paths::join(&self.path, &self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{encode, Document};
    use serde_json::json;

    #[test]
    fn test_message_target_invariant() {
        let target = MessageTarget::Direct {
            chat_id: "c1".into(),
        };
        let msg = Message::new(&target, UserSnapshot::default(), "hi".into());
        assert_eq!(msg.kind, MessageKind::Dm);
        assert_eq!(msg.target(), Some(target));

        let data = encode(&msg).unwrap();
        assert_eq!(data["type"], json!("dm"));
        assert!(data.get("projectId").is_none());
        assert!(data.get("id").is_none());
    }

    #[test]
    fn test_inconsistent_message_has_no_target() {
        let doc = Document::new(
            "m1",
            json!({
                "content": "x",
                "sender": { "id": "u1", "name": "A" },
                "type": "dm",
                "projectId": "p1"
            }),
        );
        let msg: Message = doc.decode().unwrap();
        assert_eq!(msg.target(), None);
    }

    #[test]
    fn test_chat_id_is_order_independent() {
        let a = UserId::from("alice");
        let b = UserId::from("bob");
        assert_eq!(Chat::id_for(&a, &b), Chat::id_for(&b, &a));
        assert_eq!(Chat::id_for(&a, &b), "alice_bob");
    }

    #[test]
    fn test_profile_avatar_chain() {
        let doc = Document::new(
            "u1",
            json!({ "displayName": "Ada", "photoURL": "https://p/ada.png", "avatar": "https://a/ada.png" }),
        );
        let profile: UserProfile = doc.decode().unwrap();
        assert_eq!(profile.resolved_name(), "Ada");
        assert_eq!(
            profile.resolved_avatar(DEFAULT_AVATAR_SERVICE),
            "https://p/ada.png"
        );
    }

    #[test]
    fn test_poll_closed() {
        let poll = Poll {
            question: "When?".into(),
            options: vec![],
            end_date: Some("2020-01-01T00:00:00Z".into()),
        };
        assert!(poll.is_closed_at(Utc::now()));
        let open = Poll {
            end_date: None,
            ..poll
        };
        assert!(!open.is_closed_at(Utc::now()));
    }

    #[test]
    fn test_file_item_full_path() {
        let doc = Document::new(
            "f1",
            json!({ "name": "brief.pdf", "path": "/docs", "projectId": "p1", "createdBy": "u1" }),
        );
        let item: FileItem = doc.decode().unwrap();
        assert_eq!(item.full_path(), "/docs/brief.pdf");
        assert!(!item.is_folder);
    }
}
