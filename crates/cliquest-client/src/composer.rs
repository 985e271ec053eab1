//! Message and thread composition.
//!
//! Drafts are validated before any backend call. Attachments are uploaded
//! concurrently, each independently: one failed upload is reported and the
//! rest of the message still goes out. Reactions and poll votes are computed
//! here as pure transformations of the stored arrays.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use cliquest_shared::constants::{
    LAST_MESSAGE_PREVIEW_CHARS, MIN_POLL_OPTIONS, POLL_OPTION_ID_LEN,
};
use cliquest_shared::paths;
use cliquest_shared::types::random_token;
use cliquest_shared::{UserId, ValidationError};
use cliquest_store::document::encode;
use cliquest_store::{
    timestamp_now, Attachment, BatchOp, FileItem, Message, Model, Poll, PollOption, Reaction,
    ReplySnapshot, StoreError, ThreadReply,
};

use crate::error::Result;
use crate::events::{emit_event, UiEvent};
use crate::session::Session;

/// A file picked by the user, not yet uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAttachment {
    pub name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl PendingAttachment {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageDraft {
    pub content: String,
    pub attachments: Vec<PendingAttachment>,
    pub reply_to: Option<ReplySnapshot>,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_attachment(mut self, attachment: PendingAttachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn replying_to(mut self, snapshot: ReplySnapshot) -> Self {
        self.reply_to = Some(snapshot);
        self
    }

    /// Trimmed content.
    pub fn body(&self) -> &str {
        self.content.trim()
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.body().is_empty() && self.attachments.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        Ok(())
    }
}

/// Freeze the replied-to message at reply time.
pub fn reply_snapshot(message: &Message) -> ReplySnapshot {
    ReplySnapshot {
        id: message.id.clone(),
        content: message.content.clone(),
        sender_name: message.sender.name.clone(),
    }
}

pub fn reply_snapshot_of_reply(reply: &ThreadReply) -> ReplySnapshot {
    ReplySnapshot {
        id: reply.id.clone(),
        content: reply.content.clone(),
        sender_name: reply.sender.name.clone(),
    }
}

/// Text stored as a chat's `lastMessage`.
pub fn preview(content: &str, attachments: &[Attachment]) -> String {
    let content = content.trim();
    if content.is_empty() {
        return match attachments.first() {
            Some(a) => format!("📎 {}", a.name),
            None => String::new(),
        };
    }
    content.chars().take(LAST_MESSAGE_PREVIEW_CHARS).collect()
}

/// An attachment stored in object storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub attachment: Attachment,
    pub content_hash: String,
}

/// Upload every attachment under `prefix`, concurrently.
///
/// Oversized files and failed uploads are reported individually and left
/// out of the result.
pub async fn upload_attachments(
    session: &Session,
    prefix: &str,
    attachments: Vec<PendingAttachment>,
) -> Vec<UploadedFile> {
    let max = session.config().max_upload_bytes;
    let uploads = attachments.into_iter().map(|file| async move {
        let size = file.size();
        if size > max {
            return Err((file.name, ValidationError::FileTooLarge { size, max }.to_string()));
        }
        let content_hash = blake3::hash(&file.data).to_hex().to_string();
        let path = format!("{prefix}/{}_{}", &content_hash[..16], file.name);
        match session
            .gateway()
            .upload_blob(&path, file.data, &file.content_type)
            .await
        {
            Ok(url) => Ok(UploadedFile {
                attachment: Attachment {
                    name: file.name,
                    url,
                    content_type: file.content_type,
                    size,
                },
                content_hash,
            }),
            Err(e) => Err((file.name, e.to_string())),
        }
    });

    let mut uploaded = Vec::new();
    for outcome in join_all(uploads).await {
        match outcome {
            Ok(file) => uploaded.push(file),
            Err((file_name, error)) => {
                warn!(file = %file_name, error = %error, "Attachment upload failed");
                emit_event(session.events(), UiEvent::UploadFailed { file_name, error });
            }
        }
    }
    debug!(prefix, count = uploaded.len(), "Attachments uploaded");
    uploaded
}

/// File-manager entry mirroring an uploaded attachment.
pub fn mirror_entry(
    project_id: &str,
    folder: &str,
    created_by: &UserId,
    file: &UploadedFile,
) -> FileItem {
    FileItem {
        id: String::new(),
        name: file.attachment.name.clone(),
        path: paths::normalize(folder),
        project_id: project_id.to_string(),
        created_by: created_by.clone(),
        is_folder: false,
        is_system_folder: false,
        size: Some(file.attachment.size),
        content_type: Some(file.attachment.content_type.clone()),
        url: Some(file.attachment.url.clone()),
        content_hash: Some(file.content_hash.clone()),
        created_at: timestamp_now(),
    }
}

/// Record uploaded attachments in a project system folder.
pub async fn mirror_attachments(
    session: &Session,
    project_id: &str,
    folder: &str,
    files: &[UploadedFile],
) -> Result<()> {
    if files.is_empty() {
        return Ok(());
    }
    let mut ops = Vec::with_capacity(files.len());
    for file in files {
        let entry = mirror_entry(project_id, folder, session.uid(), file);
        ops.push(BatchOp::set(
            FileItem::COLLECTION,
            &session.gateway().new_id(),
            encode(&entry)?,
        ));
    }
    session.gateway().commit_batch(ops).await?;
    debug!(project = %project_id, folder, count = files.len(), "Mirrored attachments");
    Ok(())
}

// ---------------------------------------------------------------------------
// Polls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollDraft {
    pub question: String,
    pub options: Vec<String>,
    pub end_date: Option<String>,
}

impl PollDraft {
    /// Validate and build the stored poll. Blank options are dropped and
    /// every option gets a fresh id unique within the poll.
    pub fn build(&self) -> std::result::Result<Poll, ValidationError> {
        let question = self.question.trim();
        if question.is_empty() {
            return Err(ValidationError::EmptyPollQuestion);
        }
        let texts: Vec<&str> = self
            .options
            .iter()
            .map(|o| o.trim())
            .filter(|o| !o.is_empty())
            .collect();
        if texts.len() < MIN_POLL_OPTIONS {
            return Err(ValidationError::TooFewPollOptions {
                min: MIN_POLL_OPTIONS,
                got: texts.len(),
            });
        }

        let mut options: Vec<PollOption> = Vec::with_capacity(texts.len());
        for text in texts {
            let id = loop {
                let candidate = random_token(POLL_OPTION_ID_LEN);
                if options.iter().all(|o| o.id != candidate) {
                    break candidate;
                }
            };
            options.push(PollOption {
                id,
                text: text.to_string(),
                votes: Vec::new(),
            });
        }

        Ok(Poll {
            question: question.to_string(),
            options,
            end_date: self.end_date.clone().filter(|d| !d.trim().is_empty()),
        })
    }
}

/// Options after `user` votes for `option_id`.
///
/// A user holds at most one vote: voting for another option moves it, and
/// voting again for the current option changes nothing.
pub fn cast_vote(
    poll: &Poll,
    user: &UserId,
    option_id: &str,
    now: DateTime<Utc>,
) -> std::result::Result<Vec<PollOption>, ValidationError> {
    if poll.is_closed_at(now) {
        return Err(ValidationError::PollClosed);
    }
    if !poll.options.iter().any(|o| o.id == option_id) {
        return Err(ValidationError::UnknownPollOption(option_id.to_string()));
    }
    Ok(poll
        .options
        .iter()
        .map(|option| {
            let mut option = option.clone();
            option.votes.retain(|v| v != user);
            if option.id == option_id {
                option.votes.push(user.clone());
            }
            option
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Reactions
// ---------------------------------------------------------------------------

/// Reactions after `user` toggles `emoji`: removed when present, appended
/// otherwise. Other entries keep their order.
pub fn toggle_reaction(reactions: &[Reaction], user: &UserId, emoji: &str) -> Vec<Reaction> {
    let exists = reactions
        .iter()
        .any(|r| &r.user_id == user && r.emoji == emoji);
    let mut next: Vec<Reaction> = reactions
        .iter()
        .filter(|r| !(&r.user_id == user && r.emoji == emoji))
        .cloned()
        .collect();
    if !exists {
        next.push(Reaction {
            emoji: emoji.to_string(),
            user_id: user.clone(),
        });
    }
    next
}

/// Reactions encoded for a field write.
pub fn reactions_value(reactions: &[Reaction]) -> Result<Value> {
    let value = serde_json::to_value(reactions).map_err(StoreError::from)?;
    Ok(value)
}
