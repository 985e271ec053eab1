//! Project discussion threads.
//!
//! Threads carry an optional poll and attachments; replies live in their own
//! collection. `messageCount` on a thread is advisory and only ever bumped
//! with an atomic increment.

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use cliquest_shared::constants::{DISCUSSIONS_FOLDER, LOADING_LABEL};
use cliquest_shared::types::{Priority, ThreadStatus, ThreadType};
use cliquest_shared::{UserId, ValidationError};
use cliquest_store::document::encode;
use cliquest_store::{
    fetch, timestamp_now, Attachment, BatchOp, Direction, Model, Patch, Poll, Project, Query,
    ReplySnapshot, StoreError, Thread, ThreadReply, UserProfile, DOCUMENT_ID,
};

use crate::aggregate::{
    group_by_day, resolve_person, Aggregator, DayGroup, Inputs, PersonView, View, ViewBuilder,
};
use crate::commands::files::ensure_system_folders;
use crate::commands::projects::{load_project, require_member};
use crate::composer::{
    cast_vote, mirror_attachments, upload_attachments, MessageDraft, PendingAttachment,
    PollDraft, UploadedFile,
};
use crate::error::{ClientError, Result};
use crate::search::{filter_items, DebouncedSearch, Searchable};
use crate::session::Session;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadDraft {
    pub title: String,
    pub content: String,
    pub thread_type: ThreadType,
    pub priority: Priority,
    pub attachments: Vec<PendingAttachment>,
    pub poll: Option<PollDraft>,
}

async fn load_thread(session: &Session, thread_id: &str) -> Result<Thread> {
    fetch::<Thread>(session.gateway(), thread_id)
        .await?
        .ok_or_else(|| ClientError::not_found("thread"))
}

/// Upload discussion attachments and record them in the discussions folder.
async fn attach(
    session: &Session,
    project_id: &str,
    files: Vec<PendingAttachment>,
) -> Vec<UploadedFile> {
    if files.is_empty() {
        return Vec::new();
    }
    let prefix = format!("projects/{project_id}/discussions");
    upload_attachments(session, &prefix, files).await
}

async fn mirror(session: &Session, project_id: &str, uploaded: &[UploadedFile]) {
    if uploaded.is_empty() {
        return;
    }
    let mirrored = async {
        ensure_system_folders(session, project_id).await?;
        mirror_attachments(session, project_id, DISCUSSIONS_FOLDER, uploaded).await
    }
    .await;
    session.report("file attachments in the discussions folder", mirrored);
}

/// Start a thread in a project. Returns the thread id.
pub async fn create_thread(
    session: &Session,
    project_id: &str,
    draft: ThreadDraft,
) -> Result<String> {
    let title = draft.title.trim().to_string();
    if title.is_empty() {
        return Err(ValidationError::MissingField("title").into());
    }
    let poll: Option<Poll> = draft.poll.as_ref().map(PollDraft::build).transpose()?;

    let project = load_project(session, project_id).await?;
    require_member(&project, session.uid())?;

    let uploaded = attach(session, project_id, draft.attachments).await;
    let thread = Thread {
        id: String::new(),
        project_id: project_id.to_string(),
        title,
        content: draft.content.trim().to_string(),
        created_by: session.me_snapshot(),
        thread_type: draft.thread_type,
        status: ThreadStatus::Open,
        priority: draft.priority,
        message_count: 0,
        attachments: uploaded.iter().map(|f| f.attachment.clone()).collect(),
        poll,
        created_at: timestamp_now(),
    };
    let written = session
        .gateway()
        .add(Thread::COLLECTION, encode(&thread)?)
        .await;
    mirror(session, project_id, &uploaded).await;

    let id = written?;
    info!(project = %project_id, thread = %id, "Thread created");
    Ok(id)
}

/// Reply to a thread. Returns the reply id.
pub async fn reply_to_thread(
    session: &Session,
    thread_id: &str,
    draft: MessageDraft,
) -> Result<String> {
    draft.validate()?;
    let thread = load_thread(session, thread_id).await?;
    let project = load_project(session, &thread.project_id).await?;
    require_member(&project, session.uid())?;

    let content = draft.body().to_string();
    let uploaded = attach(session, &thread.project_id, draft.attachments).await;
    if content.is_empty() && uploaded.is_empty() {
        return Err(ValidationError::EmptyMessage.into());
    }

    let reply = ThreadReply {
        id: String::new(),
        thread_id: thread_id.to_string(),
        project_id: thread.project_id.clone(),
        content,
        sender: session.me_snapshot(),
        attachments: uploaded.iter().map(|f| f.attachment.clone()).collect(),
        reply_to: draft.reply_to,
        created_at: timestamp_now(),
    };
    let reply_id = session.gateway().new_id();
    let written = session
        .gateway()
        .commit_batch(vec![
            BatchOp::set(ThreadReply::COLLECTION, &reply_id, encode(&reply)?),
            BatchOp::update(
                Thread::COLLECTION,
                thread_id,
                Patch::new().increment("messageCount", 1),
            ),
        ])
        .await;
    mirror(session, &thread.project_id, &uploaded).await;

    written?;
    Ok(reply_id)
}

pub async fn set_thread_status(
    session: &Session,
    thread_id: &str,
    status: ThreadStatus,
) -> Result<()> {
    let thread = load_thread(session, thread_id).await?;
    let project = load_project(session, &thread.project_id).await?;
    require_member(&project, session.uid())?;
    if thread.status == status {
        return Ok(());
    }
    let value = match status {
        ThreadStatus::Open => "open",
        ThreadStatus::Resolved => "resolved",
    };
    session
        .gateway()
        .update(Thread::COLLECTION, thread_id, Patch::new().set("status", value))
        .await?;
    Ok(())
}

/// Vote in a thread's poll, moving any earlier vote of the user.
pub async fn vote(session: &Session, thread_id: &str, option_id: &str) -> Result<()> {
    let thread = load_thread(session, thread_id).await?;
    let poll = thread
        .poll
        .as_ref()
        .ok_or_else(|| ClientError::not_found("poll"))?;
    let project = load_project(session, &thread.project_id).await?;
    require_member(&project, session.uid())?;

    let me = session.uid();
    if poll.voted_option(me).is_some_and(|o| o.id == option_id) {
        return Ok(());
    }
    let options = cast_vote(poll, me, option_id, Utc::now())?;
    let options = serde_json::to_value(options).map_err(StoreError::from)?;
    session
        .gateway()
        .update(
            Thread::COLLECTION,
            thread_id,
            Patch::new().set("poll.options", options),
        )
        .await?;
    Ok(())
}

/// Delete a thread and its replies. Creator or project owner only.
pub async fn delete_thread(session: &Session, thread_id: &str) -> Result<()> {
    let thread = load_thread(session, thread_id).await?;
    let me = session.uid();
    if &thread.created_by.id != me {
        let project = load_project(session, &thread.project_id).await?;
        if !project.is_owner(me) {
            return Err(ClientError::forbidden(
                "only the author or the project owner can delete a thread",
            ));
        }
    }

    let replies = session
        .gateway()
        .query(&Query::collection(ThreadReply::COLLECTION).where_eq("threadId", thread_id))
        .await?;
    let mut ops: Vec<BatchOp> = replies
        .iter()
        .map(|doc| BatchOp::delete(ThreadReply::COLLECTION, &doc.id))
        .collect();
    ops.push(BatchOp::delete(Thread::COLLECTION, thread_id));
    session.gateway().commit_batch(ops).await?;
    info!(thread = %thread_id, "Thread deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOptionView {
    pub id: String,
    pub text: String,
    pub votes: usize,
    pub mine: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollView {
    pub question: String,
    pub options: Vec<PollOptionView>,
    pub total_votes: usize,
    pub end_date: Option<String>,
}

impl PollView {
    fn of(poll: &Poll, me: &UserId) -> Self {
        Self {
            question: poll.question.clone(),
            options: poll
                .options
                .iter()
                .map(|o| PollOptionView {
                    id: o.id.clone(),
                    text: o.text.clone(),
                    votes: o.votes.len(),
                    mine: o.votes.contains(me),
                })
                .collect(),
            total_votes: poll.total_votes(),
            end_date: poll.end_date.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadCard {
    pub id: String,
    pub title: String,
    pub content: String,
    pub thread_type: ThreadType,
    pub status: ThreadStatus,
    pub priority: Priority,
    pub author: PersonView,
    pub message_count: i64,
    pub attachments: Vec<Attachment>,
    pub poll: Option<PollView>,
    pub created_at: String,
}

impl Searchable for ThreadCard {
    fn search_fields(&self) -> Vec<&str> {
        vec![
            &self.title,
            &self.content,
            &self.author.name,
            self.thread_type.as_str(),
            self.priority.as_str(),
        ]
    }
}

fn thread_card(
    thread: Thread,
    me: &UserId,
    profiles: &HashMap<UserId, UserProfile>,
    avatar_service: &str,
) -> ThreadCard {
    ThreadCard {
        author: resolve_person(
            &thread.created_by.id,
            profiles,
            Some(&thread.created_by),
            avatar_service,
        ),
        poll: thread.poll.as_ref().map(|p| PollView::of(p, me)),
        id: thread.id,
        title: thread.title,
        content: thread.content,
        thread_type: thread.thread_type,
        status: thread.status,
        priority: thread.priority,
        message_count: thread.message_count.max(0),
        attachments: thread.attachments,
        created_at: thread.created_at,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadFilter {
    pub thread_type: Option<ThreadType>,
    pub status: Option<ThreadStatus>,
}

impl ThreadFilter {
    fn accepts(&self, thread: &Thread) -> bool {
        self.thread_type.map_or(true, |t| t == thread.thread_type)
            && self.status.map_or(true, |s| s == thread.status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadBoard {
    pub loading: bool,
    pub project_title: String,
    pub threads: Vec<ThreadCard>,
    pub open_count: usize,
}

pub struct ThreadBoardAggregator {
    me: UserId,
    filter: ThreadFilter,
    avatar_service: String,
}

impl Aggregator for ThreadBoardAggregator {
    type Output = ThreadBoard;

    fn aggregate(&self, inputs: &Inputs) -> ThreadBoard {
        let profiles = inputs.profiles("profiles");
        let threads = inputs.decode::<Thread>("threads");
        let open_count = threads
            .iter()
            .filter(|t| t.status == ThreadStatus::Open)
            .count();
        ThreadBoard {
            loading: !inputs.is_loaded("threads"),
            project_title: inputs
                .first::<Project>("project")
                .map(|p| p.title)
                .unwrap_or_else(|| LOADING_LABEL.to_string()),
            threads: threads
                .into_iter()
                .filter(|t| self.filter.accepts(t))
                .map(|t| thread_card(t, &self.me, &profiles, &self.avatar_service))
                .collect(),
            open_count,
        }
    }
}

fn project_query(project_id: &str) -> Query {
    Query::collection(Project::COLLECTION).where_eq(DOCUMENT_ID, project_id)
}

fn members_query(project: &Project) -> Option<Query> {
    if project.members.is_empty() {
        return None;
    }
    let ids = project
        .members
        .iter()
        .map(|m| serde_json::Value::String(m.id.to_string()))
        .collect();
    Some(Query::collection(UserProfile::COLLECTION).where_in(DOCUMENT_ID, ids))
}

/// Open a project's threads, newest first.
pub async fn open_threads(
    session: &Session,
    project_id: &str,
    filter: ThreadFilter,
) -> Result<View<ThreadBoard>> {
    let project = load_project(session, project_id).await?;
    require_member(&project, session.uid())?;

    let aggregator = ThreadBoardAggregator {
        me: session.uid().clone(),
        filter,
        avatar_service: session.config().avatar_service.clone(),
    };
    let mut builder = ViewBuilder::new(session, "threads", aggregator)
        .source("project", project_query(project_id))
        .source(
            "threads",
            Query::collection(Thread::COLLECTION)
                .where_eq("projectId", project_id)
                .order_by("createdAt", Direction::Descending),
        );
    if let Some(query) = members_query(&project) {
        builder = builder.source("profiles", query);
    }
    Ok(builder.open().await)
}

/// Debounced full-text search over the threads currently loaded in `view`.
pub fn thread_search(
    session: &Session,
    view: &View<ThreadBoard>,
) -> DebouncedSearch<Vec<ThreadCard>> {
    let board = view.watch();
    let initial = board.borrow().threads.clone();
    DebouncedSearch::spawn(session.config().search_debounce, initial, move |query| {
        filter_items(&board.borrow().threads, query)
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyView {
    pub id: String,
    pub sender: PersonView,
    pub content: String,
    pub created_at: String,
    pub is_mine: bool,
    pub attachments: Vec<Attachment>,
    pub reply_to: Option<ReplySnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadDetail {
    pub loading: bool,
    /// `None` while loading or once the thread has been deleted.
    pub thread: Option<ThreadCard>,
    pub replies: Vec<DayGroup<ReplyView>>,
    pub reply_count: usize,
}

pub struct ThreadDetailAggregator {
    me: UserId,
    avatar_service: String,
}

impl Aggregator for ThreadDetailAggregator {
    type Output = ThreadDetail;

    fn aggregate(&self, inputs: &Inputs) -> ThreadDetail {
        let profiles = inputs.profiles("profiles");
        let replies: Vec<ReplyView> = inputs
            .decode::<ThreadReply>("replies")
            .into_iter()
            .map(|r| ReplyView {
                sender: resolve_person(
                    &r.sender.id,
                    &profiles,
                    Some(&r.sender),
                    &self.avatar_service,
                ),
                is_mine: r.sender.id == self.me,
                id: r.id,
                content: r.content,
                created_at: r.created_at,
                attachments: r.attachments,
                reply_to: r.reply_to,
            })
            .collect();
        ThreadDetail {
            loading: !inputs.is_loaded("thread") || !inputs.is_loaded("replies"),
            thread: inputs
                .first::<Thread>("thread")
                .map(|t| thread_card(t, &self.me, &profiles, &self.avatar_service)),
            reply_count: replies.len(),
            replies: group_by_day(replies, |r| r.created_at.as_str()),
        }
    }
}

pub async fn open_thread(session: &Session, thread_id: &str) -> Result<View<ThreadDetail>> {
    let thread = load_thread(session, thread_id).await?;
    let project = load_project(session, &thread.project_id).await?;
    require_member(&project, session.uid())?;

    let aggregator = ThreadDetailAggregator {
        me: session.uid().clone(),
        avatar_service: session.config().avatar_service.clone(),
    };
    let mut builder = ViewBuilder::new(session, "thread", aggregator)
        .source(
            "thread",
            Query::collection(Thread::COLLECTION).where_eq(DOCUMENT_ID, thread_id),
        )
        .source(
            "replies",
            Query::collection(ThreadReply::COLLECTION)
                .where_eq("threadId", thread_id)
                .order_by("createdAt", Direction::Ascending),
        );
    if let Some(query) = members_query(&project) {
        builder = builder.source("profiles", query);
    }
    Ok(builder.open().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::projects::tests::project_with_member;
    use crate::session::tests::{session_on, test_session};
    use cliquest_store::FileItem;
    use std::time::Duration;

    fn question(title: &str) -> ThreadDraft {
        ThreadDraft {
            title: title.into(),
            content: "details".into(),
            thread_type: ThreadType::Question,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_thread_requires_title_and_valid_poll() {
        let (alice, gateway, _events) = test_session("alice");
        let before = gateway.write_count();
        assert!(matches!(
            create_thread(&alice, "p1", question("  ")).await,
            Err(ClientError::Validation(ValidationError::MissingField("title")))
        ));
        let mut draft = question("Lunch");
        draft.poll = Some(PollDraft {
            question: "Where?".into(),
            options: vec!["Here".into()],
            end_date: None,
        });
        assert!(matches!(
            create_thread(&alice, "p1", draft).await,
            Err(ClientError::Validation(ValidationError::TooFewPollOptions { .. }))
        ));
        assert_eq!(gateway.write_count(), before);
    }

    #[tokio::test]
    async fn test_replies_bump_message_count() {
        let (alice, gateway, _events) = test_session("alice");
        let (bob, _bob_events) = session_on(&gateway, "bob");
        let project_id = project_with_member(&alice, &bob).await;
        let thread_id = create_thread(&alice, &project_id, question("Deploy?")).await.unwrap();

        let (a, b) = tokio::join!(
            reply_to_thread(&alice, &thread_id, MessageDraft::text("yes")),
            reply_to_thread(&bob, &thread_id, MessageDraft::text("no")),
        );
        a.unwrap();
        b.unwrap();

        let thread = load_thread(&alice, &thread_id).await.unwrap();
        assert_eq!(thread.message_count, 2);
    }

    #[tokio::test]
    async fn test_thread_attachment_mirrored_into_discussions() {
        let (alice, gateway, _events) = test_session("alice");
        let (bob, _bob_events) = session_on(&gateway, "bob");
        let project_id = project_with_member(&alice, &bob).await;

        let mut draft = question("Logo");
        draft.attachments = vec![PendingAttachment::new("logo.png", "image/png", &b"png"[..])];
        let thread_id = create_thread(&bob, &project_id, draft).await.unwrap();

        let thread = load_thread(&alice, &thread_id).await.unwrap();
        assert_eq!(thread.attachments.len(), 1);
        let mirrored: Vec<FileItem> = gateway
            .documents(FileItem::COLLECTION)
            .iter()
            .map(|d| d.decode().unwrap())
            .filter(|f: &FileItem| !f.is_folder)
            .collect();
        assert_eq!(mirrored.len(), 1);
        assert_eq!(mirrored[0].path, "/discussions");
    }

    #[tokio::test]
    async fn test_poll_vote_moves_and_repeats_are_noops() {
        let (alice, gateway, _events) = test_session("alice");
        let (bob, _bob_events) = session_on(&gateway, "bob");
        let project_id = project_with_member(&alice, &bob).await;

        let mut draft = question("Lunch");
        draft.poll = Some(PollDraft {
            question: "Where?".into(),
            options: vec!["Pizza".into(), "Sushi".into()],
            end_date: None,
        });
        let thread_id = create_thread(&alice, &project_id, draft).await.unwrap();
        let poll = load_thread(&alice, &thread_id).await.unwrap().poll.unwrap();
        let (pizza, sushi) = (poll.options[0].id.clone(), poll.options[1].id.clone());

        vote(&bob, &thread_id, &pizza).await.unwrap();
        vote(&bob, &thread_id, &sushi).await.unwrap();
        let writes = gateway.write_count();
        vote(&bob, &thread_id, &sushi).await.unwrap();
        assert_eq!(gateway.write_count(), writes);

        let poll = load_thread(&alice, &thread_id).await.unwrap().poll.unwrap();
        assert!(poll.options[0].votes.is_empty());
        assert_eq!(poll.options[1].votes, vec![UserId::new("bob")]);
    }

    #[tokio::test]
    async fn test_delete_thread_permissions() {
        let (alice, gateway, _events) = test_session("alice");
        let (bob, _bob_events) = session_on(&gateway, "bob");
        let project_id = project_with_member(&alice, &bob).await;
        let by_alice = create_thread(&alice, &project_id, question("A")).await.unwrap();
        let by_bob = create_thread(&bob, &project_id, question("B")).await.unwrap();
        reply_to_thread(&alice, &by_bob, MessageDraft::text("ok")).await.unwrap();

        assert!(matches!(
            delete_thread(&bob, &by_alice).await,
            Err(ClientError::Forbidden(_))
        ));
        delete_thread(&alice, &by_bob).await.unwrap();
        assert!(gateway.documents(ThreadReply::COLLECTION).is_empty());
        assert_eq!(gateway.documents(Thread::COLLECTION).len(), 1);
    }

    #[tokio::test]
    async fn test_board_filters_and_search() {
        let (alice, gateway, _events) = test_session("alice");
        let (bob, _bob_events) = session_on(&gateway, "bob");
        let project_id = project_with_member(&alice, &bob).await;
        create_thread(&alice, &project_id, question("Deploy friday?")).await.unwrap();
        let idea = ThreadDraft {
            title: "Dark mode".into(),
            thread_type: ThreadType::Idea,
            ..Default::default()
        };
        let idea_id = create_thread(&bob, &project_id, idea).await.unwrap();
        set_thread_status(&alice, &idea_id, ThreadStatus::Resolved).await.unwrap();

        let filter = ThreadFilter {
            thread_type: Some(ThreadType::Question),
            status: None,
        };
        let mut view = open_threads(&alice, &project_id, filter).await.unwrap();
        let board = tokio::time::timeout(
            Duration::from_secs(1),
            view.wait_for(|b| !b.loading && b.project_title == "Rover"),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(board.threads.len(), 1);
        assert_eq!(board.open_count, 1);
        assert_eq!(board.project_title, "Rover");

        let mut all = open_threads(&alice, &project_id, ThreadFilter::default()).await.unwrap();
        all.wait_for(|b| b.threads.len() == 2).await.unwrap();
        let search = thread_search(&alice, &all);
        let mut results = search.results();
        search.input("DARK");
        tokio::time::timeout(Duration::from_secs(2), results.changed())
            .await
            .unwrap()
            .unwrap();
        let found = results.borrow().clone();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].author.name, "BOB");
    }

    #[tokio::test]
    async fn test_thread_detail_groups_replies() {
        let (alice, gateway, _events) = test_session("alice");
        let (bob, _bob_events) = session_on(&gateway, "bob");
        let project_id = project_with_member(&alice, &bob).await;
        let thread_id = create_thread(&alice, &project_id, question("Plan")).await.unwrap();
        reply_to_thread(&bob, &thread_id, MessageDraft::text("first")).await.unwrap();
        reply_to_thread(&alice, &thread_id, MessageDraft::text("second")).await.unwrap();

        let mut view = open_thread(&alice, &thread_id).await.unwrap();
        let detail = tokio::time::timeout(
            Duration::from_secs(1),
            view.wait_for(|d| !d.loading && d.reply_count == 2),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(detail.replies.len(), 1);
        let mine = detail.replies[0].items.iter().filter(|r| r.is_mine).count();
        assert_eq!(mine, 1);
        assert_eq!(detail.thread.unwrap().message_count, 2);
    }
}
