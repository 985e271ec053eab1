//! Project task board.

use std::collections::HashMap;

use serde::Serialize;
use tracing::info;

use cliquest_shared::constants::LOADING_LABEL;
use cliquest_shared::types::TaskStatus;
use cliquest_shared::{UserId, ValidationError};
use cliquest_store::document::encode;
use cliquest_store::{
    fetch, parse_timestamp, timestamp_now, Direction, Model, Patch, Project, Query, StoreError,
    Task, UserProfile, UserSnapshot, DOCUMENT_ID,
};

use crate::aggregate::{resolve_person, Aggregator, Inputs, PersonView, View, ViewBuilder};
use crate::commands::projects::{load_project, require_member};
use crate::error::{ClientError, Result};
use crate::session::Session;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub assigned_users: Vec<UserId>,
    pub assigned_roles: Vec<String>,
    /// RFC 3339 timestamp.
    pub due_date: Option<String>,
}

async fn load_task(session: &Session, task_id: &str) -> Result<Task> {
    fetch::<Task>(session.gateway(), task_id)
        .await?
        .ok_or_else(|| ClientError::not_found("task"))
}

fn status_value(status: TaskStatus) -> Result<serde_json::Value> {
    let value = serde_json::to_value(status).map_err(StoreError::from)?;
    Ok(value)
}

pub async fn create_task(
    session: &Session,
    project_id: &str,
    draft: TaskDraft,
) -> Result<String> {
    let title = draft.title.trim().to_string();
    if title.is_empty() {
        return Err(ValidationError::MissingField("title").into());
    }
    if let Some(due) = &draft.due_date {
        if parse_timestamp(due).is_none() {
            return Err(ValidationError::InvalidDate(due.clone()).into());
        }
    }
    let project = load_project(session, project_id).await?;
    require_member(&project, session.uid())?;

    let mut assigned_users = draft.assigned_users;
    assigned_users.sort();
    assigned_users.dedup();
    if let Some(outsider) = assigned_users.iter().find(|u| !project.is_member(u)) {
        return Err(ClientError::Conflict(format!(
            "{} is not a member of the project",
            outsider.short()
        )));
    }

    let task = Task {
        id: String::new(),
        project_id: project_id.to_string(),
        title,
        description: draft.description.trim().to_string(),
        status: TaskStatus::Pending,
        assigned_users,
        assigned_roles: draft.assigned_roles,
        due_date: draft.due_date,
        created_by: session.uid().clone(),
        created_at: timestamp_now(),
    };
    let id = session.gateway().add(Task::COLLECTION, encode(&task)?).await?;
    info!(project = %project_id, task = %id, "Task created");
    Ok(id)
}

pub async fn set_task_status(session: &Session, task_id: &str, status: TaskStatus) -> Result<()> {
    let task = load_task(session, task_id).await?;
    let project = load_project(session, &task.project_id).await?;
    require_member(&project, session.uid())?;
    if task.status == status {
        return Ok(());
    }
    session
        .gateway()
        .update(
            Task::COLLECTION,
            task_id,
            Patch::new().set("status", status_value(status)?),
        )
        .await?;
    Ok(())
}

/// Replace a task's assignees.
pub async fn assign_task(
    session: &Session,
    task_id: &str,
    users: Vec<UserId>,
    roles: Vec<String>,
) -> Result<()> {
    let task = load_task(session, task_id).await?;
    let project = load_project(session, &task.project_id).await?;
    require_member(&project, session.uid())?;
    if let Some(outsider) = users.iter().find(|u| !project.is_member(u)) {
        return Err(ClientError::Conflict(format!(
            "{} is not a member of the project",
            outsider.short()
        )));
    }
    let users: Vec<serde_json::Value> = users
        .iter()
        .map(|u| serde_json::Value::String(u.to_string()))
        .collect();
    session
        .gateway()
        .update(
            Task::COLLECTION,
            task_id,
            Patch::new()
                .set("assignedUsers", users)
                .set("assignedRoles", roles),
        )
        .await?;
    Ok(())
}

/// Delete a task. Creator or project owner only.
pub async fn delete_task(session: &Session, task_id: &str) -> Result<()> {
    let task = load_task(session, task_id).await?;
    let me = session.uid();
    if &task.created_by != me {
        let project = load_project(session, &task.project_id).await?;
        if !project.is_owner(me) {
            return Err(ClientError::forbidden(
                "only the creator or the project owner can delete a task",
            ));
        }
    }
    session.gateway().delete(Task::COLLECTION, task_id).await?;
    info!(task = %task_id, "Task deleted");
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskFilter {
    #[default]
    All,
    /// Tasks assigned to the user directly or through their project role.
    AssignedToMe,
}

fn assigned_to(task: &Task, user: &UserId, role: Option<&str>) -> bool {
    task.assigned_users.contains(user)
        || role.is_some_and(|r| task.assigned_roles.iter().any(|a| a == r))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCard {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub assignees: Vec<PersonView>,
    pub assigned_roles: Vec<String>,
    pub due_date: Option<String>,
    pub overdue: bool,
    pub assigned_to_me: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskColumn {
    pub status: TaskStatus,
    pub tasks: Vec<TaskCard>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskBoard {
    pub loading: bool,
    pub project_title: String,
    /// One column per status, in workflow order, including empty ones.
    pub columns: Vec<TaskColumn>,
}

impl TaskBoard {
    pub fn column(&self, status: TaskStatus) -> &[TaskCard] {
        self.columns
            .iter()
            .find(|c| c.status == status)
            .map(|c| c.tasks.as_slice())
            .unwrap_or_default()
    }
}

pub struct TaskBoardAggregator {
    me: UserId,
    filter: TaskFilter,
    avatar_service: String,
}

impl Aggregator for TaskBoardAggregator {
    type Output = TaskBoard;

    fn aggregate(&self, inputs: &Inputs) -> TaskBoard {
        let project = inputs.first::<Project>("project");
        let role = project
            .as_ref()
            .and_then(|p| p.role_of(&self.me).map(str::to_string));
        let profiles: HashMap<UserId, UserProfile> = inputs.profiles("profiles");
        let now = chrono::Utc::now();

        let mut columns: Vec<TaskColumn> = TaskStatus::ALL
            .iter()
            .map(|&status| TaskColumn {
                status,
                tasks: Vec::new(),
            })
            .collect();
        for task in inputs.decode::<Task>("tasks") {
            let mine = assigned_to(&task, &self.me, role.as_deref());
            if self.filter == TaskFilter::AssignedToMe && !mine {
                continue;
            }
            let open = matches!(task.status, TaskStatus::Pending | TaskStatus::InProgress);
            let overdue = open
                && task
                    .due_date
                    .as_deref()
                    .and_then(parse_timestamp)
                    .is_some_and(|due| due < now);
            let card = TaskCard {
                assignees: task
                    .assigned_users
                    .iter()
                    .map(|u| {
                        let snapshot = project
                            .as_ref()
                            .and_then(|p| p.member(u))
                            .map(|m| UserSnapshot {
                                id: m.id.clone(),
                                name: m.name.clone(),
                                avatar: m.avatar.clone(),
                            });
                        resolve_person(u, &profiles, snapshot.as_ref(), &self.avatar_service)
                    })
                    .collect(),
                id: task.id,
                title: task.title,
                description: task.description,
                status: task.status,
                assigned_roles: task.assigned_roles,
                due_date: task.due_date,
                overdue,
                assigned_to_me: mine,
            };
            if let Some(column) = columns.iter_mut().find(|c| c.status == card.status) {
                column.tasks.push(card);
            }
        }

        TaskBoard {
            loading: !inputs.is_loaded("tasks"),
            project_title: project
                .map(|p| p.title)
                .unwrap_or_else(|| LOADING_LABEL.to_string()),
            columns,
        }
    }
}

pub async fn open_task_board(
    session: &Session,
    project_id: &str,
    filter: TaskFilter,
) -> Result<View<TaskBoard>> {
    let project = load_project(session, project_id).await?;
    require_member(&project, session.uid())?;

    let aggregator = TaskBoardAggregator {
        me: session.uid().clone(),
        filter,
        avatar_service: session.config().avatar_service.clone(),
    };
    let mut builder = ViewBuilder::new(session, "tasks", aggregator)
        .source(
            "project",
            Query::collection(Project::COLLECTION).where_eq(DOCUMENT_ID, project_id),
        )
        .source(
            "tasks",
            Query::collection(Task::COLLECTION)
                .where_eq("projectId", project_id)
                .order_by("createdAt", Direction::Ascending),
        );
    if !project.member_ids.is_empty() {
        let ids = project
            .member_ids
            .iter()
            .map(|id| serde_json::Value::String(id.to_string()))
            .collect();
        builder = builder.source(
            "profiles",
            Query::collection(UserProfile::COLLECTION).where_in(DOCUMENT_ID, ids),
        );
    }
    Ok(builder.open().await)
}
