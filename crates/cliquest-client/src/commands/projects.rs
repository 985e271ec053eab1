//! Projects and join requests.
//!
//! Only the project owner decides on join requests. Acceptance updates the
//! request and enrols the requester in the same batch.

use serde_json::Value;
use tracing::info;

use cliquest_shared::constants::OWNER_ROLE;
use cliquest_shared::types::{JoinRequestStatus, ProjectStatus};
use cliquest_shared::{UserId, ValidationError};
use cliquest_store::document::encode;
use cliquest_store::{
    fetch, timestamp_now, BatchOp, JoinRequest, Milestone, Model, Patch, Project, ProjectMember,
    Query, RequiredRole, UserSnapshot,
};

use crate::commands::files::system_folder_ops;
use crate::error::{ClientError, Result};
use crate::session::Session;

pub(crate) async fn load_project(session: &Session, project_id: &str) -> Result<Project> {
    fetch::<Project>(session.gateway(), project_id)
        .await?
        .ok_or_else(|| ClientError::not_found("project"))
}

pub(crate) fn require_member(project: &Project, user: &UserId) -> Result<()> {
    if project.is_member(user) {
        Ok(())
    } else {
        Err(ClientError::forbidden("not a member of this project"))
    }
}

pub(crate) fn require_owner(project: &Project, user: &UserId) -> Result<()> {
    if project.is_owner(user) {
        Ok(())
    } else {
        Err(ClientError::forbidden("only the project owner can do this"))
    }
}

fn member_entry(snapshot: &UserSnapshot, role: &str, joined_at: String) -> ProjectMember {
    ProjectMember {
        id: snapshot.id.clone(),
        name: snapshot.name.clone(),
        avatar: snapshot.avatar.clone(),
        role: role.to_string(),
        joined_at,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewProject {
    pub title: String,
    pub description: String,
    pub required_roles: Vec<RequiredRole>,
    pub milestones: Vec<Milestone>,
}

/// Create a project owned by the signed-in user, with its system folders.
pub async fn create_project(session: &Session, draft: NewProject) -> Result<String> {
    let title = draft.title.trim();
    if title.is_empty() {
        return Err(ValidationError::MissingField("title").into());
    }

    let owner = session.me_snapshot();
    let project = Project {
        id: String::new(),
        title: title.to_string(),
        description: draft.description.trim().to_string(),
        members: vec![member_entry(&owner, OWNER_ROLE, timestamp_now())],
        member_ids: vec![owner.id.clone()],
        owner,
        required_roles: draft.required_roles,
        milestones: draft.milestones,
        status: ProjectStatus::Open,
        created_at: timestamp_now(),
    };

    let project_id = session.gateway().new_id();
    let mut ops = vec![BatchOp::set(
        Project::COLLECTION,
        &project_id,
        encode(&project)?,
    )];
    ops.extend(system_folder_ops(&project_id, session.uid())?);
    session.gateway().commit_batch(ops).await?;
    info!(project = %project_id, "Project created");
    Ok(project_id)
}

/// Delete a project and its join requests. Owner only.
pub async fn delete_project(session: &Session, project_id: &str) -> Result<()> {
    let project = load_project(session, project_id).await?;
    require_owner(&project, session.uid())?;

    let requests = session
        .gateway()
        .query(&Query::collection(JoinRequest::COLLECTION).where_eq("projectId", project_id))
        .await?;
    let mut ops: Vec<BatchOp> = requests
        .iter()
        .map(|doc| BatchOp::delete(JoinRequest::COLLECTION, &doc.id))
        .collect();
    ops.push(BatchOp::delete(Project::COLLECTION, project_id));
    session.gateway().commit_batch(ops).await?;
    info!(project = %project_id, "Project deleted");
    Ok(())
}

/// Ask to join a project. Returns the request id.
///
/// The id is derived from the project and the requester, so a repeated
/// submit lands on the same document.
pub async fn request_to_join(
    session: &Session,
    project_id: &str,
    role: Option<String>,
    message: Option<String>,
) -> Result<String> {
    let me = session.uid().clone();
    let project = load_project(session, project_id).await?;
    if project.is_member(&me) {
        return Err(ClientError::Conflict("already a member of this project".into()));
    }

    let existing = session
        .gateway()
        .query(
            &Query::collection(JoinRequest::COLLECTION)
                .where_eq("projectId", project_id)
                .where_eq("userId", me.as_str()),
        )
        .await?;
    let open = existing
        .iter()
        .filter_map(|doc| doc.decode::<JoinRequest>().ok())
        .any(|r| r.status.is_open());
    if open {
        return Err(ClientError::Conflict("a request is already pending".into()));
    }

    let request = JoinRequest {
        id: String::new(),
        project_id: project_id.to_string(),
        project_owner_id: project.owner.id.clone(),
        project_title: Some(project.title.clone()),
        user_id: me,
        user: session.me_snapshot(),
        role: role.filter(|r| !r.trim().is_empty()),
        message: message.filter(|m| !m.trim().is_empty()),
        status: JoinRequestStatus::Pending,
        created_at: timestamp_now(),
    };
    let id = JoinRequest::id_for(project_id, &request.user_id);
    session
        .gateway()
        .set(JoinRequest::COLLECTION, &id, encode(&request)?)
        .await?;
    info!(project = %project_id, request = %id, "Join request sent");
    Ok(id)
}

async fn load_request(session: &Session, request_id: &str) -> Result<JoinRequest> {
    fetch::<JoinRequest>(session.gateway(), request_id)
        .await?
        .ok_or_else(|| ClientError::not_found("join request"))
}

fn require_request_owner(request: &JoinRequest, user: &UserId) -> Result<()> {
    if &request.project_owner_id == user {
        Ok(())
    } else {
        Err(ClientError::forbidden("only the project owner can decide on requests"))
    }
}

/// Accept a join request and enrol the requester.
///
/// Accepting an already accepted request changes nothing, and a requester
/// who is already a member is not added twice. The member entry is built
/// from the request alone so concurrent accepts union the same value.
pub async fn accept_request(session: &Session, request_id: &str) -> Result<()> {
    let request = load_request(session, request_id).await?;
    require_request_owner(&request, session.uid())?;
    match request.status {
        JoinRequestStatus::Accepted => return Ok(()),
        JoinRequestStatus::Rejected => {
            return Err(ClientError::Conflict("request was already rejected".into()))
        }
        JoinRequestStatus::Pending | JoinRequestStatus::Read => {}
    }

    let project = load_project(session, &request.project_id).await?;
    let mut ops = vec![BatchOp::update(
        JoinRequest::COLLECTION,
        request_id,
        Patch::new().set("status", "accepted"),
    )];
    if !project.is_member(&request.user_id) {
        let role = request.role.as_deref().unwrap_or("Member");
        let joined_at = if request.created_at.is_empty() {
            timestamp_now()
        } else {
            request.created_at.clone()
        };
        let entry = serde_json::to_value(member_entry(&request.user, role, joined_at))
            .map_err(cliquest_store::StoreError::from)?;
        ops.push(BatchOp::update(
            Project::COLLECTION,
            &request.project_id,
            Patch::new()
                .array_union("members", vec![entry])
                .array_union("memberIds", vec![Value::String(request.user_id.to_string())]),
        ));
    }
    session.gateway().commit_batch(ops).await?;
    info!(request = %request_id, user = %request.user_id.short(), "Join request accepted");
    Ok(())
}

pub async fn reject_request(session: &Session, request_id: &str) -> Result<()> {
    let request = load_request(session, request_id).await?;
    require_request_owner(&request, session.uid())?;
    match request.status {
        JoinRequestStatus::Rejected => Ok(()),
        JoinRequestStatus::Accepted => {
            Err(ClientError::Conflict("request was already accepted".into()))
        }
        JoinRequestStatus::Pending | JoinRequestStatus::Read => {
            session
                .gateway()
                .update(
                    JoinRequest::COLLECTION,
                    request_id,
                    Patch::new().set("status", "rejected"),
                )
                .await?;
            info!(request = %request_id, "Join request rejected");
            Ok(())
        }
    }
}

/// Record that the owner has seen a pending request.
pub async fn mark_request_seen(session: &Session, request_id: &str) -> Result<()> {
    let request = load_request(session, request_id).await?;
    require_request_owner(&request, session.uid())?;
    if request.status != JoinRequestStatus::Pending {
        return Ok(());
    }
    session
        .gateway()
        .update(
            JoinRequest::COLLECTION,
            request_id,
            Patch::new().set("status", "read"),
        )
        .await?;
    Ok(())
}

/// Remove a decided request from the requester's notifications.
pub async fn dismiss_request(session: &Session, request_id: &str) -> Result<()> {
    let request = load_request(session, request_id).await?;
    if &request.user_id != session.uid() {
        return Err(ClientError::forbidden("only the requester can dismiss a request"));
    }
    if !request.status.is_decided() {
        return Err(ClientError::Conflict("request is still pending".into()));
    }
    session
        .gateway()
        .delete(JoinRequest::COLLECTION, request_id)
        .await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::session::tests::{session_on, test_session, yielding_session_on};
    use cliquest_store::FileItem;

    pub(crate) async fn project_with_member(
        owner: &Session,
        member: &Session,
    ) -> String {
        let project_id = create_project(
            owner,
            NewProject {
                title: "Rover".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let request = request_to_join(member, &project_id, Some("Dev".into()), None)
            .await
            .unwrap();
        accept_request(owner, &request).await.unwrap();
        project_id
    }

    #[tokio::test]
    async fn test_create_project_enrols_owner_and_system_folders() {
        let (alice, gateway, _events) = test_session("alice");
        assert!(matches!(
            create_project(&alice, NewProject::default()).await,
            Err(ClientError::Validation(ValidationError::MissingField("title")))
        ));

        let id = create_project(
            &alice,
            NewProject {
                title: "  Rover ".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let project = load_project(&alice, &id).await.unwrap();
        assert_eq!(project.title, "Rover");
        assert_eq!(project.role_of(&UserId::new("alice")), Some(OWNER_ROLE));
        assert_eq!(project.member_ids, vec![UserId::new("alice")]);

        let folders: Vec<FileItem> = gateway
            .documents(FileItem::COLLECTION)
            .iter()
            .map(|d| d.decode().unwrap())
            .collect();
        assert_eq!(folders.len(), 2);
        assert!(folders.iter().all(|f| f.is_system_folder && f.path == "/"));
    }

    #[tokio::test]
    async fn test_double_accept_does_not_duplicate_member() {
        let (alice, gateway, _events) = test_session("alice");
        let (bob, _bob_events) = session_on(&gateway, "bob");
        let project_id = project_with_member(&alice, &bob).await;

        let request_id = gateway.documents(JoinRequest::COLLECTION)[0].id.clone();
        accept_request(&alice, &request_id).await.unwrap();

        let project = load_project(&alice, &project_id).await.unwrap();
        let bobs = project
            .members
            .iter()
            .filter(|m| m.id == UserId::new("bob"))
            .count();
        assert_eq!(bobs, 1);
        assert_eq!(project.role_of(&UserId::new("bob")), Some("Dev"));
        assert_eq!(project.member_ids.len(), 2);
    }

    #[tokio::test]
    async fn test_interleaved_accepts_enrol_once() {
        let (alice, gateway, _events) = test_session("alice");
        let (bob, _bob_events) = session_on(&gateway, "bob");
        let (alice_tab, _tab_events) = yielding_session_on(&gateway, "alice");
        let (alice_phone, _phone_events) = yielding_session_on(&gateway, "alice");
        let project_id = create_project(
            &alice,
            NewProject {
                title: "Rover".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let request = request_to_join(&bob, &project_id, Some("Dev".into()), None)
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            accept_request(&alice_tab, &request),
            accept_request(&alice_phone, &request)
        );
        first.unwrap();
        second.unwrap();

        let project = load_project(&alice, &project_id).await.unwrap();
        let bobs = project
            .members
            .iter()
            .filter(|m| m.id == UserId::new("bob"))
            .count();
        assert_eq!(bobs, 1);
        assert_eq!(project.members.len(), 2);
        assert_eq!(project.member_ids.len(), 2);
    }

    #[tokio::test]
    async fn test_double_submit_keeps_one_request() {
        let (alice, gateway, _events) = test_session("alice");
        let (bob_tab, _tab_events) = yielding_session_on(&gateway, "bob");
        let (bob_phone, _phone_events) = yielding_session_on(&gateway, "bob");
        let project_id = create_project(
            &alice,
            NewProject {
                title: "Rover".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let (first, second) = tokio::join!(
            request_to_join(&bob_tab, &project_id, None, None),
            request_to_join(&bob_phone, &project_id, None, None)
        );
        let expected = JoinRequest::id_for(&project_id, &UserId::new("bob"));
        for id in [first, second].into_iter().flatten() {
            assert_eq!(id, expected);
        }
        let requests = gateway.documents(JoinRequest::COLLECTION);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].id, expected);
    }

    #[tokio::test]
    async fn test_only_owner_decides_and_duplicates_rejected() {
        let (alice, gateway, _events) = test_session("alice");
        let (bob, _bob_events) = session_on(&gateway, "bob");
        let project_id = create_project(
            &alice,
            NewProject {
                title: "Rover".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let request = request_to_join(&bob, &project_id, None, Some("hi".into()))
            .await
            .unwrap();
        assert!(matches!(
            request_to_join(&bob, &project_id, None, None).await,
            Err(ClientError::Conflict(_))
        ));
        assert!(matches!(
            accept_request(&bob, &request).await,
            Err(ClientError::Forbidden(_))
        ));

        mark_request_seen(&alice, &request).await.unwrap();
        let seen: JoinRequest = gateway.documents(JoinRequest::COLLECTION)[0].decode().unwrap();
        assert_eq!(seen.status, JoinRequestStatus::Read);

        assert!(matches!(
            dismiss_request(&bob, &request).await,
            Err(ClientError::Conflict(_))
        ));
        reject_request(&alice, &request).await.unwrap();
        assert!(matches!(
            accept_request(&alice, &request).await,
            Err(ClientError::Conflict(_))
        ));
        dismiss_request(&bob, &request).await.unwrap();
        assert!(gateway.documents(JoinRequest::COLLECTION).is_empty());
    }

    #[tokio::test]
    async fn test_delete_project_owner_only() {
        let (alice, gateway, _events) = test_session("alice");
        let (bob, _bob_events) = session_on(&gateway, "bob");
        let project_id = project_with_member(&alice, &bob).await;

        assert!(matches!(
            delete_project(&bob, &project_id).await,
            Err(ClientError::Forbidden(_))
        ));
        delete_project(&alice, &project_id).await.unwrap();
        assert!(gateway.documents(Project::COLLECTION).is_empty());
        assert!(gateway.documents(JoinRequest::COLLECTION).is_empty());
    }
}
