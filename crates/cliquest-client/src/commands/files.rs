//! Project file manager.
//!
//! Files and folders are documents carrying the slash-delimited path of the
//! folder that contains them. Folder moves and deletes rewrite the whole
//! subtree in one batch. The system folders receiving chat and discussion
//! attachments can be neither moved nor deleted.

use serde::Serialize;
use tracing::{debug, info};

use cliquest_shared::constants::SYSTEM_FOLDERS;
use cliquest_shared::paths::{self, ROOT};
use cliquest_shared::{UserId, ValidationError};
use cliquest_store::document::encode;
use cliquest_store::{fetch, timestamp_now, BatchOp, FileItem, Model, Patch, Query};

use crate::aggregate::{Aggregator, Inputs, View, ViewBuilder};
use crate::commands::projects::{load_project, require_member};
use crate::composer::{mirror_entry, upload_attachments, PendingAttachment};
use crate::error::{ClientError, Result};
use crate::session::Session;

/// Deterministic id of a project's system folder, so concurrent creation
/// converges on one document.
pub fn system_folder_id(project_id: &str, name: &str) -> String {
    format!("{project_id}-{name}")
}

fn folder_entry(
    project_id: &str,
    parent: &str,
    name: &str,
    created_by: &UserId,
    system: bool,
) -> FileItem {
    FileItem {
        id: String::new(),
        name: name.to_string(),
        path: paths::normalize(parent),
        project_id: project_id.to_string(),
        created_by: created_by.clone(),
        is_folder: true,
        is_system_folder: system,
        size: None,
        content_type: None,
        url: None,
        content_hash: None,
        created_at: timestamp_now(),
    }
}

/// Writes creating every system folder of a new project.
pub fn system_folder_ops(project_id: &str, created_by: &UserId) -> Result<Vec<BatchOp>> {
    SYSTEM_FOLDERS
        .iter()
        .map(|name| -> Result<BatchOp> {
            let entry = folder_entry(project_id, ROOT, name, created_by, true);
            Ok(BatchOp::set(
                FileItem::COLLECTION,
                &system_folder_id(project_id, name),
                encode(&entry)?,
            ))
        })
        .collect()
}

fn project_files_query(project_id: &str) -> Query {
    Query::collection(FileItem::COLLECTION).where_eq("projectId", project_id)
}

async fn project_files(session: &Session, project_id: &str) -> Result<Vec<FileItem>> {
    let docs = session.gateway().query(&project_files_query(project_id)).await?;
    Ok(docs.iter().filter_map(|d| d.decode().ok()).collect())
}

/// Create any missing system folder. Returns how many were created.
pub async fn ensure_system_folders(session: &Session, project_id: &str) -> Result<usize> {
    let existing = project_files(session, project_id).await?;
    let ops: Vec<BatchOp> = system_folder_ops(project_id, session.uid())?
        .into_iter()
        .zip(SYSTEM_FOLDERS)
        .filter(|(_, name)| {
            !existing
                .iter()
                .any(|f| f.is_system_folder && f.is_folder && f.name == *name)
        })
        .map(|(op, _)| op)
        .collect();
    let created = ops.len();
    if created > 0 {
        session.gateway().commit_batch(ops).await?;
        info!(project = %project_id, created, "Created missing system folders");
    }
    Ok(created)
}

fn ensure_name_free(files: &[FileItem], folder: &str, name: &str) -> Result<()> {
    let taken = files
        .iter()
        .any(|f| paths::normalize(&f.path) == folder && f.name.eq_ignore_ascii_case(name));
    if taken {
        return Err(ValidationError::NameTaken(name.to_string()).into());
    }
    Ok(())
}

fn folder_exists(files: &[FileItem], folder: &str) -> bool {
    folder == ROOT || files.iter().any(|f| f.is_folder && f.full_path() == folder)
}

/// Create a folder inside `parent`. Returns the new folder id.
pub async fn create_folder(
    session: &Session,
    project_id: &str,
    parent: &str,
    name: &str,
) -> Result<String> {
    let name = paths::validate_name(name)?;
    let parent = paths::normalize(parent);

    let project = load_project(session, project_id).await?;
    require_member(&project, session.uid())?;

    let files = project_files(session, project_id).await?;
    if !folder_exists(&files, &parent) {
        return Err(ClientError::not_found("folder"));
    }
    ensure_name_free(&files, &parent, &name)?;

    let entry = folder_entry(project_id, &parent, &name, session.uid(), false);
    let id = session
        .gateway()
        .add(FileItem::COLLECTION, encode(&entry)?)
        .await?;
    debug!(project = %project_id, path = %paths::join(&parent, &name), "Folder created");
    Ok(id)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub uploaded: Vec<String>,
    pub failed: usize,
}

/// Upload files into `folder`. Each file succeeds or fails on its own;
/// the quota is checked for the whole selection before anything is sent.
pub async fn upload_files(
    session: &Session,
    project_id: &str,
    folder: &str,
    files: Vec<PendingAttachment>,
) -> Result<UploadReport> {
    if files.is_empty() {
        return Err(ValidationError::NoFileSelected.into());
    }
    let folder = paths::normalize(folder);

    let project = load_project(session, project_id).await?;
    require_member(&project, session.uid())?;

    let existing = project_files(session, project_id).await?;
    if !folder_exists(&existing, &folder) {
        return Err(ClientError::not_found("folder"));
    }
    let used = storage_usage(&existing, session.config().storage_quota_bytes).used;
    let incoming: u64 = files.iter().map(PendingAttachment::size).sum();
    let quota = session.config().storage_quota_bytes;
    if used + incoming > quota {
        return Err(ValidationError::QuotaExceeded {
            used,
            incoming,
            quota,
        }
        .into());
    }

    let selected = files.len();
    let prefix = match folder.as_str() {
        ROOT => format!("projects/{project_id}/files"),
        sub => format!("projects/{project_id}/files{sub}"),
    };
    let uploaded = upload_attachments(session, &prefix, files).await;

    let mut ops = Vec::with_capacity(uploaded.len());
    let mut names = Vec::with_capacity(uploaded.len());
    for file in &uploaded {
        let entry = mirror_entry(project_id, &folder, session.uid(), file);
        ops.push(BatchOp::set(
            FileItem::COLLECTION,
            &session.gateway().new_id(),
            encode(&entry)?,
        ));
        names.push(file.attachment.name.clone());
    }
    if !ops.is_empty() {
        session.gateway().commit_batch(ops).await?;
    }
    info!(project = %project_id, folder = %folder, uploaded = names.len(), selected, "Files uploaded");
    Ok(UploadReport {
        failed: selected - names.len(),
        uploaded: names,
    })
}

/// Move a file or folder into `destination`, carrying a folder's subtree.
pub async fn move_item(session: &Session, item_id: &str, destination: &str) -> Result<()> {
    let item = fetch::<FileItem>(session.gateway(), item_id)
        .await?
        .ok_or_else(|| ClientError::not_found("file"))?;
    if item.is_system_folder {
        return Err(ValidationError::SystemFolder(item.name).into());
    }
    let destination = paths::normalize(destination);
    let old_full = item.full_path();
    if item.is_folder && paths::is_within(&destination, &old_full) {
        return Err(ValidationError::MoveIntoSelf.into());
    }
    if paths::normalize(&item.path) == destination {
        return Ok(());
    }

    let project = load_project(session, &item.project_id).await?;
    require_member(&project, session.uid())?;

    let files = project_files(session, &item.project_id).await?;
    if !folder_exists(&files, &destination) {
        return Err(ClientError::not_found("destination folder"));
    }
    ensure_name_free(&files, &destination, &item.name)?;

    let new_full = paths::join(&destination, &item.name);
    let mut ops = vec![BatchOp::update(
        FileItem::COLLECTION,
        item_id,
        Patch::new().set("path", destination.as_str()),
    )];
    if item.is_folder {
        for child in files.iter().filter(|f| paths::is_within(&f.path, &old_full)) {
            let path = paths::rebase(&child.path, &old_full, &new_full);
            ops.push(BatchOp::update(
                FileItem::COLLECTION,
                &child.id,
                Patch::new().set("path", path),
            ));
        }
    }
    let moved = ops.len();
    session.gateway().commit_batch(ops).await?;
    info!(from = %old_full, to = %new_full, items = moved, "Moved");
    Ok(())
}

/// Delete a file, or a folder with everything below it.
///
/// System folders are refused before any backend call.
pub async fn delete_item(session: &Session, item: &FileItem) -> Result<()> {
    if item.is_system_folder {
        return Err(ValidationError::SystemFolder(item.name.clone()).into());
    }
    let project = load_project(session, &item.project_id).await?;
    require_member(&project, session.uid())?;

    let mut ops = vec![BatchOp::delete(FileItem::COLLECTION, &item.id)];
    if item.is_folder {
        let full = item.full_path();
        let files = project_files(session, &item.project_id).await?;
        ops.extend(
            files
                .iter()
                .filter(|f| f.id != item.id && paths::is_within(&f.path, &full))
                .map(|f| BatchOp::delete(FileItem::COLLECTION, &f.id)),
        );
    }
    let deleted = ops.len();
    session.gateway().commit_batch(ops).await?;
    info!(path = %item.full_path(), items = deleted, "Deleted");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsage {
    pub used: u64,
    pub quota: u64,
    pub percent: f64,
}

pub fn storage_usage(files: &[FileItem], quota: u64) -> StorageUsage {
    let used: u64 = files
        .iter()
        .filter(|f| !f.is_folder)
        .filter_map(|f| f.size)
        .sum();
    let percent = if quota == 0 {
        100.0
    } else {
        (used as f64 / quota as f64 * 100.0).min(100.0)
    };
    StorageUsage {
        used,
        quota,
        percent,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breadcrumb {
    pub name: String,
    pub path: String,
}

/// Root-first trail of folders leading to `folder`.
pub fn breadcrumbs(folder: &str) -> Vec<Breadcrumb> {
    let mut trail = vec![Breadcrumb {
        name: "Files".to_string(),
        path: ROOT.to_string(),
    }];
    let mut path = ROOT.to_string();
    for segment in paths::segments(&paths::normalize(folder)) {
        path = paths::join(&path, &segment);
        trail.push(Breadcrumb {
            name: segment,
            path: path.clone(),
        });
    }
    trail
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderListing {
    pub loading: bool,
    pub folder: String,
    pub breadcrumbs: Vec<Breadcrumb>,
    pub entries: Vec<FileItem>,
    pub usage: StorageUsage,
}

pub struct FolderAggregator {
    folder: String,
    quota: u64,
}

impl Aggregator for FolderAggregator {
    type Output = FolderListing;

    fn aggregate(&self, inputs: &Inputs) -> FolderListing {
        let files = inputs.decode::<FileItem>("files");
        let mut entries: Vec<FileItem> = files
            .iter()
            .filter(|f| paths::normalize(&f.path) == self.folder)
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            b.is_folder
                .cmp(&a.is_folder)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                .then_with(|| a.id.cmp(&b.id))
        });
        FolderListing {
            loading: !inputs.is_loaded("files"),
            folder: self.folder.clone(),
            breadcrumbs: breadcrumbs(&self.folder),
            usage: storage_usage(&files, self.quota),
            entries,
        }
    }
}

/// Open a folder listing of a project.
pub async fn open_folder(
    session: &Session,
    project_id: &str,
    folder: &str,
) -> Result<View<FolderListing>> {
    let project = load_project(session, project_id).await?;
    require_member(&project, session.uid())?;

    let aggregator = FolderAggregator {
        folder: paths::normalize(folder),
        quota: session.config().storage_quota_bytes,
    };
    Ok(ViewBuilder::new(session, "files", aggregator)
        .source("files", project_files_query(project_id))
        .open()
        .await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::projects::{create_project, NewProject};
    use crate::session::tests::test_session;
    use cliquest_store::MemoryGateway;
    use std::time::Duration;

    async fn project(session: &Session) -> String {
        create_project(
            session,
            NewProject {
                title: "Rover".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    fn item(gateway: &MemoryGateway, id: &str) -> FileItem {
        gateway
            .documents(FileItem::COLLECTION)
            .into_iter()
            .find(|d| d.id == id)
            .unwrap()
            .decode()
            .unwrap()
    }

    #[test]
    fn test_breadcrumbs() {
        let trail = breadcrumbs("//docs///specs/");
        let paths: Vec<_> = trail.iter().map(|b| b.path.as_str()).collect();
        assert_eq!(paths, ["/", "/docs", "/docs/specs"]);
        assert_eq!(trail[2].name, "specs");
    }

    #[tokio::test]
    async fn test_system_folder_delete_rejected_without_calls() {
        let (alice, gateway, _events) = test_session("alice");
        let project_id = project(&alice).await;
        let chats = item(&gateway, &system_folder_id(&project_id, "chats"));
        let before = gateway.write_count();

        let result = delete_item(&alice, &chats).await;
        assert!(matches!(
            result,
            Err(ClientError::Validation(ValidationError::SystemFolder(_)))
        ));
        assert_eq!(gateway.write_count(), before);
        assert!(matches!(
            move_item(&alice, &chats.id, "/elsewhere").await,
            Err(ClientError::Validation(ValidationError::SystemFolder(_)))
        ));
    }

    #[tokio::test]
    async fn test_ensure_system_folders_is_idempotent() {
        let (alice, gateway, _events) = test_session("alice");
        let project_id = project(&alice).await;
        assert_eq!(ensure_system_folders(&alice, &project_id).await.unwrap(), 0);

        gateway.seed(
            "projects",
            "legacy",
            serde_json::json!({"title": "Old", "owner": {"id": "alice"}}),
        );
        assert_eq!(ensure_system_folders(&alice, "legacy").await.unwrap(), 2);
        assert_eq!(ensure_system_folders(&alice, "legacy").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_folder_names_validated_and_unique() {
        let (alice, _gateway, _events) = test_session("alice");
        let project_id = project(&alice).await;

        create_folder(&alice, &project_id, "/", "docs").await.unwrap();
        assert!(matches!(
            create_folder(&alice, &project_id, "//", "Docs").await,
            Err(ClientError::Validation(ValidationError::NameTaken(_)))
        ));
        assert!(matches!(
            create_folder(&alice, &project_id, "/", "a/b").await,
            Err(ClientError::Validation(ValidationError::InvalidFolderName(_)))
        ));
        assert!(matches!(
            create_folder(&alice, &project_id, "/missing", "x").await,
            Err(ClientError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_move_folder_carries_subtree() {
        let (alice, gateway, _events) = test_session("alice");
        let project_id = project(&alice).await;
        let docs = create_folder(&alice, &project_id, "/", "docs").await.unwrap();
        let specs = create_folder(&alice, &project_id, "/docs", "specs").await.unwrap();
        create_folder(&alice, &project_id, "/", "archive").await.unwrap();
        upload_files(
            &alice,
            &project_id,
            "/docs/specs",
            vec![PendingAttachment::new("a.md", "text/markdown", &b"# A"[..])],
        )
        .await
        .unwrap();

        assert!(matches!(
            move_item(&alice, &docs, "/docs/specs").await,
            Err(ClientError::Validation(ValidationError::MoveIntoSelf))
        ));

        move_item(&alice, &docs, "/archive").await.unwrap();
        assert_eq!(item(&gateway, &docs).path, "/archive");
        assert_eq!(item(&gateway, &specs).path, "/archive/docs");
        let file = gateway
            .documents(FileItem::COLLECTION)
            .into_iter()
            .map(|d| d.decode::<FileItem>().unwrap())
            .find(|f| f.name == "a.md")
            .unwrap();
        assert_eq!(file.path, "/archive/docs/specs");
    }

    #[tokio::test]
    async fn test_delete_folder_removes_subtree_only() {
        let (alice, gateway, _events) = test_session("alice");
        let project_id = project(&alice).await;
        let docs = create_folder(&alice, &project_id, "/", "docs").await.unwrap();
        create_folder(&alice, &project_id, "/docs", "specs").await.unwrap();
        create_folder(&alice, &project_id, "/", "docs-old").await.unwrap();

        delete_item(&alice, &item(&gateway, &docs)).await.unwrap();
        let names: Vec<String> = gateway
            .documents(FileItem::COLLECTION)
            .into_iter()
            .map(|d| d.decode::<FileItem>().unwrap().name)
            .collect();
        assert!(names.contains(&"docs-old".to_string()));
        assert!(!names.contains(&"specs".to_string()));
        assert_eq!(names.len(), 3);
    }

    #[tokio::test]
    async fn test_upload_checks_quota_and_isolates_failures() {
        let (alice, gateway, _events) = test_session("alice");
        let project_id = project(&alice).await;
        assert!(matches!(
            upload_files(&alice, &project_id, "/", vec![]).await,
            Err(ClientError::Validation(ValidationError::NoFileSelected))
        ));

        gateway.fail_uploads_matching("broken");
        let report = upload_files(
            &alice,
            &project_id,
            "/",
            vec![
                PendingAttachment::new("ok.txt", "text/plain", &b"fine"[..]),
                PendingAttachment::new("broken.txt", "text/plain", &b"nope"[..]),
            ],
        )
        .await
        .unwrap();
        assert_eq!(report.uploaded, vec!["ok.txt".to_string()]);
        assert_eq!(report.failed, 1);

        let big = PendingAttachment::new("big.bin", "application/octet-stream", vec![0u8; 64]);
        let tight = {
            let mut config = alice.config().clone();
            config.storage_quota_bytes = 10;
            config
        };
        let (tx, _rx) = crate::events::event_channel();
        let constrained = Session::new(alice.gateway_handle(), alice.user().clone(), tight, tx);
        assert!(matches!(
            upload_files(&constrained, &project_id, "/", vec![big]).await,
            Err(ClientError::Validation(ValidationError::QuotaExceeded { .. }))
        ));
    }

    #[tokio::test]
    async fn test_listing_orders_folders_first() {
        let (alice, _gateway, _events) = test_session("alice");
        let project_id = project(&alice).await;
        create_folder(&alice, &project_id, "/", "zeta").await.unwrap();
        upload_files(
            &alice,
            &project_id,
            "/",
            vec![PendingAttachment::new("Alpha.txt", "text/plain", &b"12345"[..])],
        )
        .await
        .unwrap();

        let mut view = open_folder(&alice, &project_id, "//").await.unwrap();
        let listing = tokio::time::timeout(Duration::from_secs(1), view.wait_for(|l| !l.loading))
            .await
            .unwrap()
            .unwrap();
        let names: Vec<_> = listing.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["chats", "discussions", "zeta", "Alpha.txt"]);
        assert_eq!(listing.folder, "/");
        assert_eq!(listing.usage.used, 5);
    }
}
