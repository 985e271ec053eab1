//! Dashboard: join request traffic, unread chats and the badge.

use serde::Serialize;

use cliquest_shared::types::JoinRequestStatus;
use cliquest_shared::UserId;
use cliquest_store::{Chat, Direction, JoinRequest, Model, Project, Query};

use crate::aggregate::{resolve_person, Aggregator, Inputs, PersonView, View, ViewBuilder};
use crate::commands::messaging::{my_chats_query, summarize_chat, ChatSummary};
use crate::error::Result;
use crate::read_tracker::BadgeCounts;
use crate::session::Session;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DashboardTab {
    #[default]
    Overview,
    Requests,
    Messages,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NotificationItem {
    /// Someone asked to join one of my projects.
    #[serde(rename_all = "camelCase")]
    JoinRequest {
        request_id: String,
        project_id: String,
        project_title: String,
        requester: PersonView,
        role: Option<String>,
        message: Option<String>,
        unseen: bool,
        created_at: String,
    },
    /// One of my requests was accepted or rejected.
    #[serde(rename_all = "camelCase")]
    RequestUpdate {
        request_id: String,
        project_id: String,
        project_title: String,
        accepted: bool,
        created_at: String,
    },
    UnreadChat(ChatSummary),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub id: String,
    pub title: String,
    pub role: Option<String>,
    pub member_count: usize,
    pub is_owner: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardModel {
    pub loading: bool,
    pub tab: DashboardTab,
    pub badge: BadgeCounts,
    pub badge_total: u32,
    pub items: Vec<NotificationItem>,
    /// Only filled on the overview tab.
    pub projects: Vec<ProjectSummary>,
}

pub struct DashboardAggregator {
    me: UserId,
    tab: DashboardTab,
    avatar_service: String,
}

impl DashboardAggregator {
    fn request_items(
        &self,
        incoming: &[JoinRequest],
        mine: &[JoinRequest],
    ) -> Vec<NotificationItem> {
        let received = incoming
            .iter()
            .filter(|r| r.status.is_open())
            .map(|r| NotificationItem::JoinRequest {
                request_id: r.id.clone(),
                project_id: r.project_id.clone(),
                project_title: r.project_title.clone().unwrap_or_default(),
                requester: resolve_person(
                    &r.user_id,
                    &Default::default(),
                    Some(&r.user),
                    &self.avatar_service,
                ),
                role: r.role.clone(),
                message: r.message.clone(),
                unseen: r.status == JoinRequestStatus::Pending,
                created_at: r.created_at.clone(),
            });
        let decided = mine
            .iter()
            .filter(|r| r.status.is_decided())
            .map(|r| NotificationItem::RequestUpdate {
                request_id: r.id.clone(),
                project_id: r.project_id.clone(),
                project_title: r.project_title.clone().unwrap_or_default(),
                accepted: r.status == JoinRequestStatus::Accepted,
                created_at: r.created_at.clone(),
            });
        received.chain(decided).collect()
    }
}

impl Aggregator for DashboardAggregator {
    type Output = DashboardModel;

    fn aggregate(&self, inputs: &Inputs) -> DashboardModel {
        let incoming = inputs.decode::<JoinRequest>("incoming");
        let mine = inputs.decode::<JoinRequest>("mine");
        let chats = inputs.decode::<Chat>("chats");
        let badge = BadgeCounts::compute(&self.me, &incoming, &mine, &chats);

        let mut items = Vec::new();
        if self.tab != DashboardTab::Messages {
            items.extend(self.request_items(&incoming, &mine));
        }
        if self.tab != DashboardTab::Requests {
            let profiles = Default::default();
            items.extend(
                chats
                    .into_iter()
                    .filter_map(|c| summarize_chat(c, &self.me, &profiles, &self.avatar_service))
                    .filter(|c| c.unread > 0)
                    .map(NotificationItem::UnreadChat),
            );
        }

        let projects = if self.tab == DashboardTab::Overview {
            inputs
                .decode::<Project>("projects")
                .into_iter()
                .map(|p| ProjectSummary {
                    role: p.role_of(&self.me).map(str::to_string),
                    member_count: p.members.len(),
                    is_owner: p.is_owner(&self.me),
                    id: p.id,
                    title: p.title,
                })
                .collect()
        } else {
            Vec::new()
        };

        DashboardModel {
            loading: ["incoming", "mine", "chats"]
                .iter()
                .any(|s| !inputs.is_loaded(s)),
            tab: self.tab,
            badge_total: badge.total(),
            badge,
            items,
            projects,
        }
    }
}

/// Open the dashboard on `tab`. The badge is always computed over every
/// source, whichever tab is shown.
pub async fn open_dashboard(session: &Session, tab: DashboardTab) -> Result<View<DashboardModel>> {
    let me = session.uid();
    let aggregator = DashboardAggregator {
        me: me.clone(),
        tab,
        avatar_service: session.config().avatar_service.clone(),
    };
    let mut builder = ViewBuilder::new(session, "dashboard", aggregator)
        .source(
            "incoming",
            Query::collection(JoinRequest::COLLECTION)
                .where_eq("projectOwnerId", me.as_str())
                .order_by("createdAt", Direction::Descending),
        )
        .source(
            "mine",
            Query::collection(JoinRequest::COLLECTION)
                .where_eq("userId", me.as_str())
                .order_by("createdAt", Direction::Descending),
        )
        .source("chats", my_chats_query(me));
    if tab == DashboardTab::Overview {
        builder = builder.source(
            "projects",
            Query::collection(Project::COLLECTION)
                .array_contains("memberIds", me.as_str())
                .order_by("createdAt", Direction::Descending),
        );
    }
    Ok(builder.open().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::messaging::{open_direct_chat, send_message};
    use crate::commands::projects::{
        accept_request, create_project, mark_request_seen, request_to_join, NewProject,
    };
    use crate::composer::MessageDraft;
    use crate::session::tests::{session_on, test_session};
    use cliquest_store::{Document, MessageTarget};
    use serde_json::json;
    use std::time::Duration;

    fn dashboard_sources() -> Vec<(&'static str, Vec<Document>)> {
        let request = |id: &str, owner: &str, user: &str, status: &str| {
            Document::new(
                id,
                json!({
                    "projectId": "p1",
                    "projectOwnerId": owner,
                    "projectTitle": "Rover",
                    "userId": user,
                    "user": {"id": user, "name": user.to_uppercase()},
                    "status": status,
                    "createdAt": "2024-03-01T09:00:00.000Z"
                }),
            )
        };
        vec![
            (
                "incoming",
                vec![
                    request("r1", "alice", "bob", "pending"),
                    request("r2", "alice", "carol", "read"),
                ],
            ),
            ("mine", vec![request("r3", "erin", "alice", "accepted")]),
            (
                "chats",
                vec![Document::new(
                    "alice_dave",
                    json!({
                        "participantIds": ["alice", "dave"],
                        "participants": [{"id": "dave", "name": "Dave"}],
                        "lastMessage": "ping",
                        "unreadCount": {"alice": 2}
                    }),
                )],
            ),
            (
                "projects",
                vec![Document::new(
                    "p1",
                    json!({
                        "title": "Rover",
                        "owner": {"id": "alice", "name": "Alice"},
                        "members": [{"id": "alice", "role": "Owner"}],
                        "memberIds": ["alice"]
                    }),
                )],
            ),
        ]
    }

    #[test]
    fn test_dashboard_ignores_source_arrival_order() {
        let aggregator = DashboardAggregator {
            me: UserId::new("alice"),
            tab: DashboardTab::Overview,
            avatar_service: "https://avatars.local/".into(),
        };

        let mut forward = Inputs::default();
        for (source, docs) in dashboard_sources() {
            forward.update(source, docs);
        }
        let mut backward = Inputs::default();
        for (source, docs) in dashboard_sources().into_iter().rev() {
            backward.update(source, docs);
        }

        let first = aggregator.aggregate(&forward);
        assert!(!first.loading);
        assert_eq!(first.badge_total, 4);
        assert_eq!(first.items.len(), 4);
        assert_eq!(first, aggregator.aggregate(&backward));
        assert_eq!(first, aggregator.aggregate(&forward));
    }

    #[tokio::test]
    async fn test_badge_counts_pending_requests_and_unread() {
        let (alice, gateway, _events) = test_session("alice");
        let (bob, _bob_events) = session_on(&gateway, "bob");
        let (carol, _carol_events) = session_on(&gateway, "carol");
        gateway.seed("users", "alice", json!({"displayName": "Alice"}));

        let project_id = create_project(
            &alice,
            NewProject {
                title: "Rover".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let bob_request = request_to_join(&bob, &project_id, None, None).await.unwrap();
        request_to_join(&carol, &project_id, Some("QA".into()), None)
            .await
            .unwrap();
        let chat_id = open_direct_chat(&bob, &UserId::new("alice")).await.unwrap();
        send_message(
            &bob,
            &MessageTarget::Direct { chat_id },
            MessageDraft::text("hi"),
        )
        .await
        .unwrap();

        let mut view = open_dashboard(&alice, DashboardTab::Overview).await.unwrap();
        let model = tokio::time::timeout(
            Duration::from_secs(1),
            view.wait_for(|m| !m.loading && m.badge_total == 3),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(model.badge.pending_requests, 2);
        assert_eq!(model.badge.unread_messages, 1);
        assert_eq!(model.items.len(), 3);
        assert_eq!(model.projects.len(), 1);
        assert!(model.projects[0].is_owner);

        mark_request_seen(&alice, &bob_request).await.unwrap();
        let model = tokio::time::timeout(
            Duration::from_secs(1),
            view.wait_for(|m| m.badge.pending_requests == 1),
        )
        .await
        .unwrap()
        .unwrap();
        // A seen request stays listed but no longer counts.
        let unseen = model
            .items
            .iter()
            .filter(|i| matches!(i, NotificationItem::JoinRequest { unseen: true, .. }))
            .count();
        assert_eq!(unseen, 1);
        assert_eq!(model.badge_total, 2);
    }

    #[tokio::test]
    async fn test_request_update_reaches_requester() {
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
        let request = request_to_join(&bob, &project_id, None, None).await.unwrap();
        accept_request(&alice, &request).await.unwrap();

        let mut view = open_dashboard(&bob, DashboardTab::Requests).await.unwrap();
        let model = tokio::time::timeout(Duration::from_secs(1), view.wait_for(|m| !m.loading))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(model.badge.request_updates, 1);
        assert!(matches!(
            model.items.as_slice(),
            [NotificationItem::RequestUpdate { accepted: true, .. }]
        ));
        assert!(model.projects.is_empty());
    }
}
