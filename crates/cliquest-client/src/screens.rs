//! Screen routing.
//!
//! Every screen of the app is one [`Screen`] variant. Opening it registers
//! the screen's live sources and hands back the matching typed view; the
//! previous screen's view is closed by dropping its [`OpenScreen`].

use cliquest_store::MessageTarget;
use tracing::debug;

use crate::aggregate::View;
use crate::commands::files::{open_folder, FolderListing};
use crate::commands::messaging::{open_chat_list, open_conversation, ChatList, Conversation};
use crate::commands::notifications::{open_dashboard, DashboardModel, DashboardTab};
use crate::commands::tasks::{open_task_board, TaskBoard, TaskFilter};
use crate::commands::threads::{open_thread, open_threads, ThreadBoard, ThreadDetail, ThreadFilter};
use crate::error::Result;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    Dashboard(DashboardTab),
    ChatList,
    Chat(MessageTarget),
    Discussions {
        project_id: String,
        filter: ThreadFilter,
    },
    Thread {
        thread_id: String,
    },
    Tasks {
        project_id: String,
        filter: TaskFilter,
    },
    Files {
        project_id: String,
        folder: String,
    },
    /// Settings have no live sources.
    Settings,
}

pub enum OpenScreen {
    Dashboard(View<DashboardModel>),
    ChatList(View<ChatList>),
    Chat(View<Conversation>),
    Discussions(View<ThreadBoard>),
    Thread(View<ThreadDetail>),
    Tasks(View<TaskBoard>),
    Files(View<FolderListing>),
    Settings,
}

impl Screen {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dashboard(_) => "dashboard",
            Self::ChatList => "chat-list",
            Self::Chat(_) => "chat",
            Self::Discussions { .. } => "discussions",
            Self::Thread { .. } => "thread",
            Self::Tasks { .. } => "tasks",
            Self::Files { .. } => "files",
            Self::Settings => "settings",
        }
    }

    pub async fn open(&self, session: &Session) -> Result<OpenScreen> {
        debug!(screen = self.name(), "Opening screen");
        let opened = match self {
            Self::Dashboard(tab) => OpenScreen::Dashboard(open_dashboard(session, *tab).await?),
            Self::ChatList => OpenScreen::ChatList(open_chat_list(session).await?),
            Self::Chat(target) => OpenScreen::Chat(open_conversation(session, target).await?),
            Self::Discussions { project_id, filter } => {
                OpenScreen::Discussions(open_threads(session, project_id, *filter).await?)
            }
            Self::Thread { thread_id } => {
                OpenScreen::Thread(open_thread(session, thread_id).await?)
            }
            Self::Tasks { project_id, filter } => {
                OpenScreen::Tasks(open_task_board(session, project_id, *filter).await?)
            }
            Self::Files { project_id, folder } => {
                OpenScreen::Files(open_folder(session, project_id, folder).await?)
            }
            Self::Settings => OpenScreen::Settings,
        };
        Ok(opened)
    }
}

impl OpenScreen {
    /// Whether the screen still receives live updates.
    pub fn is_live(&self) -> bool {
        match self {
            Self::Dashboard(view) => view.is_open(),
            Self::ChatList(view) => view.is_open(),
            Self::Chat(view) => view.is_open(),
            Self::Discussions(view) => view.is_open(),
            Self::Thread(view) => view.is_open(),
            Self::Tasks(view) => view.is_open(),
            Self::Files(view) => view.is_open(),
            Self::Settings => false,
        }
    }

    /// Unsubscribe every source of the screen. Safe to call twice.
    pub fn close(&mut self) {
        match self {
            Self::Dashboard(view) => view.close(),
            Self::ChatList(view) => view.close(),
            Self::Chat(view) => view.close(),
            Self::Discussions(view) => view.close(),
            Self::Thread(view) => view.close(),
            Self::Tasks(view) => view.close(),
            Self::Files(view) => view.close(),
            Self::Settings => {}
        }
    }
}
