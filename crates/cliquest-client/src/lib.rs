//! # cliquest-client
//!
//! Client core of Cliquest: a session over the managed backend, live-query
//! subscriptions aggregated into per-screen view models, read tracking, the
//! message and thread composer, and the feature intents behind each screen.

pub mod aggregate;
pub mod commands;
pub mod composer;
pub mod config;
pub mod error;
pub mod events;
pub mod read_tracker;
pub mod screens;
pub mod search;
pub mod session;
pub mod subscriptions;

pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use events::{event_channel, ToastLevel, UiEvent};
pub use screens::{OpenScreen, Screen};
pub use session::{CurrentUser, Session};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Calling it again is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cliquest_client=debug,cliquest_store=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();

    tracing::info!("Starting {} client", cliquest_shared::constants::APP_NAME);
}
