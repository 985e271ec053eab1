//! User intents, grouped by feature.
//!
//! Each sub-module exposes plain async functions taking the [`Session`]
//! plus the typed view models and `open_*` functions of its screens.
//!
//! [`Session`]: crate::session::Session

pub mod files;
pub mod messaging;
pub mod notifications;
pub mod profile;
pub mod projects;
pub mod settings;
pub mod tasks;
pub mod threads;
