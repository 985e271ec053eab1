//! Types and helpers shared by the Cliquest store and client crates.

pub mod avatar;
pub mod constants;
pub mod error;
pub mod paths;
pub mod types;

pub use error::ValidationError;
pub use types::UserId;
