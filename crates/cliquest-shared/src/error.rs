use thiserror::Error;

/// Input rejected on the client before any backend call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message must have content or at least one attachment")]
    EmptyMessage,

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("A poll needs a question")]
    EmptyPollQuestion,

    #[error("A poll needs at least {min} non-empty options, got {got}")]
    TooFewPollOptions { min: usize, got: usize },

    #[error("Poll option not found: {0}")]
    UnknownPollOption(String),

    #[error("This poll has ended")]
    PollClosed,

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("No file selected")]
    NoFileSelected,

    #[error("Invalid folder name: {0}")]
    InvalidFolderName(String),

    #[error("An item named '{0}' already exists here")]
    NameTaken(String),

    #[error("'{0}' is a system folder and cannot be changed")]
    SystemFolder(String),

    #[error("Cannot move a folder into itself")]
    MoveIntoSelf,

    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Storage quota exceeded: {used} + {incoming} bytes over {quota}")]
    QuotaExceeded { used: u64, incoming: u64, quota: u64 },

    #[error("A chat needs two different participants")]
    InvalidParticipants,

    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("Password must be at least {0} characters")]
    PasswordTooShort(usize),
}
