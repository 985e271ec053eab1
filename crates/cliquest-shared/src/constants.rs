/// Application name
pub const APP_NAME: &str = "Cliquest";

/// Delay of input inactivity before a search query is evaluated
pub const SEARCH_DEBOUNCE_MS: u64 = 300;

/// Display name used when a user profile is missing or unnamed
pub const ANONYMOUS_NAME: &str = "Anonymous";

/// Placeholder shown while a foreign document has not loaded yet
pub const LOADING_LABEL: &str = "Loading...";

/// Base URL of the generated-avatar service (name is appended as a query param)
pub const DEFAULT_AVATAR_SERVICE: &str = "https://ui-avatars.com/api/";

/// System folder receiving chat attachments
pub const CHATS_FOLDER: &str = "chats";

/// System folder receiving discussion attachments
pub const DISCUSSIONS_FOLDER: &str = "discussions";

/// Folders auto-created in every project; never deletable or movable
pub const SYSTEM_FOLDERS: [&str; 2] = [DISCUSSIONS_FOLDER, CHATS_FOLDER];

/// Minimum number of non-empty options in a poll
pub const MIN_POLL_OPTIONS: usize = 2;

/// Length of client-generated poll option ids
pub const POLL_OPTION_ID_LEN: usize = 12;

/// Maximum single upload size in bytes (50 MiB)
pub const MAX_UPLOAD_SIZE: u64 = 50 * 1024 * 1024;

/// Per-project storage quota in bytes (1 GiB)
pub const DEFAULT_STORAGE_QUOTA: u64 = 1024 * 1024 * 1024;

/// Role given to a project's creator in its member list
pub const OWNER_ROLE: &str = "Owner";

/// Object-storage bucket name used when none is configured
pub const DEFAULT_STORAGE_BUCKET: &str = "cliquest-uploads";

/// Maximum characters of message content kept in a chat's `lastMessage`
pub const LAST_MESSAGE_PREVIEW_CHARS: usize = 100;

/// Minimum accepted password length
pub const MIN_PASSWORD_LEN: usize = 6;
