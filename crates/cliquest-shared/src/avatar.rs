//! Avatar URL resolution.
//!
//! User documents carry up to three avatar fields (`profileImage`, `photoURL`,
//! `avatar`) and denormalized snapshots carry one more. Every place that shows
//! an avatar goes through [`resolve_avatar`] so the fallback order is defined
//! once: the first non-blank candidate wins, otherwise a generated avatar is
//! derived from the display name.

use url::form_urlencoded;

use crate::constants::{ANONYMOUS_NAME, DEFAULT_AVATAR_SERVICE};

/// Pick the first non-blank candidate, falling back to a generated avatar.
pub fn resolve_avatar(candidates: &[Option<&str>], name: &str) -> String {
    resolve_avatar_with(DEFAULT_AVATAR_SERVICE, candidates, name)
}

/// Same as [`resolve_avatar`] with an explicit generated-avatar service.
pub fn resolve_avatar_with(service: &str, candidates: &[Option<&str>], name: &str) -> String {
    candidates
        .iter()
        .flatten()
        .map(|c| c.trim())
        .find(|c| !c.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| generated_avatar(service, name))
}

/// URL of a generated initials avatar for `name`.
pub fn generated_avatar(service: &str, name: &str) -> String {
    let name = match name.trim() {
        "" => ANONYMOUS_NAME,
        n => n,
    };
    let encoded: String = form_urlencoded::byte_serialize(name.as_bytes()).collect();
    let sep = if service.contains('?') { '&' } else { '?' };
    format!("{service}{sep}name={encoded}&background=random")
}

/// Pick the first non-blank display name, falling back to "Anonymous".
pub fn resolve_name(candidates: &[Option<&str>]) -> String {
    candidates
        .iter()
        .flatten()
        .map(|c| c.trim())
        .find(|c| !c.is_empty())
        .unwrap_or(ANONYMOUS_NAME)
        .to_string()
}
