//! User profile lookups.
//!
//! Profiles are fetched concurrently and cached on the session, so later
//! views can resolve names and avatars without another round trip.

use std::collections::HashMap;

use futures::future::join_all;
use tracing::{debug, warn};

use cliquest_shared::UserId;
use cliquest_shared::ValidationError;
use cliquest_store::{fetch, Model, Patch, UserProfile};

use crate::error::Result;
use crate::session::Session;

/// Fetch the given profiles concurrently, caching the ones found.
///
/// Missing or failing profiles are skipped; callers fall back to the
/// snapshot embedded in their documents.
pub async fn fetch_profiles(session: &Session, ids: &[UserId]) -> HashMap<UserId, UserProfile> {
    let mut wanted: Vec<&UserId> = ids.iter().collect();
    wanted.sort();
    wanted.dedup();

    let lookups = wanted.iter().map(|id| async move {
        match fetch::<UserProfile>(session.gateway(), id.as_str()).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(user = %id.short(), error = %e, "Profile fetch failed");
                None
            }
        }
    });
    let found: Vec<UserProfile> = join_all(lookups).await.into_iter().flatten().collect();
    debug!(requested = wanted.len(), found = found.len(), "Fetched profiles");

    session.cache_profiles(found.iter().cloned());
    found.into_iter().map(|p| (p.user_id(), p)).collect()
}

/// Profile of one user, served from the session cache when present.
pub async fn load_profile(session: &Session, id: &UserId) -> Result<Option<UserProfile>> {
    if let Some(profile) = session.cached_profile(id) {
        return Ok(Some(profile));
    }
    let profile = fetch::<UserProfile>(session.gateway(), id.as_str()).await?;
    if let Some(profile) = &profile {
        session.cache_profiles([profile.clone()]);
    }
    Ok(profile)
}

/// Editable fields of the signed-in user's profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub skills: Option<Vec<String>>,
}

pub async fn update_my_profile(session: &Session, update: ProfileUpdate) -> Result<()> {
    let mut patch = Patch::new();
    if let Some(name) = update.display_name {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::MissingField("display name").into());
        }
        patch = patch.set("displayName", name);
    }
    if let Some(bio) = update.bio {
        patch = patch.set("bio", bio.trim());
    }
    if let Some(skills) = update.skills {
        let skills: Vec<String> = skills
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        patch = patch.set("skills", skills);
    }
    if patch.is_empty() {
        return Ok(());
    }

    let uid = session.uid().clone();
    session
        .gateway()
        .update(UserProfile::COLLECTION, uid.as_str(), patch)
        .await?;
    // Refresh the cached copy so new documents embed the new name.
    if let Some(profile) = fetch::<UserProfile>(session.gateway(), uid.as_str()).await? {
        session.cache_profiles([profile]);
    }
    Ok(())
}
