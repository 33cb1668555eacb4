use moka::sync::Cache;
use std::sync::Arc;
use tracing::{info, warn};

use crate::clients::profile_client::ProfileClient;
use crate::config::Config;

/// Resolved display identity for one user.
#[derive(Clone, Debug, PartialEq)]
pub struct Profile {
    pub display_name: String,
    pub avatar_ref: Option<String>,
}

impl Profile {
    /// Generic profile shown when a lookup fails or no record exists.
    pub fn fallback(uid: &str) -> Self {
        Self {
            display_name: uid.to_string(),
            avatar_ref: None,
        }
    }
}

/// Cached lookup of user id → display profile.
///
/// The cache is read-only shared state across every room a client joins; a
/// profile is fetched once per session lifetime and not invalidated by
/// presence activity.
pub struct ProfileResolver {
    cache: Cache<String, Profile>,
    client: Option<Arc<ProfileClient>>,
}

impl ProfileResolver {
    pub fn new(client: Option<Arc<ProfileClient>>, config: &Config) -> Self {
        let cache = Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(config.profile_cache_ttl())
            .build();
        Self { cache, client }
    }

    /// Seed the cache, e.g. with the local user's own profile.
    pub fn prime(&self, uid: &str, profile: Profile) {
        self.cache.insert(uid.to_string(), profile);
    }

    /// Resolve a user's display profile.
    ///
    /// Falls back to the raw identifier as the display name when no app
    /// service is configured, the lookup fails, or the user is unknown.
    pub async fn resolve(&self, uid: &str) -> Profile {
        if let Some(profile) = self.cache.get(uid) {
            return profile;
        }

        let profile = self.fetch(uid).await;
        self.cache.insert(uid.to_string(), profile.clone());
        profile
    }

    async fn fetch(&self, uid: &str) -> Profile {
        let Some(client) = &self.client else {
            return Profile::fallback(uid);
        };

        match client.get_profile(uid).await {
            Ok(response) => {
                info!("Resolved profile for user {}", uid);
                Profile {
                    display_name: response
                        .display_name
                        .filter(|name| !name.is_empty())
                        .unwrap_or_else(|| uid.to_string()),
                    avatar_ref: response.avatar_ref,
                }
            }
            Err(e) => {
                warn!("Profile lookup failed for user {}: {}", uid, e);
                Profile::fallback(uid)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn falls_back_to_raw_id_without_app_service() {
        let resolver = ProfileResolver::new(None, &Config::default());
        let profile = resolver.resolve("u1").await;
        assert_eq!(profile.display_name, "u1");
        assert!(profile.avatar_ref.is_none());
    }

    #[tokio::test]
    async fn primed_profile_is_served_from_cache() {
        let resolver = ProfileResolver::new(None, &Config::default());
        resolver.prime(
            "u1",
            Profile {
                display_name: "Ada".to_string(),
                avatar_ref: Some("avatars/u1.png".to_string()),
            },
        );
        let profile = resolver.resolve("u1").await;
        assert_eq!(profile.display_name, "Ada");
        assert_eq!(profile.avatar_ref.as_deref(), Some("avatars/u1.png"));
    }
}
