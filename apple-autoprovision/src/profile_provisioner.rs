// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Obtaining provisioning profiles for bundle ids.

use {
    crate::{
        distribution::{DistributionType, Platform, ProfileType},
        entitlements::AppServices,
        portal::{DeveloperPortal, ProfileRequest, RemoteApp, RemoteDevice, RemoteProfile},
        profile_cache::{InvalidationReason, ProfileCache, ProfileCacheKey},
        profile_matcher::{find_best_profile, BundleIdMatch, ProfileCriteria},
        AutoProvisionError,
    },
    chrono::{DateTime, Utc},
    log::{info, warn},
    once_cell::sync::Lazy,
    regex::Regex,
    std::time::Duration,
};

/// Default profile name prefix.
pub const DEFAULT_PROFILE_NAME_PREFIX: &str = "rprovision";

static NAME_COLLISION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)multiple profiles found with the name").expect("regex should be valid")
});

/// Whether an error reports that a same-named profile already exists.
///
/// This happens when another process creates a profile with the same name
/// between our check for it and our creation of it.
pub fn is_name_collision(err: &AutoProvisionError) -> bool {
    NAME_COLLISION_RE.is_match(&err.portal_message())
}

/// The name of profiles we manage for a bundle id.
pub fn canonical_profile_name(
    prefix: &str,
    distribution: DistributionType,
    bundle_id: &str,
) -> String {
    format!("{} {} - ({})", prefix, distribution, bundle_id)
}

/// How to retry profile creation after a name collision.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// How many times creation is retried.
    pub budget: u32,

    /// Wait before retrying.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            budget: 1,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Everything needed to provision a profile for a bundle id.
#[derive(Clone, Debug)]
pub struct ProfileTarget<'a> {
    /// App of the bundle id. Its services are expected to be in sync with
    /// `required_services`.
    pub app: &'a RemoteApp,

    pub required_services: &'a AppServices,

    /// Portal id of the signing certificate.
    pub certificate_id: &'a str,

    pub distribution: DistributionType,
    pub platform: Platform,
    pub min_days_valid: u32,
    pub device_roster: &'a [RemoteDevice],
}

impl<'a> ProfileTarget<'a> {
    fn bundle_id(&self) -> &str {
        &self.app.bundle_id
    }

    fn criteria(&self, now: DateTime<Utc>) -> ProfileCriteria<'a> {
        ProfileCriteria {
            bundle_id: &self.app.bundle_id,
            required_services: self.required_services,
            certificate_id: self.certificate_id,
            distribution: self.distribution,
            platform: self.platform,
            min_days_valid: self.min_days_valid,
            device_roster: if self.platform == Platform::Macos {
                None
            } else {
                Some(self.device_roster)
            },
            now,
        }
    }

    fn error(&self, message: impl ToString) -> AutoProvisionError {
        AutoProvisionError::ProfileProvisioning {
            bundle_id: self.bundle_id().to_string(),
            distribution: self.distribution,
            message: message.to_string(),
        }
    }
}

/// Finds, replaces, and creates provisioning profiles.
///
/// Owns the profile listing cache and invalidates it on every mutation.
pub struct ProfileProvisioner<'a> {
    portal: &'a dyn DeveloperPortal,
    cache: ProfileCache,
    name_prefix: String,
    retry: RetryPolicy,
    now: DateTime<Utc>,
}

impl<'a> ProfileProvisioner<'a> {
    pub fn new(portal: &'a dyn DeveloperPortal) -> Self {
        Self {
            portal,
            cache: ProfileCache::new(),
            name_prefix: DEFAULT_PROFILE_NAME_PREFIX.to_string(),
            retry: RetryPolicy::default(),
            now: Utc::now(),
        }
    }

    pub fn with_name_prefix(mut self, prefix: impl ToString) -> Self {
        self.name_prefix = prefix.to_string();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the time profile validity is evaluated against.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn cache(&self) -> &ProfileCache {
        &self.cache
    }

    pub fn profile_name(&self, distribution: DistributionType, bundle_id: &str) -> String {
        canonical_profile_name(&self.name_prefix, distribution, bundle_id)
    }

    /// Ensure a usable profile we manage exists for a target.
    ///
    /// An existing profile with our name is reused if it satisfies the target.
    /// Otherwise all profiles with our name are deleted and a new one is created.
    /// If creation collides with a profile created concurrently elsewhere, it is
    /// retried as often as the retry budget allows.
    pub fn ensure_profile(
        &mut self,
        target: &ProfileTarget,
    ) -> Result<RemoteProfile, AutoProvisionError> {
        let name = self.profile_name(target.distribution, target.bundle_id());
        let key = ProfileCacheKey {
            platform: target.platform,
            xcode_managed: false,
        };
        let criteria = target.criteria(self.now);
        let mut remaining = self.retry.budget;

        loop {
            let named = self
                .cache
                .profiles(self.portal, key)?
                .into_iter()
                .filter(|p| p.name == name)
                .collect::<Vec<_>>();

            let exact = named
                .iter()
                .filter(|p| {
                    criteria
                        .evaluate(p)
                        .map(|m| m == BundleIdMatch::Exact)
                        .unwrap_or(false)
                })
                .cloned()
                .collect::<Vec<_>>();

            if let Some(profile) = find_best_profile(&exact, &criteria) {
                info!(
                    "using existing profile {} ({}) for {}",
                    profile.name,
                    profile.uuid,
                    target.bundle_id()
                );
                return Ok(profile.clone());
            }

            if !named.is_empty() {
                let mut deleted = Ok(());

                for profile in &named {
                    warn!(
                        "profile {} ({}) is not usable for {}; deleting it",
                        profile.name,
                        profile.id,
                        target.bundle_id()
                    );
                    if let Err(e) = self.portal.delete_profile(profile) {
                        deleted = Err(target.error(e.portal_message()));
                        break;
                    }
                }

                // Earlier deletions may have succeeded even if a later one failed.
                self.cache.invalidate(key, InvalidationReason::Deleted);
                deleted?;
            }

            info!("creating profile {}", name);

            let request = ProfileRequest {
                name: name.clone(),
                profile_type: ProfileType::new(target.platform, target.distribution),
                app: target.app,
                certificate_ids: vec![target.certificate_id.to_string()],
                devices: if target.distribution.requires_device_roster() {
                    target.device_roster.to_vec()
                } else {
                    vec![]
                },
            };

            match self.portal.create_profile(&request) {
                Ok(profile) => {
                    self.cache.invalidate(key, InvalidationReason::Created);
                    info!("created profile {} ({})", profile.name, profile.uuid);

                    return Ok(profile);
                }
                Err(e) if is_name_collision(&e) && remaining > 0 => {
                    remaining -= 1;
                    warn!(
                        "{}; another build likely created the profile concurrently; retrying in {}s",
                        e.portal_message(),
                        self.retry.backoff.as_secs()
                    );
                    std::thread::sleep(self.retry.backoff);
                    self.cache.invalidate(key, InvalidationReason::NameCollision);
                }
                Err(e) => return Err(target.error(e.portal_message())),
            }
        }
    }

    /// Find a usable Xcode managed profile for a target.
    ///
    /// Xcode managed profiles are never created or deleted.
    pub fn find_xcode_managed_profile(
        &mut self,
        target: &ProfileTarget,
    ) -> Result<RemoteProfile, AutoProvisionError> {
        let key = ProfileCacheKey {
            platform: target.platform,
            xcode_managed: true,
        };
        let candidates = self.cache.profiles(self.portal, key)?;

        match find_best_profile(&candidates, &target.criteria(self.now)) {
            Some(profile) => {
                info!(
                    "using Xcode managed profile {} ({}) for {}",
                    profile.name,
                    profile.uuid,
                    target.bundle_id()
                );
                Ok(profile.clone())
            }
            None => Err(AutoProvisionError::XcodeManagedProfileNotFound {
                bundle_id: target.bundle_id().to_string(),
                distribution: target.distribution,
            }),
        }
    }
}
