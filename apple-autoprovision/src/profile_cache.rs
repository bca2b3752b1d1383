// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-run cache of provisioning profile listings.

use {
    crate::{
        distribution::Platform,
        portal::{DeveloperPortal, RemoteProfile},
        AutoProvisionError,
    },
    log::debug,
    std::collections::HashMap,
};

/// Identifies a profile listing.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ProfileCacheKey {
    pub platform: Platform,
    pub xcode_managed: bool,
}

/// Why a cache entry was invalidated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InvalidationReason {
    /// We deleted a profile.
    Deleted,

    /// We created a profile.
    Created,

    /// Profile creation collided with a same-named profile created elsewhere.
    NameCollision,
}

/// Cache of profile listings, owned by whoever mutates profiles.
///
/// Entries must be invalidated whenever a profile under their key may have
/// changed. Invalidations are recorded.
#[derive(Debug, Default)]
pub struct ProfileCache {
    entries: HashMap<ProfileCacheKey, Vec<RemoteProfile>>,
    invalidations: Vec<(ProfileCacheKey, InvalidationReason)>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Obtain the profiles for a key, fetching them from the portal on a miss.
    pub fn profiles(
        &mut self,
        portal: &dyn DeveloperPortal,
        key: ProfileCacheKey,
    ) -> Result<Vec<RemoteProfile>, AutoProvisionError> {
        if let Some(profiles) = self.entries.get(&key) {
            return Ok(profiles.clone());
        }

        debug!(
            "fetching {} profiles (Xcode managed: {})",
            key.platform, key.xcode_managed
        );
        let profiles = portal.list_profiles(key.xcode_managed, key.platform)?;
        self.entries.insert(key, profiles.clone());

        Ok(profiles)
    }

    pub fn contains(&self, key: ProfileCacheKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Drop the listing for a key.
    pub fn invalidate(&mut self, key: ProfileCacheKey, reason: InvalidationReason) {
        debug!(
            "invalidating {} profiles (Xcode managed: {}): {:?}",
            key.platform, key.xcode_managed, reason
        );
        self.entries.remove(&key);
        self.invalidations.push((key, reason));
    }

    pub fn invalidations(&self) -> &[(ProfileCacheKey, InvalidationReason)] {
        &self.invalidations
    }

    pub fn invalidation_count(&self, reason: InvalidationReason) -> usize {
        self.invalidations
            .iter()
            .filter(|(_, r)| *r == reason)
            .count()
    }
}
