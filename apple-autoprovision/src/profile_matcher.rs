// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Selection of provisioning profiles.

A profile is usable for a bundle id when it survives a chain of filters:

1. Its distribution method agrees with the distribution type.
2. Its bundle id equals the requested bundle id or is a glob pattern matching it.
3. It remains valid for the requested number of days.
4. The services enabled on its app cover the services required by the
   entitlements.
5. It includes the signing certificate.
6. For development and ad-hoc distribution, it includes every device of the
   device roster.

Profiles with an exact bundle id are always preferred over wildcard profiles.
Within each group, the first usable profile in portal order wins.
*/

use {
    crate::{
        device::normalize_udid,
        distribution::{DistributionMethod, DistributionType, Platform},
        entitlements::{AppServices, Capability},
        portal::{RemoteDevice, RemoteProfile},
    },
    chrono::{DateTime, Duration, Utc},
    log::debug,
    std::collections::HashSet,
};

/// How a profile's bundle id relates to a requested bundle id.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BundleIdMatch {
    Exact,
    Wildcard,
    None,
}

/// Relate a profile bundle id to a requested one using shell glob semantics.
pub fn bundle_id_match(profile_bundle_id: &str, bundle_id: &str) -> BundleIdMatch {
    if profile_bundle_id == bundle_id {
        BundleIdMatch::Exact
    } else if (profile_bundle_id.contains('*') || profile_bundle_id.contains('?'))
        && glob::Pattern::new(profile_bundle_id)
            .map(|p| p.matches(bundle_id))
            .unwrap_or(false)
    {
        BundleIdMatch::Wildcard
    } else {
        BundleIdMatch::None
    }
}

/// Whether a profile name denotes an Xcode managed ad-hoc profile.
///
/// Xcode managed App Store and ad-hoc profiles can't be told apart reliably by
/// their distribution method. Their names can.
pub fn is_ad_hoc_name(name: &str, platform: Platform) -> bool {
    let name = name.to_lowercase();

    let prefixes: &[&str] = match platform {
        Platform::Tvos => &["tvos team ad hoc", "xc ad hoc", "xc tvos ad hoc"],
        Platform::Macos => &["mac team ad hoc", "xc ad hoc", "xc macos ad hoc"],
        _ => &["ios team ad hoc", "xc ad hoc", "xc ios ad hoc"],
    };

    prefixes.iter().any(|prefix| name.starts_with(prefix))
}

/// Why a profile isn't usable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Rejection {
    DistributionMethod(DistributionMethod),
    AdHocName,
    BundleId(String),
    Expiring(DateTime<Utc>),
    MissingServices(Vec<Capability>),
    MissingCertificate,
    MissingDevices(Vec<String>),
}

/// What a profile must satisfy.
#[derive(Clone, Debug)]
pub struct ProfileCriteria<'a> {
    pub bundle_id: &'a str,

    /// Services required by the target's entitlements.
    pub required_services: &'a AppServices,

    /// Portal id of the signing certificate.
    pub certificate_id: &'a str,

    pub distribution: DistributionType,
    pub platform: Platform,
    pub min_days_valid: u32,

    /// Devices the profile must include. Only consulted for distribution types
    /// that embed devices.
    pub device_roster: Option<&'a [RemoteDevice]>,

    /// The current time.
    pub now: DateTime<Utc>,
}

impl<'a> ProfileCriteria<'a> {
    /// Profiles must not expire at or before this time.
    pub fn deadline(&self) -> DateTime<Utc> {
        self.now + Duration::days(self.min_days_valid as i64)
    }

    fn check_distribution(&self, profile: &RemoteProfile) -> Result<(), Rejection> {
        if profile.method != self.distribution.distribution_method() {
            return Err(Rejection::DistributionMethod(profile.method));
        }

        if self.distribution == DistributionType::AppStore
            && profile.xcode_managed
            && is_ad_hoc_name(&profile.name, self.platform)
        {
            return Err(Rejection::AdHocName);
        }

        Ok(())
    }

    fn check_expiry(&self, profile: &RemoteProfile) -> Result<(), Rejection> {
        if profile.expires <= self.deadline() {
            Err(Rejection::Expiring(profile.expires))
        } else {
            Ok(())
        }
    }

    fn check_services(&self, profile: &RemoteProfile) -> Result<(), Rejection> {
        let missing = profile.app.services.missing(self.required_services);

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Rejection::MissingServices(missing))
        }
    }

    fn check_certificate(&self, profile: &RemoteProfile) -> Result<(), Rejection> {
        if profile.certificate_ids.iter().any(|id| id == self.certificate_id) {
            Ok(())
        } else {
            Err(Rejection::MissingCertificate)
        }
    }

    fn check_devices(&self, profile: &RemoteProfile) -> Result<(), Rejection> {
        let roster = match self.device_roster {
            Some(roster) if self.distribution.requires_device_roster() => roster,
            _ => return Ok(()),
        };

        let included = profile
            .device_udids
            .iter()
            .map(|udid| normalize_udid(udid))
            .collect::<HashSet<_>>();

        let missing = roster
            .iter()
            .filter(|d| !included.contains(&normalize_udid(&d.udid)))
            .map(|d| d.udid.clone())
            .collect::<Vec<_>>();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Rejection::MissingDevices(missing))
        }
    }

    /// Evaluate the filters following bundle id bucketing.
    fn check_usable(&self, profile: &RemoteProfile) -> Result<(), Rejection> {
        self.check_expiry(profile)?;
        self.check_services(profile)?;
        self.check_certificate(profile)?;
        self.check_devices(profile)
    }

    /// Evaluate a profile against every filter.
    pub fn evaluate(&self, profile: &RemoteProfile) -> Result<BundleIdMatch, Rejection> {
        self.check_distribution(profile)?;

        let bucket = bundle_id_match(profile.bundle_id(), self.bundle_id);
        if bucket == BundleIdMatch::None {
            return Err(Rejection::BundleId(profile.bundle_id().to_string()));
        }

        self.check_usable(profile)?;

        Ok(bucket)
    }
}

/// Find the best usable profile among candidates.
///
/// Returns [None] if no candidate is usable.
pub fn find_best_profile<'p>(
    candidates: &'p [RemoteProfile],
    criteria: &ProfileCriteria,
) -> Option<&'p RemoteProfile> {
    let mut exact = vec![];
    let mut wildcard = vec![];

    for profile in candidates {
        if let Err(rejection) = criteria.check_distribution(profile) {
            debug!("profile {} rejected: {:?}", profile.name, rejection);
            continue;
        }

        match bundle_id_match(profile.bundle_id(), criteria.bundle_id) {
            BundleIdMatch::Exact => exact.push(profile),
            BundleIdMatch::Wildcard => wildcard.push(profile),
            BundleIdMatch::None => {}
        }
    }

    for bucket in [exact, wildcard] {
        for profile in bucket {
            match criteria.check_usable(profile) {
                Ok(()) => {
                    debug!(
                        "profile {} ({}) is usable for {}",
                        profile.name, profile.uuid, criteria.bundle_id
                    );
                    return Some(profile);
                }
                Err(rejection) => {
                    debug!("profile {} rejected: {:?}", profile.name, rejection);
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testutil::{app, device, profile},
    };

    fn criteria<'a>(
        bundle_id: &'a str,
        required: &'a AppServices,
        distribution: DistributionType,
        roster: Option<&'a [RemoteDevice]>,
        now: DateTime<Utc>,
    ) -> ProfileCriteria<'a> {
        ProfileCriteria {
            bundle_id,
            required_services: required,
            certificate_id: "cert-1",
            distribution,
            platform: Platform::Ios,
            min_days_valid: 30,
            device_roster: roster,
            now,
        }
    }

    #[test]
    fn bundle_id_globbing() {
        assert_eq!(bundle_id_match("com.acme.app", "com.acme.app"), BundleIdMatch::Exact);
        assert_eq!(bundle_id_match("com.acme.*", "com.acme.app"), BundleIdMatch::Wildcard);
        assert_eq!(bundle_id_match("*", "com.acme.app"), BundleIdMatch::Wildcard);
        assert_eq!(bundle_id_match("com.acme.ap?", "com.acme.app"), BundleIdMatch::Wildcard);
        assert_eq!(bundle_id_match("com.other.*", "com.acme.app"), BundleIdMatch::None);
        assert_eq!(bundle_id_match("com.acme", "com.acme.app"), BundleIdMatch::None);
    }

    #[test]
    fn ad_hoc_names() {
        assert!(is_ad_hoc_name("XC Ad Hoc: com.acme.app", Platform::Ios));
        assert!(is_ad_hoc_name("iOS Team Ad Hoc Provisioning Profile: *", Platform::Ios));
        assert!(is_ad_hoc_name("XC tvOS Ad Hoc: com.acme.tv", Platform::Tvos));
        assert!(is_ad_hoc_name(
            "Mac Team Ad Hoc Provisioning Profile: com.acme.mac",
            Platform::Macos
        ));
        assert!(!is_ad_hoc_name(
            "Mac Team Provisioning Profile: com.acme.mac",
            Platform::Macos
        ));
        assert!(!is_ad_hoc_name("iOS Team Store Provisioning Profile: *", Platform::Ios));
        assert!(!is_ad_hoc_name("XC iOS: com.acme.app", Platform::Ios));
    }

    #[test]
    fn exact_preferred_over_wildcard() {
        let now = Utc::now();
        let expires = now + Duration::days(60);
        let required = AppServices::new();

        let candidates = vec![
            profile(
                "wildcard",
                &app("com.acme.*", &[]),
                DistributionMethod::Store,
                expires,
                &["cert-1"],
                &[],
            ),
            profile(
                "exact",
                &app("com.acme.app", &[]),
                DistributionMethod::Store,
                expires,
                &["cert-1"],
                &[],
            ),
        ];

        let c = criteria("com.acme.app", &required, DistributionType::AppStore, None, now);
        assert_eq!(find_best_profile(&candidates, &c).map(|p| p.name.as_str()), Some("exact"));
        assert_eq!(c.evaluate(&candidates[0]), Ok(BundleIdMatch::Wildcard));
    }

    #[test]
    fn wildcard_used_when_exact_unusable() {
        let now = Utc::now();
        let required = AppServices::new();

        let candidates = vec![
            profile(
                "exact",
                &app("com.acme.app", &[]),
                DistributionMethod::Store,
                now + Duration::days(1),
                &["cert-1"],
                &[],
            ),
            profile(
                "wildcard",
                &app("com.acme.*", &[]),
                DistributionMethod::Store,
                now + Duration::days(60),
                &["cert-1"],
                &[],
            ),
        ];

        let c = criteria("com.acme.app", &required, DistributionType::AppStore, None, now);
        assert_eq!(
            find_best_profile(&candidates, &c).map(|p| p.name.as_str()),
            Some("wildcard")
        );
    }

    #[test]
    fn first_seen_wins() {
        let now = Utc::now();
        let required = AppServices::new();
        let a = app("com.acme.app", &[]);

        let candidates = vec![
            profile(
                "first",
                &a,
                DistributionMethod::Store,
                now + Duration::days(40),
                &["cert-1"],
                &[],
            ),
            profile(
                "second",
                &a,
                DistributionMethod::Store,
                now + Duration::days(300),
                &["cert-1"],
                &[],
            ),
        ];

        let c = criteria("com.acme.app", &required, DistributionType::AppStore, None, now);
        assert_eq!(
            find_best_profile(&candidates, &c).map(|p| p.name.as_str()),
            Some("first")
        );
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let now = Utc::now();
        let required = AppServices::new();
        let a = app("com.acme.app", &[]);

        let at_deadline = profile(
            "at-deadline",
            &a,
            DistributionMethod::Store,
            now + Duration::days(30),
            &["cert-1"],
            &[],
        );
        let after_deadline = RemoteProfile {
            expires: now + Duration::days(30) + Duration::seconds(1),
            ..at_deadline.clone()
        };

        let c = criteria("com.acme.app", &required, DistributionType::AppStore, None, now);
        assert_eq!(
            c.evaluate(&at_deadline),
            Err(Rejection::Expiring(at_deadline.expires))
        );
        assert_eq!(c.evaluate(&after_deadline), Ok(BundleIdMatch::Exact));
    }

    #[test]
    fn capability_superset_required() {
        let now = Utc::now();
        let five = [
            Capability::AppGroups,
            Capability::HealthKit,
            Capability::PushNotifications,
            Capability::SiriKit,
            Capability::Wallet,
        ];
        let required = five.iter().map(|c| (*c, None)).collect::<AppServices>();

        let four = profile(
            "four",
            &app("com.acme.app", &five[0..4]),
            DistributionMethod::Store,
            now + Duration::days(60),
            &["cert-1"],
            &[],
        );
        let all = profile(
            "all",
            &app("com.acme.app", &five),
            DistributionMethod::Store,
            now + Duration::days(60),
            &["cert-1"],
            &[],
        );

        let c = criteria("com.acme.app", &required, DistributionType::AppStore, None, now);
        assert_eq!(
            c.evaluate(&four),
            Err(Rejection::MissingServices(vec![Capability::Wallet]))
        );
        assert_eq!(c.evaluate(&all), Ok(BundleIdMatch::Exact));
    }

    #[test]
    fn certificate_must_be_included() {
        let now = Utc::now();
        let required = AppServices::new();
        let p = profile(
            "p",
            &app("com.acme.app", &[]),
            DistributionMethod::Store,
            now + Duration::days(60),
            &["cert-2"],
            &[],
        );

        let c = criteria("com.acme.app", &required, DistributionType::AppStore, None, now);
        assert_eq!(c.evaluate(&p), Err(Rejection::MissingCertificate));
    }

    #[test]
    fn device_roster_only_for_device_distributions() {
        let now = Utc::now();
        let required = AppServices::new();
        let roster = vec![device("0000-0001"), device("00000002")];
        let a = app("com.acme.app", &[]);

        let partial = profile(
            "partial",
            &a,
            DistributionMethod::Limited,
            now + Duration::days(60),
            &["cert-1"],
            &["00000001"],
        );
        let full = profile(
            "full",
            &a,
            DistributionMethod::Limited,
            now + Duration::days(60),
            &["cert-1"],
            &["00000001", "0000-0002"],
        );

        let c = criteria(
            "com.acme.app",
            &required,
            DistributionType::Development,
            Some(&roster),
            now,
        );
        assert_eq!(
            c.evaluate(&partial),
            Err(Rejection::MissingDevices(vec!["00000002".to_string()]))
        );
        assert_eq!(c.evaluate(&full), Ok(BundleIdMatch::Exact));

        let store = RemoteProfile {
            method: DistributionMethod::Store,
            ..partial
        };
        let c = criteria(
            "com.acme.app",
            &required,
            DistributionType::AppStore,
            Some(&roster),
            now,
        );
        assert_eq!(c.evaluate(&store), Ok(BundleIdMatch::Exact));
    }

    #[test]
    fn distribution_method_and_ad_hoc_names() {
        let now = Utc::now();
        let required = AppServices::new();
        let a = app("com.acme.app", &[]);

        let development = profile(
            "dev",
            &a,
            DistributionMethod::Limited,
            now + Duration::days(60),
            &["cert-1"],
            &[],
        );
        let managed_ad_hoc = profile(
            "XC Ad Hoc: com.acme.app",
            &a,
            DistributionMethod::Store,
            now + Duration::days(60),
            &["cert-1"],
            &[],
        );
        assert!(managed_ad_hoc.xcode_managed);

        let c = criteria("com.acme.app", &required, DistributionType::AppStore, None, now);
        assert_eq!(
            c.evaluate(&development),
            Err(Rejection::DistributionMethod(DistributionMethod::Limited))
        );
        assert_eq!(c.evaluate(&managed_ad_hoc), Err(Rejection::AdHocName));
        assert!(find_best_profile(&[development, managed_ad_hoc], &c).is_none());
    }

    #[test]
    fn wildcard_healthkit_scenario() {
        let now = Utc::now();
        let mut required = AppServices::new();
        required.enable(Capability::HealthKit, None);
        let roster = vec![device("00008030-001A")];

        let candidates = vec![profile(
            "shared",
            &app("com.acme.*", &[Capability::HealthKit]),
            DistributionMethod::Limited,
            now + Duration::days(31),
            &["cert-1"],
            &["00008030-001A"],
        )];

        let c = criteria(
            "com.acme.app",
            &required,
            DistributionType::Development,
            Some(&roster),
            now,
        );
        assert_eq!(
            find_best_profile(&candidates, &c).map(|p| p.name.as_str()),
            Some("shared")
        );
    }
}
