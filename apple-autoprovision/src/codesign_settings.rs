// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resolved code signing settings, profile installation and run outputs.

use {
    crate::{
        certificate::SigningIdentity,
        distribution::{DistributionType, Platform},
        portal::RemoteProfile,
        project::CodesignAssignment,
        AutoProvisionError,
    },
    log::{info, warn},
    std::{
        collections::BTreeMap,
        io::Write,
        path::{Path, PathBuf},
    },
};

/// Directory Xcode loads provisioning profiles from.
pub fn default_profiles_dir() -> Result<PathBuf, AutoProvisionError> {
    let home = dirs::home_dir().ok_or(AutoProvisionError::NoHomeDirectory)?;

    Ok(home
        .join("Library")
        .join("MobileDevice")
        .join("Provisioning Profiles"))
}

/// A provisioning profile and where it was installed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProfileInfo {
    pub path: PathBuf,
    pub profile: RemoteProfile,
}

/// Write a profile to `<dir>/<uuid>.<extension>`.
pub fn install_profile(
    profile: &RemoteProfile,
    platform: Platform,
    dir: &Path,
) -> Result<ProfileInfo, AutoProvisionError> {
    std::fs::create_dir_all(dir)?;

    let path = dir.join(format!("{}.{}", profile.uuid, platform.profile_extension()));
    info!("installing profile {} to {}", profile.name, path.display());
    std::fs::write(&path, &profile.content)?;

    Ok(ProfileInfo {
        path,
        profile: profile.clone(),
    })
}

/// The settings of one distribution type.
#[derive(Clone, Debug)]
pub struct CodesignSettings {
    pub identity: SigningIdentity,

    /// Profiles keyed by bundle id.
    pub profiles: BTreeMap<String, ProfileInfo>,
}

/// Collects resolved identities and profiles and derives target settings from them.
#[derive(Clone, Debug)]
pub struct CodesignSettingsResolver {
    requested: DistributionType,
    settings: BTreeMap<DistributionType, CodesignSettings>,
}

impl CodesignSettingsResolver {
    pub fn new(requested: DistributionType) -> Self {
        Self {
            requested,
            settings: BTreeMap::new(),
        }
    }

    pub fn requested(&self) -> DistributionType {
        self.requested
    }

    /// Record the profile of a bundle id.
    ///
    /// Each (distribution type, bundle id) pair is recorded once. Returns
    /// whether the profile was recorded.
    pub fn add_profile(
        &mut self,
        distribution: DistributionType,
        identity: &SigningIdentity,
        bundle_id: &str,
        info: ProfileInfo,
    ) -> bool {
        let settings = self
            .settings
            .entry(distribution)
            .or_insert_with(|| CodesignSettings {
                identity: identity.clone(),
                profiles: BTreeMap::new(),
            });

        if settings.profiles.contains_key(bundle_id) {
            warn!(
                "{} profile for {} already resolved; ignoring {}",
                distribution, bundle_id, info.profile.name
            );
            return false;
        }

        settings.profiles.insert(bundle_id.to_string(), info);

        true
    }

    pub fn has_profile(&self, distribution: DistributionType, bundle_id: &str) -> bool {
        self.settings
            .get(&distribution)
            .map(|s| s.profiles.contains_key(bundle_id))
            .unwrap_or(false)
    }

    pub fn settings(&self, distribution: DistributionType) -> Option<&CodesignSettings> {
        self.settings.get(&distribution)
    }

    pub fn iter(&self) -> impl Iterator<Item = (DistributionType, &CodesignSettings)> {
        self.settings.iter().map(|(k, v)| (*k, v))
    }

    fn profile(
        &self,
        distribution: DistributionType,
        bundle_id: &str,
    ) -> Result<(&SigningIdentity, &ProfileInfo), AutoProvisionError> {
        self.settings
            .get(&distribution)
            .and_then(|s| s.profiles.get(bundle_id).map(|p| (&s.identity, p)))
            .ok_or_else(|| AutoProvisionError::CodesignSettingsMissing {
                bundle_id: bundle_id.to_string(),
                distribution,
            })
    }

    /// Settings to sign a target with.
    ///
    /// Targets are signed for development when a development identity is
    /// available. Otherwise the requested distribution type is used.
    pub fn assignment(&self, bundle_id: &str) -> Result<CodesignAssignment, AutoProvisionError> {
        let distribution = if self.settings.contains_key(&DistributionType::Development) {
            DistributionType::Development
        } else {
            self.requested
        };

        let (identity, info) = self.profile(distribution, bundle_id)?;

        Ok(CodesignAssignment {
            team_id: identity.team_id().to_string(),
            identity: identity.name().to_string(),
            profile_uuid: info.profile.uuid.clone(),
            profile_name: info.profile.name.clone(),
        })
    }

    /// Outputs of the run, keyed by variable name.
    ///
    /// Profiles are those of the main target's bundle id.
    pub fn outputs(
        &self,
        main_bundle_id: &str,
    ) -> Result<BTreeMap<&'static str, String>, AutoProvisionError> {
        let mut outputs = BTreeMap::new();
        outputs.insert("EXPORT_METHOD", self.requested.to_string());

        let mut team_id = None;

        if let Some(settings) = self.settings(DistributionType::Development) {
            let (_, info) = self.profile(DistributionType::Development, main_bundle_id)?;

            outputs.insert(
                "DEVELOPMENT_CODESIGN_IDENTITY",
                settings.identity.name().to_string(),
            );
            outputs.insert("DEVELOPMENT_PROFILE", info.profile.uuid.clone());
            team_id = Some(settings.identity.team_id().to_string());
        }

        if self.requested != DistributionType::Development {
            let (identity, info) = self.profile(self.requested, main_bundle_id)?;

            outputs.insert(
                "PRODUCTION_CODESIGN_IDENTITY",
                identity.name().to_string(),
            );
            outputs.insert("PRODUCTION_PROFILE", info.profile.uuid.clone());
            team_id = Some(identity.team_id().to_string());
        }

        if let Some(team_id) = team_id {
            outputs.insert("DEVELOPER_TEAM", team_id);
        }

        Ok(outputs)
    }
}

/// Write outputs as `KEY=value` lines.
pub fn write_outputs(
    outputs: &BTreeMap<&'static str, String>,
    writer: &mut impl Write,
) -> Result<(), AutoProvisionError> {
    for (key, value) in outputs {
        writeln!(writer, "{}={}", key, value)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            distribution::{CertificateKind, DistributionMethod},
            portal::RemoteCertificate,
            testutil::{app, local_certificate, profile},
        },
        chrono::{Duration, Utc},
    };

    fn identity(name: &str, kind: CertificateKind) -> SigningIdentity {
        SigningIdentity {
            local: local_certificate(name, "01", Utc::now() + Duration::days(365)),
            remote: RemoteCertificate {
                id: format!("cert-{}", kind.as_str()),
                name: name.to_string(),
                kind,
                downloadable: true,
            },
        }
    }

    fn info(name: &str, bundle_id: &str, method: DistributionMethod) -> ProfileInfo {
        ProfileInfo {
            path: PathBuf::from(format!("{}.mobileprovision", name)),
            profile: profile(
                name,
                &app(bundle_id, &[]),
                method,
                Utc::now() + Duration::days(365),
                &[],
                &[],
            ),
        }
    }

    #[test]
    fn install_writes_profile_content() -> Result<(), AutoProvisionError> {
        let td = tempfile::tempdir()?;
        let dir = td.path().join("Provisioning Profiles");
        let p = profile(
            "rprovision development - (com.acme.app)",
            &app("com.acme.app", &[]),
            DistributionMethod::Limited,
            Utc::now(),
            &[],
            &[],
        );

        let info = install_profile(&p, Platform::Ios, &dir)?;
        assert_eq!(info.path, dir.join(format!("{}.mobileprovision", p.uuid)));
        assert_eq!(std::fs::read(&info.path)?, p.content);

        let info = install_profile(&p, Platform::Macos, &dir)?;
        assert_eq!(
            info.path.extension().and_then(|x| x.to_str()),
            Some("provisionprofile")
        );

        Ok(())
    }

    #[test]
    fn profiles_recorded_once() {
        let dev = identity(
            "Apple Development: Test User (ABCDE12345)",
            CertificateKind::Development,
        );
        let mut resolver = CodesignSettingsResolver::new(DistributionType::Development);

        assert!(resolver.add_profile(
            DistributionType::Development,
            &dev,
            "com.acme.app",
            info("first", "com.acme.app", DistributionMethod::Limited),
        ));
        assert!(!resolver.add_profile(
            DistributionType::Development,
            &dev,
            "com.acme.app",
            info("second", "com.acme.app", DistributionMethod::Limited),
        ));

        assert!(resolver.has_profile(DistributionType::Development, "com.acme.app"));
        assert_eq!(
            resolver
                .settings(DistributionType::Development)
                .map(|s| s.profiles["com.acme.app"].profile.name.as_str()),
            Some("first")
        );
    }

    #[test]
    fn development_settings_sign_targets() -> Result<(), AutoProvisionError> {
        let dev = identity(
            "Apple Development: Test User (ABCDE12345)",
            CertificateKind::Development,
        );
        let dist = identity(
            "Apple Distribution: Test User (ABCDE12345)",
            CertificateKind::Production,
        );

        let mut resolver = CodesignSettingsResolver::new(DistributionType::AppStore);
        resolver.add_profile(
            DistributionType::AppStore,
            &dist,
            "com.acme.app",
            info("store", "com.acme.app", DistributionMethod::Store),
        );

        assert_eq!(
            resolver.assignment("com.acme.app")?.identity,
            "Apple Distribution: Test User (ABCDE12345)"
        );

        resolver.add_profile(
            DistributionType::Development,
            &dev,
            "com.acme.app",
            info("dev", "com.acme.app", DistributionMethod::Limited),
        );

        let assignment = resolver.assignment("com.acme.app")?;
        assert_eq!(assignment.identity, "Apple Development: Test User (ABCDE12345)");
        assert_eq!(assignment.team_id, "ABCDE12345");
        assert_eq!(assignment.profile_name, "dev");

        assert!(matches!(
            resolver.assignment("com.acme.other"),
            Err(AutoProvisionError::CodesignSettingsMissing { .. })
        ));

        Ok(())
    }

    #[test]
    fn outputs() -> Result<(), AutoProvisionError> {
        let dev = identity(
            "Apple Development: Test User (ABCDE12345)",
            CertificateKind::Development,
        );
        let dist = identity(
            "Apple Distribution: Test User (ABCDE12345)",
            CertificateKind::Production,
        );

        let mut resolver = CodesignSettingsResolver::new(DistributionType::AdHoc);
        let dev_info = info("dev", "com.acme.app", DistributionMethod::Limited);
        let adhoc_info = info("adhoc", "com.acme.app", DistributionMethod::AdHoc);
        let dev_uuid = dev_info.profile.uuid.clone();
        let adhoc_uuid = adhoc_info.profile.uuid.clone();

        resolver.add_profile(DistributionType::Development, &dev, "com.acme.app", dev_info);
        resolver.add_profile(DistributionType::AdHoc, &dist, "com.acme.app", adhoc_info);

        let outputs = resolver.outputs("com.acme.app")?;
        assert_eq!(outputs["EXPORT_METHOD"], "ad-hoc");
        assert_eq!(outputs["DEVELOPER_TEAM"], "ABCDE12345");
        assert_eq!(outputs["DEVELOPMENT_PROFILE"], dev_uuid);
        assert_eq!(outputs["PRODUCTION_PROFILE"], adhoc_uuid);
        assert_eq!(
            outputs["PRODUCTION_CODESIGN_IDENTITY"],
            "Apple Distribution: Test User (ABCDE12345)"
        );

        let mut buf = vec![];
        write_outputs(&outputs, &mut buf)?;
        let text = String::from_utf8_lossy(&buf);
        assert!(text.lines().any(|l| l == "EXPORT_METHOD=ad-hoc"));
        assert_eq!(text.lines().count(), 6);

        assert!(resolver.outputs("com.acme.other").is_err());

        Ok(())
    }
}
