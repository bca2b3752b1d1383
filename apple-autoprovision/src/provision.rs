// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End to end provisioning of a project.

use {
    crate::{
        app::{ensure_app, sync_app_services},
        app_store_connect::{
            api_token::ConnectTokenEncoder, default_client, AppStoreConnectClient, UnifiedApiKey,
        },
        certificate::{CertificateMatcher, LocalCertificate, SigningIdentities},
        codesign_settings::{
            default_profiles_dir, install_profile, write_outputs, CodesignSettingsResolver,
        },
        config::{load_certificates, PortalCredentials, ProvisionConfig},
        device::{reconcile_devices, DeclaredDevice},
        distribution::{DistributionType, Platform},
        entitlements::AppServices,
        keychain::Keychain,
        portal::{DeveloperPortal, RemoteApp, RemoteDevice},
        profile_provisioner::{ProfileProvisioner, ProfileTarget, RetryPolicy},
        project::{ManifestProject, ProjectIntrospection},
        AutoProvisionError,
    },
    chrono::{DateTime, Utc},
    log::{info, warn},
    std::{collections::BTreeMap, io::Write, path::Path},
};

/// Options steering profile resolution.
#[derive(Clone, Debug)]
pub struct ProvisionOptions {
    pub distribution: DistributionType,
    pub min_profile_days_valid: u32,
    pub generate_profiles: bool,
    pub profile_name_prefix: String,
    pub retry: RetryPolicy,
}

impl From<&ProvisionConfig> for ProvisionOptions {
    fn from(config: &ProvisionConfig) -> Self {
        Self {
            distribution: config.distribution,
            min_profile_days_valid: config.min_profile_days_valid,
            generate_profiles: config.generate_profiles,
            profile_name_prefix: config.profile_name_prefix.clone(),
            retry: config.retry,
        }
    }
}

/// A target to sign.
#[derive(Clone, Debug)]
struct TargetApp {
    target: String,
    app: RemoteApp,
    required_services: AppServices,
}

/// The result of resolving code signing settings.
#[derive(Debug)]
pub struct Resolution {
    pub identities: SigningIdentities,
    pub settings: CodesignSettingsResolver,

    /// Targets with their bundle ids. The first target is the main target.
    pub targets: Vec<(String, String)>,
}

impl Resolution {
    pub fn main_bundle_id(&self) -> Option<&str> {
        self.targets.first().map(|(_, bundle_id)| bundle_id.as_str())
    }

    /// Outputs describing the resolved settings.
    pub fn outputs(&self) -> Result<BTreeMap<&'static str, String>, AutoProvisionError> {
        match self.main_bundle_id() {
            Some(bundle_id) => self.settings.outputs(bundle_id),
            None => Ok(BTreeMap::new()),
        }
    }
}

fn involves_devices(distributions: &[DistributionType], platform: Platform) -> bool {
    platform != Platform::Macos && distributions.iter().any(|d| d.requires_device_roster())
}

/// Resolve identities and profiles for every target of a project.
///
/// Apps are registered and their services enabled as needed. Obtained profiles
/// are installed into `profiles_dir`.
pub fn resolve_codesign_settings(
    portal: &dyn DeveloperPortal,
    project: &dyn ProjectIntrospection,
    certificates: Vec<LocalCertificate>,
    test_devices: &[DeclaredDevice],
    options: &ProvisionOptions,
    profiles_dir: &Path,
    now: DateTime<Utc>,
) -> Result<Resolution, AutoProvisionError> {
    let platform = project.platform();
    let team_id = project.team_id();

    let mut matcher = CertificateMatcher::new(portal);
    let identities =
        SigningIdentities::select(certificates, team_id.as_deref(), now, &mut matcher)?;
    identities.require(options.distribution)?;

    let distributions = identities.distribution_types(options.distribution);
    info!(
        "provisioning {} profiles",
        distributions
            .iter()
            .map(|d| d.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut apps = vec![];
    for target in project.targets() {
        let bundle_id = project.bundle_id(&target)?;
        let required_services = project.entitlements(&target)?.required_services()?;
        info!(
            "target {} ({}) requires {} services",
            target,
            bundle_id,
            required_services.len()
        );

        let app = ensure_app(portal, &bundle_id, platform, &options.profile_name_prefix)?;
        let app = sync_app_services(portal, &app, &required_services)?;

        apps.push(TargetApp {
            target,
            app,
            required_services,
        });
    }

    let devices: Vec<RemoteDevice> = if involves_devices(&distributions, platform) {
        reconcile_devices(test_devices, platform, portal)?
    } else {
        vec![]
    };

    let xcode_managed = !options.generate_profiles;
    if xcode_managed && !project.uses_automatic_signing() {
        warn!("project uses manual signing; Xcode managed profiles will be assigned manually");
    }

    let mut provisioner = ProfileProvisioner::new(portal)
        .with_name_prefix(&options.profile_name_prefix)
        .with_retry_policy(options.retry)
        .with_now(now);
    let mut settings = CodesignSettingsResolver::new(options.distribution);

    for distribution in distributions {
        let identity = identities.require(distribution)?;

        for target_app in &apps {
            let bundle_id = &target_app.app.bundle_id;

            if settings.has_profile(distribution, bundle_id) {
                continue;
            }

            let target = ProfileTarget {
                app: &target_app.app,
                required_services: &target_app.required_services,
                certificate_id: &identity.remote.id,
                distribution,
                platform,
                min_days_valid: options.min_profile_days_valid,
                device_roster: &devices,
            };

            let profile = if xcode_managed {
                provisioner.find_xcode_managed_profile(&target)?
            } else {
                provisioner.ensure_profile(&target)?
            };

            let info = install_profile(&profile, platform, profiles_dir)?;
            settings.add_profile(distribution, identity, bundle_id, info);
        }
    }

    Ok(Resolution {
        identities,
        settings,
        targets: apps
            .into_iter()
            .map(|t| (t.target, t.app.bundle_id))
            .collect(),
    })
}

/// Import identities into the keychain and assign settings to targets.
pub fn apply_resolution(
    resolution: &Resolution,
    project: &dyn ProjectIntrospection,
    keychain: &Keychain,
    dry_run: bool,
) -> Result<(), AutoProvisionError> {
    keychain.prepare()?;

    for identity in [&resolution.identities.development, &resolution.identities.production]
        .into_iter()
        .flatten()
    {
        keychain.import_certificate(&identity.local)?;
    }

    for (target, bundle_id) in &resolution.targets {
        let assignment = resolution.settings.assignment(bundle_id)?;

        if dry_run {
            info!(
                "dry run; not assigning {} / {} to {}",
                assignment.identity, assignment.profile_name, target
            );
        } else {
            project.apply_codesign(target, &assignment)?;
        }
    }

    Ok(())
}

fn api_key(
    config: &ProvisionConfig,
    client: &reqwest::blocking::Client,
) -> Result<(UnifiedApiKey, Vec<DeclaredDevice>), AutoProvisionError> {
    match &config.credentials {
        PortalCredentials::PortalData(source) => {
            let data = source.load(client)?;
            Ok((data.api_key()?, data.test_devices))
        }
        PortalCredentials::ApiKeyPath(path) => Ok((UnifiedApiKey::from_json_path(path)?, vec![])),
    }
}

/// Run a complete provisioning for a configuration.
pub fn provision(config: &ProvisionConfig) -> Result<(), AutoProvisionError> {
    config.log();

    let http = default_client()?;
    let (key, test_devices) = api_key(config, &http)?;
    info!("using App Store Connect API key {}", key.key_id());
    let portal = AppStoreConnectClient::new(ConnectTokenEncoder::try_from(key)?)?;

    let certificates = load_certificates(&http, &config.certificates)?;

    let project = ManifestProject::from_path(
        &config.project_path,
        Some(config.scheme.as_str()),
        config.configuration.as_deref(),
    )?;

    let resolution = resolve_codesign_settings(
        &portal,
        &project,
        certificates,
        &test_devices,
        &ProvisionOptions::from(config),
        &default_profiles_dir()?,
        Utc::now(),
    )?;

    let keychain = Keychain::new(&config.keychain_path, &config.keychain_password)
        .with_dry_run(config.dry_run);
    apply_resolution(&resolution, &project, &keychain, config.dry_run)?;

    let outputs = resolution.outputs()?;

    match &config.export_path {
        Some(path) => {
            info!("writing outputs to {}", path.display());
            let mut fh = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            write_outputs(&outputs, &mut fh)?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            write_outputs(&outputs, &mut lock)?;
            lock.flush()?;
        }
    }

    info!("code signing provisioned");

    Ok(())
}
