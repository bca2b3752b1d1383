// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Build project introspection.
//!
//! Projects are described by a YAML manifest naming the build targets, their
//! bundle ids and entitlements files. Code signing settings are written back as
//! one `.xcconfig` file per target.

use {
    crate::{distribution::Platform, entitlements::Entitlements, AutoProvisionError},
    log::info,
    serde::Deserialize,
    std::{
        io::Write,
        path::{Path, PathBuf},
        str::FromStr,
    },
};

/// Code signing settings to apply to a target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CodesignAssignment {
    pub team_id: String,

    /// Common name of the signing certificate.
    pub identity: String,

    pub profile_uuid: String,
    pub profile_name: String,
}

/// Interface to a build project.
pub trait ProjectIntrospection {
    /// Names of the targets to sign.
    fn targets(&self) -> Vec<String>;

    fn bundle_id(&self, target: &str) -> Result<String, AutoProvisionError>;

    fn entitlements(&self, target: &str) -> Result<Entitlements, AutoProvisionError>;

    fn apply_codesign(
        &self,
        target: &str,
        assignment: &CodesignAssignment,
    ) -> Result<(), AutoProvisionError>;

    /// Whether the project lets Xcode manage code signing.
    fn uses_automatic_signing(&self) -> bool;

    fn platform(&self) -> Platform;

    /// Development team configured in the project, if any.
    fn team_id(&self) -> Option<String>;
}

#[derive(Clone, Debug, Deserialize)]
struct ManifestTarget {
    name: String,
    bundle_id: String,
    entitlements: Option<PathBuf>,
    #[serde(default)]
    schemes: Vec<String>,
    #[serde(default)]
    configurations: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct Manifest {
    team_id: Option<String>,
    #[serde(default)]
    automatic_signing: bool,
    platform: Option<String>,
    targets: Vec<ManifestTarget>,
}

/// A project described by a YAML manifest.
#[derive(Clone, Debug)]
pub struct ManifestProject {
    path: PathBuf,
    manifest: Manifest,
    platform: Platform,
}

impl ManifestProject {
    /// Load a manifest, keeping targets built by a scheme and configuration.
    ///
    /// Targets not declaring schemes or configurations are built by all of
    /// them.
    pub fn from_path(
        path: impl AsRef<Path>,
        scheme: Option<&str>,
        configuration: Option<&str>,
    ) -> Result<Self, AutoProvisionError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;

        Self::from_yaml(path, &data, scheme, configuration)
    }

    fn from_yaml(
        path: &Path,
        data: &str,
        scheme: Option<&str>,
        configuration: Option<&str>,
    ) -> Result<Self, AutoProvisionError> {
        let mut manifest: Manifest = serde_yaml::from_str(data)?;

        let platform = match &manifest.platform {
            Some(p) => Platform::from_str(p)?,
            None => Platform::Ios,
        };

        let selects = |values: &[String], wanted: Option<&str>| match wanted {
            Some(wanted) if !values.is_empty() => values.iter().any(|v| v == wanted),
            _ => true,
        };

        manifest.targets.retain(|t| {
            selects(&t.schemes, scheme) && selects(&t.configurations, configuration)
        });

        if manifest.targets.is_empty() {
            return Err(AutoProvisionError::ProjectNoTargets(path.to_path_buf()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            manifest,
            platform,
        })
    }

    fn root(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    fn target(&self, name: &str) -> Result<&ManifestTarget, AutoProvisionError> {
        self.manifest
            .targets
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| AutoProvisionError::ProjectManifest(format!("unknown target {}", name)))
    }

    /// Path of the xcconfig file holding the signing settings of a target.
    pub fn xcconfig_path(&self, target: &str) -> PathBuf {
        self.root().join(format!("{}.codesign.xcconfig", target))
    }
}

impl ProjectIntrospection for ManifestProject {
    fn targets(&self) -> Vec<String> {
        self.manifest
            .targets
            .iter()
            .map(|t| t.name.clone())
            .collect()
    }

    fn bundle_id(&self, target: &str) -> Result<String, AutoProvisionError> {
        Ok(self.target(target)?.bundle_id.clone())
    }

    fn entitlements(&self, target: &str) -> Result<Entitlements, AutoProvisionError> {
        match &self.target(target)?.entitlements {
            Some(path) => Entitlements::from_plist_path(self.root().join(path)),
            None => Ok(Entitlements::default()),
        }
    }

    fn apply_codesign(
        &self,
        target: &str,
        assignment: &CodesignAssignment,
    ) -> Result<(), AutoProvisionError> {
        let path = self.xcconfig_path(target);
        info!("writing code signing settings of {} to {}", target, path.display());

        let mut fh = std::fs::File::create(&path)?;
        writeln!(fh, "CODE_SIGN_STYLE = Manual")?;
        writeln!(fh, "DEVELOPMENT_TEAM = {}", assignment.team_id)?;
        writeln!(fh, "CODE_SIGN_IDENTITY = {}", assignment.identity)?;
        writeln!(fh, "PROVISIONING_PROFILE = {}", assignment.profile_uuid)?;
        writeln!(
            fh,
            "PROVISIONING_PROFILE_SPECIFIER = {}",
            assignment.profile_name
        )?;

        Ok(())
    }

    fn uses_automatic_signing(&self) -> bool {
        self.manifest.automatic_signing
    }

    fn platform(&self) -> Platform {
        self.platform
    }

    fn team_id(&self) -> Option<String> {
        self.manifest.team_id.clone()
    }
}
