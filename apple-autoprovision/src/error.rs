// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::distribution::DistributionType,
    std::{fmt::Formatter, path::PathBuf},
    thiserror::Error,
    x509_certificate::X509CertificateError,
};

/// An unexpected response from the Apple Developer Portal.
///
/// The portal often accompanies failures with human readable messages. When
/// present, these are what we show to users. Otherwise the raw response is
/// surfaced verbatim.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PortalError {
    /// HTTP status code, if the error came from an HTTP response.
    pub status: Option<u16>,

    /// Raw error content.
    pub raw: String,

    /// Human readable messages describing the failure.
    pub preferred: Vec<String>,
}

impl PortalError {
    pub fn new(raw: impl ToString) -> Self {
        Self {
            status: None,
            raw: raw.to_string(),
            preferred: vec![],
        }
    }

    pub fn with_preferred(raw: impl ToString, preferred: Vec<String>) -> Self {
        Self {
            status: None,
            raw: raw.to_string(),
            preferred,
        }
    }

    /// The message presented to users.
    pub fn message(&self) -> String {
        if self.preferred.is_empty() {
            self.raw.clone()
        } else {
            self.preferred.join(" ")
        }
    }
}

impl std::fmt::Display for PortalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for PortalError {}

/// Unified error type for Apple auto provisioning.
#[derive(Debug, Error)]
pub enum AutoProvisionError {
    #[error("unknown command")]
    CliUnknownCommand,

    #[error("bad argument")]
    CliBadArgument,

    #[error("{0}")]
    CliGeneralError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("X.509 certificate handler error: {0}")]
    X509(#[from] X509CertificateError),

    #[error("plist error: {0}")]
    Plist(#[from] plist::Error),

    #[error("{0}")]
    Portal(PortalError),

    #[error("problem with App Store Connect API Key: {0}")]
    AppStoreConnectApiKey(String),

    #[error("unable to locate App Store Connect API Key")]
    AppStoreConnectApiKeyNotFound,

    #[error("unknown distribution type: {0}; expected one of development, app-store, ad-hoc, enterprise")]
    UnknownDistributionType(String),

    #[error("unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("error parsing PFX data: {0}")]
    PfxParseError(String),

    #[error("incorrect password given when decrypting PFX data")]
    PfxBadPassword,

    #[error("no signing certificate found in PFX data")]
    PfxNoLeafCertificate,

    #[error("certificate is missing a {0} subject attribute")]
    CertificateMissingAttribute(&'static str),

    #[error("{0} certificate URLs given but {1} passphrases; every certificate needs a passphrase (which may be empty)")]
    CertificatePassphraseMismatch(usize, usize),

    #[error("no {0} certificate uploaded; upload a valid {0} certificate to use {1} distribution")]
    CertificateMissing(&'static str, DistributionType),

    #[error("multiple {0} certificates found: {1}; only one identity per type is supported")]
    CertificateAmbiguous(&'static str, String),

    #[error("certificate {0} is not registered on the Apple Developer Portal")]
    CertificateNotRegistered(String),

    #[error("unknown data protection level in entitlements: {0}")]
    UnknownDataProtection(String),

    #[error("failed to ensure app {bundle_id}: {message}")]
    App { bundle_id: String, message: String },

    #[error("failed to provision {distribution} profile for {bundle_id}: {message}")]
    ProfileProvisioning {
        bundle_id: String,
        distribution: DistributionType,
        message: String,
    },

    #[error("no Xcode managed {distribution} profile found for {bundle_id}; regenerate Xcode managed profiles by archiving the project locally in Xcode once")]
    XcodeManagedProfileNotFound {
        bundle_id: String,
        distribution: DistributionType,
    },

    #[error("no {distribution} profile resolved for {bundle_id}")]
    CodesignSettingsMissing {
        bundle_id: String,
        distribution: DistributionType,
    },

    #[error("project manifest error: {0}")]
    ProjectManifest(String),

    #[error("no targets in project {0} match the requested scheme")]
    ProjectNoTargets(PathBuf),

    #[error("keychain command failed: {0}")]
    Keychain(String),

    #[error("download of {0} failed: {1}")]
    Download(String, String),

    #[error("unsupported URL: {0}")]
    UnsupportedUrl(String),

    #[error("could not resolve home directory")]
    NoHomeDirectory,
}

impl From<PortalError> for AutoProvisionError {
    fn from(e: PortalError) -> Self {
        Self::Portal(e)
    }
}

impl AutoProvisionError {
    /// The message to present for errors originating from the portal.
    ///
    /// Non-portal errors render as normal.
    pub fn portal_message(&self) -> String {
        match self {
            Self::Portal(e) => e.message(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portal_error_prefers_messages() {
        let err = PortalError::with_preferred(
            "409 Conflict",
            vec![
                "There is a problem with the request entity.".to_string(),
                "Multiple profiles found with the name 'x'.".to_string(),
            ],
        );

        assert_eq!(
            AutoProvisionError::from(err).to_string(),
            "There is a problem with the request entity. Multiple profiles found with the name 'x'."
        );
    }

    #[test]
    fn portal_error_falls_back_to_raw() {
        let err = AutoProvisionError::from(PortalError::new("500 Internal Server Error"));

        assert_eq!(err.portal_message(), "500 Internal Server Error");
    }
}
