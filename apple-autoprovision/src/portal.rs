// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Apple Developer Portal entities and the interface to talk to the portal.

use {
    crate::{
        distribution::{CertificateKind, DeviceClass, DistributionMethod, Platform, ProfileType},
        entitlements::{AppServices, Capability},
        AutoProvisionError,
    },
    chrono::{DateTime, Utc},
};

/// A certificate registered on the portal.
///
/// Serial number and subject are only known after downloading the certificate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCertificate {
    pub id: String,
    pub name: String,
    pub kind: CertificateKind,
    pub downloadable: bool,
}

/// A device registered on the portal.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteDevice {
    pub id: String,
    pub udid: String,
    pub name: String,
    pub device_class: DeviceClass,
    pub enabled: bool,
}

/// An app id (bundle id record) registered on the portal.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteApp {
    pub id: String,
    pub bundle_id: String,
    pub name: String,
    pub platform: Platform,

    /// Services enabled on the app.
    pub services: AppServices,
}

/// A provisioning profile registered on the portal.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteProfile {
    pub id: String,
    pub uuid: String,
    pub name: String,

    /// App the profile is for. Its bundle id may be a wildcard pattern.
    pub app: RemoteApp,

    pub method: DistributionMethod,
    pub expires: DateTime<Utc>,
    pub certificate_ids: Vec<String>,
    pub device_udids: Vec<String>,
    pub xcode_managed: bool,
    pub sub_platform: Option<String>,

    /// Raw profile content (the signed `.mobileprovision` data).
    pub content: Vec<u8>,
}

impl RemoteProfile {
    pub fn bundle_id(&self) -> &str {
        &self.app.bundle_id
    }
}

/// Arguments to create a provisioning profile.
#[derive(Clone, Debug)]
pub struct ProfileRequest<'a> {
    pub name: String,
    pub profile_type: ProfileType,
    pub app: &'a RemoteApp,
    pub certificate_ids: Vec<String>,
    pub devices: Vec<RemoteDevice>,
}

/// Whether a profile name denotes a profile managed by Xcode.
pub fn is_xcode_managed_name(name: &str) -> bool {
    name.starts_with("XC")
        || ((name.starts_with("iOS Team")
            || name.starts_with("tvOS Team")
            || name.starts_with("Mac Team"))
            && name.contains("Provisioning Profile"))
}

/// Interface to the Apple Developer Portal.
///
/// Errors from the portal are reported as [AutoProvisionError::Portal] with the
/// portal's own messages attached where available.
pub trait DeveloperPortal {
    /// List certificates of a kind.
    fn list_certificates(
        &self,
        kind: CertificateKind,
    ) -> Result<Vec<RemoteCertificate>, AutoProvisionError>;

    /// Obtain the DER encoded content of a certificate.
    fn download_certificate(
        &self,
        certificate: &RemoteCertificate,
    ) -> Result<Vec<u8>, AutoProvisionError>;

    fn list_devices(&self, include_disabled: bool) -> Result<Vec<RemoteDevice>, AutoProvisionError>;

    fn create_device(
        &self,
        name: &str,
        udid: &str,
        platform: Platform,
    ) -> Result<RemoteDevice, AutoProvisionError>;

    /// List active profiles for a platform, either Xcode managed or not.
    fn list_profiles(
        &self,
        xcode_managed: bool,
        platform: Platform,
    ) -> Result<Vec<RemoteProfile>, AutoProvisionError>;

    fn create_profile(&self, request: &ProfileRequest) -> Result<RemoteProfile, AutoProvisionError>;

    fn delete_profile(&self, profile: &RemoteProfile) -> Result<(), AutoProvisionError>;

    /// Find the app registered for an exact bundle id.
    fn find_app(
        &self,
        bundle_id: &str,
        platform: Platform,
    ) -> Result<Option<RemoteApp>, AutoProvisionError>;

    fn create_app(
        &self,
        bundle_id: &str,
        name: &str,
        platform: Platform,
    ) -> Result<RemoteApp, AutoProvisionError>;

    /// Currently enabled services of an app.
    fn app_services(&self, app: &RemoteApp) -> Result<AppServices, AutoProvisionError>;

    fn enable_service(
        &self,
        app: &RemoteApp,
        capability: Capability,
        setting: Option<&str>,
    ) -> Result<(), AutoProvisionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xcode_managed_names() {
        assert!(is_xcode_managed_name("XC iOS: com.acme.app"));
        assert!(is_xcode_managed_name("XC Ad Hoc: com.acme.app"));
        assert!(is_xcode_managed_name("iOS Team Provisioning Profile: *"));
        assert!(is_xcode_managed_name(
            "tvOS Team Store Provisioning Profile: com.acme.tv"
        ));
        assert!(is_xcode_managed_name("Mac Team Provisioning Profile: *"));
        assert!(!is_xcode_managed_name("iOS Team Profile"));
        assert!(!is_xcode_managed_name(
            "rprovision development - (com.acme.app)"
        ));
    }
}
