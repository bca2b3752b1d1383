// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory Developer Portal for tests.

use {
    crate::{
        certificate::{normalize_serial, CertificateInfo, LocalCertificate},
        distribution::{CertificateKind, DeviceClass, DistributionMethod, Platform},
        entitlements::{AppServices, Capability},
        error::PortalError,
        portal::{
            DeveloperPortal, ProfileRequest, RemoteApp, RemoteCertificate, RemoteDevice,
            RemoteProfile,
        },
        AutoProvisionError,
    },
    chrono::{DateTime, Duration, Utc},
    std::{
        cell::{Cell, RefCell},
        collections::VecDeque,
    },
};

pub fn local_certificate(
    common_name: &str,
    serial: &str,
    not_after: DateTime<Utc>,
) -> LocalCertificate {
    let team_id = common_name
        .rsplit_once('(')
        .map(|(_, team)| team.trim_end_matches(')').to_string())
        .unwrap_or_else(|| "T1".to_string());

    LocalCertificate {
        info: CertificateInfo {
            common_name: common_name.to_string(),
            team_id,
            serial: normalize_serial(serial),
            not_after,
            der: vec![],
        },
        pkcs12: vec![],
        passphrase: String::new(),
    }
}

pub fn app(bundle_id: &str, services: &[Capability]) -> RemoteApp {
    RemoteApp {
        id: format!("app-{}", bundle_id),
        bundle_id: bundle_id.to_string(),
        name: bundle_id.to_string(),
        platform: Platform::Ios,
        services: services.iter().map(|c| (*c, None)).collect::<AppServices>(),
    }
}

pub fn device(udid: &str) -> RemoteDevice {
    RemoteDevice {
        id: format!("device-{}", udid),
        udid: udid.to_string(),
        name: udid.to_string(),
        device_class: DeviceClass::Iphone,
        enabled: true,
    }
}

pub fn profile(
    name: &str,
    app: &RemoteApp,
    method: DistributionMethod,
    expires: DateTime<Utc>,
    certificate_ids: &[&str],
    device_udids: &[&str],
) -> RemoteProfile {
    RemoteProfile {
        id: format!("profile-{}-{}", name, app.bundle_id),
        uuid: format!("uuid-{}-{}", name, app.bundle_id),
        name: name.to_string(),
        app: app.clone(),
        method,
        expires,
        certificate_ids: certificate_ids.iter().map(|s| s.to_string()).collect(),
        device_udids: device_udids.iter().map(|s| s.to_string()).collect(),
        xcode_managed: crate::portal::is_xcode_managed_name(name),
        sub_platform: None,
        content: name.as_bytes().to_vec(),
    }
}

/// A [DeveloperPortal] keeping all state in memory and recording calls.
#[derive(Default)]
pub struct FakePortal {
    certificates: RefCell<Vec<(RemoteCertificate, Vec<u8>)>>,
    devices: RefCell<Vec<RemoteDevice>>,
    profiles: RefCell<Vec<RemoteProfile>>,
    apps: RefCell<Vec<RemoteApp>>,
    failing_udids: RefCell<Vec<String>>,
    create_profile_errors: RefCell<VecDeque<(PortalError, Option<RemoteProfile>)>>,
    failing_deletions: RefCell<Vec<String>>,
    calls: RefCell<Vec<String>>,
    next_id: Cell<usize>,
}

impl FakePortal {
    fn record(&self, call: &str) {
        self.calls.borrow_mut().push(call.to_string());
    }

    fn next_id(&self, prefix: &str) -> String {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);

        format!("{}-{}", prefix, id)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.calls.borrow().iter().filter(|c| *c == call).count()
    }

    pub fn add_certificate(&self, id: &str, kind: CertificateKind, der: &[u8]) {
        self.certificates.borrow_mut().push((
            RemoteCertificate {
                id: id.to_string(),
                name: id.to_string(),
                kind,
                downloadable: true,
            },
            der.to_vec(),
        ));
    }

    pub fn add_device(&self, udid: &str, device_class: DeviceClass) {
        let mut d = device(udid);
        d.device_class = device_class;
        self.devices.borrow_mut().push(d);
    }

    pub fn add_disabled_device(&self, udid: &str, device_class: DeviceClass) {
        let mut d = device(udid);
        d.device_class = device_class;
        d.enabled = false;
        self.devices.borrow_mut().push(d);
    }

    pub fn add_profile(&self, profile: RemoteProfile) {
        self.profiles.borrow_mut().push(profile);
    }

    pub fn add_app(&self, app: RemoteApp) {
        self.apps.borrow_mut().push(app);
    }

    pub fn profiles(&self) -> Vec<RemoteProfile> {
        self.profiles.borrow().clone()
    }

    pub fn apps(&self) -> Vec<RemoteApp> {
        self.apps.borrow().clone()
    }

    /// Make registration of a device fail.
    pub fn fail_device_registration(&self, udid: &str) {
        self.failing_udids.borrow_mut().push(udid.to_string());
    }

    /// Make the next profile creation fail with an error.
    pub fn fail_next_profile_creation(&self, message: &str) {
        self.create_profile_errors.borrow_mut().push_back((
            PortalError::with_preferred("409 Conflict", vec![message.to_string()]),
            None,
        ));
    }

    /// Make the next profile creation fail because another client created
    /// `winner` first.
    pub fn lose_next_profile_creation(&self, message: &str, winner: RemoteProfile) {
        self.create_profile_errors.borrow_mut().push_back((
            PortalError::with_preferred("409 Conflict", vec![message.to_string()]),
            Some(winner),
        ));
    }

    /// Make deletion of the profile with the given id fail.
    pub fn fail_profile_deletion(&self, id: &str) {
        self.failing_deletions.borrow_mut().push(id.to_string());
    }
}

impl DeveloperPortal for FakePortal {
    fn list_certificates(
        &self,
        kind: CertificateKind,
    ) -> Result<Vec<RemoteCertificate>, AutoProvisionError> {
        self.record("list_certificates");

        Ok(self
            .certificates
            .borrow()
            .iter()
            .filter(|(c, _)| c.kind == kind)
            .map(|(c, _)| c.clone())
            .collect())
    }

    fn download_certificate(
        &self,
        certificate: &RemoteCertificate,
    ) -> Result<Vec<u8>, AutoProvisionError> {
        self.record("download_certificate");

        self.certificates
            .borrow()
            .iter()
            .find(|(c, _)| c.id == certificate.id)
            .map(|(_, der)| der.clone())
            .ok_or_else(|| PortalError::new("404 Not Found").into())
    }

    fn list_devices(
        &self,
        include_disabled: bool,
    ) -> Result<Vec<RemoteDevice>, AutoProvisionError> {
        self.record("list_devices");

        Ok(self
            .devices
            .borrow()
            .iter()
            .filter(|d| include_disabled || d.enabled)
            .cloned()
            .collect())
    }

    fn create_device(
        &self,
        name: &str,
        udid: &str,
        platform: Platform,
    ) -> Result<RemoteDevice, AutoProvisionError> {
        self.record("create_device");

        if self.failing_udids.borrow().iter().any(|u| u == udid) {
            return Err(PortalError::with_preferred(
                "409 Conflict",
                vec![format!("An invalid value '{}' was provided.", udid)],
            )
            .into());
        }

        let device = RemoteDevice {
            id: self.next_id("device"),
            udid: udid.to_string(),
            name: name.to_string(),
            device_class: match platform {
                Platform::Tvos => DeviceClass::AppleTv,
                Platform::Macos => DeviceClass::Mac,
                _ => DeviceClass::Iphone,
            },
            enabled: true,
        };
        self.devices.borrow_mut().push(device.clone());

        Ok(device)
    }

    fn list_profiles(
        &self,
        xcode_managed: bool,
        platform: Platform,
    ) -> Result<Vec<RemoteProfile>, AutoProvisionError> {
        self.record("list_profiles");

        Ok(self
            .profiles
            .borrow()
            .iter()
            .filter(|p| p.xcode_managed == xcode_managed)
            .filter(|p| p.sub_platform.as_deref() == platform.sub_platform())
            .cloned()
            .collect())
    }

    fn create_profile(
        &self,
        request: &ProfileRequest,
    ) -> Result<RemoteProfile, AutoProvisionError> {
        self.record("create_profile");

        if let Some((err, winner)) = self.create_profile_errors.borrow_mut().pop_front() {
            if let Some(winner) = winner {
                self.profiles.borrow_mut().push(winner);
            }

            return Err(err.into());
        }

        let profile = RemoteProfile {
            id: self.next_id("profile"),
            uuid: self.next_id("uuid"),
            name: request.name.clone(),
            app: request.app.clone(),
            method: request.profile_type.distribution_method(),
            expires: Utc::now() + Duration::days(365),
            certificate_ids: request.certificate_ids.clone(),
            device_udids: request.devices.iter().map(|d| d.udid.clone()).collect(),
            xcode_managed: false,
            sub_platform: request.profile_type.sub_platform().map(|s| s.to_string()),
            content: request.name.as_bytes().to_vec(),
        };
        self.profiles.borrow_mut().push(profile.clone());

        Ok(profile)
    }

    fn delete_profile(&self, profile: &RemoteProfile) -> Result<(), AutoProvisionError> {
        self.record("delete_profile");

        if self.failing_deletions.borrow().contains(&profile.id) {
            return Err(PortalError::with_preferred(
                "404 Not Found",
                vec![format!("There is no resource of type 'profiles' with id '{}'", profile.id)],
            )
            .into());
        }

        self.profiles.borrow_mut().retain(|p| p.id != profile.id);

        Ok(())
    }

    fn find_app(
        &self,
        bundle_id: &str,
        _platform: Platform,
    ) -> Result<Option<RemoteApp>, AutoProvisionError> {
        self.record("find_app");

        Ok(self
            .apps
            .borrow()
            .iter()
            .find(|a| a.bundle_id == bundle_id)
            .cloned())
    }

    fn create_app(
        &self,
        bundle_id: &str,
        name: &str,
        platform: Platform,
    ) -> Result<RemoteApp, AutoProvisionError> {
        self.record("create_app");

        let app = RemoteApp {
            id: self.next_id("app"),
            bundle_id: bundle_id.to_string(),
            name: name.to_string(),
            platform,
            services: AppServices::new(),
        };
        self.apps.borrow_mut().push(app.clone());

        Ok(app)
    }

    fn app_services(&self, app: &RemoteApp) -> Result<AppServices, AutoProvisionError> {
        self.record("app_services");

        Ok(self
            .apps
            .borrow()
            .iter()
            .find(|a| a.id == app.id)
            .map(|a| a.services.clone())
            .unwrap_or_default())
    }

    fn enable_service(
        &self,
        app: &RemoteApp,
        capability: Capability,
        setting: Option<&str>,
    ) -> Result<(), AutoProvisionError> {
        self.record("enable_service");

        if let Some(a) = self.apps.borrow_mut().iter_mut().find(|a| a.id == app.id) {
            a.services.enable(capability, setting.map(|s| s.to_string()));
        }

        Ok(())
    }
}
