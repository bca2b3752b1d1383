// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test device registration.

use {
    crate::{
        distribution::Platform,
        portal::{DeveloperPortal, RemoteDevice},
        AutoProvisionError,
    },
    log::{info, warn},
    serde::Deserialize,
};

/// Normalize a device UDID for comparison.
///
/// Only ASCII alphanumeric characters are significant.
pub fn normalize_udid(udid: &str) -> String {
    udid.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// A device declared as a test device for a build.
#[derive(Clone, Debug, Deserialize, Eq)]
pub struct DeclaredDevice {
    #[serde(rename = "device_identifier")]
    pub udid: String,

    #[serde(rename = "title")]
    pub name: String,

    #[serde(default)]
    pub device_type: Option<String>,
}

impl DeclaredDevice {
    pub fn new(udid: impl ToString, name: impl ToString) -> Self {
        Self {
            udid: udid.to_string(),
            name: name.to_string(),
            device_type: None,
        }
    }

    pub fn normalized_udid(&self) -> String {
        normalize_udid(&self.udid)
    }
}

impl PartialEq for DeclaredDevice {
    fn eq(&self, other: &Self) -> bool {
        self.normalized_udid() == other.normalized_udid()
    }
}

/// Group devices by normalized UDID, preserving declaration order.
pub fn duplicate_groups(devices: &[DeclaredDevice]) -> Vec<Vec<&DeclaredDevice>> {
    let mut groups: Vec<Vec<&DeclaredDevice>> = vec![];

    for device in devices {
        match groups.iter_mut().find(|g| *g[0] == *device) {
            Some(group) => group.push(device),
            None => groups.push(vec![device]),
        }
    }

    groups
}

/// Remove duplicate devices. The first declaration of a device wins.
pub fn dedupe_devices(devices: &[DeclaredDevice]) -> Vec<DeclaredDevice> {
    duplicate_groups(devices)
        .into_iter()
        .map(|group| {
            if group.len() > 1 {
                warn!(
                    "device {} declared {} times: {}",
                    group[0].normalized_udid(),
                    group.len(),
                    group
                        .iter()
                        .map(|d| format!("{} ({})", d.name, d.udid))
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }

            group[0].clone()
        })
        .collect()
}

/// Devices of a platform.
pub fn filter_devices_for_platform(
    devices: Vec<RemoteDevice>,
    platform: Platform,
) -> Vec<RemoteDevice> {
    let classes = platform.device_classes();

    devices
        .into_iter()
        .filter(|d| classes.contains(&d.device_class))
        .collect()
}

/// Ensure declared test devices are registered on the portal.
///
/// Returns the registered devices usable on `platform`. Failure to register an
/// individual device is not fatal: the device is skipped.
///
/// Disabled devices are considered registered, so they aren't registered again,
/// but they are left out of the returned roster. Apple doesn't allow disabled
/// devices in provisioning profiles.
pub fn reconcile_devices(
    declared: &[DeclaredDevice],
    platform: Platform,
    portal: &dyn DeveloperPortal,
) -> Result<Vec<RemoteDevice>, AutoProvisionError> {
    if declared.is_empty() {
        info!("no test devices declared");
        return Ok(vec![]);
    }

    let declared = dedupe_devices(declared);
    let mut remote = portal.list_devices(true)?;

    info!(
        "{} test devices declared, {} devices registered on the Developer Portal",
        declared.len(),
        remote.len()
    );

    for device in declared {
        let udid = device.normalized_udid();

        if remote.iter().any(|r| normalize_udid(&r.udid) == udid) {
            info!("device {} ({}) already registered", device.name, device.udid);
            continue;
        }

        info!("registering device {} ({})", device.name, device.udid);

        match portal.create_device(&device.name, &device.udid, platform) {
            Ok(registered) => remote.push(registered),
            Err(e) => {
                warn!(
                    "failed to register device {} ({}): {}",
                    device.name,
                    device.udid,
                    e.portal_message()
                );
            }
        }
    }

    let devices = filter_devices_for_platform(remote, platform)
        .into_iter()
        .filter(|d| d.enabled)
        .collect::<Vec<_>>();

    info!("{} devices usable for {}", devices.len(), platform);

    Ok(devices)
}
