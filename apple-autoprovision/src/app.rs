// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bundle id records and their enabled services.

use {
    crate::{
        distribution::Platform,
        entitlements::AppServices,
        portal::{DeveloperPortal, RemoteApp},
        AutoProvisionError,
    },
    log::{info, warn},
};

/// The name given to bundle id records we register.
pub fn app_name(prefix: &str, bundle_id: &str) -> String {
    let name = bundle_id
        .chars()
        .map(|c| match c {
            '.' | '_' | '-' => ' ',
            c => c,
        })
        .collect::<String>();

    format!("{} {}", prefix, name)
}

fn app_error(bundle_id: &str, e: AutoProvisionError) -> AutoProvisionError {
    AutoProvisionError::App {
        bundle_id: bundle_id.to_string(),
        message: e.portal_message(),
    }
}

/// Find the bundle id record for a bundle id, registering it if missing.
pub fn ensure_app(
    portal: &dyn DeveloperPortal,
    bundle_id: &str,
    platform: Platform,
    name_prefix: &str,
) -> Result<RemoteApp, AutoProvisionError> {
    if let Some(app) = portal
        .find_app(bundle_id, platform)
        .map_err(|e| app_error(bundle_id, e))?
    {
        info!("bundle id {} registered as {}", bundle_id, app.name);
        return Ok(app);
    }

    if bundle_id.contains('*') {
        return Err(AutoProvisionError::App {
            bundle_id: bundle_id.to_string(),
            message: "wildcard bundle ids are not registered automatically".to_string(),
        });
    }

    let name = app_name(name_prefix, bundle_id);
    info!("registering bundle id {} as {}", bundle_id, name);

    portal
        .create_app(bundle_id, &name, platform)
        .map_err(|e| app_error(bundle_id, e))
}

/// Enable services the app lacks.
///
/// Returns the app with its services as reported by the portal afterwards.
pub fn sync_app_services(
    portal: &dyn DeveloperPortal,
    app: &RemoteApp,
    required: &AppServices,
) -> Result<RemoteApp, AutoProvisionError> {
    let enabled = portal
        .app_services(app)
        .map_err(|e| app_error(&app.bundle_id, e))?;
    let missing = enabled.missing(required);

    if missing.is_empty() {
        info!("all required services enabled for {}", app.bundle_id);
        return Ok(RemoteApp {
            services: enabled,
            ..app.clone()
        });
    }

    for capability in missing {
        let setting = required.setting(capability);

        match setting {
            Some(setting) => warn!(
                "enabling {} ({}) for {}",
                capability, setting, app.bundle_id
            ),
            None => warn!("enabling {} for {}", capability, app.bundle_id),
        }

        portal
            .enable_service(app, capability, setting)
            .map_err(|e| app_error(&app.bundle_id, e))?;
    }

    let services = portal
        .app_services(app)
        .map_err(|e| app_error(&app.bundle_id, e))?;

    Ok(RemoteApp {
        services,
        ..app.clone()
    })
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            entitlements::Capability,
            testutil::{app, FakePortal},
        },
    };

    #[test]
    fn names() {
        assert_eq!(
            app_name("rprovision", "com.acme.my_app-beta"),
            "rprovision com acme my app beta"
        );
    }

    #[test]
    fn existing_app_is_reused() -> Result<(), AutoProvisionError> {
        let portal = FakePortal::default();
        portal.add_app(app("com.acme.app", &[]));

        let a = ensure_app(&portal, "com.acme.app", Platform::Ios, "rprovision")?;
        assert_eq!(a.id, "app-com.acme.app");
        assert_eq!(portal.call_count("create_app"), 0);

        Ok(())
    }

    #[test]
    fn missing_app_is_registered() -> Result<(), AutoProvisionError> {
        let portal = FakePortal::default();

        let a = ensure_app(&portal, "com.acme.app", Platform::Ios, "rprovision")?;
        assert_eq!(a.name, "rprovision com acme app");
        assert_eq!(portal.apps().len(), 1);

        assert!(matches!(
            ensure_app(&portal, "com.acme.*", Platform::Ios, "rprovision"),
            Err(AutoProvisionError::App { .. })
        ));
        assert_eq!(portal.call_count("create_app"), 1);

        Ok(())
    }

    #[test]
    fn missing_services_are_enabled() -> Result<(), AutoProvisionError> {
        let portal = FakePortal::default();
        portal.add_app(app("com.acme.app", &[Capability::PushNotifications]));
        let a = ensure_app(&portal, "com.acme.app", Platform::Ios, "rprovision")?;

        let required = [
            (Capability::PushNotifications, None),
            (Capability::HealthKit, None),
            (Capability::ICloud, Some("XCODE_6".to_string())),
        ]
        .into_iter()
        .collect::<AppServices>();

        let synced = sync_app_services(&portal, &a, &required)?;
        assert!(synced.services.covers(&required));
        assert_eq!(portal.call_count("enable_service"), 2);

        sync_app_services(&portal, &synced, &required)?;
        assert_eq!(portal.call_count("enable_service"), 2);

        Ok(())
    }
}
