// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Entitlements and the app services (capabilities) they require. */

use {
    crate::AutoProvisionError,
    once_cell::sync::Lazy,
    plist::{Dictionary, Value},
    std::{collections::BTreeMap, fmt::Formatter, path::Path},
};

/// An app capability ("service") that can be enabled on a bundle id.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Capability {
    AccessWifiInformation,
    AppGroups,
    ApplePay,
    AssociatedDomains,
    AutofillCredentialProvider,
    ClassKit,
    DataProtection,
    GameCenter,
    HealthKit,
    HomeKit,
    Hotspot,
    ICloud,
    InAppPurchase,
    InterAppAudio,
    Multipath,
    NetworkExtensions,
    NfcTagReading,
    PersonalVpn,
    PushNotifications,
    SiriKit,
    Wallet,
    WirelessAccessoryConfiguration,
}

impl Capability {
    pub fn all() -> &'static [Self] {
        &[
            Self::AccessWifiInformation,
            Self::AppGroups,
            Self::ApplePay,
            Self::AssociatedDomains,
            Self::AutofillCredentialProvider,
            Self::ClassKit,
            Self::DataProtection,
            Self::GameCenter,
            Self::HealthKit,
            Self::HomeKit,
            Self::Hotspot,
            Self::ICloud,
            Self::InAppPurchase,
            Self::InterAppAudio,
            Self::Multipath,
            Self::NetworkExtensions,
            Self::NfcTagReading,
            Self::PersonalVpn,
            Self::PushNotifications,
            Self::SiriKit,
            Self::Wallet,
            Self::WirelessAccessoryConfiguration,
        ]
    }

    /// The `capabilityType` App Store Connect uses for this capability.
    pub fn capability_type(&self) -> &'static str {
        match self {
            Self::AccessWifiInformation => "ACCESS_WIFI_INFORMATION",
            Self::AppGroups => "APP_GROUPS",
            Self::ApplePay => "APPLE_PAY",
            Self::AssociatedDomains => "ASSOCIATED_DOMAINS",
            Self::AutofillCredentialProvider => "AUTOFILL_CREDENTIAL_PROVIDER",
            Self::ClassKit => "CLASSKIT",
            Self::DataProtection => "DATA_PROTECTION",
            Self::GameCenter => "GAME_CENTER",
            Self::HealthKit => "HEALTHKIT",
            Self::HomeKit => "HOMEKIT",
            Self::Hotspot => "HOT_SPOT",
            Self::ICloud => "ICLOUD",
            Self::InAppPurchase => "IN_APP_PURCHASE",
            Self::InterAppAudio => "INTER_APP_AUDIO",
            Self::Multipath => "MULTIPATH",
            Self::NetworkExtensions => "NETWORK_EXTENSIONS",
            Self::NfcTagReading => "NFC_TAG_READING",
            Self::PersonalVpn => "PERSONAL_VPN",
            Self::PushNotifications => "PUSH_NOTIFICATIONS",
            Self::SiriKit => "SIRIKIT",
            Self::Wallet => "WALLET",
            Self::WirelessAccessoryConfiguration => "WIRELESS_ACCESSORY_CONFIGURATION",
        }
    }

    pub fn from_capability_type(s: &str) -> Option<Self> {
        Self::all()
            .iter()
            .find(|c| c.capability_type() == s)
            .copied()
    }

    /// The key of the single setting this capability carries, if any.
    pub fn setting_key(&self) -> Option<&'static str> {
        match self {
            Self::DataProtection => Some("DATA_PROTECTION_PERMISSION_LEVEL"),
            Self::ICloud => Some("ICLOUD_VERSION"),
            _ => None,
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.capability_type())
    }
}

const ICLOUD_KV_STORE: &str = "com.apple.developer.ubiquity-kvstore-identifier";
const ICLOUD_SERVICES: &str = "com.apple.developer.icloud-services";
const DATA_PROTECTION: &str = "com.apple.developer.default-data-protection";

/// Entitlement keys that map directly to an on/off capability.
static SIMPLE_CAPABILITIES: Lazy<BTreeMap<&'static str, Capability>> = Lazy::new(|| {
    [
        (
            "com.apple.developer.networking.wifi-info",
            Capability::AccessWifiInformation,
        ),
        (
            "com.apple.security.application-groups",
            Capability::AppGroups,
        ),
        ("com.apple.developer.in-app-payments", Capability::ApplePay),
        (
            "com.apple.developer.associated-domains",
            Capability::AssociatedDomains,
        ),
        (
            "com.apple.developer.authentication-services.autofill-credential-provider",
            Capability::AutofillCredentialProvider,
        ),
        (
            "com.apple.developer.ClassKit-environment",
            Capability::ClassKit,
        ),
        ("com.apple.developer.game-center", Capability::GameCenter),
        ("com.apple.developer.healthkit", Capability::HealthKit),
        ("com.apple.developer.homekit", Capability::HomeKit),
        (
            "com.apple.developer.networking.HotspotConfiguration",
            Capability::Hotspot,
        ),
        ("com.apple.InAppPurchase", Capability::InAppPurchase),
        ("inter-app-audio", Capability::InterAppAudio),
        (
            "com.apple.developer.networking.multipath",
            Capability::Multipath,
        ),
        (
            "com.apple.developer.networking.networkextension",
            Capability::NetworkExtensions,
        ),
        (
            "com.apple.developer.nfc.readersession.formats",
            Capability::NfcTagReading,
        ),
        (
            "com.apple.developer.networking.vpn.api",
            Capability::PersonalVpn,
        ),
        ("aps-environment", Capability::PushNotifications),
        ("com.apple.developer.siri", Capability::SiriKit),
        (
            "com.apple.developer.pass-type-identifiers",
            Capability::Wallet,
        ),
        (
            "com.apple.external-accessory.wireless-configuration",
            Capability::WirelessAccessoryConfiguration,
        ),
    ]
    .into_iter()
    .collect()
});

/// Resolve the data protection setting for a `NSFileProtection*` value.
fn data_protection_level(value: &str) -> Result<&'static str, AutoProvisionError> {
    match value {
        "NSFileProtectionComplete" => Ok("COMPLETE_PROTECTION"),
        "NSFileProtectionCompleteUnlessOpen" => Ok("PROTECTED_UNLESS_OPEN"),
        "NSFileProtectionCompleteUntilFirstUserAuthentication" => {
            Ok("PROTECTED_UNTIL_FIRST_USER_AUTH")
        }
        _ => Err(AutoProvisionError::UnknownDataProtection(value.to_string())),
    }
}

/// Whether an entitlement value expresses a requirement.
fn is_requested(value: &Value) -> bool {
    match value {
        Value::Boolean(v) => *v,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Dictionary(d) => !d.is_empty(),
        _ => true,
    }
}

/// The set of enabled services of an app, with their settings.
///
/// Settings are App Store Connect capability option keys, like `XCODE_6` or
/// `COMPLETE_PROTECTION`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AppServices(BTreeMap<Capability, Option<String>>);

impl AppServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&mut self, capability: Capability, setting: Option<String>) {
        self.0.insert(capability, setting);
    }

    pub fn is_enabled(&self, capability: Capability) -> bool {
        self.0.contains_key(&capability)
    }

    pub fn setting(&self, capability: Capability) -> Option<&str> {
        self.0.get(&capability).and_then(|x| x.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Capability, Option<&str>)> {
        self.0.iter().map(|(k, v)| (*k, v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Required services not satisfied by this instance.
    ///
    /// A required service is satisfied when it is enabled and, if the requirement
    /// carries a setting, the enabled setting is identical.
    pub fn missing(&self, required: &AppServices) -> Vec<Capability> {
        required
            .iter()
            .filter(|(capability, setting)| match self.0.get(capability) {
                None => true,
                Some(enabled) => setting.is_some() && enabled.as_deref() != *setting,
            })
            .map(|(capability, _)| capability)
            .collect()
    }

    /// Whether every required service is satisfied.
    pub fn covers(&self, required: &AppServices) -> bool {
        self.missing(required).is_empty()
    }
}

impl FromIterator<(Capability, Option<String>)> for AppServices {
    fn from_iter<T: IntoIterator<Item = (Capability, Option<String>)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Entitlements of a build target.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Entitlements(Dictionary);

impl Entitlements {
    pub fn new(dict: Dictionary) -> Self {
        Self(dict)
    }

    /// Parse entitlements from plist data (XML or binary).
    pub fn from_plist_data(data: &[u8]) -> Result<Self, AutoProvisionError> {
        let value = Value::from_reader(std::io::Cursor::new(data))?;

        match value {
            Value::Dictionary(dict) => Ok(Self(dict)),
            _ => Err(AutoProvisionError::ProjectManifest(
                "entitlements plist is not a dictionary".to_string(),
            )),
        }
    }

    pub fn from_plist_path(path: impl AsRef<Path>) -> Result<Self, AutoProvisionError> {
        let data = std::fs::read(path.as_ref())?;

        Self::from_plist_data(&data)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compute the app services these entitlements require.
    ///
    /// Entitlements without a portal counterpart impose no requirement.
    pub fn required_services(&self) -> Result<AppServices, AutoProvisionError> {
        let mut services = AppServices::new();

        for (key, value) in self.0.iter() {
            if !is_requested(value) {
                continue;
            }

            if let Some(capability) = SIMPLE_CAPABILITIES.get(key.as_str()) {
                services.enable(*capability, None);
            } else if key == DATA_PROTECTION {
                let level = value.as_string().ok_or_else(|| {
                    AutoProvisionError::UnknownDataProtection(format!("{:?}", value))
                })?;

                services.enable(
                    Capability::DataProtection,
                    Some(data_protection_level(level)?.to_string()),
                );
            }
        }

        let kv_store = self
            .get(ICLOUD_KV_STORE)
            .and_then(|v| v.as_string())
            .map(|s| !s.is_empty())
            .unwrap_or(false);
        let icloud_services = self
            .get(ICLOUD_SERVICES)
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_string()).collect::<Vec<_>>())
            .unwrap_or_default();

        let documents_or_kit = icloud_services
            .iter()
            .any(|s| *s == "CloudDocuments" || *s == "CloudKit");

        if kv_store || documents_or_kit {
            services.enable(Capability::ICloud, Some("XCODE_6".to_string()));
        } else if !icloud_services.is_empty() {
            services.enable(Capability::ICloud, None);
        }

        Ok(services)
    }
}

impl From<Dictionary> for Entitlements {
    fn from(dict: Dictionary) -> Self {
        Self(dict)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, indoc::indoc};

    const ENTITLEMENTS_PLIST: &str = indoc! {r#"
        <?xml version="1.0" encoding="UTF-8"?>
        <!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
        <plist version="1.0">
        <dict>
            <key>aps-environment</key>
            <string>development</string>
            <key>com.apple.developer.healthkit</key>
            <true/>
            <key>com.apple.developer.homekit</key>
            <false/>
            <key>com.apple.developer.default-data-protection</key>
            <string>NSFileProtectionComplete</string>
            <key>com.apple.developer.icloud-services</key>
            <array>
                <string>CloudKit</string>
            </array>
            <key>keychain-access-groups</key>
            <array>
                <string>$(AppIdentifierPrefix)com.acme.app</string>
            </array>
        </dict>
        </plist>
    "#};

    #[test]
    fn required_services_from_plist() -> Result<(), AutoProvisionError> {
        let entitlements = Entitlements::from_plist_data(ENTITLEMENTS_PLIST.as_bytes())?;
        let services = entitlements.required_services()?;

        assert_eq!(services.len(), 4);
        assert!(services.is_enabled(Capability::PushNotifications));
        assert!(services.is_enabled(Capability::HealthKit));
        assert!(!services.is_enabled(Capability::HomeKit));
        assert_eq!(
            services.setting(Capability::DataProtection),
            Some("COMPLETE_PROTECTION")
        );
        assert_eq!(services.setting(Capability::ICloud), Some("XCODE_6"));

        Ok(())
    }

    #[test]
    fn unknown_data_protection() {
        let mut dict = Dictionary::new();
        dict.insert(
            DATA_PROTECTION.to_string(),
            Value::String("NSFileProtectionNone".to_string()),
        );

        assert!(matches!(
            Entitlements::new(dict).required_services(),
            Err(AutoProvisionError::UnknownDataProtection(_))
        ));
    }

    #[test]
    fn superset_coverage() {
        let required = [
            Capability::AppGroups,
            Capability::HealthKit,
            Capability::PushNotifications,
            Capability::SiriKit,
            Capability::Wallet,
        ]
        .into_iter()
        .map(|c| (c, None))
        .collect::<AppServices>();

        let mut enabled = [
            Capability::AppGroups,
            Capability::HealthKit,
            Capability::PushNotifications,
            Capability::SiriKit,
        ]
        .into_iter()
        .map(|c| (c, None))
        .collect::<AppServices>();

        assert_eq!(enabled.missing(&required), vec![Capability::Wallet]);
        assert!(!enabled.covers(&required));

        enabled.enable(Capability::Wallet, None);
        enabled.enable(Capability::HomeKit, None);
        assert!(enabled.covers(&required));
    }

    #[test]
    fn setting_mismatch_is_missing() {
        let mut required = AppServices::new();
        required.enable(
            Capability::DataProtection,
            Some("COMPLETE_PROTECTION".to_string()),
        );

        let mut enabled = AppServices::new();
        enabled.enable(
            Capability::DataProtection,
            Some("PROTECTED_UNLESS_OPEN".to_string()),
        );

        assert_eq!(enabled.missing(&required), vec![Capability::DataProtection]);
    }

    #[test]
    fn capability_type_round_trip() {
        for c in Capability::all() {
            assert_eq!(Capability::from_capability_type(c.capability_type()), Some(*c));
        }
    }
}
