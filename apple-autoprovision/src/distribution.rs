// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Distribution types, platforms, and related portal vocabulary.

use {
    crate::AutoProvisionError,
    std::{fmt::Formatter, str::FromStr},
};

/// How a build is going to be distributed.
///
/// This determines which certificate type signs the build and which kind of
/// provisioning profile is required.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum DistributionType {
    Development,
    AppStore,
    AdHoc,
    Enterprise,
}

impl DistributionType {
    pub fn all() -> &'static [Self] {
        &[Self::Development, Self::AppStore, Self::AdHoc, Self::Enterprise]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::AppStore => "app-store",
            Self::AdHoc => "ad-hoc",
            Self::Enterprise => "enterprise",
        }
    }

    /// The distribution method the portal records on profiles of this type.
    pub fn distribution_method(&self) -> DistributionMethod {
        match self {
            Self::Development => DistributionMethod::Limited,
            Self::AppStore => DistributionMethod::Store,
            Self::AdHoc => DistributionMethod::AdHoc,
            Self::Enterprise => DistributionMethod::InHouse,
        }
    }

    /// The kind of certificate needed to sign for this distribution.
    pub fn certificate_kind(&self) -> CertificateKind {
        match self {
            Self::Development => CertificateKind::Development,
            Self::AppStore | Self::AdHoc | Self::Enterprise => CertificateKind::Production,
        }
    }

    /// Whether profiles of this type embed a list of devices.
    pub fn requires_device_roster(&self) -> bool {
        matches!(self, Self::Development | Self::AdHoc)
    }
}

impl std::fmt::Display for DistributionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistributionType {
    type Err = AutoProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(Self::Development),
            "app-store" => Ok(Self::AppStore),
            "ad-hoc" => Ok(Self::AdHoc),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(AutoProvisionError::UnknownDistributionType(s.to_string())),
        }
    }
}

/// Distribution method as recorded on a provisioning profile.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DistributionMethod {
    Limited,
    Store,
    AdHoc,
    InHouse,
}

impl DistributionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Limited => "limited",
            Self::Store => "store",
            Self::AdHoc => "adhoc",
            Self::InHouse => "inhouse",
        }
    }
}

impl std::fmt::Display for DistributionMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Certificate kind used for signing.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CertificateKind {
    Development,
    Production,
}

impl CertificateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "distribution",
        }
    }
}

/// Apple platform a target is built for.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Platform {
    Ios,
    Tvos,
    Watchos,
    Macos,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ios => "iOS",
            Self::Tvos => "tvOS",
            Self::Watchos => "watchOS",
            Self::Macos => "macOS",
        }
    }

    /// Platform sub-type recorded on profiles, if any.
    ///
    /// Only tvOS profiles carry one.
    pub fn sub_platform(&self) -> Option<&'static str> {
        match self {
            Self::Tvos => Some("tvOS"),
            _ => None,
        }
    }

    /// The platform value the App Store Connect API uses for bundle ids and devices.
    pub fn portal_platform(&self) -> &'static str {
        match self {
            Self::Macos => "MAC_OS",
            _ => "IOS",
        }
    }

    /// Filename extension of installed provisioning profiles.
    pub fn profile_extension(&self) -> &'static str {
        match self {
            Self::Macos => "provisionprofile",
            _ => "mobileprovision",
        }
    }

    /// Device classes that can run builds for this platform.
    pub fn device_classes(&self) -> &'static [DeviceClass] {
        match self {
            Self::Ios | Self::Watchos => &[
                DeviceClass::AppleWatch,
                DeviceClass::Ipad,
                DeviceClass::Iphone,
                DeviceClass::Ipod,
            ],
            Self::Tvos => &[DeviceClass::AppleTv],
            Self::Macos => &[],
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = AutoProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ios" => Ok(Self::Ios),
            "tvos" => Ok(Self::Tvos),
            "watchos" => Ok(Self::Watchos),
            "macos" | "osx" => Ok(Self::Macos),
            _ => Err(AutoProvisionError::UnknownPlatform(s.to_string())),
        }
    }
}

/// Class of a registered device.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DeviceClass {
    AppleWatch,
    Ipad,
    Iphone,
    Ipod,
    AppleTv,
    Mac,
    Unknown,
}

impl DeviceClass {
    pub fn from_portal(s: &str) -> Self {
        match s {
            "APPLE_WATCH" => Self::AppleWatch,
            "IPAD" => Self::Ipad,
            "IPHONE" => Self::Iphone,
            "IPOD" => Self::Ipod,
            "APPLE_TV" => Self::AppleTv,
            "MAC" => Self::Mac,
            _ => Self::Unknown,
        }
    }
}

/// Provisioning profile type, as named by App Store Connect.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ProfileType {
    IosAppDevelopment,
    IosAppStore,
    IosAppAdHoc,
    IosAppInHouse,
    TvosAppDevelopment,
    TvosAppStore,
    TvosAppAdHoc,
    TvosAppInHouse,
    MacAppDevelopment,
    MacAppStore,
    MacAppDirect,
}

impl ProfileType {
    /// Resolve the profile type for a platform and distribution.
    ///
    /// macOS has no ad-hoc or in-house profiles: those map to Developer ID
    /// (direct) distribution.
    pub fn new(platform: Platform, distribution: DistributionType) -> Self {
        match (platform, distribution) {
            (Platform::Tvos, DistributionType::Development) => Self::TvosAppDevelopment,
            (Platform::Tvos, DistributionType::AppStore) => Self::TvosAppStore,
            (Platform::Tvos, DistributionType::AdHoc) => Self::TvosAppAdHoc,
            (Platform::Tvos, DistributionType::Enterprise) => Self::TvosAppInHouse,
            (Platform::Macos, DistributionType::Development) => Self::MacAppDevelopment,
            (Platform::Macos, DistributionType::AppStore) => Self::MacAppStore,
            (Platform::Macos, _) => Self::MacAppDirect,
            (_, DistributionType::Development) => Self::IosAppDevelopment,
            (_, DistributionType::AppStore) => Self::IosAppStore,
            (_, DistributionType::AdHoc) => Self::IosAppAdHoc,
            (_, DistributionType::Enterprise) => Self::IosAppInHouse,
        }
    }

    /// All profile types relevant to a platform.
    pub fn for_platform(platform: Platform) -> Vec<Self> {
        DistributionType::all()
            .iter()
            .map(|d| Self::new(platform, *d))
            .fold(vec![], |mut acc, t| {
                if !acc.contains(&t) {
                    acc.push(t);
                }
                acc
            })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IosAppDevelopment => "IOS_APP_DEVELOPMENT",
            Self::IosAppStore => "IOS_APP_STORE",
            Self::IosAppAdHoc => "IOS_APP_ADHOC",
            Self::IosAppInHouse => "IOS_APP_INHOUSE",
            Self::TvosAppDevelopment => "TVOS_APP_DEVELOPMENT",
            Self::TvosAppStore => "TVOS_APP_STORE",
            Self::TvosAppAdHoc => "TVOS_APP_ADHOC",
            Self::TvosAppInHouse => "TVOS_APP_INHOUSE",
            Self::MacAppDevelopment => "MAC_APP_DEVELOPMENT",
            Self::MacAppStore => "MAC_APP_STORE",
            Self::MacAppDirect => "MAC_APP_DIRECT",
        }
    }

    pub fn from_portal(s: &str) -> Option<Self> {
        Some(match s {
            "IOS_APP_DEVELOPMENT" => Self::IosAppDevelopment,
            "IOS_APP_STORE" => Self::IosAppStore,
            "IOS_APP_ADHOC" => Self::IosAppAdHoc,
            "IOS_APP_INHOUSE" => Self::IosAppInHouse,
            "TVOS_APP_DEVELOPMENT" => Self::TvosAppDevelopment,
            "TVOS_APP_STORE" => Self::TvosAppStore,
            "TVOS_APP_ADHOC" => Self::TvosAppAdHoc,
            "TVOS_APP_INHOUSE" => Self::TvosAppInHouse,
            "MAC_APP_DEVELOPMENT" => Self::MacAppDevelopment,
            "MAC_APP_STORE" => Self::MacAppStore,
            "MAC_APP_DIRECT" => Self::MacAppDirect,
            _ => return None,
        })
    }

    pub fn distribution_method(&self) -> DistributionMethod {
        match self {
            Self::IosAppDevelopment | Self::TvosAppDevelopment | Self::MacAppDevelopment => {
                DistributionMethod::Limited
            }
            Self::IosAppStore | Self::TvosAppStore | Self::MacAppStore => DistributionMethod::Store,
            Self::IosAppAdHoc | Self::TvosAppAdHoc | Self::MacAppDirect => {
                DistributionMethod::AdHoc
            }
            Self::IosAppInHouse | Self::TvosAppInHouse => DistributionMethod::InHouse,
        }
    }

    /// The platform sub-type profiles of this type carry.
    pub fn sub_platform(&self) -> Option<&'static str> {
        match self {
            Self::TvosAppDevelopment
            | Self::TvosAppStore
            | Self::TvosAppAdHoc
            | Self::TvosAppInHouse => Some("tvOS"),
            _ => None,
        }
    }
}
