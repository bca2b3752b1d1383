// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Automatic code signing provisioning for Apple platforms.
//!
//! This crate prepares a machine (typically an ephemeral CI worker) for
//! code signing an Xcode project. Given signing certificates, a project and
//! credentials for the Apple Developer Portal, it:
//!
//! * Matches local certificates against the certificates registered on the
//!   portal. (See [certificate::SigningIdentities].)
//! * Registers declared test devices. (See [device::reconcile_devices].)
//! * Registers bundle ids and enables the services the project's entitlements
//!   require. (See [app].)
//! * Finds a usable provisioning profile for every bundle id, creating,
//!   replacing and deleting the profiles it manages as needed. (See
//!   [profile_provisioner::ProfileProvisioner] and
//!   [profile_matcher::find_best_profile].) Alternatively, profiles managed
//!   by Xcode are looked up.
//! * Installs profiles and certificates and assigns them to project targets.
//!   (See [codesign_settings::CodesignSettingsResolver] and [keychain].)
//!
//! The Developer Portal is abstracted by the [portal::DeveloperPortal] trait.
//! [app_store_connect::AppStoreConnectClient] implements it using the
//! [App Store Connect API](https://developer.apple.com/documentation/appstoreconnectapi).
//!
//! Xcode projects aren't parsed. Instead, projects are described by a YAML
//! manifest. (See [project::ManifestProject].)
//!
//! The `rprovision` executable exposes this functionality from the command line.

pub mod app;
pub mod app_store_connect;
pub mod certificate;
pub mod codesign_settings;
pub mod config;
pub mod device;
pub mod distribution;
pub mod entitlements;
mod error;
pub use error::*;
pub mod keychain;
pub mod portal;
pub mod profile_cache;
pub mod profile_matcher;
pub mod profile_provisioner;
pub mod project;
pub mod provision;

#[cfg(test)]
mod testutil;
