// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Apple Developer Portal access via the App Store Connect API.

pub mod api_token;
pub mod provisioning_api;

use {
    self::{
        api_token::{unix_now, AppStoreConnectToken, ConnectTokenEncoder},
        provisioning_api::{
            parse_date, portal_error, BundleIdAttributes, BundleIdCapabilityAttributes,
            BundleIdCapabilityCreateRelationships, BundleIdCreateAttributes,
            CapabilityOption, CapabilitySetting, CertificateAttributes, CreateRequest,
            DeviceAttributes, DeviceCreateAttributes, Document, IncludedResource,
            NoRelationships, ProfileAttributes, ProfileCreateAttributes,
            ProfileCreateRelationships, Relationship, Resource, ResourceIdentifier, ToMany,
            ToOne,
        },
    },
    crate::{
        distribution::{CertificateKind, DeviceClass, Platform, ProfileType},
        entitlements::{AppServices, Capability},
        error::PortalError,
        portal::{
            is_xcode_managed_name, DeveloperPortal, ProfileRequest, RemoteApp,
            RemoteCertificate, RemoteDevice, RemoteProfile,
        },
        AutoProvisionError,
    },
    log::{debug, error, warn},
    reqwest::blocking::{Client, ClientBuilder, RequestBuilder},
    serde::{de::DeserializeOwned, Deserialize, Serialize},
    std::{
        collections::HashMap,
        fs::Permissions,
        io::Write,
        path::Path,
        sync::Mutex,
    },
};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

pub const APP_STORE_CONNECT_API_URL: &str = "https://api.appstoreconnect.apple.com/v1";

/// Page size of listings. The maximum the API allows.
const PAGE_LIMIT: &str = "200";

/// Maximum number of related certificates and devices included with a profile.
const INCLUDED_LIMIT: usize = 50;

#[cfg(unix)]
fn set_permissions_private(p: &mut Permissions) {
    p.set_mode(0o600);
}

#[cfg(windows)]
fn set_permissions_private(_: &mut Permissions) {}

/// All components of an App Store Connect API Key in one serializable value.
///
/// Saving keys as a single file means users don't need to provide the 3
/// pieces of a key to every command.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct UnifiedApiKey {
    /// Who issued the key. Likely a UUID.
    issuer_id: String,

    /// Key identifier, like `DEADBEEF42`.
    key_id: String,

    /// Base64 encoded DER of ECDSA private key material.
    private_key: String,
}

impl UnifiedApiKey {
    /// Construct an instance from a PEM encoded ECDSA private key.
    pub fn from_ecdsa_pem(
        issuer_id: impl ToString,
        key_id: impl ToString,
        pem_data: impl AsRef<[u8]>,
    ) -> Result<Self, AutoProvisionError> {
        let parsed = pem::parse(pem_data).map_err(|e| {
            AutoProvisionError::AppStoreConnectApiKey(format!("error parsing PEM: {}", e))
        })?;

        if parsed.tag != "PRIVATE KEY" {
            return Err(AutoProvisionError::AppStoreConnectApiKey(
                "does not look like a PRIVATE KEY".to_string(),
            ));
        }

        Ok(Self {
            issuer_id: issuer_id.to_string(),
            key_id: key_id.to_string(),
            private_key: base64::encode(parsed.contents),
        })
    }

    /// Construct an instance from the `.p8` file downloaded from App Store Connect.
    pub fn from_ecdsa_pem_path(
        issuer_id: impl ToString,
        key_id: impl ToString,
        path: impl AsRef<Path>,
    ) -> Result<Self, AutoProvisionError> {
        let pem_data = std::fs::read(path.as_ref())?;

        Self::from_ecdsa_pem(issuer_id, key_id, pem_data)
    }

    pub fn from_json(data: impl AsRef<[u8]>) -> Result<Self, AutoProvisionError> {
        Ok(serde_json::from_slice(data.as_ref())?)
    }

    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, AutoProvisionError> {
        let data = std::fs::read(path.as_ref())?;

        Self::from_json(data)
    }

    pub fn to_json_string(&self) -> Result<String, AutoProvisionError> {
        Ok(serde_json::to_string_pretty(&self)?)
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Write this instance to a JSON file.
    ///
    /// The file is only readable by its owner on platforms where this is
    /// implemented. Missing parent directories are created.
    pub fn write_json_file(&self, path: impl AsRef<Path>) -> Result<(), AutoProvisionError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let data = self.to_json_string()?;

        let mut fh = std::fs::File::create(path)?;
        let mut permissions = fh.metadata()?.permissions();
        set_permissions_private(&mut permissions);
        fh.set_permissions(permissions)?;
        fh.write_all(data.as_bytes())?;

        Ok(())
    }
}

impl TryFrom<UnifiedApiKey> for ConnectTokenEncoder {
    type Error = AutoProvisionError;

    fn try_from(value: UnifiedApiKey) -> Result<Self, Self::Error> {
        let der = base64::decode(value.private_key).map_err(|e| {
            AutoProvisionError::AppStoreConnectApiKey(format!(
                "failed to base64 decode private key: {}",
                e
            ))
        })?;

        Ok(Self::from_ecdsa_der(value.key_id, value.issuer_id, &der))
    }
}

/// Obtain the default [Client] to use for HTTP requests.
pub fn default_client() -> Result<Client, AutoProvisionError> {
    Ok(ClientBuilder::default()
        .user_agent("apple-autoprovision crate (https://github.com/indygreg/PyOxidizer)")
        .build()?)
}

fn certificate_types(kind: CertificateKind) -> &'static [&'static str] {
    match kind {
        CertificateKind::Development => &["IOS_DEVELOPMENT", "DEVELOPMENT", "MAC_APP_DEVELOPMENT"],
        CertificateKind::Production => {
            &["IOS_DISTRIBUTION", "DISTRIBUTION", "MAC_APP_DISTRIBUTION"]
        }
    }
}

fn decode_base64(what: &str, data: &str) -> Result<Vec<u8>, AutoProvisionError> {
    base64::decode(data).map_err(|e| {
        PortalError::new(format!("invalid base64 in {}: {}", what, e)).into()
    })
}

fn remote_certificate(
    resource: &Resource<CertificateAttributes>,
    kind: CertificateKind,
) -> RemoteCertificate {
    let attributes = &resource.attributes;

    RemoteCertificate {
        id: resource.id.clone(),
        name: attributes
            .display_name
            .clone()
            .unwrap_or_else(|| attributes.name.clone()),
        kind,
        downloadable: attributes.certificate_content.is_some(),
    }
}

fn remote_device(resource: &Resource<DeviceAttributes>) -> RemoteDevice {
    let attributes = &resource.attributes;

    RemoteDevice {
        id: resource.id.clone(),
        udid: attributes.udid.clone(),
        name: attributes.name.clone(),
        device_class: DeviceClass::from_portal(&attributes.device_class),
        enabled: attributes.status == "ENABLED",
    }
}

fn remote_app(id: &str, attributes: &BundleIdAttributes, services: AppServices) -> RemoteApp {
    RemoteApp {
        id: id.to_string(),
        bundle_id: attributes.identifier.clone(),
        name: attributes.name.clone(),
        platform: match attributes.platform.as_deref() {
            Some("MAC_OS") => Platform::Macos,
            _ => Platform::Ios,
        },
        services,
    }
}

fn app_services(resources: &[Resource<BundleIdCapabilityAttributes>]) -> AppServices {
    resources
        .iter()
        .filter_map(|r| {
            let attributes = &r.attributes;

            match Capability::from_capability_type(&attributes.capability_type) {
                Some(capability) => Some((
                    capability,
                    attributes.enabled_option().map(|s| s.to_string()),
                )),
                None => {
                    debug!("ignoring capability {}", attributes.capability_type);
                    None
                }
            }
        })
        .collect()
}

/// Construct a [RemoteProfile] from a listed profile and its included resources.
/// Whether a profile relationship was cut off at [INCLUDED_LIMIT].
fn is_partial(relationship: &Option<Relationship>) -> bool {
    relationship
        .as_ref()
        .map(|r| r.is_partial(INCLUDED_LIMIT))
        .unwrap_or(false)
}

fn remote_profile(
    resource: &Resource<ProfileAttributes>,
    included: &[IncludedResource],
    app: RemoteApp,
) -> Result<RemoteProfile, AutoProvisionError> {
    let attributes = &resource.attributes;

    let profile_type = ProfileType::from_portal(&attributes.profile_type).ok_or_else(|| {
        PortalError::new(format!("unknown profile type: {}", attributes.profile_type))
    })?;

    let expires = parse_date(&attributes.expiration_date).ok_or_else(|| {
        PortalError::new(format!(
            "invalid profile expiration date: {}",
            attributes.expiration_date
        ))
    })?;

    let content = match &attributes.profile_content {
        Some(data) => decode_base64("profile content", data)?,
        None => vec![],
    };

    let relationships = &resource.relationships;

    let certificate_ids = relationships
        .certificates
        .as_ref()
        .map(|r| r.ids().into_iter().map(|s| s.to_string()).collect())
        .unwrap_or_default();

    let device_udids = relationships
        .devices
        .as_ref()
        .map(|r| {
            r.ids()
                .into_iter()
                .filter_map(|id| {
                    included
                        .iter()
                        .find(|i| i.r#type == "devices" && i.id == id)
                        .and_then(|i| i.attribute_str("udid"))
                        .map(|s| s.to_string())
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(RemoteProfile {
        id: resource.id.clone(),
        uuid: attributes.uuid.clone(),
        name: attributes.name.clone(),
        app,
        method: profile_type.distribution_method(),
        expires,
        certificate_ids,
        device_udids,
        xcode_managed: is_xcode_managed_name(&attributes.name),
        sub_platform: profile_type.sub_platform().map(|s| s.to_string()),
        content,
    })
}

/// A client for the provisioning part of the App Store Connect API.
pub struct AppStoreConnectClient {
    client: Client,
    base_url: String,
    connect_token: ConnectTokenEncoder,
    token: Mutex<Option<AppStoreConnectToken>>,

    /// Certificate content seen in listings, by certificate id.
    certificate_content: Mutex<HashMap<String, String>>,

    /// Services of bundle ids, by bundle id record id.
    services: Mutex<HashMap<String, AppServices>>,
}

impl AppStoreConnectClient {
    pub fn new(connect_token: ConnectTokenEncoder) -> Result<Self, AutoProvisionError> {
        Ok(Self {
            client: default_client()?,
            base_url: APP_STORE_CONNECT_API_URL.to_string(),
            connect_token,
            token: Mutex::new(None),
            certificate_content: Mutex::new(HashMap::new()),
            services: Mutex::new(HashMap::new()),
        })
    }

    fn get_token(&self) -> Result<String, AutoProvisionError> {
        let mut token = self.token.lock().expect("token lock should not be poisoned");

        let usable = token
            .as_ref()
            .map(|t| t.is_usable_at(unix_now()))
            .unwrap_or(false);

        if !usable {
            token.replace(self.connect_token.new_token()?);
        }

        Ok(token
            .as_ref()
            .map(|t| t.token.clone())
            .unwrap_or_default())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, AutoProvisionError> {
        Ok(request
            .bearer_auth(self.get_token()?)
            .header("Accept", "application/json"))
    }

    /// Send a request, converting error responses into [PortalError].
    fn execute(
        &self,
        request: RequestBuilder,
    ) -> Result<reqwest::blocking::Response, AutoProvisionError> {
        let request = self.authorized(request)?.build()?;
        let url = request.url().to_string();

        debug!("{} {}", request.method(), url);

        let response = self.client.execute(request)?;

        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status().as_u16();
            error!("HTTP error from {}", url);

            let body = response.bytes()?;
            for line in String::from_utf8_lossy(body.as_ref()).lines() {
                error!("{}", line);
            }

            Err(portal_error(status, body.as_ref()).into())
        }
    }

    fn send_request<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, AutoProvisionError> {
        Ok(self.execute(request)?.json::<T>()?)
    }

    /// Fetch all pages of a listing.
    fn get_all<A: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<(Vec<Resource<A>>, Vec<IncludedResource>), AutoProvisionError> {
        let mut resources = vec![];
        let mut included = vec![];

        let mut request = self
            .client
            .get(self.url(path))
            .query(query)
            .query(&[("limit", PAGE_LIMIT)]);

        loop {
            let doc: Document<Vec<Resource<A>>> = self.send_request(request)?;

            resources.extend(doc.data);
            included.extend(doc.included);

            match doc.links.next {
                Some(next) => {
                    request = self.client.get(next);
                }
                None => break,
            }
        }

        Ok((resources, included))
    }

    fn post<A: Serialize, R: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &CreateRequest<A, R>,
    ) -> Result<T, AutoProvisionError> {
        self.send_request(
            self.client
                .post(self.url(path))
                .header("Content-Type", "application/json")
                .json(body),
        )
    }

    fn app_services_by_id(&self, id: &str) -> Result<AppServices, AutoProvisionError> {
        if let Some(services) = self
            .services
            .lock()
            .expect("services lock should not be poisoned")
            .get(id)
        {
            return Ok(services.clone());
        }

        let (resources, _) = self.get_all::<BundleIdCapabilityAttributes>(
            &format!("bundleIds/{}/bundleIdCapabilities", id),
            &[],
        )?;
        let services = app_services(&resources);

        self.services
            .lock()
            .expect("services lock should not be poisoned")
            .insert(id.to_string(), services.clone());

        Ok(services)
    }

    fn profile_certificate_ids(&self, id: &str) -> Result<Vec<String>, AutoProvisionError> {
        debug!("fetching all certificates of profile {}", id);
        let (resources, _) = self
            .get_all::<CertificateAttributes>(&format!("profiles/{}/certificates", id), &[])?;

        Ok(resources.into_iter().map(|r| r.id).collect())
    }

    fn profile_device_udids(&self, id: &str) -> Result<Vec<String>, AutoProvisionError> {
        debug!("fetching all devices of profile {}", id);
        let (resources, _) =
            self.get_all::<DeviceAttributes>(&format!("profiles/{}/devices", id), &[])?;

        Ok(resources.into_iter().map(|r| r.attributes.udid).collect())
    }

    fn list_profiles_of_type(
        &self,
        profile_type: ProfileType,
        xcode_managed: bool,
    ) -> Result<Vec<RemoteProfile>, AutoProvisionError> {
        let included_limit = INCLUDED_LIMIT.to_string();
        let (resources, included) = self.get_all::<ProfileAttributes>(
            "profiles",
            &[
                ("filter[profileType]", profile_type.as_str()),
                ("filter[profileState]", "ACTIVE"),
                ("include", "bundleId,certificates,devices"),
                ("limit[certificates]", included_limit.as_str()),
                ("limit[devices]", included_limit.as_str()),
            ],
        )?;

        let mut profiles = vec![];

        for resource in resources
            .iter()
            .filter(|r| is_xcode_managed_name(&r.attributes.name) == xcode_managed)
        {
            let bundle_id = resource
                .relationships
                .bundle_id
                .as_ref()
                .and_then(|r| r.ids().first().map(|s| s.to_string()));

            let app = bundle_id.and_then(|id| {
                included
                    .iter()
                    .find(|i| i.r#type == "bundleIds" && i.id == id)
                    .and_then(|i| {
                        serde_json::from_value::<BundleIdAttributes>(i.attributes.clone()).ok()
                    })
                    .map(|attributes| (id, attributes))
            });

            let (id, attributes) = match app {
                Some(app) => app,
                None => {
                    warn!(
                        "ignoring profile {}: bundle id not included in response",
                        resource.attributes.name
                    );
                    continue;
                }
            };

            let services = self.app_services_by_id(&id)?;

            let mut profile =
                remote_profile(resource, &included, remote_app(&id, &attributes, services))?;

            let relationships = &resource.relationships;
            if is_partial(&relationships.certificates) {
                profile.certificate_ids = self.profile_certificate_ids(&resource.id)?;
            }
            if is_partial(&relationships.devices) {
                profile.device_udids = self.profile_device_udids(&resource.id)?;
            }

            profiles.push(profile);
        }

        Ok(profiles)
    }
}

impl DeveloperPortal for AppStoreConnectClient {
    fn list_certificates(
        &self,
        kind: CertificateKind,
    ) -> Result<Vec<RemoteCertificate>, AutoProvisionError> {
        let types = certificate_types(kind).join(",");
        let (resources, _) = self.get_all::<CertificateAttributes>(
            "certificates",
            &[("filter[certificateType]", types.as_str())],
        )?;

        let mut content = self
            .certificate_content
            .lock()
            .expect("certificate lock should not be poisoned");

        Ok(resources
            .iter()
            .map(|r| {
                if let Some(data) = &r.attributes.certificate_content {
                    content.insert(r.id.clone(), data.clone());
                }

                remote_certificate(r, kind)
            })
            .collect())
    }

    fn download_certificate(
        &self,
        certificate: &RemoteCertificate,
    ) -> Result<Vec<u8>, AutoProvisionError> {
        let known = self
            .certificate_content
            .lock()
            .expect("certificate lock should not be poisoned")
            .get(&certificate.id)
            .cloned();

        let data = match known {
            Some(data) => data,
            None => {
                let doc: Document<Resource<CertificateAttributes>> = self.send_request(
                    self.client
                        .get(self.url(&format!("certificates/{}", certificate.id))),
                )?;

                doc.data.attributes.certificate_content.ok_or_else(|| {
                    PortalError::new(format!("certificate {} has no content", certificate.id))
                })?
            }
        };

        decode_base64("certificate content", &data)
    }

    fn list_devices(
        &self,
        include_disabled: bool,
    ) -> Result<Vec<RemoteDevice>, AutoProvisionError> {
        let query: &[(&str, &str)] = if include_disabled {
            &[]
        } else {
            &[("filter[status]", "ENABLED")]
        };

        let (resources, _) = self.get_all::<DeviceAttributes>("devices", query)?;

        Ok(resources.iter().map(remote_device).collect())
    }

    fn create_device(
        &self,
        name: &str,
        udid: &str,
        platform: Platform,
    ) -> Result<RemoteDevice, AutoProvisionError> {
        let body = CreateRequest::<_, NoRelationships>::new(
            "devices",
            DeviceCreateAttributes {
                name,
                udid,
                platform: platform.portal_platform(),
            },
            None,
        );

        let doc: Document<Resource<DeviceAttributes>> = self.post("devices", &body)?;

        Ok(remote_device(&doc.data))
    }

    fn list_profiles(
        &self,
        xcode_managed: bool,
        platform: Platform,
    ) -> Result<Vec<RemoteProfile>, AutoProvisionError> {
        let mut profiles = vec![];

        for profile_type in ProfileType::for_platform(platform) {
            profiles.extend(self.list_profiles_of_type(profile_type, xcode_managed)?);
        }

        Ok(profiles)
    }

    fn create_profile(
        &self,
        request: &ProfileRequest,
    ) -> Result<RemoteProfile, AutoProvisionError> {
        let body = CreateRequest::new(
            "profiles",
            ProfileCreateAttributes {
                name: &request.name,
                profile_type: request.profile_type.as_str(),
            },
            Some(ProfileCreateRelationships {
                bundle_id: ToOne {
                    data: ResourceIdentifier::new("bundleIds", &request.app.id),
                },
                certificates: ToMany {
                    data: request
                        .certificate_ids
                        .iter()
                        .map(|id| ResourceIdentifier::new("certificates", id))
                        .collect(),
                },
                devices: ToMany {
                    data: request
                        .devices
                        .iter()
                        .map(|d| ResourceIdentifier::new("devices", &d.id))
                        .collect(),
                },
            }),
        );

        let doc: Document<Resource<ProfileAttributes>> = self.post("profiles", &body)?;

        let mut profile = remote_profile(&doc.data, &[], request.app.clone())?;
        profile.certificate_ids = request.certificate_ids.clone();
        profile.device_udids = request.devices.iter().map(|d| d.udid.clone()).collect();

        Ok(profile)
    }

    fn delete_profile(&self, profile: &RemoteProfile) -> Result<(), AutoProvisionError> {
        self.execute(
            self.client
                .delete(self.url(&format!("profiles/{}", profile.id))),
        )?;

        Ok(())
    }

    fn find_app(
        &self,
        bundle_id: &str,
        _platform: Platform,
    ) -> Result<Option<RemoteApp>, AutoProvisionError> {
        let (resources, _) = self.get_all::<BundleIdAttributes>(
            "bundleIds",
            &[("filter[identifier]", bundle_id)],
        )?;

        // The identifier filter also matches ids the filter is a prefix of.
        match resources
            .iter()
            .find(|r| r.attributes.identifier == bundle_id)
        {
            Some(r) => {
                let services = self.app_services_by_id(&r.id)?;

                Ok(Some(remote_app(&r.id, &r.attributes, services)))
            }
            None => Ok(None),
        }
    }

    fn create_app(
        &self,
        bundle_id: &str,
        name: &str,
        platform: Platform,
    ) -> Result<RemoteApp, AutoProvisionError> {
        let body = CreateRequest::<_, NoRelationships>::new(
            "bundleIds",
            BundleIdCreateAttributes {
                identifier: bundle_id,
                name,
                platform: platform.portal_platform(),
            },
            None,
        );

        let doc: Document<Resource<BundleIdAttributes>> = self.post("bundleIds", &body)?;

        Ok(remote_app(&doc.data.id, &doc.data.attributes, AppServices::new()))
    }

    fn app_services(&self, app: &RemoteApp) -> Result<AppServices, AutoProvisionError> {
        self.app_services_by_id(&app.id)
    }

    fn enable_service(
        &self,
        app: &RemoteApp,
        capability: Capability,
        setting: Option<&str>,
    ) -> Result<(), AutoProvisionError> {
        let settings = match (capability.setting_key(), setting) {
            (Some(key), Some(option)) => vec![CapabilitySetting {
                key: key.to_string(),
                options: vec![CapabilityOption {
                    key: option.to_string(),
                    enabled: true,
                }],
            }],
            _ => vec![],
        };

        let body = CreateRequest::new(
            "bundleIdCapabilities",
            BundleIdCapabilityAttributes {
                capability_type: capability.capability_type().to_string(),
                settings,
            },
            Some(BundleIdCapabilityCreateRelationships {
                bundle_id: ToOne {
                    data: ResourceIdentifier::new("bundleIds", &app.id),
                },
            }),
        );

        let _: Document<Resource<BundleIdCapabilityAttributes>> =
            self.post("bundleIdCapabilities", &body)?;

        self.services
            .lock()
            .expect("services lock should not be poisoned")
            .remove(&app.id);

        Ok(())
    }
}
