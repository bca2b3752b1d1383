// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Provisioning resources of the App Store Connect API.
//!
//! See https://developer.apple.com/documentation/appstoreconnectapi/provisioning.

use {
    crate::error::PortalError,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

/// A JSON:API document.
#[derive(Clone, Debug, Deserialize)]
pub struct Document<T> {
    pub data: T,

    #[serde(default)]
    pub included: Vec<IncludedResource>,

    #[serde(default)]
    pub links: DocumentLinks,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DocumentLinks {
    pub next: Option<String>,
}

/// A resource of the document's primary type.
#[derive(Clone, Debug, Deserialize)]
pub struct Resource<A> {
    pub id: String,
    pub r#type: String,
    pub attributes: A,

    #[serde(default)]
    pub relationships: Relationships,
}

/// A related resource carried in `included`.
///
/// Attributes are left untyped until the resource type is known.
#[derive(Clone, Debug, Deserialize)]
pub struct IncludedResource {
    pub id: String,
    pub r#type: String,

    #[serde(default)]
    pub attributes: Value,
}

impl IncludedResource {
    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.as_str())
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ResourceIdentifier {
    pub id: String,
    pub r#type: String,
}

impl ResourceIdentifier {
    pub fn new(r#type: &str, id: impl ToString) -> Self {
        Self {
            id: id.to_string(),
            r#type: r#type.to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RelationshipData {
    One(ResourceIdentifier),
    Many(Vec<ResourceIdentifier>),
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Paging {
    pub total: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RelationshipMeta {
    pub paging: Option<Paging>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Relationship {
    pub data: Option<RelationshipData>,

    #[serde(default)]
    pub meta: Option<RelationshipMeta>,
}

impl Relationship {
    /// Identifiers of the related resources.
    ///
    /// Empty if the relationship wasn't included in the response.
    pub fn ids(&self) -> Vec<&str> {
        match &self.data {
            Some(RelationshipData::One(r)) => vec![r.id.as_str()],
            Some(RelationshipData::Many(rs)) => rs.iter().map(|r| r.id.as_str()).collect(),
            None => vec![],
        }
    }

    /// Whether the response only carries a page of the related resources.
    ///
    /// Without paging metadata, a page filled up to `limit` is assumed to be
    /// partial.
    pub fn is_partial(&self, limit: usize) -> bool {
        let count = self.ids().len();

        match self
            .meta
            .as_ref()
            .and_then(|m| m.paging.as_ref())
            .and_then(|p| p.total)
        {
            Some(total) => total > count,
            None => count >= limit,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationships {
    pub bundle_id: Option<Relationship>,
    pub certificates: Option<Relationship>,
    pub devices: Option<Relationship>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateAttributes {
    pub certificate_content: Option<String>,
    pub display_name: Option<String>,
    pub name: String,
    pub certificate_type: String,
    pub serial_number: Option<String>,
    pub expiration_date: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAttributes {
    pub device_class: String,
    pub name: String,
    pub platform: Option<String>,
    pub status: String,
    pub udid: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleIdAttributes {
    pub identifier: String,
    pub name: String,
    pub platform: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityOption {
    pub key: String,

    #[serde(default)]
    pub enabled: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySetting {
    pub key: String,

    #[serde(default)]
    pub options: Vec<CapabilityOption>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleIdCapabilityAttributes {
    pub capability_type: String,

    #[serde(default)]
    pub settings: Vec<CapabilitySetting>,
}

impl BundleIdCapabilityAttributes {
    /// Key of the first enabled option of any setting.
    pub fn enabled_option(&self) -> Option<&str> {
        self.settings
            .iter()
            .flat_map(|s| s.options.iter())
            .find(|o| o.enabled)
            .map(|o| o.key.as_str())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileAttributes {
    pub name: String,
    pub profile_content: Option<String>,
    pub uuid: String,
    pub profile_state: Option<String>,
    pub profile_type: String,
    pub expiration_date: String,
    pub platform: Option<String>,
}

/// Body of a resource creation request.
#[derive(Clone, Debug, Serialize)]
pub struct CreateRequest<A, R> {
    pub data: CreateRequestData<A, R>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CreateRequestData<A, R> {
    pub r#type: &'static str,
    pub attributes: A,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationships: Option<R>,
}

impl<A: Serialize, R: Serialize> CreateRequest<A, R> {
    pub fn new(r#type: &'static str, attributes: A, relationships: Option<R>) -> Self {
        Self {
            data: CreateRequestData {
                r#type,
                attributes,
                relationships,
            },
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ToOne {
    pub data: ResourceIdentifier,
}

#[derive(Clone, Debug, Serialize)]
pub struct ToMany {
    pub data: Vec<ResourceIdentifier>,
}

/// Relationships without content.
#[derive(Clone, Debug, Serialize)]
pub struct NoRelationships {}

#[derive(Clone, Debug, Serialize)]
pub struct DeviceCreateAttributes<'a> {
    pub name: &'a str,
    pub udid: &'a str,
    pub platform: &'static str,
}

#[derive(Clone, Debug, Serialize)]
pub struct BundleIdCreateAttributes<'a> {
    pub identifier: &'a str,
    pub name: &'a str,
    pub platform: &'static str,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileCreateAttributes<'a> {
    pub name: &'a str,
    pub profile_type: &'static str,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileCreateRelationships {
    pub bundle_id: ToOne,
    pub certificates: ToMany,
    pub devices: ToMany,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleIdCapabilityCreateRelationships {
    pub bundle_id: ToOne,
}

/// An error reported by the API.
#[derive(Clone, Debug, Deserialize)]
pub struct ApiError {
    pub status: Option<String>,
    pub code: Option<String>,
    pub title: Option<String>,
    pub detail: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ErrorDocument {
    pub errors: Vec<ApiError>,
}

/// Convert an error response into a [PortalError].
///
/// Error details become the preferred messages when the body is an error document.
pub fn portal_error(status: u16, body: &[u8]) -> PortalError {
    let raw = format!("HTTP {}: {}", status, String::from_utf8_lossy(body));

    let preferred = serde_json::from_slice::<ErrorDocument>(body)
        .map(|doc| {
            doc.errors
                .into_iter()
                .filter_map(|e| e.detail.or(e.title))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    PortalError {
        status: Some(status),
        ..PortalError::with_preferred(raw, preferred)
    }
}

/// Parse a date as formatted by the API, like `2023-04-01T12:00:00.000+0000`.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
