// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signing certificates and their reconciliation with the Developer Portal.

use {
    crate::{
        distribution::{CertificateKind, DistributionType},
        portal::{DeveloperPortal, RemoteCertificate},
        AutoProvisionError,
    },
    bcder::Oid,
    chrono::{DateTime, Utc},
    log::{info, warn},
    std::collections::HashMap,
    x509_certificate::{asn1time::Time, rfc4519, rfc5280, X509Certificate},
};

/// Normalize a hex serial number for comparison.
///
/// Case and leading zeros are insignificant.
pub fn normalize_serial(serial: &str) -> String {
    let s = serial
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect::<String>()
        .to_uppercase();
    let s = s.trim_start_matches('0');

    if s.is_empty() {
        "0".to_string()
    } else {
        s.to_string()
    }
}

fn subject_attribute(cert: &X509Certificate, oid: &'static bcder::ConstOid) -> Option<String> {
    cert.subject_name()
        .find_first_attribute_string(Oid(oid.as_ref().into()))
        .ok()
        .flatten()
}

/// Identity attributes of an X.509 signing certificate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertificateInfo {
    pub common_name: String,

    /// Apple team id. Stored in the subject's Organizational Unit.
    pub team_id: String,

    /// Serial number as normalized hex.
    pub serial: String,

    pub not_after: DateTime<Utc>,

    /// DER encoded certificate.
    pub der: Vec<u8>,
}

impl CertificateInfo {
    /// Construct an instance from DER encoded certificate data.
    pub fn from_der(der: impl AsRef<[u8]>) -> Result<Self, AutoProvisionError> {
        let cert = X509Certificate::from_der(der.as_ref())?;

        Self::from_x509(&cert, der.as_ref().to_vec())
    }

    fn from_x509(cert: &X509Certificate, der: Vec<u8>) -> Result<Self, AutoProvisionError> {
        let common_name = subject_attribute(cert, &rfc4519::OID_COMMON_NAME)
            .ok_or(AutoProvisionError::CertificateMissingAttribute("Common Name"))?;
        let team_id = subject_attribute(cert, &rfc4519::OID_ORGANIZATIONAL_UNIT_NAME).ok_or(
            AutoProvisionError::CertificateMissingAttribute("Organizational Unit"),
        )?;

        let serial: &[u8] = cert.serial_number_asn1().as_ref();
        let serial = normalize_serial(&hex::encode(serial));

        let tbs: &rfc5280::Certificate = cert.as_ref();
        let not_after = match &tbs.tbs_certificate.validity.not_after {
            Time::UtcTime(t) => **t,
            Time::GeneralTime(t) => DateTime::<Utc>::from(t.clone()),
        };

        Ok(Self {
            common_name,
            team_id,
            serial,
            not_after,
            der,
        })
    }

    /// The kind of signing this certificate is for, derived from its common name.
    pub fn kind(&self) -> CertificateKind {
        if self.common_name.starts_with("iPhone Distribution")
            || self.common_name.starts_with("Apple Distribution")
        {
            CertificateKind::Production
        } else {
            CertificateKind::Development
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.not_after <= now
    }
}

fn bmp_string(s: &str) -> Vec<u8> {
    let utf16: Vec<u16> = s.encode_utf16().collect();

    let mut bytes = Vec::with_capacity(utf16.len() * 2 + 2);
    for c in utf16 {
        bytes.push((c / 256) as u8);
        bytes.push((c % 256) as u8);
    }
    bytes.push(0x00);
    bytes.push(0x00);

    bytes
}

/// Extract all X.509 certificates from PFX data.
fn pfx_certificates(
    data: &[u8],
    password: &str,
) -> Result<Vec<X509Certificate>, AutoProvisionError> {
    let pfx = p12::PFX::parse(data).map_err(|e| {
        AutoProvisionError::PfxParseError(format!("data does not appear to be PFX: {:?}", e))
    })?;

    if !pfx.verify_mac(password) {
        return Err(AutoProvisionError::PfxBadPassword);
    }

    let data = match pfx.auth_safe {
        p12::ContentInfo::Data(data) => data,
        _ => {
            return Err(AutoProvisionError::PfxParseError(
                "unexpected PFX content info".to_string(),
            ));
        }
    };

    let content_infos = yasna::parse_der(&data, |reader| {
        reader.collect_sequence_of(p12::ContentInfo::parse)
    })
    .map_err(|e| {
        AutoProvisionError::PfxParseError(format!("failed parsing inner ContentInfo: {:?}", e))
    })?;

    let bmp_password = bmp_string(password);
    let mut certificates = vec![];

    for content in content_infos {
        let bags_data = match content {
            p12::ContentInfo::Data(inner) => inner,
            p12::ContentInfo::EncryptedData(encrypted) => {
                encrypted.data(&bmp_password).ok_or_else(|| {
                    AutoProvisionError::PfxParseError(
                        "failed decrypting inner EncryptedData".to_string(),
                    )
                })?
            }
            p12::ContentInfo::OtherContext(_) => {
                return Err(AutoProvisionError::PfxParseError(
                    "unexpected OtherContent content in inner PFX data".to_string(),
                ));
            }
        };

        let bags = yasna::parse_ber(&bags_data, |reader| {
            reader.collect_sequence_of(p12::SafeBag::parse)
        })
        .map_err(|e| {
            AutoProvisionError::PfxParseError(format!(
                "failed parsing SafeBag within inner Data: {:?}",
                e
            ))
        })?;

        for bag in bags {
            // Only certificates are of interest. The key is imported into the
            // keychain as part of the original PFX data.
            if let p12::SafeBagKind::CertBag(p12::CertBag::X509(cert_data)) = bag.bag {
                certificates.push(X509Certificate::from_der(cert_data)?);
            }
        }
    }

    Ok(certificates)
}

/// A signing certificate held locally, with the PKCS#12 data it came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalCertificate {
    pub info: CertificateInfo,

    /// The PKCS#12 data holding certificate and private key.
    pub pkcs12: Vec<u8>,

    pub passphrase: String,
}

impl LocalCertificate {
    /// Construct an instance from PKCS#12 data.
    ///
    /// The data may hold CA certificates in addition to the signing certificate.
    /// The signing certificate is the one not acting as a certificate authority.
    pub fn from_pkcs12(data: Vec<u8>, passphrase: &str) -> Result<Self, AutoProvisionError> {
        let certificates = pfx_certificates(&data, passphrase)?;

        let leaf = certificates
            .iter()
            .filter(|cert| !cert.subject_is_issuer())
            .find(|cert| {
                subject_attribute(*cert, &rfc4519::OID_COMMON_NAME)
                    .map(|cn| !cn.contains("Certification Authority"))
                    .unwrap_or(false)
            })
            .ok_or(AutoProvisionError::PfxNoLeafCertificate)?;

        let info = CertificateInfo::from_x509(leaf, leaf.encode_der()?)?;

        Ok(Self {
            info,
            pkcs12: data,
            passphrase: passphrase.to_string(),
        })
    }
}

/// Outcome of comparing a local certificate against a remote one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CertificateMatch {
    /// Same serial number.
    Same,

    /// Same common name but the remote certificate is newer.
    StaleLocal,

    Different,
}

pub fn compare_certificates(local: &CertificateInfo, remote: &CertificateInfo) -> CertificateMatch {
    if local.serial == remote.serial {
        CertificateMatch::Same
    } else if local.common_name == remote.common_name && local.not_after < remote.not_after {
        CertificateMatch::StaleLocal
    } else {
        CertificateMatch::Different
    }
}

/// Whether a local certificate is the same as a remote one.
///
/// Emits a warning when the portal holds a newer certificate with the same name.
pub fn certificate_matches(local: &CertificateInfo, remote: &CertificateInfo) -> bool {
    match compare_certificates(local, remote) {
        CertificateMatch::Same => true,
        CertificateMatch::StaleLocal => {
            warn!(
                "provided an older version of {} which expires at {}; a newer version (serial {}) expiring at {} is available on the Developer Portal; consider uploading the newer certificate",
                local.common_name, local.not_after, remote.serial, remote.not_after
            );
            false
        }
        CertificateMatch::Different => false,
    }
}

/// Append a certificate unless a newer one with the same common name is present.
///
/// When a certificate with the same common name exists, the one with the later
/// expiration wins.
pub fn append_if_latest(new: LocalCertificate, certificates: &mut Vec<LocalCertificate>) {
    if let Some(existing) = certificates
        .iter_mut()
        .find(|c| c.info.common_name == new.info.common_name)
    {
        warn!(
            "multiple certificates provided with the name {}; only one of them is used",
            new.info.common_name
        );

        if new.info.not_after > existing.info.not_after {
            warn!(
                "using certificate with serial {} expiring at {}",
                new.info.serial, new.info.not_after
            );
            *existing = new;
        } else {
            warn!(
                "using certificate with serial {} expiring at {}",
                existing.info.serial, existing.info.not_after
            );
        }
    } else {
        certificates.push(new);
    }
}

/// Matches local certificates against certificates registered on the portal.
///
/// Downloads of portal certificates are memoized.
pub struct CertificateMatcher<'a> {
    portal: &'a dyn DeveloperPortal,
    downloads: HashMap<String, CertificateInfo>,
}

impl<'a> CertificateMatcher<'a> {
    pub fn new(portal: &'a dyn DeveloperPortal) -> Self {
        Self {
            portal,
            downloads: HashMap::new(),
        }
    }

    /// Obtain the certificate behind a portal certificate record.
    pub fn download(
        &mut self,
        remote: &RemoteCertificate,
    ) -> Result<CertificateInfo, AutoProvisionError> {
        if let Some(info) = self.downloads.get(&remote.id) {
            return Ok(info.clone());
        }

        let info = CertificateInfo::from_der(self.portal.download_certificate(remote)?)?;
        self.downloads.insert(remote.id.clone(), info.clone());

        Ok(info)
    }

    /// Find the portal certificate equivalent to a local one.
    pub fn find_remote(
        &mut self,
        local: &CertificateInfo,
    ) -> Result<Option<RemoteCertificate>, AutoProvisionError> {
        let remotes = self.portal.list_certificates(local.kind())?;

        for remote in remotes.into_iter().filter(|c| c.downloadable) {
            let info = self.download(&remote)?;

            if certificate_matches(local, &info) {
                return Ok(Some(remote));
            }
        }

        Ok(None)
    }
}

/// A local certificate paired with its portal registration.
#[derive(Clone, Debug)]
pub struct SigningIdentity {
    pub local: LocalCertificate,
    pub remote: RemoteCertificate,
}

impl SigningIdentity {
    pub fn name(&self) -> &str {
        &self.local.info.common_name
    }

    pub fn team_id(&self) -> &str {
        &self.local.info.team_id
    }
}

/// The signing identities available for a provisioning run.
#[derive(Clone, Debug, Default)]
pub struct SigningIdentities {
    pub development: Option<SigningIdentity>,
    pub production: Option<SigningIdentity>,
}

impl SigningIdentities {
    /// Select signing identities from local certificates.
    ///
    /// Expired certificates and certificates of other teams are ignored. Of
    /// certificates sharing a common name, the newest is used. At most one
    /// identity per certificate kind is allowed, and each must be registered
    /// on the portal.
    pub fn select(
        certificates: Vec<LocalCertificate>,
        team_id: Option<&str>,
        now: DateTime<Utc>,
        matcher: &mut CertificateMatcher,
    ) -> Result<Self, AutoProvisionError> {
        let mut latest = vec![];

        for cert in certificates {
            if cert.info.is_expired(now) {
                warn!(
                    "ignoring expired certificate {} (serial {}, expired {})",
                    cert.info.common_name, cert.info.serial, cert.info.not_after
                );
                continue;
            }

            if let Some(team_id) = team_id {
                if cert.info.team_id != team_id {
                    warn!(
                        "ignoring certificate {} of team {}; project uses team {}",
                        cert.info.common_name, cert.info.team_id, team_id
                    );
                    continue;
                }
            }

            append_if_latest(cert, &mut latest);
        }

        let mut identities = Self::default();

        for kind in [CertificateKind::Development, CertificateKind::Production] {
            let of_kind = latest
                .iter()
                .filter(|c| c.info.kind() == kind)
                .collect::<Vec<_>>();

            let local = match of_kind.as_slice() {
                [] => continue,
                [local] => (*local).clone(),
                _ => {
                    return Err(AutoProvisionError::CertificateAmbiguous(
                        kind.as_str(),
                        of_kind
                            .iter()
                            .map(|c| c.info.common_name.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                    ))
                }
            };

            let remote = matcher.find_remote(&local.info)?.ok_or_else(|| {
                AutoProvisionError::CertificateNotRegistered(format!(
                    "{} (serial {})",
                    local.info.common_name, local.info.serial
                ))
            })?;

            info!(
                "using {} certificate {} (portal id {})",
                kind.as_str(),
                local.info.common_name,
                remote.id
            );

            let identity = SigningIdentity { local, remote };

            match kind {
                CertificateKind::Development => identities.development = Some(identity),
                CertificateKind::Production => identities.production = Some(identity),
            }
        }

        Ok(identities)
    }

    pub fn for_kind(&self, kind: CertificateKind) -> Option<&SigningIdentity> {
        match kind {
            CertificateKind::Development => self.development.as_ref(),
            CertificateKind::Production => self.production.as_ref(),
        }
    }

    /// The identity signing for a distribution type.
    pub fn require(
        &self,
        distribution: DistributionType,
    ) -> Result<&SigningIdentity, AutoProvisionError> {
        let kind = distribution.certificate_kind();

        self.for_kind(kind)
            .ok_or(AutoProvisionError::CertificateMissing(kind.as_str(), distribution))
    }

    /// Distribution types to provision for.
    ///
    /// Development is always provisioned alongside the requested type when a
    /// development identity is available.
    pub fn distribution_types(&self, requested: DistributionType) -> Vec<DistributionType> {
        let mut types = vec![];

        if requested != DistributionType::Development && self.development.is_some() {
            types.push(DistributionType::Development);
        }
        types.push(requested);

        types
    }
}
