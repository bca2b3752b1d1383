// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! App Store Connect API tokens.

use {
    crate::AutoProvisionError,
    jsonwebtoken::{Algorithm, EncodingKey, Header},
    log::debug,
    serde::{Deserialize, Serialize},
    std::{path::Path, time::SystemTime},
};

/// How long minted tokens are valid for, in seconds.
///
/// Apple rejects tokens valid for longer than 20 minutes.
pub const TOKEN_LIFETIME: u64 = 20 * 60;

/// Tokens expiring within this many seconds are replaced.
pub const TOKEN_RENEWAL_MARGIN: u64 = 5 * 60;

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ConnectTokenRequest {
    iss: String,
    iat: u64,
    exp: u64,
    aud: String,
}

/// A JWT for use with App Store Connect API, with its expiry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AppStoreConnectToken {
    pub token: String,

    /// UNIX time the token expires at.
    pub expires_at: u64,
}

impl AppStoreConnectToken {
    /// Whether the token can still be used at a UNIX time.
    pub fn is_usable_at(&self, now: u64) -> bool {
        self.expires_at > now + TOKEN_RENEWAL_MARGIN
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("calculating UNIX time should never fail")
        .as_secs()
}

/// Issues JWTs for App Store Connect from an API key.
///
/// API keys consist of a key identifier (like `DEADBEEF42`), an issuer id
/// (likely a UUID) and an ECDSA private key. Keys are managed at
/// https://appstoreconnect.apple.com/access/api.
#[derive(Clone)]
pub struct ConnectTokenEncoder {
    key_id: String,
    issuer_id: String,
    encoding_key: EncodingKey,
}

impl ConnectTokenEncoder {
    pub fn from_jwt_encoding_key(
        key_id: String,
        issuer_id: String,
        encoding_key: EncodingKey,
    ) -> Self {
        Self {
            key_id,
            issuer_id,
            encoding_key,
        }
    }

    /// Construct an instance from a DER encoded ECDSA private key.
    pub fn from_ecdsa_der(key_id: String, issuer_id: String, der_data: &[u8]) -> Self {
        Self::from_jwt_encoding_key(key_id, issuer_id, EncodingKey::from_ec_der(der_data))
    }

    /// Construct an instance from a PEM encoded ECDSA private key.
    pub fn from_ecdsa_pem(
        key_id: String,
        issuer_id: String,
        pem_data: &[u8],
    ) -> Result<Self, AutoProvisionError> {
        let encoding_key = EncodingKey::from_ec_pem(pem_data)?;

        Ok(Self::from_jwt_encoding_key(key_id, issuer_id, encoding_key))
    }

    pub fn from_ecdsa_pem_path(
        key_id: String,
        issuer_id: String,
        path: impl AsRef<Path>,
    ) -> Result<Self, AutoProvisionError> {
        let data = std::fs::read(path.as_ref())?;

        Self::from_ecdsa_pem(key_id, issuer_id, &data)
    }

    /// Construct an instance from an API key id.
    ///
    /// Looks for an `AuthKey_<id>.p8` file in `private_keys` directories of the
    /// current directory and the home directory, and in
    /// `~/.appstoreconnect/private_keys`.
    pub fn from_api_key_id(key_id: String, issuer_id: String) -> Result<Self, AutoProvisionError> {
        let mut search_paths = vec![std::env::current_dir()?.join("private_keys")];

        if let Some(home) = dirs::home_dir() {
            search_paths.extend([
                home.join("private_keys"),
                home.join(".private_keys"),
                home.join(".appstoreconnect").join("private_keys"),
            ]);
        }

        let filename = format!("AuthKey_{}.p8", key_id);

        for path in search_paths {
            let candidate = path.join(&filename);

            if candidate.exists() {
                return Self::from_ecdsa_pem_path(key_id, issuer_id, candidate);
            }
        }

        Err(AutoProvisionError::AppStoreConnectApiKeyNotFound)
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Mint a token valid for `duration` seconds from `now`.
    pub fn new_token_at(
        &self,
        now: u64,
        duration: u64,
    ) -> Result<AppStoreConnectToken, AutoProvisionError> {
        let header = Header {
            kid: Some(self.key_id.clone()),
            alg: Algorithm::ES256,
            ..Default::default()
        };

        let claims = ConnectTokenRequest {
            iss: self.issuer_id.clone(),
            iat: now,
            exp: now + duration,
            aud: "appstoreconnect-v1".to_string(),
        };

        debug!("minting App Store Connect token for key {}", self.key_id);

        Ok(AppStoreConnectToken {
            token: jsonwebtoken::encode(&header, &claims, &self.encoding_key)?,
            expires_at: claims.exp,
        })
    }

    /// Mint a token valid for the maximum lifetime.
    pub fn new_token(&self) -> Result<AppStoreConnectToken, AutoProvisionError> {
        self.new_token_at(unix_now(), TOKEN_LIFETIME)
    }
}
