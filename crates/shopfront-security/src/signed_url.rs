//! Time-boxed signed download URLs.
//!
//! The signature is `hex(HMAC-SHA256(secret, "{path}:{expires}"))`. The path,
//! expiry and signature in the URL are the whole authorization; no session
//! is consulted.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::SecurityConfig;
use crate::error::{SecurityError, SecurityResult};

type HmacSha256 = Hmac<Sha256>;

/// Maximum lifetime of a signed URL (7 days).
pub const MAX_TTL_SECS: u64 = 604_800;

/// Hex length of an HMAC-SHA256 tag.
const SIGNATURE_HEX_LEN: usize = 64;

/// An issued URL together with its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    pub url: String,
    pub signature: String,
    /// Epoch seconds after which the URL is rejected.
    pub expires_at: i64,
}

pub struct UrlSigner {
    secret: Vec<u8>,
    base: String,
}

impl fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlSigner")
            .field("secret", &"<redacted>")
            .field("base", &self.base)
            .finish()
    }
}

impl UrlSigner {
    pub fn new(secret: impl AsRef<[u8]>, base: impl Into<String>) -> SecurityResult<Self> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(SecurityError::config("URL signing secret must not be empty"));
        }

        Ok(Self {
            secret: secret.to_vec(),
            base: base.into(),
        })
    }

    pub fn from_config(config: &SecurityConfig) -> SecurityResult<Self> {
        let secret = config
            .url_signing_secret
            .as_deref()
            .ok_or_else(|| SecurityError::config("URL_SIGNING_SECRET must be set to sign URLs"))?;
        Self::new(secret, config.secure_url_base.clone())
    }

    fn mac(&self, path: &str, expires: i64) -> SecurityResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| SecurityError::config(format!("Invalid HMAC key: {}", e)))?;
        mac.update(format!("{}:{}", path, expires).as_bytes());
        Ok(mac)
    }

    /// Hex signature for `path` valid until `expires` (epoch seconds).
    pub fn signature(&self, path: &str, expires: i64) -> SecurityResult<String> {
        Ok(hex::encode(self.mac(path, expires)?.finalize().into_bytes()))
    }

    /// Sign `path` for `ttl` from now. The lifetime is capped at [`MAX_TTL_SECS`].
    pub fn sign(&self, path: &str, ttl: Duration) -> SecurityResult<SignedUrl> {
        let ttl = ttl.as_secs().min(MAX_TTL_SECS) as i64;
        self.sign_with_expiry(path, Utc::now().timestamp() + ttl)
    }

    pub fn sign_with_expiry(&self, path: &str, expires: i64) -> SecurityResult<SignedUrl> {
        let signature = self.signature(path, expires)?;
        let separator = if self.base.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}{}path={}&expires={}&sig={}",
            self.base,
            separator,
            urlencoding::encode(path),
            expires,
            signature
        );

        Ok(SignedUrl {
            url,
            signature,
            expires_at: expires,
        })
    }

    /// Check a signature against the current time.
    pub fn verify(&self, path: &str, expires: i64, signature: &str) -> bool {
        self.verify_at(path, expires, signature, Utc::now().timestamp())
    }

    /// Check a signature as of `now`.
    ///
    /// Expiry is checked first and on its own. The signature comparison is
    /// constant-time.
    pub fn verify_at(&self, path: &str, expires: i64, signature: &str, now: i64) -> bool {
        if now >= expires {
            return false;
        }

        // Only the canonical lowercase form is accepted.
        if signature.len() != SIGNATURE_HEX_LEN
            || !signature.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return false;
        }

        let Ok(provided) = hex::decode(signature) else {
            return false;
        };

        match self.mac(path, expires) {
            Ok(mac) => mac.verify_slice(&provided).is_ok(),
            Err(_) => false,
        }
    }
}
