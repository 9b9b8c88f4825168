//! Time-limited read URLs.

use super::error::BlobError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A signed read URL and the moment it stops working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedUrl {
    /// The full URL.
    pub url: String,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies read URLs for one public endpoint.
#[derive(Clone)]
pub struct UrlSigner {
    public_url: String,
    secret: String,
}

impl UrlSigner {
    /// Creates a signer.
    #[must_use]
    pub fn new(public_url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            public_url: public_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
        }
    }

    fn signature(&self, bucket: &str, key: &str, expires: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        let expires = expires.to_string();
        for part in [bucket, key, expires.as_str()] {
            hasher.update(b"\n");
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Signs a URL for `key` valid for `ttl` from `now`.
    ///
    /// An expiry past the representable range is rejected.
    pub fn presign(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<PresignedUrl, BlobError> {
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| BlobError::InvalidSignature("expiry out of range".to_string()))?;
        let expires = expires_at.timestamp();
        let signature = self.signature(bucket, key, expires);
        Ok(PresignedUrl {
            url: format!(
                "{}/{bucket}/{key}?expires={expires}&signature={signature}",
                self.public_url
            ),
            expires_at,
        })
    }

    /// Verifies a signature produced by [`presign`](Self::presign).
    pub fn verify(
        &self,
        bucket: &str,
        key: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<(), BlobError> {
        let expected = self.signature(bucket, key, expires);
        if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            return Err(BlobError::InvalidSignature("signature mismatch".into()));
        }
        if now.timestamp() > expires {
            return Err(BlobError::InvalidSignature("url expired".into()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("public_url", &self.public_url)
            .finish_non_exhaustive()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0_u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
