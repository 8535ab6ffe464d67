//! Job signing and verification
//!
//! A job's signature is HMAC-SHA256 over the canonical serialization of every
//! field except `signature`, rendered as lowercase hex. The canonical form is
//! compact JSON with object keys in lexicographic order, so the same logical
//! job always produces the same bytes no matter how it was built.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::errors::CodecError;
use crate::models::job::Job;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies jobs with the secret shared by panel and agent
#[derive(Debug)]
pub struct JobSigner {
    secret: SecretString,
}

impl JobSigner {
    /// Create a signer from the shared secret
    pub fn new(secret: SecretString) -> Result<Self, CodecError> {
        if secret.expose_secret().is_empty() {
            return Err(CodecError::InvalidKey("secret must not be empty".to_string()));
        }
        Ok(Self { secret })
    }

    /// Compute the signature for `job`, ignoring its current `signature`
    pub fn sign(&self, job: &Job) -> Result<String, CodecError> {
        let mut mac = self.mac()?;
        mac.update(&canonical_bytes(job)?);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Return `job` with its signature set
    pub fn seal(&self, mut job: Job) -> Result<Job, CodecError> {
        job.signature = self.sign(&job)?;
        Ok(job)
    }

    /// Check the job's signature against its content in constant time
    pub fn verify(&self, job: &Job) -> bool {
        let Ok(provided) = hex::decode(&job.signature) else {
            return false;
        };
        let Ok(payload) = canonical_bytes(job) else {
            return false;
        };
        let Ok(mut mac) = self.mac() else {
            return false;
        };
        mac.update(&payload);
        mac.verify_slice(&provided).is_ok()
    }

    fn mac(&self) -> Result<HmacSha256, CodecError> {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|e| CodecError::InvalidKey(e.to_string()))
    }
}

/// Canonical bytes of every job field except `signature`
pub fn canonical_bytes(job: &Job) -> Result<Vec<u8>, CodecError> {
    let mut value = serde_json::to_value(job)?;
    if let serde_json::Value::Object(ref mut fields) = value {
        fields.remove("signature");
    }
    // serde_json::Map is ordered by key, so this is the sorted-key form
    Ok(serde_json::to_vec(&value)?)
}
