// Bearer credential and its on-air byte encoding
//
// The characteristic carries the raw UTF-8 bytes of the credential string,
// with no additional framing.

use crate::{ProximityError, Result};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Opaque bearer credential proving a pending transfer request
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(ProximityError::InvalidCredential(
                "credential must not be empty".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential(<{} bytes redacted>)", self.0.len())
    }
}

/// Encode a credential into the bytes placed on the characteristic
pub fn encode_credential(credential: &Credential) -> Vec<u8> {
    credential.as_str().as_bytes().to_vec()
}

/// Decode characteristic bytes back into a credential
///
/// Empty or non-UTF-8 payloads are read errors, never an empty success.
pub fn decode_credential(bytes: &[u8]) -> Result<Credential> {
    if bytes.is_empty() {
        return Err(ProximityError::ReadError(
            "characteristic value is empty".to_string(),
        ));
    }

    let value = std::str::from_utf8(bytes).map_err(|e| {
        ProximityError::ReadError(format!("characteristic value is not valid UTF-8: {}", e))
    })?;

    Credential::new(value)
}
