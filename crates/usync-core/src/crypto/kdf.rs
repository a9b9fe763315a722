//! Password key derivation: PBKDF2-HMAC-SHA256 and scrypt.
//!
//! The chosen parameters travel inside the index envelope so a recipient can
//! re-derive the key from the password alone.

use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::CoreError;

use super::aead::KEY_SIZE;

/// KDF algorithm and parameters recorded in the index envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "alg", rename_all = "lowercase")]
pub enum KdfParams {
    Pbkdf2 { iterations: u32 },
    Scrypt { log_n: u8, r: u32, p: u32 },
}

impl Default for KdfParams {
    fn default() -> Self {
        KdfParams::Pbkdf2 {
            iterations: 100_000,
        }
    }
}

impl KdfParams {
    /// Default scrypt parameters (N=2^14, r=8, p=1).
    pub fn scrypt_default() -> Self {
        KdfParams::Scrypt {
            log_n: 14,
            r: 8,
            p: 1,
        }
    }
}

/// Derive a 32-byte key from a password and salt.
pub fn derive_key(
    password: &str,
    salt: &[u8],
    params: &KdfParams,
) -> Result<[u8; KEY_SIZE], CoreError> {
    let mut out = [0u8; KEY_SIZE];
    match params {
        KdfParams::Pbkdf2 { iterations } => {
            if *iterations == 0 {
                return Err(CoreError::InvalidFormat("pbkdf2 iterations = 0".into()));
            }
            pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, *iterations, &mut out);
        }
        KdfParams::Scrypt { log_n, r, p } => {
            let params = scrypt::Params::new(*log_n, *r, *p, KEY_SIZE)
                .map_err(|e| CoreError::InvalidFormat(format!("bad scrypt params: {e}")))?;
            scrypt::scrypt(password.as_bytes(), salt, &params, &mut out)
                .map_err(|e| CoreError::InvalidFormat(format!("scrypt failed: {e}")))?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pbkdf2_is_deterministic() {
        let salt = [7u8; 32];
        // Keep iterations small in tests; production default is 100k.
        let params = KdfParams::Pbkdf2 { iterations: 1000 };
        let a = derive_key("p@ss", &salt, &params).unwrap();
        let b = derive_key("p@ss", &salt, &params).unwrap();
        assert_eq!(a, b);
        let c = derive_key("other", &salt, &params).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn scrypt_salt_changes_key() {
        let params = KdfParams::Scrypt {
            log_n: 8,
            r: 8,
            p: 1,
        };
        let a = derive_key("p@ss", &[1u8; 32], &params).unwrap();
        let b = derive_key("p@ss", &[2u8; 32], &params).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn params_serde_roundtrip() {
        let p = KdfParams::scrypt_default();
        let json = serde_json::to_string(&p).unwrap();
        let back: KdfParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
        assert!(json.contains("scrypt"));
    }

    #[test]
    fn zero_iterations_rejected() {
        let params = KdfParams::Pbkdf2 { iterations: 0 };
        assert!(derive_key("x", &[0u8; 32], &params).is_err());
    }
}
