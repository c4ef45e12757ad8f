//! Credential records and secret material generation.
//!
//! Secret values live in the vault; relation data only ever carries the
//! label of a vault entry plus a generation counter, so rotation is visible
//! to peers without the value itself crossing a relation databag.

use std::fmt;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Vault label for the cluster keyfile shared by the config-server.
pub const KEYFILE_SECRET_LABEL: &str = "keyfile";
/// Vault label for the router's internal auth password.
pub const ROUTER_PASSWORD_SECRET_LABEL: &str = "router-password";
/// Vault labels for this unit's TLS material.
pub const TLS_KEY_SECRET_LABEL: &str = "tls-key";
pub const TLS_CERT_SECRET_LABEL: &str = "tls-cert";
pub const TLS_CA_SECRET_LABEL: &str = "tls-ca";

/// Every label the operator may have created, fetched in one go when a
/// snapshot is assembled.
pub const ALL_SECRET_LABELS: &[&str] = &[
    KEYFILE_SECRET_LABEL,
    ROUTER_PASSWORD_SECRET_LABEL,
    TLS_KEY_SECRET_LABEL,
    TLS_CERT_SECRET_LABEL,
    TLS_CA_SECRET_LABEL,
];

/// Length of generated passwords.
const PASSWORD_LENGTH: usize = 32;
/// Raw byte length of a generated keyfile before base64 encoding. The
/// workload accepts between 6 and 1024 base64 characters.
const KEYFILE_RAW_BYTES: usize = 768;

/// Secret material that must never end up in log output. Serializes to the
/// wrapped value so hashing and rendering see the real bytes; Debug does not.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sensitive(pub String);

impl fmt::Debug for Sensitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl From<String> for Sensitive {
    fn from(value: String) -> Self {
        Sensitive(value)
    }
}

impl From<&str> for Sensitive {
    fn from(value: &str) -> Self {
        Sensitive(value.to_string())
    }
}

/// A credential published to the peer group: which vault entry holds the
/// value and how many times it has been (re)minted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub generation: u64,
    pub secret_label: String,
}

impl Credential {
    pub fn initial(secret_label: impl Into<String>) -> Self {
        Self {
            generation: 1,
            secret_label: secret_label.into(),
        }
    }

    pub fn rotated(&self) -> Self {
        Self {
            generation: self.generation + 1,
            secret_label: self.secret_label.clone(),
        }
    }
}

/// Generate a password suitable for the router's internal auth user.
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

/// Generate keyfile contents in the form the workload expects.
pub fn generate_keyfile() -> String {
    use base64::Engine;
    let mut raw = vec![0u8; KEYFILE_RAW_BYTES];
    rand::thread_rng().fill(raw.as_mut_slice());
    base64::engine::general_purpose::STANDARD.encode(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_bumps_generation() {
        let cred = Credential::initial(ROUTER_PASSWORD_SECRET_LABEL);
        assert_eq!(cred.generation, 1);
        let rotated = cred.rotated();
        assert_eq!(rotated.generation, 2);
        assert_eq!(rotated.secret_label, cred.secret_label);
    }

    #[test]
    fn test_generated_password_shape() {
        let password = generate_password();
        assert_eq!(password.len(), 32);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generated_keyfile_is_valid_base64() {
        use base64::Engine;
        let keyfile = generate_keyfile();
        assert!(keyfile.len() <= 1024);
        assert!(base64::engine::general_purpose::STANDARD
            .decode(keyfile.as_bytes())
            .is_ok());
    }

    #[test]
    fn test_generated_values_differ() {
        assert_ne!(generate_password(), generate_password());
        assert_ne!(generate_keyfile(), generate_keyfile());
    }

    #[test]
    fn test_sensitive_debug_is_redacted() {
        let secret = Sensitive("hunter2".to_string());
        assert_eq!(format!("{:?}", secret), "<redacted>");
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"hunter2\"");
    }
}
