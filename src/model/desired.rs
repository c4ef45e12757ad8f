//! The computed target state for the managed router process.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::model::credential::Sensitive;
use crate::model::endpoints::ReplicaSetUri;

/// How the router authenticates to the rest of the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    None,
    Keyfile,
    X509,
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuthMode::None => "none",
            AuthMode::Keyfile => "keyfile",
            AuthMode::X509 => "x509",
        };
        f.write_str(s)
    }
}

/// Certificate material the process should serve. The private key is
/// redacted from Debug output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsMaterial {
    pub cert_pem: String,
    pub key_pem: Sensitive,
    pub ca_pem: String,
}

/// Listen parameters. When no client has asked for external connectivity
/// the router serves local traffic only, over a unix socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindConfig {
    pub external: bool,
    pub port: u16,
}

/// Everything the process controller needs to render config and run the
/// router. Recomputed from scratch on every event; two identical snapshots
/// always produce an identical DesiredConfig, and therefore an identical
/// content hash, which is what makes re-applies free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredConfig {
    pub config_server: ReplicaSetUri,
    pub auth_mode: AuthMode,
    pub keyfile: Option<Sensitive>,
    pub tls: Option<TlsMaterial>,
    pub bind: BindConfig,
}

impl DesiredConfig {
    /// Stable content hash used to detect that an apply would be a no-op
    /// and to publish the negotiated config to peers.
    pub fn content_hash(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(hex::encode(hasher.finalize()))
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::endpoints::ConfigServerEndpoint;

    fn make_config() -> DesiredConfig {
        DesiredConfig {
            config_server: ReplicaSetUri::new(
                "config-server-db",
                vec![
                    ConfigServerEndpoint::new("cfg0", 27017),
                    ConfigServerEndpoint::new("cfg1", 27017),
                ],
            ),
            auth_mode: AuthMode::Keyfile,
            keyfile: Some(Sensitive::from("a-keyfile")),
            tls: None,
            bind: BindConfig {
                external: false,
                port: 27018,
            },
        }
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = make_config();
        let b = make_config();
        assert_eq!(a.content_hash().unwrap(), b.content_hash().unwrap());
    }

    #[test]
    fn test_content_hash_tracks_endpoint_changes() {
        let a = make_config();
        let mut b = make_config();
        b.config_server = ReplicaSetUri::new(
            "config-server-db",
            vec![ConfigServerEndpoint::new("cfg0", 27017)],
        );
        assert_ne!(a.content_hash().unwrap(), b.content_hash().unwrap());
    }

    #[test]
    fn test_content_hash_tracks_tls_material() {
        let a = make_config();
        let mut b = make_config();
        b.tls = Some(TlsMaterial {
            cert_pem: "CERT".to_string(),
            key_pem: Sensitive::from("KEY"),
            ca_pem: "CA".to_string(),
        });
        assert_ne!(a.content_hash().unwrap(), b.content_hash().unwrap());
        assert!(b.tls_enabled());
    }

    #[test]
    fn test_debug_redacts_secret_material() {
        let mut config = make_config();
        config.tls = Some(TlsMaterial {
            cert_pem: "CERT".to_string(),
            key_pem: Sensitive::from("PRIVATE KEY BYTES"),
            ca_pem: "CA".to_string(),
        });
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("a-keyfile"));
        assert!(!rendered.contains("PRIVATE KEY BYTES"));
    }
}
