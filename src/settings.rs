//! Workload layout: where the snap keeps its files and how we reach it.

use std::path::PathBuf;

/// Port the router listens on for client traffic.
pub const MONGOS_PORT: u16 = 27018;

/// Snap delivering the workload and the service name inside it.
pub const SNAP_NAME: &str = "charmed-mongodb";
pub const SNAP_SERVICE: &str = "mongos";

/// Filesystem locations used when rendering router configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Cluster keyfile location, written mode 0600.
    pub keyfile_path: PathBuf,
    /// Directory holding PEM material when TLS is enabled.
    pub tls_dir: PathBuf,
    /// Environment file consumed by the snap service wrapper.
    pub env_file: PathBuf,
    /// Unix socket the router binds when serving local traffic only.
    pub socket_path: PathBuf,
    /// Client-facing port.
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        let snap_etc = PathBuf::from("/var/snap/charmed-mongodb/current/etc/mongod");
        Self {
            keyfile_path: snap_etc.join("keyFile"),
            tls_dir: snap_etc.join("tls"),
            env_file: PathBuf::from("/etc/environment"),
            // The socket path feeds into a filename; it must stay under the
            // 104 byte sun_path limit.
            socket_path: PathBuf::from(format!(
                "/var/snap/charmed-mongodb/common/var/mongodb-{}.sock",
                MONGOS_PORT
            )),
            port: MONGOS_PORT,
        }
    }
}

impl Settings {
    /// Relocate every path under `root`, used by tests to render into a
    /// temporary directory instead of the live snap tree.
    pub fn rooted_at(root: &std::path::Path) -> Self {
        let defaults = Self::default();
        let strip = |p: &PathBuf| {
            let rel = p.strip_prefix("/").unwrap_or(p);
            root.join(rel)
        };
        Self {
            keyfile_path: strip(&defaults.keyfile_path),
            tls_dir: strip(&defaults.tls_dir),
            env_file: strip(&defaults.env_file),
            socket_path: strip(&defaults.socket_path),
            port: defaults.port,
        }
    }

    pub fn external_cert_file(&self) -> PathBuf {
        self.tls_dir.join("external-cert.pem")
    }

    pub fn ca_file(&self) -> PathBuf {
        self.tls_dir.join("external-ca.crt")
    }
}
