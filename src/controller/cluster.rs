//! Cluster-integration state machine.
//!
//! Everything the config-server relation tells us is condensed into a
//! [`ClusterAssessment`]: which phase the unit is in, the exact config the
//! router should run, and whether this pass needs to apply it. The
//! assessment is recomputed from the snapshot on every event, never stored,
//! so duplicated or reordered event deliveries converge on the same answer.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::Result;
use crate::model::credential::{Sensitive, KEYFILE_SECRET_LABEL};
use crate::model::desired::{BindConfig, TlsMaterial};
use crate::model::{AuthMode, DesiredConfig, ModelSnapshot, ReplicaSetUri, UnitStatus};
use crate::settings::MONGOS_PORT;

// Keys the config-server side publishes on the cluster relation.
pub const CONFIG_SERVER_DB_KEY: &str = "config-server-db";
pub const KEYFILE_KEY: &str = "key-file";
pub const AUTH_MODE_KEY: &str = "auth-mode";

// Keys our side publishes on the cluster relation (leader only).
pub const DATABASE_KEY: &str = "database";
pub const USER_ROLES_KEY: &str = "extra-user-roles";
pub const EXTERNAL_CONNECTIVITY_KEY: &str = "external-node-connectivity";

// Keys each unit keeps in its own peer databag.
pub const APPLIED_CONFIG_HASH_KEY: &str = "applied-config-hash";
pub const CONFIG_RETRIES_KEY: &str = "config-retries";
pub const CONFIG_LAST_ATTEMPT_KEY: &str = "config-last-attempt";

/// Apply attempts before the unit reports itself degraded.
pub const MAX_APPLY_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterPhase {
    Unintegrated,
    AwaitingConfigServer,
    Configuring,
    Ready,
    Degraded,
    Departing,
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClusterPhase::Unintegrated => "unintegrated",
            ClusterPhase::AwaitingConfigServer => "awaiting-config-server",
            ClusterPhase::Configuring => "configuring",
            ClusterPhase::Ready => "ready",
            ClusterPhase::Degraded => "degraded",
            ClusterPhase::Departing => "departing",
        };
        f.write_str(s)
    }
}

/// What the cluster relation currently implies for this unit.
#[derive(Debug, Clone)]
pub struct ClusterAssessment {
    pub phase: ClusterPhase,
    /// Present whenever a complete config could be derived.
    pub desired: Option<DesiredConfig>,
    pub desired_hash: Option<String>,
    /// True when this pass should instruct the process controller.
    pub needs_apply: bool,
    /// Status to surface when the unit cannot be active yet.
    pub waiting: Option<UnitStatus>,
    /// Keyfile value the leader should mirror into the vault.
    pub keyfile_update: Option<Sensitive>,
}

impl ClusterAssessment {
    fn waiting(phase: ClusterPhase, status: UnitStatus) -> Self {
        Self {
            phase,
            desired: None,
            desired_hash: None,
            needs_apply: false,
            waiting: Some(status),
            keyfile_update: None,
        }
    }
}

/// Exponential backoff for repeated apply attempts: base * 2^attempt,
/// capped at max.
pub fn calculate_backoff(
    attempt: u32,
    base_delay_secs: Option<u64>,
    max_delay_secs: Option<u64>,
) -> Duration {
    let base = base_delay_secs.unwrap_or(15);
    let max = max_delay_secs.unwrap_or(300);

    let delay_secs = base.saturating_mul(2_u64.saturating_pow(attempt.min(5)));
    Duration::from_secs(delay_secs.min(max))
}

/// Whether enough time has passed since the last failed attempt for a
/// degraded unit to try again.
fn retry_due(now: DateTime<Utc>, last_attempt: Option<&str>, retries: u32) -> bool {
    let Some(last_attempt) = last_attempt else {
        return true;
    };
    let Ok(parsed) = DateTime::parse_from_rfc3339(last_attempt) else {
        return true;
    };
    let backoff = calculate_backoff(retries, None, None);
    now >= parsed.with_timezone(&Utc) + chrono::Duration::seconds(backoff.as_secs() as i64)
}

fn own_peer_value<'a>(snapshot: &'a ModelSnapshot, key: &str) -> Option<&'a str> {
    snapshot.peers.as_ref().and_then(|p| p.local_unit_value(key))
}

pub fn applied_config_hash(snapshot: &ModelSnapshot) -> Option<&str> {
    own_peer_value(snapshot, APPLIED_CONFIG_HASH_KEY)
}

pub fn config_retries(snapshot: &ModelSnapshot) -> u32 {
    own_peer_value(snapshot, CONFIG_RETRIES_KEY)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Derive phase and desired config from the snapshot. `tls_material` and
/// `external` come from the TLS and client-exposure assessments and feed
/// into the derived config; they do not influence phase selection.
pub fn evaluate(
    snapshot: &ModelSnapshot,
    tls_material: Option<&TlsMaterial>,
    external: bool,
) -> Result<ClusterAssessment> {
    let Some(cluster) = snapshot.cluster.as_ref() else {
        return Ok(ClusterAssessment::waiting(
            ClusterPhase::Unintegrated,
            UnitStatus::blocked("Missing relation to config-server."),
        ));
    };

    let Some(raw_uri) = cluster.remote_value(CONFIG_SERVER_DB_KEY) else {
        return Ok(ClusterAssessment::waiting(
            ClusterPhase::AwaitingConfigServer,
            UnitStatus::waiting("Waiting for config server db info."),
        ));
    };

    let uri = match ReplicaSetUri::parse(raw_uri) {
        Ok(uri) if !uri.is_empty() => uri,
        Ok(_) => {
            return Ok(ClusterAssessment::waiting(
                ClusterPhase::AwaitingConfigServer,
                UnitStatus::waiting("Config-server has no routable members yet."),
            ));
        }
        Err(e) => {
            warn!(error = %e, "config-server published an unusable endpoint set");
            return Ok(ClusterAssessment::waiting(
                ClusterPhase::AwaitingConfigServer,
                UnitStatus::waiting("Config-server endpoint data is not usable yet."),
            ));
        }
    };

    let Some(keyfile) = cluster.remote_value(KEYFILE_KEY) else {
        return Ok(ClusterAssessment::waiting(
            ClusterPhase::AwaitingConfigServer,
            UnitStatus::waiting("Waiting for secrets from config-server."),
        ));
    };

    let auth_mode = match cluster.remote_value(AUTH_MODE_KEY) {
        Some("x509") => AuthMode::X509,
        _ => AuthMode::Keyfile,
    };

    let desired = DesiredConfig {
        config_server: uri,
        auth_mode,
        keyfile: Some(Sensitive::from(keyfile)),
        tls: tls_material.cloned(),
        bind: BindConfig {
            external,
            port: MONGOS_PORT,
        },
    };
    let desired_hash = desired.content_hash()?;

    let keyfile_update = match snapshot.secret(KEYFILE_SECRET_LABEL) {
        Some(stored) if stored == keyfile => None,
        _ => Some(Sensitive::from(keyfile)),
    };

    let applied = applied_config_hash(snapshot);
    let retries = config_retries(snapshot);

    let (phase, needs_apply, waiting) = if applied == Some(desired_hash.as_str())
        && snapshot.process.is_running()
    {
        (ClusterPhase::Ready, false, None)
    } else if retries >= MAX_APPLY_ATTEMPTS
        && !retry_due(
            snapshot.now,
            own_peer_value(snapshot, CONFIG_LAST_ATTEMPT_KEY),
            retries,
        )
    {
        (
            ClusterPhase::Degraded,
            false,
            Some(UnitStatus::blocked("mongos is not running")),
        )
    } else {
        (ClusterPhase::Configuring, true, None)
    };

    Ok(ClusterAssessment {
        phase,
        desired: Some(desired),
        desired_hash: Some(desired_hash),
        needs_apply,
        waiting,
        keyfile_update,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProcessState, RelationId, RelationView};

    fn snapshot_with_cluster(entries: &[(&str, &str)]) -> ModelSnapshot {
        let mut snapshot = ModelSnapshot::for_unit("mongos", "mongos/0", "10.0.0.7");
        let mut cluster = RelationView::new(RelationId(0), "config-server");
        for (k, v) in entries {
            cluster.remote_app_data.insert(k.to_string(), v.to_string());
        }
        snapshot.cluster = Some(cluster);
        snapshot.peers = Some(RelationView::new(RelationId(1), "mongos"));
        snapshot
    }

    #[test]
    fn test_backoff_calculation() {
        assert_eq!(calculate_backoff(0, None, None), Duration::from_secs(15));
        assert_eq!(calculate_backoff(1, None, None), Duration::from_secs(30));
        assert_eq!(calculate_backoff(2, None, None), Duration::from_secs(60));
        assert_eq!(calculate_backoff(3, None, None), Duration::from_secs(120));
        // capped at 300 s (5 min)
        assert_eq!(calculate_backoff(5, None, None), Duration::from_secs(300));
        assert_eq!(calculate_backoff(10, None, None), Duration::from_secs(300));
    }

    #[test]
    fn test_no_relation_is_unintegrated() {
        let snapshot = ModelSnapshot::for_unit("mongos", "mongos/0", "10.0.0.7");
        let assessment = evaluate(&snapshot, None, false).unwrap();
        assert_eq!(assessment.phase, ClusterPhase::Unintegrated);
        assert!(assessment.desired.is_none());
        assert!(!assessment.needs_apply);
    }

    #[test]
    fn test_missing_endpoints_awaits_config_server() {
        let snapshot = snapshot_with_cluster(&[]);
        let assessment = evaluate(&snapshot, None, false).unwrap();
        assert_eq!(assessment.phase, ClusterPhase::AwaitingConfigServer);
    }

    #[test]
    fn test_empty_endpoint_set_awaits_config_server() {
        let snapshot = snapshot_with_cluster(&[
            (CONFIG_SERVER_DB_KEY, "config-server-db/"),
            (KEYFILE_KEY, "kf"),
        ]);
        let assessment = evaluate(&snapshot, None, false).unwrap();
        assert_eq!(assessment.phase, ClusterPhase::AwaitingConfigServer);
        assert!(!assessment.needs_apply);
    }

    #[test]
    fn test_malformed_endpoint_set_awaits_config_server() {
        let snapshot = snapshot_with_cluster(&[
            (CONFIG_SERVER_DB_KEY, "not a uri at all"),
            (KEYFILE_KEY, "kf"),
        ]);
        let assessment = evaluate(&snapshot, None, false).unwrap();
        assert_eq!(assessment.phase, ClusterPhase::AwaitingConfigServer);
    }

    #[test]
    fn test_missing_keyfile_awaits_secrets() {
        let snapshot =
            snapshot_with_cluster(&[(CONFIG_SERVER_DB_KEY, "config-server-db/cfg0:27017")]);
        let assessment = evaluate(&snapshot, None, false).unwrap();
        assert_eq!(assessment.phase, ClusterPhase::AwaitingConfigServer);
        assert_eq!(
            assessment.waiting.unwrap().message,
            "Waiting for secrets from config-server."
        );
    }

    #[test]
    fn test_complete_data_enters_configuring() {
        let snapshot = snapshot_with_cluster(&[
            (CONFIG_SERVER_DB_KEY, "config-server-db/cfg0:27017"),
            (KEYFILE_KEY, "kf"),
        ]);
        let assessment = evaluate(&snapshot, None, false).unwrap();
        assert_eq!(assessment.phase, ClusterPhase::Configuring);
        assert!(assessment.needs_apply);
        let desired = assessment.desired.unwrap();
        assert_eq!(desired.config_server.endpoints.len(), 1);
        assert_eq!(desired.auth_mode, AuthMode::Keyfile);
        // leader should mirror the keyfile into the vault
        assert!(assessment.keyfile_update.is_some());
    }

    #[test]
    fn test_applied_hash_and_running_process_is_ready() {
        let mut snapshot = snapshot_with_cluster(&[
            (CONFIG_SERVER_DB_KEY, "config-server-db/cfg0:27017"),
            (KEYFILE_KEY, "kf"),
        ]);
        snapshot.process = ProcessState::Running;
        snapshot
            .secrets
            .insert(KEYFILE_SECRET_LABEL.to_string(), "kf".to_string());

        let probe = evaluate(&snapshot, None, false).unwrap();
        let hash = probe.desired_hash.clone().unwrap();
        snapshot
            .peers
            .as_mut()
            .unwrap()
            .local_unit
            .insert(APPLIED_CONFIG_HASH_KEY.to_string(), hash);

        let assessment = evaluate(&snapshot, None, false).unwrap();
        assert_eq!(assessment.phase, ClusterPhase::Ready);
        assert!(!assessment.needs_apply);
        assert!(assessment.keyfile_update.is_none());
    }

    #[test]
    fn test_stopped_process_with_applied_hash_reconfigures() {
        let mut snapshot = snapshot_with_cluster(&[
            (CONFIG_SERVER_DB_KEY, "config-server-db/cfg0:27017"),
            (KEYFILE_KEY, "kf"),
        ]);
        let probe = evaluate(&snapshot, None, false).unwrap();
        let hash = probe.desired_hash.clone().unwrap();
        snapshot
            .peers
            .as_mut()
            .unwrap()
            .local_unit
            .insert(APPLIED_CONFIG_HASH_KEY.to_string(), hash);
        snapshot.process = ProcessState::Stopped;

        let assessment = evaluate(&snapshot, None, false).unwrap();
        assert_eq!(assessment.phase, ClusterPhase::Configuring);
        assert!(assessment.needs_apply);
    }

    #[test]
    fn test_exhausted_retries_within_backoff_is_degraded() {
        let mut snapshot = snapshot_with_cluster(&[
            (CONFIG_SERVER_DB_KEY, "config-server-db/cfg0:27017"),
            (KEYFILE_KEY, "kf"),
        ]);
        let peers = snapshot.peers.as_mut().unwrap();
        peers
            .local_unit
            .insert(CONFIG_RETRIES_KEY.to_string(), "3".to_string());
        peers.local_unit.insert(
            CONFIG_LAST_ATTEMPT_KEY.to_string(),
            snapshot.now.to_rfc3339(),
        );

        let assessment = evaluate(&snapshot, None, false).unwrap();
        assert_eq!(assessment.phase, ClusterPhase::Degraded);
        assert!(!assessment.needs_apply);
    }

    #[test]
    fn test_exhausted_retries_after_backoff_tries_again() {
        let mut snapshot = snapshot_with_cluster(&[
            (CONFIG_SERVER_DB_KEY, "config-server-db/cfg0:27017"),
            (KEYFILE_KEY, "kf"),
        ]);
        let stale = (snapshot.now - chrono::Duration::hours(1)).to_rfc3339();
        let peers = snapshot.peers.as_mut().unwrap();
        peers
            .local_unit
            .insert(CONFIG_RETRIES_KEY.to_string(), "3".to_string());
        peers
            .local_unit
            .insert(CONFIG_LAST_ATTEMPT_KEY.to_string(), stale);

        let assessment = evaluate(&snapshot, None, false).unwrap();
        assert_eq!(assessment.phase, ClusterPhase::Configuring);
        assert!(assessment.needs_apply);
    }

    #[test]
    fn test_x509_auth_mode_from_cluster_data() {
        let snapshot = snapshot_with_cluster(&[
            (CONFIG_SERVER_DB_KEY, "config-server-db/cfg0:27017"),
            (KEYFILE_KEY, "kf"),
            (AUTH_MODE_KEY, "x509"),
        ]);
        let assessment = evaluate(&snapshot, None, false).unwrap();
        assert_eq!(assessment.desired.unwrap().auth_mode, AuthMode::X509);
    }

    #[test]
    fn test_tls_material_lands_in_desired_config() {
        let snapshot = snapshot_with_cluster(&[
            (CONFIG_SERVER_DB_KEY, "config-server-db/cfg0:27017"),
            (KEYFILE_KEY, "kf"),
        ]);
        let material = TlsMaterial {
            cert_pem: "CERT".to_string(),
            key_pem: Sensitive::from("KEY"),
            ca_pem: "CA".to_string(),
        };
        let with_tls = evaluate(&snapshot, Some(&material), false).unwrap();
        let without = evaluate(&snapshot, None, false).unwrap();
        assert!(with_tls.desired.as_ref().unwrap().tls_enabled());
        assert_ne!(with_tls.desired_hash, without.desired_hash);
    }
}
