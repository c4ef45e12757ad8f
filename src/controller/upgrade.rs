//! Refresh gating.
//!
//! Every unit advertises an upgrade state in its own peer databag and the
//! leader keeps a record of the last versions the application completed a
//! refresh into. A new revision only proceeds when it is compatible with
//! that record (same major, never a downgrade), and the pre-refresh check
//! refuses while any router unit is unhealthy.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{ModelSnapshot, UnitStatus};

// Peer databag keys.
pub const UPGRADE_STATE_KEY: &str = "upgrade-state";
pub const VERSIONS_KEY: &str = "versions";

/// mongos version shipped by the pinned workload snap channel.
pub const WORKLOAD_VERSION: &str = "6.0.6";

/// Where a unit stands in a rolling refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitUpgradeState {
    #[default]
    Healthy,
    Upgrading,
    Outdated,
}

impl UnitUpgradeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitUpgradeState::Healthy => "healthy",
            UnitUpgradeState::Upgrading => "upgrading",
            UnitUpgradeState::Outdated => "outdated",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "upgrading" => UnitUpgradeState::Upgrading,
            "outdated" => UnitUpgradeState::Outdated,
            _ => UnitUpgradeState::Healthy,
        }
    }
}

/// Versions the application last completed a refresh into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentVersions {
    pub charm: String,
    pub workload: String,
}

pub fn current_versions() -> ComponentVersions {
    ComponentVersions {
        charm: env!("CARGO_PKG_VERSION").to_string(),
        workload: WORKLOAD_VERSION.to_string(),
    }
}

/// Versions record from the peer app databag, if present and parseable.
pub fn recorded_versions(snapshot: &ModelSnapshot) -> Option<ComponentVersions> {
    let raw = snapshot.peers.as_ref()?.local_app_value(VERSIONS_KEY)?;
    match serde_json::from_str(raw) {
        Ok(versions) => Some(versions),
        Err(e) => {
            warn!(error = %e, "unparseable versions record on peer relation");
            None
        }
    }
}

/// Upgrade states of every peer unit, this one included.
pub fn unit_states(snapshot: &ModelSnapshot) -> Vec<(String, UnitUpgradeState)> {
    let mut states = Vec::new();
    let Some(peers) = snapshot.peers.as_ref() else {
        return states;
    };
    let own = peers
        .local_unit_value(UPGRADE_STATE_KEY)
        .map(UnitUpgradeState::parse)
        .unwrap_or_default();
    states.push((snapshot.unit.unit.clone(), own));
    for (unit, bag) in &peers.remote_units {
        let state = bag
            .get(UPGRADE_STATE_KEY)
            .map(|raw| UnitUpgradeState::parse(raw))
            .unwrap_or_default();
        states.push((unit.clone(), state));
    }
    states
}

fn version_parts(version: &str) -> Option<Vec<u64>> {
    let mut parts = Vec::new();
    for piece in version.split('.') {
        let digits: String = piece.chars().take_while(|c| c.is_ascii_digit()).collect();
        parts.push(digits.parse().ok()?);
    }
    Some(parts)
}

/// Same major and not a downgrade. Unparseable versions are let through;
/// blocking a refresh over a malformed record would strand the unit.
pub fn is_compatible(previous: &str, current: &str) -> bool {
    match (version_parts(previous), version_parts(current)) {
        (Some(prev), Some(cur)) => prev.first() == cur.first() && cur >= prev,
        _ => {
            warn!(previous, current, "unparseable version, skipping compatibility gate");
            true
        }
    }
}

/// Decision for a unit waking up under a new revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeGate {
    Proceed(ComponentVersions),
    Refuse(UnitStatus),
}

pub fn gate(snapshot: &ModelSnapshot) -> UpgradeGate {
    let current = current_versions();
    if let Some(previous) = recorded_versions(snapshot) {
        if !is_compatible(&previous.charm, &current.charm) {
            return UpgradeGate::Refuse(UnitStatus::blocked(format!(
                "Refusing refresh from {} to {}; restore a compatible revision.",
                previous.charm, current.charm
            )));
        }
    }
    UpgradeGate::Proceed(current)
}

/// Health gate run before a refresh is allowed to start.
pub fn precheck(snapshot: &ModelSnapshot) -> std::result::Result<(), UnitStatus> {
    if !snapshot.process.is_running() {
        return Err(UnitStatus::blocked(
            "Cannot refresh while the router is not running.",
        ));
    }
    for (unit, state) in unit_states(snapshot) {
        if state != UnitUpgradeState::Healthy {
            return Err(UnitStatus::blocked(format!(
                "Cannot refresh while {} is {}.",
                unit,
                state.as_str()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProcessState, RelationId, RelationView, StatusKind};

    fn snapshot_with_peers() -> ModelSnapshot {
        let mut snapshot = ModelSnapshot::for_unit("mongos", "mongos/0", "10.0.0.7");
        snapshot.peers = Some(RelationView::new(RelationId(1), "mongos"));
        snapshot.process = ProcessState::Running;
        snapshot
    }

    #[test]
    fn test_compatibility_gate() {
        assert!(is_compatible("0.1.0", "0.1.0"));
        assert!(is_compatible("0.1.0", "0.1.1"));
        assert!(is_compatible("0.1.0", "0.2.0"));
        assert!(!is_compatible("0.2.0", "0.1.9"));
        assert!(!is_compatible("0.9.0", "1.0.0"));
        assert!(!is_compatible("1.0.0", "0.9.0"));
        // malformed records never block
        assert!(is_compatible("unknown", "0.1.0"));
    }

    #[test]
    fn test_gate_refuses_incompatible_record() {
        let mut snapshot = snapshot_with_peers();
        let record = serde_json::to_string(&ComponentVersions {
            charm: "99.0.0".to_string(),
            workload: WORKLOAD_VERSION.to_string(),
        })
        .unwrap();
        snapshot
            .peers
            .as_mut()
            .unwrap()
            .local_app
            .insert(VERSIONS_KEY.to_string(), record);

        match gate(&snapshot) {
            UpgradeGate::Refuse(status) => {
                assert_eq!(status.kind, StatusKind::Blocked);
                assert!(status.message.contains("99.0.0"));
            }
            UpgradeGate::Proceed(_) => panic!("expected refusal"),
        }
    }

    #[test]
    fn test_gate_proceeds_without_record() {
        let snapshot = snapshot_with_peers();
        assert_eq!(gate(&snapshot), UpgradeGate::Proceed(current_versions()));
    }

    #[test]
    fn test_precheck_requires_running_process() {
        let mut snapshot = snapshot_with_peers();
        snapshot.process = ProcessState::Stopped;
        let status = precheck(&snapshot).unwrap_err();
        assert_eq!(status.kind, StatusKind::Blocked);
    }

    #[test]
    fn test_precheck_requires_healthy_peers() {
        let mut snapshot = snapshot_with_peers();
        let mut bag = std::collections::BTreeMap::new();
        bag.insert(UPGRADE_STATE_KEY.to_string(), "upgrading".to_string());
        snapshot
            .peers
            .as_mut()
            .unwrap()
            .remote_units
            .insert("mongos/1".to_string(), bag);

        let status = precheck(&snapshot).unwrap_err();
        assert!(status.message.contains("mongos/1"));
    }

    #[test]
    fn test_precheck_passes_when_all_healthy() {
        let snapshot = snapshot_with_peers();
        assert!(precheck(&snapshot).is_ok());
    }
}
