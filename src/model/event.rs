//! Lifecycle and relation events dispatched to the operator.

use serde::{Deserialize, Serialize};

/// Relation endpoints this operator participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationName {
    /// Integration with the config-server application.
    #[serde(rename = "cluster")]
    Cluster,
    /// Peer relation between router units.
    #[serde(rename = "router-peers")]
    RouterPeers,
    /// Client applications consuming the router.
    #[serde(rename = "mongos-proxy")]
    MongosProxy,
    /// Certificate authority integration.
    #[serde(rename = "certificates")]
    Certificates,
}

impl RelationName {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationName::Cluster => "cluster",
            RelationName::RouterPeers => "router-peers",
            RelationName::MongosProxy => "mongos-proxy",
            RelationName::Certificates => "certificates",
        }
    }

    /// Accepts both hyphenated and underscored spellings; the model names
    /// the client endpoint `mongos_proxy` while hook names hyphenate it.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.replace('_', "-").as_str() {
            "cluster" => Some(RelationName::Cluster),
            "router-peers" => Some(RelationName::RouterPeers),
            "mongos-proxy" => Some(RelationName::MongosProxy),
            "certificates" => Some(RelationName::Certificates),
            _ => None,
        }
    }
}

impl std::fmt::Display for RelationName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dispatched occurrence. Every variant is handled by the same
/// reconciliation pass; the variant mostly matters for teardown detection
/// and for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Event {
    Install,
    Start,
    Stop,
    Remove,
    ConfigChanged,
    UpdateStatus,
    LeaderElected,
    LeaderSettingsChanged,
    UpgradeCharm,
    SecretChanged { label: String },
    PreUpgradeCheck,
    RelationCreated { relation: RelationName },
    RelationJoined { relation: RelationName, unit: String },
    RelationChanged { relation: RelationName },
    RelationDeparted { relation: RelationName, departing_unit: String },
    RelationBroken { relation: RelationName },
}

impl Event {
    /// Parse a dispatch hook name such as `cluster-relation-changed` or
    /// `update-status`. Relation events take their counterpart unit from
    /// the dispatch environment.
    pub fn parse(
        hook: &str,
        remote_unit: Option<&str>,
        departing_unit: Option<&str>,
        secret_label: Option<&str>,
    ) -> Option<Event> {
        let hook = hook.replace('_', "-");
        match hook.as_str() {
            "install" => return Some(Event::Install),
            "start" => return Some(Event::Start),
            "stop" => return Some(Event::Stop),
            "remove" => return Some(Event::Remove),
            "config-changed" => return Some(Event::ConfigChanged),
            "update-status" => return Some(Event::UpdateStatus),
            "leader-elected" => return Some(Event::LeaderElected),
            "leader-settings-changed" => return Some(Event::LeaderSettingsChanged),
            "upgrade-charm" => return Some(Event::UpgradeCharm),
            "secret-changed" => {
                return Some(Event::SecretChanged {
                    label: secret_label.unwrap_or_default().to_string(),
                })
            }
            "pre-upgrade-check" => return Some(Event::PreUpgradeCheck),
            _ => {}
        }

        for (suffix, kind) in [
            ("-relation-created", 0),
            ("-relation-joined", 1),
            ("-relation-changed", 2),
            ("-relation-departed", 3),
            ("-relation-broken", 4),
        ] {
            if let Some(prefix) = hook.strip_suffix(suffix) {
                let relation = RelationName::parse(prefix)?;
                return Some(match kind {
                    0 => Event::RelationCreated { relation },
                    1 => Event::RelationJoined {
                        relation,
                        unit: remote_unit.unwrap_or_default().to_string(),
                    },
                    2 => Event::RelationChanged { relation },
                    3 => Event::RelationDeparted {
                        relation,
                        departing_unit: departing_unit.unwrap_or_default().to_string(),
                    },
                    _ => Event::RelationBroken { relation },
                });
            }
        }
        None
    }

    /// Events that mean this unit is leaving the cluster, or the cluster is
    /// leaving us. These preempt any in-flight convergence.
    pub fn is_teardown(&self) -> bool {
        matches!(
            self,
            Event::Stop
                | Event::Remove
                | Event::RelationBroken {
                    relation: RelationName::Cluster,
                }
        )
    }

    /// Hook-style name used in log lines.
    pub fn name(&self) -> String {
        match self {
            Event::Install => "install".to_string(),
            Event::Start => "start".to_string(),
            Event::Stop => "stop".to_string(),
            Event::Remove => "remove".to_string(),
            Event::ConfigChanged => "config-changed".to_string(),
            Event::UpdateStatus => "update-status".to_string(),
            Event::LeaderElected => "leader-elected".to_string(),
            Event::LeaderSettingsChanged => "leader-settings-changed".to_string(),
            Event::UpgradeCharm => "upgrade-charm".to_string(),
            Event::SecretChanged { .. } => "secret-changed".to_string(),
            Event::PreUpgradeCheck => "pre-upgrade-check".to_string(),
            Event::RelationCreated { relation } => format!("{}-relation-created", relation),
            Event::RelationJoined { relation, .. } => format!("{}-relation-joined", relation),
            Event::RelationChanged { relation } => format!("{}-relation-changed", relation),
            Event::RelationDeparted { relation, .. } => {
                format!("{}-relation-departed", relation)
            }
            Event::RelationBroken { relation } => format!("{}-relation-broken", relation),
        }
    }
}
