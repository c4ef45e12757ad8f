//! Unit status values with worst-case merge semantics.

use serde::{Deserialize, Serialize};

/// Operator-visible condition of this unit. Ordering is by severity so that
/// merging statuses from independent concerns keeps the most alarming one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Active,
    Waiting,
    Maintenance,
    Blocked,
    Error,
}

impl StatusKind {
    fn severity(self) -> u8 {
        match self {
            StatusKind::Active => 0,
            StatusKind::Waiting => 1,
            StatusKind::Maintenance => 2,
            StatusKind::Blocked => 3,
            StatusKind::Error => 4,
        }
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StatusKind::Active => "active",
            StatusKind::Waiting => "waiting",
            StatusKind::Maintenance => "maintenance",
            StatusKind::Blocked => "blocked",
            StatusKind::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub kind: StatusKind,
    pub message: String,
}

impl UnitStatus {
    pub fn active() -> Self {
        Self {
            kind: StatusKind::Active,
            message: String::new(),
        }
    }

    pub fn waiting(message: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Waiting,
            message: message.into(),
        }
    }

    pub fn maintenance(message: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Maintenance,
            message: message.into(),
        }
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Blocked,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Error,
            message: message.into(),
        }
    }

    /// Merge statuses from independent checks, keeping the most severe one.
    /// On equal severity the earliest wins, so callers list checks in the
    /// order they want reported.
    pub fn worst(statuses: impl IntoIterator<Item = UnitStatus>) -> UnitStatus {
        let mut merged = UnitStatus::active();
        for status in statuses {
            if status.kind.severity() > merged.kind.severity() {
                merged = status;
            }
        }
        merged
    }
}

impl Default for UnitStatus {
    fn default() -> Self {
        Self::active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_prefers_blocked_over_waiting() {
        let merged = UnitStatus::worst([
            UnitStatus::waiting("waiting for secrets"),
            UnitStatus::blocked("config mismatch"),
            UnitStatus::active(),
        ]);
        assert_eq!(merged.kind, StatusKind::Blocked);
        assert_eq!(merged.message, "config mismatch");
    }

    #[test]
    fn test_worst_keeps_first_on_tie() {
        let merged = UnitStatus::worst([
            UnitStatus::waiting("first"),
            UnitStatus::waiting("second"),
        ]);
        assert_eq!(merged.message, "first");
    }

    #[test]
    fn test_worst_of_nothing_is_active() {
        assert_eq!(UnitStatus::worst([]), UnitStatus::active());
    }

    #[test]
    fn test_error_outranks_everything() {
        let merged = UnitStatus::worst([
            UnitStatus::blocked("bad config"),
            UnitStatus::error("hook tool failure"),
        ]);
        assert_eq!(merged.kind, StatusKind::Error);
    }
}
