//! [`ModelBackend`] implementation that shells out to the platform's hook
//! tools. Every call round-trips through a subprocess, so this backend is
//! only used from inside a dispatched hook where those tools exist.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::backend::{LocalBag, ModelBackend};
use crate::error::{Error, Result};
use crate::model::{DataBag, RelationId, RelationName, StatusKind, UnitIdentity, UnitStatus};

/// Key under which single-valued vault entries store their payload.
const SECRET_CONTENT_KEY: &str = "value";

pub struct HookToolBackend {
    unit: String,
    app: String,
}

impl HookToolBackend {
    /// Build from the dispatch environment. Fails outside a hook context.
    pub fn from_env() -> Result<Self> {
        let unit = std::env::var("JUJU_UNIT_NAME")
            .map_err(|_| Error::ConfigError("JUJU_UNIT_NAME is not set".to_string()))?;
        let app = unit
            .split('/')
            .next()
            .unwrap_or(unit.as_str())
            .to_string();
        Ok(Self { unit, app })
    }

    async fn run_tool(&self, tool: &str, args: &[String]) -> Result<String> {
        debug!(tool, ?args, "invoking hook tool");
        let output = Command::new(tool)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::HookToolFailed {
                tool: tool.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::HookToolFailed {
                tool: tool.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn run_json<T: serde::de::DeserializeOwned>(
        &self,
        tool: &str,
        args: &[String],
    ) -> Result<T> {
        let mut full = args.to_vec();
        full.push("--format=json".to_string());
        let out = self.run_tool(tool, &full).await?;
        let parsed = serde_json::from_str(if out.is_empty() { "null" } else { &out })?;
        Ok(parsed)
    }

    /// Resolve a vault label to the platform's secret URI.
    async fn secret_id(&self, label: &str) -> Result<Option<String>> {
        let args = vec!["--label".to_string(), label.to_string()];
        match self
            .run_json::<serde_json::Value>("secret-info-get", &args)
            .await
        {
            Ok(info) => Ok(info
                .as_object()
                .and_then(|map| map.keys().next())
                .map(|id| id.to_string())),
            Err(Error::HookToolFailed { reason, .. })
                if reason.to_lowercase().contains("not found") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn parse_relation_ids(raw: Vec<String>) -> Vec<RelationId> {
    raw.iter()
        .filter_map(|entry| entry.rsplit(':').next())
        .filter_map(|id| id.parse().ok())
        .map(RelationId)
        .collect()
}

fn format_entries(entries: &[(String, String)]) -> Vec<String> {
    entries
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect()
}

#[async_trait]
impl ModelBackend for HookToolBackend {
    async fn unit_identity(&self) -> Result<UnitIdentity> {
        let address = match self
            .run_json::<String>("unit-get", &["private-address".to_string()])
            .await
        {
            Ok(addr) if !addr.is_empty() => addr,
            _ => hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string()),
        };
        Ok(UnitIdentity {
            app: self.app.clone(),
            unit: self.unit.clone(),
            private_address: address,
        })
    }

    async fn is_leader(&self) -> Result<bool> {
        self.run_json("is-leader", &[]).await
    }

    async fn relation_ids(&self, relation: RelationName) -> Result<Vec<RelationId>> {
        let raw: Vec<String> = self
            .run_json("relation-ids", &[relation.as_str().to_string()])
            .await?;
        Ok(parse_relation_ids(raw))
    }

    async fn remote_app(&self, relation: RelationId) -> Result<String> {
        self.run_json(
            "relation-list",
            &["-r".to_string(), relation.to_string(), "--app".to_string()],
        )
        .await
    }

    async fn remote_units(&self, relation: RelationId) -> Result<Vec<String>> {
        self.run_json("relation-list", &["-r".to_string(), relation.to_string()])
            .await
    }

    async fn read_local_app(&self, relation: RelationId) -> Result<DataBag> {
        let args = vec![
            "-r".to_string(),
            relation.to_string(),
            "--app".to_string(),
            "-".to_string(),
            self.unit.clone(),
        ];
        // Older platforms deny this read to followers; treat that the same
        // as an empty bag rather than failing the whole pass.
        match self
            .run_json::<Option<BTreeMap<String, String>>>("relation-get", &args)
            .await
        {
            Ok(bag) => Ok(bag.unwrap_or_default()),
            Err(e) => {
                warn!(relation = %relation, error = %e, "cannot read own app databag");
                Ok(DataBag::new())
            }
        }
    }

    async fn read_local_unit(&self, relation: RelationId) -> Result<DataBag> {
        let args = vec![
            "-r".to_string(),
            relation.to_string(),
            "-".to_string(),
            self.unit.clone(),
        ];
        let bag: Option<BTreeMap<String, String>> = self.run_json("relation-get", &args).await?;
        Ok(bag.unwrap_or_default())
    }

    async fn read_remote_app(&self, relation: RelationId) -> Result<DataBag> {
        let remote_app = self.remote_app(relation).await?;
        let args = vec![
            "-r".to_string(),
            relation.to_string(),
            "--app".to_string(),
            "-".to_string(),
            remote_app,
        ];
        let bag: Option<BTreeMap<String, String>> = self.run_json("relation-get", &args).await?;
        Ok(bag.unwrap_or_default())
    }

    async fn read_remote_unit(&self, relation: RelationId, unit: &str) -> Result<DataBag> {
        let args = vec![
            "-r".to_string(),
            relation.to_string(),
            "-".to_string(),
            unit.to_string(),
        ];
        let bag: Option<BTreeMap<String, String>> = self.run_json("relation-get", &args).await?;
        Ok(bag.unwrap_or_default())
    }

    async fn write_local(
        &self,
        relation: RelationId,
        bag: LocalBag,
        entries: &[(String, String)],
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut args = vec!["-r".to_string(), relation.to_string()];
        if bag == LocalBag::App {
            args.push("--app".to_string());
        }
        args.extend(format_entries(entries));
        self.run_tool("relation-set", &args).await?;
        Ok(())
    }

    async fn delete_local(
        &self,
        relation: RelationId,
        bag: LocalBag,
        keys: &[String],
    ) -> Result<()> {
        // Setting a key to the empty string removes it from the bag.
        let entries: Vec<(String, String)> =
            keys.iter().map(|k| (k.clone(), String::new())).collect();
        self.write_local(relation, bag, &entries).await
    }

    async fn secret_get(&self, label: &str) -> Result<Option<String>> {
        let args = vec!["--label".to_string(), label.to_string()];
        match self
            .run_json::<BTreeMap<String, String>>("secret-get", &args)
            .await
        {
            Ok(content) => Ok(content.get(SECRET_CONTENT_KEY).cloned()),
            Err(Error::HookToolFailed { reason, .. })
                if reason.to_lowercase().contains("not found") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn secret_set(&self, label: &str, value: &str) -> Result<()> {
        let payload = format!("{}={}", SECRET_CONTENT_KEY, value);
        match self.secret_id(label).await? {
            Some(id) => {
                self.run_tool("secret-set", &[id, payload]).await?;
            }
            None => {
                let args = vec!["--label".to_string(), label.to_string(), payload];
                self.run_tool("secret-add", &args).await?;
            }
        }
        Ok(())
    }

    async fn secret_grant(&self, label: &str, relation: RelationId) -> Result<()> {
        let id = self.secret_id(label).await?.ok_or_else(|| {
            Error::CredentialUnavailable(format!("no vault entry labelled {}", label))
        })?;
        self.run_tool(
            "secret-grant",
            &[id, "-r".to_string(), relation.to_string()],
        )
        .await?;
        Ok(())
    }

    async fn secret_remove(&self, label: &str) -> Result<()> {
        if let Some(id) = self.secret_id(label).await? {
            self.run_tool("secret-remove", &[id]).await?;
        }
        Ok(())
    }

    async fn open_port(&self, port: u16) -> Result<()> {
        self.run_tool("open-port", &[format!("{}/tcp", port)]).await?;
        Ok(())
    }

    async fn close_port(&self, port: u16) -> Result<()> {
        self.run_tool("close-port", &[format!("{}/tcp", port)])
            .await?;
        Ok(())
    }

    async fn set_status(&self, status: &UnitStatus) -> Result<()> {
        // The platform has no settable error state; hooks signal errors by
        // failing. Anything that severe surfaces as blocked here.
        let kind = match status.kind {
            StatusKind::Active => "active",
            StatusKind::Waiting => "waiting",
            StatusKind::Maintenance => "maintenance",
            StatusKind::Blocked | StatusKind::Error => "blocked",
        };
        self.run_tool(
            "status-set",
            &[kind.to_string(), status.message.clone()],
        )
        .await?;
        Ok(())
    }
}
