//! Drives the real `mongos` process shipped inside the workload snap.
//!
//! The snap's service wrapper reads its launch arguments from a single
//! `MONGOS_ARGS=` line in the system environment file, so applying a config
//! means rewriting that line plus the secret material files it points at,
//! then restarting the service only when something actually changed.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{AuthMode, DesiredConfig, ProcessState};
use crate::process::ProcessController;
use crate::settings::{Settings, SNAP_NAME, SNAP_SERVICE};

/// Environment variable the snap service expands into the mongos command line.
const ENV_VAR: &str = "MONGOS_ARGS";

/// Health poll schedule after a restart.
const HEALTH_ATTEMPTS: u32 = 5;
const HEALTH_INTERVAL: Duration = Duration::from_secs(2);

pub struct SnapMongos {
    settings: Settings,
}

impl SnapMongos {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Build the argument line for the service wrapper.
    fn render_args(&self, config: &DesiredConfig) -> String {
        let mut args = vec![
            format!("--configdb {}", config.config_server.connection_string()),
            format!("--port {}", self.settings.port),
        ];

        if config.bind.external {
            args.push("--bind_ip_all".to_string());
        } else if let Some(socket_dir) = self.settings.socket_path.parent() {
            args.push(format!(
                "--bind_ip localhost --unixSocketPrefix {}",
                socket_dir.display()
            ));
        }

        if config.keyfile.is_some() {
            args.push(format!(
                "--keyFile {}",
                self.settings.keyfile_path.display()
            ));
        }

        if config.tls.is_some() {
            args.push(format!(
                "--tlsMode requireTLS --tlsCertificateKeyFile {} --tlsCAFile {}",
                self.settings.external_cert_file().display(),
                self.settings.ca_file().display()
            ));
        }
        if config.auth_mode == AuthMode::X509 {
            args.push("--clusterAuthMode x509".to_string());
        }

        args.join(" ")
    }

    /// Write `contents` if the file does not already hold them. Returns
    /// whether the file changed. Secret files are chmod 0600.
    async fn write_if_changed(&self, path: &Path, contents: &str, secret: bool) -> Result<bool> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let current = tokio::fs::read_to_string(path).await.ok();
        if current.as_deref() == Some(contents) {
            return Ok(false);
        }
        tokio::fs::write(path, contents).await?;
        if secret {
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        Ok(true)
    }

    async fn remove_if_present(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the `MONGOS_ARGS=` line in the environment file, keeping
    /// every other line intact. Returns whether the line changed.
    async fn update_env_line(&self, args: Option<&str>) -> Result<bool> {
        let path = &self.settings.env_file;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let current = tokio::fs::read_to_string(path).await.unwrap_or_default();

        let mut lines: Vec<String> = current
            .lines()
            .filter(|line| !line.starts_with(&format!("{}=", ENV_VAR)))
            .map(|line| line.to_string())
            .collect();
        if let Some(args) = args {
            lines.push(format!("{}={}", ENV_VAR, args));
        }
        let updated = format!("{}\n", lines.join("\n"));

        if updated == current {
            return Ok(false);
        }
        tokio::fs::write(path, updated).await?;
        Ok(true)
    }

    async fn render(&self, config: &DesiredConfig) -> Result<bool> {
        let mut changed = false;

        match &config.keyfile {
            Some(keyfile) => {
                changed |= self
                    .write_if_changed(&self.settings.keyfile_path, &keyfile.0, true)
                    .await?;
            }
            None => self.remove_if_present(&self.settings.keyfile_path).await?,
        }

        match &config.tls {
            Some(tls) => {
                // mongos wants key and certificate in one PEM file
                let combined = format!("{}{}", tls.key_pem.0, tls.cert_pem);
                changed |= self
                    .write_if_changed(&self.settings.external_cert_file(), &combined, true)
                    .await?;
                changed |= self
                    .write_if_changed(&self.settings.ca_file(), &tls.ca_pem, false)
                    .await?;
            }
            None => {
                self.remove_if_present(&self.settings.external_cert_file())
                    .await?;
                self.remove_if_present(&self.settings.ca_file()).await?;
            }
        }

        changed |= self.update_env_line(Some(&self.render_args(config))).await?;
        Ok(changed)
    }

    async fn snap_command(&self, action: &str) -> Result<()> {
        let service = format!("{}.{}", SNAP_NAME, SNAP_SERVICE);
        let output = Command::new("snap")
            .args([action, &service])
            .output()
            .await
            .map_err(|e| Error::ProcessApplyFailed(format!("snap {}: {}", action, e)))?;
        if !output.status.success() {
            return Err(Error::ProcessApplyFailed(format!(
                "snap {} {}: {}",
                action,
                service,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn observe(&self) -> ProcessState {
        let output = Command::new("snap").args(["services", SNAP_NAME]).output().await;
        let listing = match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).to_string(),
            _ => return ProcessState::Stopped,
        };
        let Some(line) = listing
            .lines()
            .find(|line| line.starts_with(&format!("{}.{}", SNAP_NAME, SNAP_SERVICE)))
        else {
            return ProcessState::Stopped;
        };
        if line.contains(" active") {
            ProcessState::Running
        } else if line.contains(" activating") {
            ProcessState::Starting
        } else if line.contains(" error") || line.contains(" failed") {
            ProcessState::Degraded
        } else {
            ProcessState::Stopped
        }
    }

    async fn wait_healthy(&self) -> Result<ProcessState> {
        for attempt in 1..=HEALTH_ATTEMPTS {
            match self.observe().await {
                ProcessState::Running => return Ok(ProcessState::Running),
                state => {
                    debug!(%state, attempt, "router not healthy yet");
                    tokio::time::sleep(HEALTH_INTERVAL).await;
                }
            }
        }
        Err(Error::ProcessApplyFailed(format!(
            "service not healthy after {} checks",
            HEALTH_ATTEMPTS
        )))
    }
}

#[async_trait]
impl ProcessController for SnapMongos {
    async fn apply(&self, config: &DesiredConfig) -> Result<ProcessState> {
        let changed = self.render(config).await?;
        let state = self.observe().await;

        if !changed && state.is_running() {
            debug!("config unchanged and router healthy, nothing to apply");
            return Ok(state);
        }

        info!(
            changed,
            config_server = %config.config_server.connection_string(),
            tls = config.tls_enabled(),
            "restarting router with new configuration"
        );
        self.snap_command("restart").await?;
        self.wait_healthy().await
    }

    async fn health_check(&self) -> Result<ProcessState> {
        Ok(self.observe().await)
    }

    async fn stop(&self) -> Result<()> {
        info!("stopping router and clearing rendered configuration");
        if let Err(e) = self.snap_command("stop").await {
            // The snap may already be gone during teardown.
            warn!(error = %e, "snap stop failed");
        }
        self.update_env_line(None).await?;
        self.remove_if_present(&self.settings.keyfile_path).await?;
        self.remove_if_present(&self.settings.external_cert_file())
            .await?;
        self.remove_if_present(&self.settings.ca_file()).await?;
        Ok(())
    }
}
