// ── Shell-path backend ──
//
// Direct remote surgery when the panel API is disabled or unusable:
// edit the live config file AND the embedded store the panel rehydrates
// it from, then restart the service and verify. ssh2 is blocking, so
// each operation runs as one `spawn_blocking` unit holding a single SSH
// session from connect to verify.

pub mod config_file;
pub mod ssh;
pub mod store;

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SshSettings;
use crate::error::EngineError;
use crate::model::{ClientRecord, Protocol, WriteReport, WriteStage};
use crate::remote::config_file::AppendOutcome;
use crate::remote::ssh::SshSession;
use crate::remote::store::StoreOutcome;

/// The shell-path backend: config-file + store mutation over SSH.
#[derive(Clone)]
pub struct ShellBackend {
    ssh: SshSettings,
    fallback_inbound_index: Option<usize>,
    restart_settle: Duration,
}

impl ShellBackend {
    pub fn new(
        ssh: SshSettings,
        fallback_inbound_index: Option<usize>,
        restart_settle: Duration,
    ) -> Self {
        Self {
            ssh,
            fallback_inbound_index,
            restart_settle,
        }
    }

    /// Add a client to the inbound matching (port, protocol) on both
    /// remote surfaces.
    pub async fn add_client(
        &self,
        record: &ClientRecord,
        port: u16,
    ) -> Result<WriteReport, EngineError> {
        let this = self.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || {
            shell_add(
                &this.ssh,
                &record,
                port,
                this.fallback_inbound_index,
                this.restart_settle,
            )
        })
        .await
        .map_err(|e| EngineError::Internal(format!("shell task: {e}")))?
    }

    /// Remove a client from every inbound row of the store; the file
    /// converges on the next panel resync.
    pub async fn remove_client(&self, id: Uuid) -> Result<WriteReport, EngineError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || shell_remove(&this.ssh, id, this.restart_settle))
            .await
            .map_err(|e| EngineError::Internal(format!("shell task: {e}")))?
    }

    /// Read the target inbound's `streamSettings` from the live config
    /// file, for profile enrichment.
    pub async fn stream_settings(
        &self,
        port: u16,
        protocol: Protocol,
    ) -> Result<Option<Value>, EngineError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            let ssh = SshSession::connect(&this.ssh)?;
            let path = config_file::locate_config_path(&ssh)?;
            let config: Value = serde_json::from_str(&ssh.read_file(&path)?)
                .map_err(|e| EngineError::Internal(format!("config parse: {e}")))?;
            let found =
                config_file::find_inbound_index(&config, port, protocol, this.fallback_inbound_index);
            Ok(found.and_then(|(idx, _)| {
                config["inbounds"]
                    .get(idx)
                    .and_then(|inb| inb.get("streamSettings"))
                    .cloned()
            }))
        })
        .await
        .map_err(|e| EngineError::Internal(format!("shell task: {e}")))?
    }

    /// Read the whole target inbound object from the live config file.
    pub async fn inspect_inbound(
        &self,
        port: u16,
        protocol: Protocol,
    ) -> Result<Option<Value>, EngineError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            let ssh = SshSession::connect(&this.ssh)?;
            let path = config_file::locate_config_path(&ssh)?;
            let config: Value = serde_json::from_str(&ssh.read_file(&path)?)
                .map_err(|e| EngineError::Internal(format!("config parse: {e}")))?;
            let found =
                config_file::find_inbound_index(&config, port, protocol, this.fallback_inbound_index);
            Ok(found.and_then(|(idx, _)| config["inbounds"].get(idx).cloned()))
        })
        .await
        .map_err(|e| EngineError::Internal(format!("shell task: {e}")))?
    }

    /// Is the proxy service active on the remote host?
    pub async fn check_status(&self) -> Result<bool, EngineError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            let ssh = SshSession::connect(&this.ssh)?;
            // The failing unit prints its state before the fallback runs,
            // so scan lines instead of comparing the whole output.
            let (out, _) = ssh.exec("systemctl is-active xray || systemctl is-active x-ui")?;
            Ok(out.lines().any(|line| line.trim() == "active"))
        })
        .await
        .map_err(|e| EngineError::Internal(format!("shell task: {e}")))?
    }
}

// ── Blocking operation bodies ───────────────────────────────────────

fn shell_add(
    settings: &SshSettings,
    record: &ClientRecord,
    port: u16,
    fallback_index: Option<usize>,
    settle: Duration,
) -> Result<WriteReport, EngineError> {
    let ssh = SshSession::connect(settings)?;
    let config_path = config_file::locate_config_path(&ssh)?;
    let mut config: Value = serde_json::from_str(&ssh.read_file(&config_path)?)
        .map_err(|e| EngineError::Internal(format!("config parse: {e}")))?;

    let (idx, matched) =
        config_file::find_inbound_index(&config, port, record.protocol, fallback_index)
            .ok_or_else(|| EngineError::InboundNotFound {
                inbound: format!("port {port}, protocol {}", record.protocol),
            })?;
    debug!(idx, ?matched, "targeting inbound");

    let client = match config_file::append_client(&mut config, idx, record)? {
        AppendOutcome::AlreadyPresent => {
            info!(id = %record.id, "client already present in the config file");
            return Ok(WriteReport {
                stage: WriteStage::Verified,
                partial: false,
                unchanged: true,
                restarted: false,
                snapshot: Some(config),
            });
        }
        AppendOutcome::Added(client) => client,
    };
    config_file::ensure_default_stanzas(&mut config);

    let serialized = serde_json::to_string_pretty(&config)
        .map_err(|e| EngineError::Internal(format!("config encode: {e}")))?;
    ssh.write_file(&config_path, &serialized)?;
    let mut stage = WriteStage::FileWritten;

    // Immediate read-back; a miss here means the write itself is broken,
    // not just unsettled.
    match ssh.read_file(&config_path) {
        Ok(raw) => {
            let present = serde_json::from_str::<Value>(&raw)
                .map(|reread| config_file::client_present(&reread, idx, &record.id))
                .unwrap_or(false);
            if !present {
                error!(path = %config_path, "client missing from the config file right after writing it");
            }
        }
        Err(e) => warn!(error = %e, "could not read the config file back"),
    }

    // The panel resyncs the file from its store on restart; without this
    // the file write is discarded.
    let mut partial = false;
    match store::apply_add(&ssh, port, record.protocol, &client) {
        Ok(StoreOutcome::Updated | StoreOutcome::AlreadyConsistent) => {
            stage = WriteStage::StoreWritten;
        }
        Ok(StoreOutcome::RowMissing) => {
            warn!(port, "no matching store row -- the file write will not survive a panel resync");
            partial = true;
        }
        Err(e) => {
            warn!(error = %e, "store update failed -- file and store are now inconsistent");
            partial = true;
        }
    }

    let restarted = restart_service(&ssh);
    if restarted && stage < WriteStage::RestartTriggered {
        stage = WriteStage::RestartTriggered;
    }
    std::thread::sleep(settle);

    let mut snapshot = None;
    match ssh
        .read_file(&config_path)
        .and_then(|raw| {
            serde_json::from_str::<Value>(&raw)
                .map_err(|e| EngineError::Internal(format!("config parse: {e}")))
        }) {
        Ok(final_config) => {
            if config_file::client_present(&final_config, idx, &record.id) {
                info!(id = %record.id, "client verified in the config file after restart");
                stage = WriteStage::Verified;
            } else if !partial {
                // Present in the store but not (yet) in the file: the
                // next panel resync makes it converge.
                info!(
                    id = %record.id,
                    "client absent from the file but written to the store -- eventual convergence"
                );
            } else {
                error!(id = %record.id, "client vanished after restart and the store was not updated");
            }
            snapshot = Some(final_config);
        }
        Err(e) => warn!(error = %e, "post-restart verification read failed"),
    }

    Ok(WriteReport {
        stage,
        partial,
        unchanged: false,
        restarted,
        snapshot,
    })
}

fn shell_remove(
    settings: &SshSettings,
    id: Uuid,
    settle: Duration,
) -> Result<WriteReport, EngineError> {
    let ssh = SshSession::connect(settings)?;

    // Store first: it is the surface the panel rehydrates from, so a
    // store-level removal is authoritative even before the file catches up.
    let outcome = store::apply_remove(&ssh, &id)?;
    if outcome == StoreOutcome::AlreadyConsistent {
        info!(%id, "client not present in the store -- nothing to remove");
        return Ok(WriteReport {
            stage: WriteStage::Verified,
            partial: false,
            unchanged: true,
            restarted: false,
            snapshot: None,
        });
    }

    let mut stage = WriteStage::StoreWritten;
    let restarted = restart_service(&ssh);
    if restarted {
        stage = WriteStage::RestartTriggered;
    }
    std::thread::sleep(settle);

    // After the restart the panel should have resynced the file from the
    // store; the id being gone from the file confirms convergence.
    let mut snapshot = None;
    if let Ok(path) = config_file::locate_config_path(&ssh) {
        match ssh.read_file(&path) {
            Ok(raw) => {
                if let Ok(config) = serde_json::from_str::<Value>(&raw) {
                    if !config_file::client_present_anywhere(&config, &id) {
                        stage = WriteStage::Verified;
                    } else {
                        warn!(%id, "client still in the config file -- convergence pending");
                    }
                    snapshot = Some(config);
                }
            }
            Err(e) => warn!(error = %e, "post-restart verification read failed"),
        }
    }

    Ok(WriteReport {
        stage,
        partial: false,
        unchanged: false,
        restarted,
        snapshot,
    })
}

/// Restart the panel service, falling back to the bundled CLI and then
/// the bare proxy unit. Returns whether any restart was accepted.
fn restart_service(ssh: &SshSession) -> bool {
    match ssh.exec("systemctl restart x-ui") {
        Ok((_, 0)) => {
            info!("x-ui restarted");
            if let Ok((out, _)) = ssh.exec("systemctl is-active x-ui") {
                let status = out.trim();
                if status != "active" {
                    warn!(status, "x-ui not active after restart");
                }
            }
            true
        }
        Ok((_, status)) => {
            error!(status, "systemctl restart x-ui failed -- trying alternatives");
            match ssh.exec("x-ui restart 2>&1 || systemctl restart xray 2>&1") {
                Ok((_, 0)) => {
                    info!("service restarted via fallback command");
                    true
                }
                Ok((out, status)) => {
                    error!(status, output = %out.trim(), "all restart commands failed");
                    false
                }
                Err(e) => {
                    error!(error = %e, "restart fallback failed");
                    false
                }
            }
        }
        Err(e) => {
            error!(error = %e, "restart command failed");
            false
        }
    }
}
