// ── Provisioning orchestrator ──
//
// Top-level idempotent upsert/remove: pick the backend family, enrich
// the profile from the live inbound, encode the key, perform the write,
// and hand back a receipt with the consistency verdict.
//
// Concurrency: client mutations are read-modify-write against remote
// state with no transactional guard, so all operations against the same
// inbound are serialized through an in-process async mutex keyed by
// inbound id. That is sufficient for a single-instance deployment; run
// several instances against one panel and you need a distributed lock
// instead.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use xprov_api::PanelClient;
use xprov_api::panel::PanelWrite;
use xprov_api::transport::{TlsMode, TransportConfig};

use crate::config::{BackendMode, ProvisionerConfig};
use crate::error::EngineError;
use crate::keylink;
use crate::model::{
    ClientRecord, Protocol, ProvisionReceipt, RemovalReceipt, ServerProfile, WriteReport,
    WriteStage,
};
use crate::remote::ShellBackend;

/// Which inbound an operation targets, across both backend families:
/// the API addresses inbounds by id, the shell path by (port, protocol).
#[derive(Debug, Clone, Copy)]
pub struct InboundTarget {
    pub inbound_id: u32,
    pub port: u16,
    pub protocol: Protocol,
}

// ── API backend ─────────────────────────────────────────────────────

/// The control-plane backend: panel HTTP API.
pub struct ApiBackend {
    client: PanelClient,
}

impl ApiBackend {
    pub fn new(client: PanelClient) -> Self {
        Self { client }
    }

    fn report(write: PanelWrite) -> WriteReport {
        // A panel API write persists straight into the panel's store.
        let stage = if write.unchanged || write.verified {
            WriteStage::Verified
        } else if write.restarted {
            WriteStage::RestartTriggered
        } else {
            WriteStage::StoreWritten
        };
        WriteReport {
            stage,
            partial: false,
            unchanged: write.unchanged,
            restarted: write.restarted,
            snapshot: write.config,
        }
    }
}

// ── Backend dispatch ────────────────────────────────────────────────

/// The active backend family.
pub enum Backend {
    Api(ApiBackend),
    Shell(ShellBackend),
    #[cfg(test)]
    Fake(test_support::FakeBackend),
}

impl Backend {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Api(_) => "api",
            Self::Shell(_) => "shell",
            #[cfg(test)]
            Self::Fake(_) => "fake",
        }
    }

    async fn add_client(
        &self,
        record: &ClientRecord,
        target: &InboundTarget,
    ) -> Result<WriteReport, EngineError> {
        match self {
            Self::Api(api) => {
                let write = api
                    .client
                    .add_client(
                        record.id,
                        &record.email,
                        target.inbound_id,
                        record.flow.as_deref(),
                    )
                    .await?;
                Ok(ApiBackend::report(write))
            }
            Self::Shell(shell) => shell.add_client(record, target.port).await,
            #[cfg(test)]
            Self::Fake(fake) => Ok(fake.add(record).await),
        }
    }

    async fn remove_client(
        &self,
        id: Uuid,
        target: &InboundTarget,
    ) -> Result<WriteReport, EngineError> {
        match self {
            Self::Api(api) => {
                let write = api.client.remove_client(id, target.inbound_id).await?;
                Ok(ApiBackend::report(write))
            }
            Self::Shell(shell) => shell.remove_client(id).await,
            #[cfg(test)]
            Self::Fake(fake) => Ok(fake.remove(id).await),
        }
    }

    async fn stream_settings(
        &self,
        target: &InboundTarget,
    ) -> Result<Option<Value>, EngineError> {
        match self {
            Self::Api(api) => {
                let inbound = api.client.get_inbound(target.inbound_id, false).await?;
                Ok(inbound.map(|inb| inb.stream_settings.value().clone()))
            }
            Self::Shell(shell) => shell.stream_settings(target.port, target.protocol).await,
            #[cfg(test)]
            Self::Fake(fake) => Ok(fake.stream.clone()),
        }
    }
}

// ── Failure envelope ────────────────────────────────────────────────

/// An operation failure, safe to show to end users.
///
/// The display text is deliberately generic: remote-access details stay
/// in the logs, findable by the correlation id.
#[derive(Debug, thiserror::Error)]
#[error("provisioning failed -- quote correlation id {correlation_id} to the operator")]
pub struct ProvisionFailure {
    pub correlation_id: Uuid,
    #[source]
    pub error: EngineError,
}

// ── Requests ────────────────────────────────────────────────────────

/// Parameters for an upsert; unset fields fall back to the configured
/// profile and inbound.
#[derive(Debug, Clone, Default)]
pub struct UpsertRequest {
    pub client_id: Option<Uuid>,
    pub email: Option<String>,
    pub protocol: Option<Protocol>,
    pub port: Option<u16>,
    pub inbound_id: Option<u32>,
}

// ── Provisioner ─────────────────────────────────────────────────────

/// The provisioning engine's entry point.
pub struct Provisioner {
    backend: Backend,
    profile: ServerProfile,
    inbound_id: u32,
    locks: DashMap<u32, Arc<Mutex<()>>>,
}

impl Provisioner {
    pub fn new(backend: Backend, profile: ServerProfile, inbound_id: u32) -> Self {
        Self {
            backend,
            profile,
            inbound_id,
            locks: DashMap::new(),
        }
    }

    /// Build the engine from resolved configuration, constructing the
    /// selected backend.
    pub fn from_config(config: &ProvisionerConfig) -> Result<Self, EngineError> {
        let backend = match config.backend {
            BackendMode::Api => {
                let transport = TransportConfig {
                    tls: if config.insecure {
                        TlsMode::DangerAcceptInvalid
                    } else {
                        TlsMode::System
                    },
                    timeout: config.timeout,
                    cookie_jar: None,
                };
                let client = PanelClient::new(
                    &config.panel.url,
                    config.panel.username.clone(),
                    config.panel.password.clone(),
                    &transport,
                )
                .map_err(EngineError::from)?
                .with_restart_settle(config.restart_settle);
                Backend::Api(ApiBackend::new(client))
            }
            BackendMode::Shell => {
                let ssh = config.ssh.clone().ok_or_else(|| EngineError::Config {
                    message: "the shell backend requires SSH settings".into(),
                })?;
                Backend::Shell(ShellBackend::new(
                    ssh,
                    config.fallback_inbound_index,
                    config.restart_settle,
                ))
            }
        };
        Ok(Self::new(backend, config.profile.clone(), config.inbound_id))
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Idempotently provision a client and issue its connection URI.
    ///
    /// Invoking this twice with the same id leaves exactly one client
    /// entry on the backend. The key is encoded before any remote write:
    /// a profile that cannot produce a working URI aborts the operation.
    pub async fn upsert(&self, request: UpsertRequest) -> Result<ProvisionReceipt, ProvisionFailure> {
        let target = self.resolve_target(&request);
        let client_id = request.client_id.unwrap_or_else(Uuid::new_v4);

        let _guard = self.lock_inbound(target.inbound_id).await;

        let mut profile = self.profile.clone();
        profile.port = target.port;
        profile.protocol = target.protocol;
        match self.backend.stream_settings(&target).await {
            Ok(Some(stream)) => profile.enrich_from_stream_settings(&stream),
            Ok(None) => debug!("no stream settings available for enrichment"),
            Err(e) => warn!(error = %e, "could not read stream settings for enrichment"),
        }

        let key = keylink::encode(&profile, Some(client_id))
            .map_err(|e| self.fail(e, &target, Some(client_id)))?;

        let record = ClientRecord::new(
            client_id,
            request.email.clone(),
            target.protocol,
            profile.flow.clone(),
        );
        let report = self
            .backend
            .add_client(&record, &target)
            .await
            .map_err(|e| self.fail(e, &target, Some(client_id)))?;

        let outcome = report.outcome();
        info!(
            %client_id,
            inbound_id = target.inbound_id,
            backend = self.backend.label(),
            %outcome,
            stage = %report.stage,
            "upsert finished"
        );
        Ok(ProvisionReceipt {
            client_id,
            email: record.email,
            uri: key.uri,
            outcome,
            stage: report.stage,
            restarted: report.restarted,
            profile,
            snapshot: report.snapshot,
            issued_at: Utc::now(),
        })
    }

    /// Remove a client from the active backend's store surface.
    /// An already-absent id is a success.
    pub async fn remove(&self, client_id: Uuid) -> Result<RemovalReceipt, ProvisionFailure> {
        let target = self.resolve_target(&UpsertRequest::default());

        let _guard = self.lock_inbound(target.inbound_id).await;

        let report = self
            .backend
            .remove_client(client_id, &target)
            .await
            .map_err(|e| self.fail(e, &target, Some(client_id)))?;

        let outcome = report.outcome();
        info!(
            %client_id,
            inbound_id = target.inbound_id,
            backend = self.backend.label(),
            %outcome,
            "remove finished"
        );
        Ok(RemovalReceipt {
            client_id,
            outcome,
            stage: report.stage,
            was_present: !report.unchanged,
        })
    }

    /// Fetch the target inbound for inspection: the decoded descriptor
    /// view on the API backend, the raw config-file object on the shell
    /// backend.
    pub async fn inspect(
        &self,
        inbound_id: Option<u32>,
    ) -> Result<Option<Value>, ProvisionFailure> {
        let target = self.resolve_target(&UpsertRequest {
            inbound_id,
            ..UpsertRequest::default()
        });
        let view = match &self.backend {
            Backend::Api(api) => api
                .client
                .get_inbound(target.inbound_id, true)
                .await
                .map_err(EngineError::from)
                .map_err(|e| self.fail(e, &target, None))?
                .map(|inb| inb.decoded_view()),
            Backend::Shell(shell) => shell
                .inspect_inbound(target.port, target.protocol)
                .await
                .map_err(|e| self.fail(e, &target, None))?,
            #[cfg(test)]
            Backend::Fake(_) => None,
        };
        Ok(view)
    }

    /// Probe whether the backend's control surface is reachable and the
    /// proxy is serving.
    pub async fn check_status(&self) -> Result<bool, ProvisionFailure> {
        let target = self.resolve_target(&UpsertRequest::default());
        match &self.backend {
            Backend::Api(api) => match api.client.get_xray_config().await {
                Ok(_) => Ok(true),
                Err(e) if matches!(e, xprov_api::Error::Discovery { .. }) => Ok(false),
                Err(e) => Err(self.fail(EngineError::from(e), &target, None)),
            },
            Backend::Shell(shell) => shell
                .check_status()
                .await
                .map_err(|e| self.fail(e, &target, None)),
            #[cfg(test)]
            Backend::Fake(_) => Ok(true),
        }
    }

    fn resolve_target(&self, request: &UpsertRequest) -> InboundTarget {
        InboundTarget {
            inbound_id: request.inbound_id.unwrap_or(self.inbound_id),
            port: request.port.unwrap_or(self.profile.port),
            protocol: request.protocol.unwrap_or(self.profile.protocol),
        }
    }

    /// Serialize all mutations against one inbound id.
    async fn lock_inbound(&self, inbound_id: u32) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(inbound_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    fn fail(
        &self,
        error: EngineError,
        target: &InboundTarget,
        client_id: Option<Uuid>,
    ) -> ProvisionFailure {
        let correlation_id = Uuid::new_v4();
        error!(
            %correlation_id,
            inbound_id = target.inbound_id,
            client_id = ?client_id,
            backend = self.backend.label(),
            error = %error,
            "provisioning operation failed"
        );
        ProvisionFailure {
            correlation_id,
            error,
        }
    }
}

// ── Test support ────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::time::Duration;

    /// In-memory backend that mimics the remote read-modify-write: the
    /// whole client list is read, mutated, and written back, with an
    /// optional delay in between. Without external serialization two
    /// concurrent adds overwrite each other -- exactly the hazard the
    /// per-inbound mutex exists for.
    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub(crate) state: std::sync::Mutex<Vec<Uuid>>,
        pub(crate) stream: Option<Value>,
        pub(crate) write_delay: Duration,
    }

    impl FakeBackend {
        pub(crate) fn client_ids(&self) -> Vec<Uuid> {
            self.state.lock().expect("state lock").clone()
        }

        pub(crate) async fn add(&self, record: &ClientRecord) -> WriteReport {
            let list = self.client_ids();
            if list.contains(&record.id) {
                return report(true);
            }
            tokio::time::sleep(self.write_delay).await;
            let mut list = list;
            list.push(record.id);
            *self.state.lock().expect("state lock") = list;
            report(false)
        }

        pub(crate) async fn remove(&self, id: Uuid) -> WriteReport {
            let list = self.client_ids();
            if !list.contains(&id) {
                return report(true);
            }
            tokio::time::sleep(self.write_delay).await;
            let list: Vec<Uuid> = list.into_iter().filter(|c| *c != id).collect();
            *self.state.lock().expect("state lock") = list;
            report(false)
        }
    }

    fn report(unchanged: bool) -> WriteReport {
        WriteReport {
            stage: WriteStage::Verified,
            partial: false,
            unchanged,
            restarted: !unchanged,
            snapshot: None,
        }
    }
}
