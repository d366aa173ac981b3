// xprov-core: provisioning and reconciliation engine between xprov-api,
// the shell-path editors, and consumers (CLI).

pub mod config;
pub mod engine;
pub mod error;
pub mod keylink;
pub mod model;
pub mod remote;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{BackendMode, PanelSettings, ProvisionerConfig, SshAuth, SshSettings};
pub use engine::{ApiBackend, Backend, InboundTarget, ProvisionFailure, Provisioner, UpsertRequest};
pub use error::EngineError;
pub use keylink::{EncodedKey, encode};
pub use remote::ShellBackend;

// Re-export model types at the crate root for ergonomics.
pub use model::{
    ClientRecord, Protocol, ProvisionOutcome, ProvisionReceipt, RealityProfile, RemovalReceipt,
    SecurityMode, ServerProfile, TransportNetwork, WriteReport, WriteStage,
};
