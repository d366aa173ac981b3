pub mod client;
pub mod profile;
pub mod receipt;

pub use client::ClientRecord;
pub use profile::{Protocol, RealityProfile, SecurityMode, ServerProfile, TransportNetwork};
pub use receipt::{ProvisionOutcome, ProvisionReceipt, RemovalReceipt, WriteReport, WriteStage};
