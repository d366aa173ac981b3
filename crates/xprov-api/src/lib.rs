// xprov-api: Async Rust client for the 3x-ui panel's control-plane HTTP API

pub mod cache;
pub mod error;
pub mod panel;
pub mod session;
pub mod transport;

pub use cache::InboundCache;
pub use error::Error;
pub use panel::PanelClient;
pub use panel::models::{InboundDescriptor, JsonBlob, PanelEnvelope};
