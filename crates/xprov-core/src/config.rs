// ── Engine configuration ──
//
// The resolved, typed configuration the engine is constructed from.
// Loading, profile files, and credential resolution live in
// `xprov-config`; this module only defines what the engine needs.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::model::ServerProfile;

/// Which backend family performs remote mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    /// The panel's control-plane HTTP API.
    Api,
    /// Direct config-file + embedded-store surgery over SSH.
    Shell,
}

/// Panel control-plane connection settings.
#[derive(Debug, Clone)]
pub struct PanelSettings {
    /// Panel URL, possibly including a web base path
    /// (`https://host:2053/prefix/`).
    pub url: Url,
    pub username: String,
    pub password: SecretString,
}

/// SSH credential material for the shell-path backend.
#[derive(Debug, Clone)]
pub enum SshAuth {
    Password(SecretString),
    KeyFile(PathBuf),
}

/// SSH connection settings for the shell-path backend.
#[derive(Debug, Clone)]
pub struct SshSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
    pub connect_timeout: Duration,
}

impl SshSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Everything the engine needs to operate against one deployment.
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    pub backend: BackendMode,
    pub panel: PanelSettings,
    /// Required when `backend` is [`BackendMode::Shell`].
    pub ssh: Option<SshSettings>,
    /// The server profile keys are issued against.
    pub profile: ServerProfile,
    /// The panel inbound provisioning targets by default.
    pub inbound_id: u32,
    /// Last-resort positional inbound index for the shell path when
    /// (port, protocol) matching fails. Deployment-specific and fragile;
    /// unset by default and loudly logged when used.
    pub fallback_inbound_index: Option<usize>,
    /// How long to let the proxy settle after a restart before
    /// verification reads.
    pub restart_settle: Duration,
    /// Per-request timeout for panel HTTP calls.
    pub timeout: Duration,
    /// Accept invalid TLS certificates on the panel (self-signed
    /// deployments).
    pub insecure: bool,
}

impl ProvisionerConfig {
    pub const DEFAULT_RESTART_SETTLE: Duration = Duration::from_secs(3);
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
}
