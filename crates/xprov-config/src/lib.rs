//! Shared configuration for the xprov CLI.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to `xprov_core::ProvisionerConfig`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use xprov_core::{
    BackendMode, PanelSettings, ProvisionerConfig, ServerProfile, SshAuth, SshSettings,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named deployment profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Panels almost always sit behind self-signed TLS.
    #[serde(default = "default_insecure")]
    pub insecure: bool,

    /// Seconds to let the proxy settle after a restart.
    #[serde(default = "default_restart_settle")]
    pub restart_settle: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            insecure: default_insecure(),
            restart_settle: default_restart_settle(),
        }
    }
}

fn default_timeout() -> u64 {
    60
}
fn default_insecure() -> bool {
    true
}
fn default_restart_settle() -> u64 {
    3
}
fn default_ssh_port() -> u16 {
    22
}
fn default_inbound_id() -> u32 {
    1
}
fn default_backend() -> String {
    "api".into()
}

/// One deployment: a panel, its target inbound, and the server profile
/// keys are issued against.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Panel URL, web base path included when the deployment hides the
    /// panel behind one (e.g. "https://203.0.113.5:2053/secret/").
    pub panel_url: String,

    pub username: String,

    /// Panel password (plaintext -- prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name holding the panel password.
    pub password_env: Option<String>,

    /// Panel inbound id provisioning targets.
    #[serde(default = "default_inbound_id")]
    pub inbound_id: u32,

    /// Backend family: "api" or "shell".
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Last-resort positional inbound index for the shell path.
    pub fallback_inbound_index: Option<usize>,

    /// Override the global timeout.
    pub timeout: Option<u64>,

    /// Override the global insecure-TLS setting.
    pub insecure: Option<bool>,

    /// SSH access, required for the shell backend.
    pub ssh: Option<SshProfile>,

    /// The server's connection parameters.
    pub server: ServerProfile,
}

/// SSH access to the proxy host.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SshProfile {
    pub host: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    pub username: String,

    /// SSH password (plaintext -- prefer keyring, env var, or a key).
    pub password: Option<String>,

    /// Environment variable name holding the SSH password.
    pub password_env: Option<String>,

    /// Private key file; takes precedence over any password.
    pub key_path: Option<PathBuf>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "xprov", "xprov").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("xprov");
    p
}

// ── Config loading / saving ─────────────────────────────────────────

/// Load the full Config from file + environment (`XPROV_` prefix).
pub fn load_config() -> Result<Config, ConfigError> {
    let path = config_path();

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("XPROV_").split("_"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(&path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the panel password: named env var, then keyring, then
/// plaintext config.
pub fn resolve_panel_password(
    profile: &Profile,
    profile_name: &str,
) -> Result<SecretString, ConfigError> {
    if let Some(ref env_name) = profile.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    if let Ok(entry) = keyring::Entry::new("xprov", &format!("{profile_name}/panel-password")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    if let Some(ref password) = profile.password {
        return Ok(SecretString::from(password.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Resolve SSH auth material: key file first, then the password chain.
pub fn resolve_ssh_auth(ssh: &SshProfile, profile_name: &str) -> Result<SshAuth, ConfigError> {
    if let Some(ref key_path) = ssh.key_path {
        return Ok(SshAuth::KeyFile(key_path.clone()));
    }

    if let Some(ref env_name) = ssh.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SshAuth::Password(SecretString::from(val)));
        }
    }

    if let Ok(entry) = keyring::Entry::new("xprov", &format!("{profile_name}/ssh-password")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SshAuth::Password(SecretString::from(secret)));
        }
    }

    if let Some(ref password) = ssh.password {
        return Ok(SshAuth::Password(SecretString::from(password.clone())));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

// ── Translation to the engine config ────────────────────────────────

/// Build a `ProvisionerConfig` from a profile.
pub fn profile_to_provisioner_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ProvisionerConfig, ConfigError> {
    let url: url::Url = profile
        .panel_url
        .parse()
        .map_err(|_| ConfigError::Validation {
            field: "panel_url".into(),
            reason: format!("invalid URL: {}", profile.panel_url),
        })?;

    let backend = match profile.backend.as_str() {
        "api" => BackendMode::Api,
        "shell" => BackendMode::Shell,
        other => {
            return Err(ConfigError::Validation {
                field: "backend".into(),
                reason: format!("expected 'api' or 'shell', got '{other}'"),
            });
        }
    };

    let password = resolve_panel_password(profile, profile_name)?;

    let ssh = match (&profile.ssh, backend) {
        (Some(ssh), _) => Some(SshSettings {
            host: ssh.host.clone(),
            port: ssh.port,
            username: ssh.username.clone(),
            auth: resolve_ssh_auth(ssh, profile_name)?,
            connect_timeout: Duration::from_secs(10),
        }),
        (None, BackendMode::Shell) => {
            return Err(ConfigError::Validation {
                field: "ssh".into(),
                reason: "the shell backend requires an [profiles.<name>.ssh] section".into(),
            });
        }
        (None, BackendMode::Api) => None,
    };

    Ok(ProvisionerConfig {
        backend,
        panel: PanelSettings {
            url,
            username: profile.username.clone(),
            password,
        },
        ssh,
        profile: profile.server.clone(),
        inbound_id: profile.inbound_id,
        fallback_inbound_index: profile.fallback_inbound_index,
        restart_settle: Duration::from_secs(defaults.restart_settle),
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
        insecure: profile.insecure.unwrap_or(defaults.insecure),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use xprov_core::{Protocol, SecurityMode};

    const SAMPLE: &str = r#"
        default_profile = "edge"

        [defaults]
        timeout = 30

        [profiles.edge]
        panel_url = "https://203.0.113.5:2053/secret/"
        username = "admin"
        password = "hunter2"
        inbound_id = 3
        backend = "shell"

        [profiles.edge.ssh]
        host = "203.0.113.5"
        username = "root"
        password = "ssh-secret"

        [profiles.edge.server]
        address = "203.0.113.5"
        port = 443
        protocol = "vless"
        security = "reality"
        location = "NL-1"

        [profiles.edge.server.reality]
        server_name = "example.com"
        public_key = "PUB"
        short_ids = "a1,b2"
    "#;

    fn parse(toml: &str) -> Config {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(toml))
            .extract()
            .expect("valid config")
    }

    #[test]
    fn sample_profile_round_trips_into_engine_config() {
        let config = parse(SAMPLE);
        assert_eq!(config.default_profile.as_deref(), Some("edge"));

        let profile = config.profiles.get("edge").expect("profile exists");
        let resolved = profile_to_provisioner_config(profile, "edge", &config.defaults)
            .expect("resolves");

        assert_eq!(resolved.backend, BackendMode::Shell);
        assert_eq!(resolved.inbound_id, 3);
        assert_eq!(resolved.timeout, Duration::from_secs(30));
        assert_eq!(resolved.panel.url.path(), "/secret/");
        assert_eq!(resolved.profile.protocol, Protocol::Vless);
        assert_eq!(resolved.profile.security, SecurityMode::Reality);
        assert_eq!(
            resolved
                .profile
                .reality
                .as_ref()
                .and_then(|r| r.public_key.as_deref()),
            Some("PUB")
        );
        assert!(resolved.ssh.is_some());
    }

    #[test]
    fn shell_backend_without_ssh_section_is_rejected() {
        let config = parse(
            r#"
            [profiles.bad]
            panel_url = "http://203.0.113.5:2053"
            username = "admin"
            password = "x"
            backend = "shell"

            [profiles.bad.server]
            address = "203.0.113.5"
            port = 443
        "#,
        );
        let profile = config.profiles.get("bad").expect("profile exists");
        let result = profile_to_provisioner_config(profile, "bad", &config.defaults);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let config = parse(
            r#"
            [profiles.bad]
            panel_url = "http://203.0.113.5:2053"
            username = "admin"
            password = "x"
            backend = "carrier-pigeon"

            [profiles.bad.server]
            address = "203.0.113.5"
            port = 443
        "#,
        );
        let profile = config.profiles.get("bad").expect("profile exists");
        let result = profile_to_provisioner_config(profile, "bad", &config.defaults);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn missing_credentials_surface_as_no_credentials() {
        let config = parse(
            r#"
            [profiles.bare]
            panel_url = "http://203.0.113.5:2053"
            username = "admin"

            [profiles.bare.server]
            address = "203.0.113.5"
            port = 443
        "#,
        );
        let profile = config.profiles.get("bare").expect("profile exists");
        let result = profile_to_provisioner_config(profile, "bare", &config.defaults);
        assert!(matches!(result, Err(ConfigError::NoCredentials { .. })));
    }

    #[test]
    fn server_section_defaults_are_sensible() {
        let config = parse(
            r#"
            [profiles.min]
            panel_url = "http://203.0.113.5:2053"
            username = "admin"
            password = "x"

            [profiles.min.server]
            address = "203.0.113.5"
            port = 443
        "#,
        );
        let profile = config.profiles.get("min").expect("profile exists");
        assert_eq!(profile.inbound_id, 1);
        assert_eq!(profile.backend, "api");
        assert_eq!(profile.server.location, "VPN Server");
        assert_eq!(profile.server.protocol, Protocol::Vless);
    }
}
