// Bridges the config file and CLI flags into the engine configuration.

use std::io::IsTerminal;

use xprov_config::{Config, ConfigError};
use xprov_core::ProvisionerConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The profile the invocation targets: CLI flag, then the config file's
/// default, then "default".
pub fn active_profile_name(global: &GlobalOpts, cfg: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| cfg.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Resolve the active profile into an engine configuration, prompting
/// for the panel password when nothing else supplies one and we are on
/// a terminal.
pub fn resolve_engine_config(global: &GlobalOpts) -> Result<(String, ProvisionerConfig), CliError> {
    let cfg = xprov_config::load_config_or_default();
    let name = active_profile_name(global, &cfg);

    let Some(profile) = cfg.profiles.get(&name) else {
        if cfg.profiles.is_empty() {
            return Err(CliError::NoConfig {
                path: xprov_config::config_path().display().to_string(),
            });
        }
        let mut available: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
        available.sort_unstable();
        return Err(CliError::ProfileNotFound {
            name,
            available: available.join(", "),
        });
    };

    let mut resolved = match xprov_config::profile_to_provisioner_config(profile, &name, &cfg.defaults)
    {
        Ok(resolved) => resolved,
        Err(ConfigError::NoCredentials { .. }) if std::io::stdin().is_terminal() => {
            let password =
                rpassword::prompt_password(format!("Panel password for profile '{name}': "))?;
            let mut profile = profile.clone();
            profile.password = Some(password);
            xprov_config::profile_to_provisioner_config(&profile, &name, &cfg.defaults)?
        }
        Err(e) => return Err(e.into()),
    };

    // Global flags override whatever the profile resolved to.
    if global.insecure {
        resolved.insecure = true;
    }
    if let Some(timeout) = global.timeout {
        resolved.timeout = std::time::Duration::from_secs(timeout);
    }
    Ok((name, resolved))
}
