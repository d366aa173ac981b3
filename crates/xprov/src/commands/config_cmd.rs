use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;

const STARTER_CONFIG: &str = r#"# xprov configuration
#
# default_profile = "edge"
#
# [profiles.edge]
# panel_url = "https://203.0.113.5:2053/"
# username = "admin"
# # password = "..."           # or password_env = "PANEL_PASSWORD", or keyring
# inbound_id = 1
# backend = "api"              # "api" or "shell"
#
# [profiles.edge.ssh]          # required for backend = "shell"
# host = "203.0.113.5"
# username = "root"
# key_path = "/home/me/.ssh/id_ed25519"
#
# [profiles.edge.server]
# address = "203.0.113.5"
# port = 443
# protocol = "vless"           # "vless" or "vmess"
# network = "tcp"              # "tcp" or "ws"
# security = "reality"         # "none", "tls", or "reality"
# location = "NL-1"
#
# [profiles.edge.server.reality]
# server_name = "example.com"
# public_key = "..."           # the panel only stores the private key
# short_ids = "a1,b2"
"#;

pub fn handle(args: ConfigArgs, _global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            println!("{}", xprov_config::config_path().display());
            Ok(())
        }

        ConfigCommand::Show => {
            let mut cfg = xprov_config::load_config_or_default();
            for profile in cfg.profiles.values_mut() {
                if profile.password.is_some() {
                    profile.password = Some("***".into());
                }
                if let Some(ssh) = profile.ssh.as_mut() {
                    if ssh.password.is_some() {
                        ssh.password = Some("***".into());
                    }
                }
            }
            let rendered = toml::to_string_pretty(&cfg)
                .map_err(|e| CliError::Config {
                    message: format!("could not render config: {e}"),
                })?;
            println!("{rendered}");
            Ok(())
        }

        ConfigCommand::Init => {
            let path = xprov_config::config_path();
            if path.exists() {
                return Err(CliError::Validation {
                    field: "config".into(),
                    reason: format!("{} already exists", path.display()),
                });
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, STARTER_CONFIG)?;
            println!("wrote {}", path.display());
            Ok(())
        }
    }
}
