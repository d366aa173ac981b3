// Server-side connection profile.
//
// A profile starts from static configuration and may be enriched at
// runtime with parameters discovered from the live inbound -- panels
// are the source of truth for Reality material, with one exception:
// they store only the *private* key server-side, so the public key a
// client needs usually has to come from configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use tracing::{debug, info, warn};

/// Tunnel protocol of an issued credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Protocol {
    #[default]
    Vless,
    Vmess,
}

/// Transport network of the inbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TransportNetwork {
    #[default]
    Tcp,
    Ws,
}

/// Security mode of the inbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SecurityMode {
    #[default]
    None,
    Tls,
    Reality,
}

/// Reality camouflage parameters shared between server and client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealityProfile {
    /// SNI the client presents (`serverNames[0]` on the inbound).
    pub server_name: Option<String>,
    /// TLS fingerprint to mimic; clients default this when absent.
    pub fingerprint: Option<String>,
    /// Public key (`pbk`). Required to issue a working key.
    pub public_key: Option<String>,
    /// Short ids, comma-separated as panels export them; the first one
    /// goes into the key.
    pub short_ids: Option<String>,
    /// SpiderX path (`spx`), optional.
    pub spider_path: Option<String>,
}

fn default_location() -> String {
    "VPN Server".into()
}

/// One server's connection parameters, as far as key issuance needs them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerProfile {
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub network: TransportNetwork,
    #[serde(default)]
    pub security: SecurityMode,
    #[serde(default)]
    pub sni: Option<String>,
    /// WebSocket path, `ws` transport only.
    #[serde(default)]
    pub ws_path: Option<String>,
    /// Flow tag (e.g. `xtls-rprx-vision`), vless only.
    #[serde(default)]
    pub flow: Option<String>,
    #[serde(default)]
    pub reality: Option<RealityProfile>,
    /// Human-readable location label, used as the key remark.
    #[serde(default = "default_location")]
    pub location: String,
}

impl ServerProfile {
    /// The SNI to put into network-level fields, falling back to the
    /// server address the way clients expect.
    pub fn effective_sni(&self) -> &str {
        self.sni.as_deref().unwrap_or(&self.address)
    }

    /// Merge security parameters discovered from a live inbound's
    /// `streamSettings` object.
    ///
    /// Inbound values win for everything except the public key: the
    /// configured value is kept when the inbound only exposes a private
    /// key (the usual case -- see module docs).
    pub fn enrich_from_stream_settings(&mut self, stream: &Value) {
        let Some(security) = stream.get("security").and_then(Value::as_str) else {
            return;
        };
        if security != "reality" {
            if security == "tls" && self.security == SecurityMode::None {
                debug!("inbound reports security=tls");
                self.security = SecurityMode::Tls;
            }
            return;
        }

        self.security = SecurityMode::Reality;
        let reality = self.reality.get_or_insert_with(RealityProfile::default);
        let Some(settings) = stream.get("realitySettings") else {
            warn!("inbound reports security=reality but has no realitySettings");
            return;
        };

        if let Some(name) = settings
            .get("serverNames")
            .and_then(Value::as_array)
            .and_then(|names| names.first())
            .and_then(Value::as_str)
        {
            reality.server_name = Some(name.to_owned());
        }
        if let Some(fp) = settings
            .get("fingerprint")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
        {
            reality.fingerprint = Some(fp.to_owned());
        }
        if let Some(sid) = settings
            .get("shortIds")
            .and_then(Value::as_array)
            .and_then(|ids| ids.first())
            .and_then(Value::as_str)
        {
            reality.short_ids = Some(sid.to_owned());
        }
        if let Some(spx) = settings
            .get("spiderX")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
        {
            reality.spider_path = Some(spx.to_owned());
        }

        let public_key = settings
            .get("publicKey")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        match (public_key, reality.public_key.is_some()) {
            (Some(pbk), _) => {
                info!("using public key exposed by the inbound");
                reality.public_key = Some(pbk.to_owned());
            }
            (None, true) => debug!("inbound has no public key -- keeping the configured one"),
            (None, false) => {
                let has_private = settings
                    .get("privateKey")
                    .and_then(Value::as_str)
                    .is_some_and(|s| !s.is_empty());
                if has_private {
                    warn!(
                        "inbound exposes only a private key and no public key is configured -- \
                         key issuance will fail until one is supplied"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_profile() -> ServerProfile {
        ServerProfile {
            address: "203.0.113.5".into(),
            port: 443,
            protocol: Protocol::Vless,
            network: TransportNetwork::Tcp,
            security: SecurityMode::None,
            sni: None,
            ws_path: None,
            flow: None,
            reality: None,
            location: "NL-1".into(),
        }
    }

    #[test]
    fn enrichment_fills_reality_fields_from_inbound() {
        let mut profile = base_profile();
        profile.enrich_from_stream_settings(&json!({
            "security": "reality",
            "realitySettings": {
                "serverNames": ["example.com", "alt.example.com"],
                "shortIds": ["a1", "b2"],
                "fingerprint": "chrome",
                "publicKey": "PUB",
                "spiderX": "/",
            }
        }));

        assert_eq!(profile.security, SecurityMode::Reality);
        let reality = profile.reality.expect("reality set");
        assert_eq!(reality.server_name.as_deref(), Some("example.com"));
        assert_eq!(reality.short_ids.as_deref(), Some("a1"));
        assert_eq!(reality.fingerprint.as_deref(), Some("chrome"));
        assert_eq!(reality.public_key.as_deref(), Some("PUB"));
        assert_eq!(reality.spider_path.as_deref(), Some("/"));
    }

    #[test]
    fn configured_public_key_survives_private_key_only_inbound() {
        let mut profile = base_profile();
        profile.reality = Some(RealityProfile {
            public_key: Some("CONFIGURED".into()),
            ..RealityProfile::default()
        });
        profile.enrich_from_stream_settings(&json!({
            "security": "reality",
            "realitySettings": {
                "serverNames": ["example.com"],
                "shortIds": ["a1"],
                "privateKey": "PRIV",
            }
        }));

        let reality = profile.reality.expect("reality kept");
        assert_eq!(reality.public_key.as_deref(), Some("CONFIGURED"));
    }

    #[test]
    fn non_reality_stream_settings_leave_profile_alone() {
        let mut profile = base_profile();
        profile.enrich_from_stream_settings(&json!({ "security": "none" }));
        assert_eq!(profile.security, SecurityMode::None);
        assert!(profile.reality.is_none());
    }

    #[test]
    fn protocol_parses_case_insensitively() {
        assert_eq!("VLESS".parse::<Protocol>().ok(), Some(Protocol::Vless));
        assert_eq!("vmess".parse::<Protocol>().ok(), Some(Protocol::Vmess));
    }
}
