// One issued credential, and its two JSON representations: the panel's
// settings entry (full bookkeeping fields) and the live proxy config's
// leaner client object.

use serde_json::{Value, json};
use uuid::Uuid;

use crate::model::profile::Protocol;

/// A client record as the engine provisions it.
///
/// At most one record exists per (inbound, id) pair; the engine's
/// read-before-write enforces that. The email doubles as a
/// human-readable label and must be unique per inbound.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub id: Uuid,
    pub email: String,
    pub protocol: Protocol,
    /// Flow tag, vless only.
    pub flow: Option<String>,
    /// Always 0 when present; vmess only.
    pub alter_id: Option<u16>,
    pub enable: bool,
    /// Unix millis; 0 means no expiry.
    pub expiry_time: i64,
    pub limit_ip: u32,
    pub total_gb: u64,
}

impl ClientRecord {
    /// Build a record with the engine's defaults. The email label falls
    /// back to `user_<first-8-uuid-chars>` when none is supplied.
    pub fn new(id: Uuid, email: Option<String>, protocol: Protocol, flow: Option<String>) -> Self {
        let email = email.unwrap_or_else(|| Self::derived_email(&id));
        Self {
            id,
            email,
            protocol,
            flow: match protocol {
                Protocol::Vless => flow,
                Protocol::Vmess => None,
            },
            alter_id: match protocol {
                Protocol::Vmess => Some(0),
                Protocol::Vless => None,
            },
            enable: true,
            expiry_time: 0,
            limit_ip: 0,
            total_gb: 0,
        }
    }

    /// The deterministic fallback label for an id.
    pub fn derived_email(id: &Uuid) -> String {
        format!("user_{}", &id.to_string()[..8])
    }

    /// The panel's settings-entry shape, with all bookkeeping fields.
    pub fn panel_object(&self) -> Value {
        let mut obj = json!({
            "id": self.id.to_string(),
            "email": self.email,
            "enable": self.enable,
            "expiryTime": self.expiry_time,
            "limitIp": self.limit_ip,
            "totalGB": self.total_gb,
            "tgId": "",
            "subId": "",
        });
        match self.protocol {
            Protocol::Vless => {
                obj["flow"] = json!(self.flow.as_deref().unwrap_or(""));
            }
            Protocol::Vmess => {
                obj["alterId"] = json!(self.alter_id.unwrap_or(0));
            }
        }
        obj
    }

    /// The live proxy config file's client shape: only the fields the
    /// proxy itself reads.
    pub fn config_object(&self) -> Value {
        match self.protocol {
            Protocol::Vless => {
                let mut obj = json!({
                    "id": self.id.to_string(),
                    "email": self.email,
                });
                if let Some(flow) = self.flow.as_deref().filter(|f| !f.is_empty()) {
                    obj["flow"] = json!(flow);
                }
                obj
            }
            Protocol::Vmess => json!({
                "id": self.id.to_string(),
                "alterId": self.alter_id.unwrap_or(0),
                "email": self.email,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn vless_config_object_omits_empty_flow() {
        let id: Uuid = "11111111-1111-1111-1111-111111111111".parse().expect("uuid");
        let record = ClientRecord::new(id, None, Protocol::Vless, None);
        assert_eq!(record.email, "user_11111111");
        assert_eq!(
            record.config_object(),
            json!({ "id": id.to_string(), "email": "user_11111111" })
        );
    }

    #[test]
    fn vmess_record_always_carries_alter_id_zero() {
        let id = Uuid::new_v4();
        let record = ClientRecord::new(id, Some("label".into()), Protocol::Vmess, Some("ignored".into()));
        assert_eq!(record.alter_id, Some(0));
        assert!(record.flow.is_none());
        assert_eq!(record.config_object()["alterId"], json!(0));
    }

    #[test]
    fn panel_object_is_protocol_appropriate() {
        let id = Uuid::new_v4();
        let vless = ClientRecord::new(id, None, Protocol::Vless, Some("xtls-rprx-vision".into()));
        assert_eq!(vless.panel_object()["flow"], json!("xtls-rprx-vision"));
        assert!(vless.panel_object().get("alterId").is_none());

        let vmess = ClientRecord::new(id, None, Protocol::Vmess, None);
        assert_eq!(vmess.panel_object()["alterId"], json!(0));
        assert!(vmess.panel_object().get("flow").is_none());
    }
}
