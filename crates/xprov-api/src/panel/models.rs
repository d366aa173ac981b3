// Wire models for the panel API.
//
// The panel wraps every response in a `{ success, msg, obj }` envelope,
// and stores the interesting parts of an inbound (`settings`,
// `streamSettings`, `sniffing`) as JSON *strings* inside the JSON. The
// string form is authoritative: updates must submit strings, and the
// original encoding must round-trip untouched wherever we did not
// deliberately change it -- re-serializing a parsed `streamSettings` has
// been observed to drop Reality key material on some panel versions.

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// The `{ success, msg, obj }` envelope around every panel response.
#[derive(Debug, Clone, Deserialize)]
pub struct PanelEnvelope {
    pub success: bool,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub obj: Value,
}

// ── JsonBlob ────────────────────────────────────────────────────────

/// A sub-object the panel ships string-encoded.
///
/// Keeps both the parsed value (for reads) and, when the panel sent a
/// string, the exact original text (for writes). Mutating the value via
/// [`replace`](Self::replace) drops the original text, which is only
/// ever done for `settings` -- `streamSettings` and `sniffing` are
/// treated as opaque and re-emitted verbatim.
#[derive(Debug, Clone, Default)]
pub struct JsonBlob {
    raw: Option<String>,
    value: Value,
}

impl JsonBlob {
    pub fn from_wire(wire: Value) -> Self {
        match wire {
            Value::String(raw) => {
                let value = serde_json::from_str(&raw).unwrap_or(Value::Null);
                Self {
                    raw: Some(raw),
                    value,
                }
            }
            other => Self {
                raw: None,
                value: other,
            },
        }
    }

    /// The decoded object (may be `Null` if the original string did not parse).
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The original panel-sent text, when the panel sent a string.
    pub fn original(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    /// The string form to submit back to the panel: the original text
    /// when one was captured, otherwise the serialized value.
    pub fn encoded(&self) -> String {
        match &self.raw {
            Some(raw) => raw.clone(),
            None if self.value.is_null() => "{}".into(),
            None => self.value.to_string(),
        }
    }

    /// Replace the decoded value. Drops the original text -- callers must
    /// only do this for blobs they intend to re-encode.
    pub fn replace(&mut self, value: Value) {
        self.raw = None;
        self.value = value;
    }

    pub fn is_empty(&self) -> bool {
        match &self.value {
            Value::Null => self.raw.is_none(),
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

impl<'de> Deserialize<'de> for JsonBlob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_wire(Value::deserialize(deserializer)?))
    }
}

impl Serialize for JsonBlob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encoded())
    }
}

// ── InboundDescriptor ───────────────────────────────────────────────

fn default_enable() -> bool {
    true
}

/// One inbound (listener) as the panel reports it.
///
/// Fields the engine never touches (`up`, `down`, `total`,
/// `clientStats`, `expiryTime`, ...) are carried in `extra` so an
/// update submits the complete object back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundDescriptor {
    pub id: u32,
    pub port: u16,
    pub protocol: String,
    #[serde(default)]
    pub remark: String,
    #[serde(default = "default_enable")]
    pub enable: bool,
    #[serde(default)]
    pub listen: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub settings: JsonBlob,
    #[serde(rename = "streamSettings", default)]
    pub stream_settings: JsonBlob,
    #[serde(default)]
    pub sniffing: JsonBlob,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InboundDescriptor {
    /// The decoded client list, empty when `settings` has none.
    pub fn clients(&self) -> &[Value] {
        self.settings
            .value()
            .get("clients")
            .and_then(Value::as_array)
            .map_or(&[], Vec::as_slice)
    }

    pub fn has_client(&self, id: &Uuid) -> bool {
        let id = id.to_string();
        self.clients()
            .iter()
            .any(|c| c.get("id").and_then(Value::as_str) == Some(id.as_str()))
    }

    pub fn has_email(&self, email: &str) -> bool {
        self.clients()
            .iter()
            .any(|c| c.get("email").and_then(Value::as_str) == Some(email))
    }

    /// Append a client object, re-encoding `settings` (and only `settings`).
    pub fn push_client(&mut self, client: Value) {
        let mut settings = match self.settings.value() {
            Value::Object(map) => Value::Object(map.clone()),
            _ => json!({}),
        };
        match settings.get_mut("clients").and_then(Value::as_array_mut) {
            Some(clients) => clients.push(client),
            None => {
                settings["clients"] = json!([client]);
            }
        }
        self.settings.replace(settings);
    }

    /// Remove a client by id. Returns `false` when the id was absent
    /// (in which case `settings` is left untouched).
    pub fn remove_client(&mut self, id: &Uuid) -> bool {
        let id = id.to_string();
        let mut settings = match self.settings.value() {
            Value::Object(map) => Value::Object(map.clone()),
            _ => return false,
        };
        let Some(clients) = settings.get_mut("clients").and_then(Value::as_array_mut) else {
            return false;
        };
        let before = clients.len();
        clients.retain(|c| c.get("id").and_then(Value::as_str) != Some(id.as_str()));
        if clients.len() == before {
            return false;
        }
        self.settings.replace(settings);
        true
    }

    /// The `security` mode from `streamSettings`, if decodable.
    pub fn security(&self) -> Option<&str> {
        self.stream_settings
            .value()
            .get("security")
            .and_then(Value::as_str)
    }

    pub fn reality_settings(&self) -> Option<&Value> {
        self.stream_settings.value().get("realitySettings")
    }

    /// Structural completeness check for Reality inbounds: server names,
    /// short ids, and some key material (the server side stores
    /// `privateKey`; `publicKey`/`mldsa65Seed` appear on other versions)
    /// must all be present. Inbounds without `security=reality` pass.
    pub fn reality_intact(&self) -> bool {
        if self.security() != Some("reality") {
            return true;
        }
        let Some(reality) = self.reality_settings() else {
            return false;
        };
        let non_empty_list = |key: &str| {
            reality
                .get(key)
                .and_then(Value::as_array)
                .is_some_and(|v| !v.is_empty())
        };
        let has_key = ["privateKey", "publicKey", "mldsa65Seed"].iter().any(|k| {
            reality
                .get(*k)
                .and_then(Value::as_str)
                .is_some_and(|s| !s.is_empty())
        });
        non_empty_list("serverNames") && non_empty_list("shortIds") && has_key
    }

    /// The complete update payload for the panel's update endpoint:
    /// all scalar fields, the blobs in their string form, and every
    /// untouched extra field.
    pub fn update_payload(&self) -> Value {
        // Serialize goes through the JsonBlob impls, so the blobs come
        // out string-encoded and `streamSettings` keeps its original text.
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "id": self.id }))
    }

    /// This inbound with the blobs decoded to objects, for assembling a
    /// full proxy-config view.
    pub fn decoded_view(&self) -> Value {
        let mut view = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => json!({}),
        };
        view["settings"] = self.settings.value().clone();
        view["streamSettings"] = self.stream_settings.value().clone();
        view["sniffing"] = self.sniffing.value().clone();
        view
    }
}
