// Connection-URI encoding for issued credentials.
//
// Pure transformation: profile + client id -> URI. No I/O. The query
// parameter order is fixed -- several client apps parse these links with
// regexes rather than a URL parser, so the order is part of the format.
//
// A Reality profile missing its public key or short id is refused
// outright: a URI without them parses fine client-side and then fails
// the handshake in a way users cannot diagnose.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{Protocol, SecurityMode, ServerProfile, TransportNetwork};

/// An issued connection URI plus the client id it embeds.
#[derive(Debug, Clone)]
pub struct EncodedKey {
    pub uri: String,
    pub client_id: Uuid,
}

/// Encode a connection URI for `profile`. Generates a fresh client id
/// when none is supplied.
pub fn encode(profile: &ServerProfile, client_id: Option<Uuid>) -> Result<EncodedKey, EngineError> {
    let client_id = client_id.unwrap_or_else(Uuid::new_v4);
    let uri = match profile.protocol {
        Protocol::Vless => vless_uri(profile, &client_id)?,
        Protocol::Vmess => vmess_uri(profile, &client_id)?,
    };
    Ok(EncodedKey { uri, client_id })
}

fn non_empty(field: Option<&str>) -> Option<&str> {
    field.map(str::trim).filter(|s| !s.is_empty())
}

// ── VLESS ───────────────────────────────────────────────────────────

fn vless_uri(profile: &ServerProfile, client_id: &Uuid) -> Result<String, EngineError> {
    let mut params: Vec<String> = vec!["encryption=none".into()];

    match profile.security {
        SecurityMode::None => params.push("security=none".into()),
        SecurityMode::Tls => {
            params.push("security=tls".into());
            if let Some(sni) = non_empty(profile.sni.as_deref()) {
                params.push(format!("sni={sni}"));
            }
        }
        SecurityMode::Reality => {
            params.push("security=reality".into());
            let reality = profile.reality.as_ref().ok_or_else(|| {
                EngineError::validation("security=reality but no Reality parameters are set")
            })?;

            match non_empty(reality.server_name.as_deref()).or(non_empty(profile.sni.as_deref())) {
                Some(server_name) => params.push(format!("sni={server_name}")),
                None => warn!("Reality profile has no server name -- the key may not connect"),
            }
            if let Some(fp) = non_empty(reality.fingerprint.as_deref()) {
                params.push(format!("fp={fp}"));
            }
            let pbk = non_empty(reality.public_key.as_deref())
                .ok_or_else(|| EngineError::validation("Reality public key (pbk) is required"))?;
            params.push(format!("pbk={pbk}"));
            let sid = reality
                .short_ids
                .as_deref()
                .and_then(|ids| ids.split(',').next())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| EngineError::validation("Reality short id (sid) is required"))?;
            params.push(format!("sid={sid}"));
            if let Some(spx) = non_empty(reality.spider_path.as_deref()) {
                params.push(format!("spx={spx}"));
            }
        }
    }

    if let Some(flow) = non_empty(profile.flow.as_deref()) {
        params.push(format!("flow={flow}"));
    }

    params.push(format!("type={}", profile.network));
    params.push("headerType=none".into());
    if profile.network == TransportNetwork::Ws {
        if let Some(path) = non_empty(profile.ws_path.as_deref()) {
            params.push(format!("path={path}"));
        }
        if let Some(host) = non_empty(profile.sni.as_deref()) {
            params.push(format!("host={host}"));
        }
    }

    Ok(format!(
        "vless://{client_id}@{}:{}?{}#{}",
        profile.address,
        profile.port,
        params.join("&"),
        profile.location
    ))
}

// ── VMess ───────────────────────────────────────────────────────────

/// The VMess link payload. Field order matters: it is the de-facto
/// format clients expect, so this struct declares the keys in order and
/// serde emits them as declared.
#[derive(Serialize)]
struct VmessPayload<'a> {
    v: &'static str,
    ps: String,
    add: &'a str,
    port: u16,
    id: String,
    aid: u16,
    scy: &'static str,
    net: String,
    #[serde(rename = "type")]
    header_type: &'static str,
    host: &'a str,
    path: &'a str,
    tls: &'static str,
    sni: &'a str,
    alpn: &'static str,
    fp: &'static str,
}

fn vmess_uri(profile: &ServerProfile, client_id: &Uuid) -> Result<String, EngineError> {
    let tls_enabled = profile.security == SecurityMode::Tls;
    let is_ws = profile.network == TransportNetwork::Ws;
    let sni = profile.effective_sni();

    let payload = VmessPayload {
        v: "2",
        ps: format!("VPN {}", profile.location),
        add: &profile.address,
        port: profile.port,
        id: client_id.to_string(),
        aid: 0,
        scy: "auto",
        net: profile.network.to_string(),
        header_type: if is_ws { "" } else { "none" },
        host: if is_ws { sni } else { "" },
        path: if is_ws {
            profile.ws_path.as_deref().unwrap_or("")
        } else {
            ""
        },
        tls: if tls_enabled { "tls" } else { "" },
        sni: if tls_enabled { sni } else { "" },
        alpn: "",
        fp: "",
    };

    let json = serde_json::to_string(&payload)
        .map_err(|e| EngineError::Internal(format!("vmess payload serialization: {e}")))?;
    Ok(format!("vmess://{}", BASE64.encode(json)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RealityProfile;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn reality_profile() -> ServerProfile {
        ServerProfile {
            address: "203.0.113.5".into(),
            port: 443,
            protocol: Protocol::Vless,
            network: TransportNetwork::Tcp,
            security: SecurityMode::Reality,
            sni: Some("example.com".into()),
            ws_path: None,
            flow: None,
            reality: Some(RealityProfile {
                server_name: None,
                fingerprint: None,
                public_key: Some("ABC123".into()),
                short_ids: Some("a1".into()),
                spider_path: None,
            }),
            location: "NL-1".into(),
        }
    }

    /// Split a vless URI's query string into a key -> value map.
    fn query_map(uri: &str) -> HashMap<String, String> {
        let query = uri
            .split_once('?')
            .and_then(|(_, rest)| rest.split_once('#'))
            .map(|(q, _)| q)
            .expect("uri has query and remark");
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| {
                (
                    k.to_owned(),
                    urlencoding::decode(v).expect("decodable").into_owned(),
                )
            })
            .collect()
    }

    #[test]
    fn reality_uri_matches_fixed_parameter_order() {
        let id: Uuid = "11111111-1111-1111-1111-111111111111".parse().expect("uuid");
        let key = encode(&reality_profile(), Some(id)).expect("encodes");

        assert_eq!(
            key.uri,
            "vless://11111111-1111-1111-1111-111111111111@203.0.113.5:443\
             ?encryption=none&security=reality&sni=example.com&pbk=ABC123&sid=a1\
             &type=tcp&headerType=none#NL-1"
        );
        assert_eq!(key.client_id, id);
    }

    #[test]
    fn reality_round_trip_recovers_every_field() {
        let mut profile = reality_profile();
        let reality = profile.reality.as_mut().expect("reality");
        reality.server_name = Some("camouflage.example.com".into());
        reality.fingerprint = Some("chrome".into());
        reality.spider_path = Some("/".into());
        profile.flow = Some("xtls-rprx-vision".into());

        let key = encode(&profile, None).expect("encodes");
        let params = query_map(&key.uri);

        assert_eq!(params["encryption"], "none");
        assert_eq!(params["security"], "reality");
        assert_eq!(params["sni"], "camouflage.example.com");
        assert_eq!(params["fp"], "chrome");
        assert_eq!(params["pbk"], "ABC123");
        assert_eq!(params["sid"], "a1");
        assert_eq!(params["spx"], "/");
        assert_eq!(params["flow"], "xtls-rprx-vision");
        assert_eq!(params["type"], "tcp");
        assert_eq!(params["headerType"], "none");
    }

    #[test]
    fn first_short_id_wins_when_several_are_listed() {
        let mut profile = reality_profile();
        profile.reality.as_mut().expect("reality").short_ids = Some("a1, b2,c3".into());

        let key = encode(&profile, None).expect("encodes");
        assert_eq!(query_map(&key.uri)["sid"], "a1");
    }

    #[test]
    fn missing_public_key_is_a_hard_error() {
        let mut profile = reality_profile();
        profile.reality.as_mut().expect("reality").public_key = None;

        let result = encode(&profile, None);
        assert!(
            matches!(result, Err(EngineError::ProtocolValidation { .. })),
            "expected ProtocolValidation, got {result:?}"
        );
    }

    #[test]
    fn missing_short_id_is_a_hard_error() {
        let mut profile = reality_profile();
        profile.reality.as_mut().expect("reality").short_ids = Some("  ".into());

        let result = encode(&profile, None);
        assert!(matches!(result, Err(EngineError::ProtocolValidation { .. })));
    }

    #[test]
    fn plain_and_tls_vless_profiles_encode() {
        let mut profile = reality_profile();
        profile.security = SecurityMode::None;
        profile.reality = None;
        let key = encode(&profile, None).expect("encodes");
        assert_eq!(query_map(&key.uri)["security"], "none");

        profile.security = SecurityMode::Tls;
        let key = encode(&profile, None).expect("encodes");
        let params = query_map(&key.uri);
        assert_eq!(params["security"], "tls");
        assert_eq!(params["sni"], "example.com");
    }

    #[test]
    fn ws_vless_carries_path_and_host() {
        let mut profile = reality_profile();
        profile.security = SecurityMode::Tls;
        profile.reality = None;
        profile.network = TransportNetwork::Ws;
        profile.ws_path = Some("/tunnel".into());

        let key = encode(&profile, None).expect("encodes");
        let params = query_map(&key.uri);
        assert_eq!(params["type"], "ws");
        assert_eq!(params["path"], "/tunnel");
        assert_eq!(params["host"], "example.com");
    }

    #[test]
    fn vmess_ws_tls_payload_decodes_to_expected_fields() {
        let profile = ServerProfile {
            address: "198.51.100.7".into(),
            port: 8443,
            protocol: Protocol::Vmess,
            network: TransportNetwork::Ws,
            security: SecurityMode::Tls,
            sni: Some("cdn.example.com".into()),
            ws_path: Some("/ray".into()),
            flow: None,
            reality: None,
            location: "DE-2".into(),
        };

        let key = encode(&profile, None).expect("encodes");
        let encoded = key.uri.strip_prefix("vmess://").expect("vmess scheme");
        let decoded = BASE64.decode(encoded).expect("valid base64");
        let payload: serde_json::Value = serde_json::from_slice(&decoded).expect("valid JSON");

        assert_eq!(payload["v"], "2");
        assert_eq!(payload["net"], "ws");
        assert_eq!(payload["path"], "/ray");
        assert_eq!(payload["tls"], "tls");
        assert_eq!(payload["sni"], "cdn.example.com");
        assert_eq!(payload["host"], "cdn.example.com");
        assert_eq!(payload["port"], 8443);
        assert_eq!(payload["aid"], 0);
        assert_eq!(payload["scy"], "auto");
    }

    #[test]
    fn vmess_tcp_payload_uses_empty_network_fields() {
        let profile = ServerProfile {
            address: "198.51.100.7".into(),
            port: 443,
            protocol: Protocol::Vmess,
            network: TransportNetwork::Tcp,
            security: SecurityMode::None,
            sni: None,
            ws_path: None,
            flow: None,
            reality: None,
            location: "DE-2".into(),
        };

        let key = encode(&profile, None).expect("encodes");
        let encoded = key.uri.strip_prefix("vmess://").expect("vmess scheme");
        let decoded = BASE64.decode(encoded).expect("valid base64");
        let payload: serde_json::Value = serde_json::from_slice(&decoded).expect("valid JSON");

        assert_eq!(payload["type"], "none");
        assert_eq!(payload["host"], "");
        assert_eq!(payload["path"], "");
        assert_eq!(payload["tls"], "");
        assert_eq!(payload["sni"], "");
    }

    #[test]
    fn vmess_key_order_is_stable() {
        let profile = ServerProfile {
            address: "198.51.100.7".into(),
            port: 443,
            protocol: Protocol::Vmess,
            network: TransportNetwork::Tcp,
            security: SecurityMode::None,
            sni: None,
            ws_path: None,
            flow: None,
            reality: None,
            location: "DE-2".into(),
        };

        let key = encode(&profile, None).expect("encodes");
        let encoded = key.uri.strip_prefix("vmess://").expect("vmess scheme");
        let decoded = String::from_utf8(BASE64.decode(encoded).expect("valid base64"))
            .expect("utf8 payload");

        let order: Vec<usize> = ["\"v\"", "\"ps\"", "\"add\"", "\"port\"", "\"id\"", "\"aid\"",
            "\"scy\"", "\"net\"", "\"type\"", "\"host\"", "\"path\"", "\"tls\"", "\"sni\"",
            "\"alpn\"", "\"fp\""]
            .iter()
            .map(|k| decoded.find(k).expect("key present"))
            .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]), "keys out of order: {decoded}");
    }

    #[test]
    fn fresh_id_is_generated_when_absent() {
        let key = encode(&reality_profile(), None).expect("encodes");
        assert!(key.uri.starts_with(&format!("vless://{}@", key.client_id)));
    }
}
