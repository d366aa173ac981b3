// Live proxy-config file editing for the shell-path backend.
//
// The JSON surgery is split into pure functions over `serde_json::Value`
// so it is testable without a host; the SSH plumbing around them lives
// in the backend. The file is only half the story: the panel rehydrates
// it from its embedded store on every restart, so the store editor must
// apply the same mutation or the file write is silently discarded.

use regex::Regex;
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{ClientRecord, Protocol};
use crate::remote::ssh::SshSession;

/// Known config locations across panel install layouts.
pub(crate) const CONFIG_PATHS: &[&str] = &[
    "/usr/local/x-ui/bin/config.json",
    "/etc/x-ui/config.json",
    "/opt/x-ui/config.json",
];

/// Locate the live config file: probe the known paths, then fall back
/// to parsing `-c <path>` out of the running proxy's command line.
pub(crate) fn locate_config_path(ssh: &SshSession) -> Result<String, EngineError> {
    for path in CONFIG_PATHS {
        if ssh.file_exists(path)? {
            info!(path, "found proxy config file");
            return Ok((*path).to_owned());
        }
    }

    let (out, _) = ssh.exec("ps aux | grep xray | grep -v grep")?;
    let arg_re = Regex::new(r"-c\s+(\S+)").expect("static regex");
    if let Some(captures) = arg_re.captures(&out) {
        let path = captures[1].to_owned();
        info!(%path, "found proxy config file via process command line");
        return Ok(path);
    }

    Err(EngineError::discovery(
        "proxy config path",
        format!(
            "none of {} exist and no -c argument on the proxy process",
            CONFIG_PATHS.join(", ")
        ),
    ))
}

// ── Pure JSON surgery ───────────────────────────────────────────────

/// How the target inbound was located within the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InboundMatch {
    PortAndProtocol,
    /// Deployment-specific positional index; a last-resort degradation.
    PositionalFallback,
    /// Protocol matched but on a different port.
    ProtocolOnly,
}

fn inbounds(config: &Value) -> &[Value] {
    config
        .get("inbounds")
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

/// Find the index of the inbound to mutate.
///
/// Match order: (port, protocol), then the configured positional index
/// if any, then the first inbound with the right protocol. Anything but
/// the first is logged loudly -- positional indexes do not transfer
/// between deployments.
pub(crate) fn find_inbound_index(
    config: &Value,
    port: u16,
    protocol: Protocol,
    fallback_index: Option<usize>,
) -> Option<(usize, InboundMatch)> {
    let protocol = protocol.to_string();
    let list = inbounds(config);

    if let Some(idx) = list.iter().position(|inb| {
        inb.get("port").and_then(Value::as_u64) == Some(u64::from(port))
            && inb
                .get("protocol")
                .and_then(Value::as_str)
                .is_some_and(|p| p.eq_ignore_ascii_case(&protocol))
    }) {
        return Some((idx, InboundMatch::PortAndProtocol));
    }

    if let Some(idx) = fallback_index {
        if idx < list.len() {
            warn!(
                idx,
                port,
                "no (port, protocol) match -- using the configured positional inbound index; \
                 this is deployment-specific and will break if inbounds are reordered"
            );
            return Some((idx, InboundMatch::PositionalFallback));
        }
    }

    if let Some(idx) = list.iter().position(|inb| {
        inb.get("protocol")
            .and_then(Value::as_str)
            .is_some_and(|p| p.eq_ignore_ascii_case(&protocol))
    }) {
        let found_port = list
            .get(idx)
            .and_then(|inb| inb.get("port"))
            .and_then(Value::as_u64);
        warn!(
            idx,
            requested_port = port,
            ?found_port,
            "no (port, protocol) match -- using the first {protocol} inbound on a different port"
        );
        return Some((idx, InboundMatch::ProtocolOnly));
    }

    None
}

/// Outcome of appending a client to an inbound's settings. `Added`
/// carries the exact object inserted (flow borrowed, email possibly
/// regenerated) so the store editor can apply the identical mutation.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AppendOutcome {
    AlreadyPresent,
    Added(Value),
}

/// Append `record` to the inbound at `idx`.
///
/// Borrows an existing client's `flow` when the record has none (the
/// inbound's clients share one), and regenerates the email label when
/// it collides with a different client's.
pub(crate) fn append_client(
    config: &mut Value,
    idx: usize,
    record: &ClientRecord,
) -> Result<AppendOutcome, EngineError> {
    let inbound = config
        .get_mut("inbounds")
        .and_then(Value::as_array_mut)
        .and_then(|list| list.get_mut(idx))
        .ok_or_else(|| EngineError::InboundNotFound {
            inbound: format!("index {idx}"),
        })?;

    if !inbound.get("settings").is_some_and(Value::is_object) {
        inbound["settings"] = json!({});
    }
    let settings = &mut inbound["settings"];
    if !settings.get("clients").is_some_and(Value::is_array) {
        settings["clients"] = json!([]);
    }

    let id = record.id.to_string();
    let clients = settings["clients"].as_array().expect("ensured above");
    if clients
        .iter()
        .any(|c| c.get("id").and_then(Value::as_str) == Some(id.as_str()))
    {
        return Ok(AppendOutcome::AlreadyPresent);
    }

    let mut client = record.config_object();
    if record.protocol == Protocol::Vless && client.get("flow").is_none() {
        let borrowed = clients
            .first()
            .and_then(|c| c.get("flow"))
            .and_then(Value::as_str)
            .filter(|f| !f.is_empty())
            .map(String::from);
        if let Some(flow) = borrowed {
            client["flow"] = json!(flow);
        }
    }
    if clients
        .iter()
        .any(|c| c.get("email").and_then(Value::as_str) == Some(record.email.as_str()))
    {
        let regenerated = ClientRecord::derived_email(&record.id);
        warn!(email = %record.email, %regenerated, "email already in use -- regenerating");
        client["email"] = json!(regenerated);
    }

    settings["clients"]
        .as_array_mut()
        .expect("ensured above")
        .push(client.clone());
    Ok(AppendOutcome::Added(client))
}

/// Inject default `dns` / `outbounds` / `routing` stanzas ONLY when the
/// section is entirely absent. Existing sections, however partial, are
/// left untouched.
pub(crate) fn ensure_default_stanzas(config: &mut Value) {
    let Some(root) = config.as_object_mut() else {
        return;
    };

    root.entry("dns").or_insert_with(|| {
        json!({
            "servers": ["8.8.8.8", "8.8.4.4", "1.1.1.1"],
            "queryStrategy": "UseIP",
        })
    });

    let outbounds_missing = root
        .get("outbounds")
        .and_then(Value::as_array)
        .is_none_or(|list| list.is_empty());
    if outbounds_missing {
        root.insert(
            "outbounds".into(),
            json!([{
                "protocol": "freedom",
                "settings": { "domainStrategy": "UseIPv4" },
                "tag": "direct",
            }]),
        );
    }

    root.entry("routing").or_insert_with(|| {
        json!({
            "domainStrategy": "IPIfNonMatch",
            "rules": [{
                "type": "field",
                "outboundTag": "direct",
                "network": "tcp,udp",
            }],
        })
    });
}

/// Is the client id present in any inbound's client list?
pub(crate) fn client_present_anywhere(config: &Value, id: &Uuid) -> bool {
    let id = id.to_string();
    inbounds(config).iter().any(|inb| {
        inb.get("settings")
            .and_then(|s| s.get("clients"))
            .and_then(Value::as_array)
            .is_some_and(|clients| {
                clients
                    .iter()
                    .any(|c| c.get("id").and_then(Value::as_str) == Some(id.as_str()))
            })
    })
}

/// Is the client id present in the inbound at `idx`?
pub(crate) fn client_present(config: &Value, idx: usize, id: &Uuid) -> bool {
    let id = id.to_string();
    inbounds(config)
        .get(idx)
        .and_then(|inb| inb.get("settings"))
        .and_then(|s| s.get("clients"))
        .and_then(Value::as_array)
        .is_some_and(|clients| {
            clients
                .iter()
                .any(|c| c.get("id").and_then(Value::as_str) == Some(id.as_str()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_config() -> Value {
        json!({
            "inbounds": [
                {
                    "port": 8080, "protocol": "vmess",
                    "settings": { "clients": [] },
                },
                {
                    "port": 443, "protocol": "vless",
                    "settings": { "clients": [
                        { "id": "11111111-1111-1111-1111-111111111111",
                          "email": "user_11111111",
                          "flow": "xtls-rprx-vision" },
                    ]},
                    "streamSettings": { "security": "reality" },
                },
            ],
            "outbounds": [{ "protocol": "freedom", "tag": "direct" }],
        })
    }

    fn record(id: &str) -> ClientRecord {
        ClientRecord::new(id.parse().expect("uuid"), None, Protocol::Vless, None)
    }

    #[test]
    fn finds_inbound_by_port_and_protocol() {
        let config = sample_config();
        assert_eq!(
            find_inbound_index(&config, 443, Protocol::Vless, None),
            Some((1, InboundMatch::PortAndProtocol))
        );
        assert_eq!(
            find_inbound_index(&config, 8080, Protocol::Vmess, None),
            Some((0, InboundMatch::PortAndProtocol))
        );
    }

    #[test]
    fn positional_fallback_applies_before_protocol_only() {
        let config = sample_config();
        assert_eq!(
            find_inbound_index(&config, 9999, Protocol::Vless, Some(0)),
            Some((0, InboundMatch::PositionalFallback))
        );
        assert_eq!(
            find_inbound_index(&config, 9999, Protocol::Vless, None),
            Some((1, InboundMatch::ProtocolOnly))
        );
        assert_eq!(find_inbound_index(&config, 9999, Protocol::Vless, Some(9)), Some((1, InboundMatch::ProtocolOnly)));
    }

    #[test]
    fn no_match_yields_none() {
        let config = json!({ "inbounds": [{ "port": 1, "protocol": "trojan" }] });
        assert_eq!(find_inbound_index(&config, 443, Protocol::Vless, None), None);
    }

    #[test]
    fn append_borrows_flow_from_existing_client() {
        let mut config = sample_config();
        let outcome = append_client(
            &mut config,
            1,
            &record("22222222-2222-2222-2222-222222222222"),
        )
        .expect("append succeeds");

        let AppendOutcome::Added(inserted) = outcome else {
            panic!("expected Added, got {outcome:?}");
        };
        assert_eq!(inserted["flow"], json!("xtls-rprx-vision"));
        let clients = config["inbounds"][1]["settings"]["clients"]
            .as_array()
            .expect("clients");
        assert_eq!(clients.len(), 2);
        assert_eq!(clients[1]["flow"], json!("xtls-rprx-vision"));
    }

    #[test]
    fn append_is_idempotent() {
        let mut config = sample_config();
        let outcome = append_client(
            &mut config,
            1,
            &record("11111111-1111-1111-1111-111111111111"),
        )
        .expect("append succeeds");

        assert_eq!(outcome, AppendOutcome::AlreadyPresent);
        assert_eq!(
            config["inbounds"][1]["settings"]["clients"]
                .as_array()
                .expect("clients")
                .len(),
            1
        );
    }

    #[test]
    fn append_regenerates_colliding_email() {
        let mut config = sample_config();
        let mut rec = record("33333333-3333-3333-3333-333333333333");
        rec.email = "user_11111111".into();

        append_client(&mut config, 1, &rec).expect("append succeeds");
        let clients = config["inbounds"][1]["settings"]["clients"]
            .as_array()
            .expect("clients");
        assert_eq!(clients[1]["email"], json!("user_33333333"));
    }

    #[test]
    fn append_creates_missing_settings_scaffolding() {
        let mut config = json!({ "inbounds": [{ "port": 443, "protocol": "vless" }] });
        append_client(&mut config, 0, &record("44444444-4444-4444-4444-444444444444"))
            .expect("append succeeds");
        assert!(client_present(
            &config,
            0,
            &"44444444-4444-4444-4444-444444444444".parse().expect("uuid")
        ));
    }

    #[test]
    fn default_stanzas_fill_only_absent_sections() {
        let mut config = sample_config();
        ensure_default_stanzas(&mut config);

        // dns and routing were absent -> injected
        assert_eq!(config["dns"]["queryStrategy"], json!("UseIP"));
        assert_eq!(config["routing"]["rules"][0]["outboundTag"], json!("direct"));
        // outbounds existed -> untouched, no freedom settings grafted on
        assert_eq!(config["outbounds"].as_array().expect("outbounds").len(), 1);
        assert!(config["outbounds"][0].get("settings").is_none());
    }

    #[test]
    fn existing_dns_and_routing_are_left_alone() {
        let mut config = json!({
            "inbounds": [],
            "dns": { "servers": ["9.9.9.9"] },
            "routing": { "rules": [] },
        });
        ensure_default_stanzas(&mut config);

        assert_eq!(config["dns"]["servers"], json!(["9.9.9.9"]));
        assert!(config["routing"]["rules"].as_array().expect("rules").is_empty());
        // empty outbounds counts as absent
        assert_eq!(config["outbounds"][0]["protocol"], json!("freedom"));
    }
}
