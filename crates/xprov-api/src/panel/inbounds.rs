// Panel inbound endpoints
//
// Inbound read, client add/remove, proxy restart, and the aggregated
// config view. Client mutations are read-modify-write against the
// inbound's `settings` blob; `streamSettings` is re-submitted as the
// exact original string so Reality/TLS parameters survive the update.

use std::sync::Arc;

use reqwest::Method;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Error;
use crate::panel::client::{Candidate, PanelClient, VERIFY_ATTEMPTS};
use crate::panel::models::InboundDescriptor;

const LIST_PATH: &str = "/panel/api/inbounds/list";

/// Direct config endpoints, tried before synthesizing a view.
const CONFIG_PATHS: &[&str] = &[
    "/panel/api/xray/config",
    "/xui/api/xray/config",
    "/api/xray/config",
];

/// Candidate restart endpoints across panel versions.
const RESTART_PATHS: &[&str] = &[
    "/panel/api/inbounds/restartAll",
    "/panel/api/xray/restart",
    "/xui/api/xray/restart",
    "/api/xray/restart",
];

fn update_candidates(inbound_id: u32) -> [Candidate; 2] {
    [
        Candidate::post(format!("/panel/api/inbounds/update/{inbound_id}")),
        Candidate::post(format!("/panel/api/inbound/update/{inbound_id}")),
    ]
}

/// Outcome of a client add/remove against the panel.
#[derive(Debug)]
pub struct PanelWrite {
    /// The operation was a no-op: the client was already present (add)
    /// or already absent (remove).
    pub unchanged: bool,
    /// A restart endpoint accepted the restart request.
    pub restarted: bool,
    /// A post-restart read confirmed the mutation took effect.
    pub verified: bool,
    /// The inbound's Reality parameters were structurally complete on
    /// the verification read. Flag-only: an incomplete set never fails
    /// the write by itself.
    pub reality_intact: bool,
    /// Full proxy-config snapshot, when one could be fetched.
    pub config: Option<Value>,
}

fn panel_client_object(id: &Uuid, email: &str, protocol: &str, flow: Option<&str>) -> Value {
    let mut obj = json!({
        "id": id.to_string(),
        "email": email,
        "enable": true,
        "expiryTime": 0,
        "limitIp": 0,
        "totalGB": 0,
        "tgId": "",
        "subId": "",
    });
    if protocol.eq_ignore_ascii_case("vmess") {
        obj["alterId"] = json!(0);
    } else {
        obj["flow"] = json!(flow.unwrap_or(""));
    }
    obj
}

impl PanelClient {
    /// Fetch the full inbound list.
    ///
    /// Some panel versions want `GET`, others `POST`, for the same path.
    pub(crate) async fn list_inbounds(&self) -> Result<Vec<InboundDescriptor>, Error> {
        let candidates = [Candidate::get(LIST_PATH), Candidate::post(LIST_PATH)];
        let envelope = self
            .try_candidates("inbound list", &candidates, None)
            .await?;

        serde_json::from_value(envelope.obj.clone()).map_err(|e| Error::Deserialization {
            message: format!("inbound list: {e}"),
            body: envelope.obj.to_string(),
        })
    }

    /// Return the inbound with the given id, from cache when younger
    /// than the cache TTL unless `force_refresh` is set.
    ///
    /// `Ok(None)` means the panel answered but the id is not in its
    /// list -- callers treat that as inbound-not-found.
    pub async fn get_inbound(
        &self,
        inbound_id: u32,
        force_refresh: bool,
    ) -> Result<Option<Arc<InboundDescriptor>>, Error> {
        if !force_refresh {
            if let Some(hit) = self.cache().get(inbound_id) {
                debug!(inbound_id, "using cached inbound");
                return Ok(Some(hit));
            }
        }

        let inbounds = self.list_inbounds().await?;
        debug!(count = inbounds.len(), "fetched inbound list");

        match inbounds.iter().find(|i| i.id == inbound_id).cloned() {
            Some(inbound) => {
                info!(
                    inbound_id,
                    port = inbound.port,
                    protocol = %inbound.protocol,
                    security = inbound.security().unwrap_or("none"),
                    "resolved inbound"
                );
                Ok(Some(self.cache().put(inbound_id, inbound)))
            }
            None => {
                warn!(
                    inbound_id,
                    available = ?inbounds.iter().map(|i| (i.id, i.port, i.protocol.as_str())).collect::<Vec<_>>(),
                    "inbound id not present on the panel"
                );
                Ok(None)
            }
        }
    }

    /// Add a client to an inbound. Idempotent: an already-present id is
    /// a no-op success that still returns the current config snapshot.
    pub async fn add_client(
        &self,
        id: Uuid,
        email: &str,
        inbound_id: u32,
        flow: Option<&str>,
    ) -> Result<PanelWrite, Error> {
        let inbound = self
            .get_inbound(inbound_id, false)
            .await?
            .ok_or(Error::InboundNotFound { inbound_id })?;

        if inbound.has_client(&id) {
            info!(%id, inbound_id, "client already present -- nothing to do");
            return Ok(PanelWrite {
                unchanged: true,
                restarted: false,
                verified: true,
                reality_intact: inbound.reality_intact(),
                config: self.get_xray_config().await.ok(),
            });
        }

        // Email labels must be unique per inbound; collide -> derive a
        // fresh one from the client id.
        let email = if inbound.has_email(email) {
            let regenerated = format!("user_{}", &id.to_string()[..8]);
            warn!(email, %regenerated, "email already in use on this inbound");
            regenerated
        } else {
            email.to_owned()
        };

        let mut updated = (*inbound).clone();
        if updated.stream_settings.is_empty() {
            warn!(
                inbound_id,
                "streamSettings is empty -- a Reality inbound would lose its parameters on update"
            );
        }
        updated.push_client(panel_client_object(&id, &email, &updated.protocol, flow));

        let payload = updated.update_payload();
        self.try_candidates("inbound update", &update_candidates(inbound_id), Some(&payload))
            .await?;
        self.cache().invalidate(inbound_id);
        info!(%id, inbound_id, "client added on the panel");

        let (restarted, verified, reality_intact) =
            self.restart_and_verify(inbound_id, |fresh| fresh.has_client(&id)).await;

        Ok(PanelWrite {
            unchanged: false,
            restarted,
            verified,
            reality_intact,
            config: self.get_xray_config().await.ok(),
        })
    }

    /// Remove a client from an inbound. An absent id is a no-op success.
    pub async fn remove_client(&self, id: Uuid, inbound_id: u32) -> Result<PanelWrite, Error> {
        let inbound = self
            .get_inbound(inbound_id, false)
            .await?
            .ok_or(Error::InboundNotFound { inbound_id })?;

        let mut updated = (*inbound).clone();
        if !updated.remove_client(&id) {
            info!(%id, inbound_id, "client not present -- nothing to remove");
            return Ok(PanelWrite {
                unchanged: true,
                restarted: false,
                verified: true,
                reality_intact: inbound.reality_intact(),
                config: None,
            });
        }

        let payload = updated.update_payload();
        self.try_candidates("inbound update", &update_candidates(inbound_id), Some(&payload))
            .await?;
        self.cache().invalidate(inbound_id);
        info!(%id, inbound_id, "client removed on the panel");

        let (restarted, verified, reality_intact) =
            self.restart_and_verify(inbound_id, |fresh| !fresh.has_client(&id)).await;

        Ok(PanelWrite {
            unchanged: false,
            restarted,
            verified,
            reality_intact,
            config: None,
        })
    }

    /// Trigger a proxy restart. Returns `true` on the first candidate
    /// that succeeds, `false` when none do -- non-fatal, since panels
    /// typically reload inbounds on update anyway.
    pub async fn restart(&self) -> bool {
        let candidates: Vec<Candidate> =
            RESTART_PATHS.iter().map(|p| Candidate::post(*p)).collect();
        match self.try_candidates("restart", &candidates, None).await {
            Ok(_) => {
                info!("proxy restart triggered");
                true
            }
            Err(e) => {
                warn!(error = %e, "no restart endpoint worked -- relying on the panel's own reload");
                false
            }
        }
    }

    /// Restart, wait for the proxy to settle, then re-read the inbound a
    /// bounded number of times and check `confirm` against it. Also
    /// checks Reality structural completeness on the fresh read.
    async fn restart_and_verify<F>(&self, inbound_id: u32, confirm: F) -> (bool, bool, bool)
    where
        F: Fn(&InboundDescriptor) -> bool,
    {
        let restarted = self.restart().await;

        let mut verified = false;
        let mut reality_intact = true;
        for attempt in 1..=VERIFY_ATTEMPTS {
            tokio::time::sleep(self.restart_settle()).await;
            match self.get_inbound(inbound_id, true).await {
                Ok(Some(fresh)) => {
                    reality_intact = fresh.reality_intact();
                    if confirm(&fresh) {
                        verified = true;
                        break;
                    }
                    debug!(inbound_id, attempt, "verification read does not reflect the write yet");
                }
                Ok(None) => {
                    warn!(inbound_id, attempt, "inbound vanished during verification");
                }
                Err(e) => {
                    warn!(inbound_id, attempt, error = %e, "verification read failed");
                }
            }
        }

        if !reality_intact {
            warn!(
                inbound_id,
                "Reality parameters look incomplete after the update -- inspect the inbound"
            );
        }
        (restarted, verified, reality_intact)
    }

    /// Fetch the full proxy configuration.
    ///
    /// Tries the direct config endpoints first; when none answer,
    /// synthesizes a view from the inbound list plus default
    /// outbound/routing stanzas.
    pub async fn get_xray_config(&self) -> Result<Value, Error> {
        self.ensure_session().await?;

        for path in CONFIG_PATHS {
            let Ok(resp) = self.send(Method::GET, path, None).await else {
                continue;
            };
            if !resp.status().is_success() {
                continue;
            }
            let Ok(value) = resp.json::<Value>().await else {
                continue;
            };
            if value.get("success").and_then(Value::as_bool) == Some(true) {
                if let Some(obj) = value.get("obj") {
                    if !obj.is_null() {
                        debug!(path, "config fetched from direct endpoint");
                        return Ok(obj.clone());
                    }
                }
            } else if value.get("inbounds").is_some() {
                debug!(path, "config fetched from direct endpoint (bare)");
                return Ok(value);
            }
        }

        debug!("no direct config endpoint -- synthesizing from the inbound list");
        let inbounds = self.list_inbounds().await?;
        let views: Vec<Value> = inbounds.iter().map(InboundDescriptor::decoded_view).collect();
        Ok(json!({
            "inbounds": views,
            "outbounds": [
                { "protocol": "freedom", "settings": { "domainStrategy": "AsIs" }, "tag": "direct" },
                { "protocol": "blackhole", "settings": {}, "tag": "blocked" },
            ],
            "routing": { "domainStrategy": "AsIs", "rules": [] },
        }))
    }
}
