//! Outbound HTTP calls between the hub and its nodes.

use std::time::Duration;

use chatmesh_shared::constants::{
    BULK_TIMEOUT_SECS, CONNECT_TIMEOUT_SECS, CONTROL_TIMEOUT_SECS, HEADER_AUTH,
    HEADER_NODE_API_KEY, HEADER_ORIGIN, ORIGIN_CENTRAL_SERVER, PUSH_TIMEOUT_SECS,
};
use chatmesh_shared::protocol::{
    HeartbeatRequest, HeartbeatResponse, NodeMeta, PeerDelete, PeerRecord, RegistrationRequest,
    RegistrationResponse,
};
use chatmesh_shared::{timestamp, SyncAck, SyncEnvelope};
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::dispatcher::Delivery;
use crate::error::TransportError;

/// Thin wrapper over a pooled [`reqwest::Client`]. Cheap to clone.
#[derive(Clone)]
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http })
    }

    /// POST a queued envelope to `{base_url}/sync/receive`.
    pub async fn push(&self, delivery: &Delivery) -> Result<SyncAck, TransportError> {
        let timeout = if delivery.envelope.sync_type.is_some() {
            BULK_TIMEOUT_SECS
        } else {
            PUSH_TIMEOUT_SECS
        };

        let mut req = self
            .http
            .post(join(&delivery.base_url, "/sync/receive"))
            .timeout(Duration::from_secs(timeout))
            .json(&delivery.envelope);
        for (name, value) in &delivery.headers {
            req = req.header(*name, value);
        }
        send_json(req).await
    }

    /// `GET {hub}/sync/pull`: every batch the hub holds that changed after
    /// `since`, in dependency order.
    pub async fn pull(
        &self,
        hub_url: &str,
        api_key: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SyncEnvelope>, TransportError> {
        let mut req = self
            .http
            .get(join(hub_url, "/sync/pull"))
            .timeout(Duration::from_secs(BULK_TIMEOUT_SECS))
            .header(HEADER_NODE_API_KEY, api_key);
        if let Some(since) = since {
            req = req.query(&[("since", timestamp::format(&since))]);
        }
        send_json(req).await
    }

    /// `PATCH {hub}/heartbeat/{node_id}`.
    pub async fn send_heartbeat(
        &self,
        hub_url: &str,
        node_id: Uuid,
        api_key: &str,
        body: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, TransportError> {
        let req = self
            .http
            .patch(join(hub_url, &format!("/heartbeat/{node_id}")))
            .timeout(Duration::from_secs(CONTROL_TIMEOUT_SECS))
            .header(HEADER_NODE_API_KEY, api_key)
            .json(body);
        send_json(req).await
    }

    /// `POST {hub}/register`.
    pub async fn register(
        &self,
        hub_url: &str,
        body: &RegistrationRequest,
    ) -> Result<RegistrationResponse, TransportError> {
        let req = self
            .http
            .post(join(hub_url, "/register"))
            .timeout(Duration::from_secs(CONTROL_TIMEOUT_SECS))
            .json(body);
        send_json(req).await
    }

    /// Hand a node its own identity (`/meta/set`).
    pub async fn set_meta(
        &self,
        node_url: &str,
        secret: &str,
        meta: &NodeMeta,
    ) -> Result<(), TransportError> {
        let req = self.hub_call(node_url, "/meta/set", secret).json(meta);
        send_empty(req).await
    }

    /// Push the list of peer endpoints to a node (`/peer/init`).
    pub async fn init_peers(
        &self,
        node_url: &str,
        secret: &str,
        peers: &[PeerRecord],
    ) -> Result<(), TransportError> {
        let req = self.hub_call(node_url, "/peer/init", secret).json(peers);
        send_empty(req).await
    }

    /// Tell a node to forget a peer (`/peer/delete`).
    pub async fn delete_peer(
        &self,
        node_url: &str,
        secret: &str,
        peer: &PeerDelete,
    ) -> Result<(), TransportError> {
        let req = self.hub_call(node_url, "/peer/delete", secret).json(peer);
        send_empty(req).await
    }

    fn hub_call(&self, node_url: &str, path: &str, secret: &str) -> RequestBuilder {
        self.http
            .post(join(node_url, path))
            .timeout(Duration::from_secs(CONTROL_TIMEOUT_SECS))
            .header(HEADER_AUTH, secret)
            .header(HEADER_ORIGIN, ORIGIN_CENTRAL_SERVER)
    }
}

fn join(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

async fn check(res: Response) -> Result<Response, TransportError> {
    if res.status().is_success() {
        Ok(res)
    } else {
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        Err(TransportError::Status { status, body })
    }
}

async fn send_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, TransportError> {
    let res = check(req.send().await?).await?;
    Ok(res.json::<T>().await?)
}

async fn send_empty(req: RequestBuilder) -> Result<(), TransportError> {
    check(req.send().await?).await?;
    Ok(())
}
