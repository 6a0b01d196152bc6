//! Client pooling and connection gating.
//!
//! One backend client per scheduler context; this process runs a single
//! tokio runtime, so the pool collapses to one health-gated slot. The pool
//! also owns the query concurrency limiter, which every query path
//! acquires before talking to the backend.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use common::knobs::{
    ES_CA_CERT,
    ES_CLOUD_ID,
    ES_HEALTH_TIMEOUT,
    ES_PASSWORD,
    ES_REQUEST_TIMEOUT,
    ES_URL,
    ES_USERNAME,
    QUERY_CONCURRENCY,
};
use elasticsearch::{
    auth::Credentials,
    cert::{
        Certificate,
        CertificateValidation,
    },
    cluster::ClusterHealthParts,
    http::transport::{
        CloudConnectionPool,
        SingleNodeConnectionPool,
        Transport,
        TransportBuilder,
    },
    Elasticsearch,
};
use errors::ErrorMetadata;
use serde_json::Value;
use tokio::sync::{
    Mutex,
    Semaphore,
};
use url::Url;

pub struct ClientPool {
    slot: Mutex<Option<Elasticsearch>>,
    query_limiter: Arc<Semaphore>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            query_limiter: Arc::new(Semaphore::new(*QUERY_CONCURRENCY)),
        }
    }

    /// Counting semaphore bounding concurrent query execution. Waiters are
    /// served FIFO.
    pub fn query_limiter(&self) -> Arc<Semaphore> {
        self.query_limiter.clone()
    }

    /// Get the shared client, connecting on first use. Connection setup
    /// probes cluster health until the cluster reports at least yellow,
    /// backing off quadratically between attempts; exhausting the retries
    /// fails the operation with BackendUnavailable.
    pub async fn get(&self) -> anyhow::Result<Elasticsearch> {
        let mut slot = self.slot.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        for retry in 2u64..9 {
            match Self::connect().await {
                Ok(client) => {
                    *slot = Some(client.clone());
                    return Ok(client);
                },
                Err(e) => {
                    tracing::error!("Cannot connect to search backend: {e:#}");
                    tokio::time::sleep(Duration::from_secs(retry * retry)).await;
                },
            }
        }
        anyhow::bail!(ErrorMetadata::unavailable(
            "BackendUnavailable",
            "Search backend did not become healthy",
        ))
    }

    /// Drop the pooled client. Idempotent; the next `get` reconnects.
    pub async fn close(&self) {
        let mut slot = self.slot.lock().await;
        if slot.take().is_some() {
            tracing::info!("Closing search backend client");
        }
    }

    async fn connect() -> anyhow::Result<Elasticsearch> {
        let client = Elasticsearch::new(build_transport()?);
        let response = client
            .cluster()
            .health(ClusterHealthParts::None)
            .request_timeout(*ES_HEALTH_TIMEOUT)
            .send()
            .await
            .context("cluster health probe failed")?;
        let health: Value = response
            .json()
            .await
            .context("could not decode cluster health")?;
        match health["status"].as_str() {
            Some("green") | Some("yellow") => Ok(client),
            status => anyhow::bail!("cluster health is {status:?}"),
        }
    }
}

fn build_transport() -> anyhow::Result<Transport> {
    let mut builder = match ES_CLOUD_ID.as_deref() {
        Some(cloud_id) => {
            tracing::info!(cloud_id, "Connecting to Elastic Cloud");
            TransportBuilder::new(CloudConnectionPool::new(cloud_id)?)
        },
        None => {
            let url = Url::parse(&ES_URL).context("ES_URL is not a valid URL")?;
            TransportBuilder::new(SingleNodeConnectionPool::new(url))
        },
    };
    if let (Some(username), Some(password)) = (ES_USERNAME.clone(), ES_PASSWORD.clone()) {
        builder = builder.auth(Credentials::Basic(username, password));
    }
    if let Some(ca_cert) = ES_CA_CERT.as_deref() {
        let pem = std::fs::read(ca_cert)
            .with_context(|| format!("could not read CA certificate {ca_cert}"))?;
        builder = builder.cert_validation(CertificateValidation::Full(Certificate::from_pem(&pem)?));
    }
    Ok(builder.timeout(*ES_REQUEST_TIMEOUT).build()?)
}
