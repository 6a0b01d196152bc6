//! Elasticsearch-backed [`SearchProvider`].

use std::{
    fmt,
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};

use anyhow::Context;
use async_trait::async_trait;
use common::{
    knobs::{
        BULK_CHUNK_SIZE,
        ES_MAX_RETRIES,
    },
    Backoff,
};
use elasticsearch::{
    cat::CatIndicesParts,
    http::{
        request::JsonBody,
        response::Response,
        StatusCode,
    },
    indices::{
        IndicesCloneParts,
        IndicesCreateParts,
        IndicesDeleteParts,
        IndicesExistsParts,
        IndicesGetAliasParts,
        IndicesPutSettingsParts,
        IndicesRefreshParts,
    },
    BulkParts,
    CountParts,
    Elasticsearch,
    SearchParts,
};
use errors::{
    ErrorMetadata,
    ErrorMetadataAnyhowExt,
};
use futures::{
    Future,
    StreamExt,
};
use model::{
    Model,
    DEFAULT_MODEL,
};
use serde_json::{
    json,
    Value,
};
use tokio::sync::Semaphore;

use crate::{
    mapping::{
        index_settings,
        make_entity_mapping,
    },
    metrics,
    pool::ClientPool,
    provider::{
        to_bulk_operation,
        BulkOperation,
        EnvelopeStream,
        SearchProvider,
    },
};

const INITIAL_RETRY_BACKOFF: Duration = Duration::from_millis(500);
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(10);

pub struct ElasticsearchProvider {
    client: Elasticsearch,
    query_limiter: Arc<Semaphore>,
    model: &'static Model,
}

impl fmt::Debug for ElasticsearchProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElasticsearchProvider").finish_non_exhaustive()
    }
}

impl ElasticsearchProvider {
    pub async fn create(pool: &ClientPool) -> anyhow::Result<Self> {
        Ok(Self {
            client: pool.get().await?,
            query_limiter: pool.query_limiter(),
            model: &DEFAULT_MODEL,
        })
    }

    /// Retry transport-level faults with jittered backoff. Responses, even
    /// error-status ones, come back untouched: HTTP-level errors carry
    /// semantics (not found, already exists) the callers classify
    /// themselves.
    async fn send_with_retries<F, Fut>(&self, what: &str, send: F) -> anyhow::Result<Response>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Response, elasticsearch::Error>>,
    {
        let mut backoff = Backoff::new(INITIAL_RETRY_BACKOFF, MAX_RETRY_BACKOFF);
        loop {
            match send().await {
                Ok(response) => return Ok(response),
                Err(e) if backoff.failures() < *ES_MAX_RETRIES => {
                    let delay = backoff.fail(&mut rand::rng());
                    tracing::warn!("Transient failure in {what} ({e}), retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                },
                Err(e) => {
                    return Err(anyhow::Error::new(e).context(ErrorMetadata::unavailable(
                        "BackendUnavailable",
                        format!("Search backend unreachable during {what}"),
                    )));
                },
            }
        }
    }

    /// Decode a response body, converting HTTP error statuses into
    /// classified errors.
    async fn read_body(&self, what: &str, response: Response) -> anyhow::Result<Value> {
        let status = response.status_code();
        if status.is_success() {
            return response
                .json()
                .await
                .with_context(|| format!("could not decode {what} response"));
        }
        let body: Value = response.json().await.unwrap_or(Value::Null);
        Err(classify_error(what, status, &body).into())
    }

    async fn set_write_block(&self, index: &str, blocked: bool) -> anyhow::Result<()> {
        let indices = self.client.indices();
        let index_parts = [index];
        let response = self
            .send_with_retries("put_settings", || {
                indices
                    .put_settings(IndicesPutSettingsParts::Index(&index_parts))
                    .body(json!({"index": {"blocks": {"read_only": blocked}}}))
                    .send()
            })
            .await?;
        self.read_body("put_settings", response).await?;
        Ok(())
    }
}

/// Map an HTTP error response onto our error taxonomy. Elasticsearch
/// reports both "missing" and "exists" conditions with a typed error
/// object in the body.
fn classify_error(what: &str, status: StatusCode, body: &Value) -> ErrorMetadata {
    let error_type = body["error"]["type"].as_str().unwrap_or("");
    let reason = body["error"]["reason"]
        .as_str()
        .unwrap_or("no reason given")
        .to_string();
    if error_type == "resource_already_exists_exception" {
        return ErrorMetadata::already_exists("IndexAlreadyExists", reason);
    }
    match status.as_u16() {
        404 => ErrorMetadata::not_found("IndexNotFound", reason),
        400..=499 => {
            ErrorMetadata::bad_request("BackendRejected", format!("{what} rejected: {reason}"))
        },
        _ => ErrorMetadata::internal("BackendError", format!("{what} failed: {reason}")),
    }
}

#[async_trait]
impl SearchProvider for ElasticsearchProvider {
    async fn upsert_index(&self, index: &str) -> anyhow::Result<()> {
        let body = json!({
            "mappings": make_entity_mapping(self.model),
            "settings": index_settings(),
        });
        let indices = self.client.indices();
        let response = self
            .send_with_retries("create_index", || {
                indices
                    .create(IndicesCreateParts::Index(index))
                    .body(body.clone())
                    .send()
            })
            .await?;
        match self.read_body("create_index", response).await {
            Ok(_) => {
                tracing::info!(index, "Created index");
                Ok(())
            },
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn clone_index(&self, index: &str, new_index: &str) -> anyhow::Result<()> {
        self.set_write_block(index, true).await?;
        let clone_result: anyhow::Result<()> = async {
            let indices = self.client.indices();
            let response = self
                .send_with_retries("clone_index", || {
                    indices
                        .clone(IndicesCloneParts::IndexTarget(index, new_index))
                        .body(json!({
                            "settings": {"index": {"blocks": {"read_only": false}}},
                        }))
                        .send()
                })
                .await?;
            self.read_body("clone_index", response).await?;
            Ok(())
        }
        .await;
        // The source must come back writable whether or not the clone
        // succeeded.
        let unblock_result = self.set_write_block(index, false).await;
        clone_result?;
        unblock_result
    }

    async fn index_exists(&self, index: &str) -> anyhow::Result<bool> {
        let indices = self.client.indices();
        let index_parts = [index];
        let response = self
            .send_with_retries("index_exists", || {
                indices.exists(IndicesExistsParts::Index(&index_parts)).send()
            })
            .await?;
        match response.status_code().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => anyhow::bail!(ErrorMetadata::internal(
                "BackendError",
                format!("index_exists returned status {status}"),
            )),
        }
    }

    async fn delete_index(&self, index: &str) -> anyhow::Result<()> {
        let indices = self.client.indices();
        let index_parts = [index];
        let response = self
            .send_with_retries("delete_index", || {
                indices.delete(IndicesDeleteParts::Index(&index_parts)).send()
            })
            .await?;
        match self.read_body("delete_index", response).await {
            Ok(_) => {
                tracing::info!(index, "Deleted index");
                Ok(())
            },
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn refresh(&self, index: &str) -> anyhow::Result<()> {
        let indices = self.client.indices();
        let index_parts = [index];
        let response = self
            .send_with_retries("refresh", || {
                indices.refresh(IndicesRefreshParts::Index(&index_parts)).send()
            })
            .await?;
        self.read_body("refresh", response).await?;
        Ok(())
    }

    async fn rollover(
        &self,
        alias: &str,
        new_index: &str,
        family_prefix: &str,
    ) -> anyhow::Result<()> {
        let actions = json!({
            "actions": [
                {"remove": {"index": format!("{family_prefix}*"), "alias": alias}},
                {"add": {"index": new_index, "alias": alias}},
            ]
        });
        let indices = self.client.indices();
        let response = self
            .send_with_retries("rollover", || indices.update_aliases().body(actions.clone()).send())
            .await?;
        self.read_body("rollover", response).await?;
        tracing::info!(alias, new_index, "Rolled over alias");
        Ok(())
    }

    async fn count(&self, index: &str) -> anyhow::Result<u64> {
        let index_parts = [index];
        let response = self
            .send_with_retries("count", || self.client.count(CountParts::Index(&index_parts)).send())
            .await?;
        let body = self.read_body("count", response).await?;
        body["count"]
            .as_u64()
            .context("count response carries no count")
    }

    async fn get_backing_indexes(&self, alias: &str) -> anyhow::Result<Vec<String>> {
        let indices = self.client.indices();
        let alias_parts = [alias];
        let response = self
            .send_with_retries("get_alias", || {
                indices.get_alias(IndicesGetAliasParts::Name(&alias_parts)).send()
            })
            .await?;
        match self.read_body("get_alias", response).await {
            Ok(body) => Ok(body
                .as_object()
                .map(|indexes| indexes.keys().cloned().collect())
                .unwrap_or_default()),
            // A fresh cluster has no alias yet: nothing backs it.
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn list_indices(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let pattern = format!("{prefix}*");
        let cat = self.client.cat();
        let pattern_parts = [pattern.as_str()];
        let response = self
            .send_with_retries("cat_indices", || {
                cat.indices(CatIndicesParts::Index(&pattern_parts)).format("json").send()
            })
            .await?;
        match self.read_body("cat_indices", response).await {
            Ok(body) => Ok(body
                .as_array()
                .map(|rows| {
                    rows.iter()
                        .filter_map(|row| row["index"].as_str())
                        .map(|name| name.to_string())
                        .collect()
                })
                .unwrap_or_default()),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn update(&self, entities: EnvelopeStream, index: &str) -> anyhow::Result<(u64, u64)> {
        let mut ok = 0u64;
        let mut chunks = entities.chunks(*BULK_CHUNK_SIZE);
        while let Some(batch) = chunks.next().await {
            let mut lines: Vec<Value> = Vec::with_capacity(batch.len() * 2);
            let mut batch_ops = 0u64;
            for envelope in batch {
                match to_bulk_operation(self.model, envelope?)? {
                    BulkOperation::Index { doc_id, document } => {
                        lines.push(json!({"index": {"_index": index, "_id": doc_id}}));
                        lines.push(document);
                    },
                    BulkOperation::Delete { doc_id } => {
                        lines.push(json!({"delete": {"_index": index, "_id": doc_id}}));
                    },
                }
                batch_ops += 1;
            }
            if lines.is_empty() {
                continue;
            }
            let response = self
                .send_with_retries("bulk", || {
                    let body: Vec<JsonBody<Value>> =
                        lines.iter().cloned().map(JsonBody::from).collect();
                    self.client.bulk(BulkParts::Index(index)).body(body).send()
                })
                .await?;
            let body = self.read_body("bulk", response).await?;
            if body["errors"].as_bool().unwrap_or(false) {
                let detail = first_item_error(&body);
                metrics::log_bulk_failures(index, 1);
                anyhow::bail!(ErrorMetadata::internal(
                    "BulkIndexFailure",
                    format!("Bulk update of {index} failed: {detail}"),
                ));
            }
            ok += batch_ops;
            metrics::log_bulk_chunk(index, batch_ops);
        }
        Ok((ok, 0))
    }

    async fn search(&self, index: &str, body: Value) -> anyhow::Result<Value> {
        let _permit = self
            .query_limiter
            .acquire()
            .await
            .context("query limiter closed")?;
        let started = Instant::now();
        let index_parts = [index];
        let response = self
            .send_with_retries("search", || {
                self.client.search(SearchParts::Index(&index_parts)).body(body.clone()).send()
            })
            .await?;
        let result = self.read_body("search", response).await?;
        metrics::log_query(index, started);
        Ok(result)
    }
}

fn first_item_error(body: &Value) -> Value {
    body["items"]
        .as_array()
        .and_then(|items| {
            items.iter().find_map(|item| {
                let (_, op) = item.as_object()?.iter().next()?;
                let failed = op["status"].as_u64().is_some_and(|status| status >= 300);
                failed.then(|| op["error"].clone())
            })
        })
        .unwrap_or(Value::Null)
}
