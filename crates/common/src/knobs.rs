//! Tunable limits and parameters for the search service.
//!
//! Every knob can be overridden with an environment variable of the same
//! name. Each knob has a comment explaining what it is for so an oncall
//! engineer can adjust it safely.

use std::{
    sync::LazyLock,
    time::Duration,
};

use crate::env::{
    env_config,
    env_config_opt,
};

/// Prefix for every index this service creates. Indices are named
/// `<prefix>-<dataset>-<version>`; the query alias is the bare prefix.
/// Reusing one prefix across unrelated deployments of this service against
/// the same cluster is a configuration error: alias rollover detaches
/// indices by prefix match.
pub static INDEX_PREFIX: LazyLock<String> =
    LazyLock::new(|| env_config("INDEX_PREFIX", "yente-entities".to_string()));

/// The stable alias all queries run against. Derived from the index prefix.
pub static ENTITY_INDEX: LazyLock<String> = LazyLock::new(|| INDEX_PREFIX.clone());

/// URL of the search backend node.
pub static ES_URL: LazyLock<String> =
    LazyLock::new(|| env_config("ES_URL", "http://localhost:9200".to_string()));

/// Elastic Cloud deployment ID. Takes precedence over `ES_URL` when set.
pub static ES_CLOUD_ID: LazyLock<Option<String>> = LazyLock::new(|| env_config_opt("ES_CLOUD_ID"));

/// Basic auth credentials for the backend. Both must be set to take effect.
pub static ES_USERNAME: LazyLock<Option<String>> = LazyLock::new(|| env_config_opt("ES_USERNAME"));
pub static ES_PASSWORD: LazyLock<Option<String>> = LazyLock::new(|| env_config_opt("ES_PASSWORD"));

/// Path to a PEM CA certificate used to validate the backend's TLS
/// certificate.
pub static ES_CA_CERT: LazyLock<Option<String>> = LazyLock::new(|| env_config_opt("ES_CA_CERT"));

/// Maximum number of concurrently executing queries. Submissions beyond
/// this wait FIFO on the query semaphore.
pub static QUERY_CONCURRENCY: LazyLock<usize> =
    LazyLock::new(|| env_config("QUERY_CONCURRENCY", 100));

/// Number of bulk operations submitted to the backend per request.
pub static BULK_CHUNK_SIZE: LazyLock<usize> = LazyLock::new(|| env_config("BULK_CHUNK_SIZE", 500));

/// Whether the service re-indexes on its own when the upstream catalog
/// publishes a new dataset version.
pub static AUTO_REINDEX: LazyLock<bool> = LazyLock::new(|| env_config("AUTO_REINDEX", true));

/// Shared secret gating externally triggered re-indexing.
pub static UPDATE_TOKEN: LazyLock<Option<String>> =
    LazyLock::new(|| env_config_opt("UPDATE_TOKEN"));

/// Per-request timeout for backend calls.
pub static ES_REQUEST_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("ES_REQUEST_TIMEOUT_SECS", 30)));

/// Timeout for a single cluster health probe during connection setup.
pub static ES_HEALTH_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("ES_HEALTH_TIMEOUT_SECS", 5)));

/// How many times a backend call is retried on transport faults before the
/// operation fails with BackendUnavailable.
pub static ES_MAX_RETRIES: LazyLock<u32> = LazyLock::new(|| env_config("ES_MAX_RETRIES", 10));
