//! Dataset (re-)indexing pipeline.
//!
//! For every dataset the indexer either clones the live index and applies
//! a delta stream, or rebuilds from a full export, then atomically swaps
//! the query alias. Query traffic keeps hitting the previous index until
//! the swap, and a failed build never leaves the alias pointing at a
//! partial index.

use std::{
    collections::BTreeSet,
    sync::Arc,
};

use common::{
    index_name::parse_index_name,
    knobs::{
        ENTITY_INDEX,
        INDEX_PREFIX,
    },
    Dataset,
};
use errors::ErrorMetadata;
use itertools::Itertools;
use parking_lot::Mutex;

use crate::{
    index::{
        get_current_version,
        Index,
    },
    metrics,
    provider::SearchProvider,
    source::UpdateSource,
};

/// What a single dataset update did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    /// The live index already matches the catalog version.
    UpToDate,
    FullRebuild {
        documents: u64,
    },
    DeltaApplied {
        operations: u64,
    },
}

/// Process-local mutual exclusion per dataset. Operators must run at most
/// one indexer process per backing cluster; distributed exclusion is not
/// provided.
#[derive(Debug, Default)]
struct DatasetLocks {
    held: Arc<Mutex<BTreeSet<String>>>,
}

struct DatasetLockGuard {
    held: Arc<Mutex<BTreeSet<String>>>,
    dataset: String,
}

impl DatasetLocks {
    fn try_acquire(&self, dataset: &str) -> anyhow::Result<DatasetLockGuard> {
        let mut held = self.held.lock();
        anyhow::ensure!(
            held.insert(dataset.to_string()),
            ErrorMetadata::busy(
                "IndexerBusy",
                format!("Dataset {dataset} is already being indexed"),
            )
        );
        Ok(DatasetLockGuard {
            held: self.held.clone(),
            dataset: dataset.to_string(),
        })
    }
}

impl Drop for DatasetLockGuard {
    fn drop(&mut self) {
        self.held.lock().remove(&self.dataset);
    }
}

#[derive(Debug)]
pub struct Indexer {
    provider: Arc<dyn SearchProvider>,
    source: Arc<dyn UpdateSource>,
    locks: DatasetLocks,
}

impl Indexer {
    pub fn new(provider: Arc<dyn SearchProvider>, source: Arc<dyn UpdateSource>) -> Self {
        Self {
            provider,
            source,
            locks: DatasetLocks::default(),
        }
    }

    /// Update every dataset the source lists. Datasets fail independently;
    /// the first round of failures is reported after all datasets have had
    /// their turn.
    pub async fn update_all(&self, force: bool) -> anyhow::Result<Vec<(String, IndexOutcome)>> {
        let datasets = self.source.list_datasets().await?;
        let mut outcomes = Vec::with_capacity(datasets.len());
        let mut failed = Vec::new();
        for dataset in &datasets {
            match self.update_dataset(dataset, force).await {
                Ok(outcome) => outcomes.push((dataset.name.clone(), outcome)),
                Err(e) => {
                    tracing::error!(dataset = %dataset.name, "Indexing failed: {e:#}");
                    failed.push(dataset.name.clone());
                },
            }
        }
        anyhow::ensure!(
            failed.is_empty(),
            ErrorMetadata::internal(
                "ReindexFailed",
                format!("Indexing failed for: {}", failed.iter().join(", ")),
            )
        );
        Ok(outcomes)
    }

    /// Bring one dataset's index up to the catalog's target version.
    pub async fn update_dataset(
        &self,
        dataset: &Dataset,
        force: bool,
    ) -> anyhow::Result<IndexOutcome> {
        let _guard = self.locks.try_acquire(&dataset.name)?;
        let target = self.source.target_version(dataset).await?;
        let current = get_current_version(&self.provider, &dataset.name).await?;
        if !force && current.as_deref() == Some(target.as_str()) {
            tracing::info!(dataset = %dataset.name, version = %target, "Index is up to date");
            metrics::log_reindex(&dataset.name, "up_to_date");
            return Ok(IndexOutcome::UpToDate);
        }
        let delta_base = match &current {
            Some(version) if !force => self
                .source
                .delta_available(dataset, version, &target)
                .await?
                .then(|| version.clone()),
            _ => None,
        };
        let outcome = match delta_base {
            Some(from) => self.delta_update(dataset, &from, &target).await,
            None => self.full_rebuild(dataset, &target).await,
        };
        if outcome.is_err() {
            metrics::log_reindex(&dataset.name, "failed");
        }
        outcome
    }

    async fn full_rebuild(&self, dataset: &Dataset, target: &str) -> anyhow::Result<IndexOutcome> {
        tracing::info!(dataset = %dataset.name, version = %target, "Full index rebuild");
        let next = Index::new(self.provider.clone(), &dataset.name, target)?;
        next.upsert().await?;
        let built = async {
            let stream = self.source.iter_entities(dataset, target).await?;
            let (ok, _) = next.bulk_update(stream).await?;
            next.refresh().await?;
            let documents = next.count().await?;
            anyhow::ensure!(
                documents > 0,
                ErrorMetadata::internal(
                    "EmptyIndex",
                    format!("Index {} is empty after a full rebuild", next.name()),
                )
            );
            tracing::info!(operations = ok, documents, index = next.name(), "Index built");
            anyhow::Ok(documents)
        }
        .await;
        let documents = match built {
            Ok(documents) => documents,
            Err(e) => {
                self.discard(&next).await;
                return Err(e);
            },
        };

        // Collect the family's previous backing indices before the switch;
        // they are deleted only once the alias no longer serves them.
        let obsolete = self.family_backing_indexes(&dataset.name).await?;
        if let Err(e) = next.make_main().await {
            self.discard(&next).await;
            return Err(e);
        }
        for index in obsolete {
            if index != next.name() {
                if let Err(e) = self.provider.delete_index(&index).await {
                    tracing::error!(index = %index, "Could not delete obsolete index: {e:#}");
                }
            }
        }
        metrics::log_reindex(&dataset.name, "full_rebuild");
        Ok(IndexOutcome::FullRebuild { documents })
    }

    async fn delta_update(
        &self,
        dataset: &Dataset,
        from: &str,
        target: &str,
    ) -> anyhow::Result<IndexOutcome> {
        tracing::info!(
            dataset = %dataset.name,
            from,
            to = target,
            "Delta index update"
        );
        let current = Index::new(self.provider.clone(), &dataset.name, from)?;
        let next = current.clone_to(target).await?;
        let applied = async {
            let stream = self.source.iter_delta(dataset, from, target).await?;
            let (ok, _) = next.bulk_update(stream).await?;
            next.refresh().await?;
            next.make_main().await?;
            anyhow::Ok(ok)
        }
        .await;
        let operations = match applied {
            Ok(operations) => operations,
            Err(e) => {
                self.discard(&next).await;
                return Err(e);
            },
        };
        if let Err(e) = current.delete().await {
            tracing::error!(index = current.name(), "Could not delete old index: {e:#}");
        }
        metrics::log_reindex(&dataset.name, "delta");
        Ok(IndexOutcome::DeltaApplied { operations })
    }

    async fn family_backing_indexes(&self, dataset: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .provider
            .get_backing_indexes(&ENTITY_INDEX)
            .await?
            .into_iter()
            .filter(|name| {
                parse_index_name(&INDEX_PREFIX, name)
                    .map(|(_, parsed, _)| parsed == dataset)
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Best-effort removal of a partially built index after a fatal error.
    async fn discard(&self, index: &Index) {
        if let Err(e) = index.delete().await {
            tracing::error!(
                index = index.name(),
                "Could not clean up partial index: {e:#}"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common::{
        Dataset,
        UpdateEnvelope,
    };
    use errors::ErrorMetadataAnyhowExt;
    use serde_json::json;

    use crate::{
        index::{
            get_current_version,
            Index,
        },
        indexer::{
            IndexOutcome,
            Indexer,
        },
        memory::MemorySearchProvider,
        provider::SearchProvider,
        source::testing::StaticUpdateSource,
    };

    fn person(id: &str, name: &str) -> serde_json::Value {
        json!({
            "id": id,
            "schema": "Person",
            "properties": {"name": [name]}
        })
    }

    fn adds(people: &[(&str, &str)]) -> Vec<UpdateEnvelope> {
        people
            .iter()
            .map(|(id, name)| UpdateEnvelope::add(person(id, name)))
            .collect()
    }

    fn fixture(source: StaticUpdateSource) -> (Arc<MemorySearchProvider>, Indexer) {
        let memory = Arc::new(MemorySearchProvider::new());
        let provider: Arc<dyn SearchProvider> = memory.clone();
        (memory, Indexer::new(provider, Arc::new(source)))
    }

    #[tokio::test]
    async fn test_full_rebuild_happy_path() -> anyhow::Result<()> {
        let dataset = Dataset::new("test_ds", vec![]);
        let source = StaticUpdateSource::default()
            .with_dataset(dataset.clone(), "v2")
            .with_entities(
                "test_ds",
                "v2",
                adds(&[("a", "Anna Aalto"), ("b", "Boris Berg"), ("c", "Carla Cruz")]),
            );
        let (memory, indexer) = fixture(source);

        let outcome = indexer.update_dataset(&dataset, false).await?;
        assert_eq!(outcome, IndexOutcome::FullRebuild { documents: 3 });

        let name = "yente-entities-test_ds-v2";
        assert_eq!(memory.count(name).await?, 3);
        assert_eq!(
            memory.get_backing_indexes("yente-entities").await?,
            vec![name.to_string()]
        );
        let provider: Arc<dyn SearchProvider> = memory.clone();
        assert_eq!(
            get_current_version(&provider, "test_ds").await?,
            Some("v2".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_rerun_is_a_noop() -> anyhow::Result<()> {
        let dataset = Dataset::new("test_ds", vec![]);
        let source = StaticUpdateSource::default()
            .with_dataset(dataset.clone(), "v1")
            .with_entities("test_ds", "v1", adds(&[("a", "Anna Aalto")]));
        let (_, indexer) = fixture(source);

        indexer.update_dataset(&dataset, false).await?;
        let outcome = indexer.update_dataset(&dataset, false).await?;
        assert_eq!(outcome, IndexOutcome::UpToDate);
        Ok(())
    }

    #[tokio::test]
    async fn test_dashed_catalog_versions_round_trip() -> anyhow::Result<()> {
        let dataset = Dataset::new("test_ds", vec![]);
        let source = StaticUpdateSource::default()
            .with_dataset(dataset.clone(), "20240101-abc")
            .with_entities("test_ds", "20240101-abc", adds(&[("a", "Anna Aalto")]));
        let (memory, indexer) = fixture(source);

        indexer.update_dataset(&dataset, false).await?;
        assert!(
            memory
                .index_exists("yente-entities-test_ds-20240101.abc")
                .await?
        );
        let provider: Arc<dyn SearchProvider> = memory.clone();
        assert_eq!(
            get_current_version(&provider, "test_ds").await?,
            Some("20240101-abc".to_string())
        );
        // The version read back from the index name compares equal to the
        // catalog version, so a rerun is a no-op instead of a rebuild.
        assert_eq!(
            indexer.update_dataset(&dataset, false).await?,
            IndexOutcome::UpToDate
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_dotted_catalog_version_is_refused() -> anyhow::Result<()> {
        let dataset = Dataset::new("test_ds", vec![]);
        let source = StaticUpdateSource::default()
            .with_dataset(dataset.clone(), "2024.01")
            .with_entities("test_ds", "2024.01", adds(&[("a", "Anna Aalto")]));
        let (memory, indexer) = fixture(source);

        let err = indexer.update_dataset(&dataset, false).await.unwrap_err();
        assert_eq!(err.short_msg(), "InvalidDatasetVersion");
        assert!(
            memory
                .get_backing_indexes("yente-entities")
                .await?
                .is_empty()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_delta_update() -> anyhow::Result<()> {
        let dataset = Dataset::new("test_ds", vec![]);
        let seed = StaticUpdateSource::default()
            .with_dataset(dataset.clone(), "v1")
            .with_entities(
                "test_ds",
                "v1",
                adds(&[("a", "Anna Aalto"), ("b", "Boris Berg")]),
            );
        let (memory, indexer) = fixture(seed);
        indexer.update_dataset(&dataset, false).await?;

        let delta_source = StaticUpdateSource::default()
            .with_dataset(dataset.clone(), "v2")
            .with_delta(
                "test_ds",
                "v1",
                "v2",
                vec![
                    UpdateEnvelope::modify(person("a", "Anna Aalto-Smith")),
                    UpdateEnvelope::delete("b"),
                    UpdateEnvelope::add(person("c", "Carla Cruz")),
                ],
            );
        let provider: Arc<dyn SearchProvider> = memory.clone();
        let indexer = Indexer::new(provider.clone(), Arc::new(delta_source));

        let outcome = indexer.update_dataset(&dataset, false).await?;
        assert_eq!(outcome, IndexOutcome::DeltaApplied { operations: 3 });

        let name = "yente-entities-test_ds-v2";
        assert_eq!(memory.count(name).await?, 2);
        assert_eq!(memory.document_ids(name), vec!["a", "c"]);
        // MOD replaced the whole document.
        let doc = memory.document(name, "a").unwrap();
        assert_eq!(doc["names"], json!(["Anna Aalto-Smith"]));
        assert_eq!(
            memory.get_backing_indexes("yente-entities").await?,
            vec![name.to_string()]
        );
        assert!(!memory.index_exists("yente-entities-test_ds-v1").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_rebuild_rolls_back() -> anyhow::Result<()> {
        let dataset = Dataset::new("test_ds", vec![]);
        let source = StaticUpdateSource::default().with_dataset(dataset.clone(), "v2");
        let (memory, indexer) = fixture(source);

        let err = indexer.update_dataset(&dataset, false).await.unwrap_err();
        assert_eq!(err.short_msg(), "EmptyIndex");
        assert!(!memory.index_exists("yente-entities-test_ds-v2").await?);
        assert!(memory
            .get_backing_indexes("yente-entities")
            .await?
            .is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_force_takes_the_rebuild_path() -> anyhow::Result<()> {
        let dataset = Dataset::new("test_ds", vec![]);
        let seed = StaticUpdateSource::default()
            .with_dataset(dataset.clone(), "v1")
            .with_entities("test_ds", "v1", adds(&[("a", "Anna Aalto")]));
        let (memory, indexer) = fixture(seed);
        indexer.update_dataset(&dataset, false).await?;

        // Delta exists, but force must rebuild from the full export.
        let source = StaticUpdateSource::default()
            .with_dataset(dataset.clone(), "v2")
            .with_entities(
                "test_ds",
                "v2",
                adds(&[("a", "Anna Aalto"), ("c", "Carla Cruz")]),
            )
            .with_delta("test_ds", "v1", "v2", vec![]);
        let provider: Arc<dyn SearchProvider> = memory.clone();
        let indexer = Indexer::new(provider, Arc::new(source));

        let outcome = indexer.update_dataset(&dataset, true).await?;
        assert_eq!(outcome, IndexOutcome::FullRebuild { documents: 2 });
        assert!(!memory.index_exists("yente-entities-test_ds-v1").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_rollover_leaves_other_datasets_attached() -> anyhow::Result<()> {
        let ds1 = Dataset::new("ds_one", vec![]);
        let ds2 = Dataset::new("ds_two", vec![]);
        let source = StaticUpdateSource::default()
            .with_dataset(ds1.clone(), "v1")
            .with_dataset(ds2.clone(), "v1")
            .with_entities("ds_one", "v1", adds(&[("a", "Anna Aalto")]))
            .with_entities("ds_two", "v1", adds(&[("b", "Boris Berg")]));
        let (memory, indexer) = fixture(source);
        indexer.update_all(false).await?;
        assert_eq!(
            memory.get_backing_indexes("yente-entities").await?.len(),
            2
        );

        let source = StaticUpdateSource::default()
            .with_dataset(ds1.clone(), "v2")
            .with_entities("ds_one", "v2", adds(&[("a", "Anna Aalto")]));
        let provider: Arc<dyn SearchProvider> = memory.clone();
        let indexer = Indexer::new(provider, Arc::new(source));
        indexer.update_dataset(&ds1, false).await?;

        assert_eq!(
            memory.get_backing_indexes("yente-entities").await?,
            vec![
                "yente-entities-ds_one-v2".to_string(),
                "yente-entities-ds_two-v1".to_string(),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_dataset_lock_reports_busy() -> anyhow::Result<()> {
        let dataset = Dataset::new("test_ds", vec![]);
        let source = StaticUpdateSource::default()
            .with_dataset(dataset.clone(), "v1")
            .with_entities("test_ds", "v1", adds(&[("a", "Anna Aalto")]));
        let (_, indexer) = fixture(source);

        let _guard = indexer.locks.try_acquire("test_ds")?;
        let err = indexer.update_dataset(&dataset, false).await.unwrap_err();
        assert!(err.is_busy());
        assert_eq!(err.short_msg(), "IndexerBusy");
        Ok(())
    }

    #[tokio::test]
    async fn test_self_clone_is_refused() -> anyhow::Result<()> {
        let memory = Arc::new(MemorySearchProvider::new());
        let provider: Arc<dyn SearchProvider> = memory.clone();
        let index = Index::new(provider, "test_ds", "v1")?;
        index.upsert().await?;
        let err = index.clone_to("v1").await.unwrap_err();
        assert_eq!(err.short_msg(), "SelfClone");
        Ok(())
    }
}
