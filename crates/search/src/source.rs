//! Upstream data interface. The catalog fetcher itself lives outside this
//! crate; the indexer only ever sees it through this trait, as an opaque
//! producer of dataset listings and envelope streams.

use std::fmt::Debug;

use async_trait::async_trait;
use common::Dataset;

use crate::provider::EnvelopeStream;

#[async_trait]
pub trait UpdateSource: Send + Sync + Debug {
    /// The datasets this deployment should index.
    async fn list_datasets(&self) -> anyhow::Result<Vec<Dataset>>;

    /// The newest published version of a dataset.
    async fn target_version(&self, dataset: &Dataset) -> anyhow::Result<String>;

    /// Whether a delta chain exists from `from_version` to `to_version`.
    /// When the chain is broken the indexer falls back to a full rebuild.
    async fn delta_available(
        &self,
        dataset: &Dataset,
        from_version: &str,
        to_version: &str,
    ) -> anyhow::Result<bool>;

    /// Stream every entity of a dataset version, as ADD envelopes.
    async fn iter_entities(
        &self,
        dataset: &Dataset,
        version: &str,
    ) -> anyhow::Result<EnvelopeStream>;

    /// Stream only the changes between two versions.
    async fn iter_delta(
        &self,
        dataset: &Dataset,
        from_version: &str,
        to_version: &str,
    ) -> anyhow::Result<EnvelopeStream>;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use common::{
        Dataset,
        UpdateEnvelope,
    };
    use errors::ErrorMetadata;
    use futures::StreamExt;

    use crate::{
        provider::EnvelopeStream,
        source::UpdateSource,
    };

    /// Fixture source: a fixed catalog of datasets with canned full exports
    /// and deltas.
    #[derive(Debug, Default)]
    pub struct StaticUpdateSource {
        datasets: Vec<Dataset>,
        versions: BTreeMap<String, String>,
        entities: BTreeMap<(String, String), Vec<UpdateEnvelope>>,
        deltas: BTreeMap<(String, String, String), Vec<UpdateEnvelope>>,
    }

    impl StaticUpdateSource {
        pub fn with_dataset(mut self, dataset: Dataset, version: &str) -> Self {
            self.versions
                .insert(dataset.name.clone(), version.to_string());
            self.datasets.push(dataset);
            self
        }

        pub fn with_entities(
            mut self,
            dataset: &str,
            version: &str,
            envelopes: Vec<UpdateEnvelope>,
        ) -> Self {
            self.entities
                .insert((dataset.to_string(), version.to_string()), envelopes);
            self
        }

        pub fn with_delta(
            mut self,
            dataset: &str,
            from_version: &str,
            to_version: &str,
            envelopes: Vec<UpdateEnvelope>,
        ) -> Self {
            self.deltas.insert(
                (
                    dataset.to_string(),
                    from_version.to_string(),
                    to_version.to_string(),
                ),
                envelopes,
            );
            self
        }
    }

    #[async_trait]
    impl UpdateSource for StaticUpdateSource {
        async fn list_datasets(&self) -> anyhow::Result<Vec<Dataset>> {
            Ok(self.datasets.clone())
        }

        async fn target_version(&self, dataset: &Dataset) -> anyhow::Result<String> {
            self.versions
                .get(&dataset.name)
                .cloned()
                .ok_or_else(|| {
                    ErrorMetadata::not_found(
                        "DatasetNotFound",
                        format!("no version for dataset {}", dataset.name),
                    )
                    .into()
                })
        }

        async fn delta_available(
            &self,
            dataset: &Dataset,
            from_version: &str,
            to_version: &str,
        ) -> anyhow::Result<bool> {
            Ok(self.deltas.contains_key(&(
                dataset.name.clone(),
                from_version.to_string(),
                to_version.to_string(),
            )))
        }

        async fn iter_entities(
            &self,
            dataset: &Dataset,
            version: &str,
        ) -> anyhow::Result<EnvelopeStream> {
            let envelopes = self
                .entities
                .get(&(dataset.name.clone(), version.to_string()))
                .cloned()
                .unwrap_or_default();
            Ok(futures::stream::iter(envelopes.into_iter().map(Ok)).boxed())
        }

        async fn iter_delta(
            &self,
            dataset: &Dataset,
            from_version: &str,
            to_version: &str,
        ) -> anyhow::Result<EnvelopeStream> {
            let envelopes = self
                .deltas
                .get(&(
                    dataset.name.clone(),
                    from_version.to_string(),
                    to_version.to_string(),
                ))
                .cloned()
                .unwrap_or_default();
            Ok(futures::stream::iter(envelopes.into_iter().map(Ok)).boxed())
        }
    }
}
