//! File-based catalog source for local operation: a JSON manifest listing
//! datasets, their current version, the full entity export, and optional
//! deltas keyed by the version they apply on top of.

use std::{
    collections::BTreeMap,
    path::Path,
};

use anyhow::Context;
use async_trait::async_trait;
use common::{
    Dataset,
    UpdateEnvelope,
};
use futures::StreamExt;
use search::{
    provider::EnvelopeStream,
    UpdateSource,
};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct ManifestDataset {
    name: String,
    #[serde(default)]
    source_names: Vec<String>,
    version: String,
    #[serde(default)]
    entities: Vec<Value>,
    /// Delta streams, keyed by the version they upgrade from.
    #[serde(default)]
    deltas: BTreeMap<String, Vec<UpdateEnvelope>>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    datasets: Vec<ManifestDataset>,
}

#[derive(Debug)]
pub struct FileUpdateSource {
    datasets: BTreeMap<String, ManifestDataset>,
}

impl FileUpdateSource {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("could not read manifest {}", path.display()))?;
        let manifest: Manifest = serde_json::from_str(&raw)
            .with_context(|| format!("could not parse manifest {}", path.display()))?;
        Ok(Self {
            datasets: manifest
                .datasets
                .into_iter()
                .map(|dataset| (dataset.name.clone(), dataset))
                .collect(),
        })
    }

    fn dataset(&self, name: &str) -> anyhow::Result<&ManifestDataset> {
        self.datasets
            .get(name)
            .with_context(|| format!("dataset {name} is not in the manifest"))
    }
}

#[async_trait]
impl UpdateSource for FileUpdateSource {
    async fn list_datasets(&self) -> anyhow::Result<Vec<Dataset>> {
        Ok(self
            .datasets
            .values()
            .map(|dataset| Dataset::new(dataset.name.clone(), dataset.source_names.clone()))
            .collect())
    }

    async fn target_version(&self, dataset: &Dataset) -> anyhow::Result<String> {
        Ok(self.dataset(&dataset.name)?.version.clone())
    }

    async fn delta_available(
        &self,
        dataset: &Dataset,
        from_version: &str,
        to_version: &str,
    ) -> anyhow::Result<bool> {
        let dataset = self.dataset(&dataset.name)?;
        Ok(dataset.version == to_version && dataset.deltas.contains_key(from_version))
    }

    async fn iter_entities(
        &self,
        dataset: &Dataset,
        version: &str,
    ) -> anyhow::Result<EnvelopeStream> {
        let dataset = self.dataset(&dataset.name)?;
        anyhow::ensure!(
            dataset.version == version,
            "manifest only carries version {} of {}",
            dataset.version,
            dataset.name,
        );
        let envelopes: Vec<UpdateEnvelope> = dataset
            .entities
            .iter()
            .cloned()
            .map(UpdateEnvelope::add)
            .collect();
        Ok(futures::stream::iter(envelopes.into_iter().map(Ok)).boxed())
    }

    async fn iter_delta(
        &self,
        dataset: &Dataset,
        from_version: &str,
        _to_version: &str,
    ) -> anyhow::Result<EnvelopeStream> {
        let envelopes = self
            .dataset(&dataset.name)?
            .deltas
            .get(from_version)
            .cloned()
            .unwrap_or_default();
        Ok(futures::stream::iter(envelopes.into_iter().map(Ok)).boxed())
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use crate::source::{
        FileUpdateSource,
        Manifest,
    };

    fn manifest() -> FileUpdateSource {
        let manifest: Manifest = serde_json::from_value(serde_json::json!({
            "datasets": [{
                "name": "test_ds",
                "version": "v2",
                "entities": [
                    {"id": "a", "schema": "Person", "properties": {"name": ["Anna Aalto"]}}
                ],
                "deltas": {
                    "v1": [
                        {"op": "DEL", "entity": {"id": "b"}}
                    ]
                }
            }]
        }))
        .unwrap();
        FileUpdateSource {
            datasets: manifest
                .datasets
                .into_iter()
                .map(|dataset| (dataset.name.clone(), dataset))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_manifest_source() -> anyhow::Result<()> {
        use search::UpdateSource;

        let source = manifest();
        let datasets = source.list_datasets().await?;
        assert_eq!(datasets.len(), 1);
        let dataset = &datasets[0];
        assert_eq!(source.target_version(dataset).await?, "v2");
        assert!(source.delta_available(dataset, "v1", "v2").await?);
        assert!(!source.delta_available(dataset, "v0", "v2").await?);

        let entities: Vec<_> = source.iter_entities(dataset, "v2").await?.collect().await;
        assert_eq!(entities.len(), 1);
        let deltas: Vec<_> = source.iter_delta(dataset, "v1", "v2").await?.collect().await;
        assert_eq!(deltas.len(), 1);
        Ok(())
    }
}
