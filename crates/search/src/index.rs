//! Per-(dataset, version) index façade.

use std::sync::Arc;

use common::{
    index_name::{
        construct_index_name,
        dataset_to_index_version,
        index_to_dataset_version,
        parse_index_name,
    },
    knobs::{
        ENTITY_INDEX,
        INDEX_PREFIX,
    },
};
use errors::ErrorMetadata;

use crate::provider::{
    EnvelopeStream,
    SearchProvider,
};

/// Handle on one concrete backing index. All mutations of that index go
/// through this object; the provider underneath owns the client session.
#[derive(Debug, Clone)]
pub struct Index {
    provider: Arc<dyn SearchProvider>,
    dataset: String,
    version: String,
    name: String,
}

impl Index {
    /// `version` is the catalog version; it is mapped onto the index-name
    /// charset when the name is built. Catalog versions carrying `.` are
    /// refused: they could not be read back from the index name intact.
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        dataset: &str,
        version: &str,
    ) -> anyhow::Result<Self> {
        let index_version = dataset_to_index_version(version)?;
        let name = construct_index_name(&INDEX_PREFIX, dataset, Some(&index_version))?;
        Ok(Self {
            provider,
            dataset: dataset.to_string(),
            version: version.to_string(),
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub async fn exists(&self) -> anyhow::Result<bool> {
        self.provider.index_exists(&self.name).await
    }

    pub async fn upsert(&self) -> anyhow::Result<()> {
        self.provider.upsert_index(&self.name).await
    }

    pub async fn delete(&self) -> anyhow::Result<()> {
        self.provider.delete_index(&self.name).await
    }

    pub async fn refresh(&self) -> anyhow::Result<()> {
        self.provider.refresh(&self.name).await
    }

    pub async fn count(&self) -> anyhow::Result<u64> {
        self.provider.count(&self.name).await
    }

    /// Copy this index into a new version of the same dataset.
    pub async fn clone_to(&self, version: &str) -> anyhow::Result<Index> {
        let cloned = Index::new(self.provider.clone(), &self.dataset, version)?;
        anyhow::ensure!(
            cloned.name != self.name,
            ErrorMetadata::bad_request(
                "SelfClone",
                format!("Cannot clone index {} onto itself", self.name),
            )
        );
        self.provider.clone_index(&self.name, &cloned.name).await?;
        Ok(cloned)
    }

    /// Make this index the one backing entity searches: the alias drops
    /// every index of this dataset's family and picks this one up, in one
    /// atomic alias update. Other datasets' backing indices are untouched.
    pub async fn make_main(&self) -> anyhow::Result<()> {
        let family = construct_index_name(&INDEX_PREFIX, &self.dataset, None)?;
        self.provider
            .rollover(&ENTITY_INDEX, &self.name, &family)
            .await
    }

    pub async fn bulk_update(&self, entities: EnvelopeStream) -> anyhow::Result<(u64, u64)> {
        self.provider.update(entities, &self.name).await
    }
}

/// The catalog version of a dataset currently backing the entity alias, if
/// any. The rollover invariant keeps at most one index per dataset family
/// on the alias; if several are found (say, after a crashed rollover), the
/// newest wins.
pub async fn get_current_version(
    provider: &Arc<dyn SearchProvider>,
    dataset: &str,
) -> anyhow::Result<Option<String>> {
    let sources = provider.get_backing_indexes(&ENTITY_INDEX).await?;
    let mut versions: Vec<String> = sources
        .iter()
        .filter_map(|name| parse_index_name(&INDEX_PREFIX, name).ok())
        .filter(|(_, parsed_dataset, _)| parsed_dataset == dataset)
        .map(|(_, _, version)| index_to_dataset_version(&version))
        .collect();
    versions.sort();
    Ok(versions.pop())
}
