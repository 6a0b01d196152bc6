use serde::{
    Deserialize,
    Serialize,
};

/// A logical dataset as published by the upstream catalog. Collections
/// expand transitively into the upstream dataset identifiers listed in
/// `source_names`; those identifiers are what entity documents carry in
/// their `datasets` field, so they are also what query filters match on.
///
/// Datasets are shared, read-only snapshots once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    #[serde(default)]
    pub source_names: Vec<String>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, source_names: Vec<String>) -> Self {
        let name = name.into();
        let source_names = if source_names.is_empty() {
            vec![name.clone()]
        } else {
            source_names
        };
        Self { name, source_names }
    }
}

#[cfg(test)]
mod tests {
    use crate::dataset::Dataset;

    #[test]
    fn test_bare_dataset_is_its_own_source() {
        let dataset = Dataset::new("us_ofac", vec![]);
        assert_eq!(dataset.source_names, vec!["us_ofac".to_string()]);

        let collection = Dataset::new(
            "sanctions",
            vec!["us_ofac".to_string(), "eu_fsf".to_string()],
        );
        assert_eq!(collection.source_names.len(), 2);
    }
}
