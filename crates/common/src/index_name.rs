//! Index naming scheme: `<prefix>-<dataset>-<version>`.
//!
//! `-` is the separator, so index versions are restricted to
//! `[A-Za-z0-9.]`. Catalog versions may contain `-`; they are mapped onto
//! the index charset by swapping `-` for `.` before a name is built, and
//! mapped back when a name is parsed. For that swap to be reversible,
//! catalog versions themselves are restricted to `[A-Za-z0-9-]`: a literal
//! `.` in a catalog version would read back as `-` and never compare equal
//! to the catalog again.

use anyhow::Context;
use errors::ErrorMetadata;

fn valid_index_version(version: &str) -> bool {
    !version.is_empty()
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.')
}

/// Build an index name, or the dataset's family prefix when `version` is
/// omitted. The family prefix is a string prefix of every versioned name of
/// the dataset, which is what scopes alias rollover.
pub fn construct_index_name(
    prefix: &str,
    dataset: &str,
    version: Option<&str>,
) -> anyhow::Result<String> {
    anyhow::ensure!(
        !prefix.is_empty() && !dataset.is_empty(),
        ErrorMetadata::bad_request(
            "InvalidIndexName",
            "Index prefix and dataset must be non-empty",
        )
    );
    match version {
        None => Ok(format!("{prefix}-{dataset}")),
        Some(version) => {
            anyhow::ensure!(
                valid_index_version(version),
                ErrorMetadata::bad_request(
                    "InvalidIndexVersion",
                    format!("Index version {version:?} must match [A-Za-z0-9.]+"),
                )
            );
            Ok(format!("{prefix}-{dataset}-{version}"))
        },
    }
}

/// Split an index name into `(prefix, dataset, version)`. The version is
/// everything after the right-most `-`, so datasets may themselves contain
/// `-`. Fails for names built with a different prefix and for family
/// prefixes, which carry no version segment.
pub fn parse_index_name(prefix: &str, name: &str) -> anyhow::Result<(String, String, String)> {
    let rest = name.strip_prefix(prefix).and_then(|r| r.strip_prefix('-')).context(
        ErrorMetadata::bad_request(
            "InvalidIndexName",
            format!("Index {name:?} was created with a different prefix than {prefix:?}"),
        ),
    )?;
    let (dataset, version) = rest.rsplit_once('-').context(ErrorMetadata::bad_request(
        "InvalidIndexName",
        format!("Index {name:?} does not carry a version segment"),
    ))?;
    anyhow::ensure!(
        !dataset.is_empty() && valid_index_version(version),
        ErrorMetadata::bad_request(
            "InvalidIndexName",
            format!("Index {name:?} does not split into prefix, dataset and version"),
        )
    );
    Ok((prefix.to_string(), dataset.to_string(), version.to_string()))
}

/// Map a catalog version onto the index-name charset. Rejects versions
/// carrying `.`, which is reserved for the index-side encoding of `-`;
/// anything accepted here round-trips through
/// [`index_to_dataset_version`] unchanged.
pub fn dataset_to_index_version(version: &str) -> anyhow::Result<String> {
    anyhow::ensure!(
        !version.is_empty()
            && version
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-'),
        ErrorMetadata::bad_request(
            "InvalidDatasetVersion",
            format!("Catalog version {version:?} must match [A-Za-z0-9-]+"),
        )
    );
    Ok(version.replace('-', "."))
}

/// Inverse of [`dataset_to_index_version`] over parsed index versions.
pub fn index_to_dataset_version(version: &str) -> String {
    version.replace('.', "-")
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::index_name::{
        construct_index_name,
        dataset_to_index_version,
        index_to_dataset_version,
        parse_index_name,
    };

    #[test]
    fn test_construct_parse_round_trip() -> anyhow::Result<()> {
        let name = construct_index_name("yente", "sanctions", Some("2024.01"))?;
        assert_eq!(name, "yente-sanctions-2024.01");
        let parsed = parse_index_name("yente", &name)?;
        assert_eq!(
            parsed,
            (
                "yente".to_string(),
                "sanctions".to_string(),
                "2024.01".to_string()
            )
        );
        Ok(())
    }

    #[test]
    fn test_family_prefix_prefixes_versioned_names() -> anyhow::Result<()> {
        let family = construct_index_name("yente-entities", "us_ofac", None)?;
        let versioned = construct_index_name("yente-entities", "us_ofac", Some("20240101.abc"))?;
        assert!(versioned.starts_with(&family));
        Ok(())
    }

    #[test]
    fn test_dataset_may_contain_separator() -> anyhow::Result<()> {
        let name = construct_index_name("yente-entities", "eu-fsf", Some("1.2"))?;
        let (_, dataset, version) = parse_index_name("yente-entities", &name)?;
        assert_eq!(dataset, "eu-fsf");
        assert_eq!(version, "1.2");
        Ok(())
    }

    #[test]
    fn test_rejects_malformed_names() {
        assert!(construct_index_name("yente", "sanctions", Some("2024-01")).is_err());
        assert!(construct_index_name("yente", "", Some("1")).is_err());
        // Family prefix has no version to parse.
        assert!(parse_index_name("yente", "yente-sanctions").is_err());
        // Foreign prefix.
        assert!(parse_index_name("yente", "other-sanctions-1").is_err());
    }

    #[test]
    fn test_version_mapping_round_trip() -> anyhow::Result<()> {
        let catalog = "20240101-abc";
        let index = dataset_to_index_version(catalog)?;
        assert_eq!(index, "20240101.abc");
        assert_eq!(index_to_dataset_version(&index), catalog);
        // `.` is reserved for the index-side encoding of `-`: a dotted
        // catalog version could never be read back intact.
        assert!(dataset_to_index_version("2024.01").is_err());
        assert!(dataset_to_index_version("").is_err());
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, failure_persistence: None, ..ProptestConfig::default() })]

        #[test]
        fn proptest_round_trip(
            prefix in "[a-z]{2,8}(-[a-z]{2,8})?",
            dataset in "[a-z][a-z0-9_-]{0,12}",
            version in "[A-Za-z0-9.]{1,16}",
        ) {
            let name = construct_index_name(&prefix, &dataset, Some(&version)).unwrap();
            let parsed = parse_index_name(&prefix, &name).unwrap();
            prop_assert_eq!(parsed, (prefix.clone(), dataset.clone(), version.clone()));
            let family = construct_index_name(&prefix, &dataset, None).unwrap();
            prop_assert!(name.starts_with(&family));
        }

        #[test]
        fn proptest_version_mapping_round_trip(version in "[A-Za-z0-9-]{1,16}") {
            let index = dataset_to_index_version(&version).unwrap();
            prop_assert_eq!(index_to_dataset_version(&index), version);
        }
    }
}
