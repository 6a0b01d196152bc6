//! Index mappings and settings for entity indices.

use model::Model;
use serde_json::{
    json,
    Map,
    Value,
};

use crate::{
    NAMES_FIELD,
    NAME_KEY_FIELD,
    NAME_PART_FIELD,
    NAME_PHONETIC_FIELD,
    TEXT_FIELD,
};

/// Index-level settings: a single analyzer that folds names and free text
/// the same way the enrichment step does, so queries and documents agree
/// on normalization.
pub fn index_settings() -> Value {
    json!({
        "analysis": {
            "analyzer": {
                "latin-index": {
                    "tokenizer": "standard",
                    "filter": ["lowercase", "asciifolding"]
                }
            }
        },
        "index": {
            "refresh_interval": "5s"
        }
    })
}

fn keyword() -> Value {
    json!({"type": "keyword"})
}

fn latin_text() -> Value {
    json!({"type": "text", "analyzer": "latin-index"})
}

/// Build the mapping for an entity index from the schema model: stable
/// top-level fields, one keyword field per property group, and one
/// sub-field per schema property under `properties`.
pub fn make_entity_mapping(model: &Model) -> Value {
    let mut property_fields = Map::new();
    let mut group_fields = Map::new();
    for schema in model.schemata() {
        for prop in schema.properties.values() {
            let field = if prop.type_.is_text() {
                latin_text()
            } else {
                keyword()
            };
            property_fields.insert(prop.name.clone(), field);
            if let Some(group) = prop.type_.group() {
                group_fields.insert(group.to_string(), keyword());
            }
        }
    }
    // The enriched name fields replace the raw names group mapping.
    group_fields.remove(NAMES_FIELD);

    let mut properties = Map::new();
    properties.insert("schema".to_string(), keyword());
    properties.insert("caption".to_string(), keyword());
    properties.insert("datasets".to_string(), keyword());
    properties.insert("referents".to_string(), keyword());
    properties.insert("target".to_string(), json!({"type": "boolean"}));
    properties.insert("first_seen".to_string(), keyword());
    properties.insert("last_seen".to_string(), keyword());
    properties.insert("last_change".to_string(), keyword());
    properties.insert(NAMES_FIELD.to_string(), latin_text());
    properties.insert(NAME_PART_FIELD.to_string(), keyword());
    properties.insert(NAME_KEY_FIELD.to_string(), keyword());
    properties.insert(NAME_PHONETIC_FIELD.to_string(), keyword());
    properties.insert(TEXT_FIELD.to_string(), latin_text());
    properties.extend(group_fields);
    properties.insert(
        "properties".to_string(),
        json!({"type": "object", "properties": property_fields}),
    );

    json!({
        "dynamic": false,
        "properties": properties
    })
}

#[cfg(test)]
mod tests {
    use model::DEFAULT_MODEL;
    use serde_json::json;

    use crate::mapping::make_entity_mapping;

    #[test]
    fn test_mapping_covers_groups_and_enrichment() {
        let mapping = make_entity_mapping(&DEFAULT_MODEL);
        let fields = mapping["properties"].as_object().unwrap();
        for group in ["countries", "dates", "identifiers", "topics"] {
            assert_eq!(fields[group], json!({"type": "keyword"}), "{group}");
        }
        assert_eq!(fields["names"]["analyzer"], json!("latin-index"));
        assert_eq!(fields["name_phonetic"], json!({"type": "keyword"}));
        // Schema properties map to sub-fields, typed by their group.
        let props = fields["properties"]["properties"].as_object().unwrap();
        assert_eq!(props["birthDate"], json!({"type": "keyword"}));
        assert_eq!(props["notes"]["type"], json!("text"));
    }
}
