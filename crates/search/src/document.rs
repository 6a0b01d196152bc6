//! Entity record → indexable document projection.

use std::collections::{
    BTreeMap,
    BTreeSet,
};

use model::{
    text::{
        expand_dates,
        index_name_keys,
        index_name_parts,
        phonetic_names,
    },
    Entity,
    Model,
    PropertyType,
};
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

/// Project a raw entity record into the document written to the index,
/// returning `(document id, body)`. The id is carried on the bulk
/// operation, not in the body.
///
/// Only matchable properties make it into the document: the group fields,
/// the text bag and the `properties` submap all skip values excluded from
/// matching, so an audit timestamp like `modifiedAt` never lands in the
/// searchable `dates` field. Weak aliases are the one exception: they are
/// name-typed but non-matchable, and still flow into `names` and the
/// name-derived fields.
///
/// The projection is pure and deterministic: group values are emitted in
/// sorted order, so re-running it over an unchanged record produces an
/// identical document.
pub fn make_indexable(model: &Model, raw: &Value) -> anyhow::Result<(String, Value)> {
    let entity = Entity::from_value(model, raw)?;
    let schema = entity.schema(model)?;

    let names = entity.names(schema);
    let mut groups: BTreeMap<&'static str, BTreeSet<String>> = BTreeMap::new();
    let mut texts: BTreeSet<String> = BTreeSet::new();
    for (prop, value) in entity.typed_values(schema) {
        if !prop.matchable {
            continue;
        }
        if prop.type_.is_text() || prop.type_ == PropertyType::Address {
            texts.insert(value.to_string());
        }
        if prop.type_ == PropertyType::Name {
            continue;
        }
        if let Some(group) = prop.type_.group() {
            groups.entry(group).or_default().insert(value.to_string());
        }
    }

    let name_parts = index_name_parts(names.iter().map(|n| n.as_str()));
    texts.extend(name_parts.iter().cloned());

    let mut body = Map::new();
    body.insert("schema".to_string(), json!(entity.schema));
    if let Some(caption) = &entity.caption {
        body.insert("caption".to_string(), json!(caption));
    }
    body.insert("datasets".to_string(), json!(entity.datasets));
    body.insert("referents".to_string(), json!(entity.referents));
    if let Some(target) = entity.target {
        body.insert("target".to_string(), json!(target));
    }
    for (field, value) in [
        ("first_seen", &entity.first_seen),
        ("last_seen", &entity.last_seen),
        ("last_change", &entity.last_change),
    ] {
        if let Some(value) = value {
            body.insert(field.to_string(), json!(value));
        }
    }
    let properties: BTreeMap<&String, &Vec<String>> = entity
        .properties
        .iter()
        .filter(|(name, _)| schema.property(name).is_some_and(|prop| prop.matchable))
        .collect();
    body.insert("properties".to_string(), json!(properties));

    body.insert(NAMES_FIELD.to_string(), json!(names));
    body.insert(NAME_PART_FIELD.to_string(), json!(name_parts));
    body.insert(
        NAME_KEY_FIELD.to_string(),
        json!(index_name_keys(names.iter().map(|n| n.as_str()))),
    );
    body.insert(
        NAME_PHONETIC_FIELD.to_string(),
        json!(phonetic_names(names.iter().map(|n| n.as_str()))),
    );
    for (group, values) in groups {
        if group == "dates" {
            body.insert(
                group.to_string(),
                json!(expand_dates(values.iter().map(|v| v.as_str()))),
            );
        } else {
            body.insert(group.to_string(), json!(values));
        }
    }
    body.insert(TEXT_FIELD.to_string(), json!(texts));

    Ok((entity.id, Value::Object(body)))
}

#[cfg(test)]
mod tests {
    use model::DEFAULT_MODEL;
    use serde_json::json;

    use crate::document::make_indexable;

    fn record() -> serde_json::Value {
        json!({
            "id": "NK-1234",
            "schema": "Person",
            "caption": "Vladimir Putin",
            "datasets": ["us_ofac"],
            "referents": [],
            "properties": {
                "name": ["Vladimir Putin"],
                "weakAlias": ["VVP"],
                "birthDate": ["1952-10-07"],
                "nationality": ["ru"],
                "position": ["President of Russia"],
                "modifiedAt": ["2024-05-01"]
            }
        })
    }

    #[test]
    fn test_document_shape() -> anyhow::Result<()> {
        let (doc_id, body) = make_indexable(&DEFAULT_MODEL, &record())?;
        assert_eq!(doc_id, "NK-1234");
        // The id lives on the operation, never in the body.
        assert!(body.get("id").is_none());
        assert_eq!(body["names"], json!(["Vladimir Putin", "VVP"]));
        assert_eq!(body["name_parts"], json!(["putin", "vladimir", "vvp"]));
        assert_eq!(body["name_keys"], json!(["putinvladimir", "vvp"]));
        let phonetic = body["name_phonetic"].as_array().unwrap();
        assert!(phonetic.contains(&json!("FLTMR")));
        assert!(phonetic.contains(&json!("PTN")));
        assert_eq!(body["countries"], json!(["ru"]));
        let text = body["text"].as_array().unwrap();
        assert!(text.contains(&json!("putin")));
        assert!(text.contains(&json!("Vladimir Putin")));
        Ok(())
    }

    #[test]
    fn test_only_matchable_values_are_searchable() -> anyhow::Result<()> {
        let (_, body) = make_indexable(&DEFAULT_MODEL, &record())?;
        // The audit timestamp is date-typed but excluded from matching; it
        // must not surface in the searchable dates group.
        assert_eq!(body["dates"], json!(["1952", "1952-10", "1952-10-07"]));
        // Non-matchable free text stays out of the text bag.
        let text = body["text"].as_array().unwrap();
        assert!(!text.contains(&json!("President of Russia")));
        // The properties submap carries only matchable properties; the
        // weak alias still reached the names field above.
        let properties = body["properties"].as_object().unwrap();
        assert!(properties.contains_key("birthDate"));
        assert!(!properties.contains_key("position"));
        assert!(!properties.contains_key("weakAlias"));
        assert!(!properties.contains_key("modifiedAt"));
        Ok(())
    }

    #[test]
    fn test_projection_is_deterministic() -> anyhow::Result<()> {
        assert_eq!(
            make_indexable(&DEFAULT_MODEL, &record())?,
            make_indexable(&DEFAULT_MODEL, &record())?
        );
        Ok(())
    }
}
