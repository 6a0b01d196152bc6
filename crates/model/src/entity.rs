use std::collections::BTreeMap;

use anyhow::Context;
use errors::ErrorMetadata;
use serde_json::Value;

use crate::schema::{
    Model,
    Property,
    PropertyType,
    Schema,
};

/// An entity record projected through the schema model. Only string
/// property values survive the projection; nested entity payloads are the
/// concern of upstream exporters, not the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: String,
    pub schema: String,
    pub caption: Option<String>,
    pub datasets: Vec<String>,
    pub referents: Vec<String>,
    pub first_seen: Option<String>,
    pub last_seen: Option<String>,
    pub last_change: Option<String>,
    pub target: Option<bool>,
    pub properties: BTreeMap<String, Vec<String>>,
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|v| v.as_str())
        .map(|s| s.to_string())
        .collect()
}

fn opt_string(value: Option<&Value>) -> Option<String> {
    value.and_then(|v| v.as_str()).map(|s| s.to_string())
}

impl Entity {
    /// Validate and project a raw record. Requires a non-empty `id` and a
    /// `schema` known to the model; properties not defined on the schema
    /// are dropped.
    pub fn from_value(model: &Model, raw: &Value) -> anyhow::Result<Self> {
        let obj = raw.as_object().context(ErrorMetadata::bad_request(
            "MalformedEntity",
            "Entity record is not an object",
        ))?;
        let id = opt_string(obj.get("id"))
            .filter(|id| !id.is_empty())
            .context(ErrorMetadata::bad_request(
                "MalformedEntity",
                "Entity record has no id",
            ))?;
        let schema_name = opt_string(obj.get("schema")).context(ErrorMetadata::bad_request(
            "MalformedEntity",
            "Entity record has no schema",
        ))?;
        let schema = model.schema(&schema_name)?;

        let mut properties = BTreeMap::new();
        if let Some(Value::Object(props)) = obj.get("properties") {
            for (name, values) in props {
                if schema.property(name).is_none() {
                    continue;
                }
                let values = string_list(Some(values));
                if !values.is_empty() {
                    properties.insert(name.clone(), values);
                }
            }
        }

        Ok(Self {
            id,
            schema: schema_name,
            caption: opt_string(obj.get("caption")),
            datasets: string_list(obj.get("datasets")),
            referents: string_list(obj.get("referents")),
            first_seen: opt_string(obj.get("first_seen")),
            last_seen: opt_string(obj.get("last_seen")),
            last_change: opt_string(obj.get("last_change")),
            target: obj.get("target").and_then(|v| v.as_bool()),
            properties,
        })
    }

    pub fn schema<'m>(&self, model: &'m Model) -> anyhow::Result<&'m Schema> {
        model.schema(&self.schema)
    }

    /// Iterate `(property, value)` pairs for every value of every schema
    /// property present on the entity.
    pub fn typed_values<'a>(
        &'a self,
        schema: &'a Schema,
    ) -> impl Iterator<Item = (&'a Property, &'a str)> {
        self.properties.iter().flat_map(move |(name, values)| {
            schema
                .property(name)
                .into_iter()
                .flat_map(move |prop| values.iter().map(move |v| (prop, v.as_str())))
        })
    }

    /// All names this entity goes by: canonical names, aliases, and weak
    /// aliases. Weak aliases are name-typed but excluded from matching, so
    /// they only surface here.
    pub fn names(&self, schema: &Schema) -> Vec<String> {
        let mut names = Vec::new();
        for (prop, value) in self.typed_values(schema) {
            if prop.type_ == PropertyType::Name && !names.iter().any(|n| n == value) {
                names.push(value.to_string());
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        entity::Entity,
        DEFAULT_MODEL,
    };

    fn putin() -> serde_json::Value {
        json!({
            "id": "Q7747",
            "schema": "Person",
            "caption": "Vladimir Putin",
            "datasets": ["us_ofac"],
            "referents": ["ofac-12345"],
            "target": true,
            "properties": {
                "name": ["Vladimir Putin"],
                "weakAlias": ["VVP"],
                "birthDate": ["1952-10-07"],
                "nationality": ["ru"],
                "favouriteColour": ["green"]
            }
        })
    }

    #[test]
    fn test_projection_drops_unknown_properties() -> anyhow::Result<()> {
        let entity = Entity::from_value(&DEFAULT_MODEL, &putin())?;
        assert_eq!(entity.id, "Q7747");
        assert!(entity.properties.contains_key("birthDate"));
        assert!(!entity.properties.contains_key("favouriteColour"));
        Ok(())
    }

    #[test]
    fn test_names_include_weak_aliases() -> anyhow::Result<()> {
        let entity = Entity::from_value(&DEFAULT_MODEL, &putin())?;
        let schema = entity.schema(&DEFAULT_MODEL)?;
        assert_eq!(entity.names(schema), vec!["Vladimir Putin", "VVP"]);
        Ok(())
    }

    #[test]
    fn test_rejects_broken_records() {
        for raw in [
            json!([]),
            json!({"schema": "Person"}),
            json!({"id": "", "schema": "Person"}),
            json!({"id": "x"}),
            json!({"id": "x", "schema": "Martian"}),
        ] {
            assert!(Entity::from_value(&DEFAULT_MODEL, &raw).is_err(), "{raw}");
        }
    }
}
