//! Pure query construction. Every function builds a structured query tree
//! as JSON and leaves its inputs untouched; execution is the provider's
//! business.

use std::collections::BTreeMap;

use common::Dataset;
use errors::ErrorMetadata;
use model::{
    Entity,
    Model,
    PropertyType,
    Schema,
};
use serde_json::{
    json,
    Map,
    Value,
};

/// A single field filter from the request surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Bool(bool),
    One(String),
    Many(Vec<String>),
}

pub type Filters = Vec<(String, FilterValue)>;

/// Wrap `should` clauses with the scoping filters: dataset membership,
/// schema, and request-level field filters. At least one should clause
/// must match.
pub fn filter_query(
    shoulds: Vec<Value>,
    dataset: Option<&Dataset>,
    schema: Option<&Schema>,
    filters: &Filters,
) -> Value {
    let mut filterqs = Vec::new();
    if let Some(dataset) = dataset {
        filterqs.push(json!({"terms": {"datasets": dataset.source_names}}));
    }
    if let Some(schema) = schema {
        filterqs.push(json!({"terms": {"schema": schema.filter_names()}}));
    }
    for (field, value) in filters {
        let field = field.as_str();
        match value {
            FilterValue::Bool(value) => {
                filterqs.push(json!({"term": {field: {"value": value}}}));
            },
            FilterValue::One(value) => {
                filterqs.push(json!({"term": {field: {"value": value}}}));
            },
            FilterValue::Many(values) => {
                let values: Vec<&String> = values.iter().filter(|v| !v.is_empty()).collect();
                if !values.is_empty() {
                    filterqs.push(json!({"terms": {field: values}}));
                }
            },
        }
    }
    json!({"bool": {"filter": filterqs, "should": shoulds, "minimum_should_match": 1}})
}

/// Match query for a whole example entity: name matches with optional
/// fuzziness, exact matches per property group, and short free-text values
/// as phrases.
pub fn entity_query(
    dataset: &Dataset,
    entity: &Entity,
    model: &Model,
    fuzzy: bool,
) -> anyhow::Result<Value> {
    let schema = entity.schema(model)?;
    let mut terms: BTreeMap<&'static str, Vec<&str>> = BTreeMap::new();
    let mut texts: Vec<&str> = Vec::new();
    let mut shoulds: Vec<Value> = Vec::new();
    for (prop, value) in entity.typed_values(schema) {
        if prop.type_ == PropertyType::Name {
            shoulds.push(json!({
                "match": {
                    "names": {
                        "query": value,
                        "lenient": false,
                        "minimum_should_match": "60%",
                        "fuzziness": if fuzzy { 1 } else { 0 },
                    }
                }
            }));
        } else if let Some(group) = prop.type_.group() {
            if !prop.type_.is_text() {
                terms.entry(group).or_default().push(value);
            }
        }
        let phrase_typed = matches!(
            prop.type_,
            PropertyType::Name | PropertyType::String | PropertyType::Address
        );
        if phrase_typed && value.len() < 100 {
            texts.push(value);
        }
    }
    for (field, values) in terms {
        shoulds.push(json!({"terms": {field: values}}));
    }
    for text in texts {
        shoulds.push(json!({"match_phrase": {"text": text}}));
    }
    Ok(filter_query(
        shoulds,
        Some(dataset),
        Some(schema),
        &Filters::new(),
    ))
}

/// Free-text search. A blank query matches everything within the filters.
pub fn text_query(
    dataset: &Dataset,
    schema: &Schema,
    query: &str,
    filters: &Filters,
    fuzzy: bool,
) -> Value {
    let should = if query.trim().is_empty() {
        json!({"match_all": {}})
    } else {
        json!({
            "query_string": {
                "query": query,
                "fields": ["names^3", "text"],
                "default_operator": "and",
                "fuzziness": if fuzzy { 2 } else { 0 },
                "lenient": fuzzy,
            }
        })
    };
    filter_query(vec![should], Some(dataset), Some(schema), filters)
}

/// Name autocompletion. A blank prefix matches nothing.
pub fn prefix_query(dataset: &Dataset, prefix: &str) -> Value {
    let should = if prefix.trim().is_empty() {
        json!({"match_none": {}})
    } else {
        json!({"match_phrase_prefix": {"names": {"query": prefix, "slop": 2}}})
    };
    filter_query(vec![should], Some(dataset), None, &Filters::new())
}

/// Exact-match lookup over statement records: the conjunction of the given
/// field values, scoped to the dataset's sources.
pub fn statement_query(dataset: Option<&Dataset>, fields: &[(&str, Option<String>)]) -> Value {
    let mut filters = Vec::new();
    if let Some(dataset) = dataset {
        filters.push(json!({"terms": {"dataset": dataset.source_names}}));
    }
    for &(field, ref value) in fields {
        if let Some(value) = value {
            filters.push(json!({"term": {field: value}}));
        }
    }
    if filters.is_empty() {
        return json!({"match_all": {}});
    }
    json!({"bool": {"filter": filters}})
}

/// Terms aggregation per requested facet field.
pub fn facet_aggregations(fields: &[String]) -> Value {
    let mut aggs = Map::new();
    for field in fields {
        aggs.insert(
            field.clone(),
            json!({"terms": {"field": field, "size": 1000}}),
        );
    }
    Value::Object(aggs)
}

/// Parse `<field>[:asc|desc]` sort expressions. Documents missing the
/// field sort last; relevance always breaks ties.
pub fn parse_sorts(sorts: &[String]) -> anyhow::Result<Vec<Value>> {
    let mut parsed = Vec::with_capacity(sorts.len() + 1);
    for sort in sorts {
        let (field, order) = match sort.rsplit_once(':') {
            Some((field, order)) => (field, order),
            None => (sort.as_str(), "asc"),
        };
        anyhow::ensure!(
            matches!(order, "asc" | "desc") && !field.is_empty(),
            ErrorMetadata::bad_request("BadSort", format!("Invalid sort expression: {sort:?}"))
        );
        parsed.push(json!({field: {"order": order, "missing": "_last"}}));
    }
    parsed.push(json!("_score"));
    Ok(parsed)
}
