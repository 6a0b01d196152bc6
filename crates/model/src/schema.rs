use std::collections::{
    BTreeMap,
    BTreeSet,
};

use anyhow::Context;
use errors::ErrorMetadata;
use serde::Deserialize;

/// Value types a property can carry. Each type may belong to a named group;
/// typed values of matchable properties are folded into a per-group field
/// on the indexed document (`countries`, `dates`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyType {
    Name,
    String,
    Text,
    Address,
    Country,
    Date,
    Identifier,
    Email,
    Phone,
    Url,
    Iban,
    Ip,
    Topic,
    Gender,
    Language,
    Number,
    Entity,
}

impl PropertyType {
    /// The document field values of this type are aggregated into, if any.
    pub fn group(&self) -> Option<&'static str> {
        match self {
            PropertyType::Name => Some("names"),
            PropertyType::Address => Some("addresses"),
            PropertyType::Country => Some("countries"),
            PropertyType::Date => Some("dates"),
            PropertyType::Identifier => Some("identifiers"),
            PropertyType::Email => Some("emails"),
            PropertyType::Phone => Some("phones"),
            PropertyType::Iban => Some("ibans"),
            PropertyType::Ip => Some("ips"),
            PropertyType::Topic => Some("topics"),
            PropertyType::Gender => Some("genders"),
            PropertyType::Language => Some("languages"),
            PropertyType::String
            | PropertyType::Text
            | PropertyType::Url
            | PropertyType::Number
            | PropertyType::Entity => None,
        }
    }

    /// Free-text types. Their values feed the document's `text` bag rather
    /// than an exact-match group field.
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            PropertyType::Name | PropertyType::String | PropertyType::Text
        )
    }

    /// Whether values of this type take part in entity matching unless the
    /// property overrides it.
    fn default_matchable(&self) -> bool {
        match self {
            PropertyType::Name
            | PropertyType::Address
            | PropertyType::Country
            | PropertyType::Date
            | PropertyType::Identifier
            | PropertyType::Email
            | PropertyType::Phone
            | PropertyType::Iban
            | PropertyType::Ip => true,
            PropertyType::String
            | PropertyType::Text
            | PropertyType::Url
            | PropertyType::Topic
            | PropertyType::Gender
            | PropertyType::Language
            | PropertyType::Number
            | PropertyType::Entity => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub type_: PropertyType,
    pub matchable: bool,
}

/// One schema in the loaded model, with its transitive relations
/// precomputed. Properties include everything inherited from ancestors.
#[derive(Debug, Clone)]
pub struct Schema {
    pub name: String,
    pub matchable: bool,
    pub extends: Vec<String>,
    /// All schemata reachable via `extends`, excluding `self`.
    pub ancestors: BTreeSet<String>,
    /// All schemata that (transitively) extend this one.
    pub descendants: BTreeSet<String>,
    /// Matchable schemata among `{self} ∪ ancestors ∪ descendants`: the
    /// names an entity of this schema may legitimately match against.
    pub matchable_schemata: BTreeSet<String>,
    pub properties: BTreeMap<String, Property>,
}

#[derive(Debug, Deserialize)]
struct PropertySpec {
    #[serde(rename = "type")]
    type_: PropertyType,
    matchable: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SchemaSpec {
    #[serde(default)]
    extends: Vec<String>,
    #[serde(default)]
    matchable: bool,
    #[serde(default)]
    properties: BTreeMap<String, PropertySpec>,
}

/// The full schema graph. Built once, then shared read-only.
#[derive(Debug)]
pub struct Model {
    schemata: BTreeMap<String, Schema>,
}

impl Model {
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let specs: BTreeMap<String, SchemaSpec> =
            serde_json::from_str(raw).context("schema model is not valid JSON")?;
        for (name, spec) in &specs {
            for parent in &spec.extends {
                anyhow::ensure!(
                    specs.contains_key(parent),
                    "schema {name} extends unknown schema {parent}"
                );
            }
        }

        let mut ancestors: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for name in specs.keys() {
            let mut seen = BTreeSet::new();
            collect_ancestors(&specs, name, &mut seen)?;
            seen.remove(name);
            ancestors.insert(name.clone(), seen);
        }

        let mut descendants: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (name, above) in &ancestors {
            for ancestor in above {
                descendants
                    .entry(ancestor.clone())
                    .or_default()
                    .insert(name.clone());
            }
        }

        let mut schemata = BTreeMap::new();
        for (name, spec) in &specs {
            let above = &ancestors[name];
            let below = descendants.get(name).cloned().unwrap_or_default();

            let mut matchable_schemata = BTreeSet::new();
            for peer in above.iter().chain(below.iter()).chain([name]) {
                if specs[peer].matchable {
                    matchable_schemata.insert(peer.clone());
                }
            }

            // Own properties shadow inherited ones of the same name.
            let mut properties = BTreeMap::new();
            for source in above.iter().chain([name]) {
                for (prop_name, prop) in &specs[source].properties {
                    properties.insert(
                        prop_name.clone(),
                        Property {
                            name: prop_name.clone(),
                            type_: prop.type_,
                            matchable: prop.matchable.unwrap_or(prop.type_.default_matchable()),
                        },
                    );
                }
            }

            schemata.insert(
                name.clone(),
                Schema {
                    name: name.clone(),
                    matchable: spec.matchable,
                    extends: spec.extends.clone(),
                    ancestors: above.clone(),
                    descendants: below,
                    matchable_schemata,
                    properties,
                },
            );
        }
        Ok(Self { schemata })
    }

    pub fn schema(&self, name: &str) -> anyhow::Result<&Schema> {
        self.schemata.get(name).with_context(|| {
            ErrorMetadata::bad_request("UnknownSchema", format!("Unknown schema: {name}"))
        })
    }

    pub fn schemata(&self) -> impl Iterator<Item = &Schema> {
        self.schemata.values()
    }
}

fn collect_ancestors(
    specs: &BTreeMap<String, SchemaSpec>,
    name: &str,
    seen: &mut BTreeSet<String>,
) -> anyhow::Result<()> {
    if !seen.insert(name.to_string()) {
        return Ok(());
    }
    let spec = specs
        .get(name)
        .with_context(|| format!("unknown schema {name}"))?;
    for parent in &spec.extends {
        collect_ancestors(specs, parent, seen)?;
    }
    Ok(())
}

impl Schema {
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    /// The schema names a filter on this schema expands to: every matchable
    /// peer, the schema itself, and (for non-matchable schemata like Thing)
    /// all descendants.
    pub fn filter_names(&self) -> BTreeSet<String> {
        let mut names = self.matchable_schemata.clone();
        names.insert(self.name.clone());
        if !self.matchable {
            names.extend(self.descendants.iter().cloned());
        }
        names
    }
}
