//! Read-only service and schema catalogs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::property::Property;
use super::types::Options;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Method {
    pub name: String,
    /// Input schema name.
    pub input: String,
    /// Output schema name.
    pub output: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: Options,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub fully_qualified_name: String,
    pub transport: String,
    pub request_codec: String,
    pub response_codec: String,
    #[serde(default)]
    pub host: String,
    /// Discovery resolver name; empty means the compiler default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolver: Option<String>,
    #[serde(default)]
    pub methods: Vec<Method>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: Options,
}

impl Service {
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|method| method.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceCatalog {
    services: Vec<Service>,
}

impl ServiceCatalog {
    pub fn new(services: impl IntoIterator<Item = Service>) -> Self {
        ServiceCatalog {
            services: services.into_iter().collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Service> {
        self.services
            .iter()
            .find(|service| service.fully_qualified_name == name)
    }

    pub fn insert(&mut self, service: Service) {
        self.services
            .retain(|existing| existing.fully_qualified_name != service.fully_qualified_name);
        self.services.push(service);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Service> {
        self.services.iter()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Canonical message shapes keyed by fully qualified name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaCatalog {
    schemas: BTreeMap<String, Property>,
}

impl SchemaCatalog {
    pub fn new(schemas: impl IntoIterator<Item = (String, Property)>) -> Self {
        let mut catalog = SchemaCatalog::default();
        for (name, schema) in schemas {
            catalog.insert(name, schema);
        }
        catalog
    }

    pub fn get(&self, name: &str) -> Option<&Property> {
        self.schemas.get(name)
    }

    /// Registers a schema; its paths are normalized to start at the root.
    pub fn insert(&mut self, name: impl Into<String>, mut schema: Property) {
        schema.normalize();
        self.schemas.insert(name.into(), schema);
    }

    /// Normalize every schema after deserialization.
    pub(crate) fn normalize(&mut self) {
        for schema in self.schemas.values_mut() {
            schema.normalize();
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::property::ScalarType;

    #[test]
    fn schemas_are_normalized_on_insert() {
        let mut schema = Property::message([("name", Property::scalar(ScalarType::String))]);
        schema.path = "greeter.Request".into();

        let catalog = SchemaCatalog::new([("greeter.Request".to_string(), schema)]);
        let schema = catalog.get("greeter.Request").unwrap();
        assert_eq!(schema.path, "");
        assert_eq!(schema.lookup("name").unwrap().path, "name");
    }

    #[test]
    fn services_are_keyed_by_fully_qualified_name() {
        let json = r#"[{
            "fully_qualified_name": "greeter",
            "transport": "http",
            "request_codec": "json",
            "response_codec": "json",
            "methods": [{ "name": "Say", "input": "greeter.Request", "output": "greeter.Reply" }]
        }]"#;

        let catalog: ServiceCatalog = serde_json::from_str(json).unwrap();
        let service = catalog.get("greeter").unwrap();
        assert_eq!(service.method("Say").unwrap().output, "greeter.Reply");
        assert!(service.method("Shout").is_none());
        assert!(catalog.get("unknown").is_none());
    }
}
