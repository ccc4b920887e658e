use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The audited environment, seen as a named set of facts.
pub trait Target: Send + Sync {
    fn name(&self) -> &str;
    fn property_list(&self) -> Vec<String>;
    fn property(&self, name: &str) -> Option<Value>;

    /// All facts as one object, in `property_list` order.
    fn properties(&self) -> Map<String, Value> {
        self.property_list()
            .into_iter()
            .filter_map(|name| self.property(&name).map(|value| (name, value)))
            .collect()
    }
}

/// Target whose facts are fixed up front, typically loaded from YAML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticTarget {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl StaticTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(name.into(), value.into());
    }
}

impl Target for StaticTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn property_list(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    fn property(&self, name: &str) -> Option<Value> {
        self.properties.get(name).cloned()
    }
}
