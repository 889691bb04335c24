//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Dimension key names shared by connectors and the metrics backend.
///
/// Both sides receive the same instance so label names are decided in
/// exactly one place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionKeys {
    /// Key for the connector name
    pub name: String,
    /// Key for the bound listen port
    pub port: String,
    /// Key for the HTTP method of a request
    pub method: String,
    /// Key for the URI scheme of a request
    pub scheme: String,
}

impl Default for DimensionKeys {
    fn default() -> Self {
        Self {
            name: "name".to_string(),
            port: "port".to_string(),
            method: "method".to_string(),
            scheme: "scheme".to_string(),
        }
    }
}

impl DimensionKeys {
    /// Dimensions identifying a connector.
    pub fn connector(&self, name: &str, port: u16) -> Dimensions {
        let mut dims = Dimensions::new();
        dims.insert(&self.name, DimensionValue::from(name));
        dims.insert(&self.port, DimensionValue::from(port));
        dims
    }

    /// Dimensions identifying a request shape on a connector.
    pub fn request(&self, name: &str, port: u16, request: &RequestDimensions) -> Dimensions {
        let mut dims = self.connector(name, port);
        dims.insert(&self.method, DimensionValue::from(&*request.method));
        dims.insert(&self.scheme, DimensionValue::from(&*request.scheme));
        dims
    }
}

/// A single dimension value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DimensionValue {
    Int(i64),
    Str(String),
}

impl fmt::Display for DimensionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimensionValue::Int(v) => write!(f, "{}", v),
            DimensionValue::Str(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for DimensionValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for DimensionValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<u16> for DimensionValue {
    fn from(v: u16) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for DimensionValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

/// Ordered set of dimension key/value pairs.
///
/// Ordering is by key so two equal sets always render identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dimensions(BTreeMap<String, DimensionValue>);

impl Dimensions {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, key: &str, value: DimensionValue) {
        self.0.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&DimensionValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DimensionValue)> {
        self.0.iter()
    }
}

/// Cache key for per-request metric contexts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestDimensions {
    pub method: Arc<str>,
    pub scheme: Arc<str>,
}

impl RequestDimensions {
    pub fn new(method: &str, scheme: &str) -> Self {
        Self {
            method: Arc::from(method),
            scheme: Arc::from(scheme),
        }
    }
}

impl fmt::Display for RequestDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.scheme)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_default_keys() {
        let keys = DimensionKeys::default();
        assert_eq!(keys.name, "name");
        assert_eq!(keys.port, "port");
        assert_eq!(keys.method, "method");
        assert_eq!(keys.scheme, "scheme");
    }

    #[test]
    fn test_connector_dimensions() {
        let keys = DimensionKeys::default();
        let dims = keys.connector("default", 8080);

        assert_eq!(dims.len(), 2);
        assert_eq!(dims.get("name"), Some(&DimensionValue::from("default")));
        assert_eq!(dims.get("port"), Some(&DimensionValue::Int(8080)));
    }

    #[test]
    fn test_request_dimensions_extend_connector() {
        let keys = DimensionKeys::default();
        let dims = keys.request("default", 8080, &RequestDimensions::new("GET", "https"));

        assert_eq!(dims.len(), 4);
        assert_eq!(dims.get("method"), Some(&DimensionValue::from("GET")));
        assert_eq!(dims.get("scheme"), Some(&DimensionValue::from("https")));
        assert_eq!(dims.get("port"), Some(&DimensionValue::Int(8080)));
    }

    #[test]
    fn test_custom_keys() {
        let keys = DimensionKeys {
            name: "serverName".to_string(),
            port: "serverPort".to_string(),
            method: "httpMethod".to_string(),
            scheme: "scheme".to_string(),
        };
        let dims = keys.connector("api", 4443);

        assert!(dims.get("serverName").is_some());
        assert!(dims.get("name").is_none());
    }

    #[test]
    fn test_request_dimensions_equality() {
        let a = RequestDimensions::new("GET", "http");
        let b = RequestDimensions::new("GET", "http");
        let c = RequestDimensions::new("GET", "https");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "GET http");
    }

    #[test]
    fn test_dimension_value_display() {
        assert_eq!(DimensionValue::Int(443).to_string(), "443");
        assert_eq!(DimensionValue::from("POST").to_string(), "POST");
    }

    #[test]
    fn test_dimensions_serialize_as_map() {
        let keys = DimensionKeys::default();
        let dims = keys.connector("default", 80);
        let json = serde_json::to_string(&dims).unwrap();
        assert_eq!(json, r#"{"name":"default","port":80}"#);
    }
}
