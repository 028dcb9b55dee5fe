//! Endpoint domain types.
//!
//! An `Endpoint` is a named, addressable source or destination. The bus
//! resolves a route's destination URIs against registered endpoints.

use serde::{Deserialize, Serialize};

/// What an endpoint is used for. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointRole {
    Source,
    Sink,
    Processor,
    Router,
}

/// A registered endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Registry key. Re-registering the same id replaces the entry.
    pub id: String,
    pub role: EndpointRole,
    pub name: String,
    /// Address that route destinations refer to (e.g. `sink://audit`).
    pub uri: String,
    /// Opaque adapter configuration.
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Route ID that receives a wrapped-error message when delivery to this
    /// endpoint fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handler: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl Endpoint {
    /// Build an enabled endpoint with empty config and no error handler.
    pub fn new(
        id: impl Into<String>,
        role: EndpointRole,
        name: impl Into<String>,
        uri: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            name: name.into(),
            uri: uri.into(),
            config: serde_json::Value::Null,
            enabled: true,
            error_handler: None,
        }
    }
}
