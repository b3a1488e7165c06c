//! Connector registry (C1): maps a template identifier to a factory
//! producing a connector instance bound to a configuration.
//!
//! Built once at process start the way the teacher's CLI resolves
//! `SourceSpec`/`SinkSpec` variants to concrete structs in one `match` —
//! except here the mapping is data (a `HashMap`) rather than a `match`,
//! since templates are looked up by a runtime string id coming off the
//! wire (`StartOperation(templateId, ...)`), not known at compile time.
//! Registration is append-only during initialization and read-only
//! afterwards: `ConnectorRegistry::build` consumes a `ConnectorRegistryBuilder`
//! so there is no API surface left to mutate the map post-construction.

use std::collections::HashMap;
use std::sync::Arc;

use ucl_core::{Connector, UclError, UclResult};

/// Raw, untyped configuration handed to a connector factory. Connectors
/// parse their own shape out of this and fail closed with
/// `E_AUTH_INVALID`/`E_ENDPOINT_UNREACHABLE` on malformed input via
/// `validate_config`, not at construction time.
pub type RawConfig = HashMap<String, String>;

pub type ConnectorFactory =
    Arc<dyn Fn(&RawConfig) -> UclResult<Arc<dyn Connector>> + Send + Sync>;

/// Process-wide, read-mostly-after-init registry. Lookup failure surfaces
/// as `E_UNKNOWN_TEMPLATE`, a fatal non-retryable error (§4.1).
pub struct ConnectorRegistry {
    factories: HashMap<&'static str, ConnectorFactory>,
}

impl ConnectorRegistry {
    pub fn builder() -> ConnectorRegistryBuilder {
        ConnectorRegistryBuilder {
            factories: HashMap::new(),
        }
    }

    pub fn resolve(&self, template_id: &str, config: &RawConfig) -> UclResult<Arc<dyn Connector>> {
        let factory = self
            .factories
            .get(template_id)
            .ok_or_else(|| UclError::unknown_template(template_id))?;
        factory(config)
    }

    pub fn template_ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }
}

/// Accumulates factories during process startup; `build()` freezes them
/// into an immutable `ConnectorRegistry`.
pub struct ConnectorRegistryBuilder {
    factories: HashMap<&'static str, ConnectorFactory>,
}

impl ConnectorRegistryBuilder {
    pub fn register<F>(mut self, template_id: &'static str, factory: F) -> Self
    where
        F: Fn(&RawConfig) -> UclResult<Arc<dyn Connector>> + Send + Sync + 'static,
    {
        self.factories.insert(template_id, Arc::new(factory));
        self
    }

    pub fn build(self) -> ConnectorRegistry {
        ConnectorRegistry {
            factories: self.factories,
        }
    }
}

/// Builds the standard registry wiring every adapter in this crate under
/// its template id. `ucl-cli` calls this once at startup.
pub fn standard_registry() -> ConnectorRegistry {
    ConnectorRegistry::builder()
        .register("jdbc.postgres", |cfg| {
            crate::adapters::sql::PostgresConnector::from_config(cfg)
                .map(|c| Arc::new(c) as Arc<dyn Connector>)
        })
        .register("http.jira", |cfg| {
            crate::adapters::issue_tracker::JiraConnector::from_config(cfg)
                .map(|c| Arc::new(c) as Arc<dyn Connector>)
        })
        .register("http.wiki", |cfg| {
            crate::adapters::wiki::WikiConnector::from_config(cfg)
                .map(|c| Arc::new(c) as Arc<dyn Connector>)
        })
        .register("http.source_host", |cfg| {
            crate::adapters::source_host::SourceHostConnector::from_config(cfg)
                .map(|c| Arc::new(c) as Arc<dyn Connector>)
        })
        .register("object.store", |cfg| {
            crate::adapters::object_store::ObjectStoreConnector::from_config(cfg)
                .map(|c| Arc::new(c) as Arc<dyn Connector>)
        })
        .register("stub.ingestion.large", |cfg| {
            crate::adapters::stub::StubConnector::from_config(cfg)
                .map(|c| Arc::new(c) as Arc<dyn Connector>)
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_template_is_unknown_template_error() {
        let registry = standard_registry();
        let err = registry
            .resolve("nope.nonexistent", &RawConfig::new())
            .unwrap_err();
        assert_eq!(err.code, ucl_core::ErrorCode::UnknownTemplate);
        assert!(!err.retryable());
    }

    #[test]
    fn standard_registry_resolves_stub_template() {
        let registry = standard_registry();
        assert!(registry.resolve("stub.ingestion.large", &RawConfig::new()).is_ok());
    }
}
