//! Strategy registry: source keys to query builders, extraction keys to
//! extractors
//!
//! Registration happens explicitly at process startup, before any job runs;
//! the built registry is immutable, so resolution on the job path needs no
//! synchronization. Registering the same key twice is a configuration error
//! and fails at registration time rather than silently overwriting.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{EtlError, EtlResult};
use crate::model::{Extract, SourceQuery};
use crate::sources;

/// Constructor turning job arguments into a validated source query
pub type QueryBuilder =
    Arc<dyn Fn(&Map<String, Value>) -> EtlResult<Arc<dyn SourceQuery>> + Send + Sync>;

/// Mutable collection phase of the registry.
///
/// ```
/// use edp_etl::registry::RegistryBuilder;
/// use edp_etl::sources::mock;
///
/// let mut builder = RegistryBuilder::new();
/// mock::register(&mut builder).unwrap();
/// let registry = builder.build();
/// assert!(registry.source_keys().contains(&"mock".to_string()));
/// ```
#[derive(Default)]
pub struct RegistryBuilder {
    sources: HashMap<String, QueryBuilder>,
    extractors: HashMap<String, Arc<dyn Extract>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a source key with a query builder.
    pub fn register_source(
        &mut self,
        key: impl Into<String>,
        builder: QueryBuilder,
    ) -> EtlResult<()> {
        let key = key.into();
        if self.sources.contains_key(&key) {
            return Err(EtlError::Config(format!(
                "source strategy '{}' registered twice",
                key
            )));
        }
        debug!(key = %key, "registered source strategy");
        self.sources.insert(key, builder);
        Ok(())
    }

    /// Associate an extraction key with an extractor.
    pub fn register_extractor(
        &mut self,
        key: impl Into<String>,
        extractor: Arc<dyn Extract>,
    ) -> EtlResult<()> {
        let key = key.into();
        if self.extractors.contains_key(&key) {
            return Err(EtlError::Config(format!(
                "extraction strategy '{}' registered twice",
                key
            )));
        }
        debug!(key = %key, "registered extraction strategy");
        self.extractors.insert(key, extractor);
        Ok(())
    }

    /// Freeze the collected strategies into an immutable registry.
    pub fn build(self) -> StrategyRegistry {
        StrategyRegistry {
            sources: Arc::new(self.sources),
            extractors: Arc::new(self.extractors),
        }
    }
}

/// Immutable mapping from strategy keys to executable behavior.
///
/// Cheap to clone; the maps are shared snapshots and never change after
/// [`RegistryBuilder::build`].
#[derive(Clone)]
pub struct StrategyRegistry {
    sources: Arc<HashMap<String, QueryBuilder>>,
    extractors: Arc<HashMap<String, Arc<dyn Extract>>>,
}

impl StrategyRegistry {
    /// Registry preloaded with the bundled sources (launchpad, mock).
    ///
    /// This is the discovery step: each bundled source module contributes
    /// its strategies through an explicit `register` call. Building a fresh
    /// registry is idempotent by construction.
    pub fn with_builtin_sources() -> EtlResult<Self> {
        let mut builder = RegistryBuilder::new();
        sources::launchpad::register(&mut builder)?;
        sources::mock::register(&mut builder)?;
        Ok(builder.build())
    }

    /// Construct the query for a job descriptor.
    pub fn resolve_query(
        &self,
        source_key: &str,
        args: &Map<String, Value>,
    ) -> EtlResult<Arc<dyn SourceQuery>> {
        let builder = self
            .sources
            .get(source_key)
            .ok_or_else(|| EtlError::unknown_source(source_key, self.source_keys()))?;
        builder(args)
    }

    /// Look up the extractor for a job descriptor.
    pub fn resolve_extractor(&self, extraction_key: &str) -> EtlResult<Arc<dyn Extract>> {
        self.extractors
            .get(extraction_key)
            .cloned()
            .ok_or_else(|| EtlError::unknown_extractor(extraction_key, self.extractor_keys()))
    }

    /// Registered source keys, sorted for stable diagnostics
    pub fn source_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.sources.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Registered extraction keys, sorted for stable diagnostics
    pub fn extractor_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.extractors.keys().cloned().collect();
        keys.sort();
        keys
    }
}
