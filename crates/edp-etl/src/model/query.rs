//! Source query and extraction contracts
//!
//! A `SourceQuery` is the opaque, source-defined parameter bag describing
//! what one job extracts. An `Extract` implementation pages through the
//! upstream collection one bounded page at a time, so the engine never holds
//! more than a page of raw items per chunk in memory.

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::event::RawRecord;
use crate::error::EtlError;

/// Source-defined query parameters, immutable once constructed.
pub trait SourceQuery: Send + Sync {
    /// Concrete-type escape hatch so an extractor can recover the query
    /// type its source registered.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Source identifier this query targets, e.g. "launchpad"
    fn source_kind_id(&self) -> &str;

    /// Event type extracted by this query, e.g. "bugs"
    fn event_type(&self) -> &str;

    /// Full-fidelity projection of the query parameters.
    ///
    /// Feeding the result back through the source's registered builder must
    /// reconstruct an equivalent query.
    fn to_args(&self) -> Map<String, Value>;

    /// Short projection for logs and job summaries. Must never contain
    /// credentials or other secrets.
    fn summary(&self) -> Map<String, Value>;
}

/// One page of raw extracted items.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Raw key-value records, at most the requested page size
    pub items: Vec<RawRecord>,
    /// Token for the next page; None when the collection is exhausted
    pub next: Option<String>,
}

impl Page {
    /// Final page constructor
    pub fn last(items: Vec<RawRecord>) -> Self {
        Self { items, next: None }
    }
}

/// Paged extraction from an upstream source.
///
/// Implementations must be idempotent per page token: the engine retries a
/// page after a transient failure and expects the same (or compatible) data
/// for the same token.
#[async_trait]
pub trait Extract: Send + Sync {
    /// Fetch one page of at most `limit` items.
    ///
    /// `token` is None for the first page and the previous page's `next`
    /// value afterwards.
    async fn fetch_page(
        &self,
        query: &dyn SourceQuery,
        token: Option<&str>,
        limit: usize,
    ) -> Result<Page, EtlError>;
}
