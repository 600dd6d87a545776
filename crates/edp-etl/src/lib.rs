//! EDP ETL Core Library
//!
//! Streaming ETL engine for ingesting paginated records from external
//! sources into a canonical event store.
//!
//! # Overview
//!
//! Three components form the core:
//!
//! - **Strategy Registry**: maps source and extraction keys, registered
//!   explicitly at startup, to query builders and paged extractors
//! - **Resilient Batch Writer**: pooled Postgres persistence with schema
//!   assurance, conflict-skipping bulk inserts, and exponential-backoff
//!   retry
//! - **Streaming Chunk Processor**: pages through extraction under a
//!   concurrency cap and a memory-based admission gate, isolating per-chunk
//!   failures and reporting aggregate results
//!
//! The durable-execution platform that retries whole jobs across process
//! restarts, the scheduling layer, and source API clients beyond the paging
//! contract are external collaborators.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use edp_etl::processor::{ChunkProcessor, JobSpec, StreamingConfig};
//! use edp_etl::registry::StrategyRegistry;
//! use edp_etl::writer::{DbConfig, EventStore};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = StrategyRegistry::with_builtin_sources()?;
//!     let store = Arc::new(EventStore::connect(DbConfig::from_env()?).await?);
//!     store.ensure_schema().await?;
//!
//!     let processor = ChunkProcessor::new(registry, store, StreamingConfig::default());
//!     let spec: JobSpec = serde_json::from_str(
//!         r#"{"source_key": "mock", "extraction_key": "mock-events", "args": {"item_count": 100}}"#,
//!     )?;
//!
//!     let report = processor.run(spec, CancellationToken::new()).await?;
//!     println!("inserted {} events", report.items_inserted);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod model;
pub mod processor;
pub mod registry;
pub mod sources;
pub mod writer;

// Retry scheduling is shared workspace infrastructure; expose it under the
// crate so callers configure writers and processors from one import.
pub use edp_common::retry;

// Re-export commonly used types
pub use error::{EtlError, EtlResult};
pub use model::{Event, Extract, Page, RawRecord, SourceQuery};
pub use processor::{ChunkProcessor, JobReport, JobSpec, JobStatus, StreamingConfig};
pub use registry::{RegistryBuilder, StrategyRegistry};
pub use writer::{DbConfig, EventSink, EventStore, PoolStatus};
