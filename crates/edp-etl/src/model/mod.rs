//! Canonical record model: events, queries, and the extraction contract

pub mod event;
pub mod query;

pub use event::{week_start, Event, RawRecord};
pub use query::{Extract, Page, SourceQuery};
