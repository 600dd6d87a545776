//! Deterministic in-process source for development and tests
//!
//! Synthesizes a fixed roster of employees producing one event per item,
//! paged like a real upstream collection. Useful for exercising the full
//! pipeline without network access.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};

use crate::error::{EtlError, EtlResult};
use crate::model::{Extract, Page, RawRecord, SourceQuery};
use crate::registry::RegistryBuilder;

const SOURCE_KIND_ID: &str = "mock_source";
const DEFAULT_ROSTER: [&str; 3] = ["petergriffin", "john-cook", "taskmaster"];

/// Query for the mock source: how many items to synthesize and for whom
#[derive(Debug, Clone, PartialEq)]
pub struct MockQuery {
    pub item_count: usize,
    pub event_type: String,
    pub employees: Vec<String>,
}

impl MockQuery {
    pub fn from_args(args: &Map<String, Value>) -> EtlResult<Self> {
        let item_count = args
            .get("item_count")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_ROSTER.len() as u64) as usize;

        let event_type = args
            .get("event_type")
            .and_then(Value::as_str)
            .unwrap_or("mock_event_type")
            .to_string();

        let employees: Vec<String> = match args.get("employees") {
            Some(Value::Array(names)) => names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => DEFAULT_ROSTER.iter().map(|s| s.to_string()).collect(),
        };

        if employees.is_empty() {
            return Err(EtlError::Config(
                "mock source needs at least one employee".to_string(),
            ));
        }

        Ok(Self {
            item_count,
            event_type,
            employees,
        })
    }
}

impl SourceQuery for MockQuery {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn source_kind_id(&self) -> &str {
        SOURCE_KIND_ID
    }

    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn to_args(&self) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("item_count".into(), json!(self.item_count));
        args.insert("event_type".into(), json!(self.event_type));
        args.insert("employees".into(), json!(self.employees));
        args
    }

    fn summary(&self) -> Map<String, Value> {
        let mut summary = Map::new();
        summary.insert("source".into(), json!(SOURCE_KIND_ID));
        summary.insert("event_type".into(), json!(self.event_type));
        summary.insert("item_count".into(), json!(self.item_count));
        summary
    }
}

/// Generator extractor paging through `item_count` synthetic records
pub struct MockEvents;

fn base_time() -> DateTime<Utc> {
    // Matches the fixture timestamp used by the mock flow everywhere
    DateTime::parse_from_rfc3339("2023-10-01T12:00:00Z")
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn synthesize(query: &MockQuery, index: usize) -> RawRecord {
    let employee = &query.employees[index % query.employees.len()];
    let at = base_time() + Duration::minutes(index as i64);

    let Value::Object(record) = json!({
        "event_id": format!("mock_event_{}", index),
        "parent_item_id": format!("m-{}", index),
        "relation_type": "mock_relation_type",
        "employee_id": employee,
        "event_time_utc": at.to_rfc3339(),
        "time_zone": "UTC",
        "event_properties": {"title": format!("mock item {}", index)},
        "metrics": {"sequence": index},
    }) else {
        unreachable!()
    };
    record
}

#[async_trait]
impl Extract for MockEvents {
    async fn fetch_page(
        &self,
        query: &dyn SourceQuery,
        token: Option<&str>,
        limit: usize,
    ) -> EtlResult<Page> {
        let query = query
            .as_any()
            .downcast_ref::<MockQuery>()
            .ok_or_else(|| EtlError::extraction("mock extractor needs a mock query", false))?;

        let offset: usize = match token {
            Some(t) => t
                .parse()
                .map_err(|_| EtlError::extraction(format!("bad page token '{}'", t), false))?,
            None => 0,
        };

        let end = (offset + limit).min(query.item_count);
        let items = (offset..end).map(|i| synthesize(query, i)).collect();
        let next = (end < query.item_count).then(|| end.to_string());

        Ok(Page { items, next })
    }
}

/// Contribute the mock strategies to a registry under construction.
pub fn register(builder: &mut RegistryBuilder) -> EtlResult<()> {
    builder.register_source(
        "mock",
        Arc::new(|args: &Map<String, Value>| {
            Ok(Arc::new(MockQuery::from_args(args)?) as Arc<dyn SourceQuery>)
        }),
    )?;
    builder.register_extractor("mock-events", Arc::new(MockEvents))?;
    Ok(())
}
