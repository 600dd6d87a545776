//! The canonical Event record and its codec
//!
//! Every source, whatever its upstream shape, is reduced to this one record
//! type before loading. `event_id` is globally unique across sources and is
//! the natural idempotency key: the writer treats re-delivery of an existing
//! id as a no-op.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EtlError;

/// Raw extracted item: a generic key-value mapping as returned by source
/// extractors, one per upstream record.
pub type RawRecord = Map<String, Value>;

/// Canonical output record persisted to the events table.
///
/// Immutable after construction; `week` and `event_time` are derived from
/// `event_time_utc` at construction time and never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Server-assigned surrogate key; None until the row is inserted
    pub id: Option<i64>,
    /// Globally unique event identifier (idempotency key)
    pub event_id: String,
    /// Source identifier, e.g. "launchpad"
    pub source_kind_id: String,
    /// Identifier of the parent item (bug, merge proposal, ...) if any
    pub parent_item_id: Option<String>,
    /// Event type, e.g. "bugs"
    pub event_type: String,
    /// Relation of this event to its parent item, e.g. "bug_message"
    pub relation_type: String,
    /// Actor the event is attributed to
    pub employee_id: String,
    /// When the event happened, in UTC
    pub event_time_utc: DateTime<Utc>,
    /// Monday of the ISO week containing `event_time_utc`
    pub week: NaiveDate,
    /// IANA zone name of the actor, when known
    pub timezone: Option<String>,
    /// Wall-clock time of the event in `timezone`, when the zone resolves
    pub event_time: Option<NaiveDateTime>,
    /// Properties of the parent item
    pub event_properties: Map<String, Value>,
    /// Properties of the relation itself
    pub relation_properties: Map<String, Value>,
    /// Numeric measurements attached to the parent item
    pub metrics: Map<String, Value>,
}

impl Event {
    /// Build an Event from a raw extracted record.
    ///
    /// Required raw fields: `event_id`, `relation_type`, `employee_id`,
    /// `event_time_utc` (RFC 3339). Optional: `parent_item_id`, `time_zone`
    /// (defaults to "UTC"), `event_properties`, `relation_properties`,
    /// `metrics`. A missing or malformed field yields
    /// [`EtlError::TransformValidation`] naming the field, so the caller can
    /// count and skip the item without losing the rest of the chunk.
    pub fn from_raw(
        raw: &RawRecord,
        source_kind_id: &str,
        event_type: &str,
    ) -> Result<Self, EtlError> {
        let event_id = required_str(raw, "event_id", "<unknown>")?;
        let relation_type = required_str(raw, "relation_type", &event_id)?;
        let employee_id = required_str(raw, "employee_id", &event_id)?;

        let raw_time = required_str(raw, "event_time_utc", &event_id)?;
        let event_time_utc = DateTime::parse_from_rfc3339(&raw_time)
            .map_err(|e| {
                EtlError::invalid_event(
                    &event_id,
                    format!("unparseable event_time_utc '{}': {}", raw_time, e),
                )
            })?
            .with_timezone(&Utc);

        let timezone = optional_str(raw, "time_zone").unwrap_or_else(|| "UTC".to_string());
        let event_time = timezone
            .parse::<Tz>()
            .ok()
            .map(|tz| event_time_utc.with_timezone(&tz).naive_local());

        Ok(Self {
            id: None,
            week: week_start(event_time_utc),
            event_id,
            source_kind_id: source_kind_id.to_string(),
            parent_item_id: optional_str(raw, "parent_item_id"),
            event_type: event_type.to_string(),
            relation_type,
            employee_id,
            event_time_utc,
            timezone: Some(timezone),
            event_time,
            event_properties: object_field(raw, "event_properties"),
            relation_properties: object_field(raw, "relation_properties"),
            metrics: object_field(raw, "metrics"),
        })
    }
}

/// Monday of the week containing the given instant.
pub fn week_start(at: DateTime<Utc>) -> NaiveDate {
    let date = at.date_naive();
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

fn required_str(raw: &RawRecord, field: &str, event_id: &str) -> Result<String, EtlError> {
    match raw.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => {
            Err(EtlError::invalid_event(event_id, format!("empty field '{}'", field)))
        },
        Some(other) => Err(EtlError::invalid_event(
            event_id,
            format!("field '{}' is not a string: {}", field, other),
        )),
        None => Err(EtlError::invalid_event(event_id, format!("missing field '{}'", field))),
    }
}

fn optional_str(raw: &RawRecord, field: &str) -> Option<String> {
    match raw.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn object_field(raw: &RawRecord, field: &str) -> Map<String, Value> {
    match raw.get(field) {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}
