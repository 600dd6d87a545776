//! Batch writer tests against a real Postgres
//!
//! These spin up Postgres via testcontainers and are ignored by default;
//! run them with `cargo test -- --ignored` on a machine with Docker.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use serial_test::serial;
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers_modules::postgres::Postgres;

use edp_etl::model::{Event, RawRecord};
use edp_etl::writer::{DbConfig, EventSink, EventStore};

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

async fn store_in_container(
) -> Result<(testcontainers::ContainerAsync<Postgres>, EventStore, String)> {
    let container = Postgres::default().with_tag("16-alpine").start().await?;

    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let url = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

    let config = DbConfig {
        url: url.clone(),
        max_connections: 5,
        min_connections: 1,
        ..DbConfig::default()
    };

    let store = EventStore::connect(config).await?;
    Ok((container, store, url))
}

fn event(id: &str, parent: Option<&str>, at: &str) -> Event {
    let serde_json::Value::Object(raw) = json!({
        "event_id": id,
        "parent_item_id": parent,
        "relation_type": "bug_activity",
        "employee_id": "jdoe",
        "event_time_utc": at,
        "time_zone": "Europe/London",
        "event_properties": {"title": format!("item for {}", id)},
        "metrics": {"heat": 3},
    }) else {
        unreachable!()
    };
    let raw: RawRecord = raw;
    Event::from_raw(&raw, "launchpad", "bugs").unwrap()
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn schema_setup_is_idempotent_and_concurrent_safe() -> Result<()> {
    init_tracing();
    let (_container, store, _url) = store_in_container().await?;

    // concurrent first calls must not race-corrupt the schema
    let results = futures::future::join_all((0..4).map(|_| store.ensure_schema())).await;
    for result in results {
        result?;
    }
    store.ensure_schema().await?;

    assert!(store.health_check().await);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn duplicate_event_ids_insert_at_most_once() -> Result<()> {
    init_tracing();
    let (_container, store, _url) = store_in_container().await?;
    store.ensure_schema().await?;

    let batch = vec![
        event("e-1", Some("b-1"), "2023-10-01T12:00:00Z"),
        event("e-2", Some("b-1"), "2023-10-01T13:00:00Z"),
        // duplicate id inside the same batch
        event("e-2", Some("b-1"), "2023-10-01T13:30:00Z"),
        event("e-3", None, "2023-10-02T09:00:00Z"),
    ];

    let inserted = store.insert_batch(&batch).await?;
    assert_eq!(inserted, 3);

    // full re-delivery of the same batch inserts nothing
    let inserted = store.insert_batch(&batch).await?;
    assert_eq!(inserted, 0);

    // a mixed batch reports only the genuinely new row
    let mixed = vec![
        event("e-3", None, "2023-10-02T09:00:00Z"),
        event("e-4", None, "2023-10-02T10:00:00Z"),
    ];
    assert_eq!(store.insert_batch(&mixed).await?, 1);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn derived_fields_survive_the_round_trip() -> Result<()> {
    use sqlx::Row;

    init_tracing();
    let (_container, store, url) = store_in_container().await?;
    store.ensure_schema().await?;

    let original = event("e-derived", Some("b-9"), "2023-10-01T12:00:00Z");
    assert_eq!(store.insert_batch(std::slice::from_ref(&original)).await?, 1);

    let verify_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await?;

    let row = sqlx::query(
        "SELECT week, timezone, event_time, event_properties FROM events WHERE event_id = $1",
    )
    .bind("e-derived")
    .fetch_one(&verify_pool)
    .await?;

    let week: chrono::NaiveDate = row.get("week");
    assert_eq!(week, original.week);

    let timezone: Option<String> = row.get("timezone");
    assert_eq!(timezone.as_deref(), Some("Europe/London"));

    let event_time: Option<chrono::NaiveDateTime> = row.get("event_time");
    assert_eq!(event_time, original.event_time);

    let props: Option<serde_json::Value> = row.get("event_properties");
    assert_eq!(props.unwrap()["title"], "item for e-derived");

    let status = store.pool_status().await;
    assert_eq!(status.max, 5);
    assert!(status.active + status.idle <= status.max);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn parent_properties_are_refreshed() -> Result<()> {
    init_tracing();
    let (_container, store, _url) = store_in_container().await?;
    store.ensure_schema().await?;

    let first = event("e-10", Some("b-10"), "2023-10-01T12:00:00Z");
    store.insert_batch(std::slice::from_ref(&first)).await?;

    let mut second = event("e-11", Some("b-10"), "2023-10-03T12:00:00Z");
    second
        .event_properties
        .insert("status".into(), json!("Fix Released"));

    store.insert_batch(std::slice::from_ref(&second)).await?;
    let updated = store
        .update_parent_properties(std::slice::from_ref(&second))
        .await?;

    // both rows share the parent and pick up the refreshed snapshot
    assert_eq!(updated, 2);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn timestamps_and_weeks_are_preserved() -> Result<()> {
    init_tracing();
    let (_container, store, _url) = store_in_container().await?;
    store.ensure_schema().await?;

    let at: DateTime<Utc> = "2024-02-29T23:30:00Z".parse()?;
    let e = event("e-leap", None, &at.to_rfc3339());
    assert_eq!(e.week.to_string(), "2024-02-26");

    assert_eq!(store.insert_batch(&[e]).await?, 1);
    Ok(())
}
