//! Strategy resolution and query schema-fidelity tests

use anyhow::Result;
use serde_json::{json, Map, Value};

use edp_etl::registry::StrategyRegistry;

fn launchpad_args() -> Map<String, Value> {
    let mut args = Map::new();
    args.insert("application_name".into(), json!("edp-etl-tests"));
    args.insert("service_root".into(), json!("production"));
    args.insert("version".into(), json!("devel"));
    args.insert("member".into(), json!("jdoe"));
    args.insert("data_date_start".into(), json!("2023-09-01"));
    args.insert("data_date_end".into(), json!("2025-03-04"));
    args.insert("event_type".into(), json!("bugs"));
    args.insert("oauth_token".into(), json!("sekrit"));
    args
}

fn mock_args() -> Map<String, Value> {
    let mut args = Map::new();
    args.insert("item_count".into(), json!(17));
    args.insert("event_type".into(), json!("mock_event_type"));
    args
}

/// Every registered source type must survive a full-args round trip:
/// building a query from its own `to_args` projection yields an
/// equivalent query.
#[test]
fn query_args_round_trip_for_all_registered_sources() -> Result<()> {
    let registry = StrategyRegistry::with_builtin_sources()?;

    let cases: Vec<(&str, Map<String, Value>)> =
        vec![("launchpad", launchpad_args()), ("mock", mock_args())];

    for (source_key, args) in cases {
        let query = registry.resolve_query(source_key, &args)?;
        let rebuilt = registry.resolve_query(source_key, &query.to_args())?;

        assert_eq!(
            query.to_args(),
            rebuilt.to_args(),
            "round trip changed the {} query",
            source_key
        );
        assert_eq!(query.source_kind_id(), rebuilt.source_kind_id());
        assert_eq!(query.event_type(), rebuilt.event_type());
    }
    Ok(())
}

#[test]
fn builtin_registry_covers_all_bundled_strategies() -> Result<()> {
    let registry = StrategyRegistry::with_builtin_sources()?;

    assert_eq!(registry.source_keys(), vec!["launchpad", "mock"]);
    assert_eq!(
        registry.extractor_keys(),
        vec![
            "launchpad-bugs",
            "launchpad-merge-proposals",
            "launchpad-questions",
            "mock-events",
        ]
    );

    for key in registry.extractor_keys() {
        assert!(registry.resolve_extractor(&key).is_ok());
    }
    Ok(())
}

#[test]
fn summaries_never_leak_credentials() -> Result<()> {
    let registry = StrategyRegistry::with_builtin_sources()?;
    let query = registry.resolve_query("launchpad", &launchpad_args())?;

    let summary = serde_json::to_string(&query.summary())?;
    assert!(!summary.contains("sekrit"));

    // while the full-fidelity projection keeps the token for re-building
    let args = serde_json::to_string(&query.to_args())?;
    assert!(args.contains("sekrit"));
    Ok(())
}
