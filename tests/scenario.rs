//! Integration tests for loading and evaluating package scenarios.
use float_cmp::assert_approx_eq;
use journal_scenarios::cache::ReferenceCache;
use journal_scenarios::id::{IssnL, PackageID, ScenarioID};
use journal_scenarios::output::write_scenario;
use journal_scenarios::scenario::{Scenario, SubscriptionSelection, load_scenario};
use journal_scenarios::store::Store;
use journal_scenarios::year::YearRange;
use seed::{ISSN, gold_percent, package, seeded_store};
use serde_json::json;
use tempfile::tempdir;

async fn load(store: &Store, overrides: serde_json::Value) -> Scenario {
    let cache = ReferenceCache::new(store.clone());
    load_scenario(
        store,
        &cache,
        &PackageID::from("package1"),
        None,
        Some(&overrides),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_fully_gold_journal_is_all_open_access() {
    let store = seeded_store(gold_percent(100.0)).await;
    let scenario = load(&store, json!({"include_social_networks": false})).await;

    let (_, metrics) = scenario.journal(&IssnL::from(ISSN)).unwrap();
    let usage = metrics.usage.totals();
    assert_approx_eq!(
        f64,
        usage.oa_plus_social_networks.value(),
        usage.total.value(),
        epsilon = 1e-9
    );
    assert_eq!(usage.ill.value(), 0.0);
    assert_eq!(usage.other_delayed.value(), 0.0);
    assert!(!metrics.ncppu.is_defined());
}

#[tokio::test]
async fn test_closed_journal_splits_between_ill_and_delayed() {
    let store = seeded_store(gold_percent(0.0)).await;
    let scenario = load(
        &store,
        json!({"include_social_networks": false, "ill_request_percent_of_delayed": 10.0}),
    )
    .await;

    let (_, metrics) = scenario.journal(&IssnL::from(ISSN)).unwrap();
    for usage in &metrics.usage.years {
        assert_eq!(usage.oa_plus_social_networks.value(), 0.0);
        assert_approx_eq!(f64, usage.ill.value(), 0.1 * usage.total.value(), epsilon = 1e-9);
        assert_approx_eq!(
            f64,
            usage.other_delayed.value(),
            0.9 * usage.total.value(),
            epsilon = 1e-9
        );
    }
}

#[tokio::test]
async fn test_backfile_can_be_switched_off() {
    let store = seeded_store(gold_percent(0.0)).await;
    let (package, mut data) = package("package1", "inst1");
    data.perpetual_access.insert(
        IssnL::from(ISSN),
        vec![YearRange::new(1990, None).unwrap()],
    );
    store.insert_package_data(&package.id, &data).await.unwrap();

    let with_backfile = load(&store, json!({"include_social_networks": false})).await;
    let usage = with_backfile.summary().usage;
    assert!(usage.backfile.value() > 0.0);
    assert_approx_eq!(f64, usage.allocated().value(), usage.total.value(), epsilon = 1e-6);

    let without_backfile = load(
        &store,
        json!({"include_social_networks": false, "include_backfile": false}),
    )
    .await;
    let usage = without_backfile.summary().usage;
    assert_eq!(usage.backfile.value(), 0.0);
    assert_approx_eq!(f64, usage.allocated().value(), usage.total.value(), epsilon = 1e-6);
}

#[tokio::test]
async fn test_unknown_package() {
    let store = seeded_store(gold_percent(10.0)).await;
    let cache = ReferenceCache::new(store.clone());
    let result = load_scenario(&store, &cache, &PackageID::from("nope"), None, None).await;
    assert_eq!(result.unwrap_err().to_string(), "Unknown package: nope");
}

#[tokio::test]
async fn test_saved_scenario_survives_reopening_store() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("scenarios.sqlite");
    let scenario_id = ScenarioID::from("scenario1");

    let expected = {
        let store = Store::open(&db_path).await.unwrap();
        store
            .insert_reference_data(&seed::reference_data(gold_percent(20.0)))
            .await
            .unwrap();
        seed::insert_package(&store, "package1", "inst1").await;

        let mut scenario = load(&store, json!({"cost_ill": 25.0})).await;
        scenario.apply_subscriptions(&SubscriptionSelection {
            bulk: [IssnL::from(ISSN)].into_iter().collect(),
            ..Default::default()
        });
        let snapshot = scenario
            .to_snapshot(scenario_id.clone(), "Keep everything")
            .unwrap();
        store.save_scenario_snapshot(&snapshot).await.unwrap();
        store.pool().close().await;

        scenario.summary()
    };

    let store = Store::open(&db_path).await.unwrap();
    let cache = ReferenceCache::new(store.clone());
    let restored = load_scenario(
        &store,
        &cache,
        &PackageID::from("package1"),
        Some(&scenario_id),
        None,
    )
    .await
    .unwrap();

    assert_eq!(restored.assumptions.cost_ill.value(), 25.0);
    assert_eq!(restored.summary(), expected);
}

#[tokio::test]
async fn test_scenario_tables_written() {
    let store = seeded_store(gold_percent(30.0)).await;
    let scenario = load(&store, json!({})).await;

    let dir = tempdir().unwrap();
    write_scenario(dir.path(), &scenario).unwrap();
    for file_name in ["journals.csv", "usage_by_year.csv", "summary.csv"] {
        assert!(dir.path().join(file_name).is_file(), "missing {file_name}");
    }

    let mut reader = csv::Reader::from_path(dir.path().join("journals.csv")).unwrap();
    let records: Vec<_> = reader.records().map(Result::unwrap).collect();
    assert_eq!(records.len(), 1);
    assert_eq!(&records[0][0], ISSN);
}
