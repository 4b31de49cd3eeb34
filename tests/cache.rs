//! Integration tests for the cache tiers backed by files on disk.
use journal_scenarios::cache::ReferenceCache;
use journal_scenarios::cache::blob::{CommonDataBlob, publish};
use journal_scenarios::cache::object_store::LocalObjectStore;
use journal_scenarios::cache::snapshot::SnapshotDb;
use journal_scenarios::id::IssnL;
use journal_scenarios::reference::{IdentifierSet, JournalMetadata, ReferenceData};
use journal_scenarios::store::Store;
use seed::{ISSN, gold_percent};
use std::sync::Arc;
use tempfile::tempdir;

async fn store_with_reference_data(dir: &std::path::Path) -> Store {
    let store = Store::open(&dir.join("primary.sqlite")).await.unwrap();
    store
        .insert_reference_data(&seed::reference_data(gold_percent(40.0)))
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn test_snapshot_pack_and_restore() {
    let dir = tempdir().unwrap();
    let store = store_with_reference_data(dir.path()).await;
    let expected = store.reference_data(&IdentifierSet::All).await.unwrap();
    let object_store = LocalObjectStore::new(&dir.path().join("objects"));

    // Build and archive a snapshot on one "machine"
    let built = SnapshotDb::new(&dir.path().join("built.sqlite"));
    built.ensure_ready(&store).await.unwrap();
    built.pack(&object_store).await.unwrap();

    // Restore it on another
    let restored = SnapshotDb::new(&dir.path().join("restored.sqlite"));
    restored.restore(&object_store).await.unwrap();
    restored.ensure_ready(&store).await.unwrap();
    assert_eq!(restored.load(&IdentifierSet::All).await.unwrap(), expected);

    let ids: IdentifierSet = [IssnL::from(ISSN)].into_iter().collect();
    assert_eq!(restored.load(&ids).await.unwrap(), expected.restrict_to(&ids));
}

#[tokio::test]
async fn test_stale_snapshot_is_rebuilt() {
    let dir = tempdir().unwrap();
    let store = store_with_reference_data(dir.path()).await;
    let snapshot_path = dir.path().join("snapshot.sqlite");

    SnapshotDb::new(&snapshot_path)
        .ensure_ready(&store)
        .await
        .unwrap();

    // The primary store gains a journal after the snapshot was built
    let mut more = ReferenceData::default();
    more.metadata.insert(
        IssnL::from("0000-0009"),
        JournalMetadata {
            title: "Late Arrivals".into(),
            subject: None,
            publisher: None,
            is_society_journal: false,
        },
    );
    store.insert_reference_data(&more).await.unwrap();

    let snapshot = SnapshotDb::new(&snapshot_path);
    snapshot.ensure_ready(&store).await.unwrap();
    let loaded = snapshot.load(&IdentifierSet::All).await.unwrap();
    assert!(loaded.metadata.contains_key(&IssnL::from("0000-0009")));
    assert_eq!(loaded.row_counts(), store.reference_row_counts().await.unwrap());
}

#[tokio::test]
async fn test_cache_reads_through_every_tier() {
    let dir = tempdir().unwrap();
    let store = store_with_reference_data(dir.path()).await;
    let expected = store.reference_data(&IdentifierSet::All).await.unwrap();
    let object_store = Arc::new(LocalObjectStore::new(&dir.path().join("objects")));
    publish(&*object_store, &expected).await.unwrap();

    let cache = ReferenceCache::new(store.clone())
        .with_snapshot(SnapshotDb::new(&dir.path().join("snapshot.sqlite")))
        .with_blob(CommonDataBlob::new(object_store));

    // Whole-dataset requests come from the blob
    let all = cache
        .get_common_package_data("all", &IdentifierSet::All)
        .await
        .unwrap();
    assert_eq!(*all, expected);

    // Smaller requests come from the snapshot
    let ids: IdentifierSet = [IssnL::from(ISSN)].into_iter().collect();
    let some = cache.get_common_package_data("package1", &ids).await.unwrap();
    assert_eq!(*some, expected.restrict_to(&ids));
    assert!(dir.path().join("snapshot.sqlite").is_file());

    // Memoised until reset
    let again = cache.get_common_package_data("package1", &ids).await.unwrap();
    assert!(Arc::ptr_eq(&some, &again));
    cache.reset();
    let fresh = cache.get_common_package_data("package1", &ids).await.unwrap();
    assert!(!Arc::ptr_eq(&some, &fresh));
    assert_eq!(*fresh, *some);
}
