/// Reconciliation tests
///
/// End-to-end cycles over real files: initial load, incremental merge of
/// changed files, coalesced bursts, error recovery, cancellation.
/// Run with: cargo test --test reconcile_tests

mod common;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use common::{write_modules, write_specs, CfgSerializer, DependentCfgSerializer};
use entstore::{
    EntityId, EntitySource, EntityStore, FileEvent, FileId, StoreError, SyncState,
};

fn store_with_cfg() -> EntityStore {
    EntityStore::builder()
        .serializer(Arc::new(CfgSerializer))
        .build()
}

fn notifications(store: &EntityStore) -> Arc<Mutex<Vec<HashSet<EntitySource>>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    store.on_sources_changed(move |sources| {
        sink.lock().unwrap().push(sources.clone());
    });
    seen
}

#[tokio::test]
async fn initial_load_publishes_version_1() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_modules(dir.path(), "a.cfg", &["m1", "m2"]);
    let b = write_modules(dir.path(), "b.cfg", &["m3"]);

    let store = store_with_cfg();
    assert_eq!(store.state(), SyncState::Uninitialized);
    let outcome = store.initial_load(&[a.clone(), b]).await.unwrap();

    assert!(outcome.applied);
    assert_eq!(outcome.version, 1);
    assert_eq!(store.version(), 1);
    assert_eq!(store.state(), SyncState::Ready);
    let snapshot = store.snapshot();
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot.ids_of_source(&EntitySource::file(a)).count(), 2);
}

#[tokio::test]
async fn modified_file_swaps_its_entities() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_modules(dir.path(), "a.cfg", &["M1"]);

    let store = store_with_cfg();
    store.initial_load(std::slice::from_ref(&a)).await.unwrap();
    let seen = notifications(&store);

    // a.cfg now holds M2 instead of M1
    write_modules(dir.path(), "a.cfg", &["M2"]);
    store.offer(FileEvent::Modified(a.clone()));
    let outcome = store.reconcile().await.unwrap();

    assert!(outcome.applied);
    assert_eq!(store.version(), 2);
    let snapshot = store.snapshot();
    assert!(snapshot.contains(&EntityId::from("M2")));
    assert!(!snapshot.contains(&EntityId::from("M1")));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains(&EntitySource::file(a)));
}

#[tokio::test]
async fn reconcile_with_nothing_pending_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_modules(dir.path(), "a.cfg", &["m1"]);

    let store = store_with_cfg();
    store.initial_load(&[a]).await.unwrap();
    let seen = notifications(&store);

    let first = store.reconcile().await.unwrap();
    let second = store.reconcile().await.unwrap();

    assert!(!first.applied);
    assert!(!second.applied);
    assert_eq!(store.version(), 1);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn removed_file_drops_its_entities() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_modules(dir.path(), "a.cfg", &["m1"]);
    let b = write_modules(dir.path(), "b.cfg", &["m2"]);

    let store = store_with_cfg();
    store.initial_load(&[a.clone(), b]).await.unwrap();

    std::fs::remove_file(a.as_path()).unwrap();
    store.offer(FileEvent::Removed(a));
    let outcome = store.reconcile().await.unwrap();

    assert!(outcome.applied);
    let snapshot = store.snapshot();
    assert!(!snapshot.contains(&EntityId::from("m1")));
    assert!(snapshot.contains(&EntityId::from("m2")));
}

#[tokio::test]
async fn added_file_brings_new_entities() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_modules(dir.path(), "a.cfg", &["m1"]);

    let store = store_with_cfg();
    store.initial_load(&[a]).await.unwrap();

    let c = write_modules(dir.path(), "c.cfg", &["m9"]);
    store.offer(FileEvent::Added(c));
    store.reconcile().await.unwrap();

    assert!(store.snapshot().contains(&EntityId::from("m9")));
}

#[tokio::test]
async fn burst_processed_in_two_drains() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_modules(dir.path(), "a.cfg", &["a1"]);
    let b = write_modules(dir.path(), "b.cfg", &["b1"]);

    let store = store_with_cfg();
    store.initial_load(&[a.clone(), b.clone()]).await.unwrap();
    let seen = notifications(&store);

    write_modules(dir.path(), "a.cfg", &["a2"]);
    store.offer(FileEvent::Modified(a.clone()));
    store.reconcile().await.unwrap();

    write_modules(dir.path(), "b.cfg", &["b2"]);
    store.offer(FileEvent::Modified(b.clone()));
    store.reconcile().await.unwrap();

    // two cycles, each touching only the files changed since the previous
    // drain
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].contains(&EntitySource::file(a)));
    assert!(!seen[0].contains(&EntitySource::file(b.clone())));
    assert!(seen[1].contains(&EntitySource::file(b)));
    assert_eq!(store.version(), 3);
}

#[tokio::test]
async fn malformed_file_degrades_gracefully() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_modules(dir.path(), "a.cfg", &["m1"]);
    let b = write_modules(dir.path(), "b.cfg", &["m2"]);

    let store = store_with_cfg();
    store.initial_load(&[a.clone(), b.clone()]).await.unwrap();

    std::fs::write(b.as_path(), "this is not json").unwrap();
    write_modules(dir.path(), "a.cfg", &["m1", "m1b"]);
    store.offer(FileEvent::Modified(a));
    store.offer(FileEvent::Modified(b));
    let outcome = store.reconcile().await.unwrap();

    // the good file's entities merged; the bad file reported an error and
    // its entities dropped out of the model
    assert!(outcome.applied);
    assert_eq!(outcome.errors.len(), 1);
    let snapshot = store.snapshot();
    assert!(snapshot.contains(&EntityId::from("m1b")));
    assert!(!snapshot.contains(&EntityId::from("m2")));
}

#[tokio::test]
async fn duplicate_ids_drop_only_the_offending_file() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_modules(dir.path(), "a.cfg", &["m1"]);
    let dup = write_specs(
        dir.path(),
        "dup.cfg",
        serde_json::json!([{ "id": "d1" }, { "id": "d1" }]),
    );

    let store = store_with_cfg();
    let outcome = store.initial_load(&[a, dup]).await.unwrap();

    assert_eq!(outcome.errors.len(), 1);
    let snapshot = store.snapshot();
    assert!(snapshot.contains(&EntityId::from("m1")));
    assert!(!snapshot.contains(&EntityId::from("d1")));
}

#[tokio::test]
async fn dependent_files_are_remerged() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_modules(dir.path(), "a.cfg", &["a1"]);
    let b = write_modules(dir.path(), "b.cfg", &["b1"]);

    // entities of a.cfg may be referenced from b.cfg's file, so a change
    // to b pulls a back through the merge as well
    let mut dependents = HashMap::new();
    dependents.insert(b.clone(), HashSet::from([a.clone()]));
    let store = EntityStore::builder()
        .serializer(Arc::new(DependentCfgSerializer { dependents }))
        .build();
    store.initial_load(&[a.clone(), b.clone()]).await.unwrap();
    let seen = notifications(&store);

    write_modules(dir.path(), "b.cfg", &["b2"]);
    store.offer(FileEvent::Modified(b.clone()));
    store.reconcile().await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains(&EntitySource::file(a)));
    assert!(seen[0].contains(&EntitySource::file(b)));
    // a's unchanged entity survived the re-merge
    assert!(store.snapshot().contains(&EntityId::from("a1")));
    assert!(store.snapshot().contains(&EntityId::from("b2")));
}

#[tokio::test]
async fn event_for_unmatched_file_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_modules(dir.path(), "a.cfg", &["m1"]);

    let store = store_with_cfg();
    store.initial_load(&[a]).await.unwrap();
    let seen = notifications(&store);

    store.offer(FileEvent::Modified(FileId::from("README.md")));
    let outcome = store.reconcile().await.unwrap();

    assert!(!outcome.applied);
    assert_eq!(store.version(), 1);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cross_file_references_survive_partial_reload() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_modules(dir.path(), "a.cfg", &["a1"]);
    let b = write_specs(
        dir.path(),
        "b.cfg",
        serde_json::json!([{ "id": "b1", "uses": ["a1"] }]),
    );

    let store = store_with_cfg();
    store.initial_load(&[a, b.clone()]).await.unwrap();

    // only b changes; its delta references a1, which lives in the
    // unaffected part of the model
    write_specs(
        dir.path(),
        "b.cfg",
        serde_json::json!([{ "id": "b1", "uses": ["a1"], "fields": { "v": 2 } }]),
    );
    store.offer(FileEvent::Modified(b));
    let outcome = store.reconcile().await.unwrap();

    assert!(outcome.applied);
    let snapshot = store.snapshot();
    assert_eq!(
        snapshot.get(&EntityId::from("b1")).unwrap().field("v"),
        Some(&serde_json::json!(2))
    );
    assert!(snapshot.contains(&EntityId::from("a1")));
}

#[tokio::test]
async fn broken_references_abort_the_merge() {
    let dir = tempfile::tempdir().unwrap();
    let b = write_specs(dir.path(), "b.cfg", serde_json::json!([{ "id": "b1" }]));

    let store = store_with_cfg();
    store.initial_load(std::slice::from_ref(&b)).await.unwrap();
    let seen = notifications(&store);

    write_specs(
        dir.path(),
        "b.cfg",
        serde_json::json!([{ "id": "b1", "uses": ["missing"] }]),
    );
    store.offer(FileEvent::Modified(b));
    let err = store.reconcile().await.unwrap_err();

    // the merge is aborted; the live model stays at its previous version
    assert!(matches!(err, StoreError::ReferentialIntegrity { .. }));
    assert_eq!(store.version(), 1);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_cycle_keeps_changes_pending() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_modules(dir.path(), "a.cfg", &["m1"]);

    let store = store_with_cfg();
    store.initial_load(std::slice::from_ref(&a)).await.unwrap();

    write_modules(dir.path(), "a.cfg", &["m2"]);
    store.offer(FileEvent::Modified(a));
    store.cancel();
    let err = store.reconcile().await.unwrap_err();

    assert!(matches!(err, StoreError::Cancelled));
    assert_eq!(store.version(), 1);
    // the drained changes were restored for the next cycle
    assert!(store.has_pending_changes());
}

#[tokio::test]
async fn unrelated_writers_do_not_break_reconciliation() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_modules(dir.path(), "a.cfg", &["m1"]);

    let store = Arc::new(store_with_cfg());
    store.initial_load(std::slice::from_ref(&a)).await.unwrap();
    let seen = notifications(&store);

    // synthetic edits land concurrently through the same cell
    let cell = store.cell().clone();
    let writer = tokio::spawn(async move {
        for i in 0..20 {
            cell.publish_with_retry(2, |builder| {
                let id = format!("synthetic{}", i);
                if !builder.contains(&entstore::EntityId::new(id.clone())) {
                    builder.add_entity(entstore::Entity::new(
                        id.as_str(),
                        "marker",
                        EntitySource::synthetic("editor"),
                    ))?;
                }
                Ok(())
            })
            .unwrap();
            tokio::task::yield_now().await;
        }
    });

    write_modules(dir.path(), "a.cfg", &["m2"]);
    store.offer(FileEvent::Modified(a));
    let outcome = store.reconcile().await.unwrap();
    writer.await.unwrap();

    assert!(outcome.applied);
    // exactly one notification regardless of optimistic or fallback path
    assert_eq!(seen.lock().unwrap().len(), 1);
    let snapshot = store.snapshot();
    assert!(snapshot.contains(&EntityId::from("m2")));
    // synthetic entities were never part of the merge predicate
    for i in 0..20 {
        assert!(snapshot.contains(&EntityId::new(format!("synthetic{}", i))));
    }
}
