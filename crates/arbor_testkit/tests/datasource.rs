//! Data source pagination, removal and live-update scenarios.

use arbor_core::{
    compare, ArborConfig, Change, CollectionChange, DataSource, DataSourceOptions, Entity,
    SortDescriptor,
};
use arbor_store::{InMemoryBlobStore, InMemoryStore, StoreOp};
use arbor_testkit::prelude::*;
use arbor_value::Value;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

fn paged(size: usize) -> ArborConfig {
    ArborConfig::default().page_size(size)
}

async fn next(changes: &mut UnboundedReceiver<CollectionChange>) -> CollectionChange {
    tokio::time::timeout(Duration::from_secs(5), changes.recv())
        .await
        .expect("no change within five seconds")
        .expect("change channel closed")
}

fn assert_aligned(source: &DataSource<User>) {
    let keys = source.keys();
    let objects = source.objects();
    assert_eq!(keys.len(), objects.len());
    for (key, entity) in keys.iter().zip(&objects) {
        assert_eq!(key, entity.id());
    }
}

#[tokio::test]
async fn pages_through_twenty_five_users() {
    let env = TestEnv::with_config(paged(10)).await;
    scenarios::seed_users(&env, 25);

    let (users, mut changes) = DataSource::<User>::collection(&env, DataSourceOptions::new())
        .await
        .unwrap();
    assert_eq!(next(&mut changes).await, CollectionChange::Initial);
    assert_eq!(users.len(), 10);
    assert_eq!(users.keys().first(), Some(&seeded_key(25)));
    assert_eq!(users.keys().last(), Some(&seeded_key(16)));

    let queries = env.store.query_count();
    let change = users.prev().await.unwrap().unwrap();
    assert_eq!(change.insertions, (10..20).collect::<Vec<_>>());
    assert!(change.deletions.is_empty());
    assert_eq!(env.store.query_count(), queries + 1);
    assert_eq!(users.len(), 20);
    assert_eq!(users.keys().last(), Some(&seeded_key(6)));
    assert_eq!(next(&mut changes).await, CollectionChange::Update(change));
    assert_aligned(&users);

    let change = users.prev().await.unwrap().unwrap();
    assert_eq!(change.insertions, (20..25).collect::<Vec<_>>());
    assert!(users.is_exhausted());

    let queries = env.store.query_count();
    assert_eq!(users.prev().await.unwrap(), None);
    assert_eq!(env.store.query_count(), queries);
    assert_eq!(users.len(), 25);
    assert_aligned(&users);
}

#[tokio::test(start_paused = true)]
async fn concurrent_prev_fetches_the_page_once() {
    let inner = Arc::new(InMemoryStore::new());
    for n in 1..=25 {
        inner.seed(&format!("v1/user/{}", seeded_key(n)), user_value("u", n as i64));
    }
    let store = Arc::new(SlowStore::new(inner.clone()));
    let ctx = connect(store.clone(), Arc::new(InMemoryBlobStore::new()), paged(10)).await;
    let (users, mut changes) = DataSource::<User>::collection(&ctx, DataSourceOptions::new())
        .await
        .unwrap();
    next(&mut changes).await;

    store.slow(StoreOp::Query, "v1/user", Latency::Delay(Duration::from_secs(1)));
    let queries = inner.query_count();
    let (first, second) = tokio::join!(users.prev(), users.prev());

    let pages: Vec<Change> = [first.unwrap(), second.unwrap()].into_iter().flatten().collect();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].insertions.len(), 10);
    assert_eq!(inner.query_count(), queries + 1);
    assert_eq!(users.len(), 20);
    assert_eq!(next(&mut changes).await, CollectionChange::Update(pages[0].clone()));
    assert!(changes.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn timed_out_page_keeps_what_resolved() {
    let inner = Arc::new(InMemoryStore::new());
    let reference = "v1/group/g1/members";
    for n in 1..=25 {
        let key = seeded_key(n);
        inner.seed(&format!("v1/user/{key}"), user_value("u", n as i64));
        inner.seed(&format!("{reference}/{key}"), Value::Bool(true));
    }
    let store = Arc::new(SlowStore::new(inner.clone()));
    let config = paged(10).fetch_timeout(Duration::from_secs(1));
    let ctx = connect(store.clone(), Arc::new(InMemoryBlobStore::new()), config).await;
    let (members, mut changes) = DataSource::<User>::open(&ctx, reference, DataSourceOptions::new())
        .await
        .unwrap();
    next(&mut changes).await;
    assert_eq!(members.len(), 10);

    store.slow(StoreOp::Get, &format!("v1/user/{}", seeded_key(10)), Latency::Hang);
    let err = members.prev().await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(members.len(), 19);
    assert!(!members.keys().contains(&seeded_key(10)));
    match next(&mut changes).await {
        CollectionChange::Update(change) => assert_eq!(change.insertions.len(), 9),
        other => panic!("expected the resolved part of the page, got {other:?}"),
    }
    assert_aligned(&members);

    store.clear();
    let change = members.prev().await.unwrap().unwrap();
    assert_eq!(change.insertions, [15]);
    assert_eq!(members.len(), 20);
    assert_eq!(members.keys()[15], seeded_key(10));
    assert_aligned(&members);
}

#[tokio::test]
async fn cascade_removal_is_one_update() {
    let env = TestEnv::with_config(paged(10)).await;
    let reference = "v1/group/g1/members";
    let keys = scenarios::seed_index(&env, reference, 5);

    let (members, mut changes) = DataSource::<User>::open(&env, reference, DataSourceOptions::new())
        .await
        .unwrap();
    next(&mut changes).await;
    assert_eq!(members.len(), 5);

    let writes = env.store.update_count();
    let removed = members.remove_object(3, true).await.unwrap();
    assert_eq!(removed, keys[1]);
    assert_eq!(env.store.update_count(), writes + 1);
    assert!(env.store.value_at(&format!("{reference}/{removed}")).is_null());
    assert!(env.store.value_at(&format!("v1/user/{removed}")).is_null());

    assert_eq!(
        next(&mut changes).await,
        CollectionChange::Update(Change::deletions(vec![3]))
    );
    assert_eq!(members.len(), 4);
    assert!(!members.keys().contains(&removed));
    assert_aligned(&members);
}

#[tokio::test]
async fn saved_entities_stream_in() {
    let env = TestEnv::new().await;
    let (users, mut changes) = DataSource::<User>::collection(&env, DataSourceOptions::new())
        .await
        .unwrap();
    assert_eq!(next(&mut changes).await, CollectionChange::Initial);
    assert!(users.is_empty());
    assert!(users.is_exhausted());

    let mut first = user("first", 1);
    first.save(&env).await.unwrap();
    let mut second = user("second", 2);
    second.save(&env).await.unwrap();

    for _ in 0..2 {
        assert_eq!(
            next(&mut changes).await,
            CollectionChange::Update(Change::insertions(vec![0]))
        );
    }
    assert_eq!(users.keys(), [second.id(), first.id()]);

    let (disposer, mut live) = users.observe_object(1).await.unwrap();
    assert_eq!(live.recv().await.unwrap().unwrap().model().name, "first");
    first.set("name", "renamed").unwrap();
    first.flush(&env).await.unwrap();
    assert_eq!(live.recv().await.unwrap().unwrap().model().name, "renamed");
    assert_eq!(
        next(&mut changes).await,
        CollectionChange::Update(Change::modifications(vec![1]))
    );
    disposer.dispose();

    let fresh = users.fetch_object(1).await.unwrap().unwrap();
    assert_eq!(fresh.model().name, "renamed");
}

#[tokio::test]
async fn revoked_subscription_reports_an_error() {
    let env = TestEnv::new().await;
    scenarios::seed_users(&env, 2);
    let (users, mut changes) = DataSource::<User>::collection(&env, DataSourceOptions::new())
        .await
        .unwrap();
    next(&mut changes).await;

    env.store.revoke("v1/user", arbor_store::StoreError::PermissionDenied {
        path: "v1/user".into(),
    });
    match next(&mut changes).await {
        CollectionChange::Error(err) => assert!(err.to_string().contains("v1/user")),
        other => panic!("expected an error, got {other:?}"),
    }
    assert_eq!(users.len(), 2);
}

async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn window_stays_sorted_and_aligned(events in collection_events_strategy()) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let env = TestEnv::new().await;
            scenarios::seed_users(&env, 6);
            let sort = vec![SortDescriptor::field("age", false), SortDescriptor::key(true)];
            let options = DataSourceOptions::new()
                .limit(100)
                .sort(sort.clone())
                .filter(|user: &Entity<User>| user.model().age >= 0);
            let (users, mut changes) = DataSource::<User>::collection(&env, options).await.unwrap();
            assert_eq!(next(&mut changes).await, CollectionChange::Initial);
            let mut tracked = users.len() as isize;

            for event in &events {
                match event {
                    CollectionEvent::Put { key, age } => {
                        env.store.seed(&format!("v1/user/{key}"), user_value(key, *age));
                    }
                    CollectionEvent::Delete { key } => {
                        env.store.seed(&format!("v1/user/{key}"), Value::Null);
                    }
                }
                settle().await;
            }
            settle().await;

            while let Ok(change) = changes.try_recv() {
                match change {
                    CollectionChange::Update(change) => {
                        tracked += change.insertions.len() as isize;
                        tracked -= change.deletions.len() as isize;
                    }
                    other => panic!("unexpected {other:?}"),
                }
            }

            let keys = users.keys();
            let objects = users.objects();
            assert_eq!(tracked, keys.len() as isize);
            assert_aligned(&users);
            assert_eq!(keys.iter().collect::<BTreeSet<_>>().len(), keys.len());
            for pair in objects.windows(2) {
                assert!(compare(&sort, &pair[0], &pair[1]).is_le());
            }
            for entity in &objects {
                assert!(entity.model().age >= 0);
                let stored = env.store.value_at(&format!("v1/user/{}", entity.id()));
                assert_eq!(stored.get("age"), Some(&Value::Integer(entity.model().age)));
            }
        });
    }
}
