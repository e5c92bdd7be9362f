/// Concurrent access tests
///
/// Many tasks sharing one service and one database handle.
/// Run with: MONGO_TEST_URL=mongodb://localhost:27017 cargo test --test concurrent_access_tests
use memodoc::bson::{Bson, Document, doc};
use memodoc::mongodb::{Client, Database};
use memodoc::{DefaultService, IndexState, ListOptions, ServiceConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;
use uuid::Uuid;

async fn test_db() -> Option<Database> {
    let url = std::env::var("MONGO_TEST_URL").ok()?;
    let client = Client::with_uri_str(&url).await.unwrap();
    Some(client.database(&format!("concurrent_{}", Uuid::new_v4().simple())))
}

fn service() -> DefaultService<Document> {
    DefaultService::new(
        ServiceConfig::new("items")
            .base_filter(doc! { "deleted_at": Bson::Null })
            .default_sort(doc! { "seq": 1 }),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_inserts() {
    let Some(db) = test_db().await else { return };
    let service = service();

    let num_tasks = 8;
    let writes_per_task = 25;
    let barrier = Arc::new(Barrier::new(num_tasks));

    let mut handles = vec![];
    for task_id in 0..num_tasks {
        let db = db.clone();
        let service = service.clone();
        let barrier = Arc::clone(&barrier);

        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            for i in 0..writes_per_task {
                let seq = (task_id * 1000 + i) as i64;
                service
                    .insert(&db, &doc! { "seq": seq, "task": task_id as i32 }, None)
                    .await
                    .unwrap();
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let total = service.count(&db, doc! {}, None).await.unwrap();
    assert_eq!(total, (num_tasks * writes_per_task) as u64);

    let listed = service.list(&db, doc! {}, ListOptions::new(), None).await.unwrap();
    let seqs: Vec<i64> = listed.iter().map(|d| d.get_i64("seq").unwrap()).collect();
    let mut sorted = seqs.clone();
    sorted.sort();
    assert_eq!(seqs, sorted);

    db.drop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_and_deletes() {
    let Some(db) = test_db().await else { return };
    let service = service();

    let mut records = Vec::new();
    for seq in 0..40i64 {
        records.push(service.insert(&db, &doc! { "seq": seq, "hits": 0 }, None).await.unwrap());
    }

    let mut handles = vec![];
    for (i, record) in records.into_iter().enumerate() {
        let db = db.clone();
        let service = service.clone();

        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                service.delete(&db, &record, None).await.unwrap()
            } else {
                service
                    .update(&db, &record, doc! { "hits": 1 }, None)
                    .await
                    .unwrap()
            }
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap().is_some());
    }

    let live = service.list(&db, doc! {}, ListOptions::new(), None).await.unwrap();
    assert_eq!(live.len(), 20);
    assert!(live.iter().all(|d| d.get_i32("hits").unwrap() == 1));
    assert!(live.iter().all(|d| d.contains_key("updated_at")));

    db.drop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_during_writes() {
    let Some(db) = test_db().await else { return };
    let service = service();

    for seq in 0..50i64 {
        service.insert(&db, &doc! { "seq": seq }, None).await.unwrap();
    }

    let writer = {
        let db = db.clone();
        let service = service.clone();
        tokio::spawn(async move {
            for seq in 50..100i64 {
                service.insert(&db, &doc! { "seq": seq }, None).await.unwrap();
            }
        })
    };

    let mut readers = vec![];
    for task_id in 0..4 {
        let db = db.clone();
        let service = service.clone();
        readers.push(tokio::spawn(async move {
            let mut last = 0;
            for _ in 0..20 {
                let count = service.count(&db, doc! {}, None).await.unwrap();
                assert!(count >= last, "Task {} saw the count shrink", task_id);
                assert!((50..=100).contains(&count));
                last = count;
            }
        }));
    }

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }

    assert_eq!(service.count(&db, doc! {}, None).await.unwrap(), 100);
    db.drop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lists_and_ensure_indexes_settle_on_ready() {
    let Some(db) = test_db().await else { return };
    let service = DefaultService::<Document>::new(
        ServiceConfig::new("items").index(doc! { "seq": 1 }),
    );

    let mut handles = vec![];
    for _ in 0..10 {
        let db = db.clone();
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.list(&db, doc! {}, ListOptions::new(), None).await.unwrap();
        }));
    }

    // an explicit call racing the background run decides the final state
    assert_eq!(
        service.ensure_indexes(&db).await.unwrap(),
        vec!["seq_1".to_string()]
    );
    for handle in handles {
        handle.await.unwrap();
    }

    let mut state = service.index_state(&db).await;
    for _ in 0..400 {
        if !matches!(state, IndexState::Pending) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        state = service.index_state(&db).await;
    }
    assert_eq!(state, IndexState::Ready(vec!["seq_1".to_string()]));

    let mut names = db
        .collection::<Document>("items")
        .list_index_names()
        .await
        .unwrap();
    names.sort();
    assert_eq!(names, vec!["_id_", "seq_1"]);

    db.drop().await.unwrap();
}
