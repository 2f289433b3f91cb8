//! Integration tests for cluster-ferry
//!
//! Everything runs against the in-memory store and clusters, so no Redis or
//! search cluster is needed.

use cluster_ferry::balancer::{BoundsBalancer, SizeBound, DEFAULT_FLUSH_SIZE};
use cluster_ferry::cluster::{Document, MemoryCluster, MemoryConnector, UpsertOp};
use cluster_ferry::coordinator::WorkerCoordinator;
use cluster_ferry::error::{FerryError, TransferError};
use cluster_ferry::generator::SubtaskGenerator;
use cluster_ferry::mutator::{
    DropDocuments, DropFields, FilterAxis, Item, Mutator, NameMatches, Pipeline, PluginRegistry,
};
use cluster_ferry::queue::{RunControl, TaskRegistry, WorkQueueStore};
use cluster_ferry::store::{KvStore, MemoryStore};
use cluster_ferry::task::{
    ClusterEndpoint, DocumentRange, DocumentsSpec, Subtask, SubtaskTransfer, Task, TransferSpec,
};
use cluster_ferry::transfer::{BulkFlusher, TransferConfig, TransferEngine, MAX_FLUSH_ATTEMPTS};
use cluster_ferry::worker::WorkerLoop;

use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn task(from_indices: &str) -> Task {
    Task {
        source: ClusterEndpoint::new("mem://src", "memory"),
        destination: ClusterEndpoint::new("mem://dst", "memory"),
        transfer: TransferSpec {
            documents: Some(DocumentsSpec {
                from_indices: from_indices.to_string(),
                filters: None,
                size_field: None,
            }),
            ..Default::default()
        },
        mutators: None,
    }
}

fn range_subtask(index: &str, min_size: i64, max_size: i64) -> Subtask {
    Subtask::new(
        &task("*"),
        SubtaskTransfer::Documents(DocumentRange {
            index: index.to_string(),
            doc_type: "event".to_string(),
            min_size,
            max_size,
            flush_size: 500,
            size_field: "_size".to_string(),
        }),
    )
}

fn memory_store() -> Arc<dyn KvStore> {
    Arc::new(MemoryStore::new())
}

#[test]
fn test_identity_ignores_only_count() {
    let a = range_subtask("logs", 0, 100);
    let b = range_subtask("logs", 0, 100).with_count(42);
    assert_eq!(a.id(), b.id());

    // Any other field changes the identity
    let other_range = range_subtask("logs", 0, 101);
    let other_index = range_subtask("metrics", 0, 100);
    let mut other_mutators = range_subtask("logs", 0, 100);
    other_mutators.mutators = Some("clean".to_string());
    let mut other_host = range_subtask("logs", 0, 100);
    other_host.destination.host = "mem://elsewhere".to_string();

    for different in [&other_range, &other_index, &other_mutators, &other_host] {
        assert_ne!(a.id(), different.id());
    }

    // The identity carries everything needed to rebuild the subtask
    let restored = Subtask::from_id(&b.id(), 42).unwrap();
    assert_eq!(restored, b);
}

#[tokio::test]
async fn test_enqueue_dedupes_and_dequeues_fifo() {
    let queue = WorkQueueStore::new(memory_store());
    let first = range_subtask("a", -1, -1).with_count(1);
    let second = range_subtask("b", -1, -1).with_count(2);
    let third = range_subtask("c", -1, -1).with_count(3);

    let added = queue
        .enqueue("copy", &[first.clone(), second.clone(), first.clone(), third.clone()])
        .await
        .unwrap();
    assert_eq!(added, 3);
    assert_eq!(queue.enqueue("copy", &[second.clone()]).await.unwrap(), 0);
    assert_eq!(queue.backlog_len("copy").await.unwrap(), 3);

    assert_eq!(queue.dequeue("copy").await.unwrap(), Some(first));
    assert_eq!(queue.dequeue("copy").await.unwrap(), Some(second));
    assert_eq!(queue.dequeue("copy").await.unwrap(), Some(third));
    assert_eq!(queue.dequeue("copy").await.unwrap(), None);
}

#[tokio::test]
async fn test_backlog_count_tracks_interleavings() {
    let queue = WorkQueueStore::new(memory_store());
    let subtasks: Vec<Subtask> = (0..6)
        .map(|i| range_subtask(&format!("idx{}", i), -1, -1).with_count(10 * (i + 1)))
        .collect();

    let mut expected: u64 = 0;
    queue.enqueue("copy", &subtasks[..3]).await.unwrap();
    expected += 10 + 20 + 30;
    assert_eq!(queue.count_backlog("copy").await.unwrap(), expected);

    let popped = queue.dequeue("copy").await.unwrap().unwrap();
    expected -= popped.count;
    assert_eq!(queue.count_backlog("copy").await.unwrap(), expected);

    queue.enqueue("copy", &subtasks[2..6]).await.unwrap();
    expected += 40 + 50 + 60;
    assert_eq!(queue.count_backlog("copy").await.unwrap(), expected);

    queue.complete("copy", &popped).await.unwrap();
    let popped = queue.dequeue("copy").await.unwrap().unwrap();
    expected -= popped.count;
    assert_eq!(queue.count_backlog("copy").await.unwrap(), expected);
    assert_eq!(queue.count_completed("copy").await.unwrap(), 10);

    while let Some(subtask) = queue.dequeue("copy").await.unwrap() {
        expected -= subtask.count;
        assert_eq!(queue.count_backlog("copy").await.unwrap(), expected);
    }
    assert_eq!(expected, 0);
}

#[tokio::test]
async fn test_uniform_documents_get_single_bound() {
    let cluster = MemoryCluster::new("mem://src");
    for i in 0..100 {
        cluster.insert_sized("uniform", "doc", &i.to_string(), json!({"n": i}), 100);
    }

    let bounds = BoundsBalancer::new("_size", DEFAULT_FLUSH_SIZE)
        .balance(&cluster, "uniform", "doc")
        .await
        .unwrap();
    assert_eq!(bounds, vec![SizeBound::unbounded(DEFAULT_FLUSH_SIZE)]);
    assert_eq!(bounds[0].min_size, -1);
    assert_eq!(bounds[0].max_size, -1);
    assert_eq!(bounds[0].flush_size, 500);
}

#[tokio::test]
async fn test_small_documents_partition_into_three_bounds() {
    let cluster = MemoryCluster::new("mem://src");
    // Mixed uploads between 1 byte and 1 KB, plus one document of exactly 1 KB
    for i in 0..300i64 {
        let size = (i * 7) % 1024 + 1;
        cluster.insert_sized("uploads", "file", &i.to_string(), json!({}), size);
    }
    cluster.insert_sized("uploads", "file", "exact", json!({}), 1024);

    let bounds = BoundsBalancer::new("_size", DEFAULT_FLUSH_SIZE)
        .balance(&cluster, "uploads", "file")
        .await
        .unwrap();

    assert_eq!(bounds.len(), 3);
    assert_eq!(bounds[0].min_size, 0);
    assert_eq!(bounds[2].max_size, 1025);
    for pair in bounds.windows(2) {
        assert_eq!(pair[0].max_size, pair[1].min_size);
    }
    for bound in &bounds {
        assert!(bound.min_size < bound.max_size);
        assert!(bound.flush_size > 0);
    }
}

#[test]
fn test_pipeline_pass_through_and_drop() {
    let steps: Vec<Arc<dyn Mutator>> = vec![
        Arc::new(DropDocuments::new("status", json!("deleted"))),
        Arc::new(DropFields::new(vec!["secret".to_string()])),
    ];
    let pipeline = Pipeline::new(steps);

    let document = |id: &str, source: serde_json::Value| Document {
        index: "logs".to_string(),
        doc_type: "event".to_string(),
        id: id.to_string(),
        source,
    };

    // No predicate matches: untouched
    let plain = document("1", json!({"status": "live", "n": 1}));
    match pipeline.apply(Item::Document(plain.clone())) {
        Some(Item::Document(out)) => assert_eq!(out, plain),
        other => panic!("unexpected pipeline output: {:?}", other),
    }

    // Dropped entirely
    let deleted = document("2", json!({"status": "deleted", "secret": "x"}));
    assert!(pipeline.apply(Item::Document(deleted)).is_none());

    // Later steps still run on surviving documents
    let secret = document("3", json!({"status": "live", "secret": "x"}));
    match pipeline.apply(Item::Document(secret)) {
        Some(Item::Document(out)) => assert_eq!(out.source, json!({"status": "live"})),
        other => panic!("unexpected pipeline output: {:?}", other),
    }
}

#[tokio::test]
async fn test_flush_gives_up_after_five_attempts() {
    let destination = MemoryCluster::new("mem://dst");
    let flusher = BulkFlusher::new(&destination, Duration::from_millis(1), Duration::from_millis(2));
    let ops = |n: usize| {
        (0..n)
            .map(|i| {
                UpsertOp::from_document(Document {
                    index: "logs".to_string(),
                    doc_type: "event".to_string(),
                    id: i.to_string(),
                    source: json!({"n": i}),
                })
            })
            .collect::<Vec<_>>()
    };

    destination.reject_next_bulks(MAX_FLUSH_ATTEMPTS - 1);
    assert_eq!(flusher.flush(ops(3)).await.unwrap(), 3);
    assert_eq!(destination.bulk_calls(), MAX_FLUSH_ATTEMPTS);

    destination.reject_next_bulks(MAX_FLUSH_ATTEMPTS + 3);
    let err = flusher.flush(ops(3)).await.unwrap_err();
    assert!(matches!(
        err,
        FerryError::Transfer(TransferError::ExceededFlushRetries { attempts: 5, .. })
    ));
    assert_eq!(destination.bulk_calls(), 2 * MAX_FLUSH_ATTEMPTS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_reservations_get_distinct_names() {
    let store = memory_store();
    let pool = ["amber-otter@host", "brave-yak@host", "calm-heron@host"];

    let handles: Vec<_> = (0..pool.len())
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                let worker = WorkerCoordinator::reserve_with(store, Duration::from_secs(10), |attempt| {
                    pool[attempt as usize % pool.len()].to_string()
                })
                .await
                .unwrap();
                worker.name().to_string()
            })
        })
        .collect();

    let mut names = HashSet::new();
    for handle in handles {
        assert!(names.insert(handle.await.unwrap()));
    }
    assert_eq!(names.len(), pool.len());
}

/// Source with three indices whose type mappings differ
fn three_index_source() -> Arc<MemoryCluster> {
    let source = Arc::new(MemoryCluster::new("mem://src"));
    for i in 0..4 {
        source.insert_sized("orders", "order", &i.to_string(), json!({"n": i}), 200);
    }
    for i in 0..7 {
        source.insert_sized("users", "user", &i.to_string(), json!({"n": i}), 300);
    }
    for i in 0..2 {
        source.insert_sized("audit", "login", &i.to_string(), json!({"n": i}), 50);
    }
    for i in 0..5 {
        source.insert_sized("audit", "debug", &i.to_string(), json!({"n": i}), 50);
    }
    source
}

#[tokio::test]
async fn test_backlog_has_one_subtask_per_pair_with_exact_counts() {
    let source = three_index_source();
    let connector = Arc::new(MemoryConnector::new());
    connector.register(source.clone());

    let mut plugins = PluginRegistry::new();
    plugins.register_filter("nodebug", Arc::new(NameMatches::new(FilterAxis::Type, "*,-debug")));

    let queue = WorkQueueStore::new(memory_store());
    let generator = SubtaskGenerator::new(queue.clone(), connector, Arc::new(plugins));

    let mut filtered = task("*");
    if let Some(documents) = filtered.transfer.documents.as_mut() {
        documents.filters = Some("nodebug".to_string());
    }

    let summary = generator.build_backlog("copy", &filtered).await.unwrap();
    assert_eq!(summary.generated, 3);
    assert_eq!(summary.enqueued, 3);
    assert_eq!(summary.documents, 4 + 7 + 2);

    let mut pairs: Vec<(String, String, u64)> = queue
        .backlog("copy")
        .await
        .unwrap()
        .into_iter()
        .map(|s| {
            let range = s.documents().cloned().unwrap();
            (range.index, range.doc_type, s.count)
        })
        .collect();
    pairs.sort();
    assert_eq!(
        pairs,
        vec![
            ("audit".to_string(), "login".to_string(), 2),
            ("orders".to_string(), "order".to_string(), 4),
            ("users".to_string(), "user".to_string(), 7),
        ]
    );
    assert_eq!(queue.count_backlog("copy").await.unwrap(), 13);
}

#[tokio::test]
async fn test_task_migrates_end_to_end() {
    let store = memory_store();
    let source = three_index_source();
    let destination = Arc::new(MemoryCluster::new("mem://dst"));
    let connector = Arc::new(MemoryConnector::new());
    connector.register(source.clone());
    connector.register(destination.clone());
    let plugins = Arc::new(PluginRegistry::new());

    let definition = task("orders,users");
    TaskRegistry::new(store.clone()).add("copy", &definition).await.unwrap();

    let queue = WorkQueueStore::new(store.clone());
    let generator = SubtaskGenerator::new(queue.clone(), connector.clone(), plugins.clone());
    let summary = generator.build_backlog("copy", &definition).await.unwrap();
    assert_eq!(summary.enqueued, 2);

    RunControl::new(store.clone()).resume().await.unwrap();

    let config = TransferConfig {
        backoff_min: Duration::from_millis(1),
        backoff_max: Duration::from_millis(2),
        ..Default::default()
    };
    let coordinator = Arc::new(
        WorkerCoordinator::reserve_with(store.clone(), Duration::from_secs(10), |_| {
            "solo@host".to_string()
        })
        .await
        .unwrap(),
    );
    let mut worker = WorkerLoop::new(
        coordinator,
        queue.clone(),
        TaskRegistry::new(store.clone()),
        RunControl::new(store.clone()),
        TransferEngine::new(connector, plugins, config),
    )
    .with_poll_interval(Duration::from_millis(5))
    .exit_when_drained();

    let stats = worker.run().await.unwrap();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.documents, 11);

    assert_eq!(destination.documents("orders").len(), 4);
    assert_eq!(destination.documents("users").len(), 7);
    assert!(destination.documents("audit").is_empty());
    assert_eq!(queue.count_completed("copy").await.unwrap(), 11);
    assert_eq!(queue.backlog_len("copy").await.unwrap(), 0);

    // A rebuild after completion has nothing left to enqueue
    let again = generator.build_backlog("copy", &definition).await.unwrap();
    assert_eq!(again.skipped_completed, 2);
    assert_eq!(again.enqueued, 0);
}
