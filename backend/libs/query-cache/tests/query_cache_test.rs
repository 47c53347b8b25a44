//! Integration tests for the query cache: executor, store and mutation paths

use query_cache::{
    CacheConfig, CacheStore, ExecutorConfig, ManualClock, MutationCoordinator, MutationRecord,
    QueryError, QueryExecutor, QueryKey,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Client {
    id: u32,
    name: String,
}

fn client(id: u32, name: &str) -> Client {
    Client {
        id,
        name: name.to_string(),
    }
}

fn counting_fetch(
    calls: &Arc<AtomicU32>,
    value: Client,
) -> impl FnOnce() -> std::future::Ready<Result<Client, anyhow::Error>> {
    let calls = Arc::clone(calls);
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(value))
    }
}

// ==================== Executor ====================

#[tokio::test]
async fn test_cache_hit_suppresses_refetch() {
    let store = Arc::new(CacheStore::new());
    let executor = QueryExecutor::new(Arc::clone(&store));
    store.set_as("clients:1", &client(1, "Acme"), TTL).unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let value = executor
        .execute("clients:1", TTL, counting_fetch(&calls, client(1, "Other")))
        .await
        .unwrap();

    assert_eq!(value, client(1, "Acme"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cache_miss_populates_then_serves() {
    let executor = QueryExecutor::new(Arc::new(CacheStore::new()));
    let calls = Arc::new(AtomicU32::new(0));
    let key = QueryKey::new("clients").param(1).build();

    let first = executor
        .execute(&key, TTL, counting_fetch(&calls, client(1, "Acme")))
        .await
        .unwrap();
    let second = executor
        .execute(&key, TTL, counting_fetch(&calls, client(1, "Renamed")))
        .await
        .unwrap();

    assert_eq!(first, client(1, "Acme"));
    assert_eq!(second, client(1, "Acme"), "second read must come from cache");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let stats = executor.store().stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_failed_fetch_never_poisons_cache() {
    let executor = QueryExecutor::new(Arc::new(CacheStore::new()));
    let calls = Arc::new(AtomicU32::new(0));

    let failing = {
        let calls = Arc::clone(&calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<Client, _>(anyhow::anyhow!("backend unavailable")) }
        }
    };
    let result = executor.execute("clients:1", TTL, failing).await;
    match result {
        Err(QueryError::FetchFailed(e)) => assert_eq!(e.to_string(), "backend unavailable"),
        other => panic!("expected fetch failure, got {:?}", other),
    }
    assert!(!executor.store().contains("clients:1"));

    let value = executor
        .execute("clients:1", TTL, counting_fetch(&calls, client(1, "Acme")))
        .await
        .unwrap();
    assert_eq!(value, client(1, "Acme"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(executor.store().stats().fetch_errors, 1);
}

#[tokio::test]
async fn test_expired_entry_triggers_fresh_fetch() {
    let clock = ManualClock::new();
    let store = Arc::new(CacheStore::with_clock(Arc::new(clock.clone())));
    let executor = QueryExecutor::new(store);
    let calls = Arc::new(AtomicU32::new(0));
    let ttl = Duration::from_millis(500);

    executor
        .execute("clients:1", ttl, counting_fetch(&calls, client(1, "Acme")))
        .await
        .unwrap();

    clock.advance(ttl);
    let at_ttl = executor
        .execute("clients:1", ttl, counting_fetch(&calls, client(1, "Renamed")))
        .await
        .unwrap();
    assert_eq!(at_ttl, client(1, "Acme"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    clock.advance(Duration::from_millis(1));
    let after_ttl = executor
        .execute("clients:1", ttl, counting_fetch(&calls, client(1, "Renamed")))
        .await
        .unwrap();
    assert_eq!(after_ttl, client(1, "Renamed"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_prefix_invalidation_through_executor() {
    let executor = QueryExecutor::new(Arc::new(CacheStore::new()));
    let store = executor.store();
    store.set_as("clients:1", &client(1, "A"), TTL).unwrap();
    store.set_as("clients:2", &client(2, "B"), TTL).unwrap();
    store.set_as("contracts:1", &client(3, "C"), TTL).unwrap();

    assert_eq!(executor.invalidate_by_prefix("clients:"), 2);
    assert_eq!(store.keys(), vec!["contracts:1"]);

    assert!(executor.invalidate("contracts:1"));
    assert!(store.is_empty());
}

// ==================== Single-flight ====================

fn slow_fetch_after(
    delay: Duration,
    calls: &Arc<AtomicU32>,
    result: Result<Client, &'static str>,
) -> impl FnOnce() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Client, &'static str>> + Send>>
{
    let calls = Arc::clone(calls);
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            result
        })
    }
}

fn slow_fetch(
    calls: &Arc<AtomicU32>,
    result: Result<Client, &'static str>,
) -> impl FnOnce() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Client, &'static str>> + Send>>
{
    slow_fetch_after(Duration::from_millis(50), calls, result)
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_misses_share_one_fetch() {
    let executor = QueryExecutor::new(Arc::new(CacheStore::new()));
    let calls = Arc::new(AtomicU32::new(0));

    let (a, b) = tokio::join!(
        executor.execute("clients:1", TTL, slow_fetch(&calls, Ok(client(1, "Acme")))),
        executor.execute("clients:1", TTL, slow_fetch(&calls, Ok(client(1, "Dup")))),
    );

    assert_eq!(a.unwrap(), client(1, "Acme"));
    assert_eq!(b.unwrap(), client(1, "Acme"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(executor.store().stats().coalesced, 1);
    assert_eq!(executor.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_waiter_fetches_after_leader_fails() {
    let executor = QueryExecutor::new(Arc::new(CacheStore::new()));
    let calls = Arc::new(AtomicU32::new(0));

    let (a, b) = tokio::join!(
        executor.execute("clients:1", TTL, slow_fetch(&calls, Err("timeout"))),
        executor.execute("clients:1", TTL, slow_fetch(&calls, Ok(client(1, "Acme")))),
    );

    assert!(matches!(a, Err(QueryError::FetchFailed("timeout"))));
    assert_eq!(b.unwrap(), client(1, "Acme"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_distinct_keys_fetch_in_parallel() {
    let executor = QueryExecutor::new(Arc::new(CacheStore::new()));
    let calls = Arc::new(AtomicU32::new(0));

    let (a, b) = tokio::join!(
        executor.execute("clients:1", TTL, slow_fetch(&calls, Ok(client(1, "A")))),
        executor.execute("clients:2", TTL, slow_fetch(&calls, Ok(client(2, "B")))),
    );

    assert_eq!(a.unwrap().id, 1);
    assert_eq!(b.unwrap().id, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_single_flight_disabled_allows_duplicate_fetches() {
    let executor = QueryExecutor::with_config(
        Arc::new(CacheStore::new()),
        ExecutorConfig {
            single_flight: false,
        },
    );
    let calls = Arc::new(AtomicU32::new(0));

    let (a, b) = tokio::join!(
        executor.execute(
            "clients:1",
            TTL,
            slow_fetch_after(Duration::from_millis(50), &calls, Ok(client(1, "First")))
        ),
        executor.execute(
            "clients:1",
            TTL,
            slow_fetch_after(Duration::from_millis(80), &calls, Ok(client(1, "Second")))
        ),
    );

    assert_eq!(a.unwrap().name, "First");
    assert_eq!(b.unwrap().name, "Second");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    // last writer wins
    let cached = executor.store().get_as::<Client>("clients:1").unwrap();
    assert_eq!(cached.name, "Second");
}

#[tokio::test]
async fn test_spawned_callers_share_one_fetch() {
    let executor = QueryExecutor::new(Arc::new(CacheStore::new()));
    let calls = Arc::new(AtomicU32::new(0));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let executor = executor.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                executor
                    .execute("suppliers:list", TTL, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, String>(vec![1u32, 2, 3])
                    })
                    .await
            })
        })
        .collect();

    for result in futures_util::future::join_all(tasks).await {
        assert_eq!(result.unwrap().unwrap(), vec![1, 2, 3]);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ==================== Mutations ====================

#[tokio::test]
async fn test_mutation_invalidates_before_returning() {
    let executor = QueryExecutor::new(Arc::new(CacheStore::new()));
    let mutations = MutationCoordinator::new(executor.clone());
    let calls = Arc::new(AtomicU32::new(0));

    executor
        .execute("clients:42", TTL, counting_fetch(&calls, client(42, "Acme")))
        .await
        .unwrap();
    executor.store().set_as("clients:7", &client(7, "Kept"), TTL).unwrap();

    let updated = mutations
        .mutate_prefixes(
            || async { Ok::<_, anyhow::Error>(client(42, "Acme Ltd")) },
            &["clients:42"],
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "Acme Ltd");

    assert!(executor.store().get("clients:42").is_none());
    assert!(executor.store().contains("clients:7"));

    let reread = executor
        .execute("clients:42", TTL, counting_fetch(&calls, client(42, "Acme Ltd")))
        .await
        .unwrap();
    assert_eq!(reread.name, "Acme Ltd");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_mutation_keeps_cache() {
    let executor = QueryExecutor::new(Arc::new(CacheStore::new()));
    let mutations = MutationCoordinator::new(executor.clone());
    executor.store().set_as("clients:42", &client(42, "Acme"), TTL).unwrap();

    let result = mutations
        .mutate(
            || async { Err::<(), _>("constraint violation") },
            &MutationRecord::new().entity("clients", 42).resource("contracts"),
        )
        .await;

    assert!(matches!(
        result,
        Err(QueryError::WriteFailed("constraint violation"))
    ));
    assert!(executor.store().contains("clients:42"));
}

#[tokio::test]
async fn test_mutation_invalidates_every_prefix_in_record() {
    let executor = QueryExecutor::new(Arc::new(CacheStore::new()));
    let mutations = MutationCoordinator::new(executor.clone());
    let store = executor.store();
    store.set_as("clients:42", &client(42, "Acme"), TTL).unwrap();
    store.set_as("contracts:by_client:42", &client(1, "c"), TTL).unwrap();
    store.set_as("contracts:by_client:9", &client(2, "c"), TTL).unwrap();
    store.set_as("suppliers:1", &client(3, "s"), TTL).unwrap();

    let record = MutationRecord::new()
        .entity("clients", 42)
        .prefix(QueryKey::new("contracts").op("by_client").param(42).build());
    mutations
        .mutate(|| async { Ok::<_, String>(()) }, &record)
        .await
        .unwrap();

    assert_eq!(store.keys(), vec!["contracts:by_client:9", "suppliers:1"]);
}

#[tokio::test]
#[serial_test::serial]
async fn test_mutation_invalidates_versioned_keys() {
    std::env::set_var("QUERY_CACHE_KEY_VERSION", "1");
    let config = CacheConfig::from_env();
    std::env::remove_var("QUERY_CACHE_KEY_VERSION");

    let executor = QueryExecutor::new(Arc::new(CacheStore::new()));
    let mutations = MutationCoordinator::new(executor.clone());
    let calls = Arc::new(AtomicU32::new(0));

    let key = config.key("clients").param(42).build();
    assert_eq!(key, "v1:clients:42");
    executor
        .execute(&key, TTL, counting_fetch(&calls, client(42, "Acme")))
        .await
        .unwrap();
    let list = config.key("clients").op("list").build();
    executor.store().set_as(&list, &vec![42u32], TTL).unwrap();

    mutations
        .mutate(
            || async { Ok::<_, String>(()) },
            &config.mutation_record().entity("clients", 42),
        )
        .await
        .unwrap();
    assert!(!executor.store().contains(&key));
    assert!(executor.store().contains(&list));

    mutations
        .mutate(
            || async { Ok::<_, String>(()) },
            &config.mutation_record().resource("clients"),
        )
        .await
        .unwrap();
    assert!(executor.store().is_empty());
}
