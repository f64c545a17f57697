use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use prometheus::Registry;
use tracing_test::traced_test;

use super::*;
use crate::BackoffPolicy;
use crate::ClientMonitor;
use crate::Connection;
use crate::CreateMode;
use crate::Error;
use crate::MemoryStore;
use crate::MockConnection;
use crate::MonitoringConfig;
use crate::PathCategory;
use crate::Record;
use crate::Stat;
use crate::WatchedEvent;
use crate::ANY_VERSION;
use crate::MAX_NODE_SIZE;

fn test_config(op_timeout_ms: u64) -> ClientConfig {
    ClientConfig {
        connection_timeout_ms: 2000,
        retry: BackoffPolicy {
            max_retries: 0,
            timeout_ms: op_timeout_ms,
            base_delay_ms: 5,
            max_delay_ms: 50,
        },
        ..Default::default()
    }
}

fn connect(store: &MemoryStore) -> (CoordClient, Arc<ClientMonitor>) {
    connect_with(store, test_config(1000))
}

fn connect_with(
    store: &MemoryStore,
    config: ClientConfig,
) -> (CoordClient, Arc<ClientMonitor>) {
    static NEXT_KEY: AtomicUsize = AtomicUsize::new(0);
    let key = format!("test-{}", NEXT_KEY.fetch_add(1, Ordering::SeqCst));
    let monitor = Arc::new(ClientMonitor::register(&Registry::new(), "CustomizedKey", &key).unwrap());
    let client = CoordClient::builder(Arc::new(store.clone()))
        .config(config)
        .metrics_sink(monitor.clone())
        .build()
        .unwrap();
    (client, monitor)
}

fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn record(id: &str) -> Record {
    let mut record = Record::new(id);
    record.set_simple_field("HELIX_HOST", "localhost");
    record
}

/// Hands out one fixed connection, announcing it as connected.
struct FixedFactory(Arc<dyn Connection>);

impl ConnectionFactory for FixedFactory {
    fn connect(
        &self,
        _config: &ClientConfig,
        events: EventSink,
    ) -> crate::Result<Arc<dyn Connection>> {
        events.send(WatchedEvent::State(SessionState::Connected));
        Ok(self.0.clone())
    }
}

fn mock_connection() -> MockConnection {
    let mut conn = MockConnection::new();
    conn.expect_session_id().return_const(42u64);
    conn.expect_servers().returning(|| "mock:2181".to_string());
    conn.expect_close().return_const(());
    conn
}

#[test]
fn test_build_waits_for_connected_session() {
    let store = MemoryStore::new();
    let (client, _) = connect_with(
        &store,
        ClientConfig {
            servers: "zk1:2181".to_string(),
            session_timeout_ms: 5000,
            ..test_config(1000)
        },
    );
    let session = client.session_id().unwrap();

    assert_eq!(client.state(), SessionState::Connected);
    assert_eq!(client.servers().as_deref(), Some("zk1:2181"));
    assert_eq!(store.session_timeout(session), Some(Duration::from_millis(5000)));
    assert_eq!(client.lifecycle(), LifecycleState::Open);
    assert!(client.session_id().is_some());
}

#[test]
fn test_build_fails_when_session_never_connects() {
    let conn = mock_connection();
    struct SilentFactory(Arc<dyn Connection>);
    impl ConnectionFactory for SilentFactory {
        fn connect(
            &self,
            _config: &ClientConfig,
            _events: EventSink,
        ) -> crate::Result<Arc<dyn Connection>> {
            Ok(self.0.clone())
        }
    }

    let result = CoordClient::builder(Arc::new(SilentFactory(Arc::new(conn))))
        .config(ClientConfig {
            connection_timeout_ms: 50,
            ..test_config(100)
        })
        .build();

    assert!(matches!(result, Err(Error::TransientConnectionLoss(_))));
}

#[test]
fn test_crud_round_trip() {
    let store = MemoryStore::new();
    let (client, _) = connect(&store);

    client.create_persistent("/cluster/LIVEINSTANCES", true).unwrap();
    let path = client
        .create("/cluster/LIVEINSTANCES/node_1", Some(&record("node_1")), CreateMode::Ephemeral)
        .unwrap();
    assert_eq!(path, "/cluster/LIVEINSTANCES/node_1");
    assert!(client.exists(&path).unwrap());

    let (read, stat) = client.read_data(&path).unwrap();
    assert_eq!(read, record("node_1"));
    assert_eq!(stat.version, 0);
    assert!(stat.is_ephemeral());

    let mut updated = read.clone();
    updated.set_simple_field("HELIX_PORT", "12918");
    let stat = client.write_data(&path, &updated, stat.version).unwrap();
    assert_eq!(stat.version, 1);
    assert_eq!(client.read_data(&path).unwrap().0, updated);

    assert!(client.delete(&path).unwrap());
    assert!(!client.delete(&path).unwrap());
    assert!(!client.exists(&path).unwrap());
    assert!(client.get_stat(&path).unwrap().is_none());
}

#[test]
fn test_sequential_create_returns_actual_path() {
    let store = MemoryStore::new();
    let (client, _) = connect(&store);
    client.create_persistent("/q", false).unwrap();

    let actual = client.create("/q/msg-", None, CreateMode::PersistentSequential).unwrap();

    assert_eq!(actual, "/q/msg-0000000000");
    assert_eq!(client.read_bytes(&actual).unwrap().0, Vec::<u8>::new());
}

#[test]
fn test_empty_path_rejected_without_io() {
    let store = MemoryStore::new();
    let (client, _) = connect(&store);
    let before = store.request_count();

    assert!(matches!(
        client.create_bytes("", b"x", CreateMode::Persistent),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(client.read_bytes(""), Err(Error::InvalidArgument(_))));
    assert_eq!(store.request_count(), before);
}

#[test]
#[traced_test]
fn test_oversized_payload_rejected_before_io() {
    let store = MemoryStore::new();
    let (client, monitor) = connect(&store);
    client.create_persistent("/c/IDEALSTATES/db", true).unwrap();
    let writes = monitor.write_count(None);
    let failures = monitor.write_failures(None);
    let category_failures = monitor.write_failures(Some(PathCategory::IdealStates));
    let before = store.request_count();
    let payload = vec![b'a'; MAX_NODE_SIZE + 1];

    match client.write_bytes("/c/IDEALSTATES/db", &payload, ANY_VERSION) {
        Err(Error::PayloadTooLarge { size, limit, .. }) => {
            assert_eq!(size, MAX_NODE_SIZE + 1);
            assert_eq!(limit, MAX_NODE_SIZE);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        client.create_bytes("/c/IDEALSTATES/big", &payload, CreateMode::Persistent),
        Err(Error::PayloadTooLarge { .. })
    ));

    assert_eq!(store.request_count(), before);
    assert_eq!(monitor.write_count(None), writes);
    assert_eq!(monitor.write_failures(None), failures + 2);
    assert_eq!(
        monitor.write_failures(Some(PathCategory::IdealStates)),
        category_failures + 2
    );
    assert!(logs_contain("will not write /c/IDEALSTATES/db"));
}

#[test]
fn test_payload_at_limit_is_accepted() {
    let store = MemoryStore::new();
    let (client, _) = connect(&store);
    client.create_persistent("/big", false).unwrap();

    let stat = client.write_bytes("/big", &vec![0u8; MAX_NODE_SIZE], ANY_VERSION).unwrap();

    assert_eq!(stat.data_length, MAX_NODE_SIZE);
}

#[test]
fn test_version_conflict_leaves_data_unchanged() {
    let store = MemoryStore::new();
    let (client, monitor) = connect(&store);
    client.create_persistent("/c/CONFIGS/PARTICIPANT", true).unwrap();
    let path = "/c/CONFIGS/PARTICIPANT/node_1";
    client.create(path, Some(&record("v0")), CreateMode::Persistent).unwrap();
    for _ in 0..5 {
        client.write_data(path, &record("v0"), ANY_VERSION).unwrap();
    }
    client.write_data(path, &record("v6"), ANY_VERSION).unwrap();
    let stored = client.read_data(path).unwrap();
    assert_eq!(stored.1.version, 6);
    let failures = monitor.write_failures(Some(PathCategory::Configs));

    match client.write_data(path, &record("stale"), 5) {
        Err(Error::VersionConflict {
            expected, actual, ..
        }) => {
            assert_eq!(expected, 5);
            assert_eq!(actual, 6);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(client.read_data(path).unwrap(), stored);
    assert_eq!(monitor.write_failures(Some(PathCategory::Configs)), failures + 1);
}

#[test]
fn test_create_persistent_tolerates_existing_nodes() {
    let store = MemoryStore::new();
    let (client, _) = connect(&store);

    client.create_persistent("/a/b/c", true).unwrap();
    client.create_persistent("/a/b/c", true).unwrap();
    assert!(client.exists("/a/b").unwrap());

    assert!(matches!(client.create_persistent("/a/b/c", false), Err(Error::NodeExists(_))));
    assert!(matches!(client.create_persistent("/x/y", false), Err(Error::NoSuchNode(_))));
}

#[test]
fn test_read_missing_node() {
    let store = MemoryStore::new();
    let (client, monitor) = connect(&store);

    assert!(matches!(client.read_data("/missing"), Err(Error::NoSuchNode(_))));
    assert_eq!(monitor.read_failures(None), 1);

    assert!(client.read_data_if_exists("/missing").unwrap().is_none());
    assert_eq!(monitor.read_failures(None), 1);
}

#[test]
fn test_read_empty_payload_as_record_fails() {
    let store = MemoryStore::new();
    let (client, _) = connect(&store);
    client.create_persistent("/empty", false).unwrap();

    assert!(matches!(client.read_data("/empty"), Err(Error::Serialization(_))));
}

#[test]
fn test_get_children_records() {
    let store = MemoryStore::new();
    let (client, monitor) = connect(&store);

    assert!(client.get_children_records("/c/EXTERNALVIEW").unwrap().is_empty());
    assert_eq!(monitor.read_failures(None), 0);
    assert_eq!(monitor.read_count(Some(PathCategory::ExternalView)), 1);
    assert!(matches!(
        client.get_children_names("/c/EXTERNALVIEW"),
        Err(Error::NoSuchNode(_))
    ));
    assert_eq!(monitor.read_failures(None), 1);

    client.create_persistent("/c/EXTERNALVIEW", true).unwrap();
    for name in ["db", "search"] {
        client
            .create(&format!("/c/EXTERNALVIEW/{name}"), Some(&record(name)), CreateMode::Persistent)
            .unwrap();
    }

    let records = client.get_children_records("/c/EXTERNALVIEW").unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records["db"], record("db"));
    assert_eq!(
        client.get_children_names("/c/EXTERNALVIEW").unwrap(),
        vec!["db".to_string(), "search".to_string()]
    );
}

#[test]
fn test_get_children_records_skips_vanished_children() {
    let mut conn = mock_connection();
    conn.expect_get_children()
        .returning(|_, _| Ok(vec!["gone".to_string(), "here".to_string()]));
    conn.expect_get_data().returning(|path, _| {
        if path.ends_with("gone") {
            Err(Error::NoSuchNode(path.to_string()))
        } else {
            Ok((br#"{"id":"here"}"#.to_vec(), Stat::default()))
        }
    });
    let client = CoordClient::builder(Arc::new(FixedFactory(Arc::new(conn))))
        .config(test_config(200))
        .build()
        .unwrap();

    let records = client.get_children_records("/c/LIVEINSTANCES").unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records["here"].id, "here");
}

#[test]
fn test_read_metrics_by_category() {
    let store = MemoryStore::new();
    let (client, monitor) = connect(&store);
    client.create_persistent("/c/EXTERNALVIEW", true).unwrap();
    client
        .create_bytes("/c/EXTERNALVIEW/db", b"0123456789", CreateMode::Persistent)
        .unwrap();
    let reads = monitor.read_count(None);

    client.read_bytes("/c/EXTERNALVIEW/db").unwrap();

    assert_eq!(monitor.read_count(None), reads + 1);
    assert_eq!(monitor.read_count(Some(PathCategory::ExternalView)), 1);
    assert_eq!(monitor.read_bytes(Some(PathCategory::ExternalView)), 10);
    assert_eq!(monitor.write_bytes(Some(PathCategory::ExternalView)), 10);
    assert_eq!(monitor.read_count(Some(PathCategory::LiveInstances)), 0);
}

#[test]
fn test_retry_rides_out_transient_loss() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut conn = mock_connection();
    let counter = attempts.clone();
    conn.expect_get_data().returning(move |_, _| {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(Error::TransientConnectionLoss("flap".to_string()))
        } else {
            Ok((b"ok".to_vec(), Stat::default()))
        }
    });
    let client = CoordClient::builder(Arc::new(FixedFactory(Arc::new(conn))))
        .config(test_config(1000))
        .build()
        .unwrap();

    assert_eq!(client.read_bytes("/n").unwrap().0, b"ok".to_vec());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[test]
fn test_non_retryable_errors_are_not_retried() {
    let mut conn = mock_connection();
    conn.expect_get_data()
        .times(1)
        .returning(|_, _| Err(Error::InvalidSession("gone".to_string())));
    let client = CoordClient::builder(Arc::new(FixedFactory(Arc::new(conn))))
        .config(test_config(1000))
        .build()
        .unwrap();

    assert!(matches!(client.read_bytes("/n"), Err(Error::InvalidSession(_))));
}

#[test]
fn test_retry_resumes_after_reconnect() {
    let store = MemoryStore::new();
    let (client, _) = connect_with(&store, test_config(5000));
    client.create_persistent("/n", false).unwrap();
    let session = client.session_id().unwrap();

    store.disconnect(session);
    let reconnector = {
        let store = store.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            store.reconnect(session);
        })
    };

    assert!(client.exists("/n").unwrap());
    reconnector.join().unwrap();
}

#[test]
fn test_retry_gives_up_at_deadline() {
    let store = MemoryStore::new();
    let (client, monitor) = connect_with(&store, test_config(150));
    store.disconnect(client.session_id().unwrap());

    let started = Instant::now();
    let result = client.read_bytes("/n");

    assert!(matches!(result, Err(Error::TransientConnectionLoss(_))));
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(monitor.read_failures(None), 1);
}

#[test]
fn test_retry_respects_max_retries() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut conn = mock_connection();
    let counter = attempts.clone();
    conn.expect_exists().returning(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(Error::TransientConnectionLoss("down".to_string()))
    });
    let mut config = test_config(10_000);
    config.retry.max_retries = 3;
    let client = CoordClient::builder(Arc::new(FixedFactory(Arc::new(conn))))
        .config(config)
        .build()
        .unwrap();

    assert!(matches!(client.exists("/n"), Err(Error::TransientConnectionLoss(_))));
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
}

#[test]
fn test_unbounded_timeouts_do_not_overflow() {
    let store = MemoryStore::new();
    let mut config = test_config(u64::MAX);
    config.connection_timeout_ms = u64::MAX;
    config.retry.max_retries = 2;
    let (client, _) = connect_with(&store, config);
    client.create_persistent("/n", false).unwrap();
    assert!(client.exists("/n").unwrap());

    store.disconnect(client.session_id().unwrap());

    assert!(matches!(client.exists("/n"), Err(Error::TransientConnectionLoss(_))));
}

#[test]
fn test_close_fails_in_flight_retries_fast() {
    let store = MemoryStore::new();
    let (client, _) = connect_with(&store, test_config(30_000));
    store.disconnect(client.session_id().unwrap());

    let reader = {
        let client = client.clone();
        thread::spawn(move || {
            let started = Instant::now();
            (client.read_bytes("/n"), started.elapsed())
        })
    };
    thread::sleep(Duration::from_millis(100));
    client.close();

    let (result, elapsed) = reader.join().unwrap();
    assert!(matches!(result, Err(Error::InvalidSession(_))));
    assert!(elapsed < Duration::from_secs(5));
}

#[test]
fn test_close_is_idempotent() {
    let store = MemoryStore::new();
    let (client, monitor) = connect(&store);
    let session = client.session_id().unwrap();
    client.create_persistent("/eph-parent", false).unwrap();
    client.create_bytes("/eph-parent/e", b"", CreateMode::Ephemeral).unwrap();

    client.close();
    client.close();

    assert!(client.is_closed());
    assert_eq!(client.lifecycle(), LifecycleState::Closed);
    assert_eq!(client.state(), SessionState::Closed);
    assert!(client.session_id().is_none());
    assert!(monitor.is_unregistered());
    assert_eq!(store.session_state(session), None);
    assert!(matches!(client.exists("/eph-parent"), Err(Error::InvalidSession(_))));

    let (other, _) = connect(&store);
    assert!(!other.exists("/eph-parent/e").unwrap());
}

#[test]
fn test_dropping_last_handle_closes_session() {
    let store = MemoryStore::new();
    let (client, monitor) = connect(&store);
    let session = client.session_id().unwrap();
    let weak = client.downgrade();
    let clone = client.clone();

    drop(client);
    assert_eq!(store.session_state(session), Some(SessionState::Connected));
    drop(clone);

    // the event thread may still hold the last reference for a moment
    assert!(eventually(|| weak.upgrade().is_none()));
    assert!(eventually(|| store.session_state(session).is_none()));
    assert!(eventually(|| monitor.is_unregistered()));
}

#[test]
fn test_absent_handle_fails_without_retry() {
    struct ConnectOnce {
        store: MemoryStore,
        used: AtomicBool,
    }
    impl ConnectionFactory for ConnectOnce {
        fn connect(
            &self,
            config: &ClientConfig,
            events: EventSink,
        ) -> crate::Result<Arc<dyn Connection>> {
            if self.used.swap(true, Ordering::SeqCst) {
                return Err(Error::TransientConnectionLoss("store unreachable".to_string()));
            }
            Ok(Arc::new(self.store.open_session(config, events)))
        }
    }

    let store = MemoryStore::new();
    let client = CoordClient::builder(Arc::new(ConnectOnce {
        store: store.clone(),
        used: AtomicBool::new(false),
    }))
    .config(test_config(30_000))
    .build()
    .unwrap();

    store.expire_session(client.session_id().unwrap());
    assert!(eventually(|| client.session_id().is_none()));

    let started = Instant::now();
    assert!(matches!(client.exists("/"), Err(Error::InvalidSession(_))));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_monitor_registered_from_monitoring_config() {
    let store = MemoryStore::new();
    let registry = Registry::new();
    let config = MonitoringConfig {
        monitor_key: Some("controller".to_string()),
        ..Default::default()
    };

    let client = CoordClient::builder(Arc::new(store.clone()))
        .config(test_config(500))
        .monitor(registry.clone(), config.clone())
        .build()
        .unwrap();
    client.exists("/").unwrap();
    assert!(!registry.gather().is_empty());

    let duplicate = CoordClient::builder(Arc::new(store.clone()))
        .config(test_config(500))
        .monitor(registry.clone(), config)
        .build();
    assert!(matches!(duplicate, Err(Error::Metrics(_))));

    client.close();
    assert!(registry.gather().is_empty());
}

#[tokio::test]
async fn test_async_operations_complete() {
    let store = MemoryStore::new();
    let (client, monitor) = connect(&store);
    client.create_persistent("/c/IDEALSTATES", true).unwrap();
    let path = "/c/IDEALSTATES/db";

    let created = client.async_create(path, Some(&record("db")), CreateMode::Persistent).await.unwrap();
    assert_eq!(created, path);

    let stat = client.async_exists(path).await.unwrap().unwrap();
    let stat = client.async_set_data(path, &record("db2"), stat.version).await.unwrap();
    assert_eq!(stat.version, 1);

    let (bytes, _) = client.async_get_data(path).await.unwrap();
    assert_eq!(serde_json::from_slice::<Record>(&bytes).unwrap().id, "db2");

    assert!(matches!(
        client.async_set_data(path, &record("db3"), 0).await,
        Err(Error::VersionConflict { .. })
    ));
    assert!(client.async_delete(path).await.unwrap());
    assert!(!client.async_delete(path).await.unwrap());

    assert_eq!(monitor.write_count(Some(PathCategory::IdealStates)), 5);
    assert_eq!(monitor.write_failures(Some(PathCategory::IdealStates)), 2);
    assert_eq!(monitor.read_count(Some(PathCategory::IdealStates)), 2);
    assert_eq!(monitor.read_bytes(Some(PathCategory::IdealStates)), bytes.len() as u64);
}

#[test]
fn test_async_completes_off_caller_thread() {
    let mut conn = mock_connection();
    let caller = thread::current().id();
    conn.expect_exists().returning(move |_, _| {
        assert_ne!(thread::current().id(), caller);
        assert_eq!(thread::current().name(), Some(crate::COMPLETION_THREAD_NAME));
        Ok(None)
    });
    let client = CoordClient::builder(Arc::new(FixedFactory(Arc::new(conn))))
        .config(test_config(200))
        .build()
        .unwrap();

    assert_eq!(client.async_exists("/n").wait().unwrap(), None);
}

#[test]
fn test_async_after_close_reports_closed() {
    let store = MemoryStore::new();
    let (client, _) = connect(&store);
    client.close();

    assert!(matches!(client.async_exists("/").wait(), Err(Error::InvalidSession(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_operations_pipeline_in_order() {
    let store = MemoryStore::new();
    let (client, monitor) = connect(&store);
    client.create_persistent("/c/MESSAGES", true).unwrap();

    let ops: Vec<_> = (0..8)
        .map(|i| client.async_create(&format!("/c/MESSAGES/m{i}"), Some(&record("m")), CreateMode::Persistent))
        .collect();
    let created = futures::future::join_all(ops).await;

    for (i, result) in created.into_iter().enumerate() {
        assert_eq!(result.unwrap(), format!("/c/MESSAGES/m{i}"));
    }
    assert_eq!(client.get_children_names("/c/MESSAGES").unwrap().len(), 8);
    assert!(monitor.write_count(None) >= 8);
}
