mod common;

use std::sync::Arc;

use common::connect;
use common::eventually;
use common::record;
use common::test_config;
use common::CLUSTER;
use coordcache::CacheChangeListener;
use coordcache::ChangeCategory;
use coordcache::ClientMonitor;
use coordcache::ClusterStateCache;
use coordcache::CoordClient;
use coordcache::CreateMode;
use coordcache::Error;
use coordcache::MemoryStore;
use coordcache::Property;
use coordcache::Settings;
use coordcache::ANY_VERSION;
use coordcache::CUSTOMIZED_MONITOR_TYPE;
use prometheus::Registry;

fn seed_namespaces(
    client: &CoordClient,
    cache: &ClusterStateCache,
) {
    for category in ChangeCategory::ALL {
        client
            .create_persistent(&cache.paths().namespace(category), true)
            .unwrap();
    }
}

#[test]
fn refresh_against_empty_store_yields_empty_maps() {
    let store = MemoryStore::new();
    let monitor = Arc::new(
        ClientMonitor::register(&Registry::new(), CUSTOMIZED_MONITOR_TYPE, "empty-store").unwrap(),
    );
    let client = CoordClient::builder(Arc::new(store.clone()))
        .config(test_config())
        .metrics_sink(monitor.clone())
        .build()
        .unwrap();
    let cache = ClusterStateCache::new(CLUSTER);

    cache.refresh(&client).unwrap();

    assert_eq!(monitor.read_failures(None), 0);
    assert_eq!(monitor.read_count(None), 4);

    assert!(cache.external_views().is_empty());
    assert!(cache.live_instances().is_empty());
    assert!(cache.instance_configs().is_empty());
    assert!(cache.ideal_states().is_empty());
    for category in ChangeCategory::ALL {
        assert!(!cache.is_dirty(category));
    }
}

#[test]
fn refresh_loads_typed_models() {
    let store = MemoryStore::new();
    let client = connect(&store);
    let settings = Settings::default();
    let cache = ClusterStateCache::from_config(&settings.cache).unwrap();
    seed_namespaces(&client, &cache);
    let paths = cache.paths().clone();

    client
        .create(
            &paths.entry(ChangeCategory::InstanceConfig, "node_1"),
            Some(&record(
                "node_1",
                &[("HELIX_HOST", "10.0.0.1"), ("HELIX_PORT", "12918"), ("HELIX_ENABLED", "true")],
            )),
            CreateMode::Persistent,
        )
        .unwrap();
    client
        .create(
            &paths.entry(ChangeCategory::IdealState, "db"),
            Some(&record("db", &[("NUM_PARTITIONS", "8"), ("REPLICAS", "3")])),
            CreateMode::Persistent,
        )
        .unwrap();

    cache.refresh(&client).unwrap();

    let configs = cache.instance_configs();
    let node = &configs["node_1"];
    assert_eq!(node.host_name(), Some("10.0.0.1"));
    assert_eq!(node.port(), Some(12918));
    assert!(node.instance_enabled());
    let ideal_states = cache.ideal_states();
    assert_eq!(ideal_states["db"].num_partitions(), Some(8));
    assert_eq!(ideal_states["db"].id(), "db");
}

#[test]
fn listener_marks_only_changed_category_dirty() {
    let store = MemoryStore::new();
    let client = connect(&store);
    let participant = connect(&store);
    let cache = Arc::new(ClusterStateCache::new(CLUSTER));
    seed_namespaces(&client, &cache);
    let _listener = CacheChangeListener::attach(&client, cache.clone()).unwrap();
    cache.refresh(&client).unwrap();
    let ideal_states = cache.ideal_states();

    participant
        .create(
            &cache.paths().entry(ChangeCategory::LiveInstance, "node_1"),
            Some(&record("node_1", &[("SESSION_ID", "1")])),
            CreateMode::Ephemeral,
        )
        .unwrap();

    assert!(eventually(|| cache.is_dirty(ChangeCategory::LiveInstance)));
    assert!(!cache.is_dirty(ChangeCategory::IdealState));
    cache.refresh(&client).unwrap();
    assert_eq!(cache.live_instances()["node_1"].session_id(), Some("1"));
    assert!(Arc::ptr_eq(&ideal_states, &cache.ideal_states()));
}

#[test]
fn listener_tracks_entry_data_changes() {
    let store = MemoryStore::new();
    let client = connect(&store);
    let writer = connect(&store);
    let cache = Arc::new(ClusterStateCache::new(CLUSTER));
    seed_namespaces(&client, &cache);
    let path = cache.paths().entry(ChangeCategory::ExternalView, "db");
    writer
        .create(&path, Some(&record("db", &[])), CreateMode::Persistent)
        .unwrap();
    let _listener = CacheChangeListener::attach(&client, cache.clone()).unwrap();
    cache.refresh(&client).unwrap();

    writer
        .write_data(&path, &record("db", &[("STATE", "ONLINE")]), ANY_VERSION)
        .unwrap();

    assert!(eventually(|| cache.is_dirty(ChangeCategory::ExternalView)));
    cache.refresh(&client).unwrap();
    assert_eq!(
        cache.external_views()["db"].record().simple_field("STATE"),
        Some("ONLINE")
    );
}

#[test]
fn session_expiry_forces_full_refresh() {
    let store = MemoryStore::new();
    let client = connect(&store);
    let participant = connect(&store);
    let cache = Arc::new(ClusterStateCache::new(CLUSTER));
    seed_namespaces(&client, &cache);
    participant
        .create(
            &cache.paths().entry(ChangeCategory::LiveInstance, "node_1"),
            Some(&record("node_1", &[])),
            CreateMode::Ephemeral,
        )
        .unwrap();
    let listener = CacheChangeListener::attach(&client, cache.clone()).unwrap();
    cache.refresh(&client).unwrap();
    assert_eq!(cache.live_instances().len(), 1);
    let old_session = client.session_id().unwrap();

    store.expire_session(old_session);

    assert!(eventually(|| ChangeCategory::ALL
        .into_iter()
        .all(|category| cache.is_dirty(category))));
    assert!(eventually(|| client
        .session_id()
        .is_some_and(|session| session != old_session)));
    let before = store.request_count();
    cache.refresh(&client).unwrap();
    assert!(store.request_count() > before);
    assert_eq!(cache.live_instances().len(), 1);

    listener.detach(&client);
}

#[test]
fn closed_participant_drops_its_live_instance() {
    let store = MemoryStore::new();
    let client = connect(&store);
    let participant = connect(&store);
    let cache = Arc::new(ClusterStateCache::new(CLUSTER));
    seed_namespaces(&client, &cache);
    participant
        .create(
            &cache.paths().entry(ChangeCategory::LiveInstance, "node_1"),
            Some(&record("node_1", &[])),
            CreateMode::Ephemeral,
        )
        .unwrap();
    let _listener = CacheChangeListener::attach(&client, cache.clone()).unwrap();
    cache.refresh(&client).unwrap();

    participant.close();

    assert!(eventually(|| cache.is_dirty(ChangeCategory::LiveInstance)));
    cache.refresh(&client).unwrap();
    assert!(cache.live_instances().is_empty());
}

#[test]
fn conditional_write_with_stale_version_conflicts() {
    let store = MemoryStore::new();
    let client = connect(&store);
    let cache = ClusterStateCache::new(CLUSTER);
    seed_namespaces(&client, &cache);
    let path = cache.paths().entry(ChangeCategory::IdealState, "db");
    client
        .create(&path, Some(&record("db", &[("REPLICAS", "1")])), CreateMode::Persistent)
        .unwrap();
    for replicas in 2..=7 {
        client
            .write_data(&path, &record("db", &[("REPLICAS", &replicas.to_string())]), ANY_VERSION)
            .unwrap();
    }
    let (stored, stat) = client.read_data(&path).unwrap();
    assert_eq!(stat.version, 6);

    let result = client.write_data(&path, &record("db", &[("REPLICAS", "99")]), 5);

    assert!(matches!(
        result,
        Err(Error::VersionConflict {
            expected: 5,
            actual: 6,
            ..
        })
    ));
    assert_eq!(client.read_data(&path).unwrap(), (stored, stat));
}

#[test]
fn detached_listener_stops_marking() {
    let store = MemoryStore::new();
    let client = connect(&store);
    let cache = Arc::new(ClusterStateCache::new(CLUSTER));
    seed_namespaces(&client, &cache);
    let listener = CacheChangeListener::attach(&client, cache.clone()).unwrap();
    cache.refresh(&client).unwrap();

    listener.detach(&client);
    client
        .create(
            &cache.paths().entry(ChangeCategory::IdealState, "db"),
            Some(&record("db", &[])),
            CreateMode::Persistent,
        )
        .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(100));

    assert!(!cache.is_dirty(ChangeCategory::IdealState));
}
