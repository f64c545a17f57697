use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use coordcache::BackoffPolicy;
use coordcache::ClientConfig;
use coordcache::CoordClient;
use coordcache::MemoryStore;
use coordcache::Record;

pub const CLUSTER: &str = "TEST_CLUSTER";

pub fn test_config() -> ClientConfig {
    ClientConfig {
        connection_timeout_ms: 2000,
        retry: BackoffPolicy {
            max_retries: 0,
            timeout_ms: 2000,
            base_delay_ms: 5,
            max_delay_ms: 50,
        },
        ..Default::default()
    }
}

pub fn connect(store: &MemoryStore) -> CoordClient {
    CoordClient::builder(Arc::new(store.clone()))
        .config(test_config())
        .build()
        .expect("client should connect to the in-memory store")
}

pub fn record(
    id: &str,
    fields: &[(&str, &str)],
) -> Record {
    let mut record = Record::new(id);
    for (key, value) in fields {
        record.set_simple_field(*key, *value);
    }
    record
}

/// Polls `condition` for up to five seconds.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
