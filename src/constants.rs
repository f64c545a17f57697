/// Largest payload a single node may carry (1 MiB)
pub const MAX_NODE_SIZE: usize = 1024 * 1024;

/// Version wildcard: skip the optimistic concurrency check
pub const ANY_VERSION: i32 = -1;

/// Prefix of an oversized payload echoed into the error log
pub(crate) const OVERSIZED_LOG_PREFIX: usize = 1024;

// -
// Cluster namespace segments

pub const IDEALSTATES: &str = "IDEALSTATES";
pub const INSTANCES: &str = "INSTANCES";
pub const CONFIGS: &str = "CONFIGS";
pub const PARTICIPANT: &str = "PARTICIPANT";
pub const CONTROLLER: &str = "CONTROLLER";
pub const EXTERNALVIEW: &str = "EXTERNALVIEW";
pub const LIVEINSTANCES: &str = "LIVEINSTANCES";
pub const PROPERTYSTORE: &str = "PROPERTYSTORE";
pub const CURRENTSTATES: &str = "CURRENTSTATES";
pub const MESSAGES: &str = "MESSAGES";

// -
// Worker threads

pub(crate) const EVENT_THREAD_NAME: &str = "coord-event";
pub(crate) const COMPLETION_THREAD_NAME: &str = "coord-completion";
