//! Typed views over the records cached per namespace.

use std::collections::BTreeMap;

use super::Record;

/// A typed wrapper around a [`Record`].
pub trait Property: From<Record> + Clone + Send + Sync + 'static {
    fn record(&self) -> &Record;

    fn id(&self) -> &str {
        &self.record().id
    }
}

macro_rules! property {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            record: Record,
        }

        impl From<Record> for $name {
            fn from(record: Record) -> Self {
                Self { record }
            }
        }

        impl Property for $name {
            fn record(&self) -> &Record {
                &self.record
            }
        }
    };
}

property!(
    /// A participant currently holding a session; the node is ephemeral.
    LiveInstance
);
property!(
    /// Static configuration of a participant.
    InstanceConfig
);
property!(
    /// Observed partition placement of one resource.
    ExternalView
);
property!(
    /// Desired partition placement of one resource.
    IdealState
);

impl LiveInstance {
    pub fn instance_name(&self) -> &str {
        self.id()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.record.simple_field("SESSION_ID")
    }

    pub fn version(&self) -> Option<&str> {
        self.record.simple_field("HELIX_VERSION")
    }
}

impl InstanceConfig {
    pub fn host_name(&self) -> Option<&str> {
        self.record.simple_field("HELIX_HOST")
    }

    pub fn port(&self) -> Option<u16> {
        self.record.simple_field("HELIX_PORT")?.parse().ok()
    }

    /// Instances are enabled unless explicitly disabled
    pub fn instance_enabled(&self) -> bool {
        self.record
            .simple_field("HELIX_ENABLED")
            .map(|v| !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true)
    }

    pub fn tags(&self) -> &[String] {
        self.record.list_field("TAG_LIST").unwrap_or_default()
    }
}

impl ExternalView {
    pub fn resource_name(&self) -> &str {
        self.id()
    }

    pub fn partition_names(&self) -> impl Iterator<Item = &str> {
        self.record.map_fields.keys().map(String::as_str)
    }

    /// instance -> state for one partition
    pub fn state_map(
        &self,
        partition: &str,
    ) -> Option<&BTreeMap<String, String>> {
        self.record.map_field(partition)
    }
}

impl IdealState {
    pub fn resource_name(&self) -> &str {
        self.id()
    }

    pub fn num_partitions(&self) -> Option<u32> {
        self.record.simple_field("NUM_PARTITIONS")?.parse().ok()
    }

    pub fn replicas(&self) -> Option<&str> {
        self.record.simple_field("REPLICAS")
    }

    pub fn state_model_def_ref(&self) -> Option<&str> {
        self.record.simple_field("STATE_MODEL_DEF_REF")
    }
}
