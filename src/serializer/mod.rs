//! Record codecs, resolved per node path.
//!
//! [`NodeSerializer`] turns a [`Record`] into bytes and back.
//! [`PathBasedSerializer`] decides which codec applies to a given path, so
//! different subtrees of the store may use different encodings.

mod path_based;


pub use path_based::*;

use crate::Record;
use crate::SerializationError;

pub trait NodeSerializer: Send + Sync {
    fn serialize(
        &self,
        record: &Record,
    ) -> std::result::Result<Vec<u8>, SerializationError>;

    fn deserialize(
        &self,
        bytes: &[u8],
    ) -> std::result::Result<Record, SerializationError>;
}

/// Pretty-printed JSON, the default encoding for cluster metadata
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl NodeSerializer for JsonSerializer {
    fn serialize(
        &self,
        record: &Record,
    ) -> std::result::Result<Vec<u8>, SerializationError> {
        Ok(serde_json::to_vec_pretty(record)?)
    }

    fn deserialize(
        &self,
        bytes: &[u8],
    ) -> std::result::Result<Record, SerializationError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compact binary encoding for bulky subtrees
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerializer;

impl NodeSerializer for BincodeSerializer {
    fn serialize(
        &self,
        record: &Record,
    ) -> std::result::Result<Vec<u8>, SerializationError> {
        Ok(bincode::serialize(record)?)
    }

    fn deserialize(
        &self,
        bytes: &[u8],
    ) -> std::result::Result<Record, SerializationError> {
        Ok(bincode::deserialize(bytes)?)
    }
}
