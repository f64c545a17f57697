use std::sync::Arc;

use super::JsonSerializer;
use super::NodeSerializer;
use crate::Record;
use crate::SerializationError;

/// Resolves the codec for each path.
pub trait PathBasedSerializer: Send + Sync {
    fn serialize(
        &self,
        record: &Record,
        path: &str,
    ) -> std::result::Result<Vec<u8>, SerializationError>;

    fn deserialize(
        &self,
        bytes: &[u8],
        path: &str,
    ) -> std::result::Result<Record, SerializationError>;
}

/// Applies one codec to every path.
#[derive(Clone)]
pub struct BasicSerializer {
    inner: Arc<dyn NodeSerializer>,
}

impl BasicSerializer {
    pub fn new(inner: Arc<dyn NodeSerializer>) -> Self {
        Self { inner }
    }
}

impl Default for BasicSerializer {
    fn default() -> Self {
        Self::new(Arc::new(JsonSerializer))
    }
}

impl PathBasedSerializer for BasicSerializer {
    fn serialize(
        &self,
        record: &Record,
        _path: &str,
    ) -> std::result::Result<Vec<u8>, SerializationError> {
        self.inner.serialize(record)
    }

    fn deserialize(
        &self,
        bytes: &[u8],
        path: &str,
    ) -> std::result::Result<Record, SerializationError> {
        if bytes.is_empty() {
            return Err(SerializationError::EmptyPayload(path.to_string()));
        }
        self.inner.deserialize(bytes)
    }
}

/// Picks the codec registered for the longest matching path prefix.
///
/// Prefixes match on whole segments: `/a/b` covers `/a/b` and `/a/b/c`
/// but not `/a/bc`.
///
/// ```rust,ignore
/// let serializer = ChainedPathSerializer::builder(Arc::new(JsonSerializer))
///     .serialize_with("/cluster/PROPERTYSTORE", Arc::new(BincodeSerializer))
///     .build();
/// ```
#[derive(Clone)]
pub struct ChainedPathSerializer {
    default: Arc<dyn NodeSerializer>,
    // sorted by descending prefix length
    chain: Vec<(String, Arc<dyn NodeSerializer>)>,
}

pub struct ChainedPathSerializerBuilder {
    default: Arc<dyn NodeSerializer>,
    chain: Vec<(String, Arc<dyn NodeSerializer>)>,
}

impl ChainedPathSerializer {
    pub fn builder(default: Arc<dyn NodeSerializer>) -> ChainedPathSerializerBuilder {
        ChainedPathSerializerBuilder {
            default,
            chain: Vec::new(),
        }
    }

    fn resolve(
        &self,
        path: &str,
    ) -> &dyn NodeSerializer {
        self.chain
            .iter()
            .find(|(prefix, _)| covers(prefix, path))
            .map(|(_, s)| s.as_ref())
            .unwrap_or(self.default.as_ref())
    }
}

fn covers(
    prefix: &str,
    path: &str,
) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

impl ChainedPathSerializerBuilder {
    /// Registers `serializer` for `prefix` and everything below it.
    pub fn serialize_with(
        mut self,
        prefix: impl Into<String>,
        serializer: Arc<dyn NodeSerializer>,
    ) -> Self {
        let prefix = prefix.into();
        self.chain.retain(|(p, _)| *p != prefix);
        self.chain.push((prefix, serializer));
        self
    }

    pub fn build(mut self) -> ChainedPathSerializer {
        self.chain.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        ChainedPathSerializer {
            default: self.default,
            chain: self.chain,
        }
    }
}

impl PathBasedSerializer for ChainedPathSerializer {
    fn serialize(
        &self,
        record: &Record,
        path: &str,
    ) -> std::result::Result<Vec<u8>, SerializationError> {
        self.resolve(path).serialize(record)
    }

    fn deserialize(
        &self,
        bytes: &[u8],
        path: &str,
    ) -> std::result::Result<Record, SerializationError> {
        if bytes.is_empty() {
            return Err(SerializationError::EmptyPayload(path.to_string()));
        }
        self.resolve(path).deserialize(bytes)
    }
}
