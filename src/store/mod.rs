//! Session-scoped transport to the hierarchical coordination store.
//!
//! [`Connection`] is the raw, unretried operation set of one session.
//! [`crate::CoordClient`] wraps it with retries, size limits, serialization
//! and metrics, and replaces it through a [`ConnectionFactory`] whenever the
//! session expires.

mod mem_store;


pub use mem_store::*;

use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

use crate::ClientConfig;
use crate::EventSink;
use crate::Result;
use crate::SessionState;

/// Node metadata as maintained by the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    /// Data version, bumped by every write
    pub version: i32,
    /// Child list version, bumped by every child create/delete
    pub cversion: i32,
    /// Creation time (ms since epoch)
    pub ctime: u64,
    /// Last modification time (ms since epoch)
    pub mtime: u64,
    /// Owning session of an ephemeral node, 0 otherwise
    pub ephemeral_owner: u64,
    pub data_length: usize,
    pub num_children: usize,
}

impl Stat {
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral_owner != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateMode {
    Persistent,
    PersistentSequential,
    Ephemeral,
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(&self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// One session against the store.
///
/// Every call is a single attempt. Watch flags install one-shot watches
/// owned by this session; they fire through the [`EventSink`] the session
/// was created with and vanish with the session.
#[cfg_attr(test, automock)]
pub trait Connection: Send + Sync {
    fn session_id(&self) -> u64;

    fn state(&self) -> SessionState;

    /// Address of the store this session talks to
    fn servers(&self) -> String;

    /// Returns the actual path, which differs from `path` for sequential modes.
    fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> Result<String>;

    fn delete(
        &self,
        path: &str,
        version: i32,
    ) -> Result<()>;

    /// A watch is installed even if the node is absent, firing on creation.
    fn exists(
        &self,
        path: &str,
        watch: bool,
    ) -> Result<Option<Stat>>;

    fn get_data(
        &self,
        path: &str,
        watch: bool,
    ) -> Result<(Vec<u8>, Stat)>;

    fn set_data(
        &self,
        path: &str,
        data: &[u8],
        version: i32,
    ) -> Result<Stat>;

    fn get_children(
        &self,
        path: &str,
        watch: bool,
    ) -> Result<Vec<String>>;

    /// Ends the session; ephemeral nodes owned by it are removed.
    fn close(&self);
}

/// Establishes sessions for a client, initially and after expiry.
///
/// `config` carries the server list and the requested session timeout.
pub trait ConnectionFactory: Send + Sync {
    fn connect(
        &self,
        config: &ClientConfig,
        events: EventSink,
    ) -> Result<Arc<dyn Connection>>;
}
