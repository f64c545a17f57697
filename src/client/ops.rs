use std::collections::HashMap;
use std::time::Instant;

use tracing::debug;
use tracing::error;

use super::ClientInner;
use super::CoordClient;
use crate::path::join;
use crate::path::parent;
use crate::path::validate_path;
use crate::utils::scoped_timer::ScopedTimer;
use crate::CreateMode;
use crate::Error;
use crate::Record;
use crate::Result;
use crate::Stat;
use crate::ANY_VERSION;
use crate::MAX_NODE_SIZE;
use crate::OVERSIZED_LOG_PREFIX;

impl ClientInner {
    pub(crate) fn observe_read<T>(
        &self,
        path: &str,
        started: Instant,
        result: Result<T>,
        size: impl FnOnce(&T) -> usize,
    ) -> Result<T> {
        match &result {
            Ok(value) => self.monitor.record_read(path, size(value), started),
            Err(_) => self.monitor.record_read_failure(path),
        }
        result
    }

    pub(crate) fn observe_write<T>(
        &self,
        path: &str,
        started: Instant,
        bytes: usize,
        result: Result<T>,
    ) -> Result<T> {
        match &result {
            Ok(_) => self.monitor.record_write(path, bytes, started),
            Err(_) => self.monitor.record_write_failure(path),
        }
        result
    }

    /// Rejects oversized payloads without touching the store.
    pub(crate) fn check_data_size(
        &self,
        path: &str,
        data: &[u8],
    ) -> Result<()> {
        if data.len() <= MAX_NODE_SIZE {
            return Ok(());
        }
        let head = String::from_utf8_lossy(&data[..OVERSIZED_LOG_PREFIX]);
        error!(
            "Data size {} larger than {} bytes, will not write {}. Data (first 1k): {}",
            data.len(),
            MAX_NODE_SIZE,
            path,
            head
        );
        self.monitor.record_write_failure(path);
        Err(Error::PayloadTooLarge {
            path: path.to_string(),
            size: data.len(),
            limit: MAX_NODE_SIZE,
        })
    }

    pub(crate) fn create_at(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        started: Instant,
    ) -> Result<String> {
        validate_path(path)?;
        self.check_data_size(path, data)?;
        let result = self.retry_until_connected(|conn| conn.create(path, data, mode));
        self.observe_write(path, started, data.len(), result)
    }

    pub(crate) fn delete_at(
        &self,
        path: &str,
        started: Instant,
    ) -> Result<bool> {
        validate_path(path)?;
        let result = match self.retry_until_connected(|conn| conn.delete(path, ANY_VERSION)) {
            Ok(()) => Ok(true),
            Err(Error::NoSuchNode(_)) => {
                debug!("delete of {} skipped, node does not exist", path);
                Ok(false)
            }
            Err(e) => Err(e),
        };
        self.observe_write(path, started, 0, result)
    }

    pub(crate) fn exists_at(
        &self,
        path: &str,
        started: Instant,
    ) -> Result<Option<Stat>> {
        validate_path(path)?;
        let watch = self.listeners.has_data_listeners(path);
        let result = self.retry_until_connected(|conn| conn.exists(path, watch));
        self.observe_read(path, started, result, |_| 0)
    }

    /// `Ok(None)` for an absent node when `missing_ok`, counted as a read.
    pub(crate) fn get_data_at(
        &self,
        path: &str,
        missing_ok: bool,
        started: Instant,
    ) -> Result<Option<(Vec<u8>, Stat)>> {
        validate_path(path)?;
        let watch = self.listeners.has_data_listeners(path);
        let result = match self.retry_until_connected(|conn| conn.get_data(path, watch)) {
            Ok(found) => Ok(Some(found)),
            Err(Error::NoSuchNode(_)) if missing_ok => Ok(None),
            Err(e) => Err(e),
        };
        self.observe_read(path, started, result, |found| {
            found.as_ref().map(|(data, _)| data.len()).unwrap_or(0)
        })
    }

    /// `Ok(None)` for an absent parent when `missing_ok`, counted as a read.
    pub(crate) fn get_children_at(
        &self,
        path: &str,
        missing_ok: bool,
        started: Instant,
    ) -> Result<Option<Vec<String>>> {
        validate_path(path)?;
        let watch = self.listeners.has_child_listeners(path);
        let result = match self.retry_until_connected(|conn| conn.get_children(path, watch)) {
            Ok(children) => Ok(Some(children)),
            Err(Error::NoSuchNode(_)) if missing_ok => Ok(None),
            Err(e) => Err(e),
        };
        self.observe_read(path, started, result, |_| 0)
    }

    pub(crate) fn set_data_at(
        &self,
        path: &str,
        data: &[u8],
        expected_version: i32,
        started: Instant,
    ) -> Result<Stat> {
        validate_path(path)?;
        self.check_data_size(path, data)?;
        let result = self.retry_until_connected(|conn| conn.set_data(path, data, expected_version));
        self.observe_write(path, started, data.len(), result)
    }

    pub(crate) fn serialize(
        &self,
        record: Option<&Record>,
        path: &str,
    ) -> Result<Vec<u8>> {
        match record {
            Some(record) => Ok(self.serializer.serialize(record, path)?),
            None => Ok(Vec::new()),
        }
    }
}

impl CoordClient {
    /// Creates a node holding `record` (empty payload for `None`) and returns
    /// the actual path, which carries a suffix for sequential modes.
    pub fn create(
        &self,
        path: &str,
        record: Option<&Record>,
        mode: CreateMode,
    ) -> Result<String> {
        let data = self.inner.serialize(record, path)?;
        self.create_bytes(path, &data, mode)
    }

    pub fn create_bytes(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> Result<String> {
        let timer = ScopedTimer::new("create", path);
        self.inner.create_at(path, data, mode, timer.start())
    }

    /// Creates an empty persistent node. An existing node is accepted when
    /// `create_parents` is set, and missing ancestors are created first.
    pub fn create_persistent(
        &self,
        path: &str,
        create_parents: bool,
    ) -> Result<()> {
        match self.create_bytes(path, &[], CreateMode::Persistent) {
            Ok(_) => Ok(()),
            Err(Error::NodeExists(_)) if create_parents => Ok(()),
            Err(Error::NoSuchNode(_)) if create_parents => {
                let Some(parent_path) = parent(path) else {
                    return Err(Error::InvalidArgument(format!("cannot create parents of {path}")));
                };
                self.create_persistent(parent_path, true)?;
                self.create_persistent(path, true)
            }
            Err(e) => Err(e),
        }
    }

    /// Returns `false` if the node did not exist.
    pub fn delete(
        &self,
        path: &str,
    ) -> Result<bool> {
        let timer = ScopedTimer::new("delete", path);
        self.inner.delete_at(path, timer.start())
    }

    pub fn exists(
        &self,
        path: &str,
    ) -> Result<bool> {
        Ok(self.get_stat(path)?.is_some())
    }

    pub fn get_stat(
        &self,
        path: &str,
    ) -> Result<Option<Stat>> {
        let timer = ScopedTimer::new("exists", path);
        self.inner.exists_at(path, timer.start())
    }

    /// # Errors
    /// `NoSuchNode` if the node is absent.
    pub fn read_bytes(
        &self,
        path: &str,
    ) -> Result<(Vec<u8>, Stat)> {
        let timer = ScopedTimer::new("read", path);
        self.inner
            .get_data_at(path, false, timer.start())?
            .ok_or_else(|| Error::NoSuchNode(path.to_string()))
    }

    pub fn read_data(
        &self,
        path: &str,
    ) -> Result<(Record, Stat)> {
        let (data, stat) = self.read_bytes(path)?;
        Ok((self.inner.serializer.deserialize(&data, path)?, stat))
    }

    pub fn read_data_if_exists(
        &self,
        path: &str,
    ) -> Result<Option<(Record, Stat)>> {
        let timer = ScopedTimer::new("read", path);
        match self.inner.get_data_at(path, true, timer.start())? {
            Some((data, stat)) => Ok(Some((self.inner.serializer.deserialize(&data, path)?, stat))),
            None => Ok(None),
        }
    }

    /// Conditional write; pass [`crate::ANY_VERSION`] to skip the check.
    ///
    /// # Errors
    /// `VersionConflict` if the stored version differs from
    /// `expected_version`; the stored data is left untouched.
    pub fn write_bytes(
        &self,
        path: &str,
        data: &[u8],
        expected_version: i32,
    ) -> Result<Stat> {
        let timer = ScopedTimer::new("write", path);
        self.inner.set_data_at(path, data, expected_version, timer.start())
    }

    pub fn write_data(
        &self,
        path: &str,
        record: &Record,
        expected_version: i32,
    ) -> Result<Stat> {
        let data = self.inner.serialize(Some(record), path)?;
        self.write_bytes(path, &data, expected_version)
    }

    pub fn get_children_names(
        &self,
        path: &str,
    ) -> Result<Vec<String>> {
        let timer = ScopedTimer::new("get_children", path);
        self.inner
            .get_children_at(path, false, timer.start())?
            .ok_or_else(|| Error::NoSuchNode(path.to_string()))
    }

    /// Reads and decodes every child of `path`, keyed by child name.
    ///
    /// An absent `path` yields an empty map. Children deleted between the
    /// listing and their read are skipped.
    pub fn get_children_records(
        &self,
        path: &str,
    ) -> Result<HashMap<String, Record>> {
        let timer = ScopedTimer::new("get_children", path);
        let Some(names) = self.inner.get_children_at(path, true, timer.start())? else {
            return Ok(HashMap::new());
        };

        let mut records = HashMap::with_capacity(names.len());
        for name in names {
            let child = join(path, &name);
            match self.read_data_if_exists(&child)? {
                Some((record, _)) => {
                    records.insert(name, record);
                }
                None => debug!("{} vanished while reading children of {}", child, path),
            }
        }
        Ok(records)
    }
}
