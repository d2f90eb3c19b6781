//! Multi-version key-value store
//!
//! Every SQL statement runs in its own MVCC transaction: writes are stored as
//! new versions tagged with the transaction version and recorded in a write
//! set, so a failed statement is undone by deleting exactly those versions.
//! Committing a transaction while no older transaction is active prunes the
//! versions it superseded, which keeps repeated scans of long-lived tables
//! from walking an ever-growing history.

use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    error::{Error, Result},
    storage::{
        engine::Engine,
        keycode::{deserialize_key, serialize_key},
    },
};

/// Transaction version number type
pub type Version = u64;

/// MVCC storage engine wrapper
///
/// Uses the underlying storage engine (Engine trait) for CRUD operations.
pub struct Mvcc<E: Engine> {
    engine: Arc<Mutex<E>>,
}

impl<E: Engine> Clone for Mvcc<E> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<E: Engine> Mvcc<E> {
    pub fn new(eng: E) -> Self {
        Self {
            engine: Arc::new(Mutex::new(eng)),
        }
    }

    pub fn begin(&self) -> Result<MvccTransaction<E>> {
        MvccTransaction::begin(self.engine.clone())
    }
}

/// MVCC transaction
pub struct MvccTransaction<E: Engine> {
    engine: Arc<Mutex<E>>,
    state: TransactionState,
}

/// Transaction state for MVCC visibility checks
pub struct TransactionState {
    pub version: Version,
    /// Versions of transactions that were active when this one began
    pub active_versions: HashSet<Version>,
}

impl TransactionState {
    fn is_visible(&self, version: Version) -> bool {
        if self.active_versions.contains(&version) {
            return false;
        }
        version <= self.version
    }
}

/// MVCC key types for storage operations
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub enum MvccKey {
    /// Next version counter
    NextVersion,
    /// Active transaction marker
    TxnActive(Version),
    /// Write set entry, used for rollback and pruning
    TxnWrite(Version, #[serde(with = "serde_bytes")] Vec<u8>),
    /// Versioned data key
    Version(#[serde(with = "serde_bytes")] Vec<u8>, Version),
}

impl MvccKey {
    pub fn encode(&self) -> Result<Vec<u8>> {
        serialize_key(&self)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        deserialize_key(data)
    }
}

/// MVCC key prefix types for prefix scanning
///
/// Variant indices line up with `MvccKey`, so an encoded prefix is a byte
/// prefix of every encoded key it covers.
#[derive(Debug, Serialize, Deserialize)]
pub enum MvccKeyPrefix {
    NextVersion,
    TxnActive,
    TxnWrite(Version),
    Version(#[serde(with = "serde_bytes")] Vec<u8>),
}

impl MvccKeyPrefix {
    pub fn encode(&self) -> Result<Vec<u8>> {
        serialize_key(&self)
    }
}

fn unexpected_key(key: &[u8]) -> Error {
    Error::Internal(format!("unexpected mvcc key {:x?}", key))
}

impl<E: Engine> MvccTransaction<E> {
    /// Begins a new transaction
    pub fn begin(eng: Arc<Mutex<E>>) -> Result<Self> {
        let mut engine = eng.lock()?;

        let version = match engine.get(MvccKey::NextVersion.encode()?)? {
            Some(value) => bincode::deserialize(&value)?,
            None => 1,
        };
        engine.set(
            MvccKey::NextVersion.encode()?,
            bincode::serialize(&(version + 1))?,
        )?;

        let active_versions = Self::scan_active(&mut engine)?;
        engine.set(MvccKey::TxnActive(version).encode()?, vec![])?;
        drop(engine);

        trace!(version, active = active_versions.len(), "begin transaction");
        Ok(Self {
            engine: eng,
            state: TransactionState {
                version,
                active_versions,
            },
        })
    }

    pub fn version(&self) -> Version {
        self.state.version
    }

    /// Commits the transaction
    ///
    /// Versions are already in place; committing drops the write set and the
    /// active marker. When no older transaction can still read them, versions
    /// superseded by this transaction (and its own tombstones) are removed.
    pub fn commit(&self) -> Result<()> {
        let mut engine = self.engine.lock()?;
        let written = Self::take_write_set(&mut engine, self.state.version)?;
        let others_active = !Self::scan_active(&mut engine)?
            .iter()
            .all(|v| *v == self.state.version);

        if !others_active {
            for raw_key in &written {
                Self::prune(&mut engine, raw_key, self.state.version)?;
            }
        }

        trace!(version = self.state.version, writes = written.len(), "commit transaction");
        engine.delete(MvccKey::TxnActive(self.state.version).encode()?)
    }

    /// Rolls back the transaction, deleting every version it wrote
    pub fn rollback(&self) -> Result<()> {
        let mut engine = self.engine.lock()?;
        let written = Self::take_write_set(&mut engine, self.state.version)?;
        for raw_key in &written {
            engine.delete(MvccKey::Version(raw_key.clone(), self.state.version).encode()?)?;
        }

        trace!(version = self.state.version, writes = written.len(), "rollback transaction");
        engine.delete(MvccKey::TxnActive(self.state.version).encode()?)
    }

    pub fn set(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.write_inner(key, Some(value))
    }

    pub fn delete(&self, key: Vec<u8>) -> Result<()> {
        self.write_inner(key, None)
    }

    /// Gets the value for a key respecting MVCC visibility
    pub fn get(&self, key: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let mut engine = self.engine.lock()?;

        let from = MvccKey::Version(key.clone(), 0).encode()?;
        let to = MvccKey::Version(key, self.state.version).encode()?;
        let mut iter = engine.scan(from..=to).rev();

        while let Some((key, value)) = iter.next().transpose()? {
            match MvccKey::decode(&key)? {
                MvccKey::Version(_, version) => {
                    if self.state.is_visible(version) {
                        return Ok(bincode::deserialize(&value)?);
                    }
                }
                _ => return Err(unexpected_key(&key)),
            }
        }
        Ok(None)
    }

    /// Scans keys with prefix, returning the latest visible version per key in
    /// key order
    pub fn scan_prefix(&self, prefix: Vec<u8>) -> Result<Vec<ScanResult>> {
        let mut eng = self.engine.lock()?;
        let mut enc_prefix = MvccKeyPrefix::Version(prefix).encode()?;
        // Drop the byte string terminator so the prefix matches longer raw keys
        enc_prefix.truncate(enc_prefix.len() - 2);

        let mut iter = eng.scan_prefix(enc_prefix);
        let mut results = BTreeMap::new();
        while let Some((key, value)) = iter.next().transpose()? {
            match MvccKey::decode(&key)? {
                MvccKey::Version(raw_key, version) => {
                    if self.state.is_visible(version) {
                        match bincode::deserialize(&value)? {
                            Some(raw_value) => results.insert(raw_key, raw_value),
                            None => results.remove(&raw_key),
                        };
                    }
                }
                _ => return Err(unexpected_key(&key)),
            }
        }

        Ok(results
            .into_iter()
            .map(|(key, value)| ScanResult { key, value })
            .collect())
    }

    fn write_inner(&self, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<()> {
        let mut engine = self.engine.lock()?;

        // Conflict detection: any version newer than our oldest concurrent
        // transaction that we cannot see means someone else wrote the key.
        let oldest = self
            .state
            .active_versions
            .iter()
            .min()
            .copied()
            .unwrap_or(self.state.version + 1);
        let from = MvccKey::Version(key.clone(), oldest).encode()?;
        let to = MvccKey::Version(key.clone(), u64::MAX).encode()?;

        if let Some((k, _)) = engine.scan(from..=to).last().transpose()? {
            match MvccKey::decode(&k)? {
                MvccKey::Version(_, version) => {
                    if !self.state.is_visible(version) {
                        return Err(Error::WriteConflict);
                    }
                }
                _ => return Err(unexpected_key(&k)),
            }
        }

        engine.set(
            MvccKey::TxnWrite(self.state.version, key.clone()).encode()?,
            vec![],
        )?;
        engine.set(
            MvccKey::Version(key, self.state.version).encode()?,
            bincode::serialize(&value)?,
        )?;
        Ok(())
    }

    /// Removes and returns the raw keys in a transaction's write set
    fn take_write_set(engine: &mut MutexGuard<E>, version: Version) -> Result<Vec<Vec<u8>>> {
        let mut entries = Vec::new();
        let mut iter = engine.scan_prefix(MvccKeyPrefix::TxnWrite(version).encode()?);
        while let Some((key, _)) = iter.next().transpose()? {
            match MvccKey::decode(&key)? {
                MvccKey::TxnWrite(_, raw_key) => entries.push((key, raw_key)),
                _ => return Err(unexpected_key(&key)),
            }
        }
        drop(iter);

        let mut raw_keys = Vec::with_capacity(entries.len());
        for (key, raw_key) in entries {
            engine.delete(key)?;
            raw_keys.push(raw_key);
        }
        Ok(raw_keys)
    }

    /// Deletes versions of `raw_key` older than `version`, and the key's
    /// newest version too when it is a tombstone
    fn prune(engine: &mut MutexGuard<E>, raw_key: &[u8], version: Version) -> Result<()> {
        let from = MvccKey::Version(raw_key.to_vec(), 0).encode()?;
        let to = MvccKey::Version(raw_key.to_vec(), version).encode()?;

        let mut stale = Vec::new();
        let mut iter = engine.scan(from..=to);
        while let Some((key, value)) = iter.next().transpose()? {
            match MvccKey::decode(&key)? {
                MvccKey::Version(_, v) if v < version => stale.push(key),
                MvccKey::Version(_, _) => {
                    let value: Option<Vec<u8>> = bincode::deserialize(&value)?;
                    if value.is_none() {
                        stale.push(key);
                    }
                }
                _ => return Err(unexpected_key(&key)),
            }
        }
        drop(iter);

        for key in stale {
            engine.delete(key)?;
        }
        Ok(())
    }

    fn scan_active(engine: &mut MutexGuard<E>) -> Result<HashSet<Version>> {
        let mut active_versions = HashSet::new();
        let mut iter = engine.scan_prefix(MvccKeyPrefix::TxnActive.encode()?);

        while let Some((key, _)) = iter.next().transpose()? {
            match MvccKey::decode(&key)? {
                MvccKey::TxnActive(version) => {
                    active_versions.insert(version);
                }
                _ => return Err(unexpected_key(&key)),
            }
        }
        Ok(active_versions)
    }
}

/// Scan result containing key-value pair
#[derive(Debug, PartialEq)]
pub struct ScanResult {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::{Mvcc, MvccKey, ScanResult};
    use crate::{
        error::{Error, Result},
        storage::{engine::Engine, memory::MemoryEngine},
    };

    fn keys(results: Vec<ScanResult>) -> Vec<Vec<u8>> {
        results.into_iter().map(|r| r.key).collect()
    }

    #[test]
    fn test_get_after_commit() -> Result<()> {
        let mvcc = Mvcc::new(MemoryEngine::new());
        let tx = mvcc.begin()?;
        tx.set(b"row1".to_vec(), b"a".to_vec())?;
        tx.set(b"row2".to_vec(), b"b".to_vec())?;
        tx.set(b"row2".to_vec(), b"c".to_vec())?;
        tx.set(b"row3".to_vec(), b"d".to_vec())?;
        tx.delete(b"row3".to_vec())?;
        tx.commit()?;

        let tx1 = mvcc.begin()?;
        assert_eq!(tx1.get(b"row1".to_vec())?, Some(b"a".to_vec()));
        assert_eq!(tx1.get(b"row2".to_vec())?, Some(b"c".to_vec()));
        assert_eq!(tx1.get(b"row3".to_vec())?, None);
        Ok(())
    }

    #[test]
    fn test_rollback_restores_previous_versions() -> Result<()> {
        let mvcc = Mvcc::new(MemoryEngine::new());
        let tx = mvcc.begin()?;
        tx.set(b"row1".to_vec(), b"a".to_vec())?;
        tx.set(b"row2".to_vec(), b"b".to_vec())?;
        tx.commit()?;

        let tx1 = mvcc.begin()?;
        tx1.set(b"row1".to_vec(), b"a-1".to_vec())?;
        tx1.delete(b"row2".to_vec())?;
        tx1.set(b"row3".to_vec(), b"c".to_vec())?;
        tx1.rollback()?;

        let tx2 = mvcc.begin()?;
        assert_eq!(tx2.get(b"row1".to_vec())?, Some(b"a".to_vec()));
        assert_eq!(tx2.get(b"row2".to_vec())?, Some(b"b".to_vec()));
        assert_eq!(tx2.get(b"row3".to_vec())?, None);
        Ok(())
    }

    #[test]
    fn test_scan_prefix_orders_and_hides_deleted() -> Result<()> {
        let mvcc = Mvcc::new(MemoryEngine::new());
        let tx = mvcc.begin()?;
        tx.set(b"t\x00\x02".to_vec(), b"2".to_vec())?;
        tx.set(b"t\x00\x01".to_vec(), b"1".to_vec())?;
        tx.set(b"t\x00\x03".to_vec(), b"3".to_vec())?;
        tx.set(b"u\x00\x01".to_vec(), b"x".to_vec())?;
        tx.delete(b"t\x00\x03".to_vec())?;
        tx.commit()?;

        let tx1 = mvcc.begin()?;
        assert_eq!(
            keys(tx1.scan_prefix(b"t\x00".to_vec())?),
            vec![b"t\x00\x01".to_vec(), b"t\x00\x02".to_vec()]
        );
        Ok(())
    }

    #[test]
    fn test_isolation_between_open_transactions() -> Result<()> {
        let mvcc = Mvcc::new(MemoryEngine::new());
        let tx = mvcc.begin()?;
        tx.set(b"key1".to_vec(), b"val1".to_vec())?;
        tx.commit()?;

        let tx1 = mvcc.begin()?;
        let tx2 = mvcc.begin()?;
        tx2.set(b"key1".to_vec(), b"val1-1".to_vec())?;
        tx2.set(b"key2".to_vec(), b"val2".to_vec())?;
        assert_eq!(tx1.get(b"key1".to_vec())?, Some(b"val1".to_vec()));
        tx2.commit()?;

        assert_eq!(tx1.get(b"key1".to_vec())?, Some(b"val1".to_vec()));
        assert_eq!(keys(tx1.scan_prefix(b"key".to_vec())?), vec![b"key1".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_write_conflict() -> Result<()> {
        let mvcc = Mvcc::new(MemoryEngine::new());
        let tx1 = mvcc.begin()?;
        let tx2 = mvcc.begin()?;
        tx1.set(b"key1".to_vec(), b"val1".to_vec())?;
        assert_eq!(
            tx2.set(b"key1".to_vec(), b"val2".to_vec()),
            Err(Error::WriteConflict)
        );
        tx1.commit()?;
        tx2.rollback()?;
        Ok(())
    }

    #[test]
    fn test_commit_prunes_superseded_versions() -> Result<()> {
        let mvcc = Mvcc::new(MemoryEngine::new());
        for value in [b"v1", b"v2", b"v3"] {
            let tx = mvcc.begin()?;
            tx.set(b"key".to_vec(), value.to_vec())?;
            tx.commit()?;
        }
        let tx = mvcc.begin()?;
        tx.set(b"gone".to_vec(), b"x".to_vec())?;
        tx.commit()?;
        let tx = mvcc.begin()?;
        tx.delete(b"gone".to_vec())?;
        tx.commit()?;

        let mut engine = mvcc.engine.lock()?;
        let mut versions = Vec::new();
        let mut iter = engine.scan(..);
        while let Some((key, _)) = iter.next().transpose()? {
            if let MvccKey::Version(raw, version) = MvccKey::decode(&key)? {
                versions.push((raw, version));
            }
        }
        assert_eq!(versions, vec![(b"key".to_vec(), 3)]);
        Ok(())
    }
}
