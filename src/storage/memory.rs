use std::{
    collections::{BTreeMap, btree_map},
    ops::RangeBounds,
};

use crate::{
    error::Result,
    storage::engine::{Engine, EngineIterator},
};

/// BTreeMap backed storage, the only backing store: tables live as long as
/// the process does
#[derive(Default)]
pub struct MemoryEngine {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Engine for MemoryEngine {
    type EngineIterator<'a> = MemoryScan<'a>;

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.data.insert(key, value);
        Ok(())
    }

    fn get(&mut self, key: Vec<u8>) -> Result<Option<Vec<u8>>> {
        Ok(self.data.get(&key).cloned())
    }

    fn delete(&mut self, key: Vec<u8>) -> Result<()> {
        self.data.remove(&key);
        Ok(())
    }

    fn scan(&mut self, range: impl RangeBounds<Vec<u8>>) -> MemoryScan<'_> {
        MemoryScan(self.data.range(range))
    }
}

/// Owned key/value pairs of a key range, in key order
pub struct MemoryScan<'a>(btree_map::Range<'a, Vec<u8>, Vec<u8>>);

fn owned((key, value): (&Vec<u8>, &Vec<u8>)) -> Result<(Vec<u8>, Vec<u8>)> {
    Ok((key.clone(), value.clone()))
}

impl Iterator for MemoryScan<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(owned)
    }
}

impl DoubleEndedIterator for MemoryScan<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.0.next_back().map(owned)
    }
}

impl EngineIterator for MemoryScan<'_> {}
