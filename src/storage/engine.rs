use std::ops::{Bound, RangeBounds};

use crate::error::Result;

/// Abstract storage engine interface (byte-level operations)
///
/// Different from sql::engine::Engine which operates on tables.
pub trait Engine {
    type EngineIterator<'a>: EngineIterator
    where
        Self: 'a;

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()>;
    fn get(&mut self, key: Vec<u8>) -> Result<Option<Vec<u8>>>;
    fn delete(&mut self, key: Vec<u8>) -> Result<()>;
    fn scan(&mut self, range: impl RangeBounds<Vec<u8>>) -> Self::EngineIterator<'_>;

    /// Prefix scan using lexicographic ordering
    ///
    /// The exclusive end bound is the shortest key greater than every key with
    /// the prefix: trailing 0xff bytes are dropped and the last remaining byte is
    /// incremented. "apple" becomes ["apple", "applf"), [0x61, 0xff] becomes
    /// [[0x61, 0xff], [0x62]). A prefix of only 0xff bytes has no upper bound.
    fn scan_prefix(&mut self, prefix: Vec<u8>) -> Self::EngineIterator<'_> {
        let start = Bound::Included(prefix.clone());
        let end = match prefix.iter().rposition(|b| *b != 0xff) {
            Some(pos) => {
                let mut upper = prefix[..=pos].to_vec();
                upper[pos] += 1;
                Bound::Excluded(upper)
            }
            None => Bound::Unbounded,
        };
        self.scan((start, end))
    }
}

/// Storage engine iterator trait (supports reverse traversal)
pub trait EngineIterator: DoubleEndedIterator<Item = Result<(Vec<u8>, Vec<u8>)>> {}

#[cfg(test)]
mod tests {
    use std::ops::Bound;

    use super::Engine;
    use crate::{error::Result, storage::memory::MemoryEngine};

    fn keys(iter: impl Iterator<Item = Result<(Vec<u8>, Vec<u8>)>>) -> Result<Vec<Vec<u8>>> {
        iter.map(|r| r.map(|(k, _)| k)).collect()
    }

    #[test]
    fn test_point_operations() -> Result<()> {
        let mut eng = MemoryEngine::new();
        assert_eq!(eng.get(b"row/1".to_vec())?, None);

        eng.set(b"row/1".to_vec(), vec![1])?;
        eng.set(b"row/1".to_vec(), vec![2])?;
        assert_eq!(eng.get(b"row/1".to_vec())?, Some(vec![2]));

        // Deleting a missing key is not an error
        eng.delete(b"row/1".to_vec())?;
        eng.delete(b"row/1".to_vec())?;
        assert_eq!(eng.get(b"row/1".to_vec())?, None);

        // The empty key and the empty value are ordinary entries
        eng.set(Vec::new(), Vec::new())?;
        assert_eq!(eng.get(Vec::new())?, Some(Vec::new()));
        Ok(())
    }

    #[test]
    fn test_scan_both_ends() -> Result<()> {
        let mut eng = MemoryEngine::new();
        for key in ["users/3", "orders/1", "users/1", "users/2", "zzz"] {
            eng.set(key.as_bytes().to_vec(), Vec::new())?;
        }

        let range = (
            Bound::Included(b"users/".to_vec()),
            Bound::Excluded(b"users0".to_vec()),
        );
        assert_eq!(
            keys(eng.scan(range.clone()))?,
            vec![b"users/1".to_vec(), b"users/2".to_vec(), b"users/3".to_vec()]
        );
        assert_eq!(keys(eng.scan(range).rev())?.first(), Some(&b"users/3".to_vec()));
        Ok(())
    }

    #[test]
    fn test_scan_prefix() -> Result<()> {
        let mut eng = MemoryEngine::new();
        for key in ["t/b", "t/a", "u/a", "t", "s/z"] {
            eng.set(key.as_bytes().to_vec(), Vec::new())?;
        }
        assert_eq!(
            keys(eng.scan_prefix(b"t/".to_vec()))?,
            vec![b"t/a".to_vec(), b"t/b".to_vec()]
        );
        Ok(())
    }

    #[test]
    fn test_scan_prefix_trailing_ff() -> Result<()> {
        let mut eng = MemoryEngine::new();
        eng.set(vec![0x01, 0xff], b"a".to_vec())?;
        eng.set(vec![0x01, 0xff, 0x07], b"b".to_vec())?;
        eng.set(vec![0x02], b"c".to_vec())?;
        eng.set(vec![0xff, 0xff, 0x01], b"d".to_vec())?;

        assert_eq!(
            keys(eng.scan_prefix(vec![0x01, 0xff]))?,
            vec![vec![0x01, 0xff], vec![0x01, 0xff, 0x07]]
        );
        assert_eq!(
            keys(eng.scan_prefix(vec![0xff, 0xff]))?,
            vec![vec![0xff, 0xff, 0x01]]
        );
        Ok(())
    }
}
