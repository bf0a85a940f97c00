use std::collections::{BTreeMap, BTreeSet};

use sirix_types::NodeKey;

/// The set of node-keys whose text value equals a given key (spec §3.6).
pub type TextReferences = BTreeSet<u64>;

/// Content-and-structure (value) index: an ordered map from text value to
/// the node-keys that hold it, maintained alongside text set/insert/remove
/// (spec §4.10). Ordering enables range scans over text values, not just
/// point lookups.
#[derive(Default)]
pub struct ValueIndex {
    entries: BTreeMap<Vec<u8>, TextReferences>,
}

impl ValueIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `node_key` under `value`, creating the entry if absent.
    pub fn insert(&mut self, value: &[u8], node_key: NodeKey) {
        self.entries.entry(value.to_vec()).or_default().insert(node_key.0);
    }

    /// Removes `node_key` from `value`'s entry, pruning the entry if it
    /// becomes empty.
    pub fn remove(&mut self, value: &[u8], node_key: NodeKey) {
        if let Some(refs) = self.entries.get_mut(value) {
            refs.remove(&node_key.0);
            if refs.is_empty() {
                self.entries.remove(value);
            }
        }
    }

    pub fn references(&self, value: &[u8]) -> Option<&TextReferences> {
        self.entries.get(value)
    }

    /// Values in `[low, high)`, for range-scan queries over the index.
    pub fn range<'a>(
        &'a self,
        low: &'a [u8],
        high: &'a [u8],
    ) -> impl Iterator<Item = (&'a [u8], &'a TextReferences)> {
        self.entries
            .range(low.to_vec()..high.to_vec())
            .map(|(k, v)| (k.as_slice(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the whole index to a flat byte blob: value count, then for
    /// each value its byte length, bytes, reference count, and references.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for (value, refs) in &self.entries {
            buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
            buf.extend_from_slice(value);
            buf.extend_from_slice(&(refs.len() as u32).to_be_bytes());
            for key in refs {
                buf.extend_from_slice(&key.to_be_bytes());
            }
        }
        buf
    }

    /// Inverse of [`Self::encode`].
    pub fn decode(bytes: &[u8]) -> sirix_types::Result<Self> {
        use sirix_types::SirixError;
        let mut pos = 0usize;
        let read_u32 = |bytes: &[u8], pos: &mut usize| -> sirix_types::Result<u32> {
            let end = *pos + 4;
            let slice = bytes.get(*pos..end).ok_or(SirixError::Corruption("value index truncated"))?;
            *pos = end;
            Ok(u32::from_be_bytes(slice.try_into().unwrap()))
        };
        let read_u64 = |bytes: &[u8], pos: &mut usize| -> sirix_types::Result<u64> {
            let end = *pos + 8;
            let slice = bytes.get(*pos..end).ok_or(SirixError::Corruption("value index truncated"))?;
            *pos = end;
            Ok(u64::from_be_bytes(slice.try_into().unwrap()))
        };

        let value_count = read_u32(bytes, &mut pos)?;
        let mut entries = BTreeMap::new();
        for _ in 0..value_count {
            let len = read_u32(bytes, &mut pos)? as usize;
            let end = pos + len;
            let value = bytes.get(pos..end).ok_or(SirixError::Corruption("value index truncated"))?.to_vec();
            pos = end;
            let ref_count = read_u32(bytes, &mut pos)?;
            let mut refs = TextReferences::new();
            for _ in 0..ref_count {
                refs.insert(read_u64(bytes, &mut pos)?);
            }
            entries.insert(value, refs);
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup_round_trip() {
        let mut index = ValueIndex::new();
        index.insert(b"alice", NodeKey(1));
        index.insert(b"alice", NodeKey(2));
        let refs = index.references(b"alice").unwrap();
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn remove_prunes_empty_entries() {
        let mut index = ValueIndex::new();
        index.insert(b"bob", NodeKey(1));
        index.remove(b"bob", NodeKey(1));
        assert!(index.references(b"bob").is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn encode_decode_round_trips() {
        let mut index = ValueIndex::new();
        index.insert(b"alice", NodeKey(1));
        index.insert(b"alice", NodeKey(2));
        index.insert(b"bob", NodeKey(3));
        let bytes = index.encode();
        let restored = ValueIndex::decode(&bytes).unwrap();
        assert_eq!(restored.references(b"alice").unwrap().len(), 2);
        assert_eq!(restored.references(b"bob").unwrap().len(), 1);
    }

    #[test]
    fn range_scans_in_sorted_order() {
        let mut index = ValueIndex::new();
        index.insert(b"a", NodeKey(1));
        index.insert(b"b", NodeKey(2));
        index.insert(b"c", NodeKey(3));
        let values: Vec<&[u8]> = index.range(b"a", b"c").map(|(v, _)| v).collect();
        assert_eq!(values, vec![&b"a"[..], &b"b"[..]]);
    }
}
