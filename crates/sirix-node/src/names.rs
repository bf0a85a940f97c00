use std::collections::HashMap;

/// Bijective string interner backing `NamedData::name_key`/`uri_key` (spec
/// §3.1, §4.1). Repeated element/attribute names and namespace URIs are
/// extremely common in tree documents, so nodes carry a `u32` key into this
/// table instead of inline strings. Key `0` is reserved for "no name" / the
/// empty/default namespace, matching `NamedData::default()`.
#[derive(Default)]
pub struct NameDictionary {
    strings: Vec<String>,
    by_string: HashMap<String, u32>,
}

impl NameDictionary {
    pub fn new() -> Self {
        let mut dict = Self { strings: vec![String::new()], by_string: HashMap::new() };
        dict.by_string.insert(String::new(), 0);
        dict
    }

    /// Interns `name`, returning its existing key or allocating a new one.
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(&key) = self.by_string.get(name) {
            return key;
        }
        let key = self.strings.len() as u32;
        self.strings.push(name.to_string());
        self.by_string.insert(name.to_string(), key);
        key
    }

    pub fn resolve(&self, key: u32) -> Option<&str> {
        self.strings.get(key as usize).map(String::as_str)
    }

    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.by_string.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.len() <= 1
    }

    /// Serializes every interned string in key order.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.strings.len() as u32).to_be_bytes());
        for s in &self.strings {
            let bytes = s.as_bytes();
            buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            buf.extend_from_slice(bytes);
        }
        buf
    }

    /// Inverse of [`Self::encode`].
    pub fn decode(bytes: &[u8]) -> sirix_types::Result<Self> {
        use sirix_types::SirixError;
        let mut pos = 0usize;
        let read_u32 = |bytes: &[u8], pos: &mut usize| -> sirix_types::Result<u32> {
            let end = *pos + 4;
            let slice = bytes.get(*pos..end).ok_or(SirixError::Corruption("name dictionary truncated"))?;
            *pos = end;
            Ok(u32::from_be_bytes(slice.try_into().unwrap()))
        };

        let count = read_u32(bytes, &mut pos)?;
        let mut strings = Vec::with_capacity(count as usize);
        let mut by_string = HashMap::with_capacity(count as usize);
        for i in 0..count {
            let len = read_u32(bytes, &mut pos)? as usize;
            let end = pos + len;
            let slice = bytes.get(pos..end).ok_or(SirixError::Corruption("name dictionary truncated"))?;
            let s = String::from_utf8(slice.to_vec())
                .map_err(|_| SirixError::Corruption("name dictionary has invalid utf8"))?;
            pos = end;
            by_string.insert(s.clone(), i);
            strings.push(s);
        }
        Ok(Self { strings, by_string })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_reserved_as_key_zero() {
        let dict = NameDictionary::new();
        assert_eq!(dict.lookup(""), Some(0));
        assert_eq!(dict.resolve(0), Some(""));
    }

    #[test]
    fn interning_the_same_name_twice_returns_the_same_key() {
        let mut dict = NameDictionary::new();
        let a = dict.intern("book");
        let b = dict.intern("book");
        assert_eq!(a, b);
        assert_eq!(dict.len(), 2);
    }

    #[test]
    fn distinct_names_get_distinct_keys() {
        let mut dict = NameDictionary::new();
        let a = dict.intern("book");
        let b = dict.intern("author");
        assert_ne!(a, b);
    }

    #[test]
    fn resolve_round_trips_through_intern() {
        let mut dict = NameDictionary::new();
        let key = dict.intern("urn:example");
        assert_eq!(dict.resolve(key), Some("urn:example"));
    }

    #[test]
    fn encode_decode_round_trips() {
        let mut dict = NameDictionary::new();
        let book = dict.intern("book");
        let author = dict.intern("author");
        let bytes = dict.encode();
        let restored = NameDictionary::decode(&bytes).unwrap();
        assert_eq!(restored.resolve(book), Some("book"));
        assert_eq!(restored.resolve(author), Some("author"));
        assert_eq!(restored.lookup("book"), Some(book));
    }
}
