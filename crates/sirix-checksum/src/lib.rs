#![forbid(unsafe_code)]
//! Incremental and one-shot CRC32 helpers shared by the page and WAL codecs.

/// A streaming checksum accumulator.
pub trait Checksum: Default {
    /// Feeds more bytes into the running checksum.
    fn update(&mut self, bytes: &[u8]);
    /// Consumes the accumulator and returns the final digest.
    fn finalize(self) -> u32;
}

/// `crc32fast`-backed implementation of [`Checksum`].
#[derive(Default)]
pub struct Crc32Fast(crc32fast::Hasher);

impl Checksum for Crc32Fast {
    fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    fn finalize(self) -> u32 {
        self.0.finalize()
    }
}

/// Computes the CRC32 of a set of byte chunks in sequence.
pub fn compute_crc32(chunks: &[&[u8]]) -> u32 {
    let mut hasher = Crc32Fast::default();
    for chunk in chunks {
        hasher.update(chunk);
    }
    hasher.finalize()
}

/// Computes the CRC32 of a persisted page: the page's physical key and the
/// resource-wide salt are folded in ahead of the page bytes so that two
/// pages with identical contents but different keys never collide, and a
/// page replayed against the wrong resource salt is detected as corrupt.
pub fn page_crc32(page_key: u64, salt: u64, page_bytes: &[u8]) -> u32 {
    compute_crc32(&[&page_key.to_be_bytes(), &salt.to_be_bytes(), page_bytes])
}

/// Computes a 64-bit content digest from a set of byte chunks by combining
/// two differently-salted CRC32 passes into the high and low words. Used for
/// node content hashes (spec §4.2), which need more collision headroom than
/// a bare CRC32 but don't warrant pulling in a dedicated hashing crate.
pub fn content_hash64(chunks: &[&[u8]]) -> u64 {
    let mut high = Crc32Fast::default();
    let mut low = Crc32Fast::default();
    high.update(&0x9E37_79B9u32.to_be_bytes());
    low.update(&0x85EB_CA6Bu32.to_be_bytes());
    for chunk in chunks {
        high.update(chunk);
        low.update(chunk);
    }
    ((high.finalize() as u64) << 32) | low.finalize() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash64_is_sensitive_to_content() {
        let a = content_hash64(&[b"alice"]);
        let b = content_hash64(&[b"bob"]);
        assert_ne!(a, b);
    }

    #[test]
    fn content_hash64_is_order_sensitive_across_chunk_boundaries() {
        let whole = content_hash64(&[b"hello world"]);
        let split = content_hash64(&[b"hello ", b"world"]);
        assert_eq!(whole, split);
    }

    #[test]
    fn compute_crc32_is_order_sensitive_across_chunk_boundaries() {
        let whole = compute_crc32(&[b"hello world"]);
        let split = compute_crc32(&[b"hello ", b"world"]);
        assert_eq!(whole, split);
    }

    #[test]
    fn page_crc32_differs_by_key() {
        let a = page_crc32(1, 42, b"payload");
        let b = page_crc32(2, 42, b"payload");
        assert_ne!(a, b);
    }

    #[test]
    fn page_crc32_differs_by_salt() {
        let a = page_crc32(1, 42, b"payload");
        let b = page_crc32(1, 43, b"payload");
        assert_ne!(a, b);
    }
}
