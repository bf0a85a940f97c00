use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sirix_io::PageReader;
use sirix_types::Result;

/// Process-shared cache of decoded page bytes keyed by physical key (spec
/// §4.6: "a page read once is visible to every reader of that revision").
/// Shared across every [`crate::read::PageReadTrx`] opened against the same
/// resource so concurrent readers of the same or adjacent revisions don't
/// each pay for their own disk round trip.
#[derive(Default)]
pub struct PageCache {
    inner: Mutex<HashMap<u64, Arc<Vec<u8>>>>,
}

impl PageCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get_or_read<R: PageReader + ?Sized>(&self, reader: &R, key: u64) -> Result<Arc<Vec<u8>>> {
        if let Some(bytes) = self.inner.lock().get(&key) {
            return Ok(bytes.clone());
        }
        let bytes = Arc::new(reader.read(key)?);
        self.inner.lock().insert(key, bytes.clone());
        Ok(bytes)
    }

    pub fn invalidate(&self, key: u64) {
        self.inner.lock().remove(&key);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
