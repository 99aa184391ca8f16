use codeframe_core::{CoreError, CoreResult};
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use tiktoken_rs::{cl100k_base, CoreBPE};

const DEFAULT_CACHE_ENTRIES: usize = 4096;

/// Token counting with a bounded cache keyed by SHA-256 of the content.
///
/// Uses the `cl100k_base` byte-pair encoding as the generic fallback for
/// every model. Counting never fails once construction succeeds; the empty
/// string counts as zero without touching the encoder.
pub struct TokenCounter {
    encoder: CoreBPE,
    cache: Mutex<LruCache<[u8; 32], usize>>,
}

impl TokenCounter {
    pub fn new() -> CoreResult<Self> {
        Self::with_capacity(DEFAULT_CACHE_ENTRIES)
    }

    pub fn with_capacity(entries: usize) -> CoreResult<Self> {
        let encoder = cl100k_base()
            .map_err(|e| CoreError::ExternalTool(format!("BPE init failed: {e}")))?;
        let capacity = NonZeroUsize::new(entries).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            encoder,
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Count tokens in a string, consulting the cache first.
    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let key: [u8; 32] = Sha256::digest(text.as_bytes()).into();
        if let Some(&cached) = self.cache.lock().get(&key) {
            return cached;
        }
        let count = self.encoder.encode_ordinary(text).len();
        self.cache.lock().put(key, count);
        count
    }

    /// Sum of token counts over a batch, reusing the cache.
    pub fn count_batch<'a, I>(&self, texts: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        texts.into_iter().map(|t| self.count(t)).sum()
    }
}
