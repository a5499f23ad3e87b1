//! In-memory image cache with byte-budget LRU purging.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::domain::entities::{Image, ImageRequest};
use crate::domain::errors::{DownloadError, DownloadResult};
use crate::domain::ports::{ImageCache, ImageRequestCache};

/// Default memory ceiling (100 MB).
pub const DEFAULT_MEMORY_CAPACITY: u64 = 100 * 1024 * 1024;

/// Default usage a purge brings the cache down to (60 MB).
pub const DEFAULT_PREFERRED_MEMORY_USAGE_AFTER_PURGE: u64 = 60 * 1024 * 1024;

struct CachedImage {
    image: Image,
    total_bytes: u64,
    last_access: AtomicU64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CachedImage>,
    memory_usage: u64,
}

/// In-memory image cache that purges least recently accessed images once its memory
/// capacity is exceeded.
///
/// Lookups take the shared lock and stamp the entry from a monotonic access clock, so
/// concurrent readers never block each other. Inserts and removals take the exclusive
/// lock.
pub struct AutoPurgingImageCache {
    state: RwLock<CacheState>,
    memory_capacity: u64,
    preferred_memory_usage_after_purge: u64,
    access_clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AutoPurgingImageCache {
    /// Creates a cache with the given byte budget.
    ///
    /// # Errors
    /// Returns [`DownloadError::Configuration`] if `memory_capacity` is smaller than
    /// `preferred_memory_usage_after_purge`.
    pub fn new(memory_capacity: u64, preferred_memory_usage_after_purge: u64) -> DownloadResult<Self> {
        if memory_capacity < preferred_memory_usage_after_purge {
            return Err(DownloadError::configuration(format!(
                "memory capacity {memory_capacity} must be >= preferred usage after purge {preferred_memory_usage_after_purge}"
            )));
        }

        Ok(Self {
            state: RwLock::new(CacheState::default()),
            memory_capacity,
            preferred_memory_usage_after_purge,
            access_clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Creates a cache with the default 100 MB / 60 MB budget.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            preferred_memory_usage_after_purge: DEFAULT_PREFERRED_MEMORY_USAGE_AFTER_PURGE,
            access_clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Process-wide cache with default limits.
    ///
    /// Convenience only; downloaders take their cache explicitly.
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<AutoPurgingImageCache>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(Self::with_defaults())).clone()
    }

    /// Usage in bytes above which a purge runs.
    #[must_use]
    pub const fn memory_capacity(&self) -> u64 {
        self.memory_capacity
    }

    /// Usage in bytes a purge brings the cache down to.
    #[must_use]
    pub const fn preferred_memory_usage_after_purge(&self) -> u64 {
        self.preferred_memory_usage_after_purge
    }

    /// Number of cached images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// True if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Access stamp of an entry without touching it.
    ///
    /// Stamps come from a per-cache monotonic clock; a larger stamp means a more
    /// recent access.
    #[must_use]
    pub fn access_stamp(&self, identifier: &str) -> Option<u64> {
        self.state
            .read()
            .entries
            .get(identifier)
            .map(|entry| entry.last_access.load(Ordering::Acquire))
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let state = self.state.read();
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: state.entries.len(),
            memory_usage: state.memory_usage,
        }
    }

    fn tick(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Removes least recently accessed entries until usage is back at or below the
    /// preferred level.
    fn purge(&self, state: &mut CacheState) {
        let bytes_to_purge = state
            .memory_usage
            .saturating_sub(self.preferred_memory_usage_after_purge);

        let mut candidates: Vec<(u64, String, u64)> = state
            .entries
            .iter()
            .map(|(key, entry)| {
                (
                    entry.last_access.load(Ordering::Acquire),
                    key.clone(),
                    entry.total_bytes,
                )
            })
            .collect();
        candidates.sort_unstable_by_key(|(stamp, _, _)| *stamp);

        let mut bytes_purged = 0u64;
        let mut purged_count = 0usize;
        for (_, key, total_bytes) in candidates {
            if bytes_purged >= bytes_to_purge {
                break;
            }
            state.entries.remove(&key);
            bytes_purged += total_bytes;
            purged_count += 1;
        }
        state.memory_usage -= bytes_purged;

        debug!(
            purged_count = purged_count,
            bytes_purged = bytes_purged,
            memory_usage = state.memory_usage,
            "Purged image cache"
        );
    }
}

impl Default for AutoPurgingImageCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for AutoPurgingImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoPurgingImageCache")
            .field("memory_capacity", &self.memory_capacity)
            .field(
                "preferred_memory_usage_after_purge",
                &self.preferred_memory_usage_after_purge,
            )
            .field("memory_usage", &self.memory_usage())
            .finish_non_exhaustive()
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Bytes charged to cached images.
    pub memory_usage: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images, {} bytes, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.memory_usage, self.hit_rate, self.hits, self.misses
        )
    }
}

impl ImageCache for AutoPurgingImageCache {
    fn add(&self, image: Image, identifier: &str) {
        let total_bytes = image.memory_cost();
        let stamp = self.tick();
        let mut state = self.state.write();

        if let Some(previous) = state.entries.remove(identifier) {
            state.memory_usage -= previous.total_bytes;
        }
        state.entries.insert(
            identifier.to_string(),
            CachedImage {
                image,
                total_bytes,
                last_access: AtomicU64::new(stamp),
            },
        );
        state.memory_usage += total_bytes;
        trace!(identifier = %identifier, bytes = total_bytes, "Stored image in memory cache");

        if state.memory_usage > self.memory_capacity {
            self.purge(&mut state);
        }
    }

    fn remove_image(&self, identifier: &str) -> bool {
        let mut state = self.state.write();
        match state.entries.remove(identifier) {
            Some(entry) => {
                state.memory_usage -= entry.total_bytes;
                debug!(identifier = %identifier, "Removed image from memory cache");
                true
            }
            None => false,
        }
    }

    fn remove_all_images(&self) -> bool {
        let mut state = self.state.write();
        if state.entries.is_empty() {
            return false;
        }
        let count = state.entries.len();
        state.entries.clear();
        state.memory_usage = 0;
        debug!(count = count, "Cleared memory image cache");
        true
    }

    fn image(&self, identifier: &str) -> Option<Image> {
        let state = self.state.read();
        if let Some(entry) = state.entries.get(identifier) {
            entry.last_access.store(self.tick(), Ordering::Release);
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(identifier = %identifier, "Memory cache hit");
            Some(entry.image.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(identifier = %identifier, "Memory cache miss");
            None
        }
    }

    fn memory_usage(&self) -> u64 {
        self.state.read().memory_usage
    }
}

impl ImageRequestCache for AutoPurgingImageCache {
    fn remove_images_matching(&self, request: &ImageRequest) -> bool {
        let url_key = request.url_key();
        let variant_prefix = format!("{url_key}-");

        let mut state = self.state.write();
        let keys: Vec<String> = state
            .entries
            .keys()
            .filter(|key| **key == url_key || key.starts_with(&variant_prefix))
            .cloned()
            .collect();

        for key in &keys {
            if let Some(entry) = state.entries.remove(key) {
                state.memory_usage -= entry.total_bytes;
            }
        }

        if !keys.is_empty() {
            debug!(url = %url_key, count = keys.len(), "Removed cached variants for request");
        }
        !keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(width: u32, height: u32) -> Image {
        Image::new(image::DynamicImage::new_rgba8(width, height), 1.0)
    }

    #[test]
    fn test_capacity_must_cover_preferred_usage() {
        assert!(matches!(
            AutoPurgingImageCache::new(10, 20),
            Err(DownloadError::Configuration { .. })
        ));
        assert!(AutoPurgingImageCache::new(20, 20).is_ok());
    }

    #[test]
    fn test_add_and_get_round_trip() {
        let cache = AutoPurgingImageCache::with_defaults();
        let img = image(10, 10);

        cache.add(img.clone(), "avatar");
        let added_at = cache.access_stamp("avatar").unwrap();
        let retrieved = cache.image("avatar");

        assert_eq!(retrieved, Some(img));
        assert!(cache.access_stamp("avatar").unwrap() >= added_at);
        assert_eq!(cache.memory_usage(), 400);
    }

    #[test]
    fn test_cache_miss() {
        let cache = AutoPurgingImageCache::with_defaults();
        assert!(cache.image("nonexistent").is_none());
    }

    #[test]
    fn test_overwrite_replaces_memory_cost() {
        let cache = AutoPurgingImageCache::with_defaults();

        cache.add(image(10, 10), "key");
        cache.add(image(20, 10), "key");

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.memory_usage(), 800);
    }

    #[test]
    fn test_remove_image() {
        let cache = AutoPurgingImageCache::with_defaults();
        cache.add(image(10, 10), "key");

        assert!(cache.remove_image("key"));
        assert!(!cache.remove_image("key"));
        assert_eq!(cache.memory_usage(), 0);
    }

    #[test]
    fn test_remove_all_images_reports_non_empty() {
        let cache = AutoPurgingImageCache::with_defaults();
        assert!(!cache.remove_all_images());

        cache.add(image(10, 10), "a");
        cache.add(image(10, 10), "b");

        assert!(cache.remove_all_images());
        assert!(cache.is_empty());
        assert_eq!(cache.memory_usage(), 0);
    }

    #[test]
    fn test_request_keys_keep_filtered_variants_apart() {
        let cache = AutoPurgingImageCache::with_defaults();
        let request = ImageRequest::new("https://example.com/image.png");

        cache.add_for_request(image(10, 10), &request, None);
        cache.add_for_request(image(5, 5), &request, Some("circle"));

        assert_eq!(
            cache.image_for_request(&request, None).map(|i| i.pixel_width()),
            Some(10)
        );
        assert_eq!(
            cache
                .image_for_request(&request, Some("circle"))
                .map(|i| i.pixel_width()),
            Some(5)
        );
        assert!(cache.image("https://example.com/image.png-circle").is_some());
        assert!(cache.remove_image_for_request(&request, Some("circle")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove_images_matching_request() {
        let cache = AutoPurgingImageCache::with_defaults();
        let request = ImageRequest::new("https://example.com/image.png");
        let other = ImageRequest::new("https://example.com/image.png2");

        cache.add_for_request(image(10, 10), &request, None);
        cache.add_for_request(image(10, 10), &request, Some("blur-3"));
        cache.add_for_request(image(10, 10), &request, Some("circle"));
        cache.add_for_request(image(10, 10), &other, None);

        assert!(cache.remove_images_matching(&request));
        assert_eq!(cache.len(), 1);
        assert!(cache.image_for_request(&other, None).is_some());
        assert_eq!(cache.memory_usage(), 400);
        assert!(!cache.remove_images_matching(&request));
    }

    #[test]
    fn test_purge_lands_below_preferred_usage() {
        let cache = AutoPurgingImageCache::new(100_000_000, 60_000_000).unwrap();
        let img = image(205, 200);
        assert_eq!(img.memory_cost(), 164_000);

        for index in 1..=610 {
            cache.add(img.clone(), &format!("image-{index}"));
        }
        assert_eq!(cache.memory_usage(), 59_860_000);
        assert_eq!(cache.len(), 365);

        for index in 611..=640 {
            cache.add(img.clone(), &format!("image-{index}"));
        }

        assert_eq!(cache.memory_usage(), 64_780_000);
        assert!(cache.memory_usage() <= cache.memory_capacity());
        assert_eq!(cache.len(), 395);
        assert!(cache.image("image-245").is_none());
        assert!(cache.image("image-246").is_some());
    }

    #[test]
    fn test_default_limits_purge_at_640_images() {
        let cache = AutoPurgingImageCache::with_defaults();
        let img = image(205, 200);

        for index in 1..=639 {
            cache.add(img.clone(), &format!("image-{index}"));
        }
        assert_eq!(cache.len(), 639);
        assert_eq!(cache.memory_usage(), 104_796_000);

        cache.add(img.clone(), "image-640");

        assert_eq!(cache.memory_usage(), 62_812_000);
        assert_eq!(cache.len(), 383);
        assert!(cache.memory_usage() <= cache.preferred_memory_usage_after_purge());
        assert!(cache.image("image-257").is_none());
        assert!(cache.image("image-258").is_some());
        assert!(cache.image("image-640").is_some());
    }

    #[test]
    fn test_reads_protect_entries_from_purge() {
        // 4x4 images cost 64 bytes each.
        let cache = AutoPurgingImageCache::new(200, 150).unwrap();

        cache.add(image(4, 4), "a");
        cache.add(image(4, 4), "b");
        cache.add(image(4, 4), "c");
        assert!(cache.image("a").is_some());

        cache.add(image(4, 4), "d");

        assert!(cache.image("a").is_some());
        assert!(cache.image("b").is_none());
        assert!(cache.image("c").is_none());
        assert!(cache.image("d").is_some());
        assert_eq!(cache.memory_usage(), 128);
    }

    #[test]
    fn test_memory_usage_matches_entries() {
        let cache = AutoPurgingImageCache::new(1_000, 500).unwrap();
        for index in 0..40 {
            cache.add(image(3 + index % 4, 4), &format!("k{index}"));
            assert!(cache.memory_usage() <= cache.memory_capacity());
        }
        let state = cache.state.read();
        let sum: u64 = state.entries.values().map(|e| e.total_bytes).sum();
        assert_eq!(sum, state.memory_usage);
    }

    #[test]
    fn test_cache_stats() {
        let cache = AutoPurgingImageCache::with_defaults();
        cache.add(image(10, 10), "test1");

        let _ = cache.image("test1");
        let _ = cache.image("missing");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.memory_usage, 400);
    }

    #[test]
    fn test_concurrent_readers() {
        let cache = Arc::new(AutoPurgingImageCache::with_defaults());
        cache.add(image(4, 4), "shared");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || (0..100).all(|_| cache.image("shared").is_some()))
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(cache.stats().hits, 800);
    }
}
