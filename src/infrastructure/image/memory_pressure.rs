//! Clears a cache whenever the host reports memory pressure.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::errors::{DownloadError, DownloadResult};
use crate::domain::ports::ImageCache;

/// Listens for memory warnings and empties the cache on each one.
///
/// The listening task stops once every monitor clone is dropped.
#[derive(Debug, Clone)]
pub struct MemoryPressureMonitor {
    warning_tx: mpsc::UnboundedSender<()>,
}

impl MemoryPressureMonitor {
    /// Starts listening on the current runtime.
    ///
    /// # Errors
    /// Returns [`DownloadError::Configuration`] when called outside a tokio runtime.
    pub fn watch(cache: Arc<dyn ImageCache>) -> DownloadResult<(Self, JoinHandle<()>)> {
        let handle = Handle::try_current()
            .map_err(|e| DownloadError::configuration(format!("no tokio runtime: {e}")))?;
        Ok(Self::watch_on(&handle, cache))
    }

    /// Starts listening on the given runtime.
    #[must_use]
    pub fn watch_on(handle: &Handle, cache: Arc<dyn ImageCache>) -> (Self, JoinHandle<()>) {
        let (warning_tx, warning_rx) = mpsc::unbounded_channel();
        let task = handle.spawn(Self::run(cache, warning_rx));
        (Self { warning_tx }, task)
    }

    /// Reports a memory warning.
    pub fn notify(&self) {
        let _ = self.warning_tx.send(());
    }

    async fn run(cache: Arc<dyn ImageCache>, mut warning_rx: mpsc::UnboundedReceiver<()>) {
        while warning_rx.recv().await.is_some() {
            let freed = cache.memory_usage();
            if cache.remove_all_images() {
                info!(bytes = freed, "Cleared image cache on memory warning");
            }
        }
        debug!("Memory pressure monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::domain::entities::Image;
    use crate::infrastructure::image::memory_cache::AutoPurgingImageCache;

    #[tokio::test]
    async fn test_warning_empties_cache() {
        let cache = Arc::new(AutoPurgingImageCache::with_defaults());
        cache.add(Image::new(image::DynamicImage::new_rgba8(8, 8), 1.0), "a");
        cache.add(Image::new(image::DynamicImage::new_rgba8(8, 8), 1.0), "b");

        let (monitor, task) = MemoryPressureMonitor::watch(cache.clone()).unwrap();
        monitor.notify();

        for _ in 0..200 {
            if cache.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(cache.is_empty());
        assert_eq!(cache.memory_usage(), 0);

        drop(monitor);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("monitor stops")
            .unwrap();
    }

    #[test]
    fn test_requires_runtime() {
        let cache = Arc::new(AutoPurgingImageCache::with_defaults());
        assert!(MemoryPressureMonitor::watch(cache).is_err());
    }
}
