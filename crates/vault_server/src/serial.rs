//! Batched serial allocator.
//!
//! Serials form one total order across every owner and document kind. The
//! allocator hands them out from a window `(current, ceiling]` reserved from
//! the backing counter, refilling the window when it runs dry.

use crate::error::{DocumentError, DocumentResult};
use std::sync::Arc;
use tokio::sync::Mutex;
use vault_storage::SerialSource;

#[derive(Debug, Default)]
struct Window {
    current: u64,
    ceiling: u64,
}

/// Monotonic serial source shared by all document controllers.
///
/// # Invariants
///
/// - No two calls to [`SerialAllocator::next`] return the same value
/// - A failed refill leaves the window untouched, so retrying is safe
pub struct SerialAllocator {
    source: Arc<dyn SerialSource>,
    batch_size: u64,
    window: Mutex<Window>,
}

impl SerialAllocator {
    /// Creates an allocator with an empty window.
    ///
    /// A zero batch size is treated as 1.
    pub fn new(source: Arc<dyn SerialSource>, batch_size: u64) -> Self {
        Self {
            source,
            batch_size: batch_size.max(1),
            window: Mutex::new(Window::default()),
        }
    }

    /// Returns the batch size.
    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// Returns the next serial.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::NoSerialSource`] if the window is exhausted
    /// and the backing counter cannot be advanced.
    pub async fn next(&self) -> DocumentResult<u64> {
        let mut window = self.window.lock().await;
        if window.current >= window.ceiling {
            let base = self
                .source
                .get_batch(self.batch_size)
                .await
                .map_err(DocumentError::NoSerialSource)?;
            window.current = base;
            window.ceiling = base.saturating_add(self.batch_size);
            tracing::debug!(base, ceiling = window.ceiling, "serial window refilled");
        }
        window.current += 1;
        Ok(window.current)
    }
}

impl std::fmt::Debug for SerialAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialAllocator")
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}
