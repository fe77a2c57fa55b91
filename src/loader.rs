use crate::error::Result;
use tracing::warn;

/// State of one remote collection: the data, a loading flag, and the
/// generation of the request that is allowed to land.
///
/// Failed loads fall back to an empty collection and keep the error text
/// for display. A response whose generation is no longer current is
/// discarded.
#[derive(Debug, Default)]
pub struct Loader<T> {
    data: T,
    loading: bool,
    error: Option<String>,
    generation: u64,
}

impl<T: Default> Loader<T> {
    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Mark a new request in flight and return its generation.
    pub fn begin(&mut self) -> u64 {
        self.generation += 1;
        self.loading = true;
        self.error = None;
        self.generation
    }

    /// Apply a response. Returns `false` when it was stale and ignored.
    pub fn finish(&mut self, generation: u64, result: Result<T>) -> bool {
        if generation != self.generation {
            return false;
        }
        self.loading = false;
        self.data = match result {
            Ok(data) => data,
            Err(e) => {
                warn!("Load failed, falling back to empty: {}", e);
                self.error = Some(e.to_string());
                T::default()
            }
        };
        true
    }

    /// Drop the data and invalidate any request in flight.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.loading = false;
        self.error = None;
        self.data = T::default();
    }
}
