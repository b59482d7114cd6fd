//! Callback definitions.

/// A progress callback for long-running operations.
///
/// The argument is the fraction of the work that has been completed, between
/// 0.0 and 1.0. Callbacks may be invoked from worker threads, and are
/// guaranteed to be invoked at least once with 1.0 on successful completion.
pub struct ProgressCallback {
    callback: Box<dyn FnMut(f32) + Send>,
}

impl ProgressCallback {
    /// Creates a new callback from a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnMut(f32) + Send + 'static,
    {
        Self {
            callback: Box::new(f),
        }
    }

    pub(crate) fn report(&mut self, progress: f32) {
        (self.callback)(progress)
    }
}

impl std::fmt::Debug for ProgressCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressCallback")
            .field("callback", &"<closure>")
            .finish()
    }
}
