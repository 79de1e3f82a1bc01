//! Task spawning abstraction and its tokio implementation.

use std::future::Future;

/// Abstraction for spawning background work on a runtime.
pub trait Spawn {
    /// Spawn a detached future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

#[cfg(feature = "tokio-runtime")]
pub use self::tokio_impl::TokioSpawner;

#[cfg(feature = "tokio-runtime")]
mod tokio_impl {
    use std::future::Future;
    use std::sync::Arc;

    use super::Spawn;

    /// Spawner running futures on a tokio runtime.
    #[derive(Clone)]
    pub struct TokioSpawner {
        handle: Arc<tokio::runtime::Handle>,
    }

    impl TokioSpawner {
        /// Spawn onto an existing runtime.
        pub fn new(handle: tokio::runtime::Handle) -> Self {
            Self {
                handle: Arc::new(handle),
            }
        }

        /// Spawn onto the runtime of the calling task.
        pub fn current() -> Self {
            Self::new(tokio::runtime::Handle::current())
        }
    }

    impl Spawn for TokioSpawner {
        fn spawn<F>(&self, fut: F)
        where
            F: Future<Output = ()> + Send + 'static,
        {
            self.handle.spawn(fut);
        }
    }
}
