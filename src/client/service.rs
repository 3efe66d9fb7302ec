use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use anyhow::Context;
use tokio::runtime::{Handle, Runtime};

use crate::config::Config;
use crate::http::connection::{ConnectionId, Shared};
use crate::http::request::RequestBuilder;

/// Runs connections and keeps track of them until they expire.
///
/// A service either owns a multi-threaded tokio runtime ([`Service::new`])
/// or borrows the handle of one the caller already runs
/// ([`Service::with_handle`]). Clones share the same runtime and table.
#[derive(Clone)]
pub struct Service {
    inner: Arc<Inner>,
}

struct Inner {
    runtime: Option<Runtime>,
    handle: Handle,
    config: Config,
    connections: Mutex<HashMap<ConnectionId, Arc<Shared>>>,
    next_id: AtomicU64,
}

impl Service {
    /// Start a service on its own runtime.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name("courier-io")
            .enable_all()
            .build()
            .context("failed to build runtime")?;
        let handle = runtime.handle().clone();
        Ok(Self::build(Some(runtime), handle, config))
    }

    /// Run connections on an existing runtime.
    pub fn with_handle(handle: Handle, config: Config) -> Self {
        Self::build(None, handle, config)
    }

    /// Run connections on the runtime of the calling task.
    pub fn current(config: Config) -> anyhow::Result<Self> {
        let handle = Handle::try_current().context("not inside a tokio runtime")?;
        Ok(Self::with_handle(handle, config))
    }

    fn build(runtime: Option<Runtime>, handle: Handle, config: Config) -> Self {
        let inner = Arc::new(Inner {
            runtime,
            handle,
            config,
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        });
        spawn_reaper(&inner);
        Self { inner }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// A request builder seeded with the configured defaults.
    pub fn request(&self, url: impl Into<String>) -> RequestBuilder {
        self.inner.config.request.builder().url(url)
    }

    /// Drive `future` to completion on the calling thread.
    ///
    /// Connections keep running on the service runtime; this must not be
    /// called from one of its tasks.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        futures::executor::block_on(future)
    }

    /// Connections registered and not yet swept.
    pub fn connection_count(&self) -> usize {
        self.inner.table().len()
    }

    /// Drop every expired connection from the table.
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    pub(crate) fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn register(&self, id: ConnectionId, shared: Arc<Shared>) {
        self.inner.table().insert(id, shared);
    }

    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.handle.spawn(future);
    }
}

impl Inner {
    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, Arc<Shared>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn purge_expired(&self) -> usize {
        let mut table = self.table();
        let before = table.len();
        table.retain(|_, shared| !shared.is_expired());
        let removed = before - table.len();
        if removed > 0 {
            tracing::trace!(removed, remaining = table.len(), "Disposed expired connections");
        }
        removed
    }
}

fn spawn_reaper(inner: &Arc<Inner>) {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    let period = inner.config.dispose_interval();

    inner.handle.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            inner.purge_expired();
        }
    });
}

impl Drop for Inner {
    fn drop(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        tracing::debug!("Shutting down service runtime");
        // Blocking shutdown panics when dropped from async context.
        if Handle::try_current().is_ok() {
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(self.config.shutdown_grace());
        }
    }
}
