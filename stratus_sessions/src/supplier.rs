use std::{
    fmt,
    sync::{Arc, RwLock},
    time::Duration,
};

use aliri_clock::{Clock, DurationSecs, System, UnixTime};
use thiserror::Error;
use tokio::{sync::Mutex, time::Instant};

use crate::{
    backoff::{ErrorBackoffConfig, ErrorBackoffHandler},
    latch::AuthFailureLatch,
    sources::{AsyncSupplier, SourceError},
};

/// Errors reported by [`ExpiringSupplier::get`]
///
/// The underlying source error is logged at the point of classification;
/// every waiter of a failed refresh receives the same value here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SupplierError {
    /// The provider rejected the credential; refreshes are permanently
    /// disabled for every cell sharing the latch
    #[error("credentials rejected by the provider; refresh permanently disabled")]
    Authorization,

    /// The refresh deadline elapsed before a value could be fetched
    #[error("refresh deadline exceeded")]
    DeadlineExceeded,
}

/// Timing configuration for a memoized cell
#[derive(Clone, Debug)]
pub struct RefreshConfig {
    /// How long a fetched value is served without consulting the source
    pub freshness: DurationSecs,
    /// Budget for a single fetch attempt
    pub attempt_timeout: Duration,
    /// Overall budget for one caller's refresh, spanning retries
    pub deadline: Duration,
    /// Spacing of retries after transient failures
    pub backoff: ErrorBackoffConfig,
}

impl Default for RefreshConfig {
    /// A ten-minute freshness window with 10-second login attempts bounded
    /// by a 30-second overall deadline
    fn default() -> Self {
        Self {
            freshness: DurationSecs(600),
            attempt_timeout: Duration::from_secs(10),
            deadline: Duration::from_secs(30),
            backoff: ErrorBackoffConfig::default(),
        }
    }
}

struct CachedValue<T> {
    value: Arc<T>,
    fetched: UnixTime,
}

struct Inner<S: AsyncSupplier, C> {
    // Serializes refreshes: the caller holding this lock is the sole
    // fetcher, everyone else queues behind it.
    source: Mutex<S>,
    cell: RwLock<Option<CachedValue<S::Value>>>,
    config: RefreshConfig,
    latch: Arc<AuthFailureLatch>,
    clock: C,
}

/// A memoizing supplier of a slowly fetched value
///
/// Serves the cached value while it is within the freshness window.
/// When a refresh is needed, exactly one caller performs the fetch while
/// concurrent callers wait for its result, so the provider never sees a
/// thundering herd of simultaneous logins.
///
/// Transient fetch failures (including per-attempt timeouts) are retried
/// with backoff until the caller's deadline elapses. An authorization
/// failure trips the shared [`AuthFailureLatch`] and every subsequent
/// `get()` fails immediately without touching the network.
///
/// Cloning is cheap and shares the cell.
pub struct ExpiringSupplier<S: AsyncSupplier, C = System> {
    inner: Arc<Inner<S, C>>,
}

impl<S: AsyncSupplier, C> Clone for ExpiringSupplier<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: AsyncSupplier, C> fmt::Debug for ExpiringSupplier<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let populated = self
            .inner
            .cell
            .read()
            .map(|cell| cell.is_some())
            .unwrap_or(false);
        f.debug_struct("ExpiringSupplier")
            .field("config", &self.inner.config)
            .field("populated", &populated)
            .field("latched", &self.inner.latch.is_set())
            .finish_non_exhaustive()
    }
}

impl<S: AsyncSupplier> ExpiringSupplier<S, System> {
    /// Constructs a supplier over `source` using the system clock
    ///
    /// Cells that guard the same credential should share one `latch`.
    pub fn new(source: S, config: RefreshConfig, latch: Arc<AuthFailureLatch>) -> Self {
        Self::with_clock(source, config, latch, System)
    }
}

impl<S: AsyncSupplier, C: Clock> ExpiringSupplier<S, C> {
    /// Constructs a supplier using a custom clock
    ///
    /// Useful for testing freshness behavior.
    pub fn with_clock(
        source: S,
        config: RefreshConfig,
        latch: Arc<AuthFailureLatch>,
        clock: C,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source: Mutex::new(source),
                cell: RwLock::new(None),
                config,
                latch,
                clock,
            }),
        }
    }

    /// The latch shared by cells guarding this credential
    pub fn latch(&self) -> &Arc<AuthFailureLatch> {
        &self.inner.latch
    }

    /// Returns the cached value, refreshing it first if needed
    ///
    /// Fails with [`SupplierError::Authorization`] immediately and forever
    /// once the latch is set, and with [`SupplierError::DeadlineExceeded`]
    /// when the configured refresh deadline elapses without a value.
    pub async fn get(&self) -> Result<Arc<S::Value>, SupplierError> {
        if self.inner.latch.is_set() {
            return Err(SupplierError::Authorization);
        }
        if let Some(value) = self.fresh_value() {
            return Ok(value);
        }
        self.refresh().await
    }

    /// Discards the cached value, forcing the next `get()` to refresh
    ///
    /// Idempotent; has no effect on a refresh already in flight.
    pub fn invalidate(&self) {
        let dropped = self
            .inner
            .cell
            .write()
            .map(|mut cell| cell.take().is_some())
            .unwrap_or(false);
        if dropped {
            tracing::debug!("cached value invalidated");
        }
    }

    fn fresh_value(&self) -> Option<Arc<S::Value>> {
        let cell = self.inner.cell.read().ok()?;
        let cached = cell.as_ref()?;
        let now = self.inner.clock.now();
        (now < cached.fetched + self.inner.config.freshness).then(|| Arc::clone(&cached.value))
    }

    fn store(&self, value: &Arc<S::Value>) {
        let fetched = self.inner.clock.now();
        if let Ok(mut cell) = self.inner.cell.write() {
            *cell = Some(CachedValue {
                value: Arc::clone(value),
                fetched,
            });
        }
        tracing::debug!(fetched = fetched.0, "refreshed cached value");
    }

    async fn refresh(&self) -> Result<Arc<S::Value>, SupplierError> {
        // The source lock is the single-flight guard. It is never held
        // together with the cell lock, and the fetch itself runs while
        // holding only this lock.
        let mut source = self.inner.source.lock().await;

        // The fetch that was in flight while we queued may have settled
        // matters, one way or the other.
        if self.inner.latch.is_set() {
            return Err(SupplierError::Authorization);
        }
        if let Some(value) = self.fresh_value() {
            return Ok(value);
        }

        let deadline = Instant::now() + self.inner.config.deadline;
        let mut backoff = ErrorBackoffHandler::new(self.inner.config.backoff.clone());

        loop {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!("refresh deadline exceeded");
                return Err(SupplierError::DeadlineExceeded);
            }
            let attempt_budget = self.inner.config.attempt_timeout.min(deadline - now);

            match tokio::time::timeout(attempt_budget, source.fetch()).await {
                Ok(Ok(value)) => {
                    let value = Arc::new(value);
                    self.store(&value);
                    return Ok(value);
                }
                Ok(Err(error)) if error.is_authorization() => {
                    if self.inner.latch.try_set() {
                        tracing::error!(
                            error = &error as &dyn std::error::Error,
                            "provider rejected credentials; disabling refresh"
                        );
                    }
                    return Err(SupplierError::Authorization);
                }
                Ok(Err(error)) => {
                    let delay = backoff.error();
                    tracing::warn!(
                        error = &error as &dyn std::error::Error,
                        delay_ms = delay.as_millis() as u64,
                        "fetch failed; will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(_) => {
                    tracing::warn!(
                        attempt_budget_ms = attempt_budget.as_millis() as u64,
                        "fetch attempt timed out"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        convert::Infallible,
        sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    };

    struct CountingSource {
        fetches: Arc<AtomicUsize>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl AsyncSupplier for CountingSource {
        type Value = u64;
        type Error = Infallible;

        async fn fetch(&mut self) -> Result<u64, Infallible> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(42)
        }
    }

    #[derive(Debug, Error)]
    #[error("{message}")]
    struct ScriptedError {
        message: &'static str,
        authorization: bool,
    }

    impl SourceError for ScriptedError {
        fn is_authorization(&self) -> bool {
            self.authorization
        }
    }

    struct FailingSource {
        fetches: Arc<AtomicUsize>,
        authorization: bool,
    }

    #[async_trait::async_trait]
    impl AsyncSupplier for FailingSource {
        type Value = u64;
        type Error = ScriptedError;

        async fn fetch(&mut self) -> Result<u64, ScriptedError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Err(ScriptedError {
                message: "provider said no",
                authorization: self.authorization,
            })
        }
    }

    struct NeverCompletes;

    #[async_trait::async_trait]
    impl AsyncSupplier for NeverCompletes {
        type Value = u64;
        type Error = Infallible;

        async fn fetch(&mut self) -> Result<u64, Infallible> {
            std::future::pending().await
        }
    }

    #[derive(Clone, Debug, Default)]
    struct SharedClock(Arc<AtomicU64>);

    impl Clock for SharedClock {
        fn now(&self) -> UnixTime {
            UnixTime(self.0.load(Ordering::SeqCst))
        }
    }

    fn config() -> RefreshConfig {
        RefreshConfig {
            freshness: DurationSecs(100),
            attempt_timeout: Duration::from_millis(10),
            deadline: Duration::from_millis(25),
            backoff: ErrorBackoffConfig::new(
                Duration::from_millis(100),
                Duration::from_millis(400),
                2,
            ),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_a_single_fetch() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let supplier = ExpiringSupplier::new(
            CountingSource {
                fetches: Arc::clone(&fetches),
                delay: Duration::from_millis(50),
            },
            RefreshConfig {
                deadline: Duration::from_secs(5),
                attempt_timeout: Duration::from_secs(1),
                ..config()
            },
            Arc::new(AuthFailureLatch::new()),
        );

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let supplier = supplier.clone();
            tasks.push(tokio::spawn(async move { supplier.get().await }));
        }

        let mut values = Vec::new();
        for task in tasks {
            values.push(task.await.expect("task panicked").expect("fetch failed"));
        }

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_values_are_served_without_refetching() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let supplier = ExpiringSupplier::new(
            CountingSource {
                fetches: Arc::clone(&fetches),
                delay: Duration::ZERO,
            },
            config(),
            Arc::new(AuthFailureLatch::new()),
        );

        supplier.get().await.expect("first fetch");
        supplier.get().await.expect("cached");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidation_forces_a_refetch_within_the_window() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let supplier = ExpiringSupplier::new(
            CountingSource {
                fetches: Arc::clone(&fetches),
                delay: Duration::ZERO,
            },
            config(),
            Arc::new(AuthFailureLatch::new()),
        );

        supplier.get().await.expect("first fetch");
        supplier.invalidate();
        supplier.invalidate(); // idempotent
        supplier.get().await.expect("second fetch");
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn an_elapsed_window_triggers_a_refetch() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let clock = SharedClock::default();
        let supplier = ExpiringSupplier::with_clock(
            CountingSource {
                fetches: Arc::clone(&fetches),
                delay: Duration::ZERO,
            },
            config(),
            Arc::new(AuthFailureLatch::new()),
            clock.clone(),
        );

        supplier.get().await.expect("first fetch");
        clock.0.store(99, Ordering::SeqCst);
        supplier.get().await.expect("still fresh");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        clock.0.store(100, Ordering::SeqCst);
        supplier.get().await.expect("stale, refetched");
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn authorization_failures_latch_permanently() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let latch = Arc::new(AuthFailureLatch::new());
        let supplier = ExpiringSupplier::new(
            FailingSource {
                fetches: Arc::clone(&fetches),
                authorization: true,
            },
            config(),
            Arc::clone(&latch),
        );

        assert_eq!(supplier.get().await, Err(SupplierError::Authorization));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(latch.is_set());

        // No further network attempts, ever.
        assert_eq!(supplier.get().await, Err(SupplierError::Authorization));
        assert_eq!(supplier.get().await, Err(SupplierError::Authorization));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn a_shared_latch_disables_sibling_cells() {
        let latch = Arc::new(AuthFailureLatch::new());
        let failing = ExpiringSupplier::new(
            FailingSource {
                fetches: Arc::new(AtomicUsize::new(0)),
                authorization: true,
            },
            config(),
            Arc::clone(&latch),
        );
        let fetches = Arc::new(AtomicUsize::new(0));
        let sibling = ExpiringSupplier::new(
            CountingSource {
                fetches: Arc::clone(&fetches),
                delay: Duration::ZERO,
            },
            config(),
            Arc::clone(&latch),
        );

        assert_eq!(failing.get().await, Err(SupplierError::Authorization));
        assert_eq!(sibling.get().await, Err(SupplierError::Authorization));
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_time_out_at_the_deadline() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let supplier = ExpiringSupplier::new(
            FailingSource {
                fetches: Arc::clone(&fetches),
                authorization: false,
            },
            RefreshConfig {
                deadline: Duration::from_millis(250),
                attempt_timeout: Duration::from_secs(1),
                ..config()
            },
            Arc::new(AuthFailureLatch::new()),
        );

        assert_eq!(supplier.get().await, Err(SupplierError::DeadlineExceeded));
        assert!(fetches.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_fetches_time_out_at_the_deadline() {
        let supplier = ExpiringSupplier::new(
            NeverCompletes,
            config(),
            Arc::new(AuthFailureLatch::new()),
        );

        assert_eq!(supplier.get().await, Err(SupplierError::DeadlineExceeded));
    }
}
