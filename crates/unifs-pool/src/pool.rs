//! The pool, its manager contract, and the lease handed out to callers.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::{AcquireError, PoolConfig};

/// Creates, checks and disposes of the objects a [`Pool`] manages.
pub trait Manager: Send + Sync + 'static {
    /// The pooled object type, typically one live remote session.
    type Object: Send + 'static;
    /// The error produced when creating or releasing an object fails.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Creates a new object. Called outside the pool lock, after a slot has
    /// been reserved; a failure gives the slot back and wakes waiters.
    fn create(&self) -> Result<Self::Object, Self::Error>;

    /// Whether an idle object is still usable. Must not block.
    fn validate(&self, _object: &Self::Object) -> bool {
        true
    }

    /// Releases the resources an object holds (closes the session).
    fn release(&self, object: Self::Object) -> Result<(), Self::Error> {
        drop(object);
        Ok(())
    }
}

/// An object together with its pool bookkeeping.
struct Pooled<T> {
    id: u64,
    object: T,
    idle_since: Instant,
}

impl<T> Pooled<T> {
    fn new(id: u64, object: T) -> Self {
        Pooled {
            id,
            object,
            idle_since: Instant::now(),
        }
    }
}

struct PoolState<M: Manager> {
    idle: VecDeque<Pooled<M::Object>>,
    /// All objects the pool currently owns: idle plus leased out.
    size: usize,
    active: bool,
    shutdown_complete: bool,
}

struct PoolInner<M: Manager> {
    manager: M,
    config: PoolConfig,
    state: Mutex<PoolState<M>>,
    /// Signalled on every transition that could unblock a waiter: an object
    /// returned to the idle queue, a slot freed, shutdown.
    available: Condvar,
    next_id: AtomicU64,
}

impl<M: Manager> PoolInner<M> {
    fn create_object(&self) -> Result<Pooled<M::Object>, M::Error> {
        let object = self.manager.create()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        log::trace!("created pool object #{id}");
        Ok(Pooled::new(id, object))
    }

    /// Pops idle objects until a usable one is found, discarding the rest.
    fn take_usable_idle(&self, state: &mut PoolState<M>) -> Option<Pooled<M::Object>> {
        while let Some(entry) = state.idle.pop_front() {
            if self.is_usable(&entry) {
                return Some(entry);
            }
            log::debug!("discarding stale pool object #{}", entry.id);
            state.size -= 1;
            self.available.notify_all();
            if let Err(e) = self.manager.release(entry.object) {
                log::warn!("failed to release stale pool object: {e}");
            }
        }
        None
    }

    fn is_usable(&self, entry: &Pooled<M::Object>) -> bool {
        if let Some(max_idle) = self.config.max_idle_time() {
            if entry.idle_since.elapsed() > max_idle {
                return false;
            }
        }
        self.manager.validate(&entry.object)
    }

    /// Puts a leased object back. Returns the object when the pool is no
    /// longer active and the caller must release it instead.
    fn try_return(&self, mut entry: Pooled<M::Object>) -> Option<Pooled<M::Object>> {
        let mut state = self.state.lock();
        if state.active {
            log::trace!("returning pool object #{} to idle queue", entry.id);
            entry.idle_since = Instant::now();
            state.idle.push_back(entry);
            self.available.notify_all();
            None
        } else {
            state.size = state.size.saturating_sub(1);
            self.available.notify_all();
            Some(entry)
        }
    }
}

/// A point-in-time snapshot of a pool's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Objects the pool owns, idle and leased combined.
    pub size: usize,
    /// Objects waiting in the idle queue.
    pub idle: usize,
    /// Whether the pool still hands out objects.
    pub active: bool,
}

/// A thread-safe, size-bounded pool of reusable objects.
///
/// Cloning the pool is cheap and shares the same state.
pub struct Pool<M: Manager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: Manager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Pool {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Manager> Pool<M> {
    /// Creates a pool and eagerly fills it with
    /// [`PoolConfig::initial_size`] objects.
    ///
    /// If any of the initial objects cannot be created, the ones already
    /// created are released and the creation error is returned.
    pub fn new(manager: M, config: PoolConfig) -> Result<Pool<M>, M::Error> {
        let pool = Pool {
            inner: Arc::new(PoolInner {
                manager,
                config,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    size: 0,
                    active: true,
                    shutdown_complete: false,
                }),
                available: Condvar::new(),
                next_id: AtomicU64::new(0),
            }),
        };
        for _ in 0..pool.inner.config.initial_size() {
            match pool.inner.create_object() {
                Ok(entry) => {
                    let mut state = pool.inner.state.lock();
                    state.idle.push_back(entry);
                    state.size += 1;
                }
                Err(e) => {
                    if let Err(shutdown_err) = pool.shutdown() {
                        log::warn!("failed to release object while undoing pool fill: {shutdown_err}");
                    }
                    return Err(e);
                }
            }
        }
        Ok(pool)
    }

    /// Acquires an object, waiting up to [`PoolConfig::max_wait_time`] when
    /// the pool is saturated.
    pub fn acquire(&self) -> Result<Lease<M>, AcquireError<M::Error>> {
        self.acquire_with_timeout(self.inner.config.max_wait_time())
    }

    /// Acquires an object, waiting up to `timeout` when the pool is
    /// saturated. `None` waits indefinitely.
    pub fn acquire_with_timeout(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Lease<M>, AcquireError<M::Error>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut deadline_passed = false;
        let mut state = self.inner.state.lock();
        loop {
            if !state.active {
                return Err(AcquireError::Shutdown);
            }
            if let Some(entry) = self.inner.take_usable_idle(&mut state) {
                log::trace!("acquired pool object #{}", entry.id);
                return Ok(Lease::new(self.inner.clone(), entry, true));
            }
            if state.size < self.inner.config.max_size() {
                // Reserve the slot before creating, so concurrent acquirers
                // cannot overshoot max_size while the factory runs unlocked.
                state.size += 1;
                drop(state);
                return match self.inner.create_object() {
                    Ok(entry) => Ok(Lease::new(self.inner.clone(), entry, true)),
                    Err(e) => {
                        let mut state = self.inner.state.lock();
                        state.size -= 1;
                        self.inner.available.notify_all();
                        Err(AcquireError::Create(e))
                    }
                };
            }
            if deadline_passed {
                return Err(AcquireError::Timeout);
            }
            match deadline {
                None => self.inner.available.wait(&mut state),
                Some(deadline) => {
                    if self
                        .inner
                        .available
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        // One more pass over the queue before giving up.
                        deadline_passed = true;
                    }
                }
            }
        }
    }

    /// Acquires an object without blocking: a usable idle object if there is
    /// one, a freshly created one if the pool has room, `None` otherwise.
    pub fn acquire_now(&self) -> Result<Option<Lease<M>>, AcquireError<M::Error>> {
        let mut state = self.inner.state.lock();
        if !state.active {
            return Err(AcquireError::Shutdown);
        }
        if let Some(entry) = self.inner.take_usable_idle(&mut state) {
            log::trace!("acquired pool object #{}", entry.id);
            return Ok(Some(Lease::new(self.inner.clone(), entry, true)));
        }
        if state.size < self.inner.config.max_size() {
            state.size += 1;
            drop(state);
            return match self.inner.create_object() {
                Ok(entry) => Ok(Some(Lease::new(self.inner.clone(), entry, true))),
                Err(e) => {
                    let mut state = self.inner.state.lock();
                    state.size -= 1;
                    self.inner.available.notify_all();
                    Err(AcquireError::Create(e))
                }
            };
        }
        Ok(None)
    }

    /// Acquires an object without blocking, creating an unpooled one when
    /// the pool is saturated. An unpooled object never joins the idle queue;
    /// its resources are released when its last lease drops.
    pub fn acquire_or_create(&self) -> Result<Lease<M>, AcquireError<M::Error>> {
        if let Some(lease) = self.acquire_now()? {
            return Ok(lease);
        }
        let entry = self.inner.create_object().map_err(AcquireError::Create)?;
        log::debug!("pool saturated, using unpooled object #{}", entry.id);
        Ok(Lease::new(self.inner.clone(), entry, false))
    }

    /// Runs `op` on every currently usable idle object, then puts them all
    /// back.
    ///
    /// The idle queue is drained atomically, `op` runs outside the pool
    /// lock, and every drained object is returned whether `op` succeeded on
    /// it or not. The first error from `op` is returned; later ones are
    /// logged.
    pub fn for_all_idle_objects<F>(&self, mut op: F) -> Result<(), M::Error>
    where
        F: FnMut(&M::Object) -> Result<(), M::Error>,
    {
        let drained = {
            let mut state = self.inner.state.lock();
            let mut drained = Vec::with_capacity(state.idle.len());
            while let Some(entry) = self.inner.take_usable_idle(&mut state) {
                drained.push(entry);
            }
            drained
        };

        let mut first_error = None;
        for entry in &drained {
            if let Err(e) = op(&entry.object) {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    log::warn!("additional failure while visiting idle objects: {e}");
                }
            }
        }

        for entry in drained {
            if let Some(entry) = self.inner.try_return(entry) {
                if let Err(e) = self.inner.manager.release(entry.object) {
                    log::warn!("failed to release object after visiting idle queue: {e}");
                }
            }
        }

        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Shuts the pool down and releases every idle object.
    ///
    /// Idempotent; a second call waits for the first to finish. Waiters
    /// blocked in [`acquire`][Pool::acquire] unblock with
    /// [`AcquireError::Shutdown`]. Objects currently leased stay valid and
    /// are released when their last lease drops. The first release error is
    /// returned, later ones are logged.
    pub fn shutdown(&self) -> Result<(), M::Error> {
        let drained = {
            let mut state = self.inner.state.lock();
            if !state.active {
                while !state.shutdown_complete {
                    self.inner.available.wait(&mut state);
                }
                return Ok(());
            }
            log::debug!("shutting down pool with {} idle objects", state.idle.len());
            state.active = false;
            state.size -= state.idle.len();
            self.inner.available.notify_all();
            state.idle.drain(..).collect::<Vec<_>>()
        };

        let mut first_error = None;
        for entry in drained {
            log::trace!("releasing pool object #{} on shutdown", entry.id);
            if let Err(e) = self.inner.manager.release(entry.object) {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    log::warn!("additional release failure during pool shutdown: {e}");
                }
            }
        }

        {
            let mut state = self.inner.state.lock();
            state.shutdown_complete = true;
            self.inner.available.notify_all();
        }

        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Whether the pool still hands out objects.
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    /// Snapshot of the pool's counters.
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            size: state.size,
            idle: state.idle.len(),
            active: state.active,
        }
    }
}

struct LeaseShared<M: Manager> {
    pool: Arc<PoolInner<M>>,
    /// False for objects minted by `acquire_or_create` on a saturated pool.
    pooled: bool,
    /// Present from construction until the last lease drops.
    object: Option<Pooled<M::Object>>,
}

impl<M: Manager> LeaseShared<M> {
    /// Puts the object back or releases it. Called exactly once, either by
    /// [`Lease::release`] or by the drop of the last clone.
    fn finish(&mut self) -> Result<(), M::Error> {
        let Some(entry) = self.object.take() else {
            return Ok(());
        };
        let to_release = if self.pooled {
            self.pool.try_return(entry)
        } else {
            Some(entry)
        };
        match to_release {
            None => Ok(()),
            Some(entry) => {
                log::trace!("releasing pool object #{}", entry.id);
                self.pool.manager.release(entry.object)
            }
        }
    }
}

impl<M: Manager> Drop for LeaseShared<M> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::error!("failed to release pool object: {e}");
        }
    }
}

/// A counted loan of a pooled object.
///
/// Cloning adds a reference: derived resources (streams opened on a
/// channel) hold a clone so the object outlives the original caller's
/// handle. The object returns to the pool when the last clone drops, or is
/// released outright when the pool has shut down or the object is unpooled.
pub struct Lease<M: Manager> {
    shared: Arc<LeaseShared<M>>,
}

impl<M: Manager> Lease<M> {
    fn new(pool: Arc<PoolInner<M>>, entry: Pooled<M::Object>, pooled: bool) -> Self {
        Lease {
            shared: Arc::new(LeaseShared {
                pool,
                pooled,
                object: Some(entry),
            }),
        }
    }

    fn entry(&self) -> &Pooled<M::Object> {
        self.shared
            .object
            .as_ref()
            .expect("pool object present until the last lease drops")
    }

    /// The pooled object's unique id.
    pub fn id(&self) -> u64 {
        self.entry().id
    }

    /// Whether the object belongs to the pool, as opposed to having been
    /// minted on saturation by [`Pool::acquire_or_create`].
    pub fn is_pooled(&self) -> bool {
        self.shared.pooled
    }

    /// Drops this reference. When it is the last one, the object is put
    /// back or released, and a release failure is reported to the caller;
    /// plain dropping only logs such a failure.
    pub fn release(self) -> Result<(), M::Error> {
        match Arc::try_unwrap(self.shared) {
            Ok(mut shared) => shared.finish(),
            // Other clones still hold the object; they will finish it.
            Err(_) => Ok(()),
        }
    }
}

impl<M: Manager> Clone for Lease<M> {
    fn clone(&self) -> Self {
        Lease {
            shared: self.shared.clone(),
        }
    }
}

impl<M: Manager> Deref for Lease<M> {
    type Target = M::Object;

    fn deref(&self) -> &Self::Target {
        &self.entry().object
    }
}
