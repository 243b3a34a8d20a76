//! Per-key debouncing.
//!
//! A [`KeyedDebouncer`] keeps one independent debounce timer per key. Bursts of
//! calls for the same key collapse into a single invocation of the callback;
//! calls for different keys never delay each other.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Shared debounce settings. Every key gets its own timer with these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceOptions {
    /// Quiet period that closes a burst
    pub wait: Duration,
    /// Fire on the first call of a burst
    pub leading: bool,
    /// Fire with the latest arguments once the burst goes quiet
    pub trailing: bool,
}

impl Default for DebounceOptions {
    fn default() -> Self {
        Self::new(Duration::from_millis(300))
    }
}

impl DebounceOptions {
    /// Trailing-edge debounce with the given quiet period
    pub const fn new(wait: Duration) -> Self {
        Self {
            wait,
            leading: false,
            trailing: true,
        }
    }

    /// Set leading-edge behaviour
    pub const fn leading(mut self, leading: bool) -> Self {
        self.leading = leading;
        self
    }

    /// Set trailing-edge behaviour
    pub const fn trailing(mut self, trailing: bool) -> Self {
        self.trailing = trailing;
        self
    }
}

struct Slot<A> {
    /// Latest arguments waiting for the trailing edge
    pending: Option<A>,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every re-arm so a stale timer can tell it lost the race.
    generation: u64,
    last_activity: Instant,
}

impl<A> Slot<A> {
    fn new() -> Self {
        Self {
            pending: None,
            timer: None,
            generation: 0,
            last_activity: Instant::now(),
        }
    }

    /// Close the window: stop the timer and hand back any trailing call.
    fn settle(&mut self) -> Option<A> {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation += 1;
        self.pending.take()
    }
}

type KeyFn<K, A> = Box<dyn Fn(&A) -> K + Send + Sync>;
type Callback<A> = Box<dyn Fn(A) + Send + Sync>;

struct Registry<K, A> {
    options: DebounceOptions,
    key_fn: KeyFn<K, A>,
    callback: Callback<A>,
    slots: Mutex<HashMap<K, Slot<A>>>,
}

impl<K, A> Registry<K, A>
where
    K: Eq + Hash,
{
    fn lock(&self) -> MutexGuard<'_, HashMap<K, Slot<A>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Timer expiry for `key`; ignored if the slot was re-armed since.
    fn expire(&self, key: &K, generation: u64) {
        let trailing = {
            let mut slots = self.lock();
            let Some(slot) = slots.get_mut(key) else {
                return;
            };
            if slot.generation != generation {
                return;
            }
            slot.timer = None;
            slot.pending.take()
        };

        if let Some(args) = trailing.filter(|_| self.options.trailing) {
            tracing::debug!("debounced call fired on trailing edge");
            (self.callback)(args);
        }
    }
}

impl<K, A> Drop for Registry<K, A> {
    fn drop(&mut self) {
        let slots = self.slots.get_mut().unwrap_or_else(PoisonError::into_inner);
        for slot in slots.values_mut() {
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
        }
    }
}

/// Registry of independent debounced callers, one per key.
///
/// Cloning yields another handle to the same registry. `call` must run inside
/// a Tokio runtime because it arms timers.
pub struct KeyedDebouncer<K, A> {
    inner: Arc<Registry<K, A>>,
}

impl<K, A> Clone for KeyedDebouncer<K, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, A> std::fmt::Debug for KeyedDebouncer<K, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedDebouncer")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl<K, A> KeyedDebouncer<K, A>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    /// Build a registry. `key_fn` maps call arguments to the key whose timer
    /// they feed; `callback` is the debounced function.
    pub fn new<KF, CB>(options: DebounceOptions, key_fn: KF, callback: CB) -> Self
    where
        KF: Fn(&A) -> K + Send + Sync + 'static,
        CB: Fn(A) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Registry {
                options,
                key_fn: Box::new(key_fn),
                callback: Box::new(callback),
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Settings shared by every key
    pub fn options(&self) -> DebounceOptions {
        self.inner.options
    }

    /// Feed a call into its key's debounce window. Never blocks.
    pub fn call(&self, args: A) {
        let key = (self.inner.key_fn)(&args);
        let options = self.inner.options;

        let leading = {
            let mut slots = self.inner.lock();
            let slot = slots.entry(key.clone()).or_insert_with(Slot::new);
            let window_open = slot.timer.is_some();

            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
            slot.generation += 1;
            slot.last_activity = Instant::now();
            slot.timer = Some(self.arm(key, slot.generation));

            if options.leading && !window_open {
                slot.pending = None;
                Some(args)
            } else {
                if options.trailing {
                    slot.pending = Some(args);
                }
                None
            }
        };

        if let Some(args) = leading {
            tracing::debug!("debounced call fired on leading edge");
            (self.inner.callback)(args);
        }
    }

    fn arm(&self, key: K, generation: u64) -> JoinHandle<()> {
        let registry: Weak<Registry<K, A>> = Arc::downgrade(&self.inner);
        let wait = self.inner.options.wait;
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            if let Some(registry) = registry.upgrade() {
                registry.expire(&key, generation);
            }
        })
    }

    /// Fire every key's outstanding trailing call now and close all windows.
    ///
    /// Returns how many callbacks ran.
    pub fn flush_all(&self) -> usize {
        let due: Vec<A> = {
            let mut slots = self.inner.lock();
            slots.values_mut().filter_map(Slot::settle).collect()
        };

        let fired = due.len();
        for args in due {
            (self.inner.callback)(args);
        }
        if fired > 0 {
            tracing::debug!(fired, "flushed debounced calls");
        }
        fired
    }

    /// Fire `key`'s outstanding trailing call now. Returns whether one ran.
    pub fn flush(&self, key: &K) -> bool {
        let due = self.inner.lock().get_mut(key).and_then(Slot::settle);
        match due {
            Some(args) => {
                (self.inner.callback)(args);
                true
            }
            None => false,
        }
    }

    /// Drop every outstanding call and timer without invoking the callback.
    ///
    /// Returns how many pending calls were discarded.
    pub fn cancel_all(&self) -> usize {
        let mut slots = self.inner.lock();
        let discarded = slots
            .values_mut()
            .filter_map(Slot::settle)
            .count();
        if discarded > 0 {
            tracing::debug!(discarded, "cancelled debounced calls");
        }
        discarded
    }

    /// Drop `key`'s outstanding call. Returns whether one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        self.inner
            .lock()
            .get_mut(key)
            .and_then(Slot::settle)
            .is_some()
    }

    /// Whether `key` has a trailing call waiting
    pub fn is_pending(&self, key: &K) -> bool {
        self.inner
            .lock()
            .get(key)
            .is_some_and(|slot| slot.pending.is_some())
    }

    /// Number of keys that currently hold a slot
    pub fn key_count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Forget keys with nothing pending and no activity for `max_idle`.
    ///
    /// A pruned key starts a fresh window on its next call. Returns how many
    /// slots were removed.
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut slots = self.inner.lock();
        let before = slots.len();
        slots.retain(|_, slot| {
            slot.pending.is_some()
                || slot.timer.is_some()
                || now.duration_since(slot.last_activity) < max_idle
        });
        before - slots.len()
    }
}
