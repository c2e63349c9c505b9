// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Ambient Context
//!
//! Request-scoped key/value state readable without threading parameters
//! through every call.
//!
//! - [`Snapshot`]: immutable capture of the state. Deriving a new binding
//!   produces a new snapshot; existing ones never change.
//! - [`AmbientContext`]: the per-execution-unit *active* snapshot pointer,
//!   plus `capture` / `with_snapshot` / `set` / `scope`.
//! - [`ContextKey`]: typed, named handle over one entry.
//!
//! ## Execution Units
//!
//! A Tokio task running inside [`AmbientContext::scope`] owns a task-local
//! active snapshot, which follows the task across `.await` points and worker
//! threads. Everything else (plain threads, blocking-pool threads, tasks
//! outside a scope) uses a thread-local active snapshot.
//!
//! Neither storage is inherited by spawned threads or tasks. Code that moves
//! work elsewhere must capture and install the snapshot explicitly.
//!
//! Runtime worker threads are shared by every task they poll, so a binding
//! made there outside a scope would be visible to unrelated tasks. On such
//! threads [`AmbientContext::set`] only takes effect inside a scope or a
//! [`with_snapshot`](AmbientContext::with_snapshot) call; elsewhere it logs a
//! warning and leaves the active snapshot alone.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::warn;

type Value = Arc<dyn Any + Send + Sync>;

static NEXT_SNAPSHOT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_CONTEXT: RefCell<Snapshot> = RefCell::new(Snapshot::empty());
    /// Depth of `with_snapshot` calls on this thread.
    static PINNED: Cell<usize> = const { Cell::new(0) };
}

tokio::task_local! {
    static TASK_CONTEXT: RefCell<Snapshot>;
}

/// Immutable capture of ambient state.
///
/// Cloning is cheap (one `Arc` bump) and preserves identity: two clones of the
/// same snapshot are [`same_as`](Snapshot::same_as) each other, while a
/// snapshot derived through [`with`](Snapshot::with) never is.
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

struct SnapshotInner {
    id: u64,
    entries: HashMap<&'static str, Value>,
}

impl Snapshot {
    /// A snapshot with no bindings.
    pub fn empty() -> Self {
        Self::from_entries(HashMap::new())
    }

    fn from_entries(entries: HashMap<&'static str, Value>) -> Self {
        Self {
            inner: Arc::new(SnapshotInner {
                id: NEXT_SNAPSHOT_ID.fetch_add(1, Ordering::Relaxed),
                entries,
            }),
        }
    }

    /// Process-unique identifier, useful in logs and diagnostics.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Derive a new snapshot with `key` rebound to `value`.
    pub fn with<T: Any + Send + Sync>(&self, key: &'static str, value: T) -> Self {
        let mut entries = self.inner.entries.clone();
        entries.insert(key, Arc::new(value));
        Self::from_entries(entries)
    }

    /// Read the value bound to `key`.
    ///
    /// Returns `None` when the key is unbound or bound to a different type.
    pub fn get<T: Any + Clone>(&self, key: &str) -> Option<T> {
        self.inner
            .entries
            .get(key)
            .and_then(|value| (**value).downcast_ref::<T>())
            .cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Bound keys in lexical order.
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<_> = self.inner.entries.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Identity comparison: true only for clones of the same capture.
    pub fn same_as(&self, other: &Snapshot) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("id", &self.inner.id)
            .field("keys", &self.keys())
            .finish()
    }
}

/// Access point for the active snapshot of the current execution unit.
pub struct AmbientContext;

impl AmbientContext {
    /// Return the active snapshot without blocking.
    pub fn capture() -> Snapshot {
        TASK_CONTEXT
            .try_with(|cell| cell.borrow().clone())
            .unwrap_or_else(|_| {
                THREAD_CONTEXT
                    .try_with(|cell| cell.borrow().clone())
                    .unwrap_or_default()
            })
    }

    /// Run `f` with `snapshot` active, restoring the previous snapshot
    /// afterwards. Restoration also happens when `f` panics.
    pub fn with_snapshot<R>(snapshot: Snapshot, f: impl FnOnce() -> R) -> R {
        let previous = Self::replace_active(snapshot);
        PINNED.with(|depth| depth.set(depth.get() + 1));
        let _restore = RestoreOnDrop {
            previous: Some(previous),
        };
        f()
    }

    /// Derive a snapshot from the active one with `key` rebound, make it
    /// active and return it.
    ///
    /// On a Tokio runtime thread the binding is installed only inside
    /// [`scope`](Self::scope) or [`with_snapshot`](Self::with_snapshot).
    /// Outside both, the derived snapshot is still returned but the active
    /// one is left unchanged.
    pub fn set<T: Any + Send + Sync>(key: &'static str, value: T) -> Snapshot {
        let next = Self::capture().with(key, value);
        if Self::accepts_bindings() {
            Self::replace_active(next.clone());
        } else {
            warn!(
                key,
                "Ambient value set outside AmbientContext::scope on a runtime thread; ignored"
            );
        }
        next
    }

    /// Read `key` from the active snapshot.
    pub fn get<T: Any + Clone>(key: &str) -> Option<T> {
        Self::capture().get(key)
    }

    /// Run `future` as its own execution unit with `snapshot` active.
    ///
    /// Calls to [`set`](Self::set) inside the future only affect this scope.
    pub async fn scope<F: Future>(snapshot: Snapshot, future: F) -> F::Output {
        TASK_CONTEXT.scope(RefCell::new(snapshot), future).await
    }

    /// Whether the caller runs inside an [`AmbientContext::scope`].
    pub fn in_task_scope() -> bool {
        TASK_CONTEXT.try_with(|_| ()).is_ok()
    }

    /// Whether a binding made now stays private to the current execution unit.
    fn accepts_bindings() -> bool {
        Self::in_task_scope()
            || PINNED.with(|depth| depth.get() > 0)
            || Handle::try_current().is_err()
    }

    fn replace_active(snapshot: Snapshot) -> Snapshot {
        if Self::in_task_scope() {
            TASK_CONTEXT.with(|cell| cell.replace(snapshot))
        } else {
            THREAD_CONTEXT.with(|cell| cell.replace(snapshot))
        }
    }
}

struct RestoreOnDrop {
    previous: Option<Snapshot>,
}

impl Drop for RestoreOnDrop {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            PINNED.with(|depth| depth.set(depth.get().saturating_sub(1)));
            AmbientContext::replace_active(previous);
        }
    }
}

/// Typed handle over one ambient entry.
///
/// ```
/// use callcred_core::ContextKey;
///
/// static REQUEST_TENANT: ContextKey<String> = ContextKey::new("request_tenant");
///
/// REQUEST_TENANT.set("acme".to_string());
/// assert_eq!(REQUEST_TENANT.get().as_deref(), Some("acme"));
/// ```
pub struct ContextKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: Any + Clone + Send + Sync> ContextKey<T> {
    /// Value in the active snapshot.
    pub fn get(&self) -> Option<T> {
        AmbientContext::get(self.name)
    }

    /// Value in the active snapshot, or `default` when unbound.
    pub fn get_or(&self, default: T) -> T {
        self.get().unwrap_or(default)
    }

    /// Value in an explicit snapshot.
    pub fn get_in(&self, snapshot: &Snapshot) -> Option<T> {
        snapshot.get(self.name)
    }

    /// Rebind in the active snapshot. See [`AmbientContext::set`].
    pub fn set(&self, value: T) -> Snapshot {
        AmbientContext::set(self.name, value)
    }

    /// Run `future` in its own scope, seeded with the active snapshot plus
    /// this key bound to `value`.
    pub async fn scoped<F: Future>(&self, value: T, future: F) -> F::Output {
        let snapshot = AmbientContext::capture().with(self.name, value);
        AmbientContext::scope(snapshot, future).await
    }
}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextKey").field(&self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static TEST_VAR: ContextKey<i64> = ContextKey::new("test_var");

    #[test]
    fn test_set_derives_new_snapshot() {
        let before = AmbientContext::capture();
        let after = TEST_VAR.set(24601);

        assert!(!before.same_as(&after));
        assert_eq!(TEST_VAR.get_in(&before), None);
        assert_eq!(TEST_VAR.get_in(&after), Some(24601));
        assert!(AmbientContext::capture().same_as(&after));
    }

    #[test]
    fn test_rebinding_leaves_captured_snapshot_untouched() {
        let first = TEST_VAR.set(1);
        let second = TEST_VAR.set(2);

        assert_eq!(TEST_VAR.get_in(&first), Some(1));
        assert_eq!(TEST_VAR.get_in(&second), Some(2));
        assert_eq!(TEST_VAR.get(), Some(2));
    }

    #[test]
    fn test_get_with_wrong_type_is_none() {
        let snapshot = Snapshot::empty().with("test_var", 7_i64);
        assert_eq!(snapshot.get::<String>("test_var"), None);
        assert_eq!(snapshot.get::<i64>("test_var"), Some(7));
    }

    #[test]
    fn test_with_snapshot_restores_previous() {
        let outer = TEST_VAR.set(10);
        let inner = Snapshot::empty().with("test_var", 20_i64);

        let seen = AmbientContext::with_snapshot(inner.clone(), || {
            assert!(AmbientContext::capture().same_as(&inner));
            TEST_VAR.get()
        });

        assert_eq!(seen, Some(20));
        assert!(AmbientContext::capture().same_as(&outer));
    }

    #[test]
    fn test_with_snapshot_restores_after_panic() {
        let outer = TEST_VAR.set(10);
        let inner = Snapshot::empty().with("test_var", 99_i64);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            AmbientContext::with_snapshot(inner, || panic!("plugin blew up"))
        }));

        assert!(result.is_err());
        assert!(AmbientContext::capture().same_as(&outer));
    }

    #[test]
    fn test_new_threads_do_not_inherit() {
        TEST_VAR.set(5);
        let observed = std::thread::spawn(|| TEST_VAR.get()).join().unwrap();
        assert_eq!(observed, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_scopes_are_isolated_across_tasks() {
        let mut handles = Vec::new();
        for value in 0..16_i64 {
            handles.push(tokio::spawn(AmbientContext::scope(
                Snapshot::empty(),
                async move {
                    TEST_VAR.set(value);
                    for _ in 0..8 {
                        tokio::task::yield_now().await;
                        assert_eq!(TEST_VAR.get(), Some(value));
                    }
                    value
                },
            )));
        }
        for (expected, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), expected as i64);
        }
    }

    #[tokio::test]
    async fn test_scope_does_not_leak_into_caller() {
        let outer = AmbientContext::capture();
        AmbientContext::scope(outer.clone(), async {
            assert!(AmbientContext::in_task_scope());
            TEST_VAR.set(3);
        })
        .await;
        assert!(!AmbientContext::in_task_scope());
        assert!(AmbientContext::capture().same_as(&outer));
    }

    #[tokio::test]
    async fn test_unscoped_set_does_not_leak_between_tasks() {
        let first = tokio::spawn(async {
            let derived = TEST_VAR.set(111);
            (TEST_VAR.get_in(&derived), TEST_VAR.get())
        })
        .await
        .unwrap();
        assert_eq!(first, (Some(111), None));

        let second = tokio::spawn(async { TEST_VAR.get() }).await.unwrap();
        assert_eq!(second, None);
        assert_eq!(TEST_VAR.get(), None);
    }

    #[tokio::test]
    async fn test_set_inside_with_snapshot_on_runtime_thread() {
        let seen = AmbientContext::with_snapshot(Snapshot::empty(), || {
            TEST_VAR.set(8);
            TEST_VAR.get()
        });
        assert_eq!(seen, Some(8));
        assert_eq!(TEST_VAR.get(), None);
    }

    #[tokio::test]
    async fn test_scoped_binds_key_for_the_future_only() {
        let seen = TEST_VAR
            .scoped(42, async {
                tokio::task::yield_now().await;
                TEST_VAR.get()
            })
            .await;
        assert_eq!(seen, Some(42));
        assert_eq!(TEST_VAR.get(), None);
    }
}
