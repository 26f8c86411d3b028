//! # Dependency Registry
//!
//! The live mapping from dependency key to provider that the web layer
//! consults on every request, plus scoped overrides for tests.
//!
//! ## Override model
//!
//! Each key has a production (base) provider and a stack of override frames.
//! Resolution returns the top frame if there is one, otherwise the base.
//!
//! - [`DependencyRegistry::override_with`] pushes one frame and returns an
//!   [`OverrideGuard`]; dropping the guard removes exactly that frame, so the
//!   provider that was current when the guard was created is current again.
//!   Nested overrides of the same key therefore unwind correctly, and
//!   overrides of different keys never interact.
//! - [`DependencyRegistry::override_all`] installs one frame per entry and
//!   returns an [`OverrideSet`] that removes exactly those frames, so guards
//!   created or dropped while the set is active are left as they are.
//!
//! Providers are cloned out of the registry, never copied into new objects: an
//! `Arc` provider resolved after a scope ends is pointer-equal to the one that
//! was registered before it began.

use crate::database::DbSession;
use crate::error::BackendError;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Stable tokens naming the capabilities the application resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKey {
    /// "Give me a database session"
    DatabaseSession,
    /// Application-defined capability
    Named(&'static str),
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKey::DatabaseSession => f.write_str("database_session"),
            DependencyKey::Named(name) => f.write_str(name),
        }
    }
}

pub type SessionFuture = BoxFuture<'static, Result<DbSession, BackendError>>;

/// Provider of request-scoped database sessions
pub type SessionProvider = Arc<dyn Fn() -> SessionFuture + Send + Sync>;

/// Whether any override is currently installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideState {
    Clean,
    Overridden(usize),
}

struct Frame<P> {
    id: u64,
    provider: P,
}

struct RegistryState<K, P> {
    base: HashMap<K, P>,
    overrides: HashMap<K, Vec<Frame<P>>>,
}

impl<K: Eq + Hash, P> RegistryState<K, P> {
    fn remove_frame(&mut self, key: &K, frame_id: u64) -> bool {
        let Some(stack) = self.overrides.get_mut(key) else {
            return false;
        };
        let before = stack.len();
        stack.retain(|frame| frame.id != frame_id);
        let removed = stack.len() != before;
        if stack.is_empty() {
            self.overrides.remove(key);
        }
        removed
    }

    fn active_overrides(&self) -> usize {
        self.overrides.values().map(Vec::len).sum()
    }
}

/// Shared, cloneable registry; all clones see the same mapping
pub struct DependencyRegistry<K, P> {
    state: Arc<RwLock<RegistryState<K, P>>>,
    next_frame: Arc<AtomicU64>,
}

impl<K, P> Clone for DependencyRegistry<K, P> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            next_frame: Arc::clone(&self.next_frame),
        }
    }
}

impl<K, P> Default for DependencyRegistry<K, P> {
    fn default() -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState {
                base: HashMap::new(),
                overrides: HashMap::new(),
            })),
            next_frame: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl<K, P> fmt::Debug for DependencyRegistry<K, P>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("DependencyRegistry")
            .field("registered", &state.base.keys().collect::<Vec<_>>())
            .field("overridden", &state.overrides.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<K, P> DependencyRegistry<K, P>
where
    K: Eq + Hash + Clone + fmt::Debug,
    P: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the production provider for `key`, returning the previous one
    pub fn register(&self, key: K, provider: P) -> Option<P> {
        debug!(key = ?key, "Registering dependency provider");
        self.state.write().base.insert(key, provider)
    }

    /// The provider currently in effect for `key`
    pub fn resolve(&self, key: &K) -> Option<P> {
        let state = self.state.read();
        state
            .overrides
            .get(key)
            .and_then(|stack| stack.last())
            .map(|frame| frame.provider.clone())
            .or_else(|| state.base.get(key).cloned())
    }

    pub fn active_overrides(&self) -> usize {
        self.state.read().active_overrides()
    }

    pub fn state(&self) -> OverrideState {
        match self.active_overrides() {
            0 => OverrideState::Clean,
            n => OverrideState::Overridden(n),
        }
    }

    /// Replace the provider for `key` until the returned guard is dropped
    pub fn override_with(&self, key: K, provider: P) -> OverrideGuard<K, P> {
        let frame_id = self.next_frame.fetch_add(1, Ordering::Relaxed);
        let depth = {
            let mut state = self.state.write();
            let stack = state.overrides.entry(key.clone()).or_default();
            stack.push(Frame {
                id: frame_id,
                provider,
            });
            stack.len()
        };
        debug!(key = ?key, depth, "Dependency override installed");

        OverrideGuard {
            registry: self.clone(),
            key,
            frame_id,
            active: true,
        }
    }

    /// Install several overrides at once, removed together by the returned set
    pub fn override_all<I>(&self, mapping: I) -> OverrideSet<K, P>
    where
        I: IntoIterator<Item = (K, P)>,
    {
        let mut state = self.state.write();
        let mut frames = Vec::new();

        for (key, provider) in mapping {
            let id = self.next_frame.fetch_add(1, Ordering::Relaxed);
            state
                .overrides
                .entry(key.clone())
                .or_default()
                .push(Frame { id, provider });
            frames.push((key, id));
        }
        debug!(frames = frames.len(), "Dependency override set installed");

        OverrideSet {
            registry: self.clone(),
            frames,
        }
    }
}

/// Scope of a single override; dropping it restores the previous provider
#[must_use = "the override is removed as soon as the guard is dropped"]
pub struct OverrideGuard<K, P>
where
    K: Eq + Hash + fmt::Debug,
{
    registry: DependencyRegistry<K, P>,
    key: K,
    frame_id: u64,
    active: bool,
}

impl<K, P> OverrideGuard<K, P>
where
    K: Eq + Hash + fmt::Debug,
{
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Remove the override now instead of at end of scope
    pub fn restore(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        let removed = self
            .registry
            .state
            .write()
            .remove_frame(&self.key, self.frame_id);
        if removed {
            debug!(key = ?self.key, "Dependency override removed");
        } else {
            warn!(key = ?self.key, "Dependency override was already gone at scope exit");
        }
    }
}

impl<K, P> Drop for OverrideGuard<K, P>
where
    K: Eq + Hash + fmt::Debug,
{
    fn drop(&mut self) {
        self.remove();
    }
}

/// Restore token for [`DependencyRegistry::override_all`]
#[must_use = "the overrides are removed as soon as the set is dropped"]
pub struct OverrideSet<K, P>
where
    K: Eq + Hash + fmt::Debug,
{
    registry: DependencyRegistry<K, P>,
    frames: Vec<(K, u64)>,
}

impl<K, P> OverrideSet<K, P>
where
    K: Eq + Hash + fmt::Debug,
{
    pub fn keys(&self) -> Vec<&K> {
        self.frames.iter().map(|(key, _)| key).collect()
    }

    /// Remove every override this set installed
    pub fn restore(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.frames.is_empty() {
            return;
        }

        let mut state = self.registry.state.write();
        for (key, frame_id) in self.frames.drain(..) {
            if !state.remove_frame(&key, frame_id) {
                warn!(key = ?key, "Dependency override was already gone at set exit");
            }
        }
        debug!("Dependency override set removed");
    }
}

impl<K, P> Drop for OverrideSet<K, P>
where
    K: Eq + Hash + fmt::Debug,
{
    fn drop(&mut self) {
        self.remove();
    }
}
