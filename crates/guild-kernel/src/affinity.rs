//! Thread-affinity guard.
//!
//! Owner actors mark the executing thread for the duration of each job they
//! run. [`is_owning_thread`] reads that mark, so it is true exactly while a
//! job routed to the global authority is executing, whichever worker thread
//! the runtime picked for it.

use std::cell::Cell;
use std::fmt;
use std::sync::Mutex;

use tracing::error;

/// Which owning context a job is executing under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OwnerLabel {
    /// The global authority: guilds, relations, sessions, presentation
    #[default]
    Global,
    /// A region thread under the partitioned layout
    Region(usize),
}

impl fmt::Display for OwnerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerLabel::Global => f.write_str("global"),
            OwnerLabel::Region(index) => write!(f, "region-{}", index),
        }
    }
}

thread_local! {
    static CURRENT_OWNER: Cell<Option<OwnerLabel>> = const { Cell::new(None) };
}

/// Owner the calling thread is currently executing for, if any.
pub fn current_owner() -> Option<OwnerLabel> {
    CURRENT_OWNER.with(Cell::get)
}

/// True while running on the owner of global (non-spatial) state.
pub fn is_owning_thread() -> bool {
    current_owner() == Some(OwnerLabel::Global)
}

/// Precondition check for global-state mutation.
///
/// Callers must already have routed through the task router; reaching this
/// off-owner is a bug. Debug builds panic, release builds log it.
pub fn assert_owning_thread(operation: &'static str) {
    if !is_owning_thread() {
        error!(
            operation,
            owner = ?current_owner(),
            "global state touched off the owning thread"
        );
        debug_assert!(
            false,
            "{} must run on the global authority (current owner: {:?})",
            operation,
            current_owner()
        );
    }
}

/// Marks the current thread as running for `label` until dropped.
#[must_use]
pub(crate) struct OwnerScope {
    previous: Option<OwnerLabel>,
}

pub(crate) fn enter(label: OwnerLabel) -> OwnerScope {
    let previous = CURRENT_OWNER.with(|cell| cell.replace(Some(label)));
    OwnerScope { previous }
}

impl Drop for OwnerScope {
    fn drop(&mut self) {
        CURRENT_OWNER.with(|cell| cell.set(self.previous));
    }
}

/// State that only the global authority may touch.
///
/// The mutex is never contended in correct code, since every access happens
/// on the single global owner; it exists so the cell is `Sync`.
pub struct AuthorityCell<T> {
    name: &'static str,
    inner: Mutex<T>,
}

impl<T> AuthorityCell<T> {
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            inner: Mutex::new(value),
        }
    }

    /// Run `f` against the owned value. Must be called on the global authority.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        assert_owning_thread(self.name);
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl<T: Default> Default for AuthorityCell<T> {
    fn default() -> Self {
        Self::new("authority-cell", T::default())
    }
}

impl<T> fmt::Debug for AuthorityCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorityCell")
            .field("name", &self.name)
            .finish()
    }
}
