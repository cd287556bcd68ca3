//! Copy-on-change member list shared between a hot-path reader and any
//! number of writers on other threads.
//!
//! Writers mutate the list under a lock and bump a generation counter. The
//! reader keeps a private copy and only takes the lock when the generation
//! moved since its last refresh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::pipe::lock;

pub(crate) struct SharedList<T> {
    items: Mutex<Vec<T>>,
    generation: AtomicU64,
}

impl<T: Clone> SharedList<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
        })
    }

    /// Add `item` unless `same` matches an existing member.
    pub(crate) fn add(&self, item: T, same: impl Fn(&T, &T) -> bool) -> bool {
        let mut items = lock(&self.items);
        if items.iter().any(|existing| same(existing, &item)) {
            return false;
        }
        items.push(item);
        self.generation.fetch_add(1, Ordering::Release);
        true
    }

    pub(crate) fn remove(&self, item: &T, same: impl Fn(&T, &T) -> bool) -> bool {
        let mut items = lock(&self.items);
        let before = items.len();
        items.retain(|existing| !same(existing, item));
        let removed = items.len() != before;
        if removed {
            self.generation.fetch_add(1, Ordering::Release);
        }
        removed
    }

    pub(crate) fn clear(&self) {
        let mut items = lock(&self.items);
        items.clear();
        self.generation.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub(crate) fn to_vec(&self) -> Vec<T> {
        lock(&self.items).clone()
    }
}

/// Reader-side copy of a [`SharedList`].
pub(crate) struct Snapshot<T> {
    shared: Arc<SharedList<T>>,
    seen: u64,
    items: Vec<T>,
}

impl<T: Clone> Snapshot<T> {
    pub(crate) fn new(shared: Arc<SharedList<T>>) -> Self {
        Self {
            shared,
            seen: 0,
            items: Vec::new(),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<SharedList<T>> {
        &self.shared
    }

    /// Current members, rebuilt only if the list changed.
    pub(crate) fn refresh(&mut self) -> &[T] {
        let generation = self.shared.generation.load(Ordering::Acquire);
        if generation != self.seen {
            let items = lock(&self.shared.items);
            self.items.clear();
            self.items.extend(items.iter().cloned());
            self.seen = generation;
        }
        &self.items
    }
}
