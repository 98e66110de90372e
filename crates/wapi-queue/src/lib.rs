//! A bounded FIFO queue offering O(1) `put`, `next`, and `position` lookups.
//!
//! Grounded in `original_source/src/whisper_api/data_models/fast_queue.py`'s
//! `FastQueue`: a fixed-size ring buffer plus a map from element id to ring
//! index, so "what position is task X in" never needs a scan.

use std::collections::HashMap;
use std::hash::Hash;
use wapi_common::{Result, WApiError};

/// Elements stored in a [`BoundedQueue`] must expose a hashable identifier;
/// this mirrors `FastQueue`'s `key` callable, made a trait so the queue
/// doesn't need to carry a closure around.
pub trait Keyed {
    type Id: Hash + Eq + Clone;
    fn id(&self) -> Self::Id;
}

/// Fixed-capacity ring buffer with O(1) enqueue/dequeue/position lookup.
///
/// Not internally synchronized — callers (the worker's decode loop) wrap
/// access in a single mutex.
pub struct BoundedQueue<T: Keyed> {
    cap: usize,
    ring: Vec<Option<T>>,
    index: HashMap<T::Id, usize>,
    next_read: usize,
    next_write: usize,
    current: Option<T>,
}

impl<T: Keyed> BoundedQueue<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            ring: (0..cap).map(|_| None).collect(),
            index: HashMap::new(),
            next_read: 0,
            next_write: 0,
            current: None,
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Number of waiting elements; excludes `current`.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Empty iff the id map is empty — cursor equality is ambiguous between
    /// "empty" and "full".
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    pub fn put(&mut self, elm: T) -> Result<()> {
        if self.index.len() == self.cap {
            return Err(WApiError::QueueFull(self.cap));
        }
        let id = elm.id();
        self.ring[self.next_write] = Some(elm);
        self.index.insert(id, self.next_write);
        self.next_write = wrapping_incr(self.next_write, self.cap);
        Ok(())
    }

    /// Removes and returns the head element, which becomes `current`.
    /// Does not advance cursors when the queue is empty.
    pub fn next(&mut self) -> Result<&T> {
        if self.is_empty() {
            return Err(WApiError::QueueEmpty);
        }
        let elm = self.ring[self.next_read]
            .take()
            .expect("ring slot must be occupied for every id in the index map");
        self.index.remove(&elm.id());
        self.next_read = wrapping_incr(self.next_read, self.cap);
        self.current = Some(elm);
        Ok(self.current.as_ref().expect("just assigned"))
    }

    /// `0` if `id == current`; `k >= 1` for the k-th waiting element;
    /// `None` if absent.
    pub fn position(&self, id: &T::Id) -> Option<usize> {
        if let Some(cur) = &self.current {
            if &cur.id() == id {
                return Some(0);
            }
        }
        let elm_index = *self.index.get(id)?;
        if self.next_read <= elm_index {
            Some(elm_index - self.next_read + 1)
        } else {
            Some(self.cap - self.next_read + elm_index + 1)
        }
    }

    /// A position -> element mapping; does not mutate state. Key `0` holds
    /// `current` if present.
    pub fn snapshot(&self) -> HashMap<usize, T>
    where
        T: Clone,
    {
        let mut out = HashMap::with_capacity(self.index.len() + 1);
        if let Some(cur) = &self.current {
            out.insert(0, cur.clone());
        }
        for elm in self.ring.iter().flatten() {
            if let Some(pos) = self.position(&elm.id()) {
                out.insert(pos, elm.clone());
            }
        }
        out
    }
}

fn wrapping_incr(idx: usize, cap: usize) -> usize {
    if idx + 1 == cap { 0 } else { idx + 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Elm(u32);

    impl Keyed for Elm {
        type Id = u32;
        fn id(&self) -> u32 {
            self.0
        }
    }

    #[test]
    fn put_next_position_like_the_original_walkthrough() {
        let mut q = BoundedQueue::new(4);
        q.put(Elm(1)).unwrap();
        q.put(Elm(2)).unwrap();
        q.put(Elm(3)).unwrap();
        q.put(Elm(4)).unwrap();

        assert_eq!(q.position(&2), Some(2));

        let snap = q.snapshot();
        assert_eq!(snap.len(), 4);
        assert_eq!(snap.get(&1), Some(&Elm(1)));

        assert_eq!(q.next().unwrap(), &Elm(1));
        assert_eq!(q.position(&1), Some(0));
        assert_eq!(q.position(&2), Some(1));

        assert_eq!(q.next().unwrap(), &Elm(2));
        assert_eq!(q.position(&2), Some(0));

        q.put(Elm(5)).unwrap();
        assert_eq!(q.position(&5), Some(2));
    }

    #[test]
    fn put_fails_when_full_then_accepts_after_next() {
        let mut q = BoundedQueue::new(2);
        q.put(Elm(1)).unwrap();
        q.put(Elm(2)).unwrap();
        assert!(matches!(q.put(Elm(3)), Err(WApiError::QueueFull(2))));

        q.next().unwrap();
        assert!(q.put(Elm(3)).is_ok());
    }

    #[test]
    fn next_on_empty_does_not_advance_cursors() {
        let mut q: BoundedQueue<Elm> = BoundedQueue::new(2);
        assert!(matches!(q.next(), Err(WApiError::QueueEmpty)));
        q.put(Elm(7)).unwrap();
        assert_eq!(q.position(&7), Some(1));
    }

    #[test]
    fn position_unknown_is_none() {
        let mut q = BoundedQueue::new(2);
        q.put(Elm(1)).unwrap();
        assert_eq!(q.position(&99), None);
    }

    #[test]
    fn len_excludes_current() {
        let mut q = BoundedQueue::new(3);
        q.put(Elm(1)).unwrap();
        q.put(Elm(2)).unwrap();
        assert_eq!(q.len(), 2);
        q.next().unwrap();
        assert_eq!(q.len(), 1);
    }
}
