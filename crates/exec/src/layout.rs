//! CPU slot bookkeeping for the scheduler.
//!
//! Acquire and release are not synchronized with each other. Both take
//! `&mut self`, so the owning scheduler thread is the only mutator; a
//! concurrent scheduler would have to make the pair atomic.

use std::fmt;

/// Fixed pool of CPU ids `0..capacity`, each either free or busy.
pub struct CpuLayout {
    busy: Vec<bool>,
}

impl CpuLayout {
    pub fn new(max_threads: usize) -> Self {
        Self {
            busy: vec![false; max_threads],
        }
    }

    /// Take `n` free ids, lowest first. Returns `None` without touching the
    /// pool when fewer than `n` are free.
    pub fn try_acquire(&mut self, n: usize) -> Option<Vec<usize>> {
        if n > self.available() {
            return None;
        }
        let ids: Vec<usize> = self
            .busy
            .iter()
            .enumerate()
            .filter(|(_, busy)| !**busy)
            .map(|(id, _)| id)
            .take(n)
            .collect();
        for &id in &ids {
            self.busy[id] = true;
        }
        Some(ids)
    }

    /// Return held ids to the pool.
    ///
    /// # Panics
    ///
    /// If any id is out of range or not currently held. That is a
    /// bookkeeping bug in the caller, never a runtime condition.
    pub fn release(&mut self, ids: &[usize]) {
        for &id in ids {
            match self.busy.get_mut(id) {
                Some(busy) if *busy => *busy = false,
                Some(_) => panic!("releasing CPU {id} which is not held ({self})"),
                None => panic!("releasing CPU {id} outside of layout ({self})"),
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.busy.len()
    }

    pub fn available(&self) -> usize {
        self.busy.iter().filter(|b| !**b).count()
    }

    pub fn is_idle(&self) -> bool {
        self.available() == self.capacity()
    }
}

impl fmt::Display for CpuLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map: String = self
            .busy
            .iter()
            .map(|b| if *b { '#' } else { '.' })
            .collect();
        write!(f, "[{map}]")
    }
}
