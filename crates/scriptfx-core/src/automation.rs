//! Per-parameter queue of sample-accurate changes within one block.
//!
//! Hosts deliver automation as `(sample_offset, value)` points. The queue
//! keeps them ordered by offset; a second point at the same offset replaces
//! the first. Scripts walk the queue with [`ChangeQueue::next_change`] during
//! the block; whatever they leave unconsumed is collapsed to the last value
//! at block end by [`ChangeQueue::take_unconsumed`].

/// Points a queue can hold before `insert` has to grow it.
pub const CHANGE_QUEUE_CAPACITY: usize = 64;

/// One queued parameter change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterChange {
    /// Frame within the block.
    pub offset: u32,
    /// Internal value.
    pub value: f64,
}

/// Ordered change list with a read cursor.
#[derive(Debug, Clone)]
pub struct ChangeQueue {
    entries: Vec<ParameterChange>,
    cursor: usize,
}

impl Default for ChangeQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeQueue {
    /// Creates an empty queue with room for [`CHANGE_QUEUE_CAPACITY`] points.
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(CHANGE_QUEUE_CAPACITY),
            cursor: 0,
        }
    }

    /// Insert a change, keeping offsets sorted. Same offset replaces.
    pub fn insert(&mut self, offset: u32, value: f64) {
        match self.entries.binary_search_by_key(&offset, |c| c.offset) {
            Ok(i) => self.entries[i].value = value,
            Err(i) => self.entries.insert(i, ParameterChange { offset, value }),
        }
    }

    /// Return the change at the cursor and advance.
    pub fn next_change(&mut self) -> Option<ParameterChange> {
        let change = self.entries.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(change)
    }

    /// Change at the cursor without advancing.
    pub fn peek(&self) -> Option<ParameterChange> {
        self.entries.get(self.cursor).copied()
    }

    /// Last queued value if any change is still unconsumed, then clear.
    ///
    /// Intermediate values are dropped: a parameter ends the block at its
    /// final automation point.
    pub fn take_unconsumed(&mut self) -> Option<f64> {
        let last = if self.entries.len() > self.cursor {
            self.entries.last().map(|c| c.value)
        } else {
            None
        };
        self.clear();
        last
    }

    /// Drop all points and rewind.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }

    /// Number of queued points, consumed or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_keeps_offsets_sorted() {
        let mut q = ChangeQueue::new();
        q.insert(20, 0.9);
        q.insert(0, 0.2);
        q.insert(10, 0.5);
        let offsets: Vec<u32> = std::iter::from_fn(|| q.next_change())
            .map(|c| c.offset)
            .collect();
        assert_eq!(offsets, vec![0, 10, 20]);
    }

    #[test]
    fn same_offset_replaces() {
        let mut q = ChangeQueue::new();
        q.insert(5, 0.1);
        q.insert(5, 0.7);
        assert_eq!(q.len(), 1);
        assert_eq!(q.peek(), Some(ParameterChange { offset: 5, value: 0.7 }));
    }

    #[test]
    fn take_unconsumed_returns_last_value() {
        let mut q = ChangeQueue::new();
        q.insert(0, 0.2);
        q.insert(10, 0.5);
        q.insert(20, 0.9);
        assert_eq!(q.take_unconsumed(), Some(0.9));
        assert!(q.is_empty());
        assert_eq!(q.take_unconsumed(), None);
    }

    #[test]
    fn fully_consumed_queue_yields_nothing() {
        let mut q = ChangeQueue::new();
        q.insert(3, 0.4);
        assert!(q.next_change().is_some());
        assert!(q.next_change().is_none());
        assert_eq!(q.take_unconsumed(), None);
    }

    #[test]
    fn partially_consumed_queue_yields_last() {
        let mut q = ChangeQueue::new();
        q.insert(1, 0.1);
        q.insert(2, 0.2);
        q.next_change();
        assert_eq!(q.take_unconsumed(), Some(0.2));
    }
}
