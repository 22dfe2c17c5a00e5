//! Sequence-keyed reordering buffer.
//!
//! Executions finish out of order; the buffer holds each result under its
//! submission sequence and releases results strictly in increasing sequence
//! order, starting from zero. Sequences must be unique.

use std::collections::BTreeMap;

#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: u64,
    pending: BTreeMap<u64, T>,
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Store the result for `seq`.
    ///
    /// Sequences below the release cursor were already released and are
    /// ignored, returning the value back to the caller.
    pub fn insert(&mut self, seq: u64, value: T) -> Result<(), T> {
        if seq < self.next || self.pending.contains_key(&seq) {
            return Err(value);
        }
        self.pending.insert(seq, value);
        Ok(())
    }

    /// Release the next in-order result, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<T> {
        let value = self.pending.remove(&self.next)?;
        self.next += 1;
        Some(value)
    }

    /// Next sequence the buffer will release.
    pub fn next_seq(&self) -> u64 {
        self.next
    }

    /// Results held back waiting for an earlier sequence.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn holds_until_gap_filled() {
        let mut buf = ReorderBuffer::new();
        buf.insert(2, "c").unwrap();
        buf.insert(1, "b").unwrap();
        assert_eq!(buf.pop_ready(), None);
        assert_eq!(buf.len(), 2);

        buf.insert(0, "a").unwrap();
        assert_eq!(buf.pop_ready(), Some("a"));
        assert_eq!(buf.pop_ready(), Some("b"));
        assert_eq!(buf.pop_ready(), Some("c"));
        assert_eq!(buf.pop_ready(), None);
        assert_eq!(buf.next_seq(), 3);
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_released_and_duplicate_sequences() {
        let mut buf = ReorderBuffer::new();
        buf.insert(0, 10).unwrap();
        assert_eq!(buf.pop_ready(), Some(10));
        assert_eq!(buf.insert(0, 11), Err(11));

        buf.insert(3, 30).unwrap();
        assert_eq!(buf.insert(3, 31), Err(31));
    }

    proptest! {
        #[test]
        fn releases_any_permutation_in_order(order in Just((0u64..64).collect::<Vec<_>>()).prop_shuffle()) {
            let mut buf = ReorderBuffer::new();
            let mut released = Vec::new();
            for seq in order {
                buf.insert(seq, seq).unwrap();
                while let Some(v) = buf.pop_ready() {
                    released.push(v);
                }
            }
            prop_assert_eq!(released, (0u64..64).collect::<Vec<_>>());
            prop_assert!(buf.is_empty());
        }
    }
}
