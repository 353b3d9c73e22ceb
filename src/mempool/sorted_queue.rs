use std::collections::BTreeSet;

/// Ordered queue of `(key, id)` pairs with set semantics on the pair.
///
/// The mempool keeps its gas-price and heartbeat orderings in these; entries
/// are removed by reconstructing their key, so keys must be derivable from
/// the item they index.
#[derive(Debug, Clone)]
pub struct SortedQueue<K: Ord + Copy, I: Ord + Copy> {
    set: BTreeSet<(K, I)>,
}

impl<K: Ord + Copy, I: Ord + Copy> Default for SortedQueue<K, I> {
    fn default() -> Self {
        Self {
            set: BTreeSet::new(),
        }
    }
}

impl<K: Ord + Copy, I: Ord + Copy> SortedQueue<K, I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn add(&mut self, key: K, id: I) -> bool {
        self.set.insert((key, id))
    }

    pub fn remove(&mut self, key: K, id: I) -> bool {
        self.set.remove(&(key, id))
    }

    pub fn contains(&self, key: K, id: I) -> bool {
        self.set.contains(&(key, id))
    }

    /// Smallest key first; wrap keys in [`std::cmp::Reverse`] for a
    /// highest-first ordering.
    pub fn peek_min(&self) -> Option<(K, I)> {
        self.set.first().copied()
    }

    /// Largest key.
    pub fn peek_max(&self) -> Option<(K, I)> {
        self.set.last().copied()
    }

    pub fn pop_min(&mut self) -> Option<(K, I)> {
        self.set.pop_first()
    }

    pub fn pop_max(&mut self) -> Option<(K, I)> {
        self.set.pop_last()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, I)> + '_ {
        self.set.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Reverse;

    #[test]
    fn orders_by_key_then_id() {
        let mut queue: SortedQueue<u64, u8> = SortedQueue::new();
        queue.add(5, 1);
        queue.add(3, 2);
        queue.add(5, 0);
        assert_eq!(queue.peek_min(), Some((3, 2)));
        assert_eq!(queue.pop_min(), Some((3, 2)));
        assert_eq!(queue.pop_min(), Some((5, 0)));
        assert_eq!(queue.pop_min(), Some((5, 1)));
    }

    #[test]
    fn reverse_keys_give_highest_first() {
        let mut queue: SortedQueue<Reverse<u128>, u8> = SortedQueue::new();
        queue.add(Reverse(10), 1);
        queue.add(Reverse(30), 2);
        queue.add(Reverse(20), 3);
        assert_eq!(queue.peek_min(), Some((Reverse(30), 2)));
        // the lowest price sits at the max end
        assert_eq!(queue.peek_max(), Some((Reverse(10), 1)));
    }

    #[test]
    fn remove_needs_exact_pair() {
        let mut queue: SortedQueue<u64, u8> = SortedQueue::new();
        queue.add(1, 1);
        assert!(!queue.remove(1, 2));
        assert!(queue.remove(1, 1));
        assert!(queue.is_empty());
    }
}
