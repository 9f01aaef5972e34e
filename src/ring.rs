// ============================================================================
// OVERWRITE RING
// ============================================================================
// Fixed-capacity circular log shared by the slow query and audit buffers.
// Slots are pre-allocated once; the oldest slot is overwritten on wraparound
// and a monotonic total counts every append, stored or not.
// ============================================================================

/// Circular buffer of `Copy` records over a pre-allocated slot arena.
///
/// Not synchronized on its own; owners wrap it in their lock.
#[derive(Debug, Clone)]
pub struct OverwriteRing<T> {
    slots: Box<[T]>,
    /// Next slot to write
    write_pos: usize,
    /// Appends since creation or the last clear (may exceed capacity)
    total: u64,
}

impl<T: Copy + Default> OverwriteRing<T> {
    /// Allocate `capacity` zeroed slots. A zero capacity yields a ring that
    /// ignores every append.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![T::default(); capacity].into_boxed_slice(),
            write_pos: 0,
            total: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Append at the cursor, overwriting the oldest record when full
    #[inline]
    pub fn push(&mut self, item: T) {
        let cap = self.slots.len();
        if cap == 0 {
            return;
        }
        self.slots[self.write_pos] = item;
        self.write_pos = (self.write_pos + 1) % cap;
        self.total += 1;
    }

    /// Number of slots holding a record
    #[inline]
    pub fn len(&self) -> usize {
        (self.total.min(self.slots.len() as u64)) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Total appends, including overwritten ones
    #[inline]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// True once at least one record has been overwritten
    #[inline]
    pub fn has_wrapped(&self) -> bool {
        self.total > self.slots.len() as u64
    }

    /// Valid records, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let (older, newer) = if self.total >= self.slots.len() as u64 {
            let (head, tail) = self.slots.split_at(self.write_pos);
            (tail, head)
        } else {
            (&self.slots[..self.write_pos], &self.slots[..0])
        };
        older.iter().chain(newer.iter())
    }

    /// Most recent record
    pub fn latest(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        let cap = self.slots.len();
        Some(&self.slots[(self.write_pos + cap - 1) % cap])
    }

    /// Owned copy of the valid records, oldest first
    pub fn to_vec(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len());
        out.extend(self.iter().copied());
        out
    }

    /// Zero every slot and counter, keeping the storage
    pub fn clear(&mut self) {
        self.slots.fill(T::default());
        self.write_pos = 0;
        self.total = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_basic_push() {
        let mut ring = OverwriteRing::<u32>::new(4);
        assert!(ring.is_empty());
        ring.push(1);
        ring.push(2);
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.to_vec(), vec![1, 2]);
        assert_eq!(ring.latest(), Some(&2));
    }

    #[test]
    fn test_ring_overwrites_oldest() {
        let mut ring = OverwriteRing::<u32>::new(3);
        for i in 1..=4 {
            ring.push(i);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.total(), 4);
        assert!(ring.has_wrapped());
        assert_eq!(ring.to_vec(), vec![2, 3, 4]);
        assert_eq!(ring.latest(), Some(&4));
    }

    #[test]
    fn test_ring_exactly_full_is_ordered() {
        let mut ring = OverwriteRing::<u32>::new(3);
        for i in 1..=3 {
            ring.push(i);
        }
        assert!(!ring.has_wrapped());
        assert_eq!(ring.to_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn test_ring_zero_capacity_ignores_pushes() {
        let mut ring = OverwriteRing::<u32>::new(0);
        ring.push(1);
        assert_eq!(ring.total(), 0);
        assert!(ring.to_vec().is_empty());
        assert_eq!(ring.latest(), None);
    }

    #[test]
    fn test_ring_clear() {
        let mut ring = OverwriteRing::<u32>::new(2);
        for i in 0..5 {
            ring.push(i);
        }
        ring.clear();
        assert_eq!(ring.total(), 0);
        assert!(ring.to_vec().is_empty());
        ring.push(9);
        assert_eq!(ring.to_vec(), vec![9]);
    }
}
