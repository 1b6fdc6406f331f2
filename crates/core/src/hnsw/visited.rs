//! Generation-based visited set for HNSW graph traversal.
//!
//! `clear()` bumps a generation counter instead of zeroing the array, so a
//! search only pays for a full reset once every 65534 calls.

#[derive(Debug, Default)]
pub struct VisitedSet {
    marks: Vec<u16>,
    generation: u16,
}

impl VisitedSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            marks: vec![0u16; capacity],
            generation: 1,
        }
    }

    pub fn clear(&mut self) {
        if self.generation == u16::MAX {
            self.marks.fill(0);
            self.generation = 1;
        } else {
            self.generation += 1;
        }
    }

    /// Grow to cover at least `cap` node ids.
    pub fn ensure_capacity(&mut self, cap: usize) {
        if cap > self.marks.len() {
            self.marks.resize(cap, 0);
        }
    }

    /// Returns `true` if `id` had not been visited in the current generation.
    #[inline]
    pub fn insert(&mut self, id: u32) -> bool {
        let idx = id as usize;
        if idx >= self.marks.len() {
            self.marks.resize(idx + 1, 0);
        }
        if self.marks[idx] == self.generation {
            false
        } else {
            self.marks[idx] = self.generation;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_clear() {
        let mut vs = VisitedSet::new(16);
        assert!(vs.insert(3));
        assert!(!vs.insert(3));
        vs.clear();
        assert!(vs.insert(3));
    }

    #[test]
    fn test_grows_on_out_of_range_id() {
        let mut vs = VisitedSet::new(0);
        assert!(vs.insert(40));
        assert!(!vs.insert(40));
    }

    #[test]
    fn test_generation_wraps_with_reset() {
        let mut vs = VisitedSet::new(4);
        for _ in 0..65534 {
            vs.clear();
        }
        assert_eq!(vs.generation, u16::MAX);
        vs.insert(1);
        vs.clear();
        assert_eq!(vs.generation, 1);
        assert!(vs.insert(1));
    }
}
