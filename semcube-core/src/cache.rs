//! Lookahead reference cache for retrieved data layers.
//!
//! A discovery run of the interpreter records the order in which data layer
//! references will be needed. The cache consumes that sequence front to
//! back while the materializing run replays the same order: after each
//! retrieval it keeps the layer stored only while the remaining sequence
//! still mentions it, so a layer used twice is fetched once and a layer
//! used once never lingers.

use std::collections::{HashMap, VecDeque};

use tracing::warn;

use crate::blocks::Reference;
use crate::value::DataArray;

pub struct ReferenceCache {
    seq: VecDeque<Reference>,
    store: HashMap<Reference, DataArray>,
}

impl ReferenceCache {
    pub fn new(sequence: Vec<Reference>) -> Self {
        ReferenceCache {
            seq: sequence.into(),
            store: HashMap::new(),
        }
    }

    /// A cache that never retains anything.
    pub fn empty() -> Self {
        ReferenceCache::new(Vec::new())
    }

    pub fn load(&self, reference: &Reference) -> Option<DataArray> {
        self.store.get(reference).cloned()
    }

    pub fn contains(&self, reference: &Reference) -> bool {
        self.store.contains_key(reference)
    }

    pub fn stored(&self) -> usize {
        self.store.len()
    }

    /// Advances the sequence past `reference` and stores `data` iff the
    /// remaining sequence still needs it.
    pub fn update(&mut self, reference: &Reference, data: DataArray) {
        match self.seq.pop_front() {
            Some(expected) if &expected == reference => {}
            Some(expected) => {
                warn!(
                    expected = %expected, got = %reference,
                    "Reference cache sequence out of order"
                );
            }
            None => return,
        }
        if self.seq.contains(reference) {
            self.store.insert(reference.clone(), data);
        } else {
            self.store.remove(reference);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Cell;

    fn data(n: i64) -> DataArray {
        DataArray::scalar(Cell::Int(n))
    }

    #[test]
    fn retains_only_while_needed_again() {
        let a = Reference::from("appearance/color");
        let b = Reference::from("topography/elevation");
        let mut cache = ReferenceCache::new(vec![a.clone(), b.clone(), a.clone()]);

        cache.update(&a, data(1));
        assert!(cache.contains(&a));
        cache.update(&b, data(2));
        assert!(!cache.contains(&b));
        assert_eq!(cache.load(&a), Some(data(1)));

        // Last use of `a` consumed, nothing may linger.
        cache.update(&a, data(1));
        assert!(!cache.contains(&a));
        assert_eq!(cache.stored(), 0);
    }

    #[test]
    fn empty_cache_stores_nothing() {
        let a = Reference::from("appearance/color");
        let mut cache = ReferenceCache::empty();
        cache.update(&a, data(1));
        assert_eq!(cache.load(&a), None);
    }
}
