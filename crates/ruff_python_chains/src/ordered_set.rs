use std::hash::{BuildHasherDefault, Hash};

use indexmap::IndexSet;
use rustc_hash::FxHasher;

/// Deterministic, insertion-ordered set of Def handles.
///
/// Backs every place the engine accumulates definitions: a scope's
/// definition map, a branch frame, a break/continue sink. Iteration order
/// must match insertion order so that chain dumps (and therefore test
/// fixtures) are reproducible across runs; `indexmap::IndexSet` gives us
/// that together with O(1) insert and membership, so there is no bespoke
/// container to maintain here.
#[derive(Clone, Debug)]
pub struct OrderedSet<T> {
    inner: IndexSet<T, BuildHasherDefault<FxHasher>>,
}

impl<T> Default for OrderedSet<T> {
    fn default() -> Self {
        Self {
            inner: IndexSet::default(),
        }
    }
}

impl<T: Eq + Hash> OrderedSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(value: T) -> Self {
        let mut set = Self::default();
        set.insert(value);
        set
    }

    /// Inserts `value`, returning `true` if it was newly added.
    pub fn insert(&mut self, value: T) -> bool {
        self.inner.insert(value)
    }

    pub fn contains(&self, value: &T) -> bool {
        self.inner.contains(value)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.inner.iter()
    }

    /// Unions `other` into `self`, preserving `self`'s existing order and
    /// appending `other`'s new members after it in `other`'s order.
    pub fn extend_from(&mut self, other: &Self)
    where
        T: Clone,
    {
        for item in &other.inner {
            self.inner.insert(item.clone());
        }
    }
}

impl<T: Eq + Hash> FromIterator<T> for OrderedSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

impl<T: Eq + Hash> Extend<T> for OrderedSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.inner.insert(item);
        }
    }
}

impl<'a, T: Eq + Hash> IntoIterator for &'a OrderedSet<T> {
    type Item = &'a T;
    type IntoIter = indexmap::set::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}

impl<T: Eq + Hash> IntoIterator for OrderedSet<T> {
    type Item = T;
    type IntoIter = indexmap::set::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::OrderedSet;

    #[test]
    fn preserves_insertion_order() {
        let mut set = OrderedSet::new();
        set.insert(3);
        set.insert(1);
        set.insert(2);
        set.insert(1); // duplicate, no-op
        assert_eq!(set.iter().copied().collect::<Vec<_>>(), vec![3, 1, 2]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn union_appends_only_new_members_in_the_other_sets_order() {
        let mut a = OrderedSet::new();
        a.insert(1);
        a.insert(2);
        let mut b = OrderedSet::new();
        b.insert(2);
        b.insert(3);
        a.extend_from(&b);
        assert_eq!(a.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
