//! Multiset and poll-response bookkeeping types.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

/// A multiset (bag) that tracks the count of each element.
///
/// Bags support threshold tracking, which allows efficiently querying
/// which elements have been added at least a certain number of times.
///
/// # Examples
///
/// ```
/// use avalanche_dag::Bag;
///
/// let mut bag = Bag::new();
/// bag.add(1);
/// bag.add(1);
/// bag.add(2);
///
/// assert_eq!(bag.count(&1), 2);
/// assert_eq!(bag.len(), 3);
///
/// bag.set_threshold(2);
/// assert!(bag.threshold().contains(&1));
/// assert!(!bag.threshold().contains(&2));
/// ```
#[derive(Clone)]
pub struct Bag<T: Eq + Hash + Clone> {
    counts: HashMap<T, usize>,
    size: usize,
    threshold: usize,
    met_threshold: HashSet<T>,
}

impl<T: Eq + Hash + Clone> Default for Bag<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash + Clone> Bag<T> {
    /// Creates a new empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            size: 0,
            threshold: 0,
            met_threshold: HashSet::new(),
        }
    }

    /// Creates a bag from an iterator of elements.
    pub fn of<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut bag = Self::new();
        for item in iter {
            bag.add(item);
        }
        bag
    }

    /// Sets the threshold for the threshold set.
    ///
    /// Elements that have been added at least `threshold` times
    /// will be included in the threshold set.
    pub fn set_threshold(&mut self, threshold: usize) {
        if self.threshold == threshold {
            return;
        }

        self.threshold = threshold;
        self.met_threshold.clear();

        for (item, &count) in &self.counts {
            if count >= threshold {
                self.met_threshold.insert(item.clone());
            }
        }
    }

    /// Adds a single element to the bag.
    pub fn add(&mut self, item: T) {
        self.add_count(item, 1);
    }

    /// Adds an element with a specific count.
    ///
    /// If `count` is 0, this is a no-op.
    pub fn add_count(&mut self, item: T, count: usize) {
        if count == 0 {
            return;
        }

        let total_count = self.counts.entry(item.clone()).or_insert(0);
        *total_count += count;
        self.size += count;

        if *total_count >= self.threshold && self.threshold > 0 {
            self.met_threshold.insert(item);
        }
    }

    /// Returns the count of the given element.
    #[must_use]
    pub fn count(&self, item: &T) -> usize {
        self.counts.get(item).copied().unwrap_or(0)
    }

    /// Returns the total number of elements (including duplicates).
    #[must_use]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns `true` if the bag is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns a list of unique elements in the bag.
    pub fn list(&self) -> Vec<T> {
        self.counts.keys().cloned().collect()
    }

    /// Returns the most common element and its count.
    ///
    /// If there's a tie, any of the tied elements may be returned.
    /// Returns `None` if the bag is empty.
    pub fn mode(&self) -> Option<(T, usize)> {
        self.counts
            .iter()
            .max_by_key(|(_, &count)| count)
            .map(|(item, &count)| (item.clone(), count))
    }

    /// Returns the set of elements that have met the threshold.
    #[must_use]
    pub fn threshold(&self) -> &HashSet<T> {
        &self.met_threshold
    }

    /// Removes all instances of an element from the bag.
    pub fn remove(&mut self, item: &T) {
        if let Some(count) = self.counts.remove(item) {
            self.size -= count;
            self.met_threshold.remove(item);
        }
    }
}

impl<T: Eq + Hash + Clone + fmt::Debug> fmt::Debug for Bag<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bag(size={}): {{", self.size)?;
        let mut first = true;
        for (item, count) in &self.counts {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{item:?}: {count}")?;
            first = false;
        }
        write!(f, "}}")
    }
}

/// A collection of poll responses: for each element, the set of responder
/// indices that named it.
///
/// The sampling layer produces one response per sampled peer; a `UniqueBag`
/// keeps responses deduplicated per element so a single responder is never
/// counted twice for the same item, no matter how the responses are merged.
///
/// # Examples
///
/// ```
/// use avalanche_dag::UniqueBag;
///
/// let mut votes = UniqueBag::new();
/// votes.add(0, "x");
/// votes.add(1, "x");
/// votes.add(1, "x"); // duplicate, ignored
///
/// let bag = votes.bag();
/// assert_eq!(bag.count(&"x"), 2);
/// ```
#[derive(Clone)]
pub struct UniqueBag<T: Eq + Hash + Clone> {
    sets: HashMap<T, HashSet<u32>>,
}

impl<T: Eq + Hash + Clone> Default for UniqueBag<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash + Clone> UniqueBag<T> {
    /// Creates a new empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sets: HashMap::new(),
        }
    }

    /// Records that `responder` named `item`.
    pub fn add(&mut self, responder: u32, item: T) {
        self.sets.entry(item).or_default().insert(responder);
    }

    /// Merges a set of responder indices into `item`'s set.
    pub fn union_set(&mut self, item: T, responders: &HashSet<u32>) {
        if responders.is_empty() {
            return;
        }
        self.sets.entry(item).or_default().extend(responders);
    }

    /// Returns the responder set recorded for `item`.
    pub fn get_set(&self, item: &T) -> Option<&HashSet<u32>> {
        self.sets.get(item)
    }

    /// Returns the items that received at least one response.
    pub fn list(&self) -> Vec<T> {
        self.sets.keys().cloned().collect()
    }

    /// Returns `true` if no responses have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Collapses the responder sets into a [`Bag`] of tallies.
    #[must_use]
    pub fn bag(&self) -> Bag<T> {
        let mut bag = Bag::new();
        for (item, responders) in &self.sets {
            bag.add_count(item.clone(), responders.len());
        }
        bag
    }

    /// Discards every responder that named more than one item.
    ///
    /// A response naming two items is an illegal split vote; such a
    /// responder contributes zero votes to anything in this poll.
    #[must_use]
    pub fn discard_split_voters(&self) -> Self {
        let mut seen: HashMap<u32, usize> = HashMap::new();
        for responders in self.sets.values() {
            for &r in responders {
                *seen.entry(r).or_insert(0) += 1;
            }
        }

        let mut out = Self::new();
        for (item, responders) in &self.sets {
            let honest: HashSet<u32> = responders
                .iter()
                .copied()
                .filter(|r| seen[r] == 1)
                .collect();
            if !honest.is_empty() {
                out.sets.insert(item.clone(), honest);
            }
        }
        out
    }
}

impl<T: Eq + Hash + Clone + fmt::Debug> fmt::Debug for UniqueBag<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.sets.iter()).finish()
    }
}
