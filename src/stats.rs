//! Ngram occurence counts

use crate::{MatchCount, Ngram};
use std::collections::{hash_map, BTreeMap, HashMap};

/// Cumulative match counts, keyed by case-sensitive ngram
///
/// Used both for the counts of a single shard and for the counts of every
/// shard of a given ngram order. Counts only ever grow.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GramCounts(HashMap<Ngram, MatchCount>);
//
impl GramCounts {
    /// Set up an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Record matches for an ngram
    pub fn add(&mut self, ngram: Ngram, match_count: MatchCount) {
        match self.0.entry(ngram) {
            hash_map::Entry::Occupied(o) => {
                let total = o.into_mut();
                *total = total.saturating_add(match_count);
            }
            hash_map::Entry::Vacant(v) => {
                v.insert(match_count);
            }
        }
    }

    /// Merge counts from another shard into these ones
    pub fn merge(&mut self, other: Self) {
        for (ngram, match_count) in other.0 {
            self.add(ngram, match_count);
        }
    }

    /// Total matches recorded for an ngram, if any
    #[cfg(test)]
    pub fn get(&self, ngram: &str) -> Option<MatchCount> {
        self.0.get(ngram).copied()
    }

    /// Number of distinct ngrams
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Truth that no ngram was recorded
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over ngrams and their match counts, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&str, MatchCount)> + '_ {
        self.0.iter().map(|(ngram, &count)| (&**ngram, count))
    }

    /// Underlying map, for parallel iteration
    pub(crate) fn as_map(&self) -> &HashMap<Ngram, MatchCount> {
        &self.0
    }

    /// Ngrams with at least `min_freq` matches, sorted by ngram
    pub fn at_least(&self, min_freq: MatchCount) -> BTreeMap<&str, MatchCount> {
        self.iter().filter(|&(_, count)| count >= min_freq).collect()
    }
}
//
impl FromIterator<(Ngram, MatchCount)> for GramCounts {
    fn from_iter<I: IntoIterator<Item = (Ngram, MatchCount)>>(iter: I) -> Self {
        let mut counts = Self::new();
        for (ngram, match_count) in iter {
            counts.add(ngram, match_count);
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(entries: &[(&str, MatchCount)]) -> GramCounts {
        entries.iter().map(|&(g, c)| (g.into(), c)).collect()
    }

    #[test]
    fn add_accumulates() {
        let counts = counts(&[("cat", 6000), ("cat", 4000), ("dog", 3000)]);
        assert_eq!(counts.len(), 2);
        assert_eq!(counts.get("cat"), Some(10_000));
        assert_eq!(counts.get("dog"), Some(3000));
        assert_eq!(counts.get("cow"), None);
    }

    #[test]
    fn merge_never_decreases() {
        let mut total = counts(&[("cat", 10), ("dog", 5)]);
        total.merge(counts(&[("cat", 1), ("eel", 2)]));
        assert_eq!(total, counts(&[("cat", 11), ("dog", 5), ("eel", 2)]));

        total.merge(counts(&[("cat", MatchCount::MAX)]));
        assert_eq!(total.get("cat"), Some(MatchCount::MAX));
    }

    #[test]
    fn threshold_is_inclusive() {
        let counts = counts(&[("cat", 10_000), ("dog", 3000), ("eel", 5000)]);
        let kept = counts.at_least(5000).into_iter().collect::<Vec<_>>();
        assert_eq!(kept, [("cat", 10_000), ("eel", 5000)]);
    }
}
