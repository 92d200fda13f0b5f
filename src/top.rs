//! Select the top ngrams from the aggregated counts

use crate::{stats::GramCounts, MatchCount, Ngram};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
};

/// Ngram from a published top list
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct RankedGram {
    /// Case-sensitive ngram
    pub gram: Ngram,

    /// Total number of matches across all shards
    pub freq: MatchCount,
}

/// Popularity of an ngram, ordered such that more popular is greater
///
/// Ties between equally frequent ngrams are broken in favor of the ngram that
/// comes first in byte-lexicographic order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Popularity<'counts> {
    freq: MatchCount,
    gram: &'counts str,
}
//
impl Ord for Popularity<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.freq
            .cmp(&other.freq)
            .then_with(|| other.gram.cmp(self.gram))
    }
}
//
impl PartialOrd for Popularity<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pick the `max_len` most frequent ngrams with at least `min_freq` matches
///
/// Ngrams below the threshold are discarded before ranking, so they can never
/// take a slot. Results come by decreasing frequency, then by increasing
/// ngram. Less than `max_len` results are returned if fewer ngrams qualify.
pub fn select_top(counts: &GramCounts, min_freq: MatchCount, max_len: usize) -> Vec<RankedGram> {
    if max_len == 0 {
        return Vec::new();
    }

    // Find the top ngrams up to this limit
    let top = (counts.as_map().par_iter())
        .filter(|&(_, &freq)| freq >= min_freq)
        .map(|(gram, &freq)| Reverse(Popularity { freq, gram: &**gram }))
        // First determine top ngrams on each thread using a min-heap...
        .fold(
            || BinaryHeap::with_capacity(max_len + 1),
            |mut heap, entry| {
                heap.push(entry);
                if heap.len() > max_len {
                    heap.pop();
                }
                heap
            },
        )
        // ...then merge thread results into a global result
        .reduce(BinaryHeap::new, |heap1, heap2| {
            let (mut dst, src) = if heap1.len() >= heap2.len() {
                (heap1, heap2)
            } else {
                (heap2, heap1)
            };
            for entry in src {
                dst.push(entry);
                if dst.len() > max_len {
                    dst.pop();
                }
            }
            dst
        });

    // Sorting the reversed entries in ascending order puts the most popular
    // ngrams first
    top.into_sorted_vec()
        .into_iter()
        .map(|Reverse(Popularity { freq, gram })| RankedGram {
            gram: gram.into(),
            freq,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(entries: &[(&str, MatchCount)]) -> GramCounts {
        entries.iter().map(|&(g, c)| (g.into(), c)).collect()
    }

    fn ranked(entries: &[(&str, MatchCount)]) -> Vec<RankedGram> {
        entries
            .iter()
            .map(|&(gram, freq)| RankedGram {
                gram: gram.into(),
                freq,
            })
            .collect()
    }

    #[test]
    fn ties_go_to_first_ngram_in_lexicographic_order() {
        let counts = counts(&[("b", 10), ("a", 10), ("c", 5)]);
        assert_eq!(select_top(&counts, 6, 1), ranked(&[("a", 10)]));
        assert_eq!(select_top(&counts, 6, 5), ranked(&[("a", 10), ("b", 10)]));
    }

    #[test]
    fn threshold_applies_before_ranking() {
        let counts = counts(&[("the", 900), ("of", 5), ("cat", 50), ("dog", 40)]);
        assert_eq!(select_top(&counts, 41, 3), ranked(&[("the", 900), ("cat", 50)]));
        assert_eq!(select_top(&counts, 41, 0), ranked(&[]));
        assert_eq!(select_top(&counts, 1000, 3), ranked(&[]));
    }

    #[test]
    fn keeps_most_frequent_in_decreasing_order() {
        let counts = (0..10_000u64)
            .map(|i| (format!("w{i:05}").into(), i))
            .collect::<GramCounts>();
        let top = select_top(&counts, 5000, 3);
        assert_eq!(top, ranked(&[("w09999", 9999), ("w09998", 9998), ("w09997", 9997)]));

        let all = select_top(&counts, 9990, 100);
        assert_eq!(all.len(), 10);
        assert!(all.windows(2).all(|w| w[0].freq > w[1].freq));
    }
}
