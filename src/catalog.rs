//! Shards of the Google Books Ngram dataset

use std::{fmt, sync::OnceLock};

/// Number of words in an ngram, between 1 and [`GramOrder::MAX`]
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct GramOrder(u8);
//
impl GramOrder {
    /// Largest ngram length published in the dataset
    pub const MAX: u8 = 5;

    /// Validate an ngram length
    pub fn new(order: u8) -> Option<Self> {
        (1..=Self::MAX).contains(&order).then_some(Self(order))
    }

    /// All ngram lengths from the dataset, by increasing length
    pub fn all() -> impl Iterator<Item = Self> {
        (1..=Self::MAX).map(Self)
    }

    /// Number of words in each ngram
    pub fn get(self) -> usize {
        usize::from(self.0)
    }

    /// Truth that ngrams of this order are single words
    pub fn is_words(self) -> bool {
        self.0 == 1
    }
}
//
impl fmt::Display for GramOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}gram", self.0)
    }
}

/// One downloadable data file of the dataset
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ShardDescriptor {
    /// Length of the ngrams inside
    pub order: GramOrder,

    /// Alphabetic prefix of the ngrams inside ("a" or "ab")
    pub key: Box<str>,

    /// File stem of the URL, used to name checkpoints and artifacts
    pub shard_id: Box<str>,

    /// Where the shard can be downloaded
    pub url: Box<str>,
}
//
impl ShardDescriptor {
    /// Key of this shard's record in the checkpoint store
    pub fn checkpoint_key(&self) -> String {
        format!("{}_{}", self.order, self.shard_id)
    }

    /// Name of the artifact holding this shard's filtered counts
    pub fn artifact_name(&self) -> String {
        format!("{}_{}_filtered.json", self.order, self.shard_id)
    }
}

/// Where the dataset shards are published
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Catalog {
    /// Base URL of the dataset, without trailing slash
    pub source_url: Box<str>,

    /// Corpus name, as in dataset URLs (e.g. "eng-all", "eng-fiction")
    pub corpus: Box<str>,
}
//
impl Catalog {
    /// Default dataset location
    pub const GOOGLE_BOOKS: &'static str = "http://storage.googleapis.com/books/ngrams/books";

    /// Default corpus
    pub const ENGLISH: &'static str = "eng-all";

    /// Dataset version that the shard names refer to
    const VERSION: &'static str = "20120701";

    /// List the shards of a given ngram order
    ///
    /// Single words are split across 26 single-letter shards, longer ngrams
    /// across 676 two-letter shards ordered from "aa" to "zz", first letter
    /// varying slowest.
    pub fn shards_for(&self, order: GramOrder) -> Vec<ShardDescriptor> {
        let keys = if order.is_words() {
            single_letter_keys()
        } else {
            two_letter_keys()
        };
        keys.iter()
            .map(|key| {
                let shard_id = format!(
                    "googlebooks-{}-{order}-{}-{key}",
                    self.corpus,
                    Self::VERSION
                );
                let url = format!("{}/{shard_id}.gz", self.source_url.trim_end_matches('/'));
                ShardDescriptor {
                    order,
                    key: key.clone(),
                    shard_id: shard_id.into(),
                    url: url.into(),
                }
            })
            .collect()
    }
}
//
impl Default for Catalog {
    fn default() -> Self {
        Self {
            source_url: Self::GOOGLE_BOOKS.into(),
            corpus: Self::ENGLISH.into(),
        }
    }
}

/// Shard keys used for single words
fn single_letter_keys() -> &'static [Box<str>] {
    static LAZY: OnceLock<Box<[Box<str>]>> = OnceLock::new();
    LAZY.get_or_init(|| ('a'..='z').map(|c| c.to_string().into_boxed_str()).collect())
}

/// Shard keys used for ngrams of 2 words or more
fn two_letter_keys() -> &'static [Box<str>] {
    static LAZY: OnceLock<Box<[Box<str>]>> = OnceLock::new();
    LAZY.get_or_init(|| {
        ('a'..='z')
            .flat_map(|first| {
                ('a'..='z').map(move |second| format!("{first}{second}").into_boxed_str())
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn gram_order_bounds() {
        assert_eq!(GramOrder::new(0), None);
        assert_eq!(GramOrder::new(6), None);
        assert_eq!(GramOrder::new(3).map(GramOrder::get), Some(3));
        assert_eq!(GramOrder::all().count(), 5);
        assert_eq!(GramOrder::new(2).unwrap().to_string(), "2gram");
    }

    #[test]
    fn shard_counts_and_uniqueness() {
        let catalog = Catalog::default();
        for order in GramOrder::all() {
            let shards = catalog.shards_for(order);
            let expected = if order.is_words() { 26 } else { 676 };
            assert_eq!(shards.len(), expected, "{order}");
            let ids = shards.iter().map(|s| &s.shard_id).collect::<HashSet<_>>();
            assert_eq!(ids.len(), expected, "duplicate shard ids for {order}");
            assert!(shards.iter().all(|s| s.order == order));
        }
    }

    #[test]
    fn two_letter_shards_are_ordered_first_letter_major() {
        let shards = Catalog::default().shards_for(GramOrder::new(2).unwrap());
        let keys = shards.iter().map(|s| &*s.key).collect::<Vec<_>>();
        assert_eq!(&keys[..3], ["aa", "ab", "ac"]);
        assert_eq!(keys[26], "ba");
        assert_eq!(keys[675], "zz");
    }

    #[test]
    fn urls_and_names() {
        let shards = Catalog::default().shards_for(GramOrder::new(1).unwrap());
        let a = &shards[0];
        assert_eq!(
            &*a.url,
            "http://storage.googleapis.com/books/ngrams/books/googlebooks-eng-all-1gram-20120701-a.gz"
        );
        assert_eq!(&*a.shard_id, "googlebooks-eng-all-1gram-20120701-a");
        assert_eq!(a.checkpoint_key(), "1gram_googlebooks-eng-all-1gram-20120701-a");
        assert_eq!(
            a.artifact_name(),
            "1gram_googlebooks-eng-all-1gram-20120701-a_filtered.json"
        );

        let fiction = Catalog {
            source_url: "http://mirror.local/ngrams/".into(),
            corpus: "eng-fiction".into(),
        };
        let shard = &fiction.shards_for(GramOrder::new(3).unwrap())[1];
        assert_eq!(
            &*shard.url,
            "http://mirror.local/ngrams/googlebooks-eng-fiction-3gram-20120701-ab.gz"
        );
    }
}
