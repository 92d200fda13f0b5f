//! Processing pipeline configuration

use crate::{
    catalog::{Catalog, GramOrder},
    Args, MatchCount,
};
use anyhow::Context;
use std::{num::NonZeroUsize, path::PathBuf, sync::Arc, time::Duration};

/// Final process configuration
///
/// This is the result of validating and digesting [`Args`]. Please refer to
/// [`Args`] to know more about individual fields.
#[allow(missing_docs)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// Where the dataset shards come from
    pub catalog: Catalog,

    /// Ngram orders to be processed, in increasing order without duplicates
    pub orders: Box<[GramOrder]>,

    /// Destination bucket of the artifacts
    pub bucket: Box<str>,

    /// Path prefix of the artifacts inside the bucket
    pub prefix: Box<str>,

    // Other fields have the same meaning as in Args
    pub store_root: PathBuf,
    pub checkpoint_db: Option<Box<str>>,
    pub min_freq: MatchCount,
    pub top_words: usize,
    pub top_phrases: usize,
    pub concurrency: NonZeroUsize,
    pub pacing: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}
//
impl Config {
    /// Determine process configuration from CLI arguments
    ///
    /// Fails if no destination bucket was specified, since nothing useful can
    /// be done without one.
    pub(crate) fn new(args: Args) -> crate::Result<Arc<Self>> {
        let Args {
            bucket,
            checkpoint_db,
            store_root,
            prefix,
            source_url,
            corpus,
            orders,
            min_freq,
            top_words,
            top_phrases,
            concurrency,
            pacing_ms,
            connect_timeout,
            read_timeout,
        } = args;
        let bucket = bucket
            .filter(|bucket| !bucket.trim().is_empty())
            .context("no destination bucket, please set NGRAM_BUCKET or pass --bucket")?;
        let mut orders = if orders.is_empty() {
            GramOrder::all().collect::<Vec<_>>()
        } else {
            (orders.into_iter())
                .map(|n| {
                    GramOrder::new(n).with_context(|| format!("{n} is not a valid ngram order"))
                })
                .collect::<crate::Result<Vec<_>>>()?
        };
        orders.sort_unstable();
        orders.dedup();
        Ok(Arc::new(Self {
            catalog: Catalog { source_url, corpus },
            orders: orders.into(),
            bucket,
            prefix,
            store_root,
            checkpoint_db: checkpoint_db.filter(|db| !db.trim().is_empty()),
            min_freq: min_freq.get(),
            top_words: top_words.get(),
            top_phrases: top_phrases.get(),
            concurrency,
            pacing: Duration::from_millis(pacing_ms),
            connect_timeout: Duration::from_secs(connect_timeout.get()),
            read_timeout: Duration::from_secs(read_timeout.get()),
        }))
    }

    /// Maximal length of the top list for some ngram order
    pub fn top_len(&self, order: GramOrder) -> usize {
        if order.is_words() {
            self.top_words
        } else {
            self.top_phrases
        }
    }
}
