//! This program is based on the Google Books Ngram dataset, whose general
//! documentation you can find at
//! <http://storage.googleapis.com/books/ngrams/books/datasetsv3.html>.

mod catalog;
mod checkpoint;
mod config;
mod pipeline;
mod progress;
mod publish;
mod stats;
mod top;
mod tsv;

use crate::{
    catalog::Catalog,
    checkpoint::{Checkpoints, FsCheckpoints},
    config::Config,
    pipeline::Pipeline,
    progress::ProgressReport,
    publish::{FsBucket, Publisher},
    tsv::HttpSource,
};
use clap::Parser;
use log::LevelFilter;
use std::{
    num::{NonZeroU64, NonZeroUsize},
    path::PathBuf,
    sync::Arc,
};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

/// Compute the most frequent words and phrases of the Google Books Ngram
/// dataset, and publish them as JSON files
///
/// Processing is resumable: every shard of the dataset whose results were
/// already published by a previous run is skipped.
#[derive(Parser, Debug)]
#[command(version, author)]
struct Args {
    /// Destination bucket of the published JSON files
    #[arg(long, env = "NGRAM_BUCKET")]
    bucket: Option<Box<str>>,

    /// Alternate checkpoint database
    ///
    /// Checkpoints record which dataset shards were already processed. Using
    /// another database than the default one starts over from scratch.
    #[arg(long, env = "NGRAM_CHECKPOINT_DB")]
    checkpoint_db: Option<Box<str>>,

    /// Directory under which buckets and checkpoint databases are stored
    #[arg(long, default_value = "ngram-store")]
    store_root: PathBuf,

    /// Path prefix of the published files inside the bucket
    #[arg(long, default_value = "data/google-ngram")]
    prefix: Box<str>,

    /// Base URL of the dataset shards
    #[arg(long, default_value = Catalog::GOOGLE_BOOKS)]
    source_url: Box<str>,

    /// Google Books Ngram corpus to be used, e.g. "eng-all" or "eng-fiction"
    #[arg(short, long, default_value = Catalog::ENGLISH)]
    corpus: Box<str>,

    /// Ngram orders to be processed, e.g. "1,2"
    ///
    /// By default, every order from 1 (single words) to 5 is processed.
    #[arg(
        short,
        long,
        value_delimiter = ',',
        value_parser = clap::value_parser!(u8).range(1..=5)
    )]
    orders: Vec<u8>,

    /// Minimum accepted number of matches across all books
    ///
    /// Extremely rare ngrams are of little interest, and are more likely to be
    /// OCR errors. Ngrams which occur less often than this are not published.
    #[arg(short = 'm', long, default_value = "5000")]
    min_freq: NonZeroU64,

    /// Max number of published words (1-grams)
    #[arg(long, default_value = "30000")]
    top_words: NonZeroUsize,

    /// Max number of published phrases, for each order from 2 to 5
    #[arg(long, default_value = "10000")]
    top_phrases: NonZeroUsize,

    /// Max number of concurrent shard downloads
    #[arg(short = 'j', long, default_value = "1")]
    concurrency: NonZeroUsize,

    /// Minimal delay between two shard downloads, in milliseconds
    ///
    /// This avoids overloading the dataset's host. Set to 0 to disable.
    #[arg(long, default_value = "1000")]
    pacing_ms: u64,

    /// Timeout for connecting to the dataset's host, in seconds
    #[arg(long, default_value = "300")]
    connect_timeout: NonZeroU64,

    /// Timeout for receiving more data from the dataset's host, in seconds
    ///
    /// Shards whose download stalls for longer than this are reported as
    /// failed, and will be retried by the next run.
    #[arg(long, default_value = "300")]
    read_timeout: NonZeroU64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set up logging
    setup_logging().map_err(|e| anyhow::format_err!("{e}"))?;
    log::info!("Starting Google Ngram processing");

    // Decode CLI arguments and environment
    let args = Args::parse();
    let config = match Config::new(args) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {e:#}");
            return Err(e);
        }
    };

    // Set up the storage backends, degrading to "nothing done yet" if the
    // checkpoint database is not usable
    let bucket = FsBucket::new(&config.store_root, &config.bucket);
    let publisher = Publisher::new(Arc::new(bucket), &config.prefix);
    let checkpoints =
        match FsCheckpoints::open(&config.store_root, config.checkpoint_db.as_deref()).await {
            Ok(store) => Checkpoints::new(Arc::new(store)),
            Err(e) => {
                log::error!("Failed to initialize checkpoint store: {e:#}");
                Checkpoints::disabled()
            }
        };
    let source = HttpSource::new(config.connect_timeout, config.read_timeout)?;

    // Stop starting new shards on Ctrl+C
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted, finishing shards in flight then stopping");
                cancel.cancel();
            }
        });
    }

    // Run the pipeline
    let pipeline = Pipeline::new(config, Arc::new(source), checkpoints, publisher, cancel);
    let summary = pipeline.run(&ProgressReport::new()).await;

    // Display a summary of what was done
    {
        let stdout = tokio::io::stdout();
        let mut stdout = BufWriter::new(stdout);
        stdout.write_all(summary.to_string().as_bytes()).await?;
        stdout.flush().await?;
    }
    log::info!("Google Ngram processing finished");
    Ok(())
}

/// Use anyhow for Result type erasure
pub use anyhow::Result;

/// Case-sensitive ngram, with words separated by spaces
pub type Ngram = Box<str>;

/// Number of matches for an ngram
///
/// According to
/// https://github.com/orgtre/google-books-ngram-frequency?tab=readme-ov-file#the-underlying-corpus,
/// English can have >283 billion matches over 10 years, so the total match
/// count of a very common word could exceed the range of u32.
pub type MatchCount = u64;

/// Set up logging
fn setup_logging() -> syslog::Result<()> {
    syslog::init(
        syslog::Facility::LOG_USER,
        if cfg!(feature = "log-trace") {
            LevelFilter::Trace
        } else if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
        None,
    )
}
