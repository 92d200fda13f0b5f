//! Processing of gzipped TSV data files from Google

pub mod filter;

use crate::{catalog::ShardDescriptor, stats::GramCounts, Result};
use anyhow::Context;
use async_compression::tokio::bufread::GzipDecoder;
use async_trait::async_trait;
use csv_async::AsyncReaderBuilder;
use futures::stream::{self, StreamExt};
use reqwest::Response;
use std::{
    io::{self, ErrorKind},
    time::Duration,
};
use tokio::{
    io::{AsyncBufRead, AsyncRead},
    time,
};
use tokio_util::io::StreamReader;

/// Number of records between two progress log messages
const PROGRESS_CADENCE: u64 = 50_000;

/// Raw bytes of a shard, as they come from the remote host
pub type ShardReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// Something that shards can be downloaded from
#[async_trait]
pub trait ShardSource: Send + Sync {
    /// Start downloading the shard at a certain URL
    async fn open(&self, url: &str) -> Result<ShardReader>;
}

/// Download shards over HTTP
#[derive(Clone, Debug)]
pub struct HttpSource {
    /// HTTP client
    client: reqwest::Client,

    /// Maximal time to wait for the server's next bytes
    read_timeout: Duration,
}
//
impl HttpSource {
    /// Set up an HTTP client
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .context("setting up the HTTP client")?;
        Ok(Self {
            client,
            read_timeout,
        })
    }
}
//
#[async_trait]
impl ShardSource for HttpSource {
    async fn open(&self, url: &str) -> Result<ShardReader> {
        let read_timeout = self.read_timeout;
        let context = || format!("initiating download of {url}");
        let response = time::timeout(read_timeout, self.client.get(url).send())
            .await
            .map_err(|_| stalled(read_timeout))
            .with_context(context)?
            .and_then(Response::error_for_status)
            .with_context(context)?;

        // Fail any read that stays without data for too long
        let chunks = Box::pin(response.bytes_stream());
        let chunks = stream::unfold(chunks, move |mut chunks| async move {
            let chunk = match time::timeout(read_timeout, chunks.next()).await {
                Ok(Some(chunk)) => {
                    // Translate reqwest errors into I/O errors
                    chunk.map_err(|e| io::Error::new(ErrorKind::Other, Box::new(e)))
                }
                Ok(None) => return None,
                Err(_) => Err(stalled(read_timeout)),
            };
            Some((chunk, chunks))
        });
        Ok(Box::new(StreamReader::new(Box::pin(chunks))))
    }
}

/// Error emitted when the remote host stops sending data
fn stalled(read_timeout: Duration) -> io::Error {
    io::Error::new(
        ErrorKind::TimedOut,
        format!("no data received for {}s", read_timeout.as_secs_f32()),
    )
}

/// Result of processing a shard
#[derive(Debug)]
pub enum ShardOutcome {
    /// The shard was fully read and contained valid ngrams
    Counted(GramCounts),

    /// The shard was fully read, but contained no valid ngram
    Empty,

    /// The shard could not be fully read, its contents must not be used
    Failed(anyhow::Error),
}

/// Download a shard and count the valid ngrams inside
///
/// Never fails: download, decompression and I/O errors are logged and turned
/// into [`ShardOutcome::Failed`], so that they are not mistaken for a shard
/// without valid ngrams.
pub async fn aggregate(source: &dyn ShardSource, shard: &ShardDescriptor) -> ShardOutcome {
    log::info!("Processing {}", shard.url);
    match download_and_count(source, shard).await {
        Ok(counts) if counts.is_empty() => ShardOutcome::Empty,
        Ok(counts) => ShardOutcome::Counted(counts),
        Err(e) => {
            log::error!("Error processing {}: {e:#}", shard.url);
            ShardOutcome::Failed(e)
        }
    }
}

/// Fallible part of [`aggregate()`]
async fn download_and_count(
    source: &dyn ShardSource,
    shard: &ShardDescriptor,
) -> Result<GramCounts> {
    let bytes = source.open(&shard.url).await?;

    // Apply gzip decoder to compressed bytes
    let tsv_bytes: Box<dyn AsyncRead + Send + Unpin> = if shard.url.ends_with(".gz") {
        let mut decoder = GzipDecoder::new(bytes);
        decoder.multiple_members(true);
        Box::new(decoder)
    } else {
        Box::new(bytes)
    };
    count_grams(tsv_bytes, shard).await
}

/// Count the valid ngrams of a shard from its uncompressed TSV contents
pub async fn count_grams(
    tsv_bytes: impl AsyncRead + Send + Unpin,
    shard: &ShardDescriptor,
) -> Result<GramCounts> {
    // Apply TSV decoder to uncompressed bytes. Ngrams may contain quotes, and
    // short records must be skipped rather than treated as errors.
    let mut records = AsyncReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .quoting(false)
        .flexible(true)
        .create_reader(tsv_bytes)
        .into_byte_records();

    // Accumulate match counts from valid records
    let mut counts = GramCounts::new();
    let mut lines = 0u64;
    let context = || format!("fetching and processing {}", shard.url);
    while let Some(record) = records.next().await {
        let record = record.with_context(context)?;
        lines += 1;
        if lines % PROGRESS_CADENCE == 0 {
            log::info!("Processed {lines} lines from {}", shard.url);
        }
        if let Some((ngram, match_count)) = filter::parse_record(&record, shard.order) {
            counts.add(ngram, match_count);
        }
    }
    log::info!(
        "Completed {}: {lines} lines, {} unique grams",
        shard.url,
        counts.len()
    );
    Ok(counts)
}
