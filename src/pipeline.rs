//! Orchestration of shard processing, ranking and publication
//!
//! For each ngram order, every shard that isn't checkpointed yet is
//! downloaded and counted. Each shard's filtered counts are published, merged
//! into the running counts of that order, and checkpointed. Once all shards of
//! an order have been handled, its top list is published. After all orders,
//! the top words and phrases are published in consolidated form.

use crate::{
    catalog::{GramOrder, ShardDescriptor},
    checkpoint::Checkpoints,
    config::Config,
    progress::{ProgressConfig, ProgressReport},
    publish::Publisher,
    stats::GramCounts,
    top::{self, RankedGram},
    tsv::{self, ShardOutcome, ShardSource},
};
use futures::stream::{self, StreamExt};
use std::{fmt, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use tokio_util::sync::CancellationToken;

/// Name of the consolidated top words artifact
pub const WORDS_TOP: &str = "words_top.json";

/// Name of the consolidated top phrases artifact
pub const PHRASES_TOP: &str = "phrases_top.json";

/// Name of the top list artifact of an ngram order
pub fn order_top_name(order: GramOrder) -> String {
    format!("{order}_top.json")
}

/// Ngram dataset processing pipeline
pub struct Pipeline {
    /// Pipeline configuration
    config: Arc<Config>,

    /// Where shards are downloaded from
    source: Arc<dyn ShardSource>,

    /// Record of already processed shards
    checkpoints: Checkpoints,

    /// Where results are published
    publisher: Publisher,

    /// Rate limiter for shard downloads
    pacer: Pacer,

    /// Request to stop processing
    cancel: CancellationToken,
}
//
impl Pipeline {
    /// Set up the pipeline
    pub fn new(
        config: Arc<Config>,
        source: Arc<dyn ShardSource>,
        checkpoints: Checkpoints,
        publisher: Publisher,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pacer: Pacer::new(config.pacing),
            config,
            source,
            checkpoints,
            publisher,
            cancel,
        }
    }

    /// Process every configured ngram order, then publish consolidated results
    ///
    /// Shard and publication failures are logged and reported in the summary,
    /// but do not stop the run. If cancellation is requested, shards which
    /// are being processed are committed, then the run stops without
    /// publishing any top list.
    pub async fn run(&self, report: &ProgressReport) -> RunSummary {
        let orders_progress = report.add(
            "Ngram orders",
            ProgressConfig::new(self.config.orders.len()).dont_show_rate_eta(),
        );
        let mut summary = RunSummary::default();
        let mut words_top = None;
        let mut phrases_top: Option<Vec<RankedGram>> = None;
        for &order in self.config.orders.iter() {
            let shards = self.config.catalog.shards_for(order);
            let (order_summary, order_top) = self.process_order(order, shards, report).await;
            summary.orders.push(order_summary);
            let Some(order_top) = order_top else {
                summary.cancelled = true;
                break;
            };
            if order.is_words() {
                words_top = Some(order_top);
            } else {
                phrases_top.get_or_insert_with(Vec::new).extend(order_top);
            }
            orders_progress.make_progress(1);
        }
        orders_progress.finish();
        if summary.cancelled {
            log::warn!("Processing was interrupted, consolidated results not written");
            return summary;
        }

        // Publish consolidated outputs: words (1-grams) and phrases (2 to 5-grams)
        for (name, top) in [(WORDS_TOP, words_top), (PHRASES_TOP, phrases_top)] {
            if let Some(top) = top {
                if !self.publisher.publish(name, &top).await {
                    summary.consolidated_missing += 1;
                }
            }
        }

        // Record that the job went through
        summary.job_marked = self.checkpoints.mark_job_complete().await;
        summary
    }

    /// Process the shards of an ngram order, then publish its top list
    ///
    /// Returns a summary of what was done, along with the published top list,
    /// or `None` in place of the top list if processing was cancelled.
    pub async fn process_order(
        &self,
        order: GramOrder,
        shards: Vec<ShardDescriptor>,
        report: &ProgressReport,
    ) -> (OrderSummary, Option<Vec<RankedGram>>) {
        log::info!("Processing {order}");
        let shards_progress = report.add(
            format!("Processing {order} shards"),
            ProgressConfig::new(shards.len()),
        );
        let mut summary = OrderSummary::new(order, shards.len());

        // Merge the counts of each processed shard as they come in. This is
        // the only place where the counts of the order are mutated.
        let mut order_counts = GramCounts::new();
        let mut shard_steps = stream::iter(shards)
            .map(|shard| self.fetch_shard(shard))
            .buffer_unordered(self.config.concurrency.get());
        while let Some((shard, step)) = shard_steps.next().await {
            shards_progress.make_progress(1);
            match step {
                ShardStep::Cancelled => {}
                ShardStep::Skipped => {
                    log::info!("Skipping {} - already processed", shard.checkpoint_key());
                    summary.skipped += 1;
                    shards_progress.reset_eta();
                }
                ShardStep::Fetched(ShardOutcome::Failed(e)) => {
                    log::warn!("{} will be retried on the next run: {e:#}", shard.checkpoint_key());
                    summary.failed.push(shard.shard_id);
                }
                ShardStep::Fetched(ShardOutcome::Empty) => {
                    summary.empty += 1;
                    self.commit_shard(&shard, GramCounts::new(), &mut order_counts, &mut summary)
                        .await;
                }
                ShardStep::Fetched(ShardOutcome::Counted(counts)) => {
                    summary.processed += 1;
                    self.commit_shard(&shard, counts, &mut order_counts, &mut summary)
                        .await;
                }
            }
        }
        shards_progress.finish();
        if self.cancel.is_cancelled() {
            log::warn!("Processing of {order} was interrupted: {summary}");
            return (summary, None);
        }

        // Generate final top results for this order
        log::info!("Generating final results for {order}");
        let top = top::select_top(&order_counts, self.config.min_freq, self.config.top_len(order));
        drop(order_counts);
        summary.top_len = top.len();
        if !self.publisher.publish(&order_top_name(order), &top).await {
            summary.artifacts_missing += 1;
        }
        log::info!("Completed {summary}");
        (summary, Some(top))
    }

    /// Download and count a shard, unless it was already processed or
    /// processing was cancelled
    async fn fetch_shard(&self, shard: ShardDescriptor) -> (ShardDescriptor, ShardStep) {
        if self.cancel.is_cancelled() {
            return (shard, ShardStep::Cancelled);
        }
        if self.checkpoints.is_done(&shard).await {
            return (shard, ShardStep::Skipped);
        }
        self.pacer.wait().await;
        if self.cancel.is_cancelled() {
            return (shard, ShardStep::Cancelled);
        }
        log::debug!("Starting download of {} shard {:?}", shard.order, shard.key);
        let outcome = tsv::aggregate(&*self.source, &shard).await;
        (shard, ShardStep::Fetched(outcome))
    }

    /// Publish, merge and checkpoint the counts of a shard that was fully read
    ///
    /// The checkpoint is only recorded once the shard's artifact is published,
    /// so that a shard whose artifact is missing gets processed again.
    async fn commit_shard(
        &self,
        shard: &ShardDescriptor,
        counts: GramCounts,
        order_counts: &mut GramCounts,
        summary: &mut OrderSummary,
    ) {
        let published = self
            .publisher
            .publish(&shard.artifact_name(), &counts.at_least(self.config.min_freq))
            .await;
        order_counts.merge(counts);
        if !published {
            summary.artifacts_missing += 1;
            log::warn!(
                "Not checkpointing {} since its results were not published",
                shard.checkpoint_key()
            );
        } else if !self.checkpoints.mark_done(shard).await {
            summary.checkpoints_missing += 1;
        }
    }
}

/// What happened to a shard before its results are committed
#[derive(Debug)]
enum ShardStep {
    /// Cancellation was requested before the shard was started
    Cancelled,

    /// The shard was processed by an earlier run
    Skipped,

    /// The shard was downloaded
    Fetched(ShardOutcome),
}

/// Minimal delay between shard downloads, shared by all concurrent downloads
#[derive(Debug)]
struct Pacer {
    /// Minimal delay between two download starts
    interval: Duration,

    /// Earliest time at which the next download may start
    next_start: Mutex<Option<Instant>>,
}
//
impl Pacer {
    /// Set up the rate limiter
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_start: Mutex::new(None),
        }
    }

    /// Wait until the next download may start
    async fn wait(&self) {
        if self.interval.is_zero() {
            return;
        }
        let mut next_start = self.next_start.lock().await;
        if let Some(next_start) = *next_start {
            tokio::time::sleep_until(next_start).await;
        }
        *next_start = Some(Instant::now() + self.interval);
    }
}

/// Summary of the processing of an ngram order
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OrderSummary {
    /// Ngram order
    pub order: GramOrder,

    /// Number of shards of this order
    pub shards: usize,

    /// Number of shards processed during this run
    pub processed: usize,

    /// Number of shards without any valid ngram
    pub empty: usize,

    /// Number of shards skipped because an earlier run processed them
    pub skipped: usize,

    /// Shards which could not be processed, and will be retried next time
    pub failed: Vec<Box<str>>,

    /// Number of artifacts which could not be published
    pub artifacts_missing: usize,

    /// Number of processed shards whose checkpoint could not be recorded
    pub checkpoints_missing: usize,

    /// Length of the published top list
    pub top_len: usize,
}
//
impl OrderSummary {
    /// Set up the summary of an order with a certain number of shards
    fn new(order: GramOrder, shards: usize) -> Self {
        Self {
            order,
            shards,
            processed: 0,
            empty: 0,
            skipped: 0,
            failed: Vec::new(),
            artifacts_missing: 0,
            checkpoints_missing: 0,
            top_len: 0,
        }
    }
}
//
impl fmt::Display for OrderSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{} shards processed ({} empty), {} skipped, {} failed, \
             {} artifacts and {} checkpoints missing, final top {} grams",
            self.order,
            self.processed + self.empty,
            self.shards,
            self.empty,
            self.skipped,
            self.failed.len(),
            self.artifacts_missing,
            self.checkpoints_missing,
            self.top_len,
        )
    }
}

/// Summary of a pipeline run
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunSummary {
    /// Summary of each ngram order that was started
    pub orders: Vec<OrderSummary>,

    /// Number of consolidated artifacts which could not be published
    pub consolidated_missing: usize,

    /// Truth that processing was interrupted
    pub cancelled: bool,

    /// Truth that the job status was recorded
    pub job_marked: bool,
}
//
impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for order in &self.orders {
            writeln!(f, "{order}")?;
        }
        if self.consolidated_missing > 0 {
            writeln!(
                f,
                "{} consolidated top lists could not be published",
                self.consolidated_missing
            )?;
        }
        if self.cancelled {
            writeln!(f, "Interrupted before completion")
        } else if self.job_marked {
            writeln!(f, "Job status recorded")
        } else {
            writeln!(f, "Job status could not be recorded")
        }
    }
}
