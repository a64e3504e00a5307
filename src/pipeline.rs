//! Checkpointed drivers for the tokenization and window streaming passes.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};

use crate::checkpoint::{TokenizeCheckpoint, TrainCheckpoint};
use crate::clean::clean_wikitext;
use crate::config::PipelineConfig;
use crate::encoder::{encode, CacheWriter};
use crate::error::Result;
use crate::index::load_index;
use crate::metrics::{sample_rss_kb, StreamStop, StreamSummary, TokenizeStop, TokenizeSummary};
use crate::walker::{BlockWalker, WalkItem};
use crate::window::{Window, WindowReader};

/// Shared flag requesting that a running pass stop at its next loop boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token in the running state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Builds (or resumes building) the token cache from the dump.
///
/// * cache present, no checkpoint: skipped, the cache is taken as complete;
/// * checkpoint present, cache missing: the checkpoint is stale and the pass restarts;
/// * checkpoint present, cache present: the pass resumes at the checkpointed block.
///
/// A block in flight when the previous process died is tokenized again, so the cache can
/// hold one block's records twice after a crash. `on_block` receives the completed and
/// total block counts after every block.
pub fn build_token_cache<F>(
    cfg: &PipelineConfig,
    cancel: &CancelToken,
    mut on_block: F,
) -> Result<TokenizeSummary>
where
    F: FnMut(usize, usize),
{
    cfg.validate()?;
    let started = Instant::now();
    let cache_exists = cfg.cache_path.exists();
    let checkpoint = TokenizeCheckpoint::load(&cfg.tokenize_checkpoint_path)?;
    if cache_exists && checkpoint.is_none() {
        info!(
            "{} already exists; skipping tokenization",
            cfg.cache_path.display()
        );
        return Ok(TokenizeSummary::new(0, 0, TokenizeStop::CacheExists));
    }

    let offsets = load_index(&cfg.index_path)?;
    let total = offsets.len();
    let start_block = match checkpoint {
        Some(ckpt) if cache_exists => ckpt.last_completed_block,
        Some(ckpt) => {
            warn!(
                "checkpoint at block {} has no cache at {}; starting over",
                ckpt.last_completed_block,
                cfg.cache_path.display()
            );
            0
        }
        None => 0,
    };
    if start_block >= total {
        info!("all {total} blocks already tokenized");
        return Ok(TokenizeSummary::new(
            start_block,
            total,
            TokenizeStop::AlreadyComplete,
        ));
    }

    info!("starting from block {start_block}/{total}");
    let mut summary = TokenizeSummary::new(start_block, total, TokenizeStop::Completed);
    let mut writer = CacheWriter::open_append(&cfg.cache_path)?;
    let walker = BlockWalker::open(
        &cfg.dump_path,
        offsets,
        start_block,
        cfg.decompress_chunk_bytes,
    )?;

    for item in walker {
        match item? {
            WalkItem::Article(article) => {
                summary.pages_seen += 1;
                if !article.qualifies(cfg.min_article_chars) {
                    continue;
                }
                let record = encode(&clean_wikitext(&article.body));
                writer.append(&record)?;
            }
            WalkItem::EndOfBlock(block) => {
                summary.completed_blocks = block + 1;
                on_block(summary.completed_blocks, total);
                let cancelled = cancel.is_cancelled();
                if cancelled || summary.completed_blocks % cfg.checkpoint_every_blocks == 0 {
                    writer.sync()?;
                    TokenizeCheckpoint::new(summary.completed_blocks)
                        .save(&cfg.tokenize_checkpoint_path)?;
                    debug!("[{}] checkpoint saved", summary.completed_blocks);
                }
                if cancelled {
                    summary.stop_reason = TokenizeStop::Cancelled;
                    break;
                }
            }
        }
    }

    if summary.stop_reason == TokenizeStop::Completed {
        writer.sync()?;
        TokenizeCheckpoint::new(summary.completed_blocks).save(&cfg.tokenize_checkpoint_path)?;
    }
    summary.records_written = writer.records_written();
    summary.tokens_written = writer.tokens_written();
    summary.elapsed = started.elapsed();
    info!(
        "tokenization {:?} at block {}/{}: pages={} records={} tokens={} in {:.2?} rss_kb={:?}",
        summary.stop_reason,
        summary.completed_blocks,
        total,
        summary.pages_seen,
        summary.records_written,
        summary.tokens_written,
        summary.elapsed,
        sample_rss_kb()
    );
    Ok(summary)
}

/// Streams windows from the token cache into `consumer`, resuming from the training
/// checkpoint.
///
/// The consumer receives the zero-based window number of this pass and the window. The
/// checkpoint is saved every [`PipelineConfig::checkpoint_every_windows`] windows and once
/// more on every exit path, including errors raised while reading the cache.
pub fn stream_windows<F>(
    cfg: &PipelineConfig,
    cancel: &CancelToken,
    mut consumer: F,
) -> Result<StreamSummary>
where
    F: FnMut(u64, &Window) -> ControlFlow<()>,
{
    cfg.validate()?;
    let started = Instant::now();
    let checkpoint = TrainCheckpoint::load_or_default(&cfg.train_checkpoint_path)?;
    info!(
        "resuming from byte offset {} with {} buffered tokens",
        checkpoint.cursor_bytes,
        checkpoint.buffer.len()
    );
    let mut reader = WindowReader::open(cfg, checkpoint)?;
    let mut summary = StreamSummary::new(reader.cursor_bytes());

    let pumped = pump_windows(cfg, cancel, &mut reader, &mut consumer, &mut summary);
    let saved = reader.checkpoint().save(&cfg.train_checkpoint_path);
    if saved.is_ok() {
        summary.checkpoints_saved += 1;
    }
    summary.end_cursor = reader.cursor_bytes();
    summary.elapsed = started.elapsed();
    pumped?;
    saved?;

    info!(
        "streaming {:?} after {} windows at byte offset {} ({} checkpoints, {:.2?})",
        summary.stop_reason,
        summary.windows,
        summary.end_cursor,
        summary.checkpoints_saved,
        summary.elapsed
    );
    Ok(summary)
}

fn pump_windows<F>(
    cfg: &PipelineConfig,
    cancel: &CancelToken,
    reader: &mut WindowReader,
    consumer: &mut F,
    summary: &mut StreamSummary,
) -> Result<()>
where
    F: FnMut(u64, &Window) -> ControlFlow<()>,
{
    loop {
        if cancel.is_cancelled() {
            summary.stop_reason = StreamStop::Cancelled;
            return Ok(());
        }
        let Some(window) = reader.next_window()? else {
            summary.stop_reason = StreamStop::Exhausted;
            return Ok(());
        };
        let step = summary.windows;
        summary.windows += 1;
        let flow = consumer(step, &window);
        if summary.windows % cfg.checkpoint_every_windows == 0 {
            reader.checkpoint().save(&cfg.train_checkpoint_path)?;
            summary.checkpoints_saved += 1;
            debug!(
                "window {} | offset {} bytes | checkpoint saved",
                summary.windows,
                reader.cursor_bytes()
            );
        }
        if flow.is_break() {
            summary.stop_reason = StreamStop::ConsumerStopped;
            return Ok(());
        }
    }
}
