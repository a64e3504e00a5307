//! Summaries describing how a tokenization or streaming pass ended.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Reason a tokenization pass returned.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TokenizeStop {
    /// Every block of the index was processed.
    Completed,
    /// The cache already existed without a resumable checkpoint; nothing was done.
    CacheExists,
    /// The checkpoint shows every block was already processed.
    AlreadyComplete,
    /// Cancellation was requested; progress was checkpointed at a block boundary.
    Cancelled,
}

/// Reason a window streaming pass returned.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StreamStop {
    /// The cache could not fill another complete window.
    Exhausted,
    /// Cancellation was requested.
    Cancelled,
    /// The consumer asked to stop.
    ConsumerStopped,
}

/// Counters gathered by a tokenization pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenizeSummary {
    /// Block the pass started from.
    pub start_block: usize,
    /// Completed block count when the pass returned.
    pub completed_blocks: usize,
    /// Blocks in the index.
    pub total_blocks: usize,
    /// Pages parsed from the dump.
    pub pages_seen: u64,
    /// Records appended to the cache.
    pub records_written: u64,
    /// Tokens appended to the cache, sentinels included.
    pub tokens_written: u64,
    /// Wall-clock duration of the pass.
    pub elapsed: Duration,
    /// Reason the pass returned.
    pub stop_reason: TokenizeStop,
}

impl TokenizeSummary {
    /// Creates an empty summary for a pass starting at `start_block`.
    #[must_use]
    pub fn new(start_block: usize, total_blocks: usize, stop_reason: TokenizeStop) -> Self {
        Self {
            start_block,
            completed_blocks: start_block,
            total_blocks,
            pages_seen: 0,
            records_written: 0,
            tokens_written: 0,
            elapsed: Duration::ZERO,
            stop_reason,
        }
    }
}

/// Counters gathered by a window streaming pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamSummary {
    /// Cache cursor restored from the checkpoint.
    pub start_cursor: u64,
    /// Cache cursor saved by the final checkpoint.
    pub end_cursor: u64,
    /// Windows handed to the consumer during this pass.
    pub windows: u64,
    /// Checkpoints written, the final one included.
    pub checkpoints_saved: u64,
    /// Wall-clock duration of the pass.
    pub elapsed: Duration,
    /// Reason the pass returned.
    pub stop_reason: StreamStop,
}

impl StreamSummary {
    /// Creates an empty summary for a pass resuming at `start_cursor`.
    #[must_use]
    pub fn new(start_cursor: u64) -> Self {
        Self {
            start_cursor,
            end_cursor: start_cursor,
            windows: 0,
            checkpoints_saved: 0,
            elapsed: Duration::ZERO,
            stop_reason: StreamStop::Exhausted,
        }
    }
}

#[cfg(target_os = "linux")]
fn current_rss_kb() -> Option<usize> {
    use std::fs::File;
    use std::io::{BufRead, BufReader};

    let file = File::open("/proc/self/status").ok()?;
    for line in BufReader::new(file).lines().map_while(Result::ok) {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            return rest
                .split_whitespace()
                .find_map(|part| part.parse::<usize>().ok());
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn current_rss_kb() -> Option<usize> {
    None
}

/// Samples the current resident set size (RSS) on supported platforms.
pub fn sample_rss_kb() -> Option<usize> {
    current_rss_kb()
}
