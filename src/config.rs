//! Immutable pipeline configuration shared by every component.

use std::path::{Path, PathBuf};

use crate::error::{Result, WikitokError};
use serde::{Deserialize, Serialize};

/// Default location of the multistream dump.
pub const DEFAULT_DUMP_PATH: &str =
    "wiki-dump/enwiki-20260101-pages-articles-multistream.xml.bz2";
/// Default location of the companion block index.
pub const DEFAULT_INDEX_PATH: &str =
    "wiki-dump/enwiki-20260101-pages-articles-multistream-index.txt.bz2";
/// Default location of the token cache.
pub const DEFAULT_CACHE_PATH: &str = "wiki-dump/tokens.bin";
/// Default location of the tokenization checkpoint.
pub const DEFAULT_TOKENIZE_CHECKPOINT: &str = "wiki-dump/tokenize_checkpoint.json";
/// Default location of the training checkpoint.
pub const DEFAULT_TRAIN_CHECKPOINT: &str = "wiki-dump/train_checkpoint.json";

/// Configuration for the tokenization and window streaming passes.
///
/// Built once at startup and handed by reference to each component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Compressed multistream dump.
    pub dump_path: PathBuf,
    /// Block index, one `offset:page_id:title` record per line (optionally `.bz2`).
    pub index_path: PathBuf,
    /// Length-delimited token cache.
    pub cache_path: PathBuf,
    /// Checkpoint tracking the last completed block.
    pub tokenize_checkpoint_path: PathBuf,
    /// Checkpoint tracking the window reader cursor and buffer.
    pub train_checkpoint_path: PathBuf,
    /// Number of tokens in each input/target window.
    pub context_len: usize,
    /// Bytes read from the cache per refill of the sliding buffer.
    pub read_chunk_bytes: usize,
    /// Bytes of compressed input fed to the decompressor per step.
    pub decompress_chunk_bytes: usize,
    /// Save the tokenization checkpoint whenever the completed block count is a multiple of this.
    pub checkpoint_every_blocks: usize,
    /// Save the training checkpoint every this many emitted windows.
    pub checkpoint_every_windows: u64,
    /// Minimum raw body length, in characters, for an article to be tokenized.
    pub min_article_chars: usize,
}

impl PipelineConfig {
    /// Returns a builder initialised with [`PipelineConfig::default`].
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Validates the invariants required by the pipelines.
    pub fn validate(&self) -> Result<()> {
        if self.context_len == 0 {
            return Err(WikitokError::InvalidConfig(
                "context_len must be greater than zero".into(),
            ));
        }
        if self.read_chunk_bytes < 4 {
            return Err(WikitokError::InvalidConfig(format!(
                "read_chunk_bytes ({}) must hold at least one record header",
                self.read_chunk_bytes
            )));
        }
        if self.decompress_chunk_bytes == 0 {
            return Err(WikitokError::InvalidConfig(
                "decompress_chunk_bytes must be greater than zero".into(),
            ));
        }
        if self.checkpoint_every_blocks == 0 {
            return Err(WikitokError::InvalidConfig(
                "checkpoint_every_blocks must be greater than zero".into(),
            ));
        }
        if self.checkpoint_every_windows == 0 {
            return Err(WikitokError::InvalidConfig(
                "checkpoint_every_windows must be greater than zero".into(),
            ));
        }
        let paths = [
            &self.cache_path,
            &self.tokenize_checkpoint_path,
            &self.train_checkpoint_path,
        ];
        for (idx, path) in paths.iter().enumerate() {
            if paths[idx + 1..].contains(path) {
                return Err(WikitokError::InvalidConfig(format!(
                    "output path {} is used for more than one file",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dump_path: PathBuf::from(DEFAULT_DUMP_PATH),
            index_path: PathBuf::from(DEFAULT_INDEX_PATH),
            cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
            tokenize_checkpoint_path: PathBuf::from(DEFAULT_TOKENIZE_CHECKPOINT),
            train_checkpoint_path: PathBuf::from(DEFAULT_TRAIN_CHECKPOINT),
            context_len: 256,
            read_chunk_bytes: 65_536 * 2,
            decompress_chunk_bytes: 65_536,
            checkpoint_every_blocks: 10,
            checkpoint_every_windows: 1_000,
            min_article_chars: 200,
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug, Default, Clone)]
pub struct PipelineBuilder {
    cfg: PipelineConfig,
}

impl PipelineBuilder {
    /// Sets the compressed dump path.
    #[must_use]
    pub fn dump_path(mut self, path: impl AsRef<Path>) -> Self {
        self.cfg.dump_path = path.as_ref().to_path_buf();
        self
    }

    /// Sets the block index path.
    #[must_use]
    pub fn index_path(mut self, path: impl AsRef<Path>) -> Self {
        self.cfg.index_path = path.as_ref().to_path_buf();
        self
    }

    /// Sets the token cache path.
    #[must_use]
    pub fn cache_path(mut self, path: impl AsRef<Path>) -> Self {
        self.cfg.cache_path = path.as_ref().to_path_buf();
        self
    }

    /// Sets the tokenization checkpoint path.
    #[must_use]
    pub fn tokenize_checkpoint_path(mut self, path: impl AsRef<Path>) -> Self {
        self.cfg.tokenize_checkpoint_path = path.as_ref().to_path_buf();
        self
    }

    /// Sets the training checkpoint path.
    #[must_use]
    pub fn train_checkpoint_path(mut self, path: impl AsRef<Path>) -> Self {
        self.cfg.train_checkpoint_path = path.as_ref().to_path_buf();
        self
    }

    /// Sets the window length.
    #[must_use]
    pub fn context_len(mut self, value: usize) -> Self {
        self.cfg.context_len = value;
        self
    }

    /// Sets the cache read chunk size in bytes.
    #[must_use]
    pub fn read_chunk_bytes(mut self, value: usize) -> Self {
        self.cfg.read_chunk_bytes = value;
        self
    }

    /// Sets the compressed input chunk size in bytes.
    #[must_use]
    pub fn decompress_chunk_bytes(mut self, value: usize) -> Self {
        self.cfg.decompress_chunk_bytes = value;
        self
    }

    /// Sets the tokenization checkpoint cadence in blocks.
    #[must_use]
    pub fn checkpoint_every_blocks(mut self, value: usize) -> Self {
        self.cfg.checkpoint_every_blocks = value;
        self
    }

    /// Sets the training checkpoint cadence in windows.
    #[must_use]
    pub fn checkpoint_every_windows(mut self, value: u64) -> Self {
        self.cfg.checkpoint_every_windows = value;
        self
    }

    /// Sets the minimum raw article length.
    #[must_use]
    pub fn min_article_chars(mut self, value: usize) -> Self {
        self.cfg.min_article_chars = value;
        self
    }

    /// Finalises the builder, returning a validated [`PipelineConfig`].
    pub fn build(self) -> Result<PipelineConfig> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}
