//! Resumable byte-level tokenization of multistream wiki dumps.
//!
//! The crate turns a bzip2 multistream dump into a length-delimited cache of byte
//! tokens and then replays that cache as overlapping next-token-prediction windows.
//! Both passes checkpoint their progress so they can stop and restart at any time:
//! tokenization resumes at the last checkpointed block, and window streaming resumes
//! with exactly the window it would have emitted next.
//!
//! ```no_run
//! use std::ops::ControlFlow;
//! use wikitok::{build_token_cache, stream_windows, CancelToken, PipelineConfig};
//!
//! # fn main() -> wikitok::Result<()> {
//! let cfg = PipelineConfig::builder()
//!     .dump_path("enwiki-pages-articles-multistream.xml.bz2")
//!     .index_path("enwiki-pages-articles-multistream-index.txt.bz2")
//!     .build()?;
//! let cancel = CancelToken::new();
//! build_token_cache(&cfg, &cancel, |_, _| {})?;
//! stream_windows(&cfg, &cancel, |step, window| {
//!     if step == 0 {
//!         println!("first input: {:?}", &window.input[..10]);
//!     }
//!     ControlFlow::Continue(())
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! The CLI is enabled by default through the `cli` feature. Library users can disable
//! default features to avoid the CLI dependencies.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    clippy::all,
    rust_2018_idioms,
    future_incompatible,
    unused_lifetimes,
    unreachable_pub
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::doc_markdown
)]

pub mod article;
pub mod checkpoint;
pub mod clean;
pub mod config;
pub mod encoder;
pub mod error;
pub mod index;
pub mod metrics;
pub mod pipeline;
pub mod walker;
pub mod window;

pub use article::Article;
pub use checkpoint::{TokenizeCheckpoint, TrainCheckpoint, CHECKPOINT_VERSION};
pub use config::{PipelineBuilder, PipelineConfig};
pub use encoder::{encode, Token, EOS_TOKEN};
pub use error::{Result, WikitokError};
pub use index::load_index;
pub use metrics::{StreamStop, StreamSummary, TokenizeStop, TokenizeSummary};
pub use pipeline::{build_token_cache, stream_windows, CancelToken};
pub use walker::{BlockWalker, WalkItem};
pub use window::{Window, WindowReader};
