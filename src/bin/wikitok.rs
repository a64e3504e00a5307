use std::fs::File;
use std::io::BufReader;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde_json::json;
use wikitok::config::{
    DEFAULT_CACHE_PATH, DEFAULT_DUMP_PATH, DEFAULT_INDEX_PATH, DEFAULT_TOKENIZE_CHECKPOINT,
    DEFAULT_TRAIN_CHECKPOINT,
};
use wikitok::encoder::RecordReader;
use wikitok::walker::dump_head;
use wikitok::{
    build_token_cache, load_index, stream_windows, CancelToken, PipelineConfig,
    TokenizeCheckpoint, TrainCheckpoint, EOS_TOKEN,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Resumable wiki dump tokenizer and window streamer",
    long_about = None
)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (-q, -qq)
    #[arg(short = 'q', long, global = true, action = ArgAction::Count)]
    quiet: u8,

    #[command(flatten)]
    paths: PathArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct PathArgs {
    /// Compressed multistream dump
    #[arg(
        long,
        global = true,
        env = "XML_PATH",
        value_name = "PATH",
        default_value = DEFAULT_DUMP_PATH
    )]
    dump: PathBuf,

    /// Block index (plain text or .bz2)
    #[arg(
        long,
        global = true,
        env = "INDEX_PATH",
        value_name = "PATH",
        default_value = DEFAULT_INDEX_PATH
    )]
    index: PathBuf,

    /// Token cache
    #[arg(
        long,
        global = true,
        env = "TOKENS_FILE",
        value_name = "PATH",
        default_value = DEFAULT_CACHE_PATH
    )]
    cache: PathBuf,

    /// Tokenization checkpoint
    #[arg(
        long,
        global = true,
        env = "TOKENIZE_CHECKPOINT",
        value_name = "PATH",
        default_value = DEFAULT_TOKENIZE_CHECKPOINT
    )]
    tokenize_checkpoint: PathBuf,

    /// Training stream checkpoint
    #[arg(
        long,
        global = true,
        env = "TRAIN_CHECKPOINT",
        value_name = "PATH",
        default_value = DEFAULT_TRAIN_CHECKPOINT
    )]
    train_checkpoint: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the token cache, then stream training windows from it
    Run(RunArgs),
    /// Build (or resume building) the token cache
    Tokenize(TokenizeArgs),
    /// Stream training windows from the token cache
    Stream(StreamArgs),
    /// Summarise the token cache and checkpoints
    Info(InfoArgs),
    /// Print the first lines of a decompressed dump block
    Peek(PeekArgs),
}

#[derive(Args, Debug)]
struct TokenizeArgs {
    /// Disable the block progress bar
    #[arg(long)]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct StreamArgs {
    /// Stop after this many windows (default: until exhausted or interrupted)
    #[arg(long, value_name = "COUNT")]
    max_windows: Option<u64>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    tokenize: TokenizeArgs,

    #[command(flatten)]
    stream: StreamArgs,
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// Emit machine-readable JSON summary
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct PeekArgs {
    /// Block number from the index
    #[arg(long, value_name = "N", default_value_t = 0)]
    block: usize,

    /// Number of lines to print
    #[arg(long, value_name = "COUNT", default_value_t = 50)]
    lines: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let cfg = PipelineConfig::builder()
        .dump_path(&cli.paths.dump)
        .index_path(&cli.paths.index)
        .cache_path(&cli.paths.cache)
        .tokenize_checkpoint_path(&cli.paths.tokenize_checkpoint)
        .train_checkpoint_path(&cli.paths.train_checkpoint)
        .build()?;

    match cli.command {
        Commands::Run(args) => {
            let cancel = install_cancel_handler()?;
            run_tokenize(&cfg, &cancel, &args.tokenize)?;
            if cancel.is_cancelled() {
                warn!("interrupted during tokenization; not streaming");
                return Ok(());
            }
            run_stream(&cfg, &cancel, &args.stream)
        }
        Commands::Tokenize(args) => run_tokenize(&cfg, &install_cancel_handler()?, &args),
        Commands::Stream(args) => run_stream(&cfg, &install_cancel_handler()?, &args),
        Commands::Info(args) => run_info(&cfg, &args),
        Commands::Peek(args) => run_peek(&cfg, &args),
    }
}

fn init_logging(verbose: u8, quiet: u8) {
    use log::LevelFilter;

    let level = if quiet > 0 {
        match quiet {
            1 => LevelFilter::Warn,
            _ => LevelFilter::Error,
        }
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_millis();
    builder.filter_level(level);
    let _ = builder.try_init();
}

fn install_cancel_handler() -> Result<CancelToken> {
    let cancel = CancelToken::new();
    let handle = cancel.clone();
    ctrlc::set_handler(move || {
        if handle.is_cancelled() {
            warn!("already stopping; waiting for the checkpoint to be written");
        } else {
            warn!("interrupted; stopping after the current step and saving a checkpoint");
        }
        handle.cancel();
    })
    .context("unable to install interrupt handler")?;
    Ok(cancel)
}

fn run_tokenize(cfg: &PipelineConfig, cancel: &CancelToken, args: &TokenizeArgs) -> Result<()> {
    let progress = if args.no_progress {
        None
    } else {
        let pb = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner} blocks {pos}/{len} [{bar:40}] {percent}% {elapsed_precise} eta {eta}",
        )
        .map_err(|err| anyhow!("invalid progress template: {err}"))?
        .progress_chars("=> ");
        pb.set_style(style);
        Some(pb)
    };

    let summary = build_token_cache(cfg, cancel, |done, total| {
        if let Some(pb) = &progress {
            pb.set_length(total as u64);
            pb.set_position(done as u64);
        }
    })
    .with_context(|| format!("failed to build token cache {}", cfg.cache_path.display()))?;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    println!(
        "tokenize: {:?} | blocks {}/{} | records {} | tokens {} | {:.2?}",
        summary.stop_reason,
        summary.completed_blocks,
        summary.total_blocks,
        summary.records_written,
        summary.tokens_written,
        summary.elapsed
    );
    Ok(())
}

fn run_stream(cfg: &PipelineConfig, cancel: &CancelToken, args: &StreamArgs) -> Result<()> {
    let started = Instant::now();
    let summary = stream_windows(cfg, cancel, |step, window| {
        if step == 0 {
            info!("sample input (first 10): {:?}", &window.input[..window.input.len().min(10)]);
            info!("sample target (first 10): {:?}", &window.target[..window.target.len().min(10)]);
        }
        if step % cfg.checkpoint_every_windows == 0 {
            info!("window {step}");
        }
        // Optimizer step goes here.
        match args.max_windows {
            Some(limit) if step + 1 >= limit => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        }
    })
    .with_context(|| format!("failed to stream windows from {}", cfg.cache_path.display()))?;

    let elapsed = started.elapsed().as_secs_f64();
    let rate = if elapsed > 0.0 {
        summary.windows as f64 / elapsed
    } else {
        0.0
    };
    println!(
        "stream: {:?} | windows {} | offset {} -> {} bytes | {:.0} windows/s",
        summary.stop_reason, summary.windows, summary.start_cursor, summary.end_cursor, rate
    );
    Ok(())
}

fn run_info(cfg: &PipelineConfig, args: &InfoArgs) -> Result<()> {
    let mut records = 0u64;
    let mut tokens = 0u64;
    let mut corrupt = None;
    let cache_bytes = if cfg.cache_path.exists() {
        let file = File::open(&cfg.cache_path)
            .with_context(|| format!("failed to open {}", cfg.cache_path.display()))?;
        let bytes = file.metadata()?.len();
        for record in RecordReader::new(BufReader::new(file), 0) {
            match record {
                Ok(record) => {
                    records += 1;
                    tokens += record.len() as u64;
                    if record.last() != Some(&EOS_TOKEN) {
                        corrupt = Some(format!("record {records} does not end with EOS"));
                        break;
                    }
                }
                Err(err) => {
                    corrupt = Some(err.to_string());
                    break;
                }
            }
        }
        Some(bytes)
    } else {
        None
    };
    let tokenize = TokenizeCheckpoint::load(&cfg.tokenize_checkpoint_path)?;
    let train = TrainCheckpoint::load(&cfg.train_checkpoint_path)?;

    if args.json {
        let summary = json!({
            "cache": {
                "path": cfg.cache_path.display().to_string(),
                "bytes": cache_bytes,
                "records": records,
                "tokens": tokens,
                "error": corrupt,
            },
            "tokenize_checkpoint": tokenize.map(|c| c.last_completed_block),
            "train_checkpoint": train.as_ref().map(|c| json!({
                "cursor_bytes": c.cursor_bytes,
                "buffered_tokens": c.buffer.len(),
            })),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Cache: {}", cfg.cache_path.display());
    match cache_bytes {
        Some(bytes) => {
            println!("  Bytes: {bytes}");
            println!("  Records: {records}");
            println!("  Tokens: {tokens}");
        }
        None => println!("  (missing)"),
    }
    if let Some(reason) = corrupt {
        println!("  Error: {reason}");
    }
    match tokenize {
        Some(ckpt) => println!("Tokenize checkpoint: block {}", ckpt.last_completed_block),
        None => println!("Tokenize checkpoint: none"),
    }
    match train {
        Some(ckpt) => println!(
            "Train checkpoint: byte {} with {} buffered tokens",
            ckpt.cursor_bytes,
            ckpt.buffer.len()
        ),
        None => println!("Train checkpoint: none"),
    }
    Ok(())
}

fn run_peek(cfg: &PipelineConfig, args: &PeekArgs) -> Result<()> {
    let offsets = load_index(&cfg.index_path)
        .with_context(|| format!("failed to load index {}", cfg.index_path.display()))?;
    let offset = *offsets.get(args.block).ok_or_else(|| {
        anyhow!(
            "block {} out of range; the index has {} blocks",
            args.block,
            offsets.len()
        )
    })?;
    let lines = dump_head(&cfg.dump_path, offset, args.lines, cfg.decompress_chunk_bytes)
        .with_context(|| format!("failed to read {}", cfg.dump_path.display()))?;
    for line in lines {
        println!("{line}");
    }
    Ok(())
}
