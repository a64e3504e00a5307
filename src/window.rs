//! Checkpointable sliding-window reader over the token cache.
//!
//! The reader keeps a byte cursor into the cache (always on a record boundary) and a
//! FIFO of tokens already read from before that cursor. Each window takes the first
//! `context_len + 1` buffered tokens and then drops exactly one from the front, so
//! consecutive windows overlap by `context_len` tokens. Windows ignore article
//! boundaries: a window may hold the tail of one article, its [`EOS_TOKEN`], and the
//! head of the next.
//!
//! `(cursor, buffer)` is the complete state of the reader; restoring it through
//! [`WindowReader::open`] reproduces the exact same subsequent windows.
//!
//! [`EOS_TOKEN`]: crate::encoder::EOS_TOKEN

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::warn;

use crate::checkpoint::TrainCheckpoint;
use crate::config::PipelineConfig;
use crate::encoder::{decode_records, read_full, Token};
use crate::error::{Result, WikitokError};

/// Next-token prediction pair; `target` is `input` shifted left by one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    /// Model input tokens.
    pub input: Vec<Token>,
    /// Expected next tokens.
    pub target: Vec<Token>,
}

/// Streams overlapping windows from the token cache.
#[derive(Debug)]
pub struct WindowReader {
    path: PathBuf,
    file: File,
    cursor_bytes: u64,
    buffer: VecDeque<Token>,
    context_len: usize,
    chunk: Vec<u8>,
}

impl WindowReader {
    /// Opens the cache named by `cfg` and restores the reader state from `checkpoint`.
    pub fn open(cfg: &PipelineConfig, checkpoint: TrainCheckpoint) -> Result<Self> {
        Self::open_path(
            &cfg.cache_path,
            checkpoint,
            cfg.context_len,
            cfg.read_chunk_bytes,
        )
    }

    /// Opens the cache at `path` with explicit window and chunk sizes.
    pub fn open_path(
        path: &Path,
        checkpoint: TrainCheckpoint,
        context_len: usize,
        read_chunk_bytes: usize,
    ) -> Result<Self> {
        if context_len == 0 {
            return Err(WikitokError::InvalidConfig(
                "context_len must be greater than zero".into(),
            ));
        }
        let file =
            File::open(path).map_err(|err| WikitokError::io(err, Some(path.to_path_buf())))?;
        let len = file
            .metadata()
            .map_err(|err| WikitokError::io(err, Some(path.to_path_buf())))?
            .len();
        if checkpoint.cursor_bytes > len {
            warn!(
                "checkpoint cursor {} lies beyond the end of {} ({len} bytes)",
                checkpoint.cursor_bytes,
                path.display()
            );
        }
        let mut buffer = VecDeque::with_capacity(checkpoint.buffer.len().max(context_len + 1));
        buffer.extend(checkpoint.buffer);
        Ok(Self {
            path: path.to_path_buf(),
            file,
            cursor_bytes: checkpoint.cursor_bytes,
            buffer,
            context_len,
            chunk: vec![0u8; read_chunk_bytes.max(4)],
        })
    }

    /// Next unread byte offset of the cache.
    #[must_use]
    pub fn cursor_bytes(&self) -> u64 {
        self.cursor_bytes
    }

    /// Number of tokens currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Snapshot of the reader state suitable for [`TrainCheckpoint::save`].
    #[must_use]
    pub fn checkpoint(&self) -> TrainCheckpoint {
        TrainCheckpoint::new(self.cursor_bytes, self.buffer.iter().copied().collect())
    }

    /// Emits the next window, or `None` once the cache cannot fill a complete one.
    pub fn next_window(&mut self) -> Result<Option<Window>> {
        if !self.fill()? {
            return Ok(None);
        }
        let input = self.buffer.range(..self.context_len).copied().collect();
        let target = self
            .buffer
            .range(1..=self.context_len)
            .copied()
            .collect();
        self.buffer.pop_front();
        Ok(Some(Window { input, target }))
    }

    /// Reads records until a full window is buffered; `false` means end of stream.
    fn fill(&mut self) -> Result<bool> {
        while self.buffer.len() <= self.context_len {
            let read = self.read_at_cursor(self.chunk.len())?;
            if read == 0 {
                return Ok(false);
            }
            let progress = decode_records(&self.chunk[..read], &mut self.buffer);
            if progress.records > 0 {
                self.cursor_bytes += progress.consumed as u64;
                continue;
            }
            match progress.pending_record_bytes {
                Some(total) if total > read && read == self.chunk.len() => {
                    let record = self.read_bounded(total)?;
                    if record.len() < total {
                        self.warn_truncated(record.len());
                        return Ok(false);
                    }
                    decode_records(&record, &mut self.buffer);
                    self.cursor_bytes += total as u64;
                }
                _ => {
                    self.warn_truncated(read);
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn read_at_cursor(&mut self, len: usize) -> Result<usize> {
        let mut chunk = std::mem::take(&mut self.chunk);
        let read = self.read_into(&mut chunk[..len]);
        self.chunk = chunk;
        read
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.file
            .seek(SeekFrom::Start(self.cursor_bytes))
            .and_then(|_| read_full(&mut self.file, buf))
            .map_err(|err| WikitokError::io(err, Some(self.path.clone())))
    }

    /// Reads at most `len` bytes at the cursor; the buffer grows with the bytes actually
    /// present, so a damaged length prefix cannot force a huge allocation.
    fn read_bounded(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut record = Vec::new();
        self.file
            .seek(SeekFrom::Start(self.cursor_bytes))
            .and_then(|_| (&mut self.file).take(len as u64).read_to_end(&mut record))
            .map_err(|err| WikitokError::io(err, Some(self.path.clone())))?;
        Ok(record)
    }

    fn warn_truncated(&self, bytes: usize) {
        warn!(
            "ignoring {bytes} trailing bytes of an incomplete record at byte {} of {}",
            self.cursor_bytes,
            self.path.display()
        );
    }
}

impl Iterator for WindowReader {
    type Item = Result<Window>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_window().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{append_record, encode, record_bytes, EOS_TOKEN, RECORD_HEADER_BYTES};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn write_cache(records: &[Vec<Token>]) -> (TempDir, PathBuf) {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tokens.bin");
        let mut bytes = Vec::new();
        for record in records {
            append_record(&mut bytes, record).expect("append");
        }
        fs::write(&path, bytes).expect("write cache");
        (dir, path)
    }

    fn drain(reader: &mut WindowReader) -> Vec<Window> {
        reader.collect::<Result<_>>().expect("windows")
    }

    #[test]
    fn emits_stride_one_windows_then_ends() {
        let (_dir, path) = write_cache(&[vec![10, 20, 30, 40, 50, 60, EOS_TOKEN]]);
        let mut reader =
            WindowReader::open_path(&path, TrainCheckpoint::default(), 4, 1024).expect("open");

        let windows = drain(&mut reader);
        let pairs: Vec<(Vec<Token>, Vec<Token>)> = windows
            .into_iter()
            .map(|w| (w.input, w.target))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (vec![10, 20, 30, 40], vec![20, 30, 40, 50]),
                (vec![20, 30, 40, 50], vec![30, 40, 50, 60]),
                (vec![30, 40, 50, 60], vec![40, 50, 60, EOS_TOKEN]),
            ]
        );
        assert_eq!(reader.next_window().expect("eos"), None);
    }

    #[test]
    fn short_cache_yields_no_windows() {
        let (_dir, path) = write_cache(&[vec![1, 2, EOS_TOKEN], vec![3, EOS_TOKEN]]);
        let mut reader =
            WindowReader::open_path(&path, TrainCheckpoint::default(), 5, 64).expect("open");
        assert!(drain(&mut reader).is_empty());
    }

    #[test]
    fn windows_span_article_boundaries() {
        let (_dir, path) = write_cache(&[vec![1, 2, EOS_TOKEN], vec![3, 4, EOS_TOKEN]]);
        let mut reader =
            WindowReader::open_path(&path, TrainCheckpoint::default(), 4, 8).expect("open");
        let first = reader.next_window().expect("read").expect("window");
        assert_eq!(first.input, vec![1, 2, EOS_TOKEN, 3]);
        assert_eq!(first.target, vec![2, EOS_TOKEN, 3, 4]);
    }

    #[test]
    fn buffer_shrinks_by_one_per_window() {
        let records: Vec<Vec<Token>> = (0..20).map(|i| encode(&format!("article {i}"))).collect();
        let (_dir, path) = write_cache(&records);
        let mut reader =
            WindowReader::open_path(&path, TrainCheckpoint::default(), 6, 4096).expect("open");
        reader.next_window().expect("read").expect("first window");
        let cursor = reader.cursor_bytes();
        let before = reader.buffered();
        assert!(before > 7, "a single chunk buffers the whole cache");
        reader.next_window().expect("read").expect("second window");
        assert_eq!(reader.buffered(), before - 1);
        assert_eq!(reader.cursor_bytes(), cursor);
    }

    #[test]
    fn refill_adds_a_record_and_still_pops_one() {
        let record = encode("abcdefgh");
        let records = vec![record.clone(); 6];
        let (_dir, path) = write_cache(&records);
        let context_len = 4;
        let mut reader = WindowReader::open_path(
            &path,
            TrainCheckpoint::default(),
            context_len,
            record_bytes(record.len()) + 2,
        )
        .expect("open");

        reader.next_window().expect("read").expect("first window");
        while reader.buffered() > context_len {
            reader.next_window().expect("read").expect("buffered window");
        }
        let before = reader.buffered();
        let cursor = reader.cursor_bytes();
        reader.next_window().expect("read").expect("refilled window");
        assert_eq!(reader.cursor_bytes(), cursor + record_bytes(record.len()) as u64);
        assert_eq!(reader.buffered(), before + record.len() - 1);
    }

    #[test]
    fn damaged_length_prefix_ends_the_stream_without_allocating_it() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tokens.bin");
        let mut bytes = vec![0xFF; RECORD_HEADER_BYTES];
        bytes.extend(std::iter::repeat(0x01).take(200));
        fs::write(&path, bytes).expect("write cache");

        let mut reader =
            WindowReader::open_path(&path, TrainCheckpoint::default(), 4, 64).expect("open");
        assert_eq!(reader.next_window().expect("read"), None);
        assert_eq!(reader.cursor_bytes(), 0);
    }

    #[test]
    fn records_larger_than_a_chunk_are_read_whole() {
        let big = encode(&"z".repeat(100));
        let (_dir, path) = write_cache(&[big.clone(), encode("tail")]);
        let mut reader =
            WindowReader::open_path(&path, TrainCheckpoint::default(), 8, 16).expect("open");
        let first = reader.next_window().expect("read").expect("window");
        assert_eq!(first.input, big[..8].to_vec());
        assert_eq!(reader.cursor_bytes(), record_bytes(big.len()) as u64);
        let total = drain(&mut reader).len() + 1;
        assert_eq!(total, big.len() + 5 - 8);
    }

    #[test]
    fn truncated_trailing_record_ends_the_stream() {
        let (_dir, path) = write_cache(&[vec![1, 2, 3, 4, 5, EOS_TOKEN]]);
        let mut bytes = fs::read(&path).expect("read");
        append_record(&mut bytes, &[7, 8, 9, EOS_TOKEN]).expect("append");
        bytes.truncate(bytes.len() - 2);
        fs::write(&path, bytes).expect("rewrite");

        let mut reader =
            WindowReader::open_path(&path, TrainCheckpoint::default(), 3, 64).expect("open");
        assert_eq!(drain(&mut reader).len(), 3);
        assert_eq!(reader.cursor_bytes(), record_bytes(6) as u64);
    }

    #[test]
    fn resuming_from_any_checkpoint_reproduces_the_stream() {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        let records: Vec<Vec<Token>> = (0..40)
            .map(|_| {
                let len = rng.gen_range(0..60);
                let text: String = (0..len).map(|_| rng.gen_range('a'..='z')).collect();
                encode(&text)
            })
            .collect();
        let (dir, path) = write_cache(&records);
        let context_len = 9;

        let mut uninterrupted =
            WindowReader::open_path(&path, TrainCheckpoint::default(), context_len, 48)
                .expect("open");
        let expected = drain(&mut uninterrupted);
        assert!(expected.len() > 100);

        let ckpt_path = dir.path().join("train.json");
        for _ in 0..25 {
            let cut = rng.gen_range(0..=expected.len());
            let chunk = rng.gen_range(4..200);
            let mut first =
                WindowReader::open_path(&path, TrainCheckpoint::default(), context_len, chunk)
                    .expect("open");
            let mut produced: Vec<Window> = (&mut first)
                .take(cut)
                .collect::<Result<_>>()
                .expect("prefix");
            first.checkpoint().save(&ckpt_path).expect("save");
            drop(first);

            let restored = TrainCheckpoint::load_or_default(&ckpt_path).expect("load");
            let mut resumed = WindowReader::open_path(
                &path,
                restored,
                context_len,
                rng.gen_range(4..200),
            )
            .expect("reopen");
            produced.extend(drain(&mut resumed));
            assert_eq!(produced, expected, "diverged after cut at window {cut}");
        }
    }
}
