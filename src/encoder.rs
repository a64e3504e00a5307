//! Byte-level article encoding and the length-delimited token cache format.
//!
//! Every cached record is a little-endian `u32` token count followed by that many
//! little-endian `u16` token values. Values `0..=255` are raw UTF-8 bytes and the
//! final value of every record is [`EOS_TOKEN`].

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, WikitokError};

/// Integer token stored in the cache.
pub type Token = u16;

/// Sentinel terminating every article record.
pub const EOS_TOKEN: Token = 256;
/// Size of the per-record length prefix.
pub const RECORD_HEADER_BYTES: usize = 4;
/// Size of one serialized token.
pub const TOKEN_BYTES: usize = 2;

/// Encodes cleaned article text as UTF-8 byte tokens terminated by [`EOS_TOKEN`].
#[must_use]
pub fn encode(text: &str) -> Vec<Token> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::with_capacity(bytes.len() + 1);
    tokens.extend(bytes.iter().map(|&b| Token::from(b)));
    tokens.push(EOS_TOKEN);
    tokens
}

/// Serialized size in bytes of a record holding `tokens` values.
#[inline]
#[must_use]
pub fn record_bytes(tokens: usize) -> usize {
    RECORD_HEADER_BYTES + tokens * TOKEN_BYTES
}

/// Writes one record (length prefix followed by tokens) to `writer`.
pub fn append_record<W: Write>(writer: &mut W, record: &[Token]) -> Result<()> {
    let len = u32::try_from(record.len()).map_err(|_| {
        WikitokError::InvalidConfig(format!(
            "record of {} tokens exceeds the u32 length prefix",
            record.len()
        ))
    })?;
    let mut bytes = Vec::with_capacity(record_bytes(record.len()));
    bytes.extend_from_slice(&len.to_le_bytes());
    for &token in record {
        bytes.extend_from_slice(&token.to_le_bytes());
    }
    writer
        .write_all(&bytes)
        .map_err(|err| WikitokError::io(err, None))
}

/// Result of decoding the complete records at the front of a byte slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeProgress {
    /// Bytes belonging to fully decoded records.
    pub consumed: usize,
    /// Number of records decoded.
    pub records: usize,
    /// Total size of the first incomplete record when its header was readable.
    pub pending_record_bytes: Option<usize>,
}

/// Appends the tokens of every complete record at the front of `bytes` to `out`.
///
/// Decoding stops at the first record whose payload is not fully contained in `bytes`;
/// callers re-read from `consumed` to pick it up.
pub fn decode_records<E: Extend<Token>>(bytes: &[u8], out: &mut E) -> DecodeProgress {
    let mut consumed = 0usize;
    let mut records = 0usize;
    loop {
        let rest = &bytes[consumed..];
        if rest.len() < RECORD_HEADER_BYTES {
            return DecodeProgress {
                consumed,
                records,
                pending_record_bytes: None,
            };
        }
        let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let total = record_bytes(len);
        if rest.len() < total {
            return DecodeProgress {
                consumed,
                records,
                pending_record_bytes: Some(total),
            };
        }
        out.extend(
            rest[RECORD_HEADER_BYTES..total]
                .chunks_exact(TOKEN_BYTES)
                .map(|pair| Token::from_le_bytes([pair[0], pair[1]])),
        );
        consumed += total;
        records += 1;
    }
}

/// Reads into `buf` until it is full or the reader is exhausted, returning the bytes read.
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Sequential reader over cached records, tracking the byte offset of each record.
#[derive(Debug)]
pub struct RecordReader<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> RecordReader<R> {
    /// Wraps a reader positioned at a record boundary `offset`.
    pub fn new(inner: R, offset: u64) -> Self {
        Self { inner, offset }
    }

    /// Byte offset of the next record.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads the next record, returning `None` at a clean end of input.
    pub fn read_record(&mut self) -> Result<Option<Vec<Token>>> {
        let mut header = [0u8; RECORD_HEADER_BYTES];
        let read =
            read_full(&mut self.inner, &mut header).map_err(|err| WikitokError::io(err, None))?;
        if read == 0 {
            return Ok(None);
        }
        if read < RECORD_HEADER_BYTES {
            return Err(WikitokError::CorruptCache {
                offset: self.offset,
                reason: format!("truncated record header ({read} of {RECORD_HEADER_BYTES} bytes)"),
            });
        }
        let len = u32::from_le_bytes(header) as usize;
        let expected = len * TOKEN_BYTES;
        // Grows with the bytes present rather than the declared length.
        let mut payload = Vec::new();
        let read = (&mut self.inner)
            .take(expected as u64)
            .read_to_end(&mut payload)
            .map_err(|err| WikitokError::io(err, None))?;
        if read < expected {
            return Err(WikitokError::CorruptCache {
                offset: self.offset,
                reason: format!("record declares {len} tokens but only {read} bytes follow"),
            });
        }
        let record: Vec<Token> = payload
            .chunks_exact(TOKEN_BYTES)
            .map(|pair| Token::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if let Some(pos) = record.iter().position(|&t| t > EOS_TOKEN) {
            return Err(WikitokError::CorruptCache {
                offset: self.offset,
                reason: format!("token value {} at position {pos} is out of range", record[pos]),
            });
        }
        self.offset += record_bytes(len) as u64;
        Ok(Some(record))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Vec<Token>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

/// Buffered append-only writer over the token cache.
#[derive(Debug)]
pub struct CacheWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    records: u64,
    tokens: u64,
}

impl CacheWriter {
    /// Opens (creating if needed) the cache at `path` for appending.
    pub fn open_append(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|err| WikitokError::io(err, Some(parent.to_path_buf())))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| WikitokError::io(err, Some(path.to_path_buf())))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::with_capacity(1 << 20, file),
            records: 0,
            tokens: 0,
        })
    }

    /// Appends one record.
    pub fn append(&mut self, record: &[Token]) -> Result<()> {
        append_record(&mut self.writer, record).map_err(|err| match err {
            WikitokError::Io { source, .. } => WikitokError::io(source, Some(self.path.clone())),
            other => other,
        })?;
        self.records += 1;
        self.tokens += record.len() as u64;
        Ok(())
    }

    /// Flushes buffered records and syncs them to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.writer
            .flush()
            .and_then(|()| self.writer.get_ref().sync_data())
            .map_err(|err| WikitokError::io(err, Some(self.path.clone())))
    }

    /// Records appended through this writer.
    #[must_use]
    pub fn records_written(&self) -> u64 {
        self.records
    }

    /// Tokens appended through this writer.
    #[must_use]
    pub fn tokens_written(&self) -> u64 {
        self.tokens
    }
}
