//! Sequential walk over the independently compressed blocks of a multistream dump.
//!
//! Each block is located by its byte offset, decompressed with a fresh bzip2
//! decoder, wrapped in a synthetic `<mediawiki>` root and scanned for `<page>`
//! elements. The walker yields every page of a block followed by
//! [`WalkItem::EndOfBlock`], even when decompression or parsing stopped early.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bzip2::{Decompress, Status};
use log::{debug, warn};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::article::Article;
use crate::encoder::read_full;
use crate::error::{Result, WikitokError};

/// Item produced by [`BlockWalker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkItem {
    /// A page parsed from the current block.
    Article(Article),
    /// All pages of the block with this index have been yielded.
    EndOfBlock(usize),
}

/// How decompression of a block ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockStatus {
    /// The decoder reached the end of the compressed stream.
    Complete,
    /// Input ran out before the stream ended.
    InputExhausted,
    /// The decoder rejected the input; output is truncated at the failure point.
    Corrupt(String),
}

/// Decompressed contents of one block.
#[derive(Debug, Clone)]
pub struct DecompressedBlock {
    /// Bytes produced before decompression stopped.
    pub data: Vec<u8>,
    /// Reason decompression stopped.
    pub status: BlockStatus,
}

/// Decompresses the single bzip2 stream at the reader's position, feeding it
/// `chunk_bytes` of input at a time.
///
/// Read failures are returned as errors; decoder failures truncate the output and are
/// reported through [`BlockStatus::Corrupt`].
pub fn decompress_block<R: Read>(
    reader: &mut R,
    chunk_bytes: usize,
) -> io::Result<DecompressedBlock> {
    let mut decoder = Decompress::new(false);
    let mut input = vec![0u8; chunk_bytes.max(1)];
    let mut data = Vec::with_capacity(input.len() * 4);
    let mut status = BlockStatus::InputExhausted;

    'feed: loop {
        let read = read_full(reader, &mut input)?;
        let mut pending = &input[..read];
        loop {
            if data.capacity() - data.len() < input.len() {
                data.reserve(input.len() * 4);
            }
            let in_before = decoder.total_in();
            let out_before = data.len();
            match decoder.decompress_vec(pending, &mut data) {
                Ok(Status::StreamEnd) => {
                    status = BlockStatus::Complete;
                    break 'feed;
                }
                Ok(_) => {}
                Err(err) => {
                    status = BlockStatus::Corrupt(err.to_string());
                    break 'feed;
                }
            }
            let used = (decoder.total_in() - in_before) as usize;
            let progressed = used > 0 || data.len() > out_before;
            pending = &pending[used..];
            if read == 0 {
                // Input is gone; drain whatever the decoder still buffers.
                if !progressed {
                    break 'feed;
                }
            } else if pending.is_empty() {
                break;
            } else if !progressed {
                status = BlockStatus::Corrupt("decoder made no progress".into());
                break 'feed;
            }
        }
    }
    Ok(DecompressedBlock { data, status })
}

/// Pages recovered from one block.
#[derive(Debug, Clone, Default)]
pub struct ParsedBlock {
    /// Pages completed before parsing stopped.
    pub articles: Vec<Article>,
    /// Description of the structural error that stopped parsing, if any.
    pub error: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Namespace,
    Body,
}

#[derive(Default)]
struct PageBuilder {
    title: String,
    namespace: Option<String>,
    is_redirect: bool,
    body: Option<String>,
}

impl PageBuilder {
    fn finish(self) -> Article {
        Article {
            title: self.title,
            namespace: self
                .namespace
                .and_then(|ns| ns.trim().parse().ok())
                .unwrap_or(-1),
            is_redirect: self.is_redirect,
            body: self.body.unwrap_or_default(),
        }
    }
}

/// Parses the `<page>` elements of a decompressed block.
///
/// The block is wrapped in a `<mediawiki>` root first. A structural error ends parsing
/// but keeps every page completed before it.
#[must_use]
pub fn parse_pages(block: &[u8]) -> ParsedBlock {
    let mut wrapped = Vec::with_capacity(block.len() + 25);
    wrapped.extend_from_slice(b"<mediawiki>");
    wrapped.extend_from_slice(block);
    wrapped.extend_from_slice(b"</mediawiki>");

    let mut reader = Reader::from_reader(wrapped.as_slice());
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut page_depth: Option<usize> = None;
    let mut page = PageBuilder::default();
    let mut capture: Option<(Field, String)> = None;
    let mut parsed = ParsedBlock::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                let name = name.as_ref();
                match page_depth {
                    None if name == b"page" => {
                        page_depth = Some(depth);
                        page = PageBuilder::default();
                    }
                    Some(pd) => {
                        let direct_child = depth == pd + 1;
                        let field = match name {
                            b"title" if direct_child => Some(Field::Title),
                            b"ns" if direct_child => Some(Field::Namespace),
                            b"text" if page.body.is_none() => Some(Field::Body),
                            b"redirect" if direct_child => {
                                page.is_redirect = true;
                                None
                            }
                            _ => None,
                        };
                        if let Some(field) = field {
                            capture = Some((field, String::new()));
                        }
                    }
                    None => {}
                }
                depth += 1;
            }
            Ok(Event::Empty(e)) => {
                if let Some(pd) = page_depth {
                    match e.local_name().as_ref() {
                        b"redirect" if depth == pd + 1 => page.is_redirect = true,
                        b"text" if page.body.is_none() => page.body = Some(String::new()),
                        _ => {}
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let Some((_, value)) = capture.as_mut() {
                    match t.unescape() {
                        Ok(text) => value.push_str(&text),
                        Err(err) => {
                            parsed.error = Some(err.to_string());
                            break;
                        }
                    }
                }
            }
            Ok(Event::CData(c)) => {
                if let Some((_, value)) = capture.as_mut() {
                    value.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
                if let Some((field, value)) = capture.take() {
                    match field {
                        Field::Title => page.title = value,
                        Field::Namespace => page.namespace = Some(value),
                        Field::Body => page.body = Some(value),
                    }
                } else if page_depth == Some(depth) {
                    page_depth = None;
                    parsed.articles.push(std::mem::take(&mut page).finish());
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                parsed.error = Some(err.to_string());
                break;
            }
        }
        buf.clear();
    }
    parsed
}

/// Lazily walks the blocks of a dump from a starting block to the end.
#[derive(Debug)]
pub struct BlockWalker {
    path: PathBuf,
    file: File,
    offsets: Vec<u64>,
    chunk_bytes: usize,
    next_block: usize,
    current: Option<usize>,
    pending: std::vec::IntoIter<Article>,
}

impl BlockWalker {
    /// Opens the dump at `path` and positions the walk at `start_block`.
    pub fn open(
        path: &Path,
        offsets: Vec<u64>,
        start_block: usize,
        chunk_bytes: usize,
    ) -> Result<Self> {
        let file =
            File::open(path).map_err(|err| WikitokError::io(err, Some(path.to_path_buf())))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            next_block: start_block.min(offsets.len()),
            offsets,
            chunk_bytes,
            current: None,
            pending: Vec::new().into_iter(),
        })
    }

    fn load_block(&mut self, block: usize) -> Result<Vec<Article>> {
        let start = self.offsets[block];
        self.file
            .seek(SeekFrom::Start(start))
            .map_err(|err| WikitokError::io(err, Some(self.path.clone())))?;
        let decompressed = match self.offsets.get(block + 1) {
            Some(&end) => {
                let mut bounded = (&mut self.file).take(end.saturating_sub(start));
                decompress_block(&mut bounded, self.chunk_bytes)
            }
            None => decompress_block(&mut self.file, self.chunk_bytes),
        }
        .map_err(|err| WikitokError::io(err, Some(self.path.clone())))?;

        match &decompressed.status {
            BlockStatus::Complete => {}
            BlockStatus::InputExhausted => warn!(
                "block {block} at byte {start} ended before its stream did; using {} bytes",
                decompressed.data.len()
            ),
            BlockStatus::Corrupt(reason) => warn!(
                "block {block} at byte {start} is corrupt ({reason}); truncated to {} bytes",
                decompressed.data.len()
            ),
        }

        let parsed = parse_pages(&decompressed.data);
        if let Some(reason) = &parsed.error {
            warn!(
                "block {block}: malformed XML ({reason}); kept {} pages",
                parsed.articles.len()
            );
        }
        debug!(
            "block {block}: {} bytes decompressed, {} pages",
            decompressed.data.len(),
            parsed.articles.len()
        );
        Ok(parsed.articles)
    }
}

impl Iterator for BlockWalker {
    type Item = Result<WalkItem>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(block) = self.current {
            if let Some(article) = self.pending.next() {
                return Some(Ok(WalkItem::Article(article)));
            }
            self.current = None;
            return Some(Ok(WalkItem::EndOfBlock(block)));
        }
        if self.next_block >= self.offsets.len() {
            return None;
        }
        let block = self.next_block;
        self.next_block += 1;
        match self.load_block(block) {
            Ok(articles) => {
                self.pending = articles.into_iter();
                self.current = Some(block);
                self.next()
            }
            Err(err) => {
                self.next_block = self.offsets.len();
                Some(Err(err))
            }
        }
    }
}

/// Decompresses the stream starting at `offset` and returns up to `max_lines` of its text.
pub fn dump_head(
    path: &Path,
    offset: u64,
    max_lines: usize,
    chunk_bytes: usize,
) -> Result<Vec<String>> {
    let mut file =
        File::open(path).map_err(|err| WikitokError::io(err, Some(path.to_path_buf())))?;
    file.seek(SeekFrom::Start(offset))
        .map_err(|err| WikitokError::io(err, Some(path.to_path_buf())))?;
    let block = decompress_block(&mut file, chunk_bytes)
        .map_err(|err| WikitokError::io(err, Some(path.to_path_buf())))?;
    if let BlockStatus::Corrupt(reason) = &block.status {
        warn!("stream at byte {offset} is corrupt ({reason}); showing the readable prefix");
    }
    Ok(String::from_utf8_lossy(&block.data)
        .lines()
        .take(max_lines)
        .map(|line| line.trim().to_string())
        .collect())
}
