//! Loading of the multistream block index.
//!
//! The index lists one `offset:page_id:title` record per page, so every block offset
//! appears once for each page it holds. Only the distinct offsets matter here.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use bzip2::read::MultiBzDecoder;
use log::info;

use crate::error::{Result, WikitokError};

/// Loads the distinct block offsets of the index at `path` in ascending order.
///
/// Files ending in `.bz2` are decompressed on the fly. Blank lines are skipped; any other
/// line whose leading field is not an unsigned integer fails the whole load.
pub fn load_index(path: &Path) -> Result<Vec<u64>> {
    let file = File::open(path).map_err(|err| WikitokError::io(err, Some(path.to_path_buf())))?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "bz2") {
        Box::new(MultiBzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let offsets = parse_index(BufReader::new(reader)).map_err(|err| match err {
        WikitokError::Io { source, .. } => WikitokError::io(source, Some(path.to_path_buf())),
        other => other,
    })?;
    info!(
        "loaded {} block offsets from {}",
        offsets.len(),
        path.display()
    );
    Ok(offsets)
}

/// Parses index records from a buffered reader.
pub fn parse_index<R: BufRead>(reader: R) -> Result<Vec<u64>> {
    let mut offsets = BTreeSet::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|err| WikitokError::io(err, None))?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let field = line.split(':').next().unwrap_or_default().trim();
        let offset = field.parse::<u64>().map_err(|err| {
            WikitokError::Format(format!(
                "line {}: invalid block offset `{field}`: {err}",
                line_no + 1
            ))
        })?;
        offsets.insert(offset);
    }
    if offsets.is_empty() {
        return Err(WikitokError::Format("index contains no block offsets".into()));
    }
    Ok(offsets.into_iter().collect())
}
