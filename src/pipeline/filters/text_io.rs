//! Minimal delimited-text ion format: one `x y z value` record per line.
//!
//! Fields may be separated by whitespace or commas. Blank lines and lines
//! starting with `#` are skipped.

use crate::pipeline::context::ExecutionContext;
use crate::pipeline::error::RefreshError;
use crate::types::IonHit;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub(crate) enum TextIonError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("line {line}: expected four numbers, got '{content}'")]
    Parse { line: usize, content: String },

    #[error("aborted")]
    Abort,
}

impl From<RefreshError> for TextIonError {
    fn from(_: RefreshError) -> Self {
        TextIonError::Abort
    }
}

fn parse_line(line: &str) -> Option<IonHit> {
    let mut fields = line
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|f| !f.is_empty())
        .map(|f| f.parse::<f32>());
    let mut next = || fields.next()?.ok();
    let hit = IonHit::new(next()?, next()?, next()?, next()?);
    match fields.next() {
        None => Some(hit),
        Some(_) => None,
    }
}

pub(crate) fn read_ions(path: &Path, ctx: &ExecutionContext) -> Result<Vec<IonHit>, TextIonError> {
    let reader = BufReader::new(File::open(path)?);
    let mut hits = Vec::new();
    for (idx, line) in ctx.checked(reader.lines()).enumerate() {
        let line = line??;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let hit = parse_line(trimmed).ok_or_else(|| TextIonError::Parse {
            line: idx + 1,
            content: trimmed.chars().take(80).collect(),
        })?;
        hits.push(hit);
    }
    Ok(hits)
}

pub(crate) fn write_ions<'a>(
    path: &Path,
    hits: impl IntoIterator<Item = &'a IonHit>,
) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for hit in hits {
        writeln!(
            out,
            "{} {} {} {}",
            hit.pos[0], hit.pos[1], hit.pos[2], hit.value
        )?;
    }
    out.flush()
}
