//! Partition filtering of delimited text
//!
//! A single pass over the input copies the header plus every record whose
//! partition column holds one of the requested keys. Lines are copied
//! byte-for-byte, so the input does not have to be UTF-8.
//!
//! The partition column is located case-insensitively, but record values
//! are compared exactly once surrounding whitespace is trimmed.
//!
//! When the header has no partition column the filter falls back to a
//! positional heuristic: a record is kept if, with its line terminator
//! removed, it contains `<d>KEY<d>`, starts with `KEY<d>` or ends with
//! `<d>KEY`.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

use crate::artifact::{ArtifactStage, LocalArtifact};
use crate::error::{FilterError, Result};

/// Records between progress log lines
pub const PROGRESS_INTERVAL: u64 = 100_000;

const READ_BUFFER: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterStats {
    pub records_read: u64,
    pub records_kept: u64,
    /// The partition column was missing and the heuristic decided
    pub used_heuristic: bool,
}

#[derive(Debug)]
pub struct FilterOutcome {
    pub artifact: LocalArtifact,
    pub stats: FilterStats,
}

pub struct PartitionFilter {
    column: String,
    delimiter: u8,
    output_dir: PathBuf,
}

enum Selector {
    Column(usize),
    Heuristic(Vec<Vec<u8>>),
}

impl PartitionFilter {
    pub fn new(column: impl Into<String>, delimiter: u8, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            column: column.into(),
            delimiter,
            output_dir: output_dir.into(),
        }
    }

    /// Filter an extracted file; the input advances to `Filtered`
    #[instrument(skip_all, fields(file = %input.file_name()))]
    pub async fn filter(&self, input: &mut LocalArtifact, keys: &[String]) -> Result<FilterOutcome> {
        let source = input.path().to_path_buf();
        let output = self.output_dir.join(output_name(&source, keys));
        let column = self.column.clone();
        let delimiter = self.delimiter;
        let keys = keys.to_vec();

        let stats = tokio::task::spawn_blocking({
            let output = output.clone();
            move || filter_file(&source, &output, &column, delimiter, &keys)
        })
        .await??;

        input.advance(ArtifactStage::Filtered)?;
        Ok(FilterOutcome {
            artifact: LocalArtifact::new(output, ArtifactStage::Filtered),
            stats,
        })
    }
}

/// `<stem>_filtered_<K1_K2...><ext>`
pub fn output_name(input: &Path, keys: &[String]) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = input
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    format!("{}_filtered_{}{}", stem, keys.join("_"), ext)
}

/// Stream `input` into `output` keeping the header and matching records
///
/// A partially written output is removed on error.
pub fn filter_file(
    input: &Path,
    output: &Path,
    column: &str,
    delimiter: u8,
    keys: &[String],
) -> std::result::Result<FilterStats, FilterError> {
    if keys.is_empty() {
        return Err(FilterError::NoKeys(input.display().to_string()));
    }
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let result = run_filter(input, output, column, delimiter, keys);
    if result.is_err() {
        let _ = std::fs::remove_file(output);
    }
    result
}

fn run_filter(
    input: &Path,
    output: &Path,
    column: &str,
    delimiter: u8,
    keys: &[String],
) -> std::result::Result<FilterStats, FilterError> {
    let mut reader = BufReader::with_capacity(READ_BUFFER, File::open(input)?);
    let mut writer = BufWriter::with_capacity(READ_BUFFER, File::create(output)?);

    let wanted: HashSet<Vec<u8>> = keys.iter().map(|key| key.trim().as_bytes().to_vec()).collect();

    let mut stats = FilterStats {
        records_read: 0,
        records_kept: 0,
        used_heuristic: false,
    };

    let mut line = Vec::with_capacity(4096);
    if reader.read_until(b'\n', &mut line)? == 0 {
        writer.flush()?;
        debug!("{} is empty", input.display());
        return Ok(stats);
    }
    writer.write_all(&line)?;

    let selector = match find_column(strip_terminator(&line), delimiter, column) {
        Some(idx) => Selector::Column(idx),
        None => {
            let missing = FilterError::ColumnMissing {
                column: column.to_string(),
                file: input.display().to_string(),
            };
            warn!("{}; falling back to positional matching", missing);
            stats.used_heuristic = true;
            Selector::Heuristic(wanted.iter().cloned().collect())
        },
    };

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        stats.records_read += 1;

        let record = strip_terminator(&line);
        let keep = match &selector {
            Selector::Column(idx) => record
                .split(|b| *b == delimiter)
                .nth(*idx)
                .map(|field| wanted.contains(field.trim_ascii()))
                .unwrap_or(false),
            Selector::Heuristic(keys) => keys.iter().any(|key| heuristic_match(record, key, delimiter)),
        };

        if keep {
            writer.write_all(&line)?;
            stats.records_kept += 1;
        }

        if stats.records_read % PROGRESS_INTERVAL == 0 {
            info!(
                "{}: {} records read, {} kept",
                input.display(),
                stats.records_read,
                stats.records_kept
            );
        }
    }

    writer.flush()?;
    info!(
        "Filtered {} -> {} ({} of {} records)",
        input.display(),
        output.display(),
        stats.records_kept,
        stats.records_read
    );
    Ok(stats)
}

fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn normalize_header_field(field: &[u8]) -> Vec<u8> {
    let trimmed = field.trim_ascii();
    let unquoted = trimmed
        .strip_prefix(b"\"")
        .and_then(|f| f.strip_suffix(b"\""))
        .unwrap_or(trimmed);
    unquoted.to_ascii_uppercase()
}

fn find_column(header: &[u8], delimiter: u8, column: &str) -> Option<usize> {
    let header = header.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(header);
    let wanted = column.trim().to_ascii_uppercase().into_bytes();
    header
        .split(|b| *b == delimiter)
        .position(|field| normalize_header_field(field) == wanted)
}

fn heuristic_match(record: &[u8], key: &[u8], delimiter: u8) -> bool {
    let mut surrounded = Vec::with_capacity(key.len() + 2);
    surrounded.push(delimiter);
    surrounded.extend_from_slice(key);
    surrounded.push(delimiter);

    let contains = record.windows(surrounded.len()).any(|window| window == surrounded.as_slice());
    let starts = record.starts_with(&surrounded[1..]);
    let ends = record.ends_with(&surrounded[..surrounded.len() - 1]);
    contains || starts || ends
}
