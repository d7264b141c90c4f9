use anyhow::{anyhow, Context, Result};
use csv::{Reader, ReaderBuilder};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::database_ops::error::RecordError;
use crate::database_ops::models::RawGameRecord;

const REQUIRED_HEADERS: [&str; 2] = ["AppID", "Name"];

/// Streams catalog rows out of a CSV export with the Steam dataset headers.
pub struct CsvSource<R: Read> {
    reader: Reader<R>,
}

impl CsvSource<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        Self::from_reader(BufReader::with_capacity(8 << 20, file))
            .with_context(|| format!("read headers of {}", path.display()))
    }
}

impl<R: Read> CsvSource<R> {
    /// Fails only when the header row is unreadable or lacks the key columns.
    pub fn from_reader(input: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .trim(csv::Trim::None)
            .from_reader(input);
        let headers = reader.headers()?.clone();
        for required in REQUIRED_HEADERS {
            if !headers.iter().any(|h| h.trim() == required) {
                return Err(anyhow!("{required} column missing"));
            }
        }
        Ok(Self { reader })
    }

    /// One item per data line. A line that cannot be decoded yields
    /// [`RecordError::Unreadable`] and reading continues with the next one.
    pub fn records(self) -> impl Iterator<Item = Result<RawGameRecord, RecordError>> {
        self.reader
            .into_deserialize::<RawGameRecord>()
            .map(|row| row.map_err(|e| RecordError::Unreadable(e.to_string())))
    }
}
