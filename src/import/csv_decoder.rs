//! Streaming decoder for the simplified CSV export
//!
//! The file is `;`-separated UTF-8 with an optional BOM and a header row.
//! Rows are mapped by header name, so column order may change between
//! exports. The cursor after each row is the byte position of the next one,
//! which a later run seeks to directly.

use csv::{Position, ReaderBuilder, StringRecord};
use std::fs::File;
use std::io;
use std::path::Path;

use super::decoder::{Cursor, DecodeError, DecodedRecord, RecordSource};
use super::raw::RawBasicRow;
use crate::types::Section;

pub const DELIMITER: u8 = b';';

/// Pull-based decoder over one CSV export file
pub struct CsvDecoder {
    reader: csv::Reader<File>,
    headers: StringRecord,
    row: StringRecord,
    total_bytes: u64,
    last_good: Cursor,
    done: bool,
}

impl CsvDecoder {
    /// Open `path`, continuing after `resume` if given. The header row is
    /// always read from the start of the file.
    pub fn open(path: &Path, section: Section, resume: Option<Cursor>) -> Result<Self, DecodeError> {
        let open_err = |source: io::Error| DecodeError::Open {
            path: path.to_path_buf(),
            source,
        };
        if section != Section::Basic {
            return Err(open_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("CSV files carry the basic section, not {}", section),
            )));
        }

        let file = File::open(path).map_err(open_err)?;
        let total_bytes = file.metadata().map_err(open_err)?.len();
        let mut reader = ReaderBuilder::new()
            .delimiter(DELIMITER)
            .flexible(true)
            .from_reader(file);

        let headers: StringRecord = reader
            .headers()
            .map_err(|e| open_err(e.into()))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim())
            .collect();
        reader.set_headers(headers.clone());

        let last_good = match resume {
            Some(cursor) => {
                let mut position = Position::new();
                position.set_byte(cursor.offset).set_record(cursor.record_index + 1);
                reader.seek(position).map_err(|e| open_err(e.into()))?;
                cursor
            }
            None => Cursor {
                offset: reader.position().byte(),
                record_index: 0,
            },
        };

        Ok(Self {
            reader,
            headers,
            row: StringRecord::new(),
            total_bytes,
            last_good,
            done: false,
        })
    }

    /// Column names as read from the header row
    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    fn read_error(&self, e: csv::Error) -> DecodeError {
        let reason = e.to_string();
        match e.into_kind() {
            csv::ErrorKind::Io(source) => DecodeError::Io {
                last_good: self.last_good,
                source,
            },
            _ => self.invalid(reason),
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> DecodeError {
        DecodeError::InvalidRecord {
            last_good: self.last_good,
            record_index: self.last_good.record_index,
            offset: self.last_good.offset,
            reason: reason.into(),
        }
    }

    fn advance(&mut self) -> Result<Option<DecodedRecord>, DecodeError> {
        loop {
            let more = match self.reader.read_record(&mut self.row) {
                Ok(more) => more,
                Err(e) => return Err(self.read_error(e)),
            };
            if !more {
                return Ok(None);
            }
            let cursor = Cursor {
                offset: self.reader.position().byte(),
                record_index: self.last_good.record_index + 1,
            };
            // Blank lines between rows
            if self.row.iter().all(|field| field.trim().is_empty()) {
                self.last_good.offset = cursor.offset;
                continue;
            }

            let raw: RawBasicRow = self
                .row
                .deserialize(Some(&self.headers))
                .map_err(|e| self.invalid(e.to_string()))?;
            let record = raw.into_record().map_err(|reason| self.invalid(reason))?;
            self.last_good = cursor;
            return Ok(Some(DecodedRecord { cursor, record }));
        }
    }
}

impl RecordSource for CsvDecoder {
    fn offset(&self) -> u64 {
        self.last_good.offset
    }

    fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    fn last_good(&self) -> Cursor {
        self.last_good
    }
}

impl Iterator for CsvDecoder {
    type Item = Result<DecodedRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(decoded)) => Some(Ok(decoded)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
