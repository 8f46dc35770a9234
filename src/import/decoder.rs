//! Streaming decoder for export files
//!
//! A JSON export file is one large array of objects. The decoder scans the
//! array byte by byte, tracking string/escape state and object depth, and
//! buffers only the element being decoded. After each element it yields a
//! [`Cursor`] that a later run can seek to directly.
//!
//! CSV exports go through [`CsvDecoder`] instead; [`open_source`] picks the
//! decoder from the file extension.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::csv_decoder::CsvDecoder;
use super::raw::RawRecord;
use crate::types::{CompanyRecord, Section};

/// Largest single element accepted
const MAX_RECORD_BYTES: usize = 64 * 1024 * 1024;

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Position immediately after a fully decoded element (or after the opening
/// `[` when nothing has been decoded yet).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cursor {
    /// Byte offset into the file
    pub offset: u64,
    /// Elements before `offset`
    pub record_index: u64,
}

/// Errors raised while decoding an export file
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("read error after record {}: {source}", last_good.record_index)]
    Io {
        last_good: Cursor,
        #[source]
        source: io::Error,
    },
    #[error("invalid record #{record_index} at byte {offset}: {reason}")]
    InvalidRecord {
        last_good: Cursor,
        record_index: u64,
        offset: u64,
        reason: String,
    },
    #[error("input ends before the array is closed (after record {})", last_good.record_index)]
    Truncated { last_good: Cursor },
}

impl DecodeError {
    /// Last cursor that was decoded completely, when decoding got that far
    pub fn last_good(&self) -> Option<Cursor> {
        match self {
            DecodeError::Open { .. } => None,
            DecodeError::Io { last_good, .. }
            | DecodeError::InvalidRecord { last_good, .. }
            | DecodeError::Truncated { last_good } => Some(*last_good),
        }
    }
}

/// A normalised record and the cursor just past it
#[derive(Debug, Clone)]
pub struct DecodedRecord {
    pub cursor: Cursor,
    pub record: CompanyRecord,
}

/// A resumable stream of decoded records
pub trait RecordSource: Iterator<Item = Result<DecodedRecord, DecodeError>> {
    /// Bytes consumed so far
    fn offset(&self) -> u64;

    fn total_bytes(&self) -> u64;

    /// Cursor of the last record returned (or the resume point)
    fn last_good(&self) -> Cursor;
}

/// Open the decoder matching the format of `path`
pub fn open_source(path: &Path, section: Section, resume: Option<Cursor>) -> Result<Box<dyn RecordSource>, DecodeError> {
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        Ok(Box::new(CsvDecoder::open(path, section, resume)?))
    } else {
        Ok(Box::new(RecordDecoder::open(path, section, resume)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before the opening `[`
    Start,
    /// After `[`: an element or `]` follows
    First,
    /// After an element: `,` or `]` follows
    Next,
    Done,
}

/// Pull-based decoder over one export file
pub struct RecordDecoder {
    reader: BufReader<File>,
    section: Section,
    total_bytes: u64,
    offset: u64,
    last_good: Cursor,
    state: State,
    buf: Vec<u8>,
}

impl RecordDecoder {
    /// Open `path` for records of `section`, continuing after `resume` if given
    pub fn open(path: &Path, section: Section, resume: Option<Cursor>) -> Result<Self, DecodeError> {
        let open_err = |source| DecodeError::Open {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(open_err)?;
        let total_bytes = file.metadata().map_err(open_err)?.len();
        let mut reader = BufReader::with_capacity(256 * 1024, file);

        let (state, last_good) = match resume {
            Some(cursor) => {
                reader.seek(SeekFrom::Start(cursor.offset)).map_err(open_err)?;
                let state = if cursor.record_index == 0 { State::First } else { State::Next };
                (state, cursor)
            }
            None => (State::Start, Cursor::default()),
        };

        Ok(Self {
            reader,
            section,
            total_bytes,
            offset: last_good.offset,
            last_good,
            state,
            buf: Vec::new(),
        })
    }

    fn io_err(&self, source: io::Error) -> DecodeError {
        DecodeError::Io {
            last_good: self.last_good,
            source,
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> DecodeError {
        DecodeError::InvalidRecord {
            last_good: self.last_good,
            record_index: self.last_good.record_index,
            offset: self.offset,
            reason: reason.into(),
        }
    }

    fn truncated(&self) -> DecodeError {
        DecodeError::Truncated {
            last_good: self.last_good,
        }
    }

    fn peek(&mut self) -> Result<Option<u8>, DecodeError> {
        match self.reader.fill_buf() {
            Ok(buf) => Ok(buf.first().copied()),
            Err(e) => Err(self.io_err(e)),
        }
    }

    fn next_byte(&mut self) -> Result<Option<u8>, DecodeError> {
        let byte = self.peek()?;
        if byte.is_some() {
            self.reader.consume(1);
            self.offset += 1;
        }
        Ok(byte)
    }

    /// Next non-whitespace byte, consumed
    fn next_token(&mut self) -> Result<Option<u8>, DecodeError> {
        loop {
            match self.next_byte()? {
                Some(b) if b.is_ascii_whitespace() => continue,
                other => return Ok(other),
            }
        }
    }

    fn skip_whitespace(&mut self) -> Result<Option<u8>, DecodeError> {
        loop {
            match self.peek()? {
                Some(b) if b.is_ascii_whitespace() => {
                    self.next_byte()?;
                }
                other => return Ok(other),
            }
        }
    }

    fn skip_bom(&mut self) -> Result<(), DecodeError> {
        let starts_with_bom = match self.reader.fill_buf() {
            Ok(buf) => buf.starts_with(&UTF8_BOM),
            Err(e) => return Err(self.io_err(e)),
        };
        if starts_with_bom {
            self.reader.consume(UTF8_BOM.len());
            self.offset += UTF8_BOM.len() as u64;
        }
        Ok(())
    }

    /// Copy one complete object into `buf`. The opening `{` is next.
    fn capture_object(&mut self) -> Result<(), DecodeError> {
        self.buf.clear();
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        loop {
            let byte = self.next_byte()?.ok_or_else(|| self.truncated())?;
            self.buf.push(byte);
            if self.buf.len() > MAX_RECORD_BYTES {
                return Err(self.invalid(format!("record larger than {} bytes", MAX_RECORD_BYTES)));
            }

            if in_string {
                if escaped {
                    escaped = false;
                } else if byte == b'\\' {
                    escaped = true;
                } else if byte == b'"' {
                    in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => in_string = true,
                b'{' | b'[' => depth += 1,
                b'}' | b']' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| self.invalid("unbalanced brackets"))?;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
    }

    fn decode_element(&mut self) -> Result<DecodedRecord, DecodeError> {
        match self.skip_whitespace()? {
            Some(b'{') => {}
            Some(other) => {
                return Err(self.invalid(format!("expected an object, found '{}'", other as char)))
            }
            None => return Err(self.truncated()),
        }
        self.capture_object()?;

        let raw: RawRecord = serde_json::from_slice(&self.buf).map_err(|e| self.invalid(e.to_string()))?;
        let record = raw.into_record(self.section).map_err(|reason| self.invalid(reason))?;

        let cursor = Cursor {
            offset: self.offset,
            record_index: self.last_good.record_index + 1,
        };
        self.last_good = cursor;
        Ok(DecodedRecord { cursor, record })
    }

    fn advance(&mut self) -> Result<Option<DecodedRecord>, DecodeError> {
        loop {
            match self.state {
                State::Done => return Ok(None),
                State::Start => {
                    self.skip_bom()?;
                    match self.next_token()? {
                        Some(b'[') => {
                            self.last_good = Cursor {
                                offset: self.offset,
                                record_index: 0,
                            };
                            self.state = State::First;
                        }
                        Some(_) => return Err(self.invalid("expected '[' at start of input")),
                        None => return Err(self.truncated()),
                    }
                }
                State::First => {
                    if self.skip_whitespace()? == Some(b']') {
                        self.next_byte()?;
                        self.state = State::Done;
                        continue;
                    }
                    let decoded = self.decode_element()?;
                    self.state = State::Next;
                    return Ok(Some(decoded));
                }
                State::Next => match self.next_token()? {
                    Some(b',') => return self.decode_element().map(Some),
                    Some(b']') => self.state = State::Done,
                    Some(other) => {
                        return Err(self.invalid(format!("expected ',' or ']', found '{}'", other as char)))
                    }
                    None => return Err(self.truncated()),
                },
            }
        }
    }
}

impl RecordSource for RecordDecoder {
    fn offset(&self) -> u64 {
        self.offset
    }

    fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    fn last_good(&self) -> Cursor {
        self.last_good
    }
}

impl Iterator for RecordDecoder {
    type Item = Result<DecodedRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(decoded)) => Some(Ok(decoded)),
            Ok(None) => None,
            Err(e) => {
                // Fused after an error
                self.state = State::Done;
                Some(Err(e))
            }
        }
    }
}
