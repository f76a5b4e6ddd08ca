//! Streaming, batch-at-a-time access to a delimited source file.

use super::error::ReadError;
use csv::StringRecord;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

const BYTE_ORDER_MARK: char = '\u{feff}';

/// One source record as raw text.
pub type Row = Vec<String>;

/// Tab for `.tsv` files, comma otherwise, unless a delimiter was given.
pub fn resolve_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub struct BatchReader<R: Read> {
    reader: csv::Reader<R>,
    headers: Vec<String>,
    record: StringRecord,
    records_read: u64,
    exhausted: bool,
    pending_error: Option<ReadError>,
}

impl BatchReader<BufReader<File>> {
    pub fn open(path: &Path, delimiter: u8) -> Result<Self, ReadError> {
        let file = File::open(path).map_err(|source| ReadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(BufReader::new(file), delimiter)
    }
}

impl<R: Read> BatchReader<R> {
    /// Wrap any byte source; the first record is consumed as the header.
    pub fn from_reader(source: R, delimiter: u8) -> Result<Self, ReadError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter)
            .double_quote(true)
            .flexible(false)
            .from_reader(source);

        let headers: Vec<String> = reader
            .headers()
            .map_err(|source| ReadError::Header { source })?
            .iter()
            .enumerate()
            .map(|(index, header)| {
                if index == 0 {
                    header.trim_start_matches(BYTE_ORDER_MARK).to_string()
                } else {
                    header.to_string()
                }
            })
            .collect();

        if headers.is_empty() {
            return Err(ReadError::MissingHeader);
        }

        Ok(Self {
            reader,
            headers,
            record: StringRecord::new(),
            records_read: 0,
            exhausted: false,
            pending_error: None,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Data records returned so far.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Read up to `max_rows` records.
    ///
    /// The flag is `false` once the end of input was reached; the rows
    /// returned alongside it are the final partial batch (possibly empty).
    ///
    /// Rows read before a malformed record are returned first with the flag
    /// set; the following call reports the error. Nothing is read after it.
    pub fn read_batch(&mut self, max_rows: usize) -> Result<(Vec<Row>, bool), ReadError> {
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }
        if self.exhausted {
            return Ok((Vec::new(), false));
        }

        let mut rows = Vec::with_capacity(max_rows);
        while rows.len() < max_rows {
            match self.reader.read_record(&mut self.record) {
                Ok(true) => {
                    rows.push(self.record.iter().map(str::to_string).collect());
                }
                Ok(false) => {
                    self.exhausted = true;
                    self.records_read += rows.len() as u64;
                    return Ok((rows, false));
                }
                Err(err) => {
                    self.exhausted = true;
                    let err = ReadError::parse(err);
                    if rows.is_empty() {
                        return Err(err);
                    }
                    self.pending_error = Some(err);
                    self.records_read += rows.len() as u64;
                    return Ok((rows, true));
                }
            }
        }

        self.records_read += rows.len() as u64;
        Ok((rows, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(text: &str) -> BatchReader<Cursor<Vec<u8>>> {
        BatchReader::from_reader(Cursor::new(text.as_bytes().to_vec()), b',').unwrap()
    }

    #[test]
    fn delimiter_follows_extension_unless_overridden() {
        assert_eq!(resolve_delimiter(Path::new("data.TSV"), None), b'\t');
        assert_eq!(resolve_delimiter(Path::new("data.csv"), None), b',');
        assert_eq!(resolve_delimiter(Path::new("data.tsv"), Some(b';')), b';');
    }

    #[test]
    fn reads_full_batches_then_final_partial_batch() {
        let mut reader = reader("id,name\n1,a\n2,b\n3,c\n4,d\n5,e\n");
        assert_eq!(reader.headers(), ["id", "name"]);

        let (first, more) = reader.read_batch(2).unwrap();
        assert_eq!(first.len(), 2);
        assert!(more);

        let (second, more) = reader.read_batch(2).unwrap();
        assert_eq!(second[0], vec!["3".to_string(), "c".to_string()]);
        assert!(more);

        let (last, more) = reader.read_batch(2).unwrap();
        assert_eq!(last, vec![vec!["5".to_string(), "e".to_string()]]);
        assert!(!more);
        assert_eq!(reader.records_read(), 5);
    }

    #[test]
    fn exact_multiple_ends_with_empty_batch() {
        let mut reader = reader("id\n1\n2\n");
        let (rows, more) = reader.read_batch(2).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(more);

        let (rows, more) = reader.read_batch(2).unwrap();
        assert!(rows.is_empty());
        assert!(!more);

        let (rows, more) = reader.read_batch(2).unwrap();
        assert!(rows.is_empty());
        assert!(!more);
    }

    #[test]
    fn quoted_fields_keep_delimiters_and_newlines() {
        let mut reader = reader("id,note\n1,\"a, \"\"quoted\"\"\nvalue\"\n");
        let (rows, _) = reader.read_batch(10).unwrap();
        assert_eq!(rows[0][1], "a, \"quoted\"\nvalue");
    }

    #[test]
    fn stray_quotes_in_unquoted_fields_are_kept() {
        let mut reader = reader("id,size\n1,12\" pipe\n");
        let (rows, _) = reader.read_batch(10).unwrap();
        assert_eq!(rows[0][1], "12\" pipe");
    }

    #[test]
    fn header_byte_order_mark_is_stripped() {
        let reader = reader("\u{feff}id,name\n1,a\n");
        assert_eq!(reader.headers()[0], "id");
    }

    #[test]
    fn malformed_record_reports_its_line() {
        let mut reader = reader("id,name\n2\n3,c\n");
        match reader.read_batch(10) {
            Err(ReadError::Parse { line, .. }) => assert_eq!(line, Some(2)),
            other => panic!("expected parse error, got {other:?}"),
        }
        let (rows, more) = reader.read_batch(10).unwrap();
        assert!(rows.is_empty());
        assert!(!more);
        assert_eq!(reader.records_read(), 0);
    }

    #[test]
    fn rows_before_malformed_record_are_kept() {
        let mut reader = reader("id,name\n1,a\n2,b\n3\n4,d\n");

        let (rows, more) = reader.read_batch(10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec!["2".to_string(), "b".to_string()]);
        assert!(more);
        assert_eq!(reader.records_read(), 2);

        match reader.read_batch(10) {
            Err(ReadError::Parse { line, .. }) => assert_eq!(line, Some(4)),
            other => panic!("expected parse error, got {other:?}"),
        }
        let (rows, more) = reader.read_batch(10).unwrap();
        assert!(rows.is_empty());
        assert!(!more);
        assert_eq!(reader.records_read(), 2);
    }

    #[test]
    fn unreadable_header_fails_open() {
        let source = Cursor::new(b"\xff\xfeid,name\n1,a\n".to_vec());
        let result = BatchReader::from_reader(source, b',');
        assert!(matches!(result, Err(ReadError::Header { .. })));
    }

    #[test]
    fn empty_source_has_no_header() {
        let result = BatchReader::from_reader(Cursor::new(Vec::new()), b',');
        assert!(matches!(result, Err(ReadError::MissingHeader)));
    }
}
