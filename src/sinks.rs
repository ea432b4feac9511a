use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use csv::{ByteRecord, StringRecord, Writer, WriterBuilder};
use itoa::Buffer as ItoaBuffer;
use ryu::Buffer as RyuBuffer;

use crate::error::Result;
use crate::value::Value;

/// Write-mode counterpart of the CSV reader: a header-bearing CSV file
/// flushed after every appended record.
pub struct CsvAppender {
    writer: Writer<File>,
}

impl CsvAppender {
    /// Creates the file and writes the supplied header order.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or the header
    /// cannot be written.
    pub fn create<S: AsRef<str>>(path: impl AsRef<Path>, headers: &[S]) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = WriterBuilder::new().from_writer(file);
        writer.write_record(headers.iter().map(|h| h.as_ref().as_bytes()))?;
        writer.flush()?;
        Ok(Self { writer })
    }

    /// Appends one record of string fields and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn append<S: AsRef<str>>(&mut self, fields: &[S]) -> Result<()> {
        self.writer
            .write_record(fields.iter().map(|f| f.as_ref().as_bytes()))?;
        self.writer.flush()?;
        Ok(())
    }

    /// Appends one record of typed values, rendering each through the
    /// shared numeric scratch buffers.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn append_values(&mut self, values: &[Option<Value>]) -> Result<()> {
        let mut record = ByteRecord::new();
        let mut scratch = Vec::new();
        let mut ryu = RyuBuffer::new();
        let mut itoa = ItoaBuffer::new();
        for value in values {
            match value {
                Some(value) => {
                    value.encode_field(&mut scratch, &mut ryu, &mut itoa);
                    record.push_field(&scratch);
                }
                None => record.push_field(b""),
            }
        }
        self.writer.write_byte_record(&record)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Plain line-appending sink flushed after every line.
pub struct LineAppender {
    writer: BufWriter<File>,
}

impl LineAppender {
    /// Creates (truncates) the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Appends one line and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be written.
    pub fn append(&mut self, line: &str) -> Result<()> {
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Side output receiving one derived record per successful row.
///
/// The layout is entirely determined by the target class's extract hook;
/// the engine only chooses between a plain file and a CSV file based on
/// whether extract headers were configured.
pub enum ExtractSink {
    Lines(LineAppender),
    Csv(CsvAppender),
}

impl ExtractSink {
    /// Opens the sink, writing headers when supplied.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn open(path: impl AsRef<Path>, headers: Option<&[String]>) -> Result<Self> {
        match headers {
            Some(headers) => Ok(Self::Csv(CsvAppender::create(path, headers)?)),
            None => Ok(Self::Lines(LineAppender::create(path)?)),
        }
    }

    /// Appends one record; plain sinks join the fields with commas.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn append<S: AsRef<str>>(&mut self, fields: &[S]) -> Result<()> {
        match self {
            Self::Csv(csv) => csv.append(fields),
            Self::Lines(lines) => {
                let joined = fields
                    .iter()
                    .map(AsRef::as_ref)
                    .collect::<Vec<_>>()
                    .join(",");
                lines.append(&joined)
            }
        }
    }

    /// Appends one preformatted line; CSV sinks treat it as a
    /// single-field record.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be written.
    pub fn append_line(&mut self, line: &str) -> Result<()> {
        match self {
            Self::Lines(lines) => lines.append(line),
            Self::Csv(csv) => csv.append(&[line]),
        }
    }
}

/// Receives the raw rows whose migration failed, preserving input order
/// and the input header.
pub struct RejectWriter {
    writer: Writer<File>,
}

impl RejectWriter {
    /// Creates the rejects file and writes the input header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or the header
    /// cannot be written.
    pub fn create<S: AsRef<str>>(path: impl AsRef<Path>, headers: &[S]) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = WriterBuilder::new().from_writer(file);
        writer.write_record(headers.iter().map(|h| h.as_ref().as_bytes()))?;
        writer.flush()?;
        Ok(Self { writer })
    }

    /// Appends one raw input record and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn append(&mut self, raw: &StringRecord) -> Result<()> {
        self.writer.write_record(raw)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::CsvSource;

    #[test]
    fn appender_round_trips_header_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.csv");
        {
            let mut appender =
                CsvAppender::create(&path, &["First", "Last Name"]).expect("create");
            appender.append(&["Joe", "Smith"]).expect("append");
        }
        let source = CsvSource::open(&path).expect("reopen");
        assert_eq!(source.field_names(), ["First", "Last Name"]);
        assert_eq!(source.accessors(), ["first", "last_name"]);
    }

    #[test]
    fn extract_sink_without_headers_writes_plain_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("extract.txt");
        {
            let mut sink = ExtractSink::open(&path, None).expect("open");
            sink.append(&["a", "1"]).expect("append");
            sink.append_line("b,2").expect("append line");
        }
        let contents = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(contents, "a,1\nb,2\n");
    }
}
