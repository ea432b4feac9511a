mod coerce;

pub use coerce::{coerce, coerce_date};

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use csv::{ReaderBuilder, StringRecord};

use crate::error::{Error, Result, Section};
use crate::value::Value;

/// Normalised identifier derived from a source header.
pub type FieldKey = String;

/// User hook applied to each raw cell before the built-in coercion.
///
/// A non-`None` result wins; `None` falls through to the standard rules.
pub type Converter = Arc<dyn Fn(&str) -> Option<Value> + Send + Sync>;

/// Configures optional reader behaviour.
#[derive(Clone, Default)]
pub struct ReaderOptions {
    converter: Option<Converter>,
}

impl ReaderOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a user converter consulted before the built-in coercion.
    #[must_use]
    pub fn with_converter<F>(mut self, converter: F) -> Self
    where
        F: Fn(&str) -> Option<Value> + Send + Sync + 'static,
    {
        self.converter = Some(Arc::new(converter));
        self
    }
}

/// Shared header layout: original names, normalised keys, and lookups.
#[derive(Debug)]
pub struct RecordLayout {
    field_names: Vec<String>,
    keys: Vec<FieldKey>,
    by_key: HashMap<FieldKey, usize>,
}

impl RecordLayout {
    fn from_headers<I, S>(headers: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let field_names: Vec<String> = headers.into_iter().map(Into::into).collect();
        if field_names.is_empty() {
            return Err(Error::migration(Section::Header, "input has no header row"));
        }
        let keys: Vec<FieldKey> = field_names.iter().map(|name| accessor_key(name)).collect();
        let mut by_key = HashMap::with_capacity(keys.len());
        for (index, key) in keys.iter().enumerate() {
            if key.is_empty() {
                return Err(Error::migration(
                    Section::Header,
                    format!("header '{}' normalises to an empty key", field_names[index]),
                ));
            }
            if by_key.insert(key.clone(), index).is_some() {
                return Err(Error::migration(
                    Section::Header,
                    format!("headers collide on normalised key '{key}'"),
                ));
            }
        }
        Ok(Self {
            field_names,
            keys,
            by_key,
        })
    }

    /// Original header strings, in input order.
    #[must_use]
    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    /// Normalised field keys, in input order.
    #[must_use]
    pub fn keys(&self) -> &[FieldKey] {
        &self.keys
    }

    /// Resolves a header (original or already-normalised) to its key.
    #[must_use]
    pub fn accessor(&self, header: &str) -> Option<&FieldKey> {
        let key = accessor_key(header);
        self.by_key.get(&key).map(|&index| &self.keys[index])
    }

    /// Index of a normalised key within the row, if present.
    #[must_use]
    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.by_key.get(key).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Lowercases and collapses non-alphanumeric runs to a single underscore.
#[must_use]
pub fn accessor_key(header: &str) -> FieldKey {
    let mut key = String::with_capacity(header.len());
    let mut pending_separator = false;
    for ch in header.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !key.is_empty() {
                key.push('_');
            }
            pending_separator = false;
            key.push(ch.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }
    key
}

/// One coerced input row plus the raw record it came from.
#[derive(Debug, Clone)]
pub struct Record {
    layout: Arc<RecordLayout>,
    cells: Vec<Option<Value>>,
    raw: StringRecord,
    number: u64,
}

impl Record {
    /// Coerced value for a normalised field key, if present and non-empty.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.layout
            .index_of(key)
            .and_then(|index| self.cells[index].as_ref())
    }

    /// Coerced value by column position.
    #[must_use]
    pub fn cell(&self, index: usize) -> Option<&Value> {
        self.cells.get(index).and_then(Option::as_ref)
    }

    /// The raw CSV record, used verbatim by the rejects sink.
    #[must_use]
    pub fn raw(&self) -> &StringRecord {
        &self.raw
    }

    /// 1-based record number within the source.
    #[must_use]
    pub const fn number(&self) -> u64 {
        self.number
    }

    #[must_use]
    pub fn layout(&self) -> &Arc<RecordLayout> {
        &self.layout
    }
}

/// Streams coerced records out of a CSV source.
pub struct CsvSource<R: Read> {
    reader: csv::Reader<R>,
    layout: Arc<RecordLayout>,
    converter: Option<Converter>,
    next_number: u64,
}

impl CsvSource<File> {
    /// Opens a CSV file and reads its header row.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the header row is
    /// missing or ambiguous after normalisation.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, ReaderOptions::default())
    }

    /// Opens a CSV file with explicit reader options.
    ///
    /// # Errors
    ///
    /// Same conditions as [`CsvSource::open`].
    pub fn open_with_options(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader_with_options(file, options)
    }
}

impl<R: Read> CsvSource<R> {
    /// Wraps any reader producing CSV text.
    ///
    /// # Errors
    ///
    /// Returns an error if the header row is missing or ambiguous.
    pub fn from_reader(input: R) -> Result<Self> {
        Self::from_reader_with_options(input, ReaderOptions::default())
    }

    /// Wraps any reader with explicit options.
    ///
    /// # Errors
    ///
    /// Returns an error if the header row is missing or ambiguous.
    pub fn from_reader_with_options(input: R, options: ReaderOptions) -> Result<Self> {
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(input);
        let headers = reader.headers()?.clone();
        let layout = RecordLayout::from_headers(headers.iter())?;
        Ok(Self {
            reader,
            layout: Arc::new(layout),
            converter: options.converter,
            next_number: 1,
        })
    }

    /// Original header strings in order.
    #[must_use]
    pub fn field_names(&self) -> &[String] {
        self.layout.field_names()
    }

    /// Normalised field keys in order.
    #[must_use]
    pub fn accessors(&self) -> &[FieldKey] {
        self.layout.keys()
    }

    /// Resolves a header string to its normalised key.
    #[must_use]
    pub fn accessor(&self, header: &str) -> Option<&FieldKey> {
        self.layout.accessor(header)
    }

    /// The shared layout handed to every record.
    #[must_use]
    pub fn layout(&self) -> &Arc<RecordLayout> {
        &self.layout
    }

    /// Advances to the next record.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying row cannot be read or has a
    /// different width than the header.
    pub fn try_next(&mut self) -> Result<Option<Record>> {
        let mut raw = StringRecord::new();
        if !self.reader.read_record(&mut raw)? {
            return Ok(None);
        }
        if raw.len() != self.layout.len() {
            return Err(Error::record(
                self.next_number,
                format!(
                    "row has {} fields, header has {}",
                    raw.len(),
                    self.layout.len()
                ),
            ));
        }
        let cells = raw
            .iter()
            .map(|field| {
                if let Some(converter) = &self.converter
                    && let Some(value) = converter(field)
                {
                    return Some(value);
                }
                coerce(field)
            })
            .collect();
        let record = Record {
            layout: Arc::clone(&self.layout),
            cells,
            raw,
            number: self.next_number,
        };
        self.next_number += 1;
        Ok(Some(record))
    }
}

impl<R: Read> Iterator for CsvSource<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.try_next().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessor_keys_collapse_punctuation_runs() {
        assert_eq!(accessor_key("First Name"), "first_name");
        assert_eq!(accessor_key("Street  Address--2"), "street_address_2");
        assert_eq!(accessor_key("  Spouse "), "spouse");
        assert_eq!(accessor_key("ALLCAPS"), "allcaps");
    }

    #[test]
    fn source_exposes_names_and_accessors_in_order() {
        let input = "First,Last Name,ZIP Code\nJoe,Smith,60614\n";
        let source = CsvSource::from_reader(input.as_bytes()).expect("open source");
        assert_eq!(source.field_names(), ["First", "Last Name", "ZIP Code"]);
        assert_eq!(source.accessors(), ["first", "last_name", "zip_code"]);
        assert_eq!(source.accessor("Last Name").map(String::as_str), Some("last_name"));
        assert_eq!(source.accessor("missing"), None);
    }

    #[test]
    fn records_are_coerced_and_numbered() {
        let input = "Name,Age,Joined\nJoe,34,5-Jan-20\nJane,,\n";
        let mut source = CsvSource::from_reader(input.as_bytes()).expect("open source");

        let first = source.try_next().expect("read row").expect("first row");
        assert_eq!(first.number(), 1);
        assert_eq!(first.get("name"), Some(&Value::Str("Joe".into())));
        assert_eq!(first.get("age"), Some(&Value::Int(34)));
        assert!(matches!(first.get("joined"), Some(Value::Date(_))));

        let second = source.try_next().expect("read row").expect("second row");
        assert_eq!(second.number(), 2);
        assert_eq!(second.get("age"), None, "empty cell should be absent");

        assert!(source.try_next().expect("end of input").is_none());
    }

    #[test]
    fn converter_wins_over_builtin_coercion() {
        let options = ReaderOptions::new().with_converter(|raw| {
            (raw == "42").then(|| Value::Str("forty-two".into()))
        });
        let input = "N\n42\n7\n";
        let mut source =
            CsvSource::from_reader_with_options(input.as_bytes(), options).expect("open source");
        let first = source.try_next().expect("row").expect("row");
        assert_eq!(first.get("n"), Some(&Value::Str("forty-two".into())));
        let second = source.try_next().expect("row").expect("row");
        assert_eq!(second.get("n"), Some(&Value::Int(7)));
    }

    #[test]
    fn colliding_headers_are_fatal() {
        let input = "First Name,first__name\na,b\n";
        let err = match CsvSource::from_reader(input.as_bytes()) {
            Ok(_) => panic!("expected colliding headers to fail"),
            Err(err) => err,
        };
        assert!(matches!(err, Error::Migration { .. }));
    }
}
