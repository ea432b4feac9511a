use std::cmp::Ordering;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use csv::{Reader, ReaderBuilder, StringRecord, Writer, WriterBuilder};

use crate::error::{Error, Result};

/// Key over the common columns; an empty field is an absent component.
/// Absent components compare less than any present one.
type JoinKey = Vec<Option<String>>;

/// One output record, aligned with the computed output header; `None`
/// fields are written empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRecord {
    pub fields: Vec<Option<String>>,
}

/// Hook invoked on each candidate output record; returning `None` drops
/// the record.
pub type RecordTransform = Box<dyn FnMut(JoinRecord) -> Option<JoinRecord> + Send>;

/// Options for the sort-merge join.
#[derive(Default)]
pub struct JoinOptions {
    /// Source-side columns to include beyond the common ones
    /// (default: all).
    pub source_fields: Option<Vec<String>>,
    /// Per-record transform applied before writing.
    pub transform: Option<RecordTransform>,
}

/// Streaming sort-merge outer join of two CSV files on their common
/// columns.
///
/// Both inputs must be sorted ascendingly by the common columns in the
/// order those columns appear in the source header.
///
/// # Errors
///
/// Returns an error if a file cannot be opened, the inputs share no
/// columns, or reading/writing fails.
pub fn join_files(
    source: impl AsRef<Path>,
    target: impl AsRef<Path>,
    output: impl AsRef<Path>,
    options: JoinOptions,
) -> Result<()> {
    let source = File::open(source)?;
    let target = File::open(target)?;
    let output = File::create(output)?;
    join_readers(source, target, output, options)
}

/// [`join_files`] over arbitrary readers and writer.
///
/// # Errors
///
/// Returns an error if the inputs share no columns or reading/writing
/// fails.
pub fn join_readers<R1: Read, R2: Read, W: Write>(
    source: R1,
    target: R2,
    output: W,
    options: JoinOptions,
) -> Result<()> {
    let mut source_reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(source);
    let mut target_reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(target);

    let source_headers: Vec<String> = source_reader.headers()?.iter().map(str::to_owned).collect();
    let target_headers: Vec<String> = target_reader.headers()?.iter().map(str::to_owned).collect();

    let common: Vec<String> = source_headers
        .iter()
        .filter(|header| target_headers.contains(*header))
        .cloned()
        .collect();
    if common.is_empty() {
        return Err(Error::join("the inputs share no columns"));
    }

    let source_only: Vec<String> = source_headers
        .iter()
        .filter(|header| !common.contains(*header))
        .filter(|header| {
            options
                .source_fields
                .as_ref()
                .is_none_or(|include| include.contains(*header))
        })
        .cloned()
        .collect();
    let target_only: Vec<String> = target_headers
        .iter()
        .filter(|header| !common.contains(*header))
        .cloned()
        .collect();

    let position = |headers: &[String], name: &String| {
        headers
            .iter()
            .position(|h| h == name)
            .expect("column name taken from this header")
    };
    let source_key_idx: Vec<usize> = common.iter().map(|c| position(&source_headers, c)).collect();
    let target_key_idx: Vec<usize> = common.iter().map(|c| position(&target_headers, c)).collect();
    let source_only_idx: Vec<usize> = source_only
        .iter()
        .map(|c| position(&source_headers, c))
        .collect();
    let target_only_idx: Vec<usize> = target_only
        .iter()
        .map(|c| position(&target_headers, c))
        .collect();

    let mut writer = WriterBuilder::new().flexible(true).from_writer(output);
    let header: Vec<&String> = common.iter().chain(&source_only).chain(&target_only).collect();
    writer.write_record(header.iter().map(|h| h.as_bytes()))?;

    let mut source_side = Side::start(source_reader, source_key_idx)?;
    let mut target_side = Side::start(target_reader, target_key_idx)?;
    let mut transform = options.transform;
    let target_pad = target_only_idx.len();
    let source_pad = source_only_idx.len();

    loop {
        let step = match (&source_side.current, &target_side.current) {
            (None, None) => None,
            (Some(s), None) => Some((
                source_shape(s, &source_side.key_idx, &source_only_idx, target_pad),
                true,
                false,
            )),
            (None, Some(t)) => Some((
                target_shape(t, &target_side.key_idx, &target_only_idx, source_pad),
                false,
                true,
            )),
            (Some(s), Some(t)) => match compare_keys(&s.key, &t.key) {
                Ordering::Less => Some((
                    source_shape(s, &source_side.key_idx, &source_only_idx, target_pad),
                    true,
                    false,
                )),
                Ordering::Greater => Some((
                    target_shape(t, &target_side.key_idx, &target_only_idx, source_pad),
                    false,
                    true,
                )),
                Ordering::Equal => {
                    let fields = merged_shape(
                        s,
                        t,
                        &source_side.key_idx,
                        &source_only_idx,
                        &target_only_idx,
                    );
                    // Fan out duplicates: a side whose lookahead repeats
                    // its key advances alone so the other side's record
                    // can match it again.
                    let (advance_source, advance_target) = if source_side.duplicate_ahead() {
                        (true, false)
                    } else if target_side.duplicate_ahead() {
                        (false, true)
                    } else {
                        (true, true)
                    };
                    Some((fields, advance_source, advance_target))
                }
            },
        };
        let Some((fields, advance_source, advance_target)) = step else {
            break;
        };
        write_candidate(&mut writer, &mut transform, fields)?;
        if advance_source {
            source_side.advance()?;
        }
        if advance_target {
            target_side.advance()?;
        }
    }
    writer.flush()?;
    Ok(())
}

struct Entry {
    key: JoinKey,
    record: StringRecord,
}

struct Side<R: Read> {
    reader: Reader<R>,
    key_idx: Vec<usize>,
    current: Option<Entry>,
    lookahead: Option<Entry>,
}

impl<R: Read> Side<R> {
    fn start(mut reader: Reader<R>, key_idx: Vec<usize>) -> Result<Self> {
        let current = Self::read_entry(&mut reader, &key_idx)?;
        let lookahead = Self::read_entry(&mut reader, &key_idx)?;
        Ok(Self {
            reader,
            key_idx,
            current,
            lookahead,
        })
    }

    fn read_entry(reader: &mut Reader<R>, key_idx: &[usize]) -> Result<Option<Entry>> {
        let mut record = StringRecord::new();
        if !reader.read_record(&mut record)? {
            return Ok(None);
        }
        let key = key_idx.iter().map(|&index| field_of(&record, index)).collect();
        Ok(Some(Entry { key, record }))
    }

    fn advance(&mut self) -> Result<()> {
        self.current = self.lookahead.take();
        self.lookahead = Self::read_entry(&mut self.reader, &self.key_idx)?;
        Ok(())
    }

    fn duplicate_ahead(&self) -> bool {
        match (&self.current, &self.lookahead) {
            (Some(current), Some(lookahead)) => current.key == lookahead.key,
            _ => false,
        }
    }
}

fn field_of(record: &StringRecord, index: usize) -> Option<String> {
    record
        .get(index)
        .filter(|field| !field.is_empty())
        .map(str::to_owned)
}

/// Absent components sort before present ones; two absents tie.
fn compare_keys(a: &JoinKey, b: &JoinKey) -> Ordering {
    for (left, right) in a.iter().zip(b.iter()) {
        let component = match (left, right) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(l), Some(r)) => l.cmp(r),
        };
        if component != Ordering::Equal {
            return component;
        }
    }
    Ordering::Equal
}

fn source_shape(
    entry: &Entry,
    key_idx: &[usize],
    source_only_idx: &[usize],
    target_pad: usize,
) -> Vec<Option<String>> {
    let mut fields: Vec<Option<String>> = Vec::with_capacity(key_idx.len() + source_only_idx.len() + target_pad);
    fields.extend(key_idx.iter().map(|&i| field_of(&entry.record, i)));
    fields.extend(source_only_idx.iter().map(|&i| field_of(&entry.record, i)));
    fields.extend(std::iter::repeat_with(|| None).take(target_pad));
    fields
}

fn target_shape(
    entry: &Entry,
    key_idx: &[usize],
    target_only_idx: &[usize],
    source_pad: usize,
) -> Vec<Option<String>> {
    let mut fields: Vec<Option<String>> = Vec::with_capacity(key_idx.len() + source_pad + target_only_idx.len());
    fields.extend(key_idx.iter().map(|&i| field_of(&entry.record, i)));
    fields.extend(std::iter::repeat_with(|| None).take(source_pad));
    fields.extend(target_only_idx.iter().map(|&i| field_of(&entry.record, i)));
    fields
}

fn merged_shape(
    source: &Entry,
    target: &Entry,
    source_key_idx: &[usize],
    source_only_idx: &[usize],
    target_only_idx: &[usize],
) -> Vec<Option<String>> {
    let mut fields: Vec<Option<String>> =
        Vec::with_capacity(source_key_idx.len() + source_only_idx.len() + target_only_idx.len());
    fields.extend(source_key_idx.iter().map(|&i| field_of(&source.record, i)));
    fields.extend(source_only_idx.iter().map(|&i| field_of(&source.record, i)));
    fields.extend(target_only_idx.iter().map(|&i| field_of(&target.record, i)));
    fields
}

fn write_candidate<W: Write>(
    writer: &mut Writer<W>,
    transform: &mut Option<RecordTransform>,
    fields: Vec<Option<String>>,
) -> Result<()> {
    let fields = match transform {
        Some(transform) => match transform(JoinRecord { fields }) {
            Some(record) => record.fields,
            None => return Ok(()),
        },
        None => fields,
    };
    writer.write_record(fields.iter().map(|f| f.as_deref().unwrap_or("")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join_to_string(source: &str, target: &str, options: JoinOptions) -> String {
        let mut out = Vec::new();
        join_readers(source.as_bytes(), target.as_bytes(), &mut out, options)
            .expect("join should succeed");
        String::from_utf8(out).expect("join output is UTF-8")
    }

    #[test]
    fn canonical_fixture_produces_the_expected_sequence() {
        let source = "A,B,U\n\
                      a1,b1,u\n\
                      a1,b1,v\n\
                      a1,b2,u\n\
                      a2,b3,u\n\
                      a2,b4,u\n\
                      a4,b7,u\n";
        let target = "A,B,X\n\
                      a1,b1,x\n\
                      a1,b2,x\n\
                      a1,b2,y\n\
                      a2,b3,x\n\
                      a2,b5,x\n\
                      a3,,x\n";
        let output = join_to_string(source, target, JoinOptions::default());
        let expected = "A,B,U,X\n\
                        a1,b1,u,x\n\
                        a1,b1,v,x\n\
                        a1,b2,u,x\n\
                        a1,b2,u,y\n\
                        a2,b3,u,x\n\
                        a2,b4,u,\n\
                        a2,b5,,x\n\
                        a3,,,x\n\
                        a4,b7,u,\n";
        assert_eq!(output, expected);
    }

    #[test]
    fn joining_a_file_with_itself_reproduces_it() {
        let input = "A,B\n1,one\n2,two\n3,three\n";
        let output = join_to_string(input, input, JoinOptions::default());
        assert_eq!(output, input);
    }

    #[test]
    fn source_fields_projects_source_only_columns() {
        let source = "A,U,V\na1,u1,v1\n";
        let target = "A,X\na1,x1\n";
        let options = JoinOptions {
            source_fields: Some(vec!["V".to_owned()]),
            transform: None,
        };
        let output = join_to_string(source, target, options);
        assert_eq!(output, "A,V,X\na1,v1,x1\n");
    }

    #[test]
    fn transform_can_drop_records() {
        let source = "A,U\na1,u1\na2,u2\n";
        let target = "A,X\na1,x1\na2,x2\n";
        let options = JoinOptions {
            source_fields: None,
            transform: Some(Box::new(|record: JoinRecord| {
                (record.fields[0].as_deref() != Some("a2")).then_some(record)
            })),
        };
        let output = join_to_string(source, target, options);
        assert_eq!(output, "A,U,X\na1,u1,x1\n");
    }

    #[test]
    fn no_shared_columns_is_an_error() {
        let err = join_readers(
            "A\n1\n".as_bytes(),
            "B\n2\n".as_bytes(),
            Vec::new(),
            JoinOptions::default(),
        )
        .expect_err("disjoint headers should fail");
        assert!(matches!(err, Error::Join { .. }));
    }
}
