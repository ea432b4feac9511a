use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::MigrationSpec;
use crate::error::{Error, Result};
use crate::filter::FilterSpec;
use crate::logger;
use crate::mapping::{CompiledMapping, MappingInputs};
use crate::migrate::{RowMigrator, RowOutcome};
use crate::model::{Metamodel, ObjRef, ObjectArena};
use crate::reader::{CsvSource, ReaderOptions, Record};
use crate::shims::ShimRegistry;
use crate::sinks::{ExtractSink, RejectWriter};
use crate::value::Value;

/// Counters reported after (or during) a migration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationStats {
    /// Rows the migrator attempted within the record window.
    pub total: u64,
    /// Rows that produced a target instance.
    pub migrated: u64,
    /// Rows written to the rejects sink.
    pub rejected: u64,
}

/// One successfully migrated row: the target instance together with the
/// object graph it lives in and the source record it came from.
///
/// Dropping the value releases the whole per-row graph, which keeps the
/// engine's footprint independent of the row count.
pub struct MigratedTarget {
    pub arena: ObjectArena,
    pub target: ObjRef,
    pub record: Record,
}

/// Configures and constructs a [`MigrationEngine`].
pub struct MigrationBuilder {
    model: Arc<Metamodel>,
    target: String,
    fields: Vec<(String, String)>,
    defaults: Vec<(String, String)>,
    filters: Vec<(String, FilterSpec)>,
    shims: ShimRegistry,
    reader_options: ReaderOptions,
    rejects_path: Option<PathBuf>,
    extract_path: Option<PathBuf>,
    extract_headers: Option<Vec<String>>,
    from: Option<u64>,
    to: Option<u64>,
    unique: bool,
    create: bool,
    progress: bool,
}

impl MigrationBuilder {
    #[must_use]
    pub fn new(model: Arc<Metamodel>, target: impl Into<String>) -> Self {
        Self {
            model,
            target: target.into(),
            fields: Vec::new(),
            defaults: Vec::new(),
            filters: Vec::new(),
            shims: ShimRegistry::new(),
            reader_options: ReaderOptions::new(),
            rejects_path: None,
            extract_path: None,
            extract_headers: None,
            from: None,
            to: None,
            unique: false,
            create: false,
            progress: false,
        }
    }

    /// Maps a source header to one or more comma-separated attribute
    /// paths.
    #[must_use]
    pub fn field(mut self, header: impl Into<String>, paths: impl Into<String>) -> Self {
        self.fields.push((header.into(), paths.into()));
        self
    }

    /// Sets a default literal for an attribute path.
    #[must_use]
    pub fn default_value(mut self, path: impl Into<String>, literal: impl Into<String>) -> Self {
        self.defaults.push((path.into(), literal.into()));
        self
    }

    /// Attaches a filter spec to an attribute path.
    #[must_use]
    pub fn filter(mut self, path: impl Into<String>, spec: FilterSpec) -> Self {
        self.filters.push((path.into(), spec));
        self
    }

    /// Installs the shim registry.
    #[must_use]
    pub fn shims(mut self, shims: ShimRegistry) -> Self {
        self.shims = shims;
        self
    }

    /// Installs a user converter consulted before the built-in coercion.
    #[must_use]
    pub fn converter<F>(mut self, converter: F) -> Self
    where
        F: Fn(&str) -> Option<Value> + Send + Sync + 'static,
    {
        self.reader_options = self.reader_options.with_converter(converter);
        self
    }

    /// Routes failed rows to a rejects CSV instead of failing the run.
    #[must_use]
    pub fn rejects_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.rejects_path = Some(path.into());
        self
    }

    /// Appends one extract record per successful row to this file.
    #[must_use]
    pub fn extract_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.extract_path = Some(path.into());
        self
    }

    /// Writes the extract as a CSV with these headers.
    #[must_use]
    pub fn extract_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extract_headers = Some(headers.into_iter().map(Into::into).collect());
        self
    }

    /// First record to migrate, 1-based inclusive.
    #[must_use]
    pub const fn from(mut self, record: u64) -> Self {
        self.from = Some(record);
        self
    }

    /// Record number to stop at, 1-based exclusive.
    #[must_use]
    pub const fn to(mut self, record: u64) -> Self {
        self.to = Some(record);
        self
    }

    /// Enables unique-mode secondary keys (Phase D).
    #[must_use]
    pub const fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Advisory create flag forwarded to the persistence layer.
    #[must_use]
    pub const fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Logs progress after each emitted target.
    #[must_use]
    pub const fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Applies a declarative spec on top of the current configuration.
    #[must_use]
    pub fn apply_spec(mut self, spec: &MigrationSpec) -> Self {
        self.fields.extend(spec.fields.iter().cloned());
        self.defaults.extend(spec.defaults.iter().cloned());
        for entry in &spec.filters {
            self.filters.push((entry.path.clone(), entry.to_filter_spec()));
        }
        if let Some(from) = spec.from {
            self.from = Some(from);
        }
        if let Some(to) = spec.to {
            self.to = Some(to);
        }
        self.unique |= spec.unique;
        self.create |= spec.create;
        if let Some(path) = &spec.rejects {
            self.rejects_path = Some(path.clone());
        }
        if let Some(extract) = &spec.extract {
            self.extract_path = Some(extract.path.clone());
            if let Some(headers) = &extract.headers {
                self.extract_headers = Some(headers.clone());
            }
        }
        self
    }

    /// Opens the input file and builds the engine.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a missing target class or field
    /// mapping, an unknown header, or an invalid filter; I/O errors for
    /// unreadable input or unwritable sinks.
    pub fn open(self, input: impl AsRef<Path>) -> Result<MigrationEngine<File>> {
        let options = self.reader_options.clone();
        let source = CsvSource::open_with_options(input, options)?;
        self.build(source)
    }

    /// Builds the engine over any CSV reader.
    ///
    /// # Errors
    ///
    /// Same conditions as [`MigrationBuilder::open`].
    pub fn from_reader<R: Read>(self, input: R) -> Result<MigrationEngine<R>> {
        let options = self.reader_options.clone();
        let source = CsvSource::from_reader_with_options(input, options)?;
        self.build(source)
    }

    fn build<R: Read>(self, source: CsvSource<R>) -> Result<MigrationEngine<R>> {
        if self.fields.is_empty() {
            return Err(Error::config("a field mapping is required"));
        }
        let target = self.model.require_class(&self.target)?;
        let mapping = CompiledMapping::compile(
            MappingInputs {
                fields: &self.fields,
                defaults: &self.defaults,
                filters: &self.filters,
            },
            target,
            source.layout(),
            &self.model,
        )?;

        let rejects = match &self.rejects_path {
            Some(path) => Some(RejectWriter::create(path, source.field_names())?),
            None => None,
        };
        let extract = match &self.extract_path {
            Some(path) => {
                if !self.shims.has_extractor(&self.model, target) {
                    return Err(Error::config(format!(
                        "extract file configured but class '{}' has no extract hook",
                        self.model.name(target)
                    )));
                }
                Some(ExtractSink::open(path, self.extract_headers.as_deref())?)
            }
            None => None,
        };

        Ok(MigrationEngine {
            model: self.model,
            source,
            mapping,
            shims: self.shims,
            rejects,
            extract,
            from: self.from.unwrap_or(1),
            to: self.to,
            unique: self.unique,
            create: self.create,
            progress: self.progress,
            stats: MigrationStats::default(),
            done: false,
        })
    }
}

/// Drives the row migrator over an input, routing targets to the caller
/// and side outputs to the reject and extract sinks.
pub struct MigrationEngine<R: Read> {
    model: Arc<Metamodel>,
    source: CsvSource<R>,
    mapping: CompiledMapping,
    shims: ShimRegistry,
    rejects: Option<RejectWriter>,
    extract: Option<ExtractSink>,
    from: u64,
    to: Option<u64>,
    unique: bool,
    create: bool,
    progress: bool,
    stats: MigrationStats,
    done: bool,
}

impl<R: Read> MigrationEngine<R> {
    /// Advances to the next migrated target.
    ///
    /// Rows inside the window that fail to migrate are appended to the
    /// rejects sink and skipped when one is configured; otherwise the
    /// first failure ends the run.
    ///
    /// # Errors
    ///
    /// Returns an error for I/O failures, or for a failed row when no
    /// rejects sink is configured.
    pub fn try_next(&mut self) -> Result<Option<MigratedTarget>> {
        if self.done {
            return Ok(None);
        }
        loop {
            let Some(record) = self.source.try_next()? else {
                self.done = true;
                return Ok(None);
            };
            if record.number() < self.from {
                continue;
            }
            if let Some(to) = self.to
                && record.number() >= to
            {
                self.done = true;
                return Ok(None);
            }
            self.stats.total += 1;

            let outcome = RowMigrator::new(&self.model, &self.mapping, &mut self.shims, self.unique)
                .migrate(&record);
            match outcome {
                Ok(RowOutcome {
                    arena,
                    target: Some(target),
                }) => {
                    self.stats.migrated += 1;
                    if let Some(sink) = self.extract.as_mut() {
                        self.shims.run_extractor(&self.model, &arena, target, sink)?;
                    }
                    if self.progress {
                        logger::log_progress(
                            record.number(),
                            self.model.name(arena.class_of(target)),
                        );
                    }
                    return Ok(Some(MigratedTarget {
                        arena,
                        target,
                        record,
                    }));
                }
                Ok(RowOutcome { target: None, .. }) => {
                    self.reject(&record, "no target instance produced")?;
                }
                Err(err) if err.is_row_error() => {
                    self.reject(&record, &err.to_string())?;
                }
                Err(err) => {
                    self.done = true;
                    return Err(err);
                }
            }
        }
    }

    fn reject(&mut self, record: &Record, reason: &str) -> Result<()> {
        logger::log_warn(&format!("record {} rejected: {reason}", record.number()));
        match self.rejects.as_mut() {
            Some(writer) => {
                writer.append(record.raw())?;
                self.stats.rejected += 1;
                Ok(())
            }
            None => {
                self.done = true;
                Err(Error::record(record.number(), reason.to_owned()))
            }
        }
    }

    /// Runs the whole migration, handing each target to the visitor.
    ///
    /// # Errors
    ///
    /// Propagates the first engine or visitor error.
    pub fn migrate_each<F>(mut self, mut visitor: F) -> Result<MigrationStats>
    where
        F: FnMut(&MigratedTarget) -> Result<()>,
    {
        while let Some(target) = self.try_next()? {
            visitor(&target)?;
        }
        Ok(self.stats)
    }

    #[must_use]
    pub const fn stats(&self) -> MigrationStats {
        self.stats
    }

    /// Advisory flag for the downstream persistence layer.
    #[must_use]
    pub const fn create_requested(&self) -> bool {
        self.create
    }
}

impl<R: Read> Iterator for MigrationEngine<R> {
    type Item = Result<MigratedTarget>;

    fn next(&mut self) -> Option<Self::Item> {
        self.try_next().transpose()
    }
}
