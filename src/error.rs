use std::borrow::Cow;
use std::fmt;
use std::io;

/// Result type used across the migration engine.
pub type Result<T> = std::result::Result<T, Error>;

/// High-level error type surfaced by the engine and the joiner.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O failure while reading a source or writing a sink.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Failure reported by the underlying CSV reader or writer.
    #[error(transparent)]
    Csv(#[from] csv::Error),

    /// The engine was constructed from an invalid configuration.
    #[error("invalid configuration: {details}")]
    Config { details: Cow<'static, str> },

    /// A row could not be migrated.
    #[error("migration failed at {section}: {details}")]
    Migration {
        section: Section,
        details: Cow<'static, str>,
    },

    /// The joiner detected inconsistent inputs.
    #[error("join failed: {details}")]
    Join { details: Cow<'static, str> },
}

impl Error {
    pub(crate) fn config(details: impl Into<Cow<'static, str>>) -> Self {
        Self::Config {
            details: details.into(),
        }
    }

    pub(crate) fn migration(section: Section, details: impl Into<Cow<'static, str>>) -> Self {
        Self::Migration {
            section,
            details: details.into(),
        }
    }

    pub(crate) fn record(number: u64, details: impl Into<Cow<'static, str>>) -> Self {
        Self::migration(Section::Record { number }, details)
    }

    pub(crate) fn join(details: impl Into<Cow<'static, str>>) -> Self {
        Self::Join {
            details: details.into(),
        }
    }

    /// Whether the error is recoverable by rejecting the offending row.
    #[must_use]
    pub const fn is_row_error(&self) -> bool {
        matches!(
            self,
            Self::Migration {
                section: Section::Record { .. },
                ..
            }
        )
    }
}

/// Logical location of a failure, used for diagnostic reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Section {
    /// The header row of a CSV input.
    Header,
    /// A specific input record (1-based).
    Record { number: u64 },
    /// A textual attribute path from the mapping configuration.
    PathExpr { expr: String },
    /// A domain class referenced by the configuration.
    Class { name: String },
}

impl Section {
    #[must_use]
    pub fn path(expr: impl Into<String>) -> Self {
        Self::PathExpr { expr: expr.into() }
    }

    #[must_use]
    pub fn class(name: impl Into<String>) -> Self {
        Self::Class { name: name.into() }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header => write!(f, "header row"),
            Self::Record { number } => write!(f, "record {number}"),
            Self::PathExpr { expr } => write!(f, "path '{expr}'"),
            Self::Class { name } => write!(f, "class {name}"),
        }
    }
}
