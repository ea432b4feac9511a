pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod join;
pub mod logger;
pub mod mapping;
mod migrate;
pub mod model;
pub mod reader;
pub mod shims;
pub mod sinks;
pub mod value;

pub use config::MigrationSpec;
pub use engine::{MigratedTarget, MigrationBuilder, MigrationEngine, MigrationStats};
pub use error::{Error, Result};
pub use filter::{Filter, FilterSpec};
pub use model::{Metamodel, MetamodelBuilder, ObjRef, ObjectArena, ScalarKind};
pub use reader::{CsvSource, Record, ReaderOptions};
pub use shims::{ShimContext, ShimRegistry};
pub use value::Value;
