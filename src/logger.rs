use std::fs::File;
use std::io::{Result as IoResult, Write};
use std::path::Path;
use std::sync::{Mutex, OnceLock};

static LOG_SINK: OnceLock<Mutex<File>> = OnceLock::new();

/// Routes engine warnings and errors into a log file in addition to
/// stderr. The first configured file wins; later calls are ignored.
///
/// # Errors
///
/// Returns an error if the log file cannot be created.
pub fn set_log_file(path: &Path) -> IoResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let _ = LOG_SINK.set(Mutex::new(file));
    Ok(())
}

fn forward(level: &str, message: &str) {
    if let Some(sink) = LOG_SINK.get()
        && let Ok(mut file) = sink.lock()
    {
        let _ = writeln!(file, "{level}: {message}");
    }
}

pub fn log_warn(message: &str) {
    eprintln!("{message}");
    forward("warning", message);
}

pub fn log_error(message: &str) {
    eprintln!("{message}");
    forward("error", message);
}

/// Progress line emitted per target when progress reporting is enabled.
pub fn log_progress(record_number: u64, class_name: &str) {
    let message = format!("migrated record {record_number} -> {class_name}");
    eprintln!("{message}");
    forward("progress", &message);
}
