//! Destinations for drained results.

mod json;
pub mod schema;
mod sqlite;

pub use json::JsonSink;
pub use sqlite::SqliteSink;

use crate::error::Result;
use crate::results::Results;
use std::path::Path;

pub trait ResultsSink {
    fn write(&mut self, results: &Results) -> Result<()>;
}

/// On-disk format, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFormat {
    Json,
    Sqlite,
}

impl SinkFormat {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("db") || ext.eq_ignore_ascii_case("sqlite") => {
                SinkFormat::Sqlite
            }
            _ => SinkFormat::Json,
        }
    }
}

/// Write `results` to `path` in the format its extension names
pub fn write_path(path: &Path, results: &Results) -> Result<()> {
    match SinkFormat::for_path(path) {
        SinkFormat::Json => JsonSink::create(path)?.write(results),
        SinkFormat::Sqlite => SqliteSink::create(path)?.write(results),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_by_extension() {
        assert_eq!(SinkFormat::for_path(Path::new("out.db")), SinkFormat::Sqlite);
        assert_eq!(SinkFormat::for_path(Path::new("out.SQLITE")), SinkFormat::Sqlite);
        assert_eq!(SinkFormat::for_path(Path::new("out.json")), SinkFormat::Json);
        assert_eq!(SinkFormat::for_path(Path::new("profile")), SinkFormat::Json);
    }
}
