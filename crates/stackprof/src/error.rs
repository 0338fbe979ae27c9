use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown profiler mode '{0}'. Expected one of: wall, cpu, object, custom")]
    InvalidMode(String),

    #[error("Interval is a number of microseconds between 1 and 1 million, got {0}")]
    InvalidInterval(u64),

    #[error("Metadata should be a mapping of strings: {0}")]
    InvalidMetadata(String),

    #[error("Invalid tags: {0}")]
    InvalidTags(String),

    #[error("Another profiling session is already active in this process")]
    SessionActive,

    #[error("Mode '{0}' has no interval timer")]
    UnsupportedMode(String),

    #[error("Timer error: {0}")]
    Timer(String),

    #[error("Missing debug info in {path}. Recompile with `debug = true` in Cargo.toml")]
    MissingDebugInfo { path: String },

    #[error("Symbol resolution error: {0}")]
    SymbolResolution(String),

    #[error("No output destination configured")]
    NoOutput,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),
}

pub type Result<T> = std::result::Result<T, Error>;

// Process exit codes for the CLI
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const INVALID_ARGUMENTS: i32 = 2;
    pub const SESSION_ACTIVE: i32 = 3;
    pub const TIMER_ERROR: i32 = 4;
    pub const MISSING_DEBUG_INFO: i32 = 5;
    pub const DATABASE_ERROR: i32 = 6;
}

impl Error {
    /// Configuration errors leave the session unstarted and are the caller's fault.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::InvalidMode(_)
                | Error::InvalidInterval(_)
                | Error::InvalidMetadata(_)
                | Error::InvalidTags(_)
        )
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            e if e.is_configuration() => exit_code::INVALID_ARGUMENTS,
            Error::SessionActive => exit_code::SESSION_ACTIVE,
            Error::Timer(_) | Error::UnsupportedMode(_) => exit_code::TIMER_ERROR,
            Error::MissingDebugInfo { .. } => exit_code::MISSING_DEBUG_INFO,
            Error::Database(_) => exit_code::DATABASE_ERROR,
            _ => exit_code::GENERAL_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_message() {
        let err = Error::InvalidInterval(0);
        assert!(err.to_string().contains("between 1 and 1 million"));
        assert_eq!(err.exit_code(), exit_code::INVALID_ARGUMENTS);
    }

    #[test]
    fn test_session_conflict_is_not_configuration() {
        assert!(!Error::SessionActive.is_configuration());
        assert_eq!(Error::SessionActive.exit_code(), exit_code::SESSION_ACTIVE);
    }
}
