use rusqlite::Connection;

pub const SCHEMA_VERSION: i32 = 1;

/// Create all tables (drops existing tables first to ensure clean state)
pub fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS tag_strings;
        DROP TABLE IF EXISTS sample_tags;
        DROP TABLE IF EXISTS tag_runs;
        DROP TABLE IF EXISTS raw_samples;
        DROP TABLE IF EXISTS raw_stacks;
        DROP TABLE IF EXISTS lines;
        DROP TABLE IF EXISTS edges;
        DROP TABLE IF EXISTS frames;
        DROP TABLE IF EXISTS meta;

        -- Profile header, session metadata and user metadata
        CREATE TABLE meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE frames (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            file TEXT NOT NULL,
            line INTEGER,
            total_samples INTEGER NOT NULL,
            samples INTEGER NOT NULL
        );

        -- Caller -> callee weights
        CREATE TABLE edges (
            caller_id INTEGER NOT NULL,
            callee_id INTEGER NOT NULL,
            count INTEGER NOT NULL,
            PRIMARY KEY (caller_id, callee_id),
            FOREIGN KEY (caller_id) REFERENCES frames(id)
        );

        CREATE TABLE lines (
            frame_id INTEGER NOT NULL,
            line INTEGER NOT NULL,
            total INTEGER NOT NULL,
            leaf INTEGER NOT NULL,
            PRIMARY KEY (frame_id, line),
            FOREIGN KEY (frame_id) REFERENCES frames(id)
        );

        -- One row per raw run; frames outermost-first, comma separated
        CREATE TABLE raw_stacks (
            seq INTEGER PRIMARY KEY,
            frames TEXT NOT NULL,
            repeat INTEGER NOT NULL
        );

        -- One row per sample
        CREATE TABLE raw_samples (
            seq INTEGER PRIMARY KEY,
            timestamp_us INTEGER NOT NULL,
            delta_us INTEGER NOT NULL
        );

        -- One row per tag run; an empty tag set has no sample_tags rows
        CREATE TABLE tag_runs (
            seq INTEGER PRIMARY KEY,
            repeat INTEGER NOT NULL
        );

        CREATE TABLE sample_tags (
            seq INTEGER NOT NULL,
            key_id INTEGER NOT NULL,
            value_id INTEGER NOT NULL,
            PRIMARY KEY (seq, key_id),
            FOREIGN KEY (seq) REFERENCES tag_runs(seq)
        );

        CREATE TABLE tag_strings (
            id INTEGER PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX idx_edges_callee ON edges(callee_id);
        "#,
    )
}

/// Set a metadata key
pub fn set_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
        [key, value],
    )?;
    Ok(())
}

/// Get a metadata key
pub fn get_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM meta WHERE key = ?", [key], |row| {
        row.get(0)
    })
    .optional()
}

trait OptionalExt<T> {
    fn optional(self) -> rusqlite::Result<Option<T>>;
}

impl<T> OptionalExt<T> for rusqlite::Result<T> {
    fn optional(self) -> rusqlite::Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
