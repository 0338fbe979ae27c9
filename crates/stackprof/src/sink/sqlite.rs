use super::ResultsSink;
use super::schema::{self, SCHEMA_VERSION};
use crate::error::Result;
use crate::results::Results;
use rusqlite::Connection;
use std::path::Path;

/// Writes results into a SQLite database, one profile per file
pub struct SqliteSink {
    conn: Connection,
}

impl SqliteSink {
    pub fn create(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        Ok(SqliteSink { conn })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(SqliteSink {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn write_meta(&self, results: &Results) -> Result<()> {
        let conn = &self.conn;
        schema::set_meta(conn, "schema_version", &SCHEMA_VERSION.to_string())?;
        schema::set_meta(conn, "version", &results.version.to_string())?;
        schema::set_meta(conn, "mode", results.mode.as_str())?;
        if let Some(interval) = results.interval {
            schema::set_meta(conn, "interval", &interval.to_string())?;
        }
        schema::set_meta(conn, "samples", &results.samples.to_string())?;
        schema::set_meta(conn, "gc_samples", &results.gc_samples.to_string())?;
        schema::set_meta(conn, "missed_samples", &results.missed_samples.to_string())?;
        schema::set_meta(conn, "written_at", &chrono::Utc::now().to_rfc3339())?;
        for (key, value) in &results.metadata {
            schema::set_meta(conn, &format!("metadata.{key}"), value)?;
        }
        Ok(())
    }
}

impl ResultsSink for SqliteSink {
    fn write(&mut self, results: &Results) -> Result<()> {
        schema::create_tables(&self.conn)?;
        self.write_meta(results)?;

        let tx = self.conn.transaction()?;
        {
            let mut frame_stmt = tx.prepare_cached(
                "INSERT INTO frames (id, name, file, line, total_samples, samples) VALUES (?, ?, ?, ?, ?, ?)",
            )?;
            let mut edge_stmt = tx.prepare_cached(
                "INSERT INTO edges (caller_id, callee_id, count) VALUES (?, ?, ?)",
            )?;
            let mut line_stmt = tx.prepare_cached(
                "INSERT INTO lines (frame_id, line, total, leaf) VALUES (?, ?, ?, ?)",
            )?;

            for (id, frame) in &results.frames {
                let id = id.get() as i64;
                frame_stmt.execute(rusqlite::params![
                    id,
                    &frame.name,
                    &frame.file,
                    frame.line.map(i64::from),
                    frame.total_samples as i64,
                    frame.samples as i64
                ])?;
                for (callee, count) in frame.edges.iter().flatten() {
                    edge_stmt.execute(rusqlite::params![id, callee.get() as i64, *count as i64])?;
                }
                for (line, (total, leaf)) in frame.lines.iter().flatten() {
                    line_stmt.execute(rusqlite::params![
                        id,
                        *line as i64,
                        *total as i64,
                        *leaf as i64
                    ])?;
                }
            }
        }

        if let Some(stacks) = results.expand_raw_runs() {
            let mut stmt =
                tx.prepare_cached("INSERT INTO raw_stacks (seq, frames, repeat) VALUES (?, ?, ?)")?;
            for (seq, (frames, repeat)) in stacks.into_iter().enumerate() {
                let frames = frames
                    .iter()
                    .map(|f| f.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                stmt.execute(rusqlite::params![seq as i64, frames, repeat as i64])?;
            }
        }

        if let (Some(timestamps), Some(deltas)) =
            (&results.raw_sample_timestamps, &results.raw_timestamp_deltas)
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO raw_samples (seq, timestamp_us, delta_us) VALUES (?, ?, ?)",
            )?;
            for (seq, (ts, delta)) in timestamps.iter().zip(deltas).enumerate() {
                stmt.execute(rusqlite::params![seq as i64, *ts as i64, *delta as i64])?;
            }
        }

        if let Some(sets) = &results.sample_tags {
            let mut run_stmt =
                tx.prepare_cached("INSERT INTO tag_runs (seq, repeat) VALUES (?, ?)")?;
            let mut tag_stmt = tx.prepare_cached(
                "INSERT INTO sample_tags (seq, key_id, value_id) VALUES (?, ?, ?)",
            )?;
            for (seq, (set, repeat)) in sets.iter().enumerate() {
                run_stmt.execute(rusqlite::params![seq as i64, *repeat as i64])?;
                for (key, value) in set {
                    tag_stmt.execute(rusqlite::params![seq as i64, *key as i64, *value as i64])?;
                }
            }
        }

        if let Some(strings) = &results.tag_strings {
            let mut stmt = tx.prepare_cached("INSERT INTO tag_strings (id, value) VALUES (?, ?)")?;
            for (id, value) in strings.iter().enumerate() {
                stmt.execute(rusqlite::params![id as i64, value])?;
            }
        }

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::frame::FrameId;
    use crate::results::{FrameReport, RESULTS_VERSION};
    use std::collections::BTreeMap;

    fn results() -> Results {
        let a = FrameId::new(0x10);
        let b = FrameId::new(0x20);
        let frame = |name: &str, total, samples| FrameReport {
            name: name.into(),
            file: "lib.rs".into(),
            line: Some(1),
            total_samples: total,
            samples,
            edges: None,
            lines: None,
        };
        let mut outer = frame("outer", 2, 0);
        outer.edges = Some(BTreeMap::from([(a, 2)]));
        let mut inner = frame("inner", 2, 2);
        inner.lines = Some(BTreeMap::from([(7, (2, 2))]));

        Results {
            version: RESULTS_VERSION,
            mode: Mode::Wall,
            interval: Some(1000),
            samples: 2,
            gc_samples: 0,
            missed_samples: 1,
            metadata: BTreeMap::from([("host".into(), "ci".into())]),
            frames: BTreeMap::from([(a, inner), (b, outer)]),
            raw: Some(vec![2, 0x20, 0x10, 2]),
            raw_sample_timestamps: Some(vec![5, 6]),
            raw_timestamp_deltas: Some(vec![0, 1]),
            sample_tags: Some(vec![(BTreeMap::new(), 1), (BTreeMap::from([(0, 1)]), 1)]),
            tag_strings: Some(vec!["thread_id".into(), "12".into()]),
        }
    }

    #[test]
    fn test_write_all_tables() {
        let mut sink = SqliteSink::in_memory().unwrap();
        sink.write(&results()).unwrap();
        let conn = sink.connection();

        assert_eq!(schema::get_meta(conn, "mode").unwrap().as_deref(), Some("wall"));
        assert_eq!(schema::get_meta(conn, "metadata.host").unwrap().as_deref(), Some("ci"));
        assert_eq!(schema::get_meta(conn, "missed_samples").unwrap().as_deref(), Some("1"));

        let frames: i64 = conn.query_row("SELECT COUNT(*) FROM frames", [], |r| r.get(0)).unwrap();
        assert_eq!(frames, 2);
        let edge: (i64, i64, i64) = conn
            .query_row("SELECT caller_id, callee_id, count FROM edges", [], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })
            .unwrap();
        assert_eq!(edge, (0x20, 0x10, 2));
        let raw: (String, i64) = conn
            .query_row("SELECT frames, repeat FROM raw_stacks", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!(raw, ("32,16".to_string(), 2));
        let runs: i64 = conn.query_row("SELECT COUNT(*) FROM tag_runs", [], |r| r.get(0)).unwrap();
        assert_eq!(runs, 2);
        let tags: i64 = conn.query_row("SELECT COUNT(*) FROM sample_tags", [], |r| r.get(0)).unwrap();
        assert_eq!(tags, 1);
    }

    #[test]
    fn test_rewrite_replaces_previous_profile() {
        let mut sink = SqliteSink::in_memory().unwrap();
        sink.write(&results()).unwrap();
        sink.write(&results()).unwrap();
        let frames: i64 = sink
            .connection()
            .query_row("SELECT COUNT(*) FROM frames", [], |r| r.get(0))
            .unwrap();
        assert_eq!(frames, 2);
    }
}
