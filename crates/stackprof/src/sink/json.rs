use super::ResultsSink;
use crate::error::Result;
use crate::results::Results;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writes results as one JSON document
pub struct JsonSink<W: Write> {
    writer: W,
    pretty: bool,
}

impl JsonSink<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(JsonSink::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> JsonSink<W> {
    pub fn new(writer: W) -> Self {
        JsonSink {
            writer,
            pretty: false,
        }
    }

    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResultsSink for JsonSink<W> {
    fn write(&mut self, results: &Results) -> Result<()> {
        if self.pretty {
            serde_json::to_writer_pretty(&mut self.writer, results)?;
        } else {
            serde_json::to_writer(&mut self.writer, results)?;
        }
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}
