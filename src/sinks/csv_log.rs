//! CSV telemetry log

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::RecordSink;
use crate::error::SinkError;
use crate::types::Record;

/// Writes a header row, then one row per record with the log precision
/// (see [`Field::precision`](crate::types::Field::precision)).
///
/// Every row is flushed as soon as it is written so a crash loses at most the
/// record being written.
pub struct CsvLogSink<W: Write + Send + 'static> {
    writer: W,
    path: Option<PathBuf>,
    rows: u64,
    closed: bool,
}

impl<W: Write + Send + 'static> CsvLogSink<W> {
    /// Wrap a writer and emit the header row.
    pub fn new(mut writer: W) -> Result<Self, SinkError> {
        writeln!(writer, "{}", Record::log_header())?;
        writer.flush()?;
        Ok(Self { writer, path: None, rows: 0, closed: false })
    }

    /// Data rows written so far (header excluded).
    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    /// File path, when the sink was created with [`CsvLogSink::create_in`].
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Flush and stop accepting records.
    pub fn close(&mut self) -> Result<(), SinkError> {
        if !self.closed {
            self.closed = true;
            self.writer.flush()?;
            if let Some(path) = &self.path {
                info!("Telemetry log saved: {} ({} rows)", path.display(), self.rows);
            }
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl CsvLogSink<BufWriter<File>> {
    /// Create `telemetry_log_<YYYYmmdd_HHMMSS>.csv` in `directory`.
    ///
    /// An existing file is never overwritten; a numeric suffix is added instead.
    pub fn create_in<P: AsRef<Path>>(directory: P) -> Result<Self, SinkError> {
        let directory = directory.as_ref();
        std::fs::create_dir_all(directory)?;

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let (file, path) = create_unique(directory, &stamp)?;

        let mut sink = Self::new(BufWriter::new(file))?;
        info!("Telemetry log created: {}", path.display());
        sink.path = Some(path);
        Ok(sink)
    }
}

fn create_unique(directory: &Path, stamp: &str) -> io::Result<(File, PathBuf)> {
    let mut suffix = 0u32;
    loop {
        let name = if suffix == 0 {
            format!("telemetry_log_{stamp}.csv")
        } else {
            format!("telemetry_log_{stamp}_{suffix}.csv")
        };
        let path = directory.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && suffix < 100 => {
                debug!("{} exists, trying next suffix", path.display());
                suffix += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[async_trait::async_trait]
impl<W: Write + Send + 'static> RecordSink for CsvLogSink<W> {
    fn name(&self) -> &str {
        "csv-log"
    }

    async fn on_record(&mut self, record: Arc<Record>) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed { sink: self.name().to_string() });
        }
        writeln!(self.writer, "{}", record.log_row())?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        CsvLogSink::close(self)
    }
}
