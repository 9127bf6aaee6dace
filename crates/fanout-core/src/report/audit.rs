//! Per-job audit log: `;`-delimited quoted CSV, one row per finished job.

use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

const HEADER: [&str; 5] = ["Date", "Action", "Runtime", "Status", "Details"];

/// One row of the audit log.
#[derive(Debug, Clone)]
pub struct AuditRow<'a> {
    pub date: DateTime<Local>,
    pub action: &'a str,
    pub runtime: Option<Duration>,
    pub status: &'a str,
    pub details: &'a str,
}

pub struct AuditLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl AuditLog {
    /// Open the log. Without `append` the file is truncated; in either case a
    /// header row is written when the file starts out empty.
    pub fn open(path: &Path, append: bool) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = if append {
            OpenOptions::new().create(true).append(true).open(path)?
        } else {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)?
        };
        let fresh = file.metadata()?.len() == 0;
        let mut log = Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        };
        if fresh {
            log.write_fields(&HEADER)?;
        }
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, row: &AuditRow<'_>) -> io::Result<()> {
        let date = row.date.format("%Y-%m-%d %H:%M:%S").to_string();
        let runtime = row
            .runtime
            .map(|d| format!("{:.2} minutes", d.as_secs_f64() / 60.0))
            .unwrap_or_default();
        self.write_fields(&[&date, row.action, &runtime, row.status, row.details])
    }

    fn write_fields(&mut self, fields: &[&str]) -> io::Result<()> {
        let line = fields
            .iter()
            .map(|f| quote(f))
            .collect::<Vec<_>>()
            .join(";");
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()
    }
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}
