//! Record archiving functionality
//!
//! Archives are append-only files in the session's archive directory, one file per calendar day.
//! A [`DailyArchive`] writes records synchronously, an [`ArchiveWriter`] owns one on a background
//! thread so that producers never block on the filesystem.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use chrono::NaiveDate;
use csv::WriterBuilder;
use log::{debug, warn};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

// Internal imports
use crate::retry::RetryPolicy;
use crate::schedule::{spawn_named, PeriodicHandle};
use crate::time::Clock;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Format of the date suffix of an archive file name.
const DATE_FORMAT: &str = "%Y%m%d";

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Format of the records in an archive file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Comma separated values, with a header row at the top of each file.
    Csv,

    /// One JSON object per line.
    JsonLines,
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Cannot open archive file {0:?}: {1}")]
    Open(PathBuf, std::io::Error),

    #[error("Cannot write to the archive: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot serialise the record as CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Cannot serialise the record as JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An append-only archive which rotates to a new file when the date changes.
///
/// Files are named `{stem}_{YYYYMMDD}.{csv|jsonl}`.
pub struct DailyArchive {
    dir: PathBuf,
    stem: String,
    format: ArchiveFormat,
    current: Option<OpenDay>,
}

struct OpenDay {
    date: NaiveDate,
    file: File,
}

/// Background writer for a [`DailyArchive`].
///
/// `push` is fire-and-forget. Failed appends are retried with the writer's [`RetryPolicy`] and
/// then dropped with a warning.
pub struct ArchiveWriter<T> {
    name: String,
    sender: Mutex<Option<Sender<(NaiveDate, T)>>>,
    handle: Mutex<Option<PeriodicHandle>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl DailyArchive {
    /// Create a new archive in `dir`. No file is created until the first append.
    pub fn new<P: AsRef<Path>>(dir: P, stem: &str, format: ArchiveFormat) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            stem: stem.to_string(),
            format,
            current: None,
        }
    }

    /// Path of the file holding the records of the given date.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        let ext = match self.format {
            ArchiveFormat::Csv => "csv",
            ArchiveFormat::JsonLines => "jsonl",
        };

        self.dir
            .join(format!("{}_{}.{}", self.stem, date.format(DATE_FORMAT), ext))
    }

    /// Append a record to the file for `date`, opening or rotating the file as needed.
    pub fn append<T: Serialize>(&mut self, date: NaiveDate, record: &T) -> Result<(), ArchiveError> {
        let format = self.format;
        let result = self.file_for(date).and_then(|file| match format {
            ArchiveFormat::Csv => {
                // Only write the header into an empty file so reopening a day's file after a
                // restart does not repeat it
                let empty = file.metadata()?.len() == 0;
                let mut writer = WriterBuilder::new().has_headers(empty).from_writer(file);
                writer.serialize(record)?;
                writer.flush()?;
                Ok(())
            }
            ArchiveFormat::JsonLines => {
                let mut line = serde_json::to_vec(record)?;
                line.push(b'\n');
                file.write_all(&line)?;
                file.flush()?;
                Ok(())
            }
        });

        // Reopen on the next append in case the handle went bad
        if result.is_err() {
            self.current = None;
        }

        result
    }

    fn file_for(&mut self, date: NaiveDate) -> Result<&mut File, ArchiveError> {
        let day = match self.current.take() {
            Some(day) if day.date == date => day,
            _ => {
                let path = self.path_for(date);
                fs::create_dir_all(&self.dir).map_err(|e| ArchiveError::Open(path.clone(), e))?;
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(|e| ArchiveError::Open(path.clone(), e))?;

                debug!("Archive {} now writing to {:?}", self.stem, path);
                OpenDay { date, file }
            }
        };

        Ok(&mut self.current.insert(day).file)
    }
}

impl<T> ArchiveWriter<T>
where
    T: Serialize + Send + 'static,
{
    /// Start the background thread owning `archive`.
    pub fn spawn(
        mut archive: DailyArchive,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> std::io::Result<Self> {
        let name = format!("arch_{}", archive.stem);
        let (sender, receiver) = channel::<(NaiveDate, T)>();

        let handle = spawn_named(&name, move || {
            // Ends once every sender is dropped and the queue is drained
            for (date, record) in receiver {
                if let Err(e) = retry.run(clock.as_ref(), |_| archive.append(date, &record)) {
                    warn!("Dropping {} record: {}", archive.stem, e);
                }
            }
        })?;

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue a record to be appended to the file for `date`.
    pub fn push(&self, date: NaiveDate, record: T) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);

        match sender.as_ref() {
            Some(s) => {
                if s.send((date, record)).is_err() {
                    warn!("Archive writer {} has stopped, record dropped", self.name);
                }
            }
            None => debug!("Archive writer {} is closed, record dropped", self.name),
        }
    }

    /// Stop accepting records and wait at most `timeout` for queued records to be written.
    ///
    /// Returns `true` if the writer finished. Calling this more than once is harmless.
    pub fn close(&self, timeout: Duration) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            Some(h) => h.join_timeout(timeout),
            None => true,
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::time::ManualClock;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Row {
        a: u32,
        b: &'static str,
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_csv_header_written_once() {
        let tmp = tempfile::tempdir().unwrap();
        let mut arch = DailyArchive::new(tmp.path(), "telemetry", ArchiveFormat::Csv);

        arch.append(day(1), &Row { a: 1, b: "x" }).unwrap();
        arch.append(day(1), &Row { a: 2, b: "y" }).unwrap();

        // A fresh archive on the same file must not repeat the header
        let mut arch = DailyArchive::new(tmp.path(), "telemetry", ArchiveFormat::Csv);
        arch.append(day(1), &Row { a: 3, b: "z" }).unwrap();

        let contents = fs::read_to_string(tmp.path().join("telemetry_20240301.csv")).unwrap();
        assert_eq!(contents, "a,b\n1,x\n2,y\n3,z\n");
    }

    #[test]
    fn test_rotates_by_day() {
        let tmp = tempfile::tempdir().unwrap();
        let mut arch = DailyArchive::new(tmp.path(), "audit", ArchiveFormat::JsonLines);

        arch.append(day(1), &Row { a: 1, b: "x" }).unwrap();
        arch.append(day(2), &Row { a: 2, b: "y" }).unwrap();

        let first = fs::read_to_string(arch.path_for(day(1))).unwrap();
        let second = fs::read_to_string(arch.path_for(day(2))).unwrap();

        assert_eq!(first, "{\"a\":1,\"b\":\"x\"}\n");
        assert_eq!(second, "{\"a\":2,\"b\":\"y\"}\n");
        assert!(arch.path_for(day(2)).ends_with("audit_20240302.jsonl"));
    }

    #[test]
    fn test_writer_flushes_on_close() {
        let tmp = tempfile::tempdir().unwrap();
        let arch = DailyArchive::new(tmp.path(), "telemetry", ArchiveFormat::Csv);
        let writer =
            ArchiveWriter::spawn(arch, RetryPolicy::default(), Arc::new(ManualClock::default()))
                .unwrap();

        for i in 0..10 {
            writer.push(day(5), Row { a: i, b: "r" });
        }

        assert!(writer.close(Duration::from_secs(5)));
        assert!(writer.close(Duration::from_millis(1)));

        // Dropped silently once closed
        writer.push(day(5), Row { a: 99, b: "late" });

        let contents = fs::read_to_string(tmp.path().join("telemetry_20240305.csv")).unwrap();
        assert_eq!(contents.lines().count(), 11);
        assert!(!contents.contains("late"));
    }

    #[test]
    fn test_writer_gives_up_on_unwritable_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not_a_dir");
        fs::write(&blocker, "").unwrap();

        let clock = Arc::new(ManualClock::default());
        let arch = DailyArchive::new(&blocker, "telemetry", ArchiveFormat::Csv);
        let writer = ArchiveWriter::spawn(arch, RetryPolicy::new(3, 10), clock.clone()).unwrap();

        writer.push(day(1), Row { a: 1, b: "x" });
        assert!(writer.close(Duration::from_secs(5)));

        assert_eq!(clock.sleeps(), vec![Duration::from_millis(10); 2]);
    }
}
