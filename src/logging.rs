//! Process logging.
//!
//! Records go through the `log` facade to `env_logger`, which writes every line to
//! stderr and to a log file under `Log/`. The file is named after the process type,
//! the process name and the current period, and is reopened when the period ends.

use crate::configuration::types::LogCycle;
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime, Timelike};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Type string of the server's own log files.
pub const SERVER_TYPE_STRING: &str = "ASCII_SERVER";

/// Delay after the period boundary before the file is switched.
pub const ROTATION_GUARD: Duration = Duration::from_secs(20);

/// `<TypeString>_<ProcName>_YYYYMMDD[HH].log`
pub fn log_file_name(type_string: &str, name: &str, cycle: LogCycle, at: NaiveDateTime) -> String {
    let stamp = match cycle {
        LogCycle::Hour => at.format("%Y%m%d%H"),
        LogCycle::Day => at.format("%Y%m%d"),
    };
    format!("{}_{}_{}.log", type_string, name, stamp)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRotation {
    pub cycle: LogCycle,
}

impl LogRotation {
    pub fn new(cycle: LogCycle) -> Self {
        Self { cycle }
    }

    /// Next period boundary after `now`, plus the guard.
    pub fn next_rotation(&self, now: NaiveDateTime) -> NaiveDateTime {
        let boundary = match self.cycle {
            LogCycle::Hour => {
                let hour = now.date().and_time(NaiveTime::MIN) + ChronoDuration::hours(now.hour() as i64);
                hour + ChronoDuration::hours(1)
            }
            LogCycle::Day => now.date().and_time(NaiveTime::MIN) + ChronoDuration::days(1),
        };
        boundary + ChronoDuration::seconds(ROTATION_GUARD.as_secs() as i64)
    }

    /// Time left until the next rotation, measured on the local clock.
    pub fn delay_from(&self, now: NaiveDateTime) -> Duration {
        (self.next_rotation(now) - now)
            .to_std()
            .unwrap_or(ROTATION_GUARD)
    }

    pub fn delay_from_now(&self) -> Duration {
        self.delay_from(Local::now().naive_local())
    }
}

/// Append-only log file that follows the current period.
#[derive(Debug)]
pub struct RotatingLogFile {
    dir: PathBuf,
    type_string: String,
    name: String,
    cycle: LogCycle,
    path: PathBuf,
    file: File,
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl RotatingLogFile {
    pub fn open(dir: &Path, type_string: &str, name: &str, cycle: LogCycle) -> io::Result<Self> {
        Self::open_at(dir, type_string, name, cycle, Local::now().naive_local())
    }

    pub fn open_at(
        dir: &Path,
        type_string: &str,
        name: &str,
        cycle: LogCycle,
        at: NaiveDateTime,
    ) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(log_file_name(type_string, name, cycle, at));
        let file = open_append(&path)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            type_string: type_string.to_string(),
            name: name.to_string(),
            cycle,
            path,
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Switches to the file of the period containing `at`. Returns true when the
    /// file changed.
    pub fn rotate(&mut self, at: NaiveDateTime) -> io::Result<bool> {
        let path = self
            .dir
            .join(log_file_name(&self.type_string, &self.name, self.cycle, at));
        if path == self.path {
            return Ok(false);
        }
        self.file.flush()?;
        self.file = open_append(&path)?;
        self.path = path;
        Ok(true)
    }
}

impl Write for RotatingLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Shared handle the logger writes through and the rotation timer rotates.
pub type SharedLogFile = Arc<Mutex<RotatingLogFile>>;

fn lock(file: &SharedLogFile) -> MutexGuard<'_, RotatingLogFile> {
    file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Rotates the shared file to the current period.
pub fn rotate_now(file: &SharedLogFile) -> io::Result<bool> {
    lock(file).rotate(Local::now().naive_local())
}

/// Writes each record to stderr and, when set, to the log file.
struct TeeWriter {
    file: Option<SharedLogFile>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = io::stderr().write_all(buf);
        if let Some(file) = &self.file {
            lock(file).write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stderr().flush();
        if let Some(file) = &self.file {
            lock(file).flush()?;
        }
        Ok(())
    }
}

/// Installs the process logger; later calls are ignored.
pub fn init_logging(file: Option<SharedLogFile>) {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .target(env_logger::Target::Pipe(Box::new(TeeWriter { file })))
        .try_init();
}
