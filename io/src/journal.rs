//! Append-only per-run log.
//!
//! Every run writes one tab-separated file named after its start time. The
//! last field of each line is the cumulative boiler runtime in hours, which is
//! what a restart reads back from the newest file.

use chrono::{DateTime, Local, NaiveDateTime};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::warn;

pub const HEADER: &str = "datetime\ttemperature\thumidity\tactivity(h)";
pub const EXTENSION: &str = "log";
const ID_FORMAT: &str = "%Y%m%d-%H%M%S";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
// Bytes read from the end of a file when looking for its last line.
const TAIL_BYTES: u64 = 4096;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no prior log in {0}")]
    NoPriorLog(PathBuf),
    #[error("cannot parse log line {line:?}")]
    Parse { line: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: NaiveDateTime,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub runtime_hours: f64,
}

impl Record {
    pub fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{:.2}",
            self.timestamp.format(TIME_FORMAT),
            format_reading(self.temperature),
            format_reading(self.humidity),
            self.runtime_hours
        )
    }

    pub fn parse(line: &str) -> Result<Record, JournalError> {
        let bad = || JournalError::Parse { line: line.to_string() };
        let fields: Vec<&str> = line.trim_end().split('\t').collect();
        if fields.len() != 4 {
            return Err(bad());
        }
        let timestamp = NaiveDateTime::parse_from_str(fields[0], TIME_FORMAT).map_err(|_| bad())?;
        let temperature = parse_reading(fields[1]).ok_or_else(bad)?;
        let humidity = parse_reading(fields[2]).ok_or_else(bad)?;
        let runtime_hours = parse_runtime(fields[3]).ok_or_else(bad)?;
        Ok(Record { timestamp, temperature, humidity, runtime_hours })
    }
}

fn format_reading(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.1}", v),
        None => "nan".to_string(),
    }
}

// Outer None: malformed. Inner None: the sample was unknown.
fn parse_reading(field: &str) -> Option<Option<f64>> {
    if field.eq_ignore_ascii_case("nan") {
        return Some(None);
    }
    field.parse::<f64>().ok().map(Some)
}

/// Runtime is always written with two decimals, so a field without them is
/// a line a crash cut short.
fn parse_runtime(field: &str) -> Option<f64> {
    let field = field.trim();
    let (whole, frac) = field.split_once('.')?;
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(whole) || frac.len() != 2 || !digits(frac) {
        return None;
    }
    field.parse().ok()
}

pub struct Journal {
    file: File,
    path: PathBuf,
    id: String,
}

impl Journal {
    /// Opens the log for a run started at `started`, creating the directory if needed.
    pub fn create(dir: &Path, started: DateTime<Local>) -> Result<Journal, JournalError> {
        fs::create_dir_all(dir)?;
        let id = started.format(ID_FORMAT).to_string();
        let path = dir.join(format!("{}.{}", id, EXTENSION));
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        // A restart within the same second reuses the file; keep a single header.
        if file.metadata()?.len() == 0 {
            writeln!(file, "{}", HEADER)?;
            file.flush()?;
        }
        Ok(Journal { file, path, id })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one line and pushes it to disk before returning.
    pub fn append(&mut self, record: &Record) -> Result<(), JournalError> {
        writeln!(self.file, "{}", record.to_line())?;
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<(), JournalError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RunInfo {
    pub id: String,
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Log files in `dir`, most recently modified first.
pub fn list_runs(dir: &Path) -> Result<Vec<RunInfo>, JournalError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut runs = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let id = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_string(),
            None => continue,
        };
        runs.push(RunInfo { id, path, modified: metadata.modified()? });
    }
    runs.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.id.cmp(&a.id)));
    Ok(runs)
}

/// Cumulative runtime recorded by the newest log. Trailing lines a crash
/// left incomplete are passed over in favour of the last complete record.
pub fn recover_runtime(dir: &Path) -> Result<f64, JournalError> {
    let newest = list_runs(dir)?
        .into_iter()
        .next()
        .ok_or_else(|| JournalError::NoPriorLog(dir.to_path_buf()))?;
    let tail = read_tail(&newest.path)?;
    let mut newest_line: Option<&str> = None;
    for line in tail.lines().rev().filter(|l| !l.trim().is_empty()) {
        if let Ok(record) = Record::parse(line) {
            if let Some(broken) = newest_line {
                warn!(
                    path = %newest.path.display(),
                    line = broken,
                    "skipping incomplete log line"
                );
            }
            return Ok(record.runtime_hours);
        }
        newest_line.get_or_insert(line);
    }
    Err(JournalError::Parse { line: newest_line.unwrap_or_default().to_string() })
}

fn read_tail(path: &Path) -> Result<String, JournalError> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    file.seek(SeekFrom::Start(len.saturating_sub(TAIL_BYTES)))?;
    let mut tail = Vec::new();
    file.read_to_end(&mut tail)?;
    Ok(String::from_utf8_lossy(&tail).into_owned())
}

/// Data lines of a log file. The header and lines a crash cut short are skipped.
pub fn read_records(path: &Path) -> Result<Vec<Record>, JournalError> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter(|line| *line != HEADER && !line.trim().is_empty())
        .filter_map(|line| Record::parse(line).ok())
        .collect())
}
