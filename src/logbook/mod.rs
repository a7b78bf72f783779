//! Accumulated time-attribution log.
//!
//! Entries are unique per (date, task, repository); a repeated attribution
//! adds to the existing row instead of appending a duplicate. The CSV file
//! is the four-column schema `date,taskId,repository,hours`; the historical
//! three-column variant is still readable (its rows get an empty
//! repository).

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};

const CSV_HEADER: [&str; 4] = ["date", "taskId", "repository", "hours"];

/// Hours are stored to four decimal places so repeated accumulation of
/// interval slices does not drift.
pub fn round_hours(hours: f64) -> f64 {
    (hours * 10_000.0).round() / 10_000.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub date: NaiveDate,
    pub task_id: String,
    pub repository: String,
    pub hours: f64,
}

pub struct LogBook {
    path: PathBuf,
    entries: Vec<LogEntry>,
    dirty: bool,
}

impl LogBook {
    pub fn load(path: PathBuf) -> Result<Self> {
        let entries = if path.exists() {
            Self::read_csv(&path)?
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Merge an attribution into the log: same (date, task, repository)
    /// accumulates additively, otherwise a new row is appended.
    pub fn accumulate(&mut self, date: NaiveDate, task_id: &str, repository: &str, hours: f64) {
        let existing = self.entries.iter_mut().find(|entry| {
            entry.date == date && entry.task_id == task_id && entry.repository == repository
        });

        match existing {
            Some(entry) => entry.hours = round_hours(entry.hours + hours),
            None => self.entries.push(LogEntry {
                date,
                task_id: task_id.to_string(),
                repository: repository.to_string(),
                hours: round_hours(hours),
            }),
        }
        self.dirty = true;
    }

    /// Write the log out if anything accumulated since the last flush.
    /// Returns whether a write happened.
    pub fn flush_if_dirty(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        self.write_csv()?;
        self.dirty = false;
        Ok(true)
    }

    /// Drop unflushed accumulations, restoring the given entries.
    pub fn restore(&mut self, entries: Vec<LogEntry>) {
        self.entries = entries;
        self.dirty = false;
    }

    pub fn entries_snapshot(&self) -> Vec<LogEntry> {
        self.entries.clone()
    }

    fn read_csv(path: &Path) -> Result<Vec<LogEntry>> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;

        // The legacy schema had no repository column.
        let headers = reader
            .headers()
            .with_context(|| format!("Failed to read log header in {}", path.display()))?;
        let legacy = !headers.iter().any(|field| field == "repository");

        let mut entries = Vec::new();
        for (index, record) in reader.records().enumerate() {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!("Skipping unreadable log row {}: {}", index + 2, e);
                    continue;
                }
            };
            match parse_record(&record, legacy) {
                Some(entry) => entries.push(entry),
                None => {
                    tracing::warn!("Skipping malformed log row {}: {:?}", index + 2, record);
                }
            }
        }
        Ok(entries)
    }

    fn write_csv(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create log directory {}", parent.display())
                })?;
            }
        }

        let temp_file = self.path.with_extension("csv.tmp");
        let mut writer = csv::Writer::from_path(&temp_file)
            .with_context(|| format!("Failed to open temp log file {}", temp_file.display()))?;

        writer
            .write_record(CSV_HEADER)
            .context("Failed to write log header")?;
        for entry in &self.entries {
            writer
                .write_record([
                    entry.date.format("%Y-%m-%d").to_string(),
                    entry.task_id.clone(),
                    entry.repository.clone(),
                    format_hours(entry.hours),
                ])
                .context("Failed to write log row")?;
        }
        writer.flush().context("Failed to flush log file")?;
        drop(writer);

        fs::rename(&temp_file, &self.path)
            .with_context(|| format!("Failed to rename log file {}", self.path.display()))?;
        Ok(())
    }
}

fn parse_record(record: &csv::StringRecord, legacy: bool) -> Option<LogEntry> {
    let (date, task_id, repository, hours) = if legacy {
        (record.get(0)?, record.get(1)?, "", record.get(2)?)
    } else {
        (
            record.get(0)?,
            record.get(1)?,
            record.get(2)?,
            record.get(3)?,
        )
    };

    Some(LogEntry {
        date: NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?,
        task_id: task_id.to_string(),
        repository: repository.to_string(),
        hours: hours.trim().parse().ok()?,
    })
}

fn format_hours(hours: f64) -> String {
    // Trim trailing zeros so 0.5 stays "0.5", not "0.5000".
    let formatted = format!("{:.4}", hours);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_accumulate_merges_same_key() {
        let dir = TempDir::new().unwrap();
        let mut book = LogBook::load(dir.path().join("log.csv")).unwrap();

        book.accumulate(date("2026-08-30"), "DFO-42", "/r", 0.0833);
        book.accumulate(date("2026-08-30"), "DFO-42", "/r", 0.0833);

        assert_eq!(book.entries().len(), 1);
        assert_eq!(book.entries()[0].hours, 0.1666);
    }

    #[test]
    fn test_accumulate_appends_new_keys() {
        let dir = TempDir::new().unwrap();
        let mut book = LogBook::load(dir.path().join("log.csv")).unwrap();

        book.accumulate(date("2026-08-30"), "DFO-42", "/r", 0.0833);
        book.accumulate(date("2026-08-30"), "DFO-42", "/other", 0.0833);
        book.accumulate(date("2026-08-31"), "DFO-42", "/r", 0.0833);

        assert_eq!(book.entries().len(), 3);
    }

    #[test]
    fn test_flush_only_when_dirty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.csv");
        let mut book = LogBook::load(path.clone()).unwrap();

        assert!(!book.flush_if_dirty().unwrap());
        assert!(!path.exists());

        book.accumulate(date("2026-08-30"), "DFO-42", "/r", 0.0833);
        assert!(book.flush_if_dirty().unwrap());
        assert!(path.exists());
        assert!(!book.flush_if_dirty().unwrap());
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.csv");

        let mut book = LogBook::load(path.clone()).unwrap();
        book.accumulate(date("2026-08-30"), "DFO-42", "/r", 0.0833);
        book.accumulate(date("2026-08-30"), "my-branch", "/r", 0.5);
        book.flush_if_dirty().unwrap();

        let reloaded = LogBook::load(path).unwrap();
        assert_eq!(reloaded.entries().len(), 2);
        assert_eq!(reloaded.entries()[0].task_id, "DFO-42");
        assert_eq!(reloaded.entries()[0].hours, 0.0833);
        assert_eq!(reloaded.entries()[1].hours, 0.5);
    }

    #[test]
    fn test_reads_legacy_three_column_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(&path, "date,taskId,hours\n2026-08-29,DFO-7,0.25\n").unwrap();

        let book = LogBook::load(path).unwrap();
        assert_eq!(book.entries().len(), 1);
        assert_eq!(book.entries()[0].task_id, "DFO-7");
        assert_eq!(book.entries()[0].repository, "");
        assert_eq!(book.entries()[0].hours, 0.25);
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(
            &path,
            "date,taskId,repository,hours\nnot-a-date,DFO-7,/r,0.25\n2026-08-29,DFO-8,/r,0.25\n",
        )
        .unwrap();

        let book = LogBook::load(path).unwrap();
        assert_eq!(book.entries().len(), 1);
        assert_eq!(book.entries()[0].task_id, "DFO-8");
    }

    #[test]
    fn test_round_hours() {
        assert_eq!(round_hours(5.0 / 60.0), 0.0833);
        assert_eq!(round_hours(0.0833 + 0.0833), 0.1666);
        assert_eq!(round_hours(0.5), 0.5);
    }

    #[test]
    fn test_format_hours_trims_zeros() {
        assert_eq!(format_hours(0.5), "0.5");
        assert_eq!(format_hours(0.0833), "0.0833");
        assert_eq!(format_hours(2.0), "2");
    }
}
