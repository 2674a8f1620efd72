//! Append-only JSON-lines job log.
//!
//! Layout: an optional header line (the prompt set used for the run), then
//! one record per completed item. Any line carrying an `id` is a record; the
//! set of those ids is the resume state. Nothing is ever rewritten.

use crate::models::{JobRecord, PlotbenchError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Durable record log for one pipeline stage.
#[derive(Debug)]
pub struct JobLog {
    path: PathBuf,
    done: HashSet<u64>,
}

impl JobLog {
    /// Open (or create) the log at `path` and load the ids already recorded.
    ///
    /// `header` is written only when the log is new or empty.
    pub fn open<H: Serialize>(path: &Path, header: Option<&H>) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PlotbenchError::io("creating log directory", e))?;
        }

        let done = if path.exists() {
            existing_ids(path)?
        } else {
            HashSet::new()
        };

        let log = Self {
            path: path.to_path_buf(),
            done,
        };

        let is_empty = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        if is_empty {
            if let Some(header) = header {
                log.append_line(header)?;
                debug!(path = %path.display(), "Wrote log header");
            }
        } else {
            info!(
                path = %path.display(),
                records = log.done.len(),
                "Resuming from existing log"
            );
        }

        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_done(&self, id: u64) -> bool {
        self.done.contains(&id)
    }

    pub fn done_count(&self) -> usize {
        self.done.len()
    }

    /// Append one record and make it durable before returning.
    pub fn append(&mut self, record: &JobRecord) -> Result<()> {
        self.append_line(record)?;
        self.done.insert(record.id);
        Ok(())
    }

    fn append_line<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let mut line = serde_json::to_string(value)
            .map_err(|e| PlotbenchError::Internal(format!("Failed to serialize log line: {e}")))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PlotbenchError::io("opening job log", e))?;

        // One write per line so a crash leaves at most a truncated tail.
        file.write_all(line.as_bytes())
            .map_err(|e| PlotbenchError::io("appending to job log", e))?;
        file.flush()
            .map_err(|e| PlotbenchError::io("flushing job log", e))?;
        file.sync_data()
            .map_err(|e| PlotbenchError::io("syncing job log", e))?;
        Ok(())
    }
}

/// Ids of every record line in the log at `path`.
pub fn existing_ids(path: &Path) -> Result<HashSet<u64>> {
    let mut ids = HashSet::new();
    for_each_line(path, |line_no, value| {
        if let Some(id) = value.get("id") {
            let id = id.as_u64().ok_or_else(|| {
                PlotbenchError::ParseError(format!(
                    "{}:{line_no}: id is not a non-negative integer: {id}",
                    path.display()
                ))
            })?;
            ids.insert(id);
        }
        Ok(())
    })?;
    Ok(ids)
}

/// Header line of the log, if the first line is not a record.
pub fn read_header(path: &Path) -> Result<Option<Value>> {
    let mut header = None;
    let mut first = true;
    for_each_line(path, |_, value| {
        if first && value.get("id").is_none() {
            header = Some(value);
        }
        first = false;
        Ok(())
    })?;
    Ok(header)
}

/// Every record line, deserialized as `T`. The header is skipped.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut records = Vec::new();
    for_each_line(path, |line_no, value| {
        if value.get("id").is_some() {
            let record = serde_json::from_value(value).map_err(|e| {
                PlotbenchError::ParseError(format!("{}:{line_no}: {e}", path.display()))
            })?;
            records.push(record);
        }
        Ok(())
    })?;
    Ok(records)
}

fn for_each_line<F>(path: &Path, mut f: F) -> Result<()>
where
    F: FnMut(usize, Value) -> Result<()>,
{
    let file = File::open(path).map_err(|e| PlotbenchError::io(format!("opening {}", path.display()), e))?;
    let reader = BufReader::new(file);

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|e| PlotbenchError::io("reading job log", e))?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line).map_err(|e| {
            PlotbenchError::ParseError(format!("{}:{line_no}: malformed log line: {e}", path.display()))
        })?;
        f(line_no, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CompletionResult;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(id: u64, text: &str) -> JobRecord {
        JobRecord::new(id, CompletionResult::from_text(text))
    }

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_new_log_gets_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("tasks.jsonl");
        let header = json!({"system prompt": "s", "part 1": "a"});

        let mut log = JobLog::open(&path, Some(&header)).unwrap();
        log.append(&record(3, "three")).unwrap();

        let lines = lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(serde_json::from_str::<Value>(&lines[0]).unwrap(), header);
        assert!(lines[1].contains("\"id\":3"));
        assert_eq!(read_header(&path).unwrap(), Some(header));
    }

    #[test]
    fn test_reopen_resumes_without_second_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");
        let header = json!({"request judge": "r"});

        let mut log = JobLog::open(&path, Some(&header)).unwrap();
        log.append(&record(0, "a")).unwrap();
        log.append(&record(7, "b")).unwrap();
        let before = lines(&path);

        let reopened = JobLog::open(&path, Some(&header)).unwrap();
        assert_eq!(reopened.done_count(), 2);
        assert!(reopened.is_done(7));
        assert!(!reopened.is_done(1));
        assert_eq!(lines(&path), before);
    }

    #[test]
    fn test_empty_file_gets_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");
        File::create(&path).unwrap();

        JobLog::open(&path, Some(&json!({"h": 1}))).unwrap();
        assert_eq!(lines(&path), vec![r#"{"h":1}"#.to_string()]);
    }

    #[test]
    fn test_malformed_line_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");
        fs::write(&path, "{\"id\": 1, \"response\": \"x\"}\n{not json\n").unwrap();

        let err = JobLog::open::<Value>(&path, None).unwrap_err();
        assert!(matches!(err, PlotbenchError::ParseError(_)));
        assert!(err.to_string().contains(":2:"));
    }

    #[test]
    fn test_read_records_skips_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");
        let mut log = JobLog::open(&path, Some(&json!({"system prompt": "s"}))).unwrap();
        log.append(&record(2, "two")).unwrap();
        log.append(&record(5, "five")).unwrap();

        let records: Vec<JobRecord> = read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id, 5);
        assert_eq!(records[1].result.response, "five");
    }
}
