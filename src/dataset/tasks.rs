//! Generated task texts.

use crate::checkpoint::read_records;
use crate::models::{JobRecord, PlotbenchError, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Section names of a task, in the order the model is asked to write them.
pub const TASK_SECTIONS: [&str; 4] = ["setup", "data description", "plot description", "plot style"];

/// Task text per datapoint id from a task-generation log.
///
/// Later lines for the same id win. Empty responses are dropped.
pub fn read_task_responses(path: &Path) -> Result<BTreeMap<u64, String>> {
    let records: Vec<JobRecord> = read_records(path)?;
    let mut tasks = BTreeMap::new();
    for record in records {
        let message = clean_task_text(&record.result.response);
        if !message.is_empty() {
            tasks.insert(record.id, message);
        }
    }
    Ok(tasks)
}

/// Drop a leading `TASK:` label together with markdown bold markers.
pub fn clean_task_text(message: &str) -> String {
    match message.strip_prefix("TASK:") {
        Some(rest) => rest.trim_start_matches(['\n', ' ']).replace("**", ""),
        None => message.to_string(),
    }
}

/// Split a `1. ... 2. ... 3. ... 4. ...` task text into its named sections.
///
/// Each numbered marker must start a line. Text before `1.` is discarded.
pub fn format_task(message: &str) -> Result<Map<String, Value>> {
    let mut rest = format!(" \n{message}");
    let mut parts = Vec::with_capacity(TASK_SECTIONS.len());

    for i in 1..=TASK_SECTIONS.len() {
        let marker = format!("\n{i}.");
        let (head, tail) = rest
            .split_once(&marker)
            .ok_or_else(|| PlotbenchError::ParseError(format!("task text has no section {i}")))?;
        parts.push(head.to_string());
        rest = tail.to_string();
    }
    parts.push(rest);

    Ok(TASK_SECTIONS
        .iter()
        .zip(parts.into_iter().skip(1))
        .map(|(name, text)| (name.to_string(), Value::String(text)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::JobLog;
    use crate::models::CompletionResult;
    use serde_json::json;
    use tempfile::TempDir;

    const TASK: &str = "1. Load the data.\n2. The frame has columns a and b.\n3. Scatter a against b.\n4. Use blue markers.";

    #[test]
    fn test_format_task_sections() {
        let task = format_task(TASK).unwrap();
        let keys: Vec<&String> = task.keys().collect();
        assert_eq!(keys, TASK_SECTIONS);
        assert_eq!(task["setup"], " Load the data.");
        assert_eq!(task["data description"], " The frame has columns a and b.");
        assert_eq!(task["plot style"], " Use blue markers.");
    }

    #[test]
    fn test_format_task_missing_section() {
        assert!(format_task("1. Only one part").is_err());
    }

    #[test]
    fn test_clean_task_text() {
        assert_eq!(clean_task_text("TASK:\n 1. **Setup**"), "1. Setup");
        assert_eq!(clean_task_text("1. **kept**"), "1. **kept**");
    }

    #[test]
    fn test_read_task_responses_last_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.jsonl");
        let mut log = JobLog::open(&path, Some(&json!({"part 1": "p"}))).unwrap();
        log.append(&JobRecord::new(1, CompletionResult::from_text("TASK: old"))).unwrap();
        log.append(&JobRecord::new(2, CompletionResult::from_text(""))).unwrap();
        log.append(&JobRecord::new(1, CompletionResult::from_text("TASK: new"))).unwrap();

        let tasks = read_task_responses(&path).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[&1], "new");
    }
}
