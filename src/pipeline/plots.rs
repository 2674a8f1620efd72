//! Plot code generation: ask the model for plotting code from each task.

use crate::client::ModelRequest;
use crate::dataset::{Datapoint, format_task};
use crate::models::{CompletionResult, JobRecord, PlotPrompts, Result};
use crate::pipeline::{Prepared, Stage};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static PYTHON_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```python\n(.*?)\n```").expect("valid code block pattern"));

const DATA_DESCRIPTION_SECTION: &str = "data description";

/// Every fenced python block of a response, joined by newlines.
pub fn gather_code(answer: &str) -> String {
    PYTHON_BLOCK_RE
        .captures_iter(answer)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A datapoint with its task already rendered to request text.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotItem {
    pub id: u64,
    pub task: String,
}

pub struct PlotStage {
    prompts: PlotPrompts,
}

impl PlotStage {
    pub fn new(prompts: PlotPrompts) -> Self {
        Self { prompts }
    }

    /// Render the request text for every datapoint.
    ///
    /// Tasks found in `generated` (raw task texts by id) replace the
    /// datapoint's `task.json`.
    pub fn items(
        &self,
        datapoints: &[Datapoint],
        generated: Option<&BTreeMap<u64, String>>,
    ) -> Result<Vec<PlotItem>> {
        datapoints
            .iter()
            .map(|dp| {
                let task = match generated.and_then(|tasks| tasks.get(&dp.id)) {
                    Some(text) => format_task(text)?,
                    None => dp.require_task()?.clone(),
                };
                let description = match self.prompts.data_instruct {
                    Some(_) => Some(dp.require_data_description()?),
                    None => None,
                };
                Ok(PlotItem {
                    id: dp.id,
                    task: self.request_text(&task, description),
                })
            })
            .collect()
    }

    /// Plotting instruction followed by the numbered task sections.
    ///
    /// With a data instruction configured, it and the dataframe description
    /// follow the data-description section. Blank lines are collapsed.
    pub fn request_text(&self, task: &Map<String, Value>, data_description: Option<&str>) -> String {
        let mut text = self.prompts.plot_instruct.clone();

        for (i, (section, part)) in task.iter().enumerate() {
            let part = match part {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            text.push_str(&format!("{}. {}\n", i + 1, part.trim_start()));

            if section == DATA_DESCRIPTION_SECTION {
                if let (Some(instruct), Some(description)) =
                    (self.prompts.data_instruct.as_deref(), data_description)
                {
                    text.push_str(instruct);
                    text.push_str(description);
                    text.push('\n');
                }
            }
        }

        text.replace("\n\n", "\n")
    }
}

impl Stage for PlotStage {
    type Item = PlotItem;

    fn name(&self) -> &str {
        "plots"
    }

    fn item_id(&self, item: &PlotItem) -> u64 {
        item.id
    }

    fn prepare(&self, item: &PlotItem) -> Result<Prepared> {
        Ok(Prepared::Request(ModelRequest::new(item.task.clone())))
    }

    fn finalize(&self, item: &PlotItem, result: CompletionResult) -> JobRecord {
        let code = gather_code(&result.response);
        let mut record = JobRecord::new(item.id, result);
        record.task = Some(item.task.clone());
        record.code = Some(code);
        record
    }
}
