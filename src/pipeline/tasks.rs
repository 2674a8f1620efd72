//! Task generation: ask the model to describe each ground-truth plot as a task.

use crate::client::{ImageRef, ModelRequest};
use crate::dataset::Datapoint;
use crate::models::{CompletionResult, ImageDetail, JobRecord, Result, TaskPrompts};
use crate::pipeline::{Prepared, Stage};

pub struct TaskStage {
    prompts: TaskPrompts,
}

impl TaskStage {
    pub fn new(prompts: TaskPrompts) -> Self {
        Self { prompts }
    }

    /// Prompt parts, plotting code and data summary joined line by line.
    pub fn request_text(&self, datapoint: &Datapoint) -> Result<String> {
        Ok([
            self.prompts.part_1.clone(),
            format!("CODE:\n{}", datapoint.code_plot),
            format!("Dataframe SUMMARY:\n{}", datapoint.require_data_description()?),
            self.prompts.part_2.clone(),
        ]
        .join("\n"))
    }
}

impl Stage for TaskStage {
    type Item = Datapoint;

    fn name(&self) -> &str {
        "tasks"
    }

    fn item_id(&self, item: &Datapoint) -> u64 {
        item.id
    }

    fn prepare(&self, item: &Datapoint) -> Result<Prepared> {
        let images = item.images.iter().map(ImageRef::path).collect();
        Ok(Prepared::Request(
            ModelRequest::new(self.request_text(item)?)
                .with_images(images)
                .with_detail(ImageDetail::Low),
        ))
    }

    fn finalize(&self, item: &Datapoint, result: CompletionResult) -> JobRecord {
        JobRecord::new(item.id, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures::write_datapoint;
    use tempfile::TempDir;

    fn stage() -> TaskStage {
        TaskStage::new(TaskPrompts {
            system_prompt: "sys".to_string(),
            part_1: "Describe the plot.".to_string(),
            part_2: "Answer as a numbered list.".to_string(),
        })
    }

    #[test]
    fn test_request_text_layout() {
        let root = TempDir::new().unwrap();
        let dp = Datapoint::read(&write_datapoint(root.path(), 4)).unwrap();

        let text = stage().request_text(&dp).unwrap();
        assert_eq!(
            text,
            "Describe the plot.\nCODE:\nplt.plot([4])\n\nDataframe SUMMARY:\nx: int\ny: float\nAnswer as a numbered list."
        );
    }

    #[test]
    fn test_prepare_attaches_all_images_at_low_detail() {
        let root = TempDir::new().unwrap();
        let dir = write_datapoint(root.path(), 4);
        std::fs::write(dir.join("plot_2.png"), [0x89]).unwrap();
        let dp = Datapoint::read(&dir).unwrap();

        let Prepared::Request(request) = stage().prepare(&dp).unwrap() else {
            panic!("expected a request");
        };
        assert_eq!(request.images.len(), 2);
        assert_eq!(request.image_detail, ImageDetail::Low);
        assert!(matches!(&request.images[0], ImageRef::Path(p) if p.ends_with("plot_1.png")));
    }
}
