//! Visual judging: compare each rendered plot against its ground truth.

use crate::client::{GenerationArgs, ImageRef, ModelRequest};
use crate::dataset::DatasetLoader;
use crate::models::{
    CompletionResult, ImageDetail, JobRecord, JudgeConfig, JudgePrompts, PlotOutcome, PlotSummary,
    PlotbenchError, Result,
};
use crate::pipeline::{Prepared, Stage};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Load the executor's plot results file (`id -> outcome`).
pub fn read_plot_results(path: &Path) -> Result<BTreeMap<u64, PlotOutcome>> {
    let raw = fs::read_to_string(path)
        .map_err(|e| PlotbenchError::io(format!("reading plot results {}", path.display()), e))?;
    let results: BTreeMap<u64, PlotOutcome> = serde_json::from_str(&raw)
        .map_err(|e| PlotbenchError::ParseError(format!("{}: {e}", path.display())))?;
    info!(path = %path.display(), items = results.len(), "Loaded plot results");
    Ok(results)
}

/// One rendered plot to be judged.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeItem {
    pub id: u64,
    /// First rendered image, base64 encoded
    pub generated: Option<String>,
    pub ground_truth: Option<PathBuf>,
    /// Datapoint the ground truth was taken from, when not `id` itself
    pub pair_id: Option<u64>,
    pub summary: PlotSummary,
}

pub struct JudgeStage {
    prompts: JudgePrompts,
    detail: ImageDetail,
    logprobs: bool,
    args: GenerationArgs,
    random_pairing: bool,
    seed: u64,
}

impl JudgeStage {
    pub fn new(prompts: JudgePrompts, config: &JudgeConfig) -> Self {
        // Logprob mode answers with a single, bias-constrained score token.
        let args = if config.logprobs {
            GenerationArgs {
                max_tokens: Some(1),
                request_logprobs: Some(true),
                top_logprobs_count: Some(config.top_logprobs),
                ..Default::default()
            }
        } else {
            GenerationArgs::default()
        };

        Self {
            prompts,
            detail: config.image_detail,
            logprobs: config.logprobs,
            args,
            random_pairing: config.random_pairing,
            seed: config.seed,
        }
    }

    /// Generation args every judge request needs.
    pub fn args(&self) -> &GenerationArgs {
        &self.args
    }

    /// Pair every plot result with a ground-truth image.
    ///
    /// With random pairing, each item is compared against a seeded random
    /// other datapoint (itself only when the dataset has a single entry).
    pub fn items(
        &self,
        plot_results: &BTreeMap<u64, PlotOutcome>,
        dataset: &DatasetLoader,
    ) -> Result<Vec<JudgeItem>> {
        let ids = dataset.ids();
        let mut rng = StdRng::seed_from_u64(self.seed);

        plot_results
            .iter()
            .map(|(&id, outcome)| {
                let pair_id = if self.random_pairing {
                    let others: Vec<u64> = ids.iter().copied().filter(|&other| other != id).collect();
                    others.choose(&mut rng).copied().or(Some(id))
                } else {
                    None
                };

                Ok(JudgeItem {
                    id,
                    generated: outcome.images.first().cloned(),
                    ground_truth: dataset.ground_truth(pair_id.unwrap_or(id))?,
                    pair_id,
                    summary: PlotSummary {
                        error: outcome.error.clone(),
                        images: outcome.images.len(),
                    },
                })
            })
            .collect()
    }
}

impl Stage for JudgeStage {
    type Item = JudgeItem;

    fn name(&self) -> &str {
        "judge"
    }

    fn item_id(&self, item: &JudgeItem) -> u64 {
        item.id
    }

    fn prepare(&self, item: &JudgeItem) -> Result<Prepared> {
        let Some(generated) = &item.generated else {
            return Ok(Prepared::Declined("no rendered image".to_string()));
        };
        let Some(ground_truth) = &item.ground_truth else {
            warn!(id = item.id, pair_id = ?item.pair_id, "Ground-truth image missing");
            return Ok(Prepared::Declined("no ground-truth image".to_string()));
        };

        Ok(Prepared::Request(
            ModelRequest::new(self.prompts.request_judge.clone())
                .with_images(vec![
                    ImageRef::encoded(generated.clone()),
                    ImageRef::path(ground_truth.clone()),
                ])
                .with_detail(self.detail)
                .with_args(self.args.clone()),
        ))
    }

    fn finalize(&self, item: &JudgeItem, result: CompletionResult) -> JobRecord {
        let mut record = JobRecord::new(item.id, result);
        record.plot_results = Some(item.summary.clone());
        record.pair_id = item.pair_id;
        record.probs = self.logprobs;
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::JobLog;
    use crate::dataset::fixtures::write_datapoint;
    use crate::pipeline::BatchRunner;
    use crate::pipeline::testing::EchoModel;
    use serde_json::json;
    use tempfile::TempDir;

    fn prompts() -> JudgePrompts {
        JudgePrompts {
            system_prompt: "You are a judge.".to_string(),
            request_judge: "Compare the plots. End with FINAL SCORE.".to_string(),
        }
    }

    fn outcome(images: usize) -> PlotOutcome {
        PlotOutcome {
            images: vec!["iVBORw0KGgoAAAANSUhEUg==".to_string(); images],
            error: String::new(),
            code: None,
        }
    }

    #[test]
    fn test_read_plot_results() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plots.json");
        fs::write(
            &path,
            json!({"3": {"images": ["AAAA"], "error": ""}, "10": {"images": [], "error": "NameError"}})
                .to_string(),
        )
        .unwrap();

        let results = read_plot_results(&path).unwrap();
        assert_eq!(results.keys().copied().collect::<Vec<_>>(), vec![3, 10]);
        assert_eq!(results[&10].error, "NameError");
    }

    #[test]
    fn test_request_pairs_generated_with_ground_truth() {
        let root = TempDir::new().unwrap();
        write_datapoint(root.path(), 1);
        let dataset = DatasetLoader::open(root.path()).unwrap();
        let stage = JudgeStage::new(prompts(), &JudgeConfig::default());

        let items = stage.items(&BTreeMap::from([(1, outcome(2))]), &dataset).unwrap();
        let Prepared::Request(request) = stage.prepare(&items[0]).unwrap() else {
            panic!("expected a request");
        };

        assert_eq!(request.images.len(), 2);
        assert!(matches!(&request.images[0], ImageRef::Encoded(_)));
        assert!(matches!(&request.images[1], ImageRef::Path(p) if p.ends_with("1/plot_1.png")));
        assert_eq!(request.image_detail, ImageDetail::Auto);
        assert_eq!(request.args, GenerationArgs::default());
    }

    #[test]
    fn test_logprob_mode_args() {
        let config = JudgeConfig {
            logprobs: true,
            ..JudgeConfig::default()
        };
        let stage = JudgeStage::new(prompts(), &config);
        assert_eq!(stage.args.max_tokens, Some(1));
        assert_eq!(stage.args.request_logprobs, Some(true));
        assert_eq!(stage.args.top_logprobs_count, Some(20));

        let item = JudgeItem {
            id: 1,
            generated: None,
            ground_truth: None,
            pair_id: None,
            summary: PlotSummary {
                error: String::new(),
                images: 0,
            },
        };
        assert!(stage.finalize(&item, CompletionResult::from_text("7")).probs);
    }

    #[test]
    fn test_random_pairing_is_seeded_and_never_self() {
        let root = TempDir::new().unwrap();
        for id in 0..6 {
            write_datapoint(root.path(), id);
        }
        let dataset = DatasetLoader::open(root.path()).unwrap();
        let config = JudgeConfig {
            random_pairing: true,
            ..JudgeConfig::default()
        };
        let stage = JudgeStage::new(prompts(), &config);
        let results: BTreeMap<u64, PlotOutcome> = (0..6).map(|id| (id, outcome(1))).collect();

        let first = stage.items(&results, &dataset).unwrap();
        let second = stage.items(&results, &dataset).unwrap();
        assert_eq!(first, second);
        for item in &first {
            let pair = item.pair_id.unwrap();
            assert_ne!(pair, item.id);
            assert!(item.ground_truth.as_ref().unwrap().starts_with(dataset.folder(pair)));
        }
    }

    #[tokio::test]
    async fn test_zero_image_item_never_reaches_model() {
        let root = TempDir::new().unwrap();
        write_datapoint(root.path(), 1);
        write_datapoint(root.path(), 2);
        let dataset = DatasetLoader::open(root.path()).unwrap();
        let stage = JudgeStage::new(prompts(), &JudgeConfig::default());
        let items = stage
            .items(&BTreeMap::from([(1, outcome(0)), (2, outcome(1))]), &dataset)
            .unwrap();

        let out = TempDir::new().unwrap();
        let log = JobLog::open(&out.path().join("judge.jsonl"), Some(&json!({"request judge": "r"}))).unwrap();
        let model = EchoModel::default();
        let mut runner = BatchRunner::new(&model, log).with_progress(false);

        let stats = runner.run(&stage, items).await.unwrap();
        assert_eq!(model.calls(), 1);
        assert_eq!(stats.declined, 1);
        assert!(!runner.log().is_done(1));
        assert!(runner.log().is_done(2));

        let records: Vec<JobRecord> = crate::checkpoint::read_records(runner.log().path()).unwrap();
        assert_eq!(records[0].plot_results.as_ref().unwrap().images, 1);
    }
}
