//! Score gathering and summary statistics.

use crate::models::{BenchStats, JobRecord, PlotOutcome, PlotbenchError, Result, Score, ScoreRecord};
use crate::scoring::{ScoreVocabulary, score_result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// One score record per plot result, in id order.
///
/// Items without rendered images score 0 and are flagged `has plot = false`.
/// Items with images but no judge record come out unparsed.
pub fn gather_scores(
    plot_results: &BTreeMap<u64, PlotOutcome>,
    judge_records: &[JobRecord],
    vocabulary: &ScoreVocabulary,
) -> Vec<ScoreRecord> {
    // Later lines win.
    let judged: HashMap<u64, &JobRecord> = judge_records.iter().map(|r| (r.id, r)).collect();

    plot_results
        .iter()
        .map(|(&id, outcome)| {
            let mut record = ScoreRecord {
                id,
                score: Score::Discrete(0),
                error: outcome.error.clone(),
                has_plot: !outcome.images.is_empty(),
                pair_id: None,
            };

            if !record.has_plot {
                info!(id, "No image rendered");
                return record;
            }

            match judged.get(&id) {
                Some(judge) => {
                    record.score = score_result(id, &judge.result, vocabulary);
                    record.pair_id = judge.pair_id;
                }
                None => {
                    warn!(id, "No judge response recorded");
                    record.score = Score::Unparsed;
                }
            }
            record
        })
        .collect()
}

/// Summary over a scoring pass.
///
/// Min/max/mean/median and the error count cover numerically scored items
/// only; the error rate is relative to all items.
pub fn calc_bench_stats(records: &[ScoreRecord]) -> BenchStats {
    let scored: Vec<(&ScoreRecord, f64)> = records
        .iter()
        .filter_map(|r| r.score.value().map(|v| (r, v)))
        .collect();

    let mut values: Vec<f64> = scored.iter().map(|(_, v)| *v).collect();
    values.sort_by(f64::total_cmp);

    let error_number = scored.iter().filter(|(r, _)| !r.error.is_empty()).count();
    let num_items = records.len();

    BenchStats {
        min_score: values.first().copied(),
        max_score: values.last().copied(),
        mean_score: mean(&values),
        median_score: median(&values),
        num_items,
        error_number,
        error_rate: if num_items == 0 {
            0.0
        } else {
            error_number as f64 / num_items as f64
        },
        unparsed: num_items - scored.len(),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Median of already sorted values.
fn median(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(sorted[n / 2]),
        _ => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0),
    }
}

/// Score records keyed by id, as written to the score file.
pub fn scores_by_id(records: &[ScoreRecord]) -> BTreeMap<String, &ScoreRecord> {
    records.iter().map(|r| (r.id.to_string(), r)).collect()
}

/// Write `value` as pretty JSON, replacing any previous file.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PlotbenchError::io("creating output directory", e))?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| PlotbenchError::Internal(format!("Failed to serialize {}: {e}", path.display())))?;
    fs::write(path, json).map_err(|e| PlotbenchError::io(format!("writing {}", path.display()), e))
}
