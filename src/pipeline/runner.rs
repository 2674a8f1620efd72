//! Checkpointed batch runner.
//!
//! Runner flow:
//! items → skip ids already in the job log → stage builds request → model →
//! stage stamps record → append + sync → next item

use crate::checkpoint::JobLog;
use crate::client::{CancelToken, CompletionModel, ModelRequest};
use crate::models::{CompletionResult, JobRecord, PlotbenchError, Result, RunStats};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;
use tracing::{debug, info, warn};

/// What a stage wants done with one item.
#[derive(Debug, Clone)]
pub enum Prepared {
    Request(ModelRequest),
    /// Skip without calling the model; nothing is logged
    Declined(String),
}

/// One pipeline stage: how to ask about an item and how to record the answer.
pub trait Stage {
    type Item;

    fn name(&self) -> &str;

    fn item_id(&self, item: &Self::Item) -> u64;

    fn prepare(&self, item: &Self::Item) -> Result<Prepared>;

    fn finalize(&self, item: &Self::Item, result: CompletionResult) -> JobRecord;
}

/// Runs a stage over items, one at a time, persisting each result.
pub struct BatchRunner<'a, M: CompletionModel + ?Sized> {
    model: &'a M,
    log: JobLog,
    cancel: CancelToken,
    show_progress: bool,
}

impl<'a, M: CompletionModel + ?Sized> BatchRunner<'a, M> {
    pub fn new(model: &'a M, log: JobLog) -> Self {
        Self {
            model,
            log,
            cancel: CancelToken::new(),
            show_progress: true,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn log(&self) -> &JobLog {
        &self.log
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
                .expect("valid progress template")
                .progress_chars("##-"),
        );
        pb
    }

    /// Process `items` in order. Fatal errors abort; cancellation stops early
    /// and still returns the stats gathered so far.
    pub async fn run<S: Stage>(&mut self, stage: &S, items: Vec<S::Item>) -> Result<RunStats> {
        let start = Instant::now();
        let mut stats = RunStats::new(items.len());

        info!(
            stage = stage.name(),
            total_items = items.len(),
            already_logged = self.log.done_count(),
            log = %self.log.path().display(),
            "Starting stage"
        );

        let pb = self.progress_bar(items.len());

        for item in &items {
            let id = stage.item_id(item);
            pb.inc(1);

            if self.log.is_done(id) {
                stats.already_done += 1;
                continue;
            }

            if self.cancel.is_cancelled() {
                stats.interrupted = true;
                break;
            }

            let request = match stage.prepare(item)? {
                Prepared::Request(request) => request,
                Prepared::Declined(reason) => {
                    warn!(id, %reason, "Declining item");
                    stats.declined += 1;
                    continue;
                }
            };

            match self.model.make_request(request).await {
                Ok(Some(result)) => {
                    let record = stage.finalize(item, result);
                    self.log.append(&record)?;
                    stats.appended += 1;
                    debug!(id, "Recorded item");
                }
                Ok(None) => {
                    warn!("skipping item {id}");
                    stats.exhausted += 1;
                }
                Err(PlotbenchError::Cancelled) => {
                    stats.interrupted = true;
                    break;
                }
                Err(e) => {
                    pb.abandon();
                    return Err(e);
                }
            }

            pb.set_message(format!(
                "logged: {}, skipped: {}",
                stats.appended,
                stats.exhausted + stats.declined
            ));
        }

        stats.runtime_secs = start.elapsed().as_secs_f64();

        if stats.interrupted {
            pb.abandon_with_message("Interrupted");
            warn!(
                stage = stage.name(),
                appended = stats.appended,
                remaining = stats.remaining(),
                "Stage interrupted, log is resumable"
            );
        } else {
            pb.finish_with_message(format!("Done! {} logged", stats.appended));
            info!(
                stage = stage.name(),
                appended = stats.appended,
                already_done = stats.already_done,
                exhausted = stats.exhausted,
                declined = stats.declined,
                runtime_secs = stats.runtime_secs,
                "Stage complete"
            );
        }

        Ok(stats)
    }
}
