//! plotbench CLI - build and score the LLM plotting benchmark.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use plotbench::checkpoint::{JobLog, read_records};
use plotbench::client::tokenizer::uniform_bias;
use plotbench::client::{
    CancelToken, CompletionClient, GenerationArgs, HttpTransport, RequestBuilder, RetryPolicy,
    TiktokenTokenizer,
};
use plotbench::dataset::{DatasetLoader, read_task_responses};
use plotbench::models::{
    Config, JobRecord, JudgePrompts, PlotPrompts, PromptSet, RunStats, TaskPrompts,
};
use plotbench::pipeline::{BatchRunner, JudgeStage, PlotStage, TaskStage, read_plot_results};
use plotbench::scoring::{ScoreVocabulary, calc_bench_stats, gather_scores, scores_by_id, write_json};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

const TASKS_LOG: &str = "gpt_tasks.jsonl";
const PLOTS_LOG: &str = "gpt_plots.jsonl";
const PLOT_RESULTS_FILE: &str = "gpt_plots_results.json";
const JUDGE_LOG: &str = "benchmark_responses";
const SCORES_FILE: &str = "benchmark_results";
const STATS_FILE: &str = "benchmark_stat";

#[derive(Parser)]
#[command(name = "plotbench")]
#[command(version)]
#[command(about = "Benchmark LLM plotting code generation with a visual judge")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a task description for every raw datapoint
    Tasks {
        /// Dataset folder (defaults to paths.raw_dataset)
        #[arg(short, long)]
        dataset: Option<PathBuf>,

        /// Job log to append to
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Process at most this many datapoints
        #[arg(long)]
        limit: Option<usize>,

        /// Shuffle datapoints with this seed before limiting
        #[arg(long)]
        shuffle: Option<u64>,
    },

    /// Generate plotting code for every datapoint task
    Plots {
        /// Job log to append to
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Take tasks from a task-generation log instead of task.json
        #[arg(long)]
        task_log: Option<PathBuf>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        shuffle: Option<u64>,
    },

    /// Judge rendered plots against the ground truth
    Judge {
        /// Plot results JSON produced by the executor
        #[arg(short, long)]
        plot_results: Option<PathBuf>,

        /// Job log to append to
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Score judge responses and write benchmark statistics
    Scores {
        #[arg(short, long)]
        plot_results: Option<PathBuf>,

        /// Judge job log
        #[arg(short, long)]
        responses: Option<PathBuf>,

        /// Score file to write
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Statistics file to write
        #[arg(long)]
        stats: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn print_example_config() {
    let example = r#"# plotbench configuration file

[api]
# API key (can also use OPENAI_API_KEY env var or api_key_file)
# api_key = "${OPENAI_API_KEY}"
# api_key_file = "openai_token.txt"
base_url = "https://api.openai.com/v1"
model = "gpt-4o"
timeout_secs = 120

[retry]
max_attempts = 10
fallback_wait_secs = 20
rate_limit_multiplier = 1.5
max_total_wait_secs = 3600
max_iterations = 200

[generation]
# max_tokens = 2048
# temperature = 0.0

[paths]
raw_dataset = "data/valid_step_1"
dataset = "data/final"
out_folder = "out"

[prompts]
tasks = "prompts/task_gen.json"
plots = "prompts/plot_gen.json"
judge = "prompts/benchmark.json"

[judge]
logprobs = false
# highlighted_tokens = ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9", "10"]
logit_bias = 100
top_logprobs = 20
image_detail = "auto"
random_pairing = false
seed = 42
"#;
    println!("{example}");
}

fn load_config(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))
}

/// Cancel token tripped by Ctrl-C.
fn interrupt_token() -> CancelToken {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current step");
            trigger.cancel();
        }
    });
    cancel
}

fn default_args(config: &Config) -> GenerationArgs {
    GenerationArgs {
        max_tokens: config.generation.max_tokens,
        temperature: config.generation.temperature,
        ..Default::default()
    }
}

fn build_client(
    config: &Config,
    builder: RequestBuilder,
    cancel: &CancelToken,
) -> Result<CompletionClient<HttpTransport>> {
    let api_key = config
        .resolve_api_key()
        .context("Failed to resolve API key")?;

    let transport = HttpTransport::new(
        api_key,
        config.api.base_url.clone(),
        Duration::from_secs(config.api.timeout_secs),
    )?;

    Ok(CompletionClient::new(builder, transport)
        .with_policy(RetryPolicy::from(&config.retry))
        .with_cancel(cancel.clone()))
}

fn judge_suffix(config: &Config) -> &'static str {
    match (config.judge.logprobs, config.judge.random_pairing) {
        (false, false) => "",
        (true, false) => "_probs",
        (false, true) => "_random",
        (true, true) => "_probs_random",
    }
}

fn print_run_stats(title: &str, stats: &RunStats, log: &Path) {
    println!("\n=== {title} ===");
    println!("Items:       {}", stats.total_items);
    println!("Already:     {}", stats.already_done);
    println!("Logged:      {}", stats.appended);
    println!("Exhausted:   {}", stats.exhausted);
    println!("Declined:    {}", stats.declined);
    println!("Remaining:   {}", stats.remaining());
    if stats.interrupted {
        println!("Status:      interrupted (rerun to resume)");
    }
    println!("Runtime:     {:.1}s", stats.runtime_secs);
    println!("Log:         {log:?}");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print_example_config();
            return Ok(());
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;

            config
                .resolve_api_key()
                .context("Failed to resolve API key")?;

            PromptSet::<TaskPrompts>::from_file(&config.prompts.tasks)?;
            PromptSet::<PlotPrompts>::from_file(&config.prompts.plots)?;
            PromptSet::<JudgePrompts>::from_file(&config.prompts.judge)?;

            if config.judge.logprobs {
                let tokenizer = TiktokenTokenizer::for_model(&config.api.model)?;
                RequestBuilder::new(config.api.model.clone(), "").with_logit_bias(
                    &uniform_bias(&config.judge.highlighted_tokens, config.judge.logit_bias),
                    &tokenizer,
                )?;
                ScoreVocabulary::new(&config.judge.highlighted_tokens)?;
            }

            info!("Configuration is valid");
            info!("  Model: {} at {}", config.api.model, config.api.base_url);
            info!(
                "  Retry: {} attempts, {}s fallback, {}s total wait",
                config.retry.max_attempts,
                config.retry.fallback_wait_secs,
                config.retry.max_total_wait_secs
            );
            info!(
                "  Judge: logprobs={}, random pairing={}",
                config.judge.logprobs, config.judge.random_pairing
            );
            return Ok(());
        }

        Commands::Tasks {
            dataset,
            output,
            limit,
            shuffle,
        } => {
            let config = load_config(&cli.config)?;
            let cancel = interrupt_token();

            let prompts = PromptSet::<TaskPrompts>::from_file(&config.prompts.tasks)?;
            let builder = RequestBuilder::new(config.api.model.clone(), prompts.prompts.system_prompt.clone())
                .with_args(default_args(&config));
            let client = build_client(&config, builder, &cancel)?;

            let root = dataset.unwrap_or_else(|| config.paths.raw_dataset.clone());
            let mut loader = DatasetLoader::open(&root)?;
            if let Some(seed) = shuffle {
                loader = loader.shuffled(seed);
            }
            let datapoints = loader.limited(limit).load_all()?;

            let output = output.unwrap_or_else(|| config.paths.out_folder.join(TASKS_LOG));
            let log = JobLog::open(&output, Some(&prompts.header))?;

            let stage = TaskStage::new(prompts.prompts);
            let mut runner = BatchRunner::new(&client, log).with_cancel(cancel);
            let stats = runner.run(&stage, datapoints).await?;

            print_run_stats("Task Generation", &stats, &output);
        }

        Commands::Plots {
            output,
            task_log,
            limit,
            shuffle,
        } => {
            let config = load_config(&cli.config)?;
            let cancel = interrupt_token();

            let prompts = PromptSet::<PlotPrompts>::from_file(&config.prompts.plots)?;
            let builder = RequestBuilder::new(config.api.model.clone(), prompts.prompts.system_prompt.clone())
                .with_args(default_args(&config));
            let client = build_client(&config, builder, &cancel)?;

            let mut loader = DatasetLoader::open(&config.paths.dataset)?;
            if let Some(seed) = shuffle {
                loader = loader.shuffled(seed);
            }
            let datapoints = loader.limited(limit).load_all()?;

            let generated = match &task_log {
                Some(path) => Some(
                    read_task_responses(path)
                        .with_context(|| format!("Failed to read task log {path:?}"))?,
                ),
                None => None,
            };

            let stage = PlotStage::new(prompts.prompts);
            let items = stage.items(&datapoints, generated.as_ref())?;

            let output = output.unwrap_or_else(|| config.paths.out_folder.join(PLOTS_LOG));
            let log = JobLog::open(&output, Some(&prompts.header))?;

            let mut runner = BatchRunner::new(&client, log).with_cancel(cancel);
            let stats = runner.run(&stage, items).await?;

            print_run_stats("Plot Code Generation", &stats, &output);
        }

        Commands::Judge {
            plot_results,
            output,
        } => {
            let config = load_config(&cli.config)?;
            let cancel = interrupt_token();

            let prompts = PromptSet::<JudgePrompts>::from_file(&config.prompts.judge)?;
            let stage = JudgeStage::new(prompts.prompts.clone(), &config.judge);

            let mut builder = RequestBuilder::new(config.api.model.clone(), prompts.prompts.system_prompt.clone())
                .with_args(stage.args().merged_over(&default_args(&config)));
            if config.judge.logprobs {
                let tokenizer = TiktokenTokenizer::for_model(&config.api.model)?;
                builder = builder.with_logit_bias(
                    &uniform_bias(&config.judge.highlighted_tokens, config.judge.logit_bias),
                    &tokenizer,
                )?;
            }
            let client = build_client(&config, builder, &cancel)?;

            let plot_results_path =
                plot_results.unwrap_or_else(|| config.paths.out_folder.join(PLOT_RESULTS_FILE));
            let results = read_plot_results(&plot_results_path)?;
            let dataset = DatasetLoader::open(&config.paths.dataset)?;
            let items = stage.items(&results, &dataset)?;

            let output = output.unwrap_or_else(|| {
                config
                    .paths
                    .out_folder
                    .join(format!("{JUDGE_LOG}{}.jsonl", judge_suffix(&config)))
            });
            let log = JobLog::open(&output, Some(&prompts.header))?;

            let mut runner = BatchRunner::new(&client, log).with_cancel(cancel);
            let stats = runner.run(&stage, items).await?;

            print_run_stats("Visual Judging", &stats, &output);
        }

        Commands::Scores {
            plot_results,
            responses,
            output,
            stats,
        } => {
            let config = load_config(&cli.config)?;
            let out = &config.paths.out_folder;
            let suffix = judge_suffix(&config);

            let plot_results_path = plot_results.unwrap_or_else(|| out.join(PLOT_RESULTS_FILE));
            let responses_path = responses.unwrap_or_else(|| out.join(format!("{JUDGE_LOG}{suffix}.jsonl")));
            let scores_path = output.unwrap_or_else(|| out.join(format!("{SCORES_FILE}{suffix}.json")));
            let stats_path = stats.unwrap_or_else(|| out.join(format!("{STATS_FILE}{suffix}.json")));

            let results = read_plot_results(&plot_results_path)?;
            let judged: Vec<JobRecord> = read_records(&responses_path)
                .with_context(|| format!("Failed to read judge log {responses_path:?}"))?;
            let vocabulary = ScoreVocabulary::new(&config.judge.highlighted_tokens)?;

            let records = gather_scores(&results, &judged, &vocabulary);
            let bench = calc_bench_stats(&records);

            write_json(&scores_path, &scores_by_id(&records))?;
            write_json(&stats_path, &bench)?;

            let fmt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"));
            println!("\n=== Benchmark Scores ===");
            println!("Items:       {}", bench.num_items);
            println!("Mean:        {}", fmt(bench.mean_score));
            println!("Median:      {}", fmt(bench.median_score));
            println!("Min / Max:   {} / {}", fmt(bench.min_score), fmt(bench.max_score));
            println!("Errors:      {} ({:.1}%)", bench.error_number, bench.error_rate * 100.0);
            println!("Unparsed:    {}", bench.unparsed);
            println!("Scores:      {scores_path:?}");
            println!("Stats:       {stats_path:?}");
        }
    }

    Ok(())
}
