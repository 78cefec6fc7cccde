use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use evaluatorq_core::{
	job, ContainsEvaluator, DataPoint, Evaluator, Evaluatorq, EvaluatorqBuilder, EvaluatorqConfig, ExactMatchEvaluator,
	HtmlReportSink, Job, JsonEvaluator, JsonFileSink, JsonlDataSource, LevenshteinEvaluator, RegexEvaluator, StoreSink,
};
use globset::{GlobBuilder, GlobMatcher};
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Debug, Parser)]
#[command(name = "evaluatorq", about = "Evaluate AI jobs against data points")]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Evaluate one job over a dataset
	Run(RunArgs),
	/// Discover evaluation files and execute each one as its own process
	Exec(ExecArgs),
}

#[derive(Debug, Clone, Parser)]
struct RunArgs {
	/// JSONL file, one `{ "inputs": {..}, "expected_output"?: .. }` per line
	#[arg(long)]
	data: Option<PathBuf>,

	/// YAML or JSON run configuration
	#[arg(long)]
	config: Option<PathBuf>,

	/// Run name shown in reports
	#[arg(long)]
	name: Option<String>,

	/// Data points (and jobs per data point) in flight
	#[arg(long)]
	parallelism: Option<usize>,

	/// Deadline for each job and evaluator call, in milliseconds
	#[arg(long)]
	job_timeout_ms: Option<u64>,

	/// HTTP job endpoint. Sends `{ "inputs": {..} }` and expects a JSON response.
	#[arg(long)]
	http_url: Option<String>,

	/// HTTP method for --http-url (GET or POST)
	#[arg(long, default_value = "POST")]
	http_method: String,

	/// Exact-match evaluator
	#[arg(long, action = ArgAction::SetTrue)]
	exact: bool,

	/// Levenshtein evaluator with the given minimum similarity (0.0..=1.0)
	#[arg(long)]
	levenshtein: Option<f64>,

	/// Output must contain the substring (case-sensitive)
	#[arg(long)]
	contains: Option<String>,

	/// Output must contain the substring (case-insensitive)
	#[arg(long)]
	contains_i: Option<String>,

	/// Output must match the regex
	#[arg(long)]
	regex: Option<String>,

	/// Output must be valid JSON
	#[arg(long, action = ArgAction::SetTrue)]
	json: bool,

	/// Output must validate against the JSON schema in this file
	#[arg(long)]
	json_schema: Option<PathBuf>,

	/// Write the full report as JSON
	#[arg(long)]
	json_out: Option<PathBuf>,

	/// Write a self-contained HTML report
	#[arg(long)]
	html_out: Option<PathBuf>,

	/// Persist the run to a SQLite database
	#[arg(long)]
	db: Option<PathBuf>,

	/// Upload the run to the platform (needs ORQ_API_KEY)
	#[arg(long, action = ArgAction::SetTrue)]
	upload: bool,

	/// Do not print result tables
	#[arg(long, action = ArgAction::SetTrue)]
	quiet: bool,
}

#[derive(Debug, Clone, Parser)]
struct ExecArgs {
	/// Directory to search
	#[arg(long, default_value = ".")]
	dir: PathBuf,

	/// Glob matched against file names and paths relative to --dir
	#[arg(long, default_value = "*.eval")]
	pattern: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with_writer(std::io::stderr)
		.init();

	let cli = Cli::parse();
	let code = match cli.command {
		Commands::Run(args) => run(args).await?,
		Commands::Exec(args) => exec(args).await?,
	};
	Ok(ExitCode::from(code))
}

async fn run(args: RunArgs) -> Result<u8> {
	let mut builder = match &args.config {
		Some(path) => {
			let config = EvaluatorqConfig::from_file(path)?.with_env_overrides()?;
			EvaluatorqBuilder::from_config(&config)
		}
		None => Evaluatorq::builder("evaluatorq"),
	};

	if let Some(name) = &args.name {
		builder = builder.name(name.clone());
	}
	if let Some(path) = &args.data {
		builder = builder.data_source(Arc::new(JsonlDataSource::new(path)));
	}
	if let Some(n) = args.parallelism {
		builder = builder.parallelism(n);
	}
	if let Some(ms) = args.job_timeout_ms {
		builder = builder.job_timeout(Duration::from_millis(ms));
	}
	if let Some(path) = &args.json_out {
		builder = builder.sink(Arc::new(JsonFileSink::new(path)));
	}
	if let Some(path) = &args.html_out {
		builder = builder.sink(Arc::new(HtmlReportSink::new(path)));
	}
	if let Some(path) = &args.db {
		builder = builder.sink(Arc::new(StoreSink::open(path)?));
	}
	if args.upload {
		builder = builder.upload(true);
	}
	if args.quiet {
		builder = builder.print(false);
	}

	let job = match &args.http_url {
		Some(url) => http_job(url.clone(), args.http_method.to_uppercase()),
		None => echo_job(),
	};
	let report = builder.job(job).evaluators(evaluators(&args).await?).build()?.run().await?;

	let outcome = report.outcome();
	if outcome.is_failed() {
		warn!(run = %report.name, "failure gate tripped");
	}
	Ok(outcome.exit_code() as u8)
}

async fn evaluators(args: &RunArgs) -> Result<Vec<Arc<dyn Evaluator>>> {
	let mut evaluators: Vec<Arc<dyn Evaluator>> = Vec::new();

	if args.exact {
		evaluators.push(Arc::new(ExactMatchEvaluator));
	}
	if let Some(min_similarity) = args.levenshtein {
		evaluators.push(Arc::new(LevenshteinEvaluator::new(min_similarity)));
	}
	if let Some(substring) = &args.contains {
		evaluators.push(Arc::new(ContainsEvaluator::new(substring.clone())));
	}
	if let Some(substring) = &args.contains_i {
		evaluators.push(Arc::new(ContainsEvaluator::case_insensitive(substring.clone())));
	}
	if let Some(pattern) = &args.regex {
		evaluators.push(Arc::new(RegexEvaluator::new(pattern)?));
	}
	if args.json {
		evaluators.push(Arc::new(JsonEvaluator::new()));
	}
	if let Some(path) = &args.json_schema {
		let content = tokio::fs::read_to_string(path)
			.await
			.with_context(|| format!("Failed to read schema {:?}", path))?;
		let schema: Value = serde_json::from_str(&content)?;
		evaluators.push(Arc::new(JsonEvaluator::with_schema(schema)?));
	}

	// Default to exact if nothing was requested
	if evaluators.is_empty() {
		evaluators.push(Arc::new(ExactMatchEvaluator));
	}
	Ok(evaluators)
}

fn http_job(url: String, method: String) -> Arc<dyn Job> {
	let client = reqwest::Client::new();
	job("http", move |data: &DataPoint, _row| {
		let client = client.clone();
		let url = url.clone();
		let method = method.clone();
		let inputs = Value::Object(data.inputs.clone());
		async move {
			let resp = match method.as_str() {
				"GET" => client.get(&url).query(&[("inputs", inputs.to_string())]).send().await?,
				_ => client.post(&url).json(&json!({ "inputs": inputs })).send().await?,
			};
			let status = resp.status();
			let body = resp.json::<Value>().await?;
			if !status.is_success() {
				anyhow::bail!("HTTP {}: {}", status.as_u16(), body);
			}
			Ok(body)
		}
	})
}

/// Returns the `input` field when present, otherwise all inputs.
fn echo_job() -> Arc<dyn Job> {
	job("echo", |data: &DataPoint, _row| {
		let output = data.input("input").cloned().unwrap_or_else(|| Value::Object(data.inputs.clone()));
		async move { Ok(output) }
	})
}

async fn exec(args: ExecArgs) -> Result<u8> {
	let files = discover(&args.dir, &args.pattern)?;
	if files.is_empty() {
		println!("No files matching {:?} under {:?}", args.pattern, args.dir);
		return Ok(0);
	}

	let mut failed = 0usize;
	for file in &files {
		info!(file = %file.display(), "executing");
		match tokio::process::Command::new(file).status().await {
			Ok(status) if status.success() => println!("✓ {}", file.display()),
			Ok(status) => {
				failed += 1;
				println!("✗ {} ({})", file.display(), status);
			}
			Err(err) => {
				failed += 1;
				println!("✗ {} (could not start: {})", file.display(), err);
			}
		}
	}

	println!("{}/{} files passed", files.len() - failed, files.len());
	Ok(if failed > 0 { 1 } else { 0 })
}

/// Files under `dir` matching `pattern`, sorted by path. The pattern is tried
/// against the file name and against the path relative to `dir`, so both
/// `*.eval` and `smoke/**/*.eval` work.
fn discover(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
	let matcher = compile_pattern(pattern)?;
	let mut files = Vec::new();
	for entry in WalkDir::new(dir).follow_links(true) {
		let entry = entry?;
		if !entry.file_type().is_file() {
			continue;
		}
		let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
		if matcher.is_match(entry.file_name()) || matcher.is_match(relative) {
			files.push(entry.into_path());
		}
	}
	files.sort();
	Ok(files)
}

fn compile_pattern(pattern: &str) -> Result<GlobMatcher> {
	let glob = GlobBuilder::new(pattern)
		.literal_separator(true)
		.build()
		.with_context(|| format!("Invalid pattern {:?}", pattern))?;
	Ok(glob.compile_matcher())
}
