//! CLI binary for docquery.
//!
//! A thin shim over the library crate: `serve` runs the HTTP API, `ask`
//! runs one query locally and prints the decisions.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use docquery::{
    serve, DecisionRecord, EmbeddingBackend, FastEmbedModel, QueryConfig, QueryEngine,
    QueryProgressCallback, QueryRequest,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per question.
/// Questions may finish out of order when `--concurrency` is above 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    /// Spinner until `on_query_start` reports the question count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Fetching and indexing document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} questions  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Answering");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_millis() as f64 / 1000.0)
            .unwrap_or(0.0)
    }
}

impl QueryProgressCallback for CliProgressCallback {
    fn on_query_start(&self, total_questions: usize) {
        self.activate_bar(total_questions);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Answering {total_questions} questions…"))
        ));
    }

    fn on_question_start(&self, index: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(format!("question {}", index + 1));
    }

    fn on_question_complete(&self, index: usize, total: usize, record: &DecisionRecord) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} Question {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            index + 1,
            total,
            record.decision,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_question_error(&self, index: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(index);
        // Truncate very long error messages to keep output tidy.
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Question {:>3}/{:<3}  {}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_query_complete(&self, total_questions: usize, success_count: usize) {
        let failed = total_questions.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} questions answered",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} questions answered  ({} failed)",
                if failed == total_questions {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_questions,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP API on port 8000
  docquery serve --bind 0.0.0.0:8000

  # Ask two questions about a remote policy
  docquery ask https://example.com/policy.pdf \
      -q "What is the grace period for premium payment?" \
      -q "Is cataract surgery covered?"

  # JSON output, larger retrieval window, specific model
  docquery ask https://example.com/policy.pdf -q "..." --json --top-k 8 --model gpt-4.1-mini

  # Embeddings through a local Ollama server instead of the bundled model
  docquery serve --embedding ollama --ollama-model nomic-embed-text

  # No model download at all (feature-hashing embeddings)
  docquery serve --embedding hashing

API:
  POST /api/v1/hackrx/run   {"documents": "<url>", "questions": ["..."]}
  GET  /health

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  RUST_LOG                Log filter, e.g. docquery=debug

  Every flag also reads DOCQUERY_<FLAG>; a .env file in the working
  directory is loaded first.
"#;

/// Answer questions about remote PDFs with retrieval-augmented LLM decisions.
#[derive(Parser, Debug)]
#[command(
    name = "docquery",
    version,
    about = "Answer questions about remote PDFs with retrieval-augmented LLM decisions",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    query: QueryArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCQUERY_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true, env = "DOCQUERY_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "DOCQUERY_BIND", default_value = "0.0.0.0:8000")]
        bind: String,
    },

    /// Answer questions about one document and print the decisions.
    Ask {
        /// HTTP/HTTPS URL of the PDF.
        url: String,

        /// Question to ask (repeatable).
        #[arg(short = 'q', long = "question", required = true)]
        questions: Vec<String>,

        /// Output the raw JSON response.
        #[arg(long, env = "DOCQUERY_JSON")]
        json: bool,

        /// Disable progress bar.
        #[arg(long, env = "DOCQUERY_NO_PROGRESS")]
        no_progress: bool,
    },
}

/// Settings shared by `serve` and `ask`.
#[derive(Args, Debug)]
struct QueryArgs {
    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, global = true, env = "DOCQUERY_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "DOCQUERY_PROVIDER")]
    provider: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, global = true, env = "DOCQUERY_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Max LLM output tokens per question.
    #[arg(long, global = true, env = "DOCQUERY_MAX_TOKENS", default_value_t = 1024)]
    max_tokens: usize,

    /// Retries per question on LLM failure or timeout (0-10).
    #[arg(long, global = true, env = "DOCQUERY_MAX_RETRIES", default_value_t = 2,
          value_parser = clap::value_parser!(u32).range(0..=10))]
    max_retries: u32,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, global = true, env = "DOCQUERY_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Chunks retrieved per question (1–20).
    #[arg(long, global = true, env = "DOCQUERY_TOP_K", default_value_t = 4,
          value_parser = clap::value_parser!(u32).range(1..=20))]
    top_k: u32,

    /// Maximum chunk length in characters.
    #[arg(long, global = true, env = "DOCQUERY_CHUNK_SIZE", default_value_t = 1000)]
    chunk_size: usize,

    /// Characters shared between neighbouring chunks.
    #[arg(long, global = true, env = "DOCQUERY_CHUNK_OVERLAP", default_value_t = 200)]
    chunk_overlap: usize,

    /// Embedding backend.
    #[arg(long, global = true, env = "DOCQUERY_EMBEDDING", value_enum, default_value = "fastembed")]
    embedding: EmbeddingArg,

    /// Sentence-transformer model for `--embedding fastembed`.
    #[arg(long, global = true, env = "DOCQUERY_FASTEMBED_MODEL", value_enum, default_value = "all-minilm-l6-v2")]
    fastembed_model: FastEmbedArg,

    /// Where `--embedding fastembed` keeps downloaded model files.
    #[arg(long, global = true, env = "DOCQUERY_FASTEMBED_CACHE")]
    fastembed_cache: Option<PathBuf>,

    /// Vector size of the hashing embedder.
    #[arg(long, global = true, env = "DOCQUERY_HASHING_DIMENSIONS", default_value_t = 384)]
    hashing_dimensions: usize,

    /// Ollama base URL for `--embedding ollama`.
    #[arg(long, global = true, env = "DOCQUERY_OLLAMA_URL", default_value = "http://localhost:11434")]
    ollama_url: String,

    /// Ollama embedding model for `--embedding ollama`.
    #[arg(long, global = true, env = "DOCQUERY_OLLAMA_MODEL", default_value = "nomic-embed-text")]
    ollama_model: String,

    /// Questions evaluated at once; answers keep input order.
    #[arg(short, long, global = true, env = "DOCQUERY_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// HTTP download timeout in seconds.
    #[arg(long, global = true, env = "DOCQUERY_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-question LLM call timeout in seconds.
    #[arg(long, global = true, env = "DOCQUERY_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Largest accepted document in MiB.
    #[arg(long, global = true, env = "DOCQUERY_MAX_DOCUMENT_MB", default_value_t = 50)]
    max_document_mb: u64,

    /// Path to libpdfium (file or directory).
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum EmbeddingArg {
    Fastembed,
    Hashing,
    Ollama,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FastEmbedArg {
    #[value(name = "all-minilm-l6-v2")]
    AllMiniLmL6V2,
    #[value(name = "bge-small-en-v1.5")]
    BgeSmallEnV15,
    #[value(name = "bge-base-en-v1.5")]
    BgeBaseEnV15,
}

impl From<FastEmbedArg> for FastEmbedModel {
    fn from(arg: FastEmbedArg) -> Self {
        match arg {
            FastEmbedArg::AllMiniLmL6V2 => FastEmbedModel::AllMiniLmL6V2,
            FastEmbedArg::BgeSmallEnV15 => FastEmbedModel::BgeSmallEnV15,
            FastEmbedArg::BgeBaseEnV15 => FastEmbedModel::BgeBaseEnV15,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine; flags and the real environment still apply.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active.
    let show_progress = match &cli.command {
        Command::Ask {
            json, no_progress, ..
        } => !cli.quiet && !*no_progress && !*json,
        Command::Serve { .. } => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve { ref bind } => {
            let config = build_config(&cli.query, None).await?;
            let engine = QueryEngine::from_config(config).context("Failed to initialise engine")?;
            let listener = tokio::net::TcpListener::bind(bind)
                .await
                .with_context(|| format!("Failed to bind {bind}"))?;
            serve(listener, Arc::new(engine))
                .await
                .context("Server error")?;
        }
        Command::Ask {
            ref url,
            ref questions,
            json,
            ..
        } => {
            let progress = if show_progress {
                Some(CliProgressCallback::new_dynamic() as Arc<dyn QueryProgressCallback>)
            } else {
                None
            };
            let config = build_config(&cli.query, progress).await?;
            let engine = QueryEngine::from_config(config).context("Failed to initialise engine")?;

            let request = QueryRequest {
                documents: url.clone(),
                questions: questions.clone(),
            };
            let response = engine.run(&request).await.context("Query failed")?;

            if json {
                let out = serde_json::to_string_pretty(&response)
                    .context("Failed to serialise response")?;
                println!("{out}");
            } else {
                for (question, answer) in request.questions.iter().zip(&response.answers) {
                    print_answer(question, answer);
                }
            }
        }
    }

    Ok(())
}

fn print_answer(question: &str, answer: &DecisionRecord) {
    let label = match answer.decision.as_str() {
        "approved" => green("APPROVED"),
        "rejected" => red("REJECTED"),
        other => cyan(&other.to_uppercase()),
    };
    println!("{} {}", bold("Q:"), question);
    println!("   {}  {}", label, answer.justification);
    if let Some(amount) = answer.amount {
        println!("   {} {}", dim("amount:"), amount);
    }
    for clause in &answer.clauses_used {
        println!("   {} {}", dim("›"), dim(clause));
    }
    println!();
}

/// Map CLI args to `QueryConfig`.
async fn build_config(
    args: &QueryArgs,
    progress: Option<Arc<dyn QueryProgressCallback>>,
) -> Result<QueryConfig> {
    let system_prompt = if let Some(ref path) = args.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let embedding = match args.embedding {
        EmbeddingArg::Fastembed => EmbeddingBackend::FastEmbed {
            model: args.fastembed_model.into(),
            cache_dir: args.fastembed_cache.clone(),
        },
        EmbeddingArg::Hashing => EmbeddingBackend::Hashing {
            dimensions: args.hashing_dimensions,
        },
        EmbeddingArg::Ollama => EmbeddingBackend::Ollama {
            base_url: args.ollama_url.clone(),
            model: args.ollama_model.clone(),
        },
    };

    let mut builder = QueryConfig::builder()
        .temperature(args.temperature)
        .max_tokens(args.max_tokens)
        .max_retries(args.max_retries)
        .top_k(args.top_k as usize)
        .chunk_size(args.chunk_size)
        .chunk_overlap(args.chunk_overlap)
        .embedding(embedding)
        .concurrency(args.concurrency)
        .download_timeout_secs(args.download_timeout)
        .api_timeout_secs(args.api_timeout)
        .max_document_bytes(args.max_document_mb * 1024 * 1024);

    if let Some(ref model) = args.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref path) = args.pdfium_lib_path {
        builder = builder.pdfium_lib_path(path);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
