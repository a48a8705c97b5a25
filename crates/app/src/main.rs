use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use regdoc_core::{
    build_index, create_embedder, AnthropicChatModel, Answer, ChatMessage, ConversationPipeline,
    Embedder, EmbeddingProviderKind, IndexStore, QueryError, Settings,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "regdoc", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: SettingsArgs,

    /// API key for the embeddings endpoint (openai-compatible provider only)
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,
}

#[derive(Args)]
struct SettingsArgs {
    /// Directory holding the persisted index
    #[arg(long, env = "REGDOC_INDEX_DIR", default_value = "regdoc_index")]
    index_dir: PathBuf,

    /// Maximum characters per chunk
    #[arg(long, env = "REGDOC_CHUNK_SIZE", default_value_t = regdoc_core::config::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Characters shared by consecutive chunks of a page
    #[arg(long, env = "REGDOC_CHUNK_OVERLAP", default_value_t = regdoc_core::config::DEFAULT_CHUNK_OVERLAP)]
    chunk_overlap: usize,

    /// Chunks retrieved per question
    #[arg(long, env = "REGDOC_TOP_K", default_value_t = regdoc_core::config::DEFAULT_TOP_K)]
    top_k: usize,

    /// Characters of chunk text shown in each citation
    #[arg(long, env = "REGDOC_EXCERPT_CHARS", default_value_t = regdoc_core::DEFAULT_EXCERPT_CHARS)]
    excerpt_chars: usize,

    /// Embedding provider
    #[arg(long, env = "REGDOC_EMBEDDING_PROVIDER", value_enum, default_value_t = EmbeddingProvider::CharNgram)]
    embedding_provider: EmbeddingProvider,

    /// Embedding model name for remote providers
    #[arg(long, env = "REGDOC_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,

    /// Embedding dimensions
    #[arg(long, env = "REGDOC_EMBEDDING_DIMENSIONS", default_value_t = regdoc_core::DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,

    /// Base URL of the embeddings endpoint
    #[arg(long, env = "REGDOC_EMBEDDING_ENDPOINT", default_value = regdoc_core::config::DEFAULT_EMBEDDING_ENDPOINT)]
    embedding_endpoint: String,

    /// Chat model used for answers
    #[arg(long, env = "REGDOC_CHAT_MODEL", default_value = regdoc_core::config::DEFAULT_CHAT_MODEL)]
    chat_model: String,

    /// Messages API URL
    #[arg(long, env = "REGDOC_CHAT_ENDPOINT", default_value = regdoc_core::config::DEFAULT_CHAT_ENDPOINT)]
    chat_endpoint: String,

    /// Sampling temperature
    #[arg(long, env = "REGDOC_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Maximum tokens per answer
    #[arg(long, env = "REGDOC_MAX_TOKENS", default_value_t = 2048)]
    max_tokens: u32,

    /// HTTP request timeout in seconds
    #[arg(long, env = "REGDOC_TIMEOUT_SECS", default_value_t = 60)]
    timeout_secs: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbeddingProvider {
    CharNgram,
    OpenaiCompatible,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk and embed every PDF in a folder.
    Ingest {
        /// Folder that contains PDFs recursively.
        #[arg(long, env = "REGDOC_DATA_DIR", default_value = "data")]
        folder: PathBuf,
        /// Discard the existing index before building.
        #[arg(long, default_value_t = false)]
        reset: bool,
    },
    /// Ask a single question and print the cited answer.
    Ask {
        /// Question text
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
        #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
        api_key: String,
    },
    /// Multi-turn conversation on stdin; an empty line ends it.
    Chat {
        #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
        api_key: String,
    },
    /// Show what the index holds.
    Status,
    /// Delete the persisted index.
    Reset,
}

impl SettingsArgs {
    fn into_settings(self) -> Settings {
        Settings {
            index_dir: self.index_dir,
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            top_k: self.top_k,
            excerpt_chars: self.excerpt_chars,
            embedding_provider: match self.embedding_provider {
                EmbeddingProvider::CharNgram => EmbeddingProviderKind::CharNgram,
                EmbeddingProvider::OpenaiCompatible => EmbeddingProviderKind::OpenAiCompatible,
            },
            embedding_model: self.embedding_model,
            embedding_dimensions: self.embedding_dimensions,
            embedding_endpoint: self.embedding_endpoint,
            chat_model: self.chat_model,
            chat_endpoint: self.chat_endpoint,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            request_timeout_secs: self.timeout_secs,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = cli.settings.into_settings();
    settings.validate()?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        index_dir = %settings.index_dir.display(),
        "regdoc boot"
    );

    // Built outside any runtime: the blocking embeddings client must not be
    // created or dropped inside async code.
    let embedder = create_embedder(&settings, cli.embedding_api_key)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Command::Ingest { folder, reset } => {
            let summary = build_index(&folder, reset, &settings, embedder.as_ref())
                .with_context(|| format!("ingesting {}", folder.display()))?;

            for skipped in &summary.skipped_files {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
            }

            println!(
                "{} document(s), {} page(s), {} chunk(s) ingested; index holds {} chunk(s) at {}",
                summary.documents,
                summary.pages,
                summary.chunks,
                summary.indexed_total,
                settings.index_dir.display()
            );
            if !summary.skipped_files.is_empty() {
                println!("{} file(s) skipped, see log", summary.skipped_files.len());
            }
        }
        Command::Ask { question, api_key } => {
            let pipeline = open_pipeline(&settings, embedder, &api_key)?;
            let question = question.join(" ");
            let answer = runtime.block_on(pipeline.answer(&question, &[]));
            print_answer(&explain(answer)?);
        }
        Command::Chat { api_key } => {
            let pipeline = open_pipeline(&settings, embedder, &api_key)?;
            let mut history: Vec<ChatMessage> = Vec::new();
            let stdin = io::stdin();

            loop {
                print!("> ");
                io::stdout().flush()?;

                let mut line = String::new();
                if stdin.lock().read_line(&mut line)? == 0 || line.trim().is_empty() {
                    break;
                }
                let question = line.trim().to_string();

                match runtime.block_on(pipeline.answer(&question, &history)) {
                    Ok(answer) => {
                        print_answer(&answer);
                        history.push(ChatMessage::user(question));
                        history.push(ChatMessage::assistant(answer.answer));
                    }
                    Err(error) => eprintln!("error: {error}"),
                }
            }
        }
        Command::Status => match IndexStore::new(&settings.index_dir).open() {
            Ok(index) => {
                let stats = index.stats();
                let manifest = index.manifest();
                println!("index: {}", settings.index_dir.display());
                println!("chunks: {}", stats.entries);
                println!("documents: {}", stats.sources);
                println!("embedding model: {} ({} dims)", stats.embedding_model, stats.dimensions);
                println!("updated: {}", manifest.updated_at.to_rfc3339());
                if stats.embedding_model != embedder.model_id() {
                    println!(
                        "warning: configured embedding model is {}; rebuild with `regdoc ingest --reset`",
                        embedder.model_id()
                    );
                }
            }
            Err(error) => println!("no usable index: {error}"),
        },
        Command::Reset => {
            let removed = IndexStore::new(&settings.index_dir).reset()?;
            if removed {
                println!("index at {} removed", settings.index_dir.display());
            } else {
                println!("no index at {}", settings.index_dir.display());
            }
        }
    }

    Ok(())
}

fn open_pipeline(
    settings: &Settings,
    embedder: Arc<dyn Embedder>,
    api_key: &str,
) -> anyhow::Result<ConversationPipeline> {
    let model = AnthropicChatModel::new(api_key, settings)?;
    match ConversationPipeline::open(settings, embedder, Arc::new(model)) {
        Ok(pipeline) => Ok(pipeline),
        Err(error) if error.is_missing_index() => Err(anyhow::anyhow!(
            "no documents indexed at {}; add PDFs and run `regdoc ingest --folder <dir>` first",
            settings.index_dir.display()
        )),
        Err(error) => Err(error.into()),
    }
}

fn explain(result: Result<Answer, QueryError>) -> anyhow::Result<Answer> {
    match result {
        Ok(answer) => Ok(answer),
        Err(QueryError::Service(error)) => {
            Err(anyhow::anyhow!(error).context("language model call failed"))
        }
        Err(error) => Err(error.into()),
    }
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        println!("\nSources:");
        for source in &answer.sources {
            println!("  - {}, Page {}", source.source, source.page);
        }
    }
}
