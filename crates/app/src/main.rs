use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use doc_chat_core::{
    stage_upload, Answer, AnswerEngine, AnswerStage, ChunkingConfig, FallbackAnswerer,
    GeminiClient, GeminiConfig, HashedNgramEmbedder, OcrBackend, OcrEndpointConfig, QueryError,
    RagConfig, TesseractOcr,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "doc-chat", version, about = "Ask questions about your documents")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding uploads and the vector index
    #[arg(long, env = "DOC_CHAT_DATA_DIR", default_value = "data", global = true)]
    data_dir: PathBuf,

    /// Name of the index inside the data directory
    #[arg(long, env = "DOC_CHAT_INDEX_NAME", default_value = "index", global = true)]
    index_name: String,

    /// Maximum characters per chunk
    #[arg(long, default_value_t = 1000, global = true)]
    chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, default_value_t = 200, global = true)]
    chunk_overlap: usize,

    /// Number of chunks retrieved per question
    #[arg(long, default_value_t = 3, global = true)]
    top_k: usize,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, global = true)]
    gemini_api_key: Option<String>,

    /// Gemini model used for answers
    #[arg(long, env = "DOC_CHAT_GEMINI_MODEL", default_value = "gemini-1.5-flash", global = true)]
    gemini_model: String,

    /// Gemini model used when the retrieval answer is rejected (defaults to --gemini-model)
    #[arg(long, env = "DOC_CHAT_FALLBACK_MODEL", global = true)]
    fallback_model: Option<String>,

    /// Base URL of the Gemini REST API
    #[arg(long, default_value = "https://generativelanguage.googleapis.com", global = true)]
    gemini_api_base: String,

    /// Sampling temperature sent to the model
    #[arg(long, global = true)]
    temperature: Option<f32>,

    /// Upper bound on generated tokens
    #[arg(long, global = true)]
    max_output_tokens: Option<u32>,

    /// Timeout for model and OCR HTTP requests
    #[arg(long, default_value_t = 60, global = true)]
    request_timeout_secs: u64,

    /// Answers shorter than this trigger the direct model call when --fallback is set
    #[arg(long, default_value_t = 3, global = true)]
    fallback_min_chars: usize,

    /// Tesseract binary used for image OCR
    #[arg(long, default_value = "tesseract", global = true)]
    tesseract_bin: PathBuf,

    /// Tesseract language pack, e.g. `eng`
    #[arg(long, global = true)]
    ocr_language: Option<String>,

    /// Multimodal OCR endpoint used instead of tesseract
    #[arg(long, env = "LLM_OCR_ENDPOINT", global = true)]
    ocr_endpoint: Option<String>,

    /// Bearer token for the OCR endpoint
    #[arg(long, env = "LLM_OCR_API_KEY", hide_env_values = true, global = true)]
    ocr_api_key: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a document, or every document under a folder.
    Ingest {
        /// File or folder to ingest.
        path: PathBuf,
        /// Source tag stored with the chunks (defaults to the file name).
        #[arg(long)]
        tag: Option<String>,
        /// Copy the file into the uploads directory before ingesting it.
        #[arg(long, default_value_t = false)]
        stage: bool,
    },
    /// Answer one question from the ingested documents.
    Ask {
        question: String,
        /// Ask the model directly when the retrieval answer fails or is too short.
        #[arg(long, default_value_t = false)]
        fallback: bool,
    },
    /// Interactive question loop; type `exit` or `quit` to leave.
    Chat {
        #[arg(long, default_value_t = false)]
        fallback: bool,
    },
    /// Show what the index contains.
    Status,
}

impl Cli {
    fn rag_config(&self) -> RagConfig {
        let timeout = Duration::from_secs(self.request_timeout_secs);
        let mut config = RagConfig::for_data_dir(&self.data_dir);

        config.index_name = self.index_name.clone();
        config.chunking = ChunkingConfig {
            size: self.chunk_size,
            overlap: self.chunk_overlap,
        };
        config.top_k = self.top_k;
        config.gemini = GeminiConfig {
            api_key: self.gemini_api_key.clone(),
            model: self.gemini_model.clone(),
            api_base: self.gemini_api_base.clone(),
            timeout,
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
        };
        config.fallback_model = self.fallback_model.clone();
        config.fallback_min_chars = self.fallback_min_chars;
        config.ocr = match non_blank(&self.ocr_endpoint) {
            Some(endpoint) => OcrBackend::Endpoint(OcrEndpointConfig {
                endpoint,
                api_key: non_blank(&self.ocr_api_key),
                timeout,
            }),
            None => OcrBackend::Tesseract(TesseractOcr {
                binary: self.tesseract_bin.clone(),
                language: self.ocr_language.clone(),
            }),
        };

        config
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

enum Responder {
    Retrieval(AnswerEngine<HashedNgramEmbedder, GeminiClient>),
    WithFallback(FallbackAnswerer<HashedNgramEmbedder, GeminiClient, GeminiClient>),
}

impl Responder {
    fn from_config(config: &RagConfig, fallback: bool) -> Result<Self, QueryError> {
        Ok(if fallback {
            Self::WithFallback(config.fallback_answerer()?)
        } else {
            Self::Retrieval(config.answer_engine()?)
        })
    }

    async fn respond(&self, question: &str) -> Result<Answer, QueryError> {
        match self {
            Self::Retrieval(engine) => engine.answer(question).await,
            Self::WithFallback(answerer) => {
                let outcome = answerer.answer(question).await?;
                if outcome.stage == AnswerStage::Direct {
                    info!("answered without document context");
                }
                Ok(outcome.answer)
            }
        }
    }
}

fn print_answer(answer: &Answer) {
    println!("Answer: {}", answer.text());

    let mut sources: Vec<&str> = Vec::new();
    for hit in answer.sources() {
        if !sources.contains(&hit.source.as_str()) {
            sources.push(&hit.source);
        }
    }
    if !sources.is_empty() {
        println!("sources: {}", sources.join(", "));
    }
}

async fn run_ingest(config: RagConfig, path: PathBuf, tag: Option<String>, stage: bool) -> anyhow::Result<()> {
    let started = Utc::now();

    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let pipeline = config.ingest_pipeline()?;

        if path.is_dir() {
            let report = pipeline.ingest_folder_best_effort(&path)?;
            for skipped in &report.skipped {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped document");
            }

            let segments: usize = report.ingested.iter().map(|doc| doc.segment_count).sum();
            println!(
                "{} documents ({} chunks) ingested, {} skipped",
                report.ingested.len(),
                segments,
                report.skipped.len()
            );
            return Ok(());
        }

        let source = if stage {
            stage_upload(&path, &config.upload_dir)?
        } else {
            path
        };

        let document = pipeline
            .ingest_file(&source, tag.as_deref())
            .with_context(|| format!("failed to ingest {}", source.display()))?;
        if document.previously_ingested {
            warn!(source = %document.source, "this content was already in the index");
        }

        println!(
            "{} ingested: {} chunks added, {} in index",
            document.source, document.segment_count, document.total_records
        );
        Ok(())
    })
    .await??;

    info!(elapsed_ms = (Utc::now() - started).num_milliseconds(), "ingestion finished");
    Ok(())
}

async fn run_chat(responder: &Responder) -> anyhow::Result<()> {
    println!("RAG Chatbot CLI");
    println!("Type 'exit' to quit.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("Your question: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }

        match responder.respond(question).await {
            Ok(answer) => print_answer(&answer),
            Err(error) => {
                warn!(%error, "question failed");
                println!("Error: {error}");
            }
        }
        println!();
    }

    Ok(())
}

fn print_status(config: &RagConfig) -> anyhow::Result<()> {
    let store = config.index_store();
    println!("index: {} ({})", store.name(), store.snapshot_path().display());

    match store.load()? {
        None => println!("no documents ingested yet"),
        Some(index) => {
            println!(
                "embedder: {} ({} dims)",
                index.metadata.embedder, index.metadata.dimensions
            );
            println!(
                "records: {}  documents: {}  updated: {}",
                index.len(),
                index.documents.len(),
                index.metadata.updated_at.to_rfc3339()
            );
            for document in &index.documents {
                println!(
                    "  {} chunks={} ingested_at={}",
                    document.source,
                    document.segment_count,
                    document.ingested_at.to_rfc3339()
                );
            }
        }
    }

    Ok(())
}

fn check_ingest_target(path: &Path, tag: Option<&str>, stage: bool) -> anyhow::Result<()> {
    anyhow::ensure!(path.exists(), "{} does not exist", path.display());
    if path.is_dir() {
        anyhow::ensure!(
            tag.is_none(),
            "--tag only applies to a single file; folder documents are tagged with their relative path"
        );
        anyhow::ensure!(!stage, "--stage only applies to a single file");
    }
    Ok(())
}

async fn has_documents(config: &RagConfig) -> anyhow::Result<bool> {
    let store = config.index_store();
    let index = tokio::task::spawn_blocking(move || store.load()).await??;
    Ok(index.is_some_and(|index| !index.is_empty()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = cli.rag_config();
    config.validate()?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        index = %config.index_name,
        "doc-chat boot"
    );

    match cli.command {
        Command::Ingest { path, tag, stage } => {
            check_ingest_target(&path, tag.as_deref(), stage)?;
            run_ingest(config, path, tag, stage).await?;
        }
        Command::Ask { question, fallback } => {
            if !has_documents(&config).await? {
                print_answer(&Answer::NoDocuments);
                return Ok(());
            }
            let responder = Responder::from_config(&config, fallback)?;
            let answer = responder.respond(&question).await?;
            print_answer(&answer);
        }
        Command::Chat { fallback } => {
            let responder = Responder::from_config(&config, fallback)?;
            run_chat(&responder).await?;
        }
        Command::Status => print_status(&config)?,
    }

    Ok(())
}
