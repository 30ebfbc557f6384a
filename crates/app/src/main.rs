mod page;
mod web;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use talkdocs_core::{
    CharacterNgramEmbedder, ChatEndpointConfig, ChatModel, ChunkingConfig, Embedder,
    EmbeddingEndpointConfig, HttpEmbedder, LocalBertEmbedder, OpenAiCompatibleChat, RunTracer,
    SessionSettings, TelemetryConfig, DEFAULT_CHAT_BASE_URL, DEFAULT_CHAT_MODEL,
    DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL, DEFAULT_MODEL_DIR, DEFAULT_TOP_K,
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmbeddingBackend {
    /// Sentence-transformer weights loaded from disk and run in process.
    Local,
    /// Sentence-transformer model behind an OpenAI-compatible embeddings API.
    Remote,
    /// Built-in character trigram hashing; no model needed.
    Ngram,
}

#[derive(Parser)]
#[command(name = "talkdocs", version, about = "Chat with multiple PDFs")]
struct Cli {
    /// Address the page is served on
    #[arg(long, env = "TALKDOCS_BIND", default_value = "127.0.0.1:8501")]
    bind: SocketAddr,

    /// API key for the hosted chat model
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    groq_api_key: String,

    /// OpenAI-compatible chat API base URL
    #[arg(long, env = "CHAT_BASE_URL", default_value = DEFAULT_CHAT_BASE_URL)]
    chat_base_url: String,

    /// Chat model name
    #[arg(long, env = "CHAT_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    chat_model: String,

    #[arg(long, env = "CHAT_TEMPERATURE")]
    chat_temperature: Option<f32>,

    /// Seconds before a chat request is abandoned
    #[arg(long, env = "CHAT_TIMEOUT_SECS", default_value_t = 60)]
    chat_timeout_secs: u64,

    #[arg(long, env = "EMBEDDING_BACKEND", value_enum, default_value_t = EmbeddingBackend::Local)]
    embedding_backend: EmbeddingBackend,

    /// Directory with config.json, tokenizer.json and the model weights
    #[arg(long, env = "EMBEDDING_MODEL_DIR", default_value = DEFAULT_MODEL_DIR)]
    embedding_model_dir: PathBuf,

    /// OpenAI-compatible embeddings API base URL
    #[arg(long, env = "EMBEDDING_URL", default_value = "http://localhost:8080/v1")]
    embedding_url: String,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,

    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// Seconds before an embeddings request is abandoned
    #[arg(long, env = "EMBEDDING_TIMEOUT_SECS", default_value_t = 60)]
    embedding_timeout_secs: u64,

    /// Number of chunks retrieved per question
    #[arg(long, env = "TALKDOCS_TOP_K", default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Cosmetic pause before a reply is shown
    #[arg(long, env = "TALKDOCS_REPLY_DELAY_MS", default_value_t = 1_500)]
    reply_delay_ms: u64,

    /// Seconds of inactivity before a browser session is dropped
    #[arg(long, env = "TALKDOCS_SESSION_IDLE_SECS", default_value_t = 60 * 60)]
    session_idle_secs: u64,

    /// Most browser sessions kept in memory at once
    #[arg(long, env = "TALKDOCS_MAX_SESSIONS", default_value_t = 256)]
    max_sessions: usize,

    /// Largest accepted upload request
    #[arg(long, env = "TALKDOCS_MAX_UPLOAD_BYTES", default_value_t = 50 * 1024 * 1024)]
    max_upload_bytes: usize,

    #[arg(long, env = "LANGSMITH_API_KEY", hide_env_values = true)]
    langsmith_api_key: Option<String>,

    #[arg(long, env = "LANGSMITH_TRACING_V2")]
    langsmith_tracing_v2: Option<String>,

    #[arg(long, env = "LANGSMITH_PROJECT")]
    langsmith_project: Option<String>,

    #[arg(long, env = "LANGSMITH_ENDPOINT")]
    langsmith_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let embedder: Arc<dyn Embedder> = match cli.embedding_backend {
        EmbeddingBackend::Local => {
            let model_dir = cli.embedding_model_dir.clone();
            let embedder = tokio::task::spawn_blocking(move || LocalBertEmbedder::load(model_dir))
                .await
                .context("embedding model loader panicked")?
                .with_context(|| {
                    format!(
                        "failed to load embedding model from {}",
                        cli.embedding_model_dir.display()
                    )
                })?;
            Arc::new(embedder)
        }
        EmbeddingBackend::Remote => Arc::new(
            HttpEmbedder::new(EmbeddingEndpointConfig {
                base_url: cli.embedding_url.clone(),
                model: cli.embedding_model.clone(),
                dimensions: cli.embedding_dimensions,
                api_key: cli.embedding_api_key.clone(),
                timeout: Duration::from_secs(cli.embedding_timeout_secs),
            })
            .context("failed to build embedding client")?,
        ),
        EmbeddingBackend::Ngram => Arc::new(CharacterNgramEmbedder::default()),
    };

    let model: Arc<dyn ChatModel> = Arc::new(
        OpenAiCompatibleChat::new(ChatEndpointConfig {
            base_url: cli.chat_base_url.clone(),
            api_key: cli.groq_api_key.clone(),
            model: cli.chat_model.clone(),
            temperature: cli.chat_temperature,
            timeout: Duration::from_secs(cli.chat_timeout_secs),
        })
        .context("failed to build chat client")?,
    );

    let tracer = match TelemetryConfig::from_parts(
        cli.langsmith_tracing_v2.as_deref(),
        cli.langsmith_api_key.clone(),
        cli.langsmith_project.clone(),
        cli.langsmith_endpoint.clone(),
    ) {
        Some(config) => match RunTracer::new(config) {
            Ok(tracer) => {
                info!(project = ?tracer.project(), "run tracing enabled");
                Some(Arc::new(tracer))
            }
            Err(error) => {
                warn!(%error, "run tracing disabled");
                None
            }
        },
        None => None,
    };

    let settings = SessionSettings {
        top_k: cli.top_k.max(1),
        chunking: ChunkingConfig::default(),
    };

    let limits = web::SessionLimits {
        idle_timeout: Duration::from_secs(cli.session_idle_secs.max(1)),
        max_sessions: cli.max_sessions.max(1),
    };

    let state = web::AppState::new(
        settings,
        limits,
        embedder.clone(),
        model.clone(),
        tracer,
        Duration::from_millis(cli.reply_delay_ms),
    );
    let app = web::router(state, cli.max_upload_bytes);

    let listener = TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("failed to bind {}", cli.bind))?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        address = %cli.bind,
        chat_model = model.model_name(),
        embedding_model = embedder.model_name(),
        "talkdocs boot"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("talkdocs shutting down");
        })
        .await
        .context("server error")?;

    Ok(())
}
