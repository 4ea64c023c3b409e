//! Questionnaire service
//!
//! A WhatsApp-facing backend that walks users through a bilingual
//! (French/Spanish) business diagnostic, answering side questions from a
//! knowledge base along the way.

mod api;
mod config;
mod contacts;
mod db;
mod language;
mod llm;
mod questionnaire;
mod retrieval;
mod router;
mod runtime;
mod session;
mod state_machine;
mod store;

use api::{create_router, AppState};
use config::Config;
use contacts::{HttpContextLookup, NoContextLookup};
use db::{AuditLog, SqliteAuditSink};
use language::{KeywordDetector, LanguageResolver};
use llm::{LlmService, LoggingService, OpenAiEmbedder, OpenAiService};
use retrieval::{PineconeIndex, RagRetriever, UnconfiguredRetriever};
use router::{HeuristicClassifier, IntentRouter};
use runtime::{
    Capabilities, ContextLookup, IntentClassifier, LanguageDetector, LlmIntentClassifier,
    LlmLanguageDetector, Orchestrator, OrchestratorSettings, Retriever,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use store::{RedisBackend, SessionStore};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "questionnaire_service=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = Config::from_env()?;

    // Session store
    let store = match &config.redis_url {
        Some(url) => {
            tracing::info!(prefix = %config.key_prefix, "Using Redis session store");
            SessionStore::new(Arc::new(RedisBackend::open(url)?), config.store_settings())
        }
        None => {
            tracing::warn!("REDIS_URL not set, sessions are kept in process memory only");
            SessionStore::memory_only(config.store_settings())
        }
    };

    // Text-completion backed capabilities, with offline fallbacks
    let llm: Option<Arc<dyn LlmService>> = match &config.llm.openai_api_key {
        Some(key) => {
            let service = OpenAiService::new(
                key.clone(),
                &config.llm.base_url,
                config.llm.chat_model.clone(),
            )?;
            let service: Arc<dyn LlmService> = Arc::new(LoggingService::new(Arc::new(service)));
            Some(service)
        }
        None => {
            tracing::warn!("OPENAI_API_KEY not set, using keyword heuristics for intent and language");
            None
        }
    };

    let classifier: Arc<dyn IntentClassifier> = match &llm {
        Some(llm) => Arc::new(LlmIntentClassifier::new(llm.clone())),
        None => Arc::new(HeuristicClassifier),
    };
    let detector: Arc<dyn LanguageDetector> = match &llm {
        Some(llm) => Arc::new(LlmLanguageDetector::new(llm.clone())),
        None => Arc::new(KeywordDetector),
    };

    let retriever = build_retriever(&config, llm.as_ref())?;

    let contacts: Arc<dyn ContextLookup> = match &config.contacts_base_url {
        Some(url) => Arc::new(HttpContextLookup::new(url)?),
        None => Arc::new(NoContextLookup),
    };

    // Audit log
    if let Some(parent) = PathBuf::from(&config.audit_db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::info!(path = %config.audit_db_path, "Opening audit log");
    let audit_log = AuditLog::open(&config.audit_db_path)?;

    let capabilities = Capabilities {
        router: IntentRouter::new(
            classifier,
            retriever,
            config.timeouts.classify,
            config.timeouts.retrieval,
        ),
        resolver: LanguageResolver::new(detector, config.fallback_language, config.timeouts.language),
        contacts,
        audit: Arc::new(SqliteAuditSink::new(audit_log.clone())),
    };
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(store),
        capabilities,
        Arc::new(config.questionnaire.clone()),
        OrchestratorSettings::from_config(&config),
    ));
    tracing::info!(
        questions = orchestrator.total_questions(),
        fallback_language = %config.fallback_language,
        aside_mode = ?config.aside_mode,
        "Orchestrator ready"
    );

    let shutdown = CancellationToken::new();
    spawn_sweeper(orchestrator.clone(), shutdown.clone());
    spawn_signal_handler(shutdown.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(AppState::new(orchestrator, Some(audit_log)))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Questionnaire service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

fn build_retriever(
    config: &Config,
    llm: Option<&Arc<dyn LlmService>>,
) -> Result<Arc<dyn Retriever>, Box<dyn std::error::Error>> {
    let knowledge = &config.knowledge;
    let (Some(llm), Some(openai_key), Some(host), Some(index_key)) = (
        llm,
        &config.llm.openai_api_key,
        &knowledge.index_host,
        &knowledge.pinecone_api_key,
    ) else {
        tracing::warn!("Knowledge base not configured, side questions will get a fallback reply");
        return Ok(Arc::new(UnconfiguredRetriever));
    };

    let embedder = OpenAiEmbedder::new(
        openai_key.clone(),
        &config.llm.base_url,
        config.llm.embedding_model.clone(),
    )?;
    let index = PineconeIndex::new(host, index_key.clone(), knowledge.namespace.clone())?;
    Ok(Arc::new(RagRetriever::new(
        Arc::new(embedder),
        Arc::new(index),
        llm.clone(),
        knowledge.top_k,
    )))
}

/// Periodically evict expired sessions from the local cache
fn spawn_sweeper(orchestrator: Arc<Orchestrator>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let removed = orchestrator.sweep_expired();
                    if removed > 0 {
                        tracing::debug!(removed, "Swept expired local sessions");
                    }
                }
            }
        }
    });
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown requested");
        shutdown.cancel();
    });
}
