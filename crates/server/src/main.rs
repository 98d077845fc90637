//! Parley Server Entry Point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use parley_config::{load_settings, Settings};
use parley_llm::{OpenAiClient, OpenAiClientConfig, OpenAiGenerator, OpenAiGeneratorConfig};
use parley_persistence::{ConversationRepository, InMemoryConversationRepository, PgConfig};
use parley_pipeline::{
    OpenAiSynthesizer, OpenAiSynthesizerConfig, OpenAiTranscriber, OpenAiTranscriberConfig,
    PipelineConfig, PipelineError, TurnPipeline,
};
use parley_server::{create_router, init_metrics, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
    let env = std::env::var("PARLEY_ENV").ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => {
            // Tracing not yet initialized
            eprintln!(
                "Loaded configuration from files (env: {})",
                env.as_deref().unwrap_or("default")
            );
            settings
        }
        Err(e) => {
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };

    init_tracing(&config);

    tracing::info!("Starting Parley Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        environment = ?config.environment,
        config_path = env.as_deref().unwrap_or("default"),
        "Configuration loaded"
    );

    let metrics = if config.observability.metrics_enabled {
        match init_metrics() {
            Ok(handle) => {
                tracing::info!("Initialized Prometheus metrics at /metrics");
                Some(handle)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Metrics disabled");
                None
            }
        }
    } else {
        None
    };

    let repo = init_repository(&config).await;
    let pipeline = Arc::new(build_pipeline(&config, repo)?);
    tracing::info!(
        backend = pipeline.backend(),
        model = %config.providers.openai.chat_model,
        "Initialized turn pipeline"
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    let app = create_router(AppState::new(config, pipeline.clone()).with_metrics(metrics));

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Open response streams only end once their turns are cancelled
    let signal_pipeline = pipeline.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_pipeline.cancel_all();
        })
        .await?;

    if !pipeline.shutdown(grace).await {
        tracing::warn!("Some turn finalizers did not complete");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.observability.log_level;
        format!("parley={},tower_http=debug", level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}

/// Postgres when enabled and reachable, in-memory otherwise
async fn init_repository(config: &Settings) -> Arc<dyn ConversationRepository> {
    let persistence = &config.persistence;
    if !persistence.enabled {
        tracing::info!("Persistence disabled, using in-memory conversation store");
        return Arc::new(InMemoryConversationRepository::new());
    }

    tracing::info!("Initializing Postgres persistence layer...");
    let pg = PgConfig {
        url: persistence.database_url.clone(),
        max_connections: persistence.max_connections,
        acquire_timeout: Duration::from_secs(persistence.acquire_timeout_secs),
    };

    match parley_persistence::init(&pg, persistence.ensure_schema).await {
        Ok(layer) => {
            tracing::info!(
                max_connections = persistence.max_connections,
                ensure_schema = persistence.ensure_schema,
                "Postgres persistence initialized"
            );
            Arc::new(layer.conversations)
        }
        Err(e) => {
            tracing::error!("Failed to initialize Postgres: {}. Falling back to in-memory.", e);
            Arc::new(InMemoryConversationRepository::new())
        }
    }
}

/// Wire the OpenAI adapters into a turn pipeline sharing one HTTP client
fn build_pipeline(
    config: &Settings,
    repo: Arc<dyn ConversationRepository>,
) -> Result<TurnPipeline, PipelineError> {
    let openai = &config.providers.openai;
    let stall_timeout = Duration::from_millis(config.conversation.stall_timeout_ms);
    let client = OpenAiClient::new(OpenAiClientConfig::from(openai))?;

    let generator = OpenAiGenerator::with_client(
        OpenAiGeneratorConfig::from_settings(openai, stall_timeout),
        client.clone(),
    );
    let transcriber = OpenAiTranscriber::new(
        OpenAiTranscriberConfig {
            model: openai.transcription_model.clone(),
            stall_timeout,
        },
        client.clone(),
    );
    let synthesizer = OpenAiSynthesizer::new(
        OpenAiSynthesizerConfig {
            model: openai.speech_model.clone(),
            instructions: openai.speech_instructions.clone(),
            stall_timeout,
        },
        client,
    );

    Ok(TurnPipeline::new(
        Arc::new(transcriber),
        Arc::new(generator),
        Arc::new(synthesizer),
        repo,
        PipelineConfig::from_settings(&config.conversation, openai.voice.clone()),
    ))
}
