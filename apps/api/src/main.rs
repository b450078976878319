mod config;
mod db;
mod errors;
mod interview;
mod llm_client;
mod models;
mod routes;
mod state;

use anyhow::Result;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::interview::checkpoint::{open_store, CheckpointStore};
use crate::interview::context::{CachedContextProvider, RedisContextCache, SupabaseContextProvider};
use crate::interview::engine::{EngineSettings, InterviewEngine};
use crate::interview::feedback::FeedbackGenerator;
use crate::interview::judgment::LlmJudgment;
use crate::interview::service::InterviewService;
use crate::llm_client::{LanguageModel, LlmClient};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting interview API v{}", env!("CARGO_PKG_VERSION"));

    // Checkpoint store (Postgres, or in-memory when unavailable)
    let store = open_store(config.database_url.as_deref()).await;
    info!("Checkpoint store: {}", store.backend());

    // Context cache
    let cache = match &config.redis_url {
        Some(url) => match redis::Client::open(url.as_str()) {
            Ok(client) => {
                info!("Redis context cache enabled (ttl {}s)", config.context_cache_ttl_secs);
                Some(RedisContextCache::new(client, config.context_cache_ttl_secs))
            }
            Err(e) => {
                warn!("Invalid REDIS_URL ({e}): context caching disabled");
                None
            }
        },
        None => None,
    };
    let context = Arc::new(CachedContextProvider::new(
        SupabaseContextProvider::new(config.supabase_rest_url(), config.supabase_anon_key.clone()),
        cache,
    ));

    // LLM client: the credential arrives with each request
    let model: Arc<dyn LanguageModel> = Arc::new(LlmClient::new(config.llm_api_base.clone()));
    info!("LLM client initialized ({})", config.llm_api_base);

    let engine = InterviewEngine::new(
        store.clone(),
        Arc::new(LlmJudgment::new(model.clone())),
        EngineSettings {
            max_round: config.max_round,
            enforce_round_limit: config.enforce_round_limit,
        },
    );
    info!(
        "Interview engine ready (max_round={}, enforce_round_limit={})",
        config.max_round, config.enforce_round_limit
    );

    let state = AppState {
        service: Arc::new(InterviewService::new(
            engine,
            context,
            FeedbackGenerator::new(model),
        )),
        config: config.clone(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = TcpListener::bind(addr).await?;
    serve_until(listener, app, store, shutdown_signal()).await?;
    info!("Shutdown complete");
    Ok(())
}

/// Serves until `signal` fires, then closes the checkpoint store whether the
/// server stopped cleanly or not.
async fn serve_until<F>(
    listener: TcpListener,
    app: Router,
    store: Arc<dyn CheckpointStore>,
    signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await;
    store.shutdown().await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::interview::turn_state::TurnState;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct ClosingStore {
        closed: AtomicBool,
    }

    #[async_trait]
    impl CheckpointStore for ClosingStore {
        fn backend(&self) -> &'static str {
            "closing"
        }

        fn is_durable(&self) -> bool {
            false
        }

        async fn load(&self, _: &str) -> Result<Option<TurnState>, AppError> {
            Ok(None)
        }

        async fn save(&self, _: &str, _: &TurnState) -> Result<(), AppError> {
            Ok(())
        }

        async fn delete(&self, _: &str) -> Result<(), AppError> {
            Ok(())
        }

        async fn shutdown(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_store_is_closed_when_server_stops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let store = Arc::new(ClosingStore::default());

        serve_until(listener, Router::new(), store.clone(), async {})
            .await
            .unwrap();

        assert!(store.closed.load(Ordering::SeqCst));
    }
}
