mod actions;
mod config;
mod db;
mod errors;
mod finalize;
mod llm_client;
mod models;
mod pipeline;
mod pool;
mod profile;
mod routes;
mod scheduler;
mod scoring;
mod sources;
mod state;
mod store;
#[cfg(test)]
mod testing;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use std::sync::Arc;

use crate::actions::ActionContext;
use crate::config::Config;
use crate::db::create_pool;
use crate::finalize::{
    ArtifactStore, LlmTailor, ProfileTailor, S3ArtifactStore, Tailor, TailoringFinalizer,
};
use crate::llm_client::LlmClient;
use crate::pipeline::driver::PipelineDeps;
use crate::pipeline::scoring::ScoringStage;
use crate::pipeline::webhook::WebhookNotifier;
use crate::pipeline::PipelineDriver;
use crate::profile::{FileProfileLoader, ProfileLoader};
use crate::routes::build_router;
use crate::scoring::{JobScorer, KeywordJobScorer, LlmJobScorer, SponsorRegister};
use crate::sources::SourceRegistry;
use crate::state::AppState;
use crate::store::{JobStore, PgJobStore};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting JobFlow API v{}", env!("CARGO_PKG_VERSION"));

    // PostgreSQL (migrations applied on connect)
    let db = create_pool(&config.database_url).await?;
    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(db));

    // S3 / MinIO for rendered artifacts
    let s3 = build_s3_client(&config).await;
    let artifacts: Option<Arc<dyn ArtifactStore>> = config.pipeline.render_enabled.then(|| {
        Arc::new(S3ArtifactStore::new(s3, config.s3_bucket.clone())) as Arc<dyn ArtifactStore>
    });
    info!(render_enabled = artifacts.is_some(), "S3 client initialized");

    // Scoring and tailoring backends: Claude when a key is configured
    let (scorer, tailor): (Arc<dyn JobScorer>, Arc<dyn Tailor>) =
        match config.anthropic_api_key.clone() {
            Some(key) => {
                let llm = LlmClient::new(key)?;
                info!("LLM client initialized (model: {})", llm_client::MODEL);
                (
                    Arc::new(LlmJobScorer(llm.clone())),
                    Arc::new(LlmTailor(llm)),
                )
            }
            None => {
                warn!("ANTHROPIC_API_KEY not set, using keyword scoring and profile tailoring");
                (Arc::new(KeywordJobScorer), Arc::new(ProfileTailor))
            }
        };

    let sponsors = match &config.sponsor_register_path {
        Some(path) => SponsorRegister::load(path).await?,
        None => SponsorRegister::default(),
    };

    let profile: Arc<dyn ProfileLoader> =
        Arc::new(FileProfileLoader::new(config.profile_path.clone()));
    let scoring = ScoringStage::new(store.clone(), scorer, Arc::new(sponsors));
    let finalizer = Arc::new(TailoringFinalizer::new(
        store.clone(),
        profile.clone(),
        tailor,
        artifacts,
    ));

    let registry = SourceRegistry::from_config(&config)?;
    if registry.is_empty() {
        warn!("No source adapters configured; pipeline runs will only score stored jobs");
    }

    let pipeline = Arc::new(PipelineDriver::new(
        PipelineDeps {
            store: store.clone(),
            registry,
            scoring: scoring.clone(),
            finalizer: finalizer.clone(),
            profile: profile.clone(),
            webhook: WebhookNotifier::new(
                config.pipeline_webhook_url.clone(),
                config.webhook_secret.clone(),
            )?,
        },
        config.pipeline.clone(),
    ));

    if let Some(hour) = config.pipeline_schedule_hour {
        scheduler::spawn_daily(pipeline.clone(), hour);
        info!(hour, "Daily pipeline schedule enabled");
    }

    let state = AppState {
        pipeline,
        actions: ActionContext {
            store,
            scoring,
            finalizer,
            profile,
        },
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "jobflow-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
