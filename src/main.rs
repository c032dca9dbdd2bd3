use std::{net::SocketAddr, sync::Arc, time::Duration};

use adgate_backend::config::{Config, ConfigError};
use adgate_backend::db::{
    plan_repository::PlanRepository, postgres_job_repository::PostgresJobRepository,
    postgres_organization_repository::PostgresOrganizationRepository,
    postgres_plan_repository::PostgresPlanRepository,
    postgres_usage_repository::PostgresUsageRepository,
    postgres_webhook_event_repository::PostgresWebhookEventRepository,
};
use adgate_backend::responses::JsonResponse;
use adgate_backend::routes::api_router;
use adgate_backend::services::job_runner::HttpJobRunner;
use adgate_backend::state::AppState;
use adgate_backend::utils::plan_limits::PlanCatalog;
use adgate_backend::worker;
use anyhow::{anyhow, Context};
use axum::http::{header::CONTENT_TYPE, HeaderName, HeaderValue, Method};
use axum::response::IntoResponse;
use reqwest::Client;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Must outlive the server so buffered events are flushed on shutdown.
    let _sentry = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    init_tracing(&config);

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(config.rate_limit_ms)
            .burst_size(config.rate_limit_burst)
            .use_headers()
            .error_handler(|_err| {
                JsonResponse::too_many_requests(
                    "Too many requests. Please wait a moment and try again.",
                )
                .into_response()
            })
            .finish()
            .ok_or_else(|| anyhow!("invalid rate limiter settings"))?,
    );

    let governor_limiter = governor_conf.limiter().clone();
    std::thread::spawn(move || loop {
        std::thread::sleep(Duration::from_secs(60));
        governor_limiter.retain_recent();
    });

    let pg_pool = establish_connection(&config.database_url).await?;
    sqlx::migrate!("./migrations")
        .run(&pg_pool)
        .await
        .context("failed to run database migrations")?;

    let plans = PostgresPlanRepository {
        pool: pg_pool.clone(),
    }
    .list_plans()
    .await
    .map_err(ConfigError::Database)?;
    let plans = PlanCatalog::new(plans, &config.free_plan_code)?;

    let http_client = Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .context("failed to build HTTP client")?;
    let job_runner = HttpJobRunner::new(config.job_runner.clone(), &http_client);

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .frontend_origin
                .parse::<HeaderValue>()
                .context("FRONTEND_ORIGIN is not a valid header value")?,
        )
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static("x-organization-id")]);

    let bind_addr = config.bind_addr;
    let state = AppState {
        organizations: Arc::new(PostgresOrganizationRepository {
            pool: pg_pool.clone(),
        }),
        usage: Arc::new(PostgresUsageRepository {
            pool: pg_pool.clone(),
        }),
        jobs: Arc::new(PostgresJobRepository {
            pool: pg_pool.clone(),
        }),
        webhook_events: Arc::new(PostgresWebhookEventRepository { pool: pg_pool }),
        plans: Arc::new(plans),
        job_runner: Arc::new(job_runner),
        config: Arc::new(config),
    };

    worker::start_background_workers(state.clone()).await;

    let app = api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(cors);

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(%bind_addr, "listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json_layer = config
        .log_json
        .then(|| tracing_subscriber::fmt::layer().json());
    let text_layer = (!config.log_json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(sentry_tracing::layer())
        .init();
}

/// Establish a connection to the database and verify it.
async fn establish_connection(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPool::connect(database_url)
        .await
        .context("failed to connect to the database")?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("failed to verify database connection")?;

    info!("connected to the database");
    Ok(pool)
}
