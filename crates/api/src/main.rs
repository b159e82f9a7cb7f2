mod admission;
mod config;
mod error;
mod firestore;
mod handlers;
mod middleware;
mod policy;
mod repos;
mod services;
mod state;
mod stores;
#[cfg(test)]
mod test_utils;
mod upstream;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http;
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    admission::AdmissionController,
    config::Config,
    policy::OriginPolicy,
    repos::{FirestoreReactionRepo, Repos},
    services::{GoogleIdentityProvider, IdTokenVerifier, JwksKeySource, OAuthClient},
    state::AppState,
    stores::{RedisRateLimiter, Stores},
};

#[derive(Parser)]
#[command(name = "reactions-api")]
#[command(about = "Per-page reaction counter")]
struct Args {
    /// Validate configuration and credentials, then exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = envy::prefixed("CLAPS_")
        .from_env::<Config>()
        .context("invalid or missing CLAPS_* configuration")?;

    // Initialize Sentry for error tracking (must be done early, guard must stay alive)
    let _sentry_guard = config.sentry_dsn.as_ref().map(|dsn| {
        sentry::init((
            dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: Some(config.env.clone().into()),
                ..Default::default()
            },
        ))
    });

    // Set up tracing: JSON in production, human-readable otherwise
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.is_production() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }

    let policy = OriginPolicy::from_config(&config)?;
    let oauth_client = OAuthClient::from_file(&config.oauth_client_secret_file)?;

    if args.check_config {
        tracing::info!(
            origins = ?policy.allowed_origins(),
            client_id = %oauth_client.client_id,
            "Configuration OK"
        );
        return Ok(());
    }

    let http_client = upstream::http_client(config.upstream_timeout())?;

    let firestore = match &config.firestore_emulator_host {
        Some(host) => {
            tracing::info!(%host, "Using Firestore emulator");
            firestore::Client::emulator(http_client.clone(), &config.project_id, host)
        }
        None => firestore::Client::new(http_client.clone(), &config.project_id),
    };
    let repos = Repos {
        reactions: Arc::new(FirestoreReactionRepo::new(firestore, &config.collection)),
    };

    let redis = redis::Client::open(config.redis_url())?;
    let stores = Stores {
        rate_limiter: Arc::new(RedisRateLimiter::new(redis, config.upstream_timeout())),
    };

    let identity = GoogleIdentityProvider::new(
        http_client.clone(),
        oauth_client,
        &config.oauth_redirect_uri,
    )?;
    let keys = JwksKeySource::new(http_client, &config.jwks_url, config.jwks_cache_ttl());
    let verifier = IdTokenVerifier::new(
        Box::new(keys),
        &config.oauth_issuer,
        identity.client_id(),
        &config.operator_email,
    );

    let state = AppState {
        config: config.clone(),
        policy: Arc::new(policy),
        admission: Arc::new(AdmissionController::from_config(&config)),
        repos,
        stores,
        identity: Arc::new(identity),
        verifier: Arc::new(verifier),
    };

    // Request ID header name
    let x_request_id = http::HeaderName::from_static("x-request-id");

    let app = handlers::router(state)
        // Request ID: generate UUID, include in logs, return in response
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &http::Request<axum::body::Body>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            },
        ))
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
        .layer(RequestBodyLimitLayer::new(1024)); // reactions carry no body

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
