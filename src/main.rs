use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use kiro_gateway::auth::AuthCache;
use kiro_gateway::config::Config;
use kiro_gateway::crypto::Crypto;
use kiro_gateway::metrics::MetricsCollector;
use kiro_gateway::middleware;
use kiro_gateway::oauth_state::OAuthStateRegistry;
use kiro_gateway::orchestrator::Orchestrator;
use kiro_gateway::routes::{self, AppState};
use kiro_gateway::health;
use kiro_gateway::store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    config.validate()?;

    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("Kiro Gateway starting...");
    tracing::info!("Server configured: {}:{}", config.server_host, config.server_port);
    tracing::debug!("Debug mode: {:?}", config.debug_mode);

    let config = Arc::new(config);

    let crypto = Arc::new(Crypto::new(&config.token_encrypt_key, config.production)?);

    let store = Arc::new(Store::open(&config.db_file, crypto.clone())?);
    store.migrate().await.context("running database migrations")?;
    tracing::info!("Database opened and migrated at {}", config.db_file.display());

    let http = build_http_client(&config)?;
    let auth_cache = Arc::new(AuthCache::new(http.clone()));
    let oauth_states = Arc::new(OAuthStateRegistry::new());
    let metrics = Arc::new(MetricsCollector::new());

    if config.fallback_identity.refresh_token.is_some() {
        tracing::info!("Fallback Kiro identity is configured; per-user onboarding remains required for allocation");
    } else {
        tracing::info!("No fallback Kiro identity configured; every user must register their own credentials");
    }

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        auth_cache.clone(),
        crypto.clone(),
        http,
        config.clone(),
    ));

    let app_state = AppState {
        store: store.clone(),
        auth_cache: auth_cache.clone(),
        crypto,
        orchestrator,
        oauth_states: oauth_states.clone(),
        config: config.clone(),
        metrics,
    };

    tokio::spawn(health::run(
        store,
        auth_cache,
        oauth_states,
        config.health_check_interval,
    ));

    let app = build_app(app_state);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    print_startup_banner(&config);
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

fn build_http_client(config: &Config) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(config.http_max_connections)
        .connect_timeout(Duration::from_secs(config.http_connect_timeout))
        .timeout(Duration::from_secs(config.http_request_timeout));

    if let Some(proxy) = &config.http_proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy).context("invalid HTTP_PROXY")?);
    } else if let Some(proxy) = &config.socks5_proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy).context("invalid SOCKS5_PROXY")?);
    }

    builder.build().context("building HTTP client")
}

/// Build the application with all routes and middleware
fn build_app(state: AppState) -> axum::Router {
    use axum::Router;

    Router::new()
        .merge(routes::health_routes())
        .merge(routes::anthropic_routes(state.clone()))
        .merge(routes::user_api_routes(state.clone()))
        .merge(routes::admin_api_routes(state.clone()))
        .layer(middleware::cors_layer())
        .layer(axum::middleware::from_fn_with_state(
            state,
            middleware::debug_middleware,
        ))
}

/// Print startup banner
fn print_startup_banner(config: &Config) {
    let banner = r#"
+-----------------------------------------------------------+
|                                                             |
|                   Kiro Gateway - Rust Edition               |
|                                                             |
|        Multi-tenant Anthropic-compatible AI gateway         |
|                                                             |
+-----------------------------------------------------------+
"#;

    println!("{}", banner);
    println!("  Version:     {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Server:      http://{}:{}",
        config.server_host, config.server_port
    );
    println!("  Debug Mode:  {:?}", config.debug_mode);
    println!("  Log Level:   {}", config.log_level);
    println!(
        "  Fake Reasoning: {} (max_tokens: {})",
        if config.fake_reasoning_enabled {
            "enabled"
        } else {
            "disabled"
        },
        config.fake_reasoning_max_tokens
    );
    println!();
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
