use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::info;

use sentinel::cli::{Args, Command};
use sentinel::config::Config;
use sentinel::logging::setup_logging;
use sentinel::state::ServerContext;
use sentinel::web::middleware::{RequestIdLayer, SecurityHeadersLayer};
use sentinel::{proxy, rules, web};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(rules_dir) = &args.rules_dir {
        config.rules_dir = rules_dir.clone();
    }
    if let Some(log_level) = &args.log_level {
        config.log_level = log_level.clone();
    }

    setup_logging(&config, args.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) { "development" } else { "production" },
        "starting sentinel"
    );

    match args.command.unwrap_or(Command::Serve) {
        Command::CheckRules => check_rules(&config),
        Command::Serve => serve(config).await,
    }
}

fn check_rules(config: &Config) -> ExitCode {
    let mut rules = rules::RulesEngine::new();
    let loaded = rules.load_from_directory(&config.rules_dir);
    info!(count = loaded, dir = %config.rules_dir, "rules loaded");
    if rules.rules().is_empty() {
        eprintln!("no valid rules found in {}", config.rules_dir);
        return ExitCode::FAILURE;
    }
    for rule in rules.rules() {
        println!("{} ({:?} {:?})", rule.name, rule.match_method, rule.match_path);
    }
    ExitCode::SUCCESS
}

async fn serve(config: Config) -> ExitCode {
    let host = config.host.clone();
    let port = config.port;

    let ctx = match ServerContext::new(config) {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            eprintln!("failed to initialize server state: {e:?}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    spawn_maintenance_loop(ctx.clone(), shutdown.clone());

    let app = Router::new()
        .route("/api/health", get(web::status::health))
        .route("/api/status", get(web::status::status))
        .route("/api/metrics", get(web::status::metrics))
        .fallback(proxy::handle_request)
        .with_state(ctx)
        .layer((
            RequestIdLayer,
            SecurityHeadersLayer,
            CompressionLayer::new().zstd(true).br(true).gzip(true),
            TimeoutLayer::new(Duration::from_secs(60)),
        ));

    let addr: SocketAddr = match format!("{host}:{port}").parse() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("invalid listen address {host}:{port}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("failed to bind {addr}: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!(%addr, "listening");

    let shutdown_signal = shutdown.clone();
    let result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown_signal.cancel();
        })
        .await;

    shutdown.cancel();
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("server error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn spawn_maintenance_loop(ctx: Arc<ServerContext>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    ctx.run_maintenance_tick().await;
                }
                _ = shutdown.cancelled() => {
                    info!("maintenance loop shutting down");
                    break;
                }
            }
        }
    });
}
