use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use markfiller::config::Config;
use markfiller::db::{create_pool, init_db, queries, AppState};
use markfiller::handlers::{self, public::RateLimits};
use markfiller::jwt::AdminKey;
use markfiller::models::IssueLicense;
use markfiller::rate_limit;

#[derive(Parser, Debug)]
#[command(name = "markfiller")]
#[command(about = "License and device-binding server for the MarkFiller add-in")]
struct Cli {
    /// Seed the database with a dev teacher + license
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds the database with dev data for testing: one teacher and one active
/// license, plus a printed admin token. Only runs in dev mode and when the
/// database is empty.
fn seed_dev_data(state: &AppState) {
    let mut conn = state
        .db
        .get()
        .expect("Failed to get db connection for seeding");

    let existing = queries::list_licenses(&conn, None, None, 1, 0).expect("Failed to list licenses");
    if !existing.is_empty() {
        tracing::info!("Database already has data, skipping seed");
        return;
    }

    let input = IssueLicense {
        full_name: "Dev Teacher".to_string(),
        email: "dev@markfiller.local".to_string(),
        cin: "DEV000000".to_string(),
        phone: None,
        level: Some("secondary".to_string()),
        subject: Some("math".to_string()),
        classes_count: Some(4),
        tests_per_term: Some(3),
        allowed_devices: 2,
        months_valid: 10,
    };
    let issued = queries::issue_license(&mut conn, &input).expect("Failed to seed dev license");

    let admin_token = state
        .admin_key
        .sign("dev@markfiller.local", "admin", 24 * 30)
        .expect("Failed to sign dev admin token");

    tracing::info!("============================================");
    tracing::info!("DEV DATA SEEDED");
    tracing::info!("License key: {}", issued.license.key);
    tracing::info!("Upload limit: {}", issued.license.upload_limit);
    tracing::info!("============================================");

    println!();
    println!("--- COPY FROM HERE ---");
    println!("  license_key: {}", issued.license.key);
    println!("  admin_token: {}", admin_token);
    println!("--- END COPY ---");
    println!();
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "markfiller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let state = AppState {
        db: db_pool,
        admin_key: AdminKey::from_secret(&config.jwt_secret),
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set MARKFILLER_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    let limits = RateLimits {
        standard: rate_limit::standard_layer(config.rate_limit_standard_rpm),
        relaxed: rate_limit::relaxed_layer(config.rate_limit_relaxed_rpm),
    };

    let app = Router::new()
        // Public endpoints (no auth, per-IP rate limits)
        .merge(handlers::public::router(Some(limits)))
        // Admin API (bearer JWT with admin role)
        .merge(handlers::admin::router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();
    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("MarkFiller server listening on {}", addr);

    // into_make_service_with_connect_info enables IP-based rate limiting
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        }
    }
}
