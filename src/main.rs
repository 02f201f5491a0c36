use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use acservices::config::{AppConfig, DEFAULT_AUTH_SECRET};
use acservices::db;
use acservices::handlers;
use acservices::models::Role;
use acservices::services::auth::local::LocalAuthProvider;
use acservices::services::mail::webhook::WebhookMailer;
use acservices::services::mail::{LogMailer, Mailer};
use acservices::services::persistence::sqlite::SqlitePersistence;
use acservices::services::repository::BookingRepository;
use acservices::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();
    if config.auth_secret == DEFAULT_AUTH_SECRET {
        tracing::warn!("AUTH_SECRET is not set, using an insecure default");
    }

    let db = db::open_shared(&config.database_url)?;

    let mailer: Arc<dyn Mailer> = if config.mail_webhook_url.is_empty() {
        tracing::info!("MAIL_WEBHOOK_URL not set, reset mail goes to the log");
        Arc::new(LogMailer)
    } else {
        tracing::info!("delivering mail via webhook (url: {})", config.mail_webhook_url);
        Arc::new(WebhookMailer::new(config.mail_webhook_url.clone()))
    };
    let auth = Arc::new(LocalAuthProvider::from_config(Arc::clone(&db), &config, mailer));

    // `acservices assign-role <email> <ROLE>` changes a role and exits.
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let [command, email, role] = args.as_slice() {
        anyhow::ensure!(command == "assign-role", "unknown command '{command}'");
        let role = Role::parse(role).ok_or_else(|| anyhow::anyhow!("unknown role '{role}'"))?;
        let identity = auth.assign_role(email, role).await?;
        println!("{} is now {}", identity.email, identity.role.as_str());
        return Ok(());
    }
    anyhow::ensure!(args.is_empty(), "usage: acservices [assign-role <email> <CUSTOMER|ADMIN>]");

    let store = Arc::new(SqlitePersistence::new(Arc::clone(&db)));
    let state = Arc::new(AppState {
        auth,
        bookings: BookingRepository::new(store),
    });

    let app = handlers::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
