use std::env;

pub const DEFAULT_AUTH_SECRET: &str = "changeme";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub auth_secret: String,
    pub token_ttl_days: i64,
    pub reset_token_ttl_minutes: i64,
    /// Emails elevated to ADMIN at signup. Compared lower-cased.
    pub admin_emails: Vec<String>,
    pub mail_webhook_url: String,
    pub public_url: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "acservices.db".to_string()),
            auth_secret: env::var("AUTH_SECRET").unwrap_or_else(|_| DEFAULT_AUTH_SECRET.to_string()),
            token_ttl_days: env::var("TOKEN_TTL_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            reset_token_ttl_minutes: env::var("RESET_TOKEN_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            admin_emails: env::var("ADMIN_EMAILS")
                .map(|v| parse_email_list(&v))
                .unwrap_or_default(),
            mail_webhook_url: env::var("MAIL_WEBHOOK_URL").unwrap_or_default(),
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        }
    }
}

fn parse_email_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}
