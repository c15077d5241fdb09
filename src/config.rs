use std::env;

use anyhow::{Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
    pub refresh_cookie_secure: bool,
    pub refresh_cookie_domain: Option<String>,
    pub cors_allowed_origin: Option<String>,
    pub summary_endpoint: Option<String>,
    pub summary_api_key: Option<String>,
    pub summary_timeout_seconds: u64,
    pub summary_concurrency: usize,
    pub notification_webhook_url: Option<String>,
    pub email_webhook_url: Option<String>,
    pub email_from: String,
    pub procedure_ack_validity_minutes: i64,
    pub procedure_scroll_threshold_px: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "supportdesk".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "supportdesk-clients".to_string());
        let jwt_expiry_minutes = env::var("JWT_EXPIRY_MINUTES")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("JWT_EXPIRY_MINUTES must be an integer")?;
        let refresh_token_expiry_days = env::var("REFRESH_TOKEN_EXPIRY_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .context("REFRESH_TOKEN_EXPIRY_DAYS must be an integer")?;
        let refresh_cookie_secure = env::var("REFRESH_COOKIE_SECURE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let refresh_cookie_domain = env::var("REFRESH_COOKIE_DOMAIN").ok();
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();
        let summary_endpoint = env::var("SUMMARY_ENDPOINT").ok();
        let summary_api_key = env::var("SUMMARY_API_KEY").ok();
        let summary_timeout_seconds = env::var("SUMMARY_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("SUMMARY_TIMEOUT_SECONDS must be an integer")?;
        let summary_concurrency: usize = env::var("SUMMARY_CONCURRENCY")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .context("SUMMARY_CONCURRENCY must be an integer")?;
        let notification_webhook_url = env::var("NOTIFICATION_WEBHOOK_URL").ok();
        let email_webhook_url = env::var("EMAIL_WEBHOOK_URL").ok();
        let email_from =
            env::var("EMAIL_FROM").unwrap_or_else(|_| "support@localhost".to_string());
        let procedure_ack_validity_minutes = env::var("PROCEDURE_ACK_VALIDITY_MINUTES")
            .unwrap_or_else(|_| "120".to_string())
            .parse()
            .context("PROCEDURE_ACK_VALIDITY_MINUTES must be an integer")?;
        let procedure_scroll_threshold_px = env::var("PROCEDURE_SCROLL_THRESHOLD_PX")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("PROCEDURE_SCROLL_THRESHOLD_PX must be an integer")?;

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            jwt_expiry_minutes,
            refresh_token_expiry_days,
            refresh_cookie_secure,
            refresh_cookie_domain,
            cors_allowed_origin,
            summary_endpoint,
            summary_api_key,
            summary_timeout_seconds,
            summary_concurrency: summary_concurrency.max(1),
            notification_webhook_url,
            email_webhook_url,
            email_from,
            procedure_ack_validity_minutes,
            procedure_scroll_threshold_px,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("*****"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
