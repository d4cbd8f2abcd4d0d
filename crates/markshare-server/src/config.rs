use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// Base URL used in emailed links.
    pub public_url: String,
    pub session_days: i64,
    pub mail_relay_url: Option<String>,
    pub mail_from: String,
    /// Allowed browser origin; any origin when unset.
    pub cors_origin: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = var("MARKSHARE_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("MARKSHARE_JWT_SECRET is unset or still a placeholder; set it in .env and restart");
        }

        let host = var("MARKSHARE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = var("MARKSHARE_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("MARKSHARE_PORT must be a port number")?;
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .with_context(|| format!("invalid listen address {host}:{port}"))?;

        let session_days: i64 = var("MARKSHARE_SESSION_DAYS")
            .unwrap_or_else(|| "30".into())
            .parse()
            .context("MARKSHARE_SESSION_DAYS must be a whole number of days")?;
        if session_days <= 0 {
            bail!("MARKSHARE_SESSION_DAYS must be positive");
        }

        Ok(Self {
            addr,
            db_path: var("MARKSHARE_DB_PATH")
                .unwrap_or_else(|| "markshare.db".into())
                .into(),
            jwt_secret,
            public_url: var("MARKSHARE_PUBLIC_URL")
                .unwrap_or_else(|| "http://localhost:3000".into()),
            session_days,
            mail_relay_url: var("MARKSHARE_MAIL_RELAY_URL"),
            mail_from: var("MARKSHARE_MAIL_FROM")
                .unwrap_or_else(|| "no-reply@markshare.local".into()),
            cors_origin: var("MARKSHARE_CORS_ORIGIN"),
        })
    }
}
