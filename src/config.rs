use crate::i18n::Language;
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Runtime configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the traceability backend (login, chat, hash resolution).
    pub backend_url: String,
    /// Base URL of the decentralized storage gateway serving records by hash.
    pub gateway_url: String,
    /// Model identifier sent with every chat request.
    pub model: String,
    /// Port the local dashboard API listens on.
    pub port: u16,
    /// SQLite file holding persisted client state.
    pub db_path: PathBuf,
    /// Language used until a preference is persisted.
    pub default_language: Language,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let backend_url = std::env::var("TRAZALINK_BACKEND_URL")
            .unwrap_or_else(|_| "http://localhost:5000".to_string());
        let gateway_url = std::env::var("TRAZALINK_GATEWAY_URL")
            .unwrap_or_else(|_| "https://api.gateway.ethswarm.org/bzz".to_string());
        let model = std::env::var("TRAZALINK_MODEL").unwrap_or_else(|_| "deepseek".to_string());

        let port = match std::env::var("TRAZALINK_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("Invalid TRAZALINK_PORT: {}", raw))?,
            Err(_) => 4600,
        };

        let db_path = match std::env::var("TRAZALINK_DB") {
            Ok(path) => PathBuf::from(path),
            Err(_) => {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
                PathBuf::from(home).join(".trazalink").join("client.db")
            }
        };

        let default_language = Language::from_code(
            &std::env::var("TRAZALINK_LANG").unwrap_or_else(|_| "en".to_string()),
        );

        Ok(Self {
            backend_url,
            gateway_url,
            model,
            port,
            db_path,
            default_language,
        })
    }
}
