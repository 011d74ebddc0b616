//! # Configuration Management
//!
//! Configuration comes from the environment ("12-factor app"), with a `.env`
//! file picked up in development.
//!
//! ## Environment Variables
//! - `HOST`: Server bind address (default: 127.0.0.1)
//! - `PORT`: Server port (default: 8080)
//! - `DATABASE_URL`: SQLite database connection string
//! - `RP_ID`: Relying Party ID (usually your domain)
//! - `RP_ORIGIN`: Relying Party origin (full URL)
//! - `RP_NAME`: Human-readable name for your service
//! - `CHALLENGE_TTL_SECS`: How long an issued challenge stays valid (default: 60)
//! - `CLEANUP_INTERVAL_SECS`: How often expired challenges are purged (default: 600)

use anyhow::{bail, Result};
use std::env;
use std::time::Duration;

use crate::webauthn::RelyingParty;

/// Application configuration
///
/// ## WebAuthn Terminology
/// - **RP (Relying Party)**: Your application/website that relies on authentication
/// - **RP ID**: Your domain name (e.g., "example.com" or "localhost")
/// - **RP Origin**: Full URL of your application (e.g., "https://example.com")
#[derive(Debug, Clone)]
pub struct Config {
    /// Examples: "127.0.0.1" (localhost only), "0.0.0.0" (all interfaces)
    pub host: String,

    pub port: u16,

    /// Format: "sqlite:filename.db?mode=rwc"
    /// The "mode=rwc" means: read, write, create if not exists
    pub database_url: String,

    /// Must match the domain your app is served from, without protocol or port
    pub rp_id: String,

    /// Exact origin browsers will report in client data
    /// For local development: "http://localhost:8080"
    pub rp_origin: String,

    /// Shown to users during passkey creation
    pub rp_name: String,

    /// Lifetime of registration/authentication challenges, also advertised
    /// to the client as the ceremony timeout
    pub challenge_ttl_secs: u64,

    /// Period of the background task that deletes expired challenges
    pub cleanup_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// ## Example .env file
    /// ```text
    /// HOST=127.0.0.1
    /// PORT=8080
    /// DATABASE_URL=sqlite:passkey.db?mode=rwc
    /// RP_ID=localhost
    /// RP_ORIGIN=http://localhost:8080
    /// RP_NAME=Passkey Demo
    /// CHALLENGE_TTL_SECS=60
    /// ```
    pub fn from_env() -> Result<Self> {
        // dotenvy doesn't error if the file is missing
        dotenvy::dotenv().ok();

        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build a config from any variable source
    ///
    /// Missing variables fall back to defaults; present but unparseable ones
    /// are errors.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let config = Config {
            host: var("HOST", "127.0.0.1"),
            port: var("PORT", "8080").parse()?,
            database_url: var("DATABASE_URL", "sqlite:passkey.db?mode=rwc"),
            rp_id: var("RP_ID", "localhost"),
            rp_origin: var("RP_ORIGIN", "http://localhost:8080"),
            rp_name: var("RP_NAME", "Passkey Demo"),
            challenge_ttl_secs: var("CHALLENGE_TTL_SECS", "60").parse()?,
            cleanup_interval_secs: var("CLEANUP_INTERVAL_SECS", "600").parse()?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.rp_id.is_empty() || self.rp_id.contains("://") || self.rp_id.contains('/') {
            bail!("RP_ID must be a bare domain, got '{}'", self.rp_id);
        }
        let Some((scheme, rest)) = self.rp_origin.split_once("://") else {
            bail!("RP_ORIGIN must include a scheme, got '{}'", self.rp_origin);
        };
        if scheme != "https" && scheme != "http" {
            bail!("RP_ORIGIN scheme must be http or https, got '{}'", scheme);
        }
        if rest.is_empty() || rest.ends_with('/') {
            bail!("RP_ORIGIN must be an origin without path, got '{}'", self.rp_origin);
        }
        if self.challenge_ttl_secs == 0 {
            bail!("CHALLENGE_TTL_SECS must be positive");
        }
        if self.cleanup_interval_secs == 0 {
            bail!("CLEANUP_INTERVAL_SECS must be positive");
        }
        Ok(())
    }

    /// Combines host and port for `tokio::net::TcpListener::bind()`
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn relying_party(&self) -> RelyingParty {
        RelyingParty {
            id: self.rp_id.clone(),
            name: self.rp_name.clone(),
            origin: self.rp_origin.clone(),
        }
    }

    pub fn challenge_ttl(&self) -> Duration {
        Duration::from_secs(self.challenge_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}
