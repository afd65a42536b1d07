use crate::payments::providers::NowPaymentsConfig;
use crate::reconciler::ReconcilerConfig;
use anyhow::{anyhow, Context, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub nowpayments: NowPaymentsConfig,
    pub reconciler: ReconcilerConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    /// How long finished checkout sessions stay readable
    pub session_retention: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let server = ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            session_retention: match env::var("CHECKOUT_SESSION_RETENTION_SECS") {
                Ok(raw) => Duration::from_secs(
                    raw.parse()
                        .context("CHECKOUT_SESSION_RETENTION_SECS must be a valid number")?,
                ),
                Err(_) => crate::api::DEFAULT_RETENTION,
            },
        };

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").context("DATABASE_URL not set")?,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
        };

        let nowpayments =
            NowPaymentsConfig::from_env().context("NOWPayments configuration is incomplete")?;

        let config = Config {
            server,
            database,
            nowpayments,
            reconciler: ReconcilerConfig::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port < 1024 {
            return Err(anyhow!(
                "Port must be at least 1024, got {}",
                self.server.port
            ));
        }

        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.server.environment
            ));
        }

        if self.database.url.trim().is_empty() {
            return Err(anyhow!("DATABASE_URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }

        if self.nowpayments.api_key.trim().is_empty() {
            return Err(anyhow!("NOWPAYMENTS_API_KEY cannot be empty"));
        }

        if self.nowpayments.currency_update_url.trim().is_empty() {
            return Err(anyhow!("NOWPAYMENTS_CURRENCY_UPDATE_URL cannot be empty"));
        }

        if self.server.environment == "production" && self.nowpayments.ipn_secret.is_none() {
            return Err(anyhow!(
                "NOWPAYMENTS_IPN_SECRET is required in production"
            ));
        }

        if self.reconciler.poll_interval.is_zero() {
            return Err(anyhow!("RECONCILER_POLL_INTERVAL_MS must be greater than 0"));
        }

        Ok(())
    }
}
