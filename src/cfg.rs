use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::args::Args;

pub const DEFAULT_SPREADSHEET_NAME: &str = "neon_to_google_sheets";
pub const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_CERT_URL: &str = "https://www.googleapis.com/oauth2/v1/certs";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost";

const REQUIRED_KEYS: [&str; 8] = [
    "PGHOST",
    "PGDATABASE",
    "PGUSER",
    "PGPASSWORD",
    "TABLE_NAME",
    "CLIENT_ID",
    "CLIENT_SECRET",
    "PROJECT_ID",
];

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    Require,
    Disable,
}

impl std::str::FromStr for SslMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "require" => Ok(SslMode::Require),
            "disable" => Ok(SslMode::Disable),
            other => anyhow::bail!("PGSSLMODE must be 'require' or 'disable', got '{}'", other),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub ssl_mode: SslMode,
    pub schema: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    pub project_id: String,
    pub auth_uri: String,
    pub token_uri: String,
    pub auth_provider_x509_cert_url: String,
    pub redirect_uri: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_name: String,
    /// Open this spreadsheet directly instead of resolving it by name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spreadsheet_id: Option<String>,
    pub oauth: OAuthConfig,
    pub token_cache_path: String,
    pub state_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Cfg {
    pub database: DatabaseConfig,
    pub table_name: String,
    pub sheets: SheetsConfig,
    pub sync_interval_minutes: u64,
}

impl Cfg {
    /// Reads the optional config file, then the environment, then applies
    /// command line overrides.
    pub fn load(args: &Args) -> Result<Self> {
        info!("Loading configuration from: {}", args.config);

        let mut builder = Config::builder();
        if Path::new(&args.config).exists() {
            builder = builder.add_source(File::with_name(&args.config));
        } else {
            debug!("Config file not found, using environment only");
        }
        let config = builder
            .add_source(Environment::default())
            .build()
            .context("failed to read configuration")?;

        let mut cfg = Self::from_source(&config)?;

        if let Some(table) = &args.table {
            debug!("Overriding table from command line");
            cfg.table_name = table.clone();
            if lookup(&config, "SPREADSHEET_NAME").is_none() {
                cfg.sheets.spreadsheet_name = table.clone();
            }
        }
        if let Some(name) = &args.spreadsheet {
            debug!("Overriding spreadsheet name from command line");
            cfg.sheets.spreadsheet_name = name.clone();
        }
        if let Some(minutes) = args.interval_minutes {
            debug!("Overriding sync interval from command line");
            cfg.sync_interval_minutes = minutes;
        }

        debug!(
            "Final configuration: table={} schema={} spreadsheet={} interval={}m",
            cfg.table_name,
            cfg.database.schema,
            cfg.sheets.spreadsheet_name,
            cfg.sync_interval_minutes
        );
        Ok(cfg)
    }

    /// Builds a configuration from already-merged sources. Missing required
    /// keys are left empty here and reported by [`Cfg::validate`].
    pub fn from_source(config: &Config) -> Result<Self> {
        let get = |key: &str| lookup(config, key).unwrap_or_default();
        let get_or = |key: &str, default: &str| lookup(config, key).unwrap_or_else(|| default.to_string());

        let port = match lookup(config, "PGPORT") {
            Some(p) => p
                .parse::<u16>()
                .with_context(|| format!("PGPORT must be a port number, got '{}'", p))?,
            None => 5432,
        };
        let ssl_mode = get_or("PGSSLMODE", "require").parse::<SslMode>()?;
        let sync_interval_minutes = match lookup(config, "SYNC_INTERVAL_MINUTES") {
            Some(m) => m
                .parse::<u64>()
                .with_context(|| format!("SYNC_INTERVAL_MINUTES must be a whole number, got '{}'", m))?,
            None => 2,
        };

        let table_name = get("TABLE_NAME");
        let spreadsheet_name = lookup(config, "SPREADSHEET_NAME")
            .or_else(|| Some(table_name.clone()).filter(|t| !t.is_empty()))
            .unwrap_or_else(|| DEFAULT_SPREADSHEET_NAME.to_string());

        Ok(Self {
            database: DatabaseConfig {
                host: get("PGHOST"),
                port,
                database: get("PGDATABASE"),
                user: get("PGUSER"),
                password: get("PGPASSWORD"),
                ssl_mode,
                schema: get_or("PGSCHEMA", "public"),
            },
            table_name,
            sheets: SheetsConfig {
                spreadsheet_name,
                spreadsheet_id: lookup(config, "SPREADSHEET_ID"),
                oauth: OAuthConfig {
                    client_id: get("CLIENT_ID"),
                    client_secret: get("CLIENT_SECRET"),
                    project_id: get("PROJECT_ID"),
                    auth_uri: get_or("AUTH_URI", DEFAULT_AUTH_URI),
                    token_uri: get_or("TOKEN_URI", DEFAULT_TOKEN_URI),
                    auth_provider_x509_cert_url: get_or("AUTH_PROVIDER_X509_CERT_URL", DEFAULT_CERT_URL),
                    redirect_uri: get_or("REDIRECT_URI", DEFAULT_REDIRECT_URI),
                },
                token_cache_path: get_or("TOKEN_CACHE_PATH", "token_cache.json"),
                state_path: get_or("SHEETS_STATE_PATH", "sheets_state.json"),
            },
            sync_interval_minutes,
        })
    }

    pub fn validate(&self) -> Result<()> {
        let values = [
            &self.database.host,
            &self.database.database,
            &self.database.user,
            &self.database.password,
            &self.table_name,
            &self.sheets.oauth.client_id,
            &self.sheets.oauth.client_secret,
            &self.sheets.oauth.project_id,
        ];
        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .zip(values)
            .filter(|(_, value)| value.is_empty())
            .map(|(key, _)| *key)
            .collect();
        if !missing.is_empty() {
            anyhow::bail!("Missing configuration values: {}", missing.join(", "));
        }

        if self.sync_interval_minutes == 0 {
            anyhow::bail!("SYNC_INTERVAL_MINUTES must be at least 1");
        }

        info!("Configuration validation passed");
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_minutes * 60)
    }

    pub fn data_worksheet_name(&self) -> String {
        data_worksheet_name(&self.table_name)
    }
}

pub fn data_worksheet_name(table: &str) -> String {
    format!("{}_data", table)
}

/// Environment keys arrive lowercased from the `config` crate, and file keys
/// are written in lowercase, so lookups go through the lowercase form.
fn lookup(config: &Config, key: &str) -> Option<String> {
    config
        .get_string(&key.to_ascii_lowercase())
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
