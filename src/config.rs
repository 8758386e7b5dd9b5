use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Url;
use std::path::PathBuf;

use crate::session::SessionSettings;

/// Dealer Session - dashboard session manager
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Backend API base URL
    #[arg(short = 'u', long, env = "API_BASE_URL")]
    pub api_url: Option<String>,

    /// Login entry point shown after the session ends
    #[arg(long, env = "LOGIN_URL")]
    pub login_url: Option<String>,

    /// Path to the session SQLite database
    #[arg(short = 'd', long, env = "SESSION_DB_FILE")]
    pub db_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "60")]
    pub http_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Show whether a session is stored and who it belongs to
    Status,

    /// Print a valid access token, refreshing it if needed
    Token,

    /// Force a credential refresh
    Refresh,

    /// Send an authenticated request and print the response
    Request {
        /// HTTP method
        method: String,

        /// Path relative to the API base URL, or an absolute URL
        path: String,

        /// JSON request body
        #[arg(long)]
        data: Option<String>,
    },

    /// Store credentials obtained from a login
    Import {
        #[arg(long)]
        access_token: Option<String>,

        #[arg(long)]
        refresh_token: Option<String>,

        /// Expiry as seconds since the epoch
        #[arg(long)]
        expires_at: Option<i64>,
    },

    /// Clear the stored session
    Logout,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Backend
    pub api_base_url: String,
    pub login_url: String,
    pub refresh_path: String,

    // Storage
    pub session_db_file: PathBuf,

    // Token handling
    pub token_refresh_threshold: i64,
    pub strict_expiry: bool,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,

    pub command: Command,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        Self::from_args(args)
    }

    fn from_args(args: CliArgs) -> Result<Self> {
        let api_base_url = args
            .api_url
            .context("API_BASE_URL is required (use -u or set API_BASE_URL env var)")?;

        let login_url = args
            .login_url
            .unwrap_or_else(|| format!("{}/login", api_base_url.trim_end_matches('/')));

        let session_db_file = args
            .db_file
            .map(|s| expand_tilde(&s))
            .or_else(default_db_path)
            .context("SESSION_DB_FILE is required (use -d or set SESSION_DB_FILE env var)")?;

        Ok(Config {
            api_base_url,
            login_url,

            refresh_path: std::env::var("REFRESH_PATH")
                .unwrap_or_else(|_| "/api/auth/refresh".to_string()),

            session_db_file,

            token_refresh_threshold: env_parse("TOKEN_REFRESH_THRESHOLD").unwrap_or(300),

            strict_expiry: std::env::var("STRICT_EXPIRY")
                .map(|s| parse_bool(&s))
                .unwrap_or(false),

            http_connect_timeout: env_parse("HTTP_CONNECT_TIMEOUT").unwrap_or(30),

            http_request_timeout: args.http_timeout,

            log_level: args.log_level,

            log_format: parse_log_format(&std::env::var("LOG_FORMAT").unwrap_or_default()),

            command: args.command,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.api_base_url)
            .with_context(|| format!("API_BASE_URL is not a valid URL: {}", self.api_base_url))?;

        Url::parse(&self.login_url)
            .with_context(|| format!("LOGIN_URL is not a valid URL: {}", self.login_url))?;

        if self.token_refresh_threshold < 0 {
            anyhow::bail!(
                "TOKEN_REFRESH_THRESHOLD must not be negative: {}",
                self.token_refresh_threshold
            );
        }

        Ok(())
    }

    /// Settings for the session manager
    pub fn session_settings(&self) -> Result<SessionSettings> {
        let api_base_url = Url::parse(&self.api_base_url)
            .with_context(|| format!("API_BASE_URL is not a valid URL: {}", self.api_base_url))?;

        Ok(SessionSettings {
            api_base_url,
            refresh_path: self.refresh_path.clone(),
            login_url: self.login_url.clone(),
            refresh_threshold: self.token_refresh_threshold,
            strict_expiry: self.strict_expiry,
            connect_timeout: self.http_connect_timeout,
            request_timeout: self.http_request_timeout,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Per-user data directory location of the session database
fn default_db_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("dealer-session").join("session.sqlite3"))
}

fn parse_bool(s: &str) -> bool {
    matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}
