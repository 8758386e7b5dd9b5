use anyhow::{Context, Result};
use dialoguer::{Input, Password};
use reqwest::Method;
use std::sync::Arc;

use dealer_session::config::{Command, Config, LogFormat};
use dealer_session::http_client::ApiClient;
use dealer_session::session::{LoginRedirect, SessionGrant, SessionManager, SqliteStore};

/// Tells the person at the terminal where to sign in again
struct ConsoleRedirect;

impl LoginRedirect for ConsoleRedirect {
    fn redirect_to_login(&self, login_url: &str) {
        tracing::info!(login_url = %login_url, "Session cleared");
        eprintln!("Session ended. Sign in again at {}", login_url);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;
    config.validate()?;

    init_logging(&config);

    tracing::debug!(
        api = %config.api_base_url,
        db = %config.session_db_file.display(),
        "Configuration loaded"
    );

    let store = Arc::new(SqliteStore::open(&config.session_db_file)?);
    let session =
        SessionManager::new(config.session_settings()?, store, Arc::new(ConsoleRedirect))?;

    match config.command.clone() {
        Command::Status => status(&session),
        Command::Token => match session.valid_access_token().await {
            Some(token) => {
                println!("{}", token);
                Ok(())
            }
            None => anyhow::bail!("No valid session"),
        },
        Command::Refresh => match session.refresh_access_token().await {
            Some(_) => {
                println!("Credentials refreshed");
                status(&session)
            }
            None => anyhow::bail!("Credential refresh failed"),
        },
        Command::Request { method, path, data } => {
            let api = ApiClient::new(session)?;
            request(&api, &method, &path, data.as_deref()).await
        }
        Command::Import {
            access_token,
            refresh_token,
            expires_at,
        } => import(&session, access_token, refresh_token, expires_at),
        Command::Logout => {
            session.logout();
            Ok(())
        }
    }
}

fn init_logging(config: &Config) {
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn status(session: &SessionManager) -> Result<()> {
    if !session.is_logged_in() {
        println!("Not logged in");
        return Ok(());
    }

    println!("Logged in");
    if let Some(expires_at) = session.expires_at() {
        let remaining = expires_at.saturating_sub(chrono::Utc::now().timestamp());
        let when = chrono::DateTime::from_timestamp(expires_at, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| expires_at.to_string());
        println!("  expires: {} ({}s)", when, remaining);
    }
    if let Some(user) = session.current_user() {
        println!("  user:    {}", user.email.as_deref().unwrap_or("-"));
        if let Some(ref id) = user.id {
            println!("  id:      {}", id);
        }
        println!("  role:    {}", user.role.as_deref().unwrap_or("-"));
        println!("  tier:    {}", user.tier.as_deref().unwrap_or("-"));
    }
    Ok(())
}

async fn request(api: &ApiClient, method: &str, path: &str, data: Option<&str>) -> Result<()> {
    let method: Method = method
        .to_uppercase()
        .parse()
        .with_context(|| format!("Invalid HTTP method: {}", method))?;

    let mut builder = api.request(method, path)?;
    if let Some(data) = data {
        let body: serde_json::Value =
            serde_json::from_str(data).context("Request body is not valid JSON")?;
        builder = builder.json(&body);
    }
    let request = builder.build().context("Failed to build request")?;

    let response = api.send(request).await?;
    let status = response.status();
    let body = response.text().await.context("Failed to read response body")?;

    println!("{}", status);
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json).unwrap_or(body)),
        Err(_) => println!("{}", body),
    }

    if !status.is_success() {
        anyhow::bail!("Request failed with status {}", status);
    }
    Ok(())
}

fn import(
    session: &SessionManager,
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
) -> Result<()> {
    let access_token = match access_token {
        Some(token) => token,
        None => Password::new()
            .with_prompt("Access token")
            .interact()
            .context("Failed to read access token")?,
    };

    let refresh_token = match refresh_token {
        Some(token) => token,
        None => Password::new()
            .with_prompt("Refresh token")
            .interact()
            .context("Failed to read refresh token")?,
    };

    let expires_at = match expires_at {
        Some(at) => Some(at),
        None => {
            let raw: String = Input::new()
                .with_prompt("Expires at (epoch seconds, empty for one hour from now)")
                .allow_empty(true)
                .interact_text()
                .context("Failed to read expiry")?;
            let raw = raw.trim();
            if raw.is_empty() {
                None
            } else {
                Some(raw.parse().context("Expiry must be an integer")?)
            }
        }
    };

    session.establish(SessionGrant {
        access_token,
        refresh_token: Some(refresh_token),
        expires_in: None,
        expires_at,
        user: None,
    })?;

    println!("Session stored");
    Ok(())
}
