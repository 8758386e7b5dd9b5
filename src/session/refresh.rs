// Token refresh logic

use anyhow::{Context, Result};
use reqwest::{Client, Url};

use super::types::{SessionGrant, TokenData};

/// Lifetime assumed when the backend reports neither `expires_at` nor `expires_in`
const DEFAULT_LIFETIME_SECS: i64 = 3600;

/// Build the refresh endpoint URL from the API base
pub fn refresh_url(base: &Url, refresh_path: &str) -> Result<Url> {
    base.join(refresh_path)
        .with_context(|| format!("Invalid refresh path: {}", refresh_path))
}

/// Exchange the refresh credential for a new grant
///
/// Any non-success status is a failure; the body is only used for logging.
pub async fn request_refresh(
    client: &Client,
    url: &Url,
    refresh_token: &str,
) -> Result<SessionGrant> {
    tracing::debug!(url = %url, "Sending credential refresh request");

    let response = client
        .post(url.clone())
        .bearer_auth(refresh_token)
        .send()
        .await
        .context("Failed to send refresh request")?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        anyhow::bail!("Credential refresh failed: {} - {}", status, error_text);
    }

    let grant: SessionGrant = response
        .json()
        .await
        .context("Failed to parse refresh response")?;

    if grant.access_token.is_empty() {
        anyhow::bail!("Refresh response does not contain access_token");
    }

    Ok(grant)
}

/// Turn a grant into the full credential set to store
///
/// A grant without a new refresh credential keeps the current one.
pub fn resolve_grant(
    grant: SessionGrant,
    current_refresh: Option<&str>,
    now: i64,
) -> Result<TokenData> {
    if grant.access_token.is_empty() {
        anyhow::bail!("Grant does not contain access_token");
    }

    let refresh_token = grant
        .refresh_token
        .filter(|t| !t.is_empty())
        .or_else(|| current_refresh.map(str::to_string))
        .context("Grant does not contain refresh_token and none is stored")?;

    let expires_at = match (grant.expires_at, grant.expires_in) {
        (Some(at), _) => at,
        (None, Some(expires_in)) => now
            .checked_add(expires_in)
            .with_context(|| format!("expires_in out of range: {}", expires_in))?,
        (None, None) => now.saturating_add(DEFAULT_LIFETIME_SECS),
    };

    Ok(TokenData {
        access_token: grant.access_token,
        refresh_token,
        expires_at,
        user: grant.user,
    })
}
