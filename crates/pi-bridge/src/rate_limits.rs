//! OAuth usage probe against the provider's rate-limit endpoint.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;

use crate::credentials::load_oauth_credentials;
use crate::protocol::{CreditsSnapshot, RateLimitSnapshot, RateLimitWindow};

pub const DEFAULT_USAGE_URL: &str = "https://api.anthropic.com/api/oauth/usage";

const BETA_HEADER: &str = "oauth-2025-04-20";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const FIVE_HOUR_MINS: i64 = 300;
const SEVEN_DAY_MINS: i64 = 10_080;

#[derive(Debug, Deserialize)]
struct UsageWindow {
    #[serde(default)]
    utilization: f64,
    #[serde(default)]
    resets_at: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ExtraUsage {
    #[serde(default)]
    is_enabled: Option<bool>,
    #[serde(default)]
    monthly_limit: Option<f64>,
    #[serde(default)]
    used_credits: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    #[serde(default)]
    five_hour: Option<UsageWindow>,
    #[serde(default)]
    seven_day: Option<UsageWindow>,
    #[serde(default)]
    extra_usage: Option<ExtraUsage>,
}

fn epoch_seconds(raw: &Value) -> Option<i64> {
    if let Some(seconds) = raw.as_i64() {
        return Some(seconds);
    }
    let text = raw.as_str()?;
    chrono::DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|stamp| stamp.timestamp())
}

fn window(raw: UsageWindow, duration_mins: i64) -> RateLimitWindow {
    RateLimitWindow {
        used_percent: raw.utilization.round() as i64,
        window_duration_mins: Some(duration_mins),
        resets_at: raw.resets_at.as_ref().and_then(epoch_seconds),
    }
}

fn credits(raw: ExtraUsage) -> CreditsSnapshot {
    let balance = match (raw.monthly_limit, raw.used_credits) {
        (Some(limit), Some(used)) => Some(format!("{:.2}", (limit - used) / 100.0)),
        _ => None,
    };
    CreditsSnapshot {
        has_credits: raw.is_enabled.unwrap_or(balance.is_some()),
        unlimited: false,
        balance,
    }
}

fn map_usage(response: UsageResponse) -> RateLimitSnapshot {
    RateLimitSnapshot {
        primary: response.five_hour.map(|raw| window(raw, FIVE_HOUR_MINS)),
        secondary: response.seven_day.map(|raw| window(raw, SEVEN_DAY_MINS)),
        credits: response.extra_usage.map(credits),
    }
}

/// Read the on-disk OAuth credential and query the usage endpoint. Any
/// failure (no credential, expired token, HTTP error) bubbles up; the router
/// degrades to the null-valued shape.
pub async fn fetch_rate_limits(home: &Path, usage_url: &str) -> Result<RateLimitSnapshot> {
    let creds = load_oauth_credentials(home).context("no OAuth credentials on disk")?;
    let now_ms = chrono::Utc::now().timestamp_millis();
    if creds.is_expired(now_ms) {
        bail!("OAuth access token is expired");
    }

    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;

    let response = client
        .get(usage_url)
        .bearer_auth(&creds.access_token)
        .header("anthropic-beta", BETA_HEADER)
        .header(
            reqwest::header::USER_AGENT,
            concat!("pi-bridge/", env!("CARGO_PKG_VERSION")),
        )
        .send()
        .await
        .context("usage request failed")?
        .error_for_status()
        .context("usage request rejected")?;

    let usage: UsageResponse = response.json().await.context("usage response malformed")?;
    Ok(map_usage(usage))
}

/// Usage endpoint, honoring the test override.
pub fn usage_url() -> String {
    std::env::var("PI_BRIDGE_USAGE_URL").unwrap_or_else(|_| DEFAULT_USAGE_URL.to_string())
}
