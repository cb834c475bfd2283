//! Rate-limit probe against a mock usage endpoint.

mod support;

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pi_bridge::rate_limits::fetch_rate_limits;
use support::Harness;

fn write_pi_auth(home: &std::path::Path, token: &str, expires: i64) {
    let dir = home.join(".pi/agent");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("auth.json"),
        serde_json::to_vec_pretty(&json!({
            "anthropic": {"access": token, "refresh": "refresh", "expires": expires}
        }))
        .unwrap(),
    )
    .unwrap();
}

fn far_future_ms() -> i64 {
    chrono::Utc::now().timestamp_millis() + 3_600_000
}

#[tokio::test]
async fn probe_maps_windows_and_credits() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/oauth/usage"))
        .and(header("anthropic-beta", "oauth-2025-04-20"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "five_hour": {"utilization": 37.0, "resets_at": "2026-08-02T12:00:00Z"},
            "seven_day": {"utilization": 80.0, "resets_at": "2026-08-08T00:00:00Z"},
            "extra_usage": {"is_enabled": true, "monthly_limit": 10000.0, "used_credits": 2500.0}
        })))
        .mount(&server)
        .await;

    let home = tempfile::tempdir()?;
    write_pi_auth(home.path(), "test-token", far_future_ms());

    let url = format!("{}/api/oauth/usage", server.uri());
    let snapshot = fetch_rate_limits(home.path(), &url).await?;

    let primary = snapshot.primary.unwrap();
    assert_eq!(primary.used_percent, 37);
    assert_eq!(primary.window_duration_mins, Some(300));

    let secondary = snapshot.secondary.unwrap();
    assert_eq!(secondary.used_percent, 80);
    assert_eq!(secondary.window_duration_mins, Some(10_080));

    let credits = snapshot.credits.unwrap();
    assert!(credits.has_credits);
    assert!(!credits.unlimited);
    assert_eq!(credits.balance.as_deref(), Some("75.00"));
    Ok(())
}

#[tokio::test]
async fn expired_token_fails_without_touching_the_endpoint() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    // No mounted mocks: a request would 404 loudly, but none should be made.
    let home = tempfile::tempdir()?;
    write_pi_auth(home.path(), "stale-token", 1);

    let url = format!("{}/api/oauth/usage", server.uri());
    let err = fetch_rate_limits(home.path(), &url).await.unwrap_err();
    assert!(err.to_string().contains("expired"));
    assert!(server.received_requests().await.unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn http_rejection_is_an_error() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/oauth/usage"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let home = tempfile::tempdir()?;
    write_pi_auth(home.path(), "test-token", far_future_ms());

    let url = format!("{}/api/oauth/usage", server.uri());
    assert!(fetch_rate_limits(home.path(), &url).await.is_err());
    Ok(())
}

#[tokio::test]
async fn bridge_serves_probe_results_over_the_wire() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/oauth/usage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "five_hour": {"utilization": 12.0},
        })))
        .mount(&server)
        .await;

    let url = format!("{}/api/oauth/usage", server.uri());
    let mut harness = Harness::with_usage_url(&url).await?;
    write_pi_auth(harness.home.path(), "test-token", far_future_ms());

    harness
        .request(1, "account/rateLimits/read", json!({}))
        .await?;
    let (response, _) = harness.wait_response(1).await?;

    assert_eq!(response["result"]["primary"]["usedPercent"], 12);
    assert_eq!(response["result"]["primary"]["windowDurationMins"], 300);
    assert_eq!(response["result"]["secondary"], json!(null));
    assert_eq!(response["result"]["credits"], json!(null));
    Ok(())
}
