use anyhow::Result;
use gateway_loadtest::core::metrics::RATE_LIMIT_HITS;
use gateway_loadtest::{LoadTestConfig, LoadTestRunner};
use httpmock::prelude::*;
use serde_json::json;

const RATE_LIMIT_BODY: &str = r#"{"code":429,"message":"Too many requests, please try again later"}"#;

fn config_for(server: &MockServer, flow: &str, iterations: usize) -> Result<LoadTestConfig> {
    let content = format!(
        r#"
[test]
name = "rate-limiter-{flow}"

[target]
base_url = "{base_url}"
timeout = "5s"

[auth]
email = "loadtest@example.com"
password = "secret"

[[scenarios]]
name = "{flow}_test"
flow = "{flow}"
think_time = "0s"

[scenarios.executor]
type = "shared-iterations"
vus = 2
iterations = {iterations}

[thresholds]
rate_limit_hits = ["rate>0"]
http_req_duration = ["p(95)<2000"]
"#,
        flow = flow,
        base_url = server.base_url(),
        iterations = iterations,
    );
    Ok(LoadTestConfig::from_toml_str(&content)?)
}

/// 限流整合測試
/// 1. setup 以設定的帳號登入取得 token
/// 2. token 以 Bearer header 帶到交易查詢
/// 3. 429 計入 rate_limit_hits，回應格式檢查通過
#[tokio::test]
async fn test_authenticated_flow_uses_setup_token() -> Result<()> {
    let server = MockServer::start_async().await;

    let login = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/auth/login")
                .json_body(json!({"email": "loadtest@example.com", "password": "secret"}));
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"accessToken": "tok-123", "tokenType": "Bearer"}));
        })
        .await;

    let transactions = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/transactions")
                .header("Authorization", "Bearer tok-123");
            then.status(429)
                .header("content-type", "application/json")
                .body(RATE_LIMIT_BODY);
        })
        .await;

    let summary = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/transactions/summary")
                .query_param_exists("startDate")
                .query_param_exists("endDate")
                .header("Authorization", "Bearer tok-123");
            then.status(429)
                .header("content-type", "application/json")
                .body(RATE_LIMIT_BODY);
        })
        .await;

    let runner = LoadTestRunner::new(config_for(&server, "authenticated", 8)?)?;
    let report = runner.run().await?;

    login.assert_async().await;
    assert_eq!(transactions.hits_async().await + summary.hits_async().await, 8);

    assert!(report.authenticated);
    assert_eq!(report.summary.http_reqs, 8);
    assert_eq!(report.summary.iterations, 8);

    let hits = report.summary.rates[RATE_LIMIT_HITS];
    assert_eq!(hits.passes, 8);
    assert_eq!(hits.rate, 1.0);

    assert_eq!(report.summary.checks_rate.fails, 0);
    assert!(report.thresholds_passed());
    Ok(())
}

#[tokio::test]
async fn test_failed_login_skips_authenticated_iterations() -> Result<()> {
    let server = MockServer::start_async().await;

    let login = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/auth/login");
            then.status(401).body(r#"{"error":"invalid credentials"}"#);
        })
        .await;
    let transactions = server
        .mock_async(|when, then| {
            when.method(GET).path_contains("/api/transactions");
            then.status(200);
        })
        .await;

    let runner = LoadTestRunner::new(config_for(&server, "authenticated", 4)?)?;
    let report = runner.run().await?;

    login.assert_async().await;
    transactions.assert_hits_async(0).await;

    assert!(!report.authenticated);
    assert_eq!(report.summary.http_reqs, 0);
    assert_eq!(report.summary.iterations, 4);

    // 沒有任何 429，rate>0 不成立；沒有延遲樣本，p(95) 也算失敗
    assert_eq!(report.summary.rates[RATE_LIMIT_HITS].rate, 0.0);
    let failed: Vec<_> = report
        .failed_thresholds()
        .iter()
        .map(|t| t.metric.as_str())
        .collect();
    assert_eq!(failed, vec!["http_req_duration", RATE_LIMIT_HITS]);
    Ok(())
}

#[tokio::test]
async fn test_ocr_burst_uploads_multipart_receipt() -> Result<()> {
    let server = MockServer::start_async().await;

    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/auth/login");
            then.status(200).json_body(json!({"access_token": "ocr-token"}));
        })
        .await;

    let ocr = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/ocr")
                .header("Authorization", "Bearer ocr-token")
                .header_exists("content-type")
                .body_contains("name=\"file\"")
                .body_contains("Sample receipt content for OCR testing")
                .body_contains("receipt");
            then.status(200).json_body(json!({"text": "total 42.00"}));
        })
        .await;

    let runner = LoadTestRunner::new(config_for(&server, "ocr_burst", 3)?)?;
    let report = runner.run().await?;

    ocr.assert_hits_async(3).await;
    assert_eq!(report.summary.http_req_failed.passes, 0);
    assert_eq!(report.summary.rates[RATE_LIMIT_HITS].passes, 0);
    assert_eq!(report.summary.status_count("/api/ocr", 200), 3);
    assert_eq!(report.summary.checks_rate.fails, 0);
    Ok(())
}

#[tokio::test]
async fn test_public_auth_accepts_empty_429_body() -> Result<()> {
    let server = MockServer::start_async().await;

    let login = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/auth/login").body_contains("testuser");
            then.status(429);
        })
        .await;
    let register = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/auth/register");
            then.status(429);
        })
        .await;

    let runner = LoadTestRunner::new(config_for(&server, "public_auth", 10)?)?;
    let report = runner.run().await?;

    assert_eq!(login.hits_async().await + register.hits_async().await, 10);
    assert_eq!(report.summary.rates[RATE_LIMIT_HITS].rate, 1.0);
    // 429 算失敗的 request
    assert_eq!(report.summary.http_req_failed.rate, 1.0);
    assert_eq!(report.summary.checks_rate.fails, 0);
    assert!(report.thresholds_passed());
    Ok(())
}

#[tokio::test]
async fn test_cancel_during_slow_login_stops_run() -> Result<()> {
    let server = MockServer::start_async().await;

    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/auth/login");
            then.status(200)
                .delay(std::time::Duration::from_millis(600))
                .json_body(json!({"accessToken": "late-token"}));
        })
        .await;
    let transactions = server
        .mock_async(|when, then| {
            when.method(GET).path_contains("/api/transactions");
            then.status(200);
        })
        .await;

    let content = format!(
        r#"
[test]
name = "cancel-during-setup"

[target]
base_url = "{}"

[[scenarios]]
name = "authenticated_test"
flow = "authenticated"
think_time = "50ms"

[scenarios.executor]
type = "constant-vus"
vus = 2
duration = "4s"
"#,
        server.base_url()
    );
    let runner = LoadTestRunner::new(LoadTestConfig::from_toml_str(&content)?)?;
    let cancel = runner.cancel_handle();

    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    cancel.send(true)?;

    let report = tokio::time::timeout(std::time::Duration::from_secs(2), handle).await???;

    transactions.assert_hits_async(0).await;
    assert!(!report.authenticated);
    assert!(report.elapsed_secs < 2.0);
    assert_eq!(report.summary.http_reqs, 0);
    assert_eq!(report.summary.iterations, 0);
    assert!(report.scenarios[0].interrupted);
    Ok(())
}
