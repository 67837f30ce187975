use crate::core::checks::{
    check_body_contains, check_completed, check_rate_limit_shape, check_status, CheckSet,
    RATE_LIMIT_SHAPE_CHECK,
};
use crate::core::client::GatewayClient;
use crate::core::metrics::{MetricsCollector, RATE_LIMIT_HITS};
use crate::domain::model::{Credentials, FlowKind, GatewayResponse, IterationContext};
use crate::domain::ports::Flow;
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use rand::Rng;
use reqwest::multipart;
use serde_json::json;
use std::sync::Arc;

pub const WELCOME_PATH: &str = "/";
pub const LOGIN_PATH: &str = "/api/auth/login";
pub const REGISTER_PATH: &str = "/api/auth/register";
pub const TRANSACTIONS_PATH: &str = "/api/transactions";
pub const TRANSACTIONS_SUMMARY_PATH: &str = "/api/transactions/summary";
pub const OCR_PATH: &str = "/api/ocr";
pub const HEALTH_PATH: &str = "/actuator/health";

pub const DEFAULT_WELCOME_TEXT: &str = "Coinsight API Gateway";
const OCR_SAMPLE_CONTENT: &str = "Sample receipt content for OCR testing";

/// 建立 flow 所需的共用元件
#[derive(Clone)]
pub struct FlowDeps {
    pub client: Arc<GatewayClient>,
    pub metrics: Arc<MetricsCollector>,
    pub welcome_text: String,
    pub credentials: Credentials,
}

pub fn build_flow(kind: FlowKind, deps: FlowDeps) -> Arc<dyn Flow> {
    match kind {
        FlowKind::Welcome => Arc::new(WelcomeFlow { deps }),
        FlowKind::PublicAuth => Arc::new(PublicAuthFlow { deps }),
        FlowKind::Authenticated => Arc::new(AuthenticatedFlow { deps }),
        FlowKind::OcrBurst => Arc::new(OcrBurstFlow { deps }),
        FlowKind::LoginProbe => Arc::new(LoginProbeFlow { deps }),
        FlowKind::HealthMonitor => Arc::new(HealthMonitorFlow { deps }),
    }
}

impl FlowDeps {
    /// 三個限流 flow 共用：記錄 request、429 命中率與 checks
    fn observe_rate_limited(
        &self,
        ctx: &IterationContext,
        method: &str,
        endpoint: &str,
        response: &GatewayResponse,
        status_check: &str,
        expected: &[u16],
    ) {
        self.metrics
            .record_request(&ctx.scenario, method, endpoint, response);

        let rate_limited = response.is_rate_limited();
        self.metrics.record_rate(RATE_LIMIT_HITS, rate_limited);

        CheckSet::new(&self.metrics)
            .check(status_check, check_status(response, expected))
            .check(
                RATE_LIMIT_SHAPE_CHECK,
                check_rate_limit_shape(response, endpoint),
            );

        if rate_limited {
            tracing::info!(
                scenario = %ctx.scenario,
                "Rate limited on {}: {}, Body: {}",
                endpoint,
                response.status,
                response.body
            );
        }
    }
}

pub struct WelcomeFlow {
    deps: FlowDeps,
}

#[async_trait]
impl Flow for WelcomeFlow {
    fn kind(&self) -> FlowKind {
        FlowKind::Welcome
    }

    async fn iterate(&self, ctx: &IterationContext) -> Result<()> {
        let response = self.deps.client.get(WELCOME_PATH, None).await;
        self.deps
            .metrics
            .record_request(&ctx.scenario, "GET", WELCOME_PATH, &response);

        CheckSet::new(&self.deps.metrics)
            .check("status is 200", check_status(&response, &[200]))
            .check(
                "response body contains welcome message",
                check_body_contains(&response, &self.deps.welcome_text),
            );
        Ok(())
    }
}

/// login / register 隨機二選一，驗證以 IP 為 key 的限流
pub struct PublicAuthFlow {
    deps: FlowDeps,
}

pub fn random_public_auth_request() -> (&'static str, serde_json::Value) {
    let mut rng = rand::rng();
    let endpoint = if rng.random_bool(0.5) {
        LOGIN_PATH
    } else {
        REGISTER_PATH
    };
    let payload = json!({
        "username": format!("testuser{}", rng.random::<f64>()),
        "password": "testpass123",
        "email": format!("test{}@example.com", rng.random::<f64>()),
    });
    (endpoint, payload)
}

#[async_trait]
impl Flow for PublicAuthFlow {
    fn kind(&self) -> FlowKind {
        FlowKind::PublicAuth
    }

    async fn iterate(&self, ctx: &IterationContext) -> Result<()> {
        let (endpoint, payload) = random_public_auth_request();
        let response = self.deps.client.post_json(endpoint, &payload, None).await;

        self.deps.observe_rate_limited(
            ctx,
            "POST",
            endpoint,
            &response,
            "status is 200, 400, or 429",
            &[200, 400, 429],
        );
        Ok(())
    }
}

/// 交易查詢，驗證以使用者為 key 的限流
pub struct AuthenticatedFlow {
    deps: FlowDeps,
}

/// 最近 7 天（含今天），格式 YYYY-MM-DD
pub fn summary_date_range(today: NaiveDate) -> (String, String) {
    let start = today - chrono::Duration::days(7);
    (
        start.format("%Y-%m-%d").to_string(),
        today.format("%Y-%m-%d").to_string(),
    )
}

#[async_trait]
impl Flow for AuthenticatedFlow {
    fn kind(&self) -> FlowKind {
        FlowKind::Authenticated
    }

    async fn iterate(&self, ctx: &IterationContext) -> Result<()> {
        let Some(token) = ctx.token.as_deref() else {
            tracing::debug!("No auth token available, skipping authenticated request");
            return Ok(());
        };

        let use_summary = rand::rng().random_bool(0.5);
        let (endpoint, path) = if use_summary {
            let (start, end) = summary_date_range(chrono::Utc::now().date_naive());
            (
                TRANSACTIONS_SUMMARY_PATH,
                format!(
                    "{}?startDate={}&endDate={}",
                    TRANSACTIONS_SUMMARY_PATH, start, end
                ),
            )
        } else {
            (TRANSACTIONS_PATH, TRANSACTIONS_PATH.to_string())
        };

        let response = self.deps.client.get(&path, Some(token)).await;
        self.deps.observe_rate_limited(
            ctx,
            "GET",
            endpoint,
            &response,
            "status is 200, 401, or 429",
            &[200, 401, 429],
        );
        Ok(())
    }
}

/// OCR 上傳，限流門檻最低
pub struct OcrBurstFlow {
    deps: FlowDeps,
}

pub fn receipt_form() -> Result<multipart::Form> {
    let file = multipart::Part::bytes(OCR_SAMPLE_CONTENT.as_bytes())
        .file_name("test.txt")
        .mime_str("text/plain")?;
    Ok(multipart::Form::new()
        .part("file", file)
        .text("type", "receipt"))
}

#[async_trait]
impl Flow for OcrBurstFlow {
    fn kind(&self) -> FlowKind {
        FlowKind::OcrBurst
    }

    async fn iterate(&self, ctx: &IterationContext) -> Result<()> {
        let Some(token) = ctx.token.as_deref() else {
            tracing::debug!("No auth token available, skipping OCR request");
            return Ok(());
        };

        let response = self
            .deps
            .client
            .post_multipart(OCR_PATH, receipt_form()?, Some(token))
            .await;
        self.deps.observe_rate_limited(
            ctx,
            "POST",
            OCR_PATH,
            &response,
            "status is 200, 400, 401, or 429",
            &[200, 400, 401, 429],
        );
        Ok(())
    }
}

/// 單一 VU 連續登入，觀察何時開始回 429
pub struct LoginProbeFlow {
    deps: FlowDeps,
}

#[async_trait]
impl Flow for LoginProbeFlow {
    fn kind(&self) -> FlowKind {
        FlowKind::LoginProbe
    }

    async fn iterate(&self, ctx: &IterationContext) -> Result<()> {
        let payload = json!({
            "email": self.deps.credentials.email,
            "password": self.deps.credentials.password,
        });
        let response = self.deps.client.post_json(LOGIN_PATH, &payload, None).await;

        tracing::info!("Request {}: Status {}", ctx.iteration + 1, response.status);

        self.deps
            .metrics
            .record_request(&ctx.scenario, "POST", LOGIN_PATH, &response);
        self.deps
            .metrics
            .record_rate(RATE_LIMIT_HITS, response.is_rate_limited());

        CheckSet::new(&self.deps.metrics)
            .check("request completed", check_completed(&response))
            .check(
                "rate limited (429) or normal response",
                check_status(&response, &[200, 400, 401, 429, 500]),
            );

        if response.is_rate_limited() {
            tracing::info!("🚫 Rate limited! Response: {}", response.body);
        }
        Ok(())
    }
}

pub struct HealthMonitorFlow {
    deps: FlowDeps,
}

#[async_trait]
impl Flow for HealthMonitorFlow {
    fn kind(&self) -> FlowKind {
        FlowKind::HealthMonitor
    }

    async fn iterate(&self, ctx: &IterationContext) -> Result<()> {
        let response = self.deps.client.get(HEALTH_PATH, None).await;
        self.deps
            .metrics
            .record_request(&ctx.scenario, "GET", HEALTH_PATH, &response);

        let healthy = CheckSet::new(&self.deps.metrics)
            .check("status is 200", check_status(&response, &[200]))
            .all_passed();
        if healthy {
            tracing::info!("Gateway health: {}", response.body);
        } else {
            tracing::warn!(
                "Gateway health check returned {} {}",
                response.status,
                response.error.as_deref().unwrap_or("")
            );
        }
        Ok(())
    }
}
