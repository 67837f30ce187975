use crate::core::metrics::MetricsCollector;
use crate::domain::model::GatewayResponse;

pub const RATE_LIMIT_MESSAGE: &str = "Too many requests";
pub const RATE_LIMIT_SHAPE_CHECK: &str = "rate limit response has correct structure";

pub fn check_status(response: &GatewayResponse, expected: &[u16]) -> bool {
    expected.contains(&response.status)
}

pub fn check_completed(response: &GatewayResponse) -> bool {
    response.status != 0
}

pub fn check_body_contains(response: &GatewayResponse, needle: &str) -> bool {
    response.body.contains(needle)
}

/// 429 的 body 應為 `{code: 429, message: "...Too many requests..."}`。
/// 空 body 或非 JSON 仍視為有效的限流訊號，只記 log。
pub fn check_rate_limit_shape(response: &GatewayResponse, endpoint: &str) -> bool {
    if !response.is_rate_limited() {
        return true;
    }

    if response.body.trim().is_empty() {
        tracing::info!("Rate limit hit but empty response body for {}", endpoint);
        return true;
    }

    let parsed = serde_json::from_str::<serde_json::Value>(&response.body);
    match parsed.as_ref().ok().and_then(|body| body.as_object()) {
        Some(body) => {
            let code_ok = body.get("code").and_then(|c| c.as_f64()) == Some(429.0);
            let message_ok = body
                .get("message")
                .and_then(|m| m.as_str())
                .map(|m| m.contains(RATE_LIMIT_MESSAGE))
                .unwrap_or(false);
            code_ok && message_ok
        }
        // 非 JSON 或不是物件（例如 `null`）都當成無法解析
        None => {
            tracing::info!(
                "Rate limit hit but invalid JSON for {}: {}",
                endpoint,
                response.body
            );
            true
        }
    }
}

/// 一組命名 check 的結果，同時寫入 metrics
pub struct CheckSet<'a> {
    metrics: &'a MetricsCollector,
    all_passed: bool,
}

impl<'a> CheckSet<'a> {
    pub fn new(metrics: &'a MetricsCollector) -> Self {
        Self {
            metrics,
            all_passed: true,
        }
    }

    pub fn check(&mut self, name: &str, passed: bool) -> &mut Self {
        if !self.metrics.record_check(name, passed) {
            tracing::debug!("✗ check failed: {}", name);
            self.all_passed = false;
        }
        self
    }

    pub fn all_passed(&self) -> bool {
        self.all_passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn response(status: u16, body: &str) -> GatewayResponse {
        GatewayResponse {
            status,
            body: body.to_string(),
            duration: Duration::from_millis(5),
            error: None,
        }
    }

    #[test]
    fn test_rate_limit_shape_accepts_expected_body() {
        let body = r#"{"status":"error","code":429,"message":"Too many requests. Please try again later.","path":"/api/ocr"}"#;
        assert!(check_rate_limit_shape(&response(429, body), "/api/ocr"));
    }

    #[test]
    fn test_rate_limit_shape_tolerates_empty_and_garbage() {
        assert!(check_rate_limit_shape(&response(429, ""), "/api/auth/login"));
        assert!(check_rate_limit_shape(&response(429, "   \n"), "/api/auth/login"));
        assert!(check_rate_limit_shape(&response(429, "<html>slow down</html>"), "/api/auth/login"));
    }

    #[test]
    fn test_rate_limit_shape_non_object_json_and_float_code() {
        assert!(check_rate_limit_shape(&response(429, "null"), "/api/ocr"));
        assert!(check_rate_limit_shape(&response(429, "\"rate limited\""), "/api/ocr"));
        assert!(check_rate_limit_shape(
            &response(429, r#"{"code":429.0,"message":"Too many requests"}"#),
            "/api/ocr"
        ));
    }

    #[test]
    fn test_rate_limit_shape_rejects_wrong_json() {
        assert!(!check_rate_limit_shape(
            &response(429, r#"{"code":500,"message":"Too many requests"}"#),
            "/"
        ));
        assert!(!check_rate_limit_shape(
            &response(429, r#"{"code":429,"message":"slow down"}"#),
            "/"
        ));
        assert!(!check_rate_limit_shape(&response(429, r#"{"code":429}"#), "/"));
    }

    #[test]
    fn test_non_429_always_passes_shape_check() {
        assert!(check_rate_limit_shape(&response(200, "not json"), "/"));
        assert!(check_rate_limit_shape(&response(401, r#"{"code":401}"#), "/"));
    }

    #[test]
    fn test_status_and_body_checks() {
        let welcome = response(200, r#"{"message":"Welcome to Coinsight API Gateway","status":"UP"}"#);
        assert!(check_status(&welcome, &[200]));
        assert!(!check_status(&welcome, &[401, 429]));
        assert!(check_body_contains(&welcome, "Coinsight API Gateway"));
        assert!(check_completed(&welcome));
        assert!(!check_completed(&response(0, "")));
    }

    #[test]
    fn test_check_set_records_every_outcome() {
        let metrics = MetricsCollector::default();
        let mut checks = CheckSet::new(&metrics);
        checks.check("status is 200", true).check("body ok", false);
        assert!(!checks.all_passed());

        let summary = metrics.summary(Duration::from_secs(1));
        assert_eq!(summary.checks_rate.passes, 1);
        assert_eq!(summary.checks_rate.fails, 1);
    }
}
