use crate::domain::model::{format_tags, GatewayResponse, RequestSample};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const ITERATIONS: &str = "iterations";
pub const DROPPED_ITERATIONS: &str = "dropped_iterations";
pub const CHECKS: &str = "checks";
pub const RATE_LIMIT_HITS: &str = "rate_limit_hits";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Rate,
    Trend,
}

pub fn metric_kind(name: &str) -> Option<MetricKind> {
    match name {
        HTTP_REQS | ITERATIONS | DROPPED_ITERATIONS => Some(MetricKind::Counter),
        HTTP_REQ_FAILED | CHECKS | RATE_LIMIT_HITS => Some(MetricKind::Rate),
        HTTP_REQ_DURATION => Some(MetricKind::Trend),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RateCounter {
    passes: u64,
    fails: u64,
}

impl RateCounter {
    fn add(&mut self, hit: bool) {
        if hit {
            self.passes += 1;
        } else {
            self.fails += 1;
        }
    }

    fn summary(&self) -> RateSummary {
        RateSummary::new(self.passes, self.fails)
    }
}

#[derive(Default)]
struct MetricsState {
    durations_ms: Vec<f64>,
    http_failed: RateCounter,
    iterations: u64,
    dropped_iterations: u64,
    rates: BTreeMap<String, RateCounter>,
    checks: BTreeMap<String, RateCounter>,
    status_codes: BTreeMap<String, BTreeMap<u16, u64>>,
    requests_by_scenario: BTreeMap<String, u64>,
    scenario_tags: BTreeMap<String, String>,
    samples: Vec<RequestSample>,
}

/// 所有 VU 共用的 metrics 彙總
pub struct MetricsCollector {
    state: Mutex<MetricsState>,
    keep_samples: bool,
}

impl MetricsCollector {
    pub fn new(keep_samples: bool) -> Self {
        let mut state = MetricsState::default();
        // rate_limit_hits 一律出現在報表上，沒有資料時 rate 為 0
        state
            .rates
            .insert(RATE_LIMIT_HITS.to_string(), RateCounter::default());
        Self {
            state: Mutex::new(state),
            keep_samples,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        // 某個 VU panic 不應讓整個報表失效
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// scenario 開始前登記 tags，之後的樣本都會帶上
    pub fn register_scenario(&self, scenario: &str, tags: &BTreeMap<String, String>) {
        self.lock()
            .scenario_tags
            .insert(scenario.to_string(), format_tags(tags));
    }

    pub fn record_request(
        &self,
        scenario: &str,
        method: &str,
        endpoint: &str,
        response: &GatewayResponse,
    ) {
        let duration_ms = response.duration.as_secs_f64() * 1000.0;
        let mut state = self.lock();

        state.durations_ms.push(duration_ms);
        state.http_failed.add(response.is_failed());
        *state
            .status_codes
            .entry(endpoint.to_string())
            .or_default()
            .entry(response.status)
            .or_insert(0) += 1;
        *state
            .requests_by_scenario
            .entry(scenario.to_string())
            .or_insert(0) += 1;

        if self.keep_samples {
            let tags = state
                .scenario_tags
                .get(scenario)
                .cloned()
                .unwrap_or_default();
            state.samples.push(RequestSample {
                timestamp: chrono::Utc::now(),
                scenario: scenario.to_string(),
                endpoint: endpoint.to_string(),
                method: method.to_string(),
                status: response.status,
                duration_ms,
                tags,
            });
        }
    }

    /// 記錄 check 結果並原樣回傳
    pub fn record_check(&self, name: &str, passed: bool) -> bool {
        self.lock()
            .checks
            .entry(name.to_string())
            .or_default()
            .add(passed);
        passed
    }

    pub fn record_rate(&self, metric: &str, hit: bool) {
        self.lock().rates.entry(metric.to_string()).or_default().add(hit);
    }

    pub fn add_iteration(&self) {
        self.lock().iterations += 1;
    }

    pub fn add_dropped_iteration(&self) {
        self.lock().dropped_iterations += 1;
    }

    pub fn samples(&self) -> Vec<RequestSample> {
        self.lock().samples.clone()
    }

    pub fn summary(&self, elapsed: Duration) -> Summary {
        let state = self.lock();

        let checks: Vec<CheckSummary> = state
            .checks
            .iter()
            .map(|(name, counter)| CheckSummary {
                name: name.clone(),
                passes: counter.passes,
                fails: counter.fails,
            })
            .collect();
        let (check_passes, check_fails) = checks
            .iter()
            .fold((0, 0), |(p, f), c| (p + c.passes, f + c.fails));

        Summary {
            elapsed_secs: elapsed.as_secs_f64(),
            http_reqs: state.durations_ms.len() as u64,
            http_req_duration: TrendSummary::from_values(state.durations_ms.clone()),
            http_req_failed: state.http_failed.summary(),
            iterations: state.iterations,
            dropped_iterations: state.dropped_iterations,
            checks_rate: RateSummary::new(check_passes, check_fails),
            checks,
            rates: state
                .rates
                .iter()
                .map(|(name, counter)| (name.clone(), counter.summary()))
                .collect(),
            status_codes: state.status_codes.clone(),
            requests_by_scenario: state.requests_by_scenario.clone(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(false)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendSummary {
    pub count: usize,
    pub avg: f64,
    pub min: f64,
    pub med: f64,
    pub max: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    #[serde(skip)]
    sorted: Vec<f64>,
}

impl TrendSummary {
    pub fn from_values(mut values: Vec<f64>) -> Self {
        values.sort_by(|a, b| a.total_cmp(b));
        let count = values.len();
        let avg = if count == 0 {
            0.0
        } else {
            values.iter().sum::<f64>() / count as f64
        };

        Self {
            count,
            avg,
            min: values.first().copied().unwrap_or(0.0),
            max: values.last().copied().unwrap_or(0.0),
            med: percentile_of_sorted(&values, 50.0),
            p90: percentile_of_sorted(&values, 90.0),
            p95: percentile_of_sorted(&values, 95.0),
            p99: percentile_of_sorted(&values, 99.0),
            sorted: values,
        }
    }

    pub fn percentile(&self, p: f64) -> f64 {
        percentile_of_sorted(&self.sorted, p)
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// 相鄰排名之間做線性內插
pub fn percentile_of_sorted(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let weight = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * weight
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateSummary {
    pub passes: u64,
    pub fails: u64,
    pub rate: f64,
}

impl RateSummary {
    pub fn new(passes: u64, fails: u64) -> Self {
        let total = passes + fails;
        let rate = if total == 0 {
            0.0
        } else {
            passes as f64 / total as f64
        };
        Self {
            passes,
            fails,
            rate,
        }
    }

    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub elapsed_secs: f64,
    pub http_reqs: u64,
    pub http_req_duration: TrendSummary,
    pub http_req_failed: RateSummary,
    pub iterations: u64,
    pub dropped_iterations: u64,
    pub checks_rate: RateSummary,
    pub checks: Vec<CheckSummary>,
    pub rates: BTreeMap<String, RateSummary>,
    pub status_codes: BTreeMap<String, BTreeMap<u16, u64>>,
    pub requests_by_scenario: BTreeMap<String, u64>,
}

pub enum MetricValue<'a> {
    Counter(u64),
    Rate(&'a RateSummary),
    Trend(&'a TrendSummary),
}

impl Summary {
    pub fn metric(&self, name: &str) -> Option<MetricValue<'_>> {
        match name {
            HTTP_REQS => Some(MetricValue::Counter(self.http_reqs)),
            ITERATIONS => Some(MetricValue::Counter(self.iterations)),
            DROPPED_ITERATIONS => Some(MetricValue::Counter(self.dropped_iterations)),
            HTTP_REQ_DURATION => Some(MetricValue::Trend(&self.http_req_duration)),
            HTTP_REQ_FAILED => Some(MetricValue::Rate(&self.http_req_failed)),
            CHECKS => Some(MetricValue::Rate(&self.checks_rate)),
            other => self.rates.get(other).map(MetricValue::Rate),
        }
    }

    pub fn status_count(&self, endpoint: &str, status: u16) -> u64 {
        self.status_codes
            .get(endpoint)
            .and_then(|codes| codes.get(&status))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, millis: u64) -> GatewayResponse {
        GatewayResponse {
            status,
            body: String::new(),
            duration: Duration::from_millis(millis),
            error: None,
        }
    }

    #[test]
    fn test_percentile_interpolation() {
        let values: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        assert_eq!(percentile_of_sorted(&values, 0.0), 1.0);
        assert_eq!(percentile_of_sorted(&values, 100.0), 10.0);
        assert!((percentile_of_sorted(&values, 50.0) - 5.5).abs() < 1e-9);
        assert!((percentile_of_sorted(&values, 95.0) - 9.55).abs() < 1e-9);
        assert_eq!(percentile_of_sorted(&[], 95.0), 0.0);
        assert_eq!(percentile_of_sorted(&[42.0], 95.0), 42.0);
    }

    #[test]
    fn test_summary_aggregates_requests() {
        let metrics = MetricsCollector::new(true);
        metrics.record_request("s1", "POST", "/api/auth/login", &response(200, 10));
        metrics.record_request("s1", "POST", "/api/auth/login", &response(429, 30));
        metrics.record_request("s2", "GET", "/", &response(0, 20));
        metrics.record_rate(RATE_LIMIT_HITS, false);
        metrics.record_rate(RATE_LIMIT_HITS, true);
        metrics.add_iteration();
        metrics.add_dropped_iteration();

        let summary = metrics.summary(Duration::from_secs(2));
        assert_eq!(summary.http_reqs, 3);
        assert_eq!(summary.http_req_failed.passes, 2);
        assert_eq!(summary.http_req_duration.min, 10.0);
        assert_eq!(summary.http_req_duration.max, 30.0);
        assert!((summary.http_req_duration.avg - 20.0).abs() < 1e-9);
        assert_eq!(summary.status_count("/api/auth/login", 429), 1);
        assert_eq!(summary.requests_by_scenario["s1"], 2);
        assert_eq!(summary.rates[RATE_LIMIT_HITS].rate, 0.5);
        assert_eq!(summary.iterations, 1);
        assert_eq!(summary.dropped_iterations, 1);
        assert_eq!(metrics.samples().len(), 3);
    }

    #[test]
    fn test_checks_roll_up() {
        let metrics = MetricsCollector::default();
        assert!(metrics.record_check("status is 200", true));
        assert!(!metrics.record_check("status is 200", false));
        metrics.record_check("body ok", true);

        let summary = metrics.summary(Duration::from_secs(1));
        assert_eq!(summary.checks.len(), 2);
        assert_eq!(summary.checks_rate.passes, 2);
        assert_eq!(summary.checks_rate.fails, 1);
        // 沒有保留原始樣本
        assert!(metrics.samples().is_empty());
        // rate_limit_hits 沒有資料時仍存在，rate 為 0
        assert_eq!(summary.rates[RATE_LIMIT_HITS].rate, 0.0);
    }

    #[test]
    fn test_samples_carry_scenario_tags() {
        let metrics = MetricsCollector::new(true);
        let tags: BTreeMap<String, String> = [
            ("test_type".to_string(), "public_auth".to_string()),
            ("endpoint".to_string(), "auth".to_string()),
        ]
        .into_iter()
        .collect();
        metrics.register_scenario("public_auth_test", &tags);

        metrics.record_request("public_auth_test", "POST", "/api/auth/login", &response(429, 12));
        metrics.record_request("untagged", "GET", "/", &response(200, 5));

        let samples = metrics.samples();
        assert_eq!(samples[0].tags, "endpoint=auth;test_type=public_auth");
        assert_eq!(samples[1].tags, "");
    }
}
