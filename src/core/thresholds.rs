use crate::core::metrics::{metric_kind, MetricKind, MetricValue, Summary};
use crate::utils::error::{LoadTestError, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

const EXPRESSION_PATTERN: &str =
    r"^\s*(avg|min|med|max|count|rate|p\(\s*(\d+(?:\.\d+)?)\s*\))\s*(<=|>=|==|!=|<|>)\s*(-?\d+(?:\.\d+)?)\s*$";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Avg,
    Min,
    Med,
    Max,
    Percentile(f64),
    Rate,
    Count,
}

impl Aggregation {
    fn applies_to(&self, kind: MetricKind) -> bool {
        match self {
            Aggregation::Avg
            | Aggregation::Min
            | Aggregation::Med
            | Aggregation::Max
            | Aggregation::Percentile(_) => kind == MetricKind::Trend,
            Aggregation::Rate => matches!(kind, MetricKind::Rate | MetricKind::Counter),
            Aggregation::Count => kind == MetricKind::Counter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "<" => Some(Comparison::Lt),
            "<=" => Some(Comparison::Le),
            ">" => Some(Comparison::Gt),
            ">=" => Some(Comparison::Ge),
            "==" => Some(Comparison::Eq),
            "!=" => Some(Comparison::Ne),
            _ => None,
        }
    }

    fn holds(&self, observed: f64, expected: f64) -> bool {
        match self {
            Comparison::Lt => observed < expected,
            Comparison::Le => observed <= expected,
            Comparison::Gt => observed > expected,
            Comparison::Ge => observed >= expected,
            Comparison::Eq => (observed - expected).abs() < f64::EPSILON,
            Comparison::Ne => (observed - expected).abs() >= f64::EPSILON,
        }
    }
}

/// 例如 `http_req_duration: p(95)<500`
#[derive(Debug, Clone)]
pub struct Threshold {
    pub metric: String,
    pub expression: String,
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub value: f64,
}

impl Threshold {
    pub fn parse(metric: &str, expression: &str) -> Result<Self> {
        let invalid = |reason: String| LoadTestError::InvalidThresholdError {
            expression: format!("{}: {}", metric, expression),
            reason,
        };

        let kind = metric_kind(metric).ok_or_else(|| invalid(format!("unknown metric '{}'", metric)))?;

        let re = Regex::new(EXPRESSION_PATTERN)
            .map_err(|e| invalid(format!("internal pattern error: {}", e)))?;
        let caps = re
            .captures(expression)
            .ok_or_else(|| invalid("expected <aggregation><operator><number>, e.g. p(95)<500".to_string()))?;

        let aggregation = match &caps[1] {
            "avg" => Aggregation::Avg,
            "min" => Aggregation::Min,
            "med" => Aggregation::Med,
            "max" => Aggregation::Max,
            "count" => Aggregation::Count,
            "rate" => Aggregation::Rate,
            _ => {
                let p: f64 = caps[2]
                    .parse()
                    .map_err(|_| invalid("invalid percentile".to_string()))?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(invalid("percentile must be between 0 and 100".to_string()));
                }
                Aggregation::Percentile(p)
            }
        };

        if !aggregation.applies_to(kind) {
            return Err(invalid(format!(
                "aggregation {:?} is not available for {:?} metric",
                aggregation, kind
            )));
        }

        let comparison = Comparison::parse(&caps[3])
            .ok_or_else(|| invalid(format!("unknown operator '{}'", &caps[3])))?;
        let value: f64 = caps[4]
            .parse()
            .map_err(|_| invalid("invalid threshold value".to_string()))?;

        Ok(Self {
            metric: metric.to_string(),
            expression: expression.trim().to_string(),
            aggregation,
            comparison,
            value,
        })
    }

    /// 取出 summary 中對應的觀測值；趨勢型 metric 沒有樣本時回傳 None
    pub fn observe(&self, summary: &Summary) -> Option<f64> {
        match (summary.metric(&self.metric)?, self.aggregation) {
            (MetricValue::Trend(trend), _) if trend.is_empty() => None,
            (MetricValue::Trend(trend), Aggregation::Avg) => Some(trend.avg),
            (MetricValue::Trend(trend), Aggregation::Min) => Some(trend.min),
            (MetricValue::Trend(trend), Aggregation::Med) => Some(trend.med),
            (MetricValue::Trend(trend), Aggregation::Max) => Some(trend.max),
            (MetricValue::Trend(trend), Aggregation::Percentile(p)) => Some(trend.percentile(p)),
            (MetricValue::Rate(rate), Aggregation::Rate) => Some(rate.rate),
            (MetricValue::Counter(count), Aggregation::Count) => Some(count as f64),
            (MetricValue::Counter(count), Aggregation::Rate) => {
                if summary.elapsed_secs > 0.0 {
                    Some(count as f64 / summary.elapsed_secs)
                } else {
                    Some(0.0)
                }
            }
            _ => None,
        }
    }

    pub fn evaluate(&self, summary: &Summary) -> ThresholdResult {
        let observed = self.observe(summary);
        let passed = observed
            .map(|v| self.comparison.holds(v, self.value))
            .unwrap_or(false);

        ThresholdResult {
            metric: self.metric.clone(),
            expression: self.expression.clone(),
            observed,
            passed,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.expression)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
}

pub fn parse_thresholds(config: &BTreeMap<String, Vec<String>>) -> Result<Vec<Threshold>> {
    let mut thresholds = Vec::new();
    for (metric, expressions) in config {
        for expression in expressions {
            thresholds.push(Threshold::parse(metric, expression)?);
        }
    }
    Ok(thresholds)
}

pub fn evaluate_all(thresholds: &[Threshold], summary: &Summary) -> Vec<ThresholdResult> {
    thresholds
        .iter()
        .map(|threshold| {
            let result = threshold.evaluate(summary);
            if result.passed {
                tracing::debug!("✅ threshold {} passed ({:?})", threshold, result.observed);
            } else {
                tracing::warn!("❌ threshold {} crossed (observed {:?})", threshold, result.observed);
            }
            result
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metrics::{MetricsCollector, RATE_LIMIT_HITS};
    use crate::domain::model::GatewayResponse;
    use std::time::Duration;

    fn summary_with(durations_ms: &[u64], statuses: &[u16]) -> Summary {
        let metrics = MetricsCollector::default();
        for (millis, status) in durations_ms.iter().zip(statuses) {
            metrics.record_request(
                "default",
                "GET",
                "/",
                &GatewayResponse {
                    status: *status,
                    body: String::new(),
                    duration: Duration::from_millis(*millis),
                    error: None,
                },
            );
            metrics.record_rate(RATE_LIMIT_HITS, *status == 429);
        }
        metrics.summary(Duration::from_secs(10))
    }

    #[test]
    fn test_parse_expressions() {
        let t = Threshold::parse("http_req_duration", "p(95)<500").unwrap();
        assert_eq!(t.aggregation, Aggregation::Percentile(95.0));
        assert_eq!(t.comparison, Comparison::Lt);
        assert_eq!(t.value, 500.0);

        let t = Threshold::parse("http_req_failed", "rate < 0.05").unwrap();
        assert_eq!(t.aggregation, Aggregation::Rate);
        assert_eq!(t.value, 0.05);

        let t = Threshold::parse("http_reqs", "count>=100").unwrap();
        assert_eq!(t.comparison, Comparison::Ge);
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!(Threshold::parse("http_req_duration", "p95<500").is_err());
        assert!(Threshold::parse("http_req_duration", "rate<0.1").is_err());
        assert!(Threshold::parse("http_req_failed", "p(95)<500").is_err());
        assert!(Threshold::parse("http_req_duration", "p(150)<500").is_err());
        assert!(Threshold::parse("no_such_metric", "rate>0").is_err());
        assert!(Threshold::parse("http_req_duration", "avg~3").is_err());
    }

    #[test]
    fn test_latency_threshold_evaluation() {
        let summary = summary_with(&[100, 120, 140, 160, 900], &[200, 200, 200, 200, 200]);
        let p95 = Threshold::parse("http_req_duration", "p(95)<500").unwrap();
        let avg = Threshold::parse("http_req_duration", "avg<500").unwrap();

        let result = p95.evaluate(&summary);
        assert!(!result.passed);
        assert!(result.observed.unwrap() > 500.0);
        assert!(avg.evaluate(&summary).passed);
    }

    #[test]
    fn test_rate_thresholds() {
        let summary = summary_with(&[10, 10, 10, 10], &[200, 429, 429, 200]);
        let hits = Threshold::parse("rate_limit_hits", "rate>0").unwrap();
        let failed = Threshold::parse("http_req_failed", "rate<0.05").unwrap();
        let reqs = Threshold::parse("http_reqs", "rate<1").unwrap();

        assert!(hits.evaluate(&summary).passed);
        assert!(!failed.evaluate(&summary).passed);
        // 4 requests over 10s
        assert!(reqs.evaluate(&summary).passed);
    }

    #[test]
    fn test_empty_metrics() {
        let summary = MetricsCollector::default().summary(Duration::from_secs(1));
        let latency = Threshold::parse("http_req_duration", "p(95)<500").unwrap();
        let hits = Threshold::parse("rate_limit_hits", "rate>0").unwrap();
        let failed = Threshold::parse("http_req_failed", "rate<0.05").unwrap();

        let result = latency.evaluate(&summary);
        assert!(!result.passed);
        assert!(result.observed.is_none());
        assert!(!hits.evaluate(&summary).passed);
        assert!(failed.evaluate(&summary).passed);
    }

    #[test]
    fn test_parse_threshold_map() {
        let mut config = BTreeMap::new();
        config.insert(
            "http_req_duration".to_string(),
            vec!["p(95)<500".to_string(), "max<3000".to_string()],
        );
        config.insert("http_req_failed".to_string(), vec!["rate<0.05".to_string()]);
        assert_eq!(parse_thresholds(&config).unwrap().len(), 3);
    }
}
