use crate::core::executor::ScenarioOutcome;
use crate::core::metrics::{RateSummary, Summary, TrendSummary};
use crate::core::thresholds::ThresholdResult;
use crate::domain::model::{format_tags, RequestSample};
use crate::domain::ports::Storage;
use crate::utils::error::{LoadTestError, Result};
use crate::utils::monitor::ResourceStats;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub name: String,
    pub description: Option<String>,
    pub base_url: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub authenticated: bool,
    pub scenarios: Vec<ScenarioOutcome>,
    pub summary: Summary,
    pub thresholds: Vec<ThresholdResult>,
    pub resource_stats: Option<ResourceStats>,
}

impl RunReport {
    pub fn thresholds_passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed)
    }

    pub fn failed_thresholds(&self) -> Vec<&ThresholdResult> {
        self.thresholds.iter().filter(|t| !t.passed).collect()
    }
}

fn metric_line(out: &mut String, name: &str, value: &str) {
    let _ = writeln!(out, "     {:.<32}: {}", name, value);
}

fn format_ms(ms: f64) -> String {
    if ms >= 1000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else {
        format!("{:.2}ms", ms)
    }
}

fn format_trend(trend: &TrendSummary) -> String {
    format!(
        "avg={} min={} med={} max={} p(90)={} p(95)={} p(99)={}",
        format_ms(trend.avg),
        format_ms(trend.min),
        format_ms(trend.med),
        format_ms(trend.max),
        format_ms(trend.p90),
        format_ms(trend.p95),
        format_ms(trend.p99)
    )
}

fn format_rate(rate: &RateSummary) -> String {
    format!(
        "{:.2}% ✓ {} ✗ {}",
        rate.rate * 100.0,
        rate.passes,
        rate.fails
    )
}

/// k6 風格的結束摘要
pub fn render_text_summary(report: &RunReport) -> String {
    let summary = &report.summary;
    let mut out = String::new();

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "  {} → {} ({} scenarios, {:.1}s)",
        report.name,
        report.base_url,
        report.scenarios.len(),
        report.elapsed_secs
    );
    for scenario in &report.scenarios {
        let tags = if scenario.tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", format_tags(&scenario.tags))
        };
        let _ = writeln!(
            out,
            "     * {}{}: {} iterations, {} dropped ({}{})",
            scenario.name,
            tags,
            scenario.iterations,
            scenario.dropped_iterations,
            scenario.executor,
            if scenario.interrupted { ", interrupted" } else { "" }
        );
    }
    let _ = writeln!(out);

    for check in &summary.checks {
        let total = check.passes + check.fails;
        let mark = if check.fails == 0 { "✓" } else { "✗" };
        let pct = if total == 0 {
            0.0
        } else {
            check.passes as f64 * 100.0 / total as f64
        };
        let _ = writeln!(
            out,
            "     {} {} ({:.2}% ✓ {} ✗ {})",
            mark, check.name, pct, check.passes, check.fails
        );
    }
    if !summary.checks.is_empty() {
        let _ = writeln!(out);
    }

    metric_line(&mut out, "checks", &format_rate(&summary.checks_rate));
    metric_line(
        &mut out,
        "http_req_duration",
        &format_trend(&summary.http_req_duration),
    );
    metric_line(&mut out, "http_req_failed", &format_rate(&summary.http_req_failed));
    let per_second = if summary.elapsed_secs > 0.0 {
        summary.http_reqs as f64 / summary.elapsed_secs
    } else {
        0.0
    };
    metric_line(
        &mut out,
        "http_reqs",
        &format!("{} {:.2}/s", summary.http_reqs, per_second),
    );
    metric_line(&mut out, "iterations", &summary.iterations.to_string());
    metric_line(
        &mut out,
        "dropped_iterations",
        &summary.dropped_iterations.to_string(),
    );
    for (name, rate) in &summary.rates {
        metric_line(&mut out, name, &format_rate(rate));
    }

    if !summary.status_codes.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "   status codes:");
        for (endpoint, codes) in &summary.status_codes {
            let codes = codes
                .iter()
                .map(|(status, count)| format!("{}×{}", status, count))
                .collect::<Vec<_>>()
                .join(" ");
            let _ = writeln!(out, "     {:<32} {}", endpoint, codes);
        }
    }

    if !report.thresholds.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "   thresholds:");
        for threshold in &report.thresholds {
            let observed = threshold
                .observed
                .map(|v| format!("{:.4}", v))
                .unwrap_or_else(|| "no data".to_string());
            let _ = writeln!(
                out,
                "     {} {}: {} (observed {})",
                if threshold.passed { "✓" } else { "✗" },
                threshold.metric,
                threshold.expression,
                observed
            );
        }
    }

    if let Some(stats) = &report.resource_stats {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "   generator: peak CPU {:.1}%, peak memory {}MB ({} samples)",
            stats.peak_cpu_usage, stats.peak_memory_mb, stats.samples
        );
    }

    out
}

pub async fn export_json<S: Storage>(storage: &S, path: &str, report: &RunReport) -> Result<String> {
    let json = serde_json::to_vec_pretty(report)?;
    storage.write_file(path, &json).await
}

pub async fn export_csv<S: Storage>(
    storage: &S,
    path: &str,
    samples: &[RequestSample],
) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for sample in samples {
        writer.serialize(sample)?;
    }
    let data = writer
        .into_inner()
        .map_err(|e| LoadTestError::IoError(e.into_error()))?;
    storage.write_file(path, &data).await
}
