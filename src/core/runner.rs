use crate::config::toml_config::LoadTestConfig;
use crate::core::client::GatewayClient;
use crate::core::executor::{sleep_or_cancel, ScenarioExecutor, ScenarioOutcome};
use crate::core::flows::{build_flow, FlowDeps, LOGIN_PATH};
use crate::core::metrics::MetricsCollector;
use crate::core::report::RunReport;
use crate::core::thresholds::{evaluate_all, Threshold};
use crate::domain::model::ScenarioPlan;
use crate::utils::error::Result;
use crate::utils::monitor::ResourceMonitor;
use crate::utils::validation::Validate;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;

/// 從登入回應取出 token，接受 `accessToken` 或 `access_token`
pub fn extract_token(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("accessToken")
        .or_else(|| value.get("access_token"))
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// 取消時尚未開始的 scenario
fn not_started(plan: &ScenarioPlan) -> ScenarioOutcome {
    ScenarioOutcome {
        name: plan.name.clone(),
        executor: plan.executor.name().to_string(),
        iterations: 0,
        dropped_iterations: 0,
        elapsed_secs: 0.0,
        interrupted: true,
        tags: plan.tags.clone(),
    }
}

pub struct LoadTestRunner {
    config: LoadTestConfig,
    plans: Vec<ScenarioPlan>,
    thresholds: Vec<Threshold>,
    client: Arc<GatewayClient>,
    metrics: Arc<MetricsCollector>,
    monitor: Arc<ResourceMonitor>,
    sample_interval: Duration,
    graceful_stop: Option<Duration>,
    cancel: watch::Sender<bool>,
    // 保留一個 receiver，setup 期間送出的取消才不會遺失
    cancelled: watch::Receiver<bool>,
}

impl LoadTestRunner {
    pub fn new(config: LoadTestConfig) -> Result<Self> {
        config.validate()?;

        let plans = config.scenario_plans()?;
        let thresholds = config.thresholds()?;
        let client = GatewayClient::new(&config.target.base_url, config.timeout()?, &config.headers())?;
        let metrics = MetricsCollector::new(config.keep_samples());
        let monitor = ResourceMonitor::new(config.monitoring_enabled());
        let sample_interval = config.sample_interval()?;
        let (cancel, cancelled) = watch::channel(false);

        Ok(Self {
            config,
            plans,
            thresholds,
            client: Arc::new(client),
            metrics: Arc::new(metrics),
            monitor: Arc::new(monitor),
            sample_interval,
            graceful_stop: None,
            cancel,
            cancelled,
        })
    }

    /// 命令列 `--monitor` 覆蓋配置
    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        if enabled != self.monitor.is_enabled() {
            self.monitor = Arc::new(ResourceMonitor::new(enabled));
        }
        self
    }

    /// 強制保留 request 樣本（CSV 匯出）
    pub fn with_samples(mut self, keep: bool) -> Self {
        if keep && !self.config.keep_samples() {
            self.metrics = Arc::new(MetricsCollector::new(true));
        }
        self
    }

    pub fn with_graceful_stop(mut self, graceful_stop: Duration) -> Self {
        self.graceful_stop = Some(graceful_stop);
        self
    }

    pub fn plans(&self) -> &[ScenarioPlan] {
        &self.plans
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// 呼叫 `send(true)` 會中止所有 scenario，setup 期間也有效
    pub fn cancel_handle(&self) -> watch::Sender<bool> {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// 預先登入一次，讓需要驗證的 flow 共用同一個 token
    pub async fn setup(&self) -> Option<Arc<str>> {
        let credentials = self.config.credentials();
        tracing::info!("🔐 Authenticating as {}", credentials.email);

        let body = json!({
            "email": credentials.email,
            "password": credentials.password,
        });
        let response = self.client.post_json(LOGIN_PATH, &body, None).await;

        if response.status != 200 {
            tracing::warn!(
                "⚠️  Authentication failed (status {}), proceeding without token",
                response.status
            );
            return None;
        }

        match extract_token(&response.body) {
            Some(token) => {
                tracing::info!("✅ Authentication successful");
                Some(Arc::from(token))
            }
            None => {
                tracing::warn!("⚠️  Login response has no access token, proceeding without token");
                None
            }
        }
    }

    fn teardown(&self, elapsed: Duration) {
        tracing::info!(
            "🏁 Load test '{}' completed in {:.1}s",
            self.config.test.name,
            elapsed.as_secs_f64()
        );
    }

    pub async fn run(&self) -> Result<RunReport> {
        let started_at = Utc::now();
        let started = Instant::now();
        tracing::info!(
            "🚀 Starting load test '{}' against {} ({} scenarios)",
            self.config.test.name,
            self.client.base_url(),
            self.plans.len()
        );

        let token = if self.config.needs_token() && !self.is_cancelled() {
            let mut cancelled = self.cancelled.clone();
            tokio::select! {
                token = self.setup() => token,
                _ = cancelled.wait_for(|c| *c) => {
                    tracing::warn!("🛑 Cancelled during setup");
                    None
                }
            }
        } else {
            None
        };

        self.monitor.log_stats("Start");
        let (stop_sampler, sampler_rx) = watch::channel(false);
        let sampler = self
            .monitor
            .clone()
            .spawn_sampler(self.sample_interval, sampler_rx);

        let deps = FlowDeps {
            client: self.client.clone(),
            metrics: self.metrics.clone(),
            welcome_text: self.config.welcome_text().to_string(),
            credentials: self.config.credentials(),
        };

        let mut tasks = JoinSet::new();
        let mut outcomes: Vec<(usize, ScenarioOutcome)> = Vec::with_capacity(self.plans.len());
        for (index, plan) in self.plans.iter().cloned().enumerate() {
            if self.is_cancelled() {
                outcomes.push((index, not_started(&plan)));
                continue;
            }

            let flow = build_flow(plan.flow, deps.clone());
            let mut cancel = self.cancel.subscribe();
            let mut executor = ScenarioExecutor::new(
                plan.clone(),
                flow,
                self.metrics.clone(),
                token.clone(),
                cancel.clone(),
            );
            if let Some(graceful_stop) = self.graceful_stop {
                executor = executor.with_graceful_stop(graceful_stop);
            }

            tasks.spawn(async move {
                if !plan.start_time.is_zero() {
                    tracing::info!(
                        "⏳ Scenario '{}' scheduled at +{:?}",
                        plan.name,
                        plan.start_time
                    );
                    if sleep_or_cancel(plan.start_time, &mut cancel).await {
                        return (index, not_started(&plan));
                    }
                }
                (index, executor.run().await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            outcomes.push(joined?);
        }
        outcomes.sort_by_key(|(index, _)| *index);

        let _ = stop_sampler.send(true);
        if let Some(handle) = sampler {
            let _ = handle.await;
        }
        self.monitor.log_stats("End");

        let elapsed = started.elapsed();
        self.teardown(elapsed);

        let summary = self.metrics.summary(elapsed);
        let thresholds = evaluate_all(&self.thresholds, &summary);

        Ok(RunReport {
            name: self.config.test.name.clone(),
            description: self.config.test.description.clone(),
            base_url: self.client.base_url().to_string(),
            started_at,
            elapsed_secs: elapsed.as_secs_f64(),
            authenticated: token.is_some(),
            scenarios: outcomes.into_iter().map(|(_, outcome)| outcome).collect(),
            summary,
            thresholds,
            resource_stats: self.monitor.snapshot(),
        })
    }
}
