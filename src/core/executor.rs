use crate::core::metrics::MetricsCollector;
use crate::domain::model::{Executor, IterationContext, ScenarioPlan, Stage};
use crate::domain::ports::Flow;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

/// 閒置 VU 重新檢查目標數量的間隔
const VU_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// 時間到之後，等待進行中 iteration 結束的上限
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    pub name: String,
    pub executor: String,
    pub iterations: u64,
    pub dropped_iterations: u64,
    pub elapsed_secs: f64,
    pub interrupted: bool,
    pub tags: BTreeMap<String, String>,
}

/// 一個 scenario 執行期間所有 VU 共用的狀態
#[derive(Clone)]
struct VuRuntime {
    scenario: String,
    flow: Arc<dyn Flow>,
    metrics: Arc<MetricsCollector>,
    token: Option<Arc<str>>,
    think_time: Duration,
    iterations: Arc<AtomicU64>,
    cancel: watch::Receiver<bool>,
}

impl VuRuntime {
    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    async fn run_iteration(&mut self, vu: usize, iteration: u64) {
        let ctx = IterationContext {
            scenario: self.scenario.clone(),
            vu,
            iteration,
            token: self.token.clone(),
        };

        if let Err(e) = self.flow.iterate(&ctx).await {
            tracing::warn!(
                scenario = %self.scenario,
                vu,
                "Iteration {} of flow {} failed: {}",
                iteration,
                self.flow.kind(),
                e
            );
        }
        self.metrics.add_iteration();
        self.iterations.fetch_add(1, Ordering::Relaxed);

        if !self.think_time.is_zero() {
            sleep_or_cancel(self.think_time, &mut self.cancel).await;
        }
    }
}

/// 回傳 true 代表被取消
pub(crate) async fn sleep_or_cancel(duration: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return true;
    }

    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = cancel.changed() => match changed {
                Ok(()) if *cancel.borrow() => return true,
                Ok(()) => continue,
                // sender 已關閉，不會再有取消訊號
                Err(_) => {
                    (&mut sleep).await;
                    return false;
                }
            },
        }
    }
}

/// arrival-rate 模式的 VU 編號池，同一時間每個編號只會借出一次
struct VuPool {
    free: Mutex<Vec<usize>>,
    size: usize,
}

/// 借出的 VU 編號，drop 時歸還
struct VuSlot {
    id: usize,
    pool: Arc<VuPool>,
}

impl VuPool {
    fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new((0..size).rev().collect()),
            size,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<usize>> {
        self.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn acquire(self: &Arc<Self>) -> Option<VuSlot> {
        let id = self.lock().pop()?;
        Some(VuSlot {
            id,
            pool: self.clone(),
        })
    }

    fn busy(&self) -> usize {
        self.size - self.lock().len()
    }
}

impl Drop for VuSlot {
    fn drop(&mut self) {
        self.pool.lock().push(self.id);
    }
}

/// 依 stages 線性內插出當下應該活躍的 VU 數
pub fn ramping_target(start_vus: usize, stages: &[Stage], elapsed: Duration) -> usize {
    let mut from = start_vus as f64;
    let mut offset = Duration::ZERO;

    for stage in stages {
        let end = offset + stage.duration;
        if elapsed < end {
            let progress = if stage.duration.is_zero() {
                1.0
            } else {
                (elapsed - offset).as_secs_f64() / stage.duration.as_secs_f64()
            };
            let target = from + (stage.target as f64 - from) * progress;
            return target.round().max(0.0) as usize;
        }
        from = stage.target as f64;
        offset = end;
    }

    stages.last().map(|s| s.target).unwrap_or(start_vus)
}

pub struct ScenarioExecutor {
    plan: ScenarioPlan,
    runtime: VuRuntime,
    graceful_stop: Duration,
}

impl ScenarioExecutor {
    pub fn new(
        plan: ScenarioPlan,
        flow: Arc<dyn Flow>,
        metrics: Arc<MetricsCollector>,
        token: Option<Arc<str>>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let runtime = VuRuntime {
            scenario: plan.name.clone(),
            flow,
            metrics,
            token,
            think_time: plan.think_time,
            iterations: Arc::new(AtomicU64::new(0)),
            cancel,
        };
        Self {
            plan,
            runtime,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
        }
    }

    pub fn with_graceful_stop(mut self, graceful_stop: Duration) -> Self {
        self.graceful_stop = graceful_stop;
        self
    }

    pub async fn run(self) -> ScenarioOutcome {
        self.runtime
            .metrics
            .register_scenario(&self.plan.name, &self.plan.tags);
        let started = Instant::now();
        tracing::info!(
            "▶️  Scenario '{}' ({}) starting: {}",
            self.plan.name,
            self.plan.flow,
            self.plan.executor
        );

        let mut tasks = JoinSet::new();
        let mut dropped = 0u64;
        let mut graceful_stop = self.graceful_stop;

        match self.plan.executor.clone() {
            Executor::RampingVus {
                start_vus,
                stages,
                graceful_ramp_down,
            } => {
                graceful_stop = graceful_ramp_down;
                let stages = Arc::new(stages);
                let total: Duration = stages.iter().map(|s| s.duration).sum();
                let max_vus = self.plan.executor.max_vus();
                for vu in 0..max_vus {
                    let stages = stages.clone();
                    let target = move |elapsed| ramping_target(start_vus, &stages, elapsed);
                    tasks.spawn(looping_vu(self.runtime.clone(), vu, started, total, target));
                }
            }
            Executor::ConstantVus { vus, duration } => {
                for vu in 0..vus {
                    tasks.spawn(looping_vu(self.runtime.clone(), vu, started, duration, move |_| vus));
                }
            }
            Executor::SharedIterations {
                vus,
                iterations,
                max_duration,
            } => {
                let next = Arc::new(AtomicUsize::new(0));
                for vu in 0..vus.min(iterations) {
                    let mut runtime = self.runtime.clone();
                    let next = next.clone();
                    tasks.spawn(async move {
                        let mut own = 0u64;
                        while !runtime.cancelled() && started.elapsed() < max_duration {
                            if next.fetch_add(1, Ordering::Relaxed) >= iterations {
                                break;
                            }
                            runtime.run_iteration(vu, own).await;
                            own += 1;
                        }
                    });
                }
            }
            Executor::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
                pre_allocated_vus,
                max_vus,
            } => {
                dropped = self
                    .drive_arrival_rate(
                        &mut tasks,
                        started,
                        rate,
                        time_unit,
                        duration,
                        pre_allocated_vus,
                        max_vus,
                    )
                    .await;
            }
        }

        let aborted = self.drain(&mut tasks, graceful_stop).await;
        let interrupted = aborted || self.runtime.cancelled();
        let iterations = self.runtime.iterations.load(Ordering::Relaxed);
        let elapsed = started.elapsed();

        tracing::info!(
            "⏹️  Scenario '{}' finished: {} iterations, {} dropped, {:.1}s",
            self.plan.name,
            iterations,
            dropped,
            elapsed.as_secs_f64()
        );

        ScenarioOutcome {
            name: self.plan.name.clone(),
            executor: self.plan.executor.name().to_string(),
            iterations,
            dropped_iterations: dropped,
            elapsed_secs: elapsed.as_secs_f64(),
            interrupted,
            tags: self.plan.tags.clone(),
        }
    }

    /// 固定速率啟動 iteration，與回應時間無關；沒有空閒 VU 時記為 dropped
    #[allow(clippy::too_many_arguments)]
    async fn drive_arrival_rate(
        &self,
        tasks: &mut JoinSet<()>,
        started: Instant,
        rate: usize,
        time_unit: Duration,
        duration: Duration,
        pre_allocated_vus: usize,
        max_vus: usize,
    ) -> u64 {
        // interval 不接受 0，極端的 rate 退回 1ns
        let period = time_unit
            .div_f64(rate.max(1) as f64)
            .max(Duration::from_nanos(1));
        let pool = VuPool::new(max_vus);
        let mut cancel = self.runtime.cancel.clone();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        let mut started_iterations = 0u64;
        let mut dropped = 0u64;
        let mut warned = false;
        let mut listening = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = cancel.changed(), if listening => match changed {
                    Ok(()) if *cancel.borrow() => break,
                    Ok(()) => continue,
                    Err(_) => {
                        listening = false;
                        continue;
                    }
                },
            }
            if started.elapsed() >= duration || self.runtime.cancelled() {
                break;
            }

            match pool.acquire() {
                Some(slot) => {
                    let busy = pool.busy();
                    if busy > pre_allocated_vus && !warned {
                        warned = true;
                        tracing::warn!(
                            "Scenario '{}' needs more than {} pre-allocated VUs, scaling up to {}",
                            self.plan.name,
                            pre_allocated_vus,
                            max_vus
                        );
                    }

                    let mut runtime = self.runtime.clone();
                    let iteration = started_iterations;
                    tasks.spawn(async move {
                        runtime.run_iteration(slot.id, iteration).await;
                        drop(slot);
                    });
                    started_iterations += 1;
                }
                None => {
                    dropped += 1;
                    self.runtime.metrics.add_dropped_iteration();
                    tracing::debug!(
                        "Scenario '{}' dropped an iteration: all {} VUs busy",
                        self.plan.name,
                        max_vus
                    );
                }
            }
        }

        dropped
    }

    /// 等待進行中的 iteration；超過 graceful stop 就中止，回傳是否有被中止
    async fn drain(&self, tasks: &mut JoinSet<()>, graceful_stop: Duration) -> bool {
        let wait_all = async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        tracing::error!("A VU of scenario '{}' panicked: {}", self.plan.name, e);
                    }
                }
            }
        };

        if tokio::time::timeout(graceful_stop, wait_all).await.is_err() {
            tracing::warn!(
                "Scenario '{}' still had {} VUs busy after graceful stop of {:?}, aborting them",
                self.plan.name,
                tasks.len(),
                graceful_stop
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
            return true;
        }
        false
    }
}

/// 持續跑 iteration 直到時間到；編號超過目前目標數的 VU 閒置等待
async fn looping_vu<F>(mut runtime: VuRuntime, vu: usize, started: Instant, total: Duration, target: F)
where
    F: Fn(Duration) -> usize + Send + 'static,
{
    let mut iteration = 0u64;
    loop {
        let elapsed = started.elapsed();
        if runtime.cancelled() || elapsed >= total {
            break;
        }

        if vu < target(elapsed) {
            runtime.run_iteration(vu, iteration).await;
            iteration += 1;
        } else if sleep_or_cancel(VU_POLL_INTERVAL, &mut runtime.cancel).await {
            break;
        }
    }
}
