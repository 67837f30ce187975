use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Ramping 階段：在 `duration` 內把 VU 數線性調整到 `target`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Executor {
    RampingVus {
        start_vus: usize,
        stages: Vec<Stage>,
        graceful_ramp_down: Duration,
    },
    ConstantVus {
        vus: usize,
        duration: Duration,
    },
    SharedIterations {
        vus: usize,
        iterations: usize,
        max_duration: Duration,
    },
    ConstantArrivalRate {
        rate: usize,
        time_unit: Duration,
        duration: Duration,
        pre_allocated_vus: usize,
        max_vus: usize,
    },
}

impl Executor {
    pub fn name(&self) -> &'static str {
        match self {
            Executor::RampingVus { .. } => "ramping-vus",
            Executor::ConstantVus { .. } => "constant-vus",
            Executor::SharedIterations { .. } => "shared-iterations",
            Executor::ConstantArrivalRate { .. } => "constant-arrival-rate",
        }
    }

    /// 預期最長執行時間（不含 graceful stop）
    pub fn planned_duration(&self) -> Duration {
        match self {
            Executor::RampingVus { stages, .. } => stages.iter().map(|s| s.duration).sum(),
            Executor::ConstantVus { duration, .. } => *duration,
            Executor::SharedIterations { max_duration, .. } => *max_duration,
            Executor::ConstantArrivalRate { duration, .. } => *duration,
        }
    }

    pub fn max_vus(&self) -> usize {
        match self {
            Executor::RampingVus {
                start_vus, stages, ..
            } => stages
                .iter()
                .map(|s| s.target)
                .max()
                .unwrap_or(0)
                .max(*start_vus),
            Executor::ConstantVus { vus, .. } => *vus,
            Executor::SharedIterations { vus, .. } => *vus,
            Executor::ConstantArrivalRate { max_vus, .. } => *max_vus,
        }
    }
}

impl fmt::Display for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Executor::RampingVus {
                start_vus, stages, ..
            } => {
                write!(f, "ramping-vus from {} VUs over {} stages", start_vus, stages.len())?;
                for stage in stages {
                    write!(f, " [{:?} -> {}]", stage.duration, stage.target)?;
                }
                Ok(())
            }
            Executor::ConstantVus { vus, duration } => {
                write!(f, "constant-vus {} VUs for {:?}", vus, duration)
            }
            Executor::SharedIterations {
                vus,
                iterations,
                max_duration,
            } => write!(
                f,
                "shared-iterations {} iterations on {} VUs (max {:?})",
                iterations, vus, max_duration
            ),
            Executor::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
                pre_allocated_vus,
                max_vus,
            } => write!(
                f,
                "constant-arrival-rate {} iters/{:?} for {:?} ({} pre-allocated, {} max VUs)",
                rate, time_unit, duration, pre_allocated_vus, max_vus
            ),
        }
    }
}

/// 每種流量腳本對應一種 flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Welcome,
    PublicAuth,
    Authenticated,
    OcrBurst,
    LoginProbe,
    HealthMonitor,
}

impl FlowKind {
    pub fn default_think_time(&self) -> Duration {
        match self {
            FlowKind::Welcome => Duration::from_secs(1),
            FlowKind::HealthMonitor => Duration::from_secs(5),
            FlowKind::PublicAuth
            | FlowKind::Authenticated
            | FlowKind::OcrBurst
            | FlowKind::LoginProbe => Duration::from_millis(100),
        }
    }

    /// 需要先登入拿 token 的 flow
    pub fn requires_token(&self) -> bool {
        matches!(self, FlowKind::Authenticated | FlowKind::OcrBurst)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowKind::Welcome => "welcome",
            FlowKind::PublicAuth => "public_auth",
            FlowKind::Authenticated => "authenticated",
            FlowKind::OcrBurst => "ocr_burst",
            FlowKind::LoginProbe => "login_probe",
            FlowKind::HealthMonitor => "health_monitor",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ScenarioPlan {
    pub name: String,
    pub executor: Executor,
    pub flow: FlowKind,
    pub start_time: Duration,
    pub think_time: Duration,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// 0 代表連線層失敗（沒有拿到 HTTP 回應）
    pub status: u16,
    pub body: String,
    pub duration: Duration,
    pub error: Option<String>,
}

impl GatewayResponse {
    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    /// 200-399 以外（含 0）都算失敗
    pub fn is_failed(&self) -> bool {
        !(200..400).contains(&self.status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSample {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub scenario: String,
    pub endpoint: String,
    pub method: String,
    pub status: u16,
    pub duration_ms: f64,
    /// scenario 的 tags，格式 `k=v;k=v`
    pub tags: String,
}

/// 把 tags 壓成 CSV 單一欄位：`test_type=public_auth;team=gateway`
pub fn format_tags(tags: &BTreeMap<String, String>) -> String {
    tags.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(";")
}

/// setup 與 login probe 使用的帳號
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            email: "test@example.com".to_string(),
            password: "test".to_string(),
        }
    }
}

/// 每一次 iteration 執行時帶入的資訊
#[derive(Debug, Clone)]
pub struct IterationContext {
    pub scenario: String,
    pub vu: usize,
    pub iteration: u64,
    pub token: Option<std::sync::Arc<str>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_planned_duration_and_max_vus() {
        let ramping = Executor::RampingVus {
            start_vus: 0,
            stages: vec![
                Stage {
                    duration: Duration::from_secs(30),
                    target: 10,
                },
                Stage {
                    duration: Duration::from_secs(60),
                    target: 10,
                },
                Stage {
                    duration: Duration::from_secs(30),
                    target: 0,
                },
            ],
            graceful_ramp_down: Duration::from_secs(30),
        };
        assert_eq!(ramping.planned_duration(), Duration::from_secs(120));
        assert_eq!(ramping.max_vus(), 10);
        assert_eq!(ramping.name(), "ramping-vus");
    }

    #[test]
    fn test_response_failure_classification() {
        let mut resp = GatewayResponse {
            status: 200,
            body: String::new(),
            duration: Duration::ZERO,
            error: None,
        };
        assert!(!resp.is_failed());
        resp.status = 302;
        assert!(!resp.is_failed());
        resp.status = 429;
        assert!(resp.is_failed());
        assert!(resp.is_rate_limited());
        resp.status = 0;
        assert!(resp.is_failed());
    }

    #[test]
    fn test_flow_kind_defaults() {
        assert_eq!(FlowKind::Welcome.default_think_time(), Duration::from_secs(1));
        assert!(FlowKind::OcrBurst.requires_token());
        assert!(!FlowKind::PublicAuth.requires_token());
        let parsed: FlowKind = serde_json::from_str("\"health_monitor\"").unwrap();
        assert_eq!(parsed, FlowKind::HealthMonitor);
    }
}
