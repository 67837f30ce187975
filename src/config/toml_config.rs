use crate::core::client::DEFAULT_TIMEOUT;
use crate::core::executor::DEFAULT_GRACEFUL_STOP;
use crate::core::flows::DEFAULT_WELCOME_TEXT;
use crate::core::thresholds::{parse_thresholds, Threshold};
use crate::domain::model::{Credentials, Executor, FlowKind, ScenarioPlan, Stage};
use crate::utils::duration::{parse_duration, parse_optional_duration};
use crate::utils::error::{LoadTestError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_positive_number, validate_url, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(600);
const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestConfig {
    pub test: TestInfo,
    pub target: TargetConfig,
    pub auth: Option<AuthConfig>,
    pub scenarios: Vec<ScenarioConfig>,
    pub thresholds: Option<BTreeMap<String, Vec<String>>>,
    pub monitoring: Option<MonitoringConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestInfo {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub base_url: String,
    pub timeout: Option<String>,
    pub welcome_text: Option<String>,
    pub headers: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    pub flow: FlowKind,
    pub executor: ExecutorConfig,
    pub start_time: Option<String>,
    pub think_time: Option<String>,
    pub tags: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ExecutorConfig {
    RampingVus {
        start_vus: Option<usize>,
        stages: Vec<StageConfig>,
        graceful_ramp_down: Option<String>,
    },
    ConstantVus {
        vus: usize,
        duration: String,
    },
    SharedIterations {
        vus: Option<usize>,
        iterations: usize,
        max_duration: Option<String>,
    },
    ConstantArrivalRate {
        rate: usize,
        time_unit: Option<String>,
        duration: String,
        pre_allocated_vus: usize,
        max_vus: Option<usize>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub duration: String,
    pub target: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub sample_interval: Option<String>,
    /// 保留每一筆 request 樣本（CSV 匯出需要）
    pub keep_samples: Option<bool>,
}

impl LoadTestConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(LoadTestError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| LoadTestError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數：`${VAR}` 或 `${VAR:-default}`，找不到且無預設值時保留原字串
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| LoadTestError::config(format!("env substitution pattern: {}", e)))?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            match (std::env::var(var_name), caps.get(2)) {
                (Ok(value), _) => value,
                (Err(_), Some(default)) => default.as_str().to_string(),
                (Err(_), None) => caps[0].to_string(),
            }
        });

        Ok(result.to_string())
    }

    /// 命令列覆蓋設定
    pub fn apply_overrides(
        &mut self,
        base_url: Option<&str>,
        email: Option<&str>,
        password: Option<&str>,
    ) {
        if let Some(url) = base_url {
            tracing::info!("🔧 Base URL overridden to: {}", url);
            self.target.base_url = url.to_string();
        }
        if email.is_some() || password.is_some() {
            let current = self.credentials();
            self.auth = Some(AuthConfig {
                email: email.map(str::to_string).unwrap_or(current.email),
                password: password.map(str::to_string).unwrap_or(current.password),
            });
        }
    }

    pub fn credentials(&self) -> Credentials {
        self.auth
            .as_ref()
            .map(|a| Credentials {
                email: a.email.clone(),
                password: a.password.clone(),
            })
            .unwrap_or_default()
    }

    pub fn timeout(&self) -> Result<Duration> {
        parse_optional_duration(self.target.timeout.as_deref(), DEFAULT_TIMEOUT)
    }

    pub fn welcome_text(&self) -> &str {
        self.target
            .welcome_text
            .as_deref()
            .unwrap_or(DEFAULT_WELCOME_TEXT)
    }

    pub fn headers(&self) -> HashMap<String, String> {
        self.target.headers.clone().unwrap_or_default()
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }

    pub fn keep_samples(&self) -> bool {
        self.monitoring
            .as_ref()
            .and_then(|m| m.keep_samples)
            .unwrap_or(false)
    }

    pub fn sample_interval(&self) -> Result<Duration> {
        parse_optional_duration(
            self.monitoring
                .as_ref()
                .and_then(|m| m.sample_interval.as_deref()),
            DEFAULT_SAMPLE_INTERVAL,
        )
    }

    pub fn thresholds(&self) -> Result<Vec<Threshold>> {
        match &self.thresholds {
            Some(map) => parse_thresholds(map),
            None => Ok(Vec::new()),
        }
    }

    /// 是否有 scenario 需要先登入
    pub fn needs_token(&self) -> bool {
        self.scenarios.iter().any(|s| s.flow.requires_token())
    }

    pub fn scenario_plans(&self) -> Result<Vec<ScenarioPlan>> {
        self.scenarios.iter().map(ScenarioConfig::to_plan).collect()
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validate_non_empty_string("test.name", &self.test.name)?;
        validate_url("target.base_url", &self.target.base_url)?;
        self.timeout()?;
        self.sample_interval()?;

        if self.scenarios.is_empty() {
            return Err(LoadTestError::MissingConfigError {
                field: "scenarios".to_string(),
            });
        }

        let mut names = HashSet::new();
        for scenario in &self.scenarios {
            validate_non_empty_string("scenarios.name", &scenario.name)?;
            if !names.insert(scenario.name.as_str()) {
                return Err(LoadTestError::ConfigValidationError {
                    field: "scenarios.name".to_string(),
                    message: format!("duplicate scenario name '{}'", scenario.name),
                });
            }
        }

        self.scenario_plans()?;
        self.thresholds()?;

        if let Some(auth) = &self.auth {
            validate_non_empty_string("auth.email", &auth.email)?;
        }

        Ok(())
    }
}

impl ScenarioConfig {
    pub fn to_plan(&self) -> Result<ScenarioPlan> {
        let field = |name: &str| format!("scenarios.{}.executor.{}", self.name, name);

        let executor = match &self.executor {
            ExecutorConfig::RampingVus {
                start_vus,
                stages,
                graceful_ramp_down,
            } => {
                if stages.is_empty() {
                    return Err(LoadTestError::MissingConfigError {
                        field: field("stages"),
                    });
                }
                let stages = stages
                    .iter()
                    .map(|s| -> Result<Stage> {
                        Ok(Stage {
                            duration: parse_duration(&s.duration)?,
                            target: s.target,
                        })
                    })
                    .collect::<Result<Vec<Stage>>>()?;
                Executor::RampingVus {
                    start_vus: start_vus.unwrap_or(0),
                    stages,
                    graceful_ramp_down: parse_optional_duration(
                        graceful_ramp_down.as_deref(),
                        DEFAULT_GRACEFUL_STOP,
                    )?,
                }
            }
            ExecutorConfig::ConstantVus { vus, duration } => {
                validate_positive_number(&field("vus"), *vus, 1)?;
                Executor::ConstantVus {
                    vus: *vus,
                    duration: parse_duration(duration)?,
                }
            }
            ExecutorConfig::SharedIterations {
                vus,
                iterations,
                max_duration,
            } => {
                let vus = vus.unwrap_or(1);
                validate_positive_number(&field("vus"), vus, 1)?;
                validate_positive_number(&field("iterations"), *iterations, 1)?;
                Executor::SharedIterations {
                    vus,
                    iterations: *iterations,
                    max_duration: parse_optional_duration(
                        max_duration.as_deref(),
                        DEFAULT_MAX_DURATION,
                    )?,
                }
            }
            ExecutorConfig::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
                pre_allocated_vus,
                max_vus,
            } => {
                validate_positive_number(&field("rate"), *rate, 1)?;
                let max_vus = max_vus.unwrap_or(*pre_allocated_vus);
                validate_positive_number(&field("max_vus"), max_vus, 1)?;
                if max_vus < *pre_allocated_vus {
                    return Err(LoadTestError::InvalidConfigValueError {
                        field: field("max_vus"),
                        value: max_vus.to_string(),
                        reason: format!(
                            "must be at least pre_allocated_vus ({})",
                            pre_allocated_vus
                        ),
                    });
                }
                let time_unit =
                    parse_optional_duration(time_unit.as_deref(), Duration::from_secs(1))?;
                if time_unit.is_zero() {
                    return Err(LoadTestError::InvalidConfigValueError {
                        field: field("time_unit"),
                        value: "0".to_string(),
                        reason: "time unit must be positive".to_string(),
                    });
                }
                if time_unit.as_nanos() < *rate as u128 {
                    return Err(LoadTestError::InvalidConfigValueError {
                        field: field("rate"),
                        value: rate.to_string(),
                        reason: format!("more than one iteration per nanosecond of {:?}", time_unit),
                    });
                }
                Executor::ConstantArrivalRate {
                    rate: *rate,
                    time_unit,
                    duration: parse_duration(duration)?,
                    pre_allocated_vus: *pre_allocated_vus,
                    max_vus,
                }
            }
        };

        Ok(ScenarioPlan {
            name: self.name.clone(),
            executor,
            flow: self.flow,
            start_time: parse_optional_duration(self.start_time.as_deref(), Duration::ZERO)?,
            think_time: parse_optional_duration(
                self.think_time.as_deref(),
                self.flow.default_think_time(),
            )?,
            tags: self.tags.clone().unwrap_or_default(),
        })
    }
}

impl Validate for LoadTestConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
