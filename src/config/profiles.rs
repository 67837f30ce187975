use crate::config::toml_config::LoadTestConfig;
use crate::utils::error::{LoadTestError, Result};

pub struct BuiltinProfile {
    pub name: &'static str,
    pub description: &'static str,
    pub content: &'static str,
}

pub const BUILTIN_PROFILES: &[BuiltinProfile] = &[
    BuiltinProfile {
        name: "gateway",
        description: "Ramp 0 -> 10 VUs against GET / (p95 < 500ms, < 5% failures)",
        content: include_str!("../../profiles/gateway.toml"),
    },
    BuiltinProfile {
        name: "rate-limiter",
        description: "Arrival-rate bursts on auth, transactions and OCR; expects 429s",
        content: include_str!("../../profiles/rate-limiter.toml"),
    },
    BuiltinProfile {
        name: "simple-rate-limit",
        description: "Single VU, 50 back-to-back logins",
        content: include_str!("../../profiles/simple-rate-limit.toml"),
    },
    BuiltinProfile {
        name: "health-monitor",
        description: "Poll /actuator/health every 5s for 60s",
        content: include_str!("../../profiles/health-monitor.toml"),
    },
];

pub fn find_profile(name: &str) -> Option<&'static BuiltinProfile> {
    BUILTIN_PROFILES.iter().find(|p| p.name == name)
}

pub fn load_profile(name: &str) -> Result<LoadTestConfig> {
    let profile = find_profile(name).ok_or_else(|| LoadTestError::InvalidConfigValueError {
        field: "profile".to_string(),
        value: name.to_string(),
        reason: format!(
            "Unknown profile. Available profiles: {}",
            BUILTIN_PROFILES
                .iter()
                .map(|p| p.name)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    })?;
    LoadTestConfig::from_toml_str(profile.content)
}
