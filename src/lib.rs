pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use config::cli::LocalStorage;
#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::toml_config::LoadTestConfig;

pub use core::report::RunReport;
pub use core::runner::LoadTestRunner;
pub use utils::error::{LoadTestError, Result};

/// 門檻未通過時的退出碼，與 k6 相同
pub const THRESHOLDS_FAILED_EXIT_CODE: i32 = 99;
