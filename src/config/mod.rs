pub mod cli;
pub mod profiles;
pub mod toml_config;

#[cfg(feature = "cli")]
pub use self::args::{CliConfig, LogFormat};

#[cfg(feature = "cli")]
mod args {
    use super::profiles::load_profile;
    use super::toml_config::LoadTestConfig;
    use crate::utils::error::Result;
    use crate::utils::validation::{validate_path, Validate};
    use clap::{Parser, ValueEnum};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
    pub enum LogFormat {
        Text,
        Json,
    }

    #[derive(Debug, Clone, Parser)]
    #[command(name = "gateway-loadtest")]
    #[command(about = "Synthetic traffic generator for probing API gateway rate limits and latency")]
    pub struct CliConfig {
        /// Path to a load profile TOML file (overrides --profile)
        #[arg(short, long)]
        pub config: Option<String>,

        /// Built-in profile to run
        #[arg(short, long, default_value = "gateway")]
        pub profile: String,

        /// Override target.base_url
        #[arg(long)]
        pub base_url: Option<String>,

        /// Override auth.email used by setup and login probes
        #[arg(long)]
        pub email: Option<String>,

        /// Override auth.password used by setup and login probes
        #[arg(long)]
        pub password: Option<String>,

        /// Write the run report as JSON to this file
        #[arg(long)]
        pub summary_export: Option<String>,

        /// Write every request sample as CSV to this file
        #[arg(long)]
        pub out_csv: Option<String>,

        #[arg(long, value_enum, default_value = "text")]
        pub log_format: LogFormat,

        /// Enable verbose output
        #[arg(short, long)]
        pub verbose: bool,

        /// Sample the generator's own CPU and memory during the run
        #[arg(long)]
        pub monitor: bool,

        /// Print the plan without sending any traffic
        #[arg(long)]
        pub dry_run: bool,

        /// List built-in profiles and exit
        #[arg(long)]
        pub list_profiles: bool,
    }

    impl CliConfig {
        /// 載入配置檔或內建 profile，並套用命令列覆蓋
        pub fn load_config(&self) -> Result<LoadTestConfig> {
            let mut config = match &self.config {
                Some(path) => {
                    tracing::info!("📁 Loading configuration from: {}", path);
                    LoadTestConfig::from_file(path)?
                }
                None => {
                    tracing::info!("📦 Using built-in profile: {}", self.profile);
                    load_profile(&self.profile)?
                }
            };

            config.apply_overrides(
                self.base_url.as_deref(),
                self.email.as_deref(),
                self.password.as_deref(),
            );
            Ok(config)
        }
    }

    impl Validate for CliConfig {
        fn validate(&self) -> Result<()> {
            if let Some(path) = &self.config {
                validate_path("config", path)?;
            }
            if let Some(path) = &self.summary_export {
                validate_path("summary_export", path)?;
            }
            if let Some(path) = &self.out_csv {
                validate_path("out_csv", path)?;
            }
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_defaults_use_gateway_profile() {
            let cli = CliConfig::parse_from(["gateway-loadtest"]);
            assert_eq!(cli.profile, "gateway");
            assert_eq!(cli.log_format, LogFormat::Text);
            assert!(cli.validate().is_ok());

            let config = cli.load_config().unwrap();
            assert_eq!(config.test.name, "gateway");
        }

        #[test]
        fn test_cli_overrides_profile_values() {
            let cli = CliConfig::parse_from([
                "gateway-loadtest",
                "--profile",
                "rate-limiter",
                "--base-url",
                "http://staging-gateway:8080",
                "--email",
                "loadtest@example.com",
                "--log-format",
                "json",
            ]);
            let config = cli.load_config().unwrap();
            assert_eq!(config.target.base_url, "http://staging-gateway:8080");
            assert_eq!(config.credentials().email, "loadtest@example.com");
            assert_eq!(cli.log_format, LogFormat::Json);
        }
    }
}
