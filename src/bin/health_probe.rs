use anyhow::{bail, Context, Result};
use clap::Parser;
use gateway_loadtest::config::profiles::load_profile;
use gateway_loadtest::config::toml_config::ExecutorConfig;
use gateway_loadtest::core::report::render_text_summary;
use gateway_loadtest::utils::duration::parse_duration;
use gateway_loadtest::utils::logger;
use gateway_loadtest::LoadTestRunner;

#[derive(Parser)]
#[command(name = "health-probe")]
#[command(about = "Poll the gateway health endpoint and report availability")]
struct Args {
    /// Gateway base URL
    #[arg(long, default_value = "http://localhost:8080")]
    base_url: String,

    /// Time between probes
    #[arg(short, long, default_value = "5s")]
    interval: String,

    /// Total probing time
    #[arg(short, long, default_value = "60s")]
    duration: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logger::init_cli_logger(args.verbose);

    // 先檢查格式，錯誤訊息比較好懂
    parse_duration(&args.interval).context("invalid --interval")?;
    parse_duration(&args.duration).context("invalid --duration")?;

    let mut config = load_profile("health-monitor")?;
    config.apply_overrides(Some(&args.base_url), None, None);
    for scenario in &mut config.scenarios {
        scenario.think_time = Some(args.interval.clone());
        scenario.executor = ExecutorConfig::ConstantVus {
            vus: 1,
            duration: args.duration.clone(),
        };
    }

    tracing::info!(
        "🩺 Probing {} every {} for {}",
        args.base_url,
        args.interval,
        args.duration
    );

    let runner = LoadTestRunner::new(config)?;
    let cancel = runner.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.send_replace(true);
        }
    });

    let report = runner.run().await?;
    println!("{}", render_text_summary(&report));

    let failed = report.summary.http_req_failed;
    if failed.passes > 0 {
        bail!(
            "{} of {} health probes failed",
            failed.passes,
            failed.total()
        );
    }

    println!("✅ Gateway healthy for the whole probe window");
    Ok(())
}
