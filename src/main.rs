use clap::Parser;
use gateway_loadtest::config::profiles::BUILTIN_PROFILES;
use gateway_loadtest::config::LogFormat;
use gateway_loadtest::core::report::{export_csv, export_json, render_text_summary};
use gateway_loadtest::utils::error::{ErrorSeverity, LoadTestError};
use gateway_loadtest::utils::{logger, validation::Validate};
use gateway_loadtest::{
    CliConfig, LoadTestConfig, LoadTestRunner, LocalStorage, THRESHOLDS_FAILED_EXIT_CODE,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliConfig::parse();

    if args.list_profiles {
        println!("📦 Built-in profiles:");
        for profile in BUILTIN_PROFILES {
            println!("  {:<20} {}", profile.name, profile.description);
        }
        return Ok(());
    }

    // 初始化日誌
    match args.log_format {
        LogFormat::Text => logger::init_cli_logger(args.verbose),
        LogFormat::Json => logger::init_json_logger(args.verbose),
    }

    tracing::info!("🚀 Starting gateway-loadtest");
    if args.verbose {
        tracing::debug!("CLI config: {:?}", args);
    }

    if let Err(e) = args.validate() {
        fail(&e);
    }

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => fail(&e),
    };

    // 驗證配置
    if let Err(e) = config.validate() {
        fail(&e);
    }
    tracing::info!("✅ Configuration loaded and validated successfully");

    display_config_summary(&config, &args);

    if args.dry_run {
        tracing::info!("🔍 DRY RUN MODE - No traffic will be sent");
        perform_dry_run(&config)?;
        return Ok(());
    }

    let monitor_enabled = args.monitor || config.monitoring_enabled();
    if monitor_enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    let runner = match LoadTestRunner::new(config) {
        Ok(runner) => runner
            .with_monitoring(monitor_enabled)
            .with_samples(args.out_csv.is_some()),
        Err(e) => fail(&e),
    };

    let cancel = runner.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("🛑 Interrupted, stopping scenarios...");
            cancel.send_replace(true);
        }
    });

    let report = match runner.run().await {
        Ok(report) => report,
        Err(e) => fail(&e),
    };

    println!("{}", render_text_summary(&report));

    let storage = LocalStorage::new(".".to_string());
    if let Some(path) = &args.summary_export {
        match export_json(&storage, path, &report).await {
            Ok(written) => println!("📁 Summary saved to: {}", written),
            Err(e) => fail(&e),
        }
    }
    if let Some(path) = &args.out_csv {
        match export_csv(&storage, path, &runner.metrics().samples()).await {
            Ok(written) => println!("📁 Request samples saved to: {}", written),
            Err(e) => fail(&e),
        }
    }

    if !report.thresholds_passed() {
        for threshold in report.failed_thresholds() {
            tracing::error!(
                "❌ Threshold crossed: {} {}",
                threshold.metric,
                threshold.expression
            );
        }
        eprintln!("❌ Some thresholds have failed");
        std::process::exit(THRESHOLDS_FAILED_EXIT_CODE);
    }

    println!("✅ Load test completed, all thresholds passed");
    Ok(())
}

fn fail(e: &LoadTestError) -> ! {
    tracing::error!(
        "❌ Load test failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,      // 警告，但成功
        ErrorSeverity::Medium => 2,   // 可重試
        ErrorSeverity::High => 1,     // 執行錯誤
        ErrorSeverity::Critical => 3, // 系統錯誤
    };
    std::process::exit(exit_code);
}

fn display_config_summary(config: &LoadTestConfig, args: &CliConfig) {
    println!("📋 Configuration Summary:");
    println!("  Test: {}", config.test.name);
    if let Some(description) = &config.test.description {
        println!("  Description: {}", description);
    }
    println!("  Target: {}", config.target.base_url);
    println!("  Scenarios: {}", config.scenarios.len());
    println!(
        "  Thresholds: {}",
        config
            .thresholds
            .as_ref()
            .map(|t| t.values().map(Vec::len).sum::<usize>())
            .unwrap_or(0)
    );
    println!("  Needs token: {}", config.needs_token());

    if args.dry_run {
        println!("  🔍 DRY RUN MODE ENABLED");
    }

    println!();
}

fn perform_dry_run(config: &LoadTestConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Dry Run Analysis:");
    println!();

    println!("🎬 Scenarios:");
    for plan in config.scenario_plans()? {
        println!("  {} ({})", plan.name, plan.flow);
        println!("    Executor: {}", plan.executor);
        println!("    Start: +{:?}", plan.start_time);
        println!("    Planned duration: {:?}", plan.executor.planned_duration());
        println!("    Max VUs: {}", plan.executor.max_vus());
        println!("    Think time: {:?}", plan.think_time);
        if !plan.tags.is_empty() {
            let tags = plan
                .tags
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(", ");
            println!("    Tags: {}", tags);
        }
    }

    let thresholds = config.thresholds()?;
    if !thresholds.is_empty() {
        println!();
        println!("🎯 Thresholds:");
        for threshold in thresholds {
            println!("  {}", threshold);
        }
    }

    if config.needs_token() {
        println!();
        println!("🔐 Setup will log in as {}", config.credentials().email);
    }

    println!();
    println!("✅ Dry run completed - configuration looks good!");
    Ok(())
}
