use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use notifier::{
    app::{install_metrics_exporter, render_inspection, Application},
    cli::{Cli, Commands},
    shutdown::ShutdownManager,
};
use notifier_core::{
    config::AppConfig,
    logging::{init_logging, LogFormat},
};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{e:#}");
        eprintln!("错误: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // 加载配置，命令行参数覆盖日志设置
    let mut config = AppConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载配置失败".to_string(),
    })?;
    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.observability.log_format = format.clone();
    }

    let log_format: LogFormat = config.observability.log_format.parse()?;
    init_logging(&config.observability.log_level, log_format)?;

    info!("启动预订通知服务");
    if let Some(path) = &cli.config {
        info!("配置文件: {path}");
    }

    match cli.command {
        Commands::Worker(args) => {
            install_metrics_exporter(&config.observability)?;

            let app = Application::new(config).await?;
            let shutdown = ShutdownManager::new();
            shutdown.listen_for_signals();

            let result = app.run_worker(&args, &shutdown).await;
            app.close().await;
            result?;
        }
        Commands::Submit(args) => {
            let app = Application::new(config).await?;
            let result = app.submit(&args).await;
            app.close().await;

            let envelope = result?;
            println!("{}", envelope.task_id());
        }
        Commands::Inspect(args) => {
            let app = Application::new(config).await?;
            let result = app
                .inspect(Duration::from_secs(args.wait_seconds))
                .await;
            app.close().await;

            for line in render_inspection(args.action, &result?, chrono::Utc::now()) {
                println!("{line}");
            }
        }
    }

    info!("预订通知服务已退出");
    Ok(())
}
