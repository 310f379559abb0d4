use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::filter::LevelFilter;
use url::Url;

use appimage_manager::cli::{self, Command};
use appimage_manager::common::logger::{self, PrettyLogger};
use appimage_manager::installer::record::AppRecord;
use appimage_manager::installer::verify::ChecksumTable;
use appimage_manager::installer::{AppInstaller, InstallOptions};
use appimage_manager::progress::{
    ProgressConfig, ProgressDisplay, progress_session, set_progress_service,
};

const USER_AGENT: &str = concat!("appim/", env!("CARGO_PKG_VERSION"));

struct InstallArgs {
    urls: Vec<Url>,
    install_dir: PathBuf,
    checksums: Option<PathBuf>,
    verify: bool,
    concurrency: usize,
    refresh_rate: f64,
}

async fn run_install(args: InstallArgs) -> anyhow::Result<()> {
    let checksums = match &args.checksums {
        Some(path) => ChecksumTable::load(path)
            .await
            .with_context(|| format!("无法读取校验文件 {}", path.display()))?,
        None => ChecksumTable::default(),
    };
    debug!("已加载 {} 条校验值", checksums.len());

    let config = ProgressConfig::default().with_refresh_rate(args.refresh_rate);
    set_progress_service(Some(Arc::new(ProgressDisplay::new(config))));

    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("创建 HTTP 客户端失败")?;
    let options = InstallOptions {
        download_dir: std::env::temp_dir().join("appim"),
        install_dir: args.install_dir,
        concurrency: args.concurrency,
        verify: args.verify,
    };

    let urls = args.urls;
    info!("开始安装 {} 个应用", urls.len());
    let results = progress_session(urls.len(), |reporter| async move {
        let installer = AppInstaller::new(client, reporter, options);
        installer.install_all(&urls, &checksums).await
    })
    .await;

    PrettyLogger::separator();
    let mut failed = 0;
    for (url, result) in &results {
        match result {
            Ok(app) => {
                PrettyLogger::app_info(&app.name, app.path.display().to_string());
                if app.verified {
                    PrettyLogger::success(format!("{} 校验通过", app.name));
                } else {
                    PrettyLogger::warning(format!("{} 未经校验", app.name));
                }
            }
            Err(e) => {
                failed += 1;
                PrettyLogger::error(format!("{}: {}", url, e));
            }
        }
    }
    PrettyLogger::completion_summary(results.len() - failed, failed);

    if failed > 0 {
        anyhow::bail!("{} 个应用安装失败", failed);
    }
    Ok(())
}

async fn run_list(install_dir: PathBuf) -> anyhow::Result<()> {
    let records = AppRecord::load_all(&install_dir)
        .await
        .with_context(|| format!("无法读取安装记录 {}", install_dir.display()))?;

    if records.is_empty() {
        PrettyLogger::info(format!("{} 下没有已安装的应用", install_dir.display()));
        return Ok(());
    }
    for record in &records {
        PrettyLogger::app_info(&record.name, record.installed_path.display().to_string());
    }
    PrettyLogger::separator();
    PrettyLogger::info(format!("共 {} 个应用", records.len()));
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 解析命令行参数
    let args = cli::Cli::parse();

    // 初始化日志
    logger::init(if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    });

    match args.command {
        Command::Install {
            urls,
            install_dir,
            checksums,
            no_verify,
            concurrency,
        } => {
            run_install(InstallArgs {
                urls,
                install_dir: cli::resolve_install_dir(install_dir),
                checksums,
                verify: !no_verify,
                concurrency,
                refresh_rate: args.refresh_rate,
            })
            .await
        }
        Command::List { install_dir } => run_list(cli::resolve_install_dir(install_dir)).await,
    }
}
