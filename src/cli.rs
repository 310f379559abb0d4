use clap::{Parser, Subcommand};
use std::path::PathBuf;
use url::Url;

/// AppImage 包管理器
#[derive(Parser, Debug)]
#[command(name = "appim")]
#[command(version = "0.1")]
#[command(author = "rpeng252@gmail.com")]
#[command(about = "一个带并发进度显示的 AppImage 安装工具", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// 输出调试日志
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// 进度刷新频率 (次/秒)
    #[arg(long, value_name = "HZ", global = true)]
    #[arg(default_value_t = 4.0)]
    pub refresh_rate: f64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 下载并安装一个或多个 AppImage
    Install {
        /// AppImage 下载链接
        #[arg(value_name = "URL", required = true)]
        #[arg(value_hint = clap::ValueHint::Url)]
        urls: Vec<Url>,

        /// 安装目录 (默认 ~/Applications)
        #[arg(long, value_name = "DIR")]
        #[arg(value_hint = clap::ValueHint::DirPath)]
        install_dir: Option<PathBuf>,

        /// SHA256SUMS 校验文件
        #[arg(long, value_name = "FILE")]
        #[arg(value_hint = clap::ValueHint::FilePath)]
        checksums: Option<PathBuf>,

        /// 跳过校验阶段
        #[arg(long)]
        no_verify: bool,

        #[arg(long, value_name = "并发数", default_value_t = 3)]
        concurrency: usize,
    },

    /// 列出已安装的应用
    List {
        #[arg(long, value_name = "DIR")]
        #[arg(value_hint = clap::ValueHint::DirPath)]
        install_dir: Option<PathBuf>,
    },
}

/// 未指定时安装到 ~/Applications
pub fn resolve_install_dir(install_dir: Option<PathBuf>) -> PathBuf {
    install_dir.unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Applications")
    })
}
