//! Event Producer CLI
//!
//! 负载生成器的命令行入口点。
//! 退出码：0 全部投递，1 启动失败或致命错误，3 关闭后仍有消息未投递。

use clap::Parser;
use event_producer::cli::{Cli, CommandRunner};
use event_producer::shutdown::EXIT_FATAL;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let runner = match CommandRunner::load(cli.config.as_deref(), cli.log_level) {
        Ok(runner) => runner,
        Err(e) => {
            // 日志尚未初始化
            eprintln!("{e:#}");
            std::process::exit(EXIT_FATAL);
        }
    };

    let code = match runner.execute(cli.command.unwrap_or_default()).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "进程异常终止");
            EXIT_FATAL
        }
    };

    std::process::exit(code);
}
