//! 命令执行器
//!
//! 负责执行各 CLI 子命令的具体逻辑，并把结果映射为进程退出码。

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tokio::signal;
use tracing::info;

use loadgen_shared::config::{AppConfig, ConfigDocument};
use loadgen_shared::observability;

use crate::cli::{Commands, ConfigAction, RunArgs};
use crate::engine::{EngineContext, ProductionEngine};
use crate::shutdown::EXIT_CLEAN;

/// 命令执行器
///
/// 持有合并后的配置文档与类型化配置，作为 CLI 与引擎之间的桥梁。
pub struct CommandRunner {
    document: ConfigDocument,
    config: AppConfig,
}

impl CommandRunner {
    /// 加载配置；`log_level` 非空时覆盖配置中的日志级别
    pub fn load(config_file: Option<&Path>, log_level: Option<String>) -> Result<Self> {
        let document = ConfigDocument::load(config_file).context("加载配置失败")?;
        let mut config = document.app_config().context("解析配置失败")?;
        if let Some(level) = log_level {
            config.observability.log_level = level;
        }
        Ok(Self { document, config })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 执行子命令，返回进程退出码
    pub async fn execute(self, command: Commands) -> Result<i32> {
        match command {
            Commands::Run(args) => self.run_producer(args).await,
            Commands::Config { action } => {
                // 工具命令只需要日志，不启动指标端点
                observability::tracing::init(&self.config.observability)
                    .context("初始化日志失败")?;
                match action {
                    ConfigAction::Get { key } => self.run_config_get(&key),
                    ConfigAction::GenerateEnv { output } => self.run_generate_env(&output),
                    ConfigAction::ExportShell => self.run_export_shell(),
                }
            }
        }
    }

    /// 执行 run 命令
    ///
    /// 连接 Kafka（带重试）→ 启动引擎 → 等待终止信号 → 优雅关闭。
    pub async fn run_producer(mut self, args: RunArgs) -> Result<i32> {
        args.apply(&mut self.config);
        let config = self.config;

        let _guard = observability::init(&config.service_name, &config.observability)
            .await
            .context("初始化可观测性失败")?;

        log_banner(&config);

        let ctx = EngineContext::connect(&config)
            .await
            .context("无法连接 Kafka，生产循环未启动")?;
        let engine = ProductionEngine::start(ctx).context("启动生产引擎失败")?;

        info!("按 Ctrl+C 停止生产");
        let outcome = engine.run_until(shutdown_signal()).await;

        info!(
            remaining = outcome.remaining,
            exit_code = outcome.exit_code(),
            "生产者已停止"
        );
        Ok(outcome.exit_code())
    }

    /// 执行 config get 命令
    ///
    /// 字符串值原样输出，其他值输出为 JSON。
    pub fn run_config_get(&self, key: &str) -> Result<i32> {
        let value = self
            .document
            .get(key)
            .ok_or_else(|| anyhow!("配置项不存在: {key}"))?;
        match value {
            serde_json::Value::String(s) => println!("{s}"),
            other => println!("{other}"),
        }
        Ok(EXIT_CLEAN)
    }

    /// 执行 config generate-env 命令
    pub fn run_generate_env(&self, output: &Path) -> Result<i32> {
        self.config
            .export_to_env_file(output)
            .with_context(|| format!("写入 {} 失败", output.display()))?;
        info!(path = %output.display(), "已生成环境变量文件");
        Ok(EXIT_CLEAN)
    }

    /// 执行 config export-shell 命令
    pub fn run_export_shell(&self) -> Result<i32> {
        println!("{}", self.config.export_to_shell());
        Ok(EXIT_CLEAN)
    }
}

/// 启动横幅：目标速率与生产者关键参数
fn log_banner(config: &AppConfig) {
    let kafka = &config.kafka;
    let generator = &config.generator;
    info!(
        environment = %config.environment,
        production = config.is_production(),
        brokers = %kafka.brokers,
        interaction_topic = %config.topics.interaction,
        telemetry_topic = %config.topics.telemetry,
        interaction_rate = generator.interaction_rate(),
        telemetry_rate = generator.telemetry_rate(),
        batch_size = generator.batch_size,
        "启动事件生产者"
    );
    info!(
        compression = %kafka.compression,
        acks = %kafka.acks,
        batch_size_bytes = kafka.batch_size_bytes,
        linger_ms = kafka.linger_ms,
        retries = kafka.retries,
        retry_backoff_ms = kafka.retry_backoff_ms,
        "生产者参数"
    );
}

/// 等待 Ctrl+C 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("安装 CTRL+C 信号处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("安装 SIGTERM 信号处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到 Ctrl+C，开始优雅关闭");
        }
        _ = terminate => {
            info!("收到 SIGTERM，开始优雅关闭");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner_from(toml: &str) -> CommandRunner {
        let document = ConfigDocument::from_toml(toml).unwrap();
        let config = document.app_config().unwrap();
        CommandRunner { document, config }
    }

    #[tokio::test]
    async fn test_config_command_reports_logging_init_failure() {
        let first = runner_from("").execute(Commands::Config {
            action: ConfigAction::ExportShell,
        });
        assert_eq!(first.await.unwrap(), EXIT_CLEAN);

        // 全局订阅者已安装，再次初始化的错误需要向上返回
        let second = runner_from("")
            .execute(Commands::Config {
                action: ConfigAction::ExportShell,
            })
            .await;
        let err = second.unwrap_err();
        assert!(err.to_string().contains("初始化日志失败"));
    }

    #[test]
    fn test_config_get_existing_and_missing() {
        let runner = runner_from("[kafka]\npartitions = 9\n");

        assert_eq!(runner.run_config_get("kafka.partitions").unwrap(), EXIT_CLEAN);
        assert!(runner.run_config_get("kafka.missing").is_err());
    }

    #[test]
    fn test_generate_env_writes_file() {
        let runner = runner_from("[spark]\nworker_memory = \"4g\"\n");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");

        runner.run_generate_env(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("SPARK_WORKER_MEMORY=4g"));
    }
}
