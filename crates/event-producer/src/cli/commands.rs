//! CLI 命令定义
//!
//! 使用 clap derive 宏定义命令行接口结构。
//! 不带子命令时等同于 `run`。

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use loadgen_shared::config::AppConfig;

/// 合成事件负载生成器
///
/// 以可配置的目标速率持续向 Kafka 生产交互事件与遥测事件。
#[derive(Parser, Debug)]
#[command(name = "event-producer")]
#[command(version, about = "合成事件负载生成器")]
#[command(propagate_version = true)]
pub struct Cli {
    /// 额外的配置文件（TOML/YAML/JSON）
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 日志级别 (trace, debug, info, warn, error)，覆盖配置文件
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 持续生产事件直到收到 SIGINT/SIGTERM
    Run(RunArgs),

    /// 配置文档工具
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Self::Run(RunArgs::default())
    }
}

/// run 子命令的覆盖参数
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Kafka bootstrap 地址
    #[arg(long)]
    pub brokers: Option<String>,

    /// 交互事件目标速率（events/s），替代 基础速率 × 倍数
    #[arg(long)]
    pub interaction_rate: Option<f64>,

    /// 遥测事件目标速率（events/s），替代 基础速率 × 倍数
    #[arg(long)]
    pub telemetry_rate: Option<f64>,

    /// 每批事件数
    #[arg(long)]
    pub batch_size: Option<usize>,
}

impl RunArgs {
    /// 将命令行覆盖写入配置
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(brokers) = &self.brokers {
            config.kafka.brokers = brokers.clone();
        }
        if let Some(rate) = self.interaction_rate {
            config.generator.events_per_second.interaction = rate;
            config.generator.rate_multiplier.interaction = 1.0;
        }
        if let Some(rate) = self.telemetry_rate {
            config.generator.events_per_second.telemetry = rate;
            config.generator.rate_multiplier.telemetry = 1.0;
        }
        if let Some(batch_size) = self.batch_size {
            config.generator.batch_size = batch_size;
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// 按点路径读取配置值，如 kafka.partitions
    Get {
        key: String,
    },

    /// 生成部署用的 .env 文件
    GenerateEnv {
        /// 输出路径
        #[arg(short, long, default_value = ".env")]
        output: PathBuf,
    },

    /// 以 shell export 语句输出环境变量
    ExportShell,
}

// ============================================================================
// 单元测试
// ============================================================================
