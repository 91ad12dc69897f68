//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。
//! 合并后的配置文档同时保留原始树结构，供点路径查询和环境变量导出使用。

use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Kafka 配置
///
/// 前半部分是生产者客户端参数，后半部分是集群拓扑信息（分区数、副本数、
/// 对外端口），后者不影响生产者本身，只用于导出给部署脚本。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub brokers: String,
    pub client_id: String,
    /// 确认级别："0"（不确认）、"1"（leader 确认）、"all"（全部副本确认）
    pub acks: String,
    pub batch_size_bytes: u32,
    pub linger_ms: u64,
    /// none / gzip / snappy / lz4 / zstd
    pub compression: String,
    pub queue_buffering_max_messages: u32,
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub message_timeout_ms: u64,
    pub metadata_timeout_ms: u64,
    /// 启动连接的总尝试次数
    pub connect_attempts: u32,
    pub connect_backoff_ms: u64,

    pub kraft_cluster_id: String,
    pub partitions: u32,
    pub replication_factor: u32,
    pub min_insync_replicas: u32,
    pub external_ports: ExternalPorts,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "kafka-1:9092".to_string(),
            client_id: "learning-producer".to_string(),
            acks: "1".to_string(),
            batch_size_bytes: 32_768,
            linger_ms: 5,
            compression: "lz4".to_string(),
            queue_buffering_max_messages: 100_000,
            retries: 5,
            retry_backoff_ms: 1_000,
            message_timeout_ms: 30_000,
            metadata_timeout_ms: 10_000,
            connect_attempts: 10,
            connect_backoff_ms: 5_000,
            kraft_cluster_id: String::new(),
            partitions: 6,
            replication_factor: 3,
            min_insync_replicas: 2,
            external_ports: ExternalPorts::default(),
        }
    }
}

impl KafkaConfig {
    /// 启动连接的重试策略：固定间隔，不做指数退避
    pub fn connect_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.connect_attempts.saturating_sub(1),
            Duration::from_millis(self.connect_backoff_ms),
        )
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }
}

/// 各 broker 暴露给宿主机的端口
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalPorts {
    pub broker_1: u16,
    pub broker_2: u16,
    pub broker_3: u16,
}

impl Default for ExternalPorts {
    fn default() -> Self {
        Self {
            broker_1: 19092,
            broker_2: 29092,
            broker_3: 39092,
        }
    }
}

/// 两类事件各自的目标 topic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    pub interaction: String,
    pub telemetry: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            interaction: "clickstream".to_string(),
            telemetry: "iot".to_string(),
        }
    }
}

/// 按事件类别区分的一组数值
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerKind {
    pub interaction: f64,
    pub telemetry: f64,
}

/// 预生成值池的大小
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSizes {
    pub user_ids: usize,
    pub device_ids: usize,
    pub user_agents: usize,
    pub cities: usize,
}

impl Default for PoolSizes {
    fn default() -> Self {
        Self {
            user_ids: 9_999,
            device_ids: 4_999,
            user_agents: 100,
            cities: 50,
        }
    }
}

/// 事件生成配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// 基础速率（每秒事件数）
    pub events_per_second: PerKind,
    /// 基础速率的放大倍数，实际目标速率 = 基础速率 × 倍数
    pub rate_multiplier: PerKind,
    pub batch_size: usize,
    /// 两批之间的最短等待，防止高速率下空转
    pub min_sleep_ms: u64,
    /// 时间戳相对墙钟的固定滞后
    pub timestamp_skew_secs: u64,
    pub timestamp_refresh_ms: u64,
    pub pools: PoolSizes,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            events_per_second: PerKind {
                interaction: 50.0,
                telemetry: 30.0,
            },
            rate_multiplier: PerKind {
                interaction: 4.0,
                telemetry: 3.0,
            },
            batch_size: 50,
            min_sleep_ms: 1,
            timestamp_skew_secs: 30,
            timestamp_refresh_ms: 1_000,
            pools: PoolSizes::default(),
        }
    }
}

impl GeneratorConfig {
    pub fn interaction_rate(&self) -> f64 {
        self.events_per_second.interaction * self.rate_multiplier.interaction
    }

    pub fn telemetry_rate(&self) -> f64 {
        self.events_per_second.telemetry * self.rate_multiplier.telemetry
    }

    pub fn min_sleep(&self) -> Duration {
        Duration::from_millis(self.min_sleep_ms)
    }

    pub fn timestamp_skew(&self) -> Duration {
        Duration::from_secs(self.timestamp_skew_secs)
    }

    pub fn timestamp_refresh(&self) -> Duration {
        Duration::from_millis(self.timestamp_refresh_ms)
    }
}

/// 提交失败后的恢复等待
///
/// 默认 multiplier = 1.0，即固定 100ms；调大 multiplier 可让连续失败逐步退避，
/// 上限为 max_delay_ms。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            multiplier: 1.0,
        }
    }
}

impl RecoveryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            // 生产循环从不放弃，次数上限无意义
            max_retries: u32::MAX,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.initial_delay_ms)),
            multiplier: self.multiplier.max(1.0),
        }
    }
}

/// 生产引擎的周期任务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub report_interval_secs: u64,
    pub flush_interval_secs: u64,
    pub flush_timeout_ms: u64,
    pub shutdown_flush_timeout_secs: u64,
    /// 关闭时等待每个任务退出的上限
    pub join_timeout_secs: u64,
    pub recovery: RecoveryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 10,
            flush_interval_secs: 5,
            flush_timeout_ms: 1_000,
            shutdown_flush_timeout_secs: 30,
            join_timeout_secs: 5,
            recovery: RecoveryConfig::default(),
        }
    }
}

/// 下游流处理作业的 worker 参数，仅用于环境变量导出
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamJobConfig {
    pub worker_memory: String,
    pub worker_cores: u32,
}

impl Default for StreamJobConfig {
    fn default() -> Self {
        Self {
            worker_memory: "2g".to_string(),
            worker_cores: 2,
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_port: 9090,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub kafka: KafkaConfig,
    pub topics: TopicsConfig,
    pub generator: GeneratorConfig,
    pub engine: EngineConfig,
    pub spark: StreamJobConfig,
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "event-producer".to_string(),
            environment: "development".to_string(),
            kafka: KafkaConfig::default(),
            topics: TopicsConfig::default(),
            generator: GeneratorConfig::default(),
            engine: EngineConfig::default(),
            spark: StreamJobConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// 导出到 .env 文件时的分组，顺序即输出顺序
const ENV_GROUPS: [(&str, &[&str]); 4] = [
    (
        "# ===== Kafka =====",
        &[
            "KAFKA_KRAFT_CLUSTER_ID",
            "KAFKA_PARTITIONS",
            "KAFKA_REPLICATION_FACTOR",
            "KAFKA_MIN_INSYNC",
        ],
    ),
    (
        "# Host-exposed ports for each broker",
        &["KAFKA_1_EXTERNAL", "KAFKA_2_EXTERNAL", "KAFKA_3_EXTERNAL"],
    ),
    (
        "# ===== Spark =====",
        &["SPARK_WORKER_MEMORY", "SPARK_WORKER_CORES"],
    ),
    (
        "# ===== Generator =====",
        &["EVENTS_PER_SEC_CLICK", "EVENTS_PER_SEC_IOT"],
    ),
];

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序见 [`ConfigDocument::load`]。
    pub fn load(explicit_file: Option<&Path>) -> Result<Self, ConfigError> {
        ConfigDocument::load(explicit_file)?.app_config()
    }

    /// 转换为部署脚本使用的环境变量（保持稳定顺序）
    pub fn to_env_vars(&self) -> Vec<(&'static str, String)> {
        let kafka = &self.kafka;
        let ports = &kafka.external_ports;
        let rates = &self.generator.events_per_second;

        vec![
            ("KAFKA_KRAFT_CLUSTER_ID", kafka.kraft_cluster_id.clone()),
            ("KAFKA_PARTITIONS", kafka.partitions.to_string()),
            (
                "KAFKA_REPLICATION_FACTOR",
                kafka.replication_factor.to_string(),
            ),
            ("KAFKA_MIN_INSYNC", kafka.min_insync_replicas.to_string()),
            ("KAFKA_1_EXTERNAL", ports.broker_1.to_string()),
            ("KAFKA_2_EXTERNAL", ports.broker_2.to_string()),
            ("KAFKA_3_EXTERNAL", ports.broker_3.to_string()),
            ("SPARK_WORKER_MEMORY", self.spark.worker_memory.clone()),
            ("SPARK_WORKER_CORES", self.spark.worker_cores.to_string()),
            ("EVENTS_PER_SEC_CLICK", format_rate(rates.interaction)),
            ("EVENTS_PER_SEC_IOT", format_rate(rates.telemetry)),
        ]
    }

    /// 渲染 .env 文件内容
    pub fn render_env_file(&self) -> String {
        let vars = self.to_env_vars();
        let mut out = String::new();
        out.push_str("# Auto-generated from the producer configuration - DO NOT EDIT MANUALLY\n");
        out.push_str("# Edit the configuration file instead and regenerate this file\n");

        for (header, keys) in ENV_GROUPS {
            out.push('\n');
            out.push_str(header);
            out.push('\n');
            for key in keys {
                if let Some((_, value)) = vars.iter().find(|(k, _)| k == key) {
                    let _ = writeln!(out, "{key}={value}");
                }
            }
        }

        out
    }

    /// 写入 .env 文件
    pub fn export_to_env_file(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.render_env_file())
    }

    /// 渲染为 shell export 语句
    pub fn export_to_shell(&self) -> String {
        self.to_env_vars()
            .into_iter()
            .map(|(key, value)| format!("export {key}={value}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// 整数速率不带小数点输出，与部署脚本的整型变量保持一致
fn format_rate(rate: f64) -> String {
    if rate.fract() == 0.0 {
        format!("{}", rate as i64)
    } else {
        rate.to_string()
    }
}

/// 合并后的原始配置文档
///
/// 内置默认值作为最底层来源，因此点路径查询对未显式配置的键同样返回默认值。
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    inner: Config,
}

impl ConfigDocument {
    /// 加载配置文档
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. 内置默认值（`AppConfig::default()`）
    /// 2. {CONFIG_DIR}/default.toml
    /// 3. {CONFIG_DIR}/{LOADGEN_ENV}.toml
    /// 4. 显式指定的配置文件（`--config`，TOML/YAML/JSON 按扩展名识别）
    /// 5. 环境变量（LOADGEN_ 前缀，双下划线分隔层级，如 LOADGEN_KAFKA__BROKERS -> kafka.brokers）
    pub fn load(explicit_file: Option<&Path>) -> Result<Self, ConfigError> {
        let env = std::env::var("LOADGEN_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let mut builder = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .set_override_option("environment", Some(env.clone()))?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{env}.toml"))).required(false),
            );

        if let Some(path) = explicit_file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let inner = builder
            .add_source(
                Environment::with_prefix("LOADGEN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(Self { inner })
    }

    /// 从内存中的 TOML 文本构建（默认值仍作为底层）
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let inner = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::from_str(content, config::FileFormat::Toml))
            .build()?;
        Ok(Self { inner })
    }

    /// 按点路径读取原始值，如 `get("kafka.partitions")`
    ///
    /// 路径不存在时返回 `None`。
    pub fn get(&self, key_path: &str) -> Option<serde_json::Value> {
        self.inner.get::<serde_json::Value>(key_path).ok()
    }

    /// 反序列化为类型化配置
    pub fn app_config(&self) -> Result<AppConfig, ConfigError> {
        self.inner.clone().try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.kafka.client_id, "learning-producer");
        assert_eq!(config.kafka.compression, "lz4");
        assert_eq!(config.generator.batch_size, 50);
        assert_eq!(config.topics.interaction, "clickstream");
        assert_eq!(config.topics.telemetry, "iot");
        assert_eq!(config.engine.shutdown_flush_timeout_secs, 30);
    }

    #[test]
    fn test_target_rates_apply_multipliers() {
        let generator = GeneratorConfig::default();
        assert_eq!(generator.interaction_rate(), 200.0);
        assert_eq!(generator.telemetry_rate(), 90.0);
    }

    #[test]
    fn test_connect_policy_is_fixed_ten_attempts() {
        let policy = KafkaConfig::default().connect_policy();
        assert_eq!(policy.max_attempts(), 10);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_secs(5));
    }

    #[test]
    fn test_recovery_policy_defaults_to_fixed_delay() {
        let policy = RecoveryConfig::default().to_policy();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(50), Duration::from_millis(100));

        let escalating = RecoveryConfig {
            multiplier: 2.0,
            ..RecoveryConfig::default()
        }
        .to_policy();
        assert_eq!(escalating.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(escalating.delay_for_attempt(20), Duration::from_secs(5));
    }

    #[test]
    fn test_document_dot_path_lookup() {
        let doc = ConfigDocument::from_toml(
            r#"
            [kafka]
            partitions = 12

            [generator.events_per_second]
            interaction = 80.0
            "#,
        )
        .unwrap();

        assert_eq!(doc.get("kafka.partitions"), Some(serde_json::json!(12)));
        // 未显式配置的键回落到默认值
        assert_eq!(
            doc.get("kafka.compression"),
            Some(serde_json::json!("lz4"))
        );
        assert!(doc.get("kafka.no_such_key").is_none());
        assert!(doc.get("nothing.here.at.all").is_none());

        let app = doc.app_config().unwrap();
        assert_eq!(app.kafka.partitions, 12);
        assert_eq!(app.generator.events_per_second.interaction, 80.0);
        assert_eq!(app.generator.events_per_second.telemetry, 30.0);
    }

    #[test]
    fn test_to_env_vars() {
        let config = AppConfig::default();
        let vars = config.to_env_vars();

        let lookup = |key: &str| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(lookup("KAFKA_PARTITIONS"), "6");
        assert_eq!(lookup("KAFKA_REPLICATION_FACTOR"), "3");
        assert_eq!(lookup("KAFKA_MIN_INSYNC"), "2");
        assert_eq!(lookup("KAFKA_2_EXTERNAL"), "29092");
        assert_eq!(lookup("SPARK_WORKER_MEMORY"), "2g");
        assert_eq!(lookup("EVENTS_PER_SEC_CLICK"), "50");
        assert_eq!(lookup("EVENTS_PER_SEC_IOT"), "30");
        assert_eq!(vars.len(), 11);
    }

    #[test]
    fn test_render_env_file_groups_sections() {
        let rendered = AppConfig::default().render_env_file();

        assert!(rendered.starts_with("# Auto-generated"));
        let kafka_pos = rendered.find("# ===== Kafka =====").unwrap();
        let spark_pos = rendered.find("# ===== Spark =====").unwrap();
        let gen_pos = rendered.find("# ===== Generator =====").unwrap();
        assert!(kafka_pos < spark_pos && spark_pos < gen_pos);
        assert!(rendered.contains("KAFKA_1_EXTERNAL=19092\n"));
        assert!(rendered.contains("SPARK_WORKER_CORES=2\n"));
    }

    #[test]
    fn test_export_to_shell() {
        let shell = AppConfig::default().export_to_shell();
        let lines: Vec<&str> = shell.lines().collect();

        assert_eq!(lines.len(), 11);
        assert!(lines.iter().all(|l| l.starts_with("export ")));
        assert!(lines.contains(&"export KAFKA_PARTITIONS=6"));
    }

    #[test]
    fn test_export_to_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");

        AppConfig::default().export_to_env_file(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("EVENTS_PER_SEC_IOT=30"));
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(50.0), "50");
        assert_eq!(format_rate(12.5), "12.5");
    }
}
