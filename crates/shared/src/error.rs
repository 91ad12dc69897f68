//! 统一错误处理模块
//!
//! 定义负载生成器中所有共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum LoadgenError {
    // ==================== 连接错误 ====================
    /// 启动阶段连接 broker 失败，重试耗尽后对进程是致命的
    #[error("连接 Kafka 失败（已尝试 {attempts} 次）: {message}")]
    Connection { attempts: u32, message: String },

    // ==================== Kafka 错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    /// 同步提交失败（如本地队列已满），只影响当前批次
    #[error("消息提交失败: topic={topic} - {message}")]
    Submission { topic: String, message: String },

    // ==================== 序列化错误 ====================
    #[error("序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    #[error("无效的参数: {field} - {message}")]
    InvalidArgument { field: String, message: String },

    // ==================== 通用错误 ====================
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, LoadgenError>;

impl LoadgenError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "CONNECTION_ERROR",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Submission { .. } => "SUBMISSION_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Io(_) => "IO_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Kafka(_) | Self::Submission { .. }
        )
    }
}
