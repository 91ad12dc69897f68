//! 共享库
//!
//! 包含负载生成器共用的配置、错误处理、事件模型、Kafka 客户端、重试与可观测性等基础设施代码。

pub mod config;
pub mod error;
pub mod events;
pub mod kafka;
pub mod observability;
pub mod retry;
pub mod test_utils;
