//! 事件生产引擎
//!
//! 以目标速率持续向 Kafka 生产两类合成事件，负责投递统计、周期 flush
//! 与有界数据丢失的优雅关闭。
//!
//! # 主要模块
//!
//! - `generator`: 基于预生成值池的批量事件合成
//! - `worker` / `rate_limiter`: 每个事件类别一个速率受控的生产循环
//! - `monitor`: 投递计数与吞吐报告
//! - `flush` / `shutdown`: 周期 flush 与协调关闭
//! - `engine`: 上下文构造与任务编排

pub mod cli;
pub mod engine;
pub mod flush;
pub mod generator;
pub mod monitor;
pub mod rate_limiter;
pub mod shutdown;
pub mod worker;
