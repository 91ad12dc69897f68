//! 负载生成器端到端测试
//!
//! 需要可访问的 Kafka 集群（`TEST_KAFKA_BROKERS`，默认 localhost:19092），
//! 且 clickstream / iot topic 已创建。默认忽略，使用
//! `cargo test --test e2e -- --ignored` 运行。

pub mod helpers;
pub mod suites;
