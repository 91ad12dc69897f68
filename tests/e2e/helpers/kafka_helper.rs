//! Kafka 辅助工具
//!
//! 从生产者写入的 topic 中消费消息，用于验证端到端链路。

use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use rdkafka::Message;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use uuid::Uuid;

/// 消费到的一条消息
#[derive(Debug, Clone)]
pub struct ConsumedMessage {
    pub topic: String,
    pub key: Option<String>,
    pub payload: serde_json::Value,
}

pub struct KafkaHelper {
    consumer: StreamConsumer,
}

impl KafkaHelper {
    /// 以独立的消费组订阅给定 topic
    pub fn subscribe(brokers: &str, topics: &[&str]) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", format!("loadgen-e2e-{}", Uuid::new_v4()))
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", "latest")
            .create()?;
        consumer.subscribe(topics)?;
        Ok(Self { consumer })
    }

    /// 在超时内最多收集 `limit` 条消息
    pub async fn collect(&self, limit: usize, timeout: Duration) -> Vec<ConsumedMessage> {
        let mut messages = Vec::new();
        let mut stream = self.consumer.stream();
        let deadline = tokio::time::Instant::now() + timeout;

        while messages.len() < limit {
            let next = tokio::time::timeout_at(deadline, stream.next()).await;
            let Ok(Some(Ok(message))) = next else {
                break;
            };
            let Some(payload) = message.payload() else {
                continue;
            };
            let Ok(payload) = serde_json::from_slice(payload) else {
                continue;
            };
            messages.push(ConsumedMessage {
                topic: message.topic().to_string(),
                key: message
                    .key()
                    .map(|k| String::from_utf8_lossy(k).into_owned()),
                payload,
            });
        }

        messages
    }
}
