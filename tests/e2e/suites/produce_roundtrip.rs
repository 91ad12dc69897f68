//! 生产链路测试：真实 Kafka 上启动引擎，消费并校验事件格式

use std::time::Duration;

use event_producer::engine::{EngineContext, ProductionEngine};
use loadgen_shared::config::AppConfig;
use loadgen_shared::error::LoadgenError;
use loadgen_shared::test_utils::test_kafka_brokers;

use crate::helpers::KafkaHelper;

fn e2e_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.kafka.brokers = test_kafka_brokers();
    config.kafka.connect_attempts = 3;
    config.kafka.connect_backoff_ms = 1_000;
    config.generator.batch_size = 10;
    config
}

#[tokio::test]
#[ignore = "需要运行中的 Kafka 集群"]
async fn produced_events_reach_both_topics() -> anyhow::Result<()> {
    let config = e2e_config();
    let helper = KafkaHelper::subscribe(
        &config.kafka.brokers,
        &[&config.topics.interaction, &config.topics.telemetry],
    )?;
    // 等待消费组分配分区
    tokio::time::sleep(Duration::from_secs(3)).await;

    let ctx = EngineContext::connect(&config).await?;
    let engine = ProductionEngine::start(ctx)?;

    let messages = helper.collect(200, Duration::from_secs(20)).await;
    let outcome = engine.shutdown().await;

    assert!(outcome.drained(), "关闭后仍有 {} 条未投递", outcome.remaining);
    assert!(outcome.stats.delivered > 0);

    let interaction = messages
        .iter()
        .find(|m| m.topic == config.topics.interaction)
        .expect("应收到交互事件");
    let user_id = interaction.payload["user_id"].as_str().unwrap();
    assert_eq!(interaction.key.as_deref(), Some(user_id));
    assert!(user_id.starts_with('u'));
    assert!(interaction.payload["ua"].is_string());
    assert!(interaction.payload["ts"].as_str().unwrap().ends_with("+00:00"));

    let telemetry = messages
        .iter()
        .find(|m| m.topic == config.topics.telemetry)
        .expect("应收到遥测事件");
    let device_id = telemetry.payload["device_id"].as_str().unwrap();
    assert_eq!(telemetry.key.as_deref(), Some(device_id));
    assert!(telemetry.payload["battery"].is_number());
    assert!(telemetry.payload["signal_strength"].is_i64());

    Ok(())
}

#[tokio::test]
#[ignore = "需要运行中的 Kafka 集群"]
async fn unreachable_broker_fails_after_configured_attempts() {
    let mut config = e2e_config();
    config.kafka.brokers = "127.0.0.1:1".to_string();
    config.kafka.metadata_timeout_ms = 500;
    config.kafka.connect_attempts = 2;
    config.kafka.connect_backoff_ms = 100;

    match EngineContext::connect(&config).await {
        Err(LoadgenError::Connection { attempts, .. }) => assert_eq!(attempts, 2),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("连接不应成功"),
    }
}
