//! test_utils 模块的集成测试
//!
//! 通过 `BrokerClient` trait 对象验证内存 broker 的队列、投递与 flush 语义

use std::sync::Arc;
use std::time::Duration;

use loadgen_shared::error::LoadgenError;
use loadgen_shared::kafka::{BrokerClient, connect_with_retry};
use loadgen_shared::retry::RetryPolicy;
use loadgen_shared::test_utils::*;

fn client_with(behaviour: InMemoryBehaviour) -> (Arc<CountingListener>, Arc<InMemoryBrokerClient>) {
    let listener = Arc::new(CountingListener::default());
    let client = Arc::new(InMemoryBrokerClient::with_behaviour(listener.clone(), behaviour));
    (listener, client)
}

// ==================== 队列与投递 ====================

#[test]
fn test_messages_delivered_in_submission_order() {
    let (listener, client) = client_with(InMemoryBehaviour::default());
    let broker: Arc<dyn BrokerClient> = client.clone();

    broker.submit("clickstream", b"u00001", br#"{"n":1}"#).unwrap();
    broker.submit("iot", b"d00001", br#"{"n":2}"#).unwrap();
    broker.poll();

    let delivered = client.delivered_messages();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[0].topic, "clickstream");
    assert_eq!(delivered[0].key, b"u00001".to_vec());
    assert_eq!(delivered[1].topic, "iot");
    assert_eq!(listener.delivered(), 2);
    assert_eq!(broker.in_flight(), 0);
}

#[test]
fn test_queue_held_until_flush() {
    let (listener, client) = client_with(InMemoryBehaviour {
        deliver_on_poll: false,
        flush_capacity: Some(2),
        ..InMemoryBehaviour::default()
    });

    for i in 0..5 {
        client.submit("iot", format!("d{i:05}").as_bytes(), b"{}").unwrap();
    }
    client.poll();
    assert_eq!(client.poll_calls(), 1);
    assert_eq!(client.queued(), 5);
    assert_eq!(listener.delivered(), 0);

    assert_eq!(client.flush(Duration::from_secs(1)), 3);
    assert_eq!(client.flush(Duration::from_secs(30)), 1);
    assert_eq!(
        client.flush_calls(),
        vec![Duration::from_secs(1), Duration::from_secs(30)]
    );
    assert_eq!(listener.delivered(), 4);
}

#[test]
fn test_failed_deliveries_reach_listener() {
    let (listener, client) = client_with(InMemoryBehaviour {
        fail_deliveries: true,
        ..InMemoryBehaviour::default()
    });

    client.submit("clickstream", b"u00002", b"{}").unwrap();
    client.poll();

    assert_eq!(listener.failed(), 1);
    assert_eq!(listener.delivered(), 0);
    assert!(client.delivered_messages().is_empty());
}

#[test]
fn test_rejected_submission_has_no_callback() {
    let (listener, client) = client_with(InMemoryBehaviour::default());
    client.update_behaviour(|b| b.reject_submissions = true);

    let err = client.submit("iot", b"d00001", b"{}").unwrap_err();
    assert!(matches!(err, LoadgenError::Submission { .. }));
    assert_eq!(client.rejected(), 1);

    client.poll();
    assert_eq!(listener.delivered() + listener.failed(), 0);
}

#[test]
fn test_default_test_brokers() {
    if std::env::var("TEST_KAFKA_BROKERS").is_err() {
        assert_eq!(test_kafka_brokers(), "localhost:19092");
    }
}

// ==================== 连接重试 ====================

#[tokio::test(start_paused = true)]
async fn test_connect_with_retry_returns_first_success() {
    let policy = RetryPolicy::fixed(4, Duration::from_secs(5));
    let mut calls = 0;

    let client = connect_with_retry(&policy, || {
        calls += 1;
        let attempt = calls;
        async move {
            if attempt < 2 {
                Err(LoadgenError::Kafka("metadata timeout".to_string()))
            } else {
                let listener = Arc::new(CountingListener::default());
                Ok(Arc::new(InMemoryBrokerClient::new(listener)) as Arc<dyn BrokerClient>)
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(calls, 2);
    assert_eq!(client.in_flight(), 0);
}
