//! 测试工具模块
//!
//! 提供不依赖真实 Kafka 的有状态 `BrokerClient` 实现以及计数型投递监听器，
//! 用于生产引擎的队列、flush 和关闭场景测试。

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{LoadgenError, Result};
use crate::kafka::{BrokerClient, DeliveryListener, DeliveryOutcome};

// ==================== 测试配置辅助 ====================

/// 测试用 broker 地址，优先读取环境变量
pub fn test_kafka_brokers() -> String {
    std::env::var("TEST_KAFKA_BROKERS").unwrap_or_else(|_| "localhost:19092".to_string())
}

// ==================== 计数监听器 ====================

/// 只计数的投递监听器
#[derive(Debug, Default)]
pub struct CountingListener {
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl CountingListener {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

impl DeliveryListener for CountingListener {
    fn on_delivery(&self, _topic: &str, outcome: DeliveryOutcome) {
        if outcome.is_success() {
            self.delivered.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ==================== 内存 broker ====================

/// 内存 broker 中的一条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMessage {
    pub topic: String,
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
}

/// 内存 broker 的行为开关
#[derive(Debug, Clone)]
pub struct InMemoryBehaviour {
    /// poll 时是否投递队列中的全部消息
    pub deliver_on_poll: bool,
    /// 投递结果是否一律为失败
    pub fail_deliveries: bool,
    /// 提交是否一律被拒绝（模拟本地队列已满）
    pub reject_submissions: bool,
    /// 每次 flush 最多投递的消息数，`None` 表示不限
    pub flush_capacity: Option<usize>,
}

impl Default for InMemoryBehaviour {
    fn default() -> Self {
        Self {
            deliver_on_poll: true,
            fail_deliveries: false,
            reject_submissions: false,
            flush_capacity: None,
        }
    }
}

#[derive(Debug, Default)]
struct InMemoryState {
    queue: VecDeque<RecordedMessage>,
    delivered: Vec<RecordedMessage>,
    flush_calls: Vec<Duration>,
    poll_calls: usize,
    rejected: usize,
}

/// 有状态的内存 broker
///
/// 提交的消息先进入队列，由 poll 或 flush 按 `InMemoryBehaviour` 决定何时投递，
/// 投递结果通过 `DeliveryListener` 回调，与真实客户端的观察方式一致。
pub struct InMemoryBrokerClient {
    listener: Arc<dyn DeliveryListener>,
    behaviour: Mutex<InMemoryBehaviour>,
    state: Mutex<InMemoryState>,
}

impl InMemoryBrokerClient {
    pub fn new(listener: Arc<dyn DeliveryListener>) -> Self {
        Self::with_behaviour(listener, InMemoryBehaviour::default())
    }

    pub fn with_behaviour(listener: Arc<dyn DeliveryListener>, behaviour: InMemoryBehaviour) -> Self {
        Self {
            listener,
            behaviour: Mutex::new(behaviour),
            state: Mutex::new(InMemoryState::default()),
        }
    }

    /// 运行中调整行为
    pub fn update_behaviour(&self, f: impl FnOnce(&mut InMemoryBehaviour)) {
        f(&mut self.behaviour.lock());
    }

    /// 每次 flush 调用的超时参数
    pub fn flush_calls(&self) -> Vec<Duration> {
        self.state.lock().flush_calls.clone()
    }

    pub fn poll_calls(&self) -> usize {
        self.state.lock().poll_calls
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn rejected(&self) -> usize {
        self.state.lock().rejected
    }

    /// 已确认投递的消息（按投递顺序）
    pub fn delivered_messages(&self) -> Vec<RecordedMessage> {
        self.state.lock().delivered.clone()
    }

    /// 取出最多 `limit` 条消息并在锁外回调监听器
    fn deliver(&self, limit: Option<usize>) {
        let fail = self.behaviour.lock().fail_deliveries;

        let batch: Vec<RecordedMessage> = {
            let mut state = self.state.lock();
            let take = limit.unwrap_or(usize::MAX).min(state.queue.len());
            let batch: Vec<_> = state.queue.drain(..take).collect();
            if !fail {
                state.delivered.extend(batch.iter().cloned());
            }
            batch
        };

        for msg in batch {
            let outcome = if fail {
                DeliveryOutcome::Failed("Broker: simulated delivery failure".to_string())
            } else {
                DeliveryOutcome::Delivered
            };
            self.listener.on_delivery(&msg.topic, outcome);
        }
    }
}

impl BrokerClient for InMemoryBrokerClient {
    fn submit(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<()> {
        if self.behaviour.lock().reject_submissions {
            self.state.lock().rejected += 1;
            return Err(LoadgenError::Submission {
                topic: topic.to_string(),
                message: "Local: Queue full".to_string(),
            });
        }

        self.state.lock().queue.push_back(RecordedMessage {
            topic: topic.to_string(),
            key: key.to_vec(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn poll(&self) {
        self.state.lock().poll_calls += 1;
        if self.behaviour.lock().deliver_on_poll {
            self.deliver(None);
        }
    }

    fn flush(&self, timeout: Duration) -> usize {
        self.state.lock().flush_calls.push(timeout);
        let capacity = self.behaviour.lock().flush_capacity;
        self.deliver(capacity);
        self.queued()
    }

    fn in_flight(&self) -> usize {
        self.queued()
    }
}
