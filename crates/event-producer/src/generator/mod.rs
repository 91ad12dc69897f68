//! 事件生成器
//!
//! 按类别同步生成整批事件，不涉及 I/O。同一批事件共享一个时间戳。

mod pools;
mod timestamp;

pub use pools::{URLS, ValuePools};
pub use timestamp::TimestampCache;

use std::sync::Arc;

use fake::Fake;
use fake::faker::internet::en::DomainSuffix;
use fake::faker::lorem::en::Word;
use parking_lot::Mutex;
use rand::Rng;
use uuid::Uuid;

use loadgen_shared::config::GeneratorConfig;
use loadgen_shared::events::{Event, EventKind, InteractionEvent, TelemetryEvent};

/// 事件生成器
///
/// 值池只读共享；时间戳缓存由互斥锁保护，两个 worker 可以并发调用同一个实例。
pub struct EventGenerator {
    pools: Arc<ValuePools>,
    clock: Mutex<TimestampCache>,
}

impl EventGenerator {
    pub fn new(pools: Arc<ValuePools>, clock: TimestampCache) -> Self {
        Self {
            pools,
            clock: Mutex::new(clock),
        }
    }

    /// 按配置生成值池并创建生成器
    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self::new(
            Arc::new(ValuePools::generate(&config.pools)),
            TimestampCache::new(config.timestamp_refresh(), config.timestamp_skew()),
        )
    }

    pub fn pools(&self) -> &ValuePools {
        &self.pools
    }

    /// 当前（缓存的）事件时间戳
    pub fn timestamp(&self) -> String {
        self.clock.lock().get()
    }

    /// 生成恰好 `count` 个指定类别的事件
    pub fn produce_batch(&self, kind: EventKind, count: usize) -> Vec<Event> {
        let ts = self.timestamp();
        let mut rng = rand::thread_rng();

        (0..count)
            .map(|_| match kind {
                EventKind::Interaction => {
                    Event::Interaction(self.interaction(&mut rng, ts.clone()))
                }
                EventKind::Telemetry => Event::Telemetry(self.telemetry(&mut rng, ts.clone())),
            })
            .collect()
    }

    fn interaction<R: Rng>(&self, rng: &mut R, timestamp: String) -> InteractionEvent {
        InteractionEvent {
            event_id: Uuid::new_v4().to_string(),
            user_id: self.pools.user_id(rng).to_string(),
            url: ValuePools::url(rng).to_string(),
            referrer: random_referrer(),
            user_agent: self.pools.user_agent(rng).to_string(),
            session_id: format!("s{}", rng.gen_range(100_000..=999_999)),
            timestamp,
        }
    }

    fn telemetry<R: Rng>(&self, rng: &mut R, timestamp: String) -> TelemetryEvent {
        TelemetryEvent {
            device_id: self.pools.device_id(rng).to_string(),
            site: self.pools.city(rng).to_string(),
            temp_c: round_to(rng.gen_range(15.0..=40.0), 2),
            humidity: round_to(rng.gen_range(10.0..=90.0), 2),
            battery_pct: round_to(rng.gen_range(20.0..=100.0), 1),
            signal_strength: rng.gen_range(-100..=-30),
            timestamp,
        }
    }
}

fn random_referrer() -> String {
    let host: String = Word().fake();
    let suffix: String = DomainSuffix().fake();
    let path: String = Word().fake();
    format!("https://www.{host}.{suffix}/{path}")
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
