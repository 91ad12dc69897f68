//! 事件模型
//!
//! 定义负载生成器产出的两类事件：用户交互事件与设备遥测事件。
//! 字段名即 Kafka 消息的 JSON 线上格式，下游流处理作业按此解析，不可随意改名。

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

// ---------------------------------------------------------------------------
// EventKind: 事件类别
// ---------------------------------------------------------------------------

/// 事件类别
///
/// 每个类别对应一个独立的生产 worker 和一个目标 topic。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Interaction,
    Telemetry,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::Interaction, EventKind::Telemetry];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interaction => "interaction",
            Self::Telemetry => "telemetry",
        }
    }

    /// 数组下标，供按类别分桶的计数器使用
    pub fn index(&self) -> usize {
        match self {
            Self::Interaction => 0,
            Self::Telemetry => 1,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// 事件结构
// ---------------------------------------------------------------------------

/// 用户交互事件（点击流）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub event_id: String,
    pub user_id: String,
    pub url: String,
    pub referrer: String,
    #[serde(rename = "ua")]
    pub user_agent: String,
    pub session_id: String,
    #[serde(rename = "ts")]
    pub timestamp: String,
}

/// 设备遥测事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub device_id: String,
    pub site: String,
    pub temp_c: f64,
    pub humidity: f64,
    #[serde(rename = "battery")]
    pub battery_pct: f64,
    pub signal_strength: i32,
    #[serde(rename = "ts")]
    pub timestamp: String,
}

/// 生成器产出的事件
///
/// 线上格式不携带类别标签，类别由所在 topic 决定，因此使用 untagged 表示。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Event {
    Interaction(InteractionEvent),
    Telemetry(TelemetryEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Interaction(_) => EventKind::Interaction,
            Self::Telemetry(_) => EventKind::Telemetry,
        }
    }

    /// 分区键：交互事件取 user_id，遥测事件取 device_id
    pub fn partition_key(&self) -> &str {
        match self {
            Self::Interaction(e) => &e.user_id,
            Self::Telemetry(e) => &e.device_id,
        }
    }

    pub fn timestamp(&self) -> &str {
        match self {
            Self::Interaction(e) => &e.timestamp,
            Self::Telemetry(e) => &e.timestamp,
        }
    }

    /// 序列化为 UTF-8 JSON 负载
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// 事件时间戳的线上格式：ISO-8601，微秒精度，UTC 偏移写作 `+00:00`
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, false)
}
