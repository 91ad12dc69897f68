//! 协调关闭
//!
//! 关闭流程：广播停止信号 → 等待各任务退出 → 一次带延长超时的阻塞 flush →
//! 记录未投递数量 → 最终报告。流程只执行一次，重复调用直接返回首次的结果。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OnceCell, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use loadgen_shared::kafka::BrokerClient;
use loadgen_shared::observability::metrics as producer_metrics;

use crate::monitor::{DeliveryMonitor, DeliveryStats};

/// 进程退出码：全部投递完成
pub const EXIT_CLEAN: i32 = 0;
/// 进程退出码：启动失败或致命错误
pub const EXIT_FATAL: i32 = 1;
/// 进程退出码：关闭完成但仍有消息未投递
pub const EXIT_UNDELIVERED: i32 = 3;

// ---------------------------------------------------------------------------
// 停止信号
// ---------------------------------------------------------------------------

/// 停止信号的接收端，可任意克隆
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl From<watch::Receiver<bool>> for ShutdownListener {
    fn from(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }
}

impl ShutdownListener {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// 等待停止信号；发送端被丢弃同样视为停止
    pub async fn recv(&mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

// ---------------------------------------------------------------------------
// Worker 状态机
// ---------------------------------------------------------------------------

/// Worker 生命周期：Running → Stopping → Drained → Terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum WorkerPhase {
    Running = 0,
    /// 已收到停止信号，循环尚未退出
    Stopping = 1,
    /// 循环已退出
    Drained = 2,
    /// 任务已被回收
    Terminated = 3,
}

/// 可跨任务共享的阶段标记，只向前推进
#[derive(Debug)]
pub struct PhaseCell(AtomicU8);

impl Default for PhaseCell {
    fn default() -> Self {
        Self(AtomicU8::new(WorkerPhase::Running as u8))
    }
}

impl PhaseCell {
    pub fn get(&self) -> WorkerPhase {
        match self.0.load(Ordering::SeqCst) {
            0 => WorkerPhase::Running,
            1 => WorkerPhase::Stopping,
            2 => WorkerPhase::Drained,
            _ => WorkerPhase::Terminated,
        }
    }

    pub fn advance(&self, phase: WorkerPhase) {
        self.0.fetch_max(phase as u8, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// ShutdownCoordinator
// ---------------------------------------------------------------------------

/// 关闭结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownOutcome {
    /// 最终 flush 之后仍未投递的消息数
    pub remaining: usize,
    /// 本次调用之前关闭流程是否已被触发
    pub already_shut_down: bool,
    pub stats: DeliveryStats,
}

impl ShutdownOutcome {
    pub fn drained(&self) -> bool {
        self.remaining == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.drained() {
            EXIT_CLEAN
        } else {
            EXIT_UNDELIVERED
        }
    }
}

struct ManagedTask {
    name: String,
    handle: JoinHandle<()>,
    phase: Option<Arc<PhaseCell>>,
}

pub struct ShutdownCoordinator {
    tx: watch::Sender<bool>,
    client: Arc<dyn BrokerClient>,
    monitor: Arc<DeliveryMonitor>,
    final_flush_timeout: Duration,
    join_timeout: Duration,
    triggered: AtomicBool,
    tasks: Mutex<Vec<ManagedTask>>,
    outcome: OnceCell<ShutdownOutcome>,
}

impl ShutdownCoordinator {
    pub fn new(
        client: Arc<dyn BrokerClient>,
        monitor: Arc<DeliveryMonitor>,
        final_flush_timeout: Duration,
        join_timeout: Duration,
    ) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx,
            client,
            monitor,
            final_flush_timeout,
            join_timeout,
            triggered: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            outcome: OnceCell::new(),
        }
    }

    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// 登记一个需要在关闭时回收的任务
    pub fn register(
        &self,
        name: impl Into<String>,
        handle: JoinHandle<()>,
        phase: Option<Arc<PhaseCell>>,
    ) {
        self.tasks.lock().push(ManagedTask {
            name: name.into(),
            handle,
            phase,
        });
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// 执行关闭，幂等
    ///
    /// 并发或重复调用只会执行一次 flush 与一次最终报告，
    /// 后续调用得到相同的结果且 `already_shut_down = true`。
    pub async fn shutdown(&self) -> ShutdownOutcome {
        let first = !self.triggered.swap(true, Ordering::SeqCst);
        if !first {
            info!("关闭流程已触发，忽略重复请求");
        }

        let outcome = self.outcome.get_or_init(|| self.perform()).await;
        ShutdownOutcome {
            already_shut_down: !first,
            ..outcome.clone()
        }
    }

    async fn perform(&self) -> ShutdownOutcome {
        info!("开始优雅关闭");

        let tasks: Vec<ManagedTask> = std::mem::take(&mut *self.tasks.lock());
        for task in &tasks {
            if let Some(phase) = &task.phase {
                phase.advance(WorkerPhase::Stopping);
            }
        }
        self.tx.send_replace(true);

        for task in tasks {
            let joined = match tokio::time::timeout(self.join_timeout, task.handle).await {
                Ok(Ok(())) => {
                    info!(task = %task.name, "任务已退出");
                    true
                }
                Ok(Err(e)) => {
                    error!(task = %task.name, error = %e, "任务异常退出");
                    true
                }
                Err(_) => {
                    warn!(
                        task = %task.name,
                        timeout_ms = self.join_timeout.as_millis() as u64,
                        "等待任务退出超时，放弃等待，任务可能仍在提交"
                    );
                    false
                }
            };
            // 未回收的任务停留在 Stopping
            if let (true, Some(phase)) = (joined, &task.phase) {
                phase.advance(WorkerPhase::Terminated);
            }
        }

        info!(
            timeout_secs = self.final_flush_timeout.as_secs_f64(),
            in_flight = self.client.in_flight(),
            "刷新剩余消息"
        );
        let client = self.client.clone();
        let timeout = self.final_flush_timeout;
        let remaining = match tokio::task::spawn_blocking(move || client.flush(timeout)).await {
            Ok(remaining) => remaining,
            Err(e) => {
                error!(error = %e, "最终 flush 任务失败");
                self.client.in_flight()
            }
        };

        producer_metrics::set_flush_remaining(remaining);
        if remaining > 0 {
            warn!(remaining, "仍有消息未投递");
        } else {
            info!("所有消息均已投递");
        }

        let report = self.monitor.report();

        ShutdownOutcome {
            remaining,
            already_shut_down: false,
            stats: report.stats,
        }
    }
}
