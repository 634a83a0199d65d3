//! 复合状态与运行指标

use luban_motion::{FailureKind, MotionState};
use luban_tracker::TrackedTarget;
use std::sync::atomic::{AtomicU64, Ordering};

/// 对操作员暴露的单次复合状态读取
///
/// 失败信息保留到被下一次命令尝试取代为止，状态转移不丢弃
/// 未被消费的失败。
#[derive(Debug, Clone, Copy)]
pub struct CompositeStatus {
    /// 当前运动状态
    pub motion_state: MotionState,
    /// 当前稳定目标（若有）
    pub stable_target: Option<TrackedTarget>,
    /// 最近一次失败种类（若有）
    pub last_failure: Option<FailureKind>,
}

/// 流水线运行指标（原子计数器，无锁读写）
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    /// 收到的检测帧数
    pub frames_received: AtomicU64,
    /// 队列满被丢弃的检测帧数
    pub frames_dropped: AtomicU64,
    /// 变换成功并送入跟踪器的候选点数
    pub candidates_accepted: AtomicU64,
    /// 坐标变换失败次数
    pub transform_failures: AtomicU64,
    /// 已下发的运动命令数
    pub commands_issued: AtomicU64,
    /// 到位完成的运动数
    pub motions_arrived: AtomicU64,
    /// 以失败终止的运动数
    pub motions_failed: AtomicU64,
}

impl RuntimeMetrics {
    /// 当前计数器快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            candidates_accepted: self.candidates_accepted.load(Ordering::Relaxed),
            transform_failures: self.transform_failures.load(Ordering::Relaxed),
            commands_issued: self.commands_issued.load(Ordering::Relaxed),
            motions_arrived: self.motions_arrived.load(Ordering::Relaxed),
            motions_failed: self.motions_failed.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub candidates_accepted: u64,
    pub transform_failures: u64,
    pub commands_issued: u64,
    pub motions_arrived: u64,
    pub motions_failed: u64,
}
