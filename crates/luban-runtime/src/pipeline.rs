//! 感知与执行线程循环
//!
//! 两个循环只通过 `SharedState` 中的原子量和无锁快照交互：
//! 跟踪器是稳定目标的唯一写者；执行线程只在需要时读取最新快照。

use crate::runtime::RuntimeConfig;
use crate::status::RuntimeMetrics;
use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use luban_modbus::transport::Connector;
use luban_motion::{FailureKind, MotionCommander, MotionState};
use luban_tracker::{TargetTracker, TrackedTarget};
use luban_vision::{CalibrationStore, Detection, TransformError, select_best, transform};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// 感知线程空转时的最大等待（同时决定过期判定的刷新频率）
const FRAME_RECV_TIMEOUT: Duration = Duration::from_millis(50);

/// 两个线程共享的状态
pub(crate) struct SharedState {
    /// 运行标志（Drop 时置 false，线程随之退出）
    pub is_running: AtomicBool,
    /// "跟踪即运动"使能开关
    pub enabled: AtomicBool,
    /// 操作员停止请求（执行线程消费）
    pub stop_requested: AtomicBool,
    /// 跟踪器复位请求（执行线程置位，感知线程消费）
    pub reset_tracker: AtomicBool,
    /// 最新稳定目标快照（感知线程唯一写者）
    pub stable: ArcSwapOption<TrackedTarget>,
    /// 最新运动状态（执行线程唯一写者）
    pub motion_state: ArcSwap<MotionState>,
    /// 最近一次失败种类（感知/执行线程按事件写入）
    pub last_failure: ArcSwapOption<FailureKind>,
    /// 运行指标
    pub metrics: RuntimeMetrics,
    /// 标定存储（内部已是无锁快照）
    pub calibration: CalibrationStore,
}

impl SharedState {
    pub fn new(calibration: CalibrationStore, enabled: bool) -> Self {
        Self {
            is_running: AtomicBool::new(true),
            enabled: AtomicBool::new(enabled),
            stop_requested: AtomicBool::new(false),
            reset_tracker: AtomicBool::new(false),
            stable: ArcSwapOption::const_empty(),
            motion_state: ArcSwap::from_pointee(MotionState::Idle),
            last_failure: ArcSwapOption::const_empty(),
            metrics: RuntimeMetrics::default(),
            calibration,
        }
    }
}

/// 感知循环：检测帧 → 选优 → 坐标变换 → 跟踪器 → 快照发布
pub(crate) fn perception_loop(
    shared: Arc<SharedState>,
    frame_rx: Receiver<Vec<Detection>>,
    mut tracker: TargetTracker,
    target_class: String,
) {
    info!("Perception loop started (class \"{target_class}\")");

    while shared.is_running.load(Ordering::Acquire) {
        // 终态后的复位请求：目标必须从头重新确认
        if shared.reset_tracker.swap(false, Ordering::AcqRel) {
            tracker.reset();
            shared.stable.store(None);
        }

        match frame_rx.recv_timeout(FRAME_RECV_TIMEOUT) {
            Ok(frame) => {
                shared.metrics.frames_received.fetch_add(1, Ordering::Relaxed);
                let params = shared.calibration.current();

                if let Some(detection) = select_best(&frame, &target_class) {
                    match transform(&params, detection) {
                        Ok(candidate) => {
                            shared
                                .metrics
                                .candidates_accepted
                                .fetch_add(1, Ordering::Relaxed);
                            tracker.observe(&candidate);
                        }
                        Err(e) => {
                            shared
                                .metrics
                                .transform_failures
                                .fetch_add(1, Ordering::Relaxed);
                            warn!("Transform failed: {e}");
                            let kind = match e {
                                TransformError::DepthUnavailable { .. } => {
                                    FailureKind::DepthUnavailable
                                }
                                TransformError::OutOfCalibratedRange { .. } => {
                                    FailureKind::OutOfCalibratedRange
                                }
                            };
                            shared.last_failure.store(Some(Arc::new(kind)));
                        }
                    }
                }

                shared
                    .stable
                    .store(tracker.stable_target(Instant::now()).map(Arc::new));
            }
            Err(RecvTimeoutError::Timeout) => {
                // 无帧到达时也要刷新过期判定，陈旧目标不得继续可见
                shared
                    .stable
                    .store(tracker.stable_target(Instant::now()).map(Arc::new));
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("Perception loop exited");
}

/// 执行循环：采集 → 下发 → 监督 → 终态处理
///
/// 每次迭代后发布运动状态快照；终态先对外可见一个轮询周期，
/// 下一次迭代再复位跟踪器并确认回 Idle。
pub(crate) fn actuation_loop<C>(
    shared: Arc<SharedState>,
    mut commander: MotionCommander<C>,
    config: RuntimeConfig,
) where
    C: Connector + Send + 'static,
{
    info!("Actuation loop started");

    if config.bring_up_on_start
        && let Err(e) = commander.bring_up()
    {
        warn!("Controller bring-up failed: {e}");
        shared
            .last_failure
            .store(Some(Arc::new(FailureKind::CommunicationLost)));
    }
    if config.home_on_start {
        match commander.command_home(Instant::now()) {
            Ok(()) => {
                shared.metrics.commands_issued.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!("Homing on start failed: {e}"),
        }
    }

    let mut seen_failure_seq = commander.failure_seq();

    while shared.is_running.load(Ordering::Acquire) {
        let now = Instant::now();

        if shared.stop_requested.swap(false, Ordering::AcqRel) {
            commander.request_stop();
        }

        match commander.state() {
            MotionState::Idle => {
                if shared.enabled.load(Ordering::Acquire)
                    && let Some(target) = shared.stable.load_full()
                    && commander.try_acquire(&target, now)
                    && commander.dispatch(now).is_ok()
                    && commander.state() == MotionState::CommandSent
                {
                    shared.metrics.commands_issued.fetch_add(1, Ordering::Relaxed);
                }
            }
            MotionState::TargetAcquired => {
                if commander.dispatch(now).is_ok()
                    && commander.state() == MotionState::CommandSent
                {
                    shared.metrics.commands_issued.fetch_add(1, Ordering::Relaxed);
                }
            }
            MotionState::CommandSent | MotionState::Moving => commander.poll(now),
            MotionState::Arrived => {
                shared.metrics.motions_arrived.fetch_add(1, Ordering::Relaxed);
                shared.reset_tracker.store(true, Ordering::Release);
                commander.acknowledge();
            }
            MotionState::Failed => {
                shared.metrics.motions_failed.fetch_add(1, Ordering::Relaxed);
                shared.reset_tracker.store(true, Ordering::Release);
                commander.acknowledge();
            }
        }

        shared.motion_state.store(Arc::new(commander.state()));
        if commander.failure_seq() != seen_failure_seq {
            seen_failure_seq = commander.failure_seq();
            shared.last_failure.store(commander.last_failure().map(Arc::new));
        }

        spin_sleep::sleep(config.poll_interval);
    }

    commander.disconnect();
    info!("Actuation loop exited");
}
