//! 运行时装配与操作员接口

use crate::pipeline::{SharedState, actuation_loop, perception_loop};
use crate::status::{CompositeStatus, MetricsSnapshot};
use crossbeam_channel::Sender;
use luban_modbus::transport::Connector;
use luban_motion::MotionCommander;
use luban_tracker::{TargetTracker, TrackerConfig};
use luban_vision::{CalibrationError, CalibrationStore, Detection};
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

/// 运行时层错误类型
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// 检测帧队列已满（帧是易逝数据，调用方丢帧即可）
    #[error("Detection queue full")]
    QueueFull,

    /// 检测帧队列已关闭（感知线程退出）
    #[error("Detection queue closed")]
    QueueClosed,
}

/// 运行时配置
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// 期望的目标类别（每帧取该类别下置信度最高的检测）
    pub target_class: String,
    /// 检测帧队列深度
    pub frame_queue_depth: usize,
    /// 执行线程轮询周期
    pub poll_interval: Duration,
    /// 启动时是否立即使能"跟踪即运动"
    pub enabled_on_start: bool,
    /// 启动时执行控制器启动序列（错误复位 + 驱动使能）
    pub bring_up_on_start: bool,
    /// 启动时归位
    pub home_on_start: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            target_class: "workpiece".to_string(),
            frame_queue_depth: 4,
            poll_interval: Duration::from_millis(50),
            enabled_on_start: false,
            bring_up_on_start: true,
            home_on_start: false,
        }
    }
}

/// 运行时 Builder（链式构造）
#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    tracker_config: TrackerConfig,
    runtime_config: RuntimeConfig,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 覆盖跟踪器配置
    pub fn tracker_config(mut self, config: TrackerConfig) -> Self {
        self.tracker_config = config;
        self
    }

    /// 覆盖运行时配置
    pub fn runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.runtime_config = config;
        self
    }

    /// 启动两个流水线线程并返回操作员句柄
    ///
    /// `commander` 独占现场总线会话整体移入执行线程 ——
    /// 其他组件不可能打开竞争会话。
    pub fn spawn<C>(
        self,
        calibration: CalibrationStore,
        commander: MotionCommander<C>,
    ) -> VisionRuntime
    where
        C: Connector + Send + 'static,
        C::Transport: Send + 'static,
    {
        let config = self.runtime_config;
        let shared = Arc::new(SharedState::new(calibration, config.enabled_on_start));
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(config.frame_queue_depth.max(1));

        let tracker = TargetTracker::new(self.tracker_config);
        let target_class = config.target_class.clone();

        let shared_perception = shared.clone();
        let perception = std::thread::spawn(move || {
            perception_loop(shared_perception, frame_rx, tracker, target_class);
        });

        let shared_actuation = shared.clone();
        let actuation = std::thread::spawn(move || {
            actuation_loop(shared_actuation, commander, config);
        });

        info!("Vision-motion runtime started");
        VisionRuntime {
            shared,
            frame_tx: ManuallyDrop::new(frame_tx),
            perception: Some(perception),
            actuation: Some(actuation),
        }
    }
}

/// 视觉-运动流水线的操作员句柄
///
/// Drop 时停止并回收两个线程（先断开帧通道，再 join）。
pub struct VisionRuntime {
    shared: Arc<SharedState>,
    /// 帧发送端：Drop 时需要在 join 感知线程之前显式关闭
    frame_tx: ManuallyDrop<Sender<Vec<Detection>>>,
    perception: Option<JoinHandle<()>>,
    actuation: Option<JoinHandle<()>>,
}

impl VisionRuntime {
    /// 提交一帧检测结果（非阻塞）
    ///
    /// 队列满时报 `QueueFull`：检测帧是易逝数据，调用方直接丢弃
    /// 该帧即可，绝不阻塞检测器节拍。
    pub fn submit_frame(&self, detections: Vec<Detection>) -> Result<(), RuntimeError> {
        self.frame_tx.try_send(detections).map_err(|e| match e {
            crossbeam_channel::TrySendError::Full(_) => {
                self.shared
                    .metrics
                    .frames_dropped
                    .fetch_add(1, Ordering::Relaxed);
                RuntimeError::QueueFull
            }
            crossbeam_channel::TrySendError::Disconnected(_) => RuntimeError::QueueClosed,
        })
    }

    /// 复合状态读取：运动状态 + 稳定目标 + 最近失败
    pub fn status(&self) -> CompositeStatus {
        CompositeStatus {
            motion_state: **self.shared.motion_state.load(),
            stable_target: self.shared.stable.load_full().map(|t| *t),
            last_failure: self.shared.last_failure.load_full().map(|f| *f),
        }
    }

    /// 运行指标快照
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// 使能/停用"跟踪即运动"
    pub fn set_enabled(&self, enabled: bool) {
        info!("Tracking-to-motion {}", if enabled { "enabled" } else { "disabled" });
        self.shared.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    /// 请求停止当前运动（映射到专用停止写入，确认后进入 Failed）
    pub fn request_stop(&self) {
        self.shared.stop_requested.store(true, Ordering::Release);
    }

    /// 显式重载标定（外部触发，不轮询）
    pub fn reload_calibration(&self) -> Result<(), CalibrationError> {
        self.shared.calibration.reload()
    }

    /// 两个流水线线程的存活状态 (perception, actuation)
    pub fn check_health(&self) -> (bool, bool) {
        let perception_alive = self
            .perception
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false);
        let actuation_alive = self
            .actuation
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false);
        (perception_alive, actuation_alive)
    }

    /// 所有线程存活时为 true
    pub fn is_healthy(&self) -> bool {
        let (perception, actuation) = self.check_health();
        perception && actuation
    }
}

impl Drop for VisionRuntime {
    fn drop(&mut self) {
        self.shared.is_running.store(false, Ordering::Release);

        // 必须在 join 之前真正 drop 发送端，否则感知线程可能
        // 收不到 Disconnected
        unsafe {
            ManuallyDrop::drop(&mut self.frame_tx);
        }

        if let Some(handle) = self.perception.take()
            && handle.join().is_err()
        {
            error!("Perception thread panicked during shutdown");
        }
        if let Some(handle) = self.actuation.take()
            && handle.join().is_err()
        {
            error!("Actuation thread panicked during shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luban_modbus::mock::{MockConnector, SimBehavior, SimulatedRcs};
    use luban_modbus::{ClientConfig, ModbusSession, RcsClient, RegisterMap, SessionConfig};
    use luban_motion::{FailureKind, MotionConfig, MotionState};
    use luban_vision::{CalibrationParameters, DepthEstimate};
    use nalgebra::Point2;
    use std::time::Instant;

    fn commander_for(sim: &SimulatedRcs) -> MotionCommander<MockConnector> {
        let session = ModbusSession::new(
            sim.connector(),
            1,
            SessionConfig {
                max_reconnect_attempts: 1,
                reconnect_backoff: Duration::from_millis(1),
            },
        );
        let client = RcsClient::new(session, RegisterMap::default()).with_config(ClientConfig {
            pulse_width: Duration::from_millis(1),
        });
        MotionCommander::new(client, MotionConfig::default())
    }

    fn runtime_with(sim: &SimulatedRcs, enabled: bool) -> VisionRuntime {
        RuntimeBuilder::new()
            .runtime_config(RuntimeConfig {
                poll_interval: Duration::from_millis(5),
                enabled_on_start: enabled,
                ..Default::default()
            })
            .spawn(
                CalibrationStore::from_parameters(CalibrationParameters::identity()),
                commander_for(sim),
            )
    }

    fn detection_frame() -> Vec<Detection> {
        vec![Detection {
            center: Point2::new(0.3, -0.2),
            depth: DepthEstimate::Measured(0.5),
            class: "workpiece".to_string(),
            confidence: 0.9,
            timestamp: Instant::now(),
        }]
    }

    fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_disabled_runtime_tracks_but_never_commands() {
        let sim = SimulatedRcs::new(RegisterMap::default(), SimBehavior::Nominal);
        let runtime = runtime_with(&sim, false);

        // 目标被确认为稳定，但"跟踪即运动"未使能
        let confirmed = wait_until(Duration::from_secs(2), || {
            let _ = runtime.submit_frame(detection_frame());
            runtime.status().stable_target.is_some()
        });
        assert!(confirmed, "tracker should confirm a stable target");

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(sim.start_pulses(), 0);
        assert_eq!(runtime.status().motion_state, MotionState::Idle);
    }

    #[test]
    fn test_enabled_pipeline_issues_exactly_one_command_and_arrives() {
        let sim = SimulatedRcs::new(RegisterMap::default(), SimBehavior::Nominal);
        let runtime = runtime_with(&sim, true);

        // 持续送帧直到命令下发，然后停止送帧
        let commanded = wait_until(Duration::from_secs(5), || {
            let _ = runtime.submit_frame(detection_frame());
            runtime.metrics().commands_issued >= 1
        });
        assert!(commanded, "pipeline should issue a command");

        let arrived = wait_until(Duration::from_secs(5), || {
            runtime.metrics().motions_arrived >= 1
        });
        assert!(arrived, "motion should complete");

        // 无新帧确认 → 不得出现第二条命令
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(sim.start_pulses(), 1);
        assert_eq!(runtime.metrics().commands_issued, 1);

        // 单位标定：像素 (0.3, -0.2) × 深度 0.5 → (0.15, -0.1, 0.5)
        let target = sim.target_written();
        assert!((target[0] - 0.15).abs() < 1e-4);
        assert!((target[1] - -0.1).abs() < 1e-4);
        assert!((target[2] - 0.5).abs() < 1e-4);

        assert!(runtime.status().last_failure.is_none());
        assert!(runtime.is_healthy());
    }

    #[test]
    fn test_stop_request_terminates_motion_as_stopped() {
        let sim = SimulatedRcs::new(RegisterMap::default(), SimBehavior::Nominal)
            .with_timing(1, 10_000);
        let runtime = runtime_with(&sim, true);

        let commanded = wait_until(Duration::from_secs(5), || {
            let _ = runtime.submit_frame(detection_frame());
            runtime.metrics().commands_issued >= 1
        });
        assert!(commanded);

        runtime.request_stop();
        let stopped = wait_until(Duration::from_secs(5), || {
            runtime.metrics().motions_failed >= 1
        });
        assert!(stopped, "stop should terminate the motion as failed");
        assert_eq!(sim.stop_pulses(), 1);
        assert_eq!(runtime.status().last_failure, Some(FailureKind::Stopped));
    }

    #[test]
    fn test_shutdown_joins_threads() {
        let sim = SimulatedRcs::new(RegisterMap::default(), SimBehavior::Nominal);
        let runtime = runtime_with(&sim, false);
        assert!(runtime.is_healthy());
        drop(runtime);
    }
}
