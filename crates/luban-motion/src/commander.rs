//! 运动指挥器
//!
//! 持有唯一的现场总线会话（通过 `RcsClient`），消费跟踪器确认的
//! 稳定目标，驱动 Idle → … → Arrived/Failed 状态机。状态只在
//! 新鲜的状态寄存器读取之后推进，从不按经过时间臆断控制器状态。

use crate::workspace::{WorkspaceBounds, distance};
use luban_modbus::{ModbusError, MoveFlags, RcsClient, transport::Connector};
use luban_tracker::TrackedTarget;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// 运动状态机状态
///
/// 由运动指挥器独占持有，只根据现场总线状态读取更新。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    /// 空闲，等待稳定目标
    Idle,
    /// 目标已通过可达性校验
    TargetAcquired,
    /// 命令已写入，等待控制器接受
    CommandSent,
    /// 控制器确认正在运动
    Moving,
    /// 到位（本次运动的终态）
    Arrived,
    /// 失败（本次运动的终态，不自动重试）
    Failed,
}

impl MotionState {
    /// 是否为单次运动的终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, MotionState::Arrived | MotionState::Failed)
    }
}

/// 失败种类（复合状态中保留到被下一次命令尝试取代为止）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 深度无法解算（变换层）
    DepthUnavailable,
    /// 解算点超出标定有效体积（变换层）
    OutOfCalibratedRange,
    /// 目标超出工作空间或最大移动距离
    UnreachableTarget,
    /// 通信丢失（含重连耗尽）
    CommunicationLost,
    /// 控制器拒绝命令或未在期限内接受
    CommandRejected,
    /// 运动超出最长持续时间
    MotionTimeout,
    /// 控制器上报运动故障
    MotionFault,
    /// 操作员请求停止（确认后强制进入 Failed）
    Stopped,
}

/// 运动指挥器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// 工作空间包围盒
    pub workspace: WorkspaceBounds,
    /// 距当前 TCP 的最大单次移动距离（米）
    pub max_reach_m: f64,
    /// 工具的固定姿态 [rx, ry, rz]（弧度；实际姿态由控制器程序保持）
    pub fixed_orientation: [f64; 3],
    /// 速度上限（米/秒，命令元数据）
    pub velocity_limit: f64,
    /// 加速度上限（米/秒²，命令元数据）
    pub acceleration_limit: f64,
    /// 速度倍率（百分比，写入控制器的倍率寄存器）
    pub speed_percent: Option<u8>,
    /// 控制器侧的运动程序号
    pub program_number: u16,
    /// 命令接受超时
    pub accept_timeout: Duration,
    /// 运动最长持续时间
    pub motion_timeout: Duration,
    /// 到位判定容差（米）
    pub arrival_tolerance_m: f64,
    /// 归位位置（可选）
    pub home_position: Option<[f64; 3]>,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            workspace: WorkspaceBounds::default(),
            max_reach_m: 1.5,
            fixed_orientation: [0.0, 0.0, 0.0],
            velocity_limit: 0.25,
            acceleration_limit: 1.0,
            speed_percent: Some(50),
            program_number: 1,
            accept_timeout: Duration::from_secs(1),
            motion_timeout: Duration::from_secs(15),
            arrival_tolerance_m: 0.005,
            home_position: None,
        }
    }
}

/// 一次运动命令
///
/// 在目标被判定稳定的时刻创建，下发后不可变。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionCommand {
    /// 目标位置（基座标系，米）
    pub target: [f64; 3],
    /// 工具姿态 [rx, ry, rz]（弧度）
    pub orientation: [f64; 3],
    /// 速度上限（米/秒）
    pub velocity_limit: f64,
    /// 加速度上限（米/秒²）
    pub acceleration_limit: f64,
    /// 下发时间
    pub issued_at: Instant,
}

/// 运动层 API 误用错误
///
/// 协议失败不走这里 —— 状态机把它们吸收为 `Failed` 终态。
#[derive(Error, Debug)]
pub enum MotionError {
    #[error("Invalid state for operation: {state:?}")]
    InvalidState { state: MotionState },

    #[error("No home position configured")]
    NoHomeConfigured,

    #[error("Home position ({x:.3}, {y:.3}, {z:.3}) outside workspace")]
    HomeOutsideWorkspace { x: f64, y: f64, z: f64 },
}

/// 进行中运动的内部记录
struct ActiveMotion {
    target: [f64; 3],
    command: Option<MotionCommand>,
    stop_sent: bool,
}

/// 运动指挥器
///
/// 同一时刻至多一条在途命令；每次失败都是该命令的终态，下一次
/// 运动必须由跟踪器重新确认的目标触发（代数校验保证不重复消费）。
pub struct MotionCommander<C: Connector> {
    client: RcsClient<C>,
    config: MotionConfig,
    state: MotionState,
    active: Option<ActiveMotion>,
    last_failure: Option<FailureKind>,
    /// 失败信息的事件序号（每次变更递增，供上层去重发布）
    failure_seq: u64,
    /// 已消费的目标代数（防止同一次确认触发两条命令）
    last_consumed_generation: u64,
    stop_requested: bool,
}

impl<C: Connector> MotionCommander<C> {
    pub fn new(client: RcsClient<C>, config: MotionConfig) -> Self {
        Self {
            client,
            config,
            state: MotionState::Idle,
            active: None,
            last_failure: None,
            failure_seq: 0,
            last_consumed_generation: 0,
            stop_requested: false,
        }
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    /// 最近一次失败种类（直到被下一次命令尝试取代）
    pub fn last_failure(&self) -> Option<FailureKind> {
        self.last_failure
    }

    /// 失败信息的事件序号（上层据此只发布新事件）
    pub fn failure_seq(&self) -> u64 {
        self.failure_seq
    }

    /// 当前在途命令（下发后不可变）
    pub fn active_command(&self) -> Option<&MotionCommand> {
        self.active.as_ref().and_then(|a| a.command.as_ref())
    }

    /// 启动序列：复位控制器错误并使能驱动
    pub fn bring_up(&mut self) -> Result<(), ModbusError> {
        self.client.reset_errors()?;
        self.client.enable_drives()?;
        info!("Controller brought up: errors reset, drives enabled");
        Ok(())
    }

    /// Idle → TargetAcquired：对稳定目标执行可达性校验
    ///
    /// 校验失败：记录并保持 Idle（不转移状态）。已消费过的目标
    /// 代数直接忽略 —— 同一次确认绝不触发第二条命令。
    pub fn try_acquire(&mut self, target: &TrackedTarget, _now: Instant) -> bool {
        if self.state != MotionState::Idle {
            return false;
        }
        if target.generation <= self.last_consumed_generation {
            trace!(
                "Target generation {} already consumed, waiting for fresh confirmation",
                target.generation
            );
            return false;
        }

        let position = [target.position.x, target.position.y, target.position.z];

        if !self.config.workspace.contains(position) {
            warn!(
                "Target ({:.3}, {:.3}, {:.3}) outside workspace, rejected",
                position[0], position[1], position[2]
            );
            self.last_consumed_generation = target.generation;
            self.set_failure(Some(FailureKind::UnreachableTarget));
            return false;
        }

        // 最大移动距离需要当前 TCP 位置：新鲜读取，不用缓存值
        let status = match self.client.read_status() {
            Ok(status) => status,
            Err(e) => {
                self.set_failure(Some(Self::map_modbus_failure(&e)));
                warn!("Status read failed during acquisition: {e}");
                return false;
            }
        };
        if status.fault {
            debug!(
                "Controller faulted (code 0x{:04X}), not acquiring",
                status.fault_code
            );
            return false;
        }
        if !status.drives_enabled {
            debug!("Drives not enabled, not acquiring");
            return false;
        }
        let reach = distance(status.tcp_position, position);
        if reach > self.config.max_reach_m {
            warn!(
                "Target {:.3} m from current TCP exceeds max reach {:.3} m, rejected",
                reach, self.config.max_reach_m
            );
            self.last_consumed_generation = target.generation;
            self.set_failure(Some(FailureKind::UnreachableTarget));
            return false;
        }

        self.last_consumed_generation = target.generation;
        self.active = Some(ActiveMotion {
            target: position,
            command: None,
            stop_sent: false,
        });
        self.state = MotionState::TargetAcquired;
        info!(
            "Target acquired at ({:.3}, {:.3}, {:.3}) (age {}, generation {})",
            position[0], position[1], position[2], target.age, target.generation
        );
        true
    }

    /// TargetAcquired → CommandSent：构造命令并写入协议层
    ///
    /// 协议失败被状态机吸收（→ Failed），返回 `Err` 仅表示 API 误用。
    pub fn dispatch(&mut self, now: Instant) -> Result<(), MotionError> {
        if self.state != MotionState::TargetAcquired {
            return Err(MotionError::InvalidState { state: self.state });
        }
        let Some(active) = self.active.as_mut() else {
            return Err(MotionError::InvalidState { state: self.state });
        };

        let command = MotionCommand {
            target: active.target,
            orientation: self.config.fixed_orientation,
            velocity_limit: self.config.velocity_limit,
            acceleration_limit: self.config.acceleration_limit,
            issued_at: now,
        };
        let flags = MoveFlags {
            program_number: self.config.program_number,
            speed_percent: self.config.speed_percent,
        };

        // 新的命令尝试取代上一次的失败信息
        self.set_failure(None);

        match self.client.write_target(command.target, &flags) {
            Ok(()) => {
                if let Some(active) = self.active.as_mut() {
                    active.command = Some(command);
                }
                self.state = MotionState::CommandSent;
                Ok(())
            }
            Err(e) => {
                warn!("Command write failed: {e}");
                self.fail(Self::map_modbus_failure(&e));
                Ok(())
            }
        }
    }

    /// 推进状态机（CommandSent/Moving 下轮询控制器状态）
    pub fn poll(&mut self, now: Instant) {
        if matches!(self.state, MotionState::CommandSent | MotionState::Moving)
            && self.stop_requested
        {
            self.send_stop_once();
        }
        match self.state {
            MotionState::CommandSent => self.poll_command_sent(now),
            MotionState::Moving => self.poll_moving(now),
            _ => {}
        }
    }

    /// 请求中止当前运动
    ///
    /// 映射到专用的停止寄存器写入；控制器确认（MOVING 位清除）后
    /// 强制转入 Failed(Stopped)。绝不通过拆掉连接来中止。
    pub fn request_stop(&mut self) {
        match self.state {
            MotionState::Idle | MotionState::Arrived | MotionState::Failed => {}
            MotionState::TargetAcquired => {
                info!("Stop requested before dispatch, releasing acquired target");
                self.active = None;
                self.state = MotionState::Idle;
            }
            MotionState::CommandSent | MotionState::Moving => {
                self.stop_requested = true;
                self.send_stop_once();
            }
        }
    }

    /// 确认终态，回到 Idle
    ///
    /// 失败信息保留（复合状态继续暴露），直到下一次命令尝试取代。
    pub fn acknowledge(&mut self) {
        if self.state.is_terminal() {
            debug!("Motion {:?} acknowledged, returning to Idle", self.state);
            self.state = MotionState::Idle;
            self.active = None;
            self.stop_requested = false;
        }
    }

    /// 归位：将配置的归位位置作为一次普通运动下发
    ///
    /// 走与跟踪目标完全相同的校验与监督路径。
    pub fn command_home(&mut self, now: Instant) -> Result<(), MotionError> {
        if self.state != MotionState::Idle {
            return Err(MotionError::InvalidState { state: self.state });
        }
        let home = self.config.home_position.ok_or(MotionError::NoHomeConfigured)?;
        if !self.config.workspace.contains(home) {
            return Err(MotionError::HomeOutsideWorkspace {
                x: home[0],
                y: home[1],
                z: home[2],
            });
        }
        self.active = Some(ActiveMotion {
            target: home,
            command: None,
            stop_sent: false,
        });
        self.state = MotionState::TargetAcquired;
        info!("Homing to ({:.3}, {:.3}, {:.3})", home[0], home[1], home[2]);
        self.dispatch(now)
    }

    /// 断开现场总线会话
    pub fn disconnect(&mut self) {
        self.client.disconnect();
    }

    // ==================== 内部状态推进 ====================

    fn poll_command_sent(&mut self, now: Instant) {
        let status = match self.client.read_status() {
            Ok(status) => status,
            Err(e) => {
                warn!("Status read failed while awaiting acceptance: {e}");
                self.fail(Self::map_modbus_failure(&e));
                return;
            }
        };
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let stop_sent = active.stop_sent;
        let Some(issued_at) = active.command.as_ref().map(|c| c.issued_at) else {
            return;
        };

        if status.fault {
            self.fail(FailureKind::CommandRejected);
        } else if stop_sent && !status.moving && !status.accepted {
            self.fail(FailureKind::Stopped);
        } else if status.moving || status.accepted {
            info!("Controller accepted command, motion in progress");
            self.state = MotionState::Moving;
        } else if now.duration_since(issued_at) > self.config.accept_timeout {
            warn!(
                "No acceptance within {:?}, command considered rejected",
                self.config.accept_timeout
            );
            self.fail(FailureKind::CommandRejected);
        }
    }

    fn poll_moving(&mut self, now: Instant) {
        let status = match self.client.read_status() {
            Ok(status) => status,
            Err(e) => {
                // 会话中途丢失不做静默恢复：本次运动按失败处理
                warn!("Status read failed mid-motion: {e}");
                self.fail(FailureKind::CommunicationLost);
                return;
            }
        };
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let target = active.target;
        let stop_sent = active.stop_sent;
        let Some(issued_at) = active.command.as_ref().map(|c| c.issued_at) else {
            return;
        };

        if status.fault {
            warn!("Controller fault 0x{:04X} mid-motion", status.fault_code);
            self.fail(FailureKind::MotionFault);
        } else if stop_sent && !status.moving {
            info!("Stop acknowledged by controller");
            self.fail(FailureKind::Stopped);
        } else if status.in_position
            && distance(status.tcp_position, target) <= self.config.arrival_tolerance_m
        {
            info!(
                "Arrived at ({:.3}, {:.3}, {:.3})",
                status.tcp_position[0], status.tcp_position[1], status.tcp_position[2]
            );
            self.state = MotionState::Arrived;
        } else if now.duration_since(issued_at) > self.config.motion_timeout {
            warn!("Motion exceeded {:?}", self.config.motion_timeout);
            self.fail(FailureKind::MotionTimeout);
        }
    }

    fn send_stop_once(&mut self) {
        let already_sent = match self.active.as_ref() {
            Some(active) => active.stop_sent,
            None => return,
        };
        if already_sent {
            return;
        }
        match self.client.request_stop() {
            Ok(()) => {
                if let Some(active) = self.active.as_mut() {
                    active.stop_sent = true;
                }
            }
            Err(e) => {
                warn!("Stop write failed: {e}");
                self.fail(Self::map_modbus_failure(&e));
            }
        }
    }

    fn fail(&mut self, kind: FailureKind) {
        warn!("Motion failed: {kind:?}");
        self.set_failure(Some(kind));
        self.state = MotionState::Failed;
    }

    fn set_failure(&mut self, kind: Option<FailureKind>) {
        self.last_failure = kind;
        self.failure_seq = self.failure_seq.wrapping_add(1);
    }

    fn map_modbus_failure(e: &ModbusError) -> FailureKind {
        if e.is_rejection() {
            FailureKind::CommandRejected
        } else {
            FailureKind::CommunicationLost
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luban_modbus::mock::{SimBehavior, SimulatedRcs};
    use luban_modbus::{ClientConfig, ModbusSession, RegisterMap, SessionConfig};
    use nalgebra::{Point3, Vector3};
    use proptest::prelude::*;

    fn commander(
        sim: &SimulatedRcs,
        config: MotionConfig,
    ) -> MotionCommander<luban_modbus::mock::MockConnector> {
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
        let mut commander = MotionCommander::new(client, config);
        commander.bring_up().unwrap();
        commander
    }

    fn stable_target(position: [f64; 3], generation: u64) -> TrackedTarget {
        TrackedTarget {
            position: Point3::new(position[0], position[1], position[2]),
            velocity: Vector3::zeros(),
            confidence: 0.9,
            age: 5,
            last_update: Instant::now(),
            generation,
        }
    }

    #[test]
    fn test_nominal_motion_reaches_arrived() {
        let sim = SimulatedRcs::new(RegisterMap::default(), SimBehavior::Nominal);
        let mut commander = commander(&sim, MotionConfig::default());
        let now = Instant::now();

        assert!(commander.try_acquire(&stable_target([0.3, -0.2, 0.5], 1), now));
        assert_eq!(commander.state(), MotionState::TargetAcquired);

        commander.dispatch(now).unwrap();
        assert_eq!(commander.state(), MotionState::CommandSent);
        assert_eq!(sim.start_pulses(), 1);

        commander.poll(now);
        assert_eq!(commander.state(), MotionState::Moving);

        for _ in 0..10 {
            commander.poll(now);
            if commander.state() == MotionState::Arrived {
                break;
            }
        }
        assert_eq!(commander.state(), MotionState::Arrived);
        assert!(commander.last_failure().is_none());

        commander.acknowledge();
        assert_eq!(commander.state(), MotionState::Idle);
    }

    #[test]
    fn test_out_of_workspace_target_stays_idle() {
        let sim = SimulatedRcs::new(RegisterMap::default(), SimBehavior::Nominal);
        let mut commander = commander(&sim, MotionConfig::default());

        let acquired = commander.try_acquire(&stable_target([2.0, 0.0, 0.5], 1), Instant::now());
        assert!(!acquired);
        assert_eq!(commander.state(), MotionState::Idle);
        assert_eq!(commander.last_failure(), Some(FailureKind::UnreachableTarget));
        assert_eq!(sim.start_pulses(), 0);
    }

    proptest! {
        /// 工作空间外的任意目标都不得离开 Idle
        #[test]
        fn prop_outside_workspace_never_acquired(
            x in -5.0f64..5.0,
            y in -5.0f64..5.0,
            z in -5.0f64..5.0,
        ) {
            let config = MotionConfig::default();
            prop_assume!(!config.workspace.contains([x, y, z]));

            let sim = SimulatedRcs::new(RegisterMap::default(), SimBehavior::Nominal);
            let mut commander = commander(&sim, config);
            let acquired = commander.try_acquire(&stable_target([x, y, z], 1), Instant::now());
            prop_assert!(!acquired);
            prop_assert_eq!(commander.state(), MotionState::Idle);
            prop_assert_eq!(sim.start_pulses(), 0);
        }
    }

    #[test]
    fn test_max_reach_exceeded_rejected() {
        let sim = SimulatedRcs::new(RegisterMap::default(), SimBehavior::Nominal);
        let config = MotionConfig {
            max_reach_m: 0.3,
            ..Default::default()
        };
        let mut commander = commander(&sim, config);

        // 仿真 TCP 在原点；0.7m 处的目标在空间内但超出单次移动距离
        let acquired = commander.try_acquire(&stable_target([0.7, 0.0, 0.0], 1), Instant::now());
        assert!(!acquired);
        assert_eq!(commander.state(), MotionState::Idle);
        assert_eq!(commander.last_failure(), Some(FailureKind::UnreachableTarget));
    }

    #[test]
    fn test_acceptance_timeout_reaches_failed() {
        let sim = SimulatedRcs::new(RegisterMap::default(), SimBehavior::Silent);
        let config = MotionConfig::default();
        let accept_timeout = config.accept_timeout;
        let mut commander = commander(&sim, config);
        let t0 = Instant::now();

        assert!(commander.try_acquire(&stable_target([0.3, 0.0, 0.5], 1), t0));
        commander.dispatch(t0).unwrap();

        // 超时前保持 CommandSent
        commander.poll(t0 + accept_timeout / 2);
        assert_eq!(commander.state(), MotionState::CommandSent);

        // 超时后确定性进入 Failed
        commander.poll(t0 + accept_timeout + Duration::from_millis(10));
        assert_eq!(commander.state(), MotionState::Failed);
        assert_eq!(commander.last_failure(), Some(FailureKind::CommandRejected));

        // 同一代目标不得复用：必须等待跟踪器重新确认
        commander.acknowledge();
        assert!(!commander.try_acquire(&stable_target([0.3, 0.0, 0.5], 1), t0));
        assert!(commander.try_acquire(&stable_target([0.3, 0.0, 0.5], 2), t0));
    }

    #[test]
    fn test_write_rejection_fails_command() {
        let sim = SimulatedRcs::new(RegisterMap::default(), SimBehavior::Nominal);
        let mut commander = commander(&sim, MotionConfig::default());
        let now = Instant::now();

        assert!(commander.try_acquire(&stable_target([0.3, 0.0, 0.5], 1), now));

        // 采集后控制器开始拒绝写请求
        sim.set_behavior(SimBehavior::RejectWrites);
        commander.dispatch(now).unwrap();
        assert_eq!(commander.state(), MotionState::Failed);
        assert_eq!(commander.last_failure(), Some(FailureKind::CommandRejected));
    }

    #[test]
    fn test_fault_during_motion() {
        let sim = SimulatedRcs::new(
            RegisterMap::default(),
            SimBehavior::FaultDuringMotion { after_polls: 2 },
        );
        let mut commander = commander(&sim, MotionConfig::default());
        let now = Instant::now();

        assert!(commander.try_acquire(&stable_target([0.3, 0.0, 0.5], 1), now));
        commander.dispatch(now).unwrap();

        for _ in 0..10 {
            commander.poll(now);
            if commander.state() == MotionState::Failed {
                break;
            }
        }
        assert_eq!(commander.state(), MotionState::Failed);
        assert_eq!(commander.last_failure(), Some(FailureKind::MotionFault));
    }

    #[test]
    fn test_communication_loss_mid_motion() {
        let sim = SimulatedRcs::new(RegisterMap::default(), SimBehavior::Nominal);
        let mut commander = commander(&sim, MotionConfig::default());
        let now = Instant::now();

        assert!(commander.try_acquire(&stable_target([0.3, 0.0, 0.5], 1), now));
        commander.dispatch(now).unwrap();
        commander.poll(now);
        assert_eq!(commander.state(), MotionState::Moving);

        // 会话中途丢失：不静默恢复，本次运动失败
        sim.sever();
        commander.poll(now);
        assert_eq!(commander.state(), MotionState::Failed);
        assert_eq!(commander.last_failure(), Some(FailureKind::CommunicationLost));
    }

    #[test]
    fn test_stop_request_forces_failed_stopped() {
        let sim = SimulatedRcs::new(RegisterMap::default(), SimBehavior::Nominal);
        let mut commander = commander(&sim, MotionConfig::default());
        let now = Instant::now();

        assert!(commander.try_acquire(&stable_target([0.3, 0.0, 0.5], 1), now));
        commander.dispatch(now).unwrap();
        commander.poll(now);
        assert_eq!(commander.state(), MotionState::Moving);

        commander.request_stop();
        assert_eq!(sim.stop_pulses(), 1);

        commander.poll(now);
        assert_eq!(commander.state(), MotionState::Failed);
        assert_eq!(commander.last_failure(), Some(FailureKind::Stopped));
    }

    #[test]
    fn test_arrival_tolerance_enforced() {
        let sim = SimulatedRcs::new(RegisterMap::default(), SimBehavior::Nominal);
        let config = MotionConfig {
            // 容差收得极紧也应到位：仿真按命令坐标精确回报
            arrival_tolerance_m: 1e-4,
            ..Default::default()
        };
        let mut commander = commander(&sim, config);
        let now = Instant::now();

        assert!(commander.try_acquire(&stable_target([0.25, 0.1, 0.4], 1), now));
        commander.dispatch(now).unwrap();
        for _ in 0..10 {
            commander.poll(now);
        }
        assert_eq!(commander.state(), MotionState::Arrived);
    }

    #[test]
    fn test_home_motion_dispatches() {
        let sim = SimulatedRcs::new(RegisterMap::default(), SimBehavior::Nominal);
        let config = MotionConfig {
            home_position: Some([0.0, 0.0, 0.5]),
            ..Default::default()
        };
        let mut commander = commander(&sim, config);
        let now = Instant::now();

        commander.command_home(now).unwrap();
        assert_eq!(commander.state(), MotionState::CommandSent);
        let target = sim.target_written();
        assert!((target[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_home_without_configuration_errors() {
        let sim = SimulatedRcs::new(RegisterMap::default(), SimBehavior::Nominal);
        let mut commander = commander(&sim, MotionConfig::default());
        assert!(matches!(
            commander.command_home(Instant::now()),
            Err(MotionError::NoHomeConfigured)
        ));
    }

    #[test]
    fn test_dispatch_in_wrong_state_is_error() {
        let sim = SimulatedRcs::new(RegisterMap::default(), SimBehavior::Nominal);
        let mut commander = commander(&sim, MotionConfig::default());
        assert!(matches!(
            commander.dispatch(Instant::now()),
            Err(MotionError::InvalidState { state: MotionState::Idle })
        ));
    }

    #[test]
    fn test_failure_retained_until_next_attempt() {
        let sim = SimulatedRcs::new(RegisterMap::default(), SimBehavior::Silent);
        let config = MotionConfig::default();
        let accept_timeout = config.accept_timeout;
        let mut commander = commander(&sim, config);
        let t0 = Instant::now();

        assert!(commander.try_acquire(&stable_target([0.3, 0.0, 0.5], 1), t0));
        commander.dispatch(t0).unwrap();
        commander.poll(t0 + accept_timeout + Duration::from_millis(10));
        assert_eq!(commander.last_failure(), Some(FailureKind::CommandRejected));

        // 确认后失败信息仍然可见
        commander.acknowledge();
        assert_eq!(commander.last_failure(), Some(FailureKind::CommandRejected));

        // 新的命令尝试取代失败信息
        sim.set_behavior(SimBehavior::Nominal);
        assert!(commander.try_acquire(&stable_target([0.3, 0.0, 0.5], 2), t0));
        commander.dispatch(t0).unwrap();
        assert!(commander.last_failure().is_none());
    }
}
