//! # Luban SDK
//!
//! 视觉引导机器人定位流水线的统一入口。
//!
//! 闭环：相机观察工作空间 → 检测器给出目标 → 坐标变换进入基座标系
//! → 跟踪器确认稳定目标 → 运动指挥器经 Modbus/TCP 驱动机器人 TCP
//! 到达目标，并监督直至完成或失败。
//!
//! ## 分层
//!
//! - [`vision`]: 标定存储与像素 → 基座标系变换
//! - [`tracker`]: 单目标确认与滤波
//! - [`modbus`]: Modbus/TCP 组帧、会话与 RCS 寄存器客户端
//! - [`motion`]: 可达性校验与运动状态机
//! - [`runtime`]: 双节拍流水线装配与操作员接口
//!
//! ## 快速上手
//!
//! ```rust,no_run
//! use luban_sdk::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // 1. 标定与现场总线
//! let calibration = CalibrationStore::load("config/calibration.toml")?;
//! let connector = TcpConnector::new("192.168.1.20:502")
//!     .with_io_timeout(Duration::from_millis(500));
//! let session = ModbusSession::new(connector, 1, SessionConfig::default());
//! let client = RcsClient::new(session, RegisterMap::default());
//!
//! // 2. 运动指挥器独占会话
//! let commander = MotionCommander::new(client, MotionConfig::default());
//!
//! // 3. 启动流水线
//! let runtime = RuntimeBuilder::new().spawn(calibration, commander);
//! runtime.set_enabled(true);
//!
//! // 4. 外部检测器按帧推送检测结果
//! // runtime.submit_frame(detections)?;
//! # Ok(())
//! # }
//! ```

pub use luban_modbus as modbus;
pub use luban_motion as motion;
pub use luban_runtime as runtime;
pub use luban_tracker as tracker;
pub use luban_vision as vision;

/// 常用类型一站式导入
pub mod prelude {
    pub use luban_modbus::{
        ClientConfig, ModbusError, ModbusSession, MoveFlags, RcsClient, RcsStatus, RegisterMap,
        SessionConfig, TcpConnector,
    };
    pub use luban_motion::{
        FailureKind, MotionCommand, MotionCommander, MotionConfig, MotionState, WorkspaceBounds,
    };
    pub use luban_runtime::{
        CompositeStatus, MetricsSnapshot, RuntimeBuilder, RuntimeConfig, RuntimeError,
        VisionRuntime,
    };
    pub use luban_tracker::{TargetTracker, TrackedTarget, TrackerConfig};
    pub use luban_vision::{
        CalibrationParameters, CalibrationStore, CandidatePoint, DepthEstimate, Detection,
        TransformError, select_best, transform,
    };
}
