//! # Luban Motion
//!
//! 运动指挥层：消费稳定目标，执行可达性校验，驱动现场总线协议
//! 状态机并监督运动直至完成或失败。
//!
//! ## 状态机
//!
//! ```text
//! Idle → TargetAcquired → CommandSent → Moving → Arrived
//!   ↑________________________|____________|         |
//!   |        （acknowledge）  ↓            ↓         |
//!   +——————————————————————— Failed ←——————+         |
//!   +————————————————————————————————————————————————+
//! ```
//!
//! 单次运动内状态单调推进（不存在 Moving → CommandSent 之类的回退）；
//! Arrived/Failed 对该次运动是终态，确认后回到 Idle。任何失败都不
//! 自动重试 —— 下一次运动必须来自跟踪器重新确认的新目标。

pub mod commander;
pub mod workspace;

pub use commander::{
    FailureKind, MotionCommand, MotionCommander, MotionConfig, MotionError, MotionState,
};
pub use workspace::WorkspaceBounds;
