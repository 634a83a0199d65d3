//! 寄存器映射与状态字定义
//!
//! 具体地址是部署期配置，不属于核心逻辑：控制器的保持寄存器布局
//! 由现场的信号配置决定，默认值对应参考控制器的出厂映射。

use serde::{Deserialize, Serialize};

/// 保持寄存器映射
///
/// f32 值（目标/实际坐标）各占两个连续寄存器，此处地址为低位字地址。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterMap {
    // === 命令区 ===
    /// 目标 X 坐标（f32，米）
    pub target_x: u16,
    /// 目标 Y 坐标（f32，米）
    pub target_y: u16,
    /// 目标 Z 坐标（f32，米）
    pub target_z: u16,
    /// 速度倍率（百分比，可选）
    pub speed_override: Option<u16>,
    /// 程序号
    pub program_number: u16,
    /// 程序启动脉冲
    pub start_program: u16,
    /// 停止脉冲
    pub stop: u16,
    /// 错误复位脉冲
    pub reset_errors: u16,
    /// 驱动使能
    pub enable_drives: u16,

    // === 状态区 ===
    /// 状态字（位定义见 [`status_bits`]）
    pub status_word: u16,
    /// 故障码
    pub fault_code: u16,
    /// 实际 TCP X 坐标（f32，米）
    pub actual_x: u16,
    /// 实际 TCP Y 坐标（f32，米）
    pub actual_y: u16,
    /// 实际 TCP Z 坐标（f32，米）
    pub actual_z: u16,
    /// 心跳计数器（可选，控制器侧递增）
    pub heartbeat: Option<u16>,
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self {
            target_x: 200,
            target_y: 202,
            target_z: 204,
            speed_override: Some(206),
            program_number: 100,
            start_program: 101,
            stop: 102,
            reset_errors: 103,
            enable_drives: 104,
            status_word: 300,
            fault_code: 301,
            actual_x: 302,
            actual_y: 304,
            actual_z: 306,
            heartbeat: Some(308),
        }
    }
}

/// 状态字位定义
pub mod status_bits {
    /// 驱动已使能
    pub const DRIVES_ENABLED: u16 = 1 << 0;
    /// 运动命令已被接受
    pub const ACCEPTED: u16 = 1 << 1;
    /// 控制器正在执行运动
    pub const MOVING: u16 = 1 << 2;
    /// TCP 已到位
    pub const IN_POSITION: u16 = 1 << 3;
    /// 故障
    pub const FAULT: u16 = 1 << 4;
}
