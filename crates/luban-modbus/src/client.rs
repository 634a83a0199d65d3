//! RCS 寄存器级客户端
//!
//! 在会话之上提供控制器语义：写目标位姿、读状态字、停止/复位/使能。
//! 会话由运动指挥层独占，此处不做任何命令重试 —— 失败原样上报。

use crate::ModbusError;
use crate::registers::{RegisterMap, status_bits};
use crate::session::ModbusSession;
use crate::transport::Connector;
use std::time::Duration;
use tracing::{debug, info};

/// 客户端配置
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// 脉冲寄存器的保持时间（写 1 → 保持 → 写 0）
    pub pulse_width: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pulse_width: Duration::from_millis(20),
        }
    }
}

/// 运动命令的附加标志
#[derive(Debug, Clone, Copy)]
pub struct MoveFlags {
    /// 控制器侧的运动程序号（通常 1 = 直线移动）
    pub program_number: u16,
    /// 速度倍率（百分比，None 表示不写）
    pub speed_percent: Option<u8>,
}

impl Default for MoveFlags {
    fn default() -> Self {
        Self {
            program_number: 1,
            speed_percent: None,
        }
    }
}

/// 一次状态读取的解码结果
///
/// 每次调用 `read_status` 都是新鲜的寄存器读取，永不缓存。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RcsStatus {
    /// 驱动已使能
    pub drives_enabled: bool,
    /// 运动命令已被接受
    pub accepted: bool,
    /// 控制器正在执行运动
    pub moving: bool,
    /// TCP 已到位
    pub in_position: bool,
    /// 故障位
    pub fault: bool,
    /// 故障码（无故障时为 0）
    pub fault_code: u16,
    /// 控制器上报的 TCP 位置（基座标系，米）
    pub tcp_position: [f64; 3],
    /// 心跳计数（映射未配置时为 None）
    pub heartbeat: Option<u16>,
}

/// RCS 控制器客户端
pub struct RcsClient<C: Connector> {
    session: ModbusSession<C>,
    map: RegisterMap,
    config: ClientConfig,
    /// 最近一次状态读取看到的心跳值
    last_heartbeat: Option<u16>,
}

impl<C: Connector> RcsClient<C> {
    pub fn new(session: ModbusSession<C>, map: RegisterMap) -> Self {
        Self {
            session,
            map,
            config: ClientConfig::default(),
            last_heartbeat: None,
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// 写入目标位姿并触发运动程序
    ///
    /// 坐标写入目标寄存器（f32 × 3），随后写程序号并脉冲启动位。
    pub fn write_target(
        &mut self,
        position: [f64; 3],
        flags: &MoveFlags,
    ) -> Result<(), ModbusError> {
        self.session.write_f32(self.map.target_x, position[0] as f32)?;
        self.session.write_f32(self.map.target_y, position[1] as f32)?;
        self.session.write_f32(self.map.target_z, position[2] as f32)?;

        if let (Some(speed), Some(addr)) = (flags.speed_percent, self.map.speed_override) {
            self.session.write_register(addr, speed.min(100) as u16)?;
        }

        self.session
            .write_register(self.map.program_number, flags.program_number)?;
        self.pulse(self.map.start_program)?;

        info!(
            "Move command issued: target ({:.3}, {:.3}, {:.3}), program {}",
            position[0], position[1], position[2], flags.program_number
        );
        Ok(())
    }

    /// 读取控制器状态（状态字 + 故障码 + 实际 TCP 位置 + 心跳）
    ///
    /// 永不缓存：每次调用都执行新鲜的寄存器往返。
    pub fn read_status(&mut self) -> Result<RcsStatus, ModbusError> {
        let word = self.session.read_holding(self.map.status_word, 1)?[0];

        let fault = word & status_bits::FAULT != 0;
        let fault_code = if fault {
            self.session.read_holding(self.map.fault_code, 1)?[0]
        } else {
            0
        };

        let x = self.session.read_f32(self.map.actual_x)? as f64;
        let y = self.session.read_f32(self.map.actual_y)? as f64;
        let z = self.session.read_f32(self.map.actual_z)? as f64;

        let heartbeat = match self.map.heartbeat {
            Some(addr) => Some(self.session.read_holding(addr, 1)?[0]),
            None => None,
        };
        if heartbeat.is_some() {
            self.last_heartbeat = heartbeat;
        }

        Ok(RcsStatus {
            drives_enabled: word & status_bits::DRIVES_ENABLED != 0,
            accepted: word & status_bits::ACCEPTED != 0,
            moving: word & status_bits::MOVING != 0,
            in_position: word & status_bits::IN_POSITION != 0,
            fault,
            fault_code,
            tcp_position: [x, y, z],
            heartbeat,
        })
    }

    /// 请求停止当前运动（专用停止寄存器脉冲，而不是拆连接）
    pub fn request_stop(&mut self) -> Result<(), ModbusError> {
        info!("Stop requested on fieldbus");
        self.pulse(self.map.stop)
    }

    /// 复位控制器的全部错误与急停状态（正脉冲）
    pub fn reset_errors(&mut self) -> Result<(), ModbusError> {
        self.pulse(self.map.reset_errors)?;
        debug!("Controller errors reset");
        Ok(())
    }

    /// 使能驱动（允许所有轴运动）
    pub fn enable_drives(&mut self) -> Result<(), ModbusError> {
        self.session.write_register(self.map.enable_drives, 1)?;
        debug!("Drives enabled");
        Ok(())
    }

    /// 断开会话
    pub fn disconnect(&mut self) {
        self.session.disconnect();
    }

    /// 会话是否持有活动连接
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// 最近一次状态读取看到的心跳值（从未读到则为 None）
    pub fn last_heartbeat(&self) -> Option<u16> {
        self.last_heartbeat
    }

    /// 寄存器映射（只读）
    pub fn register_map(&self) -> &RegisterMap {
        &self.map
    }

    /// 正脉冲：写 1，保持脉宽，再写 0
    fn pulse(&mut self, address: u16) -> Result<(), ModbusError> {
        self.session.write_register(address, 1)?;
        spin_sleep::sleep(self.config.pulse_width);
        self.session.write_register(address, 0)
    }
}
