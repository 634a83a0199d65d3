//! # Luban Modbus
//!
//! Modbus/TCP 现场总线客户端（无硬件依赖的协议层 + TCP 传输层）。
//!
//! ## 模块
//!
//! - `frame`: MBAP/PDU 组帧与解析、异常响应、f32 双寄存器编解码
//! - `transport`: 传输抽象（`ModbusTransport`/`Connector`）与 TCP 实现
//! - `session`: 持久会话：同步往返、每次调用超时、有界重连退避
//! - `registers`: 寄存器映射（部署期配置）与状态字位定义
//! - `client`: RCS 寄存器级客户端（写目标、读状态、停止/复位/使能）
//! - `mock`: 仿真控制器（`mock` feature 或测试构建）
//!
//! ## 分层
//!
//! ```text
//! Motion Commander (luban-motion)
//!     ↓ RcsClient（寄存器语义）
//! ModbusSession（会话/重连）
//!     ↓ ModbusTransport（一次 ADU 往返）
//! TcpTransport / MockTransport
//! ```
//!
//! ## 字节序
//!
//! 寄存器按 Modbus 规范以大端（Motorola, MSB first）编码；32 位浮点
//! 跨两个寄存器，低位字在前（byteorder BIG / wordorder LITTLE，与
//! 目标控制器的负载约定一致）。

pub mod client;
pub mod frame;
pub mod registers;
pub mod session;
pub mod transport;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

use thiserror::Error;

// 重新导出常用类型
pub use client::{ClientConfig, MoveFlags, RcsClient, RcsStatus};
pub use frame::{ExceptionCode, ProtocolError, Request, Response, f32_to_registers, registers_to_f32};
pub use registers::{RegisterMap, status_bits};
pub use session::{ModbusSession, SessionConfig};
pub use transport::{Connector, ModbusTransport, TcpConnector, TcpTransport};

/// 现场总线层统一错误类型
#[derive(Error, Debug)]
pub enum ModbusError {
    /// 传输层 IO 错误（连接在下一次操作前视为断开）
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 单次往返超时（不在内部静默重试，重试策略属于上层）
    #[error("Response timeout")]
    Timeout,

    /// 协议解析错误或从站异常响应
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 有界重连全部失败
    #[error("Communication lost after {attempts} reconnect attempts")]
    CommunicationLost { attempts: u32 },
}

impl ModbusError {
    /// 是否为从站明确拒绝（异常响应），区别于链路失败
    pub fn is_rejection(&self) -> bool {
        matches!(self, ModbusError::Protocol(ProtocolError::Exception(_)))
    }
}
