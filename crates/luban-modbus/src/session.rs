//! Modbus 会话管理
//!
//! 每个会话持有一条持久连接。所有寄存器读写都是带超时的同步往返；
//! 超时即上报，不在会话内部静默重试 —— 重试策略属于持有上下文的
//! 运动指挥层。断开后的操作触发有界重连（指数退避），全部失败才
//! 上报 `CommunicationLost`。

use crate::ModbusError;
use crate::frame::{
    self, MAX_ADU_LEN, ProtocolError, Request, Response, f32_to_registers, registers_to_f32,
};
use crate::transport::{Connector, ModbusTransport};
use smallvec::SmallVec;
use std::io;
use std::time::Duration;
use tracing::{info, trace, warn};

/// 会话配置
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 断开后单次操作允许的最大重连次数
    pub max_reconnect_attempts: u32,
    /// 重连退避基准（每次失败后翻倍）
    pub reconnect_backoff: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 3,
            reconnect_backoff: Duration::from_millis(100),
        }
    }
}

/// Modbus/TCP 会话
///
/// 由运动指挥层独占持有；其他组件不得打开竞争会话。
pub struct ModbusSession<C: Connector> {
    connector: C,
    config: SessionConfig,
    unit_id: u8,
    transport: Option<C::Transport>,
    next_transaction: u16,
}

impl<C: Connector> ModbusSession<C> {
    /// 创建会话（惰性建链：首次操作时连接）
    pub fn new(connector: C, unit_id: u8, config: SessionConfig) -> Self {
        Self {
            connector,
            config,
            unit_id,
            transport: None,
            next_transaction: 0,
        }
    }

    /// 是否持有活动连接
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// 主动建链（等价于首次操作时的隐式连接）
    pub fn connect(&mut self) -> Result<(), ModbusError> {
        self.ensure_connected()
    }

    /// 关闭连接（后续操作将重新建链）
    pub fn disconnect(&mut self) {
        if self.transport.take().is_some() {
            info!("Fieldbus session disconnected");
        }
    }

    /// 读保持寄存器
    pub fn read_holding(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<SmallVec<[u16; 16]>, ModbusError> {
        let response = self.exchange(&Request::ReadHolding { address, count })?;
        match response {
            Response::ReadHolding(values) => {
                if values.len() != count as usize {
                    return Err(ProtocolError::ByteCount {
                        declared: count as usize * 2,
                        actual: values.len() * 2,
                    }
                    .into());
                }
                Ok(values)
            }
            _ => Err(ProtocolError::FunctionMismatch {
                expected: frame::function::READ_HOLDING_REGISTERS,
                actual: 0,
            }
            .into()),
        }
    }

    /// 写单个保持寄存器
    pub fn write_register(&mut self, address: u16, value: u16) -> Result<(), ModbusError> {
        self.exchange(&Request::WriteSingle { address, value })?;
        Ok(())
    }

    /// 写连续保持寄存器
    pub fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<(), ModbusError> {
        self.exchange(&Request::WriteMultiple {
            address,
            values: SmallVec::from_slice(values),
        })?;
        Ok(())
    }

    /// 读跨两个寄存器的 f32
    pub fn read_f32(&mut self, address: u16) -> Result<f32, ModbusError> {
        let regs = self.read_holding(address, 2)?;
        Ok(registers_to_f32([regs[0], regs[1]]))
    }

    /// 写跨两个寄存器的 f32
    pub fn write_f32(&mut self, address: u16, value: f32) -> Result<(), ModbusError> {
        let regs = f32_to_registers(value);
        self.write_registers(address, &regs)
    }

    /// 单次请求-响应往返
    ///
    /// IO 失败或帧流失步后连接作废（下一次操作重连）；从站异常响应
    /// 不影响连接本身。
    fn exchange(&mut self, request: &Request) -> Result<Response, ModbusError> {
        self.ensure_connected()?;

        let transaction_id = self.next_transaction;
        self.next_transaction = self.next_transaction.wrapping_add(1);

        let mut tx = [0u8; MAX_ADU_LEN];
        let len = frame::encode_request(request, transaction_id, self.unit_id, &mut tx)?;

        let Some(transport) = self.transport.as_mut() else {
            return Err(ModbusError::CommunicationLost { attempts: 0 });
        };

        let mut rx = [0u8; MAX_ADU_LEN];
        let io_result = match transport.send(&tx[..len]) {
            Ok(()) => transport.receive(&mut rx),
            Err(e) => Err(e),
        };

        let n = match io_result {
            Ok(n) => n,
            Err(e) => {
                self.transport = None;
                warn!("Fieldbus round trip failed: {e}");
                return Err(Self::map_io_error(e));
            }
        };

        match frame::decode_response(&rx[..n], transaction_id, self.unit_id, request.function()) {
            Ok(response) => {
                trace!("Exchange ok: txn={transaction_id}");
                Ok(response)
            }
            Err(ProtocolError::Exception(code)) => {
                // 从站明确拒绝，连接仍然有效
                Err(ProtocolError::Exception(code).into())
            }
            Err(e) => {
                // 帧流失步：连接不再可信
                self.transport = None;
                warn!("Fieldbus frame desync, dropping connection: {e}");
                Err(e.into())
            }
        }
    }

    fn ensure_connected(&mut self) -> Result<(), ModbusError> {
        if self.transport.is_some() {
            return Ok(());
        }

        let attempts = self.config.max_reconnect_attempts.max(1);
        let mut backoff = self.config.reconnect_backoff;
        for attempt in 1..=attempts {
            match self.connector.connect() {
                Ok(transport) => {
                    info!("Fieldbus connected (attempt {attempt}/{attempts})");
                    self.transport = Some(transport);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Fieldbus connect attempt {attempt}/{attempts} failed: {e}");
                    if attempt < attempts {
                        std::thread::sleep(backoff);
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }
        Err(ModbusError::CommunicationLost { attempts })
    }

    fn map_io_error(e: io::Error) -> ModbusError {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ModbusError::Timeout,
            _ => ModbusError::Io(e),
        }
    }
}
