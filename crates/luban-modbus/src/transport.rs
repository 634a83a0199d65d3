//! 传输层抽象与 TCP 实现
//!
//! `ModbusTransport` 承载单次 ADU 的发送与接收；`Connector` 负责
//! 建立新连接，使会话层可以在测试中注入仿真传输。

use crate::frame::MBAP_HEADER_LEN;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

/// 一次 ADU 往返的传输抽象
pub trait ModbusTransport: Send {
    /// 发送一个完整 ADU
    fn send(&mut self, adu: &[u8]) -> io::Result<()>;

    /// 接收一个完整 ADU 到 `buf`，返回长度
    ///
    /// 超时以 `ErrorKind::TimedOut`/`WouldBlock` 上报。
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// 连接工厂
///
/// 会话层在断开后通过它执行有界重连；实现必须是无状态可重入的。
pub trait Connector: Send {
    type Transport: ModbusTransport;

    fn connect(&self) -> io::Result<Self::Transport>;
}

/// TCP 连接配置
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// 目标地址（host:port）
    addr: String,
    /// 建链超时
    connect_timeout: Duration,
    /// 单次读/写超时（即每次调用的响应期限）
    io_timeout: Duration,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(2),
            io_timeout: Duration::from_millis(500),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }
}

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    fn connect(&self) -> io::Result<TcpTransport> {
        let addr = self
            .addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing"))?;
        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)?;
        // 寄存器往返都是小帧，禁用 Nagle 降低延迟
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.io_timeout))?;
        stream.set_write_timeout(Some(self.io_timeout))?;
        debug!("TCP transport connected to {}", self.addr);
        Ok(TcpTransport { stream })
    }
}

/// TCP 传输
pub struct TcpTransport {
    stream: TcpStream,
}

impl ModbusTransport for TcpTransport {
    fn send(&mut self, adu: &[u8]) -> io::Result<()> {
        self.stream.write_all(adu)
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // MBAP 头定长，length 字段（计入 unit id）给出剩余字节数
        self.stream.read_exact(&mut buf[..MBAP_HEADER_LEN])?;
        let declared = u16::from_be_bytes([buf[4], buf[5]]) as usize;
        let body = declared.saturating_sub(1);
        let total = MBAP_HEADER_LEN + body;
        if total > buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("ADU too large: {total} bytes"),
            ));
        }
        self.stream.read_exact(&mut buf[MBAP_HEADER_LEN..total])?;
        Ok(total)
    }
}
