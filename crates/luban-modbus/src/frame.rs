//! Modbus/TCP 组帧与解析
//!
//! ADU = MBAP 头（7 字节）+ PDU。MBAP 的 length 字段计入 unit id
//! 及其后的全部字节。仅实现本核心需要的三个功能码：
//! 读保持寄存器（0x03）、写单寄存器（0x06）、写多寄存器（0x10）。

use num_enum::TryFromPrimitive;
use smallvec::SmallVec;
use thiserror::Error;

/// MBAP 头长度（字节）
pub const MBAP_HEADER_LEN: usize = 7;
/// ADU 最大长度（字节）
pub const MAX_ADU_LEN: usize = 260;
/// Modbus 协议标识（恒为 0）
pub const MODBUS_PROTOCOL_ID: u16 = 0;
/// 单次读取的最大寄存器数
pub const MAX_READ_COUNT: u16 = 125;
/// 单次写入的最大寄存器数
pub const MAX_WRITE_COUNT: u16 = 123;

/// 功能码常量
pub mod function {
    pub const READ_HOLDING_REGISTERS: u8 = 0x03;
    pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
    pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
    /// 异常响应标志位（置于功能码最高位）
    pub const EXCEPTION_FLAG: u8 = 0x80;
}

/// 从站异常码
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetFailed = 0x0B,
}

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("ADU too short: {len} bytes")]
    TooShort { len: usize },

    #[error("Invalid MBAP length: declared {declared}, actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Unexpected protocol id: {id}")]
    ProtocolId { id: u16 },

    #[error("Transaction id mismatch: expected {expected}, got {actual}")]
    TransactionMismatch { expected: u16, actual: u16 },

    #[error("Unit id mismatch: expected {expected}, got {actual}")]
    UnitMismatch { expected: u8, actual: u8 },

    #[error("Function mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    FunctionMismatch { expected: u8, actual: u8 },

    #[error("Modbus exception: {0:?}")]
    Exception(ExceptionCode),

    #[error("Unknown exception code: 0x{code:02X}")]
    UnknownException { code: u8 },

    #[error("Byte count mismatch: declared {declared}, actual {actual}")]
    ByteCount { declared: usize, actual: usize },

    #[error("Invalid register count: {count}")]
    InvalidCount { count: u16 },

    #[error("Unsupported function: 0x{function:02X}")]
    UnsupportedFunction { function: u8 },
}

/// MBAP 头（解析侧）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub unit_id: u8,
}

/// 请求 PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadHolding { address: u16, count: u16 },
    WriteSingle { address: u16, value: u16 },
    WriteMultiple { address: u16, values: SmallVec<[u16; 8]> },
}

impl Request {
    /// 请求对应的功能码
    pub fn function(&self) -> u8 {
        match self {
            Request::ReadHolding { .. } => function::READ_HOLDING_REGISTERS,
            Request::WriteSingle { .. } => function::WRITE_SINGLE_REGISTER,
            Request::WriteMultiple { .. } => function::WRITE_MULTIPLE_REGISTERS,
        }
    }
}

/// 响应 PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadHolding(SmallVec<[u16; 16]>),
    WriteSingle { address: u16, value: u16 },
    WriteMultiple { address: u16, count: u16 },
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

fn get_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

fn write_mbap(buf: &mut [u8], transaction_id: u16, unit_id: u8, pdu_len: usize) {
    put_u16(buf, 0, transaction_id);
    put_u16(buf, 2, MODBUS_PROTOCOL_ID);
    // length 计入 unit id 字节
    put_u16(buf, 4, (pdu_len + 1) as u16);
    buf[6] = unit_id;
}

/// 编码请求 ADU，返回总长度
pub fn encode_request(
    request: &Request,
    transaction_id: u16,
    unit_id: u8,
    buf: &mut [u8; MAX_ADU_LEN],
) -> Result<usize, ProtocolError> {
    let pdu_len = match request {
        Request::ReadHolding { address, count } => {
            if *count == 0 || *count > MAX_READ_COUNT {
                return Err(ProtocolError::InvalidCount { count: *count });
            }
            buf[7] = function::READ_HOLDING_REGISTERS;
            put_u16(buf, 8, *address);
            put_u16(buf, 10, *count);
            5
        }
        Request::WriteSingle { address, value } => {
            buf[7] = function::WRITE_SINGLE_REGISTER;
            put_u16(buf, 8, *address);
            put_u16(buf, 10, *value);
            5
        }
        Request::WriteMultiple { address, values } => {
            let count = values.len() as u16;
            if count == 0 || count > MAX_WRITE_COUNT {
                return Err(ProtocolError::InvalidCount { count });
            }
            buf[7] = function::WRITE_MULTIPLE_REGISTERS;
            put_u16(buf, 8, *address);
            put_u16(buf, 10, count);
            buf[12] = (count * 2) as u8;
            for (i, value) in values.iter().enumerate() {
                put_u16(buf, 13 + i * 2, *value);
            }
            6 + values.len() * 2
        }
    };
    write_mbap(buf, transaction_id, unit_id, pdu_len);
    Ok(MBAP_HEADER_LEN + pdu_len)
}

/// 解析 MBAP 头并校验声明长度
fn parse_mbap(adu: &[u8]) -> Result<MbapHeader, ProtocolError> {
    if adu.len() < MBAP_HEADER_LEN + 1 {
        return Err(ProtocolError::TooShort { len: adu.len() });
    }
    let protocol_id = get_u16(adu, 2);
    if protocol_id != MODBUS_PROTOCOL_ID {
        return Err(ProtocolError::ProtocolId { id: protocol_id });
    }
    let declared = get_u16(adu, 4) as usize;
    let actual = adu.len() - 6;
    if declared != actual {
        return Err(ProtocolError::LengthMismatch { declared, actual });
    }
    Ok(MbapHeader {
        transaction_id: get_u16(adu, 0),
        unit_id: adu[6],
    })
}

/// 解析响应 ADU
///
/// 校验事务号、unit id 与功能码；异常响应解析为
/// `ProtocolError::Exception`。
pub fn decode_response(
    adu: &[u8],
    transaction_id: u16,
    unit_id: u8,
    expected_function: u8,
) -> Result<Response, ProtocolError> {
    let header = parse_mbap(adu)?;
    if header.transaction_id != transaction_id {
        return Err(ProtocolError::TransactionMismatch {
            expected: transaction_id,
            actual: header.transaction_id,
        });
    }
    if header.unit_id != unit_id {
        return Err(ProtocolError::UnitMismatch {
            expected: unit_id,
            actual: header.unit_id,
        });
    }

    let function = adu[7];
    if function == (expected_function | function::EXCEPTION_FLAG) {
        if adu.len() < 9 {
            return Err(ProtocolError::TooShort { len: adu.len() });
        }
        let code = adu[8];
        return match ExceptionCode::try_from(code) {
            Ok(code) => Err(ProtocolError::Exception(code)),
            Err(_) => Err(ProtocolError::UnknownException { code }),
        };
    }
    if function != expected_function {
        return Err(ProtocolError::FunctionMismatch {
            expected: expected_function,
            actual: function,
        });
    }

    match function {
        function::READ_HOLDING_REGISTERS => {
            if adu.len() < 9 {
                return Err(ProtocolError::TooShort { len: adu.len() });
            }
            let byte_count = adu[8] as usize;
            let data = &adu[9..];
            if byte_count != data.len() || byte_count % 2 != 0 {
                return Err(ProtocolError::ByteCount {
                    declared: byte_count,
                    actual: data.len(),
                });
            }
            let mut values = SmallVec::new();
            for chunk in data.chunks_exact(2) {
                values.push(u16::from_be_bytes([chunk[0], chunk[1]]));
            }
            Ok(Response::ReadHolding(values))
        }
        function::WRITE_SINGLE_REGISTER => {
            if adu.len() < 12 {
                return Err(ProtocolError::TooShort { len: adu.len() });
            }
            Ok(Response::WriteSingle {
                address: get_u16(adu, 8),
                value: get_u16(adu, 10),
            })
        }
        function::WRITE_MULTIPLE_REGISTERS => {
            if adu.len() < 12 {
                return Err(ProtocolError::TooShort { len: adu.len() });
            }
            Ok(Response::WriteMultiple {
                address: get_u16(adu, 8),
                count: get_u16(adu, 10),
            })
        }
        other => Err(ProtocolError::UnsupportedFunction { function: other }),
    }
}

/// 解析请求 ADU（从站侧，仿真控制器与测试使用）
pub fn decode_request(adu: &[u8]) -> Result<(MbapHeader, Request), ProtocolError> {
    let header = parse_mbap(adu)?;
    let function = adu[7];
    let request = match function {
        function::READ_HOLDING_REGISTERS => {
            if adu.len() < 12 {
                return Err(ProtocolError::TooShort { len: adu.len() });
            }
            Request::ReadHolding {
                address: get_u16(adu, 8),
                count: get_u16(adu, 10),
            }
        }
        function::WRITE_SINGLE_REGISTER => {
            if adu.len() < 12 {
                return Err(ProtocolError::TooShort { len: adu.len() });
            }
            Request::WriteSingle {
                address: get_u16(adu, 8),
                value: get_u16(adu, 10),
            }
        }
        function::WRITE_MULTIPLE_REGISTERS => {
            if adu.len() < 13 {
                return Err(ProtocolError::TooShort { len: adu.len() });
            }
            let count = get_u16(adu, 10) as usize;
            let byte_count = adu[12] as usize;
            let data = &adu[13..];
            if byte_count != data.len() || byte_count != count * 2 {
                return Err(ProtocolError::ByteCount {
                    declared: byte_count,
                    actual: data.len(),
                });
            }
            let mut values = SmallVec::new();
            for chunk in data.chunks_exact(2) {
                values.push(u16::from_be_bytes([chunk[0], chunk[1]]));
            }
            Request::WriteMultiple {
                address: get_u16(adu, 8),
                values,
            }
        }
        other => return Err(ProtocolError::UnsupportedFunction { function: other }),
    };
    Ok((header, request))
}

/// 编码响应 ADU（从站侧），返回总长度
pub fn encode_response(
    response: &Response,
    transaction_id: u16,
    unit_id: u8,
    buf: &mut [u8; MAX_ADU_LEN],
) -> usize {
    let pdu_len = match response {
        Response::ReadHolding(values) => {
            buf[7] = function::READ_HOLDING_REGISTERS;
            buf[8] = (values.len() * 2) as u8;
            for (i, value) in values.iter().enumerate() {
                put_u16(buf, 9 + i * 2, *value);
            }
            2 + values.len() * 2
        }
        Response::WriteSingle { address, value } => {
            buf[7] = function::WRITE_SINGLE_REGISTER;
            put_u16(buf, 8, *address);
            put_u16(buf, 10, *value);
            5
        }
        Response::WriteMultiple { address, count } => {
            buf[7] = function::WRITE_MULTIPLE_REGISTERS;
            put_u16(buf, 8, *address);
            put_u16(buf, 10, *count);
            5
        }
    };
    write_mbap(buf, transaction_id, unit_id, pdu_len);
    MBAP_HEADER_LEN + pdu_len
}

/// 编码异常响应 ADU（从站侧），返回总长度
pub fn encode_exception(
    request_function: u8,
    code: ExceptionCode,
    transaction_id: u16,
    unit_id: u8,
    buf: &mut [u8; MAX_ADU_LEN],
) -> usize {
    buf[7] = request_function | function::EXCEPTION_FLAG;
    buf[8] = code as u8;
    write_mbap(buf, transaction_id, unit_id, 2);
    MBAP_HEADER_LEN + 2
}

// ==================== f32 双寄存器编解码 ====================

/// f32 → 两个保持寄存器
///
/// 字内大端、低位字在前（byteorder BIG / wordorder LITTLE），
/// 与目标控制器的 32 位浮点负载约定一致。
pub fn f32_to_registers(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits & 0xFFFF) as u16, (bits >> 16) as u16]
}

/// 两个保持寄存器 → f32（`f32_to_registers` 的逆）
pub fn registers_to_f32(regs: [u16; 2]) -> f32 {
    f32::from_bits(((regs[1] as u32) << 16) | regs[0] as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn test_encode_read_holding_request() {
        let mut buf = [0u8; MAX_ADU_LEN];
        let req = Request::ReadHolding {
            address: 0x012C,
            count: 2,
        };
        let len = encode_request(&req, 0x0A0B, 0x11, &mut buf).unwrap();
        assert_eq!(len, 12);
        assert_eq!(
            &buf[..len],
            &[0x0A, 0x0B, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03, 0x01, 0x2C, 0x00, 0x02]
        );
    }

    #[test]
    fn test_encode_write_multiple_request() {
        let mut buf = [0u8; MAX_ADU_LEN];
        let req = Request::WriteMultiple {
            address: 0x00C8,
            values: smallvec![0x1234, 0xABCD],
        };
        let len = encode_request(&req, 1, 1, &mut buf).unwrap();
        assert_eq!(len, MBAP_HEADER_LEN + 10);
        assert_eq!(buf[7], 0x10);
        assert_eq!(buf[12], 4); // byte count
        assert_eq!(&buf[13..17], &[0x12, 0x34, 0xAB, 0xCD]);
    }

    #[test]
    fn test_request_roundtrip_via_server_decode() {
        let mut buf = [0u8; MAX_ADU_LEN];
        let req = Request::WriteSingle {
            address: 101,
            value: 1,
        };
        let len = encode_request(&req, 7, 3, &mut buf).unwrap();
        let (header, decoded) = decode_request(&buf[..len]).unwrap();
        assert_eq!(header.transaction_id, 7);
        assert_eq!(header.unit_id, 3);
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_decode_read_holding_response() {
        let mut buf = [0u8; MAX_ADU_LEN];
        let resp = Response::ReadHolding(smallvec![0x0001, 0xFFFE]);
        let len = encode_response(&resp, 9, 2, &mut buf);
        let decoded = decode_response(&buf[..len], 9, 2, function::READ_HOLDING_REGISTERS).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn test_decode_exception_response() {
        let mut buf = [0u8; MAX_ADU_LEN];
        let len = encode_exception(
            function::WRITE_SINGLE_REGISTER,
            ExceptionCode::IllegalDataAddress,
            4,
            1,
            &mut buf,
        );
        let err =
            decode_response(&buf[..len], 4, 1, function::WRITE_SINGLE_REGISTER).unwrap_err();
        assert_eq!(err, ProtocolError::Exception(ExceptionCode::IllegalDataAddress));
    }

    #[test]
    fn test_transaction_mismatch_detected() {
        let mut buf = [0u8; MAX_ADU_LEN];
        let resp = Response::WriteSingle {
            address: 1,
            value: 2,
        };
        let len = encode_response(&resp, 5, 1, &mut buf);
        let err = decode_response(&buf[..len], 6, 1, function::WRITE_SINGLE_REGISTER).unwrap_err();
        assert!(matches!(err, ProtocolError::TransactionMismatch { .. }));
    }

    #[test]
    fn test_declared_length_mismatch_detected() {
        let mut buf = [0u8; MAX_ADU_LEN];
        let resp = Response::WriteSingle {
            address: 1,
            value: 2,
        };
        let len = encode_response(&resp, 5, 1, &mut buf);
        // 篡改 MBAP length 字段
        buf[5] = 0x09;
        let err = decode_response(&buf[..len], 5, 1, function::WRITE_SINGLE_REGISTER).unwrap_err();
        assert!(matches!(err, ProtocolError::LengthMismatch { .. }));
    }

    #[test]
    fn test_zero_count_rejected() {
        let mut buf = [0u8; MAX_ADU_LEN];
        let req = Request::ReadHolding {
            address: 0,
            count: 0,
        };
        assert!(matches!(
            encode_request(&req, 1, 1, &mut buf),
            Err(ProtocolError::InvalidCount { count: 0 })
        ));
    }

    #[test]
    fn test_f32_register_word_order() {
        // 1.0f32 = 0x3F80_0000：低位字在前
        let regs = f32_to_registers(1.0);
        assert_eq!(regs, [0x0000, 0x3F80]);
        assert_eq!(registers_to_f32(regs), 1.0);
    }

    #[test]
    fn test_f32_negative_value() {
        let regs = f32_to_registers(-123.456);
        let back = registers_to_f32(regs);
        assert!((back - -123.456).abs() < 1e-4);
    }
}
