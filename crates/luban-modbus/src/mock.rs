//! 仿真控制器
//!
//! 在内存寄存器组上执行 Modbus 请求，并按脚本化行为推进运动状态，
//! 用于无硬件的单元/集成测试。仿真的时间轴以"状态字读取次数"为
//! 步长推进，测试因此完全确定。

use crate::frame::{
    self, ExceptionCode, MAX_ADU_LEN, Request, Response, registers_to_f32,
};
use crate::registers::{RegisterMap, status_bits};
use crate::transport::{Connector, ModbusTransport};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::io;
use std::sync::Arc;

/// 仿真寄存器空间大小
const SIM_REGISTER_SPACE: usize = 1024;

/// 仿真控制器行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimBehavior {
    /// 正常：按配置的轮询步数接受并完成运动
    Nominal,
    /// 从不应答运动命令（状态字保持空闲，用于接受超时测试）
    Silent,
    /// 拒绝所有写请求（异常响应 ServerDeviceBusy）
    RejectWrites,
    /// 运动中途故障：进入运动后第 `after_polls` 次轮询置故障位
    FaultDuringMotion { after_polls: u32 },
}

struct SimState {
    map: RegisterMap,
    behavior: SimBehavior,
    regs: Vec<u16>,
    /// 进行中的运动：自启动以来的状态字读取次数
    motion_polls: Option<u32>,
    /// 接受命令所需的轮询次数
    accept_after_polls: u32,
    /// 接受后到位所需的轮询次数
    arrive_after_polls: u32,
    start_pulses: u32,
    stop_pulses: u32,
    severed: bool,
}

impl SimState {
    fn set_bits(&mut self, bits: u16) {
        self.regs[self.map.status_word as usize] |= bits;
    }

    fn clear_bits(&mut self, bits: u16) {
        self.regs[self.map.status_word as usize] &= !bits;
    }

    fn apply_write(&mut self, address: u16, value: u16) -> Result<(), ExceptionCode> {
        let idx = address as usize;
        if idx >= self.regs.len() {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        self.regs[idx] = value;

        if address == self.map.start_program && value == 1 {
            self.start_pulses += 1;
            if self.behavior != SimBehavior::Silent {
                self.motion_polls = Some(0);
                self.clear_bits(status_bits::ACCEPTED | status_bits::IN_POSITION);
            }
        } else if address == self.map.stop && value == 1 {
            self.stop_pulses += 1;
            self.motion_polls = None;
            self.clear_bits(status_bits::ACCEPTED | status_bits::MOVING);
        } else if address == self.map.reset_errors && value == 1 {
            self.clear_bits(status_bits::FAULT);
            self.regs[self.map.fault_code as usize] = 0;
        } else if address == self.map.enable_drives {
            if value == 1 {
                self.set_bits(status_bits::DRIVES_ENABLED);
            } else {
                self.clear_bits(status_bits::DRIVES_ENABLED);
            }
        }
        Ok(())
    }

    /// 每次状态字读取推进一步仿真时间轴
    fn step_motion(&mut self) {
        // 心跳与状态读取同步递增
        if let Some(addr) = self.map.heartbeat {
            let idx = addr as usize;
            self.regs[idx] = self.regs[idx].wrapping_add(1);
        }

        let Some(polls) = self.motion_polls.as_mut() else {
            return;
        };
        *polls += 1;
        let polls = *polls;

        match self.behavior {
            SimBehavior::Nominal => {
                if polls >= self.accept_after_polls {
                    self.set_bits(status_bits::ACCEPTED | status_bits::MOVING);
                }
                if polls >= self.accept_after_polls + self.arrive_after_polls {
                    self.clear_bits(status_bits::MOVING);
                    self.set_bits(status_bits::IN_POSITION);
                    self.copy_target_to_actual();
                    self.motion_polls = None;
                }
            }
            SimBehavior::FaultDuringMotion { after_polls } => {
                if polls >= self.accept_after_polls {
                    self.set_bits(status_bits::ACCEPTED | status_bits::MOVING);
                }
                if polls >= self.accept_after_polls + after_polls {
                    self.clear_bits(status_bits::MOVING);
                    self.set_bits(status_bits::FAULT);
                    self.regs[self.map.fault_code as usize] = 0x0040;
                    self.motion_polls = None;
                }
            }
            SimBehavior::Silent | SimBehavior::RejectWrites => {}
        }
    }

    fn copy_target_to_actual(&mut self) {
        let pairs = [
            (self.map.target_x, self.map.actual_x),
            (self.map.target_y, self.map.actual_y),
            (self.map.target_z, self.map.actual_z),
        ];
        for (src, dst) in pairs {
            self.regs[dst as usize] = self.regs[src as usize];
            self.regs[dst as usize + 1] = self.regs[src as usize + 1];
        }
    }

    fn read_f32_at(&self, address: u16) -> f64 {
        registers_to_f32([
            self.regs[address as usize],
            self.regs[address as usize + 1],
        ]) as f64
    }
}

/// 仿真控制器句柄
///
/// 克隆的 `connector()` 共享同一寄存器组，可随时从测试侧检查或注入。
pub struct SimulatedRcs {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedRcs {
    pub fn new(map: RegisterMap, behavior: SimBehavior) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                map,
                behavior,
                regs: vec![0; SIM_REGISTER_SPACE],
                motion_polls: None,
                accept_after_polls: 1,
                arrive_after_polls: 3,
                start_pulses: 0,
                stop_pulses: 0,
                severed: false,
            })),
        }
    }

    /// 调整仿真时序（接受/到位所需的轮询次数）
    pub fn with_timing(self, accept_after_polls: u32, arrive_after_polls: u32) -> Self {
        {
            let mut state = self.state.lock();
            state.accept_after_polls = accept_after_polls;
            state.arrive_after_polls = arrive_after_polls;
        }
        self
    }

    /// 取得连接工厂（可多次调用，共享状态）
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            state: self.state.clone(),
        }
    }

    /// 切换控制器行为（测试中途注入故障模式）
    pub fn set_behavior(&self, behavior: SimBehavior) {
        self.state.lock().behavior = behavior;
    }

    /// 切断链路：建链与收发全部失败
    pub fn sever(&self) {
        self.state.lock().severed = true;
    }

    /// 恢复链路
    pub fn restore(&self) {
        self.state.lock().severed = false;
    }

    /// 注入故障位与故障码
    pub fn inject_fault(&self, code: u16) {
        let mut state = self.state.lock();
        state.set_bits(status_bits::FAULT);
        let idx = state.map.fault_code as usize;
        state.regs[idx] = code;
    }

    /// 程序启动脉冲计数
    pub fn start_pulses(&self) -> u32 {
        self.state.lock().start_pulses
    }

    /// 停止脉冲计数
    pub fn stop_pulses(&self) -> u32 {
        self.state.lock().stop_pulses
    }

    /// 当前目标寄存器中的坐标
    pub fn target_written(&self) -> [f64; 3] {
        let state = self.state.lock();
        [
            state.read_f32_at(state.map.target_x),
            state.read_f32_at(state.map.target_y),
            state.read_f32_at(state.map.target_z),
        ]
    }

    /// 直接读取寄存器（测试断言用）
    pub fn register(&self, address: u16) -> u16 {
        self.state.lock().regs[address as usize]
    }
}

/// 仿真连接工厂
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<SimState>>,
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    fn connect(&self) -> io::Result<MockTransport> {
        if self.state.lock().severed {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "simulated link severed",
            ));
        }
        Ok(MockTransport {
            state: self.state.clone(),
            pending: None,
        })
    }
}

/// 仿真传输：`send` 时立即执行请求并暂存响应
pub struct MockTransport {
    state: Arc<Mutex<SimState>>,
    pending: Option<Vec<u8>>,
}

impl ModbusTransport for MockTransport {
    fn send(&mut self, adu: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.severed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated link severed",
            ));
        }

        let (header, request) = frame::decode_request(adu)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        let mut buf = [0u8; MAX_ADU_LEN];
        let len = match &request {
            Request::ReadHolding { address, count } => {
                let start = *address as usize;
                let end = start + *count as usize;
                if end > state.regs.len() {
                    frame::encode_exception(
                        request.function(),
                        ExceptionCode::IllegalDataAddress,
                        header.transaction_id,
                        header.unit_id,
                        &mut buf,
                    )
                } else {
                    let status = state.map.status_word;
                    if (start..end).contains(&(status as usize)) {
                        state.step_motion();
                    }
                    let values: SmallVec<[u16; 16]> =
                        state.regs[start..end].iter().copied().collect();
                    frame::encode_response(
                        &Response::ReadHolding(values),
                        header.transaction_id,
                        header.unit_id,
                        &mut buf,
                    )
                }
            }
            Request::WriteSingle { address, value } => {
                if state.behavior == SimBehavior::RejectWrites {
                    frame::encode_exception(
                        request.function(),
                        ExceptionCode::ServerDeviceBusy,
                        header.transaction_id,
                        header.unit_id,
                        &mut buf,
                    )
                } else {
                    match state.apply_write(*address, *value) {
                        Ok(()) => frame::encode_response(
                            &Response::WriteSingle {
                                address: *address,
                                value: *value,
                            },
                            header.transaction_id,
                            header.unit_id,
                            &mut buf,
                        ),
                        Err(code) => frame::encode_exception(
                            request.function(),
                            code,
                            header.transaction_id,
                            header.unit_id,
                            &mut buf,
                        ),
                    }
                }
            }
            Request::WriteMultiple { address, values } => {
                if state.behavior == SimBehavior::RejectWrites {
                    frame::encode_exception(
                        request.function(),
                        ExceptionCode::ServerDeviceBusy,
                        header.transaction_id,
                        header.unit_id,
                        &mut buf,
                    )
                } else {
                    let mut result = Ok(());
                    for (i, value) in values.iter().enumerate() {
                        result = state.apply_write(*address + i as u16, *value);
                        if result.is_err() {
                            break;
                        }
                    }
                    match result {
                        Ok(()) => frame::encode_response(
                            &Response::WriteMultiple {
                                address: *address,
                                count: values.len() as u16,
                            },
                            header.transaction_id,
                            header.unit_id,
                            &mut buf,
                        ),
                        Err(code) => frame::encode_exception(
                            request.function(),
                            code,
                            header.transaction_id,
                            header.unit_id,
                            &mut buf,
                        ),
                    }
                }
            }
        };

        self.pending = Some(buf[..len].to_vec());
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.state.lock().severed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated link severed",
            ));
        }
        match self.pending.take() {
            Some(adu) => {
                buf[..adu.len()].copy_from_slice(&adu);
                Ok(adu.len())
            }
            None => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "no pending response",
            )),
        }
    }
}
