//! # Luban Runtime
//!
//! 感知与执行双节拍的流水线装配层。
//!
//! 两条独立调度的活动共享唯一一份同步状态 —— 当前稳定目标快照：
//!
//! ```text
//! 检测器（外部） → [有界通道] → 感知线程：选优 → 变换 → 跟踪器（唯一写者）
//!                                              ↓ ArcSwapOption 快照发布
//! 执行线程：采集 → 校验 → 下发 → 监督 ←—— 最新稳定目标（读取方）
//!                    ↓ Modbus/TCP（独占会话）
//! ```
//!
//! 感知节拍（检测器帧率）与执行节拍（总线往返延迟）互不阻塞：
//! 指挥器的协议调用最多阻塞到自身超时，但绝不拖住候选点摄入。

pub mod pipeline;
pub mod runtime;
pub mod status;

pub use runtime::{RuntimeBuilder, RuntimeConfig, RuntimeError, VisionRuntime};
pub use status::{CompositeStatus, MetricsSnapshot, RuntimeMetrics};
