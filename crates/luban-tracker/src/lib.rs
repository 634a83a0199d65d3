//! # Luban Tracker
//!
//! 单目标跟踪器：消费基座标系候选点流，滤除抖动、拒绝跳变、
//! 维护至多一个 `TrackedTarget`，只有通过两段式稳定判据
//! （连续确认次数 + 抖动容差）的目标才对运动层可见。
//!
//! 跟踪器从不产生错误 —— 没有稳定目标是正常状态，不是失败。

pub mod tracker;

pub use tracker::{TargetTracker, TrackedTarget, TrackerConfig};
