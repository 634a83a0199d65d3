//! 检测结果与候选点类型
//!
//! `Detection` 由外部检测器产生（任何能给出包围框中心 + 置信度 +
//! 可选深度的检测器），`CandidatePoint` 是变换后的基座标系候选点。
//! 两者都是一次性数据，不在组件间保留引用。

use nalgebra::{Point2, Point3};
use std::time::Instant;

/// 深度来源
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DepthEstimate {
    /// 检测器给出的深度估计（相机系 Z 值，米）
    Measured(f64),
    /// 无深度，目标位于已知工作表面上（通过视线与平面求交解算）
    WorkSurface,
}

/// 单条检测结果
///
/// 像素坐标取包围框中心；时间戳为采集时刻而不是处理时刻。
#[derive(Debug, Clone)]
pub struct Detection {
    /// 包围框中心（像素）
    pub center: Point2<f64>,
    /// 深度估计
    pub depth: DepthEstimate,
    /// 类别标签
    pub class: String,
    /// 置信度 [0, 1]
    pub confidence: f64,
    /// 采集时间戳
    pub timestamp: Instant,
}

/// 基座标系候选点（坐标变换输出，跟踪器输入）
#[derive(Debug, Clone)]
pub struct CandidatePoint {
    /// 基座标系位置（米）
    pub position: Point3<f64>,
    /// 源检测的置信度
    pub confidence: f64,
    /// 源检测的采集时间戳
    pub timestamp: Instant,
    /// 源检测的类别标签
    pub source_class: String,
}

/// 在一帧检测中选出目标类别下置信度最高的一条
///
/// 多目标仲裁策略：置信度最高者获胜（并列时取先出现者）。
pub fn select_best<'a>(detections: &'a [Detection], class: &str) -> Option<&'a Detection> {
    detections
        .iter()
        .filter(|d| d.class == class)
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}
