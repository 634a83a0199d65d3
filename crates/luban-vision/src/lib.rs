//! # Luban Vision
//!
//! 视觉几何层：相机标定参数管理与像素坐标到机器人基座标系的变换。
//!
//! ## 模块
//!
//! - `calibration`: 标定参数（内参、畸变、手眼外参、工作平面、标定体积）与标定存储
//! - `detection`: 检测结果与候选点类型定义
//! - `transformer`: 像素 → 基座标系的纯函数变换
//!
//! ## 坐标系约定
//!
//! - 像素坐标：图像左上角为原点，u 向右，v 向下
//! - 相机坐标系：Z 轴沿光轴向前，深度即相机系 Z 值（米）
//! - 基座标系（Base frame）：机器人自身的固定参考系，外参为相机系 → 基座标系

pub mod calibration;
pub mod detection;
pub mod transformer;

// 重新导出常用类型
pub use calibration::{
    BrownConrady, CalibratedVolume, CalibrationError, CalibrationParameters, CalibrationStore,
    CameraIntrinsics, WorkPlane,
};
pub use detection::{CandidatePoint, DepthEstimate, Detection, select_best};
pub use transformer::{TransformError, transform};
