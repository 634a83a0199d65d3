//! 工作空间安全限制
//!
//! 运动指挥层在下发任何命令之前校验目标可达性：工作空间包围盒 +
//! 距当前 TCP 的最大移动距离。校验失败的目标被拒绝并记录，永远
//! 不会进入协议层。

use serde::{Deserialize, Serialize};

/// 工作空间包围盒（基座标系，米）
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkspaceBounds {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Default for WorkspaceBounds {
    fn default() -> Self {
        // 默认值按参考机型的可达范围收紧，部署时应按现场标定覆盖
        Self {
            min: [-0.8, -0.8, 0.0],
            max: [0.8, 0.8, 1.2],
        }
    }
}

impl WorkspaceBounds {
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    /// 点是否位于包围盒内（闭区间）
    pub fn contains(&self, point: [f64; 3]) -> bool {
        (0..3).all(|i| point[i] >= self.min[i] && point[i] <= self.max[i])
    }
}

/// 两点间欧氏距离（米）
pub fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}
