//! 标定参数与标定存储
//!
//! 标定参数在一次会话内不可变，由 `CalibrationStore` 持有，
//! 启动时加载一次，重载由外部显式触发（不轮询文件）。

use arc_swap::ArcSwap;
use nalgebra::{
    Isometry3, Matrix3, Point2, Point3, Rotation3, Translation3, Unit, UnitQuaternion, Vector2,
    Vector3,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// 标定层错误类型
#[derive(Error, Debug)]
pub enum CalibrationError {
    /// 标定文件读取失败
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 标定文件解析失败
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// 标定参数非法（如焦距为零）
    #[error("Invalid calibration: {0}")]
    Invalid(String),

    /// 存储由内存参数构造，没有可重载的后备文件
    #[error("Calibration store has no backing file")]
    NoBackingFile,
}

/// 针孔相机内参（含斜切项）
///
/// 将传感器平面坐标映射到像素坐标，以及逆向映射。
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// X 方向焦距（像素）
    pub fx: f64,
    /// Y 方向焦距（像素）
    pub fy: f64,
    /// 主点 X 坐标（像素）
    pub cx: f64,
    /// 主点 Y 坐标（像素）
    pub cy: f64,
    /// 斜切项（通常为 0）
    #[serde(default)]
    pub skew: f64,
}

impl CameraIntrinsics {
    /// 单位内参（fx = fy = 1, cx = cy = 0）
    ///
    /// 此时像素坐标即归一化传感器坐标，主要用于测试和仿真。
    pub fn identity() -> Self {
        Self {
            fx: 1.0,
            fy: 1.0,
            cx: 0.0,
            cy: 0.0,
            skew: 0.0,
        }
    }

    /// 返回 3x3 内参矩阵 K
    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, self.skew, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0,
        )
    }

    /// 像素坐标 → 归一化传感器平面坐标（逆内参映射）
    pub fn pixel_to_sensor(&self, pixel: &Point2<f64>) -> Vector2<f64> {
        let sy = (pixel.y - self.cy) / self.fy;
        let sx = (pixel.x - self.cx - self.skew * sy) / self.fx;
        Vector2::new(sx, sy)
    }

    fn validate(&self) -> Result<(), CalibrationError> {
        if self.fx.abs() < f64::EPSILON || self.fy.abs() < f64::EPSILON {
            return Err(CalibrationError::Invalid(
                "focal length must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Brown-Conrady 五参数镜头畸变模型
///
/// `undistort` 通过定点迭代求逆（畸变量小时数次迭代即收敛）。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BrownConrady {
    #[serde(default)]
    pub k1: f64,
    #[serde(default)]
    pub k2: f64,
    #[serde(default)]
    pub k3: f64,
    #[serde(default)]
    pub p1: f64,
    #[serde(default)]
    pub p2: f64,
    /// 逆映射迭代次数（0 表示使用默认值 8）
    #[serde(default)]
    pub iters: u32,
}

impl BrownConrady {
    fn distort_impl(&self, x: f64, y: f64) -> (f64, f64) {
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;

        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;

        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;

        (x * radial + x_tan, y * radial + y_tan)
    }

    /// 归一化坐标去畸变（迭代求逆）
    pub fn undistort(&self, distorted: &Vector2<f64>) -> Vector2<f64> {
        let mut x = distorted.x;
        let mut y = distorted.y;

        let iters = if self.iters == 0 { 8 } else { self.iters };
        for _ in 0..iters {
            let (xd, yd) = self.distort_impl(x, y);
            x -= xd - distorted.x;
            y -= yd - distorted.y;
        }
        Vector2::new(x, y)
    }
}

/// 工作表面平面（基座标系），平面方程 `normal · p = offset`
///
/// 无深度估计的检测通过视线与该平面求交解出深度。
#[derive(Debug, Clone, Copy)]
pub struct WorkPlane {
    /// 单位法向量
    pub normal: Unit<Vector3<f64>>,
    /// 平面偏移（米）
    pub offset: f64,
}

impl WorkPlane {
    /// 由原始法向量构造（内部归一化）
    pub fn new(normal: Vector3<f64>, offset: f64) -> Result<Self, CalibrationError> {
        if normal.norm() < f64::EPSILON {
            return Err(CalibrationError::Invalid(
                "work plane normal must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            normal: Unit::new_normalize(normal),
            offset,
        })
    }

    /// Z = height 的水平工作面
    pub fn horizontal(height: f64) -> Self {
        Self {
            normal: Vector3::z_axis(),
            offset: height,
        }
    }
}

/// 外参标定的有效体积（基座标系轴对齐包围盒）
///
/// 超出该体积的解算点属于外推，必须上报而不是静默接受。
#[derive(Debug, Clone, Copy)]
pub struct CalibratedVolume {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl CalibratedVolume {
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, point: &Point3<f64>) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }
}

/// 一次会话的完整标定参数
///
/// 由 `CalibrationStore` 持有，核心在运行期只读。
#[derive(Debug, Clone)]
pub struct CalibrationParameters {
    /// 相机内参
    pub intrinsics: CameraIntrinsics,
    /// 镜头畸变
    pub distortion: BrownConrady,
    /// 手眼外参：相机系 → 基座标系
    pub extrinsics: Isometry3<f64>,
    /// 工作表面平面（可选，缺失时无深度检测直接失败）
    pub work_plane: Option<WorkPlane>,
    /// 标定有效体积
    pub calibrated_volume: CalibratedVolume,
}

impl CalibrationParameters {
    /// 单位标定：单位内参、零畸变、单位外参，体积取 ±10m
    ///
    /// 基座标系与相机系重合，常用于测试和仿真链路。
    pub fn identity() -> Self {
        Self {
            intrinsics: CameraIntrinsics::identity(),
            distortion: BrownConrady::default(),
            extrinsics: Isometry3::identity(),
            work_plane: None,
            calibrated_volume: CalibratedVolume::new(
                Point3::new(-10.0, -10.0, -10.0),
                Point3::new(10.0, 10.0, 10.0),
            ),
        }
    }
}

// ==================== 标定文件（TOML schema） ====================

/// 标定文件的磁盘格式
///
/// 外参以欧拉角（rx, ry, rz，弧度，XYZ 顺序）+ 平移表示，
/// 工作平面与标定体积用原始数组，避免对 nalgebra 序列化特性的依赖。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationFile {
    pub intrinsics: CameraIntrinsics,
    #[serde(default)]
    pub distortion: BrownConrady,
    pub extrinsics: ExtrinsicsFile,
    #[serde(default)]
    pub work_plane: Option<WorkPlaneFile>,
    pub volume: VolumeFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtrinsicsFile {
    /// 旋转：欧拉角 [rx, ry, rz]（弧度）
    pub rotation: [f64; 3],
    /// 平移 [x, y, z]（米）
    pub translation: [f64; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkPlaneFile {
    pub normal: [f64; 3],
    pub offset: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeFile {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl CalibrationFile {
    fn into_parameters(self) -> Result<CalibrationParameters, CalibrationError> {
        self.intrinsics.validate()?;

        let [rx, ry, rz] = self.extrinsics.rotation;
        let rotation = Rotation3::from_euler_angles(rx, ry, rz);
        let translation = Translation3::new(
            self.extrinsics.translation[0],
            self.extrinsics.translation[1],
            self.extrinsics.translation[2],
        );
        let extrinsics =
            Isometry3::from_parts(translation, UnitQuaternion::from_rotation_matrix(&rotation));

        let work_plane = match self.work_plane {
            Some(p) => Some(WorkPlane::new(
                Vector3::new(p.normal[0], p.normal[1], p.normal[2]),
                p.offset,
            )?),
            None => None,
        };

        let volume = CalibratedVolume::new(
            Point3::new(self.volume.min[0], self.volume.min[1], self.volume.min[2]),
            Point3::new(self.volume.max[0], self.volume.max[1], self.volume.max[2]),
        );
        if (0..3).any(|i| self.volume.min[i] > self.volume.max[i]) {
            return Err(CalibrationError::Invalid(
                "calibrated volume min must not exceed max".to_string(),
            ));
        }

        Ok(CalibrationParameters {
            intrinsics: self.intrinsics,
            distortion: self.distortion,
            extrinsics,
            work_plane,
            calibrated_volume: volume,
        })
    }
}

// ==================== 标定存储 ====================

/// 标定存储
///
/// 持有当前标定参数的无锁快照（ArcSwap）。感知线程每帧 `current()`
/// 读取，重载由外部显式调用 `reload()` 触发 —— 不做文件轮询。
pub struct CalibrationStore {
    path: Option<PathBuf>,
    params: ArcSwap<CalibrationParameters>,
}

impl CalibrationStore {
    /// 从 TOML 标定文件加载
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CalibrationError> {
        let path = path.as_ref().to_path_buf();
        let params = Self::read_file(&path)?;
        info!("Calibration loaded from {}", path.display());
        Ok(Self {
            path: Some(path),
            params: ArcSwap::from_pointee(params),
        })
    }

    /// 由内存参数构造（测试/仿真；`reload()` 将返回 `NoBackingFile`）
    pub fn from_parameters(params: CalibrationParameters) -> Self {
        Self {
            path: None,
            params: ArcSwap::from_pointee(params),
        }
    }

    /// 当前标定参数快照（无锁读取）
    pub fn current(&self) -> Arc<CalibrationParameters> {
        self.params.load_full()
    }

    /// 显式重载后备文件
    ///
    /// 成功后新参数对后续 `current()` 调用原子可见；失败时保留旧参数。
    pub fn reload(&self) -> Result<(), CalibrationError> {
        let path = self.path.as_ref().ok_or(CalibrationError::NoBackingFile)?;
        let params = Self::read_file(path)?;
        self.params.store(Arc::new(params));
        info!("Calibration reloaded from {}", path.display());
        Ok(())
    }

    fn read_file(path: &Path) -> Result<CalibrationParameters, CalibrationError> {
        let content = std::fs::read_to_string(path)?;
        let file: CalibrationFile = toml::from_str(&content)?;
        file.into_parameters()
    }
}
