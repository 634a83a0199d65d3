//! 坐标变换器
//!
//! 将单条检测反投影为基座标系 3D 候选点。输入的纯函数，调用间不保留
//! 任何状态。
//!
//! 流程：像素中心 → 逆内参 → 去畸变 → 相机系视线 →
//! 深度解算（实测深度或工作平面求交）→ 外参变换 → 体积校验。

use crate::calibration::CalibrationParameters;
use crate::detection::{CandidatePoint, DepthEstimate, Detection};
use nalgebra::{Point3, Vector3};
use thiserror::Error;

/// 视线与工作平面接近平行的判定阈值
const RAY_PLANE_EPS: f64 = 1e-9;

/// 坐标变换错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    /// 既无深度估计，也无有效的平面交点（视线平行于平面或交点在相机后方）
    #[error("Depth unavailable: {reason}")]
    DepthUnavailable { reason: &'static str },

    /// 解算点落在标定有效体积之外（外推，上报而不是静默接受）
    #[error("Point ({x:.3}, {y:.3}, {z:.3}) outside calibrated range")]
    OutOfCalibratedRange { x: f64, y: f64, z: f64 },
}

/// 将一条检测变换为基座标系候选点
pub fn transform(
    params: &CalibrationParameters,
    detection: &Detection,
) -> Result<CandidatePoint, TransformError> {
    // 1. 像素 → 归一化传感器坐标，先去畸变再反投影
    let sensor = params.intrinsics.pixel_to_sensor(&detection.center);
    let normalized = params.distortion.undistort(&sensor);

    // 2. 深度解算
    let point_base = match detection.depth {
        DepthEstimate::Measured(z) => {
            if z <= 0.0 || !z.is_finite() {
                return Err(TransformError::DepthUnavailable {
                    reason: "measured depth not positive",
                });
            }
            // 相机系点 (x_n * z, y_n * z, z)，再经外参进入基座标系
            let point_cam = Point3::new(normalized.x * z, normalized.y * z, z);
            params.extrinsics.transform_point(&point_cam)
        }
        DepthEstimate::WorkSurface => {
            let plane = params
                .work_plane
                .as_ref()
                .ok_or(TransformError::DepthUnavailable {
                    reason: "no work plane configured",
                })?;

            // 视线转入基座标系后与平面求交
            let origin = params.extrinsics.translation.vector;
            let dir: Vector3<f64> =
                params.extrinsics.rotation * Vector3::new(normalized.x, normalized.y, 1.0);

            let denom = plane.normal.dot(&dir);
            if denom.abs() < RAY_PLANE_EPS {
                return Err(TransformError::DepthUnavailable {
                    reason: "ray parallel to work plane",
                });
            }
            let t = (plane.offset - plane.normal.dot(&origin)) / denom;
            if t <= 0.0 {
                return Err(TransformError::DepthUnavailable {
                    reason: "work plane behind camera",
                });
            }
            Point3::from(origin + dir * t)
        }
    };

    // 3. 标定体积校验
    if !params.calibrated_volume.contains(&point_base) {
        return Err(TransformError::OutOfCalibratedRange {
            x: point_base.x,
            y: point_base.y,
            z: point_base.z,
        });
    }

    Ok(CandidatePoint {
        position: point_base,
        confidence: detection.confidence,
        timestamp: detection.timestamp,
        source_class: detection.class.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibratedVolume, CalibrationParameters, WorkPlane};
    use nalgebra::{Isometry3, Point2, Translation3, UnitQuaternion};
    use std::time::Instant;

    fn detection_at(u: f64, v: f64, depth: DepthEstimate) -> Detection {
        Detection {
            center: Point2::new(u, v),
            depth,
            class: "workpiece".to_string(),
            confidence: 0.8,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn test_identity_calibration_equals_camera_space() {
        // 单位内参 + 零畸变 + 单位外参：输出等于相机系坐标
        let params = CalibrationParameters::identity();
        let det = detection_at(0.3, -0.2, DepthEstimate::Measured(0.5));
        let cand = transform(&params, &det).unwrap();
        assert!((cand.position.x - 0.15).abs() < 1e-12);
        assert!((cand.position.y - -0.1).abs() < 1e-12);
        assert!((cand.position.z - 0.5).abs() < 1e-12);
        assert_eq!(cand.confidence, 0.8);
    }

    #[test]
    fn test_extrinsic_translation_applied() {
        let mut params = CalibrationParameters::identity();
        params.extrinsics = Isometry3::from_parts(
            Translation3::new(1.0, 2.0, 3.0),
            UnitQuaternion::identity(),
        );
        let det = detection_at(0.0, 0.0, DepthEstimate::Measured(1.0));
        let cand = transform(&params, &det).unwrap();
        assert!((cand.position.x - 1.0).abs() < 1e-12);
        assert!((cand.position.y - 2.0).abs() < 1e-12);
        assert!((cand.position.z - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_plane_intersection_resolves_depth() {
        // 相机位于 Z=1，朝 -Z 看向 Z=0 的工作面
        let mut params = CalibrationParameters::identity();
        params.extrinsics = Isometry3::from_parts(
            Translation3::new(0.0, 0.0, 1.0),
            UnitQuaternion::from_euler_angles(std::f64::consts::PI, 0.0, 0.0),
        );
        params.work_plane = Some(WorkPlane::horizontal(0.0));

        let det = detection_at(0.0, 0.0, DepthEstimate::WorkSurface);
        let cand = transform(&params, &det).unwrap();
        assert!(cand.position.z.abs() < 1e-9);
    }

    #[test]
    fn test_ray_parallel_to_plane_fails() {
        // 单位外参的视线沿 +Z；法向量沿 X 的平面与其平行
        let mut params = CalibrationParameters::identity();
        params.work_plane =
            Some(WorkPlane::new(Vector3::new(1.0, 0.0, 0.0), 5.0).unwrap());
        let det = detection_at(0.0, 0.0, DepthEstimate::WorkSurface);
        let err = transform(&params, &det).unwrap_err();
        assert!(matches!(err, TransformError::DepthUnavailable { .. }));
    }

    #[test]
    fn test_plane_behind_camera_fails() {
        // 平面在相机后方（交点 t < 0）
        let mut params = CalibrationParameters::identity();
        params.work_plane = Some(WorkPlane::horizontal(-1.0));
        let det = detection_at(0.0, 0.0, DepthEstimate::WorkSurface);
        let err = transform(&params, &det).unwrap_err();
        assert!(matches!(err, TransformError::DepthUnavailable { .. }));
    }

    #[test]
    fn test_missing_plane_and_depth_fails() {
        let params = CalibrationParameters::identity();
        let det = detection_at(0.0, 0.0, DepthEstimate::WorkSurface);
        assert!(matches!(
            transform(&params, &det),
            Err(TransformError::DepthUnavailable { .. })
        ));
    }

    #[test]
    fn test_non_positive_depth_fails() {
        let params = CalibrationParameters::identity();
        let det = detection_at(0.0, 0.0, DepthEstimate::Measured(0.0));
        assert!(matches!(
            transform(&params, &det),
            Err(TransformError::DepthUnavailable { .. })
        ));
    }

    #[test]
    fn test_out_of_calibrated_range_reported() {
        let mut params = CalibrationParameters::identity();
        params.calibrated_volume = CalibratedVolume::new(
            Point3::new(-0.1, -0.1, 0.0),
            Point3::new(0.1, 0.1, 0.3),
        );
        let det = detection_at(0.0, 0.0, DepthEstimate::Measured(0.5));
        let err = transform(&params, &det).unwrap_err();
        match err {
            TransformError::OutOfCalibratedRange { z, .. } => assert!((z - 0.5).abs() < 1e-12),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_distortion_correction_applied() {
        // 带畸变时，先畸变出的像素位置应能还原到原始归一化坐标
        let mut params = CalibrationParameters::identity();
        params.distortion = crate::calibration::BrownConrady {
            k1: -0.2,
            k2: 0.05,
            ..Default::default()
        };
        let truth = nalgebra::Vector2::new(0.25, -0.1);
        let (dx, dy) = {
            let r2 = truth.x * truth.x + truth.y * truth.y;
            let radial = 1.0 + params.distortion.k1 * r2 + params.distortion.k2 * r2 * r2;
            (truth.x * radial, truth.y * radial)
        };
        let det = detection_at(dx, dy, DepthEstimate::Measured(1.0));
        let cand = transform(&params, &det).unwrap();
        assert!((cand.position.x - truth.x).abs() < 1e-6);
        assert!((cand.position.y - truth.y).abs() < 1e-6);
    }
}
