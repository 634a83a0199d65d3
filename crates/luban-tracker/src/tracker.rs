//! 目标跟踪器实现
//!
//! 单写者约束：`observe` 只由感知线程调用；`stable_target` 是
//! 幂等、无副作用的查询，过期判定在查询时同样生效，因此查询方
//! 永远拿不到陈旧外推的目标。

use luban_vision::CandidatePoint;
use nalgebra::{Point3, Vector3};
use smallvec::SmallVec;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// 残差窗口长度（最近 N 次候选点相对滤波位置的偏移量）
const RESIDUAL_WINDOW: usize = 8;

/// 跟踪器配置
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// 指数平滑系数 α（新样本权重，0 < α ≤ 1）
    pub smoothing: f64,
    /// 跳变阈值（米）：超过则视为新目标，重置而不是平滑
    pub jump_threshold_m: f64,
    /// 确认次数：连续确认达到该值才可能稳定
    pub confirm_count: u32,
    /// 抖动容差（米）：残差窗口内的最大偏移必须低于该值
    pub jitter_tolerance_m: f64,
    /// 过期超时：超过该时长无候选点则丢弃目标
    pub staleness_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            smoothing: 0.35,
            jump_threshold_m: 0.15,
            confirm_count: 5,
            jitter_tolerance_m: 0.01,
            staleness_timeout: Duration::from_millis(500),
        }
    }
}

/// 被跟踪目标的当前估计
///
/// 每个跟踪会话至多一个实例，由跟踪器原地更新；`generation` 在每次
/// 重新播种时递增，下游据此保证不会重复消费同一次确认。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedTarget {
    /// 滤波后的位置（基座标系，米）
    pub position: Point3<f64>,
    /// 速度估计（米/秒，用于运动中的场景）
    pub velocity: Vector3<f64>,
    /// 运行置信度（候选点置信度的指数平均）
    pub confidence: f64,
    /// 连续确认计数
    pub age: u32,
    /// 最后一次更新时间
    pub last_update: Instant,
    /// 播种代数（每次 seed/reseed 递增）
    pub generation: u64,
}

struct TrackState {
    target: TrackedTarget,
    /// 最近若干次候选点相对滤波位置的偏移量（米）
    residuals: SmallVec<[f64; RESIDUAL_WINDOW]>,
}

/// 单目标跟踪器
pub struct TargetTracker {
    config: TrackerConfig,
    track: Option<TrackState>,
    generation: u64,
}

impl TargetTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            track: None,
            generation: 0,
        }
    }

    /// 消费一个候选点
    ///
    /// - 无在跟目标：播种（age = 1）
    /// - 偏移超过跳变阈值：重新播种（检测器重识别毛刺，不做平滑）
    /// - 否则：低通滤波并递增确认计数
    pub fn observe(&mut self, candidate: &CandidatePoint) {
        let now = candidate.timestamp;

        // 过期目标先丢弃，再按全新目标处理
        if let Some(state) = &self.track
            && now.duration_since(state.target.last_update) > self.config.staleness_timeout
        {
            debug!("Tracked target expired, discarding before reseed");
            self.track = None;
        }

        let Some(state) = self.track.as_mut() else {
            self.seed(candidate);
            return;
        };

        let innovation = (candidate.position - state.target.position).norm();
        if innovation > self.config.jump_threshold_m {
            warn!(
                "Candidate jumped {:.3} m (threshold {:.3} m), reseeding track",
                innovation, self.config.jump_threshold_m
            );
            self.seed(candidate);
            return;
        }

        let alpha = self.config.smoothing;
        let prev_position = state.target.position;
        let dt = now
            .saturating_duration_since(state.target.last_update)
            .as_secs_f64();

        state.target.position = prev_position + (candidate.position - prev_position) * alpha;
        if dt > 0.0 {
            let instant_vel = (state.target.position - prev_position) / dt;
            state.target.velocity =
                state.target.velocity + (instant_vel - state.target.velocity) * alpha;
        }
        state.target.confidence =
            state.target.confidence + (candidate.confidence - state.target.confidence) * alpha;
        state.target.age = state.target.age.saturating_add(1);
        state.target.last_update = now;

        if state.residuals.len() == RESIDUAL_WINDOW {
            state.residuals.remove(0);
        }
        state.residuals.push(innovation);

        trace!(
            "Track updated: age={}, innovation={:.4} m",
            state.target.age, innovation
        );
    }

    /// 当前稳定目标（若有）
    ///
    /// 幂等、无副作用。稳定判据为两段式：确认计数达到阈值，且最近
    /// 残差窗口内的最大偏移低于抖动容差 —— 单帧幸运命中不触发运动，
    /// 缓慢漂移的平均值也不触发。过期目标在查询时同样不可见。
    pub fn stable_target(&self, now: Instant) -> Option<TrackedTarget> {
        let state = self.track.as_ref()?;
        if now.duration_since(state.target.last_update) > self.config.staleness_timeout {
            return None;
        }
        if state.target.age < self.config.confirm_count {
            return None;
        }
        let max_residual = state.residuals.iter().cloned().fold(0.0_f64, f64::max);
        if max_residual >= self.config.jitter_tolerance_m {
            return None;
        }
        Some(state.target)
    }

    /// 丢弃当前目标（运动完成或失败后由上层调用，目标必须从头重新确认）
    pub fn reset(&mut self) {
        if self.track.take().is_some() {
            debug!("Tracker reset, target must be re-confirmed from scratch");
        }
    }

    fn seed(&mut self, candidate: &CandidatePoint) {
        self.generation += 1;
        self.track = Some(TrackState {
            target: TrackedTarget {
                position: candidate.position,
                velocity: Vector3::zeros(),
                confidence: candidate.confidence,
                age: 1,
                last_update: candidate.timestamp,
                generation: self.generation,
            },
            residuals: SmallVec::new(),
        });
        trace!("Track seeded (generation {})", self.generation);
    }
}
