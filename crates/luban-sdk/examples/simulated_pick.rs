//! 仿真抓取演示
//!
//! 不连接真实硬件：用仿真控制器跑通完整闭环 ——
//! 检测帧 → 坐标变换 → 跟踪确认 → 运动命令 → 到位。
//!
//! ```bash
//! cargo run -p luban-sdk --example simulated_pick
//! ```

use luban_modbus::mock::{SimBehavior, SimulatedRcs};
use luban_sdk::prelude::*;
use luban_vision::CameraIntrinsics;
use nalgebra::Point2;
use std::time::{Duration, Instant};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    // 仿真控制器与现场总线会话
    let sim = SimulatedRcs::new(RegisterMap::default(), SimBehavior::Nominal);
    let session = ModbusSession::new(sim.connector(), 1, SessionConfig::default());
    let client = RcsClient::new(session, RegisterMap::default());

    // 俯视相机标定：主点 (320, 240)，基座标系与相机系重合
    let mut params = CalibrationParameters::identity();
    params.intrinsics = CameraIntrinsics {
        fx: 600.0,
        fy: 600.0,
        cx: 320.0,
        cy: 240.0,
        skew: 0.0,
    };
    let calibration = CalibrationStore::from_parameters(params);

    let commander = MotionCommander::new(client, MotionConfig::default());
    let runtime = RuntimeBuilder::new()
        .runtime_config(RuntimeConfig {
            poll_interval: Duration::from_millis(20),
            enabled_on_start: true,
            ..Default::default()
        })
        .spawn(calibration, commander);

    // 模拟检测器：工件出现在像素 (352, 221)，深度 0.48 m
    println!("Feeding simulated detections...");
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        let _ = runtime.submit_frame(vec![Detection {
            center: Point2::new(352.0, 221.0),
            depth: DepthEstimate::Measured(0.48),
            class: "workpiece".to_string(),
            confidence: 0.9,
            timestamp: Instant::now(),
        }]);

        let metrics = runtime.metrics();
        if metrics.motions_arrived >= 1 {
            let target = sim.target_written();
            println!(
                "Arrived: target ({:.3}, {:.3}, {:.3}), {} command(s), {} frame(s)",
                target[0], target[1], target[2], metrics.commands_issued, metrics.frames_received
            );
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(33));
    }

    Err("simulated motion did not complete in time".into())
}
