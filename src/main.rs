use anyhow::Result;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bevy::app::{App, AppExit, ScheduleRunnerPlugin, Startup, Update};
use bevy::ecs::prelude::*;
use bevy::math::{Quat, Vec3};
use bevy::transform::components::Transform;
use tracing::{error, info, Level};

use landmark_rig::config::Config;
use landmark_rig::landmark::{Landmark, LandmarkId, LandmarkSample};
use landmark_rig::logging;
use landmark_rig::pipeline::{Pipeline, PipelineState, TickReport};
use landmark_rig::rig::{BoneId, Rig};
use landmark_rig::LandmarkProducer;

const CONFIG_PATH: &str = "rig.toml";

// --- Bevy Resources ---

/// 描画スレッドが所有するリグとパイプライン
struct RigHost {
    pipeline: Pipeline,
    rig: Rig,
}

#[derive(Resource)]
struct Controls {
    /// SIGUSR1 またはコンソール "s" で立つ
    stall_toggle: Arc<AtomicBool>,
    /// 検出器スレッドが参照する
    stalled: Arc<AtomicBool>,
    quit: Arc<AtomicBool>,
}

#[derive(Resource)]
struct StatusCounter {
    frame_count: u32,
    bones_written: usize,
    last_report: Option<TickReport>,
    last_state: PipelineState,
    timer: Instant,
}

#[derive(Component)]
struct BoneEntity(BoneId);

fn main() -> Result<()> {
    logging::init("rig", Level::INFO)?;
    info!("landmark-rig {}", env!("RIG_BUILD_VERSION"));

    let config = Config::load_or_default(CONFIG_PATH);
    info!("Target FPS: {}", config.app.target_fps);
    info!("Detector FPS: {}", config.app.detector_fps);
    info!("Stale after: {}ms", config.pipeline.stale_after_ms);

    let rig = Rig::humanoid();
    info!("Rig: {} bones", rig.len());

    // 所有スレッド（= bevy のメインスレッド）で開始する
    let mut pipeline = Pipeline::new(config.clone());
    pipeline.start(&rig)?;

    let stall_toggle = Arc::new(AtomicBool::new(false));
    let stalled = Arc::new(AtomicBool::new(false));
    let quit = Arc::new(AtomicBool::new(false));
    let detector_running = Arc::new(AtomicBool::new(true));

    // 停止トグル: SIGUSR1 シグナルまたはコンソール入力 "s"
    signal_hook::flag::register(signal_hook::consts::SIGUSR1, stall_toggle.clone())?;
    spawn_console(stall_toggle.clone(), quit.clone());

    let detector = spawn_detector(
        pipeline.producer(),
        config.app.detector_fps,
        stalled.clone(),
        detector_running.clone(),
    )?;

    info!("");
    info!("操作: [S + Enter] 検出器の停止/再開  [Q + Enter] 終了");
    info!("");

    let frame_duration = Duration::from_secs_f64(1.0 / config.app.target_fps.max(1) as f64);

    let mut app = App::new();
    app.add_plugins(ScheduleRunnerPlugin::run_loop(frame_duration))
        .insert_non_send_resource(RigHost { pipeline, rig })
        .insert_resource(Controls {
            stall_toggle,
            stalled,
            quit,
        })
        .insert_resource(StatusCounter {
            frame_count: 0,
            bones_written: 0,
            last_report: None,
            last_state: PipelineState::Running,
            timer: Instant::now(),
        })
        .add_systems(Startup, spawn_bones_system)
        .add_systems(
            Update,
            (control_system, tick_pipeline_system, sync_bones_system, status_system).chain(),
        );

    app.run();

    info!("Shutting down...");
    if let Some(mut host) = app.world_mut().remove_non_send_resource::<RigHost>() {
        host.pipeline.stop();
        let stats = host.pipeline.buffer_stats();
        info!(
            "Samples: accepted={} out_of_order={} dropped_after_stop={}",
            stats.accepted, stats.out_of_order, stats.detached
        );
        info!("Bone writes: {}", host.pipeline.applier().write_count());
    }
    detector_running.store(false, Ordering::Release);
    if detector.join().is_err() {
        error!("detector thread panicked");
    }
    Ok(())
}

fn spawn_console(stall_toggle: Arc<AtomicBool>, quit: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "s" => stall_toggle.store(true, Ordering::Release),
                "q" => {
                    quit.store(true, Ordering::Release);
                    break;
                }
                _ => {}
            }
        }
    });
}

/// 不規則な間隔でランドマークを送る疑似検出器
fn spawn_detector(
    producer: LandmarkProducer,
    fps: u32,
    stalled: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let interval = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
    let handle = std::thread::Builder::new()
        .name("detector".into())
        .spawn(move || {
            let start = Instant::now();
            let mut seq: u64 = 0;
            while running.load(Ordering::Acquire) {
                // 間隔を ±30% 揺らす
                let jitter = ((seq * 7919) % 13) as f64 / 12.0 * 0.6 - 0.3;
                std::thread::sleep(interval.mul_f64(1.0 + jitter));
                if stalled.load(Ordering::Acquire) {
                    continue;
                }
                seq += 1;
                let elapsed = start.elapsed();
                producer.push(synthetic_pose(seq, elapsed.as_micros() as u64, elapsed.as_secs_f32()));
            }
        })?;
    Ok(handle)
}

/// 左腕を振り、右肘を曲げ伸ばしする正面向きの姿勢（非ミラー映像）
fn synthetic_pose(seq: u64, timestamp_us: u64, t: f32) -> LandmarkSample {
    let mut points: Vec<(LandmarkId, f32, f32, f32)> = vec![
        (LandmarkId::Nose, 0.5, 0.18, -0.05),
        (LandmarkId::LeftEar, 0.53, 0.17, 0.0),
        (LandmarkId::RightEar, 0.47, 0.17, 0.0),
        (LandmarkId::LeftShoulder, 0.58, 0.3, 0.0),
        (LandmarkId::RightShoulder, 0.42, 0.3, 0.0),
        (LandmarkId::LeftHip, 0.55, 0.55, 0.0),
        (LandmarkId::RightHip, 0.45, 0.55, 0.0),
        (LandmarkId::LeftKnee, 0.55, 0.72, 0.0),
        (LandmarkId::RightKnee, 0.45, 0.72, 0.0),
        (LandmarkId::LeftAnkle, 0.55, 0.9, 0.0),
        (LandmarkId::RightAnkle, 0.45, 0.9, 0.0),
    ];

    // 左腕: 肩を中心に上下に振る
    let swing = 0.6 * (2.0 * PI * 0.5 * t).sin();
    let (ex, ey) = (0.58 + 0.1 * swing.cos(), 0.3 - 0.1 * swing.sin());
    points.push((LandmarkId::LeftElbow, ex, ey, 0.0));
    points.push((LandmarkId::LeftWrist, ex + 0.09 * swing.cos(), ey - 0.09 * swing.sin(), 0.0));

    // 右腕: 水平のまま前腕を前に曲げる
    let bend = 0.5 * PI * (0.5 - 0.5 * (2.0 * PI * 0.25 * t).cos());
    points.push((LandmarkId::RightElbow, 0.32, 0.3, 0.0));
    points.push((LandmarkId::RightWrist, 0.32 - 0.09 * bend.cos(), 0.3, -0.09 * bend.sin()));

    points
        .into_iter()
        .fold(LandmarkSample::new(seq, timestamp_us), |sample, (id, x, y, z)| {
            sample.with_landmark(id, Landmark::new(x, y, z, 0.9))
        })
}

// --- Systems ---

fn spawn_bones_system(mut commands: Commands, host: NonSend<RigHost>) {
    for (id, bone) in host.rig.iter() {
        commands.spawn((BoneEntity(id), to_bevy(bone.current())));
    }
}

fn control_system(controls: Res<Controls>, mut exit: EventWriter<AppExit>) {
    if controls.stall_toggle.swap(false, Ordering::AcqRel) {
        let stalled = !controls.stalled.load(Ordering::Acquire);
        controls.stalled.store(stalled, Ordering::Release);
        info!("Detector {}", if stalled { "stalled" } else { "resumed" });
    }
    if controls.quit.load(Ordering::Acquire) {
        exit.send(AppExit::Success);
    }
}

fn tick_pipeline_system(mut host: NonSendMut<RigHost>, mut status: ResMut<StatusCounter>) {
    let host = &mut *host;
    match host.pipeline.tick(&mut host.rig) {
        Ok(report) => {
            status.frame_count += 1;
            status.bones_written += report.bones_written;
            status.last_report = Some(report);
        }
        Err(e) => error!("tick failed: {}", e),
    }
}

fn sync_bones_system(host: NonSend<RigHost>, mut bones: Query<(&BoneEntity, &mut Transform)>) {
    for (entity, mut transform) in bones.iter_mut() {
        if let Some(bone) = host.rig.bone(entity.0) {
            *transform = to_bevy(bone.current());
        }
    }
}

fn status_system(mut status: ResMut<StatusCounter>) {
    if let Some(report) = status.last_report {
        if report.state != status.last_state {
            info!("Pipeline: {} -> {}", status.last_state, report.state);
            status.last_state = report.state;
        }
    }
    let elapsed = status.timer.elapsed().as_secs_f32();
    if elapsed >= 1.0 {
        let fps = status.frame_count as f32 / elapsed;
        match status.last_report {
            Some(r) => info!(
                "FPS: {:.1} | {} | seq {:?} | bones {} | landmarks {}",
                fps, r.state, r.sequence, status.bones_written, r.tracked_landmarks
            ),
            None => info!("FPS: {:.1}", fps),
        }
        status.frame_count = 0;
        status.bones_written = 0;
        status.timer = Instant::now();
    }
}

fn to_bevy(t: &landmark_rig::rig::Transform) -> Transform {
    let q = t.rotation.quaternion();
    Transform::from_translation(Vec3::new(t.translation.x, t.translation.y, t.translation.z))
        .with_rotation(Quat::from_xyzw(q.i, q.j, q.k, q.w))
}
