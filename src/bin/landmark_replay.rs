//! Replays a recorded landmark stream through the pipeline in simulated time.
//!
//! Usage: landmark_replay <recording.jsonl> [config.toml] [tick_hz]

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn, Level};

use landmark_rig::config::Config;
use landmark_rig::landmark::read_jsonl;
use landmark_rig::logging;
use landmark_rig::pipeline::{Pipeline, PipelineState};
use landmark_rig::rig::Rig;

const DEFAULT_TICK_HZ: f64 = 60.0;

struct Args {
    recording: String,
    config: Option<String>,
    tick_hz: f64,
}

fn parse_args() -> Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        bail!("usage: {} <recording.jsonl> [config.toml] [tick_hz]", args[0]);
    }
    let tick_hz = match args.get(3) {
        Some(s) => s.parse().with_context(|| format!("invalid tick_hz: {}", s))?,
        None => DEFAULT_TICK_HZ,
    };
    if !(tick_hz > 0.0) {
        bail!("tick_hz must be positive");
    }
    Ok(Args {
        recording: args[1].clone(),
        config: args.get(2).cloned(),
        tick_hz,
    })
}

fn main() -> Result<()> {
    let args = parse_args()?;
    logging::init("replay", Level::INFO)?;
    info!("landmark_replay {}", env!("RIG_BUILD_VERSION"));

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let file = File::open(&args.recording)
        .with_context(|| format!("failed to open {}", args.recording))?;
    let samples = read_jsonl(BufReader::new(file))?;
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        warn!("{} contains no frames", args.recording);
        return Ok(());
    };
    let first_us = first.timestamp_us;
    let duration = Duration::from_micros(last.timestamp_us - first_us);
    info!("Frames: {} ({:.2}s)", samples.len(), duration.as_secs_f32());

    let mut rig = Rig::humanoid();
    let mut pipeline = Pipeline::new(config);
    let t0 = Instant::now();
    pipeline.start_at(t0, &rig)?;
    let producer = pipeline.producer();

    // 検出器の到着時刻 = 記録時刻
    let tick = Duration::from_secs_f64(1.0 / args.tick_hz);
    let end = duration + Duration::from_millis(pipeline.config().pipeline.stale_after_ms + 100);
    let mut pending = samples.into_iter().peekable();
    let mut state = pipeline.state();
    let mut ticks = 0u64;
    let mut elapsed = Duration::ZERO;

    while elapsed <= end {
        let now = t0 + elapsed;
        while let Some(sample) = pending.next_if(|s| Duration::from_micros(s.timestamp_us - first_us) <= elapsed) {
            let arrival = t0 + Duration::from_micros(sample.timestamp_us - first_us);
            debug!(
                "[{:>8.3}s] frame {}: {} landmarks, confidence {:.2}",
                elapsed.as_secs_f32(),
                sample.sequence,
                sample.present_count(),
                sample.average_confidence()
            );
            producer.push_at(sample, arrival);
        }

        let report = pipeline.tick_at(now, &mut rig)?;
        ticks += 1;
        if report.state != state {
            info!("[{:>8.3}s] {} -> {}", elapsed.as_secs_f32(), state, report.state);
            state = report.state;
        }
        if report.bones_written > 0 {
            debug!(
                "[{:>8.3}s] seq {:?}: {} bones, {} landmarks",
                elapsed.as_secs_f32(),
                report.sequence,
                report.bones_written,
                report.tracked_landmarks
            );
            for (_, bone) in rig.iter() {
                let (roll, pitch, yaw) = bone.current().rotation.euler_angles();
                if roll != 0.0 || pitch != 0.0 || yaw != 0.0 {
                    info!(
                        "[{:>8.3}s] {:<12} roll {:>7.1} pitch {:>7.1} yaw {:>7.1}",
                        elapsed.as_secs_f32(),
                        bone.name(),
                        roll.to_degrees(),
                        pitch.to_degrees(),
                        yaw.to_degrees()
                    );
                }
            }
        }
        elapsed += tick;
    }

    pipeline.stop();
    let stats = pipeline.buffer_stats();
    info!(
        "Ticks: {} | accepted {} | out_of_order {} | bone writes {}",
        ticks,
        stats.accepted,
        stats.out_of_order,
        pipeline.applier().write_count()
    );
    if state == PipelineState::Degraded {
        info!("Stream ended with stalled input");
    }
    Ok(())
}
