//! Recorded landmark streams in the MediaPipe Pose result layout.
//!
//! One JSON object per line:
//! `{"timestamp_ms": 33.3, "landmarks": [{"x":..,"y":..,"z":..,"visibility":..}, ...]}`
//! `landmarks` is either empty/null (no person detected) or holds 33 entries in
//! detector order.

use std::io::BufRead;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use super::sample::{Landmark, LandmarkId, LandmarkSample};

#[derive(Debug, Deserialize)]
struct RecordedLandmark {
    x: f32,
    y: f32,
    #[serde(default)]
    z: f32,
    #[serde(default = "default_visibility")]
    visibility: f32,
}

fn default_visibility() -> f32 { 1.0 }

#[derive(Debug, Deserialize)]
struct RecordedFrame {
    timestamp_ms: f64,
    #[serde(default)]
    landmarks: Option<Vec<RecordedLandmark>>,
}

/// JSON lines を読み込み、サンプル列に変換する。
/// シーケンス番号は 1 から行順に振る。空行は無視。
pub fn read_jsonl<R: BufRead>(reader: R) -> Result<Vec<LandmarkSample>> {
    let mut samples = Vec::new();
    let mut last_ts: Option<u64> = None;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", line_no + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let frame: RecordedFrame = serde_json::from_str(&line)
            .with_context(|| format!("invalid frame at line {}", line_no + 1))?;

        if !frame.timestamp_ms.is_finite() || frame.timestamp_ms < 0.0 {
            bail!("invalid timestamp at line {}: {}", line_no + 1, frame.timestamp_ms);
        }
        let timestamp_us = (frame.timestamp_ms * 1000.0).round() as u64;
        if let Some(prev) = last_ts {
            if timestamp_us < prev {
                bail!("timestamps go backwards at line {}", line_no + 1);
            }
        }
        last_ts = Some(timestamp_us);

        let sequence = samples.len() as u64 + 1;
        let mut sample = LandmarkSample::new(sequence, timestamp_us);
        let landmarks = frame.landmarks.unwrap_or_default();
        if !landmarks.is_empty() && landmarks.len() != LandmarkId::COUNT {
            bail!(
                "expected {} landmarks at line {}, got {}",
                LandmarkId::COUNT,
                line_no + 1,
                landmarks.len()
            );
        }
        for (id, lm) in LandmarkId::ALL.iter().zip(landmarks.iter()) {
            sample = sample.with_landmark(*id, Landmark::new(lm.x, lm.y, lm.z, lm.visibility));
        }
        samples.push(sample);
    }

    Ok(samples)
}
