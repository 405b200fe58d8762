use nalgebra::Vector3;
use tracing::debug;

use crate::config::{FilterConfig, PipelineConfig};
use crate::landmark::{LandmarkId, LandmarkSample};

use super::one_euro::PointFilter;

/// 平滑化済みランドマーク
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilteredLandmark {
    /// 画像座標系での平滑化位置
    pub position: Vector3<f32>,
    /// 連続欠損フレーム数（0 = 今フレームで観測済み、>0 = 保持中）
    pub missing_frames: u32,
}

impl FilteredLandmark {
    pub fn is_held(&self) -> bool {
        self.missing_frames > 0
    }
}

/// 1フレーム分のフィルタ出力
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredLandmarks {
    pub sequence: u64,
    pub timestamp_us: u64,
    entries: [Option<FilteredLandmark>; LandmarkId::COUNT],
}

impl FilteredLandmarks {
    pub fn empty(sequence: u64, timestamp_us: u64) -> Self {
        Self {
            sequence,
            timestamp_us,
            entries: [None; LandmarkId::COUNT],
        }
    }

    pub fn get(&self, id: LandmarkId) -> Option<&FilteredLandmark> {
        self.entries[id as usize].as_ref()
    }

    pub fn position(&self, id: LandmarkId) -> Option<Vector3<f32>> {
        self.get(id).map(|l| l.position)
    }

    pub fn set(&mut self, id: LandmarkId, landmark: FilteredLandmark) {
        self.entries[id as usize] = Some(landmark);
    }

    /// 追跡中のランドマーク数（保持中を含む）
    pub fn tracked_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

/// ランドマーク1点分の内部状態
#[derive(Debug, Clone)]
struct TrackedLandmark {
    filter: PointFilter,
    estimate: Vector3<f32>,
    missing_frames: u32,
    last_update_us: u64,
}

/// ランドマークごとの時間方向フィルタ
///
/// 信頼度が閾値未満の入力は欠損として扱い、状態を更新せずに直前の推定値を保持する。
/// 欠損が `missing_grace_frames` に達したら状態を破棄する。
pub struct LandmarkFilter {
    config: FilterConfig,
    min_confidence: f32,
    grace_frames: u32,
    tracked: [Option<TrackedLandmark>; LandmarkId::COUNT],
}

impl LandmarkFilter {
    pub fn new(config: FilterConfig, min_confidence: f32, grace_frames: u32) -> Self {
        Self {
            config,
            min_confidence,
            grace_frames,
            tracked: std::array::from_fn(|_| None),
        }
    }

    pub fn from_config(filter: &FilterConfig, pipeline: &PipelineConfig) -> Self {
        Self::new(filter.clone(), pipeline.min_confidence, pipeline.missing_grace_frames)
    }

    /// サンプル1件を取り込み、追跡中の全ランドマークのスナップショットを返す
    pub fn update(&mut self, sample: &LandmarkSample) -> FilteredLandmarks {
        let mut out = FilteredLandmarks::empty(sample.sequence, sample.timestamp_us);

        for id in LandmarkId::ALL {
            let observed = sample
                .get(id)
                .filter(|l| l.is_valid(self.min_confidence))
                .map(|l| l.position());
            let slot = &mut self.tracked[id as usize];

            match (observed, slot.as_mut()) {
                (Some(position), Some(state)) => {
                    let dt = frame_dt(state.last_update_us, sample.timestamp_us);
                    state.estimate = state.filter.update(&position, dt);
                    state.missing_frames = 0;
                    state.last_update_us = sample.timestamp_us;
                }
                (Some(position), None) => {
                    let mut filter = PointFilter::from_config(&self.config);
                    // 初回は dt を使わない
                    let estimate = filter.update(&position, 0.0);
                    *slot = Some(TrackedLandmark {
                        filter,
                        estimate,
                        missing_frames: 0,
                        last_update_us: sample.timestamp_us,
                    });
                }
                (None, Some(state)) => {
                    state.missing_frames += 1;
                    if state.missing_frames >= self.grace_frames {
                        debug!(landmark = %id, frames = state.missing_frames, "landmark lost");
                        *slot = None;
                    }
                }
                (None, None) => {}
            }

            if let Some(state) = slot.as_ref() {
                out.set(
                    id,
                    FilteredLandmark {
                        position: state.estimate,
                        missing_frames: state.missing_frames,
                    },
                );
            }
        }

        out
    }

    pub fn is_tracking(&self, id: LandmarkId) -> bool {
        self.tracked[id as usize].is_some()
    }

    pub fn reset(&mut self) {
        for slot in &mut self.tracked {
            *slot = None;
        }
    }
}

/// 撮影時刻の差（秒）。逆行・同時刻は 0 で、フィルタ側で既定値になる
fn frame_dt(prev_us: u64, now_us: u64) -> f32 {
    (now_us.saturating_sub(prev_us) as f64 / 1e6) as f32
}
