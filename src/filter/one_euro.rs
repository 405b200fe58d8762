//! One Euro フィルタ: 速度が上がるほどカットオフを広げる適応ローパス。

use nalgebra::Vector3;

use crate::config::FilterConfig;

/// 時間差が取れない場合の dt（秒）
pub const DEFAULT_DT: f32 = 1.0 / 30.0;
/// dt の上限（秒）。長い欠損の後でも1ステップの移動量が有界になる
pub const MAX_DT: f32 = 0.25;

/// 非正・非有限の dt は既定値に、長すぎる dt は上限に丸める
pub fn effective_dt(dt: f32) -> f32 {
    if dt.is_finite() && dt > 0.0 {
        dt.min(MAX_DT)
    } else {
        DEFAULT_DT
    }
}

/// 指数平滑の係数 α = r/(r+1)、r = 2π·fc·dt
pub(crate) fn alpha(cutoff: f32, dt: f32) -> f32 {
    let r = std::f32::consts::TAU * cutoff * dt;
    r / (r + 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OneEuroParams {
    /// 静止時のカットオフ（Hz）
    pub min_cutoff: f32,
    /// 速度に掛ける係数（β）
    pub speed_coeff: f32,
    /// 速度推定のカットオフ（Hz）
    pub derivative_cutoff: f32,
}

impl From<&FilterConfig> for OneEuroParams {
    fn from(config: &FilterConfig) -> Self {
        Self {
            min_cutoff: config.min_cutoff,
            speed_coeff: config.speed_coeff,
            derivative_cutoff: config.derivative_cutoff,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct AxisState {
    value: f32,
    speed: f32,
}

/// 1軸分の One Euro フィルタ。最初の入力はそのまま返す
#[derive(Debug, Clone)]
pub struct ScalarFilter {
    params: OneEuroParams,
    state: Option<AxisState>,
}

impl ScalarFilter {
    pub fn new(params: OneEuroParams) -> Self {
        Self { params, state: None }
    }

    pub fn update(&mut self, raw: f32, dt: f32) -> f32 {
        let dt = effective_dt(dt);
        if let Some(state) = &mut self.state {
            // 速度は直前の推定値から測る
            let raw_speed = (raw - state.value) / dt;
            state.speed += alpha(self.params.derivative_cutoff, dt) * (raw_speed - state.speed);
            let cutoff = self.params.min_cutoff + self.params.speed_coeff * state.speed.abs();
            state.value += alpha(cutoff, dt) * (raw - state.value);
            return state.value;
        }
        self.state = Some(AxisState { value: raw, speed: 0.0 });
        raw
    }
}

/// 3軸独立の One Euro フィルタ
#[derive(Debug, Clone)]
pub struct PointFilter {
    axes: [ScalarFilter; 3],
}

impl PointFilter {
    pub fn new(params: OneEuroParams) -> Self {
        Self {
            axes: std::array::from_fn(|_| ScalarFilter::new(params)),
        }
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        Self::new(OneEuroParams::from(config))
    }

    pub fn update(&mut self, position: &Vector3<f32>, dt: f32) -> Vector3<f32> {
        Vector3::from_fn(|i, _| self.axes[i].update(position[i], dt))
    }
}
