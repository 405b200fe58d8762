use nalgebra::{Matrix3, Vector3};

use crate::config::BasisConfig;

/// 画像座標 → リグ座標の基底変換
///
/// 画像: x 右, y 下, z は MediaPipe の相対深度（カメラ側が負）。
/// リグ: 右手系, Y 上, Z 視点側。x はアスペクト比で縦横の単位を揃える。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Basis {
    matrix: Matrix3<f32>,
    mirror_x: bool,
}

impl Basis {
    pub fn new(aspect_ratio: f32, mirror_x: bool, depth_scale: f32) -> Self {
        let sx = if mirror_x { -1.0 } else { 1.0 };
        Self {
            matrix: Matrix3::from_diagonal(&Vector3::new(aspect_ratio * sx, -1.0, -depth_scale)),
            mirror_x,
        }
    }

    pub fn from_config(config: &BasisConfig) -> Self {
        Self::new(config.aspect_ratio, config.mirror_x, config.depth_scale)
    }

    /// 方向ベクトルを変換する（平行移動なし）
    pub fn to_rig(&self, v: &Vector3<f32>) -> Vector3<f32> {
        self.matrix * v
    }

    pub fn is_mirrored(&self) -> bool {
        self.mirror_x
    }
}

impl Default for Basis {
    fn default() -> Self {
        Self::from_config(&BasisConfig::default())
    }
}
