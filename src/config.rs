use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use crate::error::RigError;
use crate::retarget::mapping::{default_humanoid_mapping, BoneMappingConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub basis: BasisConfig,
    #[serde(default)]
    pub root: Option<RootConfig>,
    /// ボーンマッピングテーブル (`[[bone]]`)
    #[serde(default = "default_humanoid_mapping", rename = "bone")]
    pub bones: Vec<BoneMappingConfig>,
    #[serde(default)]
    pub app: AppConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// これ未満の信頼度は欠損扱い
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// この時間サンプルが来なければ stale
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
    /// 欠損を保持するフレーム数
    #[serde(default = "default_missing_grace_frames")]
    pub missing_grace_frames: u32,
    /// これより短いボーン方向ベクトルは欠損扱い（リグ座標）
    #[serde(default = "default_min_segment_length")]
    pub min_segment_length: f32,
}

fn default_min_confidence() -> f32 { 0.5 }
fn default_stale_after_ms() -> u64 { 500 }
fn default_missing_grace_frames() -> u32 { 10 }
fn default_min_segment_length() -> f32 { 1e-3 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            stale_after_ms: default_stale_after_ms(),
            missing_grace_frames: default_missing_grace_frames(),
            min_segment_length: default_min_segment_length(),
        }
    }
}

/// One Euro フィルタのパラメータ
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_min_cutoff")]
    pub min_cutoff: f32,
    /// 速度係数 (beta)
    #[serde(default = "default_speed_coeff")]
    pub speed_coeff: f32,
    #[serde(default = "default_derivative_cutoff")]
    pub derivative_cutoff: f32,
}

fn default_min_cutoff() -> f32 { 1.0 }
fn default_speed_coeff() -> f32 { 0.3 }
fn default_derivative_cutoff() -> f32 { 1.0 }

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_cutoff: default_min_cutoff(),
            speed_coeff: default_speed_coeff(),
            derivative_cutoff: default_derivative_cutoff(),
        }
    }
}

/// 画像座標 → リグ座標の変換設定
#[derive(Debug, Clone, Deserialize)]
pub struct BasisConfig {
    /// 入力映像の幅/高さ
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: f32,
    /// X軸反転（セルフィー映像）
    #[serde(default)]
    pub mirror_x: bool,
    #[serde(default = "default_depth_scale")]
    pub depth_scale: f32,
}

fn default_aspect_ratio() -> f32 { 640.0 / 480.0 }
fn default_depth_scale() -> f32 { 1.0 }

impl Default for BasisConfig {
    fn default() -> Self {
        Self {
            aspect_ratio: default_aspect_ratio(),
            mirror_x: false,
            depth_scale: default_depth_scale(),
        }
    }
}

/// ルートボーンの移動（腰の中点から算出）
#[derive(Debug, Clone, Deserialize)]
pub struct RootConfig {
    pub bone: String,
    #[serde(default = "default_root_landmarks")]
    pub landmarks: Vec<String>,
    /// X軸スケール（リグ単位）
    #[serde(default = "default_root_scale")]
    pub scale_x: f32,
    /// Y軸スケール（リグ単位）
    #[serde(default = "default_root_scale")]
    pub scale_y: f32,
    /// Y軸オフセット（画像中央に対応する高さ）
    #[serde(default = "default_root_offset_y")]
    pub offset_y: f32,
}

fn default_root_landmarks() -> Vec<String> {
    vec!["left_hip".to_string(), "right_hip".to_string()]
}
fn default_root_scale() -> f32 { 1.0 }
fn default_root_offset_y() -> f32 { 1.0 }

/// デモホスト用
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,
    #[serde(default = "default_detector_fps")]
    pub detector_fps: u32,
}

fn default_target_fps() -> u32 { 60 }
fn default_detector_fps() -> u32 { 30 }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            detector_fps: default_detector_fps(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            filter: FilterConfig::default(),
            basis: BasisConfig::default(),
            root: None,
            bones: default_humanoid_mapping(),
            app: AppConfig::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// 読み込めなければデフォルト設定
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                warn!("{:#}; using default configuration", e);
                Self::default()
            }
        }
    }

    /// スカラー設定値の範囲チェック（マッピングはリグ解決時に検証）
    pub fn validate(&self) -> Result<(), RigError> {
        let p = &self.pipeline;
        if !(0.0..=1.0).contains(&p.min_confidence) {
            return Err(RigError::InvalidConfig(format!(
                "min_confidence must be within [0, 1], got {}",
                p.min_confidence
            )));
        }
        if p.stale_after_ms == 0 {
            return Err(RigError::InvalidConfig("stale_after_ms must be positive".into()));
        }
        if !(p.min_segment_length.is_finite() && p.min_segment_length > 0.0) {
            return Err(RigError::InvalidConfig(format!(
                "min_segment_length must be positive, got {}",
                p.min_segment_length
            )));
        }

        let f = &self.filter;
        for (name, value) in [
            ("min_cutoff", f.min_cutoff),
            ("derivative_cutoff", f.derivative_cutoff),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(RigError::InvalidConfig(format!("{} must be positive, got {}", name, value)));
            }
        }
        if !(f.speed_coeff.is_finite() && f.speed_coeff >= 0.0) {
            return Err(RigError::InvalidConfig(format!(
                "speed_coeff must be non-negative, got {}",
                f.speed_coeff
            )));
        }

        let b = &self.basis;
        if !(b.aspect_ratio.is_finite() && b.aspect_ratio > 0.0) {
            return Err(RigError::InvalidConfig(format!(
                "aspect_ratio must be positive, got {}",
                b.aspect_ratio
            )));
        }
        if !b.depth_scale.is_finite() {
            return Err(RigError::InvalidConfig("depth_scale must be finite".into()));
        }
        Ok(())
    }
}
