use std::collections::HashSet;

use nalgebra::{Unit, Vector3};
use serde::Deserialize;

use crate::error::RigError;
use crate::landmark::LandmarkId;
use crate::rig::{BoneId, Rig};

use super::limits::{JointConstraint, JointLimit};

/// 1セグメント端に使えるランドマーク数の上限
const MAX_SET_SIZE: usize = 4;

/// ボーンマッピング1件（設定ファイル表現 `[[bone]]`）
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BoneMappingConfig {
    pub bone: String,
    /// セグメント始点（重心を取る）
    pub from: Vec<String>,
    /// セグメント終点（重心を取る）
    pub to: Vec<String>,
    /// レスト姿勢でのボーン方向（リグ座標）
    pub rest_direction: [f32; 3],
    #[serde(default)]
    pub limit: JointLimit,
    /// 3点目でボーン軸まわりのひねりを決める（肘・膝の曲げ面）
    #[serde(default)]
    pub bend: Option<BendConfig>,
}

/// 曲げ面 `bend = { toward = [...], rest_direction = [...] }`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BendConfig {
    /// 子セグメントの先端（`to` から見た曲げ方向を与える）
    pub toward: Vec<String>,
    /// レスト姿勢で関節が曲がる向き（リグ座標）
    pub rest_direction: [f32; 3],
}

impl BoneMappingConfig {
    pub fn new(bone: &str, from: &[&str], to: &[&str], rest_direction: [f32; 3], limit: JointLimit) -> Self {
        Self {
            bone: bone.to_string(),
            from: from.iter().map(|s| s.to_string()).collect(),
            to: to.iter().map(|s| s.to_string()).collect(),
            rest_direction,
            limit,
            bend: None,
        }
    }

    pub fn with_bend(mut self, toward: &[&str], rest_direction: [f32; 3]) -> Self {
        self.bend = Some(BendConfig {
            toward: toward.iter().map(|s| s.to_string()).collect(),
            rest_direction,
        });
        self
    }
}

/// `Rig::humanoid()` 用のマッピング
pub fn default_humanoid_mapping() -> Vec<BoneMappingConfig> {
    const HIPS: &[&str] = &["left_hip", "right_hip"];
    const SHOULDERS: &[&str] = &["left_shoulder", "right_shoulder"];
    const UP: [f32; 3] = [0.0, 1.0, 0.0];
    const DOWN: [f32; 3] = [0.0, -1.0, 0.0];
    const FORWARD: [f32; 3] = [0.0, 0.0, 1.0];

    vec![
        BoneMappingConfig::new("spine", HIPS, SHOULDERS, UP, JointLimit::cone(60.0)),
        BoneMappingConfig::new("neck", SHOULDERS, &["left_ear", "right_ear"], UP, JointLimit::cone(50.0)),
        // 上腕のひねりは手首で決まり、肘の曲げ面が前腕のヒンジ面になる
        BoneMappingConfig::new("upper_arm.L", &["left_shoulder"], &["left_elbow"], [1.0, 0.0, 0.0], JointLimit::cone(175.0))
            .with_bend(&["left_wrist"], FORWARD),
        BoneMappingConfig::new(
            "forearm.L",
            &["left_elbow"],
            &["left_wrist"],
            [1.0, 0.0, 0.0],
            JointLimit::hinge([0.0, -1.0, 0.0], 0.0, 150.0),
        ),
        BoneMappingConfig::new("upper_arm.R", &["right_shoulder"], &["right_elbow"], [-1.0, 0.0, 0.0], JointLimit::cone(175.0))
            .with_bend(&["right_wrist"], FORWARD),
        BoneMappingConfig::new(
            "forearm.R",
            &["right_elbow"],
            &["right_wrist"],
            [-1.0, 0.0, 0.0],
            JointLimit::hinge([0.0, 1.0, 0.0], 0.0, 150.0),
        ),
        // 脚は曲げ面なし。すねはコーン
        BoneMappingConfig::new("thigh.L", &["left_hip"], &["left_knee"], DOWN, JointLimit::cone(120.0)),
        BoneMappingConfig::new("shin.L", &["left_knee"], &["left_ankle"], DOWN, JointLimit::cone(150.0)),
        BoneMappingConfig::new("thigh.R", &["right_hip"], &["right_knee"], DOWN, JointLimit::cone(120.0)),
        BoneMappingConfig::new("shin.R", &["right_knee"], &["right_ankle"], DOWN, JointLimit::cone(150.0)),
    ]
}

/// 解決済みマッピング
#[derive(Debug, Clone, PartialEq)]
pub struct BoneMapping {
    pub bone: BoneId,
    pub name: String,
    pub from: Vec<LandmarkId>,
    pub to: Vec<LandmarkId>,
    pub rest_direction: Unit<Vector3<f32>>,
    pub limit: JointConstraint,
    pub bend: Option<BendPlane>,
}

/// 解決済みの曲げ面
#[derive(Debug, Clone, PartialEq)]
pub struct BendPlane {
    pub toward: Vec<LandmarkId>,
    /// `rest_direction` に直交化済み
    pub rest_direction: Unit<Vector3<f32>>,
}

/// リグとランドマーク定義に対して検証済みのマッピングテーブル（BoneId 昇順）
#[derive(Debug, Clone, Default)]
pub struct BoneMappingTable {
    entries: Vec<BoneMapping>,
}

impl BoneMappingTable {
    pub fn resolve(configs: &[BoneMappingConfig], rig: &Rig) -> Result<Self, RigError> {
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(configs.len());

        for config in configs {
            let bone = rig
                .find(&config.bone)
                .ok_or_else(|| RigError::UnknownBone(config.bone.clone()))?;
            if !seen.insert(bone) {
                return Err(RigError::DuplicateMapping(config.bone.clone()));
            }

            let from = resolve_landmarks(&config.bone, &config.from)?;
            let to = resolve_landmarks(&config.bone, &config.to)?;

            let rest = Vector3::from(config.rest_direction);
            if !rest.iter().all(|v| v.is_finite()) || rest.norm() < 1e-6 {
                return Err(RigError::InvalidMapping {
                    bone: config.bone.clone(),
                    reason: "rest_direction must be a non-zero vector".into(),
                });
            }
            let rest_direction = Unit::new_normalize(rest);
            let bend = config
                .bend
                .as_ref()
                .map(|b| resolve_bend(&config.bone, b, &rest_direction))
                .transpose()?;

            entries.push(BoneMapping {
                bone,
                name: config.bone.clone(),
                from,
                to,
                rest_direction,
                limit: config.limit.resolve(&config.bone)?,
                bend,
            });
        }

        entries.sort_by_key(|e| e.bone);
        Ok(Self { entries })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BoneMapping> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, bone: BoneId) -> Option<&BoneMapping> {
        self.entries
            .binary_search_by_key(&bone, |e| e.bone)
            .ok()
            .map(|i| &self.entries[i])
    }
}

fn resolve_bend(bone: &str, config: &BendConfig, rest: &Unit<Vector3<f32>>) -> Result<BendPlane, RigError> {
    let toward = resolve_landmarks(bone, &config.toward)?;
    let v = Vector3::from(config.rest_direction);
    if !v.iter().all(|c| c.is_finite()) {
        return Err(RigError::InvalidMapping {
            bone: bone.to_string(),
            reason: "bend.rest_direction must be finite".into(),
        });
    }
    let perpendicular = v - rest.into_inner() * v.dot(&rest.into_inner());
    let rest_direction = Unit::try_new(perpendicular, 1e-3).ok_or_else(|| RigError::InvalidMapping {
        bone: bone.to_string(),
        reason: "bend.rest_direction must not be parallel to rest_direction".into(),
    })?;
    Ok(BendPlane { toward, rest_direction })
}

/// ランドマーク名の集合を解決する（1〜4個）
pub(crate) fn resolve_landmarks(bone: &str, names: &[String]) -> Result<Vec<LandmarkId>, RigError> {
    if names.is_empty() || names.len() > MAX_SET_SIZE {
        return Err(RigError::InvalidMapping {
            bone: bone.to_string(),
            reason: format!("landmark set must have 1 to {} entries, got {}", MAX_SET_SIZE, names.len()),
        });
    }
    names
        .iter()
        .map(|name| {
            name.parse::<LandmarkId>()
                .map_err(|_| RigError::UnknownLandmark(name.clone()))
        })
        .collect()
}
