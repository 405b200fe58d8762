use nalgebra::{Unit, UnitQuaternion, Vector3};
use serde::Deserialize;

use crate::error::RigError;

/// 関節制限（設定ファイル表現、角度は度）
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JointLimit {
    #[default]
    None,
    /// レスト姿勢からの回転角を max_deg 以下に制限
    Cone { max_deg: f32 },
    /// 軸まわりのねじれ成分だけを残し、符号付き角度を [min_deg, max_deg] に制限。
    /// 曲げ面は親のひねりで決まるので、親のマッピングには `bend` を付ける。
    Hinge {
        axis: [f32; 3],
        min_deg: f32,
        max_deg: f32,
    },
}

impl JointLimit {
    pub fn cone(max_deg: f32) -> Self {
        JointLimit::Cone { max_deg }
    }

    pub fn hinge(axis: [f32; 3], min_deg: f32, max_deg: f32) -> Self {
        JointLimit::Hinge { axis, min_deg, max_deg }
    }

    /// 値を検証してラジアン表現に変換する
    pub fn resolve(&self, bone: &str) -> Result<JointConstraint, RigError> {
        let invalid = |reason: String| RigError::InvalidJointLimit {
            bone: bone.to_string(),
            reason,
        };
        match *self {
            JointLimit::None => Ok(JointConstraint::Free),
            JointLimit::Cone { max_deg } => {
                if !(max_deg.is_finite() && (0.0..=180.0).contains(&max_deg)) {
                    return Err(invalid(format!("cone max_deg must be within [0, 180], got {}", max_deg)));
                }
                Ok(JointConstraint::Cone {
                    max_angle: max_deg.to_radians(),
                })
            }
            JointLimit::Hinge { axis, min_deg, max_deg } => {
                let axis = Vector3::from(axis);
                if !axis.iter().all(|v| v.is_finite()) || axis.norm() < 1e-6 {
                    return Err(invalid("hinge axis must be a non-zero vector".into()));
                }
                if !(min_deg.is_finite() && max_deg.is_finite()) {
                    return Err(invalid("hinge angles must be finite".into()));
                }
                if min_deg > max_deg {
                    return Err(invalid(format!(
                        "hinge min_deg {} is greater than max_deg {}",
                        min_deg, max_deg
                    )));
                }
                if min_deg < -180.0 || max_deg > 180.0 {
                    return Err(invalid("hinge range must be within [-180, 180]".into()));
                }
                Ok(JointConstraint::Hinge {
                    axis: Unit::new_normalize(axis),
                    min_angle: min_deg.to_radians(),
                    max_angle: max_deg.to_radians(),
                })
            }
        }
    }
}

/// 検証済みの関節制限
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JointConstraint {
    Free,
    Cone {
        max_angle: f32,
    },
    Hinge {
        axis: Unit<Vector3<f32>>,
        min_angle: f32,
        max_angle: f32,
    },
}

impl JointConstraint {
    /// レスト姿勢基準の回転を制限内に収める。
    /// はみ出した場合は境界ちょうどの回転を返す。
    pub fn clamp(&self, rel: &UnitQuaternion<f32>) -> UnitQuaternion<f32> {
        match *self {
            JointConstraint::Free => *rel,
            JointConstraint::Cone { max_angle } => {
                let angle = rel.angle();
                if angle <= max_angle {
                    return *rel;
                }
                match rel.axis() {
                    Some(axis) => UnitQuaternion::from_axis_angle(&axis, max_angle),
                    None => *rel,
                }
            }
            JointConstraint::Hinge {
                axis,
                min_angle,
                max_angle,
            } => {
                let angle = twist_angle(rel, &axis).clamp(min_angle, max_angle);
                UnitQuaternion::from_axis_angle(&axis, angle)
            }
        }
    }
}

/// 軸まわりのねじれ角（swing-twist 分解、(-π, π]）
fn twist_angle(q: &UnitQuaternion<f32>, axis: &Unit<Vector3<f32>>) -> f32 {
    let q = q.quaternion();
    // 同じ回転を w >= 0 側で表す
    let (w, v) = if q.w < 0.0 { (-q.w, -q.imag()) } else { (q.w, q.imag()) };
    2.0 * v.dot(&axis.into_inner()).atan2(w)
}
