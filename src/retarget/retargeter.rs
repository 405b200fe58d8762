use std::f32::consts::PI;

use nalgebra::{Unit, UnitQuaternion, Vector3};

use crate::config::{Config, RootConfig};
use crate::error::RigError;
use crate::filter::FilteredLandmarks;
use crate::landmark::LandmarkId;
use crate::rig::{BoneId, Rig};

use super::basis::Basis;
use super::mapping::{resolve_landmarks, BendPlane, BoneMapping, BoneMappingTable};

/// 曲げ面を使う最小の曲がり（sin、約6°）
const MIN_BEND_SIN: f32 = 0.1;

/// ボーン1本分の目標変換（ローカル）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneTransform {
    pub bone: BoneId,
    pub rotation: UnitQuaternion<f32>,
    /// ルートボーンのみ
    pub translation: Option<Vector3<f32>>,
}

/// 腰中点からのルート移動
#[derive(Debug, Clone, PartialEq)]
pub struct RootMotion {
    bone: BoneId,
    landmarks: Vec<LandmarkId>,
    scale_x: f32,
    scale_y: f32,
    offset_y: f32,
    mirror_x: bool,
    rest_z: f32,
}

impl RootMotion {
    pub fn resolve(config: &RootConfig, rig: &Rig, mirror_x: bool) -> Result<Self, RigError> {
        let bone = rig
            .find(&config.bone)
            .ok_or_else(|| RigError::UnknownBone(config.bone.clone()))?;
        let landmarks = resolve_landmarks(&config.bone, &config.landmarks)?;
        let rest_z = rig.bone(bone).map(|b| b.rest().translation.z).unwrap_or(0.0);
        Ok(Self {
            bone,
            landmarks,
            scale_x: config.scale_x,
            scale_y: config.scale_y,
            offset_y: config.offset_y,
            mirror_x,
            rest_z,
        })
    }

    pub fn bone(&self) -> BoneId {
        self.bone
    }

    fn translation(&self, landmarks: &FilteredLandmarks) -> Option<Vector3<f32>> {
        let c = centroid(&self.landmarks, landmarks)?;
        // X: 画像中央を0とする
        let mut x = (c.x - 0.5) * self.scale_x;
        if self.mirror_x {
            x = -x;
        }
        // Y: 画像中央が offset_y
        let y = self.offset_y + (0.5 - c.y) * self.scale_y;
        Some(Vector3::new(x, y, self.rest_z))
    }
}

/// 平滑化済みランドマークからボーンのローカル回転を求める
///
/// 状態を持たない。マッピングされていないボーンや、必要なランドマークが
/// 欠けているボーンは出力に含めない（現在の姿勢のまま）。
#[derive(Debug, Clone)]
pub struct Retargeter {
    table: BoneMappingTable,
    root: Option<RootMotion>,
    basis: Basis,
    min_segment_length: f32,
}

impl Retargeter {
    pub fn new(table: BoneMappingTable, root: Option<RootMotion>, basis: Basis, min_segment_length: f32) -> Self {
        Self {
            table,
            root,
            basis,
            min_segment_length,
        }
    }

    /// 設定をリグに対して解決する
    pub fn from_config(config: &Config, rig: &Rig) -> Result<Self, RigError> {
        let table = BoneMappingTable::resolve(&config.bones, rig)?;
        let basis = Basis::from_config(&config.basis);
        let root = config
            .root
            .as_ref()
            .map(|r| RootMotion::resolve(r, rig, basis.is_mirrored()))
            .transpose()?;
        Ok(Self::new(table, root, basis, config.pipeline.min_segment_length))
    }

    pub fn table(&self) -> &BoneMappingTable {
        &self.table
    }

    pub fn basis(&self) -> &Basis {
        &self.basis
    }

    /// 1フレーム分の変換を求める（BoneId 昇順）
    pub fn solve(&self, landmarks: &FilteredLandmarks, rig: &Rig) -> Vec<BoneTransform> {
        let rest_world = rig.rest_world_rotations();
        let mut world: Vec<UnitQuaternion<f32>> = Vec::with_capacity(rig.len());
        let mut out = Vec::with_capacity(self.table.len() + 1);
        let mut mappings = self.table.iter().peekable();

        // インデックス順 = 親が先
        for (id, bone) in rig.iter() {
            let parent_world = bone
                .parent()
                .map(|p| world[p.0])
                .unwrap_or_else(UnitQuaternion::identity);
            let mut local = bone.current().rotation;

            if let Some(mapping) = mappings.next_if(|m| m.bone == id) {
                if let Some(dir) = self.direction(mapping, landmarks) {
                    let rest_local = bone.rest().rotation;
                    // 解いた親に乗せたレスト姿勢の座標系で回転を求める
                    let to_frame = (parent_world * rest_local).inverse();
                    let to_rest_frame = rest_world[id.0].inverse();
                    let observed = Unit::new_normalize(to_frame * dir.into_inner());
                    let rest_dir = Unit::new_normalize(to_rest_frame * mapping.rest_direction.into_inner());

                    let mut rel = shortest_arc(&rest_dir, &observed);
                    if let Some(bend) = &mapping.bend {
                        if let Some(toward) = self.bend_direction(mapping, bend, landmarks, &dir) {
                            let rest_bend = to_rest_frame * bend.rest_direction.into_inner();
                            let toward = to_frame * toward.into_inner();
                            rel = twist_toward(&rel, &observed, &rest_bend, &toward);
                        }
                    }
                    local = rest_local * mapping.limit.clamp(&rel);
                    out.push(BoneTransform {
                        bone: id,
                        rotation: local,
                        translation: None,
                    });
                }
            }
            world.push(parent_world * local);
        }

        if let Some(root) = &self.root {
            if let Some(translation) = root.translation(landmarks) {
                match out.iter_mut().find(|t| t.bone == root.bone) {
                    Some(t) => t.translation = Some(translation),
                    None => {
                        let rotation = rig
                            .bone(root.bone)
                            .map(|b| b.current().rotation)
                            .unwrap_or_else(UnitQuaternion::identity);
                        out.push(BoneTransform {
                            bone: root.bone,
                            rotation,
                            translation: Some(translation),
                        });
                        out.sort_by_key(|t| t.bone);
                    }
                }
            }
        }

        out
    }

    /// リグ座標でのボーン方向。欠損または短すぎる場合は None
    fn direction(&self, mapping: &BoneMapping, landmarks: &FilteredLandmarks) -> Option<Unit<Vector3<f32>>> {
        let from = centroid(&mapping.from, landmarks)?;
        let to = centroid(&mapping.to, landmarks)?;
        let v = self.basis.to_rig(&(to - from));
        if !v.iter().all(|c| c.is_finite()) {
            return None;
        }
        Unit::try_new(v, self.min_segment_length)
    }

    /// 曲げ方向（`dir` に直交する成分）。関節がほぼ伸びている場合は None
    fn bend_direction(
        &self,
        mapping: &BoneMapping,
        bend: &BendPlane,
        landmarks: &FilteredLandmarks,
        dir: &Unit<Vector3<f32>>,
    ) -> Option<Unit<Vector3<f32>>> {
        let to = centroid(&mapping.to, landmarks)?;
        let toward = centroid(&bend.toward, landmarks)?;
        let v = self.basis.to_rig(&(toward - to));
        if !v.iter().all(|c| c.is_finite()) {
            return None;
        }
        let length = v.norm();
        if length < self.min_segment_length {
            return None;
        }
        let axis = dir.into_inner();
        Unit::try_new(v - axis * v.dot(&axis), length * MIN_BEND_SIN)
    }
}

/// 全ランドマークが揃っている場合のみ重心を返す
fn centroid(ids: &[LandmarkId], landmarks: &FilteredLandmarks) -> Option<Vector3<f32>> {
    let mut sum = Vector3::<f32>::zeros();
    for &id in ids {
        sum += landmarks.position(id)?;
    }
    Some(sum / ids.len() as f32)
}

/// `rel` で移した曲げ方向が `toward` に重なるよう、`axis` まわりのひねりを足す
fn twist_toward(
    rel: &UnitQuaternion<f32>,
    axis: &Unit<Vector3<f32>>,
    rest_bend: &Vector3<f32>,
    toward: &Vector3<f32>,
) -> UnitQuaternion<f32> {
    let bent = rel * rest_bend;
    let angle = axis.into_inner().dot(&bent.cross(toward)).atan2(bent.dot(toward));
    UnitQuaternion::from_axis_angle(axis, angle) * rel
}

/// `from` を `to` に合わせる最短回転。逆向きなら垂直軸まわりに π
pub fn shortest_arc(from: &Unit<Vector3<f32>>, to: &Unit<Vector3<f32>>) -> UnitQuaternion<f32> {
    if from.into_inner().dot(&to.into_inner()) < -1.0 + 1e-6 {
        let helper = if from.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
        let axis = Unit::new_normalize(from.cross(&helper));
        return UnitQuaternion::from_axis_angle(&axis, PI);
    }
    UnitQuaternion::rotation_between_axis(from, to).unwrap_or_else(UnitQuaternion::identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BasisConfig;
    use crate::filter::FilteredLandmark;
    use crate::retarget::limits::JointLimit;
    use crate::retarget::mapping::{default_humanoid_mapping, BoneMappingConfig};
    use approx::assert_relative_eq;

    fn landmarks(points: &[(LandmarkId, [f32; 3])]) -> FilteredLandmarks {
        let mut out = FilteredLandmarks::empty(1, 0);
        for &(id, [x, y, z]) in points {
            out.set(
                id,
                FilteredLandmark {
                    position: Vector3::new(x, y, z),
                    missing_frames: 0,
                },
            );
        }
        out
    }

    fn retargeter(rig: &Rig, mapping: Vec<BoneMappingConfig>) -> Retargeter {
        let table = BoneMappingTable::resolve(&mapping, rig).unwrap();
        // 単位アスペクトで画像とリグの長さを揃える
        let basis = Basis::from_config(&BasisConfig {
            aspect_ratio: 1.0,
            ..BasisConfig::default()
        });
        Retargeter::new(table, None, basis, 1e-3)
    }

    fn world_direction(rig: &Rig, bone: &str, rest_dir: Vector3<f32>) -> Vector3<f32> {
        let world = rig.world_rotations();
        world[rig.find(bone).unwrap().0] * rest_dir
    }

    fn apply(rig: &mut Rig, transforms: &[BoneTransform]) {
        let mut applier = crate::rig::RigApplier::new();
        applier.bind();
        applier.apply(rig, 0, transforms).unwrap();
    }

    #[test]
    fn test_shortest_arc() {
        let x = Vector3::x_axis();
        let y = Vector3::y_axis();
        let q = shortest_arc(&x, &y);
        assert_relative_eq!(q * x.into_inner(), y.into_inner(), epsilon = 1e-6);

        assert_relative_eq!(shortest_arc(&x, &x).angle(), 0.0);

        let neg_x = Unit::new_normalize(-Vector3::x());
        let flip = shortest_arc(&x, &neg_x);
        assert_relative_eq!(flip.angle(), PI, epsilon = 1e-5);
        assert_relative_eq!(flip * x.into_inner(), -Vector3::x(), epsilon = 1e-5);
    }

    #[test]
    fn test_arm_pointing_down() {
        let mut rig = Rig::humanoid();
        let r = retargeter(&rig, default_humanoid_mapping());
        // 左腕を真下に下ろす（画像 y 正方向）
        let lm = landmarks(&[
            (LandmarkId::LeftShoulder, [0.6, 0.3, 0.0]),
            (LandmarkId::LeftElbow, [0.6, 0.5, 0.0]),
        ]);
        let out = r.solve(&lm, &rig);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bone, rig.find("upper_arm.L").unwrap());

        apply(&mut rig, &out);
        let dir = world_direction(&rig, "upper_arm.L", Vector3::x());
        assert_relative_eq!(dir, Vector3::new(0.0, -1.0, 0.0), epsilon = 1e-5);
    }

    #[test]
    fn test_missing_landmark_omits_bone() {
        let rig = Rig::humanoid();
        let r = retargeter(&rig, default_humanoid_mapping());
        let lm = landmarks(&[(LandmarkId::LeftShoulder, [0.6, 0.3, 0.0])]);
        assert!(r.solve(&lm, &rig).is_empty());
    }

    #[test]
    fn test_coincident_landmarks_omit_bone() {
        let rig = Rig::humanoid();
        let r = retargeter(&rig, default_humanoid_mapping());
        let lm = landmarks(&[
            (LandmarkId::LeftShoulder, [0.6, 0.3, 0.0]),
            (LandmarkId::LeftElbow, [0.6, 0.3, 0.0]),
        ]);
        assert!(r.solve(&lm, &rig).is_empty());
    }

    #[test]
    fn test_child_rotation_is_local_to_solved_parent() {
        let mut rig = Rig::humanoid();
        let r = retargeter(&rig, default_humanoid_mapping());
        // 上腕は真下、前腕も真下（肘は伸びたまま）
        let lm = landmarks(&[
            (LandmarkId::LeftShoulder, [0.6, 0.3, 0.0]),
            (LandmarkId::LeftElbow, [0.6, 0.5, 0.0]),
            (LandmarkId::LeftWrist, [0.6, 0.7, 0.0]),
        ]);
        let out = r.solve(&lm, &rig);
        assert_eq!(out.len(), 2);
        let forearm = out.iter().find(|t| t.bone == rig.find("forearm.L").unwrap()).unwrap();
        // 親と同じ向きなのでローカル回転は恒等
        assert_relative_eq!(forearm.rotation.angle(), 0.0, epsilon = 1e-5);
        // 肘が伸びていれば曲げ面は使わず最短回転のまま
        let upper = out.iter().find(|t| t.bone == rig.find("upper_arm.L").unwrap()).unwrap();
        assert_relative_eq!(upper.rotation.angle(), std::f32::consts::FRAC_PI_2, epsilon = 1e-5);

        apply(&mut rig, &out);
        let dir = world_direction(&rig, "forearm.L", Vector3::x());
        assert_relative_eq!(dir, Vector3::new(0.0, -1.0, 0.0), epsilon = 1e-5);
    }

    fn arm_with_hinge(bend: bool) -> Vec<BoneMappingConfig> {
        let upper = BoneMappingConfig::new("upper_arm.L", &["left_shoulder"], &["left_elbow"], [1.0, 0.0, 0.0], JointLimit::None);
        let upper = if bend { upper.with_bend(&["left_wrist"], [0.0, 0.0, 1.0]) } else { upper };
        vec![
            upper,
            BoneMappingConfig::new(
                "forearm.L",
                &["left_elbow"],
                &["left_wrist"],
                [1.0, 0.0, 0.0],
                JointLimit::hinge([0.0, -1.0, 0.0], 0.0, 150.0),
            ),
        ]
    }

    #[test]
    fn test_forward_elbow_bend_keeps_upper_arm_untwisted() {
        let rig = Rig::humanoid();
        let r = retargeter(&rig, default_humanoid_mapping());
        let upper = rig.find("upper_arm.L").unwrap();
        let forearm = rig.find("forearm.L").unwrap();

        // 腕は水平、前腕だけ前方（カメラ側, z 負）へ 90°
        let forward = landmarks(&[
            (LandmarkId::LeftShoulder, [0.5, 0.3, 0.0]),
            (LandmarkId::LeftElbow, [0.7, 0.3, 0.0]),
            (LandmarkId::LeftWrist, [0.7, 0.3, -0.2]),
        ]);
        let out = r.solve(&forward, &rig);
        let t = out.iter().find(|t| t.bone == upper).unwrap();
        assert_relative_eq!(t.rotation.angle(), 0.0, epsilon = 1e-5);
        let t = out.iter().find(|t| t.bone == forearm).unwrap();
        assert_relative_eq!(t.rotation.angle(), 90f32.to_radians(), epsilon = 1e-4);
    }

    #[test]
    fn test_elbow_bend_outside_coronal_plane() {
        let mut rig = Rig::humanoid();
        let r = retargeter(&rig, default_humanoid_mapping());
        // 上腕はカメラ方向、前腕は真上
        let lm = landmarks(&[
            (LandmarkId::LeftShoulder, [0.5, 0.3, 0.0]),
            (LandmarkId::LeftElbow, [0.5, 0.3, -0.2]),
            (LandmarkId::LeftWrist, [0.5, 0.1, -0.2]),
        ]);
        let out = r.solve(&lm, &rig);
        assert_eq!(out.len(), 2);

        apply(&mut rig, &out);
        let upper = world_direction(&rig, "upper_arm.L", Vector3::x());
        assert_relative_eq!(upper, Vector3::new(0.0, 0.0, 1.0), epsilon = 1e-4);
        let forearm = world_direction(&rig, "forearm.L", Vector3::x());
        assert_relative_eq!(forearm, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-4);
    }

    #[test]
    fn test_backward_elbow_bend_twists_upper_arm() {
        let mut rig = Rig::humanoid();
        let r = retargeter(&rig, arm_with_hinge(true));
        let lm = landmarks(&[
            (LandmarkId::LeftShoulder, [0.5, 0.3, 0.0]),
            (LandmarkId::LeftElbow, [0.7, 0.3, 0.0]),
            (LandmarkId::LeftWrist, [0.7, 0.3, 0.2]),
        ]);
        let out = r.solve(&lm, &rig);
        apply(&mut rig, &out);

        // 上腕が軸まわりに半回転し、前腕は前向きの曲げで後方を指す
        let upper = world_direction(&rig, "upper_arm.L", Vector3::x());
        assert_relative_eq!(upper, Vector3::x(), epsilon = 1e-4);
        let forearm = world_direction(&rig, "forearm.L", Vector3::x());
        assert_relative_eq!(forearm, Vector3::new(0.0, 0.0, -1.0), epsilon = 1e-4);
        let t = out.iter().find(|t| t.bone == rig.find("forearm.L").unwrap()).unwrap();
        assert_relative_eq!(t.rotation.angle(), 90f32.to_radians(), epsilon = 1e-4);
    }

    #[test]
    fn test_hinge_without_bend_plane_rejects_backward_bend() {
        let rig = Rig::humanoid();
        let r = retargeter(&rig, arm_with_hinge(false));
        let lm = landmarks(&[
            (LandmarkId::LeftShoulder, [0.5, 0.3, 0.0]),
            (LandmarkId::LeftElbow, [0.7, 0.3, 0.0]),
            (LandmarkId::LeftWrist, [0.7, 0.3, 0.2]),
        ]);
        let out = r.solve(&lm, &rig);
        let t = out.iter().find(|t| t.bone == rig.find("forearm.L").unwrap()).unwrap();
        assert_relative_eq!(t.rotation.angle(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_default_knee_follows_sideways_bend() {
        let mut rig = Rig::humanoid();
        let r = retargeter(&rig, default_humanoid_mapping());
        // 太ももは真下、すねは外側（+X）へ
        let lm = landmarks(&[
            (LandmarkId::LeftHip, [0.55, 0.5, 0.0]),
            (LandmarkId::LeftKnee, [0.55, 0.7, 0.0]),
            (LandmarkId::LeftAnkle, [0.75, 0.7, 0.0]),
        ]);
        let out = r.solve(&lm, &rig);
        apply(&mut rig, &out);
        let shin = world_direction(&rig, "shin.L", -Vector3::y());
        assert_relative_eq!(shin, Vector3::x(), epsilon = 1e-4);
    }

    #[test]
    fn test_cone_limit_clamps_exactly() {
        let rig = Rig::humanoid();
        let mapping = vec![BoneMappingConfig::new(
            "upper_arm.L",
            &["left_shoulder"],
            &["left_elbow"],
            [1.0, 0.0, 0.0],
            JointLimit::cone(45.0),
        )];
        let r = retargeter(&rig, mapping);
        let lm = landmarks(&[
            (LandmarkId::LeftShoulder, [0.6, 0.3, 0.0]),
            (LandmarkId::LeftElbow, [0.6, 0.5, 0.0]),
        ]);
        let out = r.solve(&lm, &rig);
        assert_relative_eq!(out[0].rotation.angle(), 45f32.to_radians(), epsilon = 1e-5);
    }

    #[test]
    fn test_root_motion() {
        let rig = Rig::humanoid();
        let config = RootConfig {
            bone: "hips".into(),
            landmarks: vec!["left_hip".into(), "right_hip".into()],
            scale_x: 2.0,
            scale_y: 1.0,
            offset_y: 1.0,
        };
        let root = RootMotion::resolve(&config, &rig, false).unwrap();
        let table = BoneMappingTable::resolve(&[], &rig).unwrap();
        let r = Retargeter::new(table, Some(root), Basis::default(), 1e-3);

        let lm = landmarks(&[
            (LandmarkId::LeftHip, [0.6, 0.5, 0.0]),
            (LandmarkId::RightHip, [0.8, 0.7, 0.0]),
        ]);
        let out = r.solve(&lm, &rig);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bone, rig.find("hips").unwrap());
        let t = out[0].translation.unwrap();
        assert_relative_eq!(t, Vector3::new(0.4, 0.9, 0.0), epsilon = 1e-5);
        assert_eq!(out[0].rotation, UnitQuaternion::identity());

        // 片側欠損なら移動なし
        let lm = landmarks(&[(LandmarkId::LeftHip, [0.6, 0.5, 0.0])]);
        assert!(r.solve(&lm, &rig).is_empty());
    }

    #[test]
    fn test_root_mirrored() {
        let rig = Rig::humanoid();
        let config = RootConfig {
            bone: "hips".into(),
            landmarks: vec!["left_hip".into(), "right_hip".into()],
            scale_x: 1.0,
            scale_y: 1.0,
            offset_y: 1.0,
        };
        let root = RootMotion::resolve(&config, &rig, true).unwrap();
        let table = BoneMappingTable::resolve(&[], &rig).unwrap();
        let r = Retargeter::new(table, Some(root), Basis::default(), 1e-3);
        let lm = landmarks(&[
            (LandmarkId::LeftHip, [0.7, 0.5, 0.0]),
            (LandmarkId::RightHip, [0.7, 0.5, 0.0]),
        ]);
        let t = r.solve(&lm, &rig)[0].translation.unwrap();
        assert_relative_eq!(t.x, -0.2, epsilon = 1e-5);
    }

    #[test]
    fn test_from_config_reports_unknown_root_bone() {
        let rig = Rig::humanoid();
        let mut config = Config::default();
        config.root = Some(RootConfig {
            bone: "pelvis".into(),
            landmarks: vec!["left_hip".into()],
            scale_x: 1.0,
            scale_y: 1.0,
            offset_y: 1.0,
        });
        assert_eq!(
            Retargeter::from_config(&config, &rig).unwrap_err(),
            RigError::UnknownBone("pelvis".into())
        );
    }
}
