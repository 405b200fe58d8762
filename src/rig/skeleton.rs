use std::collections::HashMap;

use nalgebra::{UnitQuaternion, Vector3};

use crate::error::RigError;

/// リグ内のボーンを指すキー（アリーナのインデックス）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoneId(pub usize);

/// ローカル変換（親基準）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
}

impl Transform {
    pub fn new(translation: Vector3<f32>, rotation: UnitQuaternion<f32>) -> Self {
        Self { translation, rotation }
    }

    pub fn from_translation(x: f32, y: f32, z: f32) -> Self {
        Self::new(Vector3::new(x, y, z), UnitQuaternion::identity())
    }

    pub fn identity() -> Self {
        Self::new(Vector3::zeros(), UnitQuaternion::identity())
    }
}

#[derive(Debug, Clone)]
pub struct Bone {
    name: String,
    parent: Option<BoneId>,
    rest: Transform,
    pub(crate) current: Transform,
}

impl Bone {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<BoneId> {
        self.parent
    }

    pub fn rest(&self) -> &Transform {
        &self.rest
    }

    pub fn current(&self) -> &Transform {
        &self.current
    }
}

/// ボーン階層を所有するリグ
///
/// 親は必ず子より先に追加されるため、インデックス順がそのままトポロジカル順になる。
#[derive(Debug, Clone, Default)]
pub struct Rig {
    bones: Vec<Bone>,
    by_name: HashMap<String, BoneId>,
}

impl Rig {
    pub fn new() -> Self {
        Self::default()
    }

    /// ボーンを追加する。現在の変換はレスト変換で初期化される。
    pub fn add_bone(
        &mut self,
        name: &str,
        parent: Option<&str>,
        rest: Transform,
    ) -> Result<BoneId, RigError> {
        if self.by_name.contains_key(name) {
            return Err(RigError::DuplicateBone(name.to_string()));
        }
        let parent = match parent {
            Some(p) => Some(self.find(p).ok_or_else(|| RigError::MissingParent {
                bone: name.to_string(),
                parent: p.to_string(),
            })?),
            None => None,
        };
        let id = BoneId(self.bones.len());
        self.bones.push(Bone {
            name: name.to_string(),
            parent,
            rest,
            current: rest,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn find(&self, name: &str) -> Option<BoneId> {
        self.by_name.get(name).copied()
    }

    pub fn bone(&self, id: BoneId) -> Option<&Bone> {
        self.bones.get(id.0)
    }

    pub(crate) fn bone_mut(&mut self, id: BoneId) -> Option<&mut Bone> {
        self.bones.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BoneId, &Bone)> {
        self.bones.iter().enumerate().map(|(i, b)| (BoneId(i), b))
    }

    /// 全ボーンを現在の姿勢でワールド回転に展開する
    pub fn world_rotations(&self) -> Vec<UnitQuaternion<f32>> {
        self.compose(|bone| bone.current.rotation)
    }

    /// 全ボーンをレスト姿勢でワールド回転に展開する
    pub fn rest_world_rotations(&self) -> Vec<UnitQuaternion<f32>> {
        self.compose(|bone| bone.rest.rotation)
    }

    fn compose(&self, local: impl Fn(&Bone) -> UnitQuaternion<f32>) -> Vec<UnitQuaternion<f32>> {
        let mut world: Vec<UnitQuaternion<f32>> = Vec::with_capacity(self.bones.len());
        for bone in &self.bones {
            let parent = bone
                .parent
                .map(|p| world[p.0])
                .unwrap_or_else(UnitQuaternion::identity);
            world.push(parent * local(bone));
        }
        world
    }

    /// レスト姿勢に戻す
    pub fn reset_to_rest(&mut self) {
        for bone in &mut self.bones {
            bone.current = bone.rest;
        }
    }

    /// Tポーズの人型リグ（Y上向き、+Z がカメラ側、アバターの左手が +X）
    pub fn humanoid() -> Self {
        let bones: [(&str, Option<&str>, [f32; 3]); 13] = [
            ("hips", None, [0.0, 1.0, 0.0]),
            ("spine", Some("hips"), [0.0, 0.1, 0.0]),
            ("chest", Some("spine"), [0.0, 0.2, 0.0]),
            ("neck", Some("chest"), [0.0, 0.25, 0.0]),
            ("head", Some("neck"), [0.0, 0.1, 0.0]),
            ("upper_arm.L", Some("chest"), [0.18, 0.2, 0.0]),
            ("forearm.L", Some("upper_arm.L"), [0.28, 0.0, 0.0]),
            ("upper_arm.R", Some("chest"), [-0.18, 0.2, 0.0]),
            ("forearm.R", Some("upper_arm.R"), [-0.28, 0.0, 0.0]),
            ("thigh.L", Some("hips"), [0.1, -0.05, 0.0]),
            ("shin.L", Some("thigh.L"), [0.0, -0.42, 0.0]),
            ("thigh.R", Some("hips"), [-0.1, -0.05, 0.0]),
            ("shin.R", Some("thigh.R"), [0.0, -0.42, 0.0]),
        ];
        let mut rig = Rig::new();
        for (name, parent, [x, y, z]) in bones {
            // 固定テーブルなので失敗しない
            if let Err(e) = rig.add_bone(name, parent, Transform::from_translation(x, y, z)) {
                unreachable!("humanoid rig table is inconsistent: {}", e);
            }
        }
        rig
    }
}
