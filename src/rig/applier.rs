use std::thread::{self, ThreadId};

use crate::error::RigError;
use crate::retarget::BoneTransform;

use super::skeleton::Rig;

/// 計算済み変換をリグへ書き込む
///
/// 所有スレッドに束縛され、1ティックにつき1回だけ書き込める。平滑化はしない。
#[derive(Debug, Default)]
pub struct RigApplier {
    owner: Option<ThreadId>,
    last_tick: Option<u64>,
    write_count: u64,
}

impl RigApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// 呼び出しスレッドを所有スレッドとして登録する
    pub fn bind(&mut self) {
        self.owner = Some(thread::current().id());
        self.last_tick = None;
    }

    pub fn unbind(&mut self) {
        self.owner = None;
        self.last_tick = None;
    }

    pub fn is_bound(&self) -> bool {
        self.owner.is_some()
    }

    /// これまでに書き込んだボーン数の累計
    pub fn write_count(&self) -> u64 {
        self.write_count
    }

    /// このスレッドがこのティックで書き込めるか
    pub fn check(&self, tick: u64) -> Result<(), RigError> {
        let owner = self.owner.ok_or(RigError::NotStarted)?;
        if owner != thread::current().id() {
            return Err(RigError::WrongThread);
        }
        if self.last_tick == Some(tick) {
            return Err(RigError::AlreadyApplied(tick));
        }
        Ok(())
    }

    /// 変換を書き込み、書いたボーン数を返す。
    /// 検証はすべて書き込み前に行うので、失敗時は何も書かれない。
    pub fn apply(
        &mut self,
        rig: &mut Rig,
        tick: u64,
        transforms: &[BoneTransform],
    ) -> Result<usize, RigError> {
        self.check(tick)?;
        if let Some(bad) = transforms.iter().find(|t| t.bone.0 >= rig.len()) {
            return Err(RigError::InvalidBoneId(bad.bone.0));
        }

        for t in transforms {
            if let Some(bone) = rig.bone_mut(t.bone) {
                bone.current.rotation = t.rotation;
                if let Some(translation) = t.translation {
                    bone.current.translation = translation;
                }
            }
        }
        self.last_tick = Some(tick);
        self.write_count += transforms.len() as u64;
        Ok(transforms.len())
    }
}
