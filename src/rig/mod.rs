pub mod applier;
pub mod skeleton;

pub use applier::RigApplier;
pub use skeleton::{Bone, BoneId, Rig, Transform};
