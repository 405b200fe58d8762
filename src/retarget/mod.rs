pub mod basis;
pub mod limits;
pub mod mapping;
pub mod retargeter;

pub use basis::Basis;
pub use limits::{JointConstraint, JointLimit};
pub use mapping::{default_humanoid_mapping, BoneMapping, BoneMappingConfig, BoneMappingTable};
pub use retargeter::{shortest_arc, BoneTransform, Retargeter, RootMotion};
