use thiserror::Error;

/// パイプライン全体のエラー
///
/// 入力の欠損や低信頼度はここに含まれない（欠損観測として処理される）。
/// 設定ミスと呼び出し側の契約違反のみを表す。
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RigError {
    // --- 設定エラー（Starting で検出） ---
    #[error("unknown landmark `{0}` in bone mapping")]
    UnknownLandmark(String),

    #[error("bone `{0}` is not present in the rig")]
    UnknownBone(String),

    #[error("bone `{0}` is mapped more than once")]
    DuplicateMapping(String),

    #[error("invalid mapping for bone `{bone}`: {reason}")]
    InvalidMapping { bone: String, reason: String },

    #[error("invalid joint limit for bone `{bone}`: {reason}")]
    InvalidJointLimit { bone: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // --- リグ構築 ---
    #[error("bone `{0}` already exists in the rig")]
    DuplicateBone(String),

    #[error("parent bone `{parent}` of `{bone}` must be added first")]
    MissingParent { bone: String, parent: String },

    #[error("bone id {0} is out of range")]
    InvalidBoneId(usize),

    // --- 契約違反 ---
    #[error("pipeline is not running")]
    NotRunning,

    #[error("rig applier used before the pipeline finished starting")]
    NotStarted,

    #[error("transforms applied from a thread that does not own the rig")]
    WrongThread,

    #[error("transforms already applied during tick {0}")]
    AlreadyApplied(u64),
}
