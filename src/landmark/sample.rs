use std::fmt;
use std::str::FromStr;

use nalgebra::Vector3;

/// MediaPipe Pose の 33 ランドマークインデックス（検出器の出力順）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(usize)]
pub enum LandmarkId {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl LandmarkId {
    pub const COUNT: usize = 33;

    pub const ALL: [LandmarkId; Self::COUNT] = [
        Self::Nose,
        Self::LeftEyeInner,
        Self::LeftEye,
        Self::LeftEyeOuter,
        Self::RightEyeInner,
        Self::RightEye,
        Self::RightEyeOuter,
        Self::LeftEar,
        Self::RightEar,
        Self::MouthLeft,
        Self::MouthRight,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftElbow,
        Self::RightElbow,
        Self::LeftWrist,
        Self::RightWrist,
        Self::LeftPinky,
        Self::RightPinky,
        Self::LeftIndex,
        Self::RightIndex,
        Self::LeftThumb,
        Self::RightThumb,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftAnkle,
        Self::RightAnkle,
        Self::LeftHeel,
        Self::RightHeel,
        Self::LeftFootIndex,
        Self::RightFootIndex,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// 設定ファイルで使う snake_case 名
    pub fn name(self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftEyeInner => "left_eye_inner",
            Self::LeftEye => "left_eye",
            Self::LeftEyeOuter => "left_eye_outer",
            Self::RightEyeInner => "right_eye_inner",
            Self::RightEye => "right_eye",
            Self::RightEyeOuter => "right_eye_outer",
            Self::LeftEar => "left_ear",
            Self::RightEar => "right_ear",
            Self::MouthLeft => "mouth_left",
            Self::MouthRight => "mouth_right",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftPinky => "left_pinky",
            Self::RightPinky => "right_pinky",
            Self::LeftIndex => "left_index",
            Self::RightIndex => "right_index",
            Self::LeftThumb => "left_thumb",
            Self::RightThumb => "right_thumb",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightAnkle => "right_ankle",
            Self::LeftHeel => "left_heel",
            Self::RightHeel => "right_heel",
            Self::LeftFootIndex => "left_foot_index",
            Self::RightFootIndex => "right_foot_index",
        }
    }
}

impl fmt::Display for LandmarkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LandmarkId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|id| id.name() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// 単一ランドマーク
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    /// 正規化されたX座標 (0.0〜1.0, 右向き)
    pub x: f32,
    /// 正規化されたY座標 (0.0〜1.0, 下向き)
    pub y: f32,
    /// 相対深度（スケールはフレーム間で一貫）
    pub z: f32,
    /// 信頼度スコア (0.0〜1.0)
    pub confidence: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32, confidence: f32) -> Self {
        Self { x, y, z, confidence }
    }

    /// 信頼度が閾値以上か
    pub fn is_valid(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }

    /// 座標が有限値で、信頼度が [0,1] に収まっているか
    pub fn is_well_formed(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.z.is_finite()
            && (0.0..=1.0).contains(&self.confidence)
    }

    pub fn position(&self) -> Vector3<f32> {
        Vector3::new(self.x, self.y, self.z)
    }
}

/// 検出器1フレーム分の出力
///
/// 識別子ごとに1スロットを持ち、検出されなかったランドマークは `None`。
/// 生成後は変更しない。
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSample {
    /// プロデューサーセッション内で狭義単調増加
    pub sequence: u64,
    /// キャプチャ時刻（単調増加、マイクロ秒）
    pub timestamp_us: u64,
    landmarks: [Option<Landmark>; LandmarkId::COUNT],
}

impl LandmarkSample {
    pub fn new(sequence: u64, timestamp_us: u64) -> Self {
        Self {
            sequence,
            timestamp_us,
            landmarks: [None; LandmarkId::COUNT],
        }
    }

    /// ランドマークを設定したサンプルを返す。
    /// 非有限座標や範囲外の信頼度は欠損として扱う。
    pub fn with_landmark(mut self, id: LandmarkId, landmark: Landmark) -> Self {
        self.landmarks[id as usize] = Some(landmark).filter(Landmark::is_well_formed);
        self
    }

    pub fn get(&self, id: LandmarkId) -> Option<&Landmark> {
        self.landmarks[id as usize].as_ref()
    }

    /// 報告されたランドマーク数
    pub fn present_count(&self) -> usize {
        self.landmarks.iter().filter(|l| l.is_some()).count()
    }

    /// 報告されたランドマークの平均信頼度
    pub fn average_confidence(&self) -> f32 {
        let present: Vec<f32> = self.landmarks.iter().flatten().map(|l| l.confidence).collect();
        if present.is_empty() {
            return 0.0;
        }
        present.iter().sum::<f32>() / present.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landmark_id_count() {
        assert_eq!(LandmarkId::COUNT, 33);
        assert_eq!(LandmarkId::ALL.len(), LandmarkId::COUNT);
        for (i, id) in LandmarkId::ALL.iter().enumerate() {
            assert_eq!(id.index(), i);
        }
    }

    #[test]
    fn test_landmark_id_from_index() {
        assert_eq!(LandmarkId::from_index(0), Some(LandmarkId::Nose));
        assert_eq!(LandmarkId::from_index(13), Some(LandmarkId::LeftElbow));
        assert_eq!(LandmarkId::from_index(32), Some(LandmarkId::RightFootIndex));
        assert_eq!(LandmarkId::from_index(33), None);
    }

    #[test]
    fn test_landmark_id_name_roundtrip() {
        for id in LandmarkId::ALL {
            assert_eq!(id.name().parse::<LandmarkId>(), Ok(id));
        }
        assert_eq!("left_elbo".parse::<LandmarkId>(), Err("left_elbo".to_string()));
    }

    #[test]
    fn test_landmark_is_valid() {
        let lm = Landmark::new(0.5, 0.5, 0.0, 0.7);
        assert!(lm.is_valid(0.5));
        assert!(!lm.is_valid(0.8));
    }

    #[test]
    fn test_sample_get() {
        let sample = LandmarkSample::new(1, 0)
            .with_landmark(LandmarkId::Nose, Landmark::new(0.5, 0.3, -0.1, 0.9));
        let nose = sample.get(LandmarkId::Nose).unwrap();
        assert_eq!(nose.x, 0.5);
        assert_eq!(nose.y, 0.3);
        assert_eq!(nose.confidence, 0.9);
        assert!(sample.get(LandmarkId::LeftElbow).is_none());
        assert_eq!(sample.present_count(), 1);
    }

    #[test]
    fn test_sample_drops_malformed_landmarks() {
        let sample = LandmarkSample::new(1, 0)
            .with_landmark(LandmarkId::Nose, Landmark::new(f32::NAN, 0.3, 0.0, 0.9))
            .with_landmark(LandmarkId::LeftHip, Landmark::new(0.5, 0.5, 0.0, 1.5))
            .with_landmark(LandmarkId::RightHip, Landmark::new(0.5, 0.5, 0.0, 0.8));
        assert!(sample.get(LandmarkId::Nose).is_none());
        assert!(sample.get(LandmarkId::LeftHip).is_none());
        assert!(sample.get(LandmarkId::RightHip).is_some());
    }

    #[test]
    fn test_sample_average_confidence() {
        let sample = LandmarkSample::new(1, 0)
            .with_landmark(LandmarkId::LeftHip, Landmark::new(0.4, 0.6, 0.0, 0.4))
            .with_landmark(LandmarkId::RightHip, Landmark::new(0.6, 0.6, 0.0, 0.6));
        assert!((sample.average_confidence() - 0.5).abs() < 1e-6);
        assert_eq!(LandmarkSample::new(2, 0).average_confidence(), 0.0);
    }
}
