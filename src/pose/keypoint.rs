use ndarray::{Array2, ArrayView1};

/// MoveNet / COCO の 17 キーポイントインデックス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointIndex {
    pub const COUNT: usize = 17;

    /// 行順 (= 行列の行インデックス順)
    pub const ALL: [KeypointIndex; Self::COUNT] = [
        Self::Nose,
        Self::LeftEye,
        Self::RightEye,
        Self::LeftEar,
        Self::RightEar,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftElbow,
        Self::RightElbow,
        Self::LeftWrist,
        Self::RightWrist,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftAnkle,
        Self::RightAnkle,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// エクスポート用の列名
    pub fn name(self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftEye => "left_eye",
            Self::RightEye => "right_eye",
            Self::LeftEar => "left_ear",
            Self::RightEar => "right_ear",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightAnkle => "right_ankle",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kp| kp.name() == name)
    }
}

/// 座標幅: x, y のみ (2) か、信頼度付き (3)
pub const MIN_COORD_WIDTH: usize = 2;
pub const MAX_COORD_WIDTH: usize = 3;

/// 1フレーム・1人分のキーポイント行列 (17 x 2 または 17 x 3)
///
/// 未検出のキーポイントは x / y を NaN にする。
pub type KeypointMatrix = Array2<f32>;

/// 未検出行を作る
pub fn undetected_matrix(width: usize) -> KeypointMatrix {
    Array2::from_elem((KeypointIndex::COUNT, width), f32::NAN)
}

/// 全キーポイント未検出 (全要素 NaN) か
///
/// 未検出行列は座標幅を持たないものとして扱う。
pub fn is_undetected(matrix: &KeypointMatrix) -> bool {
    matrix.iter().all(|v| v.is_nan())
}

/// 行が有効か (x, y が有限、かつ信頼度列があれば閾値以上)
pub fn row_is_valid(row: ArrayView1<'_, f32>, confidence_threshold: f32) -> bool {
    if row.len() < MIN_COORD_WIDTH || !row[0].is_finite() || !row[1].is_finite() {
        return false;
    }
    match row.get(2) {
        Some(conf) => conf.is_finite() && *conf >= confidence_threshold,
        None => true,
    }
}

/// テスト用: 鼻だけ検出された x / y 行列
#[cfg(test)]
pub(crate) fn nose_at(x: f32, y: f32) -> KeypointMatrix {
    let mut m = undetected_matrix(MIN_COORD_WIDTH);
    m[[KeypointIndex::Nose.index(), 0]] = x;
    m[[KeypointIndex::Nose.index(), 1]] = y;
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_keypoint_index_count() {
        assert_eq!(KeypointIndex::COUNT, 17);
        assert_eq!(KeypointIndex::ALL.len(), 17);
    }

    #[test]
    fn test_keypoint_index_from_index() {
        assert_eq!(KeypointIndex::from_index(0), Some(KeypointIndex::Nose));
        assert_eq!(KeypointIndex::from_index(16), Some(KeypointIndex::RightAnkle));
        assert_eq!(KeypointIndex::from_index(17), None);
    }

    #[test]
    fn test_all_matches_discriminants() {
        for (i, kp) in KeypointIndex::ALL.iter().enumerate() {
            assert_eq!(kp.index(), i);
        }
    }

    #[test]
    fn test_name_roundtrip() {
        for kp in KeypointIndex::ALL {
            assert_eq!(KeypointIndex::from_name(kp.name()), Some(kp));
        }
        assert_eq!(KeypointIndex::from_name("tail"), None);
    }

    #[test]
    fn test_row_is_valid() {
        assert!(row_is_valid(arr1(&[0.5, 0.5]).view(), 0.3));
        assert!(!row_is_valid(arr1(&[f32::NAN, 0.5]).view(), 0.3));
        assert!(row_is_valid(arr1(&[0.5, 0.5, 0.7]).view(), 0.5));
        assert!(!row_is_valid(arr1(&[0.5, 0.5, 0.2]).view(), 0.5));
    }

    #[test]
    fn test_undetected_matrix() {
        let m = undetected_matrix(3);
        assert_eq!(m.dim(), (17, 3));
        assert!(m.iter().all(|v| v.is_nan()));
        assert!(is_undetected(&m));
        assert!(!is_undetected(&nose_at(0.0, 0.0)));
    }
}
