use crate::config::SignalConfig;
use crate::error::{SignalError, SignalResult};
use crate::pose::{row_is_valid, BodyRegion, KeypointMatrix};

use super::pose_signal::PoseSignal;
use super::reducer::Reducer;

/// 動き量の 1 サンプル。`value == None` は共通の有効キーポイントが足りなかったフレームで、
/// 「データなし」を表す。動き量 0 とは区別する
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffSample {
    pub frame: u64,
    pub value: Option<f32>,
    pub valid: usize,
}

/// [`PoseSignal`] から導出した動き量の履歴。元信号より 1 観測遅れ、
/// 各フレームは元信号に直前の観測を持つ
#[derive(Debug, Clone, Default)]
pub struct DiffSignal {
    samples: Vec<DiffSample>,
    // 処理済みの元観測数
    processed: usize,
}

impl DiffSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[DiffSample] {
        &self.samples
    }

    pub fn frame_log(&self) -> impl Iterator<Item = u64> + '_ {
        self.samples.iter().map(|s| s.frame)
    }

    pub fn latest(&self) -> Option<&DiffSample> {
        self.samples.last()
    }

    /// 直近の有効値とそのフレーム
    pub fn latest_defined(&self) -> Option<(u64, f32)> {
        self.samples
            .iter()
            .rev()
            .find_map(|s| s.value.map(|v| (s.frame, v)))
    }
}

/// 1 人の連続する観測間のスカラー動き量を計算する
#[derive(Debug, Clone)]
pub struct DiffEngine {
    min_valid_keypoints: usize,
    confidence_threshold: f32,
    reducer: Reducer,
}

impl DiffEngine {
    pub fn new(min_valid_keypoints: usize, confidence_threshold: f32, reducer: Reducer) -> Self {
        Self {
            min_valid_keypoints,
            confidence_threshold,
            reducer,
        }
    }

    pub fn from_config(config: &SignalConfig) -> Self {
        Self::new(
            config.min_valid_keypoints,
            config.confidence_threshold,
            config.reducer,
        )
    }

    pub fn min_valid_keypoints(&self) -> usize {
        self.min_valid_keypoints
    }

    // 値を定義するには最低 1 点必要
    fn required(&self) -> usize {
        self.min_valid_keypoints.max(1)
    }

    fn displacements(&self, prev: &KeypointMatrix, cur: &KeypointMatrix, region: BodyRegion) -> Vec<f32> {
        region
            .keypoints()
            .iter()
            .filter_map(|kp| {
                let i = kp.index();
                let (a, b) = (prev.row(i), cur.row(i));
                if row_is_valid(a, self.confidence_threshold) && row_is_valid(b, self.confidence_threshold) {
                    Some((b[0] - a[0]).hypot(b[1] - a[1]))
                } else {
                    None
                }
            })
            .collect()
    }

    fn reduce(&self, frame: u64, displacements: &[f32]) -> SignalResult<f32> {
        let required = self.required();
        if displacements.len() < required {
            return Err(SignalError::InsufficientData {
                frame,
                valid: displacements.len(),
                required,
            });
        }
        self.reducer
            .reduce(displacements)
            .ok_or(SignalError::InsufficientData {
                frame,
                valid: 0,
                required,
            })
    }

    /// 両行列で有効な部位キーポイントの (x, y) 変位を集約する。`frame` はエラー表示用
    pub fn diff(
        &self,
        frame: u64,
        prev: &KeypointMatrix,
        cur: &KeypointMatrix,
        region: BodyRegion,
    ) -> SignalResult<f32> {
        self.reduce(frame, &self.displacements(prev, cur, region))
    }

    /// `diff` を `pose` に追いつかせ、最新観測の動き量を返す。
    ///
    /// トラックの初回観測は直前がないためサンプルを記録せず `InsufficientData`。
    /// それ以降の未定義フレームは `None` として記録する。
    pub fn update(
        &self,
        pose: &PoseSignal,
        diff: &mut DiffSignal,
        region: BodyRegion,
    ) -> SignalResult<f32> {
        let frames = pose.frame_log();
        let signals = pose.signals();
        let mut result = None;

        for i in diff.processed..signals.len() {
            let frame = frames[i];
            if i == 0 {
                result = Some(Err(SignalError::InsufficientData {
                    frame,
                    valid: 0,
                    required: self.required(),
                }));
                continue;
            }
            let displacements = self.displacements(&signals[i - 1], &signals[i], region);
            let r = self.reduce(frame, &displacements);
            diff.samples.push(DiffSample {
                frame,
                value: r.as_ref().ok().copied(),
                valid: displacements.len(),
            });
            result = Some(r);
        }
        diff.processed = signals.len();

        if let Some(r) = result {
            return r;
        }
        match diff.latest() {
            Some(DiffSample { value: Some(v), .. }) => Ok(*v),
            Some(s) => Err(SignalError::InsufficientData {
                frame: s.frame,
                valid: s.valid,
                required: self.required(),
            }),
            None => Err(SignalError::InsufficientData {
                frame: pose.last_frame().unwrap_or(0),
                valid: 0,
                required: self.required(),
            }),
        }
    }
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::from_config(&SignalConfig::default())
    }
}
