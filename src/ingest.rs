//! 検出器フィード: 1 行 1 JSON オブジェクト
//!
//! ```text
//! {"frame": 12, "person_id": 3, "keypoints": [[0.51, 0.22, 0.9], null, ...]}
//! ```
//!
//! `keypoints` はインデックス順にキーポイントごと 1 要素。`null` は未検出。

use std::io::BufRead;

use anyhow::{Context, Result};
use ndarray::Array2;
use serde::Deserialize;

use crate::error::{SignalError, SignalResult};
use crate::pose::{KeypointIndex, KeypointMatrix, MIN_COORD_WIDTH};
use crate::signal::PersonId;

/// 1 検出: ある人物の 1 フレーム分のキーポイント
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub frame: u64,
    pub person: PersonId,
    pub keypoints: KeypointMatrix,
}

impl Observation {
    pub fn new(frame: u64, person: PersonId, keypoints: KeypointMatrix) -> Self {
        Self {
            frame,
            person,
            keypoints,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectionRecord {
    pub frame: u64,
    pub person_id: PersonId,
    pub keypoints: Vec<Option<Vec<f32>>>,
}

impl DetectionRecord {
    /// キーポイント行列を作る。最初の検出行で座標幅が決まり、未検出行は NaN。
    ///
    /// 全行未検出なら幅 2 の未検出行列になり、トラックの幅は固定しない。
    pub fn into_observation(self) -> SignalResult<Observation> {
        let rows = self.keypoints.len();
        let width = self
            .keypoints
            .iter()
            .flatten()
            .map(Vec::len)
            .next()
            .unwrap_or(MIN_COORD_WIDTH);
        let ragged = self.keypoints.iter().flatten().find(|r| r.len() != width);
        if rows != KeypointIndex::COUNT || ragged.is_some() {
            return Err(SignalError::Shape {
                expected_rows: KeypointIndex::COUNT,
                expected_width: width,
                rows,
                width: ragged.map_or(width, Vec::len),
            });
        }

        let keypoints = Array2::from_shape_fn((rows, width), |(r, c)| match &self.keypoints[r] {
            Some(row) => row[c],
            None => f32::NAN,
        });
        Ok(Observation::new(self.frame, self.person_id, keypoints))
    }
}

/// JSON-lines フィードの検出レコードを順に返す。空行は読み飛ばす
pub struct FeedReader<R> {
    reader: R,
    line_no: usize,
    buf: String,
}

impl<R: BufRead> FeedReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_no: 0,
            buf: String::new(),
        }
    }
}

impl<R: BufRead> Iterator for FeedReader<R> {
    type Item = Result<DetectionRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            self.line_no += 1;
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {
                    let line = self.buf.trim();
                    if line.is_empty() {
                        continue;
                    }
                    return Some(
                        serde_json::from_str(line)
                            .with_context(|| format!("line {}: invalid detection record", self.line_no)),
                    );
                }
                Err(e) => return Some(Err(e).context("failed to read detection feed")),
            }
        }
    }
}
