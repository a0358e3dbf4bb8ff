use crate::error::{SignalError, SignalResult};
use crate::pose::{is_undetected, undetected_matrix, KeypointIndex, KeypointMatrix, MAX_COORD_WIDTH, MIN_COORD_WIDTH};

use super::table::{Cell, ExportFormat, Table};
use super::PersonId;

const COORD_NAMES: [&str; MAX_COORD_WIDTH] = ["x", "y", "confidence"];

/// 1人分のキーポイント履歴
///
/// `frame_log[i]` が `signals[i]` のフレーム。両者の長さは常に等しく、
/// フレームログは減少しない。座標幅は最初に検出を含む観測で決まり、
/// 全未検出の観測は幅を決めない。
#[derive(Debug, Clone)]
pub struct PoseSignal {
    person: PersonId,
    width: Option<usize>,
    frame_log: Vec<u64>,
    signals: Vec<KeypointMatrix>,
}

impl PoseSignal {
    pub fn new(person: PersonId) -> Self {
        Self {
            person,
            width: None,
            frame_log: Vec::new(),
            signals: Vec::new(),
        }
    }

    pub fn person(&self) -> PersonId {
        self.person
    }

    /// 座標幅 (2 か 3)。検出を含む観測がまだなければ `None`
    pub fn width(&self) -> Option<usize> {
        self.width
    }

    pub fn len(&self) -> usize {
        self.frame_log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame_log.is_empty()
    }

    pub fn frame_log(&self) -> &[u64] {
        &self.frame_log
    }

    pub fn signals(&self) -> &[KeypointMatrix] {
        &self.signals
    }

    pub fn last_frame(&self) -> Option<u64> {
        self.frame_log.last().copied()
    }

    pub fn latest(&self) -> Option<(u64, &KeypointMatrix)> {
        self.frame_log.last().copied().zip(self.signals.last())
    }

    /// 直近2観測 (古い順)
    pub fn latest_pair(&self) -> Option<((u64, &KeypointMatrix), (u64, &KeypointMatrix))> {
        let n = self.len();
        if n < 2 {
            return None;
        }
        Some((
            (self.frame_log[n - 2], &self.signals[n - 2]),
            (self.frame_log[n - 1], &self.signals[n - 1]),
        ))
    }

    /// 観測を1件追加する。失敗時はコンテナを変更しない。
    ///
    /// 全未検出の行列は幅 2..=3 ならどれでも受け付け、確定済みの幅に合わせる。
    pub fn append(&mut self, frame: u64, matrix: KeypointMatrix) -> SignalResult<()> {
        let (rows, width) = matrix.dim();
        let undetected = is_undetected(&matrix);
        let expected_width = match self.width {
            Some(w) if !undetected => w,
            _ => width,
        };
        let width_ok = (MIN_COORD_WIDTH..=MAX_COORD_WIDTH).contains(&width) && width == expected_width;
        if rows != KeypointIndex::COUNT || !width_ok {
            return Err(SignalError::Shape {
                expected_rows: KeypointIndex::COUNT,
                expected_width: expected_width.clamp(MIN_COORD_WIDTH, MAX_COORD_WIDTH),
                rows,
                width,
            });
        }

        if let Some(last) = self.last_frame() {
            if frame < last {
                return Err(SignalError::Order {
                    person: self.person,
                    frame,
                    last,
                });
            }
        }

        let matrix = match self.width {
            Some(w) if undetected && w != width => undetected_matrix(w),
            _ => matrix,
        };
        if self.width.is_none() && !undetected {
            self.width = Some(width);
            // それまでの観測はすべて未検出なので幅だけ揃える
            for m in self.signals.iter_mut().filter(|m| m.ncols() != width) {
                *m = undetected_matrix(width);
            }
        }
        self.frame_log.push(frame);
        self.signals.push(matrix);
        Ok(())
    }

    /// 蓄積した行列をテーブル化する。`idx` はこのコンテナ内での観測位置で、
    /// `one_based_idx` なら1始まりで出力する。
    pub fn as_table(&self, format: ExportFormat, one_based_idx: bool) -> Table {
        self.as_table_with_width(format, one_based_idx, self.width.unwrap_or(MIN_COORD_WIDTH))
    }

    /// 列幅 `width` でテーブル化する。足りない列 (信頼度) は NaN、
    /// 余る列は切り捨てる。
    pub fn as_table_with_width(&self, format: ExportFormat, one_based_idx: bool, width: usize) -> Table {
        let width = width.clamp(MIN_COORD_WIDTH, MAX_COORD_WIDTH);
        let offset = u64::from(one_based_idx);
        let mut table = Table::new(table_columns(format, width));

        for (i, (frame, matrix)) in self.frame_log.iter().zip(&self.signals).enumerate() {
            let head = [
                Cell::Int(u64::from(self.person)),
                Cell::Int(*frame),
                Cell::Int(i as u64 + offset),
            ];
            let value = |r: usize, c: usize| Cell::Float(matrix.get((r, c)).copied().unwrap_or(f32::NAN));
            match format {
                ExportFormat::Wide => {
                    let mut row = head.to_vec();
                    for r in 0..KeypointIndex::COUNT {
                        row.extend((0..width).map(|c| value(r, c)));
                    }
                    table.rows.push(row);
                }
                ExportFormat::Long => {
                    for kp in KeypointIndex::ALL {
                        let mut row = head.to_vec();
                        row.push(Cell::Text(kp.name().to_string()));
                        row.extend((0..width).map(|c| value(kp.index(), c)));
                        table.rows.push(row);
                    }
                }
            }
        }
        table
    }
}

/// 形式と座標幅に対応する列名
pub fn table_columns(format: ExportFormat, width: usize) -> Vec<String> {
    let coords = &COORD_NAMES[..width.clamp(MIN_COORD_WIDTH, MAX_COORD_WIDTH)];
    let mut columns = vec!["person".to_string(), "frame".to_string(), "idx".to_string()];
    match format {
        ExportFormat::Wide => {
            for kp in KeypointIndex::ALL {
                for coord in coords {
                    columns.push(format!("{}_{}", kp.name(), coord));
                }
            }
        }
        ExportFormat::Long => {
            columns.push("keypoint".to_string());
            columns.extend(coords.iter().map(|c| c.to_string()));
        }
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::nose_at;
    use ndarray::Array2;
    use proptest::prelude::*;

    fn nose_with_confidence(x: f32, y: f32, c: f32) -> KeypointMatrix {
        let mut m = undetected_matrix(3);
        m[[KeypointIndex::Nose.index(), 0]] = x;
        m[[KeypointIndex::Nose.index(), 1]] = y;
        m[[KeypointIndex::Nose.index(), 2]] = c;
        m
    }

    #[test]
    fn test_append_records_frame() {
        let mut signal = PoseSignal::new(1);
        signal.append(10, nose_at(0.0, 0.0)).unwrap();
        signal.append(10, nose_at(1.0, 0.0)).unwrap();
        signal.append(12, nose_at(2.0, 0.0)).unwrap();
        assert_eq!(signal.frame_log(), &[10, 10, 12]);
        assert_eq!(signal.signals().len(), 3);
        assert_eq!(signal.width(), Some(2));
    }

    #[test]
    fn test_wrong_row_count_is_shape_error() {
        let mut signal = PoseSignal::new(1);
        signal.append(1, nose_at(0.0, 0.0)).unwrap();

        let err = signal.append(2, Array2::zeros((16, 2))).unwrap_err();
        assert!(matches!(err, SignalError::Shape { rows: 16, .. }));
        assert_eq!(signal.len(), 1);
        assert_eq!(signal.frame_log(), &[1]);
    }

    #[test]
    fn test_width_change_is_shape_error() {
        let mut signal = PoseSignal::new(1);
        signal.append(1, nose_at(0.0, 0.0)).unwrap();
        let err = signal.append(2, nose_with_confidence(0.1, 0.0, 0.9)).unwrap_err();
        assert!(matches!(err, SignalError::Shape { expected_width: 2, width: 3, .. }));
        assert_eq!(signal.len(), 1);
    }

    #[test]
    fn test_undetected_first_does_not_fix_width() {
        let mut signal = PoseSignal::new(1);
        signal.append(1, undetected_matrix(2)).unwrap();
        assert_eq!(signal.width(), None);

        signal.append(2, nose_with_confidence(0.1, 0.0, 0.9)).unwrap();
        signal.append(3, nose_with_confidence(0.2, 0.0, 0.9)).unwrap();
        assert_eq!(signal.width(), Some(3));
        assert_eq!(signal.frame_log(), &[1, 2, 3]);
        assert!(signal.signals().iter().all(|m| m.dim() == (17, 3)));
        assert!(is_undetected(&signal.signals()[0]));
    }

    #[test]
    fn test_undetected_takes_established_width() {
        let mut signal = PoseSignal::new(1);
        signal.append(1, nose_with_confidence(0.1, 0.0, 0.9)).unwrap();
        signal.append(2, undetected_matrix(2)).unwrap();
        assert_eq!(signal.signals()[1].dim(), (17, 3));
        assert!(signal.append(3, Array2::from_elem((17, 4), f32::NAN)).is_err());
    }

    #[test]
    fn test_table_padded_to_wider_width() {
        let mut signal = PoseSignal::new(2);
        signal.append(1, nose_at(0.5, 0.25)).unwrap();

        let wide = signal.as_table_with_width(ExportFormat::Wide, true, 3);
        assert_eq!(wide.columns, table_columns(ExportFormat::Wide, 3));
        assert_eq!(wide.rows[0].len(), 3 + 17 * 3);
        assert_eq!(wide.rows[0][3], Cell::Float(0.5));
        assert!(matches!(wide.rows[0][5], Cell::Float(c) if c.is_nan()));

        let long = signal.as_table_with_width(ExportFormat::Long, true, 3);
        assert_eq!(long.columns, vec!["person", "frame", "idx", "keypoint", "x", "y", "confidence"]);
        assert!(long.rows.iter().all(|r| r.len() == 7));
    }

    #[test]
    fn test_unsupported_width_is_shape_error() {
        let mut signal = PoseSignal::new(1);
        assert!(signal.append(1, Array2::zeros((17, 4))).is_err());
        assert!(signal.append(1, Array2::zeros((17, 1))).is_err());
        assert!(signal.is_empty());
        assert_eq!(signal.width(), None);
    }

    #[test]
    fn test_out_of_order_frame_rejected() {
        let mut signal = PoseSignal::new(4);
        signal.append(5, nose_at(0.0, 0.0)).unwrap();
        let err = signal.append(4, nose_at(0.0, 0.0)).unwrap_err();
        assert_eq!(err, SignalError::Order { person: 4, frame: 4, last: 5 });
        assert_eq!(signal.frame_log(), &[5]);
    }

    #[test]
    fn test_latest_pair() {
        let mut signal = PoseSignal::new(1);
        assert!(signal.latest_pair().is_none());
        signal.append(1, nose_at(0.0, 0.0)).unwrap();
        assert!(signal.latest_pair().is_none());
        signal.append(2, nose_at(1.0, 0.0)).unwrap();
        let ((f0, _), (f1, cur)) = signal.latest_pair().unwrap();
        assert_eq!((f0, f1), (1, 2));
        assert_eq!(cur[[0, 0]], 1.0);
    }

    #[test]
    fn test_wide_table_layout() {
        let mut signal = PoseSignal::new(3);
        signal.append(7, nose_at(0.25, 0.5)).unwrap();
        signal.append(8, nose_at(0.5, 0.5)).unwrap();

        let table = signal.as_table(ExportFormat::Wide, true);
        assert_eq!(table.columns.len(), 3 + 17 * 2);
        assert_eq!(table.columns[3], "nose_x");
        assert_eq!(table.columns[4], "nose_y");
        assert_eq!(table.len(), 2);

        let idx = table.column("idx").unwrap();
        assert_eq!(table.rows[0][idx], Cell::Int(1));
        assert_eq!(table.rows[1][idx], Cell::Int(2));
        assert_eq!(table.rows[0][3], Cell::Float(0.25));
    }

    #[test]
    fn test_long_table_layout() {
        let mut signal = PoseSignal::new(3);
        signal.append(7, nose_at(0.25, 0.5)).unwrap();

        let table = signal.as_table(ExportFormat::Long, false);
        assert_eq!(table.columns, vec!["person", "frame", "idx", "keypoint", "x", "y"]);
        assert_eq!(table.len(), 17);
        assert_eq!(table.rows[0][2], Cell::Int(0));
        assert_eq!(table.rows[0][3], Cell::Text("nose".into()));
        assert_eq!(table.rows[16][3], Cell::Text("right_ankle".into()));
    }

    proptest! {
        #[test]
        fn prop_frame_log_consistent(steps in proptest::collection::vec((0u64..4, any::<bool>()), 1..64)) {
            let mut signal = PoseSignal::new(0);
            let mut frame = 0u64;
            for (delta, bad_shape) in steps {
                frame += delta;
                let matrix = if bad_shape { Array2::zeros((5, 2)) } else { undetected_matrix(2) };
                let _ = signal.append(frame, matrix);
                prop_assert_eq!(signal.frame_log().len(), signal.signals().len());
                prop_assert!(signal.frame_log().windows(2).all(|w| w[0] <= w[1]));
            }
        }

        #[test]
        fn prop_rejected_append_leaves_state(frames in proptest::collection::vec(0u64..100, 1..32)) {
            let mut signal = PoseSignal::new(0);
            for frame in frames {
                let before = signal.frame_log().to_vec();
                match signal.append(frame, undetected_matrix(2)) {
                    Ok(()) => prop_assert_eq!(signal.len(), before.len() + 1),
                    Err(_) => prop_assert_eq!(signal.frame_log(), &before[..]),
                }
                prop_assert!(signal.frame_log().windows(2).all(|w| w[0] <= w[1]));
            }
        }
    }
}
