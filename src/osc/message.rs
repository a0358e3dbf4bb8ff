//! 送信する特徴量メッセージと受信側でのデコード

use rosc::{OscMessage, OscType};

use crate::crowd::CrowdSnapshot;
use crate::pose::{BodyRegion, KeypointMatrix};
use crate::signal::PersonId;

pub const PERSON_COUNT_ADDR: &str = "/dance/person_count";
/// 人物 ID なしでキーポイントを受ける旧受信側のアドレス
pub const LEGACY_KEYPOINTS_ADDR: &str = "/pose/keypoints";
pub const MOVEMENT_PATTERN: &str = "/dance/*movement";
pub const PERSON_KEYPOINTS_PATTERN: &str = "/dance/pose/person/*/keypoints";

pub fn movement_address(region: BodyRegion) -> String {
    format!("/dance/{}_movement", region.metric_name())
}

pub fn person_keypoints_address(person: PersonId) -> String {
    format!("/dance/pose/person/{}/keypoints", person)
}

pub fn build_person_count(count: usize) -> OscMessage {
    OscMessage {
        addr: PERSON_COUNT_ADDR.to_string(),
        args: vec![OscType::Int(i32::try_from(count).unwrap_or(i32::MAX))],
    }
}

pub fn build_movement(region: BodyRegion, value: f32) -> OscMessage {
    OscMessage {
        addr: movement_address(region),
        args: vec![OscType::Float(value)],
    }
}

/// 行優先で平坦化: x0, y0[, c0], x1, y1, ...
fn flatten(matrix: &KeypointMatrix) -> Vec<OscType> {
    matrix.iter().map(|v| OscType::Float(*v)).collect()
}

pub fn build_person_keypoints(person: PersonId, matrix: &KeypointMatrix) -> OscMessage {
    OscMessage {
        addr: person_keypoints_address(person),
        args: flatten(matrix),
    }
}

pub fn build_legacy_keypoints(matrix: &KeypointMatrix) -> OscMessage {
    OscMessage {
        addr: LEGACY_KEYPOINTS_ADDR.to_string(),
        args: flatten(matrix),
    }
}

/// スナップショット 1 つ分の人数と動き量のメッセージ。全身が先頭
pub fn snapshot_messages(snapshot: &CrowdSnapshot) -> Vec<OscMessage> {
    let mut msgs = vec![build_person_count(snapshot.person_count)];
    msgs.extend(
        snapshot
            .movement
            .iter()
            .map(|(region, value)| build_movement(*region, *value)),
    );
    msgs
}

/// デコードした特徴量
#[derive(Debug, Clone, PartialEq)]
pub enum Feature {
    PersonCount(i32),
    Movement { metric: String, value: f32 },
    PersonKeypoints { person: PersonId, values: Vec<f32> },
    LegacyKeypoints(Vec<f32>),
}

impl Feature {
    pub fn from_message(msg: &OscMessage) -> Option<Self> {
        let segments: Vec<&str> = msg.addr.trim_start_matches('/').split('/').collect();
        match segments.as_slice() {
            ["dance", "person_count"] => match msg.args.as_slice() {
                [OscType::Int(n)] => Some(Self::PersonCount(*n)),
                _ => None,
            },
            ["dance", name] => {
                let metric = name.strip_suffix("movement")?;
                let value = float_arg(msg.args.first()?)?;
                Some(Self::Movement {
                    metric: metric.trim_end_matches('_').to_string(),
                    value,
                })
            }
            ["dance", "pose", "person", id, "keypoints"] => Some(Self::PersonKeypoints {
                person: id.parse().ok()?,
                values: floats(&msg.args)?,
            }),
            ["pose", "keypoints"] => Some(Self::LegacyKeypoints(floats(&msg.args)?)),
            _ => None,
        }
    }
}

pub(crate) fn float_arg(arg: &OscType) -> Option<f32> {
    match arg {
        OscType::Float(v) => Some(*v),
        OscType::Double(v) => Some(*v as f32),
        OscType::Int(v) => Some(*v as f32),
        _ => None,
    }
}

fn floats(args: &[OscType]) -> Option<Vec<f32>> {
    args.iter().map(float_arg).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{undetected_matrix, KeypointIndex};
    use std::collections::BTreeMap;

    #[test]
    fn test_addresses() {
        assert_eq!(movement_address(BodyRegion::Full), "/dance/total_movement");
        assert_eq!(movement_address(BodyRegion::Arms), "/dance/arms_movement");
        assert_eq!(person_keypoints_address(7), "/dance/pose/person/7/keypoints");
    }

    #[test]
    fn test_keypoints_flattened_row_major() {
        let mut m = undetected_matrix(2);
        m[[KeypointIndex::Nose.index(), 0]] = 0.1;
        m[[KeypointIndex::Nose.index(), 1]] = 0.2;
        m[[KeypointIndex::LeftEye.index(), 0]] = 0.3;

        let msg = build_person_keypoints(4, &m);
        assert_eq!(msg.args.len(), 34);
        assert_eq!(msg.args[0], OscType::Float(0.1));
        assert_eq!(msg.args[1], OscType::Float(0.2));
        assert_eq!(msg.args[2], OscType::Float(0.3));

        let legacy = build_legacy_keypoints(&m);
        assert_eq!(legacy.addr, "/pose/keypoints");
        assert_eq!(legacy.args.len(), msg.args.len());
    }

    #[test]
    fn test_snapshot_messages() {
        let snapshot = CrowdSnapshot {
            frame: 3,
            person_count: 2,
            active: vec![1, 2],
            movement: BTreeMap::from([(BodyRegion::Full, 1.5), (BodyRegion::Legs, 0.5)]),
        };
        let msgs = snapshot_messages(&snapshot);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0], build_person_count(2));
        assert_eq!(msgs[1].addr, "/dance/total_movement");
        assert_eq!(msgs[1].args, vec![OscType::Float(1.5)]);
        assert_eq!(msgs[2].addr, "/dance/legs_movement");
    }

    #[test]
    fn test_decode_features() {
        assert_eq!(
            Feature::from_message(&build_person_count(5)),
            Some(Feature::PersonCount(5))
        );
        assert_eq!(
            Feature::from_message(&build_movement(BodyRegion::Full, 0.25)),
            Some(Feature::Movement { metric: "total".into(), value: 0.25 })
        );
        let arms = OscMessage {
            addr: "/dance/armsmovement".into(),
            args: vec![OscType::Double(2.0)],
        };
        assert_eq!(
            Feature::from_message(&arms),
            Some(Feature::Movement { metric: "arms".into(), value: 2.0 })
        );

        let m = undetected_matrix(2);
        match Feature::from_message(&build_person_keypoints(9, &m)) {
            Some(Feature::PersonKeypoints { person, values }) => {
                assert_eq!(person, 9);
                assert_eq!(values.len(), 34);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            Feature::from_message(&build_legacy_keypoints(&m)),
            Some(Feature::LegacyKeypoints(_))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown() {
        let msg = OscMessage { addr: "/dance/movement/extra".into(), args: vec![] };
        assert_eq!(Feature::from_message(&msg), None);
        let msg = OscMessage { addr: "/dance/person_count".into(), args: vec![OscType::String("5".into())] };
        assert_eq!(Feature::from_message(&msg), None);
    }
}
